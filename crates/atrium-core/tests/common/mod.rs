// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for atrium-core integration tests.
//!
//! Every test gets its own in-memory SQLite database with migrations applied,
//! one active tenant and the engines wired over it.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{Duration, Utc};
use serde_json::{Value, json};

use atrium_core::blob::MemoryBlobStore;
use atrium_core::journey::{JourneyConfig, JourneyEngine, UploadRequest};
use atrium_core::persistence::{DirectoryStore, SqliteStore};
use atrium_core::playbook::{Playbook, PlaybookLoader};
use atrium_core::tenancy::{ActorContext, Membership, Role, Tenant};
use atrium_core::workflow::WorkflowEngine;

/// Engines over one fresh database.
pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub tenant: Tenant,
    pub playbooks: Arc<PlaybookLoader>,
    pub blobs: Arc<MemoryBlobStore>,
    pub workflows: Arc<WorkflowEngine>,
    joined: AtomicI64,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(SqliteStore::in_memory().await.expect("in-memory store"));
        let tenant = Tenant::new("kaznmu", "KazNMU");
        store.upsert_tenant(&tenant).await.expect("insert tenant");
        let playbooks = Arc::new(PlaybookLoader::new(store.clone()));
        let workflows = Arc::new(WorkflowEngine::new(store.clone(), store.clone()));
        Self {
            store,
            tenant,
            playbooks,
            blobs: Arc::new(MemoryBlobStore::new()),
            workflows,
            joined: AtomicI64::new(0),
        }
    }

    /// Context of `user` in the harness tenant, without a stored membership.
    pub fn ctx(&self, user: &str, roles: &[Role]) -> ActorContext {
        ActorContext::new(
            self.tenant.id.clone(),
            user,
            roles.iter().copied().collect::<atrium_core::tenancy::RoleSet>(),
        )
    }

    /// Store a membership and return the member's context. Members join one
    /// second apart, so earlier calls hold their roles longer.
    pub async fn member(&self, user: &str, roles: &[Role]) -> ActorContext {
        let offset = self.joined.fetch_add(1, Ordering::SeqCst);
        let membership = Membership {
            tenant_id: self.tenant.id.clone(),
            user_id: user.to_string(),
            roles: roles.iter().copied().collect(),
            is_active: true,
            created_at: Utc::now() - Duration::hours(1) + Duration::seconds(offset),
        };
        self.store
            .upsert_membership(&membership)
            .await
            .expect("insert membership");
        self.ctx(user, roles)
    }

    /// Store and activate a playbook for the harness tenant.
    pub async fn activate(&self, document: &Value) -> Arc<Playbook> {
        let raw = serde_json::to_vec(document).expect("serialize playbook");
        self.playbooks
            .ensure_active(&raw, Some(&self.tenant.id))
            .await
            .expect("activate playbook")
    }

    /// Journey engine without review workflows.
    pub fn journeys(&self) -> JourneyEngine {
        JourneyEngine::new(
            self.store.clone(),
            self.playbooks.clone(),
            self.blobs.clone(),
            JourneyConfig::default(),
        )
    }

    /// Journey engine that starts a review workflow on every reviewed submit.
    pub fn reviewed_journeys(&self) -> JourneyEngine {
        self.journeys().with_workflows(self.workflows.clone())
    }
}

/// `A → B → C`: an upload node with a required form field, then a form
/// node, then a milestone.
pub fn linear_playbook() -> Value {
    json!({
        "playbook_id": "phd",
        "version": "2025.1",
        "locale_default": "ru",
        "worlds": [{
            "id": "W1",
            "title": {"ru": "Первый год", "en": "First year"},
            "nodes": [
                {
                    "id": "A",
                    "type": "upload",
                    "title": {"en": "Research proposal"},
                    "requirements": {
                        "uploads": [{"key": "proposal", "mime": ["application/pdf"]}],
                        "fields": [{"key": "topic", "required": true}]
                    }
                },
                {"id": "B", "type": "form", "prerequisites": ["A"]},
                {"id": "C", "type": "milestone", "prerequisites": ["B"]}
            ]
        }]
    })
}

/// `X` and `Y` both gate `Z`.
pub fn diamond_playbook() -> Value {
    json!({
        "playbook_id": "phd-diamond",
        "version": "1",
        "worlds": [{
            "id": "W1",
            "nodes": [
                {"id": "X", "type": "form"},
                {"id": "Y", "type": "form"},
                {"id": "Z", "type": "milestone", "prerequisites": ["X", "Y"]}
            ]
        }]
    })
}

/// Upload node with a multi-file slot and an optional single slot.
pub fn portfolio_playbook() -> Value {
    json!({
        "playbook_id": "portfolio",
        "version": "1",
        "worlds": [{
            "id": "W1",
            "nodes": [{
                "id": "P",
                "type": "upload",
                "requirements": {
                    "uploads": [
                        {"key": "papers", "mime": ["application/pdf", "image/*"], "multiplicity": "multi"},
                        {"key": "cover", "required": false}
                    ]
                }
            }]
        }]
    })
}

pub fn pdf(slot: &str, filename: &str, body: &[u8]) -> UploadRequest {
    UploadRequest {
        slot_key: slot.to_string(),
        filename: filename.to_string(),
        mime: "application/pdf".to_string(),
        bytes: body.to_vec(),
        position: None,
    }
}
