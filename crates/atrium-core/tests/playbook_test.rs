// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Playbook versioning and activation against SQLite.

mod common;

use std::sync::Arc;

use serde_json::json;

use atrium_core::playbook::{PlaybookLoader, checksum_hex};

use common::{Harness, diamond_playbook, linear_playbook};

fn raw(doc: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(doc).unwrap()
}

#[tokio::test]
async fn test_same_bytes_reuse_version() {
    let h = Harness::new().await;
    let doc = raw(&linear_playbook());

    let first = h.playbooks.ensure_active(&doc, None).await.unwrap();
    let second = h.playbooks.ensure_active(&doc, None).await.unwrap();
    assert_eq!(first.version_id(), second.version_id());
    assert_eq!(first.checksum(), checksum_hex(&doc));

    // A fresh loader sees the stored version, not a cached one.
    let cold = PlaybookLoader::new(h.store.clone());
    let third = cold.ensure_active(&doc, None).await.unwrap();
    assert_eq!(third.version_id(), first.version_id());
    let loaded = cold.version(first.version_id()).await.unwrap();
    assert_eq!(loaded.raw(), doc.as_slice());
}

#[tokio::test]
async fn test_tenant_pointer_shadows_global() {
    let h = Harness::new().await;
    let global = h
        .playbooks
        .ensure_active(&raw(&linear_playbook()), None)
        .await
        .unwrap();

    let active = h.playbooks.require_active(&h.tenant.id).await.unwrap();
    assert_eq!(active.version_id(), global.version_id());

    let own = h.activate(&diamond_playbook()).await;
    assert_ne!(own.version_id(), global.version_id());
    let active = h.playbooks.require_active(&h.tenant.id).await.unwrap();
    assert_eq!(active.version_id(), own.version_id());
    assert_eq!(active.playbook_id(), "phd-diamond");

    let other = h.playbooks.require_active("another-tenant").await.unwrap();
    assert_eq!(other.version_id(), global.version_id());
}

#[tokio::test]
async fn test_switching_back_reuses_old_version() {
    let h = Harness::new().await;
    let v1 = h.activate(&linear_playbook()).await;
    let v2 = h.activate(&diamond_playbook()).await;
    let back = h.activate(&linear_playbook()).await;

    assert_ne!(v1.version_id(), v2.version_id());
    assert_eq!(back.version_id(), v1.version_id());
    let active = h.playbooks.require_active(&h.tenant.id).await.unwrap();
    assert_eq!(active.version_id(), v1.version_id());
}

#[tokio::test]
async fn test_invalid_definitions_are_not_activated() {
    let h = Harness::new().await;
    let cases = [
        (b"{not json".to_vec(), "PARSE_ERROR"),
        (
            raw(&json!({
                "playbook_id": "p", "version": "1",
                "worlds": [{"id": "W", "nodes": [
                    {"id": "A", "type": "info", "prerequisites": ["B"]},
                    {"id": "B", "type": "info", "prerequisites": ["A"]}
                ]}]
            })),
            "CYCLE_ERROR",
        ),
        (
            raw(&json!({
                "playbook_id": "p", "version": "1",
                "worlds": [{"id": "W", "nodes": [
                    {"id": "A", "type": "form", "prerequisites": ["ghost"]}
                ]}]
            })),
            "PARSE_ERROR",
        ),
        (
            raw(&json!({
                "playbook_id": "p", "version": "1",
                "worlds": [{"id": "W", "nodes": [{"id": "pay", "type": "payment"}]}]
            })),
            "PARSE_ERROR",
        ),
    ];

    for (bytes, kind) in cases {
        let err = h
            .playbooks
            .ensure_active(&bytes, Some(&h.tenant.id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), kind);
    }

    let err = h.playbooks.require_active(&h.tenant.id).await.unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
}

#[tokio::test]
async fn test_concurrent_activation_converges() {
    let h = Harness::new().await;
    let doc = Arc::new(raw(&linear_playbook()));
    let tenant = h.tenant.id.clone();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let loader = h.playbooks.clone();
        let doc = doc.clone();
        let tenant = tenant.clone();
        handles.push(tokio::spawn(async move {
            loader
                .ensure_active(&doc, Some(&tenant))
                .await
                .map(|p| p.version_id().to_string())
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
}
