// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Journey engine.
//!
//! Tracks each student's progress through the active playbook. Every node a
//! student touches gets a [`NodeInstance`] keyed by (tenant, user, playbook
//! version, node slug); the instance owns its upload slots, attachments, form
//! revisions and an append-only event log.
//!
//! All mutations follow the same shape:
//!
//! 1. read the instance (and whatever else the operation needs),
//! 2. validate and compute a [`JourneyChanges`] set in memory,
//! 3. commit the set in one transaction guarded by the instance `lock_version`,
//! 4. on a lost race, start over from step 1.
//!
//! Validation failures return before step 3, so they never leave partial
//! writes or audit events behind.

mod engine;
mod model;
mod review;
pub mod state;

pub use engine::{AttachRequest, JourneyEngine, SlotView, Submission, UploadRequest};
pub use model::{
    Attachment, AttachmentStatus, FormRevision, JourneyChanges, NodeDeadline, NodeEvent,
    NodeEventKind, NodeInstance, NodeState, ReviewOutcome, Slot, SlotStatus,
};
pub use review::{AttachmentDecision, ReviewDecision, ReviewRequest, ReviewedDocument};

/// Default upload limit: 25 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: i64 = 25 * 1024 * 1024;

/// Journey engine settings.
#[derive(Debug, Clone)]
pub struct JourneyConfig {
    /// Largest accepted attachment.
    pub max_upload_bytes: i64,
    /// Commit attempts before a contended operation gives up.
    pub commit_attempts: u32,
    /// Entity type under which reviewed submissions start workflows.
    pub review_entity_type: String,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            commit_attempts: 3,
            review_entity_type: "journey_node".to_string(),
        }
    }
}
