// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Journey records: node instances and their slots, attachments, revisions,
//! events and deadlines.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::playbook::Multiplicity;

/// Node instance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Locked,
    Todo,
    Active,
    InProgress,
    Submitted,
    Waiting,
    NeedsFixes,
    Done,
}

impl NodeState {
    /// Every state.
    pub const ALL: [NodeState; 8] = [
        NodeState::Locked,
        NodeState::Todo,
        NodeState::Active,
        NodeState::InProgress,
        NodeState::Submitted,
        NodeState::Waiting,
        NodeState::NeedsFixes,
        NodeState::Done,
    ];

    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Todo => "todo",
            Self::Active => "active",
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Waiting => "waiting",
            Self::NeedsFixes => "needs_fixes",
            Self::Done => "done",
        }
    }

    /// Parse a state from a string.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate slot status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Empty,
    Filled,
    Submitted,
    Approved,
    Rejected,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Filled => "filled",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "empty" => Some(Self::Empty),
            "filled" => Some(Self::Filled),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Review status of one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStatus {
    Submitted,
    Approved,
    Rejected,
}

impl AttachmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Last reviewer outcome recorded on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Approved,
    FixesRequested,
    Rejected,
}

impl ReviewOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::FixesRequested => "fixes_requested",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::Approved),
            "fixes_requested" => Some(Self::FixesRequested),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Audit event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeEventKind {
    Opened,
    Submitted,
    Reviewed,
    Approved,
    Rejected,
    NeedsFixes,
    Unlocked,
    DeadlineSet,
    AttachmentAdded,
    AttachmentReplaced,
    Reopened,
}

impl NodeEventKind {
    const ALL: [NodeEventKind; 11] = [
        NodeEventKind::Opened,
        NodeEventKind::Submitted,
        NodeEventKind::Reviewed,
        NodeEventKind::Approved,
        NodeEventKind::Rejected,
        NodeEventKind::NeedsFixes,
        NodeEventKind::Unlocked,
        NodeEventKind::DeadlineSet,
        NodeEventKind::AttachmentAdded,
        NodeEventKind::AttachmentReplaced,
        NodeEventKind::Reopened,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Submitted => "submitted",
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsFixes => "needs_fixes",
            Self::Unlocked => "unlocked",
            Self::DeadlineSet => "deadline_set",
            Self::AttachmentAdded => "attachment_added",
            Self::AttachmentReplaced => "attachment_replaced",
            Self::Reopened => "reopened",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Whether the event records a file operation rather than a lifecycle step.
    pub fn is_attachment(&self) -> bool {
        matches!(self, Self::AttachmentAdded | Self::AttachmentReplaced)
    }
}

/// A student's progress on one node of one playbook version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub playbook_version_id: String,
    pub node_slug: String,
    pub state: NodeState,
    pub locale: Option<String>,
    pub current_rev: i64,
    pub review_outcome: Option<ReviewOutcome>,
    pub opened_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic lock; bumped by every committed change to the instance.
    pub lock_version: i64,
}

/// Declared upload position inside a node instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    pub node_instance_id: String,
    pub slot_key: String,
    pub required: bool,
    pub multiplicity: Multiplicity,
    pub mime_whitelist: Vec<String>,
    pub status: SlotStatus,
}

impl Slot {
    /// Whether `mime` passes the whitelist. An empty whitelist accepts anything.
    pub fn accepts(&self, mime: &str) -> bool {
        let mime = mime.trim().to_ascii_lowercase();
        self.mime_whitelist.is_empty()
            || self.mime_whitelist.iter().any(|allowed| {
                let allowed = allowed.trim().to_ascii_lowercase();
                allowed == mime
                    || allowed
                        .strip_suffix("/*")
                        .is_some_and(|family| mime.starts_with(&format!("{family}/")))
            })
    }
}

/// File bound to a slot cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub slot_id: String,
    pub node_instance_id: String,
    /// Cell within the slot; always 0 for single slots.
    pub position: i64,
    pub blob_version_id: String,
    pub filename: String,
    pub size_bytes: i64,
    pub mime: String,
    pub uploaded_by: String,
    pub attached_at: DateTime<Utc>,
    pub is_active: bool,
    pub status: AttachmentStatus,
    pub reviewed_document_version_id: Option<String>,
    pub reviewer_id: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_note: Option<String>,
}

/// Numbered snapshot of a node's form payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormRevision {
    pub node_instance_id: String,
    pub rev: i64,
    pub form_data: Value,
    pub edited_by: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub id: String,
    pub node_instance_id: String,
    pub tenant_id: String,
    pub kind: NodeEventKind,
    pub actor_id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Due date for a (user, node) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDeadline {
    pub tenant_id: String,
    pub user_id: String,
    pub node_slug: String,
    pub due_at: DateTime<Utc>,
    pub set_by: String,
    pub updated_at: DateTime<Utc>,
}

/// Everything one journey operation writes, committed atomically.
///
/// Instances in `update_instances` carry the `lock_version` they were read
/// with; the store rejects the whole set if any of them moved in between.
#[derive(Debug, Clone, Default)]
pub struct JourneyChanges {
    pub insert_instances: Vec<NodeInstance>,
    pub update_instances: Vec<NodeInstance>,
    pub insert_slots: Vec<Slot>,
    pub update_slots: Vec<Slot>,
    pub insert_attachments: Vec<Attachment>,
    pub update_attachments: Vec<Attachment>,
    pub insert_revisions: Vec<FormRevision>,
    pub upsert_deadlines: Vec<NodeDeadline>,
    pub events: Vec<NodeEvent>,
}

impl JourneyChanges {
    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.insert_instances.is_empty()
            && self.update_instances.is_empty()
            && self.insert_slots.is_empty()
            && self.update_slots.is_empty()
            && self.insert_attachments.is_empty()
            && self.update_attachments.is_empty()
            && self.insert_revisions.is_empty()
            && self.upsert_deadlines.is_empty()
            && self.events.is_empty()
    }

    /// Queue an instance update unless it is already queued; replaces the queued copy.
    pub fn update_instance(&mut self, instance: NodeInstance) {
        if let Some(queued) = self
            .update_instances
            .iter_mut()
            .find(|i| i.id == instance.id)
        {
            *queued = instance;
        } else {
            self.update_instances.push(instance);
        }
    }

    /// Append an event.
    pub fn event(
        &mut self,
        instance: &NodeInstance,
        kind: NodeEventKind,
        actor_id: &str,
        payload: Value,
        at: DateTime<Utc>,
    ) {
        self.events.push(NodeEvent {
            id: uuid::Uuid::new_v4().to_string(),
            node_instance_id: instance.id.clone(),
            tenant_id: instance.tenant_id.clone(),
            kind,
            actor_id: actor_id.to_string(),
            payload,
            created_at: at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(whitelist: &[&str]) -> Slot {
        Slot {
            id: "s".into(),
            node_instance_id: "n".into(),
            slot_key: "cv".into(),
            required: true,
            multiplicity: Multiplicity::Single,
            mime_whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
            status: SlotStatus::Empty,
        }
    }

    #[test]
    fn test_state_names() {
        for state in NodeState::ALL {
            assert_eq!(NodeState::parse(state.as_str()), Some(state));
        }
        assert_eq!(NodeState::parse("archived"), None);
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(NodeEventKind::parse("deadline_set"), Some(NodeEventKind::DeadlineSet));
        assert!(NodeEventKind::AttachmentReplaced.is_attachment());
        assert!(!NodeEventKind::Submitted.is_attachment());
    }

    #[test]
    fn test_mime_whitelist() {
        let s = slot(&["application/pdf", "image/*"]);
        assert!(s.accepts("application/pdf"));
        assert!(s.accepts("Image/PNG"));
        assert!(!s.accepts("application/zip"));
        assert!(slot(&[]).accepts("anything/at-all"));
    }
}
