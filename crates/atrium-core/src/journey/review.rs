// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reviewer decisions on submitted nodes and on single attachments.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument};

use super::engine::{JourneyEngine, Snapshot, Working, new_instance, slot_rows, stage_slot};
use super::model::{
    Attachment, AttachmentStatus, JourneyChanges, NodeEventKind, NodeInstance, NodeState,
    ReviewOutcome, SlotStatus,
};
use super::state;
use crate::blob::BlobRef;
use crate::error::{Error, Result};
use crate::playbook::Playbook;
use crate::tenancy::ActorContext;

/// Reviewer decision on a whole node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// `submitted → done`; unlocks dependents.
    Approve,
    /// `submitted → needs_fixes`.
    RequestFixes,
    /// `submitted → needs_fixes`, recorded as a rejection.
    Reject,
    /// `done → submitted`. Admin only.
    Reopen,
}

impl ReviewDecision {
    fn target(&self) -> NodeState {
        match self {
            Self::Approve => NodeState::Done,
            Self::RequestFixes | Self::Reject => NodeState::NeedsFixes,
            Self::Reopen => NodeState::Submitted,
        }
    }

    fn event_kind(&self) -> NodeEventKind {
        match self {
            Self::Approve => NodeEventKind::Approved,
            Self::RequestFixes => NodeEventKind::NeedsFixes,
            Self::Reject => NodeEventKind::Rejected,
            Self::Reopen => NodeEventKind::Reopened,
        }
    }

    fn outcome(&self) -> Option<ReviewOutcome> {
        match self {
            Self::Approve => Some(ReviewOutcome::Approved),
            Self::RequestFixes => Some(ReviewOutcome::FixesRequested),
            Self::Reject => Some(ReviewOutcome::Rejected),
            Self::Reopen => None,
        }
    }

    /// Status stamped on slots and active attachments.
    fn file_status(&self) -> (SlotStatus, AttachmentStatus) {
        match self {
            Self::Approve => (SlotStatus::Approved, AttachmentStatus::Approved),
            Self::RequestFixes | Self::Reject => (SlotStatus::Rejected, AttachmentStatus::Rejected),
            Self::Reopen => (SlotStatus::Submitted, AttachmentStatus::Submitted),
        }
    }
}

/// Reviewer's marked-up copy of one attachment.
#[derive(Debug, Clone)]
pub struct ReviewedDocument {
    pub attachment_id: String,
    pub blob: BlobRef,
}

/// Input of [`JourneyEngine::review`].
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    pub note: Option<String>,
    pub reviewed_document: Option<ReviewedDocument>,
}

impl ReviewRequest {
    pub fn new(decision: ReviewDecision) -> Self {
        Self {
            decision,
            note: None,
            reviewed_document: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_document(mut self, attachment_id: impl Into<String>, blob: BlobRef) -> Self {
        self.reviewed_document = Some(ReviewedDocument {
            attachment_id: attachment_id.into(),
            blob,
        });
        self
    }
}

/// Reviewer decision on one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentDecision {
    Approve,
    Reject,
}

impl JourneyEngine {
    /// Record a reviewer decision on a node.
    ///
    /// The actor's roles must pass the transition gate for the node's current
    /// state. Approval completes the node and, in the same commit, unlocks
    /// every dependent whose prerequisites are now all done.
    #[instrument(
        skip(self, ctx, request),
        fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id, decision = ?request.decision)
    )]
    pub async fn review(
        &self,
        ctx: &ActorContext,
        user: &str,
        slug: &str,
        request: ReviewRequest,
    ) -> Result<NodeInstance> {
        let playbook = self.playbooks.require_active(&ctx.tenant_id).await?;
        playbook.node_definition(slug)?;
        let playbook = &*playbook;
        let request = &request;

        let instance = self
            .commit("review", move || async move {
                let now = Utc::now();
                let snapshot = self.snapshot(ctx, user, playbook).await?;
                let instance = snapshot
                    .instances
                    .get(slug)
                    .cloned()
                    .ok_or_else(|| Error::not_found("node instance", format!("{user}/{slug}")))?;

                let decision = request.decision;
                let from = instance.state;
                state::check(from, decision.target(), &ctx.roles)?;

                let mut changes = JourneyChanges::default();
                let mut working = Working::existing(instance);
                let (slot_status, attachment_status) = decision.file_status();

                let slots = self.store.list_slots(&working.instance.id).await?;
                let attachments = self.store.list_attachments(&working.instance.id).await?;
                if let Some(doc) = &request.reviewed_document
                    && !attachments.iter().any(|a| a.id == doc.attachment_id)
                {
                    return Err(Error::not_found("attachment", doc.attachment_id.clone()));
                }

                for attachment in attachments.into_iter().filter(|a| a.is_active) {
                    let mut reviewed = attachment;
                    reviewed.status = attachment_status;
                    if decision != ReviewDecision::Reopen {
                        reviewed.reviewer_id = Some(ctx.actor_id.clone());
                        reviewed.reviewed_at = Some(now);
                    }
                    if let Some(doc) = &request.reviewed_document
                        && doc.attachment_id == reviewed.id
                    {
                        reviewed.reviewed_document_version_id = Some(doc.blob.version_id.clone());
                        reviewed.review_note = request.note.clone();
                    }
                    changes.update_attachments.push(reviewed);
                }
                for mut slot in slots {
                    if slot.status != SlotStatus::Empty && slot.status != slot_status {
                        slot.status = slot_status;
                        stage_slot(&mut changes, slot, false);
                    }
                }

                let inst = &mut working.instance;
                inst.state = decision.target();
                inst.review_outcome = decision.outcome();
                inst.completed_at = match decision {
                    ReviewDecision::Approve => Some(now),
                    ReviewDecision::Reopen => None,
                    _ => inst.completed_at,
                };
                working.touch(now);

                let mut payload = json!({"from": from.as_str(), "note": request.note});
                if let Some(doc) = &request.reviewed_document {
                    payload["reviewed_attachment_id"] = json!(doc.attachment_id);
                    payload["reviewed_document_version_id"] = json!(doc.blob.version_id);
                }
                changes.event(&working.instance, decision.event_kind(), &ctx.actor_id, payload, now);

                if decision == ReviewDecision::Approve {
                    unlock_dependents(&mut changes, ctx, user, playbook, slug, &snapshot, now)?;
                }

                let instance = working.stage(&mut changes);
                Ok::<_, Error>((changes, instance))
            })
            .await?;

        if request.decision != ReviewDecision::Reopen {
            self.close_reviews(ctx, &instance.id, "decided on the node").await;
        }

        info!(node = %slug, state = %instance.state, "Node reviewed");
        Ok(instance)
    }

    /// Approve or reject one attachment without moving the node.
    #[instrument(skip(self, ctx, note), fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id))]
    pub async fn review_attachment(
        &self,
        ctx: &ActorContext,
        attachment_id: &str,
        decision: AttachmentDecision,
        note: Option<String>,
    ) -> Result<Attachment> {
        if !ctx.is_staff() {
            return Err(Error::NotAuthorized(
                "reviewing attachments requires a staff role".to_string(),
            ));
        }
        let note = &note;

        self.commit("review_attachment", move || async move {
            let now = Utc::now();
            let attachment = self
                .store
                .get_attachment(attachment_id)
                .await?
                .ok_or_else(|| Error::not_found("attachment", attachment_id))?;
            let instance = self
                .store
                .get_node_instance_by_id(&attachment.node_instance_id)
                .await?
                .filter(|i| i.tenant_id == ctx.tenant_id)
                .ok_or_else(|| Error::not_found("attachment", attachment_id))?;
            if instance.state == NodeState::Done {
                return Err(Error::NodeFrozen(instance.node_slug));
            }

            let mut reviewed = attachment;
            reviewed.status = match decision {
                AttachmentDecision::Approve => AttachmentStatus::Approved,
                AttachmentDecision::Reject => AttachmentStatus::Rejected,
            };
            reviewed.reviewer_id = Some(ctx.actor_id.clone());
            reviewed.reviewed_at = Some(now);
            reviewed.review_note = note.clone();

            let mut changes = JourneyChanges::default();
            let mut working = Working::existing(instance);
            working.touch(now);
            changes.event(
                &working.instance,
                NodeEventKind::Reviewed,
                &ctx.actor_id,
                json!({
                    "attachment_id": reviewed.id,
                    "decision": decision,
                    "note": note,
                }),
                now,
            );
            changes.update_attachments.push(reviewed.clone());
            working.stage(&mut changes);
            Ok::<_, Error>((changes, reviewed))
        })
        .await
    }
}

/// Move every dependent of `completed` whose prerequisites are now all done
/// from `locked` (or nothing) to `todo`.
fn unlock_dependents(
    changes: &mut JourneyChanges,
    ctx: &ActorContext,
    user: &str,
    playbook: &Playbook,
    completed: &str,
    snapshot: &Snapshot,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut staged = HashSet::new();
    for dependent in playbook.dependents(completed) {
        if !staged.insert(dependent.as_str()) {
            continue;
        }
        let ready = playbook
            .prerequisites(dependent)?
            .iter()
            .all(|p| p == completed || snapshot.state_of(p) == Some(NodeState::Done));
        if !ready {
            continue;
        }

        let payload: Value = json!({"from": "locked", "completed": completed});
        match snapshot.instances.get(dependent) {
            Some(existing) if existing.state == NodeState::Locked => {
                let mut working = Working::existing(existing.clone());
                working.instance.state = NodeState::Todo;
                working.touch(now);
                changes.event(&working.instance, NodeEventKind::Unlocked, &ctx.actor_id, payload, now);
                working.stage(changes);
            }
            Some(_) => {}
            None => {
                let def = playbook.node_definition(dependent)?;
                let instance = new_instance(&ctx.tenant_id, user, playbook, dependent, NodeState::Todo, now);
                changes.insert_slots.extend(slot_rows(def, &instance.id));
                changes.event(&instance, NodeEventKind::Unlocked, &ctx.actor_id, payload, now);
                changes.insert_instances.push(instance);
            }
        }
    }
    Ok(())
}
