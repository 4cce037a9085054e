// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::model::{
    Attachment, AttachmentStatus, FormRevision, JourneyChanges, NodeDeadline, NodeEvent,
    NodeEventKind, NodeInstance, NodeState, Slot, SlotStatus,
};
use super::{JourneyConfig, state};
use crate::blob::{BlobRef, BlobStore, node_object_key};
use crate::error::{Error, Result};
use crate::persistence::JourneyStore;
use crate::playbook::{Multiplicity, NodeDefinition, Playbook, PlaybookLoader};
use crate::tenancy::{ActorContext, Role};
use crate::workflow::{StartWorkflow, WorkflowEngine};

/// Roles that may edit a student's drafts besides the student.
const DRAFT_EDITORS: [Role; 2] = [Role::Advisor, Role::Admin];

/// File to bind to a slot. The bytes are already in the blob store.
#[derive(Debug, Clone)]
pub struct AttachRequest {
    pub slot_key: String,
    pub filename: String,
    pub blob: BlobRef,
    /// Cell of a `multi` slot; the next free cell when omitted.
    pub position: Option<i64>,
}

/// File to store and bind to a slot.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub slot_key: String,
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
    pub position: Option<i64>,
}

/// A slot with every attachment ever bound to it, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub slot: Slot,
    pub attachments: Vec<Attachment>,
}

/// Everything a reviewer needs to judge a node.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub instance: NodeInstance,
    pub slots: Vec<SlotView>,
    /// Revision `current_rev`, if any form was saved.
    pub form: Option<FormRevision>,
    pub deadline: Option<NodeDeadline>,
}

// ============================================================================
// Working copies
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    New,
    Changed,
    Unchanged,
}

/// Instance being modified by one operation.
pub(super) struct Working {
    pub(super) instance: NodeInstance,
    origin: Origin,
}

impl Working {
    pub(super) fn existing(instance: NodeInstance) -> Self {
        Self {
            instance,
            origin: Origin::Unchanged,
        }
    }

    fn created(instance: NodeInstance) -> Self {
        Self {
            instance,
            origin: Origin::New,
        }
    }

    pub(super) fn is_new(&self) -> bool {
        self.origin == Origin::New
    }

    pub(super) fn touch(&mut self, now: DateTime<Utc>) {
        self.instance.updated_at = now;
        if self.origin == Origin::Unchanged {
            self.origin = Origin::Changed;
        }
    }

    /// Queue the instance write and return the instance as it will read
    /// after commit.
    pub(super) fn stage(self, changes: &mut JourneyChanges) -> NodeInstance {
        match self.origin {
            Origin::New => {
                changes.insert_instances.push(self.instance.clone());
                self.instance
            }
            Origin::Changed => {
                changes.update_instance(self.instance.clone());
                let mut committed = self.instance;
                committed.lock_version += 1;
                committed
            }
            Origin::Unchanged => self.instance,
        }
    }
}

/// A user's instances for one playbook version, by slug.
pub(super) struct Snapshot {
    pub(super) instances: HashMap<String, NodeInstance>,
}

impl Snapshot {
    pub(super) fn state_of(&self, slug: &str) -> Option<NodeState> {
        self.instances.get(slug).map(|i| i.state)
    }

    /// Prerequisites of `slug` that are not done.
    pub(super) fn missing_prerequisites(&self, playbook: &Playbook, slug: &str) -> Result<Vec<String>> {
        Ok(playbook
            .prerequisites(slug)?
            .into_iter()
            .filter(|p| self.state_of(p) != Some(NodeState::Done))
            .collect())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Drives node instances through their lifecycle.
pub struct JourneyEngine {
    pub(super) store: Arc<dyn JourneyStore>,
    pub(super) playbooks: Arc<PlaybookLoader>,
    blobs: Arc<dyn BlobStore>,
    workflows: Option<Arc<WorkflowEngine>>,
    pub(super) config: JourneyConfig,
}

impl JourneyEngine {
    /// Create an engine. Reviewed submissions start no workflow until
    /// [`with_workflows`](Self::with_workflows) is called.
    pub fn new(
        store: Arc<dyn JourneyStore>,
        playbooks: Arc<PlaybookLoader>,
        blobs: Arc<dyn BlobStore>,
        config: JourneyConfig,
    ) -> Self {
        Self {
            store,
            playbooks,
            blobs,
            workflows: None,
            config,
        }
    }

    /// Start an approval workflow whenever a reviewed node is submitted.
    pub fn with_workflows(mut self, workflows: Arc<WorkflowEngine>) -> Self {
        self.workflows = Some(workflows);
        self
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Open a node for `user`.
    ///
    /// A student opening their own node moves it to `active`; staff opening a
    /// node on a student's behalf only materialise it as `todo`. Opening an
    /// already open node is a no-op.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id))]
    pub async fn open_node(&self, ctx: &ActorContext, user: &str, slug: &str) -> Result<NodeInstance> {
        ensure_journey_access(ctx, user)?;
        let playbook = self.playbooks.require_active(&ctx.tenant_id).await?;
        let def = playbook.node_definition(slug)?;
        let playbook = &*playbook;

        self.commit("open_node", move || async move {
            let now = Utc::now();
            let snapshot = self.snapshot(ctx, user, playbook).await?;
            let mut changes = JourneyChanges::default();
            let working = self.materialize(&mut changes, ctx, user, playbook, def, &snapshot, now)?;
            let instance = working.stage(&mut changes);
            Ok::<_, Error>((changes, instance))
        })
        .await
    }

    /// Append a form revision.
    ///
    /// Moves `active → in_progress` when the student edits their own draft.
    #[instrument(skip(self, ctx, payload), fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id))]
    pub async fn save_form_draft(
        &self,
        ctx: &ActorContext,
        user: &str,
        slug: &str,
        payload: Value,
    ) -> Result<FormRevision> {
        ensure_draft_editor(ctx, user)?;
        let playbook = self.playbooks.require_active(&ctx.tenant_id).await?;
        let def = playbook.node_definition(slug)?;
        let playbook = &*playbook;
        let payload = &payload;

        self.commit("save_form_draft", move || async move {
            let now = Utc::now();
            let snapshot = self.snapshot(ctx, user, playbook).await?;
            let mut changes = JourneyChanges::default();
            let mut working = self.prepare(&mut changes, ctx, user, playbook, def, &snapshot, now)?;

            let instance = &mut working.instance;
            let revision = FormRevision {
                node_instance_id: instance.id.clone(),
                rev: instance.current_rev + 1,
                form_data: payload.clone(),
                edited_by: ctx.actor_id.clone(),
                created_at: now,
            };
            instance.current_rev = revision.rev;
            if instance.state == NodeState::Active && is_opener(ctx, user) {
                state::check(NodeState::Active, NodeState::InProgress, &ctx.roles)?;
                instance.state = NodeState::InProgress;
                instance.started_at.get_or_insert(now);
            }
            working.touch(now);
            changes.insert_revisions.push(revision.clone());
            working.stage(&mut changes);
            Ok::<_, Error>((changes, revision))
        })
        .await
    }

    /// Bind an already stored blob to a slot.
    #[instrument(
        skip(self, ctx, request),
        fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id, slot = %request.slot_key)
    )]
    pub async fn attach_file(
        &self,
        ctx: &ActorContext,
        user: &str,
        slug: &str,
        request: AttachRequest,
    ) -> Result<Attachment> {
        ensure_draft_editor(ctx, user)?;
        if request.blob.size > self.config.max_upload_bytes {
            return Err(Error::FileTooLarge {
                size: request.blob.size,
                limit: self.config.max_upload_bytes,
            });
        }
        let playbook = self.playbooks.require_active(&ctx.tenant_id).await?;
        let def = playbook.node_definition(slug)?;
        let playbook = &*playbook;
        let request = &request;

        self.commit("attach_file", move || async move {
            let now = Utc::now();
            let snapshot = self.snapshot(ctx, user, playbook).await?;
            let mut changes = JourneyChanges::default();
            let mut working = self.prepare(&mut changes, ctx, user, playbook, def, &snapshot, now)?;
            if working.instance.state == NodeState::Done {
                return Err(Error::NodeFrozen(slug.to_string()));
            }

            let (slots, attachments) = if working.is_new() {
                (changes.insert_slots.clone(), Vec::new())
            } else {
                (
                    self.store.list_slots(&working.instance.id).await?,
                    self.store.list_attachments(&working.instance.id).await?,
                )
            };
            let mut slot = slots
                .into_iter()
                .find(|s| s.slot_key == request.slot_key)
                .ok_or_else(|| Error::not_found("slot", request.slot_key.clone()))?;
            if !slot.accepts(&request.blob.mime) {
                return Err(Error::InvalidMime {
                    slot: slot.slot_key.clone(),
                    mime: request.blob.mime.clone(),
                });
            }

            let active: Vec<&Attachment> = attachments
                .iter()
                .filter(|a| a.slot_id == slot.id && a.is_active)
                .collect();
            let position = match (slot.multiplicity, request.position) {
                (Multiplicity::Single, None | Some(0)) => 0,
                (Multiplicity::Single, Some(p)) => {
                    return Err(Error::Validation(format!(
                        "slot '{}' holds a single file; position {p} is invalid",
                        slot.slot_key
                    )));
                }
                (Multiplicity::Multi, Some(p)) if p < 0 => {
                    return Err(Error::Validation(format!("position {p} is negative")));
                }
                (Multiplicity::Multi, Some(p)) => p,
                (Multiplicity::Multi, None) => active
                    .iter()
                    .map(|a| a.position + 1)
                    .max()
                    .unwrap_or(0),
            };

            let attachment = Attachment {
                id: uuid::Uuid::new_v4().to_string(),
                slot_id: slot.id.clone(),
                node_instance_id: working.instance.id.clone(),
                position,
                blob_version_id: request.blob.version_id.clone(),
                filename: request.filename.clone(),
                size_bytes: request.blob.size,
                mime: request.blob.mime.clone(),
                uploaded_by: ctx.actor_id.clone(),
                attached_at: now,
                is_active: true,
                status: AttachmentStatus::Submitted,
                reviewed_document_version_id: None,
                reviewer_id: None,
                reviewed_at: None,
                review_note: None,
            };

            let mut payload = json!({
                "slot": slot.slot_key,
                "position": position,
                "attachment_id": attachment.id,
                "filename": attachment.filename,
            });
            let kind = match active.iter().find(|a| a.position == position) {
                Some(previous) => {
                    let mut retired = (*previous).clone();
                    retired.is_active = false;
                    payload["replaced"] = json!(retired.id);
                    changes.update_attachments.push(retired);
                    NodeEventKind::AttachmentReplaced
                }
                None => NodeEventKind::AttachmentAdded,
            };
            changes.insert_attachments.push(attachment.clone());

            if slot.status != SlotStatus::Filled {
                slot.status = SlotStatus::Filled;
                stage_slot(&mut changes, slot, working.is_new());
            }

            if working.instance.state == NodeState::Active && is_opener(ctx, user) {
                state::check(NodeState::Active, NodeState::InProgress, &ctx.roles)?;
                working.instance.state = NodeState::InProgress;
                working.instance.started_at.get_or_insert(now);
            }
            working.touch(now);
            changes.event(&working.instance, kind, &ctx.actor_id, payload, now);
            working.stage(&mut changes);
            Ok::<_, Error>((changes, attachment))
        })
        .await
    }

    /// Store bytes in the blob store, then bind them to a slot.
    #[instrument(
        skip(self, ctx, request),
        fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id, bytes = request.bytes.len())
    )]
    pub async fn upload_file(
        &self,
        ctx: &ActorContext,
        user: &str,
        slug: &str,
        request: UploadRequest,
    ) -> Result<Attachment> {
        ensure_draft_editor(ctx, user)?;
        let size = i64::try_from(request.bytes.len()).unwrap_or(i64::MAX);
        if size > self.config.max_upload_bytes {
            return Err(Error::FileTooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }

        let key = node_object_key(user, slug, &request.slot_key, &request.filename, Utc::now());
        let blob = self
            .blobs
            .put(&key, request.bytes, &request.mime)
            .await
            .map_err(|e| match e {
                Error::BlobWriteFailed(_) => e,
                other => Error::BlobWriteFailed(other.to_string()),
            })?;
        debug!(key = %blob.key, version_id = %blob.version_id, "Stored upload");

        self.attach_file(
            ctx,
            user,
            slug,
            AttachRequest {
                slot_key: request.slot_key,
                filename: request.filename,
                blob,
                position: request.position,
            },
        )
        .await
    }

    /// Submit a node for review.
    ///
    /// Requires every required slot to hold an active attachment and the
    /// current form revision to satisfy the node's validators. Submitting
    /// from `todo` walks `todo → active → submitted` in one commit.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id))]
    pub async fn submit(&self, ctx: &ActorContext, user: &str, slug: &str) -> Result<NodeInstance> {
        if !ctx.is(user) {
            return Err(Error::NotAuthorized(
                "only the student may submit their own node".to_string(),
            ));
        }
        let playbook = self.playbooks.require_active(&ctx.tenant_id).await?;
        let def = playbook.node_definition(slug)?;
        let playbook_ref = &*playbook;

        let instance = self
            .commit("submit", move || async move {
                let now = Utc::now();
                let snapshot = self.snapshot(ctx, user, playbook_ref).await?;
                let mut changes = JourneyChanges::default();
                let mut working =
                    self.prepare(&mut changes, ctx, user, playbook_ref, def, &snapshot, now)?;

                let from = working.instance.state;
                let path = match from {
                    NodeState::Todo => vec![NodeState::Todo, NodeState::Active, NodeState::Submitted],
                    other => vec![other, NodeState::Submitted],
                };
                state::check_path(&path, &ctx.roles)?;

                let (slots, attachments, form) = if working.is_new() {
                    (changes.insert_slots.clone(), Vec::new(), None)
                } else {
                    let id = &working.instance.id;
                    let form = match working.instance.current_rev {
                        0 => None,
                        rev => self.store.get_form_revision(id, rev).await?,
                    };
                    (
                        self.store.list_slots(id).await?,
                        self.store.list_attachments(id).await?,
                        form,
                    )
                };

                for slot in slots.iter().filter(|s| s.required) {
                    if !attachments.iter().any(|a| a.slot_id == slot.id && a.is_active) {
                        return Err(Error::MissingRequiredSlot(slot.slot_key.clone()));
                    }
                }
                let form_data = form
                    .map(|f| f.form_data)
                    .unwrap_or_else(|| Value::Object(Default::default()));
                def.validate_form(&form_data)?;

                for mut slot in slots {
                    let filled = attachments.iter().any(|a| a.slot_id == slot.id && a.is_active);
                    if filled && slot.status != SlotStatus::Submitted {
                        slot.status = SlotStatus::Submitted;
                        stage_slot(&mut changes, slot, working.is_new());
                    }
                }
                for attachment in attachments {
                    if attachment.is_active && attachment.status != AttachmentStatus::Submitted {
                        let mut resubmitted = attachment;
                        resubmitted.status = AttachmentStatus::Submitted;
                        changes.update_attachments.push(resubmitted);
                    }
                }

                let instance = &mut working.instance;
                instance.state = NodeState::Submitted;
                instance.started_at.get_or_insert(now);
                instance.submitted_at = Some(now);
                instance.review_outcome = None;
                working.touch(now);
                changes.event(
                    &working.instance,
                    NodeEventKind::Submitted,
                    &ctx.actor_id,
                    json!({"from": from.as_str(), "rev": working.instance.current_rev}),
                    now,
                );
                let instance = working.stage(&mut changes);
                Ok::<_, Error>((changes, instance))
            })
            .await?;

        info!(node = %slug, instance_id = %instance.id, "Node submitted");
        if def.requires_review() {
            self.start_review(ctx, &instance, def).await;
        }
        Ok(instance)
    }

    /// Set the due date of a node for a student. Staff only.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id))]
    pub async fn set_deadline(
        &self,
        ctx: &ActorContext,
        user: &str,
        slug: &str,
        due_at: DateTime<Utc>,
    ) -> Result<NodeDeadline> {
        if !ctx.is_staff() {
            return Err(Error::NotAuthorized("setting deadlines requires a staff role".to_string()));
        }
        let playbook = self.playbooks.require_active(&ctx.tenant_id).await?;
        playbook.node_definition(slug)?;
        let playbook = &*playbook;

        self.commit("set_deadline", move || async move {
            let now = Utc::now();
            let deadline = NodeDeadline {
                tenant_id: ctx.tenant_id.clone(),
                user_id: user.to_string(),
                node_slug: slug.to_string(),
                due_at,
                set_by: ctx.actor_id.clone(),
                updated_at: now,
            };
            let mut changes = JourneyChanges::default();
            changes.upsert_deadlines.push(deadline.clone());

            // The audit trail lives on the instance; without one there is nowhere to log.
            if let Some(instance) = self
                .store
                .get_node_instance(&ctx.tenant_id, user, playbook.version_id(), slug)
                .await?
            {
                let mut working = Working::existing(instance);
                working.touch(now);
                changes.event(
                    &working.instance,
                    NodeEventKind::DeadlineSet,
                    &ctx.actor_id,
                    json!({"due_at": due_at}),
                    now,
                );
                working.stage(&mut changes);
            }
            Ok::<_, Error>((changes, deadline))
        })
        .await
    }

    /// Materialise instances for every node of the active playbook:
    /// `todo` when prerequisites are done, `locked` otherwise.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id))]
    pub async fn initialize_journey(&self, ctx: &ActorContext, user: &str) -> Result<Vec<NodeInstance>> {
        ensure_journey_access(ctx, user)?;
        let playbook = self.playbooks.require_active(&ctx.tenant_id).await?;
        let playbook = &*playbook;

        let created = self
            .commit("initialize_journey", move || async move {
                let now = Utc::now();
                let snapshot = self.snapshot(ctx, user, playbook).await?;
                let mut changes = JourneyChanges::default();
                for slug in playbook.topological_order() {
                    if snapshot.instances.contains_key(&slug) {
                        continue;
                    }
                    let def = playbook.node_definition(&slug)?;
                    let unlocked = snapshot.missing_prerequisites(playbook, &slug)?.is_empty();
                    let state = if unlocked { NodeState::Todo } else { NodeState::Locked };
                    let instance = new_instance(&ctx.tenant_id, user, playbook, &slug, state, now);
                    changes.insert_slots.extend(slot_rows(def, &instance.id));
                    if unlocked {
                        changes.event(
                            &instance,
                            NodeEventKind::Unlocked,
                            &ctx.actor_id,
                            json!({"reason": "initialize"}),
                            now,
                        );
                    }
                    changes.insert_instances.push(instance);
                }
                let created = changes.insert_instances.len();
                Ok::<_, Error>((changes, created))
            })
            .await?;

        info!(user, created, "Journey initialized");
        self.store
            .list_node_instances(&ctx.tenant_id, user, playbook.version_id())
            .await
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// State of every node for `user`. Nodes without an instance read as
    /// `todo` when unlockable and `locked` otherwise.
    pub async fn journey_state(
        &self,
        ctx: &ActorContext,
        user: &str,
    ) -> Result<BTreeMap<String, NodeState>> {
        ensure_journey_access(ctx, user)?;
        let playbook = self.playbooks.require_active(&ctx.tenant_id).await?;
        let snapshot = self.snapshot(ctx, user, &playbook).await?;

        let mut states = BTreeMap::new();
        for def in playbook.nodes() {
            let state = match snapshot.state_of(&def.slug) {
                Some(state) => state,
                None if snapshot.missing_prerequisites(&playbook, &def.slug)?.is_empty() => {
                    NodeState::Todo
                }
                None => NodeState::Locked,
            };
            states.insert(def.slug.clone(), state);
        }
        Ok(states)
    }

    /// Instance, slots, current form and deadline of one node.
    pub async fn submission(&self, ctx: &ActorContext, user: &str, slug: &str) -> Result<Submission> {
        ensure_journey_access(ctx, user)?;
        let instance = self.require_instance(ctx, user, slug).await?;

        let attachments = self.store.list_attachments(&instance.id).await?;
        let slots = self
            .store
            .list_slots(&instance.id)
            .await?
            .into_iter()
            .map(|slot| SlotView {
                attachments: attachments
                    .iter()
                    .filter(|a| a.slot_id == slot.id)
                    .cloned()
                    .collect(),
                slot,
            })
            .collect();
        let form = match instance.current_rev {
            0 => None,
            rev => self.store.get_form_revision(&instance.id, rev).await?,
        };
        let deadline = self.store.get_deadline(&ctx.tenant_id, user, slug).await?;

        Ok(Submission {
            instance,
            slots,
            form,
            deadline,
        })
    }

    /// Audit log of a node, oldest first. Empty when never opened.
    pub async fn node_events(&self, ctx: &ActorContext, user: &str, slug: &str) -> Result<Vec<NodeEvent>> {
        ensure_journey_access(ctx, user)?;
        match self.find_instance(ctx, user, slug).await? {
            Some(instance) => self.store.list_node_events(&instance.id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Every form revision of a node, ascending.
    pub async fn form_revisions(
        &self,
        ctx: &ActorContext,
        user: &str,
        slug: &str,
    ) -> Result<Vec<FormRevision>> {
        ensure_journey_access(ctx, user)?;
        match self.find_instance(ctx, user, slug).await? {
            Some(instance) => self.store.list_form_revisions(&instance.id).await,
            None => Ok(Vec::new()),
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Run `plan` and commit its change set, re-planning after lost races.
    pub(super) async fn commit<T, F, Fut>(&self, operation: &'static str, mut plan: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(JourneyChanges, T)>>,
    {
        let attempts = self.config.commit_attempts.max(1);
        for attempt in 1..=attempts {
            let (changes, outcome) = plan().await?;
            match self.store.apply_journey_changes(&changes).await {
                Ok(true) => return Ok(outcome),
                Ok(false) => debug!(operation, attempt, "Journey commit lost a race, retrying"),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(operation, attempt, error = %e, "Journey commit failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::StorageUnavailable(format!(
            "{operation} still conflicting after {attempts} attempts"
        )))
    }

    pub(super) async fn snapshot(
        &self,
        ctx: &ActorContext,
        user: &str,
        playbook: &Playbook,
    ) -> Result<Snapshot> {
        let instances = self
            .store
            .list_node_instances(&ctx.tenant_id, user, playbook.version_id())
            .await?
            .into_iter()
            .map(|i| (i.node_slug.clone(), i))
            .collect();
        Ok(Snapshot { instances })
    }

    async fn find_instance(&self, ctx: &ActorContext, user: &str, slug: &str) -> Result<Option<NodeInstance>> {
        let playbook = self.playbooks.require_active(&ctx.tenant_id).await?;
        self.store
            .get_node_instance(&ctx.tenant_id, user, playbook.version_id(), slug)
            .await
    }

    pub(super) async fn require_instance(
        &self,
        ctx: &ActorContext,
        user: &str,
        slug: &str,
    ) -> Result<NodeInstance> {
        self.find_instance(ctx, user, slug)
            .await?
            .ok_or_else(|| Error::not_found("node instance", format!("{user}/{slug}")))
    }

    /// Working copy for a mutating operation; opens the node first when it
    /// has no instance yet or is still locked.
    #[allow(clippy::too_many_arguments)]
    fn prepare(
        &self,
        changes: &mut JourneyChanges,
        ctx: &ActorContext,
        user: &str,
        playbook: &Playbook,
        def: &NodeDefinition,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<Working> {
        match snapshot.instances.get(&def.slug) {
            Some(instance) if instance.state != NodeState::Locked => {
                Ok(Working::existing(instance.clone()))
            }
            _ => self.materialize(changes, ctx, user, playbook, def, snapshot, now),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn materialize(
        &self,
        changes: &mut JourneyChanges,
        ctx: &ActorContext,
        user: &str,
        playbook: &Playbook,
        def: &NodeDefinition,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<Working> {
        let existing = snapshot.instances.get(&def.slug).cloned();
        if existing.as_ref().is_none_or(|i| i.state == NodeState::Locked) {
            let missing = snapshot.missing_prerequisites(playbook, &def.slug)?;
            if !missing.is_empty() {
                return Err(Error::PrerequisiteNotMet {
                    node: def.slug.clone(),
                    missing,
                });
            }
        }
        let opener = is_opener(ctx, user);

        match existing {
            None => {
                let state = if opener { NodeState::Active } else { NodeState::Todo };
                let instance = new_instance(&ctx.tenant_id, user, playbook, &def.slug, state, now);
                changes.insert_slots.extend(slot_rows(def, &instance.id));
                let kind = if opener { NodeEventKind::Opened } else { NodeEventKind::Unlocked };
                changes.event(&instance, kind, &ctx.actor_id, json!({"from": null}), now);
                Ok(Working::created(instance))
            }
            Some(instance) => {
                let mut working = Working::existing(instance);
                if working.instance.state == NodeState::Locked {
                    working.instance.state = NodeState::Todo;
                    working.touch(now);
                    changes.event(
                        &working.instance,
                        NodeEventKind::Unlocked,
                        &ctx.actor_id,
                        json!({"from": "locked"}),
                        now,
                    );
                }
                if working.instance.state == NodeState::Todo && opener {
                    state::check(NodeState::Todo, NodeState::Active, &ctx.roles)?;
                    working.instance.state = NodeState::Active;
                    working.instance.opened_at = now;
                    working.touch(now);
                    changes.event(
                        &working.instance,
                        NodeEventKind::Opened,
                        &ctx.actor_id,
                        json!({"from": "todo"}),
                        now,
                    );
                }
                Ok(working)
            }
        }
    }

    async fn start_review(&self, ctx: &ActorContext, instance: &NodeInstance, def: &NodeDefinition) {
        let Some(workflows) = &self.workflows else {
            return;
        };
        self.close_reviews(ctx, &instance.id, "superseded by resubmission").await;
        let request = StartWorkflow {
            entity_type: self.config.review_entity_type.clone(),
            entity_id: instance.id.clone(),
            entity_name: Some(def.slug.clone()),
            metadata: json!({
                "user_id": instance.user_id,
                "node_slug": def.slug,
                "node_kind": def.kind.as_str(),
                "playbook_version_id": instance.playbook_version_id,
            }),
        };
        match workflows.start(ctx, request).await {
            Ok(workflow) => info!(workflow_id = %workflow.id, node = %def.slug, "Review workflow started"),
            Err(e) => warn!(node = %def.slug, error = %e, "Could not start review workflow"),
        }
    }

    /// Cancel review workflows still pending against a node instance.
    pub(super) async fn close_reviews(&self, ctx: &ActorContext, node_instance_id: &str, reason: &str) {
        let Some(workflows) = &self.workflows else {
            return;
        };
        if let Err(e) = workflows
            .close_for_entity(ctx, &self.config.review_entity_type, node_instance_id, reason)
            .await
        {
            warn!(node_instance_id, error = %e, "Could not close pending review workflows");
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn ensure_journey_access(ctx: &ActorContext, user: &str) -> Result<()> {
    if ctx.is(user) || ctx.is_staff() {
        Ok(())
    } else {
        Err(Error::NotAuthorized(
            "cannot access another user's journey".to_string(),
        ))
    }
}

fn ensure_draft_editor(ctx: &ActorContext, user: &str) -> Result<()> {
    if ctx.is(user) || ctx.roles.satisfies_any(&DRAFT_EDITORS) {
        Ok(())
    } else {
        Err(Error::NotAuthorized(
            "only the student, an advisor or an admin may edit this node".to_string(),
        ))
    }
}

/// The student acting on their own journey.
pub(super) fn is_opener(ctx: &ActorContext, user: &str) -> bool {
    ctx.is(user) && ctx.roles.contains(Role::Student)
}

pub(super) fn new_instance(
    tenant_id: &str,
    user: &str,
    playbook: &Playbook,
    slug: &str,
    state: NodeState,
    now: DateTime<Utc>,
) -> NodeInstance {
    NodeInstance {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        user_id: user.to_string(),
        playbook_version_id: playbook.version_id().to_string(),
        node_slug: slug.to_string(),
        state,
        locale: Some(playbook.default_locale().to_string()),
        current_rev: 0,
        review_outcome: None,
        opened_at: now,
        started_at: None,
        submitted_at: None,
        completed_at: None,
        updated_at: now,
        lock_version: 0,
    }
}

pub(super) fn slot_rows(def: &NodeDefinition, instance_id: &str) -> Vec<Slot> {
    def.uploads
        .iter()
        .map(|upload| Slot {
            id: uuid::Uuid::new_v4().to_string(),
            node_instance_id: instance_id.to_string(),
            slot_key: upload.key.clone(),
            required: upload.required,
            multiplicity: upload.multiplicity,
            mime_whitelist: upload.mime.clone(),
            status: SlotStatus::Empty,
        })
        .collect()
}

/// Queue a slot write; slots created in this change set are edited in place.
pub(super) fn stage_slot(changes: &mut JourneyChanges, slot: Slot, instance_is_new: bool) {
    if instance_is_new {
        if let Some(queued) = changes.insert_slots.iter_mut().find(|s| s.id == slot.id) {
            *queued = slot;
        }
    } else if let Some(queued) = changes.update_slots.iter_mut().find(|s| s.id == slot.id) {
        *queued = slot;
    } else {
        changes.update_slots.push(slot);
    }
}
