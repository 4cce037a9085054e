// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::model::{
    Decision, DecisionAction, Delegation, WorkflowApproval, WorkflowChanges, WorkflowInstance,
    WorkflowStatus, WorkflowStep, WorkflowTemplate,
};
use super::{DecideRequest, NewDelegation, NewTemplate, StartWorkflow, WorkflowSignal};
use crate::error::{Error, Result};
use crate::persistence::{DirectoryStore, WorkflowStore};
use crate::tenancy::{AccessPolicy, ActorContext, Role};

/// Context type under which workflow permissions are evaluated.
const WORKFLOW_CONTEXT: &str = "workflow";

const SIGNAL_CAPACITY: usize = 256;
const DEFAULT_COMMIT_ATTEMPTS: u32 = 3;

/// Template-driven approval engine.
pub struct WorkflowEngine {
    pub(super) store: Arc<dyn WorkflowStore>,
    directory: Arc<dyn DirectoryStore>,
    access: AccessPolicy,
    signals: broadcast::Sender<WorkflowSignal>,
    commit_attempts: u32,
}

// ============================================================================
// Stages
// ============================================================================

/// Steps that are open at the same time.
pub(super) struct Stage<'a> {
    pub(super) order: i32,
    pub(super) steps: Vec<&'a WorkflowStep>,
}

/// Group a template's steps into stages. A step joins the previous stage when
/// it shares its `step_order` or is flagged `parallel_with_previous`.
pub(super) fn stages(template: &WorkflowTemplate) -> Vec<Stage<'_>> {
    let mut stages: Vec<Stage<'_>> = Vec::new();
    for step in &template.steps {
        match stages.last_mut() {
            Some(stage)
                if step.parallel_with_previous
                    || stage.steps.iter().any(|s| s.step_order == step.step_order) =>
            {
                stage.steps.push(step);
            }
            _ => stages.push(Stage {
                order: step.step_order,
                steps: vec![step],
            }),
        }
    }
    stages
}

pub(super) fn stage_index(stages: &[Stage<'_>], instance: &WorkflowInstance) -> Result<usize> {
    stages
        .iter()
        .position(|s| s.order == instance.current_step_order)
        .ok_or_else(|| {
            Error::Validation(format!(
                "workflow instance '{}' points at unknown step order {}",
                instance.id, instance.current_step_order
            ))
        })
}

// ============================================================================
// Routing
// ============================================================================

/// Resolved assignee of an approval row.
#[derive(Debug, Clone, Default)]
pub(super) struct Route {
    approver_id: Option<String>,
    delegated_from: Option<String>,
}

impl Route {
    fn to(user: impl Into<String>) -> Self {
        Self {
            approver_id: Some(user.into()),
            delegated_from: None,
        }
    }
}

/// Fresh open approval row for `step`.
pub(super) fn approval_row(
    instance_id: &str,
    step: &WorkflowStep,
    step_order: i32,
    route: Route,
    now: DateTime<Utc>,
) -> WorkflowApproval {
    let after_days = |days: i32| (days > 0).then(|| now + Duration::days(i64::from(days)));
    WorkflowApproval {
        id: Uuid::new_v4().to_string(),
        instance_id: instance_id.to_string(),
        step_id: step.id.clone(),
        step_order,
        approver_id: route.approver_id,
        approver_role: step.required_role,
        approver_permission: step.required_permission.clone(),
        delegated_from: route.delegated_from,
        decision: None,
        comment: None,
        assigned_at: now,
        due_at: after_days(step.timeout_days),
        decided_at: None,
        remind_at: after_days(step.reminder_days),
        notification_sent_at: Some(now),
        reminder_sent_at: None,
    }
}

// ============================================================================
// Case: in-memory view of one instance during an operation
// ============================================================================

/// Result of one planning pass: what to write, what to return and what to
/// announce once the write is committed.
pub(super) struct Plan<T> {
    changes: WorkflowChanges,
    outcome: T,
    signals: Vec<WorkflowSignal>,
}

impl<T> Plan<T> {
    /// Plan that writes nothing.
    pub(super) fn noop(outcome: T) -> Self {
        Self {
            changes: WorkflowChanges::default(),
            outcome,
            signals: Vec::new(),
        }
    }
}

pub(super) struct Case {
    pub(super) instance: WorkflowInstance,
    pub(super) approvals: Vec<WorkflowApproval>,
    is_new: bool,
    changes: WorkflowChanges,
    signals: Vec<WorkflowSignal>,
}

impl Case {
    fn new(instance: WorkflowInstance) -> Self {
        Self {
            instance,
            approvals: Vec::new(),
            is_new: true,
            changes: WorkflowChanges::default(),
            signals: Vec::new(),
        }
    }

    pub(super) fn existing(instance: WorkflowInstance, approvals: Vec<WorkflowApproval>) -> Self {
        Self {
            instance,
            approvals,
            is_new: false,
            changes: WorkflowChanges::default(),
            signals: Vec::new(),
        }
    }

    /// Replace a stored row with its updated copy.
    pub(super) fn record(&mut self, approval: WorkflowApproval) {
        if let Some(stored) = self.approvals.iter_mut().find(|a| a.id == approval.id) {
            *stored = approval.clone();
        }
        self.changes.update_approval(approval);
    }

    /// Add a new open row and announce it.
    pub(super) fn insert(&mut self, approval: WorkflowApproval) {
        self.signals.push(WorkflowSignal::Assigned {
            tenant_id: self.instance.tenant_id.clone(),
            instance_id: self.instance.id.clone(),
            approval_id: approval.id.clone(),
            approver_id: approval.approver_id.clone(),
            approver_role: approval.approver_role,
        });
        self.approvals.push(approval.clone());
        self.changes.insert_approvals.push(approval);
    }

    pub(super) fn signal(&mut self, signal: WorkflowSignal) {
        self.signals.push(signal);
    }

    /// Most recent row of a step.
    pub(super) fn latest_for_step(&self, step_id: &str) -> Option<&WorkflowApproval> {
        self.approvals.iter().rev().find(|a| a.step_id == step_id)
    }

    /// Close every open row accepted by `matches`.
    pub(super) fn close_open(
        &mut self,
        matches: impl Fn(&WorkflowApproval) -> bool,
        now: DateTime<Utc>,
    ) {
        for row in self.approvals.iter_mut() {
            if !row.is_open() || !matches(&*row) {
                continue;
            }
            row.close(Decision::Closed, None, now);
            self.changes.update_approval(row.clone());
        }
    }

    /// Move the instance to a terminal status and close what is still open.
    pub(super) fn finish(
        &mut self,
        status: WorkflowStatus,
        decision: Option<Decision>,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.close_open(|_| true, now);
        let instance = &mut self.instance;
        instance.status = status;
        instance.final_decision = decision;
        instance.final_comment = comment;
        instance.completed_at = Some(now);
        self.signals.push(WorkflowSignal::Completed {
            tenant_id: instance.tenant_id.clone(),
            instance_id: instance.id.clone(),
            entity_type: instance.entity_type.clone(),
            entity_id: instance.entity_id.clone(),
            status,
        });
    }

    /// Finish planning; the outcome is computed from the instance as it
    /// will read after the commit.
    pub(super) fn into_plan<T>(
        mut self,
        now: DateTime<Utc>,
        outcome: impl FnOnce(&WorkflowInstance) -> T,
    ) -> Plan<T> {
        self.instance.updated_at = now;
        let mut committed = self.instance.clone();
        if self.is_new {
            self.changes.insert_instance = Some(self.instance);
        } else {
            committed.lock_version += 1;
            self.changes.update_instance = Some(self.instance);
        }
        Plan {
            changes: self.changes,
            outcome: outcome(&committed),
            signals: self.signals,
        }
    }
}

impl WorkflowEngine {
    /// Create an engine over the given stores.
    pub fn new(store: Arc<dyn WorkflowStore>, directory: Arc<dyn DirectoryStore>) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            store,
            access: AccessPolicy::new(directory.clone()),
            directory,
            signals,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }

    /// Override how often a contended commit is recomputed.
    pub fn with_commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_attempts = attempts.max(1);
        self
    }

    /// Receive signals for every committed change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowSignal> {
        self.signals.subscribe()
    }

    // ========================================================================
    // Templates
    // ========================================================================

    /// Store a new template. System templates require a superadmin; tenant
    /// templates an admin.
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant_id, name = %request.name))]
    pub async fn create_template(
        &self,
        ctx: &ActorContext,
        request: NewTemplate,
    ) -> Result<WorkflowTemplate> {
        if request.system {
            ctx.require_any(&[Role::Superadmin], "creating system workflow templates")?;
        } else {
            ctx.require_any(&[Role::Admin], "creating workflow templates")?;
        }
        if request.steps.is_empty() {
            return Err(Error::Validation(
                "workflow template needs at least one step".to_string(),
            ));
        }
        for step in &request.steps {
            validate_step(step)?;
        }

        let id = Uuid::new_v4().to_string();
        let mut steps = request.steps;
        steps.sort_by_key(|s| s.step_order);
        for step in &mut steps {
            step.template_id = id.clone();
        }

        let template = WorkflowTemplate {
            id,
            tenant_id: (!request.system).then(|| ctx.tenant_id.clone()),
            entity_type: request.entity_type,
            name: request.name,
            description: request.description,
            is_system: request.system,
            is_active: true,
            steps,
            created_at: Utc::now(),
        };
        self.store.insert_template(&template).await?;

        info!(
            template_id = %template.id,
            entity_type = %template.entity_type,
            steps = template.steps.len(),
            "Workflow template created"
        );
        Ok(template)
    }

    /// Template by name; tenant templates shadow system ones.
    pub async fn template_by_name(
        &self,
        ctx: &ActorContext,
        name: &str,
    ) -> Result<Option<WorkflowTemplate>> {
        self.store.find_template_by_name(&ctx.tenant_id, name).await
    }

    /// Template that `start` would pick for `entity_type`.
    pub async fn active_template(
        &self,
        ctx: &ActorContext,
        entity_type: &str,
    ) -> Result<Option<WorkflowTemplate>> {
        self.store
            .find_active_template(&ctx.tenant_id, entity_type)
            .await
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Start a workflow against an entity and assign the first stage.
    #[instrument(
        skip(self, ctx, request),
        fields(
            tenant_id = %ctx.tenant_id,
            actor = %ctx.actor_id,
            entity_type = %request.entity_type,
            entity_id = %request.entity_id
        )
    )]
    pub async fn start(
        &self,
        ctx: &ActorContext,
        request: StartWorkflow,
    ) -> Result<WorkflowInstance> {
        let template = self
            .store
            .find_active_template(&ctx.tenant_id, &request.entity_type)
            .await?
            .ok_or_else(|| Error::not_found("workflow template", request.entity_type.clone()))?;
        let request = &request;
        let template = &template;

        let instance = self
            .commit("start", move || async move {
                let now = Utc::now();
                let stages = stages(template);
                let first = stages.first().ok_or_else(|| {
                    Error::Validation(format!("workflow template '{}' has no steps", template.name))
                })?;

                let instance = WorkflowInstance {
                    id: Uuid::new_v4().to_string(),
                    tenant_id: ctx.tenant_id.clone(),
                    template_id: template.id.clone(),
                    entity_type: request.entity_type.clone(),
                    entity_id: request.entity_id.clone(),
                    entity_name: request.entity_name.clone(),
                    initiated_by: ctx.actor_id.clone(),
                    initiated_at: now,
                    current_step_order: first.order,
                    status: WorkflowStatus::Pending,
                    final_decision: None,
                    final_comment: None,
                    metadata: request.metadata.clone(),
                    completed_at: None,
                    updated_at: now,
                    lock_version: 0,
                };
                let mut case = Case::new(instance);
                self.open_stage(&mut case, first, now).await?;
                Ok::<_, Error>(case.into_plan(now, Clone::clone))
            })
            .await?;

        info!(
            instance_id = %instance.id,
            template_id = %instance.template_id,
            "Workflow started"
        );
        Ok(instance)
    }

    /// Record a decision on an approval row.
    ///
    /// Checks run in order: the row must be open (`AlreadyDecided`), the
    /// instance pending (`InstanceClosed`), and the actor the assignee, a
    /// delegate of the assignee, or a holder of the row's role or permission
    /// when it is unassigned (`NotAuthorized`).
    #[instrument(
        skip(self, ctx, request),
        fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id, action = ?request.action)
    )]
    pub async fn decide(
        &self,
        ctx: &ActorContext,
        approval_id: &str,
        request: DecideRequest,
    ) -> Result<WorkflowInstance> {
        if request.action == DecisionAction::Delegate {
            match request.delegate_to.as_deref() {
                None | Some("") => {
                    return Err(Error::Validation("delegate requires a target user".to_string()));
                }
                Some(to) if ctx.is(to) => {
                    return Err(Error::Validation("cannot delegate to yourself".to_string()));
                }
                Some(_) => {}
            }
        }
        let request = &request;

        let instance = self
            .commit("decide", move || async move {
                let now = Utc::now();
                let approval = self
                    .store
                    .get_approval(approval_id)
                    .await?
                    .ok_or_else(|| Error::not_found("approval", approval_id))?;
                let instance = self
                    .store
                    .get_instance(&approval.instance_id)
                    .await?
                    .filter(|i| i.tenant_id == ctx.tenant_id)
                    .ok_or_else(|| Error::not_found("approval", approval_id))?;

                if !approval.is_open() {
                    return Err(Error::AlreadyDecided(approval.id));
                }
                if instance.status != WorkflowStatus::Pending {
                    return Err(Error::InstanceClosed {
                        id: instance.id,
                        status: instance.status.to_string(),
                    });
                }
                let on_behalf_of = self.authorize(ctx, &instance, &approval, now).await?;

                let template = self.require_template(&instance.template_id).await?;
                let step = find_step(&template, &approval.step_id)?;
                let approvals = self.store.list_approvals(&instance.id).await?;
                let mut case = Case::existing(instance, approvals);

                let mut row = approval.clone();
                if row.approver_id.is_none() || on_behalf_of.is_some() {
                    row.approver_id = Some(ctx.actor_id.clone());
                }
                if let Some(assignee) = on_behalf_of {
                    row.delegated_from = Some(assignee);
                }
                let comment = request.comment.clone();

                match request.action {
                    DecisionAction::Approve => {
                        row.close(Decision::Approved, comment.clone(), now);
                        case.record(row);
                        self.settle_stage(&mut case, &template, comment, now).await?;
                    }
                    DecisionAction::Reject => {
                        row.close(Decision::Rejected, comment.clone(), now);
                        case.record(row);
                        case.finish(WorkflowStatus::Rejected, Some(Decision::Rejected), comment, now);
                    }
                    DecisionAction::Return => {
                        let stages = stages(&template);
                        let current = stage_index(&stages, &case.instance)?;
                        let Some(previous) = current.checked_sub(1).map(|i| &stages[i]) else {
                            return Err(Error::Validation(
                                "the first step cannot be returned".to_string(),
                            ));
                        };
                        let order = case.instance.current_step_order;
                        row.close(Decision::Returned, comment, now);
                        case.record(row);
                        case.close_open(|a| a.step_order == order, now);

                        for step in &previous.steps {
                            let route = match case.latest_for_step(&step.id) {
                                Some(prior) => Route {
                                    approver_id: prior.approver_id.clone(),
                                    delegated_from: prior.delegated_from.clone(),
                                },
                                None => self.route_step(&case.instance, step, now).await?,
                            };
                            let reopened = approval_row(&case.instance.id, step, previous.order, route, now);
                            case.insert(reopened);
                        }
                        case.instance.current_step_order = previous.order;
                    }
                    DecisionAction::Delegate => {
                        if !step.allow_delegation {
                            return Err(Error::Validation(format!(
                                "step '{}' does not allow delegation",
                                step.name
                            )));
                        }
                        let delegate = request.delegate_to.clone().unwrap_or_default();
                        row.close(Decision::Delegated, comment, now);
                        let mut handed = approval_row(
                            &case.instance.id,
                            step,
                            row.step_order,
                            Route {
                                approver_id: Some(delegate),
                                delegated_from: Some(ctx.actor_id.clone()),
                            },
                            now,
                        );
                        handed.approver_role = row.approver_role;
                        handed.approver_permission = row.approver_permission.clone();
                        handed.due_at = row.due_at;
                        case.record(row);
                        case.insert(handed);
                    }
                }

                Ok::<_, Error>(case.into_plan(now, Clone::clone))
            })
            .await?;

        info!(
            instance_id = %instance.id,
            status = %instance.status,
            step_order = instance.current_step_order,
            "Workflow decision recorded"
        );
        Ok(instance)
    }

    /// Cancel a pending instance. Allowed to the initiator and to admins.
    #[instrument(skip(self, ctx, reason), fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id))]
    pub async fn cancel(
        &self,
        ctx: &ActorContext,
        instance_id: &str,
        reason: Option<String>,
    ) -> Result<WorkflowInstance> {
        let reason = &reason;
        let instance = self
            .commit("cancel", move || async move {
                let now = Utc::now();
                let instance = self.instance(ctx, instance_id).await?;
                if !ctx.is(&instance.initiated_by) && !ctx.roles.satisfies(Role::Admin) {
                    return Err(Error::NotAuthorized(
                        "only the initiator or an admin can cancel a workflow".to_string(),
                    ));
                }
                if instance.status != WorkflowStatus::Pending {
                    return Err(Error::InstanceClosed {
                        id: instance.id,
                        status: instance.status.to_string(),
                    });
                }
                let approvals = self.store.list_approvals(&instance.id).await?;
                let mut case = Case::existing(instance, approvals);
                case.finish(WorkflowStatus::Cancelled, None, reason.clone(), now);
                Ok::<_, Error>(case.into_plan(now, Clone::clone))
            })
            .await?;

        info!(instance_id = %instance.id, "Workflow cancelled");
        Ok(instance)
    }

    /// Cancel every pending instance started against an entity, on behalf of
    /// the engine that owns the entity. Returns how many were closed.
    ///
    /// Callers authorize the actor themselves; this does not require the
    /// initiator or an admin.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn close_for_entity(
        &self,
        ctx: &ActorContext,
        entity_type: &str,
        entity_id: &str,
        reason: &str,
    ) -> Result<usize> {
        let pending: Vec<String> = self
            .store
            .list_instances_for_entity(&ctx.tenant_id, entity_type, entity_id)
            .await?
            .into_iter()
            .filter(|i| i.status == WorkflowStatus::Pending)
            .map(|i| i.id)
            .collect();

        let mut closed = 0;
        for instance_id in &pending {
            let did_close = self
                .commit("close_for_entity", move || async move {
                    let now = Utc::now();
                    let instance = self.instance(ctx, instance_id).await?;
                    if instance.status != WorkflowStatus::Pending {
                        return Ok(Plan::noop(false));
                    }
                    let approvals = self.store.list_approvals(&instance.id).await?;
                    let mut case = Case::existing(instance, approvals);
                    case.finish(WorkflowStatus::Cancelled, None, Some(reason.to_string()), now);
                    Ok::<_, Error>(case.into_plan(now, |_| true))
                })
                .await?;
            if did_close {
                closed += 1;
            }
        }

        if closed > 0 {
            info!(entity_type, entity_id, closed, "Closed pending workflows for entity");
        }
        Ok(closed)
    }

    /// Instance by id within the actor's tenant.
    pub async fn instance(&self, ctx: &ActorContext, instance_id: &str) -> Result<WorkflowInstance> {
        self.store
            .get_instance(instance_id)
            .await?
            .filter(|i| i.tenant_id == ctx.tenant_id)
            .ok_or_else(|| Error::not_found("workflow instance", instance_id))
    }

    /// Every approval row of an instance, oldest first.
    pub async fn approvals(
        &self,
        ctx: &ActorContext,
        instance_id: &str,
    ) -> Result<Vec<WorkflowApproval>> {
        let instance = self.instance(ctx, instance_id).await?;
        self.store.list_approvals(&instance.id).await
    }

    /// Instances started against an entity, newest first.
    pub async fn instances_for_entity(
        &self,
        ctx: &ActorContext,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<WorkflowInstance>> {
        self.store
            .list_instances_for_entity(&ctx.tenant_id, entity_type, entity_id)
            .await
    }

    /// Open approvals the actor can decide right now.
    pub async fn pending_actions(&self, ctx: &ActorContext) -> Result<Vec<WorkflowApproval>> {
        let open = self
            .store
            .list_open_approvals(&ctx.tenant_id, &ctx.actor_id)
            .await?;
        let mut actions = Vec::with_capacity(open.len());
        for approval in open {
            let actionable = match &approval.approver_id {
                Some(assignee) => ctx.is(assignee),
                None => self.holds_duty(ctx, &approval, None).await?,
            };
            if actionable {
                actions.push(approval);
            }
        }
        Ok(actions)
    }

    // ========================================================================
    // Delegations
    // ========================================================================

    /// Hand the actor's duty for `role` to another user for a time window.
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant_id, actor = %ctx.actor_id, role = %request.role))]
    pub async fn create_delegation(
        &self,
        ctx: &ActorContext,
        request: NewDelegation,
    ) -> Result<Delegation> {
        if !ctx.roles.satisfies(request.role) {
            return Err(Error::NotAuthorized(format!(
                "cannot delegate role '{}' you do not hold",
                request.role
            )));
        }
        if ctx.is(&request.delegate_id) {
            return Err(Error::Validation("cannot delegate to yourself".to_string()));
        }
        if request.ends_at <= request.starts_at {
            return Err(Error::Validation(
                "delegation must end after it starts".to_string(),
            ));
        }

        let delegation = Delegation {
            id: Uuid::new_v4().to_string(),
            tenant_id: ctx.tenant_id.clone(),
            delegator_id: ctx.actor_id.clone(),
            delegate_id: request.delegate_id,
            workflow_type: request.workflow_type,
            role: request.role,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            is_active: true,
            reason: request.reason,
            created_at: Utc::now(),
        };
        self.store.insert_delegation(&delegation).await?;

        info!(
            delegation_id = %delegation.id,
            delegate = %delegation.delegate_id,
            "Delegation created"
        );
        Ok(delegation)
    }

    /// Deactivate a delegation. Allowed to the delegator and to admins.
    pub async fn revoke_delegation(&self, ctx: &ActorContext, delegation_id: &str) -> Result<()> {
        let delegation = self
            .store
            .get_delegation(&ctx.tenant_id, delegation_id)
            .await?
            .ok_or_else(|| Error::not_found("delegation", delegation_id))?;
        if !ctx.is(&delegation.delegator_id) && !ctx.roles.satisfies(Role::Admin) {
            return Err(Error::NotAuthorized(
                "only the delegator or an admin can revoke a delegation".to_string(),
            ));
        }
        if self
            .store
            .deactivate_delegation(&ctx.tenant_id, delegation_id)
            .await?
        {
            info!(tenant_id = %ctx.tenant_id, delegation_id, "Delegation revoked");
        } else {
            debug!(tenant_id = %ctx.tenant_id, delegation_id, "Delegation already inactive");
        }
        Ok(())
    }

    /// Delegations the actor granted that are in force at `at`.
    pub async fn active_delegations(
        &self,
        ctx: &ActorContext,
        at: DateTime<Utc>,
    ) -> Result<Vec<Delegation>> {
        self.store
            .delegations_from(&ctx.tenant_id, &ctx.actor_id, at)
            .await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Run `plan` and commit its changes, recomputing on lost races. Signals
    /// go out only after a successful commit.
    pub(super) async fn commit<T, F, Fut>(&self, operation: &'static str, mut plan: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Plan<T>>>,
    {
        let attempts = self.commit_attempts.max(1);
        for attempt in 1..=attempts {
            let Plan {
                changes,
                outcome,
                signals,
            } = plan().await?;
            if changes.is_empty() {
                return Ok(outcome);
            }
            match self.store.apply_workflow_changes(&changes).await {
                Ok(true) => {
                    for signal in signals {
                        // No receivers is fine.
                        let _ = self.signals.send(signal);
                    }
                    return Ok(outcome);
                }
                Ok(false) => debug!(operation, attempt, "Workflow commit lost a race, retrying"),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(operation, attempt, error = %e, "Workflow commit failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::StorageUnavailable(format!(
            "{operation} still conflicting after {attempts} attempts"
        )))
    }

    pub(super) async fn require_template(&self, template_id: &str) -> Result<WorkflowTemplate> {
        self.store
            .get_template(template_id)
            .await?
            .ok_or_else(|| Error::not_found("workflow template", template_id))
    }

    /// Who decides a new row: the step's named user, else an active delegate
    /// of a role holder, else the first holder of the role, else the first
    /// holder of the permission. Nobody resolved leaves the row unassigned.
    pub(super) async fn route(
        &self,
        tenant_id: &str,
        workflow_type: &str,
        specific_user: Option<&str>,
        role: Option<Role>,
        permission: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Route> {
        if let Some(user) = specific_user {
            return Ok(Route::to(user));
        }

        if let Some(role) = role {
            let holders = self.directory.users_with_role(tenant_id, role).await?;
            let delegations: Vec<Delegation> = self
                .store
                .delegations_for_role(tenant_id, role, at)
                .await?
                .into_iter()
                .filter(|d| d.covers(workflow_type, at))
                .collect();
            let delegated = holders
                .iter()
                .find_map(|holder| delegations.iter().find(|d| &d.delegator_id == holder));
            if let Some(delegation) = delegated {
                return Ok(Route {
                    approver_id: Some(delegation.delegate_id.clone()),
                    delegated_from: Some(delegation.delegator_id.clone()),
                });
            }
            if let Some(holder) = holders.into_iter().next() {
                return Ok(Route::to(holder));
            }
        }

        if let Some(permission) = permission
            && let Some(holder) = self
                .directory
                .users_with_permission(tenant_id, permission)
                .await?
                .into_iter()
                .next()
        {
            return Ok(Route::to(holder));
        }

        debug!(tenant_id, ?role, permission, "No approver resolved, row stays unassigned");
        Ok(Route::default())
    }

    pub(super) async fn route_step(
        &self,
        instance: &WorkflowInstance,
        step: &WorkflowStep,
        at: DateTime<Utc>,
    ) -> Result<Route> {
        self.route(
            &instance.tenant_id,
            &instance.entity_type,
            step.specific_user_id.as_deref(),
            step.required_role,
            step.required_permission.as_deref(),
            at,
        )
        .await
    }

    /// Materialize one open row per step of `stage`.
    async fn open_stage(&self, case: &mut Case, stage: &Stage<'_>, now: DateTime<Utc>) -> Result<()> {
        for step in &stage.steps {
            let route = self.route_step(&case.instance, step, now).await?;
            let row = approval_row(&case.instance.id, step, stage.order, route, now);
            case.insert(row);
        }
        Ok(())
    }

    /// Advance the instance when every required step of its current stage
    /// has an approved latest row. The last stage completes the instance.
    pub(super) async fn settle_stage(
        &self,
        case: &mut Case,
        template: &WorkflowTemplate,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let stages = stages(template);
        let index = stage_index(&stages, &case.instance)?;
        let stage = &stages[index];

        let complete = stage.steps.iter().filter(|s| !s.is_optional).all(|s| {
            case.latest_for_step(&s.id)
                .is_some_and(|a| a.decision == Some(Decision::Approved))
        });
        if !complete {
            return Ok(());
        }

        let order = stage.order;
        case.close_open(|a| a.step_order == order, now);
        match stages.get(index + 1) {
            Some(next) => {
                case.instance.current_step_order = next.order;
                self.open_stage(case, next, now).await?;
            }
            None => {
                case.finish(WorkflowStatus::Approved, Some(Decision::Approved), comment, now);
            }
        }
        Ok(())
    }

    /// Check the actor may decide `approval`. Returns the assignee when the
    /// actor acts as their delegate.
    async fn authorize(
        &self,
        ctx: &ActorContext,
        instance: &WorkflowInstance,
        approval: &WorkflowApproval,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        match &approval.approver_id {
            Some(assignee) if ctx.is(assignee) => Ok(None),
            Some(assignee) => {
                let delegated = self
                    .store
                    .delegations_from(&ctx.tenant_id, assignee, now)
                    .await?
                    .iter()
                    .any(|d| {
                        ctx.is(&d.delegate_id)
                            && d.covers(&instance.entity_type, now)
                            && approval.approver_role.is_none_or(|r| r == d.role)
                    });
                if delegated {
                    Ok(Some(assignee.clone()))
                } else {
                    Err(Error::NotAuthorized(format!(
                        "approval '{}' is assigned to another approver",
                        approval.id
                    )))
                }
            }
            None => {
                if self
                    .holds_duty(ctx, approval, Some(&instance.entity_type))
                    .await?
                {
                    Ok(None)
                } else {
                    Err(Error::NotAuthorized(format!(
                        "approval '{}' requires a different role",
                        approval.id
                    )))
                }
            }
        }
    }

    /// Whether the actor may pick up an unassigned row.
    async fn holds_duty(
        &self,
        ctx: &ActorContext,
        approval: &WorkflowApproval,
        entity_type: Option<&str>,
    ) -> Result<bool> {
        if let Some(role) = approval.approver_role
            && ctx.roles.satisfies(role)
        {
            return Ok(true);
        }
        match (&approval.approver_role, &approval.approver_permission) {
            (_, Some(permission)) => {
                self.access
                    .allowed(ctx, permission, WORKFLOW_CONTEXT, entity_type)
                    .await
            }
            (None, None) => Ok(ctx.roles.satisfies(Role::Admin)),
            (Some(_), None) => Ok(false),
        }
    }
}

pub(super) fn find_step<'a>(template: &'a WorkflowTemplate, step_id: &str) -> Result<&'a WorkflowStep> {
    template
        .steps
        .iter()
        .find(|s| s.id == step_id)
        .ok_or_else(|| Error::not_found("workflow step", step_id))
}

fn validate_step(step: &WorkflowStep) -> Result<()> {
    if step.step_order < 1 {
        return Err(Error::Validation(format!(
            "step '{}' has order {}; orders start at 1",
            step.name, step.step_order
        )));
    }
    if step.required_role.is_none()
        && step.required_permission.is_none()
        && step.specific_user_id.is_none()
    {
        return Err(Error::Validation(format!(
            "step '{}' names no role, permission or user",
            step.name
        )));
    }
    if step.auto_approve_on_timeout && step.auto_reject_on_timeout {
        return Err(Error::Validation(format!(
            "step '{}' cannot both auto-approve and auto-reject",
            step.name
        )));
    }
    if step.timeout_days < 0 || step.reminder_days < 0 {
        return Err(Error::Validation(format!(
            "step '{}' has a negative timeout or reminder",
            step.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(steps: Vec<WorkflowStep>) -> WorkflowTemplate {
        WorkflowTemplate {
            id: "tpl".into(),
            tenant_id: None,
            entity_type: "thesis".into(),
            name: "thesis".into(),
            description: None,
            is_system: true,
            is_active: true,
            steps,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_stages_group_parallel_steps() {
        let tpl = template(vec![
            WorkflowStep::new(1, "advisor").role(Role::Advisor),
            WorkflowStep::new(2, "chair").role(Role::Chair),
            WorkflowStep::new(2, "registrar").role(Role::Registrar),
            WorkflowStep::new(3, "hr").role(Role::Hr).parallel(),
            WorkflowStep::new(4, "dean").role(Role::Dean),
        ]);
        let stages = stages(&tpl);
        let shape: Vec<(i32, Vec<&str>)> = stages
            .iter()
            .map(|s| (s.order, s.steps.iter().map(|st| st.name.as_str()).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (1, vec!["advisor"]),
                (2, vec!["chair", "registrar", "hr"]),
                (4, vec!["dean"]),
            ]
        );
    }

    #[test]
    fn test_approval_row_deadlines() {
        let now = Utc::now();
        let step = WorkflowStep::new(1, "dean")
            .role(Role::Dean)
            .timeout_days(2)
            .reminder_days(1);
        let row = approval_row("inst", &step, 1, Route::to("u1"), now);
        assert_eq!(row.due_at, Some(now + Duration::days(2)));
        assert_eq!(row.remind_at, Some(now + Duration::days(1)));
        assert_eq!(row.approver_role, Some(Role::Dean));
        assert!(row.is_open());

        let untimed = approval_row("inst", &WorkflowStep::new(1, "x"), 1, Route::default(), now);
        assert!(untimed.due_at.is_none());
        assert!(untimed.remind_at.is_none());
        assert!(untimed.approver_id.is_none());
    }

    #[test]
    fn test_validate_step() {
        assert!(validate_step(&WorkflowStep::new(1, "x").role(Role::Dean)).is_ok());
        assert!(validate_step(&WorkflowStep::new(0, "x").role(Role::Dean)).is_err());
        assert!(validate_step(&WorkflowStep::new(1, "x")).is_err());
        assert!(
            validate_step(
                &WorkflowStep::new(1, "x")
                    .role(Role::Dean)
                    .auto_approve()
                    .auto_reject()
            )
            .is_err()
        );
    }
}
