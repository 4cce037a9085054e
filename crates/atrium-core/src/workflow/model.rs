// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow templates, instances, approvals and delegations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tenancy::Role;

/// Workflow instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

impl WorkflowStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parse a status from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Whether the instance is closed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded decision on an approval row. `None` on the row means open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
    Returned,
    Delegated,
    /// Re-assigned to the escalation role after a timeout.
    Escalated,
    /// Timed out with no other path.
    Expired,
    /// Closed by the engine because the instance moved on.
    Closed,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Returned => "returned",
            Self::Delegated => "delegated",
            Self::Escalated => "escalated",
            Self::Expired => "expired",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "returned" => Some(Self::Returned),
            "delegated" => Some(Self::Delegated),
            "escalated" => Some(Self::Escalated),
            "expired" => Some(Self::Expired),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Action an approver takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
    Return,
    Delegate,
}

/// Blueprint for an approval process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    /// `None` for system templates shared by every tenant.
    pub tenant_id: Option<String>,
    pub entity_type: String,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub is_active: bool,
    /// Sorted by `step_order`.
    pub steps: Vec<WorkflowStep>,
    pub created_at: DateTime<Utc>,
}

/// One step of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub template_id: String,
    pub step_order: i32,
    pub name: String,
    pub required_role: Option<Role>,
    pub required_permission: Option<String>,
    pub specific_user_id: Option<String>,
    pub is_optional: bool,
    pub parallel_with_previous: bool,
    /// Zero disables the timeout.
    pub timeout_days: i32,
    pub auto_approve_on_timeout: bool,
    pub auto_reject_on_timeout: bool,
    pub escalation_role: Option<Role>,
    /// Zero disables reminders.
    pub reminder_days: i32,
    pub allow_delegation: bool,
}

impl WorkflowStep {
    /// Step with defaults: required, sequential, no timeout, delegation allowed.
    pub fn new(step_order: i32, name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            template_id: String::new(),
            step_order,
            name: name.into(),
            required_role: None,
            required_permission: None,
            specific_user_id: None,
            is_optional: false,
            parallel_with_previous: false,
            timeout_days: 0,
            auto_approve_on_timeout: false,
            auto_reject_on_timeout: false,
            escalation_role: None,
            reminder_days: 0,
            allow_delegation: true,
        }
    }

    pub fn role(mut self, role: Role) -> Self {
        self.required_role = Some(role);
        self
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permission = Some(permission.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.specific_user_id = Some(user_id.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel_with_previous = true;
        self
    }

    pub fn timeout_days(mut self, days: i32) -> Self {
        self.timeout_days = days;
        self
    }

    pub fn auto_approve(mut self) -> Self {
        self.auto_approve_on_timeout = true;
        self
    }

    pub fn auto_reject(mut self) -> Self {
        self.auto_reject_on_timeout = true;
        self
    }

    pub fn escalate_to(mut self, role: Role) -> Self {
        self.escalation_role = Some(role);
        self
    }

    pub fn reminder_days(mut self, days: i32) -> Self {
        self.reminder_days = days;
        self
    }

    pub fn no_delegation(mut self) -> Self {
        self.allow_delegation = false;
        self
    }
}

/// A running approval case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub tenant_id: String,
    pub template_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: Option<String>,
    pub initiated_by: String,
    pub initiated_at: DateTime<Utc>,
    pub current_step_order: i32,
    pub status: WorkflowStatus,
    pub final_decision: Option<Decision>,
    pub final_comment: Option<String>,
    pub metadata: Value,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic lock; bumped by every committed change to the instance.
    pub lock_version: i64,
}

/// Assignment of one step to one approver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowApproval {
    pub id: String,
    pub instance_id: String,
    pub step_id: String,
    pub step_order: i32,
    /// Resolved approver; `None` lets any holder of the role or permission decide.
    pub approver_id: Option<String>,
    pub approver_role: Option<Role>,
    pub approver_permission: Option<String>,
    pub delegated_from: Option<String>,
    pub decision: Option<Decision>,
    pub comment: Option<String>,
    pub assigned_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub remind_at: Option<DateTime<Utc>>,
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
}

impl WorkflowApproval {
    /// Whether the row still awaits a decision.
    pub fn is_open(&self) -> bool {
        self.decision.is_none()
    }

    /// Close the row with a decision.
    pub(crate) fn close(&mut self, decision: Decision, comment: Option<String>, at: DateTime<Utc>) {
        self.decision = Some(decision);
        self.comment = comment;
        self.decided_at = Some(at);
    }
}

/// Time-bounded redirection of approval duty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: String,
    pub tenant_id: String,
    pub delegator_id: String,
    pub delegate_id: String,
    /// Entity type the delegation covers; `None` covers all.
    pub workflow_type: Option<String>,
    pub role: Role,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Delegation {
    /// Whether the delegation is in force at `at` for `workflow_type`.
    pub fn covers(&self, workflow_type: &str, at: DateTime<Utc>) -> bool {
        self.is_active
            && self.starts_at <= at
            && at <= self.ends_at
            && self
                .workflow_type
                .as_deref()
                .is_none_or(|t| t == workflow_type)
    }
}

/// Everything one workflow operation writes, committed atomically.
#[derive(Debug, Clone, Default)]
pub struct WorkflowChanges {
    pub insert_instance: Option<WorkflowInstance>,
    /// Carries the `lock_version` it was read with.
    pub update_instance: Option<WorkflowInstance>,
    pub insert_approvals: Vec<WorkflowApproval>,
    pub update_approvals: Vec<WorkflowApproval>,
}

impl WorkflowChanges {
    /// Whether the set writes nothing.
    pub fn is_empty(&self) -> bool {
        self.insert_instance.is_none()
            && self.update_instance.is_none()
            && self.insert_approvals.is_empty()
            && self.update_approvals.is_empty()
    }

    /// Queue an approval update, replacing an earlier queued copy.
    pub fn update_approval(&mut self, approval: WorkflowApproval) {
        if let Some(queued) = self
            .update_approvals
            .iter_mut()
            .find(|a| a.id == approval.id)
        {
            *queued = approval;
        } else {
            self.update_approvals.push(approval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_terminal() {
        assert!(!WorkflowStatus::Pending.is_terminal());
        for s in ["approved", "rejected", "cancelled", "expired"] {
            assert!(WorkflowStatus::parse(s).unwrap().is_terminal());
        }
    }

    #[test]
    fn test_delegation_window() {
        let now = Utc::now();
        let d = Delegation {
            id: "d".into(),
            tenant_id: "t".into(),
            delegator_id: "chair".into(),
            delegate_id: "vice".into(),
            workflow_type: Some("thesis".into()),
            role: Role::Chair,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            is_active: true,
            reason: None,
            created_at: now,
        };
        assert!(d.covers("thesis", now));
        assert!(!d.covers("leave", now));
        assert!(!d.covers("thesis", now + Duration::days(2)));

        let any_type = Delegation { workflow_type: None, ..d.clone() };
        assert!(any_type.covers("leave", now));
        let revoked = Delegation { is_active: false, ..d };
        assert!(!revoked.covers("thesis", now));
    }

    #[test]
    fn test_step_builder() {
        let step = WorkflowStep::new(2, "Chair sign-off")
            .role(Role::Chair)
            .timeout_days(3)
            .escalate_to(Role::Dean)
            .no_delegation();
        assert_eq!(step.step_order, 2);
        assert_eq!(step.required_role, Some(Role::Chair));
        assert_eq!(step.escalation_role, Some(Role::Dean));
        assert!(!step.allow_delegation);
        assert!(!step.is_optional);
    }
}
