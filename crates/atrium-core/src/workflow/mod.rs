// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Approval workflow engine.
//!
//! A [`WorkflowTemplate`] describes an ordered list of steps. Starting a
//! workflow against an entity creates a [`WorkflowInstance`] and one
//! [`WorkflowApproval`] row per step of the first stage. A stage is a run of
//! steps that share a `step_order` or chain through `parallel_with_previous`;
//! every non-optional step of the stage must be approved before the instance
//! moves to the next stage.
//!
//! ```text
//!            approve (stage complete, more stages)
//!        ┌─────────────────────────────┐
//!        ▼                             │
//!    pending ──approve (last stage)──► approved
//!        │ ──reject / auto-reject────► rejected
//!        │ ──timeout, no other path──► expired
//!        └──cancel───────────────────► cancelled
//! ```
//!
//! Every mutation bumps the instance `lock_version`, so decisions, timeouts
//! and reminders on one instance are serialized.

mod engine;
mod model;
mod scheduler;
mod timeouts;

pub use engine::WorkflowEngine;
pub use model::{
    Decision, DecisionAction, Delegation, WorkflowApproval, WorkflowChanges, WorkflowInstance,
    WorkflowStatus, WorkflowStep, WorkflowTemplate,
};
pub use scheduler::{TimeoutScheduler, TimeoutSchedulerConfig};
pub use timeouts::{TimeoutAction, TimeoutReport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tenancy::Role;

/// Input of [`WorkflowEngine::start`].
#[derive(Debug, Clone)]
pub struct StartWorkflow {
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: Option<String>,
    pub metadata: Value,
}

impl StartWorkflow {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            entity_name: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Input of [`WorkflowEngine::create_template`].
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: String,
    pub entity_type: String,
    pub description: Option<String>,
    /// System templates are shared by every tenant. Superadmin only.
    pub system: bool,
    pub steps: Vec<WorkflowStep>,
}

impl NewTemplate {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        steps: Vec<WorkflowStep>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: None,
            system: false,
            steps,
        }
    }

    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }
}

/// Input of [`WorkflowEngine::decide`].
#[derive(Debug, Clone)]
pub struct DecideRequest {
    pub action: DecisionAction,
    pub comment: Option<String>,
    /// Target user of a `delegate` action.
    pub delegate_to: Option<String>,
}

impl DecideRequest {
    pub fn approve() -> Self {
        Self::new(DecisionAction::Approve)
    }

    pub fn reject() -> Self {
        Self::new(DecisionAction::Reject)
    }

    pub fn send_back() -> Self {
        Self::new(DecisionAction::Return)
    }

    pub fn delegate(to: impl Into<String>) -> Self {
        Self {
            delegate_to: Some(to.into()),
            ..Self::new(DecisionAction::Delegate)
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    fn new(action: DecisionAction) -> Self {
        Self {
            action,
            comment: None,
            delegate_to: None,
        }
    }
}

/// Input of [`WorkflowEngine::create_delegation`]. The delegator is the actor.
#[derive(Debug, Clone)]
pub struct NewDelegation {
    pub delegate_id: String,
    pub role: Role,
    pub workflow_type: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Notification emitted after a committed workflow change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowSignal {
    /// A new approval row awaits a decision.
    Assigned {
        tenant_id: String,
        instance_id: String,
        approval_id: String,
        approver_id: Option<String>,
        approver_role: Option<Role>,
    },
    /// An approval reached its reminder time undecided.
    Reminder {
        tenant_id: String,
        instance_id: String,
        approval_id: String,
        approver_id: Option<String>,
    },
    /// The instance left `pending`.
    Completed {
        tenant_id: String,
        instance_id: String,
        entity_type: String,
        entity_id: String,
        status: WorkflowStatus,
    },
}
