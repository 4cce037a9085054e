// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Timeout and reminder processing.
//!
//! Both scans are idempotent: a row that was already handled no longer
//! matches the scan (it is decided, or its reminder is stamped), and every
//! handler re-reads the row inside its commit loop before acting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::WorkflowSignal;
use super::engine::{Case, Plan, WorkflowEngine, approval_row, find_step};
use super::model::{Decision, WorkflowStatus};
use crate::error::{Error, Result};

const AUTO_APPROVED: &str = "approved automatically after timeout";
const AUTO_REJECTED: &str = "rejected automatically after timeout";
const TIMED_OUT: &str = "approval timed out";

/// What a timeout did to an approval row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    AutoApproved,
    AutoRejected,
    Escalated,
    Expired,
}

/// Counts from one timeout tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeoutReport {
    /// Overdue rows returned by the scan.
    pub due: usize,
    pub auto_approved: usize,
    pub auto_rejected: usize,
    pub escalated: usize,
    pub expired: usize,
    pub reminders_sent: usize,
    /// Rows that no longer needed handling when re-read.
    pub skipped: usize,
    pub failed: usize,
}

impl TimeoutReport {
    /// Whether the tick changed anything.
    pub fn is_idle(&self) -> bool {
        self.auto_approved + self.auto_rejected + self.escalated + self.expired + self.reminders_sent
            == 0
    }

    fn count(&mut self, action: TimeoutAction) {
        match action {
            TimeoutAction::AutoApproved => self.auto_approved += 1,
            TimeoutAction::AutoRejected => self.auto_rejected += 1,
            TimeoutAction::Escalated => self.escalated += 1,
            TimeoutAction::Expired => self.expired += 1,
        }
    }
}

impl WorkflowEngine {
    /// Handle up to `batch_size` overdue approvals and due reminders as of `now`.
    ///
    /// Failures on single rows are logged and counted; only a failing scan
    /// fails the tick.
    #[instrument(skip(self))]
    pub async fn process_timeouts(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<TimeoutReport> {
        let mut report = TimeoutReport::default();

        let due = self
            .store
            .list_due_approvals(now, batch_size)
            .await
            .map_err(|e| Error::TimeoutTickFailed(e.to_string()))?;
        report.due = due.len();
        for approval in due {
            match self.apply_timeout(&approval.id, now).await {
                Ok(Some(action)) => report.count(action),
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(approval_id = %approval.id, error = %e, "Failed to apply approval timeout");
                    report.failed += 1;
                }
            }
        }

        let reminders = self
            .store
            .list_reminders_due(now, batch_size)
            .await
            .map_err(|e| Error::TimeoutTickFailed(e.to_string()))?;
        for approval in reminders {
            match self.send_reminder(&approval.id, now).await {
                Ok(true) => report.reminders_sent += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(approval_id = %approval.id, error = %e, "Failed to send approval reminder");
                    report.failed += 1;
                }
            }
        }

        if report.is_idle() {
            debug!(skipped = report.skipped, failed = report.failed, "Timeout tick found nothing to do");
        } else {
            info!(
                auto_approved = report.auto_approved,
                auto_rejected = report.auto_rejected,
                escalated = report.escalated,
                expired = report.expired,
                reminders = report.reminders_sent,
                failed = report.failed,
                "Timeout tick processed"
            );
        }
        Ok(report)
    }

    /// Apply the timeout policy of one overdue row. `None` when the row no
    /// longer qualifies.
    pub async fn apply_timeout(
        &self,
        approval_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TimeoutAction>> {
        self.commit("timeout", move || async move {
            let Some(approval) = self.store.get_approval(approval_id).await? else {
                return Ok(Plan::noop(None));
            };
            if !approval.is_open() || approval.due_at.is_none_or(|due| due > now) {
                return Ok(Plan::noop(None));
            }
            let Some(instance) = self
                .store
                .get_instance(&approval.instance_id)
                .await?
                .filter(|i| i.status == WorkflowStatus::Pending)
            else {
                return Ok(Plan::noop(None));
            };

            let template = self.require_template(&instance.template_id).await?;
            let step = find_step(&template, &approval.step_id)?;
            let approvals = self.store.list_approvals(&instance.id).await?;
            let mut case = Case::existing(instance, approvals);
            let mut row = approval.clone();

            let action = if step.auto_approve_on_timeout {
                row.close(Decision::Approved, Some(AUTO_APPROVED.to_string()), now);
                case.record(row);
                self.settle_stage(&mut case, &template, Some(AUTO_APPROVED.to_string()), now)
                    .await?;
                TimeoutAction::AutoApproved
            } else if step.auto_reject_on_timeout {
                row.close(Decision::Rejected, Some(AUTO_REJECTED.to_string()), now);
                case.record(row);
                case.finish(
                    WorkflowStatus::Rejected,
                    Some(Decision::Rejected),
                    Some(AUTO_REJECTED.to_string()),
                    now,
                );
                TimeoutAction::AutoRejected
            } else if let Some(role) = step.escalation_role
                && approval.approver_role != Some(role)
            {
                let route = self
                    .route(
                        &case.instance.tenant_id,
                        &case.instance.entity_type,
                        None,
                        Some(role),
                        None,
                        now,
                    )
                    .await?;
                let mut escalated = approval_row(&case.instance.id, step, row.step_order, route, now);
                escalated.approver_role = Some(role);
                escalated.approver_permission = None;
                row.close(Decision::Escalated, None, now);
                case.record(row);
                case.insert(escalated);
                TimeoutAction::Escalated
            } else {
                row.close(Decision::Expired, Some(TIMED_OUT.to_string()), now);
                case.record(row);
                if step.is_optional {
                    self.settle_stage(&mut case, &template, None, now).await?;
                } else {
                    case.finish(
                        WorkflowStatus::Expired,
                        Some(Decision::Expired),
                        Some(TIMED_OUT.to_string()),
                        now,
                    );
                }
                TimeoutAction::Expired
            };

            debug!(
                instance_id = %case.instance.id,
                approval_id,
                ?action,
                "Approval timeout applied"
            );
            Ok::<_, Error>(case.into_plan(now, |_| Some(action)))
        })
        .await
    }

    /// Stamp and announce a due reminder. `false` when it no longer applies.
    pub async fn send_reminder(&self, approval_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.commit("reminder", move || async move {
            let Some(approval) = self.store.get_approval(approval_id).await? else {
                return Ok(Plan::noop(false));
            };
            let due = approval.is_open()
                && approval.reminder_sent_at.is_none()
                && approval.remind_at.is_some_and(|at| at <= now);
            if !due {
                return Ok(Plan::noop(false));
            }
            let Some(instance) = self
                .store
                .get_instance(&approval.instance_id)
                .await?
                .filter(|i| i.status == WorkflowStatus::Pending)
            else {
                return Ok(Plan::noop(false));
            };

            let mut reminded = approval;
            reminded.reminder_sent_at = Some(now);
            let mut case = Case::existing(instance, Vec::new());
            case.signal(WorkflowSignal::Reminder {
                tenant_id: case.instance.tenant_id.clone(),
                instance_id: case.instance.id.clone(),
                approval_id: reminded.id.clone(),
                approver_id: reminded.approver_id.clone(),
            });
            case.record(reminded);
            Ok::<_, Error>(case.into_plan(now, |_| true))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let mut report = TimeoutReport::default();
        assert!(report.is_idle());
        report.count(TimeoutAction::AutoApproved);
        report.count(TimeoutAction::Escalated);
        report.count(TimeoutAction::Escalated);
        assert_eq!(report.auto_approved, 1);
        assert_eq!(report.escalated, 2);
        assert!(!report.is_idle());
    }
}
