// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Approval workflow tests over a real SQLite store.

mod common;

use chrono::{Duration, Utc};

use atrium_core::persistence::DirectoryStore;
use atrium_core::tenancy::{ActorContext, Role};
use atrium_core::workflow::{
    DecideRequest, Decision, NewDelegation, NewTemplate, StartWorkflow, WorkflowApproval,
    WorkflowInstance, WorkflowSignal, WorkflowStatus, WorkflowStep,
};

use common::Harness;

const THESIS: &str = "thesis";

async fn template(h: &Harness, steps: Vec<WorkflowStep>) {
    let admin = h.ctx("admin-1", &[Role::Admin]);
    h.workflows
        .create_template(&admin, NewTemplate::new("thesis approval", THESIS, steps))
        .await
        .unwrap();
}

async fn start(h: &Harness, initiator: &ActorContext) -> WorkflowInstance {
    h.workflows
        .start(initiator, StartWorkflow::new(THESIS, "thesis-42").named("Thesis 42"))
        .await
        .unwrap()
}

async fn open_rows(h: &Harness, ctx: &ActorContext, instance_id: &str) -> Vec<WorkflowApproval> {
    h.workflows
        .approvals(ctx, instance_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.is_open())
        .collect()
}

fn week_from_now(delegate: &str, role: Role) -> NewDelegation {
    NewDelegation {
        delegate_id: delegate.to_string(),
        role,
        workflow_type: Some(THESIS.to_string()),
        starts_at: Utc::now() - Duration::minutes(5),
        ends_at: Utc::now() + Duration::days(7),
        reason: Some("conference".to_string()),
    }
}

#[tokio::test]
async fn test_delegated_step_routes_to_delegate() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let dean = h.member("dean-1", &[Role::Dean]).await;
    let chair = h.member("chair-1", &[Role::Chair]).await;
    let vice = h.member("vice-1", &[Role::Instructor]).await;
    template(
        &h,
        vec![
            WorkflowStep::new(1, "dean").role(Role::Dean),
            WorkflowStep::new(2, "chair").role(Role::Chair),
        ],
    )
    .await;
    h.workflows
        .create_delegation(&chair, week_from_now("vice-1", Role::Chair))
        .await
        .unwrap();

    let instance = start(&h, &student).await;
    let rows = open_rows(&h, &student, &instance.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].approver_id.as_deref(), Some("dean-1"));

    let instance = h
        .workflows
        .decide(&dean, &rows[0].id, DecideRequest::approve())
        .await
        .unwrap();
    assert_eq!(instance.current_step_order, 2);
    assert_eq!(instance.status, WorkflowStatus::Pending);

    let rows = open_rows(&h, &student, &instance.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].approver_id.as_deref(), Some("vice-1"));
    assert_eq!(rows[0].delegated_from.as_deref(), Some("chair-1"));

    let pending = h.workflows.pending_actions(&vice).await.unwrap();
    assert_eq!(pending.len(), 1);

    let instance = h
        .workflows
        .decide(&vice, &rows[0].id, DecideRequest::approve().with_comment("ok"))
        .await
        .unwrap();
    assert_eq!(instance.status, WorkflowStatus::Approved);
    assert_eq!(instance.final_decision, Some(Decision::Approved));
    assert!(instance.completed_at.is_some());
}

#[tokio::test]
async fn test_delegate_decides_row_assigned_before_delegation() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let chair = h.member("chair-1", &[Role::Chair]).await;
    let vice = h.member("vice-1", &[Role::Instructor]).await;
    let stranger = h.member("other-1", &[Role::Instructor]).await;
    template(&h, vec![WorkflowStep::new(1, "chair").role(Role::Chair)]).await;

    let instance = start(&h, &student).await;
    let row = open_rows(&h, &student, &instance.id).await.remove(0);
    assert_eq!(row.approver_id.as_deref(), Some("chair-1"));

    let err = h
        .workflows
        .decide(&vice, &row.id, DecideRequest::approve())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_AUTHORIZED");

    h.workflows
        .create_delegation(&chair, week_from_now("vice-1", Role::Chair))
        .await
        .unwrap();
    let err = h
        .workflows
        .decide(&stranger, &row.id, DecideRequest::approve())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_AUTHORIZED");

    let instance = h
        .workflows
        .decide(&vice, &row.id, DecideRequest::approve())
        .await
        .unwrap();
    assert_eq!(instance.status, WorkflowStatus::Approved);

    let decided = h.workflows.approvals(&student, &instance.id).await.unwrap();
    assert_eq!(decided[0].approver_id.as_deref(), Some("vice-1"));
    assert_eq!(decided[0].delegated_from.as_deref(), Some("chair-1"));
}

#[tokio::test]
async fn test_revoked_delegation_no_longer_routes() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let chair = h.member("chair-1", &[Role::Chair]).await;
    h.member("vice-1", &[Role::Instructor]).await;
    template(&h, vec![WorkflowStep::new(1, "chair").role(Role::Chair)]).await;

    let delegation = h
        .workflows
        .create_delegation(&chair, week_from_now("vice-1", Role::Chair))
        .await
        .unwrap();
    assert_eq!(
        h.workflows
            .active_delegations(&chair, Utc::now())
            .await
            .unwrap()
            .len(),
        1
    );
    h.workflows
        .revoke_delegation(&chair, &delegation.id)
        .await
        .unwrap();
    assert!(
        h.workflows
            .active_delegations(&chair, Utc::now())
            .await
            .unwrap()
            .is_empty()
    );

    let instance = start(&h, &student).await;
    let row = open_rows(&h, &student, &instance.id).await.remove(0);
    assert_eq!(row.approver_id.as_deref(), Some("chair-1"));
    assert!(row.delegated_from.is_none());
}

#[tokio::test]
async fn test_delegation_requires_held_role() {
    let h = Harness::new().await;
    let instructor = h.member("inst-1", &[Role::Instructor]).await;

    let err = h
        .workflows
        .create_delegation(&instructor, week_from_now("vice-1", Role::Chair))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_AUTHORIZED");
}

#[tokio::test]
async fn test_timeout_auto_approves_once() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    h.member("dean-1", &[Role::Dean]).await;
    template(
        &h,
        vec![
            WorkflowStep::new(1, "dean")
                .role(Role::Dean)
                .timeout_days(1)
                .auto_approve(),
        ],
    )
    .await;

    let instance = start(&h, &student).await;

    let early = h
        .workflows
        .process_timeouts(Utc::now() + Duration::hours(1), 100)
        .await
        .unwrap();
    assert!(early.is_idle());
    assert_eq!(early.due, 0);

    let report = h
        .workflows
        .process_timeouts(Utc::now() + Duration::hours(25), 100)
        .await
        .unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.auto_approved, 1);

    let closed = h.workflows.instance(&student, &instance.id).await.unwrap();
    assert_eq!(closed.status, WorkflowStatus::Approved);
    assert_eq!(closed.final_decision, Some(Decision::Approved));
    let row = &h.workflows.approvals(&student, &instance.id).await.unwrap()[0];
    assert_eq!(row.decision, Some(Decision::Approved));
    assert!(row.comment.as_deref().unwrap().contains("automatically"));

    let again = h
        .workflows
        .process_timeouts(Utc::now() + Duration::hours(26), 100)
        .await
        .unwrap();
    assert!(again.is_idle());
}

#[tokio::test]
async fn test_timeout_auto_rejects() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    h.member("dean-1", &[Role::Dean]).await;
    template(
        &h,
        vec![
            WorkflowStep::new(1, "dean")
                .role(Role::Dean)
                .timeout_days(2)
                .auto_reject(),
        ],
    )
    .await;
    let instance = start(&h, &student).await;

    let report = h
        .workflows
        .process_timeouts(Utc::now() + Duration::days(3), 100)
        .await
        .unwrap();
    assert_eq!(report.auto_rejected, 1);
    let closed = h.workflows.instance(&student, &instance.id).await.unwrap();
    assert_eq!(closed.status, WorkflowStatus::Rejected);
}

#[tokio::test]
async fn test_timeout_escalates_then_expires() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    h.member("advisor-1", &[Role::Advisor]).await;
    h.member("dean-1", &[Role::Dean]).await;
    template(
        &h,
        vec![
            WorkflowStep::new(1, "advisor")
                .role(Role::Advisor)
                .timeout_days(1)
                .escalate_to(Role::Dean),
        ],
    )
    .await;
    let instance = start(&h, &student).await;

    let first = Utc::now() + Duration::hours(25);
    let report = h.workflows.process_timeouts(first, 100).await.unwrap();
    assert_eq!(report.escalated, 1);

    let rows = h.workflows.approvals(&student, &instance.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].decision, Some(Decision::Escalated));
    assert_eq!(rows[1].approver_id.as_deref(), Some("dean-1"));
    assert_eq!(rows[1].approver_role, Some(Role::Dean));
    assert!(rows[1].is_open());
    assert_eq!(
        h.workflows.instance(&student, &instance.id).await.unwrap().status,
        WorkflowStatus::Pending
    );

    let report = h
        .workflows
        .process_timeouts(first + Duration::hours(25), 100)
        .await
        .unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.escalated, 0);
    let closed = h.workflows.instance(&student, &instance.id).await.unwrap();
    assert_eq!(closed.status, WorkflowStatus::Expired);
    assert_eq!(closed.final_decision, Some(Decision::Expired));
}

#[tokio::test]
async fn test_reminder_sent_once() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    h.member("dean-1", &[Role::Dean]).await;
    template(
        &h,
        vec![WorkflowStep::new(1, "dean").role(Role::Dean).reminder_days(1)],
    )
    .await;
    let instance = start(&h, &student).await;
    let mut signals = h.workflows.subscribe();

    let at = Utc::now() + Duration::hours(25);
    let report = h.workflows.process_timeouts(at, 100).await.unwrap();
    assert_eq!(report.reminders_sent, 1);
    match signals.try_recv().unwrap() {
        WorkflowSignal::Reminder {
            instance_id,
            approver_id,
            ..
        } => {
            assert_eq!(instance_id, instance.id);
            assert_eq!(approver_id.as_deref(), Some("dean-1"));
        }
        other => panic!("unexpected signal: {other:?}"),
    }

    let again = h.workflows.process_timeouts(at, 100).await.unwrap();
    assert!(again.is_idle());
    let row = &h.workflows.approvals(&student, &instance.id).await.unwrap()[0];
    assert!(row.reminder_sent_at.is_some());
    assert!(row.is_open());
}

#[tokio::test]
async fn test_second_decision_is_refused() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let dean = h.member("dean-1", &[Role::Dean]).await;
    template(&h, vec![WorkflowStep::new(1, "dean").role(Role::Dean)]).await;
    let instance = start(&h, &student).await;
    let row = open_rows(&h, &student, &instance.id).await.remove(0);

    h.workflows
        .decide(&dean, &row.id, DecideRequest::approve())
        .await
        .unwrap();
    let err = h
        .workflows
        .decide(&dean, &row.id, DecideRequest::reject())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ALREADY_DECIDED");
}

#[tokio::test]
async fn test_parallel_stage_waits_for_every_step() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let chair = h.member("chair-1", &[Role::Chair]).await;
    let registrar = h.member("registrar-1", &[Role::Registrar]).await;
    h.member("dean-1", &[Role::Dean]).await;
    template(
        &h,
        vec![
            WorkflowStep::new(1, "chair").role(Role::Chair),
            WorkflowStep::new(1, "registrar").role(Role::Registrar),
            WorkflowStep::new(2, "dean").role(Role::Dean),
        ],
    )
    .await;
    let instance = start(&h, &student).await;
    let rows = open_rows(&h, &student, &instance.id).await;
    assert_eq!(rows.len(), 2);

    let by_role = |role: Role| rows.iter().find(|r| r.approver_role == Some(role)).unwrap();
    let after_chair = h
        .workflows
        .decide(&chair, &by_role(Role::Chair).id, DecideRequest::approve())
        .await
        .unwrap();
    assert_eq!(after_chair.current_step_order, 1);

    let after_registrar = h
        .workflows
        .decide(&registrar, &by_role(Role::Registrar).id, DecideRequest::approve())
        .await
        .unwrap();
    assert_eq!(after_registrar.current_step_order, 2);
    let rows = open_rows(&h, &student, &instance.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].approver_id.as_deref(), Some("dean-1"));
}

#[tokio::test]
async fn test_optional_step_does_not_block_stage() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let chair = h.member("chair-1", &[Role::Chair]).await;
    h.member("hr-1", &[Role::Hr]).await;
    template(
        &h,
        vec![
            WorkflowStep::new(1, "chair").role(Role::Chair),
            WorkflowStep::new(1, "hr").role(Role::Hr).optional(),
        ],
    )
    .await;
    let instance = start(&h, &student).await;
    let chair_row = open_rows(&h, &student, &instance.id)
        .await
        .into_iter()
        .find(|r| r.approver_role == Some(Role::Chair))
        .unwrap();

    let done = h
        .workflows
        .decide(&chair, &chair_row.id, DecideRequest::approve())
        .await
        .unwrap();
    assert_eq!(done.status, WorkflowStatus::Approved);

    let rows = h.workflows.approvals(&student, &instance.id).await.unwrap();
    let hr = rows.iter().find(|r| r.approver_role == Some(Role::Hr)).unwrap();
    assert_eq!(hr.decision, Some(Decision::Closed));
}

#[tokio::test]
async fn test_send_back_reopens_previous_stage() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let dean = h.member("dean-1", &[Role::Dean]).await;
    let chair = h.member("chair-1", &[Role::Chair]).await;
    template(
        &h,
        vec![
            WorkflowStep::new(1, "dean").role(Role::Dean),
            WorkflowStep::new(2, "chair").role(Role::Chair),
        ],
    )
    .await;
    let instance = start(&h, &student).await;

    let dean_row = open_rows(&h, &student, &instance.id).await.remove(0);
    let err = h
        .workflows
        .decide(&dean, &dean_row.id, DecideRequest::send_back())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION_ERROR");

    h.workflows
        .decide(&dean, &dean_row.id, DecideRequest::approve())
        .await
        .unwrap();
    let chair_row = open_rows(&h, &student, &instance.id).await.remove(0);
    let returned = h
        .workflows
        .decide(&chair, &chair_row.id, DecideRequest::send_back().with_comment("cite sources"))
        .await
        .unwrap();
    assert_eq!(returned.status, WorkflowStatus::Pending);
    assert_eq!(returned.current_step_order, 1);

    let rows = h.workflows.approvals(&student, &instance.id).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].decision, Some(Decision::Returned));
    assert!(rows[2].is_open());
    assert_eq!(rows[2].approver_id.as_deref(), Some("dean-1"));
}

#[tokio::test]
async fn test_reject_closes_instance() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let dean = h.member("dean-1", &[Role::Dean]).await;
    template(
        &h,
        vec![
            WorkflowStep::new(1, "dean").role(Role::Dean),
            WorkflowStep::new(2, "chair").role(Role::Chair),
        ],
    )
    .await;
    let instance = start(&h, &student).await;
    let row = open_rows(&h, &student, &instance.id).await.remove(0);

    let rejected = h
        .workflows
        .decide(&dean, &row.id, DecideRequest::reject().with_comment("plagiarism"))
        .await
        .unwrap();
    assert_eq!(rejected.status, WorkflowStatus::Rejected);
    assert_eq!(rejected.final_comment.as_deref(), Some("plagiarism"));
    assert!(open_rows(&h, &student, &instance.id).await.is_empty());

    let history = h
        .workflows
        .instances_for_entity(&student, THESIS, "thesis-42")
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_delegate_action_hands_row_over() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let dean = h.member("dean-1", &[Role::Dean]).await;
    let deputy = h.member("deputy-1", &[Role::Instructor]).await;
    template(&h, vec![WorkflowStep::new(1, "dean").role(Role::Dean)]).await;
    let instance = start(&h, &student).await;
    let row = open_rows(&h, &student, &instance.id).await.remove(0);

    let err = h
        .workflows
        .decide(&dean, &row.id, DecideRequest::delegate("dean-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION_ERROR");

    h.workflows
        .decide(&dean, &row.id, DecideRequest::delegate("deputy-1"))
        .await
        .unwrap();
    let handed = open_rows(&h, &student, &instance.id).await.remove(0);
    assert_eq!(handed.approver_id.as_deref(), Some("deputy-1"));
    assert_eq!(handed.delegated_from.as_deref(), Some("dean-1"));
    assert_eq!(handed.approver_role, Some(Role::Dean));

    let done = h
        .workflows
        .decide(&deputy, &handed.id, DecideRequest::approve())
        .await
        .unwrap();
    assert_eq!(done.status, WorkflowStatus::Approved);
}

#[tokio::test]
async fn test_step_without_delegation_refuses_hand_over() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let dean = h.member("dean-1", &[Role::Dean]).await;
    template(
        &h,
        vec![WorkflowStep::new(1, "dean").role(Role::Dean).no_delegation()],
    )
    .await;
    let instance = start(&h, &student).await;
    let row = open_rows(&h, &student, &instance.id).await.remove(0);

    let err = h
        .workflows
        .decide(&dean, &row.id, DecideRequest::delegate("deputy-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unassigned_row_open_to_role_holders() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    template(&h, vec![WorkflowStep::new(1, "hr").role(Role::Hr)]).await;
    let instance = start(&h, &student).await;
    let row = open_rows(&h, &student, &instance.id).await.remove(0);
    assert!(row.approver_id.is_none());

    let err = h
        .workflows
        .decide(&student, &row.id, DecideRequest::approve())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_AUTHORIZED");

    let hr = h.ctx("hr-late", &[Role::Hr]);
    assert_eq!(h.workflows.pending_actions(&hr).await.unwrap().len(), 1);
    let done = h
        .workflows
        .decide(&hr, &row.id, DecideRequest::approve())
        .await
        .unwrap();
    assert_eq!(done.status, WorkflowStatus::Approved);
    let decided = &h.workflows.approvals(&student, &instance.id).await.unwrap()[0];
    assert_eq!(decided.approver_id.as_deref(), Some("hr-late"));
}

#[tokio::test]
async fn test_permission_step_routes_to_permission_holder() {
    let h = Harness::new().await;
    h.store
        .grant_permission(&h.tenant.id, Role::Registrar, "thesis.approve")
        .await
        .unwrap();
    let student = h.member("student-1", &[Role::Student]).await;
    h.member("registrar-1", &[Role::Registrar]).await;
    template(
        &h,
        vec![WorkflowStep::new(1, "records").permission("thesis.approve")],
    )
    .await;

    let instance = start(&h, &student).await;
    let row = open_rows(&h, &student, &instance.id).await.remove(0);
    assert_eq!(row.approver_id.as_deref(), Some("registrar-1"));
    assert_eq!(row.approver_permission.as_deref(), Some("thesis.approve"));
}

#[tokio::test]
async fn test_cancel_by_initiator() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let other = h.member("student-2", &[Role::Student]).await;
    h.member("dean-1", &[Role::Dean]).await;
    template(&h, vec![WorkflowStep::new(1, "dean").role(Role::Dean)]).await;
    let instance = start(&h, &student).await;

    let err = h
        .workflows
        .cancel(&other, &instance.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_AUTHORIZED");

    let cancelled = h
        .workflows
        .cancel(&student, &instance.id, Some("withdrawn".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
    let rows = h.workflows.approvals(&student, &instance.id).await.unwrap();
    assert_eq!(rows[0].decision, Some(Decision::Closed));

    let err = h
        .workflows
        .cancel(&student, &instance.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INSTANCE_CLOSED");
}

#[tokio::test]
async fn test_signals_follow_commits() {
    let h = Harness::new().await;
    let student = h.member("student-1", &[Role::Student]).await;
    let dean = h.member("dean-1", &[Role::Dean]).await;
    template(&h, vec![WorkflowStep::new(1, "dean").role(Role::Dean)]).await;
    let mut signals = h.workflows.subscribe();

    let instance = start(&h, &student).await;
    let approval_id = match signals.try_recv().unwrap() {
        WorkflowSignal::Assigned {
            instance_id,
            approval_id,
            approver_id,
            approver_role,
            ..
        } => {
            assert_eq!(instance_id, instance.id);
            assert_eq!(approver_id.as_deref(), Some("dean-1"));
            assert_eq!(approver_role, Some(Role::Dean));
            approval_id
        }
        other => panic!("unexpected signal: {other:?}"),
    };

    // A refused decision commits nothing and announces nothing.
    assert!(
        h.workflows
            .decide(&student, &approval_id, DecideRequest::approve())
            .await
            .is_err()
    );
    assert!(signals.try_recv().is_err());

    h.workflows
        .decide(&dean, &approval_id, DecideRequest::approve())
        .await
        .unwrap();
    match signals.try_recv().unwrap() {
        WorkflowSignal::Completed {
            entity_type,
            entity_id,
            status,
            ..
        } => {
            assert_eq!(entity_type, THESIS);
            assert_eq!(entity_id, "thesis-42");
            assert_eq!(status, WorkflowStatus::Approved);
        }
        other => panic!("unexpected signal: {other:?}"),
    }
}

#[tokio::test]
async fn test_template_requires_admin() {
    let h = Harness::new().await;
    let dean = h.member("dean-1", &[Role::Dean]).await;

    let err = h
        .workflows
        .create_template(
            &dean,
            NewTemplate::new("x", THESIS, vec![WorkflowStep::new(1, "a").role(Role::Dean)]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_AUTHORIZED");

    let admin = h.ctx("admin-1", &[Role::Admin]);
    let err = h
        .workflows
        .create_template(&admin, NewTemplate::new("empty", THESIS, Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION_ERROR");

    let err = h
        .workflows
        .start(&dean, StartWorkflow::new("leave_request", "lr-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
}
