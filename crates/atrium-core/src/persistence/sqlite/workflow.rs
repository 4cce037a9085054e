// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{SqliteStore, decode, decode_opt, from_json, to_json};
use crate::error::Result;
use crate::persistence::WorkflowStore;
use crate::tenancy::Role;
use crate::workflow::{
    Decision, Delegation, WorkflowApproval, WorkflowChanges, WorkflowInstance, WorkflowStatus,
    WorkflowStep, WorkflowTemplate,
};

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    tenant_id: Option<String>,
    entity_type: String,
    name: String,
    description: Option<String>,
    is_system: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct StepRow {
    id: String,
    template_id: String,
    step_order: i32,
    name: String,
    required_role: Option<String>,
    required_permission: Option<String>,
    specific_user_id: Option<String>,
    is_optional: bool,
    parallel_with_previous: bool,
    timeout_days: i32,
    auto_approve_on_timeout: bool,
    auto_reject_on_timeout: bool,
    escalation_role: Option<String>,
    reminder_days: i32,
    allow_delegation: bool,
}

impl TryFrom<StepRow> for WorkflowStep {
    type Error = crate::error::Error;

    fn try_from(row: StepRow) -> Result<Self> {
        Ok(Self {
            required_role: decode_opt("role", row.required_role.as_deref(), Role::parse)?,
            escalation_role: decode_opt("role", row.escalation_role.as_deref(), Role::parse)?,
            id: row.id,
            template_id: row.template_id,
            step_order: row.step_order,
            name: row.name,
            required_permission: row.required_permission,
            specific_user_id: row.specific_user_id,
            is_optional: row.is_optional,
            parallel_with_previous: row.parallel_with_previous,
            timeout_days: row.timeout_days,
            auto_approve_on_timeout: row.auto_approve_on_timeout,
            auto_reject_on_timeout: row.auto_reject_on_timeout,
            reminder_days: row.reminder_days,
            allow_delegation: row.allow_delegation,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: String,
    tenant_id: String,
    template_id: String,
    entity_type: String,
    entity_id: String,
    entity_name: Option<String>,
    initiated_by: String,
    initiated_at: DateTime<Utc>,
    current_step_order: i32,
    status: String,
    final_decision: Option<String>,
    final_comment: Option<String>,
    metadata: String,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    lock_version: i64,
}

impl TryFrom<InstanceRow> for WorkflowInstance {
    type Error = crate::error::Error;

    fn try_from(row: InstanceRow) -> Result<Self> {
        Ok(Self {
            status: decode("workflow status", &row.status, WorkflowStatus::parse)?,
            final_decision: decode_opt("decision", row.final_decision.as_deref(), Decision::parse)?,
            metadata: from_json("metadata", &row.metadata)?,
            id: row.id,
            tenant_id: row.tenant_id,
            template_id: row.template_id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            entity_name: row.entity_name,
            initiated_by: row.initiated_by,
            initiated_at: row.initiated_at,
            current_step_order: row.current_step_order,
            final_comment: row.final_comment,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
            lock_version: row.lock_version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    id: String,
    instance_id: String,
    step_id: String,
    step_order: i32,
    approver_id: Option<String>,
    approver_role: Option<String>,
    approver_permission: Option<String>,
    delegated_from: Option<String>,
    decision: Option<String>,
    comment: Option<String>,
    assigned_at: DateTime<Utc>,
    due_at: Option<DateTime<Utc>>,
    decided_at: Option<DateTime<Utc>>,
    remind_at: Option<DateTime<Utc>>,
    notification_sent_at: Option<DateTime<Utc>>,
    reminder_sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<ApprovalRow> for WorkflowApproval {
    type Error = crate::error::Error;

    fn try_from(row: ApprovalRow) -> Result<Self> {
        Ok(Self {
            approver_role: decode_opt("role", row.approver_role.as_deref(), Role::parse)?,
            decision: decode_opt("decision", row.decision.as_deref(), Decision::parse)?,
            id: row.id,
            instance_id: row.instance_id,
            step_id: row.step_id,
            step_order: row.step_order,
            approver_id: row.approver_id,
            approver_permission: row.approver_permission,
            delegated_from: row.delegated_from,
            comment: row.comment,
            assigned_at: row.assigned_at,
            due_at: row.due_at,
            decided_at: row.decided_at,
            remind_at: row.remind_at,
            notification_sent_at: row.notification_sent_at,
            reminder_sent_at: row.reminder_sent_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DelegationRow {
    id: String,
    tenant_id: String,
    delegator_id: String,
    delegate_id: String,
    workflow_type: Option<String>,
    role: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    is_active: bool,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DelegationRow> for Delegation {
    type Error = crate::error::Error;

    fn try_from(row: DelegationRow) -> Result<Self> {
        Ok(Self {
            role: decode("role", &row.role, Role::parse)?,
            id: row.id,
            tenant_id: row.tenant_id,
            delegator_id: row.delegator_id,
            delegate_id: row.delegate_id,
            workflow_type: row.workflow_type,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            is_active: row.is_active,
            reason: row.reason,
            created_at: row.created_at,
        })
    }
}

const TEMPLATE_COLUMNS: &str =
    "id, tenant_id, entity_type, name, description, is_system, is_active, created_at";

const INSTANCE_COLUMNS: &str = "id, tenant_id, template_id, entity_type, entity_id, entity_name, \
     initiated_by, initiated_at, current_step_order, status, final_decision, final_comment, \
     metadata, completed_at, updated_at, lock_version";

const APPROVAL_COLUMNS: &str = "a.id, a.instance_id, a.step_id, a.step_order, a.approver_id, \
     a.approver_role, a.approver_permission, a.delegated_from, a.decision, a.comment, \
     a.assigned_at, a.due_at, a.decided_at, a.remind_at, a.notification_sent_at, \
     a.reminder_sent_at";

const DELEGATION_COLUMNS: &str = "id, tenant_id, delegator_id, delegate_id, workflow_type, role, \
     starts_at, ends_at, is_active, reason, created_at";

impl SqliteStore {
    async fn load_template(&self, row: TemplateRow) -> Result<WorkflowTemplate> {
        let steps = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT id, template_id, step_order, name, required_role, required_permission,
                   specific_user_id, is_optional, parallel_with_previous, timeout_days,
                   auto_approve_on_timeout, auto_reject_on_timeout, escalation_role,
                   reminder_days, allow_delegation
            FROM workflow_steps
            WHERE template_id = ?
            ORDER BY step_order, rowid
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<Vec<WorkflowStep>>>()?;

        Ok(WorkflowTemplate {
            id: row.id,
            tenant_id: row.tenant_id,
            entity_type: row.entity_type,
            name: row.name,
            description: row.description,
            is_system: row.is_system,
            is_active: row.is_active,
            steps,
            created_at: row.created_at,
        })
    }

    async fn query_approvals(
        &self,
        filter: &str,
        binds: &[&str],
        limit: Option<i64>,
    ) -> Result<Vec<WorkflowApproval>> {
        let mut sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM workflow_approvals a \
             JOIN workflow_instances i ON i.id = a.instance_id WHERE {filter}"
        );
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }
        let mut query = sqlx::query_as::<_, ApprovalRow>(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        if let Some(limit) = limit {
            query = query.bind(limit);
        }
        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }
}

#[async_trait::async_trait]
impl WorkflowStore for SqliteStore {
    async fn insert_template(&self, template: &WorkflowTemplate) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflow_templates (
                id, tenant_id, entity_type, name, description, is_system, is_active, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&template.id)
        .bind(&template.tenant_id)
        .bind(&template.entity_type)
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.is_system)
        .bind(template.is_active)
        .bind(template.created_at)
        .execute(&mut *tx)
        .await?;

        for step in &template.steps {
            sqlx::query(
                r#"
                INSERT INTO workflow_steps (
                    id, template_id, step_order, name, required_role, required_permission,
                    specific_user_id, is_optional, parallel_with_previous, timeout_days,
                    auto_approve_on_timeout, auto_reject_on_timeout, escalation_role,
                    reminder_days, allow_delegation
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&step.id)
            .bind(&template.id)
            .bind(step.step_order)
            .bind(&step.name)
            .bind(step.required_role.map(|r| r.as_str()))
            .bind(&step.required_permission)
            .bind(&step.specific_user_id)
            .bind(step.is_optional)
            .bind(step.parallel_with_previous)
            .bind(step.timeout_days)
            .bind(step.auto_approve_on_timeout)
            .bind(step.auto_reject_on_timeout)
            .bind(step.escalation_role.map(|r| r.as_str()))
            .bind(step.reminder_days)
            .bind(step.allow_delegation)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_template(&self, template_id: &str) -> Result<Option<WorkflowTemplate>> {
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM workflow_templates WHERE id = ?"
        ))
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => self.load_template(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_template_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<Option<WorkflowTemplate>> {
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM workflow_templates \
             WHERE name = ? AND (tenant_id = ? OR tenant_id IS NULL) \
             ORDER BY tenant_id IS NULL, created_at DESC LIMIT 1"
        ))
        .bind(name)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => self.load_template(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_active_template(
        &self,
        tenant_id: &str,
        entity_type: &str,
    ) -> Result<Option<WorkflowTemplate>> {
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM workflow_templates \
             WHERE entity_type = ? AND is_active = 1 AND (tenant_id = ? OR tenant_id IS NULL) \
             ORDER BY tenant_id IS NULL, created_at DESC LIMIT 1"
        ))
        .bind(entity_type)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => self.load_template(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<WorkflowInstance>> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE id = ?"
        ))
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_instances_for_entity(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<WorkflowInstance>> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances \
             WHERE tenant_id = ? AND entity_type = ? AND entity_id = ? \
             ORDER BY initiated_at DESC"
        ))
        .bind(tenant_id)
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_approvals(&self, instance_id: &str) -> Result<Vec<WorkflowApproval>> {
        self.query_approvals(
            "a.instance_id = ? ORDER BY a.assigned_at, a.rowid",
            &[instance_id],
            None,
        )
        .await
    }

    async fn get_approval(&self, approval_id: &str) -> Result<Option<WorkflowApproval>> {
        Ok(self
            .query_approvals("a.id = ?", &[approval_id], None)
            .await?
            .into_iter()
            .next())
    }

    async fn apply_workflow_changes(&self, changes: &WorkflowChanges) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        if let Some(instance) = &changes.insert_instance {
            sqlx::query(
                r#"
                INSERT INTO workflow_instances (
                    id, tenant_id, template_id, entity_type, entity_id, entity_name,
                    initiated_by, initiated_at, current_step_order, status, final_decision,
                    final_comment, metadata, completed_at, updated_at, lock_version
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&instance.id)
            .bind(&instance.tenant_id)
            .bind(&instance.template_id)
            .bind(&instance.entity_type)
            .bind(&instance.entity_id)
            .bind(&instance.entity_name)
            .bind(&instance.initiated_by)
            .bind(instance.initiated_at)
            .bind(instance.current_step_order)
            .bind(instance.status.as_str())
            .bind(instance.final_decision.map(|d| d.as_str()))
            .bind(&instance.final_comment)
            .bind(to_json(&instance.metadata)?)
            .bind(instance.completed_at)
            .bind(instance.updated_at)
            .bind(instance.lock_version)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(instance) = &changes.update_instance {
            let result = sqlx::query(
                r#"
                UPDATE workflow_instances
                SET current_step_order = ?,
                    status = ?,
                    final_decision = ?,
                    final_comment = ?,
                    metadata = ?,
                    completed_at = ?,
                    updated_at = ?,
                    lock_version = lock_version + 1
                WHERE id = ? AND lock_version = ?
                "#,
            )
            .bind(instance.current_step_order)
            .bind(instance.status.as_str())
            .bind(instance.final_decision.map(|d| d.as_str()))
            .bind(&instance.final_comment)
            .bind(to_json(&instance.metadata)?)
            .bind(instance.completed_at)
            .bind(instance.updated_at)
            .bind(&instance.id)
            .bind(instance.lock_version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                debug!(instance_id = %instance.id, "Workflow instance changed concurrently");
                return Ok(false);
            }
        }

        for approval in &changes.update_approvals {
            sqlx::query(
                r#"
                UPDATE workflow_approvals
                SET approver_id = ?,
                    delegated_from = ?,
                    decision = ?,
                    comment = ?,
                    due_at = ?,
                    decided_at = ?,
                    remind_at = ?,
                    notification_sent_at = ?,
                    reminder_sent_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&approval.approver_id)
            .bind(&approval.delegated_from)
            .bind(approval.decision.map(|d| d.as_str()))
            .bind(&approval.comment)
            .bind(approval.due_at)
            .bind(approval.decided_at)
            .bind(approval.remind_at)
            .bind(approval.notification_sent_at)
            .bind(approval.reminder_sent_at)
            .bind(&approval.id)
            .execute(&mut *tx)
            .await?;
        }

        for approval in &changes.insert_approvals {
            sqlx::query(
                r#"
                INSERT INTO workflow_approvals (
                    id, instance_id, step_id, step_order, approver_id, approver_role,
                    approver_permission, delegated_from, decision, comment, assigned_at,
                    due_at, decided_at, remind_at, notification_sent_at, reminder_sent_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&approval.id)
            .bind(&approval.instance_id)
            .bind(&approval.step_id)
            .bind(approval.step_order)
            .bind(&approval.approver_id)
            .bind(approval.approver_role.map(|r| r.as_str()))
            .bind(&approval.approver_permission)
            .bind(&approval.delegated_from)
            .bind(approval.decision.map(|d| d.as_str()))
            .bind(&approval.comment)
            .bind(approval.assigned_at)
            .bind(approval.due_at)
            .bind(approval.decided_at)
            .bind(approval.remind_at)
            .bind(approval.notification_sent_at)
            .bind(approval.reminder_sent_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn insert_delegation(&self, delegation: &Delegation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_delegations (
                id, tenant_id, delegator_id, delegate_id, workflow_type, role,
                starts_at, ends_at, is_active, reason, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&delegation.id)
        .bind(&delegation.tenant_id)
        .bind(&delegation.delegator_id)
        .bind(&delegation.delegate_id)
        .bind(&delegation.workflow_type)
        .bind(delegation.role.as_str())
        .bind(delegation.starts_at)
        .bind(delegation.ends_at)
        .bind(delegation.is_active)
        .bind(&delegation.reason)
        .bind(delegation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_delegation(
        &self,
        tenant_id: &str,
        delegation_id: &str,
    ) -> Result<Option<Delegation>> {
        let row = sqlx::query_as::<_, DelegationRow>(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM workflow_delegations WHERE tenant_id = ? AND id = ?"
        ))
        .bind(tenant_id)
        .bind(delegation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn deactivate_delegation(&self, tenant_id: &str, delegation_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_delegations
            SET is_active = 0
            WHERE tenant_id = ? AND id = ? AND is_active = 1
            "#,
        )
        .bind(tenant_id)
        .bind(delegation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delegations_for_role(
        &self,
        tenant_id: &str,
        role: Role,
        at: DateTime<Utc>,
    ) -> Result<Vec<Delegation>> {
        let rows = sqlx::query_as::<_, DelegationRow>(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM workflow_delegations \
             WHERE tenant_id = ? AND role = ? AND is_active = 1 AND starts_at <= ? AND ends_at >= ? \
             ORDER BY created_at, rowid"
        ))
        .bind(tenant_id)
        .bind(role.as_str())
        .bind(at)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn delegations_from(
        &self,
        tenant_id: &str,
        delegator_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Delegation>> {
        let rows = sqlx::query_as::<_, DelegationRow>(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM workflow_delegations \
             WHERE tenant_id = ? AND delegator_id = ? AND is_active = 1 \
               AND starts_at <= ? AND ends_at >= ? \
             ORDER BY created_at, rowid"
        ))
        .bind(tenant_id)
        .bind(delegator_id)
        .bind(at)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_due_approvals(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WorkflowApproval>> {
        let rows = sqlx::query_as::<_, ApprovalRow>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM workflow_approvals a \
             JOIN workflow_instances i ON i.id = a.instance_id \
             WHERE i.status = 'pending' AND a.decision IS NULL \
               AND a.due_at IS NOT NULL AND a.due_at <= ? \
             ORDER BY a.due_at, a.rowid LIMIT ?"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_reminders_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WorkflowApproval>> {
        let rows = sqlx::query_as::<_, ApprovalRow>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM workflow_approvals a \
             JOIN workflow_instances i ON i.id = a.instance_id \
             WHERE i.status = 'pending' AND a.decision IS NULL \
               AND a.remind_at IS NOT NULL AND a.remind_at <= ? \
               AND a.reminder_sent_at IS NULL \
             ORDER BY a.remind_at, a.rowid LIMIT ?"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_open_approvals(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<WorkflowApproval>> {
        self.query_approvals(
            "i.tenant_id = ? AND i.status = 'pending' AND a.decision IS NULL \
             AND (a.approver_id = ? OR a.approver_id IS NULL) \
             ORDER BY a.assigned_at, a.rowid",
            &[tenant_id, user_id],
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn template(tenant: Option<&str>, name: &str) -> WorkflowTemplate {
        let id = uuid::Uuid::new_v4().to_string();
        let mut steps = vec![
            WorkflowStep::new(1, "Advisor").role(Role::Advisor).timeout_days(3),
            WorkflowStep::new(2, "Dean").role(Role::Dean).escalate_to(Role::Admin),
        ];
        for step in &mut steps {
            step.template_id = id.clone();
        }
        WorkflowTemplate {
            id,
            tenant_id: tenant.map(str::to_string),
            entity_type: "thesis".into(),
            name: name.into(),
            description: None,
            is_system: tenant.is_none(),
            is_active: true,
            steps,
            created_at: Utc::now(),
        }
    }

    fn instance(template: &WorkflowTemplate) -> WorkflowInstance {
        let now = Utc::now();
        WorkflowInstance {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: "t".into(),
            template_id: template.id.clone(),
            entity_type: "thesis".into(),
            entity_id: "th-1".into(),
            entity_name: Some("Thesis".into()),
            initiated_by: "student".into(),
            initiated_at: now,
            current_step_order: 1,
            status: WorkflowStatus::Pending,
            final_decision: None,
            final_comment: None,
            metadata: json!({"source": "test"}),
            completed_at: None,
            updated_at: now,
            lock_version: 0,
        }
    }

    fn approval(instance: &WorkflowInstance, step: &WorkflowStep, due: Option<DateTime<Utc>>) -> WorkflowApproval {
        WorkflowApproval {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id: instance.id.clone(),
            step_id: step.id.clone(),
            step_order: step.step_order,
            approver_id: Some("adv".into()),
            approver_role: step.required_role,
            approver_permission: None,
            delegated_from: None,
            decision: None,
            comment: None,
            assigned_at: Utc::now(),
            due_at: due,
            decided_at: None,
            remind_at: None,
            notification_sent_at: None,
            reminder_sent_at: None,
        }
    }

    #[tokio::test]
    async fn test_tenant_template_shadows_system() {
        let store = SqliteStore::in_memory().await.unwrap();
        let system = template(None, "thesis-approval");
        let own = template(Some("t"), "thesis-approval");
        store.insert_template(&system).await.unwrap();
        store.insert_template(&own).await.unwrap();

        let found = store.find_template_by_name("t", "thesis-approval").await.unwrap().unwrap();
        assert_eq!(found.id, own.id);
        assert_eq!(found.steps.len(), 2);
        assert_eq!(found.steps[1].escalation_role, Some(Role::Admin));

        let other = store.find_active_template("t2", "thesis").await.unwrap().unwrap();
        assert_eq!(other.id, system.id);
    }

    #[tokio::test]
    async fn test_stale_instance_update_rolls_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        let tpl = template(None, "x");
        store.insert_template(&tpl).await.unwrap();
        let inst = instance(&tpl);
        let row = approval(&inst, &tpl.steps[0], None);

        let changes = WorkflowChanges {
            insert_instance: Some(inst.clone()),
            insert_approvals: vec![row.clone()],
            ..Default::default()
        };
        assert!(store.apply_workflow_changes(&changes).await.unwrap());

        let mut advanced = inst.clone();
        advanced.current_step_order = 2;
        let mut closed = row.clone();
        closed.close(Decision::Approved, None, Utc::now());
        let mut changes = WorkflowChanges {
            update_instance: Some(advanced.clone()),
            ..Default::default()
        };
        changes.update_approval(closed.clone());
        assert!(store.apply_workflow_changes(&changes).await.unwrap());
        // Same read version again.
        assert!(!store.apply_workflow_changes(&changes).await.unwrap());

        let stored = store.get_instance(&inst.id).await.unwrap().unwrap();
        assert_eq!(stored.lock_version, 1);
        assert_eq!(stored.metadata, json!({"source": "test"}));
        let rows = store.list_approvals(&inst.id).await.unwrap();
        assert_eq!(rows[0].decision, Some(Decision::Approved));
    }

    #[tokio::test]
    async fn test_due_and_open_queries() {
        let store = SqliteStore::in_memory().await.unwrap();
        let tpl = template(None, "x");
        store.insert_template(&tpl).await.unwrap();
        let inst = instance(&tpl);
        let now = Utc::now();
        let overdue = approval(&inst, &tpl.steps[0], Some(now - Duration::hours(1)));
        let mut later = approval(&inst, &tpl.steps[0], Some(now + Duration::days(1)));
        later.approver_id = None;
        let changes = WorkflowChanges {
            insert_instance: Some(inst.clone()),
            insert_approvals: vec![overdue.clone(), later.clone()],
            ..Default::default()
        };
        store.apply_workflow_changes(&changes).await.unwrap();

        let due = store.list_due_approvals(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, overdue.id);

        let open = store.list_open_approvals("t", "someone-else").await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, later.id);
        assert_eq!(store.list_open_approvals("t", "adv").await.unwrap().len(), 2);
        assert!(store.list_open_approvals("t2", "adv").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delegation_window_query() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        let delegation = Delegation {
            id: "d1".into(),
            tenant_id: "t".into(),
            delegator_id: "chair".into(),
            delegate_id: "vice".into(),
            workflow_type: None,
            role: Role::Chair,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            is_active: true,
            reason: Some("leave".into()),
            created_at: now,
        };
        store.insert_delegation(&delegation).await.unwrap();

        assert_eq!(store.delegations_for_role("t", Role::Chair, now).await.unwrap().len(), 1);
        assert!(
            store
                .delegations_for_role("t", Role::Chair, now + Duration::days(3))
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(store.delegations_from("t", "chair", now).await.unwrap().len(), 1);

        assert_eq!(store.get_delegation("t", "d1").await.unwrap().unwrap().reason.as_deref(), Some("leave"));
        assert!(store.get_delegation("t2", "d1").await.unwrap().is_none());
        assert!(store.deactivate_delegation("t", "d1").await.unwrap());
        assert!(!store.deactivate_delegation("t", "d1").await.unwrap());
        assert!(store.delegations_for_role("t", Role::Chair, now).await.unwrap().is_empty());
    }
}
