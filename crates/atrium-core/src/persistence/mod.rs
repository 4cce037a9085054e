// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence layer.
//!
//! Engines talk to storage through four traits, one per concern. Reads are
//! plain lookups; writes go through `apply_*_changes`, which commits a whole
//! change set in one transaction and returns `false` when an optimistic
//! `lock_version` guard lost a race (nothing is written in that case).
//!
//! [`SqliteStore`] implements every trait over one pool.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::journey::{
    Attachment, FormRevision, JourneyChanges, NodeDeadline, NodeEvent, NodeInstance, Slot,
};
use crate::playbook::{ActivePointer, PlaybookVersion};
use crate::tenancy::{Membership, Role, RoleAssignment, Tenant};
use crate::workflow::{
    Delegation, WorkflowApproval, WorkflowChanges, WorkflowInstance, WorkflowTemplate,
};

/// Tenants, memberships and role grants.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Insert or replace a tenant.
    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<()>;

    /// Tenant by routing slug.
    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>>;

    /// Tenant by id.
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    /// Insert or replace a membership.
    async fn upsert_membership(&self, membership: &Membership) -> Result<()>;

    /// Membership of a user in a tenant.
    async fn get_membership(&self, tenant_id: &str, user_id: &str) -> Result<Option<Membership>>;

    /// Record a context-scoped role.
    async fn add_role_assignment(&self, assignment: &RoleAssignment) -> Result<()>;

    /// Context-scoped roles of a user.
    async fn role_assignments(&self, tenant_id: &str, user_id: &str)
    -> Result<Vec<RoleAssignment>>;

    /// Grant `permission` (or `*`) to a role within a tenant.
    async fn grant_permission(&self, tenant_id: &str, role: Role, permission: &str) -> Result<()>;

    /// Permissions granted to a role within a tenant.
    async fn role_permissions(&self, tenant_id: &str, role: Role) -> Result<Vec<String>>;

    /// Active members holding `role`, oldest membership first.
    async fn users_with_role(&self, tenant_id: &str, role: Role) -> Result<Vec<String>>;

    /// Active members whose roles grant `permission`, oldest membership first.
    async fn users_with_permission(&self, tenant_id: &str, permission: &str)
    -> Result<Vec<String>>;
}

/// Immutable playbook versions and per-scope active pointers.
#[async_trait]
pub trait PlaybookStore: Send + Sync {
    /// Version whose checksum matches.
    async fn find_version_by_checksum(&self, checksum: &str) -> Result<Option<PlaybookVersion>>;

    /// Version by id.
    async fn get_version(&self, version_id: &str) -> Result<Option<PlaybookVersion>>;

    /// Store a version. When another writer stored the same checksum first,
    /// returns that version instead.
    async fn insert_version(&self, version: &PlaybookVersion) -> Result<PlaybookVersion>;

    /// Active pointer of a scope (tenant id or the global scope).
    async fn active_pointer(&self, scope: &str) -> Result<Option<ActivePointer>>;

    /// Point `scope` at a version if its current checksum is `expected`
    /// (`None` = no pointer yet). Returns whether the swap happened.
    async fn swap_active_pointer(
        &self,
        scope: &str,
        expected: Option<&str>,
        version_id: &str,
        checksum: &str,
    ) -> Result<bool>;
}

/// Node instances and their children.
#[async_trait]
pub trait JourneyStore: Send + Sync {
    /// Instance by its natural key.
    async fn get_node_instance(
        &self,
        tenant_id: &str,
        user_id: &str,
        playbook_version_id: &str,
        node_slug: &str,
    ) -> Result<Option<NodeInstance>>;

    /// Instance by id.
    async fn get_node_instance_by_id(&self, id: &str) -> Result<Option<NodeInstance>>;

    /// All instances of a user for one playbook version.
    async fn list_node_instances(
        &self,
        tenant_id: &str,
        user_id: &str,
        playbook_version_id: &str,
    ) -> Result<Vec<NodeInstance>>;

    /// Slots of an instance in declaration order.
    async fn list_slots(&self, node_instance_id: &str) -> Result<Vec<Slot>>;

    /// Attachments of an instance, oldest first.
    async fn list_attachments(&self, node_instance_id: &str) -> Result<Vec<Attachment>>;

    /// Attachment by id.
    async fn get_attachment(&self, attachment_id: &str) -> Result<Option<Attachment>>;

    /// One form revision.
    async fn get_form_revision(&self, node_instance_id: &str, rev: i64)
    -> Result<Option<FormRevision>>;

    /// Every form revision, ascending.
    async fn list_form_revisions(&self, node_instance_id: &str) -> Result<Vec<FormRevision>>;

    /// Audit events, in emission order.
    async fn list_node_events(&self, node_instance_id: &str) -> Result<Vec<NodeEvent>>;

    /// Deadline of a (user, node) pair.
    async fn get_deadline(
        &self,
        tenant_id: &str,
        user_id: &str,
        node_slug: &str,
    ) -> Result<Option<NodeDeadline>>;

    /// Commit a change set atomically. `false` means a concurrent writer won.
    async fn apply_journey_changes(&self, changes: &JourneyChanges) -> Result<bool>;
}

/// Workflow templates, instances, approvals and delegations.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Store a template with its steps.
    async fn insert_template(&self, template: &WorkflowTemplate) -> Result<()>;

    /// Template by id, steps included.
    async fn get_template(&self, template_id: &str) -> Result<Option<WorkflowTemplate>>;

    /// Template by name; tenant templates shadow system ones.
    async fn find_template_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<Option<WorkflowTemplate>>;

    /// Active template for an entity type; tenant templates shadow system ones.
    async fn find_active_template(
        &self,
        tenant_id: &str,
        entity_type: &str,
    ) -> Result<Option<WorkflowTemplate>>;

    /// Instance by id.
    async fn get_instance(&self, instance_id: &str) -> Result<Option<WorkflowInstance>>;

    /// Instances started against an entity, newest first.
    async fn list_instances_for_entity(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<WorkflowInstance>>;

    /// Approval rows of an instance, oldest first.
    async fn list_approvals(&self, instance_id: &str) -> Result<Vec<WorkflowApproval>>;

    /// Approval by id.
    async fn get_approval(&self, approval_id: &str) -> Result<Option<WorkflowApproval>>;

    /// Commit a change set atomically. `false` means a concurrent writer won.
    async fn apply_workflow_changes(&self, changes: &WorkflowChanges) -> Result<bool>;

    /// Store a delegation.
    async fn insert_delegation(&self, delegation: &Delegation) -> Result<()>;

    /// Delegation by id within a tenant.
    async fn get_delegation(&self, tenant_id: &str, delegation_id: &str)
    -> Result<Option<Delegation>>;

    /// Deactivate a delegation. Returns whether it existed and was active.
    async fn deactivate_delegation(&self, tenant_id: &str, delegation_id: &str) -> Result<bool>;

    /// Delegations in the tenant that cover `role` at `at`, oldest first.
    /// Workflow type filtering happens in the engine.
    async fn delegations_for_role(
        &self,
        tenant_id: &str,
        role: Role,
        at: DateTime<Utc>,
    ) -> Result<Vec<Delegation>>;

    /// Delegations granted by `delegator_id` in force at `at`.
    async fn delegations_from(
        &self,
        tenant_id: &str,
        delegator_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Delegation>>;

    /// Open approvals of pending instances with `due_at <= now`, earliest first.
    async fn list_due_approvals(&self, now: DateTime<Utc>, limit: i64)
    -> Result<Vec<WorkflowApproval>>;

    /// Open approvals of pending instances whose reminder is due and unsent.
    async fn list_reminders_due(&self, now: DateTime<Utc>, limit: i64)
    -> Result<Vec<WorkflowApproval>>;

    /// Open approvals in the tenant either assigned to `user_id` or unassigned.
    async fn list_open_approvals(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<WorkflowApproval>>;
}
