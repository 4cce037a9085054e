// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};

use super::{SqliteStore, decode, from_json, to_json};
use crate::error::Result;
use crate::persistence::DirectoryStore;
use crate::tenancy::{Membership, Role, RoleAssignment, RoleSet, Tenant};

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    slug: String,
    name: String,
    enabled_services: String,
    branding: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TenantRow {
    fn into_tenant(self) -> Result<Tenant> {
        Ok(Tenant {
            id: self.id,
            slug: self.slug,
            name: self.name,
            enabled_services: from_json("enabled_services", &self.enabled_services)?,
            branding: from_json("branding", &self.branding)?,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MembershipRow {
    tenant_id: String,
    user_id: String,
    roles: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    tenant_id: String,
    user_id: String,
    role: String,
    context_type: String,
    context_id: Option<String>,
}

const TENANT_COLUMNS: &str = "id, slug, name, enabled_services, branding, is_active, created_at";

#[async_trait::async_trait]
impl DirectoryStore for SqliteStore {
    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, slug, name, enabled_services, branding, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                name = excluded.name,
                enabled_services = excluded.enabled_services,
                branding = excluded.branding,
                is_active = excluded.is_active
            "#,
        )
        .bind(&tenant.id)
        .bind(&tenant.slug)
        .bind(&tenant.name)
        .bind(to_json(&tenant.enabled_services)?)
        .bind(to_json(&tenant.branding)?)
        .bind(tenant.is_active)
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE slug = ?"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TenantRow::into_tenant).transpose()
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?"
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TenantRow::into_tenant).transpose()
    }

    async fn upsert_membership(&self, membership: &Membership) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO memberships (tenant_id, user_id, roles, is_active, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, user_id) DO UPDATE SET
                roles = excluded.roles,
                is_active = excluded.is_active
            "#,
        )
        .bind(&membership.tenant_id)
        .bind(&membership.user_id)
        .bind(to_json(&membership.roles.names())?)
        .bind(membership.is_active)
        .bind(membership.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_membership(&self, tenant_id: &str, user_id: &str) -> Result<Option<Membership>> {
        let row = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT tenant_id, user_id, roles, is_active, created_at
            FROM memberships
            WHERE tenant_id = ? AND user_id = ?
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let names: Vec<String> = from_json("roles", &row.roles)?;
        Ok(Some(Membership {
            tenant_id: row.tenant_id,
            user_id: row.user_id,
            roles: RoleSet::parse_all(names.iter().map(String::as_str))?,
            is_active: row.is_active,
            created_at: row.created_at,
        }))
    }

    async fn add_role_assignment(&self, assignment: &RoleAssignment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO role_assignments (tenant_id, user_id, role, context_type, context_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&assignment.tenant_id)
        .bind(&assignment.user_id)
        .bind(assignment.role.as_str())
        .bind(&assignment.context_type)
        .bind(&assignment.context_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn role_assignments(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<RoleAssignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT tenant_id, user_id, role, context_type, context_id
            FROM role_assignments
            WHERE tenant_id = ? AND user_id = ?
            ORDER BY id
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(RoleAssignment {
                    role: decode("role", &row.role, Role::parse)?,
                    tenant_id: row.tenant_id,
                    user_id: row.user_id,
                    context_type: row.context_type,
                    context_id: row.context_id,
                })
            })
            .collect()
    }

    async fn grant_permission(&self, tenant_id: &str, role: Role, permission: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO role_permissions (tenant_id, role, permission)
            VALUES (?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(role.as_str())
        .bind(permission)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn role_permissions(&self, tenant_id: &str, role: Role) -> Result<Vec<String>> {
        let permissions: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT permission FROM role_permissions
            WHERE tenant_id = ? AND role = ?
            ORDER BY permission
            "#,
        )
        .bind(tenant_id)
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(permissions)
    }

    async fn users_with_role(&self, tenant_id: &str, role: Role) -> Result<Vec<String>> {
        let users: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT m.user_id
            FROM memberships m, json_each(m.roles) r
            WHERE m.tenant_id = ? AND m.is_active = 1 AND r.value = ?
            ORDER BY m.created_at, m.user_id
            "#,
        )
        .bind(tenant_id)
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn users_with_permission(
        &self,
        tenant_id: &str,
        permission: &str,
    ) -> Result<Vec<String>> {
        let users: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT m.user_id
            FROM memberships m, json_each(m.roles) r
            JOIN role_permissions p
              ON p.tenant_id = m.tenant_id
             AND p.role = r.value
             AND (p.permission = ? OR p.permission = '*')
            WHERE m.tenant_id = ? AND m.is_active = 1
            GROUP BY m.user_id
            ORDER BY MIN(m.created_at), m.user_id
            "#,
        )
        .bind(permission)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}
