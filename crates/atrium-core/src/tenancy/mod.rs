// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant & identity context.
//!
//! Every engine operation runs inside an [`ActorContext`]: the resolved tenant,
//! the acting user and the roles that user holds in the tenant. This module
//! derives that context from a request (tenant hint + bearer token + membership)
//! and answers permission questions through [`AccessPolicy`].

mod access;
mod resolve;
mod token;

pub use access::{AccessPolicy, GLOBAL_CONTEXT, WILDCARD_PERMISSION};
pub use resolve::{TENANT_HEADER, TenantResolver};
pub use token::{TokenClaims, TokenVerifier, bearer_token};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::persistence::DirectoryStore;

/// Closed role vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Platform operator spanning all tenants.
    Superadmin,
    /// Tenant administrator.
    Admin,
    Dean,
    Chair,
    Instructor,
    Advisor,
    Student,
    Registrar,
    Hr,
    FacilityManager,
    ContentManager,
    SchedulerAdmin,
    External,
}

impl Role {
    /// All roles in vocabulary order.
    pub const ALL: [Role; 13] = [
        Role::Superadmin,
        Role::Admin,
        Role::Dean,
        Role::Chair,
        Role::Instructor,
        Role::Advisor,
        Role::Student,
        Role::Registrar,
        Role::Hr,
        Role::FacilityManager,
        Role::ContentManager,
        Role::SchedulerAdmin,
        Role::External,
    ];

    /// Returns the string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Superadmin => "superadmin",
            Self::Admin => "admin",
            Self::Dean => "dean",
            Self::Chair => "chair",
            Self::Instructor => "instructor",
            Self::Advisor => "advisor",
            Self::Student => "student",
            Self::Registrar => "registrar",
            Self::Hr => "hr",
            Self::FacilityManager => "facility_manager",
            Self::ContentManager => "content_manager",
            Self::SchedulerAdmin => "scheduler_admin",
            Self::External => "external",
        }
    }

    /// Parse a role from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.as_str() == s)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unordered set of roles held by one user in one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    /// Empty role set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the set holds `role` literally.
    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    /// Whether the set satisfies a gate on `role`. `superadmin` satisfies `admin`.
    pub fn satisfies(&self, role: Role) -> bool {
        self.contains(role) || (role == Role::Admin && self.contains(Role::Superadmin))
    }

    /// Whether any of `roles` is satisfied.
    pub fn satisfies_any(&self, roles: &[Role]) -> bool {
        roles.iter().any(|role| self.satisfies(*role))
    }

    /// Add a role.
    pub fn insert(&mut self, role: Role) {
        self.0.insert(role);
    }

    /// Iterate roles in vocabulary order.
    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a list of role names, rejecting unknown ones.
    pub fn parse_all<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        names
            .into_iter()
            .map(|name| {
                Role::parse(name).ok_or_else(|| Error::Validation(format!("unknown role '{name}'")))
            })
            .collect()
    }

    /// Role names, for storage.
    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(Role::as_str).collect()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Role; N]> for RoleSet {
    fn from(roles: [Role; N]) -> Self {
        roles.into_iter().collect()
    }
}

/// Tenant (organization) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Stable opaque id
    pub id: String,
    /// Human-readable slug used for routing
    pub slug: String,
    /// Display name
    pub name: String,
    /// Services switched on for this tenant
    pub enabled_services: Vec<String>,
    /// Opaque branding settings
    pub branding: serde_json::Value,
    /// Deactivated tenants reject every request
    pub is_active: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Build an active tenant with a generated id.
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            slug: slug.into(),
            name: name.into(),
            enabled_services: Vec::new(),
            branding: serde_json::Value::Object(Default::default()),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Whether `service` is enabled.
    pub fn has_service(&self, service: &str) -> bool {
        self.enabled_services.iter().any(|s| s == service)
    }
}

/// Binding of a global user to a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub tenant_id: String,
    pub user_id: String,
    pub roles: RoleSet,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Role held by a user inside a narrower context (a department, a program, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub tenant_id: String,
    pub user_id: String,
    pub role: Role,
    pub context_type: String,
    pub context_id: Option<String>,
}

/// Identity every engine operation runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    /// Resolved tenant id
    pub tenant_id: String,
    /// Acting user id
    pub actor_id: String,
    /// Roles the actor holds in the tenant
    pub roles: RoleSet,
}

impl ActorContext {
    /// Build a context.
    pub fn new(
        tenant_id: impl Into<String>,
        actor_id: impl Into<String>,
        roles: impl Into<RoleSet>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
            roles: roles.into(),
        }
    }

    /// Whether the actor is `user`.
    pub fn is(&self, user: &str) -> bool {
        self.actor_id == user
    }

    /// Whether the actor holds a staff role.
    pub fn is_staff(&self) -> bool {
        self.roles.satisfies_any(&STAFF_ROLES)
    }

    /// Fail with `NotAuthorized` unless the actor satisfies one of `roles`.
    pub fn require_any(&self, roles: &[Role], action: &str) -> Result<()> {
        if self.roles.satisfies_any(roles) {
            Ok(())
        } else {
            Err(Error::NotAuthorized(format!(
                "{action} requires one of: {}",
                roles.iter().map(Role::as_str).collect::<Vec<_>>().join(", ")
            )))
        }
    }
}

/// Roles that may act on other users' journeys.
pub const STAFF_ROLES: [Role; 6] = [
    Role::Superadmin,
    Role::Admin,
    Role::Dean,
    Role::Chair,
    Role::Advisor,
    Role::Registrar,
];

/// Turns request credentials into an [`ActorContext`].
///
/// ```text
/// X-Tenant-Slug / Host ──► TenantResolver ──► Tenant (active)
/// Authorization ─────────► TokenVerifier ───► TokenClaims
///                                   membership(tenant, sub) ──► ActorContext
/// ```
pub struct ContextBuilder {
    resolver: TenantResolver,
    verifier: TokenVerifier,
    directory: Arc<dyn DirectoryStore>,
}

impl ContextBuilder {
    /// Create a context builder.
    pub fn new(
        resolver: TenantResolver,
        verifier: TokenVerifier,
        directory: Arc<dyn DirectoryStore>,
    ) -> Self {
        Self {
            resolver,
            verifier,
            directory,
        }
    }

    /// Resolve the tenant and authenticate the caller.
    ///
    /// Superadmins act in any tenant without a membership; everybody else
    /// needs an active membership in the resolved tenant. A token scoped to a
    /// different tenant is refused.
    pub async fn build(
        &self,
        tenant_header: Option<&str>,
        host: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<ActorContext> {
        let tenant = self
            .resolver
            .resolve(self.directory.as_ref(), tenant_header, host)
            .await?;
        let claims = self.verifier.authenticate(authorization)?;

        if let Some(token_tenant) = claims.tenant_id.as_deref()
            && token_tenant != tenant.id
            && !claims.superadmin()
        {
            return Err(Error::NotAuthorized(
                "token was issued for a different tenant".to_string(),
            ));
        }

        let membership = self.directory.get_membership(&tenant.id, &claims.sub).await?;
        let mut roles = match membership {
            Some(m) if m.is_active => m.roles,
            _ if claims.superadmin() => RoleSet::new(),
            _ => {
                return Err(Error::NotAuthorized(
                    "user is not a member of this tenant".to_string(),
                ));
            }
        };
        if claims.superadmin() {
            roles.insert(Role::Superadmin);
        }

        Ok(ActorContext {
            tenant_id: tenant.id,
            actor_id: claims.sub,
            roles,
        })
    }
}
