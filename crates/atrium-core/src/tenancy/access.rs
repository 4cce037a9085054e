// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Permission checks over `(user, role, context)` triples.

use std::sync::Arc;

use tracing::debug;

use super::{ActorContext, Role};
use crate::error::Result;
use crate::persistence::DirectoryStore;

/// Permission that grants every other permission.
pub const WILDCARD_PERMISSION: &str = "*";

/// Context type of membership roles; matches every requested context.
pub const GLOBAL_CONTEXT: &str = "global";

/// Evaluates `allowed(actor, permission, context_type, context_id)`.
///
/// Triples are gathered from the actor's membership roles (global context) and
/// from context-scoped role assignments. A triple applies when its context is
/// global or equal to the requested one; it grants the permission when the
/// tenant's role-permission table lists the permission or `*` for that role.
#[derive(Clone)]
pub struct AccessPolicy {
    directory: Arc<dyn DirectoryStore>,
}

impl AccessPolicy {
    /// Create a policy backed by the directory store.
    pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
        Self { directory }
    }

    /// Whether the actor holds `permission` in the given context.
    pub async fn allowed(
        &self,
        actor: &ActorContext,
        permission: &str,
        context_type: &str,
        context_id: Option<&str>,
    ) -> Result<bool> {
        if actor.roles.contains(Role::Superadmin) {
            return Ok(true);
        }

        let mut roles: Vec<Role> = actor.roles.iter().collect();
        let assignments = self
            .directory
            .role_assignments(&actor.tenant_id, &actor.actor_id)
            .await?;
        for assignment in assignments {
            let applies = assignment.context_type == GLOBAL_CONTEXT
                || (assignment.context_type == context_type
                    && (assignment.context_id.is_none()
                        || assignment.context_id.as_deref() == context_id));
            if applies && !roles.contains(&assignment.role) {
                roles.push(assignment.role);
            }
        }

        for role in roles {
            let granted = self
                .directory
                .role_permissions(&actor.tenant_id, role)
                .await?;
            if granted
                .iter()
                .any(|p| p == WILDCARD_PERMISSION || p == permission)
            {
                debug!(
                    actor = %actor.actor_id,
                    role = %role,
                    permission,
                    context_type,
                    "Permission granted"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}
