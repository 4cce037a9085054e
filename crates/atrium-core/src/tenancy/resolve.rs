// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant resolution from request headers and hostnames.

use tracing::debug;

use super::Tenant;
use crate::error::{Error, Result};
use crate::persistence::DirectoryStore;

/// Header that overrides hostname-based resolution.
pub const TENANT_HEADER: &str = "X-Tenant-Slug";

/// Subdomains that never name a tenant.
const RESERVED_LABELS: [&str; 3] = ["www", "api", "app"];

/// Resolves the tenant a request targets.
///
/// Precedence: explicit header > first hostname label > localhost default.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    default_slug: String,
}

impl TenantResolver {
    /// Create a resolver using `default_slug` for localhost requests.
    pub fn new(default_slug: impl Into<String>) -> Self {
        Self {
            default_slug: default_slug.into(),
        }
    }

    /// Derive the tenant slug without touching storage.
    pub fn slug(&self, header: Option<&str>, host: Option<&str>) -> Option<String> {
        if let Some(slug) = header.map(str::trim).filter(|s| !s.is_empty()) {
            return Some(slug.to_lowercase());
        }

        let host = strip_port(host?.trim()).to_lowercase();
        if host.is_empty() {
            return None;
        }
        if matches!(host.as_str(), "localhost" | "127.0.0.1" | "::1" | "[::1]") {
            return Some(self.default_slug.clone());
        }

        let mut labels = host.split('.');
        let first = labels.next()?;
        // A bare single-label host carries no subdomain.
        labels.next()?;
        if first.is_empty() || RESERVED_LABELS.contains(&first) {
            return None;
        }
        Some(first.to_string())
    }

    /// Resolve and load the tenant, rejecting unknown and inactive ones.
    pub async fn resolve(
        &self,
        directory: &dyn DirectoryStore,
        header: Option<&str>,
        host: Option<&str>,
    ) -> Result<Tenant> {
        let slug = self.slug(header, host).ok_or(Error::TenantNotSpecified)?;
        let tenant = directory
            .find_tenant_by_slug(&slug)
            .await?
            .ok_or_else(|| Error::TenantNotFound(slug.clone()))?;
        if !tenant.is_active {
            return Err(Error::TenantInactive(slug));
        }
        debug!(tenant_id = %tenant.id, slug = %tenant.slug, "Resolved tenant");
        Ok(tenant)
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}
