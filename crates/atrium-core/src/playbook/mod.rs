// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Playbook loader.
//!
//! A playbook is the curriculum definition: ordered worlds containing nodes
//! whose prerequisites form a DAG. Versions are immutable and content-addressed
//! by the SHA-256 of their raw bytes, so loading the same document twice reuses
//! the stored version. Each tenant (and the global scope) has one active pointer.

mod definition;
mod graph;

pub use definition::{
    FieldRequirement, LocalizedText, Multiplicity, NodeDefinition, NodeDocument, NodeKind,
    PlaybookDocument, Requirements, UploadRequirement, WorldDocument,
};
pub use graph::PrerequisiteGraph;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::persistence::PlaybookStore;

/// Scope key of the global active pointer.
pub const GLOBAL_SCOPE: &str = "*";

/// Hex SHA-256 of raw definition bytes.
pub fn checksum_hex(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}

/// Stored, immutable playbook version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookVersion {
    pub id: String,
    pub playbook_id: String,
    pub version: String,
    pub checksum: String,
    pub raw: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Active pointer of one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePointer {
    pub scope: String,
    pub version_id: String,
    pub checksum: String,
    pub updated_at: DateTime<Utc>,
}

/// A world in display order.
#[derive(Debug, Clone)]
pub struct World {
    pub id: String,
    pub order: i32,
    pub title: LocalizedText,
    /// Node slugs in declaration order.
    pub nodes: Vec<String>,
}

/// Parsed playbook version handle.
#[derive(Debug, Clone)]
pub struct Playbook {
    version_id: String,
    playbook_id: String,
    version: String,
    checksum: String,
    raw: Vec<u8>,
    default_locale: String,
    worlds: Vec<World>,
    nodes: HashMap<String, NodeDefinition>,
    graph: PrerequisiteGraph,
}

impl Playbook {
    /// Parse and validate a stored version.
    pub fn from_version(record: &PlaybookVersion) -> Result<Self> {
        let document: PlaybookDocument = serde_json::from_slice(&record.raw)
            .map_err(|e| Error::Parse(e.to_string()))?;
        if document.worlds.is_empty() {
            return Err(Error::Parse("playbook declares no worlds".to_string()));
        }

        let mut worlds = Vec::with_capacity(document.worlds.len());
        let mut nodes = HashMap::new();
        let mut graph = PrerequisiteGraph::new();
        let mut world_ids = HashSet::new();

        for (index, world) in document.worlds.into_iter().enumerate() {
            if !world_ids.insert(world.id.clone()) {
                return Err(Error::Parse(format!("duplicate world '{}'", world.id)));
            }
            let mut slugs = Vec::with_capacity(world.nodes.len());
            for doc in world.nodes {
                let node = NodeDefinition::from_document(&world.id, doc)?;
                if nodes.contains_key(&node.slug) {
                    return Err(Error::Parse(format!("duplicate node '{}'", node.slug)));
                }
                graph.add_node(&node.slug, &node.prerequisites);
                slugs.push(node.slug.clone());
                nodes.insert(node.slug.clone(), node);
            }
            worlds.push(World {
                id: world.id,
                order: world.order.unwrap_or(index as i32 + 1),
                title: world.title,
                nodes: slugs,
            });
        }
        worlds.sort_by_key(|w| w.order);

        for node in nodes.values() {
            if let Some(unknown) = node
                .prerequisites
                .iter()
                .find(|p| !nodes.contains_key(p.as_str()))
            {
                return Err(Error::Parse(format!(
                    "node '{}' lists unknown prerequisite '{}'",
                    node.slug, unknown
                )));
            }
        }
        graph.detect_cycles().map_err(Error::Cycle)?;

        Ok(Self {
            version_id: record.id.clone(),
            playbook_id: document.playbook_id,
            version: document.version,
            checksum: record.checksum.clone(),
            raw: record.raw.clone(),
            default_locale: document.locale_default,
            worlds,
            nodes,
            graph,
        })
    }

    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    pub fn playbook_id(&self) -> &str {
        &self.playbook_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    /// Worlds in display order.
    pub fn worlds(&self) -> &[World] {
        &self.worlds
    }

    /// All node definitions, unordered.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeDefinition> {
        self.nodes.values()
    }

    /// Node definition by slug.
    pub fn node_definition(&self, slug: &str) -> Result<&NodeDefinition> {
        self.nodes
            .get(slug)
            .ok_or_else(|| Error::not_found("node", slug))
    }

    /// Prerequisite slugs of a node.
    pub fn prerequisites(&self, slug: &str) -> Result<BTreeSet<String>> {
        let node = self.node_definition(slug)?;
        Ok(node.prerequisites.iter().cloned().collect())
    }

    /// World containing a node.
    pub fn world_of(&self, slug: &str) -> Result<&str> {
        Ok(&self.node_definition(slug)?.world)
    }

    /// Nodes listing `slug` as a prerequisite.
    pub fn dependents(&self, slug: &str) -> &[String] {
        self.graph.dependents(slug)
    }

    /// Node definitions of one world in declaration order.
    pub fn nodes_in_world(&self, world: &str) -> Vec<&NodeDefinition> {
        self.worlds
            .iter()
            .find(|w| w.id == world)
            .map(|w| w.nodes.iter().filter_map(|s| self.nodes.get(s)).collect())
            .unwrap_or_default()
    }

    /// Localized node title with default-locale fallback.
    pub fn title(&self, slug: &str, locale: &str) -> Option<&str> {
        self.nodes
            .get(slug)
            .and_then(|n| n.title.get(locale, &self.default_locale))
    }

    /// Slugs with every node after its prerequisites.
    pub fn topological_order(&self) -> Vec<String> {
        self.graph.topological_order()
    }
}

/// Loads, versions and activates playbooks.
pub struct PlaybookLoader {
    store: Arc<dyn PlaybookStore>,
    cache: DashMap<String, Arc<Playbook>>,
}

impl PlaybookLoader {
    /// Attempts at swapping an active pointer before giving up.
    const SWAP_ATTEMPTS: usize = 3;

    /// Create a loader over a playbook store.
    pub fn new(store: Arc<dyn PlaybookStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Store `raw` (reusing an identical version) and make it active.
    ///
    /// `tenant_id = None` activates the global default.
    #[instrument(skip(self, raw), fields(bytes = raw.len()))]
    pub async fn ensure_active(&self, raw: &[u8], tenant_id: Option<&str>) -> Result<Arc<Playbook>> {
        let checksum = checksum_hex(raw);

        let record = match self.store.find_version_by_checksum(&checksum).await? {
            Some(existing) => {
                debug!(version_id = %existing.id, "Reusing playbook version");
                existing
            }
            None => {
                let document: PlaybookDocument =
                    serde_json::from_slice(raw).map_err(|e| Error::Parse(e.to_string()))?;
                let candidate = PlaybookVersion {
                    id: uuid::Uuid::new_v4().to_string(),
                    playbook_id: document.playbook_id,
                    version: document.version,
                    checksum: checksum.clone(),
                    raw: raw.to_vec(),
                    created_at: Utc::now(),
                };
                // Validate before persisting.
                let parsed = Playbook::from_version(&candidate)?;
                let stored = self.store.insert_version(&candidate).await?;
                if stored.id == candidate.id {
                    info!(
                        version_id = %stored.id,
                        playbook_id = %stored.playbook_id,
                        version = %stored.version,
                        "Stored new playbook version"
                    );
                    self.cache.insert(stored.id.clone(), Arc::new(parsed));
                }
                stored
            }
        };

        let playbook = self.parse_cached(&record)?;
        let scope = tenant_id.unwrap_or(GLOBAL_SCOPE);
        self.activate(scope, &record).await?;
        Ok(playbook)
    }

    async fn activate(&self, scope: &str, record: &PlaybookVersion) -> Result<()> {
        for _ in 0..Self::SWAP_ATTEMPTS {
            let current = self.store.active_pointer(scope).await?;
            let expected = current.as_ref().map(|p| p.checksum.as_str());
            if expected == Some(record.checksum.as_str()) {
                return Ok(());
            }
            if self
                .store
                .swap_active_pointer(scope, expected, &record.id, &record.checksum)
                .await?
            {
                info!(scope, version_id = %record.id, "Activated playbook version");
                return Ok(());
            }
            debug!(scope, "Active pointer changed concurrently, retrying");
        }
        Err(Error::Conflict(format!("active playbook pointer of scope '{scope}'")))
    }

    fn parse_cached(&self, record: &PlaybookVersion) -> Result<Arc<Playbook>> {
        if let Some(hit) = self.cache.get(&record.id) {
            return Ok(hit.clone());
        }
        let parsed = Arc::new(Playbook::from_version(record)?);
        self.cache.insert(record.id.clone(), parsed.clone());
        Ok(parsed)
    }

    /// Playbook version by id.
    pub async fn version(&self, version_id: &str) -> Result<Arc<Playbook>> {
        if let Some(hit) = self.cache.get(version_id) {
            return Ok(hit.clone());
        }
        let record = self
            .store
            .get_version(version_id)
            .await?
            .ok_or_else(|| Error::not_found("playbook version", version_id))?;
        self.parse_cached(&record)
    }

    /// Active playbook of a tenant, falling back to the global default.
    pub async fn active(&self, tenant_id: &str) -> Result<Option<Arc<Playbook>>> {
        let pointer = match self.store.active_pointer(tenant_id).await? {
            Some(p) => Some(p),
            None => self.store.active_pointer(GLOBAL_SCOPE).await?,
        };
        match pointer {
            Some(p) => self.version(&p.version_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Active playbook of a tenant; fails with `NotFound` when none is set.
    pub async fn require_active(&self, tenant_id: &str) -> Result<Arc<Playbook>> {
        self.active(tenant_id)
            .await?
            .ok_or_else(|| Error::not_found("active playbook", tenant_id))
    }
}
