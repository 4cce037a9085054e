// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Content-addressed blob storage for uploaded documents.
//!
//! Object keys follow two shapes:
//!
//! ```text
//! nodes/<user>/<node>/<slot>/<YYYYMMDD>-<uuid>-<filename>
//! documents/<document>/<YYYYMMDD>-<filename>
//! ```
//!
//! Every segment is sanitized with [`sanitize_segment`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const MAX_FILENAME_LEN: usize = 80;
const MAX_SEGMENT_LEN: usize = 48;

/// Reference to a stored blob version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    /// Content hash; identical bytes share a version.
    pub version_id: String,
    pub key: String,
    pub size: i64,
    pub mime: String,
}

/// Blob storage backend.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`. Failures surface as `BlobWriteFailed`.
    async fn put(&self, key: &str, bytes: Vec<u8>, mime: &str) -> Result<BlobRef>;

    /// Fetch a version's bytes.
    async fn get(&self, version_id: &str) -> Result<Option<Vec<u8>>>;
}

/// In-process blob store keyed by SHA-256 of the content.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Arc<Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct stored versions.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, mime: &str) -> Result<BlobRef> {
        if key.is_empty() {
            return Err(Error::BlobWriteFailed("empty object key".to_string()));
        }
        let version_id = hex::encode(Sha256::digest(&bytes));
        let size = i64::try_from(bytes.len())
            .map_err(|_| Error::BlobWriteFailed("blob too large".to_string()))?;
        self.blobs
            .entry(version_id.clone())
            .or_insert_with(|| Arc::new(bytes));
        Ok(BlobRef {
            version_id,
            key: key.to_string(),
            size,
            mime: mime.to_string(),
        })
    }

    async fn get(&self, version_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(version_id).map(|b| b.as_ref().clone()))
    }
}

/// Lowercase, keep `[a-z0-9._-]`, collapse everything else into single `-`,
/// trim separators and truncate to `max` characters.
pub fn sanitize_segment(raw: &str, max: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed: String = out
        .trim_matches(|c| c == '-' || c == '.')
        .chars()
        .take(max)
        .collect();
    let trimmed = trimmed.trim_end_matches('-').to_string();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}

/// Object key for a journey upload.
pub fn node_object_key(
    user_id: &str,
    node_slug: &str,
    slot_key: &str,
    filename: &str,
    at: DateTime<Utc>,
) -> String {
    format!(
        "nodes/{}/{}/{}/{}-{}-{}",
        sanitize_segment(user_id, MAX_SEGMENT_LEN),
        sanitize_segment(node_slug, MAX_SEGMENT_LEN),
        sanitize_segment(slot_key, MAX_SEGMENT_LEN),
        at.format("%Y%m%d"),
        uuid::Uuid::new_v4(),
        sanitize_segment(filename, MAX_FILENAME_LEN),
    )
}

/// Object key for a generic document.
pub fn document_object_key(document_id: &str, filename: &str, at: DateTime<Utc>) -> String {
    format!(
        "documents/{}/{}-{}",
        sanitize_segment(document_id, MAX_SEGMENT_LEN),
        at.format("%Y%m%d"),
        sanitize_segment(filename, MAX_FILENAME_LEN),
    )
}
