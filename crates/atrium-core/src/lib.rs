// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Atrium Core - engines of a multi-tenant academic portal
//!
//! This crate holds the stateful core of the portal: who is acting in which
//! tenant, which curriculum applies, how far each student has progressed and
//! which approvals are outstanding. Transport layers (HTTP, CLI) sit on top
//! and call into the engines with an [`tenancy::ActorContext`].
//!
//! # Architecture
//!
//! ```text
//!  request ──► tenancy::ContextBuilder ──► ActorContext
//!                                              │
//!          ┌───────────────────────────────────┼──────────────────────┐
//!          ▼                                   ▼                      ▼
//! ┌──────────────────┐   reads     ┌──────────────────┐   starts  ┌──────────────────┐
//! │  PlaybookLoader  │◄────────────│  JourneyEngine   │──────────►│  WorkflowEngine  │
//! │ versions, DAG    │             │ nodes, uploads,  │           │ steps, decisions │
//! └────────┬─────────┘             │ forms, reviews   │           │ timeouts         │
//!          │                       └────────┬─────────┘           └────────┬─────────┘
//!          │                                │ BlobStore                    │ TimeoutScheduler
//!          ▼                                ▼                              ▼
//! ┌─────────────────────────────────────────────────────────────────────────────────┐
//! │                     persistence (SqliteStore, one transaction                    │
//! │                     per change set, optimistic lock_version)                    │
//! └─────────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Node state machine
//!
//! ```text
//! locked ──unlock──► todo ──open──► active ──edit──► in_progress
//!                      │               │                  │
//!                      └───────────────┴───submit─────────┴──► submitted
//!                                                                 │
//!                              needs_fixes ◄──request fixes───────┤
//!                                   │                             │ approve
//!                                   └──submit──► submitted        ▼
//!                                                               done ──reopen──► submitted
//! ```
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `ATRIUM_DATABASE_URL` | Yes | - | SQLite connection string |
//! | `ATRIUM_DEFAULT_TENANT` | No | `default` | Tenant slug for `localhost` |
//! | `ATRIUM_TOKEN_SECRET` | No | - | HMAC secret for bearer tokens |
//! | `ATRIUM_TIMEOUT_TICK_SECS` | No | `60` | Workflow timeout scan interval |
//! | `ATRIUM_PLAYBOOK_PATH` | No | - | Curriculum activated at start-up |
//!
//! See [`config::Config::from_env`] for the full list.
//!
//! # Modules
//!
//! - [`tenancy`]: tenant resolution, bearer tokens, roles and permissions
//! - [`playbook`]: curriculum parsing, validation, versioning and activation
//! - [`journey`]: per-student node instances, uploads, forms and reviews
//! - [`workflow`]: template-based approvals, delegation and timeouts
//! - [`blob`]: content-addressed document storage
//! - [`persistence`]: store traits and the SQLite implementation

/// Content-addressed blob storage and object key layout.
pub mod blob;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types with stable error codes.
pub mod error;

/// Student journeys through the active playbook.
pub mod journey;

/// Store traits and the SQLite implementation.
pub mod persistence;

/// Curriculum definitions and their activation.
pub mod playbook;

/// Tenant resolution, identity and access control.
pub mod tenancy;

/// Approval workflows.
pub mod workflow;

pub use error::{Error, ErrorCategory, Result};
