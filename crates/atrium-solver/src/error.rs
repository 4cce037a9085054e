// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Solver errors.
//!
//! Only [`SolverError::InvalidInstance`] and [`SolverError::InvalidConfig`]
//! are returned as `Err`. The other variants describe a returned
//! [`Solution`](crate::Solution) and come from
//! [`Solution::diagnostic`](crate::Solution::diagnostic).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SolverError {
    /// The problem instance is inconsistent.
    #[error("invalid problem instance: {0}")]
    InvalidInstance(String),

    /// Annealing parameters are out of range.
    #[error("invalid solver configuration: {0}")]
    InvalidConfig(String),

    /// The best schedule still breaks hard constraints.
    #[error("no feasible schedule found; best has {hard_violations} hard violations")]
    Infeasible { hard_violations: u32 },

    /// The search was stopped before it finished.
    #[error("search cancelled after {iterations} iterations")]
    Cancelled { iterations: u64 },
}

impl SolverError {
    /// Stable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInstance(_) => "INVALID_INSTANCE",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Infeasible { .. } => "INFEASIBLE",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }
}

pub type Result<T> = std::result::Result<T, SolverError>;
