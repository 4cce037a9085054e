// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Annealing parameters, weights and constraint severities.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};

/// How a constraint contributes to energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Each violation counts towards `hard_violations`.
    Hard,
    /// Each violation adds the constraint's soft weight.
    Soft,
    Off,
}

/// Severity of every constraint the cost function knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub room_overlap: Severity,
    pub instructor_overlap: Severity,
    pub cohort_overlap: Severity,
    pub capacity: Severity,
    pub department: Severity,
    pub instructor_availability: Severity,
    pub room_attributes: Severity,
    pub utilization: Severity,
    pub locality: Severity,
    /// Dependent sessions start after their prerequisite ends.
    pub sequence: Severity,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            room_overlap: Severity::Hard,
            instructor_overlap: Severity::Hard,
            cohort_overlap: Severity::Hard,
            capacity: Severity::Hard,
            department: Severity::Hard,
            instructor_availability: Severity::Soft,
            room_attributes: Severity::Soft,
            utilization: Severity::Soft,
            locality: Severity::Soft,
            sequence: Severity::Off,
        }
    }
}

/// Energy weights.
///
/// `hard` multiplies the hard violation count; the others apply when the
/// matching constraint is [`Severity::Soft`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub hard: f64,
    /// Room, instructor and cohort overlaps.
    pub overlap: f64,
    pub capacity: f64,
    pub department: f64,
    /// Per overlap with an unavailable window.
    pub instructor: f64,
    /// Multiplies the square root of wasted seats. A missing room attribute
    /// costs five times this.
    pub utilization: f64,
    /// Per building change between back-to-back sessions.
    pub locality: f64,
    pub sequence: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            hard: 1_000_000.0,
            overlap: 100.0,
            capacity: 50.0,
            department: 20.0,
            instructor: 10.0,
            utilization: 1.0,
            locality: 2.0,
            sequence: 20.0,
        }
    }
}

/// Solver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: u64,
    pub initial_temperature: f64,
    pub cooling_rate: f64,
    /// Search stops once the temperature drops below this.
    pub min_temperature: f64,
    /// Fixed seed for reproducible runs. Time-derived when unset.
    pub seed: Option<u64>,
    /// Enables the shift move for sessions with a window.
    pub enable_shift: bool,
    pub shift_step_mins: i64,
    /// Largest gap between two sessions still treated as back-to-back.
    pub back_to_back_gap_mins: i64,
    /// Offset of the wall clock unavailability windows are written in.
    pub utc_offset_minutes: i32,
    pub weights: Weights,
    pub constraints: Constraints,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            initial_temperature: 1_000.0,
            cooling_rate: 0.995,
            min_temperature: 0.001,
            seed: None,
            enable_shift: false,
            shift_step_mins: 15,
            back_to_back_gap_mins: 30,
            utc_offset_minutes: 0,
            weights: Weights::default(),
            constraints: Constraints::default(),
        }
    }
}

impl SolverConfig {
    /// Builder: fix the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_temperature.is_finite() && self.initial_temperature > 0.0) {
            return Err(SolverError::InvalidConfig(
                "initial_temperature must be positive".to_string(),
            ));
        }
        if !(self.cooling_rate > 0.0 && self.cooling_rate < 1.0) {
            return Err(SolverError::InvalidConfig(
                "cooling_rate must be between 0 and 1".to_string(),
            ));
        }
        if !(self.min_temperature.is_finite() && self.min_temperature > 0.0) {
            return Err(SolverError::InvalidConfig(
                "min_temperature must be positive".to_string(),
            ));
        }
        if self.enable_shift && self.shift_step_mins <= 0 {
            return Err(SolverError::InvalidConfig(
                "shift_step_mins must be positive".to_string(),
            ));
        }
        if self.back_to_back_gap_mins < 0 {
            return Err(SolverError::InvalidConfig(
                "back_to_back_gap_mins must not be negative".to_string(),
            ));
        }
        let w = &self.weights;
        for (name, value) in [
            ("hard", w.hard),
            ("overlap", w.overlap),
            ("capacity", w.capacity),
            ("department", w.department),
            ("instructor", w.instructor),
            ("utilization", w.utilization),
            ("locality", w.locality),
            ("sequence", w.sequence),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SolverError::InvalidConfig(format!(
                    "weight {name} must be a non-negative number"
                )));
            }
        }
        self.utc_offset()?;
        Ok(())
    }

    pub(crate) fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).ok_or_else(|| {
            SolverError::InvalidConfig(format!(
                "utc_offset_minutes {} is out of range",
                self.utc_offset_minutes
            ))
        })
    }
}
