// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Problem instance and solution types.

use std::fmt;

use chrono::{DateTime, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::SolverError;

/// Kind of class meeting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionKind {
    #[default]
    Lecture,
    Lab,
    Seminar,
    Exam,
}

/// Earliest start and latest end a session may be shifted within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest_start: DateTime<Utc>,
    pub latest_end: DateTime<Utc>,
}

/// Room attribute a session needs, e.g. `projector = yes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub key: String,
    pub value: String,
}

/// One class meeting to place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub kind: SessionKind,
    pub duration_mins: i64,
    pub max_students: u32,
    #[serde(default)]
    pub instructor_id: Option<String>,
    #[serde(default)]
    pub department_id: Option<String>,
    /// Pins the session to one room.
    #[serde(default)]
    pub fixed_room_id: Option<String>,
    /// Start time the session was planned for.
    pub original_time: DateTime<Utc>,
    #[serde(default)]
    pub window: Option<TimeWindow>,
    #[serde(default)]
    pub cohorts: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

impl Session {
    /// Session with only the required fields set.
    pub fn new(
        id: impl Into<String>,
        duration_mins: i64,
        max_students: u32,
        original_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: SessionKind::default(),
            duration_mins,
            max_students,
            instructor_id: None,
            department_id: None,
            fixed_room_id: None,
            original_time,
            window: None,
            cohorts: Vec::new(),
            requirements: Vec::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_mins)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub capacity: u32,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub building: Option<String>,
}

impl Room {
    pub fn new(id: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            capacity,
            department_id: None,
            building: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAttribute {
    pub room_id: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Weekly window an instructor cannot teach, in local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unavailability {
    pub instructor_id: String,
    pub day: Weekday,
    pub starts: NaiveTime,
    pub ends: NaiveTime,
}

/// `after` must start once `before` has ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub before: String,
    pub after: String,
}

/// In-memory snapshot handed to the solver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Problem {
    pub sessions: Vec<Session>,
    pub rooms: Vec<Room>,
    pub room_attributes: Vec<RoomAttribute>,
    pub instructors: Vec<Instructor>,
    pub unavailability: Vec<Unavailability>,
    pub dependencies: Vec<Dependency>,
}

/// Where and when one session takes place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub session_id: String,
    /// `None` when the instance has no rooms.
    pub room_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Cost of a schedule. Lower is better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Energy {
    pub total: f64,
    pub hard_violations: u32,
    pub soft_penalty: f64,
}

impl Energy {
    pub fn is_feasible(&self) -> bool {
        self.hard_violations == 0
    }
}

/// Why the search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Temperature fell below the minimum.
    Cooled,
    IterationLimit,
    Cancelled,
    /// Nothing to schedule.
    Empty,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cooled => "cooled",
            Self::IterationLimit => "iteration_limit",
            Self::Cancelled => "cancelled",
            Self::Empty => "empty",
        })
    }
}

/// Best schedule found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    /// Ordered by session id.
    pub assignments: Vec<Assignment>,
    pub energy: Energy,
    pub is_feasible: bool,
    pub iterations: u64,
    pub termination: Termination,
    /// Seed the search ran with; replaying it reproduces the result.
    pub seed: u64,
}

impl Solution {
    /// Assignment of one session.
    pub fn assignment(&self, session_id: &str) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.session_id == session_id)
    }

    /// Informational error describing a cancelled or infeasible result.
    pub fn diagnostic(&self) -> Option<SolverError> {
        if self.termination == Termination::Cancelled {
            Some(SolverError::Cancelled {
                iterations: self.iterations,
            })
        } else if !self.is_feasible {
            Some(SolverError::Infeasible {
                hard_violations: self.energy.hard_violations,
            })
        } else {
            None
        }
    }
}
