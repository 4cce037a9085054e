// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Atrium Solver - timetabling by simulated annealing
//!
//! Assigns class sessions to rooms (and, optionally, shifted start times)
//! while minimising an energy made of hard violations and soft penalties.
//! The solver is pure and CPU-bound: it takes a [`Problem`] snapshot and
//! returns the best [`Solution`] it found.
//!
//! # Energy
//!
//! ```text
//! energy = weights.hard * hard_violations + soft_penalty
//! ```
//!
//! Every constraint has a [`Severity`]. `HARD` violations are counted,
//! `SOFT` ones add their weight, `OFF` ones are ignored. A solution is
//! feasible when it has no hard violations.
//!
//! # Example
//!
//! ```
//! use atrium_solver::{Problem, Room, Session, SolverConfig, solve};
//! use chrono::{TimeZone, Utc};
//!
//! let nine = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
//! let problem = Problem {
//!     sessions: vec![Session::new("algebra", 90, 25, nine)],
//!     rooms: vec![Room::new("A-101", 30)],
//!     ..Default::default()
//! };
//! let solution = solve(&problem, SolverConfig::default().with_seed(7)).unwrap();
//! assert!(solution.is_feasible);
//! assert_eq!(solution.assignments[0].room_id.as_deref(), Some("A-101"));
//! ```

pub mod config;
mod cost;
pub mod error;
pub mod model;
mod solver;

pub use config::{Constraints, Severity, SolverConfig, Weights};
pub use error::{Result, SolverError};
pub use model::{
    Assignment, Dependency, Energy, Instructor, Problem, Requirement, Room, RoomAttribute,
    Session, SessionKind, Solution, Termination, TimeWindow, Unavailability,
};
pub use solver::{Solver, solve, solve_in_background};
