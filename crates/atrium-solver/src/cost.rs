// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Energy of a candidate schedule.
//!
//! Evaluation recomputes everything from scratch: per-session checks, then
//! every pair of sessions for overlaps, then instructor day sequences and
//! dependencies.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Timelike, Utc};

use crate::config::{Severity, SolverConfig};
use crate::error::{Result, SolverError};
use crate::model::{Energy, Problem, Room, Session};

/// Room and start time of one session, by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub room: Option<usize>,
    pub start: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tally {
    hard: u32,
    soft: f64,
}

impl Tally {
    fn add(&mut self, severity: Severity, weight: f64, violations: u32, magnitude: f64) {
        if violations == 0 {
            return;
        }
        match severity {
            Severity::Hard => self.hard += violations,
            Severity::Soft => self.soft += weight * magnitude,
            Severity::Off => {}
        }
    }
}

struct Window {
    day: chrono::Weekday,
    starts: u32,
    ends: u32,
}

/// Indexed view of a [`Problem`] that scores placements.
pub(crate) struct Evaluator<'a> {
    pub sessions: &'a [Session],
    pub rooms: &'a [Room],
    config: &'a SolverConfig,
    offset: FixedOffset,
    durations: Vec<Duration>,
    /// Attributes per room index.
    attributes: Vec<HashMap<&'a str, &'a str>>,
    /// Unavailable windows per session index, via its instructor.
    unavailable: Vec<Vec<Window>>,
    /// (before, after) session indexes.
    dependencies: Vec<(usize, usize)>,
}

impl<'a> Evaluator<'a> {
    /// Index the problem, rejecting inconsistent instances.
    pub fn new(problem: &'a Problem, config: &'a SolverConfig) -> Result<Self> {
        let offset = config.utc_offset()?;

        let mut session_index = HashMap::new();
        for (i, session) in problem.sessions.iter().enumerate() {
            if session.duration_mins <= 0 {
                return Err(SolverError::InvalidInstance(format!(
                    "session {} has non-positive duration",
                    session.id
                )));
            }
            if session_index.insert(session.id.as_str(), i).is_some() {
                return Err(SolverError::InvalidInstance(format!(
                    "duplicate session id {}",
                    session.id
                )));
            }
            if let Some(window) = &session.window
                && window.latest_end - window.earliest_start < session.duration()
            {
                return Err(SolverError::InvalidInstance(format!(
                    "window of session {} is shorter than its duration",
                    session.id
                )));
            }
        }

        let mut room_index = HashMap::new();
        for (i, room) in problem.rooms.iter().enumerate() {
            if room_index.insert(room.id.as_str(), i).is_some() {
                return Err(SolverError::InvalidInstance(format!(
                    "duplicate room id {}",
                    room.id
                )));
            }
        }
        for session in &problem.sessions {
            if let Some(fixed) = &session.fixed_room_id
                && !room_index.contains_key(fixed.as_str())
            {
                return Err(SolverError::InvalidInstance(format!(
                    "session {} is fixed to unknown room {fixed}",
                    session.id
                )));
            }
        }

        let mut attributes = vec![HashMap::new(); problem.rooms.len()];
        for attribute in &problem.room_attributes {
            let Some(&room) = room_index.get(attribute.room_id.as_str()) else {
                return Err(SolverError::InvalidInstance(format!(
                    "attribute {} refers to unknown room {}",
                    attribute.key, attribute.room_id
                )));
            };
            attributes[room].insert(attribute.key.as_str(), attribute.value.as_str());
        }

        let unavailable = problem
            .sessions
            .iter()
            .map(|session| {
                problem
                    .unavailability
                    .iter()
                    .filter(|u| session.instructor_id.as_deref() == Some(u.instructor_id.as_str()))
                    .map(|u| Window {
                        day: u.day,
                        starts: minute_of_day(u.starts),
                        ends: minute_of_day(u.ends),
                    })
                    .collect()
            })
            .collect();

        let mut dependencies = Vec::with_capacity(problem.dependencies.len());
        for dependency in &problem.dependencies {
            let lookup = |id: &str| {
                session_index.get(id).copied().ok_or_else(|| {
                    SolverError::InvalidInstance(format!("dependency on unknown session {id}"))
                })
            };
            dependencies.push((lookup(&dependency.before)?, lookup(&dependency.after)?));
        }

        Ok(Self {
            sessions: &problem.sessions,
            rooms: &problem.rooms,
            config,
            offset,
            durations: problem.sessions.iter().map(Session::duration).collect(),
            attributes,
            unavailable,
            dependencies,
        })
    }

    pub fn end(&self, index: usize, placement: &Placement) -> DateTime<Utc> {
        placement.start + self.durations[index]
    }

    /// Energy of a full placement vector, one entry per session.
    pub fn energy(&self, placements: &[Placement]) -> Energy {
        let constraints = &self.config.constraints;
        let weights = &self.config.weights;
        let mut tally = Tally::default();

        for (i, placement) in placements.iter().enumerate() {
            let session = &self.sessions[i];
            let Some(r) = placement.room else {
                tally.hard += 1;
                continue;
            };
            let room = &self.rooms[r];

            tally.add(
                constraints.capacity,
                weights.capacity,
                u32::from(room.capacity < session.max_students),
                1.0,
            );
            tally.add(
                constraints.department,
                weights.department,
                u32::from(room.department_id != session.department_id),
                1.0,
            );

            let missing = session
                .requirements
                .iter()
                .filter(|req| self.attributes[r].get(req.key.as_str()) != Some(&req.value.as_str()))
                .count() as u32;
            tally.add(
                constraints.room_attributes,
                5.0 * weights.utilization,
                missing,
                f64::from(missing),
            );

            let waste = room.capacity.saturating_sub(session.max_students);
            tally.add(
                constraints.utilization,
                weights.utilization,
                u32::from(waste > 0),
                f64::from(waste).sqrt(),
            );

            let clashes = self.unavailable_overlaps(i, placement);
            tally.add(
                constraints.instructor_availability,
                weights.instructor,
                clashes,
                f64::from(clashes),
            );
        }

        for i in 0..placements.len() {
            for j in (i + 1)..placements.len() {
                if !self.overlaps(i, &placements[i], j, &placements[j]) {
                    continue;
                }
                let (a, b) = (&self.sessions[i], &self.sessions[j]);
                let same_room = placements[i].room.is_some() && placements[i].room == placements[j].room;
                tally.add(constraints.room_overlap, weights.overlap, u32::from(same_room), 1.0);
                let same_instructor = a.instructor_id.is_some() && a.instructor_id == b.instructor_id;
                tally.add(
                    constraints.instructor_overlap,
                    weights.overlap,
                    u32::from(same_instructor),
                    1.0,
                );
                let shared_cohort = a.cohorts.iter().any(|c| b.cohorts.contains(c));
                tally.add(
                    constraints.cohort_overlap,
                    weights.overlap,
                    u32::from(shared_cohort),
                    1.0,
                );
            }
        }

        let hops = self.building_hops(placements);
        tally.add(constraints.locality, weights.locality, hops, f64::from(hops));

        let broken = self
            .dependencies
            .iter()
            .filter(|&&(before, after)| {
                placements[after].start < self.end(before, &placements[before])
            })
            .count() as u32;
        tally.add(constraints.sequence, weights.sequence, broken, f64::from(broken));

        Energy {
            total: weights.hard * f64::from(tally.hard) + tally.soft,
            hard_violations: tally.hard,
            soft_penalty: tally.soft,
        }
    }

    fn overlaps(&self, i: usize, a: &Placement, j: usize, b: &Placement) -> bool {
        a.start < self.end(j, b) && b.start < self.end(i, a)
    }

    /// Unavailable windows of the instructor the session touches.
    fn unavailable_overlaps(&self, index: usize, placement: &Placement) -> u32 {
        let windows = &self.unavailable[index];
        if windows.is_empty() {
            return 0;
        }
        let start = placement.start.with_timezone(&self.offset);
        let end = self.end(index, placement).with_timezone(&self.offset);
        let from = start.hour() * 60 + start.minute();
        // Sessions running past midnight are clipped to the end of the day.
        let to = if end.date_naive() == start.date_naive() {
            end.hour() * 60 + end.minute()
        } else {
            24 * 60
        };
        windows
            .iter()
            .filter(|w| w.day == start.weekday() && from < w.ends && w.starts < to)
            .count() as u32
    }

    /// Building changes between back-to-back sessions of one instructor.
    fn building_hops(&self, placements: &[Placement]) -> u32 {
        let gap = Duration::minutes(self.config.back_to_back_gap_mins);
        let mut by_instructor: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, session) in self.sessions.iter().enumerate() {
            if let Some(instructor) = &session.instructor_id {
                by_instructor.entry(instructor.as_str()).or_default().push(i);
            }
        }

        let mut hops = 0;
        for mut indexes in by_instructor.into_values() {
            indexes.sort_by_key(|&i| (placements[i].start, i));
            for pair in indexes.windows(2) {
                let (prev, next) = (pair[0], pair[1]);
                let idle = placements[next].start - self.end(prev, &placements[prev]);
                if idle < Duration::zero() || idle > gap {
                    continue;
                }
                let building = |i: usize| {
                    placements[i]
                        .room
                        .and_then(|r| self.rooms[r].building.as_deref())
                };
                if let (Some(a), Some(b)) = (building(prev), building(next))
                    && a != b
                {
                    hops += 1;
                }
            }
        }
        hops
    }
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}
