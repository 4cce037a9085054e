// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Simulated annealing search.

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::SolverConfig;
use crate::cost::{Evaluator, Placement};
use crate::error::Result;
use crate::model::{Assignment, Energy, Problem, Solution, Termination};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Move,
    Swap,
    Shift,
}

/// Timetabling solver bound to one configuration.
#[derive(Debug, Clone)]
pub struct Solver {
    config: SolverConfig,
}

impl Solver {
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Run the search to completion.
    pub fn solve(&self, problem: &Problem) -> Result<Solution> {
        self.solve_with_cancel(problem, &CancellationToken::new())
    }

    /// Run the search, returning the best schedule so far once `cancel` fires.
    #[instrument(skip_all, fields(sessions = problem.sessions.len(), rooms = problem.rooms.len()))]
    pub fn solve_with_cancel(
        &self,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<Solution> {
        let evaluator = Evaluator::new(problem, &self.config)?;
        let seed = self.config.seed.unwrap_or_else(time_seed);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut current = initial_placements(&evaluator, &mut rng);
        let mut current_energy = evaluator.energy(&current);

        if problem.sessions.is_empty() {
            return Ok(solution(&evaluator, &current, current_energy, 0, Termination::Empty, seed));
        }

        let movable: Vec<usize> = evaluator
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.fixed_room_id.is_none())
            .map(|(i, _)| i)
            .collect();
        let shiftable: Vec<usize> = evaluator
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.window.is_some())
            .map(|(i, _)| i)
            .collect();
        let mut mutations = vec![Mutation::Move, Mutation::Swap];
        if self.config.enable_shift && !shiftable.is_empty() {
            mutations.push(Mutation::Shift);
        }

        info!(seed, energy = current_energy.total, "Annealing started");

        let mut best = current.clone();
        let mut best_energy = current_energy;
        let mut temperature = self.config.initial_temperature;
        let mut iterations = 0;
        let termination = loop {
            if cancel.is_cancelled() {
                break Termination::Cancelled;
            }
            if iterations >= self.config.max_iterations {
                break Termination::IterationLimit;
            }
            if temperature < self.config.min_temperature {
                break Termination::Cooled;
            }
            iterations += 1;

            let mutation = mutations[rng.gen_range(0..mutations.len())];
            let neighbor = match mutation {
                Mutation::Move => move_room(&evaluator, &current, &movable, &mut rng),
                Mutation::Swap => swap_rooms(&current, &movable, &mut rng),
                Mutation::Shift => self.shift_start(&evaluator, &current, &shiftable, &mut rng),
            };

            if let Some(neighbor) = neighbor {
                let neighbor_energy = evaluator.energy(&neighbor);
                let delta = neighbor_energy.total - current_energy.total;
                if delta < 0.0 || rng.gen_range(0.0..1.0) < (-delta / temperature).exp() {
                    current = neighbor;
                    current_energy = neighbor_energy;
                    if current_energy.total < best_energy.total {
                        best = current.clone();
                        best_energy = current_energy;
                        debug!(iterations, energy = best_energy.total, "New best schedule");
                    }
                }
            }

            temperature *= self.config.cooling_rate;
        };

        info!(
            iterations,
            %termination,
            energy = best_energy.total,
            hard_violations = best_energy.hard_violations,
            "Annealing finished"
        );

        Ok(solution(&evaluator, &best, best_energy, iterations, termination, seed))
    }

    fn shift_start(
        &self,
        evaluator: &Evaluator<'_>,
        current: &[Placement],
        shiftable: &[usize],
        rng: &mut StdRng,
    ) -> Option<Vec<Placement>> {
        let i = shiftable[rng.gen_range(0..shiftable.len())];
        let window = evaluator.sessions[i].window?;
        let step = Duration::minutes(self.config.shift_step_mins);
        let start = if rng.gen_bool(0.5) {
            current[i].start + step
        } else {
            current[i].start - step
        };
        let end = start + evaluator.sessions[i].duration();
        if start < window.earliest_start || end > window.latest_end {
            return None;
        }
        let mut next = current.to_vec();
        next[i].start = start;
        Some(next)
    }
}

/// Solve with `config`, without cancellation.
pub fn solve(problem: &Problem, config: SolverConfig) -> Result<Solution> {
    Solver::new(config)?.solve(problem)
}

/// Run the search on the blocking pool.
///
/// Must be called from within a Tokio runtime.
pub fn solve_in_background(
    problem: Problem,
    config: SolverConfig,
    cancel: CancellationToken,
) -> JoinHandle<Result<Solution>> {
    tokio::task::spawn_blocking(move || Solver::new(config)?.solve_with_cancel(&problem, &cancel))
}

/// First room with enough seats, else a random one. Pinned sessions take
/// their fixed room.
fn initial_placements(evaluator: &Evaluator<'_>, rng: &mut StdRng) -> Vec<Placement> {
    let rooms = evaluator.rooms;
    evaluator
        .sessions
        .iter()
        .map(|session| {
            let room = if rooms.is_empty() {
                None
            } else if let Some(fixed) = &session.fixed_room_id {
                rooms.iter().position(|r| &r.id == fixed)
            } else {
                rooms
                    .iter()
                    .position(|r| r.capacity >= session.max_students)
                    .or_else(|| Some(rng.gen_range(0..rooms.len())))
            };
            Placement {
                room,
                start: session.original_time,
            }
        })
        .collect()
}

fn move_room(
    evaluator: &Evaluator<'_>,
    current: &[Placement],
    movable: &[usize],
    rng: &mut StdRng,
) -> Option<Vec<Placement>> {
    if movable.is_empty() || evaluator.rooms.is_empty() {
        return None;
    }
    let i = movable[rng.gen_range(0..movable.len())];
    let room = rng.gen_range(0..evaluator.rooms.len());
    let mut next = current.to_vec();
    next[i].room = Some(room);
    Some(next)
}

fn swap_rooms(current: &[Placement], movable: &[usize], rng: &mut StdRng) -> Option<Vec<Placement>> {
    if movable.len() < 2 {
        return None;
    }
    let a = movable[rng.gen_range(0..movable.len())];
    let b = movable[rng.gen_range(0..movable.len())];
    if a == b {
        return None;
    }
    let mut next = current.to_vec();
    let room = next[a].room;
    next[a].room = next[b].room;
    next[b].room = room;
    Some(next)
}

fn solution(
    evaluator: &Evaluator<'_>,
    placements: &[Placement],
    energy: Energy,
    iterations: u64,
    termination: Termination,
    seed: u64,
) -> Solution {
    let mut assignments: Vec<Assignment> = placements
        .iter()
        .enumerate()
        .map(|(i, placement)| Assignment {
            session_id: evaluator.sessions[i].id.clone(),
            room_id: placement.room.map(|r| evaluator.rooms[r].id.clone()),
            start_time: placement.start,
            end_time: evaluator.end(i, placement),
        })
        .collect();
    assignments.sort_by(|a, b| a.session_id.cmp(&b.session_id));

    Solution {
        assignments,
        energy,
        is_feasible: energy.is_feasible(),
        iterations,
        termination,
        seed,
    }
}

fn time_seed() -> u64 {
    Utc::now()
        .timestamp_nanos_opt()
        .map_or(0, |nanos| nanos as u64)
}
