//! Execution scheduler - determines which jobs can run next

use crate::core::{graph::JobGraph, state::JobState};
use std::collections::HashMap;
use tokio::sync::Semaphore;

/// Strategy for scheduling job instance execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// One instance at a time
    Sequential,

    /// Every ready instance at once
    Parallel,

    /// Limited parallelism (max N concurrent instances)
    LimitedParallel(usize),
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::Parallel
    }
}

impl SchedulingStrategy {
    /// Strategy for a configured worker pool size
    pub fn from_pool_size(pool_size: Option<usize>) -> Self {
        match pool_size {
            None => SchedulingStrategy::Parallel,
            Some(0) | Some(1) => SchedulingStrategy::Sequential,
            Some(n) => SchedulingStrategy::LimitedParallel(n),
        }
    }

    /// Number of worker permits
    pub fn permits(&self) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => Semaphore::MAX_PERMITS,
            SchedulingStrategy::LimitedParallel(n) => (*n).max(1),
        }
    }
}

/// Scheduler for determining which jobs to dispatch
#[derive(Debug, Clone, Default)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Pending jobs whose upstream jobs have all reached a terminal state,
    /// in the given (topological) order
    pub fn ready_jobs(
        &self,
        graph: &JobGraph,
        order: &[String],
        states: &HashMap<String, JobState>,
    ) -> Vec<String> {
        order
            .iter()
            .filter(|id| matches!(states.get(id.as_str()), Some(JobState::Pending)))
            .filter(|id| {
                graph.job(id).is_some_and(|job| {
                    job.needs
                        .iter()
                        .all(|need| states.get(need).is_some_and(JobState::is_terminal))
                })
            })
            .cloned()
            .collect()
    }

    /// State a ready job must take instead of running, if a required
    /// upstream did not succeed.
    ///
    /// Advisory upstreams never block. A failed (or dependency-skipped)
    /// upstream wins over a cancelled one, which wins over a gate-skipped one.
    pub fn blocked_state(
        &self,
        graph: &JobGraph,
        job_id: &str,
        states: &HashMap<String, JobState>,
    ) -> Option<JobState> {
        let job = graph.job(job_id)?;

        let blocking: Vec<(&String, &JobState)> = job
            .needs
            .iter()
            .filter(|need| graph.job(need).is_some_and(|upstream| !upstream.advisory))
            .filter_map(|need| states.get(need).map(|state| (need, state)))
            .filter(|(_, state)| !state.is_success())
            .collect();

        if let Some((upstream, _)) = blocking.iter().find(|(_, state)| {
            matches!(state, JobState::Failed { .. } | JobState::SkippedDependency { .. })
        }) {
            return Some(JobState::SkippedDependency {
                upstream: (*upstream).clone(),
            });
        }

        if let Some((upstream, _)) = blocking
            .iter()
            .find(|(_, state)| matches!(state, JobState::Cancelled { .. }))
        {
            return Some(JobState::Cancelled {
                reason: format!("upstream job '{}' was cancelled", upstream),
            });
        }

        blocking.iter().find_map(|(upstream, state)| match state {
            JobState::SkippedGate { reason } => Some(JobState::SkippedGate {
                reason: format!("upstream job '{}' was gated: {}", upstream, reason),
            }),
            _ => None,
        })
    }
}
