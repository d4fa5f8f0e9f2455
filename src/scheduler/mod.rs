//! Wall-clock scheduling of recurring copy runs.
//!
//! The schedule keeps a single next-run slot and is advanced by polling:
//! missed slots collapse into one catch-up run instead of firing once per
//! missed interval.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pipeline::{stamped, LogEntry, LogProducer};
use crate::supervisor::JobGate;

pub const MIN_INTERVAL_HOURS: u32 = 1;
pub const MAX_INTERVAL_HOURS: u32 = 24;
/// How often the run loop re-evaluates the schedule.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Current schedule: whether it is armed, its period, the next slot, and
/// when the last successful run finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleState {
    enabled: bool,
    interval_hours: u32,
    next_run_at: Option<DateTime<Local>>,
    last_run_at: Option<DateTime<Local>>,
}

/// What a poll found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    Disabled,
    Waiting(chrono::Duration),
    Due,
}

impl ScheduleState {
    pub fn disabled(interval_hours: u32) -> Self {
        Self {
            enabled: false,
            interval_hours: clamp_hours(interval_hours),
            next_run_at: None,
            last_run_at: None,
        }
    }

    /// Restore a schedule from persisted settings. An overdue slot is
    /// rolled forward rather than auto-executed; a machine that was off
    /// past its slot should not start copying the moment it boots.
    pub fn at_startup(
        enabled: bool,
        interval_hours: u32,
        last_run_at: Option<DateTime<Local>>,
        now: DateTime<Local>,
    ) -> Self {
        let mut state = Self {
            enabled,
            interval_hours: clamp_hours(interval_hours),
            next_run_at: None,
            last_run_at,
        };
        if enabled {
            let from_last = last_run_at.map(|last| last + state.interval());
            state.next_run_at = Some(match from_last {
                Some(next) if next > now => next,
                _ => now + state.interval(),
            });
        }
        state
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval_hours(&self) -> u32 {
        self.interval_hours
    }

    pub fn next_run_at(&self) -> Option<DateTime<Local>> {
        self.next_run_at
    }

    pub fn last_run_at(&self) -> Option<DateTime<Local>> {
        self.last_run_at
    }

    fn interval(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.interval_hours))
    }

    pub fn enable(&mut self, now: DateTime<Local>) {
        self.enabled = true;
        self.next_run_at = Some(now + self.interval());
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.next_run_at = None;
    }

    /// Change the period. Setting the same value again is a no-op, so an
    /// incidental focus traversal over the interval field cannot reset a
    /// running countdown.
    pub fn set_interval(&mut self, hours: u32, now: DateTime<Local>) {
        let hours = clamp_hours(hours);
        if hours == self.interval_hours {
            return;
        }
        self.interval_hours = hours;
        if self.enabled {
            self.next_run_at = Some(now + self.interval());
        }
    }

    pub fn mark_ran(&mut self, at: DateTime<Local>) {
        self.last_run_at = Some(at);
    }

    /// Check the clock against the next slot. On `Due`, the slot is
    /// advanced past `now` in whole intervals.
    pub fn poll(&mut self, now: DateTime<Local>) -> PollDecision {
        let Some(next) = self.next_run_at else {
            return PollDecision::Disabled;
        };
        if now < next {
            return PollDecision::Waiting(next - now);
        }
        let mut slot = next;
        while slot <= now {
            slot += self.interval();
        }
        self.next_run_at = Some(slot);
        PollDecision::Due
    }
}

fn clamp_hours(hours: u32) -> u32 {
    hours.clamp(MIN_INTERVAL_HOURS, MAX_INTERVAL_HOURS)
}

/// How a triggered run ended, from the scheduler's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Completed,
    Killed,
    Failed,
}

/// Drive the schedule until cancelled, firing `trigger` on due slots.
/// A due slot is skipped (not deferred) when a job already holds the gate
/// or when the copy paths are unset. A killed run does not update the
/// last-run stamp.
pub async fn run_loop<F, Fut, P>(
    mut state: ScheduleState,
    gate: JobGate,
    producer: LogProducer,
    poll_every: Duration,
    paths_set: P,
    mut trigger: F,
    shutdown: CancellationToken,
) -> ScheduleState
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TriggerOutcome>,
    P: Fn() -> bool,
{
    let mut ticker = tokio::time::interval(poll_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return state,
            _ = ticker.tick() => {}
        }

        match state.poll(Local::now()) {
            PollDecision::Disabled => {}
            PollDecision::Waiting(remaining) => {
                debug!(remaining_secs = remaining.num_seconds(), "schedule waiting");
            }
            PollDecision::Due => {
                if gate.is_busy() {
                    producer.progress(LogEntry::new(stamped(
                        "scheduled run skipped (a job is already running)",
                    )));
                    continue;
                }
                if !paths_set() {
                    producer.progress(LogEntry::new(stamped(
                        "scheduled run skipped (source/destination unset)",
                    )));
                    continue;
                }
                match trigger().await {
                    TriggerOutcome::Completed => state.mark_ran(Local::now()),
                    TriggerOutcome::Killed => {
                        debug!("scheduled run was stopped; keeping previous last-run stamp");
                    }
                    TriggerOutcome::Failed => {
                        warn!("scheduled run failed to start");
                        producer.progress(LogEntry::new(stamped("scheduled run failed")));
                    }
                }
            }
        }
    }
}
