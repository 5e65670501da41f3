//! Admission control for agent launches.
//!
//! One governor instance serializes three admission concerns: the adaptive
//! parallelism cap, the scheduler-wide launch hold raised by rate-limit
//! signals, and the sliding-window launch budget. All state lives behind a
//! single lock; time is `tokio::time::Instant` so tests can pause it.

use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Duration, Instant};

/// Fallback poll interval while waiting for a slot.
const CAPACITY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub(crate) struct GovernorConfig {
    pub configured_max: usize,
    pub adaptive: bool,
    pub parallel_floor: usize,
    pub cooldown: Duration,
    pub launch_budget: u32,
    pub launch_window: Duration,
}

#[derive(Debug)]
struct GovernorState {
    effective_max: usize,
    running: usize,
    launch_hold_until: Option<Instant>,
    launch_window: VecDeque<Instant>,
    last_signal_at: Option<Instant>,
    last_recovery_at: Option<Instant>,
}

/// Why an admission attempt has to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitReason {
    /// All effective slots are occupied.
    Capacity,
    /// A scheduler-wide launch hold is active.
    LaunchHold { hold_ms: u64 },
    /// The launch budget for the current window is spent.
    LaunchBudget { hold_ms: u64, used: u32 },
}

/// Outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Admitted {
        /// New effective max when cooldown recovery fired on this call.
        recovered: Option<usize>,
        budget_used: u32,
    },
    Wait {
        duration: Duration,
        reason: WaitReason,
        recovered: Option<usize>,
    },
}

pub(crate) struct ParallelGovernor {
    config: GovernorConfig,
    state: Mutex<GovernorState>,
    notify: Notify,
}

impl ParallelGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let state = GovernorState {
            effective_max: config.configured_max,
            running: 0,
            launch_hold_until: None,
            launch_window: VecDeque::new(),
            last_signal_at: None,
            last_recovery_at: None,
        };
        Self {
            config,
            state: Mutex::new(state),
            notify: Notify::new(),
        }
    }

    /// Attempt to claim a launch slot at `now`.
    #[allow(clippy::cast_possible_truncation)]
    pub async fn try_admit(&self, now: Instant) -> Admission {
        let mut state = self.state.lock().await;
        let recovered = self.apply_recovery(&mut state, now);

        if let Some(hold) = state.launch_hold_until {
            if hold > now {
                let duration = hold - now;
                return Admission::Wait {
                    duration,
                    reason: WaitReason::LaunchHold {
                        hold_ms: duration.as_millis() as u64,
                    },
                    recovered,
                };
            }
        }

        if self.config.launch_budget > 0 {
            // Entries exactly at the window boundary still count as in
            // window; only strictly older launches are pruned.
            while let Some(&oldest) = state.launch_window.front() {
                if now.duration_since(oldest) > self.config.launch_window {
                    state.launch_window.pop_front();
                } else {
                    break;
                }
            }

            while state.launch_window.len() >= self.config.launch_budget as usize {
                let Some(&oldest) = state.launch_window.front() else {
                    break;
                };
                let age = now.duration_since(oldest);
                let hold = self.config.launch_window.saturating_sub(age);
                if hold.is_zero() {
                    state.launch_window.pop_front();
                } else {
                    return Admission::Wait {
                        duration: hold,
                        reason: WaitReason::LaunchBudget {
                            hold_ms: hold.as_millis() as u64,
                            used: state.launch_window.len() as u32,
                        },
                        recovered,
                    };
                }
            }
        }

        if state.running >= state.effective_max {
            let duration = self
                .next_recovery_eta(&state, now)
                .unwrap_or(CAPACITY_POLL);
            return Admission::Wait {
                duration,
                reason: WaitReason::Capacity,
                recovered,
            };
        }

        state.running += 1;
        if self.config.launch_budget > 0 {
            state.launch_window.push_back(now);
        }
        Admission::Admitted {
            recovered,
            budget_used: state.launch_window.len() as u32,
        }
    }

    /// Release a slot claimed by `try_admit`.
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        state.running = state.running.saturating_sub(1);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Wake admission waiters (used on stop).
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    /// Wait for a release notification, bounded by `max_wait`.
    pub async fn wait_for_slot(&self, max_wait: Duration) {
        tokio::select! {
            () = self.notify.notified() => {}
            () = tokio::time::sleep(max_wait) => {}
        }
    }

    /// Record a rate-limit signal: extend the launch hold and, when
    /// adaptive parallelism is on, halve the effective cap down to the
    /// floor. Returns the new effective max when a throttle happened.
    pub async fn on_rate_limit_signal(
        &self,
        proposed_hold: Duration,
        now: Instant,
    ) -> Option<usize> {
        let mut state = self.state.lock().await;
        let candidate = now + proposed_hold;
        state.launch_hold_until = Some(match state.launch_hold_until {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        });
        state.last_signal_at = Some(now);

        if !self.config.adaptive {
            return None;
        }
        let throttled = (state.effective_max / 2).max(self.config.parallel_floor);
        if throttled < state.effective_max {
            state.effective_max = throttled;
            Some(throttled)
        } else {
            None
        }
    }

    /// Current effective cap, applying cooldown recovery first. Returns the
    /// cap and the post-recovery value when a recovery fired.
    pub async fn effective_max(&self, now: Instant) -> (usize, Option<usize>) {
        let mut state = self.state.lock().await;
        let recovered = self.apply_recovery(&mut state, now);
        (state.effective_max, recovered)
    }

    /// Recover one unit of parallelism per elapsed cooldown window after
    /// the last rate-limit signal.
    fn apply_recovery(&self, state: &mut GovernorState, now: Instant) -> Option<usize> {
        if state.effective_max >= self.config.configured_max {
            return None;
        }
        let last_signal = state.last_signal_at?;
        if now.duration_since(last_signal) <= self.config.cooldown {
            return None;
        }
        let reference = state
            .last_recovery_at
            .map_or(last_signal, |recovery| recovery.max(last_signal));
        if now.duration_since(reference) > self.config.cooldown {
            state.effective_max += 1;
            state.last_recovery_at = Some(now);
            return Some(state.effective_max);
        }
        None
    }

    /// Time until the next recovery could fire, used to bound capacity
    /// waits.
    fn next_recovery_eta(&self, state: &GovernorState, now: Instant) -> Option<Duration> {
        if state.effective_max >= self.config.configured_max {
            return None;
        }
        let last_signal = state.last_signal_at?;
        let reference = state
            .last_recovery_at
            .map_or(last_signal, |recovery| recovery.max(last_signal));
        let eta = (reference + self.config.cooldown + Duration::from_millis(1))
            .saturating_duration_since(now);
        Some(eta.max(Duration::from_millis(1)))
    }
}
