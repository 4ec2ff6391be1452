//! Render context loss recovery.
//!
//! The host environment can invalidate the graphics surface at any time; the
//! only observable signal is the loss/restoration event pair, never a reason.
//! This module models the recovery protocol as an explicit state machine with
//! a transition table, a bounded retry budget with exponential backoff, and a
//! one-way render-quality ratchet, so the contract is testable without a GPU.

use instant::{Duration, Instant};
use thiserror::Error;

/// Lifecycle of the graphics surface.
///
/// `Lost` can be entered asynchronously at any time; `Abandoned` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceState {
    Created,
    Active,
    Lost,
    Restoring,
    Abandoned,
}

/// What the render loop observed about the surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceEvent {
    Lost,
    RestoreSucceeded,
    RestoreFailed,
}

/// The retry budget ran out; the viewing session cannot recover on its own.
#[derive(Clone, Debug, Error)]
#[error("render context lost and not restored after {attempts} attempts; a full reload is required")]
pub struct ContextLossExhausted {
    pub attempts: u32,
}

const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 8_000;

/// Pure transition table. Events that make no sense in a state leave it
/// unchanged, since the host may deliver duplicates.
fn next_state(state: SurfaceState, event: SurfaceEvent) -> SurfaceState {
    use SurfaceEvent as E;
    use SurfaceState as S;
    match (state, event) {
        (S::Created | S::Active, E::Lost) => S::Lost,
        (S::Lost | S::Restoring, E::RestoreSucceeded) => S::Active,
        (S::Restoring, E::RestoreFailed) => S::Lost,
        (S::Abandoned, _) => S::Abandoned,
        (state, _) => state,
    }
}

/// Tracks surface health and drives the bounded-retry protocol.
pub struct SurfaceRecovery {
    state: SurfaceState,
    retry_count: u32,
    next_attempt: Option<Instant>,
    resolution_scale: f32,
    error: Option<ContextLossExhausted>,
}

impl SurfaceRecovery {
    pub fn new() -> Self {
        Self {
            state: SurfaceState::Created,
            retry_count: 0,
            next_attempt: None,
            resolution_scale: 1.0,
            error: None,
        }
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn is_abandoned(&self) -> bool {
        self.state == SurfaceState::Abandoned
    }

    /// Fatal error once the retry budget is exhausted, `None` before that.
    pub fn error(&self) -> Option<&ContextLossExhausted> {
        self.error.as_ref()
    }

    /// Fraction of the native resolution to render at. Starts at 1.0 and only
    /// ever ratchets down; restoration never raises it back.
    pub fn resolution_scale(&self) -> f32 {
        self.resolution_scale
    }

    /// Delay before restoration attempt number `retry_count + 1`.
    pub fn retry_delay(retry_count: u32) -> Duration {
        let exp = BASE_DELAY_MS.saturating_mul(1_u64 << retry_count.min(31));
        Duration::from_millis(exp.min(MAX_DELAY_MS))
    }

    /// The surface finished its first configuration.
    pub fn on_surface_configured(&mut self) {
        if self.state == SurfaceState::Created {
            self.state = SurfaceState::Active;
        }
    }

    /// Feeds a host event into the machine.
    pub fn handle(&mut self, event: SurfaceEvent, now: Instant) {
        let previous = self.state;
        self.state = next_state(self.state, event);
        match (previous, event) {
            (SurfaceState::Created | SurfaceState::Active, SurfaceEvent::Lost) => {
                let delay = Self::retry_delay(self.retry_count);
                log::warn!(
                    "render context lost; scheduling restoration in {} ms (attempt {}/{})",
                    delay.as_millis(),
                    self.retry_count + 1,
                    MAX_RETRIES
                );
                self.next_attempt = Some(now + delay);
            }
            (_, SurfaceEvent::RestoreSucceeded) => {
                if previous == SurfaceState::Lost || previous == SurfaceState::Restoring {
                    log::info!("render context restored");
                    self.retry_count = 0;
                    self.next_attempt = None;
                    self.error = None;
                }
            }
            (SurfaceState::Restoring, SurfaceEvent::RestoreFailed) => {
                // Quality degrades after any failed restoration and is never
                // restored automatically.
                self.resolution_scale = (self.resolution_scale * 0.5).max(0.25);
                if self.retry_count >= MAX_RETRIES {
                    log::error!(
                        "render context not restored after {} attempts; giving up",
                        self.retry_count
                    );
                    self.state = SurfaceState::Abandoned;
                    self.next_attempt = None;
                    self.error = Some(ContextLossExhausted {
                        attempts: self.retry_count,
                    });
                } else {
                    let delay = Self::retry_delay(self.retry_count);
                    log::warn!(
                        "restoration failed; retrying in {} ms (attempt {}/{})",
                        delay.as_millis(),
                        self.retry_count + 1,
                        MAX_RETRIES
                    );
                    self.next_attempt = Some(now + delay);
                }
            }
            _ => {}
        }
    }

    /// Whether a scheduled restoration attempt is due.
    pub fn retry_due(&self, now: Instant) -> bool {
        self.state == SurfaceState::Lost
            && self.next_attempt.map_or(false, |at| now >= at)
    }

    /// Marks the start of a restoration attempt. Each attempt consumes one
    /// unit of the retry budget.
    pub fn begin_restore(&mut self) {
        if self.state == SurfaceState::Lost {
            self.state = SurfaceState::Restoring;
            self.retry_count += 1;
        }
    }

    /// Milliseconds until the next scheduled attempt, for diagnostics.
    pub fn pending_delay(&self, now: Instant) -> Option<Duration> {
        self.next_attempt
            .map(|at| at.saturating_duration_since(now))
    }
}

impl Default for SurfaceRecovery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lost_recovery() -> (SurfaceRecovery, Instant) {
        let mut recovery = SurfaceRecovery::new();
        recovery.on_surface_configured();
        let now = Instant::now();
        recovery.handle(SurfaceEvent::Lost, now);
        (recovery, now)
    }

    #[test]
    fn transition_table_covers_the_lifecycle() {
        use SurfaceEvent as E;
        use SurfaceState as S;
        assert_eq!(next_state(S::Active, E::Lost), S::Lost);
        assert_eq!(next_state(S::Created, E::Lost), S::Lost);
        assert_eq!(next_state(S::Lost, E::RestoreSucceeded), S::Active);
        assert_eq!(next_state(S::Restoring, E::RestoreSucceeded), S::Active);
        assert_eq!(next_state(S::Restoring, E::RestoreFailed), S::Lost);
        assert_eq!(next_state(S::Abandoned, E::RestoreSucceeded), S::Abandoned);
        // Duplicate events are ignored.
        assert_eq!(next_state(S::Lost, E::Lost), S::Lost);
        assert_eq!(next_state(S::Active, E::RestoreSucceeded), S::Active);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(SurfaceRecovery::retry_delay(0), Duration::from_millis(1_000));
        assert_eq!(SurfaceRecovery::retry_delay(1), Duration::from_millis(2_000));
        assert_eq!(SurfaceRecovery::retry_delay(2), Duration::from_millis(4_000));
        assert_eq!(SurfaceRecovery::retry_delay(3), Duration::from_millis(8_000));
        assert_eq!(SurfaceRecovery::retry_delay(10), Duration::from_millis(8_000));
    }

    #[test]
    fn retry_budget_exhaustion_abandons() {
        let (mut recovery, now) = lost_recovery();
        assert_eq!(recovery.pending_delay(now), Some(Duration::from_millis(1_000)));

        for expected_delay in [2_000_u64, 4_000] {
            recovery.begin_restore();
            recovery.handle(SurfaceEvent::RestoreFailed, now);
            assert_eq!(recovery.state(), SurfaceState::Lost);
            assert_eq!(
                recovery.pending_delay(now),
                Some(Duration::from_millis(expected_delay))
            );
        }

        recovery.begin_restore();
        recovery.handle(SurfaceEvent::RestoreFailed, now);
        assert!(recovery.is_abandoned());
        assert_eq!(recovery.error().unwrap().attempts, 3);
        assert!(!recovery.retry_due(now + Duration::from_secs(60)));

        // Terminal: further events change nothing.
        recovery.handle(SurfaceEvent::RestoreSucceeded, now);
        assert!(recovery.is_abandoned());
    }

    #[test]
    fn restoration_resets_the_budget_and_keeps_quality() {
        let (mut recovery, now) = lost_recovery();
        // Host restores on its own before the scheduled retry fires.
        recovery.handle(SurfaceEvent::RestoreSucceeded, now);
        assert_eq!(recovery.state(), SurfaceState::Active);
        assert_eq!(recovery.resolution_scale(), 1.0);
        assert!(recovery.error().is_none());

        // The next loss starts over at the base delay.
        recovery.handle(SurfaceEvent::Lost, now);
        assert_eq!(recovery.pending_delay(now), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn quality_ratchet_is_one_way() {
        let (mut recovery, now) = lost_recovery();
        recovery.begin_restore();
        recovery.handle(SurfaceEvent::RestoreFailed, now);
        assert_eq!(recovery.resolution_scale(), 0.5);

        recovery.begin_restore();
        recovery.handle(SurfaceEvent::RestoreSucceeded, now);
        assert_eq!(recovery.state(), SurfaceState::Active);
        // Restoration does not undo the degradation.
        assert_eq!(recovery.resolution_scale(), 0.5);
    }

    #[test]
    fn retry_waits_for_the_scheduled_deadline() {
        let (recovery, now) = lost_recovery();
        assert!(!recovery.retry_due(now));
        assert!(!recovery.retry_due(now + Duration::from_millis(999)));
        assert!(recovery.retry_due(now + Duration::from_millis(1_000)));
    }
}
