//! Feedback-timing policy
//!
//! Pure functions of clock and LSN state deciding whether a standby status
//! update is due and how long the event loop may block before re-checking.
//! The event loop asks; it never makes a timing decision itself.

use crate::wire::Lsn;

const MIN_WAIT_MS: u64 = 300;
const MAX_WAIT_MS: u64 = 60_000;

/// Snapshot of the timing-relevant session state, passed to both policy
/// functions so they stay pure and independently testable.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackState {
    pub feedback_requested: bool,
    pub next_feedback_lsn: Lsn,
    pub last_sent_feedback_lsn: Lsn,
    /// Server-epoch microseconds at the last feedback send.
    pub last_feedback_sent_at: i64,
}

/// Session-wide timing configuration, both in milliseconds; either may be 0.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackConfig {
    pub feedback_interval_ms: u64,
    pub standby_message_interval_ms: u64,
}

/// True iff a standby status update must be sent now.
pub fn feedback_needed(now: i64, state: &FeedbackState, cfg: &FeedbackConfig) -> bool {
    if !state.next_feedback_lsn.is_valid() {
        return false;
    }

    if state.feedback_requested {
        return true;
    }

    let elapsed_us = now.saturating_sub(state.last_feedback_sent_at);

    if state.next_feedback_lsn != state.last_sent_feedback_lsn
        && elapsed_us >= cfg.feedback_interval_ms as i64 * 1_000
    {
        return true;
    }

    if cfg.standby_message_interval_ms != 0
        && elapsed_us >= cfg.standby_message_interval_ms as i64 * 1_000
    {
        return true;
    }

    false
}

/// Milliseconds the event loop may wait before it must re-evaluate
/// [`feedback_needed`], clamped to `[300, 60_000]`.
pub fn wait_timeout_ms(now: i64, state: &FeedbackState, cfg: &FeedbackConfig) -> u64 {
    let elapsed_ms = now.saturating_sub(state.last_feedback_sent_at) / 1_000;

    let mut remaining = MAX_WAIT_MS as i64;

    if cfg.feedback_interval_ms != 0 {
        remaining = remaining.min(cfg.feedback_interval_ms as i64 - elapsed_ms);
    }
    if cfg.standby_message_interval_ms != 0 {
        remaining = remaining.min(cfg.standby_message_interval_ms as i64 - elapsed_ms);
    }

    remaining.clamp(MIN_WAIT_MS as i64, MAX_WAIT_MS as i64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(
        feedback_requested: bool,
        next: u64,
        last_sent: u64,
        last_sent_at: i64,
    ) -> FeedbackState {
        FeedbackState {
            feedback_requested,
            next_feedback_lsn: Lsn(next),
            last_sent_feedback_lsn: Lsn(last_sent),
            last_feedback_sent_at: last_sent_at,
        }
    }

    #[test]
    fn no_feedback_when_next_lsn_unset() {
        let st = state(true, 0, 0, 0);
        let cfg = FeedbackConfig {
            feedback_interval_ms: 0,
            standby_message_interval_ms: 0,
        };
        assert!(!feedback_needed(1_000_000, &st, &cfg));
    }

    #[test]
    fn feedback_requested_flag_forces_send() {
        let st = state(true, 100, 100, 0);
        let cfg = FeedbackConfig {
            feedback_interval_ms: 0,
            standby_message_interval_ms: 0,
        };
        assert!(feedback_needed(0, &st, &cfg));
    }

    #[test]
    fn standby_message_interval_zero_disables_periodic_send() {
        let st = state(false, 100, 100, 0);
        let cfg = FeedbackConfig {
            feedback_interval_ms: 0,
            standby_message_interval_ms: 0,
        };
        // lsn unchanged, no request, interval disabled: no send, regardless of elapsed time.
        assert!(!feedback_needed(10_000_000_000, &st, &cfg));
    }

    #[test]
    fn standby_message_interval_fires_after_elapsed_time() {
        let st = state(false, 100, 100, 0);
        let cfg = FeedbackConfig {
            feedback_interval_ms: 0,
            standby_message_interval_ms: 5_000,
        };
        assert!(!feedback_needed(4_999_000, &st, &cfg));
        assert!(feedback_needed(5_000_000, &st, &cfg));
    }

    #[test]
    fn lsn_change_fires_after_feedback_interval() {
        let st = state(false, 200, 100, 0);
        let cfg = FeedbackConfig {
            feedback_interval_ms: 1_000,
            standby_message_interval_ms: 0,
        };
        assert!(!feedback_needed(999_000, &st, &cfg));
        assert!(feedback_needed(1_000_000, &st, &cfg));
    }

    #[test]
    fn wait_timeout_clamps_to_minimum() {
        let st = state(false, 100, 100, 0);
        let cfg = FeedbackConfig {
            feedback_interval_ms: 0,
            standby_message_interval_ms: 100,
        };
        assert_eq!(wait_timeout_ms(0, &st, &cfg), MIN_WAIT_MS);
    }

    #[test]
    fn wait_timeout_clamps_to_maximum_when_both_intervals_disabled() {
        let st = state(false, 100, 100, 0);
        let cfg = FeedbackConfig {
            feedback_interval_ms: 0,
            standby_message_interval_ms: 0,
        };
        assert_eq!(wait_timeout_ms(0, &st, &cfg), MAX_WAIT_MS);
    }

    #[test]
    fn wait_timeout_tracks_nearest_interval() {
        let st = state(false, 100, 100, 0);
        let cfg = FeedbackConfig {
            feedback_interval_ms: 10_000,
            standby_message_interval_ms: 2_000,
        };
        assert_eq!(wait_timeout_ms(0, &st, &cfg), 2_000);
    }

    #[test]
    fn reply_requested_but_lsn_unset_is_not_sendable() {
        // keepalive requested reply but next_feedback_lsn is still 0: armed, not sent.
        let st = state(true, 0, 0, 0);
        let cfg = FeedbackConfig {
            feedback_interval_ms: 0,
            standby_message_interval_ms: 0,
        };
        assert!(!feedback_needed(0, &st, &cfg));
    }
}
