//! Estimated playback position and its textual rendering.
//!
//! The voice backend only exposes start/stop/pause, so elapsed time is derived from the
//! session's [`PositionAnchor`](super::session::PositionAnchor) instead of the real decode
//! position.

use std::time::Duration;
use tokio::time::Instant;

use super::session::{PlaybackStatus, SessionState};

const BAR_SEGMENTS: usize = 20;
const UNKNOWN_TIME: &str = "??:??";

/// Segundos estimados de reproducción en este momento.
pub fn estimate_position(state: &SessionState) -> u64 {
    estimate_position_at(state, Instant::now())
}

pub fn estimate_position_at(state: &SessionState, now: Instant) -> u64 {
    let anchor = state.anchor();
    match state.status() {
        PlaybackStatus::Idle => 0,
        PlaybackStatus::Paused => anchor.offset_secs,
        PlaybackStatus::Playing => anchor
            .offset_secs
            .saturating_add(now.saturating_duration_since(anchor.at).as_secs()),
    }
}

/// `HH:MM:SS` a partir de una hora, si no `MM:SS`.
pub fn format_time(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

pub fn format_duration(duration: Option<Duration>) -> String {
    duration
        .map(|d| format_time(d.as_secs()))
        .unwrap_or_else(|| UNKNOWN_TIME.to_string())
}

/// Barra de progreso: `` `01:05 ━━━━●───────── 04:30` ``.
pub fn render_progress_bar(position_secs: u64, duration: Option<Duration>) -> String {
    let elapsed = format_time(position_secs);
    let total = format_duration(duration);

    let Some(total_secs) = duration.map(|d| d.as_secs()).filter(|secs| *secs > 0) else {
        return format!("`{} / {}`", elapsed, total);
    };

    let ratio = (position_secs.min(total_secs) as f64) / (total_secs as f64);
    let marker = ((ratio * BAR_SEGMENTS as f64) as usize).min(BAR_SEGMENTS - 1);
    let bar = "━".repeat(marker) + "●" + &"─".repeat(BAR_SEGMENTS - 1 - marker);

    format!("`{} {} {}`", elapsed, bar, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::TrackRef;

    #[test]
    fn formats_minutes_and_hours() {
        assert_eq!(format_time(0), "00:00");
        assert_eq!(format_time(65), "01:05");
        assert_eq!(format_time(3599), "59:59");
        assert_eq!(format_time(3600), "01:00:00");
        assert_eq!(format_time(3725), "01:02:05");
        assert_eq!(format_duration(None), "??:??");
    }

    #[test]
    fn idle_position_is_zero() {
        let state = SessionState::default();
        assert_eq!(estimate_position(&state), 0);
    }

    #[test]
    fn playing_position_adds_elapsed_time() {
        let start = Instant::now();
        let mut state = SessionState::default();
        state.begin_track(TrackRef::remote("a", "u", "o"), 30, true, start);

        assert_eq!(estimate_position_at(&state, start), 30);
        assert_eq!(estimate_position_at(&state, start + Duration::from_millis(12_900)), 42);
    }

    #[test]
    fn playing_position_saturates_at_the_top() {
        let start = Instant::now();
        let mut state = SessionState::default();
        state.begin_track(TrackRef::remote("a", "u", "o"), u64::MAX - 1, true, start);

        assert_eq!(estimate_position_at(&state, start + Duration::from_secs(10)), u64::MAX);
    }

    #[test]
    fn pause_freezes_and_resume_continues() {
        let start = Instant::now();
        let mut state = SessionState::default();
        state.begin_track(TrackRef::remote("a", "u", "o"), 0, true, start);

        let pause_at = start + Duration::from_secs(20);
        let frozen = estimate_position_at(&state, pause_at);
        state.set_paused(true, frozen, pause_at);

        // Pausado durante un minuto: la posición no cambia.
        let later = pause_at + Duration::from_secs(60);
        assert_eq!(estimate_position_at(&state, later), 20);

        state.set_paused(false, estimate_position_at(&state, later), later);
        assert_eq!(estimate_position_at(&state, later + Duration::from_secs(5)), 25);
    }

    #[test]
    fn progress_bar_with_and_without_duration() {
        let bar = render_progress_bar(0, Some(Duration::from_secs(200)));
        assert!(bar.starts_with("`00:00 ●"));
        assert!(bar.ends_with("03:20`"));

        let full = render_progress_bar(500, Some(Duration::from_secs(200)));
        assert!(full.contains(&("━".repeat(19) + "●")));

        assert_eq!(render_progress_bar(75, None), "`01:15 / ??:??`");
    }
}
