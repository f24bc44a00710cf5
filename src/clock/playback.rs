use crate::config::SyncConfig;
use crate::protocol::MediaStatus;

/// Where playback should be, in seconds, at global time `global_now_ms`
pub fn expected_position(status: &MediaStatus, global_now_ms: f64) -> f64 {
    if status.playing {
        status.video_timestamp + (global_now_ms - status.last_updated) / 1000.0
    } else {
        status.video_timestamp
    }
}

/// Whether the local player has drifted far enough to warrant a seek.
/// Paused players are held to a much tighter threshold.
pub fn needs_seek(local_position: f64, expected: f64, playing: bool, config: &SyncConfig) -> bool {
    let threshold = if playing {
        config.playing_threshold_secs
    } else {
        config.paused_threshold_secs
    };
    (local_position - expected).abs() > threshold
}
