//! Playback states and status snapshots

use serde::{Deserialize, Serialize};

/// Discrete playback states, mutated only by the engine thread and
/// read-only to everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Idle,
    Stopped,
    Starting,
    Playing,
    Paused,
    Seeking,
    Stopping,
    Finished,
    Error,
}

impl PlayerState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            PlayerState::Idle => 0,
            PlayerState::Stopped => 1,
            PlayerState::Starting => 2,
            PlayerState::Playing => 3,
            PlayerState::Paused => 4,
            PlayerState::Seeking => 5,
            PlayerState::Stopping => 6,
            PlayerState::Finished => 7,
            PlayerState::Error => 8,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => PlayerState::Idle,
            1 => PlayerState::Stopped,
            2 => PlayerState::Starting,
            3 => PlayerState::Playing,
            4 => PlayerState::Paused,
            5 => PlayerState::Seeking,
            6 => PlayerState::Stopping,
            7 => PlayerState::Finished,
            _ => PlayerState::Error,
        }
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlayerState::Idle => "idle",
            PlayerState::Stopped => "stopped",
            PlayerState::Starting => "starting",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Seeking => "seeking",
            PlayerState::Stopping => "stopping",
            PlayerState::Finished => "finished",
            PlayerState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Decode control modes issued by the engine thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    Stopped,
    Running,
    Paused,
    Quit,
}

impl DecodeMode {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            DecodeMode::Stopped => 0,
            DecodeMode::Running => 1,
            DecodeMode::Paused => 2,
            DecodeMode::Quit => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => DecodeMode::Running,
            2 => DecodeMode::Paused,
            3 => DecodeMode::Quit,
            _ => DecodeMode::Stopped,
        }
    }
}

impl std::fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DecodeMode::Stopped => "stopped",
            DecodeMode::Running => "running",
            DecodeMode::Paused => "paused",
            DecodeMode::Quit => "quit",
        };
        write!(f, "{}", name)
    }
}

/// Point-in-time snapshot of playback status for observers.
///
/// Returned by [`PlayerEngine::get_status`](crate::playback::PlayerEngine::get_status);
/// every field is a copy, safe to hold across further transitions.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    pub state: PlayerState,
    /// `(rendered_frames + render_frame_offset) / sample_rate`
    pub position_seconds: f64,
    /// Source duration; 0 when unknown or before format negotiation.
    pub duration_seconds: f64,
    /// Frames sitting in the ring buffer, in seconds.
    pub buffered_seconds: f64,
    /// Render wakes that saw a short read.
    pub underrun_wake_count: u64,
    /// Frames zero-filled by the render worker.
    pub underrun_frames_total: u64,
    /// Frames the decoder failed to hand to the ring.
    pub dropped_frames: u64,
    pub decode_epoch: u64,
    pub decode_mode: DecodeMode,
    /// Pending seek target in frames; -1 means none.
    pub seek_target_frame: i64,
    pub decoded_frame_cursor: i64,
    pub produced_frames_total: u64,
    pub last_error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_state_round_trips() {
        for state in [
            PlayerState::Idle,
            PlayerState::Stopped,
            PlayerState::Starting,
            PlayerState::Playing,
            PlayerState::Paused,
            PlayerState::Seeking,
            PlayerState::Stopping,
            PlayerState::Finished,
            PlayerState::Error,
        ] {
            assert_eq!(PlayerState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_decode_mode_round_trips() {
        for mode in [
            DecodeMode::Stopped,
            DecodeMode::Running,
            DecodeMode::Paused,
            DecodeMode::Quit,
        ] {
            assert_eq!(DecodeMode::from_u8(mode.as_u8()), mode);
        }
    }

    #[test]
    fn test_status_serializes() {
        let status = PlayerStatus {
            state: PlayerState::Playing,
            position_seconds: 1.5,
            duration_seconds: 0.0,
            buffered_seconds: 0.2,
            underrun_wake_count: 0,
            underrun_frames_total: 0,
            dropped_frames: 0,
            decode_epoch: 3,
            decode_mode: DecodeMode::Running,
            seek_target_frame: -1,
            decoded_frame_cursor: 72_000,
            produced_frames_total: 72_000,
            last_error: String::new(),
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"state\":\"playing\""));
        assert!(json.contains("\"decode_mode\":\"running\""));
    }
}
