use serde::Serialize;

/// Who last decided a device's pause flag.
///
/// `Paused`/`Unpaused` mean the flag matches what the metering policy set.
/// The renegade variants mean someone else changed it, so the policy
/// leaves the device alone until renegades are reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DevicePauseState {
    #[default]
    Unpaused,
    Paused,
    UnpausedRenegade,
    PausedRenegade,
}

impl DevicePauseState {
    /// State for a device seen for the first time, given its current pause flag.
    pub fn observed(paused: bool) -> Self {
        if paused {
            DevicePauseState::PausedRenegade
        } else {
            DevicePauseState::Unpaused
        }
    }

    pub fn is_renegade(self) -> bool {
        matches!(
            self,
            DevicePauseState::UnpausedRenegade | DevicePauseState::PausedRenegade
        )
    }

    /// The daemon reported the device as paused.
    pub fn on_paused(self) -> Self {
        match self {
            DevicePauseState::Unpaused => DevicePauseState::PausedRenegade,
            DevicePauseState::UnpausedRenegade => DevicePauseState::Paused,
            other => other,
        }
    }

    /// The daemon reported the device as resumed.
    pub fn on_resumed(self) -> Self {
        match self {
            DevicePauseState::Paused => DevicePauseState::UnpausedRenegade,
            DevicePauseState::PausedRenegade => DevicePauseState::Unpaused,
            other => other,
        }
    }

    pub fn reset_renegade(self) -> Self {
        match self {
            DevicePauseState::PausedRenegade => DevicePauseState::Paused,
            DevicePauseState::UnpausedRenegade => DevicePauseState::Unpaused,
            other => other,
        }
    }
}
