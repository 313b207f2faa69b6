use serde::{Deserialize, Serialize};

/// Output-target states of the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SinkState {
    /// No file open; samples are discarded and reserved tags buffered
    #[default]
    Idle,
    /// A temp file has been created but not installed yet
    Opening,
    /// Samples are being written to the installed file
    Active,
    /// A replacement file is staged while the current one is still active
    Rotating,
}

impl SinkState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &SinkState) -> bool {
        use SinkState::*;

        if self == target {
            return true;
        }

        matches!(
            (self, target),
            // From Idle
            (Idle, Opening) |

            // From Opening
            (Opening, Active) |
            (Opening, Idle) |

            // From Active
            (Active, Rotating) |
            (Active, Idle) |

            // From Rotating
            (Rotating, Active) |
            (Rotating, Opening) |
            (Rotating, Idle)
        )
    }

    /// Get human-readable state name
    pub fn name(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::Opening => "Opening",
            Self::Active => "Active",
            Self::Rotating => "Rotating",
        }
    }

    /// True while a data file is installed
    pub fn is_writing(&self) -> bool {
        matches!(self, Self::Active | Self::Rotating)
    }
}
