/// Capture engine state machine.
///
/// State transitions:
/// ```text
/// unconfigured → configured → recording → stopped
///       ↑             │                     │
///       └── reset ────┴──── reset / configure┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Unconfigured,
    Configured,
    Recording,
    Stopped,
}

impl CaptureState {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    /// Whether `configure` may be called from this state.
    pub fn accepts_configure(&self) -> bool {
        matches!(self, Self::Unconfigured | Self::Stopped)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Recording => "recording",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
