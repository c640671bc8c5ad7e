#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// The fault-injection configure step was not acknowledged.
    ConfigureRejected = 20,

    /// Invalid CLI/plan input (bad flags, malformed plan, unknown threshold metric, unresolvable
    /// base URL, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, executor join failures).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check failures never change the exit code; only threshold verdicts do.
    #[must_use]
    pub fn from_thresholds(passed: bool) -> Self {
        if passed {
            Self::Success
        } else {
            Self::ThresholdsFailed
        }
    }
}
