use std::fmt;
use std::io;

/// Errors that stop a latency sweep before (or while) it produces output
#[derive(Debug)]
pub enum SweepError {
    /// Sweep parameters are inconsistent
    InvalidConfig(String),
    /// The working buffer could not be reserved
    Allocation { bytes: usize },
    /// Cycle counter calibration produced an unusable factor
    Calibration(String),
    /// Writing the result table failed
    Io(io::Error),
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepError::InvalidConfig(msg) => write!(f, "invalid sweep configuration: {}", msg),
            SweepError::Allocation { bytes } => {
                write!(f, "failed to allocate working buffer of {} bytes", bytes)
            }
            SweepError::Calibration(msg) => write!(f, "cycle counter calibration failed: {}", msg),
            SweepError::Io(err) => write!(f, "failed to write results: {}", err),
        }
    }
}

impl std::error::Error for SweepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SweepError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SweepError {
    fn from(err: io::Error) -> Self {
        SweepError::Io(err)
    }
}
