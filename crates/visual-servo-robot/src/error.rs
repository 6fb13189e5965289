/// Transient failures of the hardware link.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    #[error("connection to the robot board lost")]
    ConnectionLost,
    #[error("interrupted while waiting for the robot board")]
    Interrupted,
}

/// Errors returned to callers of the robot API.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotError {
    #[error("grab percent {0} is outside 0..=100")]
    InvalidGrabPercent(u32),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
}
