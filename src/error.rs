use std::fmt;

use crate::kernel::{DeviceId, ThreadId};

// Errors surfaced by the devices core.
// Everything else (reclaimed frames, empty queues) is an expected state and is
// returned as an absent value instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    // The issuing thread is being killed. Admission abandons the request.
    ThreadKilled { thread: ThreadId },

    // No device with this id was configured.
    UnknownDevice { device: DeviceId },

    // Geometry that would make the cylinder computation divide by zero.
    InvalidGeometry(String),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::ThreadKilled { thread } => {
                write!(f, "thread {} is being killed, I/O abandoned", thread)
            }
            IoError::UnknownDevice { device } => write!(f, "device {} does not exist", device),
            IoError::InvalidGeometry(reason) => write!(f, "invalid disk geometry: {}", reason),
        }
    }
}

impl std::error::Error for IoError {}

pub type IoResult<T> = Result<T, IoError>;
