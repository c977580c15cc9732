use std::fmt;
use std::io;
use std::process::ExitCode;

use mux_core::control::ControlError;
use mux_core::controller::AttachError;
use mux_core::queue::EnqueueError;

/// `EX_TEMPFAIL`: a publisher has not registered yet, try again later.
pub const EXIT_RETRY_LATER: u8 = 75;
/// Bad command line.
pub const EXIT_USAGE: u8 = 2;

#[derive(Debug)]
pub enum DaemonError {
    Usage(String),
    Io {
        context: String,
        source: io::Error,
    },
    Map(nix::Error),
    Attach(AttachError),
    Queue(EnqueueError),
}

impl DaemonError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        DaemonError::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit status for this failure.
    pub fn exit_status(&self) -> u8 {
        match self {
            DaemonError::Usage(_) => EXIT_USAGE,
            DaemonError::Attach(AttachError::Unavailable(_)) => EXIT_RETRY_LATER,
            _ => 1,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::Usage(message) => f.write_str(message),
            DaemonError::Io { context, source } => write!(f, "{context}: {source}"),
            DaemonError::Map(errno) => write!(f, "can't iomap registers: {errno}"),
            DaemonError::Attach(error) => write!(f, "attach failed: {error}"),
            DaemonError::Queue(error) => write!(f, "initial sync failed: {error}"),
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaemonError::Io { source, .. } => Some(source),
            DaemonError::Map(errno) => Some(errno),
            _ => None,
        }
    }
}

impl From<AttachError> for DaemonError {
    fn from(error: AttachError) -> Self {
        DaemonError::Attach(error)
    }
}

impl From<EnqueueError> for DaemonError {
    fn from(error: EnqueueError) -> Self {
        DaemonError::Queue(error)
    }
}

impl From<ControlError> for DaemonError {
    fn from(error: ControlError) -> Self {
        match error {
            ControlError::InvalidMode => DaemonError::Usage(error.to_string()),
            ControlError::Queue(error) => DaemonError::Queue(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_core::signals::UnavailableDependency;

    #[test]
    fn missing_publisher_asks_for_retry() {
        let error = DaemonError::Attach(AttachError::Unavailable(UnavailableDependency {
            platform_id: "INT34D3",
            publisher: "cht_wcove_pwrsrc",
        }));
        assert_eq!(error.exit_status(), EXIT_RETRY_LATER);
        assert!(error.to_string().contains("cht_wcove_pwrsrc"));
    }

    #[test]
    fn other_failures_are_generic() {
        let error = DaemonError::Attach(AttachError::WindowTooSmall { size: 0x10 });
        assert_eq!(error.exit_status(), 1);
        assert_eq!(DaemonError::Map(nix::Error::EACCES).exit_status(), 1);
    }
}
