use crate::protocol::ProtocolError;

/// An error that can occur when using a Wayland connection
///
/// Once a connection hit such an error it is dead: the same error is returned by every
/// following operation.
#[derive(Debug)]
pub enum WaylandError {
    /// The connection encountered an IO error
    Io(std::io::Error),
    /// The connection encountered a protocol error
    Protocol(ProtocolError),
}

impl std::error::Error for WaylandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Protocol(e) => Some(e),
        }
    }
}

impl std::fmt::Display for WaylandError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> Result<(), ::std::fmt::Error> {
        match self {
            Self::Io(e) => write!(f, "Io error: {e}"),
            Self::Protocol(e) => std::fmt::Display::fmt(e, f),
        }
    }
}

impl Clone for WaylandError {
    fn clone(&self) -> Self {
        match self {
            Self::Protocol(e) => Self::Protocol(e.clone()),
            Self::Io(e) => {
                if let Some(code) = e.raw_os_error() {
                    Self::Io(std::io::Error::from_raw_os_error(code))
                } else {
                    Self::Io(std::io::Error::new(e.kind(), e.to_string()))
                }
            }
        }
    }
}

impl From<ProtocolError> for WaylandError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<std::io::Error> for WaylandError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// An error generated if an invalid Object ID was provided
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvalidId;

impl std::error::Error for InvalidId {}

impl std::fmt::Display for InvalidId {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> Result<(), ::std::fmt::Error> {
        write!(f, "Invalid Id")
    }
}
