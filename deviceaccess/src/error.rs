//! The two-category error taxonomy shared by the whole library.
//!
//! `Logic` signals a programmer error (bad path, wrong access mode, invalid
//! codec parameters, closed device) and is never recovered. `Runtime` signals
//! a transport or device fault and is recoverable by `close()` + `open()`.

use snafu::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("LogicError: {message}"))]
    Logic { message: String },

    #[snafu(display("RuntimeError: {message}"))]
    Runtime { message: String },
}

impl Error {
    pub fn logic(message: impl Into<String>) -> Self {
        Error::Logic {
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime {
            message: message.into(),
        }
    }

    pub fn is_logic(&self) -> bool {
        matches!(self, Error::Logic { .. })
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, Error::Runtime { .. })
    }

    /// The canonical error raised by any transfer on a closed backend.
    pub fn device_not_opened() -> Self {
        Error::logic("Device is not opened.")
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut {
            Error::runtime("connection timed out")
        } else {
            Error::runtime(format!("i/o error: {e}"))
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert!(Error::logic("x").is_logic());
        assert!(Error::runtime("x").is_runtime());
        assert!(!Error::runtime("x").is_logic());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::device_not_opened().to_string(),
            "LogicError: Device is not opened."
        );
        assert_eq!(Error::runtime("boom").to_string(), "RuntimeError: boom");
    }
}
