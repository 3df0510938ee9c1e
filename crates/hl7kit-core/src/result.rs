//! Result alias and helpers for skipping bad input

use crate::error::Hl7Error;

/// Standard Result type for hl7kit operations
pub type Result<T> = std::result::Result<T, Hl7Error>;

pub trait ResultExt<T> {
    /// Turn a recoverable error (bad message content) into `Ok(None)`,
    /// logging it with `context`. I/O and configuration errors still fail.
    fn recoverable(self, context: &str) -> Result<Option<T>>;
}

impl<T> ResultExt<T> for Result<T> {
    fn recoverable(self, context: &str) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_recoverable() => {
                tracing::warn!("Skipping {}: {}", context, err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
