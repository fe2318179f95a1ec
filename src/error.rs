//! Bootstrap failure modes. Allocation failures are not represented here —
//! per §7 they surface as a nil pointer, not a `Result`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The raw provider could not serve one of the bookkeeping regions
    /// (size-class table, heap pointer array, heap metadata) during
    /// bootstrap.
    RawProviderFailed,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::RawProviderFailed => {
                write!(f, "raw heap provider could not serve bootstrap allocation")
            }
        }
    }
}

impl std::error::Error for InitError {}

pub type Result<T> = std::result::Result<T, InitError>;
