use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque store-assigned version token.
///
/// Every successful object create/overwrite in the blob store yields a new
/// generation, unique for that object path. Holding a generation is how a
/// locker proves ownership of the current lock object: a locker whose stored
/// generation no longer matches the live one cannot release or adopt it.
///
/// Generations are only ever compared for equality; their numeric value
/// carries no meaning beyond uniqueness.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Generation(u64);

impl Generation {
    /// Wrap a raw token value issued by a store backend.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw token value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generation({})", self.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
