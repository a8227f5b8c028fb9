//! # Shared Protocol Types and Constants
//!
//! Constants and small value types shared by discipline servers and clients.
//! Both sides size their *own* outgoing chunks from their own
//! [`StreamOptions`]; the values need not match across a connection.

use crate::{Error, Result, proto};
use std::collections::HashMap;

/// Default maximum number of doubles carried by one [`proto::ArrayChunk`].
pub const DEFAULT_NUM_DOUBLE: usize = 1000;

/// Default shape of a declared variable (a scalar).
pub const SCALAR_SHAPE: &[usize] = &[1];

/// Token accepted by `declare_partials` meaning "every declared input".
pub const WILDCARD: &str = "*";

/// Discipline configuration forwarded to `initialize`.
pub type Options = HashMap<String, f64>;

/// Session-scoped streaming options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    /// Maximum number of values in a single outgoing chunk. Always positive.
    pub num_double: usize,
}

impl StreamOptions {
    /// Creates options with the given chunk size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStreamOptions`] if `num_double` is zero.
    pub fn new(num_double: usize) -> Result<Self> {
        if num_double == 0 {
            return Err(Error::InvalidStreamOptions {
                reason: "num_double must be greater than 0".to_string(),
            });
        }
        Ok(Self { num_double })
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            num_double: DEFAULT_NUM_DOUBLE,
        }
    }
}

impl TryFrom<proto::StreamOptions> for StreamOptions {
    type Error = Error;

    fn try_from(value: proto::StreamOptions) -> Result<Self> {
        let num_double =
            usize::try_from(value.num_double).map_err(|_| Error::InvalidStreamOptions {
                reason: format!("num_double {} does not fit in memory", value.num_double),
            })?;
        Self::new(num_double)
    }
}

impl From<StreamOptions> for proto::StreamOptions {
    fn from(value: StreamOptions) -> Self {
        Self {
            num_double: value.num_double as u64,
        }
    }
}
