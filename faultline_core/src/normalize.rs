//! Wrapper stripping.
//!
//! The same fault can reach different channels wrapped differently: a panic
//! raised by a routine invoked by name arrives inside an
//! [`InvocationFault`](crate::fault::InvocationFault), the same panic raised
//! directly does not. [`normalize`] peels every wrapper so policy and sink
//! always see the innermost fault.

use std::sync::Arc;
use thiserror::Error;

use crate::fault::Payload;

/// Maximum number of wrappers peeled before the chain is declared malformed.
pub const MAX_WRAPPER_DEPTH: usize = 16;

/// Normalization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// More than [`MAX_WRAPPER_DEPTH`] nested wrappers.
    #[error("wrapper chain deeper than {limit} levels")]
    WrapperDepthExceeded {
        /// The limit that was exceeded.
        limit: usize,
    },
}

/// Innermost non-wrapper payload of `raw`.
///
/// Returns `raw` itself when it is not a wrapper. Applying `normalize` to its
/// own result returns the same object.
pub fn normalize(raw: &Payload) -> Result<Payload, NormalizeError> {
    let mut current = raw;
    let mut depth = 0;
    while let Some(inner) = current.inner() {
        if depth == MAX_WRAPPER_DEPTH {
            return Err(NormalizeError::WrapperDepthExceeded {
                limit: MAX_WRAPPER_DEPTH,
            });
        }
        current = inner;
        depth += 1;
    }
    Ok(Arc::clone(current))
}

/// Number of wrappers around the innermost payload, capped at the limit + 1.
pub fn wrapper_depth(raw: &Payload) -> usize {
    let mut current = raw;
    let mut depth = 0;
    while let Some(inner) = current.inner() {
        depth += 1;
        if depth > MAX_WRAPPER_DEPTH {
            break;
        }
        current = inner;
    }
    depth
}
