// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// Error taxonomy for the registry and protocol layers. Plain enum over
// `std::error::Error`, matching the teacher crate's preference for
// `io::Result`-shaped error handling rather than a dedicated error crate.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Named block is absent from the registry.
    NotFound(String),
    /// `new_blob`/`new_array` called with a name already present.
    AlreadyExists(String),
    /// `borrow_element`/`return_element` called on a blob, not an array.
    NotAnArray(String),
    /// Array element index outside `[0, len)`.
    IndexOutOfRange { name: String, index: usize, len: usize },
    /// `grab` could not acquire the block's mutex within the given timeout.
    LockTimeout(String),
    /// Accumulator or storage (re)allocation failed.
    AllocFailed(String),
    /// `call` issued against a block this peer serves (slave-owned), not consumes.
    SlaveOwned(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::NotFound(name) => write!(f, "block {name:?} not found"),
            LinkError::AlreadyExists(name) => write!(f, "block {name:?} already exists"),
            LinkError::NotAnArray(name) => write!(f, "block {name:?} is not an array"),
            LinkError::IndexOutOfRange { name, index, len } => write!(
                f,
                "index {index} out of range for block {name:?} (len {len})"
            ),
            LinkError::LockTimeout(name) => write!(f, "timed out locking block {name:?}"),
            LinkError::AllocFailed(name) => write!(f, "allocation failed for block {name:?}"),
            LinkError::SlaveOwned(name) => {
                write!(f, "block {name:?} is slave-owned and cannot be called")
            }
        }
    }
}

impl std::error::Error for LinkError {}

pub type Result<T> = std::result::Result<T, LinkError>;
