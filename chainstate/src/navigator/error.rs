use thiserror::Error;

use super::mapping::Offset;
use super::tags::TagId;

/// Errors surfaced by the navigator and its mapped region
#[derive(Error, Debug)]
pub enum NavigatorError {
    #[error("Corrupt navigation state: {0}")]
    Corrupt(String),

    #[error("Out of space: requested {requested} bytes, {available} available")]
    OutOfSpace { requested: usize, available: usize },

    #[error("Unknown tag {0}")]
    UnknownTag(TagId),

    #[error("Tag {target} is not a descendant of the cursor {cursor}")]
    NotDescendant { target: TagId, cursor: TagId },

    #[error("Cursor is already at the root")]
    AtRoot,

    #[error("The root tag cannot be deleted")]
    RootTag,

    #[error("Tag {0} already has child tags")]
    TagHasChildren(TagId),

    #[error("Invalid patch offset {0}")]
    InvalidPatch(Offset),

    #[error("Invalid bank {0}")]
    InvalidBank(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

impl NavigatorError {
    /// Whether the error means the store must not be used any further.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, NavigatorError::Corrupt(_))
    }
}
