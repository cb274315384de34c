//! convoclass Core
//!
//! Core types and error handling shared across the convoclass crates.
//!
//! This crate provides:
//! - Conversations, messages, and rendered snippets
//! - Input and output record formats for line-delimited corpora
//! - The error taxonomy used by the classifiers and the batch runner

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    ClassificationResult, Conversation, ConversationRecord, Message, OutputRecord, RawMessage,
    Role, Snippet, ERROR_LABEL,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        ClassificationResult, Conversation, ConversationRecord, Message, OutputRecord, Role,
        Snippet, ERROR_LABEL,
    };
}
