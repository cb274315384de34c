//! convoclass Classifiers
//!
//! Prompt-based classification of conversations through a remote language model.
//!
//! The moving parts, in the order a conversation meets them:
//! - [`Chunker`]: splits a conversation into role-marked snippets
//! - [`ClassifierRegistry`]: resolves a named flat, tree, or gated set from YAML,
//!   rejecting undefined references and cyclic trees up front
//! - [`ModelWrapper`]: bounds concurrent requests with an admission gate and
//!   retries transient service failures with exponential backoff
//! - [`Evaluator`]: runs a set over one conversation and records failed
//!   requests as the `error` label

pub mod aggregation;
pub mod backend;
pub mod chunker;
pub mod classifier;
pub mod config;
pub mod evaluator;
pub mod label;
pub mod model;
pub mod openai;
pub mod prompt;
pub mod registry;

pub use aggregation::Aggregation;
pub use backend::ClassificationBackend;
pub use chunker::Chunker;
pub use classifier::{Classification, ClassifierNode, ClassifierSet, GatedSet, Transition};
pub use config::{ClassifierConfig, ClassifierSetSpec, ClassifierSpec};
pub use evaluator::{Evaluator, Traversal};
pub use label::{Label, LabelSchema};
pub use model::{parse_response, ModelStats, ModelWrapper, RetryPolicy};
pub use openai::{OpenAiBackend, OpenAiBackendConfig};
pub use prompt::{PromptFields, PromptTemplate};
pub use registry::{load_config, ClassifierRegistry};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::backend::ClassificationBackend;
    pub use crate::classifier::{Classification, ClassifierSet};
    pub use crate::evaluator::Evaluator;
    pub use crate::model::{ModelWrapper, RetryPolicy};
    pub use crate::registry::ClassifierRegistry;
}
