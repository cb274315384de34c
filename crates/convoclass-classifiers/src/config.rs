//! Configuration for classifier definitions and classifier sets

use crate::aggregation::Aggregation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration for all templates, classifiers, and sets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Prompt templates by id
    #[serde(default)]
    pub templates: BTreeMap<String, String>,

    /// Classifier definitions by name
    #[serde(default)]
    pub classifiers: BTreeMap<String, ClassifierSpec>,

    /// Named classifier sets
    #[serde(default)]
    pub sets: BTreeMap<String, ClassifierSetSpec>,
}

/// A single classifier definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSpec {
    /// Prompt template id
    #[serde(alias = "prompt_id")]
    pub template: String,

    /// Full task description
    #[serde(default)]
    pub prompt: String,

    /// Short task restatement; falls back to `prompt`
    pub prompt_short: Option<String>,

    /// Classification criteria
    #[serde(default)]
    pub criteria: String,

    /// Valid label tokens
    pub labels: Vec<String>,

    /// Chunker id
    #[serde(default = "default_chunker")]
    pub chunker: String,

    /// Label to child classifier name; makes this an internal tree node
    #[serde(default)]
    pub children: BTreeMap<String, String>,
}

/// How a named set of classifiers is evaluated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClassifierSetSpec {
    /// Independent classifiers, all evaluated for every snippet
    Flat { classifiers: Vec<String> },

    /// A decision tree rooted at one classifier
    Tree { root: String },

    /// A top tier whose aggregated results gate a sub tier
    Gated {
        top_level: Vec<String>,
        sub_level: Vec<String>,

        /// Sub classifier name to the top classifiers it depends on
        #[serde(default)]
        dependencies: BTreeMap<String, Vec<String>>,

        #[serde(default)]
        aggregation: Aggregation,

        #[serde(default = "default_positive_labels")]
        positive_labels: Vec<String>,
    },
}

impl ClassifierConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }

    /// Get all classifier names
    pub fn classifier_names(&self) -> Vec<String> {
        self.classifiers.keys().cloned().collect()
    }

    /// Get all set names
    pub fn set_names(&self) -> Vec<String> {
        self.sets.keys().cloned().collect()
    }

    /// Get set configuration by name
    pub fn get_set(&self, name: &str) -> Option<&ClassifierSetSpec> {
        self.sets.get(name)
    }
}

fn default_chunker() -> String {
    "user_turn_with_context".to_string()
}

fn default_positive_labels() -> Vec<String> {
    vec!["yes".to_string(), "true".to_string()]
}
