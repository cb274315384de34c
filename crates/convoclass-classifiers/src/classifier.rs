//! Resolved classifiers and classifier sets

use crate::aggregation::Aggregation;
use crate::chunker::Chunker;
use crate::label::{Label, LabelSchema};
use crate::model::ModelWrapper;
use crate::prompt::{PromptFields, PromptTemplate};
use convoclass_core::{Result, Snippet};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Outcome of one successful classification request
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Schema-validated label
    pub label: Label,

    /// Confidence in `[0, 1]`, when the service reported one
    pub confidence: Option<f32>,
}

/// Where a tree traversal goes after a node produced a label
#[derive(Debug, Clone, Copy)]
pub enum Transition<'a> {
    /// Evaluate this child against the same snippet
    Child(&'a Arc<ClassifierNode>),

    /// The label is the final output
    Terminal,
}

/// A classifier definition with its template, schema, and children resolved
#[derive(Debug)]
pub struct ClassifierNode {
    name: String,
    template: Arc<PromptTemplate>,
    fields: PromptFields,
    schema: LabelSchema,
    chunker: Chunker,
    children: HashMap<Label, Arc<ClassifierNode>>,
}

impl ClassifierNode {
    pub(crate) fn new(
        name: impl Into<String>,
        template: Arc<PromptTemplate>,
        fields: PromptFields,
        schema: LabelSchema,
        chunker: Chunker,
        children: HashMap<Label, Arc<ClassifierNode>>,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            fields,
            schema,
            chunker,
            children,
        }
    }

    /// Classifier name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Valid labels
    pub fn schema(&self) -> &LabelSchema {
        &self.schema
    }

    /// Chunker used to split conversations for this classifier
    pub fn chunker(&self) -> Chunker {
        self.chunker
    }

    /// Whether any label leads to a child
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of nodes on the longest path starting here
    pub fn depth(&self) -> usize {
        1 + self.children.values().map(|c| c.depth()).max().unwrap_or(0)
    }

    /// Render the request prompt for one snippet
    pub fn render(&self, snippet: &Snippet) -> String {
        self.template.render(&self.fields, &snippet.rendered_text)
    }

    /// Classify a snippet through the model wrapper
    pub async fn classify(&self, model: &ModelWrapper, snippet: &Snippet) -> Result<Classification> {
        let prompt = self.render(snippet);
        model.classify(&prompt, &self.schema).await
    }

    /// Next step after this node produced `label`
    pub fn next(&self, label: &Label) -> Transition<'_> {
        match self.children.get(label) {
            Some(child) => Transition::Child(child),
            None => Transition::Terminal,
        }
    }
}

/// A flat top tier gating a flat sub tier
#[derive(Debug, Clone)]
pub struct GatedSet {
    pub top_level: BTreeMap<String, Arc<ClassifierNode>>,
    pub sub_level: BTreeMap<String, Arc<ClassifierNode>>,

    /// Sub classifier name to the top classifiers that enable it
    pub dependencies: BTreeMap<String, Vec<String>>,

    pub aggregation: Aggregation,
    pub positive_labels: Vec<String>,
}

/// A named set of classifiers, ready for evaluation
#[derive(Debug, Clone)]
pub enum ClassifierSet {
    /// Independent classifiers, each with its own chunker
    Flat(BTreeMap<String, Arc<ClassifierNode>>),

    /// A decision tree; the root's chunker applies to the whole traversal
    Tree(Arc<ClassifierNode>),

    /// Two tiers, the second evaluated only where the first fires
    Gated(GatedSet),
}

impl ClassifierSet {
    /// Names of the classifiers evaluated directly by this set
    pub fn classifier_names(&self) -> Vec<String> {
        match self {
            Self::Flat(classifiers) => classifiers.keys().cloned().collect(),
            Self::Tree(root) => vec![root.name().to_string()],
            Self::Gated(gated) => gated
                .top_level
                .keys()
                .chain(gated.sub_level.keys())
                .cloned()
                .collect(),
        }
    }

    /// Short description for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Flat(_) => "flat",
            Self::Tree(_) => "tree",
            Self::Gated(_) => "gated",
        }
    }
}
