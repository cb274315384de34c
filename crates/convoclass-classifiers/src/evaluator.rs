//! Evaluation of one conversation against a classifier set
//!
//! - Flat sets issue one request per (classifier, snippet) pair, all concurrently
//! - Tree sets traverse every snippet from the root; traversals run
//!   concurrently but each one is strictly sequential
//! - Gated sets run the top tier, then only the sub classifiers whose
//!   dependencies fired
//!
//! A failed request never fails the conversation: it is recorded as the
//! [`ERROR_LABEL`] token in the result.

use crate::classifier::{ClassifierNode, ClassifierSet, GatedSet, Transition};
use crate::model::ModelWrapper;
use convoclass_core::{ClassificationResult, Conversation, Snippet, ERROR_LABEL};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

type FlatLabels = BTreeMap<String, BTreeMap<usize, String>>;

/// Outcome of walking one snippet down a decision tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traversal {
    /// Terminal label, or [`ERROR_LABEL`] if a node failed
    pub label: String,

    /// Names of the nodes evaluated, in order
    pub path: Vec<String>,
}

/// Evaluates conversations through a shared model wrapper
#[derive(Clone)]
pub struct Evaluator {
    model: Arc<ModelWrapper>,
}

impl Evaluator {
    pub fn new(model: Arc<ModelWrapper>) -> Self {
        Self { model }
    }

    /// Shared model wrapper
    pub fn model(&self) -> &Arc<ModelWrapper> {
        &self.model
    }

    /// Classify one conversation
    pub async fn evaluate(
        &self,
        conversation: &Conversation,
        set: &ClassifierSet,
    ) -> ClassificationResult {
        let start = Instant::now();

        let result = match set {
            ClassifierSet::Flat(classifiers) => {
                ClassificationResult::Flat(self.evaluate_flat(conversation, classifiers).await)
            }
            ClassifierSet::Tree(root) => {
                ClassificationResult::Tree(self.evaluate_tree(conversation, root).await)
            }
            ClassifierSet::Gated(gated) => {
                ClassificationResult::Flat(self.evaluate_gated(conversation, gated).await)
            }
        };

        debug!(
            conversation = conversation.hash(),
            kind = set.kind(),
            labels = result.label_count(),
            errors = result.error_count(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Conversation evaluated"
        );

        result
    }

    async fn evaluate_flat(
        &self,
        conversation: &Conversation,
        classifiers: &BTreeMap<String, Arc<ClassifierNode>>,
    ) -> FlatLabels {
        // Every classifier appears in the output, even with no snippets
        let mut results: FlatLabels = classifiers
            .keys()
            .map(|name| (name.clone(), BTreeMap::new()))
            .collect();

        let pairs: Vec<(&String, &Arc<ClassifierNode>, Snippet)> = classifiers
            .iter()
            .flat_map(|(name, node)| {
                node.chunker()
                    .chunk(conversation)
                    .into_iter()
                    .map(move |snippet| (name, node, snippet))
            })
            .collect();

        let outcomes = join_all(pairs.iter().map(|(name, node, snippet)| async move {
            (*name, snippet.index, self.label_or_error(node, snippet).await)
        }))
        .await;

        for (name, index, label) in outcomes {
            results.entry(name.clone()).or_default().insert(index, label);
        }

        results
    }

    async fn evaluate_tree(
        &self,
        conversation: &Conversation,
        root: &Arc<ClassifierNode>,
    ) -> BTreeMap<usize, String> {
        let snippets = root.chunker().chunk(conversation);

        let traversals = join_all(snippets.iter().map(|s| self.traverse(root, s))).await;

        snippets
            .iter()
            .zip(traversals)
            .map(|(snippet, traversal)| (snippet.index, traversal.label))
            .collect()
    }

    async fn evaluate_gated(&self, conversation: &Conversation, gated: &GatedSet) -> FlatLabels {
        let mut results = self.evaluate_flat(conversation, &gated.top_level).await;

        let fired: BTreeSet<&str> = gated
            .top_level
            .keys()
            .filter(|name| {
                results.get(*name).is_some_and(|labels| {
                    gated
                        .aggregation
                        .aggregate(labels.values().map(String::as_str), &gated.positive_labels)
                })
            })
            .map(String::as_str)
            .collect();

        let eligible: BTreeMap<String, Arc<ClassifierNode>> = gated
            .sub_level
            .iter()
            .filter(|(name, _)| {
                gated
                    .dependencies
                    .get(*name)
                    .is_some_and(|deps| deps.iter().any(|d| fired.contains(d.as_str())))
            })
            .map(|(name, node)| (name.clone(), Arc::clone(node)))
            .collect();

        debug!(
            conversation = conversation.hash(),
            fired = ?fired,
            eligible = ?eligible.keys().collect::<Vec<_>>(),
            "Gated top tier evaluated"
        );

        if !eligible.is_empty() {
            results.extend(self.evaluate_flat(conversation, &eligible).await);
        }

        results
    }

    /// Walk one snippet from `root` until a label has no child
    pub async fn traverse(&self, root: &Arc<ClassifierNode>, snippet: &Snippet) -> Traversal {
        let mut node = Arc::clone(root);
        let mut path: Vec<String> = Vec::new();

        loop {
            if path.iter().any(|visited| visited == node.name()) {
                warn!(
                    node = node.name(),
                    path = ?path,
                    "Decision tree revisited a node; stopping traversal"
                );
                return Traversal {
                    label: ERROR_LABEL.to_string(),
                    path,
                };
            }
            path.push(node.name().to_string());

            let classification = match node.classify(&self.model, snippet).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        classifier = node.name(),
                        index = snippet.index,
                        error = %e,
                        "Tree node failed; recording error label"
                    );
                    return Traversal {
                        label: ERROR_LABEL.to_string(),
                        path,
                    };
                }
            };

            let next = match node.next(&classification.label) {
                Transition::Child(child) => Arc::clone(child),
                Transition::Terminal => {
                    return Traversal {
                        label: classification.label.into_string(),
                        path,
                    }
                }
            };
            node = next;
        }
    }

    async fn label_or_error(&self, node: &ClassifierNode, snippet: &Snippet) -> String {
        match node.classify(&self.model, snippet).await {
            Ok(classification) => classification.label.into_string(),
            Err(e) => {
                warn!(
                    classifier = node.name(),
                    index = snippet.index,
                    error = %e,
                    "Classification failed; recording error label"
                );
                ERROR_LABEL.to_string()
            }
        }
    }
}
