//! Classifier registry: resolves named classifier sets from configuration
//!
//! Everything that can be wrong with a set is reported by [`ClassifierRegistry::load`]
//! before a single request is issued: undefined classifiers or templates,
//! unknown chunkers, children keyed by labels outside the parent's schema, and
//! cycles in a decision tree.

use crate::chunker::Chunker;
use crate::classifier::{ClassifierNode, ClassifierSet, GatedSet};
use crate::config::{ClassifierConfig, ClassifierSetSpec};
use crate::label::LabelSchema;
use crate::prompt::{PromptFields, PromptTemplate};
use convoclass_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry of compiled templates and classifier definitions
pub struct ClassifierRegistry {
    /// Loaded classifier configuration
    config: ClassifierConfig,

    /// Compiled templates by id
    templates: HashMap<String, Arc<PromptTemplate>>,
}

impl ClassifierRegistry {
    /// Create a registry, compiling every template eagerly
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        let mut templates = HashMap::new();
        for (id, text) in &config.templates {
            templates.insert(id.clone(), Arc::new(PromptTemplate::compile(id.clone(), text)?));
        }

        info!(
            templates = templates.len(),
            classifiers = config.classifiers.len(),
            sets = config.sets.len(),
            "Classifier registry initialized"
        );

        Ok(Self { config, templates })
    }

    /// Load registry from configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = load_config(path)?;
        Self::new(config)
    }

    /// Underlying configuration
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Names of all configured sets
    pub fn set_names(&self) -> Vec<String> {
        self.config.set_names()
    }

    /// Resolve a named classifier set
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the set, or anything it references, is
    /// undefined or invalid, or if a decision tree contains a cycle.
    pub fn load(&self, set_name: &str) -> Result<ClassifierSet> {
        let spec = self
            .config
            .get_set(set_name)
            .ok_or_else(|| Error::config(format!("Classifier set '{}' not found", set_name)))?;

        let mut resolver = Resolver::new(self);

        let set = match spec {
            ClassifierSetSpec::Flat { classifiers } => {
                if classifiers.is_empty() {
                    return Err(Error::config(format!("Flat set '{}' is empty", set_name)));
                }
                ClassifierSet::Flat(resolver.resolve_tier(set_name, classifiers)?)
            }

            ClassifierSetSpec::Tree { root } => {
                let root = resolver.resolve(root)?;
                debug!(set = set_name, depth = root.depth(), "Resolved decision tree");
                ClassifierSet::Tree(root)
            }

            ClassifierSetSpec::Gated {
                top_level,
                sub_level,
                dependencies,
                aggregation,
                positive_labels,
            } => {
                let gated = GatedSet {
                    top_level: resolver.resolve_tier(set_name, top_level)?,
                    sub_level: resolver.resolve_tier(set_name, sub_level)?,
                    dependencies: dependencies.clone(),
                    aggregation: *aggregation,
                    positive_labels: positive_labels.clone(),
                };
                validate_gated(set_name, &gated)?;
                ClassifierSet::Gated(gated)
            }
        };

        info!(
            set = set_name,
            kind = set.kind(),
            classifiers = ?set.classifier_names(),
            "Resolved classifier set"
        );

        Ok(set)
    }
}

/// Depth-first resolution of classifier definitions into shared nodes
struct Resolver<'a> {
    registry: &'a ClassifierRegistry,
    resolved: HashMap<String, Arc<ClassifierNode>>,

    /// Names on the current DFS path
    visiting: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(registry: &'a ClassifierRegistry) -> Self {
        Self {
            registry,
            resolved: HashMap::new(),
            visiting: Vec::new(),
        }
    }

    fn resolve_tier(
        &mut self,
        set_name: &str,
        names: &[String],
    ) -> Result<BTreeMap<String, Arc<ClassifierNode>>> {
        let mut tier = BTreeMap::new();

        for name in names {
            let node = self.resolve(name)?;
            if !node.is_leaf() {
                warn!(
                    set = set_name,
                    classifier = %name,
                    "Children are ignored outside tree sets"
                );
            }
            tier.insert(name.clone(), node);
        }

        Ok(tier)
    }

    fn resolve(&mut self, name: &str) -> Result<Arc<ClassifierNode>> {
        if let Some(node) = self.resolved.get(name) {
            return Ok(Arc::clone(node));
        }

        if let Some(start) = self.visiting.iter().position(|n| n == name) {
            let mut cycle = self.visiting[start..].to_vec();
            cycle.push(name.to_string());
            return Err(Error::config(format!(
                "Classifier tree contains a cycle: {}",
                cycle.join(" -> ")
            )));
        }

        let spec = self
            .registry
            .config
            .classifiers
            .get(name)
            .ok_or_else(|| Error::config(format!("Classifier '{}' is not defined", name)))?;

        let template = self
            .registry
            .templates
            .get(&spec.template)
            .cloned()
            .ok_or_else(|| {
                Error::config(format!(
                    "Classifier '{}' uses undefined template '{}'",
                    name, spec.template
                ))
            })?;

        let schema = LabelSchema::new(&spec.labels).map_err(|e| in_classifier(name, e))?;
        let chunker: Chunker = spec.chunker.parse().map_err(|e| in_classifier(name, e))?;

        self.visiting.push(name.to_string());

        let mut children = HashMap::new();
        for (label, child_name) in &spec.children {
            let label = schema.label(label).map_err(|e| in_classifier(name, e))?;
            let child = self.resolve(child_name)?;
            if child.chunker() != chunker {
                debug!(
                    parent = name,
                    child = %child_name,
                    "Child chunker differs; the tree root's chunker applies"
                );
            }
            children.insert(label, child);
        }

        self.visiting.pop();

        let fields = PromptFields {
            classifier_name: name.to_string(),
            prompt: spec.prompt.clone(),
            prompt_short: spec
                .prompt_short
                .clone()
                .unwrap_or_else(|| spec.prompt.clone()),
            criteria: spec.criteria.clone(),
            labels: schema.to_string(),
        };

        let node = Arc::new(ClassifierNode::new(
            name, template, fields, schema, chunker, children,
        ));
        self.resolved.insert(name.to_string(), Arc::clone(&node));

        Ok(node)
    }
}

fn in_classifier(name: &str, err: Error) -> Error {
    match err {
        Error::Config(msg) => Error::config(format!("Classifier '{}': {}", name, msg)),
        other => other,
    }
}

fn validate_gated(set_name: &str, gated: &GatedSet) -> Result<()> {
    if gated.top_level.is_empty() || gated.sub_level.is_empty() {
        return Err(Error::config(format!(
            "Gated set '{}' needs both a top level and a sub level",
            set_name
        )));
    }

    if let Some(name) = gated.sub_level.keys().find(|n| gated.top_level.contains_key(*n)) {
        return Err(Error::config(format!(
            "Gated set '{}' lists '{}' in both tiers",
            set_name, name
        )));
    }

    for name in gated.dependencies.keys() {
        if !gated.sub_level.contains_key(name) {
            return Err(Error::config(format!(
                "Gated set '{}' declares dependencies for '{}', which is not in the sub level",
                set_name, name
            )));
        }
    }

    for name in gated.sub_level.keys() {
        let deps = gated.dependencies.get(name).filter(|d| !d.is_empty()).ok_or_else(|| {
            Error::config(format!(
                "Gated set '{}': sub classifier '{}' has no dependencies",
                set_name, name
            ))
        })?;

        if let Some(missing) = deps.iter().find(|d| !gated.top_level.contains_key(*d)) {
            return Err(Error::config(format!(
                "Gated set '{}': '{}' depends on '{}', which is not in the top level",
                set_name, name, missing
            )));
        }
    }

    if gated.positive_labels.is_empty() {
        return Err(Error::config(format!(
            "Gated set '{}' has no positive labels",
            set_name
        )));
    }

    for (name, node) in &gated.top_level {
        if !gated
            .positive_labels
            .iter()
            .any(|p| node.schema().parse(p).is_some())
        {
            warn!(
                set = set_name,
                classifier = %name,
                "Top-level classifier has no positive label and can never enable a sub classifier"
            );
        }
    }

    Ok(())
}

/// Load classifier configuration from file
pub fn load_config(path: impl AsRef<Path>) -> Result<ClassifierConfig> {
    ClassifierConfig::from_file(path.as_ref())
        .map_err(|e| Error::config(format!("Failed to load classifiers config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Transition;
    use tempfile::TempDir;

    const BASE: &str = r#"
templates:
  basic: "{classifier_name} ({labels}): {snippet}"
"#;

    fn registry(body: &str) -> Result<ClassifierRegistry> {
        let yaml = format!("{BASE}{body}");
        ClassifierRegistry::new(ClassifierConfig::from_yaml(&yaml).unwrap())
    }

    fn config_err(result: Result<ClassifierSet>) -> String {
        match result {
            Err(Error::Config(msg)) => msg,
            Err(other) => panic!("expected configuration error, got {other}"),
            Ok(set) => panic!("expected configuration error, got {} set", set.kind()),
        }
    }

    #[test]
    fn test_load_tree() {
        let registry = registry(
            r#"
classifiers:
  ROOT:
    template: basic
    labels: [no_question, question]
    chunker: first_user_turns_2
    children:
      question: TYPE
  TYPE:
    template: basic
    labels: [fact_checking, rhetorical, exploratory]
sets:
  tree: { type: tree, root: ROOT }
"#,
        )
        .unwrap();

        let set = registry.load("tree").unwrap();
        let ClassifierSet::Tree(root) = set else {
            panic!("expected tree");
        };

        assert_eq!(root.depth(), 2);
        assert_eq!(root.chunker(), Chunker::FirstUserTurns(2));

        let question = root.schema().parse("question").unwrap();
        let no_question = root.schema().parse("no_question").unwrap();
        assert!(matches!(root.next(&question), Transition::Child(c) if c.name() == "TYPE"));
        assert!(matches!(root.next(&no_question), Transition::Terminal));
    }

    #[test]
    fn test_cycle_rejected() {
        let registry = registry(
            r#"
classifiers:
  A:
    template: basic
    labels: [yes, no]
    children: { yes: B }
  B:
    template: basic
    labels: [yes, no]
    children: { no: A }
sets:
  loop: { type: tree, root: A }
"#,
        )
        .unwrap();

        let msg = config_err(registry.load("loop"));
        assert!(msg.contains("A -> B -> A"), "{msg}");
    }

    #[test]
    fn test_self_loop_rejected() {
        let registry = registry(
            r#"
classifiers:
  A:
    template: basic
    labels: [yes, no]
    children: { yes: A }
sets:
  loop: { type: tree, root: A }
"#,
        )
        .unwrap();

        assert!(config_err(registry.load("loop")).contains("cycle"));
    }

    #[test]
    fn test_shared_subtree_is_not_a_cycle() {
        let registry = registry(
            r#"
classifiers:
  ROOT:
    template: basic
    labels: [left, right]
    children: { left: L, right: R }
  L:
    template: basic
    labels: [yes, no]
    children: { yes: LEAF }
  R:
    template: basic
    labels: [yes, no]
    children: { yes: LEAF }
  LEAF:
    template: basic
    labels: [a, b]
sets:
  diamond: { type: tree, root: ROOT }
"#,
        )
        .unwrap();

        let ClassifierSet::Tree(root) = registry.load("diamond").unwrap() else {
            panic!("expected tree");
        };
        assert_eq!(root.depth(), 3);
    }

    #[test]
    fn test_undefined_references_rejected() {
        let registry = registry(
            r#"
classifiers:
  A:
    template: basic
    labels: [yes, no]
    children: { yes: MISSING }
  B:
    template: nowhere
    labels: [yes, no]
  C:
    template: basic
    labels: [yes, no]
    children: { maybe: A }
  D:
    template: basic
    labels: [yes, no]
    chunker: paragraph
sets:
  missing_child: { type: tree, root: A }
  missing_template: { type: flat, classifiers: [B] }
  bad_label: { type: tree, root: C }
  bad_chunker: { type: flat, classifiers: [D] }
  missing_member: { type: flat, classifiers: [Z] }
"#,
        )
        .unwrap();

        assert!(config_err(registry.load("missing_child")).contains("'MISSING' is not defined"));
        assert!(config_err(registry.load("missing_template")).contains("undefined template"));
        assert!(config_err(registry.load("bad_label")).contains("'maybe'"));
        assert!(config_err(registry.load("bad_chunker")).contains("unknown chunker"));
        assert!(config_err(registry.load("missing_member")).contains("'Z' is not defined"));
        assert!(config_err(registry.load("no_such_set")).contains("not found"));
    }

    #[test]
    fn test_bad_template_fails_at_registry_creation() {
        let yaml = r#"
templates:
  broken: "{classifier_name} {oops} {snippet}"
"#;
        let result = ClassifierRegistry::new(ClassifierConfig::from_yaml(yaml).unwrap());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_gated_validation() {
        let registry = registry(
            r#"
classifiers:
  TOP:
    template: basic
    labels: [yes, no]
    chunker: conversation
  SUB:
    template: basic
    labels: [yes, no]
  OTHER:
    template: basic
    labels: [yes, no]
sets:
  ok:
    type: gated
    top_level: [TOP]
    sub_level: [SUB]
    dependencies: { SUB: [TOP] }
  no_deps:
    type: gated
    top_level: [TOP]
    sub_level: [SUB]
  wrong_dep:
    type: gated
    top_level: [TOP]
    sub_level: [SUB]
    dependencies: { SUB: [OTHER] }
  overlap:
    type: gated
    top_level: [TOP]
    sub_level: [TOP]
    dependencies: { TOP: [TOP] }
"#,
        )
        .unwrap();

        assert!(matches!(registry.load("ok").unwrap(), ClassifierSet::Gated(_)));
        assert!(config_err(registry.load("no_deps")).contains("no dependencies"));
        assert!(config_err(registry.load("wrong_dep")).contains("not in the top level"));
        assert!(config_err(registry.load("overlap")).contains("both tiers"));
    }

    #[test]
    fn test_load_config() {
        let yaml = format!(
            "{BASE}{}",
            r#"
classifiers:
  A:
    template: basic
    labels: [yes, no]
sets:
  flat: { type: flat, classifiers: [A] }
"#
        );

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("classifiers.yaml");
        std::fs::write(&path, yaml).unwrap();

        let registry = ClassifierRegistry::from_file(&path).unwrap();
        assert_eq!(registry.set_names(), vec!["flat"]);
        assert!(matches!(registry.load("flat").unwrap(), ClassifierSet::Flat(_)));

        assert!(matches!(
            ClassifierRegistry::from_file(temp_dir.path().join("missing.yaml")),
            Err(Error::Config(_))
        ));
    }
}
