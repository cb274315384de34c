//! Core types for convoclass

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label recorded when a classification was attempted and failed
pub const ERROR_LABEL: &str = "error";

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Parse a role name from an input record; unknown roles yield `None`
    pub fn parse(role: &str) -> Option<Self> {
        match role.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    /// Tag used when rendering snippets
    pub fn tag(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker of the message
    pub role: Role,

    /// Message text
    pub content: String,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Render as a context line, e.g. `[USER]: hello`
    pub fn context_line(&self) -> String {
        format!("[{}]: {}", self.role.tag(), self.content)
    }

    /// Render as the marked target line, e.g. `[*USER*]: hello`
    pub fn target_line(&self) -> String {
        format!("[*{}*]: {}", self.role.tag(), self.content)
    }
}

/// An ordered, read-only conversation identified by its hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    hash: String,
    messages: Vec<Message>,
}

impl Conversation {
    /// Create a new conversation
    pub fn new(hash: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            hash: hash.into(),
            messages,
        }
    }

    /// Opaque identifying key
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Messages in conversation order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation has no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of user messages
    pub fn user_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .count()
    }
}

/// A windowed rendering of part of a conversation with one marked target message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    /// Position of the target message within the conversation
    pub index: usize,

    /// Context lines followed by the marked target line
    pub rendered_text: String,

    /// Role of the target message
    pub target_role: Role,
}

impl Snippet {
    /// Render a snippet from preceding context and the target message
    pub fn render(index: usize, context: &[Message], target: &Message) -> Self {
        let mut lines: Vec<String> = context.iter().map(Message::context_line).collect();
        lines.push(target.target_line());

        Self {
            index,
            rendered_text: lines.join("\n"),
            target_role: target.role,
        }
    }
}

/// Message as it appears in an input record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub role: String,

    /// Missing or null content reads as empty text
    #[serde(default)]
    pub content: Option<String>,
}

/// One line of an input corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_hash: String,
    pub conversation: Vec<RawMessage>,
}

impl ConversationRecord {
    /// Convert into a conversation, dropping messages that are neither user nor assistant
    pub fn into_conversation(self) -> Conversation {
        let messages = self
            .conversation
            .into_iter()
            .filter_map(|raw| {
                let role = Role::parse(&raw.role)?;
                Some(Message::new(role, raw.content.unwrap_or_default()))
            })
            .collect();

        Conversation::new(self.conversation_hash, messages)
    }
}

/// Final labels for one conversation
///
/// Map keys serialize in ascending order so identical results always produce
/// identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ClassificationResult {
    /// Snippet index to terminal label
    Tree(BTreeMap<usize, String>),

    /// Classifier name to (snippet index to label)
    Flat(BTreeMap<String, BTreeMap<usize, String>>),
}

impl ClassificationResult {
    /// Total number of labels recorded
    pub fn label_count(&self) -> usize {
        match self {
            Self::Tree(labels) => labels.len(),
            Self::Flat(by_classifier) => by_classifier.values().map(BTreeMap::len).sum(),
        }
    }

    /// Number of labels recording a failed classification
    pub fn error_count(&self) -> usize {
        match self {
            Self::Tree(labels) => labels.values().filter(|l| *l == ERROR_LABEL).count(),
            Self::Flat(by_classifier) => by_classifier
                .values()
                .flat_map(BTreeMap::values)
                .filter(|l| *l == ERROR_LABEL)
                .count(),
        }
    }
}

/// Shape of a `classifications` value before its keys are checked
#[derive(Deserialize)]
#[serde(untagged)]
enum RawLabels {
    Label(String),
    Labels(BTreeMap<String, String>),
}

fn parse_index<E: serde::de::Error>(key: &str) -> std::result::Result<usize, E> {
    key.parse()
        .map_err(|_| E::custom(format!("snippet index '{key}' is not an integer")))
}

// Integer map keys do not survive serde's untagged buffering, so the two
// shapes are told apart by hand.
impl<'de> Deserialize<'de> for ClassificationResult {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, RawLabels>::deserialize(deserializer)?;

        if raw.values().all(|v| matches!(v, RawLabels::Label(_))) {
            let mut labels = BTreeMap::new();
            for (key, value) in raw {
                if let RawLabels::Label(label) = value {
                    labels.insert(parse_index(&key)?, label);
                }
            }
            return Ok(Self::Tree(labels));
        }

        let mut by_classifier = BTreeMap::new();
        for (name, value) in raw {
            match value {
                RawLabels::Labels(map) => {
                    let mut labels = BTreeMap::new();
                    for (key, label) in map {
                        labels.insert(parse_index(&key)?, label);
                    }
                    by_classifier.insert(name, labels);
                }
                RawLabels::Label(_) => {
                    return Err(D::Error::custom(
                        "classifications mix tree labels and classifier maps",
                    ))
                }
            }
        }
        Ok(Self::Flat(by_classifier))
    }
}

/// One line of classification output, also the checkpoint line format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub conversation_hash: String,
    pub classifications: ClassificationResult,
}

impl OutputRecord {
    /// Create a new output record
    pub fn new(conversation_hash: impl Into<String>, classifications: ClassificationResult) -> Self {
        Self {
            conversation_hash: conversation_hash.into(),
            classifications,
        }
    }

    /// Serialize as a single JSON line including the trailing newline
    pub fn to_line(&self) -> crate::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_render_marks_target() {
        let context = vec![Message::user("hi"), Message::assistant("hello")];
        let target = Message::user("how are you?");

        let snippet = Snippet::render(2, &context, &target);

        assert_eq!(snippet.index, 2);
        assert_eq!(snippet.target_role, Role::User);
        assert_eq!(
            snippet.rendered_text,
            "[USER]: hi\n[ASSISTANT]: hello\n[*USER*]: how are you?"
        );
    }

    #[test]
    fn test_record_drops_unknown_roles() {
        let line = r#"{"conversation_hash":"abc","conversation":[
            {"role":"system","content":"be nice"},
            {"role":"user","content":"hi"},
            {"role":"assistant","content":"hello"}
        ],"language":"English"}"#;

        let record: ConversationRecord = serde_json::from_str(line).unwrap();
        let conversation = record.into_conversation();

        assert_eq!(conversation.hash(), "abc");
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.user_turns(), 1);
        assert_eq!(conversation.messages()[0], Message::user("hi"));
    }

    #[test]
    fn test_record_with_null_content_keeps_conversation() {
        let line = r#"{"conversation_hash":"n","conversation":[
            {"role":"user","content":"hi"},
            {"role":"assistant","content":null},
            {"role":"user"}
        ]}"#;

        let record: ConversationRecord = serde_json::from_str(line).unwrap();
        let conversation = record.into_conversation();

        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.messages()[1], Message::assistant(""));
        assert_eq!(conversation.messages()[2], Message::user(""));
    }

    #[test]
    fn test_tree_output_record_format() {
        let mut labels = BTreeMap::new();
        labels.insert(2, "exploratory".to_string());
        labels.insert(0, "fact_checking".to_string());

        let record = OutputRecord::new("h1", ClassificationResult::Tree(labels));
        let line = record.to_line().unwrap();

        assert_eq!(
            line,
            "{\"conversation_hash\":\"h1\",\"classifications\":{\"0\":\"fact_checking\",\"2\":\"exploratory\"}}\n"
        );

        let parsed: OutputRecord = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_flat_output_record_parses_as_flat() {
        let line = r#"{"conversation_hash":"h2","classifications":{"ACTION":{"0":"yes"},"SOCIAL":{"0":"error"}}}"#;
        let parsed: OutputRecord = serde_json::from_str(line).unwrap();

        assert!(matches!(parsed.classifications, ClassificationResult::Flat(_)));
        assert_eq!(parsed.classifications.label_count(), 2);
        assert_eq!(parsed.classifications.error_count(), 1);
    }

    #[test]
    fn test_rejects_non_integer_snippet_index() {
        let line = r#"{"conversation_hash":"h3","classifications":{"first":"yes"}}"#;
        assert!(serde_json::from_str::<OutputRecord>(line).is_err());

        let mixed = r#"{"conversation_hash":"h4","classifications":{"0":"yes","A":{"0":"no"}}}"#;
        assert!(serde_json::from_str::<OutputRecord>(mixed).is_err());
    }
}
