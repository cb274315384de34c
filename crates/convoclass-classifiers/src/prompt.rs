//! Prompt templates
//!
//! Templates are opaque configuration text with `{placeholder}` fields. They are
//! compiled once when the registry loads, so an unknown placeholder or an
//! unbalanced brace is reported before any request is made.
//!
//! Supported placeholders:
//! - `{classifier_name}`, `{prompt}`, `{prompt_short}`, `{criteria}`, `{labels}`
//! - `{snippet}` (aliases `{snippet_string}`, `{conversation_string}`)
//!
//! `{{` and `}}` render as literal braces.

use convoclass_core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ClassifierName,
    Prompt,
    PromptShort,
    Criteria,
    Labels,
    Snippet,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "classifier_name" => Some(Self::ClassifierName),
            "prompt" => Some(Self::Prompt),
            "prompt_short" => Some(Self::PromptShort),
            "criteria" => Some(Self::Criteria),
            "labels" => Some(Self::Labels),
            "snippet" | "snippet_string" | "conversation_string" => Some(Self::Snippet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// Per-classifier values substituted into a template
#[derive(Debug, Clone, Default)]
pub struct PromptFields {
    pub classifier_name: String,
    pub prompt: String,
    pub prompt_short: String,
    pub criteria: String,
    pub labels: String,
}

/// A compiled prompt template
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    id: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Compile template text
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the text has an unknown placeholder,
    /// an unbalanced brace, or never references the snippet.
    pub fn compile(id: impl Into<String>, text: &str) -> Result<Self> {
        let id = id.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(Error::config(format!(
                            "template '{id}': unclosed placeholder '{{{name}'"
                        )));
                    }
                    let field = Field::parse(&name).ok_or_else(|| {
                        Error::config(format!("template '{id}': unknown placeholder '{{{name}}}'"))
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => {
                    return Err(Error::config(format!(
                        "template '{id}': unmatched '}}' (use '}}}}' for a literal brace)"
                    )));
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if !segments.contains(&Segment::Field(Field::Snippet)) {
            return Err(Error::config(format!(
                "template '{id}' never references {{snippet}}"
            )));
        }

        Ok(Self { id, segments })
    }

    /// Template identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Render the final prompt for one snippet
    pub fn render(&self, fields: &PromptFields, snippet: &str) -> String {
        let mut out = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(Field::ClassifierName) => out.push_str(&fields.classifier_name),
                Segment::Field(Field::Prompt) => out.push_str(&fields.prompt),
                Segment::Field(Field::PromptShort) => out.push_str(&fields.prompt_short),
                Segment::Field(Field::Criteria) => out.push_str(&fields.criteria),
                Segment::Field(Field::Labels) => out.push_str(&fields.labels),
                Segment::Field(Field::Snippet) => out.push_str(snippet),
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> PromptFields {
        PromptFields {
            classifier_name: "IS_QUESTION".to_string(),
            prompt: "Is the user asking a question?".to_string(),
            prompt_short: "question?".to_string(),
            criteria: String::new(),
            labels: "yes, no".to_string(),
        }
    }

    #[test]
    fn test_render() {
        let template = PromptTemplate::compile(
            "q",
            "Task '{classifier_name}': {prompt}\n<snippet>\n{snippet_string}\n</snippet>\nAnswer ({labels})",
        )
        .unwrap();

        let rendered = template.render(&fields(), "[*USER*]: Is Paris in France?");

        assert_eq!(
            rendered,
            "Task 'IS_QUESTION': Is the user asking a question?\n<snippet>\n[*USER*]: Is Paris in France?\n</snippet>\nAnswer (yes, no)"
        );
    }

    #[test]
    fn test_escaped_braces() {
        let template = PromptTemplate::compile("j", "Reply as {{\"label\": ...}} for {snippet}").unwrap();
        assert_eq!(
            template.render(&fields(), "x"),
            "Reply as {\"label\": ...} for x"
        );
    }

    #[test]
    fn test_compile_errors() {
        assert!(PromptTemplate::compile("a", "{snippet} {unknown}").is_err());
        assert!(PromptTemplate::compile("b", "{snippet} {prompt").is_err());
        assert!(PromptTemplate::compile("c", "{snippet} }").is_err());
        assert!(PromptTemplate::compile("d", "no snippet here: {prompt}").is_err());
    }
}
