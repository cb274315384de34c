//! Label schemas and schema-validated labels

use convoclass_core::{Error, Result, ERROR_LABEL};
use std::fmt;

/// A label token known to belong to some classifier's schema
///
/// Only [`LabelSchema`] hands these out, so holding a `Label` means the
/// token was declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(String);

impl Label {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered set of valid label tokens for one classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSchema {
    tokens: Vec<String>,
}

impl LabelSchema {
    /// Build a schema from configured tokens
    ///
    /// Tokens are trimmed and lowercased. The schema must be non-empty, free of
    /// duplicates, and must not declare the reserved `error` token.
    pub fn new<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();

        for token in tokens {
            let token = token.as_ref().trim().to_ascii_lowercase();
            if token.is_empty() {
                return Err(Error::config("label schema contains an empty token"));
            }
            if token == ERROR_LABEL {
                return Err(Error::config(format!(
                    "label '{ERROR_LABEL}' is reserved for failed classifications"
                )));
            }
            if normalized.contains(&token) {
                return Err(Error::config(format!("duplicate label '{token}' in schema")));
            }
            normalized.push(token);
        }

        if normalized.is_empty() {
            return Err(Error::config("label schema is empty"));
        }

        Ok(Self { tokens: normalized })
    }

    /// Declared tokens in configuration order
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Match a token case-insensitively against the schema
    pub fn parse(&self, token: &str) -> Option<Label> {
        let token = token.trim();
        self.tokens
            .iter()
            .find(|t| t.eq_ignore_ascii_case(token))
            .map(|t| Label(t.clone()))
    }

    /// Resolve a configured token, failing with a configuration error
    pub fn label(&self, token: &str) -> Result<Label> {
        self.parse(token).ok_or_else(|| {
            Error::config(format!(
                "label '{}' is not one of [{}]",
                token,
                self.tokens.join(", ")
            ))
        })
    }

    /// True when the schema is exactly `true`/`false`
    pub fn is_boolean(&self) -> bool {
        self.tokens.len() == 2
            && self.tokens.iter().any(|t| t == "true")
            && self.tokens.iter().any(|t| t == "false")
    }
}

impl fmt::Display for LabelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        let schema = LabelSchema::new(["yes", "no", "unsure"]).unwrap();

        assert_eq!(schema.parse("YES").unwrap().as_str(), "yes");
        assert_eq!(schema.parse(" unsure ").unwrap().as_str(), "unsure");
        assert!(schema.parse("maybe").is_none());
    }

    #[test]
    fn test_rejects_bad_schemas() {
        assert!(LabelSchema::new(Vec::<String>::new()).is_err());
        assert!(LabelSchema::new(["yes", "Yes"]).is_err());
        assert!(LabelSchema::new(["yes", "error"]).is_err());
        assert!(LabelSchema::new(["yes", " "]).is_err());
    }

    #[test]
    fn test_boolean_schema() {
        assert!(LabelSchema::new(["true", "false"]).unwrap().is_boolean());
        assert!(!LabelSchema::new(["yes", "no"]).unwrap().is_boolean());
    }
}
