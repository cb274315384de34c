//! Conversation chunkers
//!
//! A chunker turns one conversation into the ordered snippets that are sent to
//! the classification service. Each snippet is keyed by the position of its
//! target message, so a conversation `[user, assistant, user]` chunked per user
//! turn yields snippets `0` and `2`.
//!
//! Every variant yields nothing for a conversation without user messages.

use convoclass_core::{Conversation, Error, Result, Role, Snippet};
use std::fmt;
use std::str::FromStr;

/// Snippet strategy, selected by the `chunker` id of a classifier definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chunker {
    /// `user_turn`: each user message alone
    UserTurn,

    /// `user_turn_with_context`: each user message with every preceding message
    UserTurnWithContext,

    /// `user_turn_window_<N>`: each user message with at most N preceding messages
    UserTurnWindow(usize),

    /// `assistant_turn_with_context`: each assistant reply with every preceding message
    AssistantTurnWithContext,

    /// `conversation`: one snippet for the whole conversation, last message marked
    Conversation,

    /// `first_user_turns_<N>`: the first N user messages with full preceding context
    FirstUserTurns(usize),
}

impl Chunker {
    /// Split a conversation into snippets
    pub fn chunk(&self, conversation: &Conversation) -> Vec<Snippet> {
        let messages = conversation.messages();

        if conversation.user_turns() == 0 {
            return Vec::new();
        }

        match self {
            Self::UserTurn => positions(conversation, Role::User)
                .map(|i| Snippet::render(i, &[], &messages[i]))
                .collect(),

            Self::UserTurnWithContext => positions(conversation, Role::User)
                .map(|i| Snippet::render(i, &messages[..i], &messages[i]))
                .collect(),

            Self::UserTurnWindow(window) => positions(conversation, Role::User)
                .map(|i| Snippet::render(i, &messages[i.saturating_sub(*window)..i], &messages[i]))
                .collect(),

            Self::AssistantTurnWithContext => {
                let first_user = messages
                    .iter()
                    .position(|m| m.role == Role::User)
                    .unwrap_or(messages.len());

                positions(conversation, Role::Assistant)
                    .filter(|i| *i > first_user)
                    .map(|i| Snippet::render(i, &messages[..i], &messages[i]))
                    .collect()
            }

            Self::Conversation => {
                let last = messages.len() - 1;
                vec![Snippet::render(0, &messages[..last], &messages[last])]
            }

            Self::FirstUserTurns(turns) => positions(conversation, Role::User)
                .take(*turns)
                .map(|i| Snippet::render(i, &messages[..i], &messages[i]))
                .collect(),
        }
    }

    /// Configuration id of this chunker
    pub fn id(&self) -> String {
        self.to_string()
    }
}

fn positions(conversation: &Conversation, role: Role) -> impl Iterator<Item = usize> + '_ {
    conversation
        .messages()
        .iter()
        .enumerate()
        .filter(move |(_, m)| m.role == role)
        .map(|(i, _)| i)
}

impl fmt::Display for Chunker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserTurn => f.write_str("user_turn"),
            Self::UserTurnWithContext => f.write_str("user_turn_with_context"),
            Self::UserTurnWindow(n) => write!(f, "user_turn_window_{n}"),
            Self::AssistantTurnWithContext => f.write_str("assistant_turn_with_context"),
            Self::Conversation => f.write_str("conversation"),
            Self::FirstUserTurns(n) => write!(f, "first_user_turns_{n}"),
        }
    }
}

impl FromStr for Chunker {
    type Err = Error;

    fn from_str(id: &str) -> Result<Self> {
        let parse_count = |suffix: &str| -> Result<usize> {
            match suffix.parse::<usize>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(Error::config(format!(
                    "chunker '{id}' needs a positive count suffix"
                ))),
            }
        };

        match id {
            "user_turn" => Ok(Self::UserTurn),
            "user_turn_with_context" => Ok(Self::UserTurnWithContext),
            "assistant_turn_with_context" => Ok(Self::AssistantTurnWithContext),
            "conversation" => Ok(Self::Conversation),
            _ => {
                if let Some(n) = id.strip_prefix("user_turn_window_") {
                    Ok(Self::UserTurnWindow(parse_count(n)?))
                } else if let Some(n) = id.strip_prefix("first_user_turns_") {
                    Ok(Self::FirstUserTurns(parse_count(n)?))
                } else {
                    Err(Error::config(format!("unknown chunker '{id}'")))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoclass_core::Message;

    fn alternating(n: usize) -> Conversation {
        let messages = (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect();
        Conversation::new("conv", messages)
    }

    #[test]
    fn test_user_turn_with_context_grows_context() {
        let conversation = alternating(5);
        let snippets = Chunker::UserTurnWithContext.chunk(&conversation);

        assert_eq!(snippets.len(), conversation.user_turns());
        assert_eq!(
            snippets.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 2, 4]
        );

        let context_lines: Vec<usize> = snippets
            .iter()
            .map(|s| s.rendered_text.lines().count() - 1)
            .collect();
        assert_eq!(context_lines, vec![0, 2, 4]);
        assert!(context_lines.windows(2).all(|w| w[0] < w[1]));

        for snippet in &snippets {
            assert_eq!(snippet.target_role, Role::User);
            assert!(snippet.rendered_text.lines().last().unwrap().starts_with("[*USER*]"));
        }
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let conversation = alternating(7);
        for chunker in [
            Chunker::UserTurn,
            Chunker::UserTurnWithContext,
            Chunker::UserTurnWindow(2),
            Chunker::AssistantTurnWithContext,
            Chunker::Conversation,
            Chunker::FirstUserTurns(2),
        ] {
            assert_eq!(chunker.chunk(&conversation), chunker.chunk(&conversation));
        }
    }

    #[test]
    fn test_no_user_messages_yields_nothing() {
        let conversation = Conversation::new("c", vec![Message::assistant("hello")]);
        let empty = Conversation::new("e", Vec::new());

        for chunker in [
            Chunker::UserTurn,
            Chunker::Conversation,
            Chunker::AssistantTurnWithContext,
            Chunker::FirstUserTurns(2),
        ] {
            assert!(chunker.chunk(&conversation).is_empty());
            assert!(chunker.chunk(&empty).is_empty());
        }
    }

    #[test]
    fn test_window_limits_context() {
        let snippets = Chunker::UserTurnWindow(1).chunk(&alternating(5));
        assert_eq!(snippets[2].rendered_text, "[ASSISTANT]: answer 3\n[*USER*]: question 4");
    }

    #[test]
    fn test_first_user_turns() {
        let snippets = Chunker::FirstUserTurns(2).chunk(&alternating(7));
        assert_eq!(
            snippets.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 2]
        );
    }

    #[test]
    fn test_assistant_turns_follow_user() {
        let conversation = Conversation::new(
            "c",
            vec![
                Message::assistant("welcome"),
                Message::user("hi"),
                Message::assistant("hello"),
            ],
        );
        let snippets = Chunker::AssistantTurnWithContext.chunk(&conversation);

        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].index, 2);
        assert_eq!(snippets[0].target_role, Role::Assistant);
    }

    #[test]
    fn test_whole_conversation_single_snippet() {
        let snippets = Chunker::Conversation.chunk(&alternating(3));
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].index, 0);
        assert_eq!(
            snippets[0].rendered_text,
            "[USER]: question 0\n[ASSISTANT]: answer 1\n[*USER*]: question 2"
        );
    }

    #[test]
    fn test_parse_ids() {
        assert_eq!("user_turn".parse::<Chunker>().unwrap(), Chunker::UserTurn);
        assert_eq!(
            "user_turn_window_3".parse::<Chunker>().unwrap(),
            Chunker::UserTurnWindow(3)
        );
        assert_eq!(
            "first_user_turns_2".parse::<Chunker>().unwrap(),
            Chunker::FirstUserTurns(2)
        );
        assert!("user_turn_window_0".parse::<Chunker>().is_err());
        assert!("sentence".parse::<Chunker>().is_err());

        for chunker in [Chunker::UserTurnWindow(4), Chunker::Conversation] {
            assert_eq!(chunker.id().parse::<Chunker>().unwrap(), chunker);
        }
    }
}
