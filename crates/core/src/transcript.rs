//! Running transcript reconstruction from streamed partial text.
//!
//! The remote sends transcription deltas for the user's speech and for the
//! agent's speech. Depending on the backend they are either cumulative
//! ("Hel", "Hello", "Hello wor") or incremental ("Hel", "lo", " wor"). The
//! mirror folds both kinds into one utterance per role and turn.
//!
//! The join rule in [`glue`] is a best-effort heuristic, not a canonical one.

use serde::{Deserialize, Serialize};

/// Who is speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRole {
    User,
    Agent,
}

/// One streamed piece of transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptFragment {
    pub role: SpeakerRole,
    pub text: String,
    pub is_turn_complete: bool,
}

impl TranscriptFragment {
    pub fn partial(role: SpeakerRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            is_turn_complete: false,
        }
    }

    pub fn complete(role: SpeakerRole) -> Self {
        Self {
            role,
            text: String::new(),
            is_turn_complete: true,
        }
    }
}

/// A finalized turn for one speaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub role: SpeakerRole,
    pub text: String,
}

/// Per-role accumulation of the turn currently in flight.
#[derive(Debug, Default)]
pub struct TranscriptMirror {
    user: String,
    agent: String,
}

impl TranscriptMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a fragment in arrival order.
    ///
    /// Returns the finalized utterance when the fragment completes a
    /// non-empty turn.
    pub fn apply(&mut self, fragment: TranscriptFragment) -> Option<Utterance> {
        let buffer = self.buffer_mut(fragment.role);
        if !fragment.text.is_empty() {
            if buffer.is_empty() || fragment.text.starts_with(buffer.as_str()) {
                *buffer = fragment.text;
            } else {
                glue(buffer, &fragment.text);
            }
        }
        if !fragment.is_turn_complete {
            return None;
        }
        let text = std::mem::take(buffer).trim().to_string();
        (!text.is_empty()).then_some(Utterance {
            role: fragment.role,
            text,
        })
    }

    /// The running text for a role's turn in flight.
    pub fn current(&self, role: SpeakerRole) -> &str {
        match role {
            SpeakerRole::User => &self.user,
            SpeakerRole::Agent => &self.agent,
        }
    }

    /// Drops both in-flight turns without emitting them.
    pub fn clear(&mut self) {
        self.user.clear();
        self.agent.clear();
    }

    fn buffer_mut(&mut self, role: SpeakerRole) -> &mut String {
        match role {
            SpeakerRole::User => &mut self.user,
            SpeakerRole::Agent => &mut self.agent,
        }
    }
}

/// Appends `next` to `buffer`, inserting a single space only where the
/// boundary looks like a word break.
fn glue(buffer: &mut String, next: &str) {
    let (Some(last), Some(first)) = (buffer.chars().last(), next.chars().next()) else {
        buffer.push_str(next);
        return;
    };
    let joined = last.is_whitespace()
        || first.is_whitespace()
        || (last.is_alphanumeric() && first.is_alphanumeric())
        || matches!(first, '.' | ',' | '!' | '?' | ';' | ':' | ')' | '\'');
    if !joined {
        buffer.push(' ');
    }
    buffer.push_str(next);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(mirror: &mut TranscriptMirror, role: SpeakerRole, parts: &[&str]) {
        for part in parts {
            assert!(mirror.apply(TranscriptFragment::partial(role, *part)).is_none());
        }
    }

    #[test]
    fn test_cumulative_fragments_collapse_to_last() {
        let mut mirror = TranscriptMirror::new();
        feed(
            &mut mirror,
            SpeakerRole::Agent,
            &["Hel", "Hello", "Hello wor", "Hello world"],
        );
        let done = mirror.apply(TranscriptFragment::complete(SpeakerRole::Agent));
        assert_eq!(
            done,
            Some(Utterance {
                role: SpeakerRole::Agent,
                text: "Hello world".into()
            })
        );
        assert_eq!(mirror.current(SpeakerRole::Agent), "");
    }

    #[test]
    fn test_incremental_fragments_are_glued() {
        let mut mirror = TranscriptMirror::new();
        feed(&mut mirror, SpeakerRole::User, &["Hel", "lo", " there", ",", "friend"]);
        assert_eq!(mirror.current(SpeakerRole::User), "Hello there, friend");
    }

    #[test]
    fn test_space_inserted_between_word_and_symbol_boundary() {
        let mut mirror = TranscriptMirror::new();
        feed(&mut mirror, SpeakerRole::User, &["It costs", "$5"]);
        assert_eq!(mirror.current(SpeakerRole::User), "It costs $5");
    }

    #[test]
    fn test_roles_accumulate_independently() {
        let mut mirror = TranscriptMirror::new();
        feed(&mut mirror, SpeakerRole::User, &["What time"]);
        feed(&mut mirror, SpeakerRole::Agent, &["It is"]);
        feed(&mut mirror, SpeakerRole::User, &[" is it?"]);

        let user = mirror.apply(TranscriptFragment::complete(SpeakerRole::User));
        assert_eq!(user.map(|u| u.text).as_deref(), Some("What time is it?"));
        assert_eq!(mirror.current(SpeakerRole::Agent), "It is");
    }

    #[test]
    fn test_completing_empty_turn_emits_nothing() {
        let mut mirror = TranscriptMirror::new();
        assert!(mirror.apply(TranscriptFragment::complete(SpeakerRole::User)).is_none());
    }

    #[test]
    fn test_completion_fragment_with_text_is_applied_first() {
        let mut mirror = TranscriptMirror::new();
        feed(&mut mirror, SpeakerRole::Agent, &["Good"]);
        let done = mirror.apply(TranscriptFragment {
            role: SpeakerRole::Agent,
            text: "bye".into(),
            is_turn_complete: true,
        });
        assert_eq!(done.map(|u| u.text).as_deref(), Some("Goodbye"));
    }
}
