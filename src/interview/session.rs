//! # Interview Session State
//!
//! Holds everything one WebSocket connection accumulates: the raw audio bytes of the
//! answer currently being spoken and the ordered conversation transcript.
//!
//! ## Ownership:
//! A session is owned by exactly one connection. While a turn is being processed the
//! session is moved into the turn job and handed back when the job finishes, so there
//! is never more than one writer and no lock is needed.
//!
//! ## Known limitation:
//! Neither the audio buffer nor the transcript is bounded. Long answers grow the buffer
//! and long interviews grow every chat request.

use serde::Serialize;
use uuid::Uuid;

/// Who spoke a turn.
///
/// Serialized as the lowercase role names chat APIs expect (`"user"`, `"assistant"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Per-connection interview state.
#[derive(Debug)]
pub struct InterviewSession {
    /// Identifier used in logs for this connection
    pub connection_id: Uuid,

    /// Audio bytes received since the last processed turn
    audio_buffer: Vec<u8>,

    /// Conversation so far, oldest first
    transcript: Vec<Turn>,
}

impl InterviewSession {
    pub fn new(connection_id: Uuid) -> Self {
        Self {
            connection_id,
            audio_buffer: Vec::new(),
            transcript: Vec::new(),
        }
    }

    /// Append one binary frame to the audio buffer.
    pub fn append_audio(&mut self, bytes: &[u8]) {
        self.audio_buffer.extend_from_slice(bytes);
    }

    /// Take the buffered audio, leaving an empty buffer behind.
    ///
    /// `std::mem::take` swaps in a fresh `Vec`, so the next `append_audio` starts from
    /// zero bytes with no residue from the previous turn.
    pub fn drain_audio(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.audio_buffer)
    }

    /// Append a turn to the transcript, preserving insertion order.
    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) {
        self.transcript.push(Turn { role, content: content.into() });
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    pub fn buffered_audio_len(&self) -> usize {
        self.audio_buffer.len()
    }

    /// Number of completed user/assistant exchanges.
    pub fn completed_turns(&self) -> usize {
        self.transcript
            .iter()
            .filter(|turn| turn.role == Role::Assistant)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_resets_buffer() {
        let mut session = InterviewSession::new(Uuid::new_v4());
        session.append_audio(b"abc");
        session.append_audio(b"def");

        assert_eq!(session.drain_audio(), b"abcdef".to_vec());
        assert_eq!(session.buffered_audio_len(), 0);

        session.append_audio(b"xy");
        assert_eq!(session.drain_audio(), b"xy".to_vec());
    }

    #[test]
    fn test_drain_empty_buffer() {
        let mut session = InterviewSession::new(Uuid::new_v4());
        assert!(session.drain_audio().is_empty());
    }

    #[test]
    fn test_transcript_keeps_insertion_order() {
        let mut session = InterviewSession::new(Uuid::new_v4());
        session.append_turn(Role::User, "hello");
        session.append_turn(Role::Assistant, "Tell me about a recent project.");
        session.append_turn(Role::User, "hello");

        assert_eq!(
            session.transcript(),
            &[
                Turn::user("hello"),
                Turn::assistant("Tell me about a recent project."),
                Turn::user("hello"),
            ]
        );
        assert_eq!(session.completed_turns(), 1);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Turn::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
