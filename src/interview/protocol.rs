//! # Interview Wire Protocol
//!
//! ## Client → Server:
//! - **Binary frames**: audio bytes, appended to the session buffer as-is
//! - **`__start__`**: send the greeting
//! - **`__end__`**: the answer is complete, process the turn
//!
//! ## Server → Client:
//! - **`REPLY::<text>`**: greeting or interviewer reply
//! - **`TRANSCRIPT::<text>`**: what the server understood
//! - **Binary frames**: synthesized speech, in order
//! - **`__end__`**: everything for this reply has been sent
//!
//! There is no open/close handshake beyond the WebSocket connection itself.

use actix_web::web::Bytes;

pub const START_SIGNAL: &str = "__start__";
pub const END_SIGNAL: &str = "__end__";
pub const REPLY_PREFIX: &str = "REPLY::";
pub const TRANSCRIPT_PREFIX: &str = "TRANSCRIPT::";

/// Control signals a client can send as text frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Start,
    End,
}

impl ControlSignal {
    /// Match a text frame against the literal control signals.
    ///
    /// Only exact matches count; `" __end__"` or `"__END__"` are not signals.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            START_SIGNAL => Some(ControlSignal::Start),
            END_SIGNAL => Some(ControlSignal::End),
            _ => None,
        }
    }
}

/// Everything the server writes to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Greeting or interviewer reply text
    Reply(String),
    /// Recognized user speech
    Transcript(String),
    /// One chunk of synthesized speech
    Audio(Bytes),
    /// End of one server-to-client streaming turn
    End,
}

/// Text or binary payload, ready to be written on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl ServerMessage {
    pub fn into_frame(self) -> Frame {
        match self {
            ServerMessage::Reply(text) => Frame::Text(format!("{}{}", REPLY_PREFIX, text)),
            ServerMessage::Transcript(text) => Frame::Text(format!("{}{}", TRANSCRIPT_PREFIX, text)),
            ServerMessage::Audio(bytes) => Frame::Binary(bytes),
            ServerMessage::End => Frame::Text(END_SIGNAL.to_string()),
        }
    }
}
