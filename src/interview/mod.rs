//! # Interview Domain
//!
//! Everything that happens between a client connecting and disconnecting, independent
//! of the socket itself:
//!
//! - **session**: per-connection audio buffer and transcript
//! - **protocol**: control signals and outbound message framing
//! - **persona**: fixed interviewer instructions and greeting
//! - **controller**: the pure turn state machine
//! - **conversation**: applies controller effects, defers input during jobs
//! - **pipeline**: transcribe → generate → synthesize for one turn

pub mod controller;
pub mod conversation;
pub mod persona;
pub mod pipeline;
pub mod protocol;
pub mod session;

pub use conversation::{Command, Conversation};
pub use pipeline::{Outbound, PipelineError, PipelineResult, TurnPipeline, TurnReport};
pub use protocol::ServerMessage;
