//! # Turn Controller
//!
//! Decides what a connection does with each inbound event. The controller is a pure
//! function of `(state, event)`; the WebSocket actor executes the returned effects.
//!
//! ## State Lifecycle:
//! 1. **Idle**: connection open, nothing received yet
//! 2. **Accumulating**: collecting audio for the current answer
//! 3. **Greeting**: the greeting is being synthesized and streamed
//! 4. **Processing**: transcribe → generate → synthesize for one answer
//! 5. **Closed**: terminal, entered on disconnect or provider failure
//!
//! While a job (greeting or turn) runs, inbound events are deferred and replayed in
//! arrival order once it finishes. This keeps each connection strictly sequential:
//! audio that arrives mid-turn belongs to the next answer, and an early `__end__`
//! waits for the current reply to finish.

use actix_web::web::Bytes;

use super::protocol::ControlSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Accumulating,
    Greeting,
    Processing,
    Closed,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Accumulating => "accumulating",
            TurnState::Greeting => "greeting",
            TurnState::Processing => "processing",
            TurnState::Closed => "closed",
        }
    }
}

/// Inputs to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Binary frame from the client
    Audio(Bytes),
    /// `__start__` or `__end__`
    Control(ControlSignal),
    /// Any other text frame
    UnrecognizedText(String),
    /// The running greeting or turn job completed
    JobFinished,
    /// The running job failed with a provider error
    JobFailed,
    /// Either side closed the connection
    Disconnect,
}

/// Side effects the connection must carry out, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Append the event's audio bytes to the session buffer
    AppendAudio,
    /// Start the greeting job
    SendGreeting,
    /// Drain the buffer and start the turn job
    RunTurn,
    /// Queue the event until the running job completes
    Defer,
    /// Replay deferred events
    DrainDeferred,
    /// Log and drop the event
    Ignore,
    /// Close the connection after a failed job
    Abort,
    /// Release the session after a disconnect
    Release,
}

/// Result of one controller step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: TurnState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: TurnState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }
}

/// Compute the next state and the effects for one event.
pub fn transition(state: TurnState, event: &Event) -> Transition {
    use TurnState::*;

    match (state, event) {
        (Closed, _) => Transition::to(Closed, vec![]),
        (_, Event::Disconnect) => Transition::to(Closed, vec![Effect::Release]),

        (Idle | Accumulating, Event::Audio(_)) => Transition::to(Accumulating, vec![Effect::AppendAudio]),
        // The buffer is left alone; audio sent before __start__ stays for the first answer
        (Idle | Accumulating, Event::Control(ControlSignal::Start)) => {
            Transition::to(Greeting, vec![Effect::SendGreeting])
        }
        (Idle | Accumulating, Event::Control(ControlSignal::End)) => {
            Transition::to(Processing, vec![Effect::RunTurn])
        }
        (Idle | Accumulating, Event::UnrecognizedText(_)) => Transition::to(state, vec![Effect::Ignore]),
        // No job is running, a stray completion is meaningless
        (Idle | Accumulating, Event::JobFinished | Event::JobFailed) => {
            Transition::to(state, vec![Effect::Ignore])
        }

        (Greeting | Processing, Event::JobFinished) => {
            Transition::to(Accumulating, vec![Effect::DrainDeferred])
        }
        (Greeting | Processing, Event::JobFailed) => Transition::to(Closed, vec![Effect::Abort]),
        (Greeting | Processing, _) => Transition::to(state, vec![Effect::Defer]),
    }
}
