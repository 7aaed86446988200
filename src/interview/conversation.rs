//! Applies controller effects to one connection's state.
//!
//! `Conversation` owns the turn state, the session and the deferred event queue. It
//! never runs a job itself: when a greeting or turn has to start it hands back a
//! [`Command`], and the caller reports completion through [`Conversation::job_finished`].

use std::collections::VecDeque;

use tracing::{debug, warn};
use uuid::Uuid;

use super::controller::{transition, Effect, Event, TurnState};
use super::session::InterviewSession;

/// Work the connection has to start or carry out.
#[derive(Debug)]
pub enum Command {
    /// Stream the greeting
    Greet,
    /// Process one answer; the session travels with the job and comes back in
    /// `job_finished`
    Turn { session: InterviewSession, audio: Vec<u8> },
    /// A job failed, close the socket with an error code
    Abort,
    /// The peer left, stop the connection
    Release,
}

pub struct Conversation {
    connection_id: Uuid,
    state: TurnState,
    /// `None` while a turn job holds the session
    session: Option<InterviewSession>,
    deferred: VecDeque<Event>,
}

impl Conversation {
    pub fn new(connection_id: Uuid) -> Self {
        Self {
            connection_id,
            state: TurnState::Idle,
            session: Some(InterviewSession::new(connection_id)),
            deferred: VecDeque::new(),
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn session(&self) -> Option<&InterviewSession> {
        self.session.as_ref()
    }

    #[cfg(test)]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Feed one inbound event. Returns the command to carry out, if any.
    pub fn handle(&mut self, event: Event) -> Option<Command> {
        let step = transition(self.state, &event);
        debug!(
            connection_id = %self.connection_id,
            from = self.state.as_str(),
            to = step.next.as_str(),
            "Turn state transition"
        );
        self.state = step.next;

        let mut command = None;
        for effect in step.effects {
            match effect {
                Effect::AppendAudio => {
                    if let (Event::Audio(bytes), Some(session)) = (&event, self.session.as_mut()) {
                        session.append_audio(bytes);
                        debug!(
                            connection_id = %self.connection_id,
                            buffered_bytes = session.buffered_audio_len(),
                            "Audio buffered"
                        );
                    }
                }
                Effect::SendGreeting => command = Some(Command::Greet),
                Effect::RunTurn => command = self.start_turn(),
                Effect::Defer => self.deferred.push_back(event.clone()),
                Effect::DrainDeferred => command = self.drain_deferred(),
                Effect::Ignore => match &event {
                    Event::UnrecognizedText(text) => {
                        warn!(connection_id = %self.connection_id, text = %text, "Unrecognized control text ignored");
                    }
                    _ => debug!(connection_id = %self.connection_id, event = ?event, "Event ignored"),
                },
                Effect::Abort => {
                    self.deferred.clear();
                    command = Some(Command::Abort);
                }
                Effect::Release => {
                    self.deferred.clear();
                    command = Some(Command::Release);
                }
            }
        }
        command
    }

    /// Report the end of the running job. A turn job passes its session back.
    pub fn job_finished(&mut self, session: Option<InterviewSession>, succeeded: bool) -> Option<Command> {
        if let Some(session) = session {
            self.session = Some(session);
        }
        let event = if succeeded { Event::JobFinished } else { Event::JobFailed };
        self.handle(event)
    }

    fn start_turn(&mut self) -> Option<Command> {
        match self.session.take() {
            Some(mut session) => {
                let audio = session.drain_audio();
                Some(Command::Turn { session, audio })
            }
            None => {
                // Unreachable through the controller, which never starts two jobs
                warn!(connection_id = %self.connection_id, "Turn requested while the session is in use");
                None
            }
        }
    }

    /// Replay deferred events until one of them starts a new job.
    fn drain_deferred(&mut self) -> Option<Command> {
        while let Some(event) = self.deferred.pop_front() {
            if let Some(command) = self.handle(event) {
                return Some(command);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::pipeline::tests::{drain, fakes};
    use crate::interview::pipeline::TurnPipeline;
    use crate::interview::protocol::{ControlSignal, ServerMessage};
    use crate::interview::session::{Role, Turn};
    use actix_web::web::Bytes;
    use tokio::sync::mpsc;

    fn audio(bytes: &'static [u8]) -> Event {
        Event::Audio(Bytes::from_static(bytes))
    }

    fn end() -> Event {
        Event::Control(ControlSignal::End)
    }

    fn start() -> Event {
        Event::Control(ControlSignal::Start)
    }

    /// Run every command to completion inline, the way the socket actor would.
    async fn run(
        conversation: &mut Conversation,
        pipeline: &TurnPipeline,
        out: &mpsc::UnboundedSender<ServerMessage>,
        mut command: Option<Command>,
    ) {
        while let Some(next) = command.take() {
            command = match next {
                Command::Greet => {
                    let ok = pipeline.greet(out).await.is_ok();
                    conversation.job_finished(None, ok)
                }
                Command::Turn { mut session, audio } => {
                    let ok = pipeline.run_turn(&mut session, audio, out).await.is_ok();
                    conversation.job_finished(Some(session), ok)
                }
                Command::Abort | Command::Release => None,
            };
        }
    }

    #[tokio::test]
    async fn test_transcriber_receives_concatenated_frames() {
        let fakes = fakes("hello", Some("Tell me more."), vec![vec![0u8; 4]]);
        let pipeline = TurnPipeline::new(fakes.providers.clone(), 1024);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conversation = Conversation::new(Uuid::new_v4());

        for frame in [&b"RIFF"[..], b"abc", b"defg"] {
            assert!(conversation.handle(Event::Audio(Bytes::copy_from_slice(frame))).is_none());
        }
        let command = conversation.handle(end());
        run(&mut conversation, &pipeline, &tx, command).await;

        let received = fakes.transcriber.received.lock().unwrap();
        assert_eq!(received.as_slice(), &[b"RIFFabcdefg".to_vec()]);
        assert_eq!(conversation.state(), TurnState::Accumulating);
        assert_eq!(conversation.session().unwrap().buffered_audio_len(), 0);
    }

    #[tokio::test]
    async fn test_n_turns_produce_alternating_transcript() {
        let fakes = fakes("hello", Some("Tell me more."), vec![vec![0u8; 4]]);
        let pipeline = TurnPipeline::new(fakes.providers.clone(), 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conversation = Conversation::new(Uuid::new_v4());

        for _ in 0..3 {
            conversation.handle(audio(b"\x01\x02"));
            let command = conversation.handle(end());
            run(&mut conversation, &pipeline, &tx, command).await;
        }

        let transcript = conversation.session().unwrap().transcript();
        assert_eq!(transcript.len(), 6);
        for (index, turn) in transcript.iter().enumerate() {
            let expected = if index % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(turn.role, expected);
        }
        let ends = drain(&mut rx).into_iter().filter(|m| *m == ServerMessage::End).count();
        assert_eq!(ends, 3);
    }

    #[tokio::test]
    async fn test_start_sends_greeting_and_leaves_transcript_empty() {
        let fakes = fakes("", Some("unused"), vec![vec![9u8; 100]]);
        let pipeline = TurnPipeline::new(fakes.providers.clone(), 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conversation = Conversation::new(Uuid::new_v4());

        let command = conversation.handle(start());
        run(&mut conversation, &pipeline, &tx, command).await;

        let messages = drain(&mut rx);
        assert!(matches!(messages.first(), Some(ServerMessage::Reply(text)) if text.starts_with("Greetings.")));
        assert!(messages.iter().any(|m| matches!(m, ServerMessage::Audio(_))));
        assert_eq!(messages.last(), Some(&ServerMessage::End));
        assert!(conversation.session().unwrap().transcript().is_empty());
        assert!(fakes.transcriber.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_end_with_empty_buffer_still_runs_turn() {
        let fakes = fakes("", Some("Could you repeat that?"), vec![vec![0u8; 4]]);
        let pipeline = TurnPipeline::new(fakes.providers.clone(), 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conversation = Conversation::new(Uuid::new_v4());

        let command = conversation.handle(end());
        run(&mut conversation, &pipeline, &tx, command).await;

        assert_eq!(fakes.transcriber.received.lock().unwrap().as_slice(), &[Vec::<u8>::new()]);
        assert_eq!(drain(&mut rx)[0], ServerMessage::Transcript(String::new()));
        assert_eq!(conversation.session().unwrap().transcript()[0], Turn::user(""));
    }

    #[test]
    fn test_input_during_a_turn_is_deferred_and_replayed() {
        let mut conversation = Conversation::new(Uuid::new_v4());
        conversation.handle(audio(b"first"));

        let Some(Command::Turn { mut session, audio: first }) = conversation.handle(end()) else {
            panic!("expected a turn");
        };
        assert_eq!(first, b"first".to_vec());
        assert!(conversation.session().is_none());

        // Arrives while the first turn is still running
        assert!(conversation.handle(audio(b"second")).is_none());
        assert!(conversation.handle(end()).is_none());
        assert_eq!(conversation.deferred_len(), 2);

        session.append_turn(Role::User, "first answer");
        session.append_turn(Role::Assistant, "next question");
        let Some(Command::Turn { session, audio: second }) = conversation.job_finished(Some(session), true) else {
            panic!("expected the deferred turn");
        };
        assert_eq!(second, b"second".to_vec());
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(conversation.state(), TurnState::Processing);
        assert_eq!(conversation.deferred_len(), 0);
    }

    #[test]
    fn test_failed_job_aborts_and_drops_deferred_input() {
        let mut conversation = Conversation::new(Uuid::new_v4());
        let Some(Command::Turn { session, .. }) = conversation.handle(end()) else {
            panic!("expected a turn");
        };
        conversation.handle(audio(b"late"));

        assert!(matches!(conversation.job_finished(Some(session), false), Some(Command::Abort)));
        assert_eq!(conversation.state(), TurnState::Closed);
        assert_eq!(conversation.deferred_len(), 0);
        assert!(conversation.handle(audio(b"ignored")).is_none());
    }

    #[test]
    fn test_disconnect_releases() {
        let mut conversation = Conversation::new(Uuid::new_v4());
        conversation.handle(audio(b"partial"));
        assert!(matches!(conversation.handle(Event::Disconnect), Some(Command::Release)));
        assert_eq!(conversation.state(), TurnState::Closed);
    }
}
