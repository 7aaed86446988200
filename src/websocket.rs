//! # Interview WebSocket Handler
//!
//! One actor per connection on `/ws/interview`. The actor owns the connection's
//! [`Conversation`] and turns socket frames into controller events; greetings and turns
//! run as futures spawned on the actor's context.
//!
//! ## Message flow:
//! ```text
//! socket frame ──► StreamHandler<ws::Message> ──► Conversation::handle ──► Command
//!                                                                           │
//!                     spawned job (greet / run_turn) ◄──────────────────────┘
//!                              │ Outgoing::Message(..) … Outgoing::JobDone
//!                              ▼
//!                  StreamHandler<Outgoing> ──► ctx.text / ctx.binary
//! ```
//!
//! Job output and job completion travel through the same channel, so every frame a
//! job produced is written before its completion is handled. A failed job therefore
//! closes the socket only after the messages it already emitted.

use crate::error::AppError;
use crate::interview::controller::Event;
use crate::interview::protocol::{ControlSignal, Frame};
use crate::interview::session::InterviewSession;
use crate::interview::{
    Command, Conversation, Outbound, PipelineError, PipelineResult, ServerMessage, TurnPipeline, TurnReport,
};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often a ping is sent.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A client silent for this long is considered gone.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Greeting,
    Turn,
}

/// Result of a greeting or turn job, handed back to the actor.
#[derive(Debug)]
struct JobOutcome {
    kind: JobKind,
    /// The session a turn job borrowed; `None` for greetings
    session: Option<InterviewSession>,
    result: PipelineResult<TurnReport>,
}

/// Items on the connection's outbound channel.
#[derive(Debug)]
enum Outgoing {
    Message(ServerMessage),
    JobDone(JobOutcome),
}

/// Sending half of the outbound channel, given to every job.
#[derive(Clone)]
struct ConnectionSink(mpsc::UnboundedSender<Outgoing>);

impl ConnectionSink {
    fn finish(&self, outcome: JobOutcome) {
        // Fails only when the actor is gone, and then nobody needs the outcome
        let _ = self.0.send(Outgoing::JobDone(outcome));
    }
}

impl Outbound for ConnectionSink {
    fn send_message(&self, message: ServerMessage) -> bool {
        self.0.send(Outgoing::Message(message)).is_ok()
    }
}

/// Map a text frame to a controller event.
fn text_event(text: &str) -> Event {
    match ControlSignal::parse(text) {
        Some(signal) => Event::Control(signal),
        None => Event::UnrecognizedText(text.to_string()),
    }
}

/// WebSocket actor for one interview.
pub struct InterviewWebSocket {
    connection_id: Uuid,
    conversation: Conversation,
    pipeline: TurnPipeline,
    app_state: web::Data<AppState>,
    sink: ConnectionSink,
    /// Taken in `started` and registered as a stream on the context
    outgoing: Option<mpsc::UnboundedReceiver<Outgoing>>,
    last_heartbeat: Instant,
    connected_at: Instant,
}

impl InterviewWebSocket {
    pub fn new(connection_id: Uuid, pipeline: TurnPipeline, app_state: web::Data<AppState>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            connection_id,
            conversation: Conversation::new(connection_id),
            pipeline,
            app_state,
            sink: ConnectionSink(tx),
            outgoing: Some(rx),
            last_heartbeat: Instant::now(),
            connected_at: Instant::now(),
        }
    }

    fn dispatch(&mut self, event: Event, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(command) = self.conversation.handle(event) {
            self.execute(command, ctx);
        }
    }

    fn execute(&mut self, command: Command, ctx: &mut ws::WebsocketContext<Self>) {
        match command {
            Command::Greet => {
                debug!(connection_id = %self.connection_id, "Starting greeting");
                let pipeline = self.pipeline.clone();
                let sink = self.sink.clone();
                let job = async move {
                    let result = pipeline.greet(&sink).await;
                    sink.finish(JobOutcome { kind: JobKind::Greeting, session: None, result });
                };
                ctx.spawn(job.into_actor(self));
            }
            Command::Turn { mut session, audio } => {
                debug!(connection_id = %self.connection_id, audio_bytes = audio.len(), "Starting turn");
                let pipeline = self.pipeline.clone();
                let sink = self.sink.clone();
                let job = async move {
                    let result = pipeline.run_turn(&mut session, audio, &sink).await;
                    sink.finish(JobOutcome { kind: JobKind::Turn, session: Some(session), result });
                };
                ctx.spawn(job.into_actor(self));
            }
            Command::Abort => {
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Error,
                    description: Some("interview provider failure".to_string()),
                }));
                ctx.stop();
            }
            Command::Release => ctx.stop(),
        }
    }

    fn job_finished(&mut self, outcome: JobOutcome, ctx: &mut ws::WebsocketContext<Self>) {
        let succeeded = match &outcome.result {
            Ok(report) => {
                match outcome.kind {
                    JobKind::Greeting => self.app_state.record_greeting_sent(),
                    JobKind::Turn => self.app_state.record_turn_completed(),
                }
                debug!(
                    connection_id = %self.connection_id,
                    job = ?outcome.kind,
                    audio_bytes = report.audio_bytes,
                    elapsed_ms = report.elapsed_ms as u64,
                    "Job finished"
                );
                true
            }
            Err(PipelineError::Provider(err)) => {
                self.app_state.record_turn_failed();
                error!(
                    connection_id = %self.connection_id,
                    job = ?outcome.kind,
                    stage = err.stage(),
                    error = %err,
                    "Provider failed, closing interview"
                );
                false
            }
            Err(PipelineError::ConnectionClosed) => {
                debug!(connection_id = %self.connection_id, "Job stopped, connection already closed");
                false
            }
        };

        if let Some(command) = self.conversation.job_finished(outcome.session, succeeded) {
            self.execute(command, ctx);
        }
    }

    fn write(&self, message: ServerMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match message.into_frame() {
            Frame::Text(text) => ctx.text(text),
            Frame::Binary(bytes) => ctx.binary(bytes),
        }
    }
}

impl Actor for InterviewWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "Interview started");

        if let Some(rx) = self.outgoing.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = %act.connection_id, "Heartbeat timeout, closing interview");
                act.dispatch(Event::Disconnect, ctx);
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.app_state.close_interview();
        info!(
            connection_id = %self.connection_id,
            state = self.conversation.state().as_str(),
            completed_turns = self.conversation.session().map(|s| s.completed_turns()),
            duration_secs = self.connected_at.elapsed().as_secs(),
            "Interview ended"
        );
    }
}

/// Frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for InterviewWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Binary(bytes)) => self.dispatch(Event::Audio(bytes), ctx),
            Ok(ws::Message::Text(text)) => self.dispatch(text_event(&text), ctx),
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, reason = ?reason, "Client closed interview");
                ctx.close(reason);
                self.dispatch(Event::Disconnect, ctx);
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.connection_id, "Fragmented frames are not supported, ignoring");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, error = %err, "WebSocket protocol error");
                self.dispatch(Event::Disconnect, ctx);
            }
        }
    }
}

/// Output and completions of spawned jobs.
impl StreamHandler<Outgoing> for InterviewWebSocket {
    fn handle(&mut self, item: Outgoing, ctx: &mut Self::Context) {
        match item {
            Outgoing::Message(message) => self.write(message, ctx),
            Outgoing::JobDone(outcome) => self.job_finished(outcome, ctx),
        }
    }

    // The actor keeps a sender, so the channel only ends with the actor itself
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

/// WebSocket endpoint handler for `GET /ws/interview`.
///
/// ## HTTP to WebSocket Upgrade:
/// A slot is reserved before the handshake. If the server is full the upgrade is
/// refused with 503; if the handshake itself fails the slot is given back here,
/// otherwise the actor releases it when it stops.
pub async fn interview_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    pipeline: web::Data<TurnPipeline>,
) -> Result<HttpResponse, actix_web::Error> {
    if !app_state.try_open_interview() {
        let limit = app_state.config().performance.max_concurrent_sessions;
        warn!(limit, "Interview refused, server at capacity");
        return Err(AppError::CapacityExceeded(format!(
            "Maximum concurrent interviews ({}) reached",
            limit
        ))
        .into());
    }

    let connection_id = Uuid::new_v4();
    info!(
        connection_id = %connection_id,
        peer = ?req.connection_info().peer_addr(),
        "New interview connection request"
    );

    let actor = InterviewWebSocket::new(connection_id, pipeline.get_ref().clone(), app_state.clone());
    ws::start(actor, &req, stream).map_err(|err| {
        app_state.close_interview();
        err
    })
}
