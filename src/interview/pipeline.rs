//! # Turn Pipeline
//!
//! One interview turn is a strict sequence of stages:
//!
//! 1. **Transcribe** the buffered answer and emit `TRANSCRIPT::<text>`
//! 2. Record the user turn
//! 3. **Generate** the interviewer's reply from persona + transcript
//! 4. Record the assistant turn and emit `REPLY::<text>`
//! 5. **Synthesize** the reply and stream it as binary chunks
//! 6. Emit `__end__`
//!
//! Each stage returns a `Result`, and `?` stops the turn at the first failure. Messages
//! already emitted stay delivered. The greeting runs only the synthesis half.

use std::time::Instant;

use actix_web::web::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use super::persona;
use super::protocol::ServerMessage;
use super::session::{InterviewSession, Role};
use crate::error::ProviderError;
use crate::providers::{AudioStream, Providers};

/// Where a greeting or turn writes messages for the client.
pub trait Outbound: Send + Sync {
    /// Queue one message. `false` means the connection is gone.
    fn send_message(&self, message: ServerMessage) -> bool;
}

impl Outbound for UnboundedSender<ServerMessage> {
    fn send_message(&self, message: ServerMessage) -> bool {
        self.send(message).is_ok()
    }
}

/// Why a greeting or turn did not complete.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A provider failed; the connection must be closed
    Provider(ProviderError),
    /// The socket writer is gone, nobody is listening anymore
    ConnectionClosed,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Provider(err) => write!(f, "{}", err),
            PipelineError::ConnectionClosed => write!(f, "Connection closed before the reply was sent"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ProviderError> for PipelineError {
    fn from(err: ProviderError) -> Self {
        PipelineError::Provider(err)
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// What one completed turn produced, for logs and metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnReport {
    pub transcript: String,
    pub reply: String,
    pub audio_chunks: usize,
    pub audio_bytes: usize,
    pub elapsed_ms: u128,
}

/// Runs greetings and turns against the shared providers.
///
/// Cheap to clone: the providers are behind `Arc`s.
#[derive(Clone)]
pub struct TurnPipeline {
    providers: Providers,
    chunk_size: usize,
    system_prompt: String,
}

impl TurnPipeline {
    pub fn new(providers: Providers, chunk_size: usize) -> Self {
        Self {
            providers,
            chunk_size: chunk_size.max(1),
            system_prompt: persona::system_prompt(),
        }
    }

    /// Stream the fixed greeting: `REPLY::<greeting>`, audio chunks, `__end__`.
    ///
    /// The greeting is not added to the transcript, so the first message the chat model
    /// sees is always the user's.
    pub async fn greet<O: Outbound + ?Sized>(&self, out: &O) -> PipelineResult<TurnReport> {
        let started = Instant::now();

        emit(out, ServerMessage::Reply(persona::GREETING.to_string()))?;
        let (audio_chunks, audio_bytes) = self.speak(persona::GREETING, out).await?;
        emit(out, ServerMessage::End)?;

        Ok(TurnReport {
            reply: persona::GREETING.to_string(),
            audio_chunks,
            audio_bytes,
            elapsed_ms: started.elapsed().as_millis(),
            ..TurnReport::default()
        })
    }

    /// Process one answer. `audio` is the drained session buffer, possibly empty.
    pub async fn run_turn<O: Outbound + ?Sized>(
        &self,
        session: &mut InterviewSession,
        audio: Vec<u8>,
        out: &O,
    ) -> PipelineResult<TurnReport> {
        let started = Instant::now();
        let audio_len = audio.len();

        let transcript = self.providers.transcriber.transcribe(audio).await?;
        debug!(
            connection_id = %session.connection_id,
            audio_bytes = audio_len,
            transcript = %transcript,
            "Answer transcribed"
        );
        emit(out, ServerMessage::Transcript(transcript.clone()))?;
        session.append_turn(Role::User, transcript.clone());

        let reply = self
            .providers
            .generator
            .generate(&self.system_prompt, session.transcript())
            .await?;
        session.append_turn(Role::Assistant, reply.clone());
        emit(out, ServerMessage::Reply(reply.clone()))?;

        let (audio_chunks, audio_bytes) = self.speak(&reply, out).await?;
        emit(out, ServerMessage::End)?;

        let report = TurnReport {
            transcript,
            reply,
            audio_chunks,
            audio_bytes,
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            connection_id = %session.connection_id,
            turn = session.completed_turns(),
            audio_chunks = report.audio_chunks,
            elapsed_ms = report.elapsed_ms as u64,
            "Turn completed"
        );
        Ok(report)
    }

    /// Synthesize `text` and forward it in `chunk_size` frames.
    async fn speak<O: Outbound + ?Sized>(&self, text: &str, out: &O) -> PipelineResult<(usize, usize)> {
        let stream = self.providers.synthesizer.synthesize(text).await?;
        forward_audio(stream, self.chunk_size, out).await
    }
}

/// Re-chunk a provider stream into frames of exactly `chunk_size` bytes, except the
/// last one which may be shorter. Returns `(frames, bytes)` sent.
async fn forward_audio<O: Outbound + ?Sized>(
    mut stream: AudioStream,
    chunk_size: usize,
    out: &O,
) -> PipelineResult<(usize, usize)> {
    let mut pending = BytesMut::with_capacity(chunk_size);
    let mut frames = 0;
    let mut total = 0;

    while let Some(chunk) = stream.next().await {
        let chunk: Bytes = chunk?;
        total += chunk.len();
        pending.extend_from_slice(&chunk);

        while pending.len() >= chunk_size {
            emit(out, ServerMessage::Audio(pending.split_to(chunk_size).freeze()))?;
            frames += 1;
        }
    }

    if !pending.is_empty() {
        emit(out, ServerMessage::Audio(pending.freeze()))?;
        frames += 1;
    }

    Ok((frames, total))
}

fn emit<O: Outbound + ?Sized>(out: &O, message: ServerMessage) -> PipelineResult<()> {
    if out.send_message(message) {
        Ok(())
    } else {
        Err(PipelineError::ConnectionClosed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ProviderResult;
    use crate::interview::session::Turn;
    use crate::providers::{ReplyGenerator, SpeechSynthesizer, Transcriber};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Returns a fixed transcript and records every buffer it was given.
    pub(crate) struct FakeTranscriber {
        pub text: String,
        pub received: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, audio: Vec<u8>) -> ProviderResult<String> {
            self.received.lock().unwrap().push(audio);
            Ok(self.text.clone())
        }

        fn describe(&self) -> String {
            "fake-stt".to_string()
        }
    }

    /// Returns a fixed reply (or an error) and records the transcript it saw.
    pub(crate) struct FakeGenerator {
        pub reply: Option<String>,
        pub seen: Mutex<Vec<Vec<Turn>>>,
    }

    #[async_trait]
    impl ReplyGenerator for FakeGenerator {
        async fn generate(&self, _system: &str, transcript: &[Turn]) -> ProviderResult<String> {
            self.seen.lock().unwrap().push(transcript.to_vec());
            self.reply
                .clone()
                .ok_or_else(|| ProviderError::Generation("HTTP 529 overloaded".to_string()))
        }

        fn describe(&self) -> String {
            "fake-llm".to_string()
        }
    }

    /// Streams the configured chunks for every request.
    pub(crate) struct FakeSynthesizer {
        pub chunks: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynthesizer {
        async fn synthesize(&self, _text: &str) -> ProviderResult<AudioStream> {
            let chunks: Vec<ProviderResult<Bytes>> =
                self.chunks.iter().cloned().map(|c| Ok(Bytes::from(c))).collect();
            Ok(futures_util::stream::iter(chunks).boxed())
        }

        fn describe(&self) -> String {
            "fake-tts".to_string()
        }
    }

    pub(crate) struct Fakes {
        pub transcriber: Arc<FakeTranscriber>,
        pub generator: Arc<FakeGenerator>,
        pub providers: Providers,
    }

    pub(crate) fn fakes(text: &str, reply: Option<&str>, audio: Vec<Vec<u8>>) -> Fakes {
        let transcriber = Arc::new(FakeTranscriber {
            text: text.to_string(),
            received: Mutex::new(Vec::new()),
        });
        let generator = Arc::new(FakeGenerator {
            reply: reply.map(str::to_string),
            seen: Mutex::new(Vec::new()),
        });
        let providers = Providers::new(
            transcriber.clone(),
            generator.clone(),
            Arc::new(FakeSynthesizer { chunks: audio }),
        );
        Fakes { transcriber, generator, providers }
    }

    pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_greeting_sequence() {
        let fakes = fakes("", Some("unused"), vec![vec![7u8; 300]]);
        let pipeline = TurnPipeline::new(fakes.providers, 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = pipeline.greet(&tx).await.unwrap();
        let messages = drain(&mut rx);

        assert_eq!(messages.first(), Some(&ServerMessage::Reply(persona::GREETING.to_string())));
        assert!(matches!(messages[1], ServerMessage::Audio(_)));
        assert_eq!(messages.last(), Some(&ServerMessage::End));
        assert_eq!(report.audio_chunks, 1);
        assert!(fakes.generator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_turn_sequence_and_transcript() {
        let fakes = fakes("hello my name is x", Some("Nice to meet you. What do you do?"), vec![vec![1u8; 10]]);
        let pipeline = TurnPipeline::new(fakes.providers, 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = InterviewSession::new(Uuid::new_v4());

        pipeline.run_turn(&mut session, b"RIFF....".to_vec(), &tx).await.unwrap();
        let messages = drain(&mut rx);

        assert_eq!(
            messages,
            vec![
                ServerMessage::Transcript("hello my name is x".to_string()),
                ServerMessage::Reply("Nice to meet you. What do you do?".to_string()),
                ServerMessage::Audio(Bytes::from(vec![1u8; 10])),
                ServerMessage::End,
            ]
        );
        assert_eq!(
            session.transcript(),
            &[
                Turn::user("hello my name is x"),
                Turn::assistant("Nice to meet you. What do you do?"),
            ]
        );
        // The generator saw the user turn it was asked to answer
        assert_eq!(fakes.generator.seen.lock().unwrap()[0], vec![Turn::user("hello my name is x")]);
    }

    #[tokio::test]
    async fn test_generation_failure_stops_after_transcript() {
        let fakes = fakes("hello", None, vec![vec![1u8; 10]]);
        let pipeline = TurnPipeline::new(fakes.providers, 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = InterviewSession::new(Uuid::new_v4());

        let err = pipeline.run_turn(&mut session, Vec::new(), &tx).await.unwrap_err();
        let messages = drain(&mut rx);

        assert!(matches!(err, PipelineError::Provider(ProviderError::Generation(_))));
        assert_eq!(messages, vec![ServerMessage::Transcript("hello".to_string())]);
        assert_eq!(session.transcript(), &[Turn::user("hello")]);
    }

    #[tokio::test]
    async fn test_audio_is_rechunked() {
        let fakes = fakes("a", Some("b"), vec![vec![1u8; 1500], vec![2u8; 600]]);
        let pipeline = TurnPipeline::new(fakes.providers, 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = InterviewSession::new(Uuid::new_v4());

        let report = pipeline.run_turn(&mut session, Vec::new(), &tx).await.unwrap();
        let sizes: Vec<usize> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Audio(bytes) => Some(bytes.len()),
                _ => None,
            })
            .collect();

        assert_eq!(sizes, vec![1024, 1024, 52]);
        assert_eq!(report.audio_bytes, 2100);
        assert_eq!(report.audio_chunks, 3);
    }

    #[tokio::test]
    async fn test_closed_channel_stops_the_turn() {
        let fakes = fakes("a", Some("b"), vec![vec![1u8; 10]]);
        let pipeline = TurnPipeline::new(fakes.providers, 1024);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut session = InterviewSession::new(Uuid::new_v4());

        let err = pipeline.run_turn(&mut session, Vec::new(), &tx).await.unwrap_err();
        assert_eq!(err, PipelineError::ConnectionClosed);
        assert!(fakes.generator.seen.lock().unwrap().is_empty());
    }
}
