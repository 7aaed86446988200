//! # Interview Voice Backend - Main Application Entry Point
//!
//! An Actix-web server that runs spoken job interviews over a WebSocket: the client
//! streams recorded audio, the server transcribes it with a local Whisper model, asks a
//! chat model for the interviewer's next line and streams synthesized speech back.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the server, the provider calls and the actors are all asynchronous
//! - **trait objects**: speech and language providers sit behind `Arc<dyn Trait>`
//! - **actors**: one `actix` actor per WebSocket connection owns that interview's state
//! - **Result<T, E>**: startup errors propagate to `main` with `?`
//!
//! ## Application Architecture:
//! - **config**: configuration (defaults, optional `config.toml`, environment variables)
//! - **state**: shared metrics and the interview capacity counter
//! - **health**: health and metrics endpoints
//! - **middleware**: per-request metrics
//! - **handlers**: configuration endpoint
//! - **error**: HTTP and provider error types
//! - **device**: compute device selection for the Whisper model
//! - **audio**: decoding, resampling and voice activity detection
//! - **transcription**: the Whisper speech-to-text engine
//! - **providers**: speech-to-text, reply generation and speech synthesis adapters
//! - **interview**: turn state machine, session data and the per-turn pipeline
//! - **websocket**: the `/ws/interview` actor

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod interview;
mod middleware;
mod providers;
mod state;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::{AppConfig, Credentials};
use interview::TurnPipeline;
use providers::Providers;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Startup order:
/// 1. **Environment**: `.env`, then tracing
/// 2. **Configuration**: load and validate, read API keys
/// 3. **Providers**: pick the compute device, load Whisper, build the HTTP clients
/// 4. **Server**: routes, CORS and middleware
/// 5. **Shutdown**: stop gracefully on a signal
///
/// A missing API key or an unloadable model ends the process before the socket is bound.
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;
    let credentials = Credentials::from_env();

    info!("Starting interview-voice-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        chat_provider = %config.chat.provider,
        chat_model = %config.chat.model,
        whisper_model = %config.transcription.whisper_model,
        voice = %config.speech.voice,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    let device = device::select_device(&config.transcription.device);
    info!(device = device::describe(&device), "Compute device selected");

    let providers = Providers::from_config(&config, &credentials, device).await?;
    let pipeline = TurnPipeline::new(providers.clone(), config.speech.chunk_size);

    let app_state = web::Data::new(AppState::new(config.clone()));
    let providers = web::Data::new(providers);
    let pipeline = web::Data::new(pipeline);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .app_data(providers.clone())
            .app_data(pipeline.clone())
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(Logger::default())
            .route("/ws/interview", web::get().to(websocket::interview_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Structured logging to stdout.
///
/// `RUST_LOG` controls the filter; without it the crate logs at debug and actix at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_voice_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise [`SHUTDOWN_SIGNAL`].
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll [`SHUTDOWN_SIGNAL`] every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
