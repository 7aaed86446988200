use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration. API keys are read from the environment and never appear here.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": config.server,
            "transcription": config.transcription,
            "chat": {
                "provider": config.chat.provider,
                "model": config.chat.model,
                "max_tokens": config.chat.max_tokens,
                "temperature": config.chat.temperature,
                "base_url": if config.uses_anthropic() { None } else { Some(&config.chat.base_url) }
            },
            "speech": config.speech,
            "performance": config.performance
        }
    })))
}
