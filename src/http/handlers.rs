use crate::display::display_state;
use crate::error::MonitorError;
use crate::events::MonitorEvent;
use crate::readiness;
use crate::scheduler::AnalysisSettings;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::server::ServerState;

const DEFAULT_HISTORY_LIMIT: usize = 10;
const MAX_INTERVAL_SECONDS: f64 = 86_400.0;

/// Maps domain errors onto HTTP status codes
pub struct ApiError(pub MonitorError);

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            MonitorError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MonitorError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            e if e.is_upstream() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct PromptUpdate {
    pub text: String,
    #[serde(default)]
    pub updated_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Partial settings change; missing fields keep their current value
#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    pub auto_analyze: Option<bool>,
    pub interval_seconds: Option<f64>,
    pub scoring_model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QaRequest {
    pub question: String,
}

fn settings_json(settings: &AnalysisSettings) -> serde_json::Value {
    json!({
        "auto_analyze": settings.auto_analyze,
        "interval_seconds": settings.interval.as_secs_f64(),
        "scoring_model": settings.scoring_model,
    })
}

/// Handler for MJPEG streaming endpoint
pub async fn mjpeg_stream_handler(State(state): State<ServerState>) -> impl IntoResponse {
    info!("New MJPEG stream client connected");

    let mut frames = state.live_view.subscribe();
    let stream = async_stream::stream! {
        let mut pacing = interval(state.frame_interval);
        pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frames_streamed = 0u64;

        loop {
            pacing.tick().await;
            if frames.changed().await.is_err() {
                debug!("Live view closed, ending MJPEG stream");
                break;
            }

            let Some(frame) = frames.borrow_and_update().clone() else {
                continue;
            };

            let header = format!(
                "--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Frame-ID: {}\r\n\r\n",
                frame.jpeg.len(),
                frame.frame_id,
            );
            frames_streamed += 1;

            yield Ok::<_, axum::Error>(Bytes::from(header));
            yield Ok(Bytes::from(frame.jpeg.as_ref().clone()));
            yield Ok(Bytes::from_static(b"\r\n"));
        }

        info!("MJPEG client finished after {} frames", frames_streamed);
    };

    (
        [
            (header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=FRAME"),
            (header::CACHE_CONTROL, "no-cache, private"),
            (header::PRAGMA, "no-cache"),
        ],
        axum::body::Body::from_stream(stream),
    )
}

/// Readiness of the camera and the model server
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let engine = state.scheduler.engine();
    let report = readiness::run_all(engine.camera(), engine.client()).await;
    let healthy = report.iter().all(|h| h.ok);

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "components": report,
            "subscribers": state.event_bus.subscriber_count(),
        })),
    )
}

pub async fn status_handler(State(state): State<ServerState>) -> ApiResult<impl IntoResponse> {
    let engine = state.scheduler.engine();
    let observation = engine.latest();
    let busy = state.scheduler.is_busy();
    let prompt = engine.prompt_store().load().await?;
    let stats = state.live_view.stats();

    Ok(Json(json!({
        "state": display_state(&observation.alert, busy),
        "alert": observation.alert,
        "result": observation.result,
        "frame": observation.frame.as_deref(),
        "analyzing": busy,
        "prompt": { "version": prompt.version, "updated_at": prompt.updated_at },
        "settings": settings_json(&state.scheduler.settings()),
        "live_view": {
            "frames_rendered": stats.frames_rendered,
            "render_errors": stats.render_errors,
            "slow_loops": stats.slow_loops,
            "runs_started": stats.runs_started,
        },
    })))
}

/// Manual one-off analysis; waits for the verdict
pub async fn analyze_handler(State(state): State<ServerState>) -> ApiResult<impl IntoResponse> {
    let outcome = state.scheduler.analyze_now(None).await?;

    Ok(Json(json!({
        "frame": outcome.frame.as_ref(),
        "result": outcome.result,
        "alert": outcome.alert,
    })))
}

pub async fn get_prompt_handler(State(state): State<ServerState>) -> ApiResult<impl IntoResponse> {
    let prompt = state.scheduler.engine().prompt_store().load().await?;
    Ok(Json(prompt))
}

pub async fn update_prompt_handler(
    State(state): State<ServerState>,
    Json(update): Json<PromptUpdate>,
) -> ApiResult<impl IntoResponse> {
    let prompt = state
        .scheduler
        .engine()
        .prompt_store()
        .update(&update.text, update.updated_by.as_deref())
        .await?;

    state.event_bus.publish(MonitorEvent::PromptUpdated {
        version: prompt.version,
    });
    Ok(Json(prompt))
}

pub async fn prompt_history_handler(
    State(state): State<ServerState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let history = state
        .scheduler
        .engine()
        .prompt_store()
        .history(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await?;
    Ok(Json(history))
}

pub async fn acknowledge_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let alert = state.scheduler.engine().acknowledge();
    if let Some(timestamp) = alert.acknowledged_at {
        state
            .event_bus
            .publish(MonitorEvent::AlertAcknowledged { timestamp });
    }
    Json(alert)
}

pub async fn settings_handler(
    State(state): State<ServerState>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<impl IntoResponse> {
    let mut settings = state.scheduler.settings();

    if let Some(auto_analyze) = update.auto_analyze {
        settings.auto_analyze = auto_analyze;
    }
    if let Some(seconds) = update.interval_seconds {
        if !seconds.is_finite() || !(0.0..=MAX_INTERVAL_SECONDS).contains(&seconds) {
            return Err(MonitorError::validation(format!(
                "Interval must be between 0 and {} seconds, got {}",
                MAX_INTERVAL_SECONDS,
                seconds
            ))
            .into());
        }
        settings.interval = Duration::from_secs_f64(seconds);
    }
    if let Some(model) = update.scoring_model {
        settings.scoring_model = model.trim().to_string();
    }

    let settings = state.scheduler.update_settings(settings)?;
    Ok(Json(settings_json(&settings)))
}

pub async fn qa_handler(
    State(state): State<ServerState>,
    Json(request): Json<QaRequest>,
) -> ApiResult<impl IntoResponse> {
    let frame = state.scheduler.engine().last_frame();
    let result = state.qa.ask(&request.question, frame.as_deref()).await?;

    Ok(Json(json!({
        "question": result.question,
        "answer": result.answer,
        "model": result.model,
        "latency_ms": result.latency_ms,
        "text": result.to_string(),
        "asked_at": Utc::now(),
    })))
}

/// Operator page: live stream plus minimal controls
pub async fn index_handler() -> impl IntoResponse {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Cribwatch</title>
    <style>
        :root { color-scheme: dark; font-family: sans-serif; }
        body { margin: 0; background: #111; color: #eee; display: flex; flex-wrap: wrap; gap: 1rem; padding: 1rem; }
        img.stream { max-width: 70vw; background: #000; }
        section { min-width: 18rem; flex: 1; }
        textarea, input { width: 100%; box-sizing: border-box; }
        pre { white-space: pre-wrap; }
        #state.risk { color: #f44; font-weight: bold; }
    </style>
</head>
<body>
    <img class="stream" src="/stream.mjpg" alt="Live view">
    <section>
        <h2 id="state">Monitoring</h2>
        <p id="message"></p>
        <button onclick="post('/api/analyze')">Analyze now</button>
        <button onclick="post('/api/acknowledge')">Acknowledge</button>
        <label><input type="checkbox" id="auto" style="width:auto" onchange="toggleAuto(this.checked)"> Auto-analyze</label>
        <h3>Risk criteria</h3>
        <textarea id="prompt" rows="4" maxlength="1000"></textarea>
        <button onclick="savePrompt()">Apply</button>
        <p id="prompt-version"></p>
        <h3>Ask about the frame</h3>
        <input id="question" placeholder="What is happening?">
        <button onclick="ask()">Ask</button>
        <pre id="answer"></pre>
        <pre id="result"></pre>
    </section>
    <script>
        async function post(url, body, method) {
            const res = await fetch(url, {
                method: method || 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: body ? JSON.stringify(body) : undefined,
            });
            const data = await res.json();
            if (!res.ok) { alert(data.error); }
            refresh();
            return data;
        }
        function toggleAuto(on) { post('/api/settings', { auto_analyze: on }, 'PUT'); }
        async function savePrompt() {
            await post('/api/prompt', { text: document.getElementById('prompt').value }, 'PUT');
        }
        async function ask() {
            const data = await post('/api/qa', { question: document.getElementById('question').value });
            if (data.text) { document.getElementById('answer').textContent = data.text; }
        }
        async function refresh() {
            const s = await (await fetch('/api/status')).json();
            const state = document.getElementById('state');
            state.textContent = s.state === 'risk' ? 'RISK' : (s.state === 'analyzing' ? 'Analyzing' : 'Monitoring');
            state.className = s.state;
            document.getElementById('message').textContent = s.alert.message;
            document.getElementById('auto').checked = s.settings.auto_analyze;
            document.getElementById('prompt-version').textContent = 'v' + s.prompt.version + ' updated ' + s.prompt.updated_at;
            if (s.result) {
                document.getElementById('result').textContent =
                    'Frame: ' + s.result.frame_id + '\nModel: ' + s.result.model +
                    '\nRisk: ' + s.result.risk + '\nLatency: ' + s.result.latency_ms + ' ms\n' + s.result.explanation;
            }
        }
        fetch('/api/prompt').then(r => r.json()).then(p => { document.getElementById('prompt').value = p.text; });
        refresh();
        setInterval(refresh, 2000);
    </script>
</body>
</html>
"#;
