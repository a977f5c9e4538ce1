// ==============================================================================
// irrigation web api
// ==============================================================================
// GET|POST /pump/on?timeout=<1..20>   start a timed run
// GET|POST /pump/off                  stop, always succeeds
//
// bodies are the plain-text, json-looking strings existing scripts and
// dashboards already match on, so they are reproduced exactly.

use axum::{
    extract::{Query, State},
    http::{Method, StatusCode, Uri},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;

use super::{Irrigation, PumpOnError};

const OK_BODY: &str = "{success: true}";

pub fn router(irrigation: Irrigation) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/pump/on", get(pump_on_handler).post(pump_on_handler))
        .route("/pump/off", get(pump_off_handler).post(pump_off_handler))
        .fallback(not_found_handler)
        .layer(CorsLayer::permissive())
        .with_state(irrigation)
}

async fn root_handler() -> &'static str {
    "Watering system!"
}

async fn pump_on_handler(State(irrigation): State<Irrigation>, Query(args): Query<Vec<(String, String)>>) -> String {
    // first `timeout` wins; no number at all counts as 0, which is out of range
    let seconds = args.iter().find(|(name, _)| name == "timeout").map(|(_, value)| leading_int(value)).unwrap_or(0);

    match irrigation.pump_on(seconds).await {
        Ok(()) => OK_BODY.to_string(),
        Err(e) => {
            if let PumpOnError::Hardware(_) = e {
                tracing::error!("[HTTP] pump on failed: {}", e);
            } else {
                tracing::info!(seconds, "[HTTP] pump on rejected: {}", e);
            }
            format!("{{success: false, message: {}}}", e)
        }
    }
}

/// Integer prefix of `s` ("5abc" -> 5, "abc" -> 0), saturating on overflow.
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| acc.saturating_mul(10).saturating_add(i64::from(d - b'0')));
    if negative { -magnitude } else { magnitude }
}

async fn pump_off_handler(State(irrigation): State<Irrigation>) -> &'static str {
    irrigation.pump_off().await;
    OK_BODY
}

async fn not_found_handler(method: Method, uri: Uri, Query(args): Query<Vec<(String, String)>>) -> (StatusCode, String) {
    let mut message = format!("File Not Found\n\nURI: {}\nMethod: {}\nArguments: {}\n", uri.path(), method, args.len());
    for (name, value) in &args {
        message.push_str(&format!(" {}: {}\n", name, value));
    }
    (StatusCode::NOT_FOUND, message)
}
