//! Telemetry: the global tracing subscriber, the `log` bridge and the
//! per-request trace id carried in task-local storage.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// Header used to accept and echo request correlation ids.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_INBOUND_TRACE_ID_LEN: usize = 128;

/// Trace context containing request correlation ID.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid log filter '{directive}': {source}")]
    Filter {
        directive: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs the global subscriber once per process. `RUST_LOG` overrides the
/// configured level; later calls are no-ops.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    bridge_log_records();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|source| {
            TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
            TelemetryInitError::Filter {
                directive: config.log_level.clone(),
                source,
            }
        })?,
    };

    let formatter = if config.log_format == "pretty" {
        fmt::layer().pretty().boxed()
    } else {
        fmt::layer().json().flatten_event(true).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(formatter)
        .try_init()
        .map_err(|err| {
            TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
            TelemetryInitError::Subscriber(err)
        })
}

/// Routes `log::` records (sqlx, the db module) into tracing. A bridge that
/// is already installed is kept.
fn bridge_log_records() {
    let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    else {
        return;
    };
    if !type_name_of_val(log::logger()).contains("LogTracer") {
        eprintln!("Warning: `log` records will not reach tracing: {}", err);
    }
}

/// Execute `future` within the provided trace context, making it available through task-local
/// storage for the duration of the request.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

/// Get the currently active trace ID, if one has been set for the running task.
pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}

/// Assigns every request a trace id (reusing a sane inbound `x-request-id`),
/// runs the rest of the stack inside that trace context and echoes the id back.
pub async fn trace_id_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_INBOUND_TRACE_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    let context = TraceContext {
        trace_id: trace_id.clone(),
    };
    request.extensions_mut().insert(context.clone());

    let mut response = with_trace_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}
