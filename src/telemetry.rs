use std::time::Instant;

use axum::{extract::MatchedPath, http::Request, middleware::Next, response::Response};
use metrics::{histogram, increment_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Installs the global tracing subscriber. `RUST_LOG` wins over the
/// configured level when set.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = installed {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

pub fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Counts every request and records its latency, labelled by the matched route.
pub async fn track_requests<B>(req: Request<B>, next: Next<B>) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    increment_counter!(
        "homeserve_http_requests_total",
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    );
    histogram!(
        "homeserve_http_request_duration_seconds",
        started.elapsed().as_secs_f64(),
        "method" => method,
        "route" => route
    );
    response
}
