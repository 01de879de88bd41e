//! # Observability Module
//!
//! Observability for the Knot node:
//!
//! - **Structured Logging**: pretty or JSON logs through `tracing-subscriber`
//! - **Prometheus Metrics**: HTTP requests and git fetch/push outcomes
//! - **Request Tracing**: request IDs propagated into every log line
//!
//! ## Usage
//!
//! ```rust,ignore
//! use axum::Router;
//! use knot_node::observability::{init_logging, request_id_middleware, LogFormat};
//!
//! init_logging("info", LogFormat::Json);
//!
//! let app: Router<()> = Router::new().layer(axum::middleware::from_fn(request_id_middleware));
//! ```

mod logging;
mod metrics;
pub mod middleware;

pub use logging::{init_logging, LogFormat};
pub use metrics::{MetricsState, METRICS};
pub use middleware::{
    metrics_handler, metrics_middleware, request_id_middleware, RequestId, REQUEST_ID_HEADER,
};
