mod loader;
mod metrics;
mod root;
mod routes;
mod server;
mod telemetry;
mod timeout;
mod tls;

pub use loader::load_from_path;
pub use metrics::MetricsConfig;
pub use root::AppConfig;
pub use routes::{HandlerConfig, MatcherSetConfig, RouteConfig};
pub use server::{ListenerWrapperConfig, Protocol, ServerConfig, ServerLogsConfig};
pub use telemetry::{LoggingConfig, TelemetryConfig};
pub use timeout::TimeoutConfig;
pub use tls::{CertKeyPair, ClientAuth, ConnectionPolicy};
