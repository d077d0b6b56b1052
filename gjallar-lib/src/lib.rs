#![forbid(unsafe_code)]

pub mod addr;
pub mod app;
pub mod autohttps;
pub mod config;
pub mod error;
mod h3;
pub mod handler;
pub mod listener;
pub mod metrics;
pub mod registry;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod telemetry;
pub mod tls;

pub use addr::{ListenAddr, Network};
pub use app::App;
pub use config::{load_from_path, AppConfig, Protocol, ServerConfig};
pub use error::{AppError, Result};
pub use handler::{Handler, HandlerError, RequestContext};
pub use registry::ListenerRegistry;
pub use server::Server;
pub use tls::{CertManager, NoopCertManager};
