//! # Gantry
//!
//! An HTTP application server built around a fixed request pipeline:
//! lifecycle hooks run at four points around routing and handler dispatch,
//! and every in-flight request carries a pooled, reusable logging handle.
//!
//! ```rust,ignore
//! use gantry::{AppServer, Config};
//!
//! #[tokio::main]
//! async fn main() -> gantry::Result<()> {
//!     let server = AppServer::new(Config::default())?
//!         .get("/users/{id}", |req: gantry::Request| async move {
//!             format!("user {}", req.path_param("id").cloned().unwrap_or_default())
//!         });
//!     server.run().await
//! }
//! ```

mod config;
mod error;
mod handler;
mod health;
mod hooks;
mod logger;
pub mod middleware;
mod request;
mod response;
mod router;
mod server;
mod service;

// Public API
pub use config::{Config, LoggerConfig, ServerConfig};
pub use error::{Result, ServerError};
pub use handler::Handler;
pub use health::HEALTHZ;
pub use hooks::{HookFn, HookRegistry, HookStage, NamedHook};
pub use logger::{LoggerPool, RequestLogger};
pub use request::{Request, REQUEST_ID_HEADER};
pub use response::{IntoResponse, Response};
pub use router::{delete, get, patch, post, put, MethodRouter};
pub use server::{AppServer, ServerHandle};
pub use service::{RouteGroup, Service};
