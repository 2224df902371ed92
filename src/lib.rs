//! Loopback bridge between a sandboxed web front-end and native desktop
//! capabilities.
//!
//! [`Gateway::spawn`] binds `127.0.0.1`, serves the front-end's static files,
//! answers authenticated commands on `POST /@vueRunner/`, and pushes
//! asynchronous results over server-sent events. The UI shell drives native
//! dialogs and shutdown through the returned [`BridgeHandle`].

pub mod bridge;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod results;
pub mod services;
pub mod sse;

pub use bridge::{BridgeHandle, NativeBridgeEvent, SaveDialogOptions};
pub use config::{RunnerConfig, UiMode};
pub use gateway::{Gateway, GatewayHandle, STOP_PAYLOAD};
pub use lifecycle::LifecycleState;
pub use services::commands::Command;
