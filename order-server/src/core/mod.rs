//! Core module: configuration, state, lifecycle and errors
//!
//! - [`Config`] - configuration loaded from the environment
//! - [`ServerState`] - shared handles passed to handlers and tasks
//! - [`Server`] - startup, HTTP serving and shutdown
//! - [`BackgroundTasks`] - long-running task registry
//! - [`ServerError`] - fatal errors

pub mod config;
pub mod error;
pub mod server;
pub mod state;
pub mod tasks;

pub use config::{Backend, Config};
pub use error::{Result, ServerError};
pub use server::Server;
pub use state::ServerState;
pub use tasks::{BackgroundTasks, TaskHealth, TaskKind, TaskStatus};
