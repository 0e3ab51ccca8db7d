//! Workbench Session Coordinator
//!
//! Thin layer between external callers and [`WorkspaceEngine`]s: request
//! routing by workspace id, request deadlines, and translation of failures
//! into `{error_kind, message}`.
//!
//! [`WorkspaceEngine`]: wb_workspace::WorkspaceEngine

#![allow(missing_docs)]

mod config;
mod coordinator;
mod error;
mod protocol;

pub use config::{ConfigError, SessionConfig, WorkbenchConfig};
pub use coordinator::SessionCoordinator;
pub use error::{ExternalError, SessionError};
pub use protocol::{InvokeResponse, Request, Response};
