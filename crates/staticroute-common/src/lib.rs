//! Common infrastructure for the static route controller.
//!
//! - [`shell`]: Safe shell command execution with quoting and timeouts
//! - [`error`]: Error types for shell execution
//! - [`Consumer`]: Keyed event queue that coalesces events per key
//!
//! # Example
//!
//! ```ignore
//! use staticroute_common::shell::{self, IP_CMD, shellquote};
//!
//! async fn add_route(dst: &str, gw: &str) -> staticroute_common::ShellResult<()> {
//!     let cmd = format!("{} route add {} via {}", IP_CMD, shellquote(dst), shellquote(gw));
//!     shell::exec_or_throw(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod consumer;
pub mod error;
pub mod shell;

pub use consumer::{Consumer, ConsumerConfig, KeyOp, Operation};
pub use error::{ShellError, ShellResult};
