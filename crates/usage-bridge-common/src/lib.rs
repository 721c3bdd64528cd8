//! Usage Bridge Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared building blocks for the usage bridge workspace members.
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Environment**: typed lookups of configuration variables
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use usage_bridge_common::env::{optional, parse_or};
//!
//! fn interval() -> usage_bridge_common::Result<u64> {
//!     let lookup = |name: &str| std::env::var(name).ok();
//!     let _guid = optional(&lookup, "LAST_RECORDED_GUID");
//!     parse_or(&lookup, "MIN_INTERVAL_TIME", 5000)
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
