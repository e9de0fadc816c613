//! Medallion Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient functionality shared by the medallion workspace members:
//!
//! - **Logging**: `tracing` subscriber setup for console and rolling files
//! - **Checksums**: SHA-256 digests for written objects
//!
//! # Example
//!
//! ```no_run
//! use medallion_common::logging::{init_logging, LogConfig, LogLevel};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::builder().level(LogLevel::Debug).build().merge_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod logging;

pub use checksum::sha256_hex;
