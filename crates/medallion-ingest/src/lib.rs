//! Medallion Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Extracts the rows of one execution date from PostgreSQL or a CSV file
//! and writes them to a Hive-style `dt=YYYY-MM-DD` partition in object
//! storage, as Parquet or JSON Lines. The warehouse discovers partitions by
//! listing the prefix.
//!
//! # Supported Sources
//!
//! - **PostgreSQL**: date filter pushed into the query
//! - **CSV**: header row required, filtered while reading
//!
//! # Supported Targets
//!
//! - **GCS** (S3 interoperability endpoint), **S3**, S3-compatible servers
//! - **Local filesystem**, for development and tests
//!
//! # Example
//!
//! ```no_run
//! use medallion_ingest::{partition::parse_execution_date, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> medallion_ingest::Result<()> {
//!     let config = Arc::new(PipelineConfig::load("config/pipeline_config.yaml")?);
//!     let mut pipeline = Pipeline::from_config(config).await?;
//!     let report = pipeline.run(parse_execution_date("2024-12-01")?).await?;
//!     println!("{} rows written", report.rows_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod normalize;
pub mod partition;
pub mod pipeline;
pub mod record;
pub mod sources;
pub mod storage;
pub mod targets;

pub use config::PipelineConfig;
pub use error::{IngestError, Result};
pub use pipeline::{Pipeline, RunReport, RunState};
