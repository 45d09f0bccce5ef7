//! # Blink DAQ Core Library
//!
//! This crate ingests a stream of scalar capacitance readings, keeps a bounded
//! recent window of them, periodically estimates the dominant rate of the signal
//! with an FFT and pushes both the raw readings and the rate to live subscribers.
//! Every accepted reading is also appended to a CSV log.
//!
//! ## Crate Structure
//!
//! - **`app`**: `BlinkService`, which owns and wires the pipeline components and
//!   manages the estimator task lifecycle.
//! - **`broadcast`**: Per-subscriber bounded queues for `new_data` and
//!   `blink_rate` events. Slow subscribers lose events; nobody else waits.
//! - **`config`**: `Settings` loaded through `figment` from TOML plus
//!   `BLINK_DAQ_` environment variables.
//! - **`core`**: `Sample`, `RateEstimate`, the timestamp format, `SampleClock`
//!   and the `RecordAppender` trait.
//! - **`data`**: The sample buffer, spectrum analysis, the periodic estimator and
//!   the CSV appender.
//! - **`error`**: The crate-wide `DaqError`.
//! - **`gateway`**: Payload decoding and the per-reading ingest path.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`server`**: `axum` routes for ingest, WebSocket push and health.
//! - **`waveform`**: Synthetic signals for simulation and tests.

pub mod app;
pub mod broadcast;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod server;
pub mod waveform;

pub use app::BlinkService;
pub use config::Settings;
pub use error::{AppResult, DaqError};
