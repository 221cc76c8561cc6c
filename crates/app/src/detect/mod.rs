//! Admission-controlled PPE detection pipeline: a bounded-concurrency
//! dispatch server for an external inference worker, and the paced client
//! loop that feeds it.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing for the serve/watch commands.
//! - `dispatcher`: Bounded-concurrency admission control and FIFO queueing.
//! - `worker`: One-shot external worker invocation and temp-file handling.
//! - `server`: Actix Web API endpoints.
//! - `pacer`: Client-side frame pacing state machine and session state.
//! - `watch`: The client loop wiring frames, pacing, and transport.
//! - `transport`: HTTP client for the detection endpoint.
//! - `telemetry`: Tracing and Prometheus metrics setup.
//! - `data`: Wire structs shared by server and client.

pub use config::{DispatcherConfig, ServeConfig, WatchConfig, WorkerConfig};
pub use dispatcher::AdmissionDispatcher;
pub use server::{configure, run_server};
pub use watch::run_watch;
pub use worker::DispatchError;

pub mod config;
pub mod data;
pub mod dispatcher;
pub mod pacer;
pub mod server;
pub mod telemetry;
pub mod transport;
pub mod watch;
pub mod worker;
