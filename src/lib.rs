// THEORY:
// This file is the main entry point for the `assay_vision` library crate.
// It defines the public API exposed to drivers such as a desktop UI, a
// headless recorder or the bundled demo binary.
//
// The primary goal is to export the `MonitorPipeline` and the frame stream
// plumbing around it as the high-level interface of the monitor. The stages
// it wires together live in `core_modules`:
//
//   Frame ──▶ EllipseTracker ──mask──▶ ColorSampler ──stats──▶ SignalAnalyzer ──▶ alarm
//
// Each stage is public so it can be tested and reused on its own, but a driver
// normally only needs `pipeline` and `frame_stream`.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod frame_stream;
pub mod pipeline;

pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use pipeline::{MonitorPipeline, TickOutcome};
