//! # Lab Bench Core Library
//!
//! This crate drives a small RF lab bench over SCPI (an oscilloscope with a
//! built-in waveform generator, a two-channel function generator and a bench
//! supply) to characterise the subsystems of a radio transceiver. It also
//! validates a radio's CAT control interface over a serial link.
//!
//! ## Crate Structure
//!
//! - **`cat`**: CAT serial validation of a radio transceiver.
//! - **`config`**: Layered settings (defaults, TOML file, `LAB_BENCH_` environment).
//!   See `config::Settings`.
//! - **`data`**: Whitespace-separated row files and SVG charts.
//! - **`error`**: The `BenchError` enum used across the crate.
//! - **`instrument`**: SCPI sessions and the command sets of the three bench instruments.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`measurement`**: dB ratios, harmonic power, efficiency and THD.
//! - **`procedures`**: The demodulator, modulator and amplifier measurement scripts,
//!   the operator gate and the sweep engine they share.

pub mod cat;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod measurement;
pub mod procedures;

pub use error::{BenchError, BenchResult};
