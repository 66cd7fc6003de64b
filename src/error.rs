//! Custom error types for the bench.
//!
//! `BenchError` is the single error type of the library. It follows the
//! failure taxonomy of a bench procedure:
//!
//! - **Transport faults** (`Connect`, `Timeout`, `UnexpectedEof`, `Io`): fatal,
//!   propagated unchanged to the caller.
//! - **Operator abort** (`Aborted`): raised by the operator gate after the
//!   bench has been shut down.
//! - **Precondition violations** (`ScaleMismatch`): fatal, and routed through
//!   the same shutdown path as an abort.
//! - **Malformed readings** (`Parse`): a query that did not return a number.
//!   Fatal, never retried.
//!
//! CAT validation mismatches are not errors; they are recorded by the
//! validator and reported in aggregate.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the bench error type.
pub type BenchResult<T> = std::result::Result<T, BenchError>;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid resource address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to connect to {resource}: {source}")]
    Connect {
        resource: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{instrument}: no response to '{command}' within {timeout:?}")]
    Timeout {
        instrument: String,
        command: String,
        timeout: Duration,
    },

    #[error("{0}: connection closed by instrument")]
    UnexpectedEof(String),

    #[error("{0}: session is closed")]
    SessionClosed(String),

    #[error("{0} is not connected")]
    NotConnected(&'static str),

    #[error("Failed to parse response to '{command}' as a number: '{response}'")]
    Parse { command: String, response: String },

    #[error("Expected {expected} readings per sweep point, got {actual}")]
    ChannelCount { expected: usize, actual: usize },

    #[error("The scales of the 2 channels do not match (CH1={ch1}, CH2={ch2})")]
    ScaleMismatch { ch1: String, ch2: String },

    #[error("Invalid sweep: {0}")]
    InvalidSweep(String),

    #[error("Measurement aborted by operator")]
    Aborted,

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("Plot rendering failed: {0}")]
    Plot(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<BenchError>),
}

impl BenchError {
    /// Whether this error must take the ordered-shutdown path before it
    /// propagates (operator abort and measurement precondition violations).
    pub fn requires_shutdown(&self) -> bool {
        matches!(self, BenchError::Aborted | BenchError::ScaleMismatch { .. })
    }

    /// Whether the error came from the instrument transport.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            BenchError::Io(_)
                | BenchError::Connect { .. }
                | BenchError::Timeout { .. }
                | BenchError::UnexpectedEof(_)
                | BenchError::SessionClosed(_)
        )
    }
}

impl From<figment::Error> for BenchError {
    fn from(value: figment::Error) -> Self {
        BenchError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_and_scale_mismatch_take_shutdown_path() {
        assert!(BenchError::Aborted.requires_shutdown());
        assert!(BenchError::ScaleMismatch {
            ch1: "+1.0E-01".into(),
            ch2: "+2.0E-01".into(),
        }
        .requires_shutdown());
    }

    #[test]
    fn transport_faults_propagate_without_shutdown() {
        let timeout = BenchError::Timeout {
            instrument: "scope".into(),
            command: ":MEAS:VRMS? CHAN1".into(),
            timeout: Duration::from_secs(10),
        };
        assert!(timeout.is_transport_fault());
        assert!(!timeout.requires_shutdown());

        let parse = BenchError::Parse {
            command: ":MEAS:VRMS? CHAN1".into(),
            response: "9.9E+37junk".into(),
        };
        assert!(!parse.requires_shutdown());
        assert!(!parse.is_transport_fault());
    }

    #[test]
    fn parse_error_mentions_raw_response() {
        let err = BenchError::Parse {
            command: ":MEAS:VPP? CHAN2".into(),
            response: "****".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains(":MEAS:VPP? CHAN2"));
        assert!(msg.contains("****"));
    }
}
