//! Shared fixtures for the integration tests: scripted in-memory instruments
//! and operator input.

#![allow(dead_code)]

use lab_bench::instrument::{
    FunctionGenerator, InstrumentSession, Oscilloscope, PowerSupply, SessionOptions,
};
use lab_bench::procedures::{Bench, OperatorGate};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Entry recorded once the host side closed the session.
pub const CLOSED: &str = "<closed>";

/// Every line an instrument received, in order.
#[derive(Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.commands().iter().any(|c| c == command)
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    /// Index of the first occurrence of `command`.
    pub fn position(&self, command: &str) -> Option<usize> {
        self.commands().iter().position(|c| c == command)
    }

    pub fn is_closed(&self) -> bool {
        self.commands().last().map(String::as_str) == Some(CLOSED)
    }

    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }
}

/// Spawn an instrument that answers queries through `responder`.
///
/// `responder` sees every received line without its terminator and returns
/// the response for queries, `None` for plain commands.
pub fn fake_instrument<F>(name: &str, mut responder: F) -> (InstrumentSession, CommandLog)
where
    F: FnMut(&str) -> Option<String> + Send + 'static,
{
    let (host, device) = tokio::io::duplex(64 * 1024);
    let log = CommandLog::default();
    let device_log = log.clone();

    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(device);
        let mut lines = BufReader::new(read).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let reply = responder(&line);
                    device_log.push(line);
                    if let Some(reply) = reply {
                        if write.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
                _ => {
                    device_log.push(CLOSED.to_string());
                    break;
                }
            }
        }
    });

    let options = SessionOptions {
        timeout: Duration::from_secs(5),
        ..SessionOptions::default()
    };
    (
        InstrumentSession::new(name, Box::new(host), options),
        log,
    )
}

/// Answer every query with a fixed reading; identify queries get an IDN
/// string.
pub fn constant_responder(reading: &'static str) -> impl FnMut(&str) -> Option<String> + Send {
    move |line: &str| {
        if line == "*IDN?" {
            Some("Keysight Technologies,FAKE-1000,MY0001,1.0".to_string())
        } else if line.ends_with('?') || line.contains("? ") {
            Some(reading.to_string())
        } else {
            None
        }
    }
}

/// Bench with all three instruments answering with constant readings.
pub struct FakeBench {
    pub bench: Bench,
    pub scope: CommandLog,
    pub fxngen: CommandLog,
    pub supply: CommandLog,
}

pub fn fake_bench<S, F, P>(scope: S, fxngen: F, supply: P) -> FakeBench
where
    S: FnMut(&str) -> Option<String> + Send + 'static,
    F: FnMut(&str) -> Option<String> + Send + 'static,
    P: FnMut(&str) -> Option<String> + Send + 'static,
{
    let (scope_session, scope_log) = fake_instrument("oscilloscope", scope);
    let (fxngen_session, fxngen_log) = fake_instrument("function generator", fxngen);
    let (supply_session, supply_log) = fake_instrument("power supply", supply);
    FakeBench {
        bench: Bench::new()
            .with_scope(Oscilloscope::new(scope_session))
            .with_fxngen(FunctionGenerator::new(fxngen_session))
            .with_supply(PowerSupply::new(supply_session)),
        scope: scope_log,
        fxngen: fxngen_log,
        supply: supply_log,
    }
}

/// Operator answering the gates with `lines`, one per gate.
pub fn operator(lines: &'static str) -> OperatorGate<&'static [u8]> {
    OperatorGate::new(lines.as_bytes())
}

/// Let the device tasks drain whatever is still in flight.
pub async fn settle_devices() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
