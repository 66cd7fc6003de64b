//! CAT (Computer-Aided Transceiver) command validation.
//!
//! The radio speaks a semicolon-terminated ASCII dialect over a serial link.
//! A test case optionally sends a setter, then a getter, reads one response
//! and compares it byte-for-byte with the expected literal. Mismatches are
//! not errors: they are printed, folded into a single verdict and reported
//! once at the end. Only transport failures abort the run.

use crate::error::BenchResult;
use crate::instrument::address::open_serial;
use crate::instrument::DynIo;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, trace, warn};

/// Ends every CAT command and response.
pub const CAT_TERMINATOR: u8 = b';';

/// Baud rate of the radio's USB serial port.
pub const DEFAULT_CAT_BAUD: u32 = 115_200;

/// Dial frequency used by the standard plan (FT8 on 20 m).
pub const DEFAULT_CAT_FREQUENCY_HZ: u64 = 14_074_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatConfig {
    /// Serial device, e.g. `/dev/ttyUSB0` or `COM11`.
    pub port: String,
    pub baud: u32,
    /// Read timeout per response. Expiry is not fatal.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// VFO-A frequency programmed by the standard plan.
    pub frequency_hz: u64,
    /// Custom plan. Empty means [`CatPlan::standard`].
    pub plan: Vec<CatSection>,
}

impl Default for CatConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud: DEFAULT_CAT_BAUD,
            timeout: Duration::from_secs(1),
            frequency_hz: DEFAULT_CAT_FREQUENCY_HZ,
            plan: Vec::new(),
        }
    }
}

impl CatConfig {
    /// The configured plan, or the standard plan when none is configured.
    pub fn plan(&self) -> CatPlan {
        if self.plan.is_empty() {
            CatPlan::standard(self.frequency_hz)
        } else {
            CatPlan {
                sections: self.plan.clone(),
            }
        }
    }
}

// =============================================================================
// Serial port
// =============================================================================

pub struct CatPort {
    name: String,
    io: BufReader<DynIo>,
    timeout: Duration,
}

impl CatPort {
    pub fn new(name: impl Into<String>, io: DynIo, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            io: BufReader::new(io),
            timeout,
        }
    }

    /// Open a serial port (8N1, no flow control).
    pub async fn open(port: &str, baud: u32, timeout: Duration) -> BenchResult<Self> {
        let io = open_serial(port, baud).await?;
        Ok(Self::new(port, io, timeout))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write a command verbatim. CAT commands carry their own terminator.
    pub async fn write(&mut self, command: &str) -> BenchResult<()> {
        trace!(port = %self.name, command, "CAT write");
        self.io.get_mut().write_all(command.as_bytes()).await?;
        self.io.get_mut().flush().await?;
        Ok(())
    }

    /// Read one response including its `;`.
    ///
    /// On timeout or end of input whatever arrived so far is returned, which
    /// may be empty.
    pub async fn read_response(&mut self) -> BenchResult<String> {
        let mut buffer = Vec::new();
        match tokio::time::timeout(self.timeout, self.io.read_until(CAT_TERMINATOR, &mut buffer))
            .await
        {
            Ok(result) => {
                result?;
            }
            Err(_) => {
                warn!(port = %self.name, partial = buffer.len(), "CAT response timed out");
            }
        }
        let response = String::from_utf8_lossy(&buffer).into_owned();
        trace!(port = %self.name, response = %response, "CAT read");
        Ok(response)
    }

    pub async fn close(mut self) -> BenchResult<()> {
        self.io.get_mut().shutdown().await?;
        debug!(port = %self.name, "CAT port closed");
        Ok(())
    }
}

impl std::fmt::Debug for CatPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatPort")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// =============================================================================
// Test plan
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatCase {
    /// Sent before the getter; setters produce no response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<String>,
    pub getter: String,
    pub expected: String,
}

impl CatCase {
    /// Set a value, read it back and expect the setter echoed.
    pub fn set_get(setter: impl Into<String>, getter: impl Into<String>) -> Self {
        let setter = setter.into();
        Self {
            expected: setter.clone(),
            setter: Some(setter),
            getter: getter.into(),
        }
    }

    /// Query only.
    pub fn query(getter: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            setter: None,
            getter: getter.into(),
            expected: expected.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatSection {
    pub title: String,
    pub cases: Vec<CatCase>,
}

impl CatSection {
    fn new(title: &str, cases: Vec<CatCase>) -> Self {
        Self {
            title: title.to_string(),
            cases,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatPlan {
    pub sections: Vec<CatSection>,
}

impl CatPlan {
    /// Command coverage for the transceiver firmware, with VFO-A at
    /// `frequency_hz`.
    pub fn standard(frequency_hz: u64) -> Self {
        let fa = format!("FA{:09};", frequency_hz);
        let info = format!("IF001{:09}+000000C00000;", frequency_hz);
        Self {
            sections: vec![
                CatSection::new("FA COMMAND", vec![CatCase::set_get(fa, "FA;")]),
                CatSection::new(
                    "TX COMMAND",
                    vec![CatCase::set_get("TX1;", "TX;"), CatCase::set_get("TX0;", "TX;")],
                ),
                CatSection::new(
                    "AI COMMAND",
                    vec![CatCase::set_get("AI1;", "AI;"), CatCase::set_get("AI0;", "AI;")],
                ),
                CatSection::new("ID COMMAND", vec![CatCase::query("ID;", "0650;")]),
                CatSection::new("MD COMMAND", vec![CatCase::query("MD0;", "MD0C;")]),
                CatSection::new("SH COMMAND", vec![CatCase::query("SH0;", "SH0000;")]),
                CatSection::new("NA COMMAND", vec![CatCase::query("NA0;", "NA00;")]),
                CatSection::new("IF COMMAND", vec![CatCase::query("IF;", info)]),
                CatSection::new(
                    "ST COMMAND",
                    vec![CatCase::set_get("ST1;", "ST;"), CatCase::set_get("ST0;", "ST;")],
                ),
            ],
        }
    }

    pub fn case_count(&self) -> usize {
        self.sections.iter().map(|s| s.cases.len()).sum()
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Outcome of one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseOutcome {
    pub getter: String,
    pub expected: String,
    pub response: String,
    pub passed: bool,
}

/// Runs cases and keeps the overall verdict.
///
/// The verdict starts as pass and is cleared by the first failing case; it
/// is never set back.
#[derive(Debug, Clone)]
pub struct CatValidator {
    passed: bool,
    outcomes: Vec<CaseOutcome>,
}

impl Default for CatValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl CatValidator {
    pub fn new() -> Self {
        Self {
            passed: true,
            outcomes: Vec::new(),
        }
    }

    /// Overall verdict so far.
    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn outcomes(&self) -> &[CaseOutcome] {
        &self.outcomes
    }

    /// Run one case. Returns whether it passed.
    pub async fn check(&mut self, port: &mut CatPort, case: &CatCase) -> BenchResult<bool> {
        if let Some(setter) = &case.setter {
            port.write(setter).await?;
        }
        port.write(&case.getter).await?;
        let response = port.read_response().await?;

        let passed = response == case.expected;
        println!("  CAT response: {} . Expected: {}", response, case.expected);
        println!("  Result: {}", verdict_word(passed));
        if !passed {
            self.passed = false;
        }
        debug!(getter = %case.getter, passed, "CAT case");

        self.outcomes.push(CaseOutcome {
            getter: case.getter.clone(),
            expected: case.expected.clone(),
            response,
            passed,
        });
        Ok(passed)
    }

    /// Run every section of `plan` in order and print the overall result.
    pub async fn run(&mut self, port: &mut CatPort, plan: &CatPlan) -> BenchResult<bool> {
        info!(port = %port.name(), cases = plan.case_count(), "Running CAT plan");
        for section in &plan.sections {
            println!("{}", section.title);
            for case in &section.cases {
                self.check(port, case).await?;
            }
        }
        println!();
        println!("Overall CAT test result: {}", verdict_word(self.passed));
        Ok(self.passed)
    }
}

fn verdict_word(passed: bool) -> &'static str {
    if passed {
        "PASS"
    } else {
        "FAIL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn standard_plan_commands() {
        let plan = CatPlan::standard(DEFAULT_CAT_FREQUENCY_HZ);
        assert_eq!(plan.sections.len(), 9);
        assert_eq!(plan.case_count(), 13);

        let fa = &plan.sections[0].cases[0];
        assert_eq!(fa.setter.as_deref(), Some("FA014074000;"));
        assert_eq!(fa.getter, "FA;");
        assert_eq!(fa.expected, "FA014074000;");

        let info = &plan.sections[7].cases[0];
        assert_eq!(info.expected, "IF001014074000+000000C00000;");
        assert!(info.setter.is_none());
    }

    #[test]
    fn configured_plan_replaces_standard() {
        let mut config = CatConfig::default();
        assert_eq!(config.plan(), CatPlan::standard(14_074_000));

        config.plan = vec![CatSection::new("ID", vec![CatCase::query("ID;", "0670;")])];
        assert_eq!(config.plan().case_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_partial_response() {
        let (host, mut radio) = tokio::io::duplex(64);
        let mut port = CatPort::new("test", Box::new(host), Duration::from_secs(1));

        radio.write_all(b"FA0140").await.unwrap();
        let response = port.read_response().await.unwrap();
        assert_eq!(response, "FA0140");
    }

    #[tokio::test]
    async fn setter_then_getter_on_the_wire() {
        let (host, mut radio) = tokio::io::duplex(64);
        let mut port = CatPort::new("test", Box::new(host), Duration::from_secs(1));
        let mut validator = CatValidator::new();

        radio.write_all(b"TX1;").await.unwrap();
        let passed = validator
            .check(&mut port, &CatCase::set_get("TX1;", "TX;"))
            .await
            .unwrap();
        assert!(passed);

        let mut sent = [0u8; 7];
        radio.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, b"TX1;TX;");
    }
}
