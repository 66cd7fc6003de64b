//! Layered bench configuration using Figment.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. `config/bench.toml` (or the file given on the command line); a missing
//!    file is not an error
//! 3. Environment variables prefixed `LAB_BENCH_`, nested with `__`, e.g.
//!    `LAB_BENCH_SESSION__TIMEOUT=20s` or `LAB_BENCH_SITE=alternate`
//!
//! ```no_run
//! use lab_bench::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(None)?;
//! println!("Scope at {}", settings.site_addresses().scope);
//! # Ok(())
//! # }
//! ```

use crate::cat::CatConfig;
use crate::error::{BenchError, BenchResult};
use crate::instrument::{ResourceAddress, SessionOptions};
use crate::logging::{parse_log_level, LogFormat};
use crate::procedures::amplifier::AmplifierConfig;
use crate::procedures::demodulator::DemodulatorConfig;
use crate::procedures::modulator::ModulatorConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration file read when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/bench.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "LAB_BENCH_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Which address set to use.
    pub site: Site,
    pub application: ApplicationConfig,
    pub sites: Sites,
    pub session: SessionOptions,
    pub output: OutputConfig,
    pub demodulator: DemodulatorConfig,
    pub modulator: ModulatorConfig,
    pub amplifier: AmplifierConfig,
    pub cat: CatConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    /// trace, debug, info, warn or error
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Lab Bench".to_string(),
            log_level: "warn".to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

/// Bench location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    #[default]
    Lab,
    Alternate,
}

/// Resource strings of the three bench instruments at one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteAddresses {
    pub scope: String,
    pub fxngen: String,
    pub supply: String,
}

impl SiteAddresses {
    fn on_subnet(subnet: &str) -> Self {
        Self {
            scope: format!("TCPIP0::192.168.{}.253::hislip0::INSTR", subnet),
            fxngen: format!("TCPIP0::192.168.{}.254::5025::SOCKET", subnet),
            supply: format!("TCPIP0::192.168.{}.251::5025::SOCKET", subnet),
        }
    }

    fn parse(&self) -> BenchResult<()> {
        for resource in [&self.scope, &self.fxngen, &self.supply] {
            resource.parse::<ResourceAddress>()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sites {
    pub lab: SiteAddresses,
    pub alternate: SiteAddresses,
}

impl Default for Sites {
    fn default() -> Self {
        Self {
            lab: SiteAddresses::on_subnet("0"),
            alternate: SiteAddresses::on_subnet("2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving row files and charts.
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
        }
    }
}

impl Settings {
    /// Load defaults, the TOML file and the environment, then validate.
    pub fn load(path: Option<&Path>) -> BenchResult<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        debug!(path = %path.display(), "Loading configuration");

        let settings: Settings = Self::figment(path).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The provider stack behind [`load`](Self::load).
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Addresses of the selected site.
    pub fn site_addresses(&self) -> &SiteAddresses {
        match self.site {
            Site::Lab => &self.sites.lab,
            Site::Alternate => &self.sites.alternate,
        }
    }

    pub fn validate(&self) -> BenchResult<()> {
        parse_log_level(&self.application.log_level)?;

        if self.session.timeout.is_zero() {
            return Err(invalid("session.timeout must be greater than zero"));
        }
        if self.session.write_termination.is_empty() {
            return Err(invalid("session.write_termination must not be empty"));
        }
        if !self.session.read_termination.is_ascii() {
            return Err(invalid("session.read_termination must be an ASCII character"));
        }

        self.sites.lab.parse()?;
        self.sites.alternate.parse()?;

        for (name, points) in [
            ("demodulator", self.demodulator.points),
            ("modulator", self.modulator.points),
            ("amplifier", self.amplifier.points),
        ] {
            if points < 2 {
                return Err(invalid(format!(
                    "{}.points must be at least 2, got {}",
                    name, points
                )));
            }
        }

        if self.amplifier.impedance_ohms <= 0.0 {
            return Err(invalid("amplifier.impedance_ohms must be positive"));
        }
        if self.amplifier.harmonics == 0 {
            return Err(invalid("amplifier.harmonics must be at least 1"));
        }
        if self.cat.baud == 0 {
            return Err(invalid("cat.baud must be greater than zero"));
        }
        if self.cat.timeout.is_zero() {
            return Err(invalid("cat.timeout must be greater than zero"));
        }

        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> BenchResult<String> {
        toml::to_string_pretty(self).map_err(|e| BenchError::Configuration(e.to_string()))
    }
}

fn invalid(message: impl Into<String>) -> BenchError {
    BenchError::Configuration(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::time::Duration;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.site, Site::Lab);
        assert_eq!(
            settings.site_addresses().scope,
            "TCPIP0::192.168.0.253::hislip0::INSTR"
        );
        assert_eq!(
            settings.sites.alternate.supply,
            "TCPIP0::192.168.2.251::5025::SOCKET"
        );
    }

    #[test]
    fn file_and_environment_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bench.toml",
                r#"
                    site = "alternate"

                    [session]
                    timeout = "2s"

                    [demodulator]
                    points = 11
                "#,
            )?;
            jail.set_env("LAB_BENCH_APPLICATION__LOG_LEVEL", "debug");
            jail.set_env("LAB_BENCH_DEMODULATOR__CARRIER_HZ", "12200");

            let settings = Settings::load(Some(Path::new("bench.toml")))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(settings.site, Site::Alternate);
            assert_eq!(settings.session.timeout, Duration::from_secs(2));
            assert_eq!(settings.session.write_termination, "\n");
            assert_eq!(settings.demodulator.points, 11);
            assert_eq!(settings.demodulator.carrier_hz, 12200.0);
            assert_eq!(settings.application.log_level, "debug");
            assert!(settings.site_addresses().fxngen.contains("192.168.2.254"));
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let settings = Settings::load(Some(Path::new("nope.toml")))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(settings, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn rejects_invalid_values() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.session.timeout = Duration::ZERO;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.cat.timeout = Duration::ZERO;
        assert!(matches!(
            settings.validate(),
            Err(BenchError::Configuration(_))
        ));

        let mut settings = Settings::default();
        settings.modulator.points = 1;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.sites.lab.scope = "GPIB0::7::INSTR".into();
        assert!(matches!(
            settings.validate(),
            Err(BenchError::InvalidAddress(_))
        ));
    }

    #[test]
    fn effective_config_round_trips_through_toml() {
        let settings = Settings::default();
        let text = settings.to_toml().unwrap();
        assert!(text.contains("[sites.lab]"));
        assert!(text.contains("timeout = \"10s\""));
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
