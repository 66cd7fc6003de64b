//! SSB demodulator sideband rejection.
//!
//! The function generator drives the demodulator's I and Q inputs with two
//! sines in quadrature. Sweeping the tone across the carrier moves the
//! demodulated output between the lower and upper sideband. The procedure
//! runs the sweep twice, once with the demodulator in LSB mode (output on
//! CH2) and once in USB mode (output on CH1), reading the RMS output voltage
//! at every point.

use crate::data::{write_rows, LineChart};
use crate::error::BenchResult;
use crate::instrument::fxngen::CHANNELS;
use crate::instrument::{Coupling, InstrumentSet};
use crate::measurement::sideband_rejection;
use crate::procedures::bench::Bench;
use crate::procedures::gate::OperatorGate;
use crate::procedures::sweep::{DisplayUnit, Sweep, SweepDriver, SweepPlan};
use crate::procedures::{Procedure, ProcedureOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncBufRead;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemodulatorConfig {
    pub points: usize,
    pub start_hz: f64,
    pub stop_hz: f64,
    /// Carrier of the demodulator under test.
    pub carrier_hz: f64,
    /// Generator amplitude on both channels.
    pub amplitude_v: f64,
    /// Phase of channel 2 relative to channel 1.
    pub quadrature_phase_deg: f64,
    /// Wait between retuning and re-synchronising the generator phase.
    #[serde(with = "humantime_serde")]
    pub pre_sync: Duration,
    /// Wait after phase sync before reading.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Require identical CH1/CH2 vertical scales before each pass.
    pub check_scales: bool,
    /// Scope timebase in s/div.
    pub timebase_s: f64,
}

impl Default for DemodulatorConfig {
    fn default() -> Self {
        Self {
            points: 41,
            start_hz: 6e3,
            stop_hz: 14e3,
            carrier_hz: 10e3,
            amplitude_v: 1.0,
            quadrature_phase_deg: -90.0,
            pre_sync: Duration::from_millis(500),
            settle: Duration::from_secs(1),
            check_scales: true,
            timebase_s: 5e-4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sideband {
    Lower,
    Upper,
}

impl Sideband {
    /// Scope channel the demodulator output is wired to in this mode.
    fn channel(self) -> u8 {
        match self {
            Sideband::Lower => 2,
            Sideband::Upper => 1,
        }
    }

    fn progress_label(self) -> &'static str {
        match self {
            Sideband::Lower => "LSB point",
            Sideband::Upper => "USB point",
        }
    }

    fn record(self) -> &'static str {
        match self {
            Sideband::Lower => "lsb",
            Sideband::Upper => "usb",
        }
    }
}

/// Retunes both generator channels and reads one scope channel.
struct SidebandSweep {
    channel: u8,
    record: &'static str,
    pre_sync: Duration,
}

#[async_trait]
impl SweepDriver<Bench> for SidebandSweep {
    fn channels(&self) -> Vec<String> {
        vec![self.record.to_string()]
    }

    async fn apply(&self, bench: &mut Bench, hz: f64) -> BenchResult<()> {
        retune(bench, hz, self.pre_sync).await
    }

    async fn measure(&self, bench: &mut Bench) -> BenchResult<Vec<f64>> {
        Ok(vec![bench.scope()?.measure_vrms(self.channel).await?])
    }
}

async fn retune(bench: &mut Bench, hz: f64, pre_sync: Duration) -> BenchResult<()> {
    let fxngen = bench.fxngen()?;
    for channel in CHANNELS {
        fxngen.set_frequency(channel, hz).await?;
    }
    if !pre_sync.is_zero() {
        debug!(?pre_sync, "Waiting before phase sync");
        tokio::time::sleep(pre_sync).await;
    }
    fxngen.sync_phase(2).await
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemodulatorResult {
    pub frequency: Vec<f64>,
    /// Output RMS voltage in LSB mode.
    pub lsb: Vec<f64>,
    /// Output RMS voltage in USB mode.
    pub usb: Vec<f64>,
}

impl DemodulatorResult {
    /// Rejection of the upper sideband in LSB mode, in dB.
    pub fn lsb_rejection(&self) -> Vec<f64> {
        sideband_rejection(&self.lsb, &self.usb)
    }

    /// Rejection of the lower sideband in USB mode, in dB.
    pub fn usb_rejection(&self) -> Vec<f64> {
        sideband_rejection(&self.usb, &self.lsb)
    }
}

impl ProcedureOutput for DemodulatorResult {
    fn save(&self, dir: &Path) -> BenchResult<Vec<PathBuf>> {
        let data = dir.join("demod.txt");
        write_rows(&data, &[&self.frequency, &self.lsb, &self.usb])?;

        let khz: Vec<f64> = self.frequency.iter().map(|f| f / 1e3).collect();

        let response = dir.join("demod.svg");
        LineChart::new("Frequency [kHz]", "Output amplitude [V]")
            .title("Frequency response of demodulator")
            .series("USB", &khz, &self.usb)
            .series("LSB", &khz, &self.lsb)
            .render(&response)?;

        let rejection = dir.join("rejection.svg");
        LineChart::new("Frequency [kHz]", "Sideband rejection ratio [dB]")
            .title("SSB demodulation performance")
            .series("LSB mode", &khz, &self.lsb_rejection())
            .series("USB mode", &khz, &self.usb_rejection())
            .render(&rejection)?;

        Ok(vec![data, response, rejection])
    }
}

#[derive(Debug, Clone, Default)]
pub struct Demodulator {
    config: DemodulatorConfig,
}

impl Demodulator {
    pub fn new(config: DemodulatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DemodulatorConfig {
        &self.config
    }

    async fn setup_generator(&self, bench: &mut Bench) -> BenchResult<()> {
        let cfg = &self.config;
        let fxngen = bench.fxngen()?;
        for channel in CHANNELS {
            fxngen.set_load_high_z(channel).await?;
        }
        fxngen.set_angle_unit_degrees().await?;

        for (channel, phase) in [(1, 0.0), (2, cfg.quadrature_phase_deg)] {
            fxngen.set_sine(channel).await?;
            fxngen.set_amplitude(channel, cfg.amplitude_v).await?;
            fxngen.set_offset(channel, 0.0).await?;
            fxngen.set_phase(channel, phase).await?;
            fxngen.set_output(channel, true).await?;
        }
        Ok(())
    }

    /// One pass over the plan with the demodulator in `mode`.
    async fn measure_pass<R>(
        &self,
        bench: &mut Bench,
        gate: &mut OperatorGate<R>,
        plan: &SweepPlan,
        mode: Sideband,
    ) -> BenchResult<Vec<f64>>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let cfg = &self.config;
        let start = match mode {
            Sideband::Lower => plan.first(),
            Sideband::Upper => plan.last(),
        };

        {
            let fxngen = bench.fxngen()?;
            for channel in CHANNELS {
                fxngen.set_frequency(channel, start).await?;
            }
            fxngen.sync_phase(2).await?;
        }
        let scope = bench.scope()?;
        scope.set_trigger_source(mode.channel()).await?;
        println!("Trigger level: {}", scope.trigger_level().await?);

        match mode {
            Sideband::Lower => {
                println!("LSB MEASUREMENT");
                println!(
                    "You should have a strong LSB signal on CH2 at {:.1} kHz.",
                    (cfg.carrier_hz - start) / 1e3
                );
            }
            Sideband::Upper => {
                println!("USB MEASUREMENT");
                println!(
                    "You should have a strong USB signal on CH1 at {:.1} kHz.",
                    (start - cfg.carrier_hz) / 1e3
                );
            }
        }
        println!("Adjust the voltage scale on CH1 (and CH2) so they are identical");
        println!("and the desired signal (USB or LSB) occupies most of the screen.");
        println!("Adjust the triggering so the signals are stable.");
        gate.confirm(bench).await?;

        if cfg.check_scales {
            bench.check_scales().await?;
        }

        let driver = SidebandSweep {
            channel: mode.channel(),
            record: mode.record(),
            pre_sync: cfg.pre_sync,
        };
        let mut record = Sweep::new(plan.clone())
            .settle(cfg.settle)
            .label(mode.progress_label())
            .unit(DisplayUnit::khz(2))
            .run(bench, &driver, gate)
            .await?;
        Ok(record.take_channel(mode.record()))
    }
}

#[async_trait]
impl Procedure for Demodulator {
    type Output = DemodulatorResult;

    fn name(&self) -> &'static str {
        "demodulator"
    }

    fn required_instruments(&self) -> InstrumentSet {
        InstrumentSet::scope_only().with_fxngen()
    }

    async fn execute<R>(
        &self,
        bench: &mut Bench,
        gate: &mut OperatorGate<R>,
    ) -> BenchResult<DemodulatorResult>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let cfg = &self.config;
        let plan = SweepPlan::linear(cfg.start_hz, cfg.stop_hz, cfg.points)?;

        let scope = bench.scope()?;
        for channel in [1, 2] {
            scope.set_probe_attenuation(channel, 1.0).await?;
        }
        scope.set_trigger_sweep_auto().await?;
        scope.set_trigger_level(0.0).await?;

        println!("Connect your subsystem as shown in the wiring diagram and power it on.");
        println!("Place the demodulator in LSB mode and connect the output to channel 2.");
        gate.confirm(bench).await?;

        self.setup_generator(bench).await?;

        let scope = bench.scope()?;
        scope.set_timebase_scale(cfg.timebase_s).await?;
        for channel in [1, 2] {
            scope.set_coupling(channel, Coupling::Ac).await?;
        }

        println!(
            "The following frequency points will be measured: {:?}",
            plan.values()
        );

        let lsb = self
            .measure_pass(bench, gate, &plan, Sideband::Lower)
            .await?;

        println!("Place the demodulator in USB mode and connect the output to channel 1.");
        gate.confirm(bench).await?;

        let usb = self
            .measure_pass(bench, gate, &plan, Sideband::Upper)
            .await?;

        println!("Done");
        bench.fxngen()?.disable_outputs().await?;

        Ok(DemodulatorResult {
            frequency: plan.values().to_vec(),
            lsb,
            usb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_spans_carrier() {
        let cfg = DemodulatorConfig::default();
        let plan = SweepPlan::linear(cfg.start_hz, cfg.stop_hz, cfg.points).unwrap();
        assert_eq!(plan.len(), 41);
        assert_eq!(plan.values()[20], cfg.carrier_hz);
        assert!((plan.values()[1] - 6200.0).abs() < 1e-9);
    }

    #[test]
    fn rejection_is_antisymmetric() {
        let result = DemodulatorResult {
            frequency: vec![6e3, 14e3],
            lsb: vec![0.9, 0.01],
            usb: vec![0.009, 0.8],
        };
        let lsb = result.lsb_rejection();
        let usb = result.usb_rejection();
        assert!((lsb[0] - 40.0).abs() < 1e-9);
        for (a, b) in lsb.iter().zip(&usb) {
            assert!((a + b).abs() < 1e-12);
        }
    }

    #[test]
    fn saves_rows_and_charts() {
        let dir = tempfile::tempdir().unwrap();
        let result = DemodulatorResult {
            frequency: vec![6e3, 10e3, 14e3],
            lsb: vec![0.9, 0.5, 0.01],
            usb: vec![0.01, 0.5, 0.8],
        };
        let written = result.save(dir.path()).unwrap();
        assert_eq!(written.len(), 3);
        let rows = crate::data::read_rows(&dir.path().join("demod.txt")).unwrap();
        assert_eq!(rows, vec![result.frequency, result.lsb, result.usb]);
        assert!(dir.path().join("rejection.svg").exists());
    }
}
