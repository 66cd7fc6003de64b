//! I/Q modulator balance.
//!
//! The scope's built-in generator feeds the message signal; CH1 and CH2
//! carry the modulator's I and Q outputs. A single-tone check confirms Q lags
//! I, then a sweep records both peak-to-peak amplitudes and the phase between
//! them.

use crate::data::{write_rows, LineChart};
use crate::error::BenchResult;
use crate::instrument::{Coupling, InstrumentSet};
use crate::measurement::{gain_db, ratio_db};
use crate::procedures::bench::Bench;
use crate::procedures::gate::OperatorGate;
use crate::procedures::sweep::{DisplayUnit, Sweep, SweepDriver, SweepPlan};
use crate::procedures::{Procedure, ProcedureOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncBufRead;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulatorConfig {
    /// Message frequency of the I/Q phase check.
    pub check_frequency_hz: f64,
    pub points: usize,
    pub start_hz: f64,
    pub stop_hz: f64,
    /// Built-in generator amplitude during the sweep.
    pub drive_amplitude_v: f64,
    /// Timebase for the phase check, s/div.
    pub check_timebase_s: f64,
    /// Timebase for the sweep, s/div.
    pub sweep_timebase_s: f64,
    pub check_scales: bool,
    /// Delay after retuning; zero reads immediately.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
}

impl Default for ModulatorConfig {
    fn default() -> Self {
        Self {
            check_frequency_hz: 1e3,
            points: 40,
            start_hz: 100.0,
            stop_hz: 4000.0,
            drive_amplitude_v: 0.316 * std::f64::consts::SQRT_2,
            check_timebase_s: 5e-4,
            sweep_timebase_s: 1e-3,
            check_scales: true,
            settle: Duration::ZERO,
        }
    }
}

struct MessageSweep;

#[async_trait]
impl SweepDriver<Bench> for MessageSweep {
    fn channels(&self) -> Vec<String> {
        vec!["i".into(), "q".into(), "phase".into()]
    }

    async fn apply(&self, bench: &mut Bench, hz: f64) -> BenchResult<()> {
        bench.scope()?.set_wavegen_frequency(hz).await
    }

    async fn measure(&self, bench: &mut Bench) -> BenchResult<Vec<f64>> {
        let scope = bench.scope()?;
        let i = scope.measure_vpp(1).await?;
        let q = scope.measure_vpp(2).await?;
        let phase = scope.measure_phase(1).await?;
        Ok(vec![i, q, phase])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModulatorResult {
    /// Phase of Q relative to I at the check frequency, degrees.
    pub check_phase_deg: f64,
    pub drive_amplitude_v: f64,
    pub frequency: Vec<f64>,
    /// I output, Vpp.
    pub i: Vec<f64>,
    /// Q output, Vpp.
    pub q: Vec<f64>,
    /// Phase between I and Q, degrees.
    pub phase: Vec<f64>,
}

impl ModulatorResult {
    /// Whether Q lagged I during the phase check.
    pub fn q_lags_i(&self) -> bool {
        self.check_phase_deg <= 0.0
    }

    /// I/Q amplitude balance in dB.
    pub fn amplitude_balance(&self) -> Vec<f64> {
        ratio_db(&self.i, &self.q)
    }
}

impl ProcedureOutput for ModulatorResult {
    fn save(&self, dir: &Path) -> BenchResult<Vec<PathBuf>> {
        let data = dir.join("mod_iq.txt");
        write_rows(&data, &[&self.frequency, &self.i, &self.q, &self.phase])?;

        let compare = dir.join("mod_iq_compare.svg");
        LineChart::new("Message frequency [Hz]", "|I|, |Q| [dB]")
            .log_x()
            .series("I", &self.frequency, &gain_db(&self.i, self.drive_amplitude_v))
            .series("Q", &self.frequency, &gain_db(&self.q, self.drive_amplitude_v))
            .render(&compare)?;

        let balance = dir.join("mod_balance_ampl.svg");
        LineChart::new("Message frequency [Hz]", "Amplitude balance I/Q [dB]")
            .series("I/Q", &self.frequency, &self.amplitude_balance())
            .render(&balance)?;

        let phase = dir.join("mod_balance_phase.svg");
        LineChart::new("Message frequency [Hz]", "Phase shift between I and Q [deg]")
            .y_range(-200.0, 200.0)
            .series("phase", &self.frequency, &self.phase)
            .render(&phase)?;

        Ok(vec![data, compare, balance, phase])
    }
}

#[derive(Debug, Clone, Default)]
pub struct Modulator {
    config: ModulatorConfig,
}

impl Modulator {
    pub fn new(config: ModulatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModulatorConfig {
        &self.config
    }
}

fn print_adjust_prompt() {
    println!("Adjust the timebase and triggering so the signals are stable.");
    println!("Adjust the voltage scale on CH1 and CH2 so they are identical");
    println!("and the 2 signals occupy most of the screen.");
}

#[async_trait]
impl Procedure for Modulator {
    type Output = ModulatorResult;

    fn name(&self) -> &'static str {
        "modulator"
    }

    fn required_instruments(&self) -> InstrumentSet {
        InstrumentSet::scope_only()
    }

    async fn execute<R>(
        &self,
        bench: &mut Bench,
        gate: &mut OperatorGate<R>,
    ) -> BenchResult<ModulatorResult>
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
        scope.set_trigger_source(1).await?;
        scope.set_trigger_level(0.0).await?;

        println!("Connect your subsystem as shown in the wiring diagram and power it on.");
        gate.confirm(bench).await?;

        let scope = bench.scope()?;
        scope.set_wavegen_sine().await?;
        scope.set_wavegen_frequency(cfg.check_frequency_hz).await?;
        scope.set_wavegen_output(true).await?;
        scope.set_timebase_scale(cfg.check_timebase_s).await?;
        for channel in [1, 2] {
            scope.set_coupling(channel, Coupling::Ac).await?;
        }

        print_adjust_prompt();
        gate.confirm(bench).await?;
        if cfg.check_scales {
            bench.check_scales().await?;
        }

        let check_phase_deg = bench.scope()?.measure_phase(1).await?;
        println!(
            "Measured phase shift between I and Q for {} Hz message signal: {} deg",
            cfg.check_frequency_hz, check_phase_deg
        );
        if check_phase_deg > 0.0 {
            println!("WARNING: the phase shift is leading when it should be lagging. Ensure the function");
            println!("generator and oscilloscope are connected as shown in the wiring diagram.");
        } else {
            println!("Q is lagging I as expected.");
        }

        println!("About to initiate frequency sweep.");
        println!(
            "The following message frequencies will be measured: {:?}",
            plan.values()
        );

        let scope = bench.scope()?;
        scope.set_timebase_scale(cfg.sweep_timebase_s).await?;
        scope.set_wavegen_amplitude(cfg.drive_amplitude_v).await?;
        scope.set_wavegen_frequency(plan.first()).await?;

        print_adjust_prompt();
        gate.confirm(bench).await?;
        if cfg.check_scales {
            bench.check_scales().await?;
        }

        let mut record = Sweep::new(plan.clone())
            .settle(cfg.settle)
            .unit(DisplayUnit::khz(4))
            .run(bench, &MessageSweep, gate)
            .await?;

        println!("Done");
        bench.scope()?.set_wavegen_output(false).await?;

        Ok(ModulatorResult {
            check_phase_deg,
            drive_amplitude_v: cfg.drive_amplitude_v,
            frequency: record.stimulus.clone(),
            i: record.take_channel("i"),
            q: record.take_channel("q"),
            phase: record.take_channel("phase"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sweep_is_hundred_hertz_steps() {
        let cfg = ModulatorConfig::default();
        let plan = SweepPlan::linear(cfg.start_hz, cfg.stop_hz, cfg.points).unwrap();
        assert_eq!(plan.len(), 40);
        assert_eq!(plan.first(), 100.0);
        assert_eq!(plan.last(), 4000.0);
        assert!((plan.values()[1] - 200.0).abs() < 1e-9);
        assert!((cfg.drive_amplitude_v - 0.44689).abs() < 1e-5);
    }

    #[test]
    fn balance_and_lag() {
        let result = ModulatorResult {
            check_phase_deg: -89.5,
            drive_amplitude_v: 1.0,
            frequency: vec![100.0, 200.0],
            i: vec![1.0, 2.0],
            q: vec![1.0, 0.2],
            phase: vec![-90.0, -91.0],
        };
        assert!(result.q_lags_i());
        let balance = result.amplitude_balance();
        assert!(balance[0].abs() < 1e-12);
        assert!((balance[1] - 20.0).abs() < 1e-9);
    }
}
