//! RF power amplifier characterisation.
//!
//! Three phases on one bench setup:
//!
//! 1. **Operating point**: supply voltage, idle and driven current, DC power
//!    and the RF output voltage at the carrier.
//! 2. **Spectrum**: the scope's FFT with markers on the first harmonics,
//!    giving harmonic powers, DC-to-RF efficiency and THD.
//! 3. **Frequency response**: RF output power across the band.
//!
//! The amplifier is driven either by the scope's built-in generator or by
//! the external generator in push-pull (channel 2 inverted).

use crate::data::{write_rows, LineChart, StemChart};
use crate::error::BenchResult;
use crate::instrument::fxngen::CHANNELS;
use crate::instrument::{Coupling, InstrumentSet, Marker, Oscilloscope};
use crate::measurement::{
    dc_power, efficiency, harmonic_power, rms_power, to_dbw, total_harmonic_distortion_dbv,
    REFERENCE_IMPEDANCE_OHMS,
};
use crate::procedures::bench::Bench;
use crate::procedures::gate::OperatorGate;
use crate::procedures::sweep::{DisplayUnit, Sweep, SweepDriver, SweepPlan};
use crate::procedures::{Procedure, ProcedureOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::AsyncBufRead;
use tracing::{debug, warn};

/// Signal source driving the amplifier input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveSource {
    /// The oscilloscope's built-in waveform generator.
    #[serde(rename = "wavegen")]
    ScopeWavegen,
    /// Both channels of the function generator, channel 2 inverted.
    #[default]
    #[serde(rename = "fxngen")]
    FunctionGenerator,
}

impl FromStr for DriveSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wavegen" | "scope" => Ok(DriveSource::ScopeWavegen),
            "fxngen" | "generator" => Ok(DriveSource::FunctionGenerator),
            other => Err(format!(
                "unknown drive source '{}' (expected wavegen or fxngen)",
                other
            )),
        }
    }
}

impl fmt::Display for DriveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveSource::ScopeWavegen => f.write_str("wavegen"),
            DriveSource::FunctionGenerator => f.write_str("fxngen"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplifierConfig {
    pub drive: DriveSource,
    /// Drive amplitude in Vpp.
    pub drive_amplitude_v: f64,
    pub carrier_hz: f64,
    /// Supply channel powering the amplifier.
    pub supply_channel: u8,
    /// Switch the supply output off before wiring and on afterwards.
    pub control_supply_output: bool,
    /// Number of harmonics read from the FFT, fundamental included.
    pub harmonics: usize,
    /// Wait after moving the markers before reading them.
    #[serde(with = "humantime_serde")]
    pub marker_settle: Duration,
    pub fft_center_hz: f64,
    pub fft_span_hz: f64,
    pub impedance_ohms: f64,
    /// Warn when the fundamental delivers less than this.
    pub min_rf_power_w: f64,
    pub points: usize,
    pub start_hz: f64,
    pub stop_hz: f64,
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Timebase while viewing the carrier, s/div.
    pub timebase_s: f64,
    /// Timebase while the FFT is shown, s/div.
    pub fft_timebase_s: f64,
}

impl Default for AmplifierConfig {
    fn default() -> Self {
        Self {
            drive: DriveSource::FunctionGenerator,
            drive_amplitude_v: 1.0,
            carrier_hz: 14e6,
            supply_channel: 2,
            control_supply_output: true,
            harmonics: 5,
            marker_settle: Duration::from_secs(1),
            fft_center_hz: 37.5e6,
            fft_span_hz: 75e6,
            impedance_ohms: REFERENCE_IMPEDANCE_OHMS,
            min_rf_power_w: 1.0,
            points: 41,
            start_hz: 4e6,
            stop_hz: 18e6,
            settle: Duration::from_secs(1),
            timebase_s: 5e-8,
            fft_timebase_s: 1e-6,
        }
    }
}

/// Retunes the drive and reads the RF output voltage.
struct BandSweep {
    drive: DriveSource,
}

#[async_trait]
impl SweepDriver<Bench> for BandSweep {
    fn channels(&self) -> Vec<String> {
        vec!["vout".into()]
    }

    async fn apply(&self, bench: &mut Bench, hz: f64) -> BenchResult<()> {
        match self.drive {
            DriveSource::ScopeWavegen => bench.scope()?.set_wavegen_frequency(hz).await,
            DriveSource::FunctionGenerator => {
                let fxngen = bench.fxngen()?;
                fxngen.set_frequency(1, hz).await?;
                fxngen.sync_phase(1).await?;
                fxngen.set_phase(1, 0.0).await?;
                fxngen.set_frequency(2, hz).await?;
                fxngen.sync_phase(2).await?;
                fxngen.set_inverted_polarity(2).await
            }
        }
    }

    async fn measure(&self, bench: &mut Bench) -> BenchResult<Vec<f64>> {
        Ok(vec![bench.scope()?.measure_vrms(1).await?])
    }
}

/// Read `count` harmonic amplitudes (dBV) of `fundamental_hz`, two markers
/// at a time.
async fn read_harmonics(
    scope: &mut Oscilloscope,
    fundamental_hz: f64,
    count: usize,
    settle: Duration,
) -> BenchResult<Vec<f64>> {
    let orders: Vec<usize> = (1..=count).collect();
    let mut amplitudes = Vec::with_capacity(count);

    for pair in orders.chunks(2) {
        scope
            .set_marker_x(Marker::X1Y1, pair[0] as f64 * fundamental_hz)
            .await?;
        if let Some(&second) = pair.get(1) {
            scope
                .set_marker_x(Marker::X2Y2, second as f64 * fundamental_hz)
                .await?;
        }
        debug!(orders = ?pair, ?settle, "Waiting for markers");
        tokio::time::sleep(settle).await;

        amplitudes.push(scope.marker_y(Marker::X1Y1).await?);
        if pair.len() > 1 {
            amplitudes.push(scope.marker_y(Marker::X2Y2).await?);
        }
    }
    Ok(amplitudes)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmplifierResult {
    pub drive_amplitude_v: f64,
    pub impedance_ohms: f64,
    pub supply_voltage: f64,
    pub idle_current: f64,
    pub active_current: f64,
    /// Driven DC input power, W.
    pub dc_power: f64,
    pub rf_vrms: f64,
    pub fundamental_hz: f64,
    /// Harmonic amplitudes, fundamental first, dBV.
    pub harmonics_dbv: Vec<f64>,
    /// Harmonic powers into the reference impedance, W.
    pub harmonic_power: Vec<f64>,
    pub efficiency: f64,
    pub thd: f64,
    pub frequency: Vec<f64>,
    /// RF output voltage across the band, Vrms.
    pub vout: Vec<f64>,
}

impl AmplifierResult {
    /// RF output power across the band, W.
    pub fn rf_power(&self) -> Vec<f64> {
        self.vout
            .iter()
            .map(|&v| rms_power(v, self.impedance_ohms))
            .collect()
    }

    /// Power of the fundamental, W.
    pub fn fundamental_power(&self) -> f64 {
        self.harmonic_power.first().copied().unwrap_or(0.0)
    }
}

impl ProcedureOutput for AmplifierResult {
    fn save(&self, dir: &Path) -> BenchResult<Vec<PathBuf>> {
        let power = self.rf_power();
        let orders: Vec<f64> = (1..=self.harmonic_power.len()).map(|n| n as f64).collect();

        let pout = dir.join("pout.txt");
        write_rows(&pout, &[&self.frequency, &power])?;
        let spectrum = dir.join("spectrum.txt");
        write_rows(&spectrum, &[&orders, &self.harmonic_power])?;

        let mhz: Vec<f64> = self.frequency.iter().map(|f| f / 1e6).collect();
        let title = format!(
            "PA Frequency Response for Vin = {:.1} Vpp",
            self.drive_amplitude_v
        );

        let pout_dbw = dir.join("pout_dBW.svg");
        let dbw: Vec<f64> = power.iter().map(|&p| to_dbw(p)).collect();
        LineChart::new("Frequency [MHz]", "RF output power [dBW]")
            .title(title.as_str())
            .series("Pout", &mhz, &dbw)
            .render(&pout_dbw)?;

        let pout_w = dir.join("pout.svg");
        LineChart::new("Frequency [MHz]", "RF output power [W]")
            .title(title.as_str())
            .log_y()
            .y_range(1e-3, 10.0)
            .series("Pout", &mhz, &power)
            .render(&pout_w)?;

        let spectrum_chart = dir.join("spectrum.svg");
        StemChart::new("Harmonic", "RF output power [W]")
            .title(format!(
                "PA Output Spectrum: f = {:.1} MHz, eff={:.1} %, THD={:.1} %",
                self.fundamental_hz / 1e6,
                self.efficiency * 100.0,
                self.thd * 100.0
            ))
            .log_y()
            .stems(&orders, &self.harmonic_power)
            .render(&spectrum_chart)?;

        Ok(vec![pout, spectrum, pout_dbw, pout_w, spectrum_chart])
    }
}

#[derive(Debug, Clone, Default)]
pub struct Amplifier {
    config: AmplifierConfig,
}

impl Amplifier {
    pub fn new(config: AmplifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AmplifierConfig {
        &self.config
    }

    async fn prepare_fxngen(&self, bench: &mut Bench) -> BenchResult<()> {
        let cfg = &self.config;
        println!();
        println!("NOTE: Excitation signal amplitude can be changed with the");
        println!("amplifier.drive_amplitude_v setting or --drive-amplitude.");
        println!();

        let fxngen = bench.fxngen()?;
        for channel in CHANNELS {
            fxngen.set_load_high_z(channel).await?;
        }
        fxngen.set_angle_unit_degrees().await?;

        for channel in CHANNELS {
            fxngen.set_sine(channel).await?;
            fxngen.set_frequency(channel, cfg.carrier_hz).await?;
            fxngen.set_amplitude(channel, cfg.drive_amplitude_v).await?;
            fxngen.set_offset(channel, 0.0).await?;
            fxngen.sync_phase(channel).await?;
        }
        fxngen.set_phase(1, 0.0).await?;
        fxngen.set_inverted_polarity(2).await
    }

    async fn enable_drive(&self, bench: &mut Bench) -> BenchResult<()> {
        match self.config.drive {
            DriveSource::ScopeWavegen => {
                let scope = bench.scope()?;
                scope
                    .set_wavegen_amplitude(self.config.drive_amplitude_v)
                    .await?;
                scope.set_wavegen_output(true).await
            }
            DriveSource::FunctionGenerator => {
                let fxngen = bench.fxngen()?;
                for channel in CHANNELS {
                    fxngen.set_output(channel, true).await?;
                }
                Ok(())
            }
        }
    }

    async fn disable_drive(&self, bench: &mut Bench) -> BenchResult<()> {
        match self.config.drive {
            DriveSource::ScopeWavegen => bench.scope()?.set_wavegen_output(false).await,
            DriveSource::FunctionGenerator => bench.fxngen()?.disable_outputs().await,
        }
    }

    async fn drive_frequency(&self, bench: &mut Bench) -> BenchResult<f64> {
        match self.config.drive {
            DriveSource::ScopeWavegen => bench.scope()?.wavegen_frequency().await,
            DriveSource::FunctionGenerator => bench.fxngen()?.frequency(1).await,
        }
    }
}

#[async_trait]
impl Procedure for Amplifier {
    type Output = AmplifierResult;

    fn name(&self) -> &'static str {
        "amplifier"
    }

    fn required_instruments(&self) -> InstrumentSet {
        let set = InstrumentSet::scope_only().with_supply();
        match self.config.drive {
            DriveSource::ScopeWavegen => set,
            DriveSource::FunctionGenerator => set.with_fxngen(),
        }
    }

    async fn execute<R>(
        &self,
        bench: &mut Bench,
        gate: &mut OperatorGate<R>,
    ) -> BenchResult<AmplifierResult>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let cfg = &self.config;
        let plan = SweepPlan::linear(cfg.start_hz, cfg.stop_hz, cfg.points)?;
        let supply_channel = cfg.supply_channel;

        let scope = bench.scope()?;
        for channel in [1, 2] {
            scope.set_probe_attenuation(channel, 1.0).await?;
        }
        scope.set_trigger_sweep_auto().await?;
        scope.set_trigger_source(1).await?;
        scope.set_trigger_level(0.0).await?;

        if cfg.control_supply_output {
            bench.supply()?.set_output(supply_channel, false).await?;
        }
        match cfg.drive {
            DriveSource::ScopeWavegen => bench.scope()?.set_wavegen_output(false).await?,
            DriveSource::FunctionGenerator => self.prepare_fxngen(bench).await?,
        }

        println!("Connect your subsystem as shown in the wiring diagram and power it on.");
        println!("Make sure you have asserted the /TXEN line (set it low)!");
        gate.confirm(bench).await?;

        if cfg.control_supply_output {
            bench.supply()?.set_output(supply_channel, true).await?;
        }
        if cfg.drive == DriveSource::ScopeWavegen {
            let scope = bench.scope()?;
            scope.set_wavegen_sine().await?;
            scope.set_wavegen_frequency(cfg.carrier_hz).await?;
        }

        // Operating point
        let (_, idle_current) = bench.supply()?.read_operating_point(supply_channel).await?;
        self.enable_drive(bench).await?;

        let scope = bench.scope()?;
        scope.set_timebase_scale(cfg.timebase_s).await?;
        scope.set_coupling(1, Coupling::Ac).await?;
        scope.set_channel_display(1, true).await?;
        scope.set_fft_display(false).await?;

        println!("Adjust the timebase and triggering so the signals are stable.");
        println!(
            "You may adjust the operating frequency if you wish (default: {} MHz).",
            cfg.carrier_hz / 1e6
        );
        println!("Adjust the voltage scale on CH1 so that it is stable and the");
        println!("signal occupies most of the screen.");
        gate.confirm(bench).await?;

        let (supply_voltage, active_current) =
            bench.supply()?.read_operating_point(supply_channel).await?;
        let input_power = dc_power(supply_voltage, active_current);
        let rf_vrms = bench.scope()?.measure_vrms(1).await?;

        println!("Supply voltage: {} V", supply_voltage);
        println!("Current draw (idle): {} A", idle_current);
        println!("Current draw (active): {} A", active_current);
        println!("DC power consumption: {} W", input_power);
        println!("RF RMS voltage output: {} Vrms", rf_vrms);

        // Spectrum
        println!("About to initiate FFT analysis.");
        gate.confirm(bench).await?;

        let scope = bench.scope()?;
        scope.set_channel_display(1, false).await?;
        scope.set_fft_display(true).await?;
        scope
            .configure_fft(cfg.fft_center_hz, cfg.fft_span_hz, 1)
            .await?;
        scope.set_timebase_scale(cfg.fft_timebase_s).await?;
        scope.attach_markers_to_fft().await?;

        let fundamental_hz = self.drive_frequency(bench).await?;
        println!("Source frequency set to: {} MHz", fundamental_hz / 1e6);

        let harmonics_dbv = read_harmonics(
            bench.scope()?,
            fundamental_hz,
            cfg.harmonics,
            cfg.marker_settle,
        )
        .await?;
        let harmonic_power = harmonic_power(&harmonics_dbv, cfg.impedance_ohms);
        println!("Measured harmonics (dBV): {:?}", harmonics_dbv);

        let fundamental_power = harmonic_power.first().copied().unwrap_or(0.0);
        println!(
            "RF power output at {:.1} MHz: {:.6} W",
            fundamental_hz / 1e6,
            fundamental_power
        );
        if fundamental_power < cfg.min_rf_power_w {
            warn!(fundamental_power, "RF output below target");
            println!(
                "Warning: RF output power < {} W for {} Vpp input signal!",
                cfg.min_rf_power_w, cfg.drive_amplitude_v
            );
        }

        let eff = efficiency(fundamental_power, input_power);
        println!("DC-to-RF power conversion efficiency: {} %", eff * 100.0);
        let thd = total_harmonic_distortion_dbv(&harmonics_dbv).unwrap_or(f64::NAN);
        println!("Total harmonic distortion: {} %", thd * 100.0);

        // Frequency response
        println!("About to initiate frequency sweep.");
        gate.confirm(bench).await?;

        let scope = bench.scope()?;
        scope.set_channel_display(1, true).await?;
        scope.set_fft_display(false).await?;
        scope.set_timebase_scale(cfg.timebase_s).await?;

        println!("Measuring frequency response...");
        let driver = BandSweep { drive: cfg.drive };
        let mut record = Sweep::new(plan)
            .settle(cfg.settle)
            .unit(DisplayUnit::mhz(3))
            .run(bench, &driver, gate)
            .await?;
        println!("Done");

        self.disable_drive(bench).await?;

        Ok(AmplifierResult {
            drive_amplitude_v: cfg.drive_amplitude_v,
            impedance_ohms: cfg.impedance_ohms,
            supply_voltage,
            idle_current,
            active_current,
            dc_power: input_power,
            rf_vrms,
            fundamental_hz,
            harmonics_dbv,
            harmonic_power,
            efficiency: eff,
            thd,
            frequency: record.stimulus.clone(),
            vout: record.take_channel("vout"),
        })
    }
}
