//! Oscilloscope command set (InfiniiVision-style SCPI).
//!
//! Covers the subset the bench procedures use: probe and trigger setup,
//! acquisition, scalar measurements, the built-in waveform generator, the FFT
//! math function and its markers.

use crate::error::{BenchError, BenchResult};
use crate::instrument::scpi::{on_off, scpi_number};
use crate::instrument::session::InstrumentSession;
use tracing::debug;

/// Input coupling of a scope channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
}

impl Coupling {
    fn keyword(self) -> &'static str {
        match self {
            Coupling::Ac => "AC",
            Coupling::Dc => "DC",
        }
    }
}

/// One of the two FFT markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    X1Y1,
    X2Y2,
}

impl Marker {
    fn index(self) -> u8 {
        match self {
            Marker::X1Y1 => 1,
            Marker::X2Y2 => 2,
        }
    }
}

#[derive(Debug)]
pub struct Oscilloscope {
    session: InstrumentSession,
}

impl Oscilloscope {
    pub fn new(session: InstrumentSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &InstrumentSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut InstrumentSession {
        &mut self.session
    }

    pub async fn set_probe_attenuation(&mut self, channel: u8, ratio: f64) -> BenchResult<()> {
        self.session
            .send(&format!("CHANnel{}:PROBe {:+.1}", channel, ratio))
            .await
    }

    pub async fn set_trigger_sweep_auto(&mut self) -> BenchResult<()> {
        self.session.send(":TRIG:SWEep AUTO").await
    }

    pub async fn set_trigger_level(&mut self, volts: f64) -> BenchResult<()> {
        self.session
            .send(&format!(":TRIG:EDGE:LEVel {:+.1}", volts))
            .await
    }

    pub async fn set_trigger_source(&mut self, channel: u8) -> BenchResult<()> {
        self.session
            .send(&format!(":TRIG:EDGE:SOURce CHAN{}", channel))
            .await
    }

    pub async fn trigger_level(&mut self) -> BenchResult<String> {
        self.session.query(":TRIGger:EDGE:LEVel?").await
    }

    /// Horizontal scale in seconds per division.
    pub async fn set_timebase_scale(&mut self, seconds_per_div: f64) -> BenchResult<()> {
        self.session
            .send(&format!(":TIMebase:SCAL {}", scpi_number(seconds_per_div)))
            .await
    }

    pub async fn set_coupling(&mut self, channel: u8, coupling: Coupling) -> BenchResult<()> {
        self.session
            .send(&format!(":CHAN{}:COUP {}", channel, coupling.keyword()))
            .await
    }

    pub async fn set_channel_display(&mut self, channel: u8, on: bool) -> BenchResult<()> {
        self.session
            .send(&format!(":CHAN{}:DISP {}", channel, on_off(on)))
            .await
    }

    /// Vertical scale of a channel, as the raw response string.
    pub async fn channel_scale(&mut self, channel: u8) -> BenchResult<String> {
        self.session.query(&format!(":CHAN{}:SCAL?", channel)).await
    }

    /// Fail with [`BenchError::ScaleMismatch`] unless CH1 and CH2 report the
    /// same vertical scale.
    ///
    /// The responses are compared as strings: both come from the same
    /// instrument and formatter.
    pub async fn ensure_scales_match(&mut self) -> BenchResult<()> {
        let ch1 = self.channel_scale(1).await?;
        let ch2 = self.channel_scale(2).await?;
        if ch1 != ch2 {
            return Err(BenchError::ScaleMismatch { ch1, ch2 });
        }
        debug!(scale = %ch1, "Channel scales match");
        Ok(())
    }

    pub async fn measure_vrms(&mut self, channel: u8) -> BenchResult<f64> {
        self.session
            .query_f64(&format!(":MEAS:VRMS? CHAN{}", channel))
            .await
    }

    pub async fn measure_vpp(&mut self, channel: u8) -> BenchResult<f64> {
        self.session
            .query_f64(&format!(":MEAS:VPP? CHAN{}", channel))
            .await
    }

    /// Phase between `channel` and the next channel, in degrees.
    pub async fn measure_phase(&mut self, channel: u8) -> BenchResult<f64> {
        self.session
            .query_f64(&format!(":MEAS:PHASe? CHAN{}", channel))
            .await
    }

    // Built-in waveform generator

    pub async fn set_wavegen_sine(&mut self) -> BenchResult<()> {
        self.session.send(":WGEN:FUNC SIN").await
    }

    pub async fn set_wavegen_frequency(&mut self, hz: f64) -> BenchResult<()> {
        self.session
            .send(&format!(":WGEN:FREQ {}", scpi_number(hz)))
            .await
    }

    pub async fn wavegen_frequency(&mut self) -> BenchResult<f64> {
        self.session.query_f64("WGEN:FREQ?").await
    }

    pub async fn set_wavegen_amplitude(&mut self, volts: f64) -> BenchResult<()> {
        self.session
            .send(&format!(":WGEN:VOLT {}", scpi_number(volts)))
            .await
    }

    pub async fn set_wavegen_output(&mut self, on: bool) -> BenchResult<()> {
        self.session
            .send(&format!(":WGEN:OUTP {}", on_off(on)))
            .await
    }

    // FFT and markers

    pub async fn set_fft_display(&mut self, on: bool) -> BenchResult<()> {
        self.session
            .send(&format!(":FFT:DISP {}", on_off(on)))
            .await
    }

    /// Centre, span and source of the FFT display.
    pub async fn configure_fft(&mut self, center_hz: f64, span_hz: f64, source: u8) -> BenchResult<()> {
        self.session
            .send(&format!(":FFT:CENT {} MHz", center_hz / 1e6))
            .await?;
        self.session
            .send(&format!(":FFT:SPAN {} MHz", span_hz / 1e6))
            .await?;
        self.session
            .send(&format!(":FFT:SOUR CHAN{}", source))
            .await
    }

    /// Bind both markers to the FFT trace in waveform mode.
    pub async fn attach_markers_to_fft(&mut self) -> BenchResult<()> {
        self.session.send(":MARKer:X1Y1source FFT").await?;
        self.session.send(":MARKer:X2Y2source FFT").await?;
        self.session.send(":MARK:MODE WAV").await
    }

    pub async fn set_marker_x(&mut self, marker: Marker, hz: f64) -> BenchResult<()> {
        self.session
            .send(&format!(":MARKer:X{}P {}", marker.index(), scpi_number(hz)))
            .await
    }

    /// Y position of a marker (dBV on an FFT trace).
    pub async fn marker_y(&mut self, marker: Marker) -> BenchResult<f64> {
        self.session
            .query_f64(&format!(":MARK:Y{}P?", marker.index()))
            .await
    }

    pub async fn close(&mut self) -> BenchResult<()> {
        self.session.close().await
    }
}
