//! Two-channel function generator command set (33500-series SCPI).

use crate::error::BenchResult;
use crate::instrument::scpi::{on_off, scpi_number};
use crate::instrument::session::InstrumentSession;

/// Output channels of the generator.
pub const CHANNELS: [u8; 2] = [1, 2];

#[derive(Debug)]
pub struct FunctionGenerator {
    session: InstrumentSession,
}

impl FunctionGenerator {
    pub fn new(session: InstrumentSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &InstrumentSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut InstrumentSession {
        &mut self.session
    }

    /// High-impedance load on `channel`, so the set amplitude is the
    /// open-circuit amplitude.
    pub async fn set_load_high_z(&mut self, channel: u8) -> BenchResult<()> {
        self.session
            .send(&format!("OUTPUT{}:LOAD INF", channel))
            .await
    }

    pub async fn set_angle_unit_degrees(&mut self) -> BenchResult<()> {
        self.session.send("UNIT:ANGL DEG").await
    }

    pub async fn set_sine(&mut self, channel: u8) -> BenchResult<()> {
        self.session
            .send(&format!("SOUR{}:FUNCtion SIN", channel))
            .await
    }

    pub async fn set_frequency(&mut self, channel: u8, hz: f64) -> BenchResult<()> {
        self.session
            .send(&format!("SOUR{}:FREQuency {}", channel, scpi_number(hz)))
            .await
    }

    pub async fn frequency(&mut self, channel: u8) -> BenchResult<f64> {
        self.session
            .query_f64(&format!("SOUR{}:FREQ?", channel))
            .await
    }

    pub async fn set_amplitude(&mut self, channel: u8, volts: f64) -> BenchResult<()> {
        self.session
            .send(&format!("SOUR{}:VOLTage {}", channel, scpi_number(volts)))
            .await
    }

    pub async fn set_offset(&mut self, channel: u8, volts: f64) -> BenchResult<()> {
        self.session
            .send(&format!("SOUR{}:VOLTage:OFFSet {}", channel, scpi_number(volts)))
            .await
    }

    /// Phase in degrees (requires [`set_angle_unit_degrees`](Self::set_angle_unit_degrees)).
    pub async fn set_phase(&mut self, channel: u8, degrees: f64) -> BenchResult<()> {
        self.session
            .send(&format!("SOUR{}:PHASe {}", channel, scpi_number(degrees)))
            .await
    }

    /// Re-align the phase of both channels after a frequency change.
    pub async fn sync_phase(&mut self, channel: u8) -> BenchResult<()> {
        self.session
            .send(&format!("SOUR{}:PHASe:SYNC", channel))
            .await
    }

    pub async fn set_inverted_polarity(&mut self, channel: u8) -> BenchResult<()> {
        self.session
            .send(&format!("OUTPut{}:POL INV", channel))
            .await
    }

    pub async fn set_output(&mut self, channel: u8, on: bool) -> BenchResult<()> {
        self.session
            .send(&format!("OUTPut{} {}", channel, on_off(on)))
            .await
    }

    pub async fn disable_outputs(&mut self) -> BenchResult<()> {
        for channel in CHANNELS {
            self.set_output(channel, false).await?;
        }
        Ok(())
    }

    pub async fn close(&mut self) -> BenchResult<()> {
        self.session.close().await
    }
}
