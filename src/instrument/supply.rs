//! Programmable DC power supply command set.

use crate::error::BenchResult;
use crate::instrument::scpi::on_off;
use crate::instrument::session::InstrumentSession;

#[derive(Debug)]
pub struct PowerSupply {
    session: InstrumentSession,
}

impl PowerSupply {
    pub fn new(session: InstrumentSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &InstrumentSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut InstrumentSession {
        &mut self.session
    }

    pub async fn set_output(&mut self, channel: u8, on: bool) -> BenchResult<()> {
        self.session
            .send(&format!("OUTP {}, (@{})", on_off(on), channel))
            .await
    }

    /// Programmed output voltage of `channel`.
    pub async fn voltage(&mut self, channel: u8) -> BenchResult<f64> {
        self.session
            .query_f64(&format!("VOLT? (@{})", channel))
            .await
    }

    /// Measured output current of `channel`.
    pub async fn measure_current(&mut self, channel: u8) -> BenchResult<f64> {
        self.session
            .query_f64(&format!("MEAS:CURR? CH{}", channel))
            .await
    }

    /// Voltage and current of `channel`, read back to back.
    pub async fn read_operating_point(&mut self, channel: u8) -> BenchResult<(f64, f64)> {
        let volts = self.voltage(channel).await?;
        let amps = self.measure_current(channel).await?;
        Ok((volts, amps))
    }

    pub async fn close(&mut self) -> BenchResult<()> {
        self.session.close().await
    }
}
