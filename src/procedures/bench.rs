//! The set of instrument sessions a procedure owns.
//!
//! A [`Bench`] is built once at the start of a procedure, handed to it by
//! mutable reference, and shut down or closed exactly once at the end. The
//! abort path receives it explicitly through the [`Shutdown`] trait.

use crate::config::SiteAddresses;
use crate::error::{BenchError, BenchResult};
use crate::instrument::{
    FunctionGenerator, InstrumentSession, InstrumentSet, Oscilloscope, PowerSupply,
    ResourceAddress, SessionOptions,
};
use crate::procedures::gate::Shutdown;
use async_trait::async_trait;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct Bench {
    scope: Option<Oscilloscope>,
    fxngen: Option<FunctionGenerator>,
    supply: Option<PowerSupply>,
}

impl Bench {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, scope: Oscilloscope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_fxngen(mut self, fxngen: FunctionGenerator) -> Self {
        self.fxngen = Some(fxngen);
        self
    }

    pub fn with_supply(mut self, supply: PowerSupply) -> Self {
        self.supply = Some(supply);
        self
    }

    /// Open, identify and announce every instrument in `set`.
    pub async fn connect(
        site: &SiteAddresses,
        set: InstrumentSet,
        options: &SessionOptions,
    ) -> BenchResult<Self> {
        let mut bench = Self::new();

        if set.scope {
            let session = open_identified("oscilloscope", &site.scope, options).await?;
            bench.scope = Some(Oscilloscope::new(session));
        }
        if set.fxngen {
            let session = open_identified("function generator", &site.fxngen, options).await?;
            bench.fxngen = Some(FunctionGenerator::new(session));
        }
        if set.supply {
            let session = open_identified("power supply", &site.supply, options).await?;
            bench.supply = Some(PowerSupply::new(session));
        }

        Ok(bench)
    }

    pub fn scope(&mut self) -> BenchResult<&mut Oscilloscope> {
        self.scope
            .as_mut()
            .ok_or(BenchError::NotConnected("oscilloscope"))
    }

    pub fn fxngen(&mut self) -> BenchResult<&mut FunctionGenerator> {
        self.fxngen
            .as_mut()
            .ok_or(BenchError::NotConnected("function generator"))
    }

    pub fn supply(&mut self) -> BenchResult<&mut PowerSupply> {
        self.supply
            .as_mut()
            .ok_or(BenchError::NotConnected("power supply"))
    }

    /// Which instruments this bench holds.
    pub fn instruments(&self) -> InstrumentSet {
        InstrumentSet {
            scope: self.scope.is_some(),
            fxngen: self.fxngen.is_some(),
            supply: self.supply.is_some(),
        }
    }

    /// Fail with [`BenchError::ScaleMismatch`] unless the scope's CH1 and CH2
    /// share a vertical scale. The operator is told why.
    pub async fn check_scales(&mut self) -> BenchResult<()> {
        let result = self.scope()?.ensure_scales_match().await;
        if let Err(BenchError::ScaleMismatch { .. }) = &result {
            println!("The scales of the 2 channels do not match.");
        }
        result
    }

    /// Turn off every signal output of every open session: the scope's
    /// built-in generator and both function generator channels.
    ///
    /// The supply is left alone; it powers the device under test.
    pub async fn disable_outputs(&mut self) -> Vec<BenchError> {
        let mut errors = Vec::new();

        if let Some(scope) = self.scope.as_mut().filter(|s| s.session().is_open()) {
            if let Err(e) = scope.set_wavegen_output(false).await {
                errors.push(e);
            }
        }
        if let Some(fxngen) = self.fxngen.as_mut().filter(|f| f.session().is_open()) {
            if let Err(e) = fxngen.disable_outputs().await {
                errors.push(e);
            }
        }

        errors
    }

    /// Close every session. Already-closed sessions are skipped.
    pub async fn close_all(&mut self) -> BenchResult<()> {
        let errors = self.close_sessions().await;
        into_result(errors)
    }

    async fn close_sessions(&mut self) -> Vec<BenchError> {
        let mut errors = Vec::new();
        if let Some(scope) = self.scope.as_mut() {
            if let Err(e) = scope.close().await {
                errors.push(e);
            }
        }
        if let Some(fxngen) = self.fxngen.as_mut() {
            if let Err(e) = fxngen.close().await {
                errors.push(e);
            }
        }
        if let Some(supply) = self.supply.as_mut() {
            if let Err(e) = supply.close().await {
                errors.push(e);
            }
        }
        errors
    }
}

#[async_trait]
impl Shutdown for Bench {
    async fn shutdown(&mut self) -> BenchResult<()> {
        let mut errors = self.disable_outputs().await;
        errors.extend(self.close_sessions().await);
        for e in &errors {
            warn!(error = %e, "Shutdown step failed");
        }
        info!("Bench shut down");
        into_result(errors)
    }
}

async fn open_identified(
    role: &str,
    resource: &str,
    options: &SessionOptions,
) -> BenchResult<InstrumentSession> {
    let address: ResourceAddress = resource.parse()?;
    let mut session = InstrumentSession::open(role, &address, options.clone()).await?;
    let model = session.identify().await?.model.clone();
    println!("Connected to {}: {}", role, model);
    Ok(session)
}

fn into_result(errors: Vec<BenchError>) -> BenchResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(BenchError::ShutdownFailed(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn session(name: &str) -> (InstrumentSession, DuplexStream) {
        let (host, device) = tokio::io::duplex(1024);
        (
            InstrumentSession::new(name, Box::new(host), SessionOptions::default()),
            device,
        )
    }

    async fn drain(mut device: DuplexStream) -> String {
        let mut text = String::new();
        device.read_to_string(&mut text).await.unwrap();
        text
    }

    #[test]
    fn missing_instrument_is_not_connected() {
        let mut bench = Bench::new();
        assert!(matches!(bench.scope(), Err(BenchError::NotConnected(_))));
        assert!(matches!(bench.supply(), Err(BenchError::NotConnected(_))));
        assert_eq!(bench.instruments(), InstrumentSet::default());
    }

    #[tokio::test]
    async fn shutdown_turns_outputs_off_then_closes() {
        let (scope, scope_dev) = session("oscilloscope");
        let (fxngen, fxngen_dev) = session("function generator");
        let (supply, supply_dev) = session("power supply");
        let mut bench = Bench::new()
            .with_scope(Oscilloscope::new(scope))
            .with_fxngen(FunctionGenerator::new(fxngen))
            .with_supply(PowerSupply::new(supply));

        bench.shutdown().await.unwrap();
        // second shutdown finds everything closed and sends nothing
        bench.shutdown().await.unwrap();

        assert_eq!(drain(scope_dev).await, ":WGEN:OUTP OFF\n");
        assert_eq!(drain(fxngen_dev).await, "OUTPut1 OFF\nOUTPut2 OFF\n");
        assert_eq!(drain(supply_dev).await, "");
        assert!(!bench.scope().unwrap().session().is_open());
    }

    #[tokio::test]
    async fn close_all_sends_nothing() {
        let (scope, scope_dev) = session("oscilloscope");
        let mut bench = Bench::new().with_scope(Oscilloscope::new(scope));
        bench.close_all().await.unwrap();
        assert_eq!(drain(scope_dev).await, "");
    }
}
