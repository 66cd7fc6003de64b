//! Bench procedures.
//!
//! A procedure is a linear script: configure the instruments, hold at the
//! operator gate, sweep, and hand back the captured records. Saving and
//! plotting happen afterwards, once the sessions are closed.
//!
//! ```text
//! Bench::connect ──▶ Procedure::execute ──┬─ Ok ───────────────▶ close all ──▶ Output::save
//!                                         ├─ Aborted / scale ──▶ shutdown ───▶ Err
//!                                         └─ transport fault ─────────────────▶ Err
//! ```
//!
//! - **Demodulator**: SSB demodulator sideband rejection ([`demodulator`])
//! - **Modulator**: I/Q modulator gain and phase balance ([`modulator`])
//! - **Amplifier**: PA efficiency, harmonics and frequency response ([`amplifier`])

pub mod amplifier;
pub mod bench;
pub mod demodulator;
pub mod gate;
pub mod modulator;
pub mod sweep;

pub use amplifier::{Amplifier, AmplifierConfig, AmplifierResult, DriveSource};
pub use bench::Bench;
pub use demodulator::{Demodulator, DemodulatorConfig, DemodulatorResult};
pub use gate::{GateDecision, OperatorGate, Shutdown};
pub use modulator::{Modulator, ModulatorConfig, ModulatorResult};
pub use sweep::{DisplayUnit, MeasurementRecord, Sweep, SweepDriver, SweepPlan, SweepRecord};

use crate::config::SiteAddresses;
use crate::error::BenchResult;
use crate::instrument::{InstrumentSet, SessionOptions};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufRead;
use tracing::{error, info, warn};

/// Results that can be written to an output directory.
pub trait ProcedureOutput {
    /// Write row files and charts into `dir`, returning the paths written.
    fn save(&self, dir: &Path) -> BenchResult<Vec<PathBuf>>;
}

#[async_trait]
pub trait Procedure: Send + Sync {
    type Output: ProcedureOutput + Send;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Instruments [`Bench::connect`] must open.
    fn required_instruments(&self) -> InstrumentSet;

    /// Run the measurement. Must leave generator outputs off on success; the
    /// caller closes the sessions.
    async fn execute<R>(
        &self,
        bench: &mut Bench,
        gate: &mut OperatorGate<R>,
    ) -> BenchResult<Self::Output>
    where
        R: AsyncBufRead + Unpin + Send;
}

/// Execute `procedure` on an already connected bench.
///
/// On success every session is closed; close failures are logged and the
/// output is still returned. Operator aborts and failed
/// measurement preconditions go through [`Shutdown::shutdown`] before the
/// error is returned; other errors are returned as they are.
pub async fn run_procedure<P, R>(
    procedure: &P,
    bench: &mut Bench,
    gate: &mut OperatorGate<R>,
) -> BenchResult<P::Output>
where
    P: Procedure + ?Sized,
    R: AsyncBufRead + Unpin + Send,
{
    info!(procedure = procedure.name(), "Starting procedure");
    match procedure.execute(bench, gate).await {
        Ok(output) => {
            // output is already captured
            if let Err(close_err) = bench.close_all().await {
                warn!(procedure = procedure.name(), error = %close_err, "Closing sessions failed");
            }
            info!(procedure = procedure.name(), "Procedure complete");
            Ok(output)
        }
        Err(err) if err.requires_shutdown() => {
            if let Err(shutdown_err) = bench.shutdown().await {
                error!(error = %shutdown_err, "Shutdown did not complete cleanly");
            }
            Err(err)
        }
        Err(err) => {
            error!(procedure = procedure.name(), error = %err, "Procedure failed");
            Err(err)
        }
    }
}

/// Connect the instruments `procedure` needs at `site` and run it.
pub async fn run_at_site<P, R>(
    procedure: &P,
    site: &SiteAddresses,
    options: &SessionOptions,
    gate: &mut OperatorGate<R>,
) -> BenchResult<P::Output>
where
    P: Procedure + ?Sized,
    R: AsyncBufRead + Unpin + Send,
{
    let mut bench = Bench::connect(site, procedure.required_instruments(), options).await?;
    run_procedure(procedure, &mut bench, gate).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{InstrumentSession, Oscilloscope};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

    /// Transport whose shutdown always fails.
    struct StuckClose;

    impl AsyncRead for StuckClose {
        fn poll_read(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            _: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for StuckClose {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "link dropped")))
        }
    }

    struct Idle;

    struct IdleOutput;

    impl ProcedureOutput for IdleOutput {
        fn save(&self, _: &Path) -> BenchResult<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl Procedure for Idle {
        type Output = IdleOutput;

        fn name(&self) -> &'static str {
            "idle"
        }

        fn required_instruments(&self) -> InstrumentSet {
            InstrumentSet::default()
        }

        async fn execute<R>(
            &self,
            _: &mut Bench,
            _: &mut OperatorGate<R>,
        ) -> BenchResult<IdleOutput>
        where
            R: AsyncBufRead + Unpin + Send,
        {
            Ok(IdleOutput)
        }
    }

    #[tokio::test]
    async fn failed_close_still_returns_output() {
        let session = InstrumentSession::new(
            "oscilloscope",
            Box::new(StuckClose),
            SessionOptions::default(),
        );
        let mut bench = Bench::new().with_scope(Oscilloscope::new(session));
        let mut gate = OperatorGate::new(&b""[..]);

        let output = run_procedure(&Idle, &mut bench, &mut gate).await;

        assert!(output.is_ok());
        assert!(!bench.scope().unwrap().session().is_open());
    }
}
