//! Operator gate.
//!
//! A blocking wait for the operator between procedure phases. Any line of
//! input proceeds; the abort token (`!`) triggers the ordered shutdown of
//! everything the procedure has open and fails with [`BenchError::Aborted`].
//! There is no timeout.
//!
//! ```text
//!            any other line
//! Waiting ───────────────────▶ Proceeding (returns Ok)
//!    │
//!    │ "!" or end of input
//!    ▼
//! Aborted ──▶ outputs off ──▶ sessions closed ──▶ Err(Aborted)
//! ```

use crate::error::{BenchError, BenchResult};
use async_trait::async_trait;
use std::io::Write as _;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tracing::{debug, error, warn};

/// Input that aborts a procedure.
pub const ABORT_TOKEN: &str = "!";

const PROMPT: &str = "Hit Enter to proceed or ! to abort:";

/// Anything that owns instrument outputs and sessions and can put them in a
/// safe state.
#[async_trait]
pub trait Shutdown: Send {
    /// Turn off every generator output, then close every open session.
    ///
    /// Must be idempotent and best-effort: a failure on one instrument does
    /// not stop the others from being shut down.
    async fn shutdown(&mut self) -> BenchResult<()>;
}

/// What the operator chose at a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Abort,
}

pub struct OperatorGate<R> {
    input: R,
    abort_token: String,
    prompt: String,
}

impl OperatorGate<BufReader<Stdin>> {
    /// Gate reading the process' standard input.
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> OperatorGate<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(input: R) -> Self {
        Self {
            input,
            abort_token: ABORT_TOKEN.to_string(),
            prompt: PROMPT.to_string(),
        }
    }

    pub fn with_abort_token(mut self, token: impl Into<String>) -> Self {
        self.abort_token = token.into();
        self
    }

    /// Prompt and block until the operator answers.
    ///
    /// End of input counts as an abort: a closed console can never confirm.
    pub async fn wait(&mut self) -> BenchResult<GateDecision> {
        print!("{}", self.prompt);
        std::io::stdout().flush()?;

        // raw bytes: a console in another encoding must still be able to proceed
        let mut line = Vec::new();
        if self.input.read_until(b'\n', &mut line).await? == 0 {
            println!();
            warn!("Operator input closed");
            return Ok(GateDecision::Abort);
        }

        let answer = String::from_utf8_lossy(&line);
        let answer = answer.trim_end_matches(['\r', '\n']);
        debug!(answer, "Operator answered");
        if answer == self.abort_token {
            Ok(GateDecision::Abort)
        } else {
            Ok(GateDecision::Proceed)
        }
    }

    /// Wait for the operator and, on abort, shut `target` down and fail with
    /// [`BenchError::Aborted`].
    pub async fn confirm<S>(&mut self, target: &mut S) -> BenchResult<()>
    where
        S: Shutdown + ?Sized,
    {
        match self.wait().await? {
            GateDecision::Proceed => Ok(()),
            GateDecision::Abort => {
                println!("Measurement aborted");
                abort(target).await
            }
        }
    }
}

/// Ordered shutdown followed by [`BenchError::Aborted`].
///
/// Shutdown failures are logged; the caller always sees `Aborted`.
pub async fn abort<S>(target: &mut S) -> BenchResult<()>
where
    S: Shutdown + ?Sized,
{
    if let Err(e) = target.shutdown().await {
        error!(error = %e, "Shutdown after abort did not complete cleanly");
    }
    Err(BenchError::Aborted)
}
