//! Sweep engine ordering, timing and abort behaviour.

use async_trait::async_trait;
use lab_bench::procedures::{OperatorGate, Shutdown, Sweep, SweepDriver, SweepPlan};
use lab_bench::{BenchError, BenchResult};
use std::time::Duration;
use tokio::time::Instant;

/// Context recording what the driver and the shutdown path did.
#[derive(Default)]
struct Trace {
    events: Vec<String>,
    shutdowns: usize,
}

#[async_trait]
impl Shutdown for Trace {
    async fn shutdown(&mut self) -> BenchResult<()> {
        self.shutdowns += 1;
        self.events.push("shutdown".into());
        Ok(())
    }
}

struct Doubler {
    started: Instant,
}

#[async_trait]
impl SweepDriver<Trace> for Doubler {
    fn channels(&self) -> Vec<String> {
        vec!["double".into(), "elapsed_ms".into()]
    }

    async fn apply(&self, ctx: &mut Trace, value: f64) -> BenchResult<()> {
        ctx.events.push(format!("apply {}", value));
        Ok(())
    }

    async fn measure(&self, ctx: &mut Trace) -> BenchResult<Vec<f64>> {
        ctx.events.push("measure".into());
        let index = ctx.events.iter().filter(|e| e.starts_with("apply")).count();
        Ok(vec![
            2.0 * index as f64,
            self.started.elapsed().as_millis() as f64,
        ])
    }
}

struct WrongWidth;

#[async_trait]
impl SweepDriver<Trace> for WrongWidth {
    fn channels(&self) -> Vec<String> {
        vec!["only".into()]
    }

    async fn apply(&self, _: &mut Trace, _: f64) -> BenchResult<()> {
        Ok(())
    }

    async fn measure(&self, _: &mut Trace) -> BenchResult<Vec<f64>> {
        Ok(vec![1.0, 2.0])
    }
}

#[tokio::test(start_paused = true)]
async fn test_apply_settle_measure_order() {
    let plan = SweepPlan::from_values(vec![10.0, 20.0, 30.0]).unwrap();
    let driver = Doubler {
        started: Instant::now(),
    };
    let mut trace = Trace::default();
    let mut gate = OperatorGate::new(&b""[..]);

    let record = Sweep::new(plan)
        .settle(Duration::from_secs(1))
        .run(&mut trace, &driver, &mut gate)
        .await
        .unwrap();

    assert_eq!(
        trace.events,
        vec!["apply 10", "measure", "apply 20", "measure", "apply 30", "measure"]
    );
    assert_eq!(record.stimulus, vec![10.0, 20.0, 30.0]);
    assert_eq!(record.channel("double"), Some(&[2.0, 4.0, 6.0][..]));
    // each reading waits for its own settle delay
    assert_eq!(record.channel("elapsed_ms"), Some(&[1000.0, 2000.0, 3000.0][..]));
}

#[tokio::test(start_paused = true)]
async fn test_confirm_each_abort_stops_before_reading() {
    let plan = SweepPlan::linear(1.0, 3.0, 3).unwrap();
    let driver = Doubler {
        started: Instant::now(),
    };
    let mut trace = Trace::default();
    let mut gate = OperatorGate::new(&b"\n!\n"[..]);

    let err = Sweep::new(plan)
        .confirm_each(true)
        .run(&mut trace, &driver, &mut gate)
        .await
        .unwrap_err();

    assert!(matches!(err, BenchError::Aborted));
    assert_eq!(trace.shutdowns, 1);
    assert_eq!(
        trace.events,
        vec!["apply 1", "measure", "apply 2", "shutdown"]
    );
}

#[tokio::test]
async fn test_reading_count_must_match_channels() {
    let plan = SweepPlan::linear(1.0, 2.0, 2).unwrap();
    let mut trace = Trace::default();
    let mut gate = OperatorGate::new(&b""[..]);

    let err = Sweep::new(plan)
        .run(&mut trace, &WrongWidth, &mut gate)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BenchError::ChannelCount {
            expected: 1,
            actual: 2
        }
    ));
    assert_eq!(trace.shutdowns, 0);
}
