//! Sweep-measure-record loop.
//!
//! For every stimulus value, in order: program the instruments, wait for
//! the settle delay, optionally hold at the operator gate, then read every
//! declared channel and store the readings at the same index. Records are
//! sized to the plan up front and only handed back once the sweep completes,
//! so index `k` of every record always belongs to stimulus `k`.
//!
//! There are no retries. Any error from the driver ends the sweep.

use crate::error::{BenchError, BenchResult};
use crate::procedures::gate::{OperatorGate, Shutdown};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncBufRead;
use tracing::{debug, info};

/// Ordered stimulus values. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    values: Vec<f64>,
}

impl SweepPlan {
    /// `count` points from `start` to `stop` inclusive, evenly spaced.
    pub fn linear(start: f64, stop: f64, count: usize) -> BenchResult<Self> {
        if !start.is_finite() || !stop.is_finite() {
            return Err(BenchError::InvalidSweep(format!(
                "bounds must be finite (start={}, stop={})",
                start, stop
            )));
        }
        let values = match count {
            0 => return Err(BenchError::InvalidSweep("zero points requested".into())),
            1 => vec![start],
            _ => {
                let last = (count - 1) as f64;
                (0..count)
                    .map(|k| start + (stop - start) * (k as f64 / last))
                    .collect()
            }
        };
        Ok(Self { values })
    }

    pub fn from_values(values: Vec<f64>) -> BenchResult<Self> {
        if values.is_empty() {
            return Err(BenchError::InvalidSweep("no stimulus values".into()));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(BenchError::InvalidSweep(format!(
                "stimulus value {} is not finite",
                bad
            )));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first(&self) -> f64 {
        self.values[0]
    }

    pub fn last(&self) -> f64 {
        self.values[self.values.len() - 1]
    }
}

/// One reading per sweep index for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    name: String,
    values: Vec<f64>,
}

impl MeasurementRecord {
    /// Zero-filled record of `len` slots.
    pub fn new(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            values: vec![0.0; len],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    fn set(&mut self, index: usize, value: f64) {
        self.values[index] = value;
    }
}

/// Stimulus plus every channel's record, index-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepRecord {
    pub stimulus: Vec<f64>,
    pub records: Vec<MeasurementRecord>,
}

impl SweepRecord {
    /// Record of the channel called `name`.
    pub fn channel(&self, name: &str) -> Option<&[f64]> {
        self.records
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.values.as_slice())
    }

    /// Like [`channel`](Self::channel), consuming the record.
    pub fn take_channel(&mut self, name: &str) -> Vec<f64> {
        self.records
            .iter_mut()
            .find(|r| r.name == name)
            .map(|r| std::mem::take(&mut r.values))
            .unwrap_or_default()
    }
}

/// Programs the stimulus and takes the readings of one sweep.
#[async_trait]
pub trait SweepDriver<C: ?Sized + Send>: Send + Sync {
    /// Names of the channels `measure` returns, in order.
    fn channels(&self) -> Vec<String>;

    /// Program the instruments for stimulus `value`.
    async fn apply(&self, ctx: &mut C, value: f64) -> BenchResult<()>;

    /// One reading per channel.
    async fn measure(&self, ctx: &mut C) -> BenchResult<Vec<f64>>;
}

/// How the stimulus is shown in progress lines.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayUnit {
    pub name: String,
    /// Stimulus is divided by this before printing.
    pub scale: f64,
    pub precision: usize,
}

impl DisplayUnit {
    pub fn hz(precision: usize) -> Self {
        Self::new("Hz", 1.0, precision)
    }

    pub fn khz(precision: usize) -> Self {
        Self::new("kHz", 1e3, precision)
    }

    pub fn mhz(precision: usize) -> Self {
        Self::new("MHz", 1e6, precision)
    }

    pub fn new(name: impl Into<String>, scale: f64, precision: usize) -> Self {
        Self {
            name: name.into(),
            scale,
            precision,
        }
    }

    fn format(&self, value: f64) -> String {
        format!("{:.*} {}", self.precision, value / self.scale, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Sweep {
    plan: SweepPlan,
    settle: Option<Duration>,
    confirm_each: bool,
    label: String,
    unit: DisplayUnit,
}

impl Sweep {
    pub fn new(plan: SweepPlan) -> Self {
        Self {
            plan,
            settle: None,
            confirm_each: false,
            label: "Frequency point".to_string(),
            unit: DisplayUnit::hz(2),
        }
    }

    /// Delay between programming a point and reading it. Zero disables it.
    pub fn settle(mut self, delay: Duration) -> Self {
        self.settle = (!delay.is_zero()).then_some(delay);
        self
    }

    /// Hold at the operator gate before every reading.
    pub fn confirm_each(mut self, confirm: bool) -> Self {
        self.confirm_each = confirm;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn unit(mut self, unit: DisplayUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    pub async fn run<C, D, R>(
        &self,
        ctx: &mut C,
        driver: &D,
        gate: &mut OperatorGate<R>,
    ) -> BenchResult<SweepRecord>
    where
        C: Shutdown + ?Sized,
        D: SweepDriver<C> + ?Sized,
        R: AsyncBufRead + Unpin + Send,
    {
        let total = self.plan.len();
        let mut records: Vec<MeasurementRecord> = driver
            .channels()
            .into_iter()
            .map(|name| MeasurementRecord::new(name, total))
            .collect();
        info!(points = total, channels = records.len(), "Starting sweep");

        for (index, &value) in self.plan.values().iter().enumerate() {
            driver.apply(ctx, value).await?;

            if let Some(delay) = self.settle {
                debug!(?delay, "Settling");
                tokio::time::sleep(delay).await;
            }

            if self.confirm_each {
                gate.confirm(ctx).await?;
            }

            let readings = driver.measure(ctx).await?;
            if readings.len() != records.len() {
                return Err(BenchError::ChannelCount {
                    expected: records.len(),
                    actual: readings.len(),
                });
            }
            for (record, &reading) in records.iter_mut().zip(&readings) {
                record.set(index, reading);
            }

            let readings = readings
                .iter()
                .map(|r| format!("{:.6}", r))
                .collect::<Vec<_>>()
                .join(" ");
            println!(
                "{} {}/{}, f={}: {}",
                self.label,
                index + 1,
                total,
                self.unit.format(value),
                readings
            );
        }

        Ok(SweepRecord {
            stimulus: self.plan.values().to_vec(),
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_plan_matches_expected_steps() {
        let plan = SweepPlan::linear(100.0, 6100.0, 21).unwrap();
        assert_eq!(plan.len(), 21);
        assert_eq!(plan.first(), 100.0);
        assert_eq!(plan.last(), 6100.0);
        for pair in plan.values().windows(2) {
            assert!((pair[1] - pair[0] - 300.0).abs() < 1e-9);
        }
    }

    #[test]
    fn degenerate_plans() {
        assert_eq!(SweepPlan::linear(5.0, 9.0, 1).unwrap().values(), &[5.0]);
        assert!(SweepPlan::linear(0.0, 1.0, 0).is_err());
        assert!(SweepPlan::linear(f64::NAN, 1.0, 3).is_err());
        assert!(SweepPlan::from_values(vec![]).is_err());
        assert!(SweepPlan::from_values(vec![1.0, f64::INFINITY]).is_err());
    }

    #[test]
    fn descending_plan() {
        let plan = SweepPlan::linear(18e6, 4e6, 3).unwrap();
        assert_eq!(plan.values(), &[18e6, 11e6, 4e6]);
    }

    #[test]
    fn progress_units() {
        assert_eq!(DisplayUnit::khz(2).format(6200.0), "6.20 kHz");
        assert_eq!(DisplayUnit::mhz(1).format(14e6), "14.0 MHz");
    }

    #[test]
    fn take_channel_by_name() {
        let mut record = SweepRecord {
            stimulus: vec![1.0],
            records: vec![MeasurementRecord::new("usb", 1)],
        };
        assert_eq!(record.channel("usb"), Some(&[0.0][..]));
        assert_eq!(record.channel("lsb"), None);
        assert_eq!(record.take_channel("usb"), vec![0.0]);
    }
}
