//! Chart rendering.
//!
//! Every procedure renders a handful of small 2-D charts next to its row
//! files. Charts are SVG so they need no system font or image libraries.
//!
//! Logarithmic axes are drawn by plotting `log10` of the data on a linear
//! axis and labelling ticks with the corresponding power of ten. Points that
//! cannot be shown on a log axis (zero or negative) are skipped.

use crate::error::{BenchError, BenchResult};
use plotters::prelude::*;
use std::path::Path;
use tracing::{debug, info};

const CHART_SIZE: (u32, u32) = (900, 600);
const PALETTE: [RGBColor; 4] = [BLUE, RED, GREEN, MAGENTA];

/// Axis scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisScale {
    #[default]
    Linear,
    Log,
}

impl AxisScale {
    fn project(self, value: f64) -> f64 {
        match self {
            AxisScale::Linear => value,
            AxisScale::Log => value.log10(),
        }
    }

    fn tick_label(self, projected: f64) -> String {
        match self {
            AxisScale::Linear => {
                let text = format!("{:.3}", projected);
                let text = text.trim_end_matches('0').trim_end_matches('.');
                if text == "-0" {
                    "0".to_string()
                } else {
                    text.to_string()
                }
            }
            AxisScale::Log => format!("{:.0e}", 10f64.powf(projected)),
        }
    }
}

#[derive(Debug, Clone)]
struct Series {
    label: String,
    points: Vec<(f64, f64)>,
}

/// One or more line series over a shared pair of axes.
#[derive(Debug, Clone)]
pub struct LineChart {
    title: Option<String>,
    x_desc: String,
    y_desc: String,
    x_scale: AxisScale,
    y_scale: AxisScale,
    y_range: Option<(f64, f64)>,
    series: Vec<Series>,
}

impl LineChart {
    pub fn new(x_desc: impl Into<String>, y_desc: impl Into<String>) -> Self {
        Self {
            title: None,
            x_desc: x_desc.into(),
            y_desc: y_desc.into(),
            x_scale: AxisScale::Linear,
            y_scale: AxisScale::Linear,
            y_range: None,
            series: Vec::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn log_x(mut self) -> Self {
        self.x_scale = AxisScale::Log;
        self
    }

    pub fn log_y(mut self) -> Self {
        self.y_scale = AxisScale::Log;
        self
    }

    /// Fix the y axis instead of fitting it to the data.
    pub fn y_range(mut self, min: f64, max: f64) -> Self {
        self.y_range = Some((min, max));
        self
    }

    /// Add a series. `xs` and `ys` are paired by index.
    pub fn series(mut self, label: impl Into<String>, xs: &[f64], ys: &[f64]) -> Self {
        let points = xs.iter().copied().zip(ys.iter().copied()).collect();
        self.series.push(Series {
            label: label.into(),
            points,
        });
        self
    }

    fn projected(&self, series: &Series) -> Vec<(f64, f64)> {
        series
            .points
            .iter()
            .map(|&(x, y)| (self.x_scale.project(x), self.y_scale.project(y)))
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect()
    }

    /// Render the chart to an SVG file.
    pub fn render(&self, path: &Path) -> BenchResult<()> {
        let projected: Vec<Vec<(f64, f64)>> =
            self.series.iter().map(|s| self.projected(s)).collect();
        let all = projected.iter().flatten().copied();

        let x_range = padded_range(all.clone().map(|(x, _)| x)).ok_or_else(|| {
            BenchError::Plot(format!("{}: no finite points to plot", path.display()))
        })?;
        let y_range = match self.y_range {
            Some((min, max)) => (self.y_scale.project(min), self.y_scale.project(max)),
            None => padded_range(all.map(|(_, y)| y)).unwrap_or((0.0, 1.0)),
        };

        let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(plot_error)?;

        let mut builder = ChartBuilder::on(&root);
        builder
            .margin(15)
            .x_label_area_size(45)
            .y_label_area_size(70);
        if let Some(title) = &self.title {
            builder.caption(title, ("sans-serif", 20));
        }
        let mut chart = builder
            .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)
            .map_err(plot_error)?;

        let x_ticks = |v: &f64| self.x_scale.tick_label(*v);
        let y_ticks = |v: &f64| self.y_scale.tick_label(*v);
        chart
            .configure_mesh()
            .x_desc(self.x_desc.as_str())
            .y_desc(self.y_desc.as_str())
            .x_label_formatter(&x_ticks)
            .y_label_formatter(&y_ticks)
            .draw()
            .map_err(plot_error)?;

        for (index, (series, points)) in self.series.iter().zip(projected).enumerate() {
            let color = PALETTE[index % PALETTE.len()];
            chart
                .draw_series(LineSeries::new(points, color.stroke_width(2)))
                .map_err(plot_error)?
                .label(series.label.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }

        if self.series.len() > 1 {
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()
                .map_err(plot_error)?;
        }

        root.present().map_err(plot_error)?;
        info!(path = %path.display(), "Saved chart");
        Ok(())
    }
}

/// Vertical stems from the bottom of the plot up to each value.
#[derive(Debug, Clone)]
pub struct StemChart {
    title: Option<String>,
    x_desc: String,
    y_desc: String,
    y_scale: AxisScale,
    points: Vec<(f64, f64)>,
}

impl StemChart {
    pub fn new(x_desc: impl Into<String>, y_desc: impl Into<String>) -> Self {
        Self {
            title: None,
            x_desc: x_desc.into(),
            y_desc: y_desc.into(),
            y_scale: AxisScale::Linear,
            points: Vec::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn log_y(mut self) -> Self {
        self.y_scale = AxisScale::Log;
        self
    }

    pub fn stems(mut self, xs: &[f64], ys: &[f64]) -> Self {
        self.points = xs.iter().copied().zip(ys.iter().copied()).collect();
        self
    }

    pub fn render(&self, path: &Path) -> BenchResult<()> {
        let points: Vec<(f64, f64)> = self
            .points
            .iter()
            .map(|&(x, y)| (x, self.y_scale.project(y)))
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();

        let (x_min, x_max) = padded_range(points.iter().map(|&(x, _)| x)).ok_or_else(|| {
            BenchError::Plot(format!("{}: no finite points to plot", path.display()))
        })?;
        let (y_min, y_max) = padded_range(points.iter().map(|&(_, y)| y)).unwrap_or((0.0, 1.0));
        let x_min = x_min.min(points.iter().map(|&(x, _)| x - 0.5).fold(f64::INFINITY, f64::min));
        let x_max = x_max.max(points.iter().map(|&(x, _)| x + 0.5).fold(f64::NEG_INFINITY, f64::max));
        let base = match self.y_scale {
            AxisScale::Linear => y_min.min(0.0),
            AxisScale::Log => y_min,
        };

        let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(plot_error)?;

        let mut builder = ChartBuilder::on(&root);
        builder
            .margin(15)
            .x_label_area_size(45)
            .y_label_area_size(70);
        if let Some(title) = &self.title {
            builder.caption(title, ("sans-serif", 18));
        }
        let mut chart = builder
            .build_cartesian_2d(x_min..x_max, base..y_max)
            .map_err(plot_error)?;

        let y_ticks = |v: &f64| self.y_scale.tick_label(*v);
        chart
            .configure_mesh()
            .x_desc(self.x_desc.as_str())
            .y_desc(self.y_desc.as_str())
            .y_label_formatter(&y_ticks)
            .draw()
            .map_err(plot_error)?;

        chart
            .draw_series(
                points
                    .iter()
                    .map(|&(x, y)| PathElement::new(vec![(x, base), (x, y)], BLUE.stroke_width(2))),
            )
            .map_err(plot_error)?;
        chart
            .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 5, BLUE.filled())))
            .map_err(plot_error)?;

        root.present().map_err(plot_error)?;
        info!(path = %path.display(), "Saved chart");
        Ok(())
    }
}

/// Min/max of `values`, widened by 5% (or by 1 when all values are equal).
fn padded_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() || !max.is_finite() {
        return None;
    }
    if min == max {
        return Some((min - 1.0, max + 1.0));
    }
    let pad = (max - min) * 0.05;
    Some((min - pad, max + pad))
}

fn plot_error<E: std::fmt::Display>(err: E) -> BenchError {
    debug!(error = %err, "plotters backend error");
    BenchError::Plot(err.to_string())
}
