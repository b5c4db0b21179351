use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use plotters::prelude::*;
use thiserror::Error;

use crate::config::GraphConfig;

pub const GRAPH_TITLE: &str = "Latency Over the Last 6 Hours";
pub const GRAPH_Y_LABEL: &str = "Latency (ms)";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to draw graph: {0}")]
    Draw(String),
}

/// Renders a latency series to an image file. Unknown points must show as
/// gaps, never as zeros.
pub trait GraphRenderer {
    fn render(
        &self,
        series: &[(DateTime<Utc>, Option<f64>)],
        path: &Path,
    ) -> Result<(), RenderError>;
}

/// PNG renderer: red line, titled, labelled vertical axis. An empty series
/// still produces a placeholder chart so the alert path never has to
/// special-case it.
pub struct PlottersRenderer {
    width: u32,
    height: u32,
}

impl PlottersRenderer {
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
        }
    }
}

impl GraphRenderer for PlottersRenderer {
    fn render(
        &self,
        series: &[(DateTime<Utc>, Option<f64>)],
        path: &Path,
    ) -> Result<(), RenderError> {
        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        let (x_start, x_end) = match (series.first(), series.last()) {
            (Some((first, _)), Some((last, _))) if first < last => (*first, *last),
            _ => {
                let now = Utc::now();
                (now - ChronoDuration::hours(6), now)
            }
        };

        let y_max = series
            .iter()
            .filter_map(|(_, value)| *value)
            .fold(0.0_f64, f64::max);
        let y_end = if y_max > 0.0 { y_max * 1.1 } else { 100.0 };

        let mut chart = ChartBuilder::on(&root)
            .caption(GRAPH_TITLE, ("sans-serif", 16))
            .margin(8)
            .x_label_area_size(24)
            .y_label_area_size(44)
            .build_cartesian_2d(x_start..x_end, 0.0_f64..y_end)
            .map_err(draw_err)?;

        chart
            .configure_mesh()
            .y_desc(GRAPH_Y_LABEL)
            .x_label_formatter(&|ts: &DateTime<Utc>| ts.format("%H:%M").to_string())
            .draw()
            .map_err(draw_err)?;

        for run in contiguous_runs(series) {
            chart
                .draw_series(LineSeries::new(run.iter().copied(), &RED))
                .map_err(draw_err)?;
            // A one-point run draws no line; mark points so it still shows.
            chart
                .draw_series(
                    run.iter()
                        .map(|(ts, v)| Circle::new((*ts, *v), 1, RED.filled())),
                )
                .map_err(draw_err)?;
        }

        root.present().map_err(draw_err)?;
        Ok(())
    }
}

/// Split the series at unknown points so gaps stay visible in the plot.
fn contiguous_runs(series: &[(DateTime<Utc>, Option<f64>)]) -> Vec<Vec<(DateTime<Utc>, f64)>> {
    let mut runs = Vec::new();
    let mut run: Vec<(DateTime<Utc>, f64)> = Vec::new();
    for (ts, value) in series {
        match value {
            Some(v) => run.push((*ts, *v)),
            None => {
                if !run.is_empty() {
                    runs.push(std::mem::take(&mut run));
                }
            }
        }
    }
    if !run.is_empty() {
        runs.push(run);
    }
    runs
}

fn draw_err<E: std::fmt::Display>(err: E) -> RenderError {
    RenderError::Draw(err.to_string())
}
