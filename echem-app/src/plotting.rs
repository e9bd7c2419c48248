//! PNG renderings of the figures attached to measurement records.

use anyhow::Result;
use echem_core::UploadContext;
use echem_schemas::{
    archive::Record,
    measurement::{Figure, Trace},
};
use plotters::prelude::*;
use std::path::{Path, PathBuf};

use crate::fs_host::FsUpload;

const COLORS: [RGBColor; 6] = [RED, GREEN, BLUE, YELLOW, CYAN, MAGENTA];

/// Renders every figure of every measurement archive in the upload into `output_dir`.
/// Returns the written files.
pub fn plot_upload(upload: &FsUpload, output_dir: &Path) -> Result<Vec<PathBuf>> {
    log::info!("[Plotting] Rendering figures into {:?}", output_dir);
    std::fs::create_dir_all(output_dir)?;
    let mut written = Vec::new();
    for name in upload.archive_names()? {
        let Some(archive) = upload.read_archive(&name)? else {
            continue;
        };
        let Record::Measurement(measurement) = &archive.data else {
            continue;
        };
        let stem = name.trim_end_matches(".archive.json").replace('/', "_");
        for (i, figure) in measurement.header.figures.iter().enumerate() {
            let path = output_dir.join(format!("{}_{}_{}.png", stem, i, file_safe(&figure.label)));
            match plot_figure(&path, figure) {
                Ok(true) => written.push(path),
                Ok(false) => log::debug!("[Plotting] '{}' of '{}' has no finite points", figure.label, name),
                Err(e) => log::warn!("[Plotting] Failed to draw '{}' of '{}': {}", figure.label, name, e),
            }
        }
    }
    log::info!("[Plotting] {} figures saved", written.len());
    Ok(written)
}

fn file_safe(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn finite_points(trace: &Trace) -> impl Iterator<Item = (f64, f64)> + '_ {
    trace
        .x
        .iter()
        .zip(&trace.y)
        .map(|(x, y)| (*x, *y))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
}

/// Padded axis range; a flat series still gets a visible band.
fn span(values: impl Iterator<Item = f64>) -> Option<std::ops::Range<f64>> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return None;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { lo.abs().max(1.0) * 0.05 };
    Some(lo - pad..hi + pad)
}

/// Draws one figure as a line chart. Returns false when there was nothing to draw.
pub fn plot_figure(path: &Path, figure: &Figure) -> Result<bool> {
    let x_range = span(figure.traces.iter().flat_map(|t| finite_points(t).map(|p| p.0)));
    let y_range = span(figure.traces.iter().flat_map(|t| finite_points(t).map(|p| p.1)));
    let (Some(x_range), Some(y_range)) = (x_range, y_range) else {
        return Ok(false);
    };

    let root = BitMapBackend::new(path, (1024, 768)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(&figure.label, ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc(figure.x_label.as_str())
        .y_desc(figure.y_label.as_str())
        .draw()?;

    for (i, trace) in figure.traces.iter().enumerate() {
        let color = COLORS[i % COLORS.len()];
        chart
            .draw_series(LineSeries::new(finite_points(trace), color.stroke_width(2)))?
            .label(trace.name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.filled()));
    }

    if figure.traces.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_pads_flat_series() {
        let flat = span([2.0, 2.0].into_iter()).unwrap();
        assert!((flat.start - 1.9).abs() < 1e-12 && (flat.end - 2.1).abs() < 1e-12);
        assert_eq!(span(std::iter::empty()), None);
        let r = span([0.0, 10.0].into_iter()).unwrap();
        assert_eq!((r.start, r.end), (-0.5, 10.5));
    }

    #[test]
    fn test_empty_figure_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let figure = Figure {
            label: "Current".to_string(),
            x_label: "Time (s)".to_string(),
            y_label: "I (A)".to_string(),
            traces: vec![Trace {
                name: "I".to_string(),
                x: vec![0.0, 1.0],
                y: vec![f64::NAN, f64::NAN],
            }],
        };
        assert!(!plot_figure(&dir.path().join("x.png"), &figure).unwrap());
        assert!(!dir.path().join("x.png").exists());
    }

    #[test]
    fn test_file_safe() {
        assert_eq!(file_safe("Nyquist plot (Ohm)"), "nyquist_plot__ohm_");
    }
}
