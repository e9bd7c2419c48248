//! Figures of merit computed over voltammetry records.
//!
//! Potentials are read from the RHE-compensated axis when it exists and from the raw voltage
//! otherwise; current densities are compared in mA/cm^2.

use crate::settings::IngestSettings;
use echem_schemas::{
    analysis::{AnalysisKind, AnalysisResult, CycleMetrics, InputMetrics, OerResult},
    measurement::{Measurement, MeasurementKind},
    reference::EntityReference,
    voltammetry::VoltammetryCycle,
    Quantity, Signal,
};

/// Equilibrium potential of the oxygen evolution reaction vs RHE, in V.
pub const OER_EQUILIBRIUM_V: f64 = 1.23;
pub const DENSITY_UNIT: &str = "mA/cm^2";

pub const METRIC_MAX_DENSITY: &str = "max_current_density";
pub const METRIC_MIN_DENSITY: &str = "min_current_density";
pub const METRIC_POTENTIAL: &str = "potential_at_threshold";

fn sweeps(measurement: &Measurement) -> Vec<&VoltammetryCycle> {
    match &measurement.details {
        MeasurementKind::CyclicVoltammetry(v) => v.sweeps(),
        MeasurementKind::LinearSweepVoltammetry(v) => v.sweeps(),
        MeasurementKind::GalvanodynamicSweep(v) => v.sweeps(),
        _ => Vec::new(),
    }
}

/// The potential axis and whether it is referenced to RHE.
fn potential(cycle: &VoltammetryCycle) -> Option<(&Signal, bool)> {
    match &cycle.voltage_rhe_compensated {
        Some(v) => Some((v, true)),
        None => cycle.voltage.as_ref().map(|v| (v, false)),
    }
}

fn density(cycle: &VoltammetryCycle) -> Option<Vec<f64>> {
    cycle.current_density.as_ref()?.to(DENSITY_UNIT).map(|s| s.value)
}

fn extreme(values: &[f64], pick: fn(f64, f64) -> f64) -> Option<f64> {
    values.iter().copied().filter(|v| v.is_finite()).reduce(pick)
}

/// First potential at which the current density reaches `threshold`, linearly interpolated
/// between the bracketing samples.
pub fn potential_at_threshold(cycle: &VoltammetryCycle, threshold: f64) -> Option<Quantity<f64>> {
    let j = density(cycle)?;
    let (e, _) = potential(cycle)?;
    let n = j.len().min(e.value.len());
    let i = (0..n).find(|&i| j[i] >= threshold)?;
    let value = if i > 0 && j[i - 1] < threshold {
        let t = (threshold - j[i - 1]) / (j[i] - j[i - 1]);
        e.value[i - 1] + t * (e.value[i] - e.value[i - 1])
    } else {
        e.value[i]
    };
    Some(Quantity::new(value, e.unit.clone()))
}

/// Least-squares slope of potential over log10 of the anodic current density between a tenth
/// of `threshold` and `threshold`, in mV/dec. Needs at least three points.
pub fn tafel_slope(cycle: &VoltammetryCycle, threshold: f64) -> Option<Quantity<f64>> {
    let j = density(cycle)?;
    let (e, _) = potential(cycle)?;
    let e = e.to("V")?;
    let points: Vec<(f64, f64)> = j
        .iter()
        .zip(&e.value)
        .filter(|(j, _)| **j >= threshold / 10.0 && **j <= threshold && **j > 0.0)
        .map(|(j, e)| (j.log10(), *e))
        .collect();
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    Some(Quantity::new(sxy / sxx * 1000.0, "mV/dec"))
}

fn threshold_value(threshold: &Quantity<f64>) -> Option<f64> {
    let value = threshold.value_in(DENSITY_UNIT);
    if value.is_none() {
        log::warn!("Threshold unit '{}' is not a current density", threshold.unit);
    }
    value
}

pub fn cycle_metrics(measurement: &Measurement, threshold: f64) -> Vec<CycleMetrics> {
    sweeps(measurement)
        .into_iter()
        .enumerate()
        .map(|(cycle_index, cycle)| {
            let j = density(cycle).unwrap_or_default();
            CycleMetrics {
                cycle_index,
                max_current_density: extreme(&j, f64::max).map(|v| Quantity::new(v, DENSITY_UNIT)),
                min_current_density: extreme(&j, f64::min).map(|v| Quantity::new(v, DENSITY_UNIT)),
                potential_at_threshold: potential_at_threshold(cycle, threshold),
            }
        })
        .collect()
}

/// OER figures of merit from the last sweep of a record.
pub fn oer_result(input: &EntityReference, measurement: &Measurement, threshold: f64) -> OerResult {
    let last = sweeps(measurement).last().copied();
    let potential_at = last.and_then(|c| potential_at_threshold(c, threshold));
    let is_rhe = last.and_then(potential).is_some_and(|(_, rhe)| rhe);
    let overpotential = potential_at
        .as_ref()
        .filter(|_| is_rhe)
        .and_then(|p| p.value_in("V"))
        .map(|v| Quantity::new(v - OER_EQUILIBRIUM_V, "V"));
    OerResult {
        input: input.clone(),
        potential_at_threshold: potential_at,
        overpotential,
        tafel_slope: last.and_then(|c| tafel_slope(c, threshold)),
    }
}

/// One value of `metric` for a record, taken over all its sweeps.
pub fn metric_value(metric: &str, measurement: &Measurement, settings: &IngestSettings) -> Option<Quantity<f64>> {
    let cycles = cycle_metrics(measurement, settings.oer_threshold_ma_cm2);
    let values = cycles.iter().filter_map(|c| match metric {
        METRIC_MAX_DENSITY => c.max_current_density.as_ref(),
        METRIC_MIN_DENSITY => c.min_current_density.as_ref(),
        METRIC_POTENTIAL => c.potential_at_threshold.as_ref(),
        _ => None,
    });
    match metric {
        METRIC_MIN_DENSITY => values.cloned().reduce(|a, b| if b.value < a.value { b } else { a }),
        METRIC_POTENTIAL => values.cloned().next(),
        _ => values.cloned().reduce(|a, b| if b.value > a.value { b } else { a }),
    }
}

/// Mean and sample standard deviation, all expressed in the unit of the first value.
pub fn statistics(values: &[Quantity<f64>]) -> (Option<Quantity<f64>>, Option<Quantity<f64>>) {
    let Some(unit) = values.first().map(|q| q.unit.clone()) else {
        return (None, None);
    };
    let numbers: Vec<f64> = values.iter().filter_map(|q| q.value_in(&unit)).collect();
    let n = numbers.len() as f64;
    let mean = numbers.iter().sum::<f64>() / n;
    let deviation = (numbers.len() > 1).then(|| {
        let var = numbers.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Quantity::new(var.sqrt(), unit.clone())
    });
    (Some(Quantity::new(mean, unit)), deviation)
}

/// Recomputes the results of `kind` from the loaded inputs, keeping its parameters.
pub fn recompute(kind: &mut AnalysisKind, inputs: &[(EntityReference, Measurement)], settings: &IngestSettings) {
    match kind {
        AnalysisKind::CvMetrics { threshold, results } => {
            let Some(t) = threshold_value(threshold) else { return };
            *results = inputs
                .iter()
                .map(|(input, m)| InputMetrics {
                    input: input.clone(),
                    cycles: cycle_metrics(m, t),
                })
                .collect();
        }
        AnalysisKind::OerAnalysis { threshold, results } => {
            let Some(t) = threshold_value(threshold) else { return };
            *results = inputs.iter().map(|(input, m)| oer_result(input, m, t)).collect();
        }
        AnalysisKind::Reproducibility {
            metric,
            values,
            mean,
            standard_deviation,
        } => {
            *values = inputs
                .iter()
                .filter_map(|(_, m)| metric_value(metric, m, settings))
                .collect();
            (*mean, *standard_deviation) = statistics(values);
        }
    }
}

/// An OER analysis over `inputs` at the configured threshold, computed right away.
pub fn oer_analysis(
    name: &str,
    inputs: &[(EntityReference, Measurement)],
    settings: &IngestSettings,
) -> AnalysisResult {
    let mut kind = AnalysisKind::OerAnalysis {
        threshold: Quantity::new(settings.oer_threshold_ma_cm2, DENSITY_UNIT),
        results: Vec::new(),
    };
    recompute(&mut kind, inputs, settings);
    AnalysisResult {
        lab_id: None,
        name: Some(name.to_string()),
        datetime: None,
        inputs: inputs.iter().map(|(r, _)| r.clone()).collect(),
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echem_schemas::voltammetry::{CvProperties, LsvProperties, Voltammetry};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// E = 1.40 + 0.06 log10(j) vs RHE, j in mA/cm^2.
    fn tafel_lsv() -> Measurement {
        let j = vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0];
        let e = j.iter().map(|j: &f64| 1.40 + 0.06 * j.log10()).collect();
        let cycle = VoltammetryCycle {
            voltage: Some(Quantity::new(vec![0.0; 6], "V")),
            voltage_rhe_compensated: Some(Quantity::new(e, "V")),
            current_density: Some(Quantity::new(j, DENSITY_UNIT)),
            ..VoltammetryCycle::default()
        };
        Measurement::new(MeasurementKind::LinearSweepVoltammetry(Voltammetry::<LsvProperties> {
            curve: Some(cycle),
            ..Voltammetry::default()
        }))
    }

    #[test]
    fn test_oer_figures_of_merit() {
        let input = EntityReference::from_lab_id("lsv");
        let result = oer_result(&input, &tafel_lsv(), 10.0);
        let potential = result.potential_at_threshold.unwrap();
        assert!(close(potential.value, 1.46));
        assert!(close(result.overpotential.unwrap().value, 0.23));
        let slope = result.tafel_slope.unwrap();
        assert_eq!(slope.unit, "mV/dec");
        assert!((slope.value - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_interpolated() {
        let cycle = VoltammetryCycle {
            voltage: Some(Quantity::new(vec![1.0, 1.5, 2.0], "V")),
            current_density: Some(Quantity::new(vec![0.0, 5.0, 15.0], DENSITY_UNIT)),
            ..VoltammetryCycle::default()
        };
        let p = potential_at_threshold(&cycle, 10.0).unwrap();
        assert!(close(p.value, 1.75));
        assert!(potential_at_threshold(&cycle, 100.0).is_none());
    }

    #[test]
    fn test_no_overpotential_without_rhe_axis() {
        let cycle = VoltammetryCycle {
            voltage: Some(Quantity::new(vec![1.0, 2.0], "V")),
            current_density: Some(Quantity::new(vec![0.0, 20.0], DENSITY_UNIT)),
            ..VoltammetryCycle::default()
        };
        let cv = Measurement::new(MeasurementKind::CyclicVoltammetry(Voltammetry::<CvProperties> {
            cycles: vec![cycle],
            ..Voltammetry::default()
        }));
        let result = oer_result(&EntityReference::default(), &cv, 10.0);
        assert!(result.potential_at_threshold.is_some());
        assert!(result.overpotential.is_none());
        assert!(result.tafel_slope.is_none());
    }

    #[test]
    fn test_cv_metrics_per_cycle() {
        let cycle = |scale: f64| VoltammetryCycle {
            voltage: Some(Quantity::new(vec![0.0, 0.5, 1.0, 0.5, 0.0], "V")),
            current_density: Some(Quantity::new(
                vec![-1.0 * scale, 0.0, 2.0 * scale, 0.5, -0.5],
                "A/cm^2",
            )),
            ..VoltammetryCycle::default()
        };
        let cv = Measurement::new(MeasurementKind::CyclicVoltammetry(Voltammetry::<CvProperties> {
            cycles: vec![cycle(1.0), cycle(2.0)],
            ..Voltammetry::default()
        }));
        let metrics = cycle_metrics(&cv, 10.0);
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[1].cycle_index, 1);
        let max = metrics[1].max_current_density.as_ref().unwrap();
        assert_eq!(max.unit, DENSITY_UNIT);
        assert!((max.value - 4000.0).abs() < 1e-6);
        assert!((metrics[0].min_current_density.as_ref().unwrap().value + 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_reproducibility_statistics() {
        let settings = IngestSettings::default();
        let inputs = vec![
            (EntityReference::from_lab_id("a"), tafel_lsv()),
            (EntityReference::from_lab_id("b"), tafel_lsv()),
        ];
        let mut kind = AnalysisKind::Reproducibility {
            metric: METRIC_POTENTIAL.to_string(),
            values: Vec::new(),
            mean: None,
            standard_deviation: None,
        };
        recompute(&mut kind, &inputs, &settings);
        let AnalysisKind::Reproducibility { values, mean, standard_deviation, .. } = kind else {
            unreachable!()
        };
        assert_eq!(values.len(), 2);
        assert!(close(mean.unwrap().value, 1.46));
        assert!(standard_deviation.unwrap().value.abs() < 1e-12);

        let (mean, sd) = statistics(&[Quantity::new(1.0, "V"), Quantity::new(3000.0, "mV")]);
        assert!(close(mean.unwrap().value, 2.0));
        assert!(close(sd.unwrap().value, 2f64.sqrt()));
    }

    #[test]
    fn test_oer_analysis_record() {
        let inputs = vec![(EntityReference::from_lab_id("a"), tafel_lsv())];
        let result = oer_analysis("OER", &inputs, &IngestSettings::default());
        assert_eq!(result.inputs.len(), 1);
        let AnalysisKind::OerAnalysis { threshold, results } = result.kind else { unreachable!() };
        assert_eq!(threshold, Quantity::new(10.0, DENSITY_UNIT));
        assert_eq!(results.len(), 1);
    }
}
