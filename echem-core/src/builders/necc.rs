//! NECC flow-cell experiments.

use super::{column_containing, dense_stamps, non_empty, pick, timed_rows};
use crate::decoders::{text, Column, Decoded, Scalar, Segment, Table};
use chrono::NaiveDateTime;
use echem_schemas::{
    necc::{
        instrument_index, FeResults, FeedGas, GasChromatographyMeasurement, GasFeResults,
        NeccExperiment, NeccProperties, PotentiometryTrace, ThermocoupleTrace,
    },
    Quantity,
};

/// The detail entry whose label (without its `(unit)` suffix) matches one of `labels`.
fn detail<'d>(decoded: &'d Decoded, labels: &[&str]) -> Option<(&'d Scalar, Option<String>)> {
    decoded.metadata.iter().find_map(|(key, value)| {
        let (label, unit) = text::split_unit(key);
        labels
            .iter()
            .any(|l| label.eq_ignore_ascii_case(l))
            .then_some((value, unit))
    })
}

fn detail_text(decoded: &Decoded, labels: &[&str]) -> Option<String> {
    detail(decoded, labels)
        .map(|(v, _)| v.display().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn detail_quantity(decoded: &Decoded, labels: &[&str], default_unit: &str) -> Option<Quantity<f64>> {
    let (value, unit) = detail(decoded, labels)?;
    let value = value.as_f64().filter(|v| v.is_finite())?;
    Some(Quantity::new(value, unit.unwrap_or_else(|| default_unit.to_string())))
}

fn detail_flag(decoded: &Decoded, labels: &[&str]) -> Option<bool> {
    let (value, _) = detail(decoded, labels)?;
    value.as_bool().or_else(|| {
        match value.display().trim().to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Some(true),
            "no" | "n" | "false" | "0" => Some(false),
            _ => None,
        }
    })
}

fn feed_gases(decoded: &Decoded) -> Vec<FeedGas> {
    decoded
        .metadata
        .iter()
        .filter(|(key, _)| {
            let lower = key.to_ascii_lowercase();
            lower.starts_with("feed gas") && !lower.ends_with("flow rate")
        })
        .filter_map(|(key, value)| {
            let name = value.display().trim().to_string();
            if name.is_empty() {
                return None;
            }
            let flow_rate = decoded
                .meta_f64(&format!("{key} flow rate"))
                .map(|v| Quantity::new(v, "ml/min"));
            Some(FeedGas { name, flow_rate })
        })
        .collect()
}

pub fn properties(decoded: &Decoded) -> NeccProperties {
    NeccProperties {
        cell_type: detail_text(decoded, &["Cell type"]),
        has_reference_electrode: detail_flag(decoded, &["Reference electrode", "Has reference electrode"]),
        reference_electrode_type: detail_text(decoded, &["Reference electrode type", "RE type"]),
        membrane_type: detail_text(decoded, &["Membrane type"]),
        membrane_name: detail_text(decoded, &["Membrane name", "Membrane"]),
        membrane_thickness: detail_quantity(decoded, &["Membrane thickness"], "µm"),
        gasket_thickness: detail_quantity(decoded, &["Gasket thickness"], "µm"),
        anolyte_type: detail_text(decoded, &["Anolyte type", "Anolyte"]),
        anolyte_concentration: detail_quantity(decoded, &["Anolyte concentration"], "M"),
        anolyte_flow_rate: detail_quantity(decoded, &["Anolyte flow rate"], "ml/min"),
        anolyte_volume: detail_quantity(decoded, &["Anolyte volume"], "ml"),
        has_humidifier: detail_flag(decoded, &["Humidifier", "Has humidifier"]),
        humidifier_temperature: detail_quantity(decoded, &["Humidifier temperature"], "°C"),
        water_trap_volume: detail_quantity(decoded, &["Water trap volume"], "ml"),
        bleedline_flow_rate: detail_quantity(decoded, &["Bleedline flow rate", "Bleedline flow"], "ml/min"),
        nitrogen_start_value: detail_quantity(decoded, &["Nitrogen start value", "N2 start value"], "ppm"),
        chronoanalysis_method: detail_text(decoded, &["Chronoanalysis method", "Chronoanalysis"]),
        feed_gases: feed_gases(decoded),
        anode_lab_id: detail_text(decoded, &["Anode ID", "Anode lab ID", "Anode"]),
        cathode_lab_id: detail_text(decoded, &["Cathode ID", "Cathode lab ID", "Cathode"]),
        remarks: detail_text(decoded, &["Remarks", "Comments"]),
    }
}

fn stamps(table: &Table) -> &[Option<NaiveDateTime>] {
    table.columns.get("datetime").and_then(Column::timestamps).unwrap_or(&[])
}

fn potentiometry(table: &Table) -> PotentiometryTrace {
    let stamps = stamps(table);
    let current = table.numbers("current").unwrap_or(&[]);
    let voltage = table.numbers("voltage").unwrap_or(&[]);
    let rows = timed_rows(stamps, &[current, voltage]);
    PotentiometryTrace {
        datetime: dense_stamps(stamps, &rows),
        current: non_empty(pick(current, &rows), "mA"),
        working_electrode_potential: non_empty(pick(voltage, &rows), "V"),
    }
}

fn thermocouple(table: &Table) -> ThermocoupleTrace {
    let stamps = stamps(table);
    let find = |needle: &str| column_containing(table, &[needle]).map_or(&[][..], |(_, v)| v);
    let cathode = find("cathode");
    let anode = find("anode");
    let pressure = find("pressure");
    let rows = timed_rows(stamps, &[cathode, anode, pressure]);
    ThermocoupleTrace {
        datetime: dense_stamps(stamps, &rows),
        temperature_cathode: non_empty(pick(cathode, &rows), "°C"),
        temperature_anode: non_empty(pick(anode, &rows), "°C"),
        pressure: non_empty(pick(pressure, &rows), "bar"),
    }
}

fn gas_chromatography(segments: &[Segment]) -> Vec<GasChromatographyMeasurement> {
    let mut out: Vec<GasChromatographyMeasurement> = Vec::new();
    for segment in segments {
        let gas = segment
            .metadata
            .get("gas_type")
            .map(Scalar::display)
            .unwrap_or_default()
            .trim()
            .to_string();
        let Some(index) = instrument_index(&gas) else {
            log::debug!("Skipping GC channel for unrecognized gas '{}'", gas);
            continue;
        };
        if out.iter().any(|m| m.gas_type == gas) {
            continue;
        }
        let data = &segment.data;
        let stamps = stamps(data);
        let ppm = data.numbers("ppm").unwrap_or(&[]);
        let rt = data.numbers("RT").unwrap_or(&[]);
        let area = data.numbers("area").unwrap_or(&[]);
        let rows: Vec<usize> = (0..stamps.len()).filter(|&i| stamps[i].is_some()).collect();
        // Aligned with `rows`; an injection without a reading keeps its slot as NaN.
        let aligned = |values: &[f64], unit: &str| {
            let picked: Vec<f64> = rows
                .iter()
                .map(|&i| values.get(i).copied().unwrap_or(f64::NAN))
                .collect();
            picked
                .iter()
                .any(|v| v.is_finite())
                .then(|| Quantity::new(picked, unit))
        };
        let instrument_file_name = data
            .columns
            .get("experiment")
            .and_then(Column::texts)
            .and_then(|names| names.iter().find(|n| !n.trim().is_empty()))
            .cloned();
        out.push(GasChromatographyMeasurement {
            instrument_file_name,
            gas_type: gas,
            instrument_index: index,
            datetime: dense_stamps(stamps, &rows),
            retention_time: aligned(rt, "min"),
            area: aligned(area, ""),
            ppm: aligned(ppm, "ppm"),
        });
    }
    out
}

fn results(table: &Table) -> FeResults {
    let stamps = stamps(table);
    let rows: Vec<usize> = (0..stamps.len()).filter(|&i| stamps[i].is_some()).collect();
    let values = |name: &str| table.numbers(name).map(|v| pick(v, &rows));
    let full = |v: Vec<f64>, unit: &str| {
        if v.iter().all(|x| x.is_finite()) {
            non_empty(v, unit)
        } else {
            None
        }
    };

    let gases: Vec<&str> = table
        .columns
        .keys()
        .filter_map(|k| k.strip_suffix(" I (mA)"))
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .collect();
    let mut gas_results = Vec::new();
    for gas in gases {
        let current = values(&format!("{gas} I (mA)"));
        let fe = values(&format!("{gas} FE (%)"));
        gas_results.push(GasFeResults {
            gas_type: gas.to_string(),
            current: current.and_then(|c| full(c, "mA")),
            faradaic_efficiency: fe.and_then(|f| full(f, "%")),
        });
    }

    let total_fe = table
        .columns
        .keys()
        .find(|k| k.to_ascii_lowercase().starts_with("total fe"))
        .and_then(|k| values(k.as_str()))
        .or_else(|| {
            let series: Vec<&Vec<f64>> = gas_results
                .iter()
                .filter_map(|g| g.faradaic_efficiency.as_ref().map(|s| &s.value))
                .collect();
            (!series.is_empty()).then(|| (0..rows.len()).map(|i| series.iter().map(|s| s[i]).sum::<f64>()).collect())
        });
    let by_name = |needles: &[&str]| column_containing(table, needles).map(|(_, v)| pick(v, &rows));
    let total_flow_rate = by_name(&["flow"]).and_then(|v| full(v, "ml/min"));
    let cell_current = by_name(&["cell current", "total current"]).and_then(|v| full(v, "mA"));
    let cell_voltage = by_name(&["cell voltage", "cell potential"]).and_then(|v| full(v, "V"));

    FeResults {
        datetime: dense_stamps(stamps, &rows),
        total_flow_rate,
        total_fe: total_fe.and_then(|v| full(v, "%")),
        cell_current,
        cell_voltage,
        gas_results,
    }
}

pub fn build(decoded: &Decoded) -> NeccExperiment {
    NeccExperiment {
        properties: Some(properties(decoded)),
        potentiometry: decoded.table("potentiometry").map(potentiometry),
        thermocouple: decoded.table("thermocouple").map(thermocouple),
        gas_chromatography: gas_chromatography(&decoded.segments),
        fe_results: decoded.table("results").map(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::{
        necc as necc_decoder,
        workbook::{Sheet, Workbook},
    };

    fn workbook() -> Workbook {
        let details = Sheet::new("Experimental details")
            .with_text_row(&["Cell type", "Flow cell"])
            .with_text_row(&["Membrane thickness (µm)", "50"])
            .with_text_row(&["Humidifier", "yes"])
            .with_text_row(&["Feed gas 1", "CO2", "20"])
            .with_text_row(&["Cathode ID", "HZB_JD_230314_001"]);
        let raw = Sheet::new("Raw Data")
            .with_text_row(&[
                "Date Time", "<I>/mA", "Ewe/V", "", "Date Time", "Temperature Cathode", "", "Experiment name",
                "Date", "Time", "Gas type", "RT", "area", "ppm value", "Gas type", "RT", "area", "ppm value",
                "Gas type", "RT", "area", "ppm value",
            ])
            .with_text_row(&[
                "2023-03-14 10:00:00", "-100", "-3.1", "", "2023-03-14 10:00:30", "24", "", "inj1", "14.03.2023",
                "10:01:00", "CO", "1.2", "500", "1000", "O2", "0.9", "5", "10", "CO", "1.3", "1", "1",
            ])
            .with_text_row(&[
                "2023-03-14 10:03:00", "-102", "-3.2", "", "2023-03-14 10:05:00", "30", "", "inj2", "14.03.2023",
                "10:07:30", "CO", "1.2", "510", "", "O2", "0.9", "5", "10", "CO", "1.3", "1", "1",
            ]);
        let results = Sheet::new("Results")
            .with_text_row(&["Time", "Cell voltage (V)", "CO I (mA)", "CO FE (%)", "H2 I (mA)", "H2 FE (%)"])
            .with_text_row(&["2023-03-14 10:01:00", "-3.1", "-60", "-60", "-30", "-30"]);
        Workbook::default()
            .with_sheet(details)
            .with_sheet(raw)
            .with_sheet(results)
            .with_sheet(Sheet::new("Plots"))
    }

    #[test]
    fn test_builds_all_parts() {
        let decoded = necc_decoder::decode_workbook("necc.xlsx", &workbook()).unwrap();
        let experiment = build(&decoded);

        let props = experiment.properties.unwrap();
        assert_eq!(props.cell_type.as_deref(), Some("Flow cell"));
        assert_eq!(props.membrane_thickness, Some(Quantity::new(50.0, "µm")));
        assert_eq!(props.has_humidifier, Some(true));
        assert_eq!(props.feed_gases[0].name, "CO2");
        assert_eq!(props.feed_gases[0].flow_rate, Some(Quantity::new(20.0, "ml/min")));
        assert_eq!(props.cathode_lab_id.as_deref(), Some("HZB_JD_230314_001"));

        let pot = experiment.potentiometry.unwrap();
        assert_eq!(pot.datetime.len(), 2);
        assert_eq!(pot.current.unwrap().value, vec![-100.0, -102.0]);

        // O2 is not quantified and the second CO block is a duplicate.
        let gc = &experiment.gas_chromatography;
        assert_eq!(gc.len(), 1);
        assert_eq!(gc[0].gas_type, "CO");
        assert_eq!(gc[0].instrument_index, 0);
        assert_eq!(gc[0].instrument_file_name.as_deref(), Some("inj1"));

        // The second injection has no ppm reading but stays in the series.
        assert_eq!(gc[0].datetime.len(), 2);
        assert_eq!(gc[0].datetime[1].to_string(), "2023-03-14 10:07:30");
        let ppm = &gc[0].ppm.as_ref().unwrap().value;
        assert_eq!(ppm.len(), 2);
        assert_eq!(ppm[0], 1000.0);
        assert!(ppm[1].is_nan());
        assert_eq!(gc[0].area.as_ref().unwrap().value, vec![500.0, 510.0]);

        let fe = experiment.fe_results.unwrap();
        assert_eq!(fe.gas_results.len(), 2);
        assert_eq!(fe.gas_results[0].faradaic_efficiency.as_ref().unwrap().value, vec![60.0]);
        assert_eq!(fe.total_fe.unwrap().value, vec![90.0]);
        assert_eq!(fe.cell_voltage.unwrap().value, vec![-3.1]);
    }

    /// The standard workbook with its `Results` sheet replaced by `rows`.
    fn with_results(rows: &[&[&str]]) -> Decoded {
        let mut results = Sheet::new("Results");
        for row in rows {
            results = results.with_text_row(row);
        }
        let mut book = workbook();
        for sheet in book.sheets.iter_mut().filter(|s| s.name == "Results") {
            *sheet = results.clone();
        }
        necc_decoder::decode_workbook("necc.xlsx", &book).unwrap()
    }

    #[test]
    fn test_results_follow_current_columns_in_order() {
        let decoded = with_results(&[
            &["Time", "O2 I (mA)", "O2 FE (%)", "CO I (mA)", "CO FE (%)", "Formate I (mA)"],
            &["2023-03-14 10:01:00", "-5", "-5", "-40", "-40", "-20"],
        ]);
        let fe = build(&decoded).fe_results.unwrap();
        let gases: Vec<&str> = fe.gas_results.iter().map(|g| g.gas_type.as_str()).collect();
        assert_eq!(gases, ["O2", "CO", "Formate"]);
        assert_eq!(fe.gas_results[0].faradaic_efficiency.as_ref().unwrap().value, vec![5.0]);
        assert_eq!(fe.gas_results[2].current.as_ref().unwrap().value, vec![-20.0]);
        assert_eq!(fe.gas_results[2].faradaic_efficiency, None);
    }

    #[test]
    fn test_mixed_sign_efficiencies_are_kept() {
        let decoded = with_results(&[
            &["Time", "CO I (mA)", "CO FE (%)"],
            &["2023-03-14 10:01:00", "-50", "50"],
            &["2023-03-14 10:07:30", "48", "-48"],
        ]);
        let fe = build(&decoded).fe_results.unwrap();
        assert_eq!(fe.gas_results[0].faradaic_efficiency.as_ref().unwrap().value, vec![50.0, -48.0]);
        assert_eq!(fe.total_fe.unwrap().value, vec![50.0, -48.0]);
    }
}
