//! Process monitoring records: logger exports, test-bench recordings, images and sputter runs.

use super::{dense_stamps, non_empty, pick, signal, timed_rows, BuildContext};
use crate::decoders::{text, tiff, Column, Decoded, Scalar, Table};
use chrono::NaiveDateTime;
use echem_schemas::{
    process_monitoring::{
        ElectrolyserPerformance, ImageData, MultiTargetSputtering, PhaseFluorometry, PumpRate, SputterObservable,
        SputterProcessStep, SputterTarget,
    },
    Quantity, Signal,
};
use indexmap::IndexMap;

/// A logger table split into named channels on the rows that carry a timestamp and values.
struct Logged<'t> {
    table: &'t Table,
    stamps: &'t [Option<NaiveDateTime>],
    rows: Vec<usize>,
}

impl<'t> Logged<'t> {
    fn new(table: &'t Table) -> Self {
        let stamps = table
            .columns
            .get("datetime")
            .and_then(Column::timestamps)
            .unwrap_or(&[]);
        let numeric: Vec<&[f64]> = table.columns.values().filter_map(Column::numbers).collect();
        let rows = timed_rows(stamps, &numeric);
        Self { table, stamps, rows }
    }

    fn datetime(&self) -> Vec<NaiveDateTime> {
        dense_stamps(self.stamps, &self.rows)
    }

    /// The first numeric column whose lowercase name contains one of `needles` and is not
    /// already `taken`.
    fn find(&self, needles: &[&str], taken: &[String]) -> Option<String> {
        self.table.columns.iter().find_map(|(name, c)| {
            let lower = name.to_lowercase();
            (c.numbers().is_some() && !taken.contains(name) && needles.iter().any(|n| lower.contains(n)))
                .then(|| name.clone())
        })
    }

    fn signal(&self, name: &str) -> Option<Signal> {
        let values = self.table.numbers(name)?;
        non_empty(pick(values, &self.rows), self.table.unit(name).unwrap_or(""))
    }

    fn extras(&self, taken: &[String]) -> IndexMap<String, Signal> {
        self.table
            .columns
            .iter()
            .filter(|(name, c)| c.numbers().is_some() && !taken.contains(name))
            .filter_map(|(name, _)| self.signal(name).map(|s| (name.clone(), s)))
            .collect()
    }
}

fn logger_table(decoded: &Decoded) -> Option<&Table> {
    decoded.table("data").or_else(|| decoded.tables.first())
}

pub fn pump_rate(decoded: &Decoded) -> PumpRate {
    let Some(table) = logger_table(decoded) else {
        return PumpRate::default();
    };
    let logged = Logged::new(table);
    let mut taken = Vec::new();
    let rate = logged.find(&["rate", "pump", "flow"], &taken);
    taken.extend(rate.clone());
    let pressure = logged.find(&["pressure"], &taken);
    taken.extend(pressure.clone());
    PumpRate {
        datetime: logged.datetime(),
        pump_rate: rate.and_then(|n| logged.signal(&n)),
        pressure: pressure.and_then(|n| logged.signal(&n)),
        extra_columns: logged.extras(&taken),
    }
}

pub fn phase_fluorometry(decoded: &Decoded) -> PhaseFluorometry {
    let Some(table) = logger_table(decoded) else {
        return PhaseFluorometry::default();
    };
    let logged = Logged::new(table);
    let mut taken: Vec<String> = Vec::new();
    let mut next = |needles: &[&str]| {
        let found = logged.find(needles, &taken);
        taken.extend(found.clone());
        found
    };
    let oxygen = next(&["oxygen", "o2"]);
    let temperature = next(&["temp"]);
    let phase = next(&["phase"]);
    let amplitude = next(&["amp"]);
    PhaseFluorometry {
        datetime: logged.datetime(),
        oxygen: oxygen.and_then(|n| logged.signal(&n)),
        temperature: temperature.and_then(|n| logged.signal(&n)),
        phase: phase.and_then(|n| logged.signal(&n)),
        amplitude: amplitude.and_then(|n| logged.signal(&n)),
        extra_columns: logged.extras(&taken),
    }
}

/// Seconds since the first timestamp.
fn elapsed(stamps: &[Option<NaiveDateTime>]) -> Option<Vec<f64>> {
    let start = stamps.iter().flatten().next()?;
    stamps
        .iter()
        .map(|s| s.map(|s| (s - *start).num_milliseconds() as f64 / 1000.0))
        .collect()
}

pub fn electrolyser(decoded: &Decoded, ctx: &BuildContext) -> ElectrolyserPerformance {
    let name = decoded
        .meta_str("name")
        .map(str::to_string)
        .unwrap_or_else(|| ctx.file_stem().to_string());

    let mut time = None;
    let mut channels = IndexMap::new();
    for table in &decoded.tables {
        for (channel, column) in &table.columns {
            let is_time = channel.to_lowercase().contains("time");
            if is_time && time.is_none() {
                time = match column {
                    Column::Numbers(values) if values.iter().all(|v| v.is_finite()) => {
                        Some(signal(values.clone(), table.unit(channel).unwrap_or("s")))
                    }
                    Column::Timestamps(stamps) => elapsed(stamps).map(|v| signal(v, "s")),
                    _ => None,
                };
                if time.is_some() {
                    continue;
                }
            }
            let Some(values) = column.numbers() else {
                continue;
            };
            if !values.iter().all(|v| v.is_finite()) {
                log::debug!("'{}': channel '{}' has missing samples, skipping it", ctx.file, channel);
                continue;
            }
            let key = if channels.contains_key(channel) {
                format!("{}/{}", table.name, channel)
            } else {
                channel.clone()
            };
            channels.insert(key, signal(values.to_vec(), table.unit(channel).unwrap_or("")));
        }
    }
    let properties = decoded
        .metadata
        .iter()
        .filter(|(k, _)| k.as_str() != "datetime")
        .map(|(k, v)| (k.clone(), v.display()))
        .collect();
    ElectrolyserPerformance {
        name: Some(name),
        time,
        channels,
        properties,
    }
}

pub fn image(decoded: &Decoded, ctx: &BuildContext) -> ImageData {
    let dimension = |key: &str| {
        decoded
            .meta(key)
            .and_then(Scalar::as_f64)
            .and_then(|v| u32::try_from(v as i64).ok())
    };
    ImageData {
        image_file: Some(ctx.file.to_string()),
        preview_file: Some(tiff::preview_name(ctx.file)),
        width: dimension("width"),
        height: dimension("height"),
    }
}

fn text_at(table: &Table, column: &str, row: usize) -> Option<String> {
    match table.columns.get(column)? {
        Column::Text(values) => values.get(row).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
        Column::Numbers(values) => values.get(row).filter(|v| v.is_finite()).map(f64::to_string),
        Column::Timestamps(values) => values.get(row).copied().flatten().map(|v| v.to_string()),
    }
}

fn quantity_at(table: &Table, column: &str, row: usize, default_unit: &str) -> Option<Quantity<f64>> {
    let value = match table.columns.get(column)? {
        Column::Numbers(values) => values.get(row).copied(),
        Column::Text(values) => values.get(row).and_then(|v| text::parse_number(v)),
        Column::Timestamps(_) => None,
    }
    .filter(|v| v.is_finite())?;
    Some(Quantity::new(value, table.unit(column).unwrap_or(default_unit)))
}

pub fn sputtering(decoded: &Decoded) -> MultiTargetSputtering {
    let rows = |name: &str| decoded.table(name).map(|t| (t, 0..t.len()));
    let targets = rows("targets")
        .map(|(t, range)| {
            range
                .map(|i| SputterTarget {
                    name: text_at(t, "Target", i).unwrap_or_else(|| format!("Target {}", i + 1)),
                    material: text_at(t, "Material", i),
                    power: quantity_at(t, "Power", i, "W"),
                    power_supply: text_at(t, "Power supply", i),
                })
                .collect()
        })
        .unwrap_or_default();
    let process_properties = rows("process")
        .map(|(t, range)| {
            range
                .map(|i| SputterProcessStep {
                    name: text_at(t, "Step", i),
                    sputter_pressure: quantity_at(t, "Sputter pressure", i, "mbar"),
                    gas_flow: quantity_at(t, "Gas flow", i, "sccm"),
                    gas: text_at(t, "Gas", i),
                    duration: quantity_at(t, "Duration", i, "s"),
                })
                .collect()
        })
        .unwrap_or_default();
    let observables = rows("observables")
        .map(|(t, range)| {
            range
                .map(|i| SputterObservable {
                    temperature: quantity_at(t, "Temperature", i, "°C"),
                    base_pressure: quantity_at(t, "Base pressure", i, "mbar"),
                })
                .collect()
        })
        .unwrap_or_default();
    let meta = |key: &str| decoded.meta(key).map(Scalar::display).filter(|v| !v.is_empty());
    MultiTargetSputtering {
        holder: meta("holder"),
        substrate: meta("substrate"),
        targets,
        process_properties,
        observables,
        notes: meta("notes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::{sputtering as sputter_decoder, tabular, workbook::{Sheet, Workbook}, DecoderKind};
    use crate::settings::IngestSettings;

    #[test]
    fn test_pump_rate_columns() {
        let raw = "Device,PR-1\nDate [mm/dd/yyyy],Time [hh:mm:ss],Pump rate [ml/min],Pressure [bar],Valve\n\
                   03/14/2023,10:00:00,5.0,1.2,1\n03/14/2023,10:00:10,5.5,1.3,0\n,,,,\n";
        let decoded = tabular::decode_pump_rate("pump.csv", raw.as_bytes()).unwrap();
        let record = pump_rate(&decoded);
        assert_eq!(record.datetime.len(), 2);
        let rate = record.pump_rate.unwrap();
        assert_eq!(rate.value, vec![5.0, 5.5]);
        assert_eq!(rate.unit, "ml/min");
        assert_eq!(record.pressure.unwrap().unit, "bar");
        assert_eq!(record.extra_columns["Valve"].value, vec![1.0, 0.0]);
    }

    #[test]
    fn test_phase_fluorometry_columns() {
        let raw = "Date [mm/dd/yyyy],Time [hh:mm:ss],Oxygen [%O2],Temperature [°C],Phase [°],Amplitude [µV]\n\
                   03/14/2023,10:00:00,20.9,25.0,30.1,4000\n";
        let decoded = tabular::decode_phase_fluorometry("pfo.csv", raw.as_bytes()).unwrap();
        let record = phase_fluorometry(&decoded);
        assert_eq!(record.oxygen.unwrap().value, vec![20.9]);
        assert_eq!(record.temperature.unwrap().unit, "°C");
        assert_eq!(record.phase.unwrap().value, vec![30.1]);
        assert_eq!(record.amplitude.unwrap().value, vec![4000.0]);
        assert!(record.extra_columns.is_empty());
    }

    #[test]
    fn test_electrolyser_channels_and_time() {
        let mut table = Table::new("Measurement");
        table.push("Time", Some("s"), Column::Numbers(vec![0.0, 1.0, 2.0]));
        table.push("Cell voltage", Some("V"), Column::Numbers(vec![1.8, 1.81, 1.82]));
        table.push("Broken", None, Column::Numbers(vec![1.0, f64::NAN, 2.0]));
        let mut decoded = Decoded::new(DecoderKind::Tdms);
        decoded.tables.push(table);
        decoded.metadata.insert("name".to_string(), Scalar::Text("Softwaretest".to_string()));
        let settings = IngestSettings::default();
        let record = electrolyser(&decoded, &BuildContext::new("bench.tdms", &settings));
        assert_eq!(record.name.as_deref(), Some("Softwaretest"));
        assert_eq!(record.time.unwrap().len(), 3);
        assert_eq!(record.channels.len(), 1);
        assert_eq!(record.properties["name"], "Softwaretest");
    }

    #[test]
    fn test_sputter_run() {
        let sheet = Sheet::new("Run")
            .with_text_row(&["Holder", "H1"])
            .with_text_row(&["Targets"])
            .with_text_row(&["Target", "Material", "Power [W]", "Power supply"])
            .with_text_row(&["1) Al", "Al", "150", "DC1"])
            .with_text_row(&[""])
            .with_text_row(&["Process"])
            .with_text_row(&["Step", "Sputter pressure [mbar]", "Gas flow [sccm]", "Gas", "Duration [s]"])
            .with_text_row(&["Deposition", "0.0167", "20", "Ar", "3600"]);
        let decoded = sputter_decoder::decode_workbook("run.xlsx", &Workbook::default().with_sheet(sheet)).unwrap();
        let run = sputtering(&decoded);
        assert_eq!(run.holder.as_deref(), Some("H1"));
        assert_eq!(run.targets[0].name, "1) Al");
        assert_eq!(run.targets[0].power, Some(Quantity::new(150.0, "W")));
        assert_eq!(run.process_properties[0].gas.as_deref(), Some("Ar"));
        assert_eq!(run.process_properties[0].duration, Some(Quantity::new(3600.0, "s")));
        assert!(run.observables.is_empty());
    }
}
