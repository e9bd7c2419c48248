//! PalmSens session files (`.pssession`): UTF-16 JSON whose first measurement carries the
//! data arrays under `DataSet.Values`, each identified by its `Description`.

use super::{text, Column, Decoded, DecoderKind, Scalar, Table};
use crate::error::EchemError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Session {
    #[serde(default)]
    measurements: Vec<PsMeasurement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsMeasurement {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    time_stamp: Option<serde_json::Value>,
    data_set: DataSet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DataSet {
    #[serde(default)]
    values: Vec<DataArray>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DataArray {
    description: String,
    #[serde(default)]
    unit: Option<UnitInfo>,
    #[serde(default)]
    data_values: Vec<DataValue>,
}

#[derive(Debug, Deserialize)]
struct UnitInfo {
    #[serde(rename = "S", default)]
    symbol: Option<String>,
    #[serde(rename = "Q", default)]
    quantity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataValue {
    #[serde(rename = "V")]
    value: Option<f64>,
}

fn technique_from_method(method: &str) -> Option<&'static str> {
    let id = method
        .lines()
        .find_map(|l| l.trim().strip_prefix("METHOD_ID="))?
        .trim()
        .to_ascii_lowercase();
    let code = match id.as_str() {
        "cv" => "CV",
        "lsv" => "LSV",
        "ad" | "ca" => "CA",
        "pot" | "cp" => "CP",
        "ocp" => "OCV",
        "eis" => "EIS",
        "geis" => "GEIS",
        _ => return None,
    };
    Some(code)
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let content = text::normalize(bytes);
    let end = content
        .rfind('}')
        .ok_or_else(|| EchemError::decode(file, "no JSON document found"))?;
    let session: Session = serde_json::from_str(&content[..=end])
        .map_err(|e| EchemError::decode(file, format!("invalid session JSON: {e}")))?;
    let measurement = session
        .measurements
        .into_iter()
        .next()
        .ok_or_else(|| EchemError::decode(file, "session holds no measurement"))?;

    let mut decoded = Decoded::new(DecoderKind::PalmSens);
    if let Some(title) = measurement.title {
        decoded.metadata.insert("title".to_string(), Scalar::Text(title));
    }
    if let Some(stamp) = measurement.time_stamp.as_ref().and_then(|v| v.as_str()) {
        if let Some(dt) = text::parse_datetime(stamp) {
            decoded.metadata.insert("datetime".to_string(), Scalar::DateTime(dt));
        }
    }
    if let Some(method) = measurement.method {
        decoded.technique = technique_from_method(&method).map(str::to_string);
        let lines = method.lines().map(str::to_string).collect();
        decoded
            .metadata
            .insert("method".to_string(), Scalar::Lines(lines));
    }

    let mut table = Table::new("data");
    for array in measurement.data_set.values {
        let unit = array.unit.as_ref().and_then(|u| u.symbol.clone());
        let values = array
            .data_values
            .iter()
            .map(|v| v.value.unwrap_or(f64::NAN))
            .collect();
        if let Some(quantity) = array.unit.and_then(|u| u.quantity) {
            decoded
                .metadata
                .insert(format!("quantity:{}", array.description), Scalar::Text(quantity));
        }
        table.push(&array.description, unit.as_deref(), Column::Numbers(values));
    }
    decoded.methods = decoded.technique.iter().cloned().collect();
    decoded.tables.push(table);
    Ok(decoded)
}
