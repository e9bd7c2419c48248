use crate::error::EchemError;
use serde::{Deserialize, Serialize};

/// Tunables shared by the dispatcher, normalizers and the id minting routines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Temperature recorded in a measurement's atmosphere when the raw file has none.
    /// `None` leaves the atmosphere temperature unset.
    pub ambient_temperature_celsius: Option<f64>,
    /// Number of leading bytes binary header matchers inspect.
    pub binary_header_window: usize,
    pub search_page_size: usize,
    /// Current density (mA/cm^2) at which the OER potential is read off.
    pub oer_threshold_ma_cm2: f64,
    /// Institute prefix used when minting sample lab ids, e.g. "CE-NOME".
    pub institute: Option<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            ambient_temperature_celsius: Some(25.0),
            binary_header_window: 16 * 1024,
            search_page_size: 9999,
            oer_threshold_ma_cm2: 10.0,
            institute: None,
        }
    }
}

impl IngestSettings {
    pub fn from_yaml_str(source: &str, text: &str) -> Result<Self, EchemError> {
        serde_yaml::from_str(text).map_err(|e| EchemError::YamlParsing(source.to_string(), e))
    }
}
