use thiserror::Error;

#[derive(Debug, Error)]
pub enum EchemError {
    #[error("Failed to decode '{file}': {reason}")]
    DecodeFailed { file: String, reason: String },

    #[error("Field '{field}' would violate an invariant: {reason}")]
    SchemaViolated { field: String, reason: String },

    #[error("No record found for lab id '{0}'")]
    ReferenceUnresolved(String),

    #[error("I/O error for file '{0}': {1}")]
    UploadIO(String, #[source] std::io::Error),

    #[error("Row {row} of sheet '{sheet}' is missing required column '{column}'")]
    UserInputMissing {
        sheet: String,
        row: usize,
        column: String,
    },

    #[error("Lab id '{0}' already exists")]
    IdCollision(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Failed to parse YAML from '{0}': {1}")]
    YamlParsing(String, #[source] serde_yaml::Error),

    #[error("Failed to process CSV file '{0}': {1}")]
    CsvError(String, #[source] csv::Error),

    #[error("Workbook error in '{0}': {1}")]
    Workbook(String, String),

    #[error("Invalid file pattern '{0}': {1}")]
    Pattern(String, #[source] regex::Error),

    #[error("Operation cancelled by the host")]
    Cancelled,
}

impl EchemError {
    pub fn decode(file: &str, reason: impl Into<String>) -> Self {
        Self::DecodeFailed {
            file: file.to_string(),
            reason: reason.into(),
        }
    }

    pub fn schema(field: &str, reason: impl Into<String>) -> Self {
        Self::SchemaViolated {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
