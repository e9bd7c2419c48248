//! Ingestion core of the electrochemistry lab notebook: instrument decoders, archive builders,
//! the file dispatcher, record normalizers, lab id minting and the batch importer.

pub mod analysis;
pub mod batch;
pub mod builders;
pub mod decoders;
pub mod dispatch;
pub mod error;
pub mod formula;
pub mod host;
pub mod ids;
pub mod normalize;
pub mod report;
pub mod settings;

pub use dispatch::Dispatcher;
pub use error::EchemError;
pub use host::UploadContext;
pub use normalize::Normalizer;
pub use settings::IngestSettings;
