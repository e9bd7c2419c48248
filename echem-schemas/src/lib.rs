//! Typed records of the electrochemistry lab notebook.

pub mod analysis;
pub mod archive;
pub mod attributes;
pub mod environment;
pub mod impedance;
pub mod measurement;
pub mod necc;
pub mod process_monitoring;
pub mod quantity;
pub mod reference;
pub mod sample;
pub mod setup;
pub mod spectroscopy;
pub mod voltammetry;

pub use quantity::{convert, Quantity, Signal};
