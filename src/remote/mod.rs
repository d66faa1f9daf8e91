//! Commands given by placing spare pieces on the physical board.

pub mod decoder;
pub mod dials;

pub use decoder::{CommandDecoder, Decoded};
