pub mod decoder;
pub mod encode;
pub mod primitives;

pub use decoder::{declared_len, decode_sis, SisEvent, UnidataRequest};
pub use primitives::TransmissionMode;
