pub mod arq;
pub mod decoder;
pub mod nonarq;
pub mod primitives;
pub mod state;

pub use arq::ArqError;
pub use decoder::{decode_dts, declared_len};
pub use primitives::Frame;
pub use state::{DtsAction, PeerLifecycle, PeerState};
