pub mod build;
pub mod codec;
pub mod fmi;

pub use build::{build, IndexedBlock};
pub use codec::{decode_block, encode_block};
pub use fmi::FmIndex;
