pub mod block;
pub mod controls;
pub mod error;
pub mod json;
pub mod meta;
pub mod text;

pub use block::*;
pub use controls::*;
pub use error::*;
pub use meta::PathDict;
pub use text::TextHeap;
