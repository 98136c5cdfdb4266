//! Hand-rolled container writers. No general transcoding or demuxing lives
//! here (explicit non-goal); these are pure byte-level packetizers driven
//! by packets the Source already decoded the envelope of.

pub mod boxes;
pub mod flv;
pub mod fswrite;
pub mod ts;

pub use boxes::BoxBuilder;
pub use fswrite::write_atomic;
