//! Ingress adapters that turn a wire-format byte stream into [`MediaPacket`]s
//! for `Source::on_packet`. The two RTMP/SDP paths live in the host binary's
//! HTTP/RTMP layer; this crate only supplies the PS/TS reassembler (spec
//! §4.9), since it requires the same bounded-recovery state machine
//! regardless of which network layer feeds it bytes.

pub mod ps;

pub use ps::{PsReassembler, PsReassemblerConfig};
