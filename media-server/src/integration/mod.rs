//! Demo ingress wiring.
//!
//! Stands in for the RTMP/SDP/HTTP ingestion the spec treats as an external
//! collaborator: reads a local MPEG-PS capture through the reassembler and
//! feeds the resulting packets into a live `Source`, exactly the call
//! sequence a real ingress adapter would make.

pub mod demo_ingress;
