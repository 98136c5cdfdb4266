//! # media-core
//!
//! The publish/subscribe live media source and egress packager core: one
//! [`Source`](source::Source) per live stream, fed by an ingress adapter and
//! fanned out to any number of [`Consumer`](consumer::Consumer) handles and
//! [`Packager`](packager::Packager) instances (HLS, DASH/fMP4, DVR, WebRTC).
//!
//! This crate has no network listener of its own; a host binary (see the
//! `media-server` crate in this workspace) owns RTMP/SDP/HTTP ingestion and
//! wires packets into [`Source::on_packet`](source::Source::on_packet).

pub mod config;
pub mod consumer;
pub mod error;
pub mod fragment;
pub mod gop;
pub mod hooks;
pub mod identity;
pub mod ingress;
pub mod jitter;
pub mod manager;
pub mod metadata;
pub mod mixqueue;
pub mod mux;
pub mod packager;
pub mod packet;
pub mod playlist;
pub mod source;
pub mod timer;

pub use consumer::{Consumer, ConsumerId};
pub use error::{CoreError, Result};
pub use identity::StreamIdentity;
pub use manager::SourceManager;
pub use packet::{CodecId, MediaPacket, PacketType};
pub use source::Source;
