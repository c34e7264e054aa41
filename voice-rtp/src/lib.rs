//! RTP/RTCP packetization and SRTP encryption for Discord voice/Go-Live.
//!
//! Assembles headers, dispatches to per-codec payloaders (Opus, H.264,
//! H.265, VP8), encrypts each packet with the negotiated AEAD, and emits
//! periodic RTCP Sender Reports.

pub mod codec;
pub mod error;
pub mod header;
pub mod packet;
pub mod rtcp;
pub mod stream_state;

pub use codec::{CodecPayloader, Packetizer, PayloadChunk, RtpPacketizer, SendOutput};
pub use error::{Error, Result};
pub use packet::{Codec, EncodedPacket, PacketFlags};
pub use stream_state::RtpStreamState;
