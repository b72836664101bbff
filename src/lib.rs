//! A RakNet-style reliable transport over UDP, carrying a Minecraft Pocket Edition (0.10 era)
//!  game protocol, plus a thin client and server on top of it.
//!
//! ## Traffic classes
//!
//! Every UDP payload is one of two things, distinguished by bit 7 of the first byte:
//!
//! * *unconnected* ("offline") messages: the first byte is a message id below 0x80, the rest
//!   is the message body. These are used for discovery and the connection handshake, and they
//!   carry the 16-byte offline magic `00 ff ff 00 fe fe fe fe fd fd fd fd 12 34 56 78`.
//! * *datagrams*: the first byte is a flag byte with bit 7 set. Datagrams carry either
//!   acknowledgments or a sequence of framed messages.
//!
//! ## Datagram header
//!
//! ```ascii
//! 0: flags
//!    0x80 valid (always set)
//!    0x40 ACK
//!    0x20 NAK (only if not ACK)
//!    0x10 packet pair         \
//!    0x08 continuous send      } data datagrams only
//!    0x04 needs B and AS      /
//! 1: datagram sequence number (u24 little endian) - data datagrams only
//! ```
//!
//! ACK / NAK datagrams are followed by a u16 (big endian) record count and that number of
//!  records, each consisting of a 'single' flag (u8), a start sequence number (u24 LE) and -
//!  if the single flag is 0 - an inclusive end sequence number (u24 LE).
//!
//! ## Framed messages
//!
//! A data datagram contains one or more messages, each with the following header:
//!
//! ```ascii
//! 0: flags: reliability << 5 | 0x10 if split
//! 1: payload length in *bits* (u16 BE)
//! *: reliable message number (u24 LE)           - if reliable
//! *: sequencing index (u24 LE)                  - if sequenced
//! *: ordering index (u24 LE), channel (u8)      - if ordered or sequenced
//! *: fragment count (u32 BE), split id (u16 BE),
//!    fragment index (u32 BE)                    - if split
//! *: payload
//! ```
//!
//! The payload of a (reassembled) message is a complete packet, starting with its message id.
//!
//! ## Reliability
//!
//! A datagram containing at least one reliable message is acknowledged by the receiver, and the
//!  sender retains it until the ACK arrives, resending it on NAK or after a timeout. Ordered
//!  messages are delivered in ordering index order per channel, sequenced messages that are
//!  older than the newest one already delivered are discarded.
//!
//! ## Counters
//!
//! All sequence numbers and indexes are 24 bit wide and wrap around, see [transport::u24::U24].

pub mod error;
pub mod util;
pub mod protocol;
pub mod transport;
pub mod world;
pub mod client;
pub mod server;
