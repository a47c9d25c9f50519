//! # nexus-wire
//!
//! Fixed-size packet framing and connection management for talking to a
//! text-generation server over a plain byte stream.
//!
//! A message is split into packets of an agreed size, the last one padded
//! with zero bytes, and closed by one all-zero sentinel packet. Replies are
//! read back as a stream of text fragments so callers can render output as
//! it arrives.
//!
//! ## Features
//!
//! - **Framing**: [`PacketCodec`] encodes and decodes packets for use with
//!   `tokio_util::codec::Framed`
//! - **UTF-8 Reassembly**: [`Utf8Assembler`] joins characters split across
//!   packet boundaries
//! - **Transport**: [`Transport`] and [`PacketTransport`] send whole messages
//!   and receive replies fragment by fragment
//! - **Lifecycle**: [`Connection`] retries refused connections, tears down
//!   cleanly, and joins the background tasks it owns
//!
//! ## Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use nexus_wire::{Connection, ConnectionConfig, TcpConnector, Transport};
//!
//! # async fn example() -> nexus_wire::Result<()> {
//! let mut connection = Connection::new(
//!     TcpConnector::new("localhost", 50006),
//!     ConnectionConfig::default(),
//! )?;
//! connection.connect().await?;
//!
//! connection.send_message("{\"prompt\": \"Hello\"}").await?;
//! let mut fragments = connection.receive_message();
//! while let Some(fragment) = fragments.next().await {
//!     print!("{}", fragment?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: Packet encoder and decoder
//! - [`assembler`]: Incremental UTF-8 decoding
//! - [`transport`]: Message transport trait and packet implementation
//! - [`connection`]: Connect, retry, disconnect, and task tracking
//! - [`error`]: Error types and results

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod assembler;
pub mod codec;
pub mod connection;
pub mod error;
pub mod transport;

pub use assembler::Utf8Assembler;
pub use codec::{DEFAULT_PACKET_SIZE, Packet, PacketCodec};
pub use connection::{
    CONNECTION_TASK, Connection, ConnectionConfig, ConnectionState, Connector,
    DEFAULT_RETRY_DELAY, TcpConnector,
};
pub use error::{Result, WireError};
pub use transport::{FragmentStream, PacketTransport, Transport};
