//! Message transport over a framed byte stream.
//!
//! [`Transport`] is the seam the conversational client drives: it sends one
//! whole text message and receives the reply as a lazy stream of decoded
//! fragments. [`PacketTransport`] implements it on top of [`PacketCodec`]
//! for any `AsyncRead + AsyncWrite` stream.

use crate::assembler::Utf8Assembler;
use crate::codec::{Packet, PacketCodec};
use crate::error::{Result, WireError};
use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

/// A stream of decoded text fragments making up one received message.
///
/// The stream ends normally at the sentinel packet. A failed read is
/// yielded as a final `Err` item, so a lost connection is never mistaken
/// for a complete message.
pub type FragmentStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// Sends and receives whole text messages.
#[async_trait]
pub trait Transport: Send {
    /// Sends one message. Failures are reported, never retried.
    async fn send_message(&mut self, text: &str) -> Result<()>;

    /// Starts reading the next message as a stream of fragments.
    fn receive_message(&mut self) -> FragmentStream<'_>;

    /// Reads the next message to completion.
    async fn receive_text(&mut self) -> Result<String> {
        let mut text = String::new();
        let mut fragments = self.receive_message();
        while let Some(fragment) = fragments.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

/// Outcome of reading one packet.
#[derive(Debug)]
pub(crate) enum Step {
    /// Decoded text from a payload packet, never empty.
    Text(String),
    /// The sentinel arrived; carries whatever the assembler still held.
    Done(String),
}

/// Something that can be polled for the next [`Step`] of a message.
#[async_trait]
pub(crate) trait StepReader: Send {
    async fn next_step(&mut self, asm: &mut Utf8Assembler) -> Result<Step>;
}

/// Drives a [`StepReader`] until the sentinel or the first error.
pub(crate) fn fragment_stream<'a, R>(reader: R) -> FragmentStream<'a>
where
    R: StepReader + 'a,
{
    let state = Some((reader, Utf8Assembler::new()));
    Box::pin(futures::stream::unfold(state, |state| async move {
        let (mut reader, mut asm) = state?;
        match reader.next_step(&mut asm).await {
            Ok(Step::Text(text)) => Some((Ok(text), Some((reader, asm)))),
            Ok(Step::Done(tail)) if !tail.is_empty() => Some((Ok(tail), None)),
            Ok(Step::Done(_)) => None,
            Err(e) => Some((Err(e), None)),
        }
    }))
}

/// A [`Transport`] that frames messages into fixed-size packets.
///
/// # Examples
///
/// ```
/// use nexus_wire::{PacketTransport, Transport};
///
/// # async fn example() -> nexus_wire::Result<()> {
/// let (near, far) = tokio::io::duplex(1024);
/// let mut client = PacketTransport::new(near, 8)?;
/// let mut server = PacketTransport::new(far, 8)?;
///
/// client.send_message("hello over packets").await?;
/// assert_eq!(server.receive_text().await?, "hello over packets");
/// # Ok(())
/// # }
/// ```
pub struct PacketTransport<S> {
    framed: Framed<S, PacketCodec>,
}

impl<S> PacketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps a byte stream.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidPacketSize`] if `packet_size` is zero.
    pub fn new(stream: S, packet_size: usize) -> Result<Self> {
        let codec = PacketCodec::new(packet_size)?;
        Ok(Self {
            framed: Framed::new(stream, codec),
        })
    }

    /// Returns the packet size in bytes.
    pub fn packet_size(&self) -> usize {
        self.framed.codec().packet_size()
    }

    /// Returns a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.framed.get_ref()
    }

    /// Consumes the transport and returns the underlying stream.
    ///
    /// Any buffered but unread bytes are discarded.
    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }

    pub(crate) async fn read_step(&mut self, asm: &mut Utf8Assembler) -> Result<Step> {
        loop {
            match self.framed.next().await {
                Some(Ok(Packet::End)) => {
                    trace!("End of message");
                    return Ok(Step::Done(asm.finish()));
                }
                Some(Ok(packet)) => {
                    let text = asm.push(packet.payload().unwrap_or_default());
                    if !text.is_empty() {
                        return Ok(Step::Text(text));
                    }
                }
                Some(Err(e)) => {
                    warn!("Connection lost while receiving: {}", e);
                    return Err(e);
                }
                None => {
                    warn!("Connection lost. Stream closed before the end of the message");
                    return Err(WireError::ConnectionLost(
                        "stream closed before end-of-message sentinel".to_string(),
                    ));
                }
            }
        }
    }
}

impl<S> std::fmt::Debug for PacketTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketTransport")
            .field("packet_size", &self.framed.codec().packet_size())
            .finish()
    }
}

#[async_trait]
impl<'r, S> StepReader for &'r mut PacketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_step(&mut self, asm: &mut Utf8Assembler) -> Result<Step> {
        (**self).read_step(asm).await
    }
}

#[async_trait]
impl<S> Transport for PacketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_message(&mut self, text: &str) -> Result<()> {
        debug!("Sending message of {} bytes", text.len());
        if let Err(e) = self.framed.send(text).await {
            if e.is_disconnect() {
                warn!("Connection lost. Make sure the server is running: {}", e);
            } else {
                warn!("Failed to send message: {}", e);
            }
            return Err(e);
        }
        Ok(())
    }

    fn receive_message(&mut self) -> FragmentStream<'_> {
        fragment_stream(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tokio_test::io::Builder;

    async fn round_trip(text: &str, packet_size: usize) -> String {
        let (near, far) = tokio::io::duplex(64);
        let mut sender = PacketTransport::new(near, packet_size).unwrap();
        let mut receiver = PacketTransport::new(far, packet_size).unwrap();

        let (sent, received) = tokio::join!(sender.send_message(text), receiver.receive_text());
        sent.unwrap();
        received.unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_various_packet_sizes() {
        let samples = [
            "",
            "a",
            "hello world",
            "exactly8",
            "héllo wörld, ünïcödé",
            "🦀 crabs 🦀 everywhere 🦀",
        ];
        for packet_size in [1, 2, 3, 7, 8, 4096] {
            for sample in samples {
                assert_eq!(
                    round_trip(sample, packet_size).await,
                    sample,
                    "packet size {packet_size}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_large_message_round_trip() {
        let text = "The quick brown fox. ".repeat(2_000);
        assert_eq!(round_trip(&text, 4096).await, text);
    }

    #[tokio::test]
    async fn test_consecutive_messages_stay_separate() {
        let (near, far) = tokio::io::duplex(256);
        let mut sender = PacketTransport::new(near, 4).unwrap();
        let mut receiver = PacketTransport::new(far, 4).unwrap();

        sender.send_message("first").await.unwrap();
        sender.send_message("second").await.unwrap();

        assert_eq!(receiver.receive_text().await.unwrap(), "first");
        assert_eq!(receiver.receive_text().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_send_writes_padded_packets_and_sentinel() {
        let mock = Builder::new().write(b"hello\0\0\0\0\0\0\0").build();
        let mut transport = PacketTransport::new(mock, 4).unwrap();
        transport.send_message("hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_yields_per_packet() {
        let mock = Builder::new()
            .read(b"abcd")
            .read(b"ef\0\0")
            .read(b"\0\0\0\0")
            .build();
        let mut transport = PacketTransport::new(mock, 4).unwrap();

        let fragments: Vec<String> = transport
            .receive_message()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["abcd".to_string(), "ef".to_string()]);
    }

    #[tokio::test]
    async fn test_split_character_is_reassembled() {
        // "é" = c3 a9, split across two packets
        let mock = Builder::new()
            .read(b"ab\xc3")
            .read(b"\xa9cd")
            .read(b"\0\0\0")
            .build();
        let mut transport = PacketTransport::new(mock, 3).unwrap();

        let fragments: Vec<String> = transport
            .receive_message()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["ab".to_string(), "écd".to_string()]);
    }

    #[tokio::test]
    async fn test_broken_pipe_on_send_is_reported() {
        let mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
            .build();
        let mut transport = PacketTransport::new(mock, 4).unwrap();

        let err = transport.send_message("hello").await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_read_error_is_terminal_not_end_of_message() {
        let mock = Builder::new()
            .read(b"abcd")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut transport = PacketTransport::new(mock, 4).unwrap();

        let items: Vec<Result<String>> = transport.receive_message().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "abcd");
        assert!(items[1].as_ref().unwrap_err().is_disconnect());
    }

    #[tokio::test]
    async fn test_eof_before_sentinel_is_connection_lost() {
        let mock = Builder::new().read(b"abcd").build();
        let mut transport = PacketTransport::new(mock, 4).unwrap();

        let err = transport.receive_text().await.unwrap_err();
        assert!(matches!(err, WireError::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn test_eof_mid_packet_is_connection_lost() {
        let mock = Builder::new().read(b"abcd").read(b"ef").build();
        let mut transport = PacketTransport::new(mock, 4).unwrap();

        let items: Vec<Result<String>> = transport.receive_message().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "abcd");
        let err = items[1].as_ref().unwrap_err();
        assert!(matches!(err, WireError::ConnectionLost(_)));
        assert!(err.is_disconnect());
    }
}
