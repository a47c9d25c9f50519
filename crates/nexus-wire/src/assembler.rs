//! UTF-8 reassembly across packet boundaries.
//!
//! A packet boundary can fall in the middle of a multi-byte character, so
//! packets are not decoded on their own. Bytes are pushed into a
//! [`Utf8Assembler`], which hands back the longest valid prefix and keeps an
//! incomplete trailing sequence until the next packet arrives.

use tracing::trace;

/// Incremental UTF-8 decoder for one message.
///
/// Invalid sequences become U+FFFD rather than failing the message. An
/// incomplete sequence still pending when the message ends is decoded the
/// same way by [`Utf8Assembler::finish`].
#[derive(Debug, Default, Clone)]
pub struct Utf8Assembler {
    pending: Vec<u8>,
}

impl Utf8Assembler {
    /// Creates an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns the text that is now complete.
    ///
    /// The returned string may be empty if every byte is part of a character
    /// that has not finished arriving yet.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            trace!("Carrying {} bytes to the next packet", self.pending.len());
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
        out
    }

    /// Returns true if bytes are waiting for the rest of their character.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Flushes whatever is still pending at the end of a message.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}
