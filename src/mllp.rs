//! MLLP framing: `<VT> payload <FS> <CR>`.
//!
//! [`MllpCodec`] is a [tokio codec](https://docs.rs/tokio-util/latest/tokio_util/codec/index.html) that
//! turns an arbitrarily fragmented byte stream into complete frame payloads, and wraps outgoing
//! payloads in the MLLP header/footer.
//! MLLP standard: https://www.hl7.org/implement/standards/product_brief.cfm?product_id=55

use bytes::buf::{Buf, BufMut};
use bytes::BytesMut;
use log::{debug, trace, warn};
use tokio_util::codec::{Decoder, Encoder};

/// Vertical-Tab char, the marker for the start of a message
pub const START_BLOCK: u8 = 0x0B;
/// File-Separator char, the marker for the end of a message
pub const END_BLOCK: u8 = 0x1C;
/// CR, conventionally sent straight after the end block
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// Default cap on the bytes we'll hold while waiting for an end block.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Wraps `payload` in an MLLP header/footer.
pub fn frame(payload: &[u8]) -> BytesMut {
    let mut dst = BytesMut::with_capacity(payload.len() + 3);
    put_frame(payload, &mut dst);
    dst
}

fn put_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + 3); //we need an extra 3 bytes of space on top of the message proper
    dst.put_u8(START_BLOCK); //header
    dst.put_slice(payload); //data
    dst.put_slice(&[END_BLOCK, CARRIAGE_RETURN]); //footer
}

/// A codec for MLLP frames.
///
/// The read buffer handed to [`Decoder::decode`] is the per-connection carry-over: anything not
/// consumed by one call (a partial frame, or the start of a frame fused onto the previous one)
/// is still there on the next call. `Framed` guarantees that, and so must any manual caller.
#[derive(Debug, Clone)]
pub struct MllpCodec {
    // How far past the start block we've already searched for an end block, so a frame trickling in
    // over many reads isn't rescanned from the top each time.
    scanned: usize,
    max_frame_length: usize,
}

impl Default for MllpCodec {
    fn default() -> Self {
        MllpCodec::new()
    }
}

impl MllpCodec {
    /// Creates a new Codec instance, generally for use within a [Tokio Framed](https://docs.rs/tokio-util/latest/tokio_util/codec/struct.Framed.html),
    /// but can be instantiated standalone for testing purposes etc.
    /// Example:
    /// ```
    /// use hl7_listener::MllpCodec;
    /// let mllp = MllpCodec::new();
    /// ```
    pub fn new() -> Self {
        MllpCodec::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Creates a codec that discards any partial frame growing beyond `max_frame_length` bytes.
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        MllpCodec {
            scanned: 0,
            max_frame_length,
        }
    }

    /// Index of the first end block at or after `from`.
    fn get_footer_position(src: &BytesMut, from: usize) -> Option<usize> {
        let position = src
            .get(from..)?
            .iter()
            .position(|b| *b == END_BLOCK)
            .map(|offset| from + offset);

        match position {
            Some(index) => trace!("MLLP: Found footer at index {}", index),
            None => trace!("MLLP: Unable to find footer..."),
        }
        position
    }
}

// Support encoding data as an MLLP Frame.
// This is used for both the primary HL7 message relayed to a passthrough host, and any ACK sent back from the listener.
impl Encoder<BytesMut> for MllpCodec {
    type Error = std::io::Error;

    fn encode(&mut self, event: BytesMut, dst: &mut BytesMut) -> Result<(), Self::Error> {
        put_frame(&event, dst);
        trace!("MLLP: Encoded {} bytes for send", dst.len());
        Ok(())
    }
}

// Support decoding data from an MLLP Frame.
// This is used for receiving the primary HL7 message in a session, and also reading ACKs back from a passthrough host.
impl Decoder for MllpCodec {
    type Item = BytesMut;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // we DO have to ignore any bytes prior to the start block, that includes a CR
        // that turned up late for the previous frame
        let start_offset = match src.iter().position(|b| *b == START_BLOCK) {
            Some(offset) => offset,
            None => {
                if !src.is_empty() {
                    trace!("MLLP: Ignoring {} bytes outside of a frame", src.len());
                    src.clear();
                }
                self.scanned = 0;
                return Ok(None);
            }
        };

        if start_offset > 0 {
            trace!("MLLP: Ignoring {} bytes before the start block", start_offset);
            src.advance(start_offset);
            self.scanned = 0;
        }

        let search_from = self.scanned.max(1);
        if let Some(end_offset) = MllpCodec::get_footer_position(src, search_from) {
            let mut result = src.split_to(end_offset + 1); // header, data and end block
            result.advance(1); // drop the header
            result.truncate(result.len() - 1); // and the end block

            // the CR is optional on the wire, and anything after it belongs to the next frame
            if src.first() == Some(&CARRIAGE_RETURN) {
                src.advance(1);
            }
            self.scanned = 0;

            return Ok(Some(result));
        }

        if src.len() > self.max_frame_length {
            warn!(
                "MLLP: Discarding {} buffered bytes, no end block within {} bytes",
                src.len(),
                self.max_frame_length
            );
            src.clear();
            self.scanned = 0;
            return Ok(None);
        }

        self.scanned = src.len();
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }

        if !src.is_empty() {
            debug!("MLLP: Stream ended part way through a frame, dropping {} bytes", src.len());
            src.clear();
            self.scanned = 0;
        }
        Ok(None)
    }
}
