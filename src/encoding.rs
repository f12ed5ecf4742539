//! Character encodings accepted on the wire.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

/// The text encoding used to turn frame payloads into message text, and ACKs/relayed messages back into bytes.
///
/// The MLLP markers are single bytes below 0x80 in every supported encoding, so framing happens on raw
/// bytes and only complete payloads are decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextEncoding {
    Ascii,
    #[default]
    Utf8,
    Latin1,
}

impl TextEncoding {
    /// Decodes a payload. Bytes the encoding can't represent become `?` (ASCII) or U+FFFD (UTF-8).
    pub fn decode<'b>(&self, bytes: &'b [u8]) -> Cow<'b, str> {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes),
            TextEncoding::Ascii => {
                if bytes.is_ascii() {
                    // ascii is valid utf8
                    String::from_utf8_lossy(bytes)
                } else {
                    Cow::Owned(
                        bytes
                            .iter()
                            .map(|b| if b.is_ascii() { *b as char } else { '?' })
                            .collect(),
                    )
                }
            }
            TextEncoding::Latin1 => {
                if bytes.is_ascii() {
                    String::from_utf8_lossy(bytes)
                } else {
                    Cow::Owned(bytes.iter().map(|b| *b as char).collect())
                }
            }
        }
    }

    /// Encodes text for the wire, replacing characters the encoding can't represent with `?`.
    pub fn encode(&self, text: &str) -> BytesMut {
        match self {
            TextEncoding::Utf8 => BytesMut::from(text),
            TextEncoding::Ascii => narrow(text, 0x7F),
            TextEncoding::Latin1 => narrow(text, 0xFF),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Ascii => "US-ASCII",
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Latin1 => "ISO-8859-1",
        }
    }
}

fn narrow(text: &str, max: u32) -> BytesMut {
    let mut dst = BytesMut::with_capacity(text.len());
    for c in text.chars() {
        let code = c as u32;
        dst.put_u8(if code <= max { code as u8 } else { b'?' });
    }
    dst
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported encoding '{0}', expected one of ASCII, UTF8 or Latin1")]
pub struct UnknownEncoding(pub String);

impl FromStr for TextEncoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASCII" | "US-ASCII" => Ok(TextEncoding::Ascii),
            "UTF8" | "UTF-8" => Ok(TextEncoding::Utf8),
            "LATIN1" | "ISO-8859-1" => Ok(TextEncoding::Latin1),
            _ => Err(UnknownEncoding(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("utf8".parse::<TextEncoding>(), Ok(TextEncoding::Utf8));
        assert_eq!("UTF-8".parse::<TextEncoding>(), Ok(TextEncoding::Utf8));
        assert_eq!("Latin1".parse::<TextEncoding>(), Ok(TextEncoding::Latin1));
        assert_eq!("iso-8859-1".parse::<TextEncoding>(), Ok(TextEncoding::Latin1));
        assert_eq!("ascii".parse::<TextEncoding>(), Ok(TextEncoding::Ascii));
        assert!("ebcdic".parse::<TextEncoding>().is_err());
    }

    #[test]
    fn latin1_maps_bytes_to_code_points() {
        let decoded = TextEncoding::Latin1.decode(b"M\xfcller");
        assert_eq!(decoded, "Müller");
        assert_eq!(&TextEncoding::Latin1.encode(&decoded)[..], b"M\xfcller");
    }

    #[test]
    fn ascii_replaces_high_bytes() {
        assert_eq!(TextEncoding::Ascii.decode(b"M\xfcller"), "M?ller");
        assert_eq!(&TextEncoding::Ascii.encode("Müller")[..], b"M?ller");
    }

    #[test]
    fn utf8_is_lossy_rather_than_failing() {
        assert_eq!(TextEncoding::Utf8.decode("Müller".as_bytes()), "Müller");
        assert_eq!(TextEncoding::Utf8.decode(b"M\xfcller"), "M\u{FFFD}ller");
    }

    #[test]
    fn latin1_encode_replaces_wide_characters() {
        assert_eq!(&TextEncoding::Latin1.encode("a€b")[..], b"a?b");
    }
}
