//! Commit-accept acknowledgements.

use std::fmt;
use std::str::FromStr;

use bytes::BytesMut;
use chrono::Local;

use crate::encoding::TextEncoding;
use crate::hl7::{Hl7Error, Message};
use crate::mllp;

/// Sending application and facility used in ACKs unless configured otherwise.
pub const DEFAULT_APP_NAME: &str = "HL7Listener";

/// HL7 `TS` format used for the ACK's MSH-7.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// When to answer an inbound message with an ACK.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Every message, regardless of MSH-15.
    #[default]
    Always,
    /// Only messages whose accept acknowledgement type (MSH-15) is `AL`.
    OnRequest,
    /// Never, the sender gets no response at all.
    Never,
}

impl AckMode {
    pub fn should_acknowledge(&self, message: &Message<'_>) -> bool {
        match self {
            AckMode::Always => true,
            AckMode::OnRequest => message.value("MSH-15").eq_ignore_ascii_case("AL"),
            AckMode::Never => false,
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AckMode::Always => "always",
            AckMode::OnRequest => "requested",
            AckMode::Never => "never",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ACK mode '{0}', expected always, requested or never")]
pub struct UnknownAckMode(pub String);

impl FromStr for AckMode {
    type Err = UnknownAckMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(AckMode::Always),
            "requested" | "on-request" => Ok(AckMode::OnRequest),
            "never" => Ok(AckMode::Never),
            _ => Err(UnknownAckMode(s.to_string())),
        }
    }
}

/// The unframed text of a `CA` acknowledgement for `message`.
///
/// Sender and receiver are swapped relative to the inbound message, this listener identifies itself as `app_name`
/// for both sending application and facility. Missing items in its MSH are left empty.
pub fn ack_message(message: &Message<'_>, app_name: &str, timestamp: &str) -> String {
    let control_id = message.control_id();
    format!(
        "MSH|^~\\&|{app}|{app}|{site}|{origin}|{timestamp}||ACK^{trigger}|{control_id}|{processing}|{version}\rMSA|CA|{control_id}",
        app = app_name,
        site = message.value("MSH-4"),
        origin = message.value("MSH-3"),
        timestamp = timestamp,
        trigger = message.trigger_event(),
        control_id = control_id,
        processing = message.value("MSH-11"),
        version = message.value("MSH-12"),
    )
}

/// Builds the MLLP framed acknowledgement for the raw text of a message, stamped with the current local time
/// and encoded the same way as the message it answers.
pub fn synthesize(
    raw: &str,
    app_name: &str,
    encoding: TextEncoding,
) -> Result<BytesMut, Hl7Error> {
    let message = Message::parse(raw)?;
    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let text = ack_message(&message, app_name, &timestamp);
    Ok(mllp::frame(&encoding.encode(&text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORU: &str = "MSH|^~\\&|LAB|HOSP|EMR|CLINIC|20240101120000||ORU^R01|MSGID123|P|2.5|||AL\rPID|1||12345";

    #[test]
    fn acknowledges_with_swapped_routing() {
        let message = Message::parse(ORU).unwrap();
        let ack = ack_message(&message, DEFAULT_APP_NAME, "20240101120001");

        assert_eq!(
            ack,
            "MSH|^~\\&|HL7Listener|HL7Listener|HOSP|LAB|20240101120001||ACK^R01|MSGID123|P|2.5\rMSA|CA|MSGID123"
        );
    }

    #[test]
    fn synthesized_ack_is_framed_and_parseable() {
        let frame = synthesize(ORU, "Archiver", TextEncoding::Utf8).unwrap();

        assert_eq!(frame[0], mllp::START_BLOCK);
        assert_eq!(&frame[frame.len() - 2..], &[mllp::END_BLOCK, mllp::CARRIAGE_RETURN]);

        let body = std::str::from_utf8(&frame[1..frame.len() - 2]).unwrap();
        let ack = Message::parse(body).unwrap();
        assert_eq!(ack.value("MSH-9"), "ACK^R01");
        assert_eq!(ack.value("MSH-3"), "Archiver");
        assert_eq!(ack.resolve("MSA"), Some(vec!["MSA|CA|MSGID123"]));
        assert_eq!(ack.value("MSH-7").len(), 14);
    }

    #[test]
    fn synthesized_ack_uses_the_session_encoding() {
        let raw = "MSH|^~\\&|CAFÉ|HOSP|||1||ADT^A01|7|P|2.3";

        let latin1 = synthesize(raw, "X", TextEncoding::Latin1).unwrap();
        assert!(latin1.windows(5).any(|w| w == b"CAF\xC9|"));

        let utf8 = synthesize(raw, "X", TextEncoding::Utf8).unwrap();
        assert!(utf8.windows(6).any(|w| w == "CAFÉ|".as_bytes()));

        let ascii = synthesize(raw, "X", TextEncoding::Ascii).unwrap();
        assert!(ascii.windows(5).any(|w| w == b"CAF?|"));
    }

    #[test]
    fn missing_header_items_are_left_empty() {
        let message = Message::parse("MSH|^~\\&|APP").unwrap();
        let ack = ack_message(&message, "X", "1");
        assert_eq!(ack, "MSH|^~\\&|X|X||APP|1||ACK^|||\rMSA|CA|");
    }

    #[test]
    fn refuses_text_without_a_header() {
        assert_eq!(
            synthesize("PID|1", "X", TextEncoding::Utf8),
            Err(Hl7Error::MissingHeader)
        );
    }

    #[test]
    fn ack_modes() {
        let requested = Message::parse(ORU).unwrap();
        let not_requested = Message::parse("MSH|^~\\&|A|B|C|D|1||ADT^A01|1|P|2.3|||NE").unwrap();

        assert!(AckMode::Always.should_acknowledge(&not_requested));
        assert!(AckMode::OnRequest.should_acknowledge(&requested));
        assert!(!AckMode::OnRequest.should_acknowledge(&not_requested));
        assert!(!AckMode::Never.should_acknowledge(&requested));
    }

    #[test]
    fn parses_ack_modes() {
        assert_eq!("Always".parse::<AckMode>(), Ok(AckMode::Always));
        assert_eq!("requested".parse::<AckMode>(), Ok(AckMode::OnRequest));
        assert_eq!("NEVER".parse::<AckMode>(), Ok(AckMode::Never));
        assert!("sometimes".parse::<AckMode>().is_err());
    }
}
