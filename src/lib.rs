/*!
# An HL7 v2 listener built on a tokio codec for the MLLP network protocol.

 HL7's MLLP is a simple, single-byte-text based protocol for framing HL7 messages over a TCP (or similar) transport.
 The full specification is available at [the HL7 site](https://www.hl7.org/documentcenter/private/standards/v3/V3_TRMLLP_R2_R2019.zip) (Note that they place the standards behind a free membership/login form).

 This crate provides:
 - [MllpCodec], a [Codec](https://docs.rs/tokio-util/latest/tokio_util/codec/index.html) implementation that
   encodes/decodes MLLP frames from a Tokio stream, tolerating frames split over any number of reads, several
   frames in a single read, and senders that drop or delay the trailing carriage return.
 - [hl7::resolve] and [Message], enough HL7 v2 to pull values out of a message by location (`PID-3[2].1.2`).
 - [ack], commit-accept acknowledgements built from an inbound message header.
 - [Listener], a complete listener service: every received message is archived, optionally relayed to a second
   HL7 endpoint (passthrough), and acknowledged, over plain TCP or TLS.

 ## Example
 ### Listener
 ```no_run
use std::sync::Arc;

use hl7_listener::{Config, FileArchive, Listener};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config {
        bind: "127.0.0.1:2575".parse()?,
        ..Config::default()
    };

    let handle = Listener::new(config, Arc::new(FileArchive::new("/var/spool/hl7"))).start().await?;

    tokio::signal::ctrl_c().await?;
    handle.request_stop();
    handle.join().await;
    Ok(())
}
```

 ### Publisher
 ```no_run
use bytes::*;
use tokio_util::codec::Framed;
use tokio::net::TcpStream;
use futures::{SinkExt, StreamExt};

use hl7_listener::MllpCodec;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Open a TCP stream to the socket address.
    let stream = TcpStream::connect("127.0.0.1:2575").await?;

    // Construct a MLLP transport using our codec
    let mut transport = Framed::new(stream, MllpCodec::new());

    // Send a message wrapped in MLLP
    transport.send(BytesMut::from("MSH|^~\\&|SEND|SITE|||20240101120000||ADT^A01|1|P|2.5")).await?;

    if let Some(response) = transport.next().await {
        match response{
            Ok(msg) => println!("  Received response: {:?}", msg),
            Err(e) => println!("  ERROR: {:?}", e)
        }
    }

    Ok(())
}
```

 ### Resolving values
 ```
let message = "MSH|^~\\&|EPIC|EPICADT|SMS|SMSADT|199912271408||ADT^A04|1817457|D|2.5\rPID||0493575^^^2^ID 1";
assert_eq!(hl7_listener::hl7::resolve(message, "MSH-9.2").unwrap(), vec!["A04"]);
assert_eq!(hl7_listener::hl7::resolve(message, "PID-2.4").unwrap(), vec!["2"]);
```
 */

pub mod ack;
pub mod archive;
pub mod cli;
pub mod config;
pub mod encoding;
pub mod error;
pub mod forwarder;
pub mod hl7;
pub mod listener;
pub mod mllp;
pub mod session;
pub mod tls;

pub use ack::AckMode;
pub use archive::{Archive, FileArchive};
pub use config::{Config, PassthroughTarget, TlsConfig};
pub use encoding::TextEncoding;
pub use error::{Error, Result};
pub use hl7::{Location, Message};
pub use listener::{Listener, ListenerHandle};
pub use mllp::MllpCodec;
