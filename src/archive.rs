//! Write-once archiving of received messages.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use log::info;

/// Where received messages end up. Failures are reported back to the session, which logs them and carries on.
#[async_trait]
pub trait Archive: Send + Sync {
    async fn write(&self, text: &str, filename: &str) -> io::Result<()>;
}

/// Archives each message to its own file in a directory.
#[derive(Debug, Clone)]
pub struct FileArchive {
    directory: PathBuf,
}

impl FileArchive {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        FileArchive {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl Archive for FileArchive {
    async fn write(&self, text: &str, filename: &str) -> io::Result<()> {
        let path = self.directory.join(filename);
        info!("Received message. Saving to file {}", path.display());
        tokio::fs::write(&path, text).await
    }
}

/// `<yyyyMMddHHmm>_<sequence>_<message type>.hl7`, with the sequence zero padded to six digits.
///
/// Anything in the message type other than ASCII letters and digits becomes `_`, the type comes off the wire
/// and must not be able to name another directory.
pub fn filename<Tz>(timestamp: &DateTime<Tz>, sequence: u64, message_type: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let message_type: String = message_type
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!(
        "{}_{:06}_{}.hl7",
        timestamp.format("%Y%m%d%H%M"),
        sequence,
        message_type
    )
}
