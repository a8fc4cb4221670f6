//! File relay bookkeeping.
//!
//! A transfer runs `file-open`, zero or more `file-chunk`s and one
//! `file-close` through the hub. [`Transfer`] is the sending side's state,
//! [`InboundFile`] is a receiving session's open handle.

use std::{collections::BTreeMap, path::{Path, PathBuf}};

use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, warn};

use crate::{
    directory::{self, sanitize_file_name},
    envelope::{Origin, Payload, SessionId, Target},
    error::{DeliveryError, DirectoryError},
    hub::Delivery,
};

/// Sending side of one `/send`.
#[derive(Debug)]
pub struct Transfer {
    target: Target,
    file_name: String,
    remaining: Option<u64>,
    received_by: usize,
    failures: BTreeMap<SessionId, (String, String)>,
}

impl Transfer {
    pub fn new(target: Target, file_name: String) -> Self {
        Self {
            target,
            file_name,
            remaining: None,
            received_by: 0,
            failures: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// `None` until the total length has been read.
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    pub fn set_total(&mut self, total: u64) {
        self.remaining = Some(total);
    }

    pub fn consume(&mut self, bytes: usize) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(bytes as u64);
        }
    }

    pub fn open_payload(&self) -> Payload {
        Payload::FileOpen {
            file_name: self.file_name.clone(),
        }
    }

    pub fn close_payload(&self, complete: bool) -> Payload {
        Payload::FileClose {
            file_name: self.file_name.clone(),
            complete,
        }
    }

    /// Folds one publish result into the transfer, keeping the first
    /// failure per receiver.
    pub fn record(&mut self, delivery: Delivery) {
        self.received_by = self.received_by.max(delivery.recipients);
        for failure in delivery.failures {
            if !failure.error.concerns_sender() {
                continue;
            }
            self.failures
                .entry(failure.id)
                .or_insert((failure.username, failure.error.to_string()));
        }
    }

    /// Lines to send back to the sender once the transfer ends.
    pub fn report(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Target::User(name) = &self.target {
            if self.received_by == 0 {
                lines.push(format!("No user named {name} is connected"));
            }
        }
        for (username, reason) in self.failures.values() {
            lines.push(format!(
                "{username} did not receive {}: {reason}",
                self.file_name
            ));
        }
        lines
    }
}

/// A file being written on behalf of one sender.
pub struct InboundFile {
    sender: Origin,
    name: String,
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl InboundFile {
    pub async fn create(
        dir: &Path,
        sender: Origin,
        requested: &str,
    ) -> Result<Self, DeliveryError> {
        let file_name = sanitize_file_name(requested)
            .ok_or_else(|| DirectoryError::InvalidPath(requested.to_string()))?;
        let (name, file) = directory::create_unique(dir, file_name).await?;
        Ok(Self {
            sender,
            path: dir.join(&name),
            name,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn belongs_to(&self, sender: SessionId) -> bool {
        self.sender.id == sender
    }

    /// Name after clash resolution.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), DeliveryError> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|err| DirectoryError::io(&self.path, err))?;
        self.written += bytes.len() as u64;
        debug!(file = %self.name, bytes = bytes.len(), total = self.written, "chunk stored");
        Ok(())
    }

    pub async fn finish(mut self) -> Result<String, DeliveryError> {
        self.writer
            .flush()
            .await
            .map_err(|err| DirectoryError::io(&self.path, err))?;
        Ok(self.name)
    }

    /// Closes and deletes a file that will never be completed.
    pub async fn discard(self) {
        let InboundFile { path, writer, .. } = self;
        drop(writer);
        if let Err(error) = fs::remove_file(&path).await {
            warn!(file = %path.display(), %error, "could not remove partial file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::DeliveryFailure;

    fn failure(id: SessionId, username: &str, error: DeliveryError) -> DeliveryFailure {
        DeliveryFailure {
            id,
            username: username.to_string(),
            error,
        }
    }

    #[test]
    fn transfer_counts_down_to_zero() {
        let mut transfer = Transfer::new(Target::All, "a.bin".into());
        assert_eq!(transfer.remaining(), None);
        transfer.set_total(10);
        transfer.consume(4);
        transfer.consume(6);
        assert_eq!(transfer.remaining(), Some(0));
    }

    #[test]
    fn report_names_missing_target() {
        let mut transfer = Transfer::new(Target::User("ghost".into()), "a.bin".into());
        transfer.record(Delivery::default());
        assert_eq!(transfer.report(), vec!["No user named ghost is connected"]);
    }

    #[test]
    fn report_keeps_first_failure_per_receiver() {
        let mut transfer = Transfer::new(Target::All, "a.bin".into());
        transfer.record(Delivery {
            recipients: 2,
            failures: vec![failure(2, "bob", DeliveryError::Busy("b.bin".into()))],
        });
        transfer.record(Delivery {
            recipients: 2,
            failures: vec![failure(
                2,
                "bob",
                DirectoryError::InvalidPath("x".into()).into(),
            )],
        });

        assert_eq!(
            transfer.report(),
            vec!["bob did not receive a.bin: already receiving b.bin"]
        );
    }

    #[tokio::test]
    async fn inbound_file_writes_and_resolves_clashes() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"old").unwrap();

        let mut file = InboundFile::create(tmp.path(), Origin::new(1, "alice"), "a.txt")
            .await
            .unwrap();
        assert_eq!(file.name(), "a(1).txt");
        file.write_chunk(b"new ").await.unwrap();
        file.write_chunk(b"data").await.unwrap();
        file.finish().await.unwrap();

        assert_eq!(std::fs::read(tmp.path().join("a(1).txt")).unwrap(), b"new data");
        assert_eq!(std::fs::read(tmp.path().join("a.txt")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn discarded_file_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut file = InboundFile::create(tmp.path(), Origin::new(1, "alice"), "part.bin")
            .await
            .unwrap();
        file.write_chunk(b"half").await.unwrap();
        file.discard().await;

        assert!(!tmp.path().join("part.bin").exists());
    }
}
