use std::{path::PathBuf, time::Duration};

/// Runtime settings shared by every session.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Parent of every incoming directory.
    pub files_root: PathBuf,
    /// Upper bound on the wait for each length word or chunk of a transfer.
    pub transfer_timeout: Option<Duration>,
    pub max_chunk_len: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            files_root: PathBuf::from("files"),
            transfer_timeout: Some(Duration::from_secs(30)),
            max_chunk_len: 16 * 1024 * 1024,
        }
    }
}
