use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

use crate::config::RelayConfig;

/// Chat relay that also forwards files between connected users.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address to bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Directory holding every user's incoming folder.
    #[arg(long, default_value = "files")]
    pub files_root: PathBuf,

    /// Seconds to wait for each piece of a file transfer; 0 waits forever.
    #[arg(long, default_value_t = 30)]
    pub transfer_timeout_secs: u64,

    /// Largest chunk a client may send in one piece, in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pub max_chunk_len: u32,
}

impl Cli {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            files_root: self.files_root.clone(),
            transfer_timeout: (self.transfer_timeout_secs > 0)
                .then(|| Duration::from_secs(self.transfer_timeout_secs)),
            max_chunk_len: self.max_chunk_len,
        }
    }
}
