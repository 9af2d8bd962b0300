//! Shared disaster-dump helper used by both stores.
//!
//! When a batched save fails partway, the spec requires a human-readable
//! dump of exactly what the file *would* have contained, so state can be
//! recovered by hand. Both [`crate::account_store`] and
//! [`crate::game_store`] funnel through this one function so the fallback
//! chain (secondary file, then stderr) only needs to be gotten right once.

use std::path::Path;

use tokio::io::AsyncWriteExt;

/// The append-only command-audit sink: every parsed request line, tagged
/// with the peer address it came from, regardless of how it was handled.
/// A real external collaborator (the spec calls audit sinks out of scope
/// as a component to design, not as a file we don't write).
pub struct CommandAudit {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl CommandAudit {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self { file: tokio::sync::Mutex::new(file) })
    }

    pub async fn record(&self, peer: &str, line: &str) {
        let entry = format!("{peer} {line}\n");
        let mut file = self.file.lock().await;
        if let Err(e) = file.write_all(entry.as_bytes()).await {
            log::warn!("failed to write command audit entry: {e}");
        }
    }
}

/// Attempts to write `content` to `dump_path` (a secondary disaster-log
/// file). If that write itself fails, falls back to logging `content` at
/// `error` level, which always reaches the process's stderr sink.
pub async fn emit_disaster_dump(what: &str, dump_path: &Path, content: &str) {
    match tokio::fs::write(dump_path, content).await {
        Ok(()) => {
            log::error!(
                "{what}: primary save failed; disaster dump written to {}",
                dump_path.display()
            );
        }
        Err(write_err) => {
            log::error!(
                "{what}: primary save failed AND disaster dump to {} failed ({write_err}); dumping inline:\n{content}",
                dump_path.display()
            );
        }
    }
}
