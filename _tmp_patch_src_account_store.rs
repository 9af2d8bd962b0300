//! Account storage: username/password records, validated and persisted as
//! an append-only CSV file.
//!
//! Every public method takes the store's lock for its whole duration,
//! including the nested disk write that fires once the batch of unsaved
//! rows crosses [`UNSAVED_THRESHOLD`] — the same "lock spans I/O" contract
//! the game store uses.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::persist::emit_disaster_dump;

/// Number of newly created accounts allowed to sit unflushed in memory
/// before a save is forced.
const UNSAVED_THRESHOLD: usize = 10;

struct Inner {
    accounts: HashMap<String, String>,
    unsaved: Vec<(String, String)>,
    accounts_path: PathBuf,
    disaster_path: PathBuf,
}

/// The set of known accounts, plus pending writes to `accounts.csv`.
pub struct AccountStore {
    inner: Mutex<Inner>,
}

impl AccountStore {
    /// A username is valid if it is non-empty and contains neither a comma
    /// (the CSV field separator) nor whitespace (the wire protocol's
    /// argument separator).
    pub fn valid_username(username: &str) -> bool {
        !username.is_empty() && !username.contains(',') && !username.contains(char::is_whitespace)
    }

    /// Passwords share the username's constraints.
    pub fn valid_password(password: &str) -> bool {
        !password.is_empty() && !password.contains(',') && !password.contains(char::is_whitespace)
    }

    /// Loads existing accounts from `accounts_path` if present; the file is
    /// created on first save if it doesn't exist yet.
    pub async fn load(accounts_path: PathBuf, disaster_path: PathBuf) -> std::io::Result<Self> {
        let mut accounts = HashMap::new();
        match tokio::fs::read_to_string(&accounts_path).await {
            Ok(text) => {
                for line in text.lines() {
                    if let Some((user, pass)) = line.split_once(',') {
                        accounts.insert(user.to_string(), pass.to_string());
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                accounts,
                unsaved: Vec::new(),
                accounts_path,
                disaster_path,
            }),
        })
    }

    pub async fn username_exists(&self, username: &str) -> bool {
        self.inner.lock().await.accounts.contains_key(username)
    }

    pub async fn valid_credentials(&self, username: &str, password: &str) -> bool {
        self.inner.lock().await.accounts.get(username).map(String::as_str) == Some(password)
    }

    /// Creates a new account. Fails (returns `false`, no state changed) if
    /// the username or password is malformed, or the username is already
    /// taken.
    pub async fn add_account(&self, username: &str, password: &str) -> bool {
        if !Self::valid_username(username) || !Self::valid_password(password) {
            return false;
        }
        let mut inner = self.inner.lock().await;
        if inner.accounts.contains_key(username) {
            return false;
        }
        inner.accounts.insert(username.to_string(), password.to_string());
        inner.unsaved.push((username.to_string(), password.to_string()));
        if inner.unsaved.len() >= UNSAVED_THRESHOLD {
            Self::flush(&mut inner).await;
        }
        true
    }

    /// Forces any unsaved accounts to disk, regardless of the threshold.
    /// Called once at shutdown.
    pub async fn save(&self) {
        let mut inner = self.inner.lock().await;
        Self::flush(&mut inner).await;
    }

    async fn flush(inner: &mut Inner) {
        if inner.unsaved.is_empty() {
            return;
        }
        let mut batch = String::new();
        for (user, pass) in &inner.unsaved {
            batch.push_str(user);
            batch.push(',');
            batch.push_str(pass);
            batch.push('\n');
        }

        let result: std::io::Result<()> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&inner.accounts_path)
                .await?;
            file.write_all(batch.as_bytes()).await?;
            file.flush().await
        }
        .await;

        match result {
            Ok(()) => inner.unsaved.clear(),
            Err(e) => {
                log::error!("failed to append {} unsaved accounts: {e}", inner.unsaved.len());
                emit_disaster_dump("account save", &inner.disaster_path, &batch).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rejects_commas_and_whitespace() {
        assert!(AccountStore::valid_username("alice"));
        assert!(!AccountStore::valid_username(""));
        assert!(!AccountStore::valid_username("al,ice"));
        assert!(!AccountStore::valid_username("al ice"));
    }

    #[tokio::test]
    async fn add_account_rejects_duplicate_usernames() {
        let dir = std::env::temp_dir().join(format!("chesscorrespond-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let store = AccountStore::load(dir.join("accounts.csv"), dir.join("accounts.dump"))
            .await
            .unwrap();

        assert!(store.add_account("alice", "hunter2").await);
        assert!(!store.add_account("alice", "different").await);
        assert!(store.valid_credentials("alice", "hunter2").await);
        assert!(!store.valid_credentials("alice", "different").await);
    }

    #[tokio::test]
    async fn add_account_rejects_malformed_username_or_password() {
        let dir = std::env::temp_dir().join(format!("chesscorrespond-test-{}", std::process::id() + 1));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let store = AccountStore::load(dir.join("accounts.csv"), dir.join("accounts.dump"))
            .await
            .unwrap();

        assert!(!store.add_account("", "hunter2").await);
        assert!(!store.add_account("bob", "has space").await);
        assert!(!store.username_exists("bob").await);
    }
}


