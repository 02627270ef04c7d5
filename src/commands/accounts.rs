//! `import-session` command: register an account credential
//!
//! Writes the credential into the session directory with its integrity
//! sidecar and makes sure an Active account record exists for it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::client::FileSessionStore;
use crate::config::Config;
use crate::models::Account;
use crate::storage::{AccountRepository, Stores};

pub async fn import_session(
    account_id: String,
    token_file: PathBuf,
    config: Config,
) -> Result<()> {
    let token = std::fs::read_to_string(&token_file)
        .with_context(|| format!("Failed to read token file: {}", token_file.display()))?;
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("Token file is empty: {}", token_file.display());
    }

    let sessions = FileSessionStore::new(&config.gateway.session_dir);
    sessions.import(&account_id, token)?;

    let stores = Stores::sqlite(&config.database.sqlite_path)?;
    if stores.accounts.get_account(&account_id)?.is_none() {
        stores
            .accounts
            .upsert_account(&Account::new(account_id.clone()))?;
    }

    info!(account_id = %account_id, "Session imported");
    println!("Session imported for {account_id}");
    Ok(())
}
