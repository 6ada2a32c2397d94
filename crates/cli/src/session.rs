//! Persists the signed-in session in the OS keyring between invocations.

use anyhow::{Context, Result};
use keyring::Entry;
use storytrack::providers::backend::Session;
use tracing::{debug, warn};

const SERVICE: &str = "storytrack-cli";
const ACCOUNT: &str = "session";

fn entry() -> Result<Entry> {
    Entry::new(SERVICE, ACCOUNT).context("Could not open the keyring entry")
}

pub fn save(session: &Session) -> Result<()> {
    let json = serde_json::to_string(session)?;
    entry()?
        .set_password(&json)
        .context("Could not store the session in the keyring")?;
    debug!(user_id = %session.user.id, "Session stored in keyring");
    Ok(())
}

/// The stored session, if any. A corrupt entry is discarded.
pub fn load() -> Option<Session> {
    let entry = entry().ok()?;
    let json = match entry.get_password() {
        Ok(json) => json,
        Err(keyring::Error::NoEntry) => return None,
        Err(e) => {
            warn!("Could not read the keyring: {}", e);
            return None;
        }
    };
    match serde_json::from_str(&json) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!("Discarding unreadable session: {}", e);
            let _ = entry.delete_credential();
            None
        }
    }
}

pub fn clear() -> Result<()> {
    match entry()?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e).context("Could not remove the session from the keyring"),
    }
}
