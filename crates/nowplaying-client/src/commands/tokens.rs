//! Logout and status commands.

use nowplaying_providers::{TokenSet, TokenStore};
use nowplaying_sync::{PidFile, default_pid_path};

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Removes stored tokens. The next `run` or `auth` asks for consent again.
pub fn logout(config: &ClientConfig) -> ClientResult<()> {
    let store = super::token_store(config);
    store.clear()?;
    println!("Removed stored tokens from {}.", store.dir().display());
    Ok(())
}

pub fn status(config: &ClientConfig) -> ClientResult<()> {
    let tokens = super::token_store(config).load()?;
    let owner = PidFile::running_owner(&default_pid_path());
    println!("{}", describe(tokens.as_ref(), owner));
    Ok(())
}

fn describe(tokens: Option<&TokenSet>, sync_pid: Option<u32>) -> String {
    let tokens = match tokens {
        Some(t) if t.has_refresh_token() => format!(
            "stored {} (refreshable)",
            t.obtained_at.format("%Y-%m-%d %H:%M UTC")
        ),
        Some(t) => format!(
            "stored {} (no refresh token)",
            t.obtained_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => "none, run `nowplaying auth`".to_string(),
    };
    let sync = match sync_pid {
        Some(pid) => format!("running (pid {})", pid),
        None => "not running".to_string(),
    };
    format!("tokens: {}\nsync:   {}", tokens, sync)
}
