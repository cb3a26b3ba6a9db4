//! Authorization command.

use tracing::info;

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Runs the authorization-code flow once and stores the tokens.
///
/// Stored tokens are kept unless `force` is set.
pub async fn auth(config: &ClientConfig, force: bool, no_browser: bool) -> ClientResult<()> {
    let tokens = super::token_manager(config)?;
    let token_dir = config.token_dir();

    if !force && tokens.load_persisted().await {
        println!("Already authorized (tokens in {}).", token_dir.display());
        println!("Use --force to authorize again.");
        return Ok(());
    }

    let flow = super::authorization_flow(config, no_browser)?;
    println!("Starting authorization...");
    println!();
    if no_browser {
        println!("Open the URL printed below in a browser and approve access.");
    } else {
        println!("A browser window will open for you to approve access.");
        println!("If it doesn't, the URL is printed below.");
    }
    println!(
        "Waiting up to {}s for the redirect to {}",
        config.sync.authorization_timeout_secs,
        config.oauth.redirect_uri()
    );
    println!();

    flow.run(&tokens).await?;
    info!(dir = %token_dir.display(), "authorization complete");

    println!("Authorized. Tokens stored in {}.", token_dir.display());
    Ok(())
}
