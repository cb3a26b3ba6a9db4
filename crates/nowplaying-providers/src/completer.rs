//! Driving the user through the provider consent screen.

use tracing::{info, warn};

use crate::BoxFuture;
use crate::error::ProviderResult;

/// Gets the user from the local `/login` URL to the provider redirect.
///
/// The completer's job ends once the browser (or whatever stands in for it)
/// has been pointed at `login_url`; the authorization code arrives through
/// the callback listener, not through the completer.
pub trait AuthorizationCompleter: Send + Sync {
    fn complete<'a>(&'a self, login_url: &'a str) -> BoxFuture<'a, ProviderResult<()>>;
}

/// Opens the system browser, printing the URL when none can be launched.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserCompleter;

impl AuthorizationCompleter for BrowserCompleter {
    fn complete<'a>(&'a self, login_url: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            info!(url = %login_url, "opening browser for authorization");
            if let Err(e) = open::that(login_url) {
                warn!(error = %e, "failed to open browser");
                eprintln!("\nPlease open this URL in your browser:\n\n{}\n", login_url);
            }
            Ok(())
        })
    }
}

/// Only prints the URL. For headless machines.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintCompleter;

impl AuthorizationCompleter for PrintCompleter {
    fn complete<'a>(&'a self, login_url: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            eprintln!("\nOpen this URL in a browser to authorize:\n\n{}\n", login_url);
            Ok(())
        })
    }
}
