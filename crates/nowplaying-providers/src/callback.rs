//! Loopback HTTP listener that captures the OAuth redirect.
//!
//! Routes:
//!
//! - `GET /login` redirects to the provider consent page.
//! - `GET /callback?code=..&state=..` validates `state`, hands the code over
//!   (at most once) and redirects to `/done`.
//! - `GET /done` is a static page an automated completer can poll for.
//! - anything else is a 404.
//!
//! The listener only speaks enough HTTP/1.1 for a browser round trip: it
//! reads the request head, answers, and closes the connection.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{AuthError, ProviderError, ProviderResult};
use crate::oauth::{AuthorizationCode, AuthorizationRequest};

/// Default callback port, matching the redirect URI registered with the
/// provider.
pub const DEFAULT_CALLBACK_PORT: u16 = 3000;

/// Upper bound on reading one request head.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Request heads longer than this are dropped.
const MAX_HEAD_LINES: usize = 100;

const DONE_PAGE: &str = "<html><body><h1>Authorization complete</h1>\
    <p>You can close this window.</p></body></html>";
const FAILED_PAGE: &str = "<html><body><h1>Authorization failed</h1>\
    <p>You can close this window and check the logs.</p></body></html>";

type Delivery = oneshot::Sender<Result<AuthorizationCode, AuthError>>;

struct Shared {
    request: AuthorizationRequest,
    delivery: Mutex<Option<Delivery>>,
}

impl Shared {
    fn take_delivery(&self) -> Option<Delivery> {
        self.delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A running callback listener for one authorization attempt.
///
/// Dropping the receiver stops the listener.
#[derive(Debug)]
pub struct CallbackReceiver {
    local_addr: SocketAddr,
    code_rx: Option<oneshot::Receiver<Result<AuthorizationCode, AuthError>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackReceiver {
    /// Binds `addr` and starts serving `request`.
    pub async fn bind(addr: SocketAddr, request: AuthorizationRequest) -> ProviderResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ProviderError::configuration(format!("cannot listen for the OAuth callback on {}", addr))
                .with_source(e)
        })?;
        let local_addr = listener.local_addr().map_err(|e| {
            ProviderError::internal("callback listener has no local address").with_source(e)
        })?;

        let (code_tx, code_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            request,
            delivery: Mutex::new(Some(code_tx)),
        });

        let task = tokio::spawn(accept_loop(listener, shared, shutdown_rx));
        info!(addr = %local_addr, "callback listener started");

        Ok(Self {
            local_addr,
            code_rx: Some(code_rx),
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The URL that starts the consent flow on this listener.
    pub fn login_url(&self) -> String {
        format!("http://{}/login", self.local_addr)
    }

    /// Waits for the provider redirect.
    ///
    /// Resolves with the authorization code, or with
    /// [`AuthError::Denied`] when the provider reported an error, or with
    /// [`AuthError::CallbackTimeout`]. Only the first call can succeed.
    pub async fn wait_for_code(
        &mut self,
        timeout: Duration,
    ) -> Result<AuthorizationCode, AuthError> {
        let rx = self.code_rx.take().ok_or_else(|| {
            AuthError::from(ProviderError::internal("authorization code already taken"))
        })?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProviderError::internal("callback listener stopped").into()),
            Err(_) => Err(AuthError::CallbackTimeout),
        }
    }

    /// Stops accepting connections and waits for the accept loop to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!(addr = %self.local_addr, "callback listener stopped");
    }
}

impl Drop for CallbackReceiver {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "callback connection");
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &shared).await {
                            debug!(error = %e, "callback connection failed");
                        }
                    });
                }
                Err(e) => error!(error = %e, "failed to accept callback connection"),
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, shared: &Shared) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let head = tokio::time::timeout(REQUEST_READ_TIMEOUT, read_head(&mut reader))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "request head timeout"))?;
    let Some((method, target)) = head? else {
        return Ok(());
    };

    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    let (response, delivery) = if method != "GET" {
        (Response::not_found(), None)
    } else {
        route(path, query, shared)
    };

    let mut stream = reader.into_inner();
    stream.write_all(response.to_bytes().as_slice()).await?;
    stream.flush().await?;
    let _ = stream.shutdown().await;

    // Deliver only once the response is out; the listener may be torn down
    // as soon as the code arrives.
    if let Some((tx, result)) = delivery
        && tx.send(result).is_err()
    {
        warn!("authorization result arrived after nobody was waiting");
    }
    Ok(())
}

/// Reads the request line and drains the headers.
async fn read_head(
    reader: &mut BufReader<TcpStream>,
) -> std::io::Result<Option<(String, String)>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };
    let head = (method.to_string(), target.to_string());

    for _ in 0..MAX_HEAD_LINES {
        line.clear();
        if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            return Ok(Some(head));
        }
    }
    Ok(None)
}

type PendingDelivery = Option<(Delivery, Result<AuthorizationCode, AuthError>)>;

fn route(path: &str, query: &str, shared: &Shared) -> (Response, PendingDelivery) {
    match path {
        "/login" => {
            debug!("redirecting to the provider consent page");
            (Response::redirect(shared.request.url()), None)
        }
        "/callback" => handle_callback(query, shared),
        "/done" => (Response::html(200, "OK", DONE_PAGE), None),
        _ => (Response::not_found(), None),
    }
}

fn handle_callback(query: &str, shared: &Shared) -> (Response, PendingDelivery) {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if state.as_deref() != Some(shared.request.state()) {
        warn!("callback state does not match, ignoring request");
        return (Response::html(400, "Bad Request", FAILED_PAGE), None);
    }

    let Some(tx) = shared.take_delivery() else {
        debug!("callback already handled");
        return (Response::html(410, "Gone", DONE_PAGE), None);
    };

    let result = match (error, code) {
        (Some(error), _) => {
            warn!(%error, "provider refused authorization");
            Err(AuthError::Denied(error))
        }
        (None, Some(code)) if !code.is_empty() => {
            info!("authorization code received");
            Ok(AuthorizationCode::new(code))
        }
        (None, _) => {
            warn!("callback carried no authorization code");
            Err(AuthError::Denied("callback carried no authorization code".to_string()))
        }
    };

    let response = if result.is_ok() {
        Response::redirect("/done")
    } else {
        Response::html(400, "Bad Request", FAILED_PAGE)
    };
    (response, Some((tx, result)))
}

struct Response {
    status: u16,
    reason: &'static str,
    location: Option<String>,
    body: &'static str,
}

impl Response {
    fn html(status: u16, reason: &'static str, body: &'static str) -> Self {
        Self {
            status,
            reason,
            location: None,
            body,
        }
    }

    fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: 302,
            reason: "Found",
            location: Some(location.into()),
            body: "",
        }
    }

    fn not_found() -> Self {
        Self::html(404, "Not Found", "<html><body><h1>Not found</h1></body></html>")
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        if let Some(ref location) = self.location {
            head.push_str(&format!("Location: {}\r\n", location));
        }
        head.push_str(&format!(
            "Content-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(self.body.as_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{OAuthCredentials, OAuthEndpoints};
    use tokio::io::AsyncReadExt;

    fn request() -> AuthorizationRequest {
        AuthorizationRequest::with_state(
            &OAuthCredentials::new("client", "secret"),
            &OAuthEndpoints::spotify("http://127.0.0.1:3000/callback"),
            "expected-state",
        )
    }

    async fn receiver() -> CallbackReceiver {
        CallbackReceiver::bind("127.0.0.1:0".parse().unwrap(), request())
            .await
            .unwrap()
    }

    /// Sends a bare GET and returns the raw response.
    async fn get(addr: SocketAddr, target: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {} HTTP/1.1\r\nHost: {}\r\n\r\n", target, addr).as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn login_redirects_to_consent_page() {
        let receiver = receiver().await;
        let response = get(receiver.local_addr(), "/login").await;

        assert!(response.starts_with("HTTP/1.1 302 Found\r\n"), "{}", response);
        assert!(response.contains(&format!("Location: {}\r\n", request().url())));
        assert!(response.contains("state=expected-state"));
    }

    #[tokio::test]
    async fn callback_delivers_code_once() {
        let mut receiver = receiver().await;
        let addr = receiver.local_addr();

        let response = get(addr, "/callback?code=abc123&state=expected-state").await;
        assert!(response.starts_with("HTTP/1.1 302 Found\r\n"), "{}", response);
        assert!(response.contains("Location: /done\r\n"));

        let code = receiver
            .wait_for_code(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code.as_str(), "abc123");

        let again = get(addr, "/callback?code=other&state=expected-state").await;
        assert!(again.starts_with("HTTP/1.1 410 Gone\r\n"), "{}", again);
    }

    #[tokio::test]
    async fn callback_with_wrong_state_is_ignored() {
        let mut receiver = receiver().await;
        let addr = receiver.local_addr();

        let response = get(addr, "/callback?code=evil&state=forged").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", response);

        // The legitimate redirect still gets through.
        get(addr, "/callback?code=abc123&state=expected-state").await;
        let code = receiver
            .wait_for_code(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code.as_str(), "abc123");
    }

    #[tokio::test]
    async fn callback_error_parameter_is_denial() {
        let mut receiver = receiver().await;
        let response = get(
            receiver.local_addr(),
            "/callback?error=access_denied&state=expected-state",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 400"), "{}", response);

        let err = receiver
            .wait_for_code(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Denied(ref reason) if reason == "access_denied"));
    }

    #[tokio::test]
    async fn callback_without_code_is_denial() {
        let mut receiver = receiver().await;
        get(receiver.local_addr(), "/callback?state=expected-state").await;

        let err = receiver
            .wait_for_code(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Denied(_)));
    }

    #[tokio::test]
    async fn callback_decodes_percent_encoding() {
        let mut receiver = receiver().await;
        get(
            receiver.local_addr(),
            "/callback?code=a%2Fb%3Dc&state=expected-state",
        )
        .await;

        let code = receiver
            .wait_for_code(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code.as_str(), "a/b=c");
    }

    #[tokio::test]
    async fn done_and_unknown_routes() {
        let receiver = receiver().await;
        let addr = receiver.local_addr();

        assert!(get(addr, "/done").await.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(get(addr, "/favicon.ico").await.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn wait_for_code_times_out() {
        let mut receiver = receiver().await;
        let err = receiver
            .wait_for_code(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CallbackTimeout));
    }

    #[tokio::test]
    async fn shutdown_releases_port() {
        let receiver = receiver().await;
        let addr = receiver.local_addr();
        receiver.shutdown().await;

        assert!(TcpStream::connect(addr).await.is_err());
        assert!(TcpListener::bind(addr).await.is_ok());
    }
}
