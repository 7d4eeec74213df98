//! One-shot localhost listener that receives the OAuth redirect.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::error::Result;
use crate::error::SheetsError;

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>Authorized</title></head>\
<body><h1>Sheet access granted</h1><p>You can close this tab and return to the terminal.</p></body></html>";

pub struct CallbackServer {
    listener: TcpListener,
    port: u16,
}

impl CallbackServer {
    /// Bind an ephemeral port on the loopback interface.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| SheetsError::AuthFailed(format!("cannot open callback port: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| SheetsError::AuthFailed(e.to_string()))?
            .port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.port)
    }

    /// Wait for the browser redirect and return the authorization code.
    ///
    /// Requests without a `code`, `error` or `state` (favicon probes and the
    /// like) are answered with 404 and ignored.
    pub async fn wait_for_code(&self, expected_state: &str, timeout: Duration) -> Result<String> {
        tokio::time::timeout(timeout, self.accept_loop(expected_state))
            .await
            .map_err(|_| {
                SheetsError::AuthFailed(format!(
                    "no authorization received within {}s",
                    timeout.as_secs()
                ))
            })?
    }

    async fn accept_loop(&self, expected_state: &str) -> Result<String> {
        // Browsers open speculative connections that never send a request,
        // so each connection is read on its own task and the first complete
        // request line wins.
        let (tx, mut rx) = mpsc::channel::<(TcpStream, String)>(8);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (mut stream, peer) = accepted.map_err(|e| {
                        SheetsError::AuthFailed(format!("callback accept failed: {e}"))
                    })?;
                    debug!(%peer, "oauth callback connection");
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match read_request_line(&mut stream).await {
                            Ok(line) => {
                                let _ = tx.send((stream, line)).await;
                            }
                            Err(err) => debug!(%peer, %err, "dropping oauth callback connection"),
                        }
                    });
                }
                Some((mut stream, request_line)) = rx.recv() => {
                    if let Some(code) = answer(&mut stream, &request_line, expected_state).await? {
                        return Ok(code);
                    }
                }
            }
        }
    }
}

/// `Ok(None)` for requests that are not the redirect (favicon and the like).
async fn answer(
    stream: &mut TcpStream,
    request_line: &str,
    expected_state: &str,
) -> Result<Option<String>> {
    let params = parse_callback_params(request_line);

    if let Some(error) = params.error {
        respond(stream, "400 Bad Request", &failure_page("Access was declined.")).await;
        return Err(SheetsError::AuthFailed(format!(
            "authorization was declined: {error}"
        )));
    }
    let Some(state) = params.state else {
        respond(stream, "404 Not Found", "").await;
        return Ok(None);
    };
    if state != expected_state {
        respond(stream, "400 Bad Request", &failure_page("State mismatch.")).await;
        return Err(SheetsError::AuthFailed(
            "callback state did not match the request".to_string(),
        ));
    }
    let Some(code) = params.code else {
        respond(stream, "400 Bad Request", &failure_page("Missing authorization code.")).await;
        return Err(SheetsError::AuthFailed(
            "callback carried no authorization code".to_string(),
        ));
    };
    respond(stream, "200 OK", SUCCESS_PAGE).await;
    Ok(Some(code))
}

fn failure_page(reason: &'static str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>Authorization failed</title></head>\
<body><h1>Authorization failed</h1><p>{reason}</p></body></html>"
    )
}

async fn read_request_line(stream: &mut TcpStream) -> Result<String> {
    let mut buf = vec![0u8; 8192];
    let mut len = 0;
    loop {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf[len..]))
            .await
            .map_err(|_| SheetsError::AuthFailed("callback request timed out".to_string()))?
            .map_err(|e| SheetsError::AuthFailed(format!("callback read failed: {e}")))?;
        len += n;
        if n == 0 || buf[..len].windows(2).any(|w| w == b"\r\n") || len == buf.len() {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buf[..len]);
    Ok(text.lines().next().unwrap_or_default().to_string())
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(err) = stream.write_all(response.as_bytes()).await {
        debug!(%err, "failed to answer oauth callback");
    }
    let _ = stream.shutdown().await;
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Extract OAuth parameters from `GET /callback?code=..&state=.. HTTP/1.1`.
fn parse_callback_params(request_line: &str) -> CallbackParams {
    let Some(target) = request_line.split_whitespace().nth(1) else {
        return CallbackParams::default();
    };
    let Ok(url) = Url::parse(&format!("http://localhost{target}")) else {
        return CallbackParams::default();
    };
    let mut params = CallbackParams::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => params.code = Some(value.into_owned()),
            "state" => params.state = Some(value.into_owned()),
            "error" => params.error = Some(value.into_owned()),
            _ => {}
        }
    }
    params
}
