//! Health check probe logic.
//!
//! Performs a single bounded-timeout HTTP GET against the release's
//! health endpoint.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health endpoint returned 2xx.
    Healthy,
    /// The health endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (bad URL, connection error, timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        *self == ProbeResult::Healthy
    }
}

/// One health probe against a URL.
pub trait Probe: Send + Sync {
    fn probe(&self, url: &str) -> impl Future<Output = ProbeResult> + Send;
}

/// Probes over plain HTTP/1.1 with a per-request timeout.
#[derive(Debug, Clone, Copy)]
pub struct HttpProbe {
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeResult {
        http_probe(url, self.timeout).await
    }
}

/// Perform an HTTP health probe against `url`.
///
/// Returns `Healthy` if the response is 2xx, `Unhealthy` for non-2xx,
/// or `Failed` if the URL is unusable or the connection fails or times out.
pub async fn http_probe(url: &str, timeout: Duration) -> ProbeResult {
    let uri: http::Uri = match url.parse() {
        Ok(uri) => uri,
        Err(e) => {
            debug!(error = %e, %url, "health probe url invalid");
            return ProbeResult::Failed;
        }
    };
    if uri.scheme_str() != Some("http") {
        debug!(%url, "health probe supports http:// only");
        return ProbeResult::Failed;
    }
    let Some(authority) = uri.authority().cloned() else {
        debug!(%url, "health probe url has no host");
        return ProbeResult::Failed;
    };
    let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(&address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %url, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %url, "health probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", authority.as_str())
            .header("user-agent", "keel-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %url, "health probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                if resp.status().is_success() {
                    ProbeResult::Healthy
                } else {
                    debug!(status = %resp.status(), %url, "health probe non-2xx");
                    ProbeResult::Unhealthy
                }
            }
            Err(e) => {
                debug!(error = %e, %url, "health probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%url, "health probe timed out");
            ProbeResult::Failed
        }
    }
}
