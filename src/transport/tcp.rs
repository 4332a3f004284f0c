//! TCP transport for a CLI that is already running in server mode

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::TcpStream;

use super::{Transport, TransportStreams};
use crate::error::{CopilotError, Result};

/// Split a CLI url into host and port
///
/// Accepts `"8080"` (localhost), `"host:8080"` and `"http(s)://host:8080"`.
///
/// # Errors
/// Returns `InvalidConfig` if no valid port can be found
///
/// # Examples
/// ```
/// use kodegen_copilot_agent::transport::parse_cli_url;
///
/// assert_eq!(parse_cli_url("8080").unwrap(), ("localhost".to_string(), 8080));
/// assert_eq!(
///     parse_cli_url("http://10.0.0.5:3000/").unwrap(),
///     ("10.0.0.5".to_string(), 3000)
/// );
/// ```
pub fn parse_cli_url(url: &str) -> Result<(String, u16)> {
    let url = url.trim();
    if let Ok(port) = url.parse::<u16>() {
        return Ok(("localhost".to_string(), port));
    }

    let lower = url.to_ascii_lowercase();
    let rest = ["http://", "https://"]
        .iter()
        .find_map(|scheme| lower.starts_with(scheme).then(|| &url[scheme.len()..]))
        .unwrap_or(url);
    let authority = rest.split('/').next().unwrap_or_default();

    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| CopilotError::invalid_config(format!("cli_url '{url}' has no port")))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| CopilotError::invalid_config(format!("cli_url '{url}' has an invalid port")))?;
    let host = if host.is_empty() { "localhost" } else { host };
    Ok((host.trim_matches(['[', ']']).to_string(), port))
}

/// Dial `host:port` within `timeout`
pub(crate) async fn dial(host: &str, port: u16, timeout: Duration) -> Result<TransportStreams> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| {
            CopilotError::connection_unavailable(format!(
                "timed out after {timeout:?} connecting to {host}:{port}"
            ))
        })?
        .map_err(|e| {
            CopilotError::connection_unavailable(format!("failed to connect to {host}:{port}: {e}"))
        })?;
    stream.set_nodelay(true)?;

    let (reader, writer) = stream.into_split();
    Ok(TransportStreams {
        reader: Box::new(reader),
        writer: Box::new(writer),
    })
}

/// Transport that dials an existing CLI server
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport for `cli_url`
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the url cannot be parsed
    pub fn new(cli_url: &str, connect_timeout: Duration) -> Result<Self> {
        let (host, port) = parse_cli_url(cli_url)?;
        Ok(Self {
            host,
            port,
            connect_timeout,
        })
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> BoxFuture<'_, Result<TransportStreams>> {
        Box::pin(async move {
            log::debug!("Connecting to CLI server at {}:{}", self.host, self.port);
            dial(&self.host, self.port, self.connect_timeout).await
        })
    }

    fn shutdown(&mut self, _grace: Duration) -> BoxFuture<'_, Result<()>> {
        // The remote server is not ours to stop; closing the socket is enough.
        Box::pin(async { Ok(()) })
    }

    fn kill(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}
