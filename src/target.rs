//! Connect-target resolution and connection options.
//!
//! A [`Target`] names the peer three ways, in decreasing precedence:
//! an explicit host and port, an absolute endpoint reference, or nothing at
//! all (resolve purely from [`ConnectOptions`] defaults). A secure scheme
//! (`wss`/`https`) forces an encrypted transport regardless of the options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::envelope::Envelope;
use crate::error::{BridgeError, Result};

/// Default keepalive interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Default maximum websocket frame size (512 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024;

/// Default endpoint path when the target does not carry one.
pub const DEFAULT_PATH: &str = "/eventbus";

/// Callback invoked for every `err` frame received from the peer.
pub type ErrorCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// How to reach the bridge server.
#[derive(Debug, Clone)]
pub enum Target {
    /// Explicit host and port; scheme and path come from the options.
    HostPort(String, u16),
    /// Absolute endpoint reference, e.g. `wss://bus.example.com:8765/bridge`.
    Endpoint(String),
    /// Resolve purely from the caller-supplied option defaults.
    Defaults,
}

impl From<&str> for Target {
    fn from(endpoint: &str) -> Self {
        Target::Endpoint(endpoint.to_string())
    }
}

/// Connection configuration with fluent setters.
///
/// ```
/// use std::time::Duration;
/// use eventbus_bridge::ConnectOptions;
///
/// let options = ConnectOptions::new()
///     .default_host("localhost")
///     .default_port(8765)
///     .ping_interval(Duration::from_secs(10));
/// ```
#[derive(Clone)]
pub struct ConnectOptions {
    pub(crate) default_host: Option<String>,
    pub(crate) default_port: Option<u16>,
    pub(crate) secure: bool,
    pub(crate) path: String,
    pub(crate) ping_interval: Duration,
    pub(crate) max_frame_size: usize,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl ConnectOptions {
    /// Create options with the protocol defaults.
    pub fn new() -> Self {
        Self {
            default_host: None,
            default_port: None,
            secure: false,
            path: DEFAULT_PATH.to_string(),
            ping_interval: DEFAULT_PING_INTERVAL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            on_error: None,
        }
    }

    /// Host used when the target does not name one.
    pub fn default_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = Some(host.into());
        self
    }

    /// Port used when the target does not name one.
    pub fn default_port(mut self, port: u16) -> Self {
        self.default_port = Some(port);
        self
    }

    /// Use an encrypted transport for targets without a scheme.
    ///
    /// A `wss`/`https` endpoint target forces encryption either way.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Bridge endpoint path used when the target does not carry one.
    /// Default: `/eventbus`.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Keepalive ping interval. Default: 5 seconds.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Maximum websocket frame size. Default: 512 KiB.
    pub fn max_frame_size(mut self, limit: usize) -> Self {
        self.max_frame_size = limit;
        self
    }

    /// Callback invoked for every `err` frame from the peer.
    ///
    /// Without one, error frames are logged at `warn` level and dropped.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("default_host", &self.default_host)
            .field("default_port", &self.default_port)
            .field("secure", &self.secure)
            .field("path", &self.path)
            .field("ping_interval", &self.ping_interval)
            .field("max_frame_size", &self.max_frame_size)
            .field("on_error", &self.on_error.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// A fully resolved endpoint, ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
}

impl Endpoint {
    /// The websocket URL for this endpoint.
    ///
    /// The bridge speaks raw websocket under `<path>/websocket`.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{}://{}:{}{}/websocket",
            scheme, self.host, self.port, self.path
        )
    }
}

impl Target {
    /// Resolve this target against the supplied options.
    ///
    /// Precedence: explicit host+port, then anything derivable from an
    /// absolute endpoint, then option defaults.
    pub(crate) fn resolve(&self, options: &ConnectOptions) -> Result<Endpoint> {
        match self {
            Target::HostPort(host, port) => Ok(Endpoint {
                host: host.clone(),
                port: *port,
                path: options.path.clone(),
                secure: options.secure,
            }),
            Target::Endpoint(raw) => {
                let url = Url::parse(raw)
                    .map_err(|err| BridgeError::InvalidTarget(format!("{raw}: {err}")))?;
                let secure = match url.scheme() {
                    "wss" | "https" => true,
                    "ws" | "http" => false,
                    other => {
                        return Err(BridgeError::InvalidTarget(format!(
                            "unsupported scheme: {other}"
                        )))
                    }
                };
                let host = url
                    .host_str()
                    .ok_or_else(|| BridgeError::InvalidTarget(format!("{raw}: missing host")))?
                    .to_string();
                let port = url.port().unwrap_or(if secure { 443 } else { 80 });
                let path = match url.path() {
                    "" | "/" => options.path.clone(),
                    p => p.trim_end_matches('/').to_string(),
                };
                Ok(Endpoint {
                    host,
                    port,
                    path,
                    secure,
                })
            }
            Target::Defaults => {
                let host = options.default_host.clone().ok_or_else(|| {
                    BridgeError::InvalidTarget("no host in target or options".into())
                })?;
                let port = options
                    .default_port
                    .unwrap_or(if options.secure { 443 } else { 80 });
                Ok(Endpoint {
                    host,
                    port,
                    path: options.path.clone(),
                    secure: options.secure,
                })
            }
        }
    }
}
