mod target;

pub use target::{ProbeTarget, TargetError};

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.100 Safari/537.36";

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid user agent '{value}'")]
    InvalidUserAgent { value: String },

    #[error("invalid header '{value}', expected 'Key: Value'")]
    InvalidHeader { value: String },

    #[error("failed to setup proxy: {proxy}: {source}")]
    ProxySetup {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        #[source]
        source: reqwest::Error,
    },
}

/// Why a probe produced no usable body.
#[derive(Debug)]
pub enum SkipReason {
    Redirect { status: u16 },
    NonHtmlContentType { content_type: String },
    Transport(ProbeError),
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::Redirect { .. } => "redirect",
            SkipReason::NonHtmlContentType { .. } => "non-html-content-type",
            SkipReason::Transport(_) => "transport-error",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Redirect { status } => write!(f, "redirect ({status})"),
            SkipReason::NonHtmlContentType { content_type } => {
                write!(f, "non-html content type ({content_type})")
            }
            SkipReason::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProbePage {
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug)]
pub enum ProbeResult {
    Page(ProbePage),
    Skipped(SkipReason),
}

impl ProbeResult {
    pub fn into_page(self) -> Result<ProbePage, SkipReason> {
        match self {
            ProbeResult::Page(page) => Ok(page),
            ProbeResult::Skipped(reason) => Err(reason),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub proxy: Option<String>,
    pub header: Option<String>,
    // requests per second across every stage, 0 disables limiting
    pub rate: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            proxy: None,
            header: None,
            rate: 0,
        }
    }
}

/// A cheaply cloneable handle around one shared connection pool.
///
/// Every stage holds a clone; the underlying `reqwest::Client` and the rate
/// limiter are reference counted, so all probes reuse the same keep-alive
/// connections.
#[derive(Clone)]
pub struct ProbeClient {
    client: reqwest::Client,
    limiter: Option<Arc<DirectLimiter>>,
}

impl fmt::Debug for ProbeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeClient")
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

pub fn parse_header(raw: &str) -> Result<(reqwest::header::HeaderName, reqwest::header::HeaderValue), ProbeError> {
    let invalid = || ProbeError::InvalidHeader {
        value: raw.to_string(),
    };
    let (key, value) = raw.split_once(':').ok_or_else(invalid)?;
    let key = reqwest::header::HeaderName::from_str(key.trim()).map_err(|_| invalid())?;
    let value = reqwest::header::HeaderValue::from_str(value.trim()).map_err(|_| invalid())?;
    Ok((key, value))
}

impl ProbeClient {
    pub fn new(config: &ProbeConfig) -> Result<Self, ProbeError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let user_agent = reqwest::header::HeaderValue::from_str(config.user_agent.trim())
            .map_err(|_| ProbeError::InvalidUserAgent {
                value: config.user_agent.clone(),
            })?;
        headers.insert(reqwest::header::USER_AGENT, user_agent);
        if let Some(raw) = config.header.as_deref().filter(|h| !h.trim().is_empty()) {
            let (key, value) = parse_header(raw)?;
            headers.append(key, value);
        }

        let timeout = Duration::from_secs(config.timeout_seconds.max(1));
        //no certs, no redirects
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .danger_accept_invalid_hostnames(true)
            .danger_accept_invalid_certs(true);

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| ProbeError::ProxySetup {
                proxy: proxy.to_string(),
                source: e,
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ProbeError::ClientBuild { source: e })?;

        let limiter = NonZeroU32::new(config.rate)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));

        Ok(Self { client, limiter })
    }

    /// Issues exactly one GET and classifies the outcome.
    ///
    /// The body is drained before classification in every case, so the
    /// connection goes back to the pool even for skipped responses. Only HTML
    /// (or untyped) bodies are decoded to text.
    pub async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        if let Some(lim) = self.limiter.as_ref() {
            lim.until_ready().await;
        }

        let resp = match self.client.get(target.url().clone()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(url = %target, error = %e, "probe failed");
                return ProbeResult::Skipped(SkipReason::Transport(ProbeError::Transport {
                    url: target.to_string(),
                    source: e,
                }));
            }
        };

        let status = resp.status();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).to_string());

        // always read the full body so the connection can be reused
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => {
                debug!(url = %target, error = %e, "reading body failed");
                return ProbeResult::Skipped(SkipReason::Transport(ProbeError::Body {
                    url: target.to_string(),
                    source: e,
                }));
            }
        };

        if status.is_redirection() {
            return ProbeResult::Skipped(SkipReason::Redirect {
                status: status.as_u16(),
            });
        }

        if let Some(ct) = content_type.as_deref() {
            if !ct.is_empty() && !ct.contains("html") {
                return ProbeResult::Skipped(SkipReason::NonHtmlContentType {
                    content_type: ct.to_string(),
                });
            }
        }

        ProbeResult::Page(ProbePage {
            final_url,
            status: status.as_u16(),
            content_type,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}
