use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::TransportError;

const ACCEPT_JSON: &str = "application/json";
const ACCEPT_HTML: &str = "text/html";

/// One addressable resource of the upstream API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Proceedings { term: u32 },
    Transcripts { term: u32, session: u32, date: String },
    Statement { term: u32, session: u32, date: String, num: u32 },
    Members { term: u32 },
    Clubs { term: u32 },
}

impl Resource {
    /// Path relative to the API base, without a leading slash.
    pub fn path(&self) -> String {
        match self {
            Resource::Proceedings { term } => format!("term{}/proceedings", term),
            Resource::Transcripts { term, session, date } => {
                format!("term{}/proceedings/{}/{}/transcripts", term, session, date)
            }
            Resource::Statement { term, session, date, num } => {
                format!("term{}/proceedings/{}/{}/transcripts/{}", term, session, date, num)
            }
            Resource::Members { term } => format!("term{}/MP", term),
            Resource::Clubs { term } => format!("term{}/clubs", term),
        }
    }

    pub fn accept(&self) -> &'static str {
        match self {
            Resource::Statement { .. } => ACCEPT_HTML,
            _ => ACCEPT_JSON,
        }
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Fetches the raw body of a resource. The HTTP implementation lives below;
/// tests swap in an in-memory one.
pub trait Transport: Send + Sync + 'static {
    fn base_url(&self) -> &str;

    fn fetch(
        &self,
        resource: &Resource,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;

    fn url(&self, resource: &Resource) -> String {
        join_url(self.base_url(), &resource.path())
    }
}

// ── Listing shapes ──

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProceedingEntry {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub number: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub agenda: Option<String>,
    #[serde(default)]
    pub dates: Vec<String>,
}

impl ProceedingEntry {
    /// Session number, if present and non-zero.
    pub fn session(&self) -> Option<u32> {
        self.number.filter(|n| *n > 0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptListing {
    #[serde(default, deserialize_with = "lenient_items")]
    pub statements: Vec<StatementDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatementDescriptor {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub num: Option<u32>,
    #[serde(default, rename = "name")]
    pub speaker_name: Option<String>,
}

/// A number that is missing, negative, too large or of another type is `None`.
fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(value
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok()))
}

fn lenient_items<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let items = Option::<Vec<Value>>::deserialize(d)?.unwrap_or_default();
    Ok(decode_items(items))
}

/// Decode listing entries one by one. An entry that does not fit becomes
/// `T::default()`, which callers see as malformed, instead of failing the listing.
pub fn decode_items<T: DeserializeOwned + Default>(items: Vec<Value>) -> Vec<T> {
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item).unwrap_or_else(|e| {
                debug!("Malformed listing entry: {}", e);
                T::default()
            })
        })
        .collect()
}

pub async fn fetch_json<A, T>(api: &A, resource: &Resource) -> Result<T, TransportError>
where
    A: Transport,
    T: DeserializeOwned,
{
    let body = api.fetch(resource).await?;
    serde_json::from_str(&body).map_err(|source| TransportError::Decode {
        url: api.url(resource),
        source,
    })
}

pub async fn proceedings<A: Transport>(api: &A, term: u32) -> Result<Vec<ProceedingEntry>, TransportError> {
    let items: Vec<Value> = fetch_json(api, &Resource::Proceedings { term }).await?;
    Ok(decode_items(items))
}

pub async fn transcripts<A: Transport>(
    api: &A,
    term: u32,
    session: u32,
    date: &str,
) -> Result<TranscriptListing, TransportError> {
    let resource = Resource::Transcripts { term, session, date: date.to_string() };
    fetch_json(api, &resource).await
}

/// Returns the statement HTML together with the URL it came from.
pub async fn statement_html<A: Transport>(
    api: &A,
    term: u32,
    session: u32,
    date: &str,
    num: u32,
) -> Result<(String, String), TransportError> {
    let resource = Resource::Statement { term, session, date: date.to_string(), num };
    let html = api.fetch(&resource).await?;
    Ok((html, api.url(&resource)))
}

// ── HTTP ──

const MAX_BACKOFF: Duration = Duration::from_secs(300);

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    backoff: Duration,
    cancel: CancellationToken,
}

impl HttpTransport {
    /// `cancel` stops further retry attempts; a request already sent is never aborted.
    pub fn new(settings: &Settings, cancel: CancellationToken) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: settings.base_url.clone(),
            max_retries: settings.max_retries,
            backoff: settings.retry_backoff(),
            cancel,
        })
    }

    async fn fetch_once(&self, url: &str, accept: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status { url: url.to_string(), status: status.as_u16() });
        }
        response.text().await.map_err(|e| classify(url, e))
    }
}

impl Transport for HttpTransport {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch(&self, resource: &Resource) -> Result<String, TransportError> {
        let url = self.url(resource);
        let accept = resource.accept();
        debug!("GET {}", url);

        let mut attempt = 0;
        loop {
            let err = match self.fetch_once(&url, accept).await {
                Err(e) if attempt < self.max_retries && e.is_retryable() => e,
                result => return result,
            };
            if self.cancel.is_cancelled() {
                return Err(err);
            }

            let backoff = backoff_delay(self.backoff, attempt);
            warn!(
                "{} (attempt {}/{}), backing off {:.1}s",
                err,
                attempt + 1,
                self.max_retries,
                backoff.as_secs_f64()
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(backoff) => {}
            }
            attempt += 1;
        }
    }
}

/// `base * 2^attempt`, saturating and capped at `MAX_BACKOFF`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

fn classify(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout { url: url.to_string() }
    } else {
        TransportError::Request { url: url.to_string(), source: e }
    }
}
