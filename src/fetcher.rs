//! Paced page retrieval with bounded retries and backoff.

use crate::controls::PipelineControls;
use crate::debug_log;
use reqwest::{Client, StatusCode};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use url::Url;

const USER_AGENT: &str = "emojigraph/0.1 (+https://github.com/emojigraph/emojigraph)";
const REDIRECT_LIMIT: usize = 5;

/// A unit of fetched content, discarded after extraction.
#[derive(Debug, Clone)]
pub struct Page {
    /// Canonical URL of the fetched document.
    pub url: Url,
    /// HTTP response status code.
    pub status: u16,
    /// Timestamp when the fetch completed.
    pub fetched_at: SystemTime,
    /// Raw response body bytes.
    pub body: Vec<u8>,
}

impl Page {
    /// Builds a new page payload.
    pub fn new(url: Url, status: u16, fetched_at: SystemTime, body: Vec<u8>) -> Self {
        Self {
            url,
            status,
            fetched_at,
            body,
        }
    }

    /// Decodes the body as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> Cow<'_, str> {
        match std::str::from_utf8(&self.body) {
            Ok(text) => Cow::Borrowed(text),
            Err(_) => Cow::Owned(String::from_utf8_lossy(&self.body).into_owned()),
        }
    }
}

/// Errors surfaced while fetching a page.
#[derive(Debug)]
pub enum FetchError {
    /// Transient failures outlasted the retry budget.
    Unavailable {
        /// Requested URL.
        url: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// Last underlying failure, for the log line.
        last_error: String,
    },
    /// The resource does not exist or the request itself is invalid; never retried.
    NotFound {
        /// Requested URL.
        url: String,
        /// HTTP status when the server answered.
        status: Option<u16>,
    },
}

impl FetchError {
    fn unavailable(url: &Url, attempts: u32, last_error: String) -> Self {
        Self::Unavailable {
            url: url.to_string(),
            attempts,
            last_error,
        }
    }

    fn not_found(url: &Url, status: Option<u16>) -> Self {
        Self::NotFound {
            url: url.to_string(),
            status,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable {
                url,
                attempts,
                last_error,
            } => write!(f, "{url} unavailable after {attempts} attempts: {last_error}"),
            Self::NotFound {
                url,
                status: Some(status),
            } => write!(f, "{url} not retrievable (HTTP {status})"),
            Self::NotFound { url, status: None } => write!(f, "{url} not retrievable"),
        }
    }
}

impl Error for FetchError {}

/// Paced HTTP fetcher shared by the listing and review-page loops.
///
/// The pacing clock is the only cross-request state: every fetch serializes
/// through it so consecutive requests are at least one politeness interval
/// apart regardless of the caller.
pub struct PageFetcher {
    client: Client,
    politeness_delay: Duration,
    retry_limit: u32,
    backoff_base: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl PageFetcher {
    /// Builds a fetcher from the pipeline controls.
    pub fn new(controls: &PipelineControls) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(REDIRECT_LIMIT))
            .timeout(controls.request_timeout())
            .build()?;

        Ok(Self {
            client,
            politeness_delay: controls.politeness_delay(),
            retry_limit: controls.retry_limit(),
            backoff_base: controls.backoff_base(),
            last_request: Mutex::new(None),
        })
    }

    /// Retrieves one page, retrying transient failures with exponential backoff.
    pub async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
        let mut attempts = 0u32;
        loop {
            self.pace().await;
            attempts += 1;

            let failure = match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.bytes().await {
                            Ok(body) => {
                                debug_log!("fetched {url} ({} bytes)", body.len());
                                return Ok(Page::new(
                                    url.clone(),
                                    status.as_u16(),
                                    SystemTime::now(),
                                    body.to_vec(),
                                ));
                            }
                            // The connection dropped mid-body; same class as a reset.
                            Err(err) => format!("body read failed: {err}"),
                        }
                    } else if is_transient_status(status) {
                        format!("HTTP {status}")
                    } else {
                        return Err(FetchError::not_found(url, Some(status.as_u16())));
                    }
                }
                Err(err) if err.is_builder() || err.is_redirect() => {
                    return Err(FetchError::not_found(url, None));
                }
                Err(err) => format!("transport error: {err}"),
            };

            if attempts > self.retry_limit {
                return Err(FetchError::unavailable(url, attempts, failure));
            }

            let delay = backoff_delay(self.backoff_base, attempts);
            debug_log!("retrying {url} in {delay:?} ({failure})");
            sleep(delay).await;
        }
    }

    async fn pace(&self) {
        // The guard is held across the sleep so concurrent callers cannot
        // interleave inside one politeness window.
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.politeness_delay {
                sleep(self.politeness_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
}

fn backoff_delay(base: Duration, completed_attempts: u32) -> Duration {
    let shift = completed_attempts.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << shift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn quick_controls(retry_limit: u32) -> PipelineControls {
        PipelineControls::new(
            Duration::from_millis(1),
            Duration::from_secs(5),
            retry_limit,
            Duration::from_millis(1),
            1,
            5,
            4,
            10,
            500,
        )
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2000));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn pacing_spaces_consecutive_requests() {
        let controls = crate::controls::PipelineControls::new(
            Duration::from_millis(50),
            Duration::from_secs(10),
            3,
            Duration::from_millis(500),
            1,
            5,
            4,
            10,
            500,
        );
        let fetcher = PageFetcher::new(&controls).expect("client builds");

        let start = Instant::now();
        fetcher.pace().await;
        fetcher.pace().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn persistent_server_errors_exhaust_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let hits = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                seen.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 500 Internal Server Error\r\n\
                          content-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            }
        });

        let fetcher = PageFetcher::new(&quick_controls(2)).expect("client builds");
        let url = Url::parse(&format!("http://{addr}/catalog/basecare/?PAGEN_1=7")).unwrap();

        match fetcher.fetch(&url).await {
            Err(FetchError::Unavailable { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected retry exhaustion, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
