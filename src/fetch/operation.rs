use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::models::{ComicMetadata, MIN_COMIC_NUMBER};

use super::transport::{HttpTransport, Transport, TransportError};

/// Default remote archive root; the per-comic metadata document lives at
/// `{base}/{number}/info.0.json`.
pub const DEFAULT_API_URL: &str = "https://xkcd.com";

#[derive(Debug, Error)]
pub enum FetchError {
    /// Caller bug: comic numbers start at 1. Never retried.
    #[error("invalid comic number {0}")]
    InvalidNumber(i64),

    /// Network-level failure; retryable with backoff by the driver.
    #[error("transport error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    /// The remote responded but the payload made no sense. Not retryable.
    #[error("malformed metadata for comic {number}: {reason}")]
    Format { number: i64, reason: String },
}

impl FetchError {
    /// Whether the driver should retry this fetch with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport { .. })
    }
}

/// Outcome of a completed fetch.
///
/// A remote 404 on the metadata document is a normal completion, not an
/// error: it tells the driver to stop extending the frontier upward, while a
/// transport failure means "retry later".
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched(FetchedComic),
    NotFound,
}

impl FetchOutcome {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchOutcome::NotFound)
    }
}

/// Everything a successful fetch produced. Immutable once constructed; the
/// caller decides what to store.
#[derive(Debug, Clone)]
pub struct FetchedComic {
    pub number: i64,
    pub metadata: ComicMetadata,
    pub image_bytes: Vec<u8>,
}

/// Completion message delivered by a [`FetchOperation`].
#[derive(Debug)]
pub struct FetchResult {
    pub number: i64,
    pub outcome: Result<FetchOutcome, FetchError>,
}

/// Wire format of the archive's per-comic JSON document. Unknown fields are
/// ignored.
#[derive(Debug, Deserialize)]
struct ComicInfo {
    num: i64,
    safe_title: String,
    alt: String,
    img: String,
    #[serde(default)]
    transcript: String,
}

/// Retrieves one comic's metadata and image bytes from the remote archive.
///
/// The fetcher never retries and never touches storage — applying results
/// and retry policy belong to the driver, which keeps this component
/// independently testable.
pub struct ComicFetcher<T: Transport = HttpTransport> {
    transport: Arc<T>,
    api_url: String,
}

impl ComicFetcher<HttpTransport> {
    pub fn new() -> Self {
        Self::with_transport(HttpTransport::new())
    }

    /// Build a fetcher from the app configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::with_transport(HttpTransport::with_timeout(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .with_api_url(config.archive_url.clone())
    }
}

impl Default for ComicFetcher<HttpTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> ComicFetcher<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn info_url(&self, number: i64) -> String {
        format!("{}/{}/info.0.json", self.api_url.trim_end_matches('/'), number)
    }

    /// Fetch one comic's metadata and image bytes.
    pub async fn fetch(&self, number: i64) -> Result<FetchOutcome, FetchError> {
        if number < MIN_COMIC_NUMBER {
            return Err(FetchError::InvalidNumber(number));
        }

        let info_url = self.info_url(number);
        let body = match self.transport.get(&info_url).await {
            Ok(body) => body,
            Err(TransportError::NotFound) => {
                tracing::debug!("comic {} does not exist upstream", number);
                return Ok(FetchOutcome::NotFound);
            }
            Err(source) => {
                return Err(FetchError::Transport {
                    url: info_url,
                    source,
                })
            }
        };

        let info: ComicInfo = serde_json::from_slice(&body).map_err(|e| FetchError::Format {
            number,
            reason: e.to_string(),
        })?;
        if info.num != number {
            return Err(FetchError::Format {
                number,
                reason: format!("document is for comic {}", info.num),
            });
        }
        if info.img.is_empty() {
            return Err(FetchError::Format {
                number,
                reason: "empty image URL".to_string(),
            });
        }

        let image_bytes =
            self.transport
                .get(&info.img)
                .await
                .map_err(|source| FetchError::Transport {
                    url: info.img.clone(),
                    source,
                })?;

        Ok(FetchOutcome::Fetched(FetchedComic {
            number,
            metadata: ComicMetadata {
                name: info.safe_title,
                title_text: info.alt,
                image_url: info.img,
                transcript: info.transcript,
                explanation: None,
            },
            image_bytes,
        }))
    }

    /// Fetch many comics with bounded parallelism. Results arrive in
    /// completion order; each carries its own number. Scheduling discipline
    /// (which numbers, and whether one is already in flight) stays with the
    /// caller.
    pub async fn fetch_many(&self, numbers: Vec<i64>, concurrency: usize) -> Vec<FetchResult> {
        stream::iter(numbers)
            .map(|number| async move {
                let outcome = self.fetch(number).await;
                match &outcome {
                    Ok(FetchOutcome::Fetched(comic)) => tracing::debug!(
                        "fetched comic {} ({} image bytes)",
                        number,
                        comic.image_bytes.len()
                    ),
                    Ok(FetchOutcome::NotFound) => {
                        tracing::debug!("comic {} not found upstream", number)
                    }
                    Err(e) => tracing::debug!("failed to fetch comic {}: {}", number, e),
                }
                FetchResult { number, outcome }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }
}

/// A cancelable, in-flight fetch for one comic number.
///
/// The result is delivered over the channel given to [`FetchOperation::spawn`].
/// A canceled operation is aborted at its next await point and delivers
/// nothing, so partially downloaded bytes never surface as a result.
pub struct FetchOperation {
    number: i64,
    handle: JoinHandle<()>,
}

impl FetchOperation {
    pub fn spawn<T: Transport>(
        fetcher: Arc<ComicFetcher<T>>,
        number: i64,
        results: mpsc::Sender<FetchResult>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let outcome = fetcher.fetch(number).await;
            // A closed receiver means the driver shut down; nothing to do.
            let _ = results.send(FetchResult { number, outcome }).await;
        });
        Self { number, handle }
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    /// Abort the fetch. Safe at any point; a completed operation is
    /// unaffected.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    use std::collections::HashMap;

    use async_trait::async_trait;

    /// Transport serving canned responses, keyed by URL.
    struct MockTransport {
        responses: HashMap<String, Result<Vec<u8>, TransportError>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
            }
        }

        fn with(mut self, url: &str, response: Result<Vec<u8>, TransportError>) -> Self {
            self.responses.insert(url.to_string(), response);
            self
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
            self.responses
                .get(url)
                .cloned()
                .unwrap_or(Err(TransportError::NotFound))
        }
    }

    /// Transport whose requests never complete, for cancellation tests.
    struct PendingTransport;

    #[async_trait]
    impl Transport for PendingTransport {
        async fn get(&self, _url: &str) -> Result<Vec<u8>, TransportError> {
            futures::future::pending().await
        }
    }

    const INFO_614: &str = r#"{
        "num": 614,
        "title": "Woodpecker",
        "safe_title": "Woodpecker",
        "alt": "If you don't have an extension cord I can get that too.",
        "img": "https://imgs.example.com/comics/woodpecker.png",
        "transcript": "[[A man with a beret]]",
        "year": "2009", "month": "7", "day": "24", "link": "", "news": ""
    }"#;

    fn fetcher_with(transport: MockTransport) -> ComicFetcher<MockTransport> {
        ComicFetcher::with_transport(transport)
    }

    #[tokio::test]
    async fn fetch_success_maps_the_json_document() {
        let transport = MockTransport::new()
            .with(
                "https://xkcd.com/614/info.0.json",
                Ok(INFO_614.as_bytes().to_vec()),
            )
            .with(
                "https://imgs.example.com/comics/woodpecker.png",
                Ok(b"image-bytes".to_vec()),
            );
        let fetcher = fetcher_with(transport);

        let outcome = tokio_test::assert_ok!(fetcher.fetch(614).await);
        let comic = match outcome {
            FetchOutcome::Fetched(comic) => comic,
            FetchOutcome::NotFound => panic!("expected a fetched comic"),
        };

        assert_eq!(comic.number, 614);
        assert_eq!(comic.metadata.name, "Woodpecker");
        assert_eq!(
            comic.metadata.title_text,
            "If you don't have an extension cord I can get that too."
        );
        assert_eq!(
            comic.metadata.image_url,
            "https://imgs.example.com/comics/woodpecker.png"
        );
        assert_eq!(comic.metadata.explanation, None);
        assert_eq!(comic.image_bytes, b"image-bytes");
    }

    #[tokio::test]
    async fn remote_404_is_a_normal_outcome() {
        let fetcher = fetcher_with(MockTransport::new());

        let outcome = tokio_test::assert_ok!(fetcher.fetch(404).await);
        assert!(outcome.is_not_found());
    }

    #[tokio::test]
    async fn malformed_document_is_a_format_error() {
        let transport = MockTransport::new().with(
            "https://xkcd.com/614/info.0.json",
            Ok(b"<html>not json</html>".to_vec()),
        );
        let fetcher = fetcher_with(transport);

        let err = fetcher.fetch(614).await.unwrap_err();
        assert!(matches!(err, FetchError::Format { number: 614, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn mismatched_number_is_a_format_error() {
        let transport = MockTransport::new().with(
            "https://xkcd.com/613/info.0.json",
            Ok(INFO_614.as_bytes().to_vec()),
        );
        let fetcher = fetcher_with(transport);

        let err = fetcher.fetch(613).await.unwrap_err();
        assert!(matches!(err, FetchError::Format { number: 613, .. }));
    }

    #[tokio::test]
    async fn image_failure_is_a_retryable_transport_error() {
        let transport = MockTransport::new()
            .with(
                "https://xkcd.com/614/info.0.json",
                Ok(INFO_614.as_bytes().to_vec()),
            )
            .with(
                "https://imgs.example.com/comics/woodpecker.png",
                Err(TransportError::Status(503)),
            );
        let fetcher = fetcher_with(transport);

        let err = fetcher.fetch(614).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, FetchError::Transport { .. }));
    }

    #[tokio::test]
    async fn numbers_below_minimum_are_rejected() {
        let fetcher = fetcher_with(MockTransport::new());
        let err = fetcher.fetch(0).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidNumber(0)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn custom_api_url_is_respected() {
        let transport = MockTransport::new().with(
            "https://mirror.example.org/614/info.0.json",
            Ok(INFO_614.as_bytes().to_vec()),
        );
        let fetcher =
            fetcher_with(transport).with_api_url("https://mirror.example.org/");

        // The image URL is absent from the mock, so the metadata leg must
        // have succeeded for the error to come from the image leg.
        let err = fetcher.fetch(614).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }

    #[tokio::test]
    async fn spawned_operation_delivers_its_result() {
        let transport = MockTransport::new()
            .with(
                "https://xkcd.com/614/info.0.json",
                Ok(INFO_614.as_bytes().to_vec()),
            )
            .with(
                "https://imgs.example.com/comics/woodpecker.png",
                Ok(b"image-bytes".to_vec()),
            );
        let fetcher = Arc::new(fetcher_with(transport));
        let (tx, mut rx) = mpsc::channel(1);

        let operation = FetchOperation::spawn(fetcher, 614, tx);
        assert_eq!(operation.number(), 614);

        let result = rx.recv().await.expect("operation should deliver");
        assert_eq!(result.number, 614);
        assert!(matches!(result.outcome, Ok(FetchOutcome::Fetched(_))));
    }

    #[tokio::test]
    async fn canceled_operation_never_delivers() {
        let fetcher = Arc::new(ComicFetcher::with_transport(PendingTransport));
        let (tx, mut rx) = mpsc::channel(1);

        let operation = FetchOperation::spawn(fetcher, 614, tx);
        operation.cancel();

        // The aborted task drops its sender without sending; the channel
        // closes with no message.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn fetch_many_preserves_per_number_outcomes() {
        let transport = MockTransport::new()
            .with(
                "https://xkcd.com/614/info.0.json",
                Ok(INFO_614.as_bytes().to_vec()),
            )
            .with(
                "https://imgs.example.com/comics/woodpecker.png",
                Ok(b"image-bytes".to_vec()),
            )
            .with(
                "https://xkcd.com/616/info.0.json",
                Err(TransportError::Status(500)),
            );
        let fetcher = fetcher_with(transport);

        let mut results = fetcher.fetch_many(vec![614, 615, 616], 2).await;
        results.sort_by_key(|r| r.number);
        assert_eq!(results.len(), 3);

        assert!(matches!(results[0].outcome, Ok(FetchOutcome::Fetched(_))));
        assert!(matches!(results[1].outcome, Ok(FetchOutcome::NotFound)));
        assert!(matches!(
            results[2].outcome,
            Err(FetchError::Transport { .. })
        ));
    }
}
