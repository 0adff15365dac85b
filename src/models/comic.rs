use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest comic number the archive serves.
pub const MIN_COMIC_NUMBER: i64 = 1;

/// Scheduling state of a comic's fetch, used to keep at most one fetch in
/// flight per number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadingState {
    /// No fetch in flight; eligible for scheduling.
    #[default]
    Idle,
    /// A fetch is currently in flight.
    Loading,
    /// A fetch completed (successfully, with a remote 404, or with an error
    /// the driver chose not to retry).
    Settled,
}

impl LoadingState {
    pub(crate) fn from_i64(value: i64) -> Self {
        match value {
            1 => LoadingState::Loading,
            2 => LoadingState::Settled,
            _ => LoadingState::Idle,
        }
    }

    pub(crate) fn as_i64(self) -> i64 {
        match self {
            LoadingState::Idle => 0,
            LoadingState::Loading => 1,
            LoadingState::Settled => 2,
        }
    }
}

/// One catalog entry, identified by a positive comic number.
///
/// A row with no metadata is a valid placeholder: the number is known (for
/// example from a gap scan) but nothing has been fetched yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comic {
    pub number: i64,
    pub name: Option<String>,
    pub title_text: Option<String>,
    pub transcript: Option<String>,
    pub explanation: Option<String>,
    pub image_url: Option<String>,
    /// The store's claim that the image blob is on disk. Corrected against
    /// the actual blob listing by `synchronize_downloaded_images`.
    pub downloaded: bool,
    pub loading: LoadingState,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Comic {
    /// Whether this record has been fetched yet.
    pub fn is_placeholder(&self) -> bool {
        self.name.is_none() && self.image_url.is_none()
    }

    /// The blob filename this comic's image is stored under, if it can own
    /// one. See [`image_filename`].
    pub fn image_filename(&self) -> Option<String> {
        image_filename(self.number, self.image_url.as_deref(), self.name.as_deref())
    }
}

/// Metadata produced by a successful fetch. Fields are written to the store
/// once and treated as immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComicMetadata {
    pub name: String,
    pub title_text: String,
    pub image_url: String,
    pub transcript: String,
    /// Not supplied by the archive's JSON document; populated separately.
    pub explanation: Option<String>,
}

/// Deterministic blob filename for a comic's image.
///
/// Derived from the percent-decoded last path segment of the image URL,
/// falling back to the comic's name; a comic with neither owns no blob.
/// The number prefix keeps the record-to-blob mapping injective even when
/// the remote reuses image filenames. Both the write path and every
/// lookup path (including reconciliation) go through this function.
pub fn image_filename(number: i64, image_url: Option<&str>, name: Option<&str>) -> Option<String> {
    if let Some(raw) = image_url {
        if let Ok(parsed) = url::Url::parse(raw) {
            let segment = parsed
                .path_segments()
                .and_then(|segments| segments.last())
                .filter(|segment| !segment.is_empty());
            if let Some(segment) = segment {
                let decoded = urlencoding::decode(segment)
                    .map(|cow| cow.into_owned())
                    .unwrap_or_else(|_| segment.to_string());
                return Some(format!("{}_{}", number, sanitize(&decoded)));
            }
        }
    }
    name.map(|name| format!("{}_{}.png", number, sanitize(name)))
}

/// Restrict filenames to a portable character set.
fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
