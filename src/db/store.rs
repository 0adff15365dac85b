use std::collections::HashMap;
use std::io::ErrorKind;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::blob::BlobStore;
use crate::error::{AppError, Result};
use crate::models::{image_filename, Comic, ComicMetadata, LoadingState, MIN_COMIC_NUMBER};

use super::schema::SCHEMA;

/// Default site used to derive per-comic website URLs.
pub const DEFAULT_SITE_URL: &str = "https://xkcd.com";

/// The persisted comic catalog plus the blob store its images live in.
///
/// All database access goes through one connection actor, so mutating
/// operations are serialized against each other even when many fetch
/// completions land concurrently.
pub struct ComicStore<B: BlobStore> {
    conn: Connection,
    blobs: B,
    site_url: String,
}

/// Counters from a `synchronize_downloaded_images` pass, for startup logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Blobs with no owning record, deleted.
    pub orphans_deleted: usize,
    /// Records that claimed an image whose blob was gone, reset.
    pub records_reset: usize,
    /// Records whose blob was present but unclaimed, repaired.
    pub records_repaired: usize,
    /// Rows stuck in the loading state from a previous run, returned to idle.
    pub loading_reset: usize,
}

impl<B: BlobStore> ComicStore<B> {
    /// Open (or create) the catalog at `db_path`, backed by `blobs` for
    /// image storage.
    pub async fn open(db_path: &str, blobs: B) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            blobs,
            site_url: DEFAULT_SITE_URL.to_string(),
        })
    }

    /// Override the site base used by [`ComicStore::website_url`].
    pub fn with_site_url(mut self, site_url: impl Into<String>) -> Self {
        self.site_url = site_url.into();
        self
    }

    /// Return the unique record for `number`, creating a placeholder if
    /// absent. Numbers below [`MIN_COMIC_NUMBER`] are rejected.
    pub async fn get_or_create(&self, number: i64) -> Result<Comic> {
        ensure_valid_number(number)?;
        let comic = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO comics (number) VALUES (?1)",
                    params![number],
                )?;
                let comic = conn.query_row(
                    "SELECT number, name, title_text, transcript, explanation, image_url, downloaded, loading, fetched_at
                     FROM comics WHERE number = ?1",
                    params![number],
                    |row| Ok(comic_from_row(row)),
                )?;
                Ok(comic)
            })
            .await?;
        Ok(comic)
    }

    /// Look up a record by number. Absence is a normal outcome, not an error.
    pub async fn find(&self, number: i64) -> Result<Option<Comic>> {
        let comic = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT number, name, title_text, transcript, explanation, image_url, downloaded, loading, fetched_at
                     FROM comics WHERE number = ?1",
                )?;
                let comic = stmt
                    .query_row(params![number], |row| Ok(comic_from_row(row)))
                    .optional()?;
                Ok(comic)
            })
            .await?;
        Ok(comic)
    }

    /// Highest number in the catalog, or `None` when it is empty. The driver
    /// uses this to discover the fetch frontier.
    pub async fn highest_known_number(&self) -> Result<Option<i64>> {
        let number = self
            .conn
            .call(|conn| {
                let number: Option<i64> =
                    conn.query_row("SELECT MAX(number) FROM comics", [], |row| row.get(0))?;
                Ok(number)
            })
            .await?;
        Ok(number)
    }

    /// Comics whose metadata has been fetched but whose image is not
    /// downloaded — the retry set for image-only re-fetch.
    pub async fn records_missing_image(&self) -> Result<Vec<Comic>> {
        let comics = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT number, name, title_text, transcript, explanation, image_url, downloaded, loading, fetched_at
                     FROM comics WHERE image_url IS NOT NULL AND downloaded = 0 ORDER BY number",
                )?;
                let comics = stmt
                    .query_map([], |row| Ok(comic_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(comics)
            })
            .await?;
        Ok(comics)
    }

    /// Every record in the catalog. Expensive; intended for bulk export and
    /// debugging, not for hot paths.
    pub async fn all(&self) -> Result<Vec<Comic>> {
        let comics = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT number, name, title_text, transcript, explanation, image_url, downloaded, loading, fetched_at
                     FROM comics ORDER BY number",
                )?;
                let comics = stmt
                    .query_map([], |row| Ok(comic_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(comics)
            })
            .await?;
        Ok(comics)
    }

    /// Store a successful fetch: write the image blob, then commit metadata.
    ///
    /// Idempotent, and metadata is write-once: COALESCE keeps whatever a
    /// previous fetch stored, so re-applying a result cannot rewrite
    /// history. Blob first, row second — a crash in between leaves an
    /// orphan blob for the next reconciliation pass instead of a row
    /// claiming an image that was never written.
    pub async fn apply_fetch_result(
        &self,
        number: i64,
        metadata: &ComicMetadata,
        image_bytes: &[u8],
    ) -> Result<Comic> {
        ensure_valid_number(number)?;

        // Stored metadata wins over the incoming payload when deriving the
        // blob filename, so a re-fetch keyed off drifted remote data still
        // lands on the blob the record owns.
        let existing = self.find(number).await?;
        let (image_url, name) = match &existing {
            Some(comic) if !comic.is_placeholder() => (
                comic.image_url.clone().unwrap_or_else(|| metadata.image_url.clone()),
                comic.name.clone().unwrap_or_else(|| metadata.name.clone()),
            ),
            _ => (metadata.image_url.clone(), metadata.name.clone()),
        };
        let filename = image_filename(number, Some(&image_url), Some(&name)).ok_or_else(|| {
            AppError::InvalidArgument(format!("comic {number} metadata yields no image filename"))
        })?;

        self.blobs.write(&filename, image_bytes).await?;

        let metadata = metadata.clone();
        let comic = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO comics (number, name, title_text, transcript, explanation, image_url, downloaded, loading, fetched_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, datetime('now'))
                       ON CONFLICT(number) DO UPDATE SET
                           name = COALESCE(comics.name, excluded.name),
                           title_text = COALESCE(comics.title_text, excluded.title_text),
                           transcript = COALESCE(comics.transcript, excluded.transcript),
                           explanation = COALESCE(comics.explanation, excluded.explanation),
                           image_url = COALESCE(comics.image_url, excluded.image_url),
                           downloaded = 1,
                           loading = ?7,
                           fetched_at = COALESCE(comics.fetched_at, excluded.fetched_at)"#,
                    params![
                        number,
                        metadata.name,
                        metadata.title_text,
                        metadata.transcript,
                        metadata.explanation,
                        metadata.image_url,
                        LoadingState::Settled.as_i64(),
                    ],
                )?;
                let comic = conn.query_row(
                    "SELECT number, name, title_text, transcript, explanation, image_url, downloaded, loading, fetched_at
                     FROM comics WHERE number = ?1",
                    params![number],
                    |row| Ok(comic_from_row(row)),
                )?;
                Ok(comic)
            })
            .await?;
        Ok(comic)
    }

    /// Record an explanation for a comic. Write-once, like the fetched
    /// metadata fields.
    pub async fn set_explanation(&self, number: i64, explanation: &str) -> Result<()> {
        ensure_valid_number(number)?;
        let explanation = explanation.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE comics SET explanation = COALESCE(explanation, ?1) WHERE number = ?2",
                    params![explanation, number],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Attempt the idle-to-loading transition for `number`, creating the
    /// placeholder row if needed. Returns `false` when a fetch is already in
    /// flight, so the same number is never scheduled twice concurrently.
    pub async fn try_mark_loading(&self, number: i64) -> Result<bool> {
        ensure_valid_number(number)?;
        let claimed = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO comics (number) VALUES (?1)",
                    params![number],
                )?;
                let changed = conn.execute(
                    "UPDATE comics SET loading = ?1 WHERE number = ?2 AND loading != ?1",
                    params![LoadingState::Loading.as_i64(), number],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(claimed)
    }

    /// Move a comic's loading flag, e.g. back to [`LoadingState::Idle`] so a
    /// failed fetch becomes eligible again on the next scan.
    pub async fn set_loading_state(&self, number: i64, state: LoadingState) -> Result<()> {
        ensure_valid_number(number)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE comics SET loading = ?1 WHERE number = ?2",
                    params![state.as_i64(), number],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Lazily read the downloaded image bytes for a comic, if any.
    pub async fn image_bytes(&self, number: i64) -> Result<Option<Vec<u8>>> {
        let Some(comic) = self.find(number).await? else {
            return Ok(None);
        };
        let Some(filename) = comic.image_filename() else {
            return Ok(None);
        };
        match self.blobs.read(&filename).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(AppError::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Decode the downloaded image, if any. Decoding runs on the calling
    /// task; hand the result to [`crate::tile::TiledImage`] for zoomed
    /// display.
    pub async fn load_image(&self, number: i64) -> Result<Option<DynamicImage>> {
        match self.image_bytes(number).await? {
            Some(bytes) => Ok(Some(image::load_from_memory(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove only the image blob for a comic, leaving its metadata intact.
    /// No-op when the comic has no blob.
    pub async fn delete_image(&self, number: i64) -> Result<()> {
        let Some(comic) = self.find(number).await? else {
            return Ok(());
        };
        if let Some(filename) = comic.image_filename() {
            self.blobs.delete(&filename).await?;
        }
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE comics SET downloaded = 0 WHERE number = ?1",
                    params![number],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Destroy every record and every tracked blob. Only used for a full
    /// catalog rebuild from a remote re-scan.
    pub async fn delete_all(&self) -> Result<()> {
        for comic in self.all().await? {
            if let Some(filename) = comic.image_filename() {
                self.blobs.delete(&filename).await?;
            }
        }
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM comics", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Reconcile the catalog against the blob store.
    ///
    /// The metadata store and the blob store fail independently — a crash
    /// can land between a blob write and the row commit — so drift is
    /// corrected in both directions: orphan blobs are deleted, rows
    /// claiming a missing blob are reset so they re-enter the
    /// missing-image set, rows with a present but unclaimed blob are
    /// repaired, and rows stuck in the loading state are returned to idle.
    /// Individual blob delete failures are logged and skipped so the pass
    /// always completes. Runs once at startup, not on hot paths.
    pub async fn synchronize_downloaded_images(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let on_disk = self.blobs.list().await?;
        let comics = self.all().await?;

        let mut owned: HashMap<String, &Comic> = HashMap::new();
        for comic in &comics {
            if let Some(filename) = comic.image_filename() {
                owned.insert(filename, comic);
            }
        }

        for filename in &on_disk {
            if !owned.contains_key(filename) {
                match self.blobs.delete(filename).await {
                    Ok(()) => report.orphans_deleted += 1,
                    Err(e) => tracing::warn!("failed to delete orphan blob {}: {}", filename, e),
                }
            }
        }

        let mut reset = Vec::new();
        let mut repaired = Vec::new();
        for (filename, comic) in &owned {
            let present = on_disk.contains(filename);
            if comic.downloaded && !present {
                reset.push(comic.number);
            } else if !comic.downloaded && present {
                repaired.push(comic.number);
            }
        }
        report.records_reset = reset.len();
        report.records_repaired = repaired.len();

        let loading = LoadingState::Loading.as_i64();
        let idle = LoadingState::Idle.as_i64();
        report.loading_reset = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for number in reset {
                    tx.execute(
                        "UPDATE comics SET downloaded = 0 WHERE number = ?1",
                        params![number],
                    )?;
                }
                for number in repaired {
                    tx.execute(
                        "UPDATE comics SET downloaded = 1 WHERE number = ?1",
                        params![number],
                    )?;
                }
                let loading_reset = tx.execute(
                    "UPDATE comics SET loading = ?1 WHERE loading = ?2",
                    params![idle, loading],
                )?;
                tx.commit()?;
                Ok(loading_reset)
            })
            .await?;

        tracing::debug!(
            "image sync: {} orphans deleted, {} records reset, {} repaired, {} loading flags cleared",
            report.orphans_deleted,
            report.records_reset,
            report.records_repaired,
            report.loading_reset
        );
        Ok(report)
    }

    /// Canonical website URL for a comic number. Pure derivation, no I/O.
    pub fn website_url(&self, number: i64) -> String {
        format!("{}/{}/", self.site_url.trim_end_matches('/'), number)
    }
}

fn ensure_valid_number(number: i64) -> Result<()> {
    if number < MIN_COMIC_NUMBER {
        return Err(AppError::InvalidArgument(format!(
            "comic number must be >= {MIN_COMIC_NUMBER}, got {number}"
        )));
    }
    Ok(())
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn comic_from_row(row: &Row) -> Comic {
    Comic {
        number: row.get(0).unwrap(),
        name: row.get(1).unwrap(),
        title_text: row.get(2).unwrap(),
        transcript: row.get(3).unwrap(),
        explanation: row.get(4).unwrap(),
        image_url: row.get(5).unwrap(),
        downloaded: row.get::<_, i64>(6).unwrap() != 0,
        loading: LoadingState::from_i64(row.get(7).unwrap()),
        fetched_at: row
            .get::<_, Option<String>>(8)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
    }
}
