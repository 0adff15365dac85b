//! # comic-vault
//!
//! Local cache, fetcher, and image tiler for numbered webcomic archives
//! (xkcd-style: metadata served as JSON at `{base}/{number}/info.0.json`).
//!
//! The crate keeps an append-only SQLite catalog of comics keyed by number,
//! downloads metadata and images through an injectable transport, stores
//! image bytes in a key-addressed blob store, and can reconcile the catalog
//! against the blobs actually on disk after a crash. A loaded image can be
//! partitioned into a grid of tiles for zoomed display.
//!
//! Modules:
//!
//! - [`db`] - the [`ComicStore`] catalog and its reconciliation pass
//! - [`blob`] - the blob store boundary and filesystem implementation
//! - [`fetch`] - the comic fetcher, cancelable fetch operations, transport
//! - [`tile`] - the [`TiledImage`] grid partition
//! - [`models`] - the [`Comic`] record and filename derivation
//! - [`config`] - TOML configuration under the platform config dir
//!
//! Scheduling (which numbers to fetch, retry backoff, applying results) is
//! the embedding application's job; this crate supplies the pieces.

pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod models;
pub mod tile;

pub use blob::{BlobStore, FsBlobStore};
pub use config::Config;
pub use db::{ComicStore, SyncReport, DEFAULT_SITE_URL};
pub use error::{AppError, Result};
pub use fetch::{
    ComicFetcher, FetchError, FetchOperation, FetchOutcome, FetchResult, FetchedComic,
    HttpTransport, Transport, TransportError, DEFAULT_API_URL,
};
pub use models::{image_filename, Comic, ComicMetadata, LoadingState, MIN_COMIC_NUMBER};
pub use tile::TiledImage;
