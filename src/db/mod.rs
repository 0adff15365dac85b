mod schema;
mod store;

pub use store::{ComicStore, SyncReport, DEFAULT_SITE_URL};
