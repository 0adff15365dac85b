mod comic;

pub use comic::{image_filename, Comic, ComicMetadata, LoadingState, MIN_COMIC_NUMBER};
