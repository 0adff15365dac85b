mod operation;
mod transport;

pub use operation::{
    ComicFetcher, FetchError, FetchOperation, FetchOutcome, FetchResult, FetchedComic,
    DEFAULT_API_URL,
};
pub use transport::{HttpTransport, Transport, TransportError};
