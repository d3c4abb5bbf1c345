//! Contract with the fetch/render layer
//!
//! The engine never touches a document directly. It asks a
//! [`DocumentAccessor`] for "the value at pattern P, waiting at most W" and
//! gets back a [`Lookup`]. Whatever renders or fetches pages implements these
//! traits; [`StaticDocument`](crate::document::StaticDocument) and
//! [`HttpSource`](crate::fetch::HttpSource) are the in-crate implementations.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::{AccessError, FetchError};
use crate::selector::ExtractMode;

/// Answer to a single bounded lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Raw, unnormalized value. May still be blank.
    Found(String),
    Absent,
    TimedOut,
}

/// Query access to one document session.
///
/// Implementations release their session (page handle, connection) on
/// `Drop`; the engine takes the accessor by value so that happens on every
/// exit path of a run.
#[async_trait]
pub trait DocumentAccessor: Send + Sync {
    /// Wait up to `timeout` for `pattern` and read it according to `mode`.
    async fn await_element(
        &self,
        pattern: &str,
        mode: &ExtractMode,
        timeout: Duration,
    ) -> Result<Lookup, AccessError>;

    /// URL of the document as loaded (after redirects); base for relative URLs.
    fn current_url(&self) -> &Url;
}

/// Produces a document session for a URL.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    type Accessor: DocumentAccessor;

    async fn open(&self, url: &str) -> Result<Self::Accessor, FetchError>;
}
