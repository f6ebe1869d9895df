use std::time::Duration;

use crate::member::Member;

#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    /// The provider asked us to back off for `retry_after` before trying again.
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("session is not authorized")]
    NotAuthorized,

    #[error("channel '{0}' could not be resolved")]
    ChannelNotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Participant search over a single, already resolved channel.
pub trait DirectorySearch {
    fn search(&self, token: &str) -> Result<Vec<Member>, SearchError>;

    /// Downloads the member's profile photo and returns its path relative to
    /// the output directory. `None` when the member has no photo or the
    /// download failed for any reason.
    fn fetch_avatar(&self, member: &Member) -> Option<String>;
}

impl<T: DirectorySearch + ?Sized> DirectorySearch for &T {
    fn search(&self, token: &str) -> Result<Vec<Member>, SearchError> {
        (**self).search(token)
    }

    fn fetch_avatar(&self, member: &Member) -> Option<String> {
        (**self).fetch_avatar(member)
    }
}
