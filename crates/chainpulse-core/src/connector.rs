//! Connector contract shared by all provider adapters.
//!
//! A connector knows how to build one provider's request, parse its response
//! into [`NormalizedRecord`]s, and classify failures. It never retries and
//! never consults the cache; both belong to the executor.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::FetchError;
use crate::http::{HttpError, HttpResponse};
use crate::query::QueryKind;
use crate::{NormalizedRecord, ProviderId};

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<NormalizedRecord>, FetchError>> + Send + 'a>>;

pub trait Connector: Send + Sync {
    fn id(&self) -> ProviderId;

    fn supports(&self, query: &QueryKind) -> bool;

    /// Fetch and normalize one logical query.
    ///
    /// Failures are classified, never swallowed: the executor needs the
    /// distinction to decide between retrying and failing fast.
    fn fetch<'a>(&'a self, query: &'a QueryKind) -> FetchFuture<'a>;
}

/// Map a transport error into the fetch taxonomy.
pub fn classify_transport(provider: ProviderId, error: HttpError, sla: Duration) -> FetchError {
    if error.timed_out() {
        FetchError::Timeout {
            provider,
            elapsed: sla,
        }
    } else {
        // Connect failures behave like a transient upstream outage.
        FetchError::BadResponse {
            provider,
            status: 0,
            detail: error.message().to_owned(),
        }
    }
}

/// Map a non-2xx HTTP status into the fetch taxonomy.
pub fn classify_status(provider: ProviderId, response: &HttpResponse) -> FetchError {
    match response.status {
        401 | 403 => FetchError::AuthError {
            provider,
            detail: truncate(&response.body),
        },
        429 => FetchError::RateLimited {
            provider,
            retry_after: response.retry_after,
        },
        status => FetchError::BadResponse {
            provider,
            status,
            detail: truncate(&response.body),
        },
    }
}

/// Parse failure on a 2xx body: permanent, the payload shape is wrong.
pub fn classify_parse(provider: ProviderId, detail: impl Into<String>) -> FetchError {
    FetchError::BadResponse {
        provider,
        status: 200,
        detail: detail.into(),
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        body.to_owned()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
