//! HTTP implementation of the ranged-read primitive.
//!
//! Objects are addressed relative to a tier's base URL:
//!
//! - legacy: `{base}/storage/{volume_id}/{local_id}?secret={secret}`
//! - keyed:  `{base}/{kind}/{object_id}?token={access_token}`
//!
//! Session slot `i` of a tier talks to mirror `i % mirrors.len()`, so a tier
//! with a single base URL still gets parallel connections from reqwest's pool.
//!
//! # Status mapping
//!
//! | Status      | Outcome                                    |
//! |-------------|--------------------------------------------|
//! | 206         | body is the chunk                          |
//! | 200         | server ignored `Range`; slice the full body |
//! | 416         | empty terminal chunk                       |
//! | 420, 429    | `TransientRateLimited`                     |
//! | 404, 410    | `RemoteObjectUnavailable`                  |
//! | other       | `Other`                                    |

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CompletionSender, ReadCompletion, ReadRequest, RemoteReader, RequestId};
use crate::config::TierEndpoints;
use crate::error::RemoteErrorKind;
use crate::locator::Locator;

/// Default timeout for a single chunk request in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Ranged reader over HTTP `Range` requests.
pub struct HttpRangeReader {
    client: Client,
    endpoints: TierEndpoints,
    completions: CompletionSender,
    next_request: u64,
    tasks: HashMap<RequestId, JoinHandle<()>>,
}

impl HttpRangeReader {
    /// Create a reader with a default reqwest client.
    pub fn new(
        endpoints: TierEndpoints,
        completions: CompletionSender,
    ) -> Result<Self, RemoteErrorKind> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| RemoteErrorKind::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, endpoints, completions))
    }

    /// Create a reader around an existing client.
    pub fn with_client(
        client: Client,
        endpoints: TierEndpoints,
        completions: CompletionSender,
    ) -> Self {
        Self {
            client,
            endpoints,
            completions,
            next_request: 1,
            tasks: HashMap::new(),
        }
    }

    /// Requests whose task has not finished yet.
    pub fn pending(&self) -> usize {
        self.tasks.values().filter(|h| !h.is_finished()).count()
    }

    fn url_for(&self, request: &ReadRequest) -> Option<String> {
        let mirrors = self.endpoints.mirrors(request.locator.tier())?;
        if mirrors.is_empty() {
            return None;
        }
        let base = &mirrors[request.slot % mirrors.len()];
        Some(object_url(base, &request.locator))
    }
}

impl RemoteReader for HttpRangeReader {
    fn issue(&mut self, request: ReadRequest) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;

        self.tasks.retain(|_, handle| !handle.is_finished());

        let Some(url) = self.url_for(&request) else {
            warn!(tier = %request.locator.tier(), "No endpoint configured for tier");
            let _ = self.completions.send(ReadCompletion::Failed {
                request: id,
                error: RemoteErrorKind::Other(format!(
                    "no endpoint configured for {}",
                    request.locator.tier()
                )),
            });
            return id;
        };

        debug!(
            request = %id,
            url = %url,
            offset = request.offset,
            length = request.length,
            slot = request.slot,
            "Issuing ranged read"
        );

        let client = self.client.clone();
        let completions = self.completions.clone();
        let offset = request.offset;
        let length = request.length;
        let handle = tokio::spawn(async move {
            let completion = match fetch_range(&client, &url, offset, length).await {
                Ok(bytes) => ReadCompletion::Chunk {
                    request: id,
                    offset,
                    bytes,
                },
                Err(error) => ReadCompletion::Failed { request: id, error },
            };
            // Receiver gone means the engine shut down.
            let _ = completions.send(completion);
        });
        self.tasks.insert(id, handle);
        id
    }

    fn cancel(&mut self, request: RequestId) {
        if let Some(handle) = self.tasks.remove(&request) {
            handle.abort();
            debug!(request = %request, "Cancelled ranged read");
        }
    }
}

impl Drop for HttpRangeReader {
    fn drop(&mut self) {
        for handle in self.tasks.values() {
            handle.abort();
        }
    }
}

/// Build the object URL for a locator under `base`.
pub(crate) fn object_url(base: &str, locator: &Locator) -> String {
    let base = base.trim_end_matches('/');
    match locator {
        Locator::Legacy(l) => format!(
            "{}/storage/{}/{}?secret={}",
            base, l.volume_id, l.local_id, l.secret
        ),
        Locator::Keyed(k) => format!(
            "{}/{}/{}?token={}",
            base, k.kind, k.object_id, k.access_token
        ),
    }
}

/// How a response status is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusClass {
    Partial,
    Full,
    PastEnd,
    Failed,
}

pub(crate) fn classify_status(status: StatusCode) -> Result<StatusClass, RemoteErrorKind> {
    match status.as_u16() {
        206 => Ok(StatusClass::Partial),
        200 => Ok(StatusClass::Full),
        416 => Ok(StatusClass::PastEnd),
        420 | 429 => Err(RemoteErrorKind::TransientRateLimited),
        404 | 410 => Err(RemoteErrorKind::RemoteObjectUnavailable),
        _ => Ok(StatusClass::Failed),
    }
}

/// Cut the requested window out of a full-object body.
pub(crate) fn slice_full_body(body: Bytes, offset: u64, length: u32) -> Bytes {
    let len = body.len() as u64;
    if offset >= len {
        return Bytes::new();
    }
    let end = (offset + length as u64).min(len);
    body.slice(offset as usize..end as usize)
}

async fn fetch_range(
    client: &Client,
    url: &str,
    offset: u64,
    length: u32,
) -> Result<Bytes, RemoteErrorKind> {
    let last = offset + length.max(1) as u64 - 1;
    let response = client
        .get(url)
        .header(RANGE, format!("bytes={}-{}", offset, last))
        .send()
        .await
        .map_err(|e| RemoteErrorKind::Other(format!("Request failed: {}", e)))?;

    let status = response.status();
    let class = classify_status(status)?;
    if class == StatusClass::PastEnd {
        return Ok(Bytes::new());
    }
    if class == StatusClass::Failed {
        return Err(RemoteErrorKind::Other(format!("HTTP {} from {}", status, url)));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| RemoteErrorKind::Other(format!("Failed to read response: {}", e)))?;

    Ok(match class {
        StatusClass::Full => slice_full_body(body, offset, length),
        _ => body,
    })
}
