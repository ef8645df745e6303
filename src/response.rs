//! Buffered client response
//!
//! Handlers write into a [`ResponseBuffer`]. The first status write commits
//! the status and a snapshot of the headers; later header edits go to the
//! live map, which is discarded once committed.

use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::Full;
use std::sync::Arc;

use crate::middleware::headers::RespHeaderOps;

#[derive(Debug, Clone)]
enum CommitState {
    Open,
    Committed {
        status: StatusCode,
        headers: HeaderMap,
    },
}

/// Response under construction
#[derive(Debug)]
pub struct ResponseBuffer {
    headers: HeaderMap,
    state: CommitState,
    body: Vec<u8>,
    deferred: Vec<Arc<RespHeaderOps>>,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self {
            headers: HeaderMap::new(),
            state: CommitState::Open,
            body: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Headers as the client will see them
    pub fn headers(&self) -> &HeaderMap {
        match &self.state {
            CommitState::Open => &self.headers,
            CommitState::Committed { headers, .. } => headers,
        }
    }

    /// Live header map. Edits after commit have no effect on the response.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Committed status, if any
    pub fn status(&self) -> Option<StatusCode> {
        match &self.state {
            CommitState::Open => None,
            CommitState::Committed { status, .. } => Some(*status),
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.state, CommitState::Committed { .. })
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn push_deferred(&mut self, ops: Arc<RespHeaderOps>) -> usize {
        let mark = self.deferred.len();
        self.deferred.push(ops);
        mark
    }

    pub(crate) fn truncate_deferred(&mut self, mark: usize) {
        self.deferred.truncate(mark);
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<Arc<RespHeaderOps>> {
        std::mem::take(&mut self.deferred)
    }

    /// Commit the status and snapshot the headers.
    ///
    /// Returns `false` if the response was already committed.
    pub(crate) fn commit(&mut self, status: StatusCode) -> bool {
        if self.is_committed() {
            return false;
        }
        self.state = CommitState::Committed {
            status,
            headers: self.headers.clone(),
        };
        true
    }

    pub(crate) fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    /// Convert into a hyper response. An uncommitted buffer yields 200 with
    /// the live headers. Any copied `Content-Length` is dropped.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let (status, headers) = match self.state {
            CommitState::Open => (StatusCode::OK, self.headers),
            CommitState::Committed { status, headers } => (status, headers),
        };
        let mut response = Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        // the buffered body decides the length
        response.headers_mut().remove(http::header::CONTENT_LENGTH);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_commit_snapshots_headers() {
        let mut buf = ResponseBuffer::new();
        buf.headers_mut().insert("x-a", "1".parse().unwrap());
        assert!(buf.commit(StatusCode::CREATED));
        buf.headers_mut().insert("x-b", "2".parse().unwrap());

        assert_eq!(buf.status(), Some(StatusCode::CREATED));
        assert!(buf.headers().contains_key("x-a"));
        assert!(!buf.headers().contains_key("x-b"));
    }

    #[test]
    fn test_commit_once() {
        let mut buf = ResponseBuffer::new();
        assert!(buf.commit(StatusCode::OK));
        assert!(!buf.commit(StatusCode::NOT_FOUND));
        assert_eq!(buf.status(), Some(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_into_response_uncommitted() {
        let mut buf = ResponseBuffer::new();
        buf.headers_mut().insert("x-a", "1".parse().unwrap());
        let resp = buf.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-a"], "1");
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_into_response_committed() {
        let mut buf = ResponseBuffer::new();
        buf.commit(StatusCode::IM_A_TEAPOT);
        buf.append_body(b"short ");
        buf.append_body(b"and stout");
        let resp = buf.into_response();
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"short and stout");
    }

    #[test]
    fn test_deferred_mark_and_truncate() {
        let mut buf = ResponseBuffer::new();
        let ops = Arc::new(RespHeaderOps::default());
        assert_eq!(buf.push_deferred(ops.clone()), 0);
        assert_eq!(buf.push_deferred(ops.clone()), 1);
        buf.truncate_deferred(1);
        assert_eq!(buf.take_deferred().len(), 1);
        assert!(buf.take_deferred().is_empty());
    }
}
