// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The producer side of the resumable upload protocol.

use crate::backoff::ExponentialBackoff;
use crate::checksum::{self, ChecksummedSource};
use crate::error::{Error, Result};
use crate::model::{
    Chunk, ListUploadsPage, ListUploadsRequest, MAX_WRITE_CHUNK_BYTES, Object, SessionId,
    WriteObjectSpec, WriteStatus,
};
use crate::operation::{OperationState, Poller, new_poller};
use crate::paginator::Paginator;
use crate::streaming_source::{Payload, StreamingSource};
use crate::stub::ResumableStore;
use std::collections::VecDeque;
use std::sync::Arc;

// Chunks (except for the last chunk) *must* be sized to a multiple of 256 KiB.
pub const RESUMABLE_UPLOAD_QUANTUM: usize = 256 * 1024;

const DEFAULT_ATTEMPT_LIMIT: u32 = 5;

/// A client for resumable uploads over any [ResumableStore].
///
/// The client owns a shared handle to the store, so it is cheap to clone and
/// each upload can capture its own reference.
#[derive(Debug)]
pub struct UploadClient<St> {
    store: Arc<St>,
}

impl<St> Clone for UploadClient<St> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<St> UploadClient<St>
where
    St: ResumableStore + 'static,
{
    pub fn new<T: Into<Arc<St>>>(store: T) -> Self {
        Self {
            store: store.into(),
        }
    }

    /// Creates an upload handle for the given destination and payload.
    ///
    /// The upload does not start until [UploadObject::send] is called.
    pub fn upload_object<B, N, T, S>(&self, bucket: B, name: N, payload: T) -> UploadObject<St, S>
    where
        B: Into<String>,
        N: Into<String>,
        T: Into<Payload<S>>,
        S: StreamingSource + Send + Sync,
    {
        UploadObject {
            store: self.store.clone(),
            spec: WriteObjectSpec::new(bucket, name),
            payload: ChecksummedSource::new(payload.into()),
            chunk_size: MAX_WRITE_CHUNK_BYTES,
            backoff: ExponentialBackoff::default(),
            attempt_limit: DEFAULT_ATTEMPT_LIMIT,
        }
    }

    /// Streams the pages of upload sessions.
    ///
    /// The stream is lazy: each page is fetched as the consumer asks for it.
    pub fn list_uploads(&self, req: ListUploadsRequest) -> Paginator<ListUploadsPage, Error> {
        let store = self.store.clone();
        let seed = req.page_token.clone();
        let execute = move |token: String| {
            let store = store.clone();
            let req = req.clone().set_page_token(token);
            async move { store.list_uploads(req).await }
        };
        Paginator::new(seed, execute)
    }

    /// Wraps an upload session in a generic operation handle.
    ///
    /// Polling reports the committed size while the upload is in progress and
    /// the finalized [Object] once it completes. Cancelling abandons the
    /// session.
    pub fn upload_operation(&self, id: SessionId) -> impl Poller<Object, u64> {
        let query = {
            let store = self.store.clone();
            move || {
                let store = store.clone();
                async move {
                    match store.query_write_status(&id).await? {
                        WriteStatus::Finalized(object) => Ok(OperationState::Done(*object)),
                        WriteStatus::Partial(persisted) => {
                            Ok(OperationState::InProgress(Some(persisted)))
                        }
                    }
                }
            }
        };
        let cancel = {
            let store = self.store.clone();
            move || {
                let store = store.clone();
                async move { store.cancel_resumable_write(&id).await }
            }
        };
        new_poller(query, cancel)
    }
}

/// A pending upload of one object.
///
/// Created via [UploadClient::upload_object]. The handle drives the whole
/// protocol: it starts the session, sends exact-offset chunks, and recovers
/// from transport failures by reconciling with the service's committed size.
pub struct UploadObject<St, S>
where
    S: StreamingSource,
{
    store: Arc<St>,
    spec: WriteObjectSpec,
    payload: ChecksummedSource<Payload<S>>,
    chunk_size: usize,
    backoff: ExponentialBackoff,
    attempt_limit: u32,
}

impl<St, S> UploadObject<St, S>
where
    St: ResumableStore,
    S: StreamingSource + Send + Sync,
{
    pub fn with_if_generation_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.spec = self.spec.set_if_generation_match(v);
        self
    }

    pub fn with_if_generation_not_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.spec = self.spec.set_if_generation_not_match(v);
        self
    }

    pub fn with_if_metageneration_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.spec = self.spec.set_if_metageneration_match(v);
        self
    }

    pub fn with_if_metageneration_not_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.spec = self.spec.set_if_metageneration_not_match(v);
        self
    }

    /// Sets the target size for each chunk.
    ///
    /// Values are rounded up to a multiple of 256 KiB and clamped to the
    /// 2 MiB chunk limit. The last chunk may be smaller.
    pub fn with_chunk_size(mut self, v: usize) -> Self {
        self.chunk_size = v;
        self
    }

    pub fn with_backoff(mut self, v: ExponentialBackoff) -> Self {
        self.backoff = v;
        self
    }

    /// Sets the number of recoverable failures tolerated before giving up.
    pub fn with_attempt_limit(mut self, v: u32) -> Self {
        self.attempt_limit = v;
        self
    }

    /// Runs the upload to completion.
    ///
    /// Recoverable failures trigger the recovery protocol: query the
    /// authoritative committed size, discard the bytes the service already
    /// has, back off, and resume from the committed size. Terminal errors are
    /// returned immediately.
    pub async fn send(mut self) -> Result<Object> {
        let mut progress = UploadProgress::new(self.chunk_size);
        let mut session = None;
        let mut failures = 0_u32;
        loop {
            let result = Self::attempt(
                &self.store,
                &mut self.payload,
                &mut progress,
                &mut session,
                &self.spec,
            )
            .await;
            match result {
                Ok(object) => {
                    checksum::validate(&self.payload.final_checksum(), &object.checksums)?;
                    return Ok(object);
                }
                Err(e) if e.is_recoverable() && failures < self.attempt_limit => {
                    failures += 1;
                    tracing::debug!(error = %e, failures, "recovering upload");
                    tokio::time::sleep(self.backoff.delay(failures)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // Takes the fields as separate arguments so the caller can borrow them
    // independently of `self`.
    async fn attempt(
        store: &Arc<St>,
        payload: &mut ChecksummedSource<Payload<S>>,
        progress: &mut UploadProgress,
        session: &mut Option<SessionId>,
        spec: &WriteObjectSpec,
    ) -> Result<Object> {
        let id = match session {
            Some(id) => *id,
            None => {
                let id = store.start_resumable_write(spec.clone()).await?;
                progress.session_started();
                *session = Some(id);
                id
            }
        };

        if progress.needs_query() {
            match store.query_write_status(&id).await? {
                WriteStatus::Finalized(object) => return Ok(*object),
                WriteStatus::Partial(persisted) => progress.handle_partial(persisted)?,
            }
        }

        loop {
            progress.next_buffer(payload).await?;
            let mut chunk = Chunk::new(progress.offset(), progress.chunk_data());
            if progress.is_final() {
                chunk = chunk
                    .set_finish(true)
                    .set_object_checksums(payload.final_checksum());
            }
            match store.write_object_chunk(&id, chunk).await {
                Err(e) => {
                    progress.handle_error();
                    return Err(e);
                }
                Ok(WriteStatus::Finalized(object)) => return Ok(*object),
                Ok(WriteStatus::Partial(persisted)) => progress.handle_partial(persisted)?,
            }
        }
    }
}

/// Tracks how far an upload has progressed, and buffers the bytes in flight.
#[derive(Clone, Default)]
struct UploadProgress {
    /// The target size for each chunk.
    ///
    /// The last chunk may be smaller. This must be a multiple of 256 KiB and
    /// greater than 0.
    target_size: usize,
    /// The offset for the current chunk.
    offset: u64,
    /// The data for the current chunk.
    buffer: VecDeque<bytes::Bytes>,
    /// The size of the current chunk.
    buffer_size: usize,
    /// The persisted size, if known.
    persisted_size: Option<u64>,
    /// Bytes retrieved from the payload stream that did not fit in the
    /// current chunk.
    remainder: VecDeque<bytes::Bytes>,
}

struct Summary<'a>(&'a VecDeque<bytes::Bytes>);
impl std::fmt::Debug for Summary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fmt = f.debug_struct("Summary");
        fmt.field("len", &self.0.len())
            .field(
                "total_size",
                &self.0.iter().fold(0_usize, |s, b| s + b.len()),
            )
            .field(
                "contents[0..32]",
                &self
                    .0
                    .front()
                    .map(|b| b.slice(..(std::cmp::min(32, b.len())))),
            );
        fmt.finish()
    }
}

// The buffers can be large and hard to grok, print a summary instead.
impl std::fmt::Debug for UploadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fmt = f.debug_struct("UploadProgress");
        fmt.field("target_size", &self.target_size)
            .field("offset", &self.offset)
            .field("buffer_size", &self.buffer_size)
            .field("persisted_size", &self.persisted_size)
            .field("buffer", &Summary(&self.buffer))
            .field("remainder", &Summary(&self.remainder));
        fmt.finish()
    }
}

impl UploadProgress {
    fn new(target_size: usize) -> Self {
        let target_size = target_size.div_ceil(RESUMABLE_UPLOAD_QUANTUM) * RESUMABLE_UPLOAD_QUANTUM;
        let target_size = target_size.clamp(RESUMABLE_UPLOAD_QUANTUM, MAX_WRITE_CHUNK_BYTES);
        Self {
            target_size,
            ..Default::default()
        }
    }

    // This is only used in tests, to exercise small buffers.
    #[cfg(test)]
    fn fake(target_size: usize) -> Self {
        Self {
            target_size,
            ..Default::default()
        }
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    /// A freshly started session has a committed size of zero.
    fn session_started(&mut self) {
        self.persisted_size = Some(0);
    }

    /// True when the view of the committed size may be stale.
    fn needs_query(&self) -> bool {
        self.persisted_size.is_none_or(|x| x != self.offset)
    }

    /// True when the current buffer carries the last bytes of the payload.
    ///
    /// The buffer only comes up short when the source is exhausted and the
    /// remainder is drained.
    fn is_final(&self) -> bool {
        self.buffer_size < self.target_size
    }

    /// Fills the buffer for the next chunk, remainder first.
    async fn next_buffer<S>(&mut self, payload: &mut S) -> Result<()>
    where
        S: StreamingSource,
    {
        let mut buffer = VecDeque::new();
        let mut size = 0;
        let mut process_buffer = |mut b: bytes::Bytes| match b.len() {
            n if size + n > self.target_size => {
                let remainder = b.split_off(self.target_size - size);
                size = self.target_size;
                buffer.push_back(b);
                Some(Some(remainder))
            }
            n if size + n == self.target_size => {
                size = self.target_size;
                buffer.push_back(b);
                Some(None)
            }
            n => {
                size += n;
                buffer.push_back(b);
                None
            }
        };

        while let Some(b) = self.remainder.pop_front() {
            if let Some(r) = process_buffer(b) {
                r.into_iter().for_each(|b| self.remainder.push_front(b));
                self.buffer = buffer;
                self.buffer_size = size;
                return Ok(());
            }
        }

        while let Some(b) = payload.next().await.transpose().map_err(Error::source_err)? {
            if let Some(r) = process_buffer(b) {
                r.into_iter().for_each(|b| self.remainder.push_front(b));
                self.buffer = buffer;
                self.buffer_size = size;
                return Ok(());
            }
        }
        self.buffer = buffer;
        self.buffer_size = size;
        Ok(())
    }

    /// The buffered bytes as one contiguous chunk payload.
    fn chunk_data(&self) -> bytes::Bytes {
        match self.buffer.len() {
            0 => bytes::Bytes::new(),
            1 => self.buffer[0].clone(),
            _ => {
                let mut all = Vec::with_capacity(self.buffer_size);
                self.buffer.iter().for_each(|b| all.extend_from_slice(b));
                bytes::Bytes::from_owner(all)
            }
        }
    }

    /// Reconciles with the authoritative committed size.
    ///
    /// Bytes the service already persisted are dropped from the buffer; the
    /// rest goes back to the remainder to be resent from the new offset.
    fn handle_partial(&mut self, persisted_size: u64) -> Result<()> {
        let consumed = match (self.offset, self.buffer_size as u64, persisted_size) {
            (o, _, p) if p < o => {
                return Err(crate::error::ProtocolError::UnexpectedRewind {
                    offset: o,
                    persisted: p,
                }
                .into());
            }
            (o, n, p) if p <= o + n => (p - o) as usize,
            (o, n, p) => {
                return Err(crate::error::ProtocolError::TooMuchProgress {
                    sent: o + n,
                    persisted: p,
                }
                .into());
            }
        };
        let mut skip = consumed;
        self.persisted_size = Some(persisted_size);
        self.offset = persisted_size;
        self.remainder = self
            .buffer
            .drain(0..)
            .filter_map(|mut b| match (skip, b.len()) {
                (0, _) => Some(b),
                (s, n) if s >= n => {
                    skip -= n;
                    None
                }
                (s, n) => {
                    skip = 0;
                    Some(b.split_off(n - s))
                }
            })
            .chain(self.remainder.drain(0..))
            .collect();
        self.buffer_size = 0_usize;
        Ok(())
    }

    /// After a failure with unknown outcome the committed size is stale.
    fn handle_error(&mut self) {
        self.persisted_size = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::session::SessionManager;
    use crate::streaming_source::IterSource;
    use test_case::test_case;

    type Result = anyhow::Result<()>;

    fn new_line_string(i: i32, len: usize) -> String {
        let data = String::from_iter(('a'..='z').cycle().take(len - 22 - 2));
        format!("{i:022} {data}\n")
    }

    fn new_line(i: i32, len: usize) -> bytes::Bytes {
        bytes::Bytes::from_owner(new_line_string(i, len))
    }

    #[test_case(0, RESUMABLE_UPLOAD_QUANTUM)]
    #[test_case(RESUMABLE_UPLOAD_QUANTUM / 2, RESUMABLE_UPLOAD_QUANTUM)]
    #[test_case(RESUMABLE_UPLOAD_QUANTUM, RESUMABLE_UPLOAD_QUANTUM)]
    #[test_case(RESUMABLE_UPLOAD_QUANTUM * 2 + 1, RESUMABLE_UPLOAD_QUANTUM * 3)]
    #[test_case(usize::MAX / 2, MAX_WRITE_CHUNK_BYTES; "clamped to the chunk limit")]
    fn rounding(input: usize, want: usize) {
        let progress = UploadProgress::new(input);
        assert_eq!(progress.target_size, want, "{progress:?}");
    }

    #[test]
    fn progress_debug_is_a_summary() {
        let mut progress = UploadProgress::fake(1000);
        progress.buffer.push_back(new_line(0, 1000));
        let dbg = format!("{progress:?}");
        assert!(dbg.contains("buffer"), "{dbg}");
        assert!(dbg.contains("remainder"), "{dbg}");
        assert!(dbg.len() < 1000, "dbg is too long: '{dbg}'");
    }

    #[test]
    fn query_needed_until_session_starts() {
        let mut progress = UploadProgress::fake(256);
        assert!(progress.needs_query(), "{progress:?}");
        progress.session_started();
        assert!(!progress.needs_query(), "{progress:?}");
        progress.handle_error();
        assert!(progress.needs_query(), "{progress:?}");
    }

    #[tokio::test]
    async fn next_buffer_success() -> Result {
        const LEN: usize = 32;
        let mut payload = IterSource::new((0..5).map(|i| new_line(i, LEN)));

        let mut progress = UploadProgress::fake(LEN * 2);
        progress.next_buffer(&mut payload).await?;
        assert!(progress.remainder.is_empty(), "{progress:?}");
        assert_eq!(progress.buffer, vec![new_line(0, LEN), new_line(1, LEN)]);
        assert_eq!(progress.buffer_size, 2 * LEN);
        assert!(!progress.is_final(), "{progress:?}");

        progress.handle_partial(2 * LEN as u64)?;
        progress.next_buffer(&mut payload).await?;
        assert_eq!(progress.buffer, vec![new_line(2, LEN), new_line(3, LEN)]);

        progress.handle_partial(4 * LEN as u64)?;
        progress.next_buffer(&mut payload).await?;
        assert_eq!(progress.buffer, vec![new_line(4, LEN)]);
        assert_eq!(progress.buffer_size, LEN);
        assert!(progress.is_final(), "{progress:?}");
        Ok(())
    }

    #[tokio::test]
    async fn next_buffer_split() -> Result {
        const LEN: usize = 32;
        let mut payload = IterSource::new((0..5).map(|i| new_line(i, LEN)));

        let mut progress = UploadProgress::fake(LEN * 2 + LEN / 2);
        progress.next_buffer(&mut payload).await?;
        assert_eq!(
            progress.remainder,
            vec![new_line(2, LEN).split_off(LEN / 2)]
        );
        assert_eq!(
            progress.buffer,
            vec![
                new_line(0, LEN),
                new_line(1, LEN),
                new_line(2, LEN).split_to(LEN / 2)
            ]
        );
        assert_eq!(progress.buffer_size, 2 * LEN + LEN / 2);

        progress.handle_partial(progress.buffer_size as u64)?;
        progress.next_buffer(&mut payload).await?;
        assert!(progress.remainder.is_empty(), "{progress:?}");
        assert_eq!(
            progress.buffer,
            vec![
                new_line(2, LEN).split_off(LEN / 2),
                new_line(3, LEN),
                new_line(4, LEN)
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn next_buffer_done() -> Result {
        const LEN: usize = 32;
        let mut payload = IterSource::new((0..2).map(|i| new_line(i, LEN)));

        let mut progress = UploadProgress::fake(4 * LEN);
        progress.next_buffer(&mut payload).await?;
        assert_eq!(progress.buffer_size, 2 * LEN);
        assert!(progress.is_final(), "{progress:?}");

        progress.handle_partial(2 * LEN as u64)?;
        progress.next_buffer(&mut payload).await?;
        assert!(progress.buffer.is_empty(), "{progress:?}");
        assert_eq!(progress.chunk_data(), bytes::Bytes::new());
        Ok(())
    }

    #[test]
    fn chunk_data_concatenates() {
        let mut progress = UploadProgress::fake(256);
        progress.buffer.push_back(bytes::Bytes::from_static(b"abc"));
        progress.buffer.push_back(bytes::Bytes::from_static(b"def"));
        progress.buffer_size = 6;
        assert_eq!(progress.chunk_data(), bytes::Bytes::from_static(b"abcdef"));
    }

    #[tokio::test]
    async fn handle_partial_keeps_unpersisted_bytes() -> Result {
        const LEN: usize = 32;
        let mut payload = IterSource::new((0..8).map(|i| new_line(i, LEN)));

        let mut progress = UploadProgress::fake(2 * LEN);
        progress.next_buffer(&mut payload).await?;
        // The service only persisted half of the chunk.
        progress.handle_partial(LEN as u64)?;
        assert_eq!(progress.persisted_size, Some(LEN as u64));
        assert_eq!(progress.offset, LEN as u64);
        assert!(progress.buffer.is_empty(), "{progress:?}");
        assert_eq!(progress.remainder, vec![new_line(1, LEN)]);
        Ok(())
    }

    #[tokio::test]
    async fn handle_partial_too_much_progress() -> Result {
        const LEN: usize = 32;
        let mut payload = IterSource::new((0..8).map(|i| new_line(i, LEN)));

        let mut progress = UploadProgress::fake(2 * LEN);
        progress.next_buffer(&mut payload).await?;
        let err = progress
            .handle_partial(4 * LEN as u64)
            .expect_err("too much progress should cause errors");
        assert!(
            matches!(
                err,
                Error::Protocol(ProtocolError::TooMuchProgress { sent, persisted })
                    if sent == 2 * LEN as u64 && persisted == 4 * LEN as u64
            ),
            "{err:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn handle_partial_rewind() -> Result {
        const LEN: usize = 32;
        let mut payload = IterSource::new((0..8).map(|i| new_line(i, LEN)));

        let mut progress = UploadProgress::fake(2 * LEN);
        progress.next_buffer(&mut payload).await?;
        progress.handle_partial(2 * LEN as u64)?;

        progress.next_buffer(&mut payload).await?;
        let err = progress
            .handle_partial(LEN as u64)
            .expect_err("rewind should cause errors");
        assert!(
            matches!(
                err,
                Error::Protocol(ProtocolError::UnexpectedRewind { offset, persisted })
                    if offset == 2 * LEN as u64 && persisted == LEN as u64
            ),
            "{err:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn upload_small() -> Result {
        let client = UploadClient::new(SessionManager::new());
        let object = client
            .upload_object("test-bucket", "test-object", "hello world")
            .send()
            .await?;
        assert_eq!(object.bucket, "test-bucket");
        assert_eq!(object.name, "test-object");
        assert_eq!(object.size, 11);
        assert_eq!(object.checksums.crc32c, Some(crc32c::crc32c(b"hello world")));
        Ok(())
    }

    #[tokio::test]
    async fn upload_empty() -> Result {
        let client = UploadClient::new(SessionManager::new());
        let object = client
            .upload_object("test-bucket", "empty", bytes::Bytes::new())
            .send()
            .await?;
        assert_eq!(object.size, 0);
        Ok(())
    }

    #[tokio::test]
    async fn upload_multiple_chunks() -> Result {
        // A payload larger than one chunk, not a multiple of the chunk size.
        let payload: Vec<bytes::Bytes> =
            (0..5).map(|i| new_line(i, RESUMABLE_UPLOAD_QUANTUM / 2 + 64)).collect();
        let want_size = payload.iter().fold(0_u64, |s, b| s + b.len() as u64);
        let want_crc = payload
            .iter()
            .fold(0_u32, |c, b| crc32c::crc32c_append(c, b));

        let manager = Arc::new(SessionManager::new());
        let client: UploadClient<SessionManager> = UploadClient::new(manager.clone());
        let object = client
            .upload_object("test-bucket", "big", payload)
            .with_chunk_size(RESUMABLE_UPLOAD_QUANTUM)
            .send()
            .await?;
        assert_eq!(object.size, want_size);
        assert_eq!(object.checksums.crc32c, Some(want_crc));
        Ok(())
    }

    #[tokio::test]
    async fn upload_exact_chunk_multiple() -> Result {
        // The payload fills the last chunk exactly, forcing an empty finish
        // chunk.
        let payload = vec![bytes::Bytes::from_owner(vec![
            42_u8;
            2 * RESUMABLE_UPLOAD_QUANTUM
        ])];
        let client = UploadClient::new(SessionManager::new());
        let object = client
            .upload_object("test-bucket", "aligned", payload)
            .with_chunk_size(RESUMABLE_UPLOAD_QUANTUM)
            .send()
            .await?;
        assert_eq!(object.size, 2 * RESUMABLE_UPLOAD_QUANTUM as u64);
        Ok(())
    }

    #[tokio::test]
    async fn upload_precondition_failure() -> Result {
        let manager = Arc::new(SessionManager::new());
        let client: UploadClient<SessionManager> = UploadClient::new(manager.clone());
        client
            .upload_object("test-bucket", "test-object", "v1")
            .send()
            .await?;
        let err = client
            .upload_object("test-bucket", "test-object", "v2")
            .with_if_generation_match(0)
            .send()
            .await
            .expect_err("object already exists");
        assert!(matches!(err, Error::PreconditionFailed(_)), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn upload_source_failure() -> Result {
        #[derive(Debug)]
        struct FailingSource;
        impl StreamingSource for FailingSource {
            type Error = std::io::Error;
            async fn next(&mut self) -> Option<std::result::Result<bytes::Bytes, Self::Error>> {
                Some(Err(std::io::Error::other("payload read failed")))
            }
        }

        let client = UploadClient::new(SessionManager::new());
        let err = client
            .upload_object("test-bucket", "test-object", FailingSource)
            .send()
            .await
            .expect_err("the source always fails");
        assert!(matches!(err, Error::Source(_)), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn list_uploads_via_paginator() -> Result {
        use futures::StreamExt as _;
        let manager = Arc::new(SessionManager::new());
        for i in 0..5 {
            manager
                .start_resumable_write(WriteObjectSpec::new("test-bucket", format!("o-{i}")))
                .await?;
        }
        let client: UploadClient<SessionManager> = UploadClient::new(manager);
        let mut names = Vec::new();
        let mut pages = 0;
        let mut paginator = client.list_uploads(ListUploadsRequest::new().set_page_size(2));
        while let Some(page) = paginator.next().await {
            let page = page?;
            names.extend(page.uploads.into_iter().map(|u| u.name));
            pages += 1;
        }
        assert_eq!(pages, 3);
        names.sort();
        assert_eq!(names, ["o-0", "o-1", "o-2", "o-3", "o-4"]);
        assert!(paginator.next().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn upload_operation_poll_and_cancel() -> Result {
        let manager = Arc::new(SessionManager::new());
        let client: UploadClient<SessionManager> = UploadClient::new(manager.clone());
        let id = manager
            .start_resumable_write(WriteObjectSpec::new("test-bucket", "test-object"))
            .await?;
        manager
            .write_object_chunk(&id, Chunk::new(0, bytes::Bytes::from_static(b"abc")))
            .await?;

        let mut poller = client.upload_operation(id);
        let r = poller.poll().await;
        assert!(
            matches!(r, Some(crate::operation::PollingResult::InProgress(Some(3)))),
            "{r:?}"
        );
        poller.cancel().await?;
        let err = manager.query_write_status(&id).await.expect_err("cancelled");
        assert!(matches!(err, Error::NotFound), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn upload_operation_until_done() -> Result {
        let manager = Arc::new(SessionManager::new());
        let client: UploadClient<SessionManager> = UploadClient::new(manager.clone());
        let id = manager
            .start_resumable_write(WriteObjectSpec::new("test-bucket", "test-object"))
            .await?;
        manager
            .write_object_chunk(
                &id,
                Chunk::new(0, bytes::Bytes::from_static(b"abc")).set_finish(true),
            )
            .await?;
        let object = client.upload_operation(id).until_done().await?;
        assert_eq!(object.size, 3);
        Ok(())
    }
}
