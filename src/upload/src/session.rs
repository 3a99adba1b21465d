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

//! The authoritative side of the resumable upload protocol.

use crate::checksum::{self, Crc32c};
use crate::model::{
    Chunk, ListUploadsPage, ListUploadsRequest, MAX_WRITE_CHUNK_BYTES, Object, SessionId,
    UploadSummary, WriteObjectSpec, WriteStatus,
};
use crate::stub::ResumableStore;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Unfinalized sessions are reaped after a week, matching common practice
/// for resumable upload services.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const DEFAULT_PAGE_SIZE: i32 = 100;
const MAX_PAGE_SIZE: i32 = 1000;

const MAX_OBJECT_NAME_BYTES: usize = 1024;

/// Owns the lifecycle of resumable upload sessions.
///
/// This is the arbiter of the protocol contract: exact-offset chunk
/// acceptance, monotonic committed sizes, single finalization, and session
/// expiry. Bytes are applied under one lock, so a committed size never
/// reflects a torn range, and every operation is safe to invoke from any
/// number of concurrent callers.
///
/// The manager stores committed bytes in memory. A production deployment
/// would replace the backing store with a durable one; the protocol contract
/// is unchanged.
#[derive(Debug)]
pub struct SessionManager {
    state: Mutex<State>,
    ttl: Duration,
}

#[derive(Debug, Default)]
struct State {
    sessions: BTreeMap<SessionId, UploadSession>,
    /// Finalized objects, keyed by (bucket, name).
    objects: HashMap<(String, String), Object>,
    /// Committed bytes per session. Entries outlive session expiry: expiry
    /// discards only the session handle, never durable bytes.
    store: HashMap<SessionId, Vec<bytes::Bytes>>,
}

#[derive(Debug)]
struct UploadSession {
    spec: WriteObjectSpec,
    committed: u64,
    checksum: Crc32c,
    /// Set on finalization; a finalized session no longer expires.
    result: Option<Object>,
    deadline: Instant,
}

impl UploadSession {
    fn status(&self) -> WriteStatus {
        match &self.result {
            Some(object) => WriteStatus::Finalized(Box::new(object.clone())),
            None => WriteStatus::Partial(self.committed),
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            ttl: DEFAULT_SESSION_TTL,
        }
    }

    /// Overrides the expiry deadline applied to unfinalized sessions.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The finalized object at the destination, if any.
    pub fn object(&self, bucket: &str, name: &str) -> Option<Object> {
        let state = self.lock();
        state
            .objects
            .get(&(bucket.to_string(), name.to_string()))
            .cloned()
    }

    /// The bytes committed for a session, concatenated.
    ///
    /// Remains available after the session handle expires.
    pub fn committed_bytes(&self, id: &SessionId) -> Option<bytes::Bytes> {
        let state = self.lock();
        state.store.get(id).map(|parts| {
            let mut all = Vec::with_capacity(parts.iter().map(bytes::Bytes::len).sum());
            parts.iter().for_each(|b| all.extend_from_slice(b));
            bytes::Bytes::from_owner(all)
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            // The lock protects no invariants across panics that poisoning
            // could preserve; keep serving.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn validate_spec(spec: &WriteObjectSpec) -> Result<()> {
        if spec.bucket.is_empty() {
            return Err(Error::InvalidArgument("bucket must not be empty".into()));
        }
        if spec.name.is_empty() {
            return Err(Error::InvalidArgument("object name must not be empty".into()));
        }
        if spec.name.len() > MAX_OBJECT_NAME_BYTES {
            return Err(Error::InvalidArgument(format!(
                "object name exceeds {MAX_OBJECT_NAME_BYTES} bytes"
            )));
        }
        Ok(())
    }

    fn check_preconditions(state: &State, spec: &WriteObjectSpec) -> Result<()> {
        let current = state
            .objects
            .get(&(spec.bucket.clone(), spec.name.clone()));
        // Generation 0 means "the object does not exist".
        let generation = current.map_or(0, |o| o.generation);
        let metageneration = current.map_or(0, |o| o.metageneration);
        if let Some(v) = spec.if_generation_match
            && v != generation
        {
            return Err(Error::PreconditionFailed(format!(
                "generation is {generation}, expected {v}"
            )));
        }
        if let Some(v) = spec.if_generation_not_match
            && v == generation
        {
            return Err(Error::PreconditionFailed(format!(
                "generation must not be {v}"
            )));
        }
        if let Some(v) = spec.if_metageneration_match
            && v != metageneration
        {
            return Err(Error::PreconditionFailed(format!(
                "metageneration is {metageneration}, expected {v}"
            )));
        }
        if let Some(v) = spec.if_metageneration_not_match
            && v == metageneration
        {
            return Err(Error::PreconditionFailed(format!(
                "metageneration must not be {v}"
            )));
        }
        Ok(())
    }

    /// Looks up a session, reaping it first if its deadline has passed.
    ///
    /// Expiry discards the session handle only. Committed bytes remain in
    /// the store so resumption state is never silently rolled back for
    /// observers holding the raw data.
    fn live_session<'a>(
        sessions: &'a mut BTreeMap<SessionId, UploadSession>,
        id: &SessionId,
    ) -> Result<&'a mut UploadSession> {
        let expired = match sessions.get(id) {
            None => return Err(Error::NotFound),
            Some(s) => s.result.is_none() && s.deadline <= Instant::now(),
        };
        if expired {
            sessions.remove(id);
            tracing::debug!(%id, "upload session expired");
            return Err(Error::NotFound);
        }
        sessions.get_mut(id).ok_or(Error::NotFound)
    }

    fn write_chunk_impl(&self, id: &SessionId, chunk: Chunk) -> Result<WriteStatus> {
        let mut state = self.lock();
        let state = &mut *state;
        let session = Self::live_session(&mut state.sessions, id)?;
        if let Some(object) = &session.result {
            return Err(Error::AlreadyFinalized {
                committed: object.size,
            });
        }
        if chunk.data.len() > MAX_WRITE_CHUNK_BYTES {
            return Err(Error::InvalidArgument(format!(
                "chunk of {} bytes exceeds the {MAX_WRITE_CHUNK_BYTES} byte limit",
                chunk.data.len()
            )));
        }
        if chunk.object_checksums.is_some() && !chunk.finish {
            return Err(Error::InvalidArgument(
                "object checksums may only accompany the finish chunk".into(),
            ));
        }
        if chunk.offset != session.committed {
            return Err(Error::OffsetMismatch {
                offset: chunk.offset,
                committed: session.committed,
            });
        }

        // Fold the chunk into a copy of the accumulator first: a checksum
        // mismatch must reject the write without mutating the session.
        let mut checksum = session.checksum.clone();
        checksum.update(chunk.offset, &chunk.data);
        let computed = checksum.finalize();
        if let Some(expected) = &chunk.object_checksums {
            checksum::validate(expected, &computed)?;
        }

        if !chunk.data.is_empty() {
            state.store.entry(*id).or_default().push(chunk.data.clone());
        }
        session.checksum = checksum;
        session.committed += chunk.data.len() as u64;

        if !chunk.finish {
            return Ok(WriteStatus::Partial(session.committed));
        }

        let key = (session.spec.bucket.clone(), session.spec.name.clone());
        let generation = state.objects.get(&key).map_or(0, |o| o.generation) + 1;
        let object = Object {
            bucket: session.spec.bucket.clone(),
            name: session.spec.name.clone(),
            generation,
            metageneration: 1,
            size: session.committed,
            checksums: computed,
        };
        state.objects.insert(key, object.clone());
        session.result = Some(object.clone());
        tracing::debug!(%id, size = object.size, generation, "upload finalized");
        Ok(WriteStatus::Finalized(Box::new(object)))
    }

    fn list_uploads_impl(&self, req: ListUploadsRequest) -> Result<ListUploadsPage> {
        let page_size = match req.page_size {
            v if v <= 0 => DEFAULT_PAGE_SIZE,
            v => v.min(MAX_PAGE_SIZE),
        } as usize;
        let start = match req.page_token.as_str() {
            "" => Bound::Unbounded,
            token => {
                let id = token
                    .parse::<SessionId>()
                    .map_err(|e| Error::InvalidArgument(format!("malformed page token: {e}")))?;
                Bound::Excluded(id)
            }
        };

        let mut state = self.lock();
        let now = Instant::now();
        let reap: Vec<SessionId> = state
            .sessions
            .iter()
            .filter(|(_, s)| s.result.is_none() && s.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in reap {
            state.sessions.remove(&id);
            tracing::debug!(%id, "upload session expired");
        }

        let mut uploads = Vec::new();
        let mut next_page_token = String::new();
        for (id, session) in state.sessions.range((start, Bound::Unbounded)) {
            if uploads.len() == page_size {
                next_page_token = uploads
                    .last()
                    .map(|u: &UploadSummary| u.id.to_string())
                    .unwrap_or_default();
                break;
            }
            uploads.push(UploadSummary {
                id: *id,
                bucket: session.spec.bucket.clone(),
                name: session.spec.name.clone(),
                persisted_size: session.committed,
                finalized: session.result.is_some(),
            });
        }
        Ok(ListUploadsPage {
            uploads,
            next_page_token,
        })
    }
}

impl ResumableStore for SessionManager {
    async fn start_resumable_write(&self, spec: WriteObjectSpec) -> Result<SessionId> {
        Self::validate_spec(&spec)?;
        let mut state = self.lock();
        Self::check_preconditions(&state, &spec)?;
        let id = SessionId::new();
        let session = UploadSession {
            spec,
            committed: 0,
            checksum: Crc32c::new(),
            result: None,
            deadline: Instant::now() + self.ttl,
        };
        tracing::debug!(%id, bucket = %session.spec.bucket, name = %session.spec.name, "upload session started");
        state.sessions.insert(id, session);
        Ok(id)
    }

    async fn write_object_chunk(&self, id: &SessionId, chunk: Chunk) -> Result<WriteStatus> {
        self.write_chunk_impl(id, chunk)
    }

    async fn query_write_status(&self, id: &SessionId) -> Result<WriteStatus> {
        let mut state = self.lock();
        Self::live_session(&mut state.sessions, id).map(|s| s.status())
    }

    async fn cancel_resumable_write(&self, id: &SessionId) -> Result<()> {
        let mut state = self.lock();
        let session = Self::live_session(&mut state.sessions, id)?;
        if let Some(object) = &session.result {
            return Err(Error::AlreadyFinalized {
                committed: object.size,
            });
        }
        state.sessions.remove(id);
        // An explicit cancel, unlike expiry, discards the partial bytes.
        state.store.remove(id);
        tracing::debug!(%id, "upload session cancelled");
        Ok(())
    }

    async fn list_uploads(&self, req: ListUploadsRequest) -> Result<ListUploadsPage> {
        self.list_uploads_impl(req)
    }
}
