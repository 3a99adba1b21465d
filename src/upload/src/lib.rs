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

//! An offset-verified, resumable object upload protocol.
//!
//! Uploads proceed as a sequence of chunks against a server-side session.
//! Each chunk carries the offset the sender believes is committed; the
//! service accepts the chunk only on an exact match, so lost responses and
//! retries can never corrupt or duplicate data. After any failure with an
//! unknown outcome the sender queries the authoritative committed size and
//! resumes from there.
//!
//! [SessionManager][session::SessionManager] implements the service side of
//! the protocol in-process. [UploadClient] implements the producer side over
//! any [ResumableStore][stub::ResumableStore], including recovery, chunking,
//! and end-to-end CRC32C verification.
//!
//! # Example
//! ```
//! # use resumable_upload::{UploadClient, session::SessionManager};
//! # async fn sample() -> resumable_upload::Result<()> {
//! let client = UploadClient::new(SessionManager::new());
//! let object = client
//!     .upload_object("my-bucket", "my-object", "hello world")
//!     .send()
//!     .await?;
//! assert_eq!(object.size, 11);
//! # Ok(()) }
//! ```

mod error;
pub use error::{Error, ProtocolError, Result};

pub mod backoff;
pub mod checksum;
pub mod model;
pub mod operation;
pub mod paginator;
pub mod session;
pub mod streaming_source;
pub mod stub;

mod writer;
pub use writer::{RESUMABLE_UPLOAD_QUANTUM, UploadClient, UploadObject};
