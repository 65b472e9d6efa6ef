//! Resumable chunked-upload client.
//!
//! Splits a file into fixed-size chunks, sends them strictly sequentially to
//! an upload server, resumes from the server-reported offset, and honors
//! pause and cancel signals mid-transfer. Progress is reported as a stream of
//! [`UploadEvent`]s.

pub mod client;
pub mod session;

pub use client::{
    DEFAULT_CHUNK_SIZE_BYTES, FILE_NAME_HEADER, FILE_OFFSET_HEADER, UploadClient, UploadEvent,
    UploadProgress, UploadStatus, chunk_count, resume_chunk_index,
};
pub use session::{PauseGate, SessionRegistry, UploadSession, UploadState};
