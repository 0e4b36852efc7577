//! Wire protocol: checksum, framing, stream reassembly, correlation and the
//! per-operation message catalog.

pub mod correlator;
pub mod crc;
pub mod frame;
pub mod message;
pub mod receiver;
pub mod transfer;

// Re-export common types
pub use correlator::{Correlator, Ticket};
pub use frame::{ESCAPE, Frame, SENTINEL};
pub use message::{Envelope, FileEntry, Operation, Request, Response, VersionInfo};
pub use receiver::{FrameEvent, FrameSink, Phase, Receiver};
pub use transfer::{Chunk, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, chunks, progress_percent};
