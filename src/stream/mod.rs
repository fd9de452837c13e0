//! Live streaming: the per-session pump, the shared hub, and multipart framing.

pub mod hub;
pub mod multipart;
pub mod pump;
pub mod session;

pub use hub::{FrameHub, Relayed, SourceFactory, Subscription};
pub use multipart::{
    encode_part, ChunkedWriter, FrameSink, MultipartWriter, BOUNDARY, PART_HEADER,
    STREAM_CONTENT_TYPE,
};
pub use pump::{ExitReason, PumpReport, PumpSettings, SessionState, StreamPump};
pub use session::{SessionSummary, StreamSession};
