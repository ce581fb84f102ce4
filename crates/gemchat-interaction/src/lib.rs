//! Remote completion for gemchat: the SSE frame decoder and the Gemini
//! streaming client built on it.

pub mod gemini_stream_client;
pub mod sse;

pub use gemini_stream_client::GeminiStreamClient;
pub use sse::{Frame, FrameDecoder, FrameError};
