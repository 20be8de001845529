//! Upstream transport, retry policy, SSE streaming, anti-truncation loop, and
//! fake-streaming synthesis (spec §4.2). Sits above `gw-transform` (pure
//! translation) and below `gw-admin` (HTTP surface wiring): this crate owns
//! everything about *talking to* the upstream and shaping the bytes that come
//! back, but not the inbound request/response mapping itself.

mod anti_trunc_loop;
mod error;
mod fake_stream;
mod pipeline;
mod retry;
mod sse;
mod traffic;
mod transport;

pub use anti_trunc_loop::{needs_continuation, run_anti_truncation};
pub use error::{ProxyError, ProxyResult};
pub use fake_stream::{format_sse_frame, synthesize_fake_stream_chunks, DONE_FRAME};
pub use pipeline::{extract_text_from_sse, StreamStats};
pub use retry::{backoff_delay, send_with_retry};
pub use sse::{parse_sse_line, SseEvent, SseLineSplitter, INITIAL_BUFFER_BYTES, MAX_BUFFER_BYTES};
pub use traffic::{NoopTrafficSink, TrafficSink};
pub use transport::{
    HttpMethod, ReqwestTransport, TransportTimeouts, UpstreamBody, UpstreamRequest,
    UpstreamResponse, UpstreamTransport,
};
