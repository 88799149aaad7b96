//! Seam towards the host bridge: event payloads and sinks

mod messages;
mod sink;

pub use messages::{AnalysisEvent, AnalysisPayload, ErrorPayload};
pub use sink::{ChannelSink, EventSink, PooledPayload, SinkError, MAX_SPECTRUM_BINS};
