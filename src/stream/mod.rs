//! Decoding and accumulation of the upstream agent's event stream.
//!
//! Lines flow through [`EventFrameDecoder`] into [`ResponseAccumulator`],
//! driven by [`TimeBoundedStreamReader`] under a per-attempt deadline.

mod accumulator;
mod decoder;
mod events;
mod reader;

pub use accumulator::ResponseAccumulator;
pub use decoder::{EventFrameDecoder, END_OF_STREAM_MARKER};
pub use events::{ClientEvent, StreamEvent};
pub use reader::{ReadOutcome, ReadStep, TimeBoundedStreamReader};
