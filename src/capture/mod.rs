pub mod allocator;
pub mod engine;
pub mod frame;
pub mod sink;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;

pub use allocator::{AnonymousRegions, BufferLedger, FrameAllocator, RegionSource};
pub use engine::{EngineError, EngineSignal, MediaSource, PlaybackClock, PlaybackEngine};
pub use frame::{FrameBuffer, FrameLayout, PixelFormat, RgbaView};
pub use sink::FrameSink;

#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstCapture;
