//! GStreamer-based muted analysis decode feeding a frame sink

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::capture::engine::{EngineError, EngineSignal, MediaSource, PlaybackClock, PlaybackEngine};
use crate::capture::frame::FrameLayout;
use crate::capture::sink::FrameSink;
use crate::GStreamerConfig;

const PULL_TIMEOUT_MS: u64 = 50;

/// Decodes the media with `playbin`, audio muted, video converted and scaled
/// to the analysis layout and pulled from an appsink on a worker thread.
pub struct GstCapture {
    playbin: gst::Pipeline,
    config: GStreamerConfig,
    halt: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl GstCapture {
    pub fn new(config: GStreamerConfig) -> Result<Self, EngineError> {
        gst::init().map_err(|e| backend("failed to initialize GStreamer", e))?;

        let playbin = gst::ElementFactory::make("playbin")
            .name("autoskip-analysis")
            .build()
            .map_err(|e| backend("failed to create playbin", e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| EngineError::Backend("playbin is not a pipeline".into()))?;

        Ok(Self {
            playbin,
            config,
            halt: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    /// Position of the analysis decode. Stands in for the primary player's
    /// clock when there is no separate visible player.
    pub fn clock(&self) -> Arc<dyn PlaybackClock> {
        Arc::new(GstClock {
            pipeline: self.playbin.clone(),
        })
    }

    fn build_video_sink(&self, layout: FrameLayout) -> String {
        format!(
            "videoconvert ! \
             videoscale ! \
             video/x-raw,format=RGBA,width={},height={} ! \
             appsink name=grabsink sync={} max-buffers={} drop=false emit-signals=false",
            layout.width, layout.height, self.config.sync, self.config.max_buffers
        )
    }

    fn uri(source: &MediaSource) -> Result<String, EngineError> {
        match source {
            MediaSource::Uri(uri) => Ok(uri.clone()),
            MediaSource::Path(path) => {
                let absolute = std::fs::canonicalize(path)
                    .map_err(|e| EngineError::Source(format!("{}: {}", path.display(), e)))?;
                gst::glib::filename_to_uri(&absolute, None)
                    .map(|uri| uri.to_string())
                    .map_err(|e| EngineError::Source(format!("{}: {}", absolute.display(), e)))
            }
        }
    }
}

impl PlaybackEngine for GstCapture {
    fn start(
        &mut self,
        source: &MediaSource,
        sink: FrameSink,
        signal: EngineSignal,
    ) -> Result<(), EngineError> {
        let layout = sink.layout();
        let uri = Self::uri(source)?;

        let description = self.build_video_sink(layout);
        info!("Analysis sink: {}", description);
        let video_sink = gst::parse::bin_from_description(&description, true)
            .map_err(|e| backend("failed to build video sink", e))?;
        let appsink = video_sink
            .by_name("grabsink")
            .ok_or_else(|| EngineError::Backend("failed to find appsink element".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| EngineError::Backend("failed to cast to AppSink".into()))?;
        let audio_sink = gst::ElementFactory::make("fakesink")
            .build()
            .map_err(|e| backend("failed to create fakesink", e))?;

        self.playbin.set_property("uri", uri.as_str());
        self.playbin.set_property("mute", true);
        self.playbin.set_property("audio-sink", &audio_sink);
        self.playbin
            .set_property("video-sink", video_sink.upcast_ref::<gst::Element>());

        let bus = self
            .playbin
            .bus()
            .ok_or_else(|| EngineError::Backend("pipeline has no bus".into()))?;

        info!("Starting analysis decode of {}", uri);
        if let Err(e) = self.playbin.set_state(gst::State::Playing) {
            let _ = self.playbin.set_state(gst::State::Null);
            return Err(EngineError::Backend(format!("failed to start pipeline: {:?}", e)));
        }

        self.halt.store(false, Ordering::Release);
        let pump = Pump {
            appsink,
            bus,
            sink,
            signal,
            halt: Arc::clone(&self.halt),
        };
        let worker = std::thread::Builder::new()
            .name("autoskip-decode".into())
            .spawn(move || pump.run());
        match worker {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                let _ = self.playbin.set_state(gst::State::Null);
                Err(backend("failed to spawn decode thread", e))
            }
        }
    }

    fn stop(&mut self) {
        self.halt.store(true, Ordering::Release);
        if let Err(e) = self.playbin.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
        // The frame sink lives on the worker; joining releases it
        if let Some(worker) = self.worker.take() {
            info!("Stopping analysis decode");
            if worker.join().is_err() {
                warn!("Decode thread panicked");
            }
        }
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pulls decoded samples into the frame sink and watches the bus.
struct Pump {
    appsink: gst_app::AppSink,
    bus: gst::Bus,
    sink: FrameSink,
    signal: EngineSignal,
    halt: Arc<AtomicBool>,
}

impl Pump {
    fn run(mut self) {
        let timeout = gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS);

        while !self.halt.load(Ordering::Acquire) && self.signal.is_active() {
            if !self.poll_bus() {
                return;
            }
            if let Some(sample) = self.appsink.try_pull_sample(timeout) {
                deliver(&sample, &mut self.sink);
            }
        }
        debug!("Decode thread exiting");
    }

    /// Returns false once the decode is over.
    fn poll_bus(&mut self) -> bool {
        use gst::MessageView;

        while let Some(msg) = self.bus.pop() {
            match msg.view() {
                MessageView::Eos(..) => {
                    // Samples still buffered in the appsink precede the EOS
                    while let Some(sample) = self.appsink.try_pull_sample(gst::ClockTime::ZERO) {
                        deliver(&sample, &mut self.sink);
                    }
                    self.signal.end_of_stream();
                    return false;
                }
                MessageView::Error(err) => {
                    self.signal.failed(format!(
                        "error from {:?}: {} ({:?})",
                        err.src().map(|s| s.path_string()),
                        err.error(),
                        err.debug()
                    ));
                    return false;
                }
                MessageView::Warning(warning) => {
                    warn!(
                        "Warning from {:?}: {} ({:?})",
                        warning.src().map(|s| s.path_string()),
                        warning.error(),
                        warning.debug()
                    );
                }
                _ => {}
            }
        }
        true
    }
}

/// Copy one sample row by row into a locked frame, honouring both strides.
fn deliver(sample: &gst::Sample, sink: &mut FrameSink) {
    let Some(buffer) = sample.buffer() else {
        return;
    };
    let Ok(map) = buffer.map_readable() else {
        debug!("Failed to map buffer, skipping frame");
        return;
    };

    let layout = sink.layout();
    let row_bytes = layout.row_bytes();
    let src_stride = sample
        .caps()
        .and_then(|caps| gst_video::VideoInfo::from_caps(caps).ok())
        .and_then(|info| info.stride().first().map(|&s| s as usize))
        .filter(|&s| s >= row_bytes)
        .unwrap_or(row_bytes);
    let src = map.as_slice();

    let Some(dest) = sink.lock() else {
        return;
    };
    for y in 0..layout.height as usize {
        let from = y * src_stride;
        let to = y * layout.stride as usize;
        if from + row_bytes > src.len() {
            break;
        }
        dest[to..to + row_bytes].copy_from_slice(&src[from..from + row_bytes]);
    }
    sink.display();
}

struct GstClock {
    pipeline: gst::Pipeline,
}

impl PlaybackClock for GstClock {
    fn time_ms(&self) -> i64 {
        self.pipeline
            .query_position::<gst::ClockTime>()
            .map(|position| position.mseconds() as i64)
            .unwrap_or(-1)
    }
}

fn backend(context: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::Backend(format!("{}: {}", context, err))
}
