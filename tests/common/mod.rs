#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use autoskip::capture::{EngineError, FrameLayout};
use autoskip::{Config, EngineSignal, FrameSink, MediaSource, PlaybackClock, PlaybackEngine, ReferenceImage};
use image::{Rgba, RgbaImage};

pub const WIDTH: u32 = 16;
pub const HEIGHT: u32 = 8;
pub const BLUE: [u8; 4] = [0, 0, 255, 255];
pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const CLOCK_MS: i64 = 42_000;

/// Small analysis resolution, no decimation, and a queue large enough that
/// scripted runs never overflow it.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.analysis.width = WIDTH;
    config.analysis.height = HEIGHT;
    config.pipeline.decimation = 1;
    config.pipeline.queue_capacity = 64;
    config
}

pub fn solid_reference(rgba: [u8; 4]) -> ReferenceImage {
    ReferenceImage::from_rgba(RgbaImage::from_pixel(WIDTH, HEIGHT, Rgba(rgba)))
}

pub fn fixed_clock() -> Arc<dyn PlaybackClock> {
    Arc::new(|| CLOCK_MS)
}

pub fn source() -> MediaSource {
    MediaSource::parse("file:///media/episode01.mkv")
}

/// What the scripted decoder does once its frames run out.
#[derive(Debug, Clone, PartialEq)]
pub enum Ending {
    EndOfStream,
    Fail(String),
    /// Keep running without producing until stopped.
    HoldOpen,
}

#[derive(Debug, Default)]
pub struct EngineProbe {
    pub started: AtomicBool,
    pub stops: AtomicUsize,
    /// Set when the stop handshake was answered before timing out.
    pub stop_answered: AtomicBool,
}

impl EngineProbe {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stop_answered(&self) -> bool {
        self.stop_answered.load(Ordering::SeqCst)
    }
}

/// Lets a test hold `stop` until another task replies.
pub struct StopHandshake {
    pub stopping: flume::Sender<()>,
    pub answer: flume::Receiver<()>,
}

/// Plays a fixed list of solid-color frames on its own thread.
pub struct ScriptedEngine {
    frames: Vec<[u8; 4]>,
    ending: Ending,
    refuse_start: bool,
    frame_delay: Duration,
    halt: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    handshake: Option<StopHandshake>,
    pub probe: Arc<EngineProbe>,
}

impl ScriptedEngine {
    pub fn new(frames: Vec<[u8; 4]>, ending: Ending) -> Self {
        Self {
            frames,
            ending,
            refuse_start: false,
            frame_delay: Duration::from_millis(1),
            halt: Arc::new(AtomicBool::new(false)),
            worker: None,
            handshake: None,
            probe: Arc::new(EngineProbe::default()),
        }
    }

    pub fn with_stop_handshake(mut self, handshake: StopHandshake) -> Self {
        self.handshake = Some(handshake);
        self
    }

    pub fn refusing_to_start() -> Self {
        let mut engine = Self::new(Vec::new(), Ending::EndOfStream);
        engine.refuse_start = true;
        engine
    }
}

impl PlaybackEngine for ScriptedEngine {
    fn start(
        &mut self,
        source: &MediaSource,
        mut sink: FrameSink,
        signal: EngineSignal,
    ) -> Result<(), EngineError> {
        if self.refuse_start {
            return Err(EngineError::Source(format!("{}: no such file", source)));
        }
        self.probe.started.store(true, Ordering::SeqCst);

        let frames = self.frames.clone();
        let ending = self.ending.clone();
        let delay = self.frame_delay;
        let halt = self.halt.clone();

        self.worker = Some(std::thread::spawn(move || {
            for rgba in frames {
                if halt.load(Ordering::SeqCst) {
                    return;
                }
                let layout = sink.layout();
                if let Some(dest) = sink.lock() {
                    fill(dest, layout, rgba);
                    sink.display();
                }
                std::thread::sleep(delay);
            }

            match ending {
                Ending::EndOfStream => signal.end_of_stream(),
                Ending::Fail(reason) => signal.failed(reason),
                Ending::HoldOpen => {
                    while !halt.load(Ordering::SeqCst) {
                        std::thread::sleep(delay);
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.halt.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.join().expect("scripted engine thread panicked");
        }
        if let Some(handshake) = self.handshake.take() {
            let _ = handshake.stopping.send(());
            let answered = handshake.answer.recv_timeout(Duration::from_secs(2)).is_ok();
            self.probe.stop_answered.store(answered, Ordering::SeqCst);
        }
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
    }
}

fn fill(dest: &mut [u8], layout: FrameLayout, rgba: [u8; 4]) {
    for row in dest.chunks_exact_mut(layout.stride as usize).take(layout.height as usize) {
        for pixel in row[..layout.row_bytes()].chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
    }
}
