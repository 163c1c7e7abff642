// SPDX-License-Identifier: MPL-2.0

//! GStreamer recording backend
//!
//! ```text
//! appsrc (RGBA) → queue → videoconvert → H.264 encoder → h264parse → queue ─┐
//!                                                                          ├→ mp4mux → filesink
//! autoaudiosrc → queue → audioconvert → audioresample → AAC encoder → queue ┘
//! ```
//!
//! Frames reach the `appsrc` either as an encoder input surface or through
//! [`FrameEncoder::encode`]; both paths push the same buffers. Stopping sends
//! EOS and waits for the muxer to finalize on a dedicated thread, which then
//! reports every track through its listener.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

use super::muxer::{
    EncoderListener, FrameEncoder, Muxer, MuxerFactory, TrackKind, VideoEncoderHandle,
    VideoEncoderKind,
};
use crate::backends::camera::format_converters;
use crate::backends::camera::types::{CameraFrame, FrameSink};
use crate::constants::{BitratePreset, timing};
use crate::errors::{RecordingError, RecordingResult};

/// H.264 encoders in preference order
const VIDEO_ENCODERS: [&str; 2] = ["x264enc", "openh264enc"];

/// AAC encoders in preference order
const AUDIO_ENCODERS: [&str; 3] = ["avenc_aac", "faac", "voaacenc"];

/// Nominal frame rate announced on the appsrc caps
const NOMINAL_FPS: i32 = 30;

fn make(factory: &str) -> RecordingResult<gst::Element> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|e| RecordingError::EncoderNotAvailable(format!("Failed to create {}: {}", factory, e)))
}

/// First installed element of a preference list
fn make_first(candidates: &[&str]) -> RecordingResult<gst::Element> {
    for name in candidates {
        if gst::ElementFactory::find(name).is_some() {
            debug!(encoder = name, "Selected encoder");
            return make(name);
        }
    }
    Err(RecordingError::EncoderNotAvailable(format!(
        "none of {:?} is installed",
        candidates
    )))
}

/// Creates GStreamer MP4 muxers
#[derive(Debug, Clone)]
pub struct GstMuxerFactory {
    bitrate_preset: BitratePreset,
}

impl GstMuxerFactory {
    pub fn new(bitrate_preset: BitratePreset) -> RecordingResult<Self> {
        gst::init().map_err(|e| {
            RecordingError::EncoderNotAvailable(format!("Failed to initialize GStreamer: {}", e))
        })?;
        Ok(Self { bitrate_preset })
    }

    /// Whether an H.264 and an AAC encoder are installed
    pub fn available_encoders() -> (Option<&'static str>, Option<&'static str>) {
        let video = VIDEO_ENCODERS
            .into_iter()
            .find(|name| gst::ElementFactory::find(name).is_some());
        let audio = AUDIO_ENCODERS
            .into_iter()
            .find(|name| gst::ElementFactory::find(name).is_some());
        (video, audio)
    }
}

impl MuxerFactory for GstMuxerFactory {
    fn create_muxer(&self, output_path: PathBuf) -> RecordingResult<Box<dyn Muxer>> {
        Ok(Box::new(GstMuxer::new(output_path, self.bitrate_preset)?))
    }
}

/// Video input feeding the pipeline's `appsrc`
struct GstFrameInput {
    appsrc: gst_app::AppSrc,
    width: u32,
    height: u32,
    pushed: AtomicU64,
}

impl GstFrameInput {
    fn push(&self, frame: &CameraFrame) {
        if frame.width != self.width || frame.height != self.height {
            warn!(
                frame_width = frame.width,
                frame_height = frame.height,
                width = self.width,
                height = self.height,
                "Dropping frame with unexpected size"
            );
            return;
        }
        let rgba = match format_converters::to_rgba(frame) {
            Ok(rgba) => rgba,
            Err(e) => {
                warn!(error = %e, "Failed to convert frame for encoding");
                return;
            }
        };
        if let Err(e) = self.appsrc.push_buffer(gst::Buffer::from_mut_slice(rgba)) {
            debug!(?e, "appsrc refused buffer");
            return;
        }
        let count = self.pushed.fetch_add(1, Ordering::Relaxed);
        if count % 300 == 0 {
            debug!(frame = count, "Frames pushed to encoder");
        }
    }
}

impl FrameSink for GstFrameInput {
    fn present(&self, frame: &CameraFrame) {
        self.push(frame);
    }
}

impl FrameEncoder for GstFrameInput {
    fn frame_available_soon(&self) {}

    fn encode(&self, frame: &CameraFrame) {
        self.push(frame);
    }
}

/// One MP4 recording
pub struct GstMuxer {
    pipeline: gst::Pipeline,
    mux: gst::Element,
    output_path: PathBuf,
    bitrate_preset: BitratePreset,
    listeners: Vec<(TrackKind, Arc<dyn EncoderListener>)>,
    started: bool,
    stopped: bool,
}

impl GstMuxer {
    fn new(output_path: PathBuf, bitrate_preset: BitratePreset) -> RecordingResult<Self> {
        let pipeline = gst::Pipeline::new();
        let mux = make("mp4mux")?;
        let sink = make("filesink")?;
        sink.set_property("location", output_path.to_string_lossy().as_ref());

        pipeline
            .add_many([&mux, &sink])
            .map_err(|e| RecordingError::PrepareFailed(format!("Failed to add muxer: {}", e)))?;
        mux.link(&sink)
            .map_err(|e| RecordingError::PrepareFailed(format!("Failed to link muxer: {}", e)))?;

        info!(output = %output_path.display(), "Created MP4 muxer");
        Ok(Self {
            pipeline,
            mux,
            output_path,
            bitrate_preset,
            listeners: Vec::new(),
            started: false,
            stopped: false,
        })
    }

    fn has_track(&self, track: TrackKind) -> bool {
        self.listeners.iter().any(|(kind, _)| *kind == track)
    }

    fn add_branch(&self, elements: &[&gst::Element]) -> RecordingResult<()> {
        self.pipeline
            .add_many(elements.iter().copied())
            .map_err(|e| RecordingError::PrepareFailed(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many(elements.iter().copied())
            .map_err(|e| RecordingError::PrepareFailed(format!("Failed to link elements: {}", e)))?;
        elements
            .last()
            .map(|last| last.link(&self.mux))
            .transpose()
            .map_err(|e| RecordingError::PrepareFailed(format!("Failed to link to muxer: {}", e)))?;
        Ok(())
    }

    /// Surface the first error posted on the bus, if any
    fn check_bus(&self, timeout: gst::ClockTime) -> RecordingResult<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        if let Some(msg) = bus.timed_pop_filtered(timeout, &[gst::MessageType::Error]) {
            if let gst::MessageView::Error(err) = msg.view() {
                error!(
                    error = %err.error(),
                    debug = ?err.debug(),
                    source = ?err.src().map(|s| s.name()),
                    "GStreamer error during start"
                );
                return Err(RecordingError::StartFailed(err.error().to_string()));
            }
        }
        Ok(())
    }
}

impl Muxer for GstMuxer {
    fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn add_video_encoder(
        &mut self,
        kind: VideoEncoderKind,
        width: u32,
        height: u32,
        listener: Arc<dyn EncoderListener>,
    ) -> RecordingResult<VideoEncoderHandle> {
        if self.has_track(TrackKind::Video) {
            return Err(RecordingError::PrepareFailed("video encoder already added".into()));
        }

        let appsrc = make("appsrc")?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| RecordingError::PrepareFailed("Failed to downcast to AppSrc".into()))?;
        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", gst::Fraction::new(NOMINAL_FPS, 1))
            .build();
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(true);
        appsrc.set_do_timestamp(true);

        let queue = make("queue")?;
        let convert = make("videoconvert")?;
        let encoder = make_first(&VIDEO_ENCODERS)?;
        let bitrate = self.bitrate_preset.bitrate_kbps(width, height);
        match encoder.factory().map(|f| f.name().to_string()).as_deref() {
            Some("x264enc") => {
                encoder.set_property_from_str("tune", "zerolatency");
                encoder.set_property_from_str("bitrate", &bitrate.to_string());
            }
            Some("openh264enc") => {
                encoder.set_property_from_str("bitrate", &(bitrate * 1000).to_string());
            }
            _ => {}
        }
        let parse = make("h264parse")?;
        let out_queue = make("queue")?;

        self.add_branch(&[appsrc.upcast_ref::<gst::Element>(), &queue, &convert, &encoder, &parse, &out_queue])?;
        info!(width, height, bitrate_kbps = bitrate, ?kind, "Added video encoder");

        let input = Arc::new(GstFrameInput {
            appsrc,
            width,
            height,
            pushed: AtomicU64::new(0),
        });
        self.listeners.push((TrackKind::Video, listener));
        Ok(match kind {
            VideoEncoderKind::Surface => VideoEncoderHandle::Surface(input),
            VideoEncoderKind::Buffer => VideoEncoderHandle::Buffer(input),
        })
    }

    fn add_audio_encoder(&mut self, listener: Arc<dyn EncoderListener>) -> RecordingResult<()> {
        if self.has_track(TrackKind::Audio) {
            return Err(RecordingError::PrepareFailed("audio encoder already added".into()));
        }

        let source = make("autoaudiosrc")?;
        let queue = make("queue")?;
        let convert = make("audioconvert")?;
        let resample = make("audioresample")?;
        let encoder = make_first(&AUDIO_ENCODERS)?;
        let out_queue = make("queue")?;

        self.add_branch(&[&source, &queue, &convert, &resample, &encoder, &out_queue])?;
        info!("Added audio encoder");

        self.listeners.push((TrackKind::Audio, listener));
        Ok(())
    }

    fn prepare(&mut self) -> RecordingResult<()> {
        self.pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| RecordingError::PrepareFailed(format!("Failed to pause pipeline: {}", e)))?;
        for (track, listener) in &self.listeners {
            listener.on_prepared(*track);
        }
        Ok(())
    }

    fn start(&mut self) -> RecordingResult<()> {
        info!(output = %self.output_path.display(), "Starting recording");
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| RecordingError::StartFailed(e.to_string()))?;
        self.check_bus(gst::ClockTime::from_mseconds(500))?;
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let pipeline = self.pipeline.clone();
        let listeners = std::mem::take(&mut self.listeners);
        let output_path = self.started.then(|| self.output_path.clone());

        if self.started && !pipeline.send_event(gst::event::Eos::new()) {
            warn!("Failed to send EOS event to pipeline");
        }

        let spawn = std::thread::Builder::new()
            .name("uvc-recording-eos".into())
            .spawn(move || {
                if output_path.is_some()
                    && let Some(bus) = pipeline.bus()
                {
                    match bus.timed_pop_filtered(
                        gst::ClockTime::from_seconds(timing::EOS_TIMEOUT_SECS),
                        &[gst::MessageType::Eos, gst::MessageType::Error],
                    ) {
                        Some(msg) => match msg.view() {
                            gst::MessageView::Error(err) => {
                                error!(error = %err.error(), "Error while finalizing recording")
                            }
                            _ => debug!("Recording reached EOS"),
                        },
                        None => warn!(
                            timeout_secs = timing::EOS_TIMEOUT_SECS,
                            "Timed out waiting for EOS"
                        ),
                    }
                }
                if let Err(e) = pipeline.set_state(gst::State::Null) {
                    error!(?e, "Failed to set pipeline to Null");
                }
                for (track, listener) in listeners {
                    listener.on_stopped(track, output_path.as_deref());
                }
            });
        if let Err(e) = spawn {
            error!(error = %e, "Failed to spawn EOS thread");
        }
    }
}

impl Drop for GstMuxer {
    fn drop(&mut self) {
        if !self.stopped {
            let _ = self.pipeline.set_state(gst::State::Null);
        }
    }
}
