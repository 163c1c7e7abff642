// SPDX-License-Identifier: MPL-2.0

//! Recording pipeline: one muxer plus its video and audio encoders
//!
//! A pipeline is built fresh for every recording and never reused. Stopping is
//! asynchronous: every encoder drains on the backend's thread and reports
//! through its listener. Once all tracks have reported, the completion
//! callback fires exactly once with the container path (or `None` when
//! nothing was written).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::encoder_selection::EncoderType;
use super::muxer::{EncoderListener, Muxer, MuxerFactory, TrackKind, VideoEncoderHandle};
use crate::errors::{RecordingError, RecordingResult};

type Completion = Box<dyn FnOnce(Option<PathBuf>) + Send>;

#[derive(Default)]
struct TrackProgress {
    expected: HashSet<TrackKind>,
    prepared: HashSet<TrackKind>,
    stopped: HashSet<TrackKind>,
    output_path: Option<PathBuf>,
    completion: Option<Completion>,
}

/// Listener shared by all encoders of one pipeline
struct TrackTracker {
    progress: Mutex<TrackProgress>,
}

impl TrackTracker {
    fn new(completion: Completion) -> Self {
        Self {
            progress: Mutex::new(TrackProgress {
                completion: Some(completion),
                ..TrackProgress::default()
            }),
        }
    }

    fn expect(&self, track: TrackKind) {
        self.lock().expected.insert(track);
    }

    fn all_prepared(&self) -> bool {
        let progress = self.lock();
        progress.expected.is_subset(&progress.prepared)
    }

    /// Drop the completion so a discarded pipeline never reports
    fn disarm(&self) {
        self.lock().completion = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EncoderListener for TrackTracker {
    fn on_prepared(&self, track: TrackKind) {
        debug!(?track, "Encoder prepared");
        self.lock().prepared.insert(track);
    }

    fn on_stopped(&self, track: TrackKind, output_path: Option<&Path>) {
        let finished = {
            let mut progress = self.lock();
            progress.stopped.insert(track);
            if progress.output_path.is_none() {
                progress.output_path = output_path.map(Path::to_path_buf);
            }
            if progress.expected.is_subset(&progress.stopped) {
                progress
                    .completion
                    .take()
                    .map(|completion| (completion, progress.output_path.clone()))
            } else {
                None
            }
        };
        debug!(?track, "Encoder stopped");

        // Completion runs outside the lock; it may post back to the session
        if let Some((completion, path)) = finished {
            info!(path = ?path, "Recording finished");
            completion(path);
        }
    }
}

/// Muxer and encoders of one recording
pub struct RecordingPipeline {
    muxer: Box<dyn Muxer>,
    video: Option<VideoEncoderHandle>,
    tracker: Arc<TrackTracker>,
    running: bool,
}

impl RecordingPipeline {
    /// Create the muxer and add the requested encoders
    ///
    /// # Arguments
    /// * `factory` - Backend creating the container
    /// * `output_path` - Container file to write
    /// * `encoder_type` - Video input strategy, `None` records audio only
    /// * `width` / `height` - Video size
    /// * `record_audio` - Whether to add the audio encoder
    /// * `on_finished` - Called once on the backend's thread after all tracks drained
    pub fn new(
        factory: &dyn MuxerFactory,
        output_path: PathBuf,
        encoder_type: EncoderType,
        width: u32,
        height: u32,
        record_audio: bool,
        on_finished: impl FnOnce(Option<PathBuf>) + Send + 'static,
    ) -> RecordingResult<Self> {
        let video_kind = encoder_type.video_kind();
        if video_kind.is_none() && !record_audio {
            return Err(RecordingError::EncoderNotAvailable(
                "recording needs a video or an audio track".into(),
            ));
        }

        info!(
            output = %output_path.display(),
            encoder = %encoder_type,
            width,
            height,
            audio = record_audio,
            "Creating recording pipeline"
        );

        let tracker = Arc::new(TrackTracker::new(Box::new(on_finished)));
        let mut muxer = factory.create_muxer(output_path)?;

        let video = match video_kind {
            Some(kind) => {
                tracker.expect(TrackKind::Video);
                let listener: Arc<dyn EncoderListener> = tracker.clone();
                match muxer.add_video_encoder(kind, width, height, listener) {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        tracker.disarm();
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        if record_audio {
            tracker.expect(TrackKind::Audio);
            let listener: Arc<dyn EncoderListener> = tracker.clone();
            if let Err(e) = muxer.add_audio_encoder(listener) {
                // Audio is optional; keep recording video when the mic is unavailable
                if video.is_some() {
                    warn!(error = %e, "Audio encoder unavailable, recording video only");
                    tracker.lock().expected.remove(&TrackKind::Audio);
                } else {
                    tracker.disarm();
                    return Err(e);
                }
            }
        }

        Ok(Self {
            muxer,
            video,
            tracker,
            running: false,
        })
    }

    /// Allocate encoder resources
    pub fn prepare(&mut self) -> RecordingResult<()> {
        self.muxer.prepare()?;
        if !self.tracker.all_prepared() {
            debug!("Not every encoder reported prepared yet");
        }
        Ok(())
    }

    pub fn start(&mut self) -> RecordingResult<()> {
        self.muxer.start()?;
        self.running = true;
        Ok(())
    }

    /// Ask every encoder to drain; completion is reported asynchronously
    pub fn stop(mut self) {
        debug!(output = %self.muxer.output_path().display(), "Stopping recording pipeline");
        self.running = false;
        self.muxer.stop();
    }

    /// Tear down a pipeline that failed to start; its completion never fires
    pub fn discard(mut self) {
        self.tracker.disarm();
        self.running = false;
        self.muxer.stop();
    }

    /// Input side of the video encoder, `None` for audio-only recordings
    pub fn video_input(&self) -> Option<&VideoEncoderHandle> {
        self.video.as_ref()
    }

    pub fn output_path(&self) -> &Path {
        self.muxer.output_path()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl std::fmt::Debug for RecordingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingPipeline")
            .field("output", &self.muxer.output_path())
            .field("video", &self.video.is_some())
            .field("running", &self.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::CameraFrame;
    use crate::pipelines::video::muxer::{FrameEncoder, VideoEncoderKind};
    use std::sync::mpsc;

    struct NullEncoder;

    impl FrameEncoder for NullEncoder {
        fn frame_available_soon(&self) {}
        fn encode(&self, _frame: &CameraFrame) {}
    }

    #[derive(Default)]
    struct Tracks {
        listeners: Vec<(TrackKind, Arc<dyn EncoderListener>)>,
        started: bool,
    }

    struct TestMuxer {
        path: PathBuf,
        tracks: Arc<Mutex<Tracks>>,
        fail_audio: bool,
    }

    impl Muxer for TestMuxer {
        fn output_path(&self) -> &Path {
            &self.path
        }

        fn add_video_encoder(
            &mut self,
            _kind: VideoEncoderKind,
            _width: u32,
            _height: u32,
            listener: Arc<dyn EncoderListener>,
        ) -> RecordingResult<VideoEncoderHandle> {
            self.tracks.lock().unwrap().listeners.push((TrackKind::Video, listener));
            Ok(VideoEncoderHandle::Buffer(Arc::new(NullEncoder)))
        }

        fn add_audio_encoder(&mut self, listener: Arc<dyn EncoderListener>) -> RecordingResult<()> {
            if self.fail_audio {
                return Err(RecordingError::EncoderNotAvailable("no microphone".into()));
            }
            self.tracks.lock().unwrap().listeners.push((TrackKind::Audio, listener));
            Ok(())
        }

        fn prepare(&mut self) -> RecordingResult<()> {
            for (track, listener) in &self.tracks.lock().unwrap().listeners {
                listener.on_prepared(*track);
            }
            Ok(())
        }

        fn start(&mut self) -> RecordingResult<()> {
            self.tracks.lock().unwrap().started = true;
            Ok(())
        }

        fn stop(&mut self) {}
    }

    struct TestFactory {
        tracks: Arc<Mutex<Tracks>>,
        fail_audio: bool,
    }

    impl MuxerFactory for TestFactory {
        fn create_muxer(&self, output_path: PathBuf) -> RecordingResult<Box<dyn Muxer>> {
            Ok(Box::new(TestMuxer {
                path: output_path,
                tracks: self.tracks.clone(),
                fail_audio: self.fail_audio,
            }))
        }
    }

    fn drain(tracks: &Arc<Mutex<Tracks>>, path: Option<&Path>) {
        let listeners = tracks.lock().unwrap().listeners.clone();
        for (track, listener) in listeners {
            listener.on_stopped(track, path);
        }
    }

    #[test]
    fn test_completion_fires_once_after_all_tracks() {
        let tracks = Arc::new(Mutex::new(Tracks::default()));
        let factory = TestFactory { tracks: tracks.clone(), fail_audio: false };
        let (tx, rx) = mpsc::channel();

        let mut pipeline = RecordingPipeline::new(
            &factory,
            PathBuf::from("/tmp/out.mp4"),
            EncoderType::Buffer,
            640,
            480,
            true,
            move |path| tx.send(path).unwrap(),
        )
        .unwrap();
        pipeline.prepare().unwrap();
        pipeline.start().unwrap();
        assert!(pipeline.is_running());
        pipeline.stop();

        let listeners = tracks.lock().unwrap().listeners.clone();
        listeners[0].1.on_stopped(listeners[0].0, Some(Path::new("/tmp/out.mp4")));
        assert!(rx.try_recv().is_err());
        listeners[1].1.on_stopped(listeners[1].0, Some(Path::new("/tmp/out.mp4")));
        assert_eq!(rx.try_recv().unwrap(), Some(PathBuf::from("/tmp/out.mp4")));

        // A late duplicate report does nothing
        drain(&tracks, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_discarded_pipeline_never_completes() {
        let tracks = Arc::new(Mutex::new(Tracks::default()));
        let factory = TestFactory { tracks: tracks.clone(), fail_audio: false };
        let (tx, rx) = mpsc::channel();

        let pipeline = RecordingPipeline::new(
            &factory,
            PathBuf::from("/tmp/out.mp4"),
            EncoderType::Surface,
            640,
            480,
            false,
            move |path| tx.send(path).unwrap(),
        )
        .unwrap();
        pipeline.discard();
        drain(&tracks, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_missing_audio_falls_back_to_video_only() {
        let tracks = Arc::new(Mutex::new(Tracks::default()));
        let factory = TestFactory { tracks: tracks.clone(), fail_audio: true };
        let (tx, rx) = mpsc::channel();

        let pipeline = RecordingPipeline::new(
            &factory,
            PathBuf::from("/tmp/out.mp4"),
            EncoderType::Buffer,
            320,
            240,
            true,
            move |path| tx.send(path).unwrap(),
        )
        .unwrap();
        assert!(pipeline.video_input().is_some());
        drain(&tracks, Some(Path::new("/tmp/out.mp4")));
        assert!(rx.try_recv().unwrap().is_some());
    }

    #[test]
    fn test_no_tracks_is_rejected() {
        let tracks = Arc::new(Mutex::new(Tracks::default()));
        let factory = TestFactory { tracks, fail_audio: false };
        let result = RecordingPipeline::new(
            &factory,
            PathBuf::from("/tmp/out.mp4"),
            EncoderType::None,
            0,
            0,
            false,
            |_| {},
        );
        assert!(matches!(result, Err(RecordingError::EncoderNotAvailable(_))));
    }
}
