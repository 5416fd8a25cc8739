//! Local capture: tracks that can be muted without renegotiation, and the
//! device abstraction the coordinator acquires them from.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::media::io::ogg_reader::OggReader;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{MediaError, MediaErrorKind};
use crate::peer::types::TrackKind;
use crate::utils::random_id;

const OGG_PAGE_DURATION: Duration = Duration::from_millis(20);
const OPUS_CLOCK_RATE: u64 = 48_000;

/// One captured audio or video track.
///
/// Clones share the same enabled/stopped flags, so a clone handed to a
/// sample pump observes toggles made through the coordinator.
#[derive(Clone)]
pub struct LocalTrack {
    kind: TrackKind,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl LocalTrack {
    pub fn new(kind: TrackKind, stream_id: &str) -> Self {
        let capability = match kind {
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90_000,
                ..Default::default()
            },
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_CLOCK_RATE as u32,
                channels: 2,
                ..Default::default()
            },
        };
        let id = match kind {
            TrackKind::Video => format!("video-{}", random_id()),
            TrackKind::Audio => format!("audio-{}", random_id()),
        };
        Self {
            kind,
            rtc: Arc::new(TrackLocalStaticSample::new(
                capability,
                id,
                stream_id.to_owned(),
            )),
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        self.rtc.id()
    }

    pub fn stream_id(&self) -> &str {
        self.rtc.stream_id()
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Returns whether the flag actually changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::SeqCst) != enabled
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// The sender-side track handed to the peer connection.
    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.rtc.clone()
    }

    /// Writes one encoded frame. Disabled or stopped tracks drop it.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> webrtc::error::Result<()> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(());
        }
        self.rtc
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
    }
}

/// The result of a successful camera/microphone request.
#[derive(Debug, Default)]
pub struct LocalMedia {
    tracks: Vec<LocalTrack>,
    pumps: Vec<JoinHandle<()>>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            tracks,
            pumps: Vec::new(),
        }
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.track(TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.track(TrackKind::Audio)
    }

    fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Stops every track and its sample pump.
    pub fn stop(&mut self) {
        for track in &self.tracks {
            track.stop();
        }
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

/// Source of local capture tracks.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints)
        -> Result<LocalMedia, MediaError>;
}

/// Media devices backed by files: an IVF (VP8) "camera" and an Ogg/Opus
/// "microphone", both looping at end of file.
#[derive(Debug, Clone, Default)]
pub struct FileDevices {
    pub video: Option<PathBuf>,
    pub audio: Option<PathBuf>,
}

impl FileDevices {
    pub fn new(video: Option<PathBuf>, audio: Option<PathBuf>) -> Self {
        Self { video, audio }
    }
}

#[async_trait]
impl MediaDevices for FileDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalMedia, MediaError> {
        let video = self.video.as_ref().filter(|_| constraints.video);
        let audio = self.audio.as_ref().filter(|_| constraints.audio);
        if video.is_none() && audio.is_none() {
            return Err(MediaError::new(
                MediaErrorKind::DeviceNotFound,
                "no capture source configured",
            ));
        }

        let stream_id = format!("duocall-{}", random_id());
        let mut media = LocalMedia::default();

        // Open everything before spawning so a failure leaves nothing running.
        let video_source = video.map(|p| IvfSource::open(p)).transpose()?;
        let audio_source = audio.map(|p| OggSource::open(p)).transpose()?;

        if let (Some(path), Some(source)) = (video, video_source) {
            let track = LocalTrack::new(TrackKind::Video, &stream_id);
            media
                .pumps
                .push(tokio::spawn(pump(path.clone(), source, track.clone())));
            media.tracks.push(track);
        }
        if let (Some(path), Some(source)) = (audio, audio_source) {
            let track = LocalTrack::new(TrackKind::Audio, &stream_id);
            media
                .pumps
                .push(tokio::spawn(pump(path.clone(), source, track.clone())));
            media.tracks.push(track);
        }
        Ok(media)
    }
}

trait FrameSource: Sized + Send + 'static {
    fn open(path: &Path) -> Result<Self, MediaError>;
    fn tick(&self) -> Duration;
    /// `None` at end of file.
    fn next_frame(&mut self) -> Option<(Bytes, Duration)>;
}

struct IvfSource {
    reader: IVFReader<BufReader<File>>,
    frame_duration: Duration,
}

impl FrameSource for IvfSource {
    fn open(path: &Path) -> Result<Self, MediaError> {
        let file = File::open(path).map_err(|e| MediaError::from_io(&e))?;
        let (reader, header) = IVFReader::new(BufReader::new(file))
            .map_err(|e| MediaError::new(MediaErrorKind::Unknown, e))?;
        if &header.four_cc != b"VP80" {
            return Err(MediaError::new(
                MediaErrorKind::Unknown,
                format!("{} is not a VP8 stream", path.display()),
            ));
        }
        let frame_duration = if header.timebase_denominator == 0 {
            Duration::from_millis(33)
        } else {
            Duration::from_secs_f64(
                header.timebase_numerator as f64 / header.timebase_denominator as f64,
            )
        };
        Ok(Self {
            reader,
            frame_duration,
        })
    }

    fn tick(&self) -> Duration {
        self.frame_duration
    }

    fn next_frame(&mut self) -> Option<(Bytes, Duration)> {
        self.reader
            .parse_next_frame()
            .ok()
            .map(|(frame, _)| (frame.freeze(), self.frame_duration))
    }
}

struct OggSource {
    reader: OggReader<BufReader<File>>,
    last_granule: u64,
}

impl FrameSource for OggSource {
    fn open(path: &Path) -> Result<Self, MediaError> {
        let file = File::open(path).map_err(|e| MediaError::from_io(&e))?;
        let (reader, _header) = OggReader::new(BufReader::new(file), true)
            .map_err(|e| MediaError::new(MediaErrorKind::Unknown, e))?;
        Ok(Self {
            reader,
            last_granule: 0,
        })
    }

    fn tick(&self) -> Duration {
        OGG_PAGE_DURATION
    }

    fn next_frame(&mut self) -> Option<(Bytes, Duration)> {
        let (page, header) = self.reader.parse_next_page().ok()?;
        let samples = header.granule_position.saturating_sub(self.last_granule);
        self.last_granule = header.granule_position;
        let duration = Duration::from_millis(samples * 1000 / OPUS_CLOCK_RATE);
        Some((page.freeze(), duration))
    }
}

async fn pump<S: FrameSource>(path: PathBuf, mut source: S, track: LocalTrack) {
    let mut ticker = tokio::time::interval(source.tick());
    loop {
        ticker.tick().await;
        if track.is_stopped() {
            break;
        }
        match source.next_frame() {
            Some((data, duration)) => {
                if let Err(e) = track.write_sample(data, duration).await {
                    warn!("Failed to write sample to {}: {e}", track.id());
                }
            }
            None => match S::open(&path) {
                Ok(reopened) => {
                    debug!("Looping {}", path.display());
                    source = reopened;
                }
                Err(e) => {
                    warn!("Capture source {} went away: {e}", path.display());
                    break;
                }
            },
        }
    }
}
