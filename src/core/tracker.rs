use crate::core::geometry::BoundingBox;
use crate::core::recognizer::Prediction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// A detection must overlap a track's raw box by more than this to continue it.
pub const MATCH_IOU_THRESHOLD: f64 = 0.3;

/// Weight of the newest detection in the display box.
pub const SMOOTHING_ALPHA: f64 = 0.35;

/// Opaque track identity. Unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(u64);

impl TrackId {
    fn next() -> Self {
        static EPOCH: OnceLock<u64> = OnceLock::new();
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let epoch = *EPOCH.get_or_init(|| u64::from(rand::random::<u32>()) << 32);
        let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
        TrackId(epoch | (sequence & 0xFFFF_FFFF))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Last recognition result attached to a track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecognition {
    pub identity: String,
    pub distance: f64,
    pub at: DateTime<Utc>,
    recognized_instant: Instant,
}

#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    raw: BoundingBox,
    display: Option<BoundingBox>,
    previous_display: Option<BoundingBox>,
    last_seen: Instant,
    frames_seen: u64,
    motion: f64,
    recognition: Option<TrackRecognition>,
}

impl Track {
    fn spawn(detection: BoundingBox, now: Instant) -> Self {
        Self {
            id: TrackId::next(),
            raw: detection,
            display: Some(detection),
            previous_display: None,
            last_seen: now,
            frames_seen: 1,
            motion: 0.0,
            recognition: None,
        }
    }

    fn absorb(&mut self, detection: BoundingBox, now: Instant) {
        self.motion += self.raw.center_distance(&detection);
        self.raw = detection;
        self.previous_display = self.display;
        self.display = Some(match self.display {
            Some(prev) => prev.smoothed_towards(&detection, SMOOTHING_ALPHA),
            None => detection,
        });
        self.last_seen = now;
        self.frames_seen += 1;
    }

    fn hide(&mut self) {
        if self.display.is_some() {
            self.previous_display = self.display.take();
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    /// Latest unfiltered detection; used for matching.
    pub fn raw_box(&self) -> BoundingBox {
        self.raw
    }

    /// Smoothed box for rendering; `None` when the track was not seen this frame.
    pub fn display_box(&self) -> Option<BoundingBox> {
        self.display
    }

    pub fn previous_display_box(&self) -> Option<BoundingBox> {
        self.previous_display
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Sum of per-frame center displacement of the raw box.
    pub fn motion(&self) -> f64 {
        self.motion
    }

    pub fn recognition(&self) -> Option<&TrackRecognition> {
        self.recognition.as_ref()
    }
}

pub fn is_stale(track: &Track, now: Instant, max_age: Duration) -> bool {
    now.saturating_duration_since(track.last_seen) > max_age
}

/// Whether a visible track should be (re-)recognized at `now`.
pub fn needs_recognition(track: &Track, now: Instant, interval: Duration) -> bool {
    if track.display.is_none() {
        return false;
    }
    match &track.recognition {
        None => true,
        Some(r) => now.saturating_duration_since(r.recognized_instant) >= interval,
    }
}

/// Greedy IoU tracker. Not synchronized: drive it from one frame loop.
pub struct FaceTracker {
    tracks: Vec<Track>,
    max_age: Duration,
}

impl FaceTracker {
    pub fn new(max_age: Duration) -> Self {
        Self {
            tracks: Vec::new(),
            max_age,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Live tracks in creation order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn update(&mut self, detections: &[BoundingBox]) {
        self.update_at(detections, Instant::now());
    }

    pub fn update_at(&mut self, detections: &[BoundingBox], now: Instant) {
        let mut matched = vec![false; self.tracks.len()];

        for detection in detections {
            match self.best_match(detection) {
                Some(idx) => {
                    self.tracks[idx].absorb(*detection, now);
                    matched[idx] = true;
                }
                None => {
                    let track = Track::spawn(*detection, now);
                    tracing::debug!(track = %track.id, ?detection, "new track");
                    self.tracks.push(track);
                    matched.push(true);
                }
            }
        }

        for (track, seen) in self.tracks.iter_mut().zip(&matched) {
            if !seen {
                track.hide();
            }
        }

        let max_age = self.max_age;
        self.tracks.retain(|t| {
            let stale = is_stale(t, now, max_age);
            if stale {
                tracing::debug!(track = %t.id, frames = t.frames_seen, "evicting stale track");
            }
            !stale
        });
    }

    /// Index of the track whose raw box overlaps `detection` the most; the
    /// first one wins a tie. Tracks already matched this frame stay eligible.
    fn best_match(&self, detection: &BoundingBox) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, track) in self.tracks.iter().enumerate() {
            let iou = track.raw.iou(detection);
            if best.map_or(true, |(_, best_iou)| iou > best_iou) {
                best = Some((idx, iou));
            }
        }
        best.filter(|(_, iou)| *iou > MATCH_IOU_THRESHOLD)
            .map(|(idx, _)| idx)
    }

    /// Attach a recognition result to a live track. Returns false when the
    /// track has been evicted in the meantime.
    pub fn record_recognition(&mut self, id: TrackId, prediction: &Prediction, now: Instant) -> bool {
        match self.tracks.iter_mut().find(|t| t.id == id) {
            Some(track) => {
                track.recognition = Some(TrackRecognition {
                    identity: prediction.identity.clone(),
                    distance: prediction.distance,
                    at: Utc::now(),
                    recognized_instant: now,
                });
                true
            }
            None => false,
        }
    }
}
