use crate::core::geometry::BoundingBox;
use crate::core::recognizer::RecognizerEngine;
use crate::core::tracker::{needs_recognition, FaceTracker, TrackId};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-track recognition result handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionEvent {
    pub identity: String,
    pub distance: f64,
    pub track_id: TrackId,
}

/// One camera's capture-process loop body: track, crop, recognize.
pub struct FrameProcessor {
    tracker: FaceTracker,
    engine: Arc<RecognizerEngine>,
    recognition_interval: Duration,
}

impl FrameProcessor {
    pub fn new(tracker: FaceTracker, engine: Arc<RecognizerEngine>, recognition_interval: Duration) -> Self {
        Self {
            tracker,
            engine,
            recognition_interval,
        }
    }

    pub fn tracker(&self) -> &FaceTracker {
        &self.tracker
    }

    pub fn process(&mut self, frame: &DynamicImage, detections: &[BoundingBox]) -> Vec<RecognitionEvent> {
        self.process_at(frame, detections, Instant::now())
    }

    pub fn process_at(
        &mut self,
        frame: &DynamicImage,
        detections: &[BoundingBox],
        now: Instant,
    ) -> Vec<RecognitionEvent> {
        self.tracker.update_at(detections, now);

        let due: Vec<(TrackId, BoundingBox)> = self
            .tracker
            .tracks()
            .iter()
            .filter(|t| needs_recognition(t, now, self.recognition_interval))
            .filter_map(|t| t.display_box().map(|b| (t.id(), b)))
            .collect();

        let mut events = Vec::with_capacity(due.len());
        for (track_id, bbox) in due {
            let Some((x, y, w, h)) = bbox.clamp_to(frame.width(), frame.height()) else {
                tracing::debug!(track = %track_id, ?bbox, "display box outside frame");
                continue;
            };
            let face = frame.crop_imm(x, y, w, h);
            let prediction = self.engine.recognize(&face);
            self.tracker.record_recognition(track_id, &prediction, now);
            events.push(RecognitionEvent {
                identity: prediction.identity,
                distance: prediction.distance,
                track_id,
            });
        }
        events
    }

    /// Frame copy with every visible track outlined: green when the last
    /// recognition matched someone, red otherwise.
    pub fn annotate(&self, frame: &DynamicImage) -> RgbImage {
        let mut canvas = frame.to_rgb8();
        for track in self.tracker.tracks() {
            let Some(bbox) = track.display_box() else { continue };
            let known = track
                .recognition()
                .map(|r| r.identity != crate::core::recognizer::UNKNOWN_IDENTITY)
                .unwrap_or(false);
            let color = if known { Rgb([0, 255, 0]) } else { Rgb([255, 0, 0]) };
            let rect = Rect::at(bbox.x, bbox.y).of_size(bbox.width.max(1) as u32, bbox.height.max(1) as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
        canvas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Config;
    use image::{GrayImage, Luma};

    fn frame() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(200, 120, |x, y| Luma([((x + y) % 256) as u8])))
    }

    fn processor(interval_ms: u64) -> FrameProcessor {
        FrameProcessor::new(
            FaceTracker::new(Duration::from_millis(500)),
            Arc::new(RecognizerEngine::new(&Config::default())),
            Duration::from_millis(interval_ms),
        )
    }

    #[test]
    fn untrained_engine_reports_unknown_per_track() {
        let mut p = processor(0);
        let now = Instant::now();
        let events = p.process_at(
            &frame(),
            &[BoundingBox::new(10, 10, 40, 40), BoundingBox::new(120, 20, 40, 40)],
            now,
        );
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.identity == "unknown" && e.distance.is_infinite()));
        assert_ne!(events[0].track_id, events[1].track_id);
        assert_eq!(events[0].track_id, p.tracker().tracks()[0].id());
    }

    #[test]
    fn recognition_respects_interval() {
        let mut p = processor(1000);
        let now = Instant::now();
        let b = BoundingBox::new(10, 10, 40, 40);
        assert_eq!(p.process_at(&frame(), &[b], now).len(), 1);
        assert!(p.process_at(&frame(), &[b], now + Duration::from_millis(100)).is_empty());
        assert_eq!(p.process_at(&frame(), &[b], now + Duration::from_millis(1000)).len(), 1);
    }

    #[test]
    fn boxes_outside_the_frame_are_skipped() {
        let mut p = processor(0);
        let events = p.process_at(&frame(), &[BoundingBox::new(500, 500, 40, 40)], Instant::now());
        assert!(events.is_empty());
        assert_eq!(p.tracker().tracks().len(), 1);
    }

    #[test]
    fn annotate_outlines_visible_tracks() {
        let mut p = processor(0);
        let f = DynamicImage::ImageLuma8(GrayImage::new(100, 100));
        p.process_at(&f, &[BoundingBox::new(10, 10, 20, 20)], Instant::now());
        let out = p.annotate(&f);
        assert_eq!(*out.get_pixel(10, 10), Rgb([255, 0, 0]));
        assert_eq!(*out.get_pixel(50, 50), Rgb([0, 0, 0]));
    }

    #[test]
    fn event_serializes_with_track_id() {
        let event = RecognitionEvent {
            identity: "ada".into(),
            distance: 12.5,
            track_id: processor(0).process_at(&frame(), &[BoundingBox::new(0, 0, 10, 10)], Instant::now())[0].track_id,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["identity"], "ada");
        assert_eq!(json["distance"], 12.5);
        assert!(json["track_id"].is_u64());
    }
}
