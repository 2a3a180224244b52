//! Per-hand slot tracking and frame snapshots.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::input::RawFrame;

pub const LANDMARK_COUNT: usize = 21;

// MediaPipe hand topology
pub const THUMB_MCP: usize = 2;
pub const THUMB_TIP: usize = 4;
pub const INDEX_PIP: usize = 6;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_TIP: usize = 12;
pub const RING_PIP: usize = 14;
pub const RING_TIP: usize = 16;
pub const PINKY_PIP: usize = 18;
pub const PINKY_TIP: usize = 20;

/// Normalized landmark; `z` is carried along but unused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn other(self) -> Self {
        match self {
            Handedness::Left => Handedness::Right,
            Handedness::Right => Handedness::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Handedness::Left => "left",
            Handedness::Right => "right",
        }
    }
}

/// Axis-aligned box in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y_max - self.y_min).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }
}

#[derive(Debug, Clone)]
pub struct HandObservation {
    pub landmarks: [Landmark; LANDMARK_COUNT],
    pub handedness: Handedness,
    pub bbox: BoundingBox,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl HandObservation {
    pub fn new(
        landmarks: [Landmark; LANDMARK_COUNT],
        handedness: Handedness,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let (w, h) = (frame_width as f32, frame_height as f32);
        let mut bbox = BoundingBox {
            x_min: f32::MAX,
            y_min: f32::MAX,
            x_max: f32::MIN,
            y_max: f32::MIN,
        };
        for p in &landmarks {
            bbox.x_min = bbox.x_min.min(p.x * w);
            bbox.y_min = bbox.y_min.min(p.y * h);
            bbox.x_max = bbox.x_max.max(p.x * w);
            bbox.y_max = bbox.y_max.max(p.y * h);
        }
        Self {
            landmarks,
            handedness,
            bbox,
            frame_width,
            frame_height,
        }
    }

    pub fn landmark(&self, idx: usize) -> Landmark {
        self.landmarks[idx]
    }

    /// Share of the frame covered by the hand's bounding box.
    pub fn hand_ratio(&self) -> f32 {
        let frame_area = (self.frame_width as f32 * self.frame_height as f32).max(1.0);
        self.bbox.area() / frame_area
    }

    /// Bounding box normalized back to [0,1] frame units.
    pub fn normalized_bbox(&self) -> BoundingBox {
        let w = (self.frame_width as f32).max(1.0);
        let h = (self.frame_height as f32).max(1.0);
        BoundingBox {
            x_min: self.bbox.x_min / w,
            y_min: self.bbox.y_min / h,
            x_max: self.bbox.x_max / w,
            y_max: self.bbox.y_max / h,
        }
    }
}

/// One processed frame: at most one hand per handedness slot.
#[derive(Debug, Clone)]
pub struct FrameSummary {
    pub timestamp: Instant,
    pub left: Option<HandObservation>,
    pub right: Option<HandObservation>,
}

impl FrameSummary {
    pub fn empty(timestamp: Instant) -> Self {
        Self {
            timestamp,
            left: None,
            right: None,
        }
    }

    pub fn hand(&self, side: Handedness) -> Option<&HandObservation> {
        match side {
            Handedness::Left => self.left.as_ref(),
            Handedness::Right => self.right.as_ref(),
        }
    }
}

/// Turns raw detector output into slot-keyed observations.
#[derive(Debug)]
pub struct Tracker {
    mirror: bool,
    start_instant: Instant,
    first_ts_ms: Option<u64>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Tracker {
    pub fn new(mirror: bool) -> Self {
        Self {
            mirror,
            start_instant: Instant::now(),
            first_ts_ms: None,
        }
    }

    fn timestamp(&mut self, ts_ms: Option<u64>) -> Instant {
        match ts_ms {
            Some(ts) => {
                let first = *self.first_ts_ms.get_or_insert(ts);
                self.start_instant + Duration::from_millis(ts.saturating_sub(first))
            }
            None => Instant::now(),
        }
    }

    pub fn on_frame(&mut self, raw: &RawFrame) -> FrameSummary {
        let timestamp = self.timestamp(raw.timestamp_ms);
        let mut frame = FrameSummary::empty(timestamp);

        for hand in &raw.hands {
            let Ok(mut points) = <[Landmark; LANDMARK_COUNT]>::try_from(hand.landmarks.as_slice())
            else {
                warn!(
                    "dropping {} hand with {} landmarks (expected {LANDMARK_COUNT})",
                    hand.handedness.as_str(),
                    hand.landmarks.len()
                );
                continue;
            };
            // detector labels assume a selfie view; flipping the image flips them too
            let handedness = if self.mirror {
                for p in points.iter_mut() {
                    p.x = 1.0 - p.x;
                }
                hand.handedness.other()
            } else {
                hand.handedness
            };

            let slot = match handedness {
                Handedness::Left => &mut frame.left,
                Handedness::Right => &mut frame.right,
            };
            if slot.is_some() {
                debug!(
                    "second {} hand in one frame; keeping the first",
                    handedness.as_str()
                );
                continue;
            }
            *slot = Some(HandObservation::new(
                points,
                handedness,
                raw.width,
                raw.height,
            ));
        }

        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::RawHand;

    fn raw_hand(handedness: Handedness, n: usize, x: f32) -> RawHand {
        RawHand {
            handedness,
            landmarks: (0..n)
                .map(|i| Landmark::new(x + i as f32 * 0.01, 0.2 + i as f32 * 0.02))
                .collect(),
        }
    }

    #[test]
    fn bbox_is_in_pixel_space() {
        let mut pts = [Landmark::new(0.5, 0.5); LANDMARK_COUNT];
        pts[0] = Landmark::new(0.25, 0.5);
        pts[1] = Landmark::new(0.75, 0.75);
        let hand = HandObservation::new(pts, Handedness::Right, 640, 480);
        assert_eq!(hand.bbox.x_min, 160.0);
        assert_eq!(hand.bbox.x_max, 480.0);
        assert_eq!(hand.bbox.y_min, 240.0);
        assert_eq!(hand.bbox.y_max, 360.0);
        assert_eq!(hand.bbox.center(), (320.0, 300.0));
        let ratio = hand.hand_ratio();
        assert!((ratio - 0.125).abs() < 1e-6, "ratio = {ratio}");
    }

    #[test]
    fn hands_are_slotted_by_handedness() {
        let raw = RawFrame {
            width: 640,
            height: 480,
            timestamp_ms: None,
            hands: vec![
                raw_hand(Handedness::Right, LANDMARK_COUNT, 0.1),
                raw_hand(Handedness::Left, LANDMARK_COUNT, 0.5),
                raw_hand(Handedness::Right, LANDMARK_COUNT, 0.3),
            ],
        };
        let frame = Tracker::new(false).on_frame(&raw);
        let right = frame.right.expect("right hand");
        assert!((right.landmark(0).x - 0.1).abs() < 1e-6);
        assert!(frame.left.is_some());
    }

    #[test]
    fn malformed_hands_are_dropped() {
        let raw = RawFrame {
            width: 640,
            height: 480,
            timestamp_ms: None,
            hands: vec![raw_hand(Handedness::Left, 20, 0.1)],
        };
        let frame = Tracker::new(false).on_frame(&raw);
        assert!(frame.left.is_none() && frame.right.is_none());
    }

    #[test]
    fn mirror_flips_x_and_handedness() {
        let raw = RawFrame {
            width: 100,
            height: 100,
            timestamp_ms: None,
            hands: vec![raw_hand(Handedness::Left, LANDMARK_COUNT, 0.1)],
        };
        let frame = Tracker::new(true).on_frame(&raw);
        assert!(frame.left.is_none());
        let right = frame.right.expect("mirrored left hand lands in the right slot");
        assert_eq!(right.handedness, Handedness::Right);
        assert!((right.landmark(0).x - 0.9).abs() < 1e-6);
    }

    #[test]
    fn source_timestamps_are_relative_to_first_frame() {
        let mut tracker = Tracker::new(false);
        let mut raw = RawFrame {
            width: 10,
            height: 10,
            timestamp_ms: Some(5_000),
            hands: vec![],
        };
        let a = tracker.on_frame(&raw).timestamp;
        raw.timestamp_ms = Some(5_250);
        let b = tracker.on_frame(&raw).timestamp;
        assert_eq!(b.duration_since(a), Duration::from_millis(250));
    }
}
