//! Swipe detection from bounding-box motion between consecutive frames.

use log::debug;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::filter::ConfirmationFilter;
use crate::tracker::BoundingBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Swipe {
    Up,
    Down,
    Left,
    Right,
}

impl Swipe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Swipe::Up => "up",
            Swipe::Down => "down",
            Swipe::Left => "left",
            Swipe::Right => "right",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Minimum travel along the dominant axis, as a share of hand width.
    pub distance_ratio: f32,
    /// Pixels per second along the dominant axis.
    pub min_velocity: f32,
    /// Elapsed-time floor between samples.
    pub min_dt: Duration,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            distance_ratio: 0.3,
            min_velocity: 500.0,
            min_dt: Duration::from_secs_f32(1.0 / 30.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MotionSample {
    center: (f32, f32),
    at: Instant,
}

/// Raw per-frame swipe classifier; keeps exactly one previous sample.
#[derive(Debug, Clone, Default)]
pub struct SwipeDetector {
    cfg: MotionConfig,
    prev: Option<MotionSample>,
}

impl SwipeDetector {
    pub fn new(cfg: MotionConfig) -> Self {
        Self { cfg, prev: None }
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }

    pub fn update(&mut self, bbox: &BoundingBox, now: Instant) -> Option<Swipe> {
        let cur = MotionSample {
            center: bbox.center(),
            at: now,
        };
        let Some(prev) = self.prev.replace(cur) else {
            return None;
        };

        let dx = cur.center.0 - prev.center.0;
        let dy = cur.center.1 - prev.center.1;
        let dt = now
            .saturating_duration_since(prev.at)
            .max(self.cfg.min_dt)
            .as_secs_f32();
        let min_dist = self.cfg.distance_ratio * bbox.width();

        let (dist, swipe) = if dx.abs() > dy.abs() {
            (dx, if dx > 0.0 { Swipe::Right } else { Swipe::Left })
        } else {
            (dy, if dy > 0.0 { Swipe::Down } else { Swipe::Up })
        };
        let velocity = dist.abs() / dt;

        if dist.abs() > min_dist && velocity > self.cfg.min_velocity {
            debug!(
                "raw swipe {}: {:.0}px at {:.0}px/s",
                swipe.as_str(),
                dist.abs(),
                velocity
            );
            Some(swipe)
        } else {
            None
        }
    }
}

/// Raw detector plus its own confirmation window; confirmed swipes are one-shot.
#[derive(Debug, Clone)]
pub struct SwipeTracker {
    detector: SwipeDetector,
    window: ConfirmationFilter<Option<Swipe>>,
}

impl SwipeTracker {
    pub fn new(cfg: MotionConfig, window: ConfirmationFilter<Option<Swipe>>) -> Self {
        Self {
            detector: SwipeDetector::new(cfg),
            window,
        }
    }

    /// Hand lost or switched: forget the sample and the window.
    pub fn reset(&mut self) {
        self.detector.reset();
        self.window.clear();
    }

    pub fn update(&mut self, bbox: &BoundingBox, now: Instant) -> Option<Swipe> {
        let raw = self.detector.update(bbox, now);
        self.window.push(raw);
        let confirmed = self.window.confirmed().flatten();
        if confirmed.is_some() {
            self.window.clear();
        }
        confirmed
    }
}

impl Default for SwipeTracker {
    fn default() -> Self {
        Self::new(MotionConfig::default(), ConfirmationFilter::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox_at(cx: f32, cy: f32, width: f32) -> BoundingBox {
        BoundingBox {
            x_min: cx - width / 2.0,
            y_min: cy - width / 2.0,
            x_max: cx + width / 2.0,
            y_max: cy + width / 2.0,
        }
    }

    #[test]
    fn first_sighting_never_swipes() {
        let mut d = SwipeDetector::default();
        assert_eq!(d.update(&bbox_at(100.0, 100.0, 100.0), Instant::now()), None);
    }

    #[test]
    fn fast_horizontal_move_is_a_right_swipe() {
        let t0 = Instant::now();
        let mut d = SwipeDetector::default();
        d.update(&bbox_at(100.0, 100.0, 100.0), t0);
        let out = d.update(&bbox_at(260.0, 100.0, 100.0), t0 + Duration::from_millis(100));
        assert_eq!(out, Some(Swipe::Right));
    }

    #[test]
    fn slow_move_is_not_a_swipe() {
        let t0 = Instant::now();
        let mut d = SwipeDetector::default();
        d.update(&bbox_at(100.0, 100.0, 100.0), t0);
        let out = d.update(&bbox_at(260.0, 100.0, 100.0), t0 + Duration::from_secs(1));
        assert_eq!(out, None);
    }

    #[test]
    fn short_move_is_not_a_swipe_even_when_fast() {
        let t0 = Instant::now();
        let mut d = SwipeDetector::default();
        d.update(&bbox_at(100.0, 100.0, 100.0), t0);
        // 25px < 0.3 * 100px
        let out = d.update(&bbox_at(125.0, 100.0, 100.0), t0 + Duration::from_millis(10));
        assert_eq!(out, None);
    }

    #[test]
    fn dominant_axis_decides_direction() {
        let t0 = Instant::now();
        let mut d = SwipeDetector::default();
        d.update(&bbox_at(300.0, 300.0, 100.0), t0);
        let out = d.update(&bbox_at(260.0, 120.0, 100.0), t0 + Duration::from_millis(100));
        assert_eq!(out, Some(Swipe::Up));
        let out = d.update(&bbox_at(100.0, 140.0, 100.0), t0 + Duration::from_millis(200));
        assert_eq!(out, Some(Swipe::Left));
    }

    #[test]
    fn duplicate_timestamps_use_the_dt_floor() {
        let t0 = Instant::now();
        let mut d = SwipeDetector::default();
        d.update(&bbox_at(100.0, 100.0, 100.0), t0);
        // 40px over the 1/30s floor = 1200px/s
        assert_eq!(d.update(&bbox_at(100.0, 140.0, 100.0), t0), Some(Swipe::Down));
    }

    #[test]
    fn confirmed_swipe_fires_once_then_needs_fresh_votes() {
        let t0 = Instant::now();
        let mut tracker = SwipeTracker::default();
        let mut fired = Vec::new();
        for i in 0..7u64 {
            let x = 100.0 + 60.0 * i as f32;
            let t = t0 + Duration::from_millis(33 * i);
            if let Some(s) = tracker.update(&bbox_at(x, 200.0, 100.0), t) {
                fired.push((i, s));
            }
        }
        // frame 0 is the first sighting; frames 1-3 vote, 4-6 vote again
        assert_eq!(fired, vec![(3, Swipe::Right), (6, Swipe::Right)]);
    }

    #[test]
    fn still_frames_keep_swipes_from_confirming() {
        let t0 = Instant::now();
        let mut tracker = SwipeTracker::default();
        let xs = [100.0, 160.0, 160.0, 160.0, 220.0, 220.0];
        for (i, x) in xs.iter().enumerate() {
            let t = t0 + Duration::from_millis(33 * i as u64);
            assert_eq!(tracker.update(&bbox_at(*x, 200.0, 100.0), t), None);
        }
    }
}
