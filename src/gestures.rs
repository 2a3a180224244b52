//! Static hand-shape classification from a single frame of landmarks.

use serde::Serialize;

use crate::tracker::{
    HandObservation, INDEX_PIP, INDEX_TIP, MIDDLE_PIP, MIDDLE_TIP, PINKY_PIP, PINKY_TIP,
    RING_PIP, RING_TIP, THUMB_MCP, THUMB_TIP,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    OpenPalm,
    Fist,
    ThumbsUp,
    ThumbsDown,
    RockOn,
    Point,
    Peace,
    Unrecognized,
    /// No hand in the slot this frame.
    NoHand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbState {
    Up,
    Down,
    Folded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FingerFlags {
    index: bool,
    middle: bool,
    ring: bool,
    pinky: bool,
}

impl FingerFlags {
    fn count(&self) -> usize {
        [self.index, self.middle, self.ring, self.pinky]
            .iter()
            .filter(|f| **f)
            .count()
    }
}

/// Margins in normalized frame units.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Tip must sit this far above its PIP joint to count as extended.
    pub extend_margin: f32,
    /// Hands covering less of the frame than this are "far".
    pub far_hand_ratio: f32,
    /// Extension margin multiplier for far hands.
    pub far_margin_scale: f32,
    /// Tip must sit this far below its PIP joint to count as folded.
    pub fold_margin: f32,
    pub thumb_delta: f32,
    /// Allowed thumb-tip offset from hand center, as a share of hand width.
    pub thumb_tolerance: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            extend_margin: 0.02,
            far_hand_ratio: 0.05,
            far_margin_scale: 0.6,
            fold_margin: 0.01,
            thumb_delta: 0.05,
            thumb_tolerance: 0.3,
        }
    }
}

const FINGERS: [(usize, usize); 4] = [
    (INDEX_TIP, INDEX_PIP),
    (MIDDLE_TIP, MIDDLE_PIP),
    (RING_TIP, RING_PIP),
    (PINKY_TIP, PINKY_PIP),
];

#[derive(Debug, Clone, Default)]
pub struct GestureClassifier {
    cfg: ClassifierConfig,
}

impl GestureClassifier {
    pub fn new(cfg: ClassifierConfig) -> Self {
        Self { cfg }
    }

    fn extend_margin(&self, hand: &HandObservation) -> f32 {
        if hand.hand_ratio() < self.cfg.far_hand_ratio {
            self.cfg.extend_margin * self.cfg.far_margin_scale
        } else {
            self.cfg.extend_margin
        }
    }

    fn fingers(&self, hand: &HandObservation, pred: impl Fn(f32, f32) -> bool) -> FingerFlags {
        let [index, middle, ring, pinky] =
            FINGERS.map(|(tip, pip)| pred(hand.landmark(tip).y, hand.landmark(pip).y));
        FingerFlags {
            index,
            middle,
            ring,
            pinky,
        }
    }

    fn extended(&self, hand: &HandObservation) -> FingerFlags {
        let margin = self.extend_margin(hand);
        self.fingers(hand, |tip, pip| tip < pip - margin)
    }

    // Not the negation of `extended`: the band between the two margins is neither.
    fn folded(&self, hand: &HandObservation) -> FingerFlags {
        let margin = self.cfg.fold_margin;
        self.fingers(hand, |tip, pip| tip > pip + margin)
    }

    pub fn thumb(&self, hand: &HandObservation) -> ThumbState {
        let tip = hand.landmark(THUMB_TIP);
        let base = hand.landmark(THUMB_MCP);
        let bbox = hand.normalized_bbox();
        let (center_x, _) = bbox.center();

        let centered = (tip.x - center_x).abs() <= self.cfg.thumb_tolerance * bbox.width();
        if !centered {
            return ThumbState::Folded;
        }
        if base.y - tip.y > self.cfg.thumb_delta {
            ThumbState::Up
        } else if tip.y - base.y > self.cfg.thumb_delta {
            ThumbState::Down
        } else {
            ThumbState::Folded
        }
    }

    /// Pure per-frame classification; always yields a label.
    pub fn classify(&self, hand: &HandObservation) -> Gesture {
        let ext = self.extended(hand);
        let fold = self.folded(hand);
        let thumb = self.thumb(hand);

        // order matters: rock-on and open palm both have the index up
        if ext.index && ext.pinky && fold.middle && fold.ring {
            Gesture::RockOn
        } else if ext.count() == 4 {
            Gesture::OpenPalm
        } else if ext.index && ext.middle && !ext.ring && !ext.pinky {
            Gesture::Peace
        } else if ext.count() == 0 && thumb == ThumbState::Up {
            Gesture::ThumbsUp
        } else if ext.count() == 0 && thumb == ThumbState::Down {
            Gesture::ThumbsDown
        } else if fold.count() == 4 && thumb == ThumbState::Folded {
            Gesture::Fist
        } else if ext.index && ext.count() == 1 {
            Gesture::Point
        } else {
            Gesture::Unrecognized
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Finger::*, Thumb, hand, hand_scaled, set_tip_y};
    use super::*;
    use crate::tracker::Handedness;

    fn classify(h: &HandObservation) -> Gesture {
        GestureClassifier::default().classify(h)
    }

    #[test]
    fn all_fingers_extended_is_open_palm() {
        for thumb in [Thumb::Up, Thumb::Down, Thumb::Tucked] {
            let h = hand([Extended, Extended, Extended, Extended], thumb);
            assert_eq!(classify(&h), Gesture::OpenPalm, "thumb {thumb:?}");
        }
    }

    #[test]
    fn thumb_direction_decides_thumbs_up_and_down() {
        let up = hand([Folded; 4], Thumb::Up);
        assert_eq!(classify(&up), Gesture::ThumbsUp);

        let down = hand([Folded; 4], Thumb::Down);
        assert_eq!(classify(&down), Gesture::ThumbsDown);

        let tucked = hand([Folded; 4], Thumb::Tucked);
        assert_eq!(classify(&tucked), Gesture::Fist);
    }

    #[test]
    fn thumb_far_from_center_is_not_up() {
        let mut h = hand([Folded; 4], Thumb::Up);
        // push the thumb tip way out to the side
        h.landmarks[THUMB_TIP].x = 0.2;
        let h = HandObservation::new(h.landmarks, h.handedness, 640, 480);
        assert_eq!(GestureClassifier::default().thumb(&h), ThumbState::Folded);
        assert_ne!(classify(&h), Gesture::ThumbsUp);
    }

    #[test]
    fn rock_on_wins_over_other_index_gestures() {
        let h = hand([Extended, Folded, Folded, Extended], Thumb::Tucked);
        assert_eq!(classify(&h), Gesture::RockOn);

        // middle and ring in the dead zone: not folded, so not rock-on
        let h = hand([Extended, Level, Level, Extended], Thumb::Tucked);
        assert_eq!(classify(&h), Gesture::Unrecognized);
    }

    #[test]
    fn peace_and_point() {
        let peace = hand([Extended, Extended, Folded, Folded], Thumb::Tucked);
        assert_eq!(classify(&peace), Gesture::Peace);

        let point = hand([Extended, Folded, Folded, Folded], Thumb::Tucked);
        assert_eq!(classify(&point), Gesture::Point);

        // dead-zone fingers are "not extended", so still a point
        let point = hand([Extended, Level, Level, Folded], Thumb::Tucked);
        assert_eq!(classify(&point), Gesture::Point);
    }

    #[test]
    fn dead_zone_fingers_are_neither_extended_nor_folded() {
        let h = hand([Level; 4], Thumb::Tucked);
        assert_eq!(classify(&h), Gesture::Unrecognized);
    }

    #[test]
    fn far_hands_use_a_smaller_extension_margin() {
        let clf = GestureClassifier::default();

        let mut near = hand([Extended, Folded, Folded, Folded], Thumb::Tucked);
        let pip = near.landmark(INDEX_PIP).y;
        set_tip_y(&mut near, INDEX_TIP, pip - 0.015);
        assert!(near.hand_ratio() >= 0.05);
        assert_ne!(clf.classify(&near), Gesture::Point);

        let mut far = hand_scaled(
            [Extended, Folded, Folded, Folded],
            Thumb::Tucked,
            0.5,
            Handedness::Right,
        );
        let pip = far.landmark(INDEX_PIP).y;
        set_tip_y(&mut far, INDEX_TIP, pip - 0.015);
        assert!(far.hand_ratio() < 0.05);
        assert_eq!(clf.classify(&far), Gesture::Point);
    }

    #[test]
    fn classification_is_repeatable() {
        let clf = GestureClassifier::default();
        let h = hand([Extended, Folded, Folded, Extended], Thumb::Tucked);
        let first = clf.classify(&h);
        for _ in 0..10 {
            assert_eq!(clf.classify(&h), first);
        }
    }
}
