//! Per-stream controller: every piece of mutable gesture state lives here.

use log::{debug, error, info};
use serde::Serialize;

use crate::actions::ActionSink;
use crate::dispatch::{DispatchConfig, Dispatcher, Fired};
use crate::filter::{ConfirmationFilter, DEFAULT_HISTORY, DEFAULT_MIN_VOTES};
use crate::gestures::{ClassifierConfig, Gesture, GestureClassifier};
use crate::motion::{MotionConfig, Swipe, SwipeTracker};
use crate::tracker::{FrameSummary, HandObservation, Handedness, INDEX_TIP};
use crate::voice::{CommandMap, SpeechAction};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub classifier: ClassifierConfig,
    pub motion: MotionConfig,
    pub history_len: usize,
    pub min_votes: usize,
    pub dispatch: DispatchConfig,
    /// Hand that drives actions when both are visible.
    pub primary: Handedness,
    pub commands: CommandMap,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            motion: MotionConfig::default(),
            history_len: DEFAULT_HISTORY,
            min_votes: DEFAULT_MIN_VOTES,
            dispatch: DispatchConfig::default(),
            primary: Handedness::Right,
            commands: CommandMap::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SlotReport {
    pub raw: Gesture,
    pub confirmed: Option<Gesture>,
}

impl Default for SlotReport {
    fn default() -> Self {
        Self {
            raw: Gesture::NoHand,
            confirmed: None,
        }
    }
}

/// What one frame produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameReport {
    pub left: SlotReport,
    pub right: SlotReport,
    pub driver: Option<Handedness>,
    pub swipe: Option<Swipe>,
    pub scroll_mode: bool,
    pub fired: Vec<Fired>,
}

pub struct Session {
    classifier: GestureClassifier,
    left: ConfirmationFilter<Gesture>,
    right: ConfirmationFilter<Gesture>,
    swipes: SwipeTracker,
    motion_side: Option<Handedness>,
    dispatcher: Dispatcher,
    primary: Handedness,
    commands: CommandMap,
}

impl Session {
    pub fn new(cfg: SessionConfig) -> Self {
        let (len, votes) = (cfg.history_len, cfg.min_votes);
        Self {
            classifier: GestureClassifier::new(cfg.classifier),
            left: ConfirmationFilter::new(len, votes),
            right: ConfirmationFilter::new(len, votes),
            swipes: SwipeTracker::new(cfg.motion, ConfirmationFilter::new(len, votes)),
            motion_side: None,
            dispatcher: Dispatcher::new(cfg.dispatch),
            primary: cfg.primary,
            commands: cfg.commands,
        }
    }

    fn observe_slot(
        classifier: &GestureClassifier,
        filter: &mut ConfirmationFilter<Gesture>,
        hand: Option<&HandObservation>,
    ) -> SlotReport {
        let raw = hand.map(|h| classifier.classify(h));
        SlotReport {
            raw: raw.unwrap_or(Gesture::NoHand),
            confirmed: filter.observe(raw),
        }
    }

    fn slot(report: &FrameReport, side: Handedness) -> &SlotReport {
        match side {
            Handedness::Left => &report.left,
            Handedness::Right => &report.right,
        }
    }

    /// Runs one frame through classify, confirm and dispatch.
    pub fn process(&mut self, frame: &FrameSummary, sink: &mut dyn ActionSink) -> FrameReport {
        let now = frame.timestamp;
        let mut report = FrameReport {
            left: Self::observe_slot(&self.classifier, &mut self.left, frame.left.as_ref()),
            right: Self::observe_slot(&self.classifier, &mut self.right, frame.right.as_ref()),
            ..FrameReport::default()
        };

        let driving = [self.primary, self.primary.other()]
            .into_iter()
            .find_map(|side| frame.hand(side).map(|h| (side, h)));
        report.driver = driving.map(|(side, _)| side);

        report.scroll_mode = report.left.confirmed == Some(Gesture::Peace)
            && report.right.confirmed == Some(Gesture::Point);

        let Some((side, hand)) = driving else {
            if self.motion_side.take().is_some() {
                debug!("driving hand lost");
            }
            self.swipes.reset();
            self.dispatcher.release_scroll();
            report
                .fired
                .extend(self.dispatcher.on_gesture(None, None, now, sink));
            return report;
        };

        if self.motion_side != Some(side) {
            debug!("{} hand now drives", side.as_str());
            // fingertip deltas must not span two different hands
            self.swipes.reset();
            self.dispatcher.release_cursor();
            self.dispatcher.release_scroll();
            self.motion_side = Some(side);
        }

        let confirmed = Self::slot(&report, side).confirmed;
        let tip = hand.landmark(INDEX_TIP);

        if report.scroll_mode {
            // both hands are busy; motion would only produce stray swipes
            self.swipes.reset();
            let tip = frame.right.as_ref().map_or(tip, |h| h.landmark(INDEX_TIP));
            report
                .fired
                .extend(self.dispatcher.on_scroll((tip.x, tip.y), sink));
            return report;
        }
        self.dispatcher.release_scroll();

        if confirmed == Some(Gesture::Point) {
            self.swipes.reset();
        } else {
            report.swipe = self.swipes.update(&hand.bbox, now);
        }

        report.fired.extend(
            self.dispatcher
                .on_gesture(confirmed, Some((tip.x, tip.y)), now, sink),
        );
        if let Some(swipe) = report.swipe {
            info!("swipe {}", swipe.as_str());
            report
                .fired
                .extend(self.dispatcher.on_swipe(swipe, now, sink));
        }
        report
    }

    /// Injects one recognized utterance.
    pub fn apply_speech(&self, text: &str, sink: &mut dyn ActionSink) -> Option<SpeechAction> {
        let action = self.commands.resolve(text)?;
        match &action {
            SpeechAction::Chord(c) => info!("voice command -> {c}"),
            SpeechAction::Text(t) => debug!("typing {} chars", t.chars().count()),
        }
        if let Err(e) = action.perform(sink) {
            error!("speech injection failed: {e}");
        }
        Some(action)
    }
}
