//! Maps confirmed gestures and swipes to actions.
//!
//! Two disciplines: level gestures (thumbs, open palm, fist) re-fire once per
//! cooldown window while held; rock-on fires once per onset. Point drives the
//! cursor every frame it is confirmed, and swipes are already one-shot.

use log::{debug, error, info};
use serde::{Serialize, Serializer};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::actions::{Action, ActionSink, MouseButton};
use crate::gestures::Gesture;
use crate::motion::Swipe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    ThumbsUp,
    ThumbsDown,
    RockOn,
    OpenPalm,
    Fist,
    Swipe(Swipe),
}

impl Trigger {
    pub const ALL: [Trigger; 9] = [
        Trigger::ThumbsUp,
        Trigger::ThumbsDown,
        Trigger::RockOn,
        Trigger::OpenPalm,
        Trigger::Fist,
        Trigger::Swipe(Swipe::Up),
        Trigger::Swipe(Swipe::Down),
        Trigger::Swipe(Swipe::Left),
        Trigger::Swipe(Swipe::Right),
    ];

    /// Binding key as written in profiles.
    pub fn key(&self) -> &'static str {
        match self {
            Trigger::ThumbsUp => "thumbs_up",
            Trigger::ThumbsDown => "thumbs_down",
            Trigger::RockOn => "rock_on",
            Trigger::OpenPalm => "open_palm",
            Trigger::Fist => "fist",
            Trigger::Swipe(Swipe::Up) => "swipe.up",
            Trigger::Swipe(Swipe::Down) => "swipe.down",
            Trigger::Swipe(Swipe::Left) => "swipe.left",
            Trigger::Swipe(Swipe::Right) => "swipe.right",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.key() == key)
    }

    pub fn from_gesture(g: Gesture) -> Option<Self> {
        match g {
            Gesture::ThumbsUp => Some(Trigger::ThumbsUp),
            Gesture::ThumbsDown => Some(Trigger::ThumbsDown),
            Gesture::RockOn => Some(Trigger::RockOn),
            Gesture::OpenPalm => Some(Trigger::OpenPalm),
            Gesture::Fist => Some(Trigger::Fist),
            _ => None,
        }
    }

    fn cooldown_kind(&self) -> Option<CooldownKind> {
        match self {
            Trigger::ThumbsUp | Trigger::ThumbsDown => Some(CooldownKind::Volume),
            Trigger::RockOn => Some(CooldownKind::Music),
            Trigger::OpenPalm | Trigger::Fist => Some(CooldownKind::Click),
            Trigger::Swipe(_) => None,
        }
    }
}

impl Serialize for Trigger {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownKind {
    Volume,
    Music,
    Click,
}

pub fn default_bindings() -> HashMap<Trigger, Action> {
    HashMap::from([
        (Trigger::ThumbsUp, Action::VolumeUp),
        (Trigger::ThumbsDown, Action::VolumeDown),
        (Trigger::RockOn, Action::PlayPause),
        (Trigger::OpenPalm, Action::Click(MouseButton::Left)),
        (Trigger::Swipe(Swipe::Up), Action::MaximizeWindow),
        (Trigger::Swipe(Swipe::Down), Action::MinimizeWindow),
    ])
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub bindings: HashMap<Trigger, Action>,
    pub volume_cooldown: Duration,
    pub music_cooldown: Duration,
    pub click_cooldown: Duration,
    /// How long rock-on must be held before it fires.
    pub rock_on_hold: Duration,
    pub screen: (u32, u32),
    pub cursor_gain: f32,
    /// Fingertip travel in screen pixels per scroll tick.
    pub scroll_step_px: f32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            bindings: default_bindings(),
            volume_cooldown: Duration::from_millis(500),
            music_cooldown: Duration::from_millis(2500),
            click_cooldown: Duration::from_secs(1),
            rock_on_hold: Duration::ZERO,
            screen: (1920, 1080),
            cursor_gain: 1.0,
            scroll_step_px: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fired {
    Bound { trigger: Trigger, action: Action },
    Cursor { dx: i32, dy: i32 },
    Scroll { steps: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RockOnState {
    Idle,
    Holding { since: Instant },
    /// Fired, or dropped by the cooldown; waits for the gesture to end.
    Spent,
}

#[derive(Debug)]
pub struct Dispatcher {
    cfg: DispatchConfig,
    last_fired: HashMap<CooldownKind, Instant>,
    rock_on: RockOnState,
    cursor_anchor: Option<(f32, f32)>,
    cursor_residual: (f32, f32),
    scroll_anchor: Option<f32>,
    scroll_acc: f32,
}

impl Dispatcher {
    pub fn new(cfg: DispatchConfig) -> Self {
        Self {
            cfg,
            last_fired: HashMap::new(),
            rock_on: RockOnState::Idle,
            cursor_anchor: None,
            cursor_residual: (0.0, 0.0),
            scroll_anchor: None,
            scroll_acc: 0.0,
        }
    }

    fn cooldown(&self, kind: CooldownKind) -> Duration {
        match kind {
            CooldownKind::Volume => self.cfg.volume_cooldown,
            CooldownKind::Music => self.cfg.music_cooldown,
            CooldownKind::Click => self.cfg.click_cooldown,
        }
    }

    fn ready(&self, kind: CooldownKind, now: Instant) -> bool {
        self.last_fired
            .get(&kind)
            .is_none_or(|t| now.saturating_duration_since(*t) >= self.cooldown(kind))
    }

    fn fire(&mut self, trigger: Trigger, now: Instant, sink: &mut dyn ActionSink) -> Option<Fired> {
        let action = self.cfg.bindings.get(&trigger)?.clone();
        if let Some(kind) = trigger.cooldown_kind() {
            self.last_fired.insert(kind, now);
        }
        info!("{} -> {}", trigger.key(), action);
        if let Err(e) = action.perform(sink) {
            error!("action {action} failed: {e}");
        }
        Some(Fired::Bound { trigger, action })
    }

    /// Feeds the driving hand's confirmed gesture for this frame.
    pub fn on_gesture(
        &mut self,
        gesture: Option<Gesture>,
        pointer: Option<(f32, f32)>,
        now: Instant,
        sink: &mut dyn ActionSink,
    ) -> Vec<Fired> {
        if gesture != Some(Gesture::RockOn) {
            self.rock_on = RockOnState::Idle;
        }
        if gesture != Some(Gesture::Point) {
            self.release_cursor();
        }

        let fired = match gesture {
            Some(Gesture::RockOn) => self.rock_on(now, sink),
            Some(Gesture::Point) => pointer.and_then(|p| self.move_cursor(p, sink)),
            Some(g) => Trigger::from_gesture(g).and_then(|trigger| {
                let kind = trigger.cooldown_kind()?;
                if self.ready(kind, now) {
                    self.fire(trigger, now, sink)
                } else {
                    None
                }
            }),
            None => None,
        };
        fired.into_iter().collect()
    }

    fn rock_on(&mut self, now: Instant, sink: &mut dyn ActionSink) -> Option<Fired> {
        if self.rock_on == RockOnState::Idle {
            if !self.ready(CooldownKind::Music, now) {
                debug!("rock-on onset inside music cooldown; dropped");
                self.rock_on = RockOnState::Spent;
                return None;
            }
            self.rock_on = RockOnState::Holding { since: now };
        }

        let RockOnState::Holding { since } = self.rock_on else {
            return None;
        };
        if now.saturating_duration_since(since) < self.cfg.rock_on_hold {
            return None;
        }
        self.rock_on = RockOnState::Spent;
        if self.ready(CooldownKind::Music, now) {
            self.fire(Trigger::RockOn, now, sink)
        } else {
            None
        }
    }

    pub fn release_cursor(&mut self) {
        self.cursor_anchor = None;
        self.cursor_residual = (0.0, 0.0);
    }

    /// `tip` is the pointing fingertip in normalized frame units.
    fn move_cursor(&mut self, tip: (f32, f32), sink: &mut dyn ActionSink) -> Option<Fired> {
        let (w, h) = self.cfg.screen;
        let pos = (tip.0 * w as f32, tip.1 * h as f32);
        let prev = self.cursor_anchor.replace(pos)?;

        let dx = (pos.0 - prev.0) * self.cfg.cursor_gain + self.cursor_residual.0;
        let dy = (pos.1 - prev.1) * self.cfg.cursor_gain + self.cursor_residual.1;
        let (ix, iy) = (dx.trunc(), dy.trunc());
        self.cursor_residual = (dx - ix, dy - iy);
        if ix == 0.0 && iy == 0.0 {
            return None;
        }

        let (dx, dy) = (ix as i32, iy as i32);
        if let Err(e) = sink.move_cursor(dx, dy) {
            error!("cursor move failed: {e}");
        }
        Some(Fired::Cursor { dx, dy })
    }

    pub fn release_scroll(&mut self) {
        self.scroll_anchor = None;
        self.scroll_acc = 0.0;
    }

    /// Scroll mode: the fingertip's vertical travel becomes wheel ticks.
    pub fn on_scroll(&mut self, tip: (f32, f32), sink: &mut dyn ActionSink) -> Option<Fired> {
        self.release_cursor();
        self.rock_on = RockOnState::Idle;

        let y = tip.1 * self.cfg.screen.1 as f32;
        let prev = self.scroll_anchor.replace(y)?;
        // finger moving up scrolls up
        self.scroll_acc += prev - y;

        let step = self.cfg.scroll_step_px;
        let steps = (self.scroll_acc / step) as i32;
        if steps == 0 {
            return None;
        }
        self.scroll_acc -= steps as f32 * step;
        if let Err(e) = sink.scroll_vertical(steps) {
            error!("scroll emit failed: {e}");
        }
        Some(Fired::Scroll { steps })
    }

    pub fn on_swipe(
        &mut self,
        swipe: Swipe,
        now: Instant,
        sink: &mut dyn ActionSink,
    ) -> Option<Fired> {
        self.fire(Trigger::Swipe(swipe), now, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::RecordingSink;

    fn ms(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(DispatchConfig {
            volume_cooldown: Duration::from_secs(1),
            music_cooldown: Duration::from_secs(2),
            ..DispatchConfig::default()
        })
    }

    #[test]
    fn volume_respects_cooldown() {
        let t0 = Instant::now();
        let mut d = dispatcher();
        let mut sink = RecordingSink::default();

        d.on_gesture(Some(Gesture::ThumbsUp), None, t0, &mut sink);
        d.on_gesture(Some(Gesture::ThumbsUp), None, ms(t0, 100), &mut sink);
        assert_eq!(sink.count("volume_up"), 1);
    }

    #[test]
    fn held_thumbs_up_refires_every_cooldown() {
        let t0 = Instant::now();
        let mut d = dispatcher();
        let mut sink = RecordingSink::default();

        for i in 0..=75 {
            // 2.5s of frames at ~30fps
            d.on_gesture(Some(Gesture::ThumbsUp), None, ms(t0, i * 33), &mut sink);
        }
        assert_eq!(sink.count("volume_up"), 3);
    }

    #[test]
    fn thumbs_up_and_down_share_the_volume_cooldown() {
        let t0 = Instant::now();
        let mut d = dispatcher();
        let mut sink = RecordingSink::default();

        d.on_gesture(Some(Gesture::ThumbsUp), None, t0, &mut sink);
        d.on_gesture(Some(Gesture::ThumbsDown), None, ms(t0, 300), &mut sink);
        d.on_gesture(Some(Gesture::ThumbsDown), None, ms(t0, 1000), &mut sink);
        assert_eq!(sink.calls, vec!["volume_up", "volume_down"]);
    }

    #[test]
    fn rock_on_fires_once_per_onset() {
        let t0 = Instant::now();
        let mut d = dispatcher();
        let mut sink = RecordingSink::default();

        for i in 0..10 {
            d.on_gesture(Some(Gesture::RockOn), None, ms(t0, i * 33), &mut sink);
        }
        assert_eq!(sink.count("play_pause"), 1);

        d.on_gesture(None, None, ms(t0, 400), &mut sink);
        for i in 0..10 {
            d.on_gesture(Some(Gesture::RockOn), None, ms(t0, 2500 + i * 33), &mut sink);
        }
        assert_eq!(sink.count("play_pause"), 2);
    }

    #[test]
    fn rock_on_onset_inside_cooldown_is_dropped_for_the_whole_run() {
        let t0 = Instant::now();
        let mut d = dispatcher();
        let mut sink = RecordingSink::default();

        d.on_gesture(Some(Gesture::RockOn), None, t0, &mut sink);
        d.on_gesture(Some(Gesture::Unrecognized), None, ms(t0, 500), &mut sink);
        // re-onset at 1s is inside the 2s cooldown and stays dropped past it
        for i in 0..60 {
            d.on_gesture(Some(Gesture::RockOn), None, ms(t0, 1000 + i * 33), &mut sink);
        }
        assert_eq!(sink.count("play_pause"), 1);
    }

    #[test]
    fn rock_on_hold_delays_the_toggle() {
        let t0 = Instant::now();
        let mut d = Dispatcher::new(DispatchConfig {
            rock_on_hold: Duration::from_millis(1500),
            ..DispatchConfig::default()
        });
        let mut sink = RecordingSink::default();

        d.on_gesture(Some(Gesture::RockOn), None, t0, &mut sink);
        d.on_gesture(Some(Gesture::RockOn), None, ms(t0, 1000), &mut sink);
        assert_eq!(sink.count("play_pause"), 0);
        d.on_gesture(Some(Gesture::RockOn), None, ms(t0, 1500), &mut sink);
        d.on_gesture(Some(Gesture::RockOn), None, ms(t0, 1600), &mut sink);
        assert_eq!(sink.count("play_pause"), 1);

        // letting go early never fires
        let mut d = Dispatcher::new(DispatchConfig {
            rock_on_hold: Duration::from_millis(1500),
            ..DispatchConfig::default()
        });
        d.on_gesture(Some(Gesture::RockOn), None, ms(t0, 5000), &mut sink);
        d.on_gesture(None, None, ms(t0, 5500), &mut sink);
        d.on_gesture(Some(Gesture::RockOn), None, ms(t0, 6000), &mut sink);
        assert_eq!(sink.count("play_pause"), 1);
    }

    #[test]
    fn open_palm_clicks_on_its_own_cooldown() {
        let t0 = Instant::now();
        let mut d = dispatcher();
        let mut sink = RecordingSink::default();

        d.on_gesture(Some(Gesture::OpenPalm), None, t0, &mut sink);
        d.on_gesture(Some(Gesture::ThumbsUp), None, ms(t0, 10), &mut sink);
        d.on_gesture(Some(Gesture::OpenPalm), None, ms(t0, 500), &mut sink);
        d.on_gesture(Some(Gesture::OpenPalm), None, ms(t0, 1000), &mut sink);
        assert_eq!(sink.calls, vec!["click left", "volume_up", "click left"]);
    }

    #[test]
    fn unbound_gestures_do_nothing() {
        let t0 = Instant::now();
        let mut d = dispatcher();
        let mut sink = RecordingSink::default();
        assert!(d.on_gesture(Some(Gesture::Fist), None, t0, &mut sink).is_empty());
        assert!(d.on_gesture(Some(Gesture::Peace), None, t0, &mut sink).is_empty());
        assert!(d.on_gesture(Some(Gesture::Unrecognized), None, t0, &mut sink).is_empty());
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn failed_actions_still_start_the_cooldown() {
        let t0 = Instant::now();
        let mut d = dispatcher();
        let mut sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let fired = d.on_gesture(Some(Gesture::ThumbsDown), None, t0, &mut sink);
        assert_eq!(fired.len(), 1);
        d.on_gesture(Some(Gesture::ThumbsDown), None, ms(t0, 200), &mut sink);
        assert_eq!(sink.count("volume_down"), 1);
    }

    #[test]
    fn pointing_moves_the_cursor_by_deltas() {
        let t0 = Instant::now();
        let mut d = Dispatcher::new(DispatchConfig {
            screen: (256, 256),
            ..DispatchConfig::default()
        });
        let mut sink = RecordingSink::default();

        let point = Some(Gesture::Point);
        assert!(d.on_gesture(point, Some((0.5, 0.5)), t0, &mut sink).is_empty());
        let fired = d.on_gesture(point, Some((0.625, 0.4375)), ms(t0, 33), &mut sink);
        assert_eq!(fired, vec![Fired::Cursor { dx: 32, dy: -16 }]);

        // quarter-pixel steps accumulate into one
        for k in 1..=4u64 {
            let x = 0.625 + k as f32 / 1024.0;
            d.on_gesture(point, Some((x, 0.4375)), ms(t0, 33 + 33 * k), &mut sink);
        }
        assert_eq!(sink.calls, vec!["move 32 -16", "move 1 0"]);

        // leaving point drops the anchor: no jump on return
        d.on_gesture(None, None, ms(t0, 200), &mut sink);
        assert!(d.on_gesture(point, Some((0.9, 0.9)), ms(t0, 233), &mut sink).is_empty());
    }

    #[test]
    fn scroll_mode_emits_whole_ticks() {
        let mut d = Dispatcher::new(DispatchConfig {
            screen: (1000, 1000),
            scroll_step_px: 40.0,
            ..DispatchConfig::default()
        });
        let mut sink = RecordingSink::default();

        assert_eq!(d.on_scroll((0.5, 0.50), &mut sink), None);
        assert_eq!(d.on_scroll((0.5, 0.47), &mut sink), None);
        assert_eq!(
            d.on_scroll((0.5, 0.45), &mut sink),
            Some(Fired::Scroll { steps: 1 })
        );
        assert_eq!(
            d.on_scroll((0.5, 0.55), &mut sink),
            Some(Fired::Scroll { steps: -2 })
        );
        assert_eq!(sink.calls, vec!["scroll 1", "scroll -2"]);
    }

    #[test]
    fn swipes_fire_their_bindings_without_cooldown() {
        let t0 = Instant::now();
        let mut d = dispatcher();
        let mut sink = RecordingSink::default();

        d.on_swipe(Swipe::Down, t0, &mut sink);
        d.on_swipe(Swipe::Down, ms(t0, 10), &mut sink);
        d.on_swipe(Swipe::Up, ms(t0, 20), &mut sink);
        assert_eq!(d.on_swipe(Swipe::Left, ms(t0, 30), &mut sink), None);
        assert_eq!(sink.calls, vec!["minimize", "minimize", "maximize"]);
    }

    #[test]
    fn trigger_keys_round_trip() {
        for t in Trigger::ALL {
            assert_eq!(Trigger::from_key(t.key()), Some(t));
        }
        assert_eq!(Trigger::from_key("swipe.diagonal"), None);
    }
}
