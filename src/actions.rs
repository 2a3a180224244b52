use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use serde::Serialize;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Window chords for desktops that have no direct minimize/maximize call.
const MINIMIZE_CHORD: &str = "SUPER+H";
const MAXIMIZE_CHORD: &str = "SUPER+UP";

/// Tokens accepted in `key:` chords and voice commands.
pub const KEY_TOKENS: &[&str] = &[
    "CTRL", "CONTROL", "ALT", "SHIFT", "SUPER", "META", "WIN", "TAB", "MINUS", "-", "EQUAL",
    "=", "ENTER", "RETURN", "SPACE", "BACKSPACE", "ESC", "ESCAPE", "DELETE", "UP", "DOWN",
    "LEFT", "RIGHT", "HOME", "END", "PAGEUP", "PAGEDOWN", "DOT", "COMMA", "SLASH", "SEMICOLON",
    "APOSTROPHE", "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O",
    "P", "Q", "R", "S", "T", "U", "V", "W", "X", "Y", "Z", "0", "1", "2", "3", "4", "5", "6",
    "7", "8", "9",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// OS-level side effects; one implementation is picked at startup.
pub trait ActionSink {
    fn volume_up(&mut self) -> Result<()>;
    fn volume_down(&mut self) -> Result<()>;
    fn play_pause(&mut self) -> Result<()>;
    fn minimize_window(&mut self) -> Result<()>;
    fn maximize_window(&mut self) -> Result<()>;
    fn click_mouse(&mut self, button: MouseButton) -> Result<()>;
    /// Relative pointer motion in screen pixels.
    fn move_cursor(&mut self, dx: i32, dy: i32) -> Result<()>;
    fn scroll_vertical(&mut self, steps: i32) -> Result<()>;
    /// Send a chord like "CTRL+A" or single "ENTER"
    fn key_chord(&mut self, chord: &str) -> Result<()>;
    fn type_text(&mut self, text: &str) -> Result<()>;
}

#[derive(Debug, Error, PartialEq)]
pub enum ActionParseError {
    #[error("unknown action '{0}'")]
    Unknown(String),
    #[error("unknown {kind} argument '{arg}'")]
    BadArgument { kind: &'static str, arg: String },
    #[error("unsupported key token '{0}'")]
    BadKey(String),
}

/// A bindable one-shot action, parsed from profile strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "arg", rename_all = "snake_case")]
pub enum Action {
    VolumeUp,
    VolumeDown,
    PlayPause,
    MinimizeWindow,
    MaximizeWindow,
    Click(MouseButton),
    Scroll(i32),
    Key(String),
}

impl Action {
    pub fn perform(&self, sink: &mut dyn ActionSink) -> Result<()> {
        match self {
            Action::VolumeUp => sink.volume_up(),
            Action::VolumeDown => sink.volume_down(),
            Action::PlayPause => sink.play_pause(),
            Action::MinimizeWindow => sink.minimize_window(),
            Action::MaximizeWindow => sink.maximize_window(),
            Action::Click(b) => sink.click_mouse(*b),
            Action::Scroll(steps) => sink.scroll_vertical(*steps),
            Action::Key(chord) => sink.key_chord(chord),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::VolumeUp => write!(f, "volume:up"),
            Action::VolumeDown => write!(f, "volume:down"),
            Action::PlayPause => write!(f, "media:play_pause"),
            Action::MinimizeWindow => write!(f, "window:minimize"),
            Action::MaximizeWindow => write!(f, "window:maximize"),
            Action::Click(b) => write!(f, "mouse:{}", b.as_str()),
            Action::Scroll(steps) => write!(f, "scroll:vertical@{steps:+}"),
            Action::Key(chord) => write!(f, "key:{chord}"),
        }
    }
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

impl FromStr for MouseButton {
    type Err = ActionParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(ActionParseError::BadArgument {
                kind: "mouse",
                arg: other.to_string(),
            }),
        }
    }
}

/// Normalizes a chord to upper case and checks every token.
pub fn parse_chord(chord: &str) -> std::result::Result<String, ActionParseError> {
    let parts: Vec<String> = chord
        .split('+')
        .map(|s| s.trim().to_ascii_uppercase())
        .collect();
    for p in &parts {
        if !KEY_TOKENS.contains(&p.as_str()) {
            return Err(ActionParseError::BadKey(p.clone()));
        }
    }
    Ok(parts.join("+"))
}

impl FromStr for Action {
    type Err = ActionParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let bad = |kind: &'static str, arg: &str| ActionParseError::BadArgument {
            kind,
            arg: arg.to_string(),
        };

        if let Some(rest) = s.strip_prefix("volume:") {
            return match rest.trim() {
                "up" => Ok(Action::VolumeUp),
                "down" => Ok(Action::VolumeDown),
                other => Err(bad("volume", other)),
            };
        }
        if let Some(rest) = s.strip_prefix("media:") {
            return match rest.trim() {
                "play_pause" | "toggle" => Ok(Action::PlayPause),
                other => Err(bad("media", other)),
            };
        }
        if let Some(rest) = s.strip_prefix("window:") {
            return match rest.trim() {
                "minimize" => Ok(Action::MinimizeWindow),
                "maximize" => Ok(Action::MaximizeWindow),
                other => Err(bad("window", other)),
            };
        }
        if let Some(rest) = s.strip_prefix("mouse:") {
            return Ok(Action::Click(rest.parse()?));
        }
        if let Some(rest) = s.strip_prefix("scroll:") {
            let parts: Vec<_> = rest.split('@').collect();
            let axis = parts.first().map(|s| s.trim()).unwrap_or("vertical");
            if !axis.eq_ignore_ascii_case("vertical") {
                return Err(bad("scroll", axis));
            }
            let steps_str = parts.get(1).copied().unwrap_or("+1").trim();
            let steps: i32 = steps_str.parse().map_err(|_| bad("scroll", steps_str))?;
            return Ok(Action::Scroll(steps));
        }
        if let Some(rest) = s.strip_prefix("key:") {
            return Ok(Action::Key(parse_chord(rest)?));
        }

        Err(ActionParseError::Unknown(s.to_string()))
    }
}

/// Key token and shift state for a printable character.
pub fn key_for_char(c: char) -> Option<(String, bool)> {
    let plain = |t: &str| Some((t.to_string(), false));
    let shifted = |t: &str| Some((t.to_string(), true));
    match c {
        'a'..='z' | '0'..='9' => Some((c.to_ascii_uppercase().to_string(), false)),
        'A'..='Z' => Some((c.to_string(), true)),
        ' ' => plain("SPACE"),
        '\n' => plain("ENTER"),
        '\t' => plain("TAB"),
        '.' => plain("DOT"),
        ',' => plain("COMMA"),
        '-' => plain("MINUS"),
        '=' => plain("EQUAL"),
        '/' => plain("SLASH"),
        ';' => plain("SEMICOLON"),
        '\'' => plain("APOSTROPHE"),
        '!' => shifted("1"),
        '@' => shifted("2"),
        '#' => shifted("3"),
        '$' => shifted("4"),
        '%' => shifted("5"),
        '&' => shifted("7"),
        '*' => shifted("8"),
        '(' => shifted("9"),
        ')' => shifted("0"),
        '_' => shifted("MINUS"),
        '+' => shifted("EQUAL"),
        '?' => shifted("SLASH"),
        ':' => shifted("SEMICOLON"),
        '"' => shifted("APOSTROPHE"),
        _ => None,
    }
}

pub struct UinputSink {
    enabled: bool,
    #[allow(dead_code)]
    linux: Option<Box<LinuxUinput>>,
}

impl UinputSink {
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let dev = LinuxUinput::create()?;
            return Ok(Self {
                enabled: true,
                linux: Some(Box::new(dev)),
            });
        }
        #[allow(unreachable_code)]
        {
            warn!("uinput not available; running in NO-OP mode");
            Ok(Self {
                enabled: true,
                linux: None,
            })
        }
    }

    pub fn noop() -> Self {
        Self {
            enabled: true,
            linux: None,
        }
    }

    /// Real device when possible, NO-OP otherwise.
    pub fn for_platform() -> Self {
        Self::new().unwrap_or_else(|e| {
            warn!("virtual input device unavailable ({e}); running in NO-OP mode");
            Self::noop()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
    pub fn set_enabled(&mut self, en: bool) {
        self.enabled = en;
    }

    fn with_device(
        &mut self,
        what: &str,
        f: impl FnOnce(&mut LinuxUinput) -> Result<()>,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        match self.linux.as_mut() {
            Some(dev) => f(&mut **dev),
            None => {
                debug!("noop: {what}");
                Ok(())
            }
        }
    }
}

impl ActionSink for UinputSink {
    fn volume_up(&mut self) -> Result<()> {
        self.with_device("volume up", |dev| dev.media(MediaKey::VolumeUp))
    }

    fn volume_down(&mut self) -> Result<()> {
        self.with_device("volume down", |dev| dev.media(MediaKey::VolumeDown))
    }

    fn play_pause(&mut self) -> Result<()> {
        self.with_device("play/pause", |dev| dev.media(MediaKey::PlayPause))
    }

    fn minimize_window(&mut self) -> Result<()> {
        self.key_chord(MINIMIZE_CHORD)
    }

    fn maximize_window(&mut self) -> Result<()> {
        self.key_chord(MAXIMIZE_CHORD)
    }

    fn click_mouse(&mut self, button: MouseButton) -> Result<()> {
        self.with_device("click", |dev| dev.click(button))
    }

    fn move_cursor(&mut self, dx: i32, dy: i32) -> Result<()> {
        if dx == 0 && dy == 0 {
            return Ok(());
        }
        self.with_device("move cursor", |dev| dev.move_rel(dx, dy))
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        self.with_device("scroll", |dev| dev.scroll_vertical(steps))
    }

    fn key_chord(&mut self, chord: &str) -> Result<()> {
        let chord = parse_chord(chord)?;
        self.with_device("key chord", |dev| {
            let tokens: Vec<&str> = chord.split('+').collect();
            dev.chord(&tokens)
        })
    }

    fn type_text(&mut self, text: &str) -> Result<()> {
        self.with_device("type text", |dev| {
            for c in text.chars() {
                match key_for_char(c) {
                    Some((tok, true)) => dev.chord(&["SHIFT", tok.as_str()])?,
                    Some((tok, false)) => dev.chord(&[tok.as_str()])?,
                    None => warn!("cannot type {c:?}; skipped"),
                }
            }
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum MediaKey {
    VolumeUp,
    VolumeDown,
    PlayPause,
}

#[cfg(target_os = "linux")]
fn map_key(tok: &str) -> Result<uinput::event::keyboard::Key> {
    use uinput::event::keyboard::Key as K;
    let k = match tok {
        "CTRL" | "CONTROL" => K::LeftControl,
        "ALT" => K::LeftAlt,
        "SHIFT" => K::LeftShift,
        "SUPER" | "META" | "WIN" => K::LeftMeta,
        "TAB" => K::Tab,
        "MINUS" | "-" => K::Minus,
        "EQUAL" | "=" => K::Equal,
        "ENTER" | "RETURN" => K::Enter,
        "SPACE" => K::Space,
        "BACKSPACE" => K::BackSpace,
        "ESC" | "ESCAPE" => K::Esc,
        "DELETE" => K::Delete,
        "UP" => K::Up,
        "DOWN" => K::Down,
        "LEFT" => K::Left,
        "RIGHT" => K::Right,
        "HOME" => K::Home,
        "END" => K::End,
        "PAGEUP" => K::PageUp,
        "PAGEDOWN" => K::PageDown,
        "DOT" => K::Dot,
        "COMMA" => K::Comma,
        "SLASH" => K::Slash,
        "SEMICOLON" => K::SemiColon,
        "APOSTROPHE" => K::Apostrophe,
        "A" => K::A,
        "B" => K::B,
        "C" => K::C,
        "D" => K::D,
        "E" => K::E,
        "F" => K::F,
        "G" => K::G,
        "H" => K::H,
        "I" => K::I,
        "J" => K::J,
        "K" => K::K,
        "L" => K::L,
        "M" => K::M,
        "N" => K::N,
        "O" => K::O,
        "P" => K::P,
        "Q" => K::Q,
        "R" => K::R,
        "S" => K::S,
        "T" => K::T,
        "U" => K::U,
        "V" => K::V,
        "W" => K::W,
        "X" => K::X,
        "Y" => K::Y,
        "Z" => K::Z,
        "0" => K::_0,
        "1" => K::_1,
        "2" => K::_2,
        "3" => K::_3,
        "4" => K::_4,
        "5" => K::_5,
        "6" => K::_6,
        "7" => K::_7,
        "8" => K::_8,
        "9" => K::_9,
        other => return Err(anyhow!("unsupported key token: {other}")),
    };
    Ok(k)
}

#[cfg(target_os = "linux")]
struct LinuxUinput {
    dev: uinput::device::Device,
}

#[cfg(not(target_os = "linux"))]
struct LinuxUinput;

#[cfg(not(target_os = "linux"))]
impl LinuxUinput {
    fn unsupported(&self) -> Result<()> {
        Err(anyhow!("virtual input is only supported on Linux"))
    }
    fn media(&mut self, _key: MediaKey) -> Result<()> {
        self.unsupported()
    }
    fn click(&mut self, _button: MouseButton) -> Result<()> {
        self.unsupported()
    }
    fn move_rel(&mut self, _dx: i32, _dy: i32) -> Result<()> {
        self.unsupported()
    }
    fn scroll_vertical(&mut self, _steps: i32) -> Result<()> {
        self.unsupported()
    }
    fn chord(&mut self, _tokens: &[&str]) -> Result<()> {
        self.unsupported()
    }
}

#[cfg(target_os = "linux")]
impl LinuxUinput {
    fn create() -> Result<Self> {
        use uinput::event::{Keyboard, controller::Mouse, relative};

        let dev = uinput::default()?
            .name("Gesturectl Virtual Input")?
            // relative axes + wheel
            .event(relative::Position::X)?
            .event(relative::Position::Y)?
            .event(relative::Wheel::Vertical)?
            .event(relative::Wheel::Horizontal)?
            // mouse buttons
            .event(Mouse::Left)?
            .event(Mouse::Right)?
            .event(Mouse::Middle)?
            // every key, media keys included, so typed text and chords work
            .event(Keyboard::All)?
            .create()?;

        info!("uinput: created virtual device");
        Ok(Self { dev })
    }

    fn sync(&mut self) -> Result<()> {
        self.dev.synchronize()?;
        Ok(())
    }

    fn media(&mut self, key: MediaKey) -> Result<()> {
        use uinput::event::keyboard::Misc;
        let k = match key {
            MediaKey::VolumeUp => Misc::VolumeUp,
            MediaKey::VolumeDown => Misc::VolumeDown,
            MediaKey::PlayPause => Misc::PlayPause,
        };
        self.dev.send(k, 1)?;
        self.sync()?;
        self.dev.send(k, 0)?;
        self.sync()
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        use uinput::event::controller::Mouse;
        let b = match button {
            MouseButton::Left => Mouse::Left,
            MouseButton::Right => Mouse::Right,
            MouseButton::Middle => Mouse::Middle,
        };
        self.dev.send(b, 1)?;
        self.sync()?;
        self.dev.send(b, 0)?;
        self.sync()
    }

    fn move_rel(&mut self, dx: i32, dy: i32) -> Result<()> {
        use uinput::event::relative::Position;
        self.dev.send(Position::X, dx)?;
        self.dev.send(Position::Y, dy)?;
        self.sync()
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        use uinput::event::relative::Wheel;
        self.dev.send(Wheel::Vertical, steps)?;
        self.sync()
    }

    fn chord(&mut self, tokens: &[&str]) -> Result<()> {
        let mut keys = Vec::with_capacity(tokens.len());
        for t in tokens {
            keys.push(map_key(t)?);
        }
        // press in order
        for k in &keys {
            self.dev.send(*k, 1)?;
        }
        self.sync()?;
        // release in reverse
        for k in keys.iter().rev() {
            self.dev.send(*k, 0)?;
        }
        self.sync()
    }
}

/// Records calls instead of touching the OS.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub calls: Vec<String>,
    pub fail: bool,
}

#[cfg(test)]
impl RecordingSink {
    fn record(&mut self, call: String) -> Result<()> {
        self.calls.push(call);
        if self.fail {
            Err(anyhow!("sink failure"))
        } else {
            Ok(())
        }
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

#[cfg(test)]
impl ActionSink for RecordingSink {
    fn volume_up(&mut self) -> Result<()> {
        self.record("volume_up".into())
    }
    fn volume_down(&mut self) -> Result<()> {
        self.record("volume_down".into())
    }
    fn play_pause(&mut self) -> Result<()> {
        self.record("play_pause".into())
    }
    fn minimize_window(&mut self) -> Result<()> {
        self.record("minimize".into())
    }
    fn maximize_window(&mut self) -> Result<()> {
        self.record("maximize".into())
    }
    fn click_mouse(&mut self, button: MouseButton) -> Result<()> {
        self.record(format!("click {}", button.as_str()))
    }
    fn move_cursor(&mut self, dx: i32, dy: i32) -> Result<()> {
        self.record(format!("move {dx} {dy}"))
    }
    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        self.record(format!("scroll {steps}"))
    }
    fn key_chord(&mut self, chord: &str) -> Result<()> {
        self.record(format!("key {chord}"))
    }
    fn type_text(&mut self, text: &str) -> Result<()> {
        self.record(format!("type {text}"))
    }
}
