use anyhow::{Context, Result, anyhow, bail};
use directories::UserDirs;
use log::{info, warn};
use serde::{Deserialize, Deserializer};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::actions::Action;
use crate::dispatch::{DispatchConfig, Trigger, default_bindings};
use crate::gestures::ClassifierConfig;
use crate::ipc::runtime;
use crate::motion::MotionConfig;
use crate::session::SessionConfig;
use crate::tracker::Handedness;
use crate::voice::{CommandMap, ListenerConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Landmark stream; defaults to a FIFO in the runtime dir.
    pub landmarks: Option<PathBuf>,
    /// Flip x for camera feeds that are not already mirrored.
    pub mirror: bool,
    pub primary_hand: Handedness,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            landmarks: None,
            mirror: false,
            primary_hand: Handedness::Right,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
}

impl Default for Screen {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub extend_margin: f32,
    pub far_hand_ratio: f32,
    pub far_margin_scale: f32,
    pub fold_margin: f32,
    pub thumb_delta: f32,
    pub thumb_tolerance: f32,
    pub history_len: usize,
    pub min_votes: usize,
    pub swipe_distance_ratio: f32,
    pub swipe_min_velocity: f32,
    pub swipe_dt_floor_ms: f32,
    pub cursor_gain: f32,
    pub scroll_step_px: f32,
    pub rock_on_hold_ms: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        let clf = ClassifierConfig::default();
        let motion = MotionConfig::default();
        let dispatch = DispatchConfig::default();
        Self {
            extend_margin: clf.extend_margin,
            far_hand_ratio: clf.far_hand_ratio,
            far_margin_scale: clf.far_margin_scale,
            fold_margin: clf.fold_margin,
            thumb_delta: clf.thumb_delta,
            thumb_tolerance: clf.thumb_tolerance,
            history_len: crate::filter::DEFAULT_HISTORY,
            min_votes: crate::filter::DEFAULT_MIN_VOTES,
            swipe_distance_ratio: motion.distance_ratio,
            swipe_min_velocity: motion.min_velocity,
            swipe_dt_floor_ms: motion.min_dt.as_secs_f32() * 1000.0,
            cursor_gain: dispatch.cursor_gain,
            scroll_step_px: dispatch.scroll_step_px,
            rock_on_hold_ms: 0,
        }
    }
}

impl Thresholds {
    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            extend_margin: self.extend_margin,
            far_hand_ratio: self.far_hand_ratio,
            far_margin_scale: self.far_margin_scale,
            fold_margin: self.fold_margin,
            thumb_delta: self.thumb_delta,
            thumb_tolerance: self.thumb_tolerance,
        }
    }

    pub fn motion(&self) -> MotionConfig {
        MotionConfig {
            distance_ratio: self.swipe_distance_ratio,
            min_velocity: self.swipe_min_velocity,
            min_dt: Duration::try_from_secs_f32(self.swipe_dt_floor_ms / 1000.0)
                .unwrap_or(MotionConfig::default().min_dt),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cooldowns {
    pub volume_ms: u64,
    pub music_ms: u64,
    pub click_ms: u64,
}

impl Default for Cooldowns {
    fn default() -> Self {
        Self {
            volume_ms: 500,
            music_ms: 2500,
            click_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub enabled: bool,
    pub wake_word: String,
    /// Transcript stream; defaults to a FIFO in the runtime dir.
    pub transcript: Option<PathBuf>,
    pub listening_timeout_ms: u64,
    pub queue_capacity: usize,
    /// Extra spoken commands on top of the built-in vocabulary.
    pub commands: HashMap<String, String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        let listener = ListenerConfig::default();
        Self {
            enabled: false,
            wake_word: listener.wake_word,
            transcript: None,
            listening_timeout_ms: listener.listening_timeout.as_millis() as u64,
            queue_capacity: listener.queue_capacity,
            commands: HashMap::new(),
        }
    }
}

impl VoiceConfig {
    pub fn listener(&self) -> ListenerConfig {
        ListenerConfig {
            wake_word: self.wake_word.clone(),
            listening_timeout: Duration::from_millis(self.listening_timeout_ms),
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.transcript
            .clone()
            .unwrap_or_else(runtime::default_transcript_path)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub screen: Screen,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub cooldowns: Cooldowns,

    // nested/dotted tables flatten into "a.b" -> "value"; absent means the
    // built-in table, an empty table binds nothing
    #[serde(default, deserialize_with = "deserialize_bindings_flat")]
    pub bindings: Option<HashMap<String, String>>,

    #[serde(default)]
    pub voice: VoiceConfig,
}

fn deserialize_bindings_flat<'de, D>(
    de: D,
) -> std::result::Result<Option<HashMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = toml::Value::deserialize(de)?;
    let table = match val {
        toml::Value::Table(t) => t,
        other => {
            return Err(serde::de::Error::custom(format!(
                "bindings must be a table, got {}",
                other.type_str()
            )));
        }
    };

    let mut out = HashMap::new();
    flatten_table("", &table, &mut out).map_err(serde::de::Error::custom)?;
    Ok(Some(out))
}

fn flatten_table(
    prefix: &str,
    table: &toml::value::Table,
    out: &mut HashMap<String, String>,
) -> std::result::Result<(), String> {
    for (k, v) in table {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            toml::Value::String(s) => {
                out.insert(key, s.clone());
            }
            toml::Value::Table(sub) => flatten_table(&key, sub, out)?,
            other => {
                return Err(format!(
                    "binding '{key}' value must be a string, got {}",
                    other.type_str()
                ));
            }
        }
    }
    Ok(())
}

impl Profile {
    pub fn landmarks_path(&self) -> PathBuf {
        self.source
            .landmarks
            .clone()
            .unwrap_or_else(runtime::default_landmarks_path)
    }

    pub fn bindings(&self) -> Result<HashMap<Trigger, Action>> {
        let Some(table) = &self.bindings else {
            return Ok(default_bindings());
        };
        let mut out = HashMap::new();
        for (key, value) in table {
            let trigger =
                Trigger::from_key(key).ok_or_else(|| anyhow!("unknown binding '{key}'"))?;
            let action = value
                .parse::<Action>()
                .with_context(|| format!("binding '{key}'"))?;
            out.insert(trigger, action);
        }
        Ok(out)
    }

    pub fn dispatch_config(&self) -> Result<DispatchConfig> {
        Ok(DispatchConfig {
            bindings: self.bindings()?,
            volume_cooldown: Duration::from_millis(self.cooldowns.volume_ms),
            music_cooldown: Duration::from_millis(self.cooldowns.music_ms),
            click_cooldown: Duration::from_millis(self.cooldowns.click_ms),
            rock_on_hold: Duration::from_millis(self.thresholds.rock_on_hold_ms),
            screen: (self.screen.width, self.screen.height),
            cursor_gain: self.thresholds.cursor_gain,
            scroll_step_px: self.thresholds.scroll_step_px,
        })
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            classifier: self.thresholds.classifier(),
            motion: self.thresholds.motion(),
            history_len: self.thresholds.history_len,
            min_votes: self.thresholds.min_votes,
            dispatch: self.dispatch_config()?,
            primary: self.source.primary_hand,
            commands: CommandMap::new(&self.voice.commands).context("voice.commands")?,
        })
    }
}

/// Parses and validates profile text.
pub fn parse_profile(txt: &str) -> Result<Profile> {
    let profile: Profile = toml::from_str(txt)?;
    validate_profile(&profile)?;
    Ok(profile)
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

// NaN fails every comparison, so it is rejected here too
fn in_unit(v: f32, lo_inclusive: bool, hi: f32) -> bool {
    (if lo_inclusive { v >= 0.0 } else { v > 0.0 }) && v <= hi
}

fn validate_profile(p: &Profile) -> Result<()> {
    let c = &p.cooldowns;
    if c.volume_ms == 0 || c.music_ms == 0 || c.click_ms == 0 {
        bail!("cooldowns must be positive durations");
    }
    if p.screen.width == 0 || p.screen.height == 0 {
        bail!("screen size must be non-zero");
    }

    let t = &p.thresholds;
    if !in_unit(t.extend_margin, true, 0.5) || !in_unit(t.fold_margin, true, 0.5) {
        bail!("thresholds.extend_margin/fold_margin must be in [0,0.5] normalized units");
    }
    if !in_unit(t.far_hand_ratio, true, 1.0) || !in_unit(t.far_margin_scale, false, 1.0) {
        bail!("thresholds.far_hand_ratio must be in [0,1] and far_margin_scale in (0,1]");
    }
    if !in_unit(t.thumb_delta, false, 1.0) || !in_unit(t.thumb_tolerance, false, 1.0) {
        bail!("thresholds.thumb_delta/thumb_tolerance must be in (0,1]");
    }
    if t.history_len == 0 || t.min_votes == 0 || t.min_votes > t.history_len {
        bail!("thresholds.min_votes must be in 1..=history_len");
    }
    if 2 * t.min_votes <= t.history_len {
        bail!(
            "thresholds.min_votes={} is not a strict majority of history_len={}",
            t.min_votes,
            t.history_len
        );
    }
    if ![t.swipe_distance_ratio, t.swipe_min_velocity, t.swipe_dt_floor_ms]
        .into_iter()
        .all(positive)
    {
        bail!("swipe thresholds must be positive finite numbers");
    }
    if !positive(t.cursor_gain) || !positive(t.scroll_step_px) {
        bail!("thresholds.cursor_gain and scroll_step_px must be positive finite numbers");
    }

    for (k, v) in p.bindings.iter().flatten() {
        if v.trim().is_empty() {
            bail!("binding '{k}' has empty action");
        }
    }
    p.bindings()?;

    let v = &p.voice;
    if v.enabled && v.wake_word.trim().is_empty() {
        bail!("voice.wake_word must not be empty");
    }
    if v.listening_timeout_ms == 0 || v.queue_capacity == 0 {
        bail!("voice.listening_timeout_ms and queue_capacity must be positive");
    }
    CommandMap::new(&v.commands).context("voice.commands")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot resolve home directory"))?;
    Ok(dirs.home_dir().join(".config").join("gesturectl"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_in(config_dir()?)
    }

    /// Loads from `cfgdir`, installing the bundled default profile and the
    /// active pointer when missing.
    pub fn load_in(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            fs::write(&active_ptr, b"default")?;
        }

        let mut active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        if active_name.is_empty() {
            warn!("empty active profile pointer; using 'default'");
            active_name = "default".into();
        }
        let profile = load_profile_from(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    /// On error the previous profile stays active.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = self.load_profile(&self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let profile = self.load_profile(name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn load_profile(&self, name: &str) -> Result<Profile> {
        load_profile_from(&self.profiles_dir, name)
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let in_input_group = check_in_input_group();
        let landmarks = self.profile.landmarks_path();
        let transcript = self.profile.voice.transcript_path();
        serde_json::json!({
            "uinput_present": uinput_ok,
            "input_group_member": in_input_group,
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "profile_name": self.profile.meta.name,
            "landmarks": {
                "path": landmarks,
                "present": landmarks.exists(),
            },
            "voice": {
                "enabled": self.profile.voice.enabled,
                "transcript": transcript,
                "present": transcript.exists(),
            },
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input",
                "landmark_fifo": format!("mkfifo {}", landmarks.display()),
            }
        })
    }
}

fn load_profile_from(profiles_dir: &Path, name: &str) -> Result<Profile> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        bail!("invalid profile name '{name}'");
    }
    let path = profiles_dir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    parse_profile(&txt).map_err(|e| anyhow!("failed to load {}: {e:#}", path.display()))
}

fn check_in_input_group() -> bool {
    let Ok(s) = fs::read_to_string("/etc/group") else {
        return false;
    };
    let user = whoami::username();
    s.lines()
        .filter(|line| line.starts_with("input:"))
        .any(|line| {
            line.split(':')
                .nth(3)
                .unwrap_or("")
                .split(',')
                .any(|u| u == user)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::MouseButton;
    use crate::motion::Swipe;

    #[test]
    fn bundled_default_profile_is_valid() {
        let p = parse_profile(default_profile_text()).unwrap();
        let b = p.bindings().unwrap();
        assert_eq!(b.get(&Trigger::ThumbsUp), Some(&Action::VolumeUp));
        assert_eq!(b.get(&Trigger::RockOn), Some(&Action::PlayPause));
        assert_eq!(
            b.get(&Trigger::OpenPalm),
            Some(&Action::Click(MouseButton::Left))
        );
        assert_eq!(
            b.get(&Trigger::Swipe(Swipe::Down)),
            Some(&Action::MinimizeWindow)
        );
        assert_eq!(p.cooldowns.music_ms, 2500);
        assert_eq!(p.thresholds.min_votes, 3);
        p.session_config().unwrap();
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let p = parse_profile("[cooldowns]\nclick_ms = 250\n").unwrap();
        assert_eq!(p.thresholds.history_len, 5);
        assert_eq!(p.cooldowns.volume_ms, 500);
        assert_eq!(p.source.primary_hand, Handedness::Right);
        assert!(!p.voice.enabled);
        assert_eq!(p.bindings().unwrap(), default_bindings());
    }

    #[test]
    fn bindings_table_replaces_the_builtin_one() {
        let p = parse_profile("[bindings]\nfist = \"mouse:right\"\n").unwrap();
        let b = p.bindings().unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[&Trigger::Fist], Action::Click(MouseButton::Right));

        let empty = parse_profile("[bindings]\n").unwrap();
        assert!(empty.bindings().unwrap().is_empty());
    }

    #[test]
    fn motion_thresholds_never_panic() {
        let t = Thresholds {
            swipe_dt_floor_ms: f32::INFINITY,
            ..Thresholds::default()
        };
        assert_eq!(t.motion().min_dt, MotionConfig::default().min_dt);
    }

    #[test]
    fn nested_and_dotted_bindings_flatten() {
        let txt = r#"
[bindings]
rock_on = "media:play_pause"
"swipe.left" = "key:ALT+LEFT"

[bindings.swipe]
right = "key:ALT+RIGHT"
"#;
        let p = parse_profile(txt).unwrap();
        let table = p.bindings.as_ref().unwrap();
        assert_eq!(table["swipe.left"], "key:ALT+LEFT");
        assert_eq!(table["swipe.right"], "key:ALT+RIGHT");
    }

    #[test]
    fn rejects_bad_profiles() {
        let cases = [
            "[cooldowns]\nvolume_ms = 0\n",
            "[thresholds]\nhistory_len = 4\nmin_votes = 2\n",
            "[thresholds]\nmin_votes = 6\n",
            "[thresholds]\nextend_margin = 0.9\n",
            "[thresholds]\nextend_margin = nan\n",
            "[thresholds]\nthumb_delta = inf\n",
            "[thresholds]\nswipe_dt_floor_ms = inf\n",
            "[thresholds]\nswipe_min_velocity = nan\n",
            "[thresholds]\ncursor_gain = inf\n",
            "[thresholds]\nscroll_step_px = -inf\n",
            "[bindings]\nwave = \"volume:up\"\n",
            "[bindings]\nthumbs_up = \"volume:eleven\"\n",
            "[bindings]\nthumbs_up = 3\n",
            "[voice]\nenabled = true\nwake_word = \" \"\n",
            "[voice.commands]\n\"launch\" = \"HYPER+L\"\n",
        ];
        for txt in cases {
            assert!(parse_profile(txt).is_err(), "accepted:\n{txt}");
        }
    }

    #[test]
    fn installs_default_and_switches_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = DaemonConfigState::load_in(dir.path().to_path_buf()).unwrap();
        assert_eq!(st.active_name, "default");
        assert!(dir.path().join("profiles/default.toml").exists());

        fs::write(
            st.profiles_dir.join("media.toml"),
            "[bindings]\nopen_palm = \"media:play_pause\"\n",
        )
        .unwrap();
        assert_eq!(st.list_profiles(), vec!["default", "media"]);

        st.set_active("media").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("active")).unwrap(),
            "media"
        );
        assert_eq!(st.profile.bindings().unwrap().len(), 1);

        assert!(st.set_active("missing").is_err());
        assert!(st.set_active("../default").is_err());
        assert_eq!(st.active_name, "media");
    }

    #[test]
    fn failed_reload_keeps_the_last_good_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = DaemonConfigState::load_in(dir.path().to_path_buf()).unwrap();
        let before = st.profile.cooldowns.volume_ms;

        fs::write(
            st.profiles_dir.join("default.toml"),
            "[cooldowns]\nvolume_ms = 0\n",
        )
        .unwrap();
        assert!(st.reload().is_err());
        assert_eq!(st.profile.cooldowns.volume_ms, before);

        fs::write(
            st.profiles_dir.join("default.toml"),
            "[cooldowns]\nvolume_ms = 750\n",
        )
        .unwrap();
        st.reload().unwrap();
        assert_eq!(st.profile.cooldowns.volume_ms, 750);
    }

    #[test]
    fn profile_values_reach_the_session() {
        let txt = r#"
[source]
primary_hand = "left"

[thresholds]
rock_on_hold_ms = 1200
scroll_step_px = 25.0

[cooldowns]
click_ms = 400

[voice.commands]
"save it" = "ctrl+s"
"#;
        let cfg = parse_profile(txt).unwrap().session_config().unwrap();
        assert_eq!(cfg.primary, Handedness::Left);
        assert_eq!(cfg.dispatch.rock_on_hold, Duration::from_millis(1200));
        assert_eq!(cfg.dispatch.click_cooldown, Duration::from_millis(400));
        assert_eq!(cfg.dispatch.scroll_step_px, 25.0);
        assert!(cfg.commands.resolve("Save it").is_some());
    }
}
