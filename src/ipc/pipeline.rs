use anyhow::{Context, Result, bail};
use log::{debug, error, info, warn};
use serde::Serialize;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::Duration,
};

use crate::actions::{ActionSink, UinputSink};
use crate::config::{DaemonConfigState, Profile};
use crate::gestures::Gesture;
use crate::input::{self, LandmarkSource, RawFrame};
use crate::motion::Swipe;
use crate::session::{FrameReport, Session};
use crate::tracker::{Handedness, Tracker};
use crate::voice::{SpeechListener, StreamTranscriber};

const RETRY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub source_connected: bool,
    pub frames: u64,
    pub bad_frames: u64,
    pub actions_fired: u64,
    pub utterances: u64,
    pub last_gesture: Option<Gesture>,
    pub last_swipe: Option<Swipe>,
}

/// State shared between the frame loop and its controllers (IPC, signals).
pub struct PipelineShared {
    enabled: AtomicBool,
    stop: AtomicBool,
    profile: Mutex<Profile>,
    revision: AtomicU64,
    stats: Mutex<PipelineStats>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PipelineShared {
    pub fn new(profile: Profile) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            profile: Mutex::new(profile),
            revision: AtomicU64::new(0),
            stats: Mutex::new(PipelineStats::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn update_profile(&self, profile: Profile) {
        *lock(&self.profile) = profile;
        self.revision.fetch_add(1, Ordering::Release);
    }

    pub fn profile(&self) -> Profile {
        lock(&self.profile).clone()
    }

    fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PipelineStats {
        lock(&self.stats).clone()
    }

    fn with_stats(&self, f: impl FnOnce(&mut PipelineStats)) {
        f(&mut lock(&self.stats));
    }
}

#[derive(Debug, Clone, PartialEq)]
struct VoiceKey {
    path: PathBuf,
    wake_word: String,
    timeout_ms: u64,
    capacity: usize,
}

/// Tracker, session and speech listener for one landmark stream.
pub struct Pipeline {
    tracker: Tracker,
    session: Session,
    speech: Option<SpeechListener>,
    voice_key: Option<VoiceKey>,
    transcript_override: Option<PathBuf>,
    revision: u64,
}

impl Pipeline {
    /// `transcript_override` turns speech on even if the profile leaves it off.
    pub fn new(profile: &Profile, transcript_override: Option<PathBuf>) -> Result<Self> {
        let mut p = Self {
            tracker: Tracker::new(profile.source.mirror),
            session: Session::new(profile.session_config()?),
            speech: None,
            voice_key: None,
            transcript_override,
            revision: 0,
        };
        p.sync_voice(profile)?;
        Ok(p)
    }

    /// Rebuilds gesture state; the speech listener survives unless its
    /// settings changed.
    pub fn apply_profile(&mut self, profile: &Profile) -> Result<()> {
        self.session = Session::new(profile.session_config()?);
        self.tracker = Tracker::new(profile.source.mirror);
        self.sync_voice(profile)
    }

    fn voice_key(&self, profile: &Profile) -> Option<VoiceKey> {
        let path = match &self.transcript_override {
            Some(p) => p.clone(),
            None if profile.voice.enabled => profile.voice.transcript_path(),
            None => return None,
        };
        Some(VoiceKey {
            path,
            wake_word: profile.voice.wake_word.clone(),
            timeout_ms: profile.voice.listening_timeout_ms,
            capacity: profile.voice.queue_capacity,
        })
    }

    fn sync_voice(&mut self, profile: &Profile) -> Result<()> {
        let key = self.voice_key(profile);
        if key == self.voice_key {
            return Ok(());
        }
        // dropping the old listener stops its thread
        self.speech = None;
        if let Some(k) = &key {
            let transcriber = StreamTranscriber::open(&k.path);
            self.speech = Some(SpeechListener::spawn(
                Box::new(transcriber),
                profile.voice.listener(),
            )?);
            info!("speech input from {}", k.path.display());
        }
        self.voice_key = key;
        Ok(())
    }

    /// One frame, then whatever speech arrived meanwhile. Returns the frame
    /// report and the number of utterances injected.
    pub fn step(&mut self, raw: &RawFrame, sink: &mut dyn ActionSink) -> (FrameReport, usize) {
        let frame = self.tracker.on_frame(raw);
        let report = self.session.process(&frame, sink);

        let mut spoken = 0;
        if let Some(listener) = &self.speech {
            for utterance in listener.drain_pending() {
                if self.session.apply_speech(&utterance, sink).is_some() {
                    spoken += 1;
                }
            }
        }
        (report, spoken)
    }
}

/// Feeds frames until the source ends or a stop is requested.
pub fn drive(
    source: &mut dyn LandmarkSource,
    pipeline: &mut Pipeline,
    sink: &mut UinputSink,
    shared: &PipelineShared,
) -> Result<()> {
    while !shared.should_stop() {
        let current = shared.revision();
        if current != pipeline.revision {
            pipeline.revision = current;
            match pipeline.apply_profile(&shared.profile()) {
                Ok(()) => info!("pipeline picked up the new profile"),
                Err(e) => error!("new profile not applied: {e:#}"),
            }
        }
        sink.set_enabled(shared.is_enabled());

        let raw = match source.next_frame() {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!("{e}");
                shared.with_stats(|s| s.bad_frames += 1);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let (report, spoken) = pipeline.step(&raw, sink);
        let live = sink.is_enabled();
        shared.with_stats(|s| {
            s.frames += 1;
            if live {
                s.actions_fired += report.fired.len() as u64;
                s.utterances += spoken as u64;
            }
            let slot = match report.driver {
                Some(Handedness::Left) => Some(report.left),
                Some(Handedness::Right) => Some(report.right),
                None => None,
            };
            s.last_gesture = slot.and_then(|r| r.confirmed).or(s.last_gesture);
            s.last_swipe = report.swipe.or(s.last_swipe);
        });
    }
    Ok(())
}

/// Daemon frame loop: waits for the landmark FIFO, reads it, and reopens it
/// when the writer goes away.
pub fn run_pipeline(shared: Arc<PipelineShared>) -> Result<()> {
    let mut pipeline = Pipeline::new(&shared.profile(), None)?;
    pipeline.revision = shared.revision();
    let mut sink = UinputSink::for_platform();
    let mut warned_missing = false;

    while !shared.should_stop() {
        let path = shared.profile().landmarks_path();
        if !path.exists() {
            if !warned_missing {
                warn!("landmark source {} missing; pipeline idle", path.display());
                warned_missing = true;
            }
            thread::sleep(RETRY);
            continue;
        }
        warned_missing = false;

        let mut source = match input::open(&path) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to open {}: {e}", path.display());
                thread::sleep(RETRY);
                continue;
            }
        };
        info!("reading landmarks from {}", path.display());
        shared.with_stats(|s| s.source_connected = true);
        let res = drive(source.as_mut(), &mut pipeline, &mut sink, &shared);
        shared.with_stats(|s| s.source_connected = false);

        match res {
            Ok(()) if input::is_fifo(&path) => debug!("landmark writer left; reopening"),
            Ok(()) => {
                info!("{} fully read; waiting for a profile change", path.display());
                wait_for_change(&shared);
            }
            Err(e) => {
                error!("landmark source failed: {e:#}");
                thread::sleep(RETRY);
            }
        }
    }
    Ok(())
}

fn wait_for_change(shared: &PipelineShared) {
    let rev = shared.revision();
    while !shared.should_stop() && shared.revision() == rev {
        thread::sleep(RETRY);
    }
}

pub struct RunOptions {
    pub source: Option<PathBuf>,
    pub transcript: Option<PathBuf>,
    pub profile: Option<String>,
    /// Log actions instead of emitting them.
    pub dry_run: bool,
}

fn load_profile(name: Option<&str>) -> Result<Profile> {
    let cfg = DaemonConfigState::load_or_install_default()?;
    match name {
        Some(n) => cfg.load_profile(n),
        None => Ok(cfg.profile),
    }
}

/// Foreground mode: one stream, no socket. Returns when the stream ends or
/// on SIGINT/SIGTERM.
pub fn run_foreground(opts: RunOptions) -> Result<()> {
    let profile = load_profile(opts.profile.as_deref())?;
    let source_path = opts
        .source
        .clone()
        .unwrap_or_else(|| profile.landmarks_path());
    let shared = Arc::new(PipelineShared::new(profile));

    let (done_tx, done_rx) = mpsc::channel();
    let worker = shared.clone();
    thread::Builder::new()
        .name("pipeline".into())
        .spawn(move || {
            let res = run_stream(&source_path, opts.transcript, opts.dry_run, &worker);
            let _ = done_tx.send(res);
        })?;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    loop {
        if signals.pending().next().is_some() {
            info!("interrupted; stopping");
            shared.request_stop();
            break;
        }
        match done_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(res) => {
                res?;
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("pipeline thread exited unexpectedly"),
        }
    }

    let stats = shared.stats();
    info!(
        "{} frames ({} malformed), {} actions, {} utterances",
        stats.frames, stats.bad_frames, stats.actions_fired, stats.utterances
    );
    Ok(())
}

fn run_stream(
    path: &Path,
    transcript: Option<PathBuf>,
    dry_run: bool,
    shared: &PipelineShared,
) -> Result<()> {
    let mut pipeline = Pipeline::new(&shared.profile(), transcript)?;
    pipeline.revision = shared.revision();
    let mut sink = if dry_run {
        UinputSink::noop()
    } else {
        UinputSink::for_platform()
    };
    let mut source =
        input::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    info!("reading landmarks from {}", path.display());
    drive(source.as_mut(), &mut pipeline, &mut sink, shared)
}

/// Replays a landmark stream and prints one JSON report per frame; nothing
/// is emitted to the OS.
pub fn classify(path: &Path, profile: Option<&str>) -> Result<()> {
    let profile = load_profile(profile)?;
    let mut tracker = Tracker::new(profile.source.mirror);
    let mut session = Session::new(profile.session_config()?);
    let mut sink = UinputSink::noop();
    sink.set_enabled(false);

    let mut source =
        input::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    loop {
        let raw = match source.next_frame() {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(e) if e.is_recoverable() => {
                warn!("{e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let frame = tracker.on_frame(&raw);
        let report = session.process(&frame, &mut sink);
        writeln!(out, "{}", serde_json::to_string(&report)?)?;
    }
    Ok(())
}
