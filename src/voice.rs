//! Wake-word gated speech input.
//!
//! A background thread polls a [`Transcriber`], runs the [`WakeGate`] and
//! queues forwarded utterances; the frame loop drains the queue once per frame
//! and injects them through its own sink.

use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;
use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thiserror::Error;

use crate::actions::{ActionParseError, ActionSink, parse_chord};
use crate::input;

/// Upper bound on one listen attempt, so the stop flag is seen promptly.
const LISTEN_SLICE: Duration = Duration::from_millis(500);

pub const DEFAULT_COMMANDS: &[(&str, &str)] = &[
    ("press enter", "ENTER"),
    ("press tab", "TAB"),
    ("press space", "SPACE"),
    ("press backspace", "BACKSPACE"),
    ("delete", "BACKSPACE"),
    ("press escape", "ESCAPE"),
    ("select all", "CTRL+A"),
    ("copy", "CTRL+C"),
    ("paste", "CTRL+V"),
    ("cut", "CTRL+X"),
    ("undo", "CTRL+Z"),
    ("new line", "ENTER"),
];

#[derive(Debug, Error)]
pub enum TranscriberError {
    #[error("transcript stream closed")]
    Closed,
    #[error("transcript read failed: {0}")]
    Io(#[from] io::Error),
}

/// Speech-to-text collaborator. `Ok(None)` means nothing was understood
/// within `limit`.
pub trait Transcriber: Send {
    fn listen(&mut self, limit: Duration) -> Result<Option<String>, TranscriberError>;
}

/// Reads one transcript per line from a file, FIFO or stdin.
///
/// Reading happens on a helper thread so `listen` can time out. A FIFO is
/// reopened whenever its writer goes away.
pub struct StreamTranscriber {
    rx: Receiver<io::Result<String>>,
}

impl StreamTranscriber {
    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            pump_lines(reader, &tx);
        });
        Self { rx }
    }

    /// `-` reads stdin. Opening happens on the reader thread since a FIFO
    /// blocks until a writer shows up.
    pub fn open(path: &Path) -> Self {
        if path == Path::new("-") {
            return Self::from_reader(BufReader::new(io::stdin()));
        }
        let path = path.to_path_buf();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            loop {
                match File::open(&path) {
                    Ok(f) => {
                        if !pump_lines(BufReader::new(f), &tx) {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
                if !input::is_fifo(&path) {
                    return;
                }
                debug!("transcript writer left {}; reopening", path.display());
            }
        });
        Self { rx }
    }
}

/// Forwards lines until EOF. Returns false once the receiver is gone.
fn pump_lines<R: BufRead>(reader: R, tx: &mpsc::Sender<io::Result<String>>) -> bool {
    for line in reader.lines() {
        let failed = line.is_err();
        if tx.send(line).is_err() {
            return false;
        }
        if failed {
            return false;
        }
    }
    true
}

impl Transcriber for StreamTranscriber {
    fn listen(&mut self, limit: Duration) -> Result<Option<String>, TranscriberError> {
        match self.rx.recv_timeout(limit) {
            Ok(Ok(line)) => {
                let text = line.trim();
                Ok((!text.is_empty()).then(|| text.to_string()))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TranscriberError::Closed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum GateState {
    Idle,
    Active { last_speech: Instant },
}

/// Decides which utterances reach the keyboard.
#[derive(Debug, Clone)]
pub struct WakeGate {
    wake_word: String,
    timeout: Duration,
    state: GateState,
}

impl WakeGate {
    pub fn new(wake_word: &str, timeout: Duration) -> Self {
        Self {
            wake_word: wake_word.trim().to_ascii_lowercase(),
            timeout,
            state: GateState::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, GateState::Active { .. })
    }

    /// Returns the text to forward, if any.
    pub fn on_utterance(&mut self, text: &str, now: Instant) -> Option<String> {
        match self.state {
            GateState::Active { .. } => {
                self.state = GateState::Active { last_speech: now };
                Some(text.trim().to_string()).filter(|t| !t.is_empty())
            }
            GateState::Idle => {
                let lower = text.to_ascii_lowercase();
                let at = lower.find(&self.wake_word)?;
                info!("wake word heard; listening");
                self.state = GateState::Active { last_speech: now };

                let rest = text[at + self.wake_word.len()..]
                    .trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '.')
                    .trim_end();
                (!rest.is_empty()).then(|| rest.to_string())
            }
        }
    }

    /// Nothing understood, or the attempt failed.
    pub fn on_silence(&mut self, now: Instant) {
        if let GateState::Active { last_speech } = self.state {
            if now.saturating_duration_since(last_speech) > self.timeout {
                info!("silence timeout; back to waiting for the wake word");
                self.state = GateState::Idle;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub wake_word: String,
    pub listening_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            wake_word: "hey adam".into(),
            listening_timeout: Duration::from_secs(3),
            queue_capacity: 16,
        }
    }
}

pub struct SpeechListener {
    rx: Receiver<String>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SpeechListener {
    pub fn spawn(mut transcriber: Box<dyn Transcriber>, cfg: ListenerConfig) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(cfg.queue_capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name("speech".into())
            .spawn(move || {
                let mut gate = WakeGate::new(&cfg.wake_word, cfg.listening_timeout);
                info!("speech listener waiting for '{}'", cfg.wake_word);
                while !stop_flag.load(Ordering::Relaxed) {
                    if !listen_once(transcriber.as_mut(), &mut gate, &tx) {
                        break;
                    }
                }
                debug!("speech listener stopped");
            })?;

        Ok(Self {
            rx,
            stop,
            handle: Some(handle),
        })
    }

    /// Everything queued since the last call; never blocks.
    pub fn drain_pending(&self) -> Vec<String> {
        self.rx.try_iter().collect()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for SpeechListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One listen attempt. Returns false when the listener should exit.
fn listen_once(
    transcriber: &mut dyn Transcriber,
    gate: &mut WakeGate,
    tx: &SyncSender<String>,
) -> bool {
    match transcriber.listen(LISTEN_SLICE) {
        Ok(Some(text)) => {
            let Some(utterance) = gate.on_utterance(&text, Instant::now()) else {
                return true;
            };
            match tx.try_send(utterance) {
                Ok(()) => true,
                Err(TrySendError::Full(u)) => {
                    debug!("speech queue full; dropped {u:?}");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        }
        Ok(None) => {
            gate.on_silence(Instant::now());
            true
        }
        Err(TranscriberError::Closed) => {
            warn!("transcript stream closed; speech listener exiting");
            false
        }
        Err(e) => {
            debug!("transcription attempt failed: {e}");
            gate.on_silence(Instant::now());
            true
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SpeechAction {
    Chord(String),
    Text(String),
}

impl SpeechAction {
    pub fn perform(&self, sink: &mut dyn ActionSink) -> Result<()> {
        match self {
            SpeechAction::Chord(c) => sink.key_chord(c),
            SpeechAction::Text(t) => sink.type_text(t),
        }
    }
}

/// Spoken phrases that press keys instead of being typed.
#[derive(Debug, Clone)]
pub struct CommandMap {
    commands: HashMap<String, String>,
}

fn normalize(phrase: &str) -> String {
    phrase.trim().to_lowercase()
}

impl CommandMap {
    /// Built-in vocabulary plus `extra`, which wins on conflicts.
    pub fn new(extra: &HashMap<String, String>) -> Result<Self, ActionParseError> {
        let mut map = Self::default();
        for (phrase, chord) in extra {
            map.commands.insert(normalize(phrase), parse_chord(chord)?);
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn resolve(&self, utterance: &str) -> Option<SpeechAction> {
        let text = utterance.trim();
        if text.is_empty() {
            return None;
        }
        Some(match self.commands.get(&normalize(text)) {
            Some(chord) => SpeechAction::Chord(chord.clone()),
            None => SpeechAction::Text(text.to_string()),
        })
    }
}

impl Default for CommandMap {
    fn default() -> Self {
        let commands = DEFAULT_COMMANDS
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect();
        Self { commands }
    }
}
