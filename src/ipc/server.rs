use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    sync::{
        Arc,
        mpsc::{self, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use super::pipeline::{PipelineShared, run_pipeline};
use super::runtime::socket_path;
use crate::config::DaemonConfigState;

/// Quiet period after the last profile file event before reloading.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(300);
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path();
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    // state
    let mut state = DaemonState::new()?;
    info!("daemon: active profile '{}'", state.cfg.active_name);

    // channels
    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();

    // frame loop
    let _pipeline = PipelineThread::start(state.shared.clone())?;

    // profile edits
    let _watcher = match watch_profiles(&state.cfg, tx_req.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("profile watcher unavailable: {e}");
            None
        }
    };

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let mut pending_reload: Option<Instant> = None;

    // accept loop
    listener.set_nonblocking(true)?;
    'outer: loop {
        if let Ok((stream, _)) = listener.accept() {
            let tx = tx_req.clone();
            let st_snapshot = state.clone_shallow();
            thread::spawn(move || {
                if let Err(e) = handle_client(stream, st_snapshot, tx) {
                    error!("ipc client error: {e}");
                }
            });
        }

        if let Some(sig) = signals.pending().next() {
            info!("daemon: signal {sig}; shutting down");
            break;
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload { reply } => {
                    let res = state.reload().map_err(|e| format!("{e:#}"));
                    let _ = reply.send(res);
                }
                IpcMsg::UseProfile { name, reply } => {
                    let res = state.use_profile(&name).map_err(|e| format!("{e:#}"));
                    let _ = reply.send(res);
                }
                IpcMsg::FilesChanged => pending_reload = Some(Instant::now()),
                IpcMsg::Shutdown => break 'outer,
            }
        }

        if pending_reload.is_some_and(|t| t.elapsed() >= WATCH_DEBOUNCE) {
            pending_reload = None;
            if let Err(e) = state.reload() {
                error!("profile change not applied: {e:#}");
            }
        }

        thread::sleep(Duration::from_millis(5));
    }

    state.shared.request_stop();
    let _ = std::fs::remove_file(&sock);
    info!("daemon: stopped");
    Ok(())
}

fn watch_profiles(cfg: &DaemonConfigState, tx: Sender<IpcMsg>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(ev) if ev.kind.is_create() || ev.kind.is_modify() || ev.kind.is_remove() => {
                debug!("profile files changed: {:?}", ev.paths);
                let _ = tx.send(IpcMsg::FilesChanged);
            }
            Ok(_) => {}
            Err(e) => warn!("profile watch error: {e}"),
        }
    })?;
    watcher.watch(&cfg.profiles_dir, RecursiveMode::NonRecursive)?;
    info!("watching {}", cfg.profiles_dir.display());
    Ok(watcher)
}

fn handle_client(mut stream: UnixStream, st: DaemonState, tx_req: Sender<IpcMsg>) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    let resp = match op {
        "status" => {
            let voice = &st.cfg.profile.voice;
            serde_json::json!({"ok": true, "data": {
                "enabled": st.shared.is_enabled(),
                "active_profile": st.cfg.active_name,
                "profile_name": st.cfg.profile.meta.name,
                "socket": socket_path(),
                "landmarks": st.cfg.profile.landmarks_path(),
                "transcript": voice.enabled.then(|| voice.transcript_path()),
                "stats": st.shared.stats(),
            }})
        }
        "reload" => {
            let (reply, rx) = mpsc::channel();
            let _ = tx_req.send(IpcMsg::Reload { reply });
            reply_json(rx.recv_timeout(REPLY_TIMEOUT))
        }
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            let (reply, rx) = mpsc::channel();
            let _ = tx_req.send(IpcMsg::UseProfile {
                name: name.to_string(),
                reply,
            });
            reply_json(rx.recv_timeout(REPLY_TIMEOUT))
        }
        "list" => {
            let list = st.cfg.list_profiles();
            serde_json::json!({"ok": true, "data": {"profiles": list, "active": st.cfg.active_name}})
        }
        "doctor" => {
            let report = st.cfg.doctor_report();
            serde_json::json!({"ok": true, "data": report})
        }
        "pause" | "resume" => {
            let on = op == "resume";
            st.shared.set_enabled(on);
            info!("actions {}", if on { "resumed" } else { "paused" });
            serde_json::json!({"ok": true, "data": {"enabled": on}})
        }
        "shutdown" => {
            let _ = tx_req.send(IpcMsg::Shutdown);
            serde_json::json!({"ok": true, "data": "shutting down"})
        }
        _ => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
    };

    writeln!(stream, "{resp}")?;
    Ok(())
}

fn reply_json(
    res: std::result::Result<std::result::Result<String, String>, mpsc::RecvTimeoutError>,
) -> serde_json::Value {
    match res {
        Ok(Ok(active)) => serde_json::json!({"ok": true, "data": {"active_profile": active}}),
        Ok(Err(e)) => serde_json::json!({"ok": false, "error": e}),
        Err(_) => serde_json::json!({"ok": false, "error": "daemon did not answer in time"}),
    }
}

struct DaemonState {
    cfg: DaemonConfigState,
    shared: Arc<PipelineShared>,
}

impl DaemonState {
    fn new() -> Result<Self> {
        let cfg = DaemonConfigState::load_or_install_default()?;
        Ok(Self::with_config(cfg))
    }

    fn with_config(cfg: DaemonConfigState) -> Self {
        let shared = Arc::new(PipelineShared::new(cfg.profile.clone()));
        Self { cfg, shared }
    }

    fn clone_shallow(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
            shared: self.shared.clone(),
        }
    }

    fn reload(&mut self) -> Result<String> {
        self.cfg.reload()?;
        self.shared.update_profile(self.cfg.profile.clone());
        info!("profile '{}' reloaded", self.cfg.active_name);
        Ok(self.cfg.active_name.clone())
    }

    fn use_profile(&mut self, name: &str) -> Result<String> {
        self.cfg.set_active(name)?;
        self.shared.update_profile(self.cfg.profile.clone());
        info!("switched active profile to {}", self.cfg.active_name);
        Ok(self.cfg.active_name.clone())
    }
}

enum IpcMsg {
    Reload {
        reply: Sender<std::result::Result<String, String>>,
    },
    UseProfile {
        name: String,
        reply: Sender<std::result::Result<String, String>>,
    },
    Shutdown,
    FilesChanged,
}

struct PipelineThread {
    _thread: thread::JoinHandle<()>,
}

impl PipelineThread {
    fn start(shared: Arc<PipelineShared>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("pipeline".into())
            .spawn(move || {
                if let Err(e) = run_pipeline(shared) {
                    error!("gesture pipeline failed: {e:#}");
                }
            })?;
        Ok(Self { _thread: handle })
    }
}

// client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path();
    if !sock.exists() {
        return Err(anyhow!(
            "gesturectl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (tempfile::TempDir, DaemonState) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DaemonConfigState::load_in(dir.path().to_path_buf()).unwrap();
        (dir, DaemonState::with_config(cfg))
    }

    fn roundtrip(st: DaemonState, tx: Sender<IpcMsg>, req: &str) -> serde_json::Value {
        let (mut client, server) = UnixStream::pair().unwrap();
        writeln!(client, "{req}").unwrap();
        handle_client(server, st, tx).unwrap();
        let mut resp = String::new();
        BufReader::new(client).read_line(&mut resp).unwrap();
        serde_json::from_str(&resp).unwrap()
    }

    #[test]
    fn status_reports_profile_and_stats() {
        let (_dir, st) = state();
        let (tx, _rx) = mpsc::channel();
        let v = roundtrip(st, tx, r#"{"op":"status"}"#);
        assert_eq!(v["ok"], true);
        assert_eq!(v["data"]["active_profile"], "default");
        assert_eq!(v["data"]["profile_name"], "default");
        assert_eq!(v["data"]["enabled"], true);
        assert_eq!(v["data"]["stats"]["frames"], 0);
        assert!(v["data"]["transcript"].is_null());
    }

    #[test]
    fn pause_and_resume_toggle_shared_flag() {
        let (_dir, st) = state();
        let shared = st.shared.clone();
        let (tx, _rx) = mpsc::channel();

        let v = roundtrip(st.clone_shallow(), tx.clone(), r#"{"op":"pause"}"#);
        assert_eq!(v["data"]["enabled"], false);
        assert!(!shared.is_enabled());

        roundtrip(st, tx, r#"{"op":"resume"}"#);
        assert!(shared.is_enabled());
    }

    #[test]
    fn use_waits_for_main_loop_reply() {
        let (_dir, st) = state();
        let (tx, rx) = mpsc::channel::<IpcMsg>();
        let main = thread::spawn(move || match rx.recv().unwrap() {
            IpcMsg::UseProfile { name, reply } => {
                reply.send(Err(format!("profile '{name}' not found"))).unwrap();
            }
            _ => panic!("unexpected message"),
        });

        let v = roundtrip(st, tx, r#"{"op":"use","profile":"nope"}"#);
        main.join().unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "profile 'nope' not found");
    }

    #[test]
    fn reload_pushes_profile_to_pipeline() {
        let (dir, mut st) = state();
        std::fs::write(
            dir.path().join("profiles").join("default.toml"),
            "[cooldowns]\nclick_ms = 50\n",
        )
        .unwrap();
        assert_eq!(st.reload().unwrap(), "default");
        assert_eq!(st.shared.profile().cooldowns.click_ms, 50);
    }

    #[test]
    fn doctor_names_the_config_dir() {
        let (dir, st) = state();
        let (tx, _rx) = mpsc::channel();
        let v = roundtrip(st, tx, r#"{"op":"doctor"}"#);
        assert_eq!(v["ok"], true);
        assert_eq!(v["data"]["config_dir"], dir.path().to_str().unwrap());
        assert_eq!(v["data"]["profile_name"], "default");
    }

    #[test]
    fn unknown_op_is_an_error() {
        let (_dir, st) = state();
        let (tx, _rx) = mpsc::channel();
        let v = roundtrip(st, tx, r#"{"op":"dance"}"#);
        assert_eq!(v["ok"], false);
    }
}
