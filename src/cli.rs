use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{env, path::PathBuf, process::Command};

use crate::actions::{Action, ActionSink, MouseButton, UinputSink, parse_chord};
use crate::ipc::{self, RunOptions};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            match topic {
                Some(t) => print_subcmd_help(&t),
                None => print_help(),
            }
            Ok(())
        }

        Some("start") => {
            let exe = env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("gesturectl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request("shutdown"),
        Some("status") => request("status"),
        Some("reload") => request("reload"),
        Some("list") => request("list"),
        Some("doctor") => request("doctor"),
        Some("pause") => request("pause"),
        Some("resume") => request("resume"),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gesturectl use <profile_name>"))?;
            let r = ipc::client_request(serde_json::json!({"op":"use","profile":name}))?;
            print_response(&r);
            Ok(())
        }

        Some("run") => {
            let opts = RunOptions {
                source: pargs.opt_value_from_str::<_, PathBuf>("--source")?,
                transcript: pargs.opt_value_from_str::<_, PathBuf>("--transcript")?,
                profile: pargs.opt_value_from_str("--profile")?,
                dry_run: pargs.contains("--dry-run"),
            };
            ipc::run_foreground(opts)
        }

        Some("classify") => {
            let profile: Option<String> = pargs.opt_value_from_str("--profile")?;
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gesturectl classify <landmarks.jsonl|-> [--profile NAME]"))?;
            ipc::classify(&path, profile.as_deref())
        }

        Some("emit") => emit(pargs),

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn request(op: &str) -> Result<()> {
    let r = ipc::client_request(serde_json::json!({ "op": op }))?;
    print_response(&r);
    Ok(())
}

/// One `emit` request, parsed before the device is opened.
#[derive(Debug, PartialEq)]
enum Emit {
    Action(Action),
    Move(i32, i32),
    Type(String),
}

// usage:
//   gesturectl emit click right
//   gesturectl emit scroll 3
//   gesturectl emit key CTRL+EQUAL
fn parse_emit(mut pargs: Arguments) -> Result<Emit> {
    let what: String = pargs.free_from_str().map_err(|_| {
        anyhow!("usage: gesturectl emit <click|scroll|move|key|type|volume|media|window> ...")
    })?;
    let emit = match what.as_str() {
        "click" => {
            let btn: MouseButton = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gesturectl emit click <left|right|middle>"))?;
            Emit::Action(Action::Click(btn))
        }
        "scroll" => {
            let steps: i32 = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gesturectl emit scroll <steps>"))?;
            Emit::Action(Action::Scroll(steps))
        }
        "move" => {
            let usage = || anyhow!("usage: gesturectl emit move <dx> <dy>");
            let dx: i32 = pargs.free_from_str().map_err(|_| usage())?;
            let dy: i32 = pargs.free_from_str().map_err(|_| usage())?;
            Emit::Move(dx, dy)
        }
        "key" => {
            let chord: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gesturectl emit key CTRL+EQUAL"))?;
            Emit::Action(Action::Key(parse_chord(&chord)?))
        }
        "type" => {
            let words: Vec<String> = pargs
                .finish()
                .into_iter()
                .map(|s| s.to_string_lossy().into_owned())
                .collect();
            if words.is_empty() {
                return Err(anyhow!("usage: gesturectl emit type <text...>"));
            }
            Emit::Type(words.join(" "))
        }
        "volume" => {
            let dir: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gesturectl emit volume <up|down>"))?;
            match dir.as_str() {
                "up" => Emit::Action(Action::VolumeUp),
                "down" => Emit::Action(Action::VolumeDown),
                other => return Err(anyhow!("unknown volume direction: {other}")),
            }
        }
        "media" => Emit::Action(Action::PlayPause),
        "window" => {
            let op: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gesturectl emit window <minimize|maximize>"))?;
            match op.as_str() {
                "min" | "minimize" => Emit::Action(Action::MinimizeWindow),
                "max" | "maximize" => Emit::Action(Action::MaximizeWindow),
                other => return Err(anyhow!("unknown window op: {other}")),
            }
        }
        other => return Err(anyhow!("unknown emit kind: {other}")),
    };
    Ok(emit)
}

fn emit(pargs: Arguments) -> Result<()> {
    let emit = parse_emit(pargs)?;
    let mut sink = UinputSink::new()?;
    match &emit {
        Emit::Action(action) => {
            action.perform(&mut sink)?;
            println!("ok: {action}");
        }
        Emit::Move(dx, dy) => {
            sink.move_cursor(*dx, *dy)?;
            println!("ok: moved cursor {dx},{dy}");
        }
        Emit::Type(text) => {
            sink.type_text(text)?;
            println!("ok: typed {} chars", text.chars().count());
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"gesturectl: hand gesture and voice control for the desktop

USAGE:
  gesturectl help [command]                 Show general or command-specific help
  gesturectl start                          Start the daemon
  gesturectl stop                           Stop the daemon
  gesturectl status                         Show daemon state and counters
  gesturectl reload                         Reload active profile
  gesturectl use <name>                     Switch active profile
  gesturectl list                           List profiles
  gesturectl doctor                         Diagnose permissions and input paths
  gesturectl pause | resume                 Suspend or resume OS actions
  gesturectl run [--source PATH] [--transcript PATH] [--profile NAME] [--dry-run]
                                            Run in the foreground without a daemon
  gesturectl classify <PATH|-> [--profile NAME]
                                            Print per-frame gesture reports as JSON
  gesturectl emit click <left|right|middle> Emit a mouse click
  gesturectl emit scroll <steps>            Emit vertical scroll (+/- steps)
  gesturectl emit key CTRL+EQUAL            Emit a key or chord

TIPS:
  - Landmarks: JSON lines written to ~/.local/run/gesturectl-landmarks
  - Profiles: ~/.config/gesturectl/profiles
  - Active profile pointer: ~/.config/gesturectl/active
  - Log level: RUST_LOG=gesturectl=debug
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: gesturectl start\nStarts the background daemon."),
        "stop" => println!("usage: gesturectl stop\nStops the running daemon."),
        "status" => println!(
            "usage: gesturectl status\nShows enabled flag, active profile, input paths and frame/action counters."
        ),
        "reload" => println!(
            "usage: gesturectl reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: gesturectl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: gesturectl list\nLists available profiles and the active one."),
        "doctor" => println!(
            "usage: gesturectl doctor\nChecks uinput permissions and the landmark/transcript paths."
        ),
        "pause" | "resume" => println!(
            "usage: gesturectl pause | gesturectl resume\nGestures are still recognized while paused; nothing reaches the OS."
        ),
        "run" => println!(
            "usage: gesturectl run [--source PATH|-] [--transcript PATH|-] [--profile NAME] [--dry-run]\n\
             Reads landmarks in the foreground until the stream ends or Ctrl-C.\n\
             --transcript enables speech input regardless of the profile.\n\
             --dry-run logs actions instead of emitting them."
        ),
        "classify" => println!(
            "usage: gesturectl classify <PATH|-> [--profile NAME]\n\
             Replays a landmark stream and prints one JSON report per frame. Emits nothing."
        ),
        "emit" => println!(
            "usage:\n  gesturectl emit click <left|right|middle>\n  gesturectl emit scroll <steps>\n  gesturectl emit move <dx> <dy>\n  gesturectl emit key CTRL+EQUAL\n  gesturectl emit type <text...>\n  gesturectl emit volume <up|down>\n  gesturectl emit media\n  gesturectl emit window <min|max>"
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
