use directories::UserDirs;
use std::{env, fs, path::PathBuf};

/// `~/.local/run`, or the temp dir when there is no home.
pub fn runtime_dir() -> PathBuf {
    let dir = UserDirs::new()
        .map(|u| u.home_dir().join(".local").join("run"))
        .unwrap_or_else(env::temp_dir);
    let _ = fs::create_dir_all(&dir);
    dir
}

pub fn socket_path() -> PathBuf {
    runtime_dir().join("gesturectl.sock")
}

pub fn default_landmarks_path() -> PathBuf {
    runtime_dir().join("gesturectl-landmarks")
}

pub fn default_transcript_path() -> PathBuf {
    runtime_dir().join("gesturectl-transcript")
}
