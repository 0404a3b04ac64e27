//! Where the snapshot lives.

use std::path::PathBuf;

pub const SNAPSHOT_ENV: &str = "SUBREADER_SNAPSHOT";

/// `--snapshot`, else `$SUBREADER_SNAPSHOT`, else
/// `$XDG_CONFIG_HOME/subreader/backend.json` (`~/.config` when unset).
/// A leading `~` is expanded.
pub fn snapshot_path(flag: Option<&str>, env: impl Fn(&str) -> Option<String>) -> PathBuf {
    let raw = flag
        .map(str::to_string)
        .or_else(|| env(SNAPSHOT_ENV).filter(|v| !v.is_empty()))
        .unwrap_or_else(|| {
            let base = env("XDG_CONFIG_HOME")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "~/.config".to_string());
            format!("{}/subreader/backend.json", base.trim_end_matches('/'))
        });
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

/// [`snapshot_path`] against the process environment.
pub fn snapshot_path_from_env(flag: Option<&str>) -> PathBuf {
    snapshot_path(flag, |key| std::env::var(key).ok())
}
