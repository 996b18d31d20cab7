//! Utility functions for mealrl
//!
//! State-key previews for logs and reports, and env-file loading shared by
//! the daemon and the CLI.

use std::path::{Path, PathBuf};

/// Truncate at a character boundary, never inside a multi-byte character.
///
/// State keys carry lower-cased ingredient names in any script, so byte
/// slicing would panic on real data.
///
/// ```
/// use mealrl_core::util::preview;
///
/// assert_eq!(preview("avail=[\"egg\"]", 5), "avail");
/// assert_eq!(preview("phở bò", 3), "phở");
/// ```
#[inline]
pub fn preview(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Candidate locations of the `mealrl.env` file, in lookup order.
pub fn env_file_candidates() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/usr/local/etc/mealrl/mealrl.env")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("mealrl").join("mealrl.env"));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config").join("mealrl").join("mealrl.env"));
    }
    paths.push(PathBuf::from("mealrl.env"));
    paths
}

/// Load variables from the first `mealrl.env` found.
///
/// Variables already present in the process environment win.
pub fn load_env_file() -> Option<PathBuf> {
    let path = env_file_candidates().into_iter().find(|p| p.exists())?;
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let applied = parse_env_file(&contents);
            tracing::debug!("Loaded {} variable(s) from {:?}", applied, path);
        }
        Err(e) => tracing::warn!("Could not read env file {:?}: {}", path, e),
    }
    Some(path)
}

/// Apply `KEY=value` lines to the process environment.
///
/// Accepts `export KEY=value`, single or double quoted values and `#`
/// comments. Returns how many variables were set.
pub fn parse_env_file(contents: &str) -> usize {
    let mut applied = 0;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || std::env::var_os(key).is_some() {
            continue;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        std::env::set_var(key, value);
        applied += 1;
    }
    applied
}

/// Append a suffix to the final path component (`table.json` -> `table.json.lock`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}
