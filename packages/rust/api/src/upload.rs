//! Upload staging: file name sanitization and the staged path.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Local;
use kbforge_shared::{KbForgeError, Result};
use regex::Regex;
use tokio::io::AsyncWriteExt;

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

static UNSAFE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid regex"));

/// Reduce a client-supplied file name to a safe ASCII name.
///
/// Whitespace runs become `_`, anything outside `[A-Za-z0-9._-]` is dropped
/// and leading `.`/`_` are stripped. A name with nothing left (or no stem)
/// becomes `upload.<ext>`.
pub fn secure_filename(name: &str) -> String {
    // Browsers on Windows may send the full client path.
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let spaced = WHITESPACE_RE.replace_all(base.trim(), "_");
    let cleaned = UNSAFE_RE.replace_all(&spaced, "");
    let cleaned = cleaned.trim_start_matches(['.', '_']);

    let has_stem = Path::new(cleaned)
        .file_stem()
        .is_some_and(|stem| !stem.is_empty());
    if has_stem && cleaned.contains('.') {
        return cleaned.to_string();
    }

    let ext = Path::new(base)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ext.is_empty() {
        "upload".to_string()
    } else {
        format!("upload.{ext}")
    }
}

/// Write `bytes` to `<dir>/<YYYYmmdd_HHMMSS>_<uuid>_<safe_name>`, creating `dir`.
///
/// Every call gets its own file, even for the same name within one second.
pub(crate) async fn stage(dir: &Path, safe_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| KbForgeError::io(dir, e))?;

    let path = dir.join(staged_name(safe_name));
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(|e| KbForgeError::io(&path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| KbForgeError::io(&path, e))?;
    Ok(path)
}

/// Unique staging name for `safe_name`.
pub fn staged_name(safe_name: &str) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{timestamp}_{}_{safe_name}", uuid::Uuid::now_v7().simple())
}
