//! The FS change set: an ordered list of (path, content, mode) entries with
//! write, hash, and summary operations.
//!
//! Entry order is significant — the content hash that gives a PR its
//! identity is computed over the entries in declaration order.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sha1::{Digest, Sha1};

/// Git file mode for a regular file.
pub const GIT_MODE_FILE: &str = "100644";
/// Git file mode for an executable file.
pub const GIT_MODE_EXECUTABLE: &str = "100755";

/// One intended file in the remediation working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FsEntry {
    /// Path relative to the working-tree root.
    pub path: String,
    /// Full file content.
    pub content: String,
    /// Git file mode string.
    pub mode: String,
}

/// SHA-1 over `path || content` for each entry in order.
///
/// This is an identity hash, not a security boundary; SHA-1 is chosen for
/// compactness of the marker it ends up in.
#[must_use]
pub fn content_sha1(entries: &[FsEntry]) -> String {
    let mut hasher = Sha1::new();
    for entry in entries {
        hasher.update(entry.path.as_bytes());
        hasher.update(entry.content.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// The magic comment embedded in a PR body to give it a content-addressed
/// identity. Two PRs with the same marker are the same PR.
#[must_use]
pub fn magic_marker(content_sha: &str) -> String {
    format!("<!-- minder: pr-remediation-body: {{ \"ContentSha\": \"{content_sha}\" }} -->")
}

/// Write the entries into the working tree rooted at `root`, creating parent
/// directories as needed. Returns the relative paths written, in order.
pub fn write_entries(root: &Path, entries: &[FsEntry]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(entries.len());
    for entry in entries {
        let target = root.join(&entry.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating parent directories for {}", entry.path))?;
        }
        fs::write(&target, &entry.content)
            .with_context(|| format!("writing entry {}", entry.path))?;

        #[cfg(unix)]
        if entry.mode == GIT_MODE_EXECUTABLE {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(0o755))
                .with_context(|| format!("setting mode on {}", entry.path))?;
        }

        written.push(PathBuf::from(&entry.path));
    }
    Ok(written)
}

/// Write a JSON summary of the entries, one object per line.
pub fn write_summary(w: &mut dyn Write, entries: &[FsEntry]) -> io::Result<()> {
    for entry in entries {
        let line = serde_json::to_string(entry)
            .map_err(io::Error::other)?;
        writeln!(w, "{line}")?;
    }
    Ok(())
}
