//! Writing downloaded files without clobbering anything

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::{Builder, PersistError};

/// Strip any directory components a sender may have put in the name.
pub fn safe_file_name(name: &str) -> String {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    match base {
        "" | "." | ".." => "download".to_string(),
        other => other.chars().map(|c| if c.is_control() { '_' } else { c }).collect(),
    }
}

/// `name.ext`, `name (1).ext`, `name (2).ext`, ...
fn candidate(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({n}).{ext}"),
        _ => format!("{name} ({n})"),
    }
}

/// Create a new file in `dir` and write `bytes` to it. Existing files are never
/// overwritten; a numbered suffix is added instead.
pub fn write_unique(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    write_unique_with(dir, name, |file| file.write_all(bytes))
}

/// The content is staged in a hidden temp file in `dir` and only linked under
/// its final name once fully written and synced. On any error the temp file is
/// removed, so no partial plaintext is left behind.
fn write_unique_with<F>(dir: &Path, name: &str, fill: F) -> io::Result<PathBuf>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let name = safe_file_name(name);
    let mut staged = Builder::new().prefix(".sealdrop-").tempfile_in(dir)?;
    fill(staged.as_file_mut())?;
    staged.as_file().sync_all()?;

    for n in 0..10_000 {
        let path = dir.join(candidate(&name, n));
        match staged.persist_noclobber(&path) {
            Ok(_) => return Ok(path),
            Err(PersistError { error, file }) if error.kind() == io::ErrorKind::AlreadyExists => {
                staged = file;
            }
            Err(PersistError { error, .. }) => return Err(error),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for {name} in {}", dir.display()),
    ))
}
