//! `/etc/environment` editing.
//!
//! Rewrites exactly the `LAST_LOGIN_UID=` line in place, preserving every
//! other line. The daemon is the file's only writer; a crash mid-write at
//! worst leaves a malformed line that the next switch repairs.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::warn;

const LAST_LOGIN_UID_KEY: &[u8] = b"LAST_LOGIN_UID=";

/// Record `uid` as the last logged-in user. Best-effort; failures are
/// logged and swallowed.
pub fn set_last_login_uid(file: &Path, uid: u32) {
    if let Err(err) = patch(file, uid) {
        warn!("failed to update {}: {err}", file.display());
    }
}

fn patch(path: &Path, uid: u32) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    let mut content = Vec::new();
    file.read_to_end(&mut content)?;

    // Offset of the line carrying the key, and of the data following it.
    let mut line_start = 0;
    let mut found = None;
    for line in content.split_inclusive(|byte| *byte == b'\n') {
        if line.starts_with(LAST_LOGIN_UID_KEY) {
            found = Some((line_start, line_start + line.len()));
            break;
        }
        line_start += line.len();
    }

    let (offset, rest) = match found {
        Some((start, end)) => (start, &content[end..]),
        None => (content.len(), &[][..]),
    };

    file.seek(SeekFrom::Start(offset as u64))?;
    file.write_all(LAST_LOGIN_UID_KEY)?;
    file.write_all(uid.to_string().as_bytes())?;
    file.write_all(b"\n")?;
    file.write_all(rest)?;
    let end = file.stream_position()?;
    file.set_len(end)?;
    Ok(())
}
