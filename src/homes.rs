//! Home directory provisioning
//!
//! Copies the skeleton tree into new homes with ownership fix-up, removes
//! homes recursively, and runs the ordered hook scripts around user
//! creation and removal.

use crate::identity::UserRecord;
use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// Mode of a freshly provisioned home directory.
const HOME_MODE: u32 = 0o700;

/// Recursively copy `source` into `destination`, chowning every entry to
/// `uid:gid`. Existing directories are accepted; any I/O error aborts.
pub fn copy_tree(source: &Path, destination: &Path, uid: u32, gid: u32) -> Result<()> {
    if !destination.exists() {
        fs::create_dir(destination).context("Directory create failed")?;
    }
    std::os::unix::fs::chown(destination, Some(uid), Some(gid))
        .context("Directory ownership change failed")?;

    let mut directories = Vec::new();
    let mut files = Vec::new();
    for entry in fs::read_dir(source)
        .with_context(|| format!("Failed to read {}", source.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            directories.push(entry.file_name());
        } else {
            files.push(entry.file_name());
        }
    }

    for name in directories {
        copy_tree(&source.join(&name), &destination.join(&name), uid, gid)?;
    }

    for name in files {
        let target = destination.join(&name);
        fs::copy(source.join(&name), &target).context("Failed to copy file")?;
        std::os::unix::fs::chown(&target, Some(uid), Some(gid))
            .context("Failed to change file ownership")?;
    }

    Ok(())
}

/// Provision the home directory of `user` from the skeleton tree.
pub fn make_home(skel: &Path, user: &UserRecord) -> Result<()> {
    copy_tree(skel, &user.home, user.uid, user.gid)?;
    fs::set_permissions(&user.home, fs::Permissions::from_mode(HOME_MODE))
        .context("Home directory permissions change failed")?;
    Ok(())
}

/// Recursively delete `path`.
pub fn remove_tree(path: &Path) -> Result<()> {
    fs::remove_dir_all(path)
        .with_context(|| format!("Removing directory {} failed", path.display()))
}

/// Run the executable `*.sh` hooks in `dir`, ordered with numeric-aware
/// collation, each with the decimal `uid` as its only argument. Failing
/// hooks are logged and skipped.
pub fn execute_hooks(uid: u32, dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let mut scripts: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_name().to_string_lossy().ends_with(".sh")
                && entry
                    .metadata()
                    .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
                    .unwrap_or(false)
        })
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();

    scripts.sort_by(|a, b| natural_cmp(a, b));

    for script in scripts {
        let path = dir.join(&script);
        debug!("running user script {}", path.display());
        match Command::new(&path).arg(uid.to_string()).status() {
            Ok(status) if !status.success() => {
                warn!("user script {} returned: {status}", path.display());
            }
            Err(err) => warn!("user script {} failed to run: {err}", path.display()),
            _ => {}
        }
    }
}

/// Compare strings so that embedded decimal numbers order numerically,
/// making `9.sh` sort before `10.sh`.
pub(crate) fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let run_a = digit_run(&a[i..]);
            let run_b = digit_run(&b[j..]);
            let trimmed_a = trim_zeros(run_a);
            let trimmed_b = trim_zeros(run_b);
            let ordering = trimmed_a
                .len()
                .cmp(&trimmed_b.len())
                .then_with(|| trimmed_a.cmp(trimmed_b));
            if ordering != Ordering::Equal {
                return ordering;
            }
            i += run_a.len();
            j += run_b.len();
        } else {
            let ordering = a[i].cmp(&b[j]);
            if ordering != Ordering::Equal {
                return ordering;
            }
            i += 1;
            j += 1;
        }
    }
    (a.len() - i).cmp(&(b.len() - j))
}

fn digit_run(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .position(|byte| !byte.is_ascii_digit())
        .unwrap_or(bytes.len());
    &bytes[..end]
}

fn trim_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|byte| *byte != b'0')
        .unwrap_or(bytes.len());
    &bytes[start..]
}
