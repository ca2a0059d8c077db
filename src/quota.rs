//! Per-user disk quotas on the home filesystem.
//!
//! Limits are best-effort: a kernel or filesystem without quota support
//! only produces a log line, never a failed user creation.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::{debug, warn};

/// Soft limit ceiling in bytes (20 % of the filesystem is used below it).
const MAXIMUM_QUOTA_LIMIT: u64 = 2_000_000_000;

/// Kernel quota block size.
const DQ_BLOCK_SIZE: u64 = 1024;

// <linux/quota.h>; the libc crate does not export the quota ABI.
const Q_SETQUOTA: u32 = 0x0080_0008;
const USRQUOTA: u32 = 0;
const SUBCMDSHIFT: u32 = 8;
const QIF_BLIMITS: u32 = 1;
const QIF_ILIMITS: u32 = 4;
const QIF_LIMITS: u32 = QIF_BLIMITS | QIF_ILIMITS;

fn qcmd(cmd: u32, kind: u32) -> libc::c_int {
    ((cmd << SUBCMDSHIFT) | kind) as libc::c_int
}

#[repr(C)]
#[derive(Default)]
struct IfDqblk {
    dqb_bhardlimit: u64,
    dqb_bsoftlimit: u64,
    dqb_curspace: u64,
    dqb_ihardlimit: u64,
    dqb_isoftlimit: u64,
    dqb_curinodes: u64,
    dqb_btime: u64,
    dqb_itime: u64,
    dqb_valid: u32,
}

/// Install block quotas for `uid` on the filesystem holding `home_root`.
///
/// Soft limit is min(20 % of the filesystem, 2 GB); hard limit is 120 %
/// of the soft limit. The soft limit turns into a hard one after the
/// kernel grace period.
pub fn set_limits(home_root: &Path, uid: u32) {
    let Ok(path) = CString::new(home_root.as_os_str().as_bytes()) else {
        return;
    };

    let mut info: libc::statvfs = unsafe { mem::zeroed() };
    if unsafe { libc::statvfs(path.as_ptr(), &mut info) } < 0 {
        warn!(
            "could not set limits, could not stat filesystem: {}",
            io::Error::last_os_error()
        );
        return;
    }

    let block_size = info.f_frsize as u64;
    if block_size == 0 {
        warn!("could not set limits, filesystem reports zero block size");
        return;
    }

    let mut soft_limit = info.f_blocks as u64 * 20 / 100;
    let cap = MAXIMUM_QUOTA_LIMIT / block_size;
    if soft_limit > cap {
        soft_limit = cap;
    }
    let hard_limit = soft_limit * 120 / 100;

    debug!(
        "setting quota limits for {uid} to {hard_limit} and {soft_limit} blocks of size {block_size}"
    );

    let Some(device) = home_device(home_root) else {
        warn!("could not set limits, no device found for {}", home_root.display());
        return;
    };
    let Ok(device) = CString::new(device) else {
        return;
    };

    // Sets block limits and clears inode limits.
    let quota = IfDqblk {
        dqb_bhardlimit: fs_to_dq_blocks(hard_limit, block_size),
        dqb_bsoftlimit: fs_to_dq_blocks(soft_limit, block_size),
        dqb_valid: QIF_LIMITS,
        ..Default::default()
    };

    let rc = unsafe {
        libc::quotactl(
            qcmd(Q_SETQUOTA, USRQUOTA),
            device.as_ptr(),
            uid as libc::c_int,
            &quota as *const IfDqblk as *mut libc::c_char,
        )
    };
    if rc < 0 {
        match io::Error::last_os_error().raw_os_error() {
            Some(libc::ENOSYS) => warn!("could not set limits, kernel doesn't support it"),
            Some(libc::ESRCH) => {
                warn!("could not set limits, it is not enabled on the filesystem")
            }
            _ => warn!("could not set limits: {}", io::Error::last_os_error()),
        }
    }
}

fn fs_to_dq_blocks(blocks: u64, block_size: u64) -> u64 {
    blocks.saturating_mul(block_size) / DQ_BLOCK_SIZE
}

/// Device node of the filesystem mounted closest above `path`.
fn home_device(path: &Path) -> Option<String> {
    let mounts = std::fs::read_to_string("/proc/mounts").ok()?;
    device_for(&mounts, path)
}

fn device_for(mounts: &str, path: &Path) -> Option<String> {
    let path = path.to_string_lossy();
    let mut best: Option<(usize, &str)> = None;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mount_point)) = (fields.next(), fields.next()) else {
            continue;
        };
        // Space in a mount point is escaped as \040 in /proc/mounts.
        let mount_point = mount_point.replace("\\040", " ");
        if path == mount_point
            || (path.starts_with(&mount_point)
                && (mount_point == "/" || path.as_bytes()[mount_point.len()] == b'/'))
        {
            match best {
                Some((len, _)) if len >= mount_point.len() => {}
                _ => best = Some((mount_point.len(), device)),
            }
        }
    }
    best.map(|(_, device)| device.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dq_block_conversion() {
        assert_eq!(fs_to_dq_blocks(100, 4096), 400);
        assert_eq!(fs_to_dq_blocks(3, 512), 1);
    }

    #[test]
    fn longest_mount_prefix_wins() {
        let mounts = "\
/dev/root / ext4 rw 0 0
/dev/sda2 /home ext4 rw 0 0
/dev/sda3 /home/media ext4 rw 0 0
";
        assert_eq!(
            device_for(mounts, Path::new("/home")).as_deref(),
            Some("/dev/sda2")
        );
        assert_eq!(
            device_for(mounts, Path::new("/home/media/x")).as_deref(),
            Some("/dev/sda3")
        );
        assert_eq!(
            device_for(mounts, Path::new("/homefoo")).as_deref(),
            Some("/dev/root")
        );
        assert_eq!(
            device_for(mounts, Path::new("/etc")).as_deref(),
            Some("/dev/root")
        );
    }
}
