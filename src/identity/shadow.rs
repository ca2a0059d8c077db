//! Identity backend over the shadow-utils suite.
//!
//! Lookups read the passwd/group databases through libc; mutations invoke
//! `groupadd`, `groupdel`, `useradd`, `userdel`, `usermod` and `gpasswd`.
//! Each invocation is a fresh context scoped to the call, so there is
//! nothing to keep consistent across operations.

use super::backend::{GroupRecord, IdentityBackend, IdentityError, Result, UserRecord};
use std::ffi::{CStr, CString, OsStr};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::ptr;
use tracing::debug;

/// Identity backend using shadow-utils and the libc name service.
#[derive(Debug, Default)]
pub struct ShadowBackend;

impl ShadowBackend {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

fn run(program: &str, args: &[&OsStr]) -> Result<()> {
    debug!("running {} {:?}", program, args);
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| IdentityError::Spawn {
            command: program.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(IdentityError::Command {
            command: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

fn lossy(ptr: *const libc::c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

fn record_from_passwd(pwd: &libc::passwd) -> UserRecord {
    UserRecord {
        name: lossy(pwd.pw_name),
        uid: pwd.pw_uid,
        gid: pwd.pw_gid,
        gecos: lossy(pwd.pw_gecos),
        home: PathBuf::from(lossy(pwd.pw_dir)),
    }
}

fn record_from_group(grp: &libc::group) -> GroupRecord {
    let mut members = Vec::new();
    if !grp.gr_mem.is_null() {
        let mut cursor = grp.gr_mem;
        unsafe {
            while !(*cursor).is_null() {
                members.push(lossy(*cursor));
                cursor = cursor.add(1);
            }
        }
    }
    GroupRecord {
        name: lossy(grp.gr_name),
        gid: grp.gr_gid,
        members,
    }
}

// The *_r lookups want a caller-provided string buffer and report ERANGE
// when it is too small.
fn lookup_passwd<F>(lookup: F) -> Option<UserRecord>
where
    F: Fn(&mut libc::passwd, &mut [libc::c_char], &mut *mut libc::passwd) -> libc::c_int,
{
    let mut size = 1024;
    loop {
        let mut buf = vec![0 as libc::c_char; size];
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = ptr::null_mut();
        let rc = lookup(&mut pwd, &mut buf, &mut result);
        if rc == libc::ERANGE && size < 1 << 20 {
            size *= 4;
            continue;
        }
        if result.is_null() {
            return None;
        }
        return Some(record_from_passwd(&pwd));
    }
}

fn lookup_group<F>(lookup: F) -> Option<GroupRecord>
where
    F: Fn(&mut libc::group, &mut [libc::c_char], &mut *mut libc::group) -> libc::c_int,
{
    let mut size = 1024;
    loop {
        let mut buf = vec![0 as libc::c_char; size];
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = ptr::null_mut();
        let rc = lookup(&mut grp, &mut buf, &mut result);
        if rc == libc::ERANGE && size < 1 << 20 {
            size *= 4;
            continue;
        }
        if result.is_null() {
            return None;
        }
        return Some(record_from_group(&grp));
    }
}

impl IdentityBackend for ShadowBackend {
    fn user_by_name(&self, name: &str) -> Option<UserRecord> {
        let name = CString::new(name).ok()?;
        lookup_passwd(|pwd, buf, result| unsafe {
            libc::getpwnam_r(name.as_ptr(), pwd, buf.as_mut_ptr(), buf.len(), result)
        })
    }

    fn user_by_uid(&self, uid: u32) -> Option<UserRecord> {
        lookup_passwd(|pwd, buf, result| unsafe {
            libc::getpwuid_r(uid, pwd, buf.as_mut_ptr(), buf.len(), result)
        })
    }

    fn group_by_name(&self, name: &str) -> Option<GroupRecord> {
        let name = CString::new(name).ok()?;
        lookup_group(|grp, buf, result| unsafe {
            libc::getgrnam_r(name.as_ptr(), grp, buf.as_mut_ptr(), buf.len(), result)
        })
    }

    fn group_by_gid(&self, gid: u32) -> Option<GroupRecord> {
        lookup_group(|grp, buf, result| unsafe {
            libc::getgrgid_r(gid, grp, buf.as_mut_ptr(), buf.len(), result)
        })
    }

    fn groups_of_user(&self, name: &str) -> Result<Vec<String>> {
        // Walks the whole group database looking for membership entries.
        // getgrent is a process-global cursor; the daemon runs on a
        // single-threaded executor so no other walker can interleave.
        let mut groups = Vec::new();
        unsafe {
            libc::setgrent();
            loop {
                let grp = libc::getgrent();
                if grp.is_null() {
                    break;
                }
                let record = record_from_group(&*grp);
                if record.members.iter().any(|member| member == name) {
                    groups.push(record.name);
                }
            }
            libc::endgrent();
        }
        Ok(groups)
    }

    fn create_group(&self, name: &str, gid: Option<u32>) -> Result<u32> {
        let gid_arg;
        let mut args: Vec<&OsStr> = Vec::new();
        if let Some(gid) = gid {
            gid_arg = gid.to_string();
            args.push(OsStr::new("-g"));
            args.push(OsStr::new(&gid_arg));
        }
        args.push(OsStr::new(name));
        run("groupadd", &args)?;
        self.group_by_name(name)
            .map(|group| group.gid)
            .ok_or(IdentityError::InvalidId)
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        run("groupdel", &[OsStr::new(name)])
    }

    fn create_user(
        &self,
        name: &str,
        gecos: &str,
        uid: Option<u32>,
        gid: u32,
        home: Option<&Path>,
    ) -> Result<u32> {
        let gid_arg = gid.to_string();
        let uid_arg;
        // Homes are provisioned from the skeleton by the daemon itself.
        let mut args: Vec<&OsStr> = vec![
            OsStr::new("-M"),
            OsStr::new("-g"),
            OsStr::new(&gid_arg),
            OsStr::new("-c"),
            OsStr::new(gecos),
        ];
        if let Some(uid) = uid {
            uid_arg = uid.to_string();
            args.push(OsStr::new("-u"));
            args.push(OsStr::new(&uid_arg));
        }
        if let Some(home) = home {
            args.push(OsStr::new("-d"));
            args.push(home.as_os_str());
        }
        args.push(OsStr::new(name));
        run("useradd", &args)?;
        self.user_by_name(name)
            .map(|user| user.uid)
            .ok_or(IdentityError::InvalidId)
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        run("userdel", &[OsStr::new(name)])
    }

    fn set_gecos(&self, name: &str, gecos: &str) -> Result<()> {
        run(
            "usermod",
            &[OsStr::new("-c"), OsStr::new(gecos), OsStr::new(name)],
        )
    }

    fn add_to_group(&self, user: &str, group: &str) -> Result<()> {
        run(
            "gpasswd",
            &[OsStr::new("-a"), OsStr::new(user), OsStr::new(group)],
        )
    }

    fn remove_from_group(&self, user: &str, group: &str) -> Result<()> {
        run(
            "gpasswd",
            &[OsStr::new("-d"), OsStr::new(user), OsStr::new(group)],
        )
    }
}
