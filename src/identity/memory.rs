//! In-memory identity backend for tests.

use super::backend::{GroupRecord, IdentityBackend, IdentityError, Result, UserRecord};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    users: BTreeMap<String, UserRecord>,
    groups: BTreeMap<String, GroupRecord>,
    next_uid: u32,
    fail_user_create: bool,
    fail_membership_for: Vec<String>,
}

/// Identity backend backed by hash maps, with failure injection for
/// rollback tests. Clones share the same database.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    /// Fresh empty database. Automatically assigned UIDs start at 100001.
    pub fn new() -> Self {
        let backend = Self::default();
        backend.inner.lock().unwrap().next_uid = 100_001;
        backend
    }

    /// Insert a passwd entry and its primary group record directly.
    pub fn seed_user(&self, name: &str, uid: u32, gid: u32, gecos: &str, home: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.users.insert(
            name.to_string(),
            UserRecord {
                name: name.to_string(),
                uid,
                gid,
                gecos: gecos.to_string(),
                home: PathBuf::from(home),
            },
        );
    }

    /// Insert a group entry directly.
    pub fn seed_group(&self, name: &str, gid: u32, members: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        inner.groups.insert(
            name.to_string(),
            GroupRecord {
                name: name.to_string(),
                gid,
                members: members.iter().map(|member| member.to_string()).collect(),
            },
        );
    }

    /// Make the next `create_user` call fail.
    pub fn fail_next_user_create(&self) {
        self.inner.lock().unwrap().fail_user_create = true;
    }

    /// Make membership changes on `group` fail.
    pub fn fail_membership_for(&self, group: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_membership_for
            .push(group.to_string());
    }

    fn injected_failure(command: &str) -> IdentityError {
        use std::os::unix::process::ExitStatusExt;
        IdentityError::Command {
            command: command.to_string(),
            status: std::process::ExitStatus::from_raw(1 << 8),
            stderr: "injected failure".to_string(),
        }
    }
}

impl IdentityBackend for MemoryBackend {
    fn user_by_name(&self, name: &str) -> Option<UserRecord> {
        self.inner.lock().unwrap().users.get(name).cloned()
    }

    fn user_by_uid(&self, uid: u32) -> Option<UserRecord> {
        let inner = self.inner.lock().unwrap();
        inner.users.values().find(|user| user.uid == uid).cloned()
    }

    fn group_by_name(&self, name: &str) -> Option<GroupRecord> {
        self.inner.lock().unwrap().groups.get(name).cloned()
    }

    fn group_by_gid(&self, gid: u32) -> Option<GroupRecord> {
        let inner = self.inner.lock().unwrap();
        inner.groups.values().find(|group| group.gid == gid).cloned()
    }

    fn groups_of_user(&self, name: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .groups
            .values()
            .filter(|group| group.members.iter().any(|member| member == name))
            .map(|group| group.name.clone())
            .collect())
    }

    fn create_group(&self, name: &str, gid: Option<u32>) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        if inner.groups.contains_key(name) {
            return Err(Self::injected_failure("groupadd"));
        }
        let gid = gid.unwrap_or_else(|| {
            let gid = inner.next_uid;
            inner.next_uid += 1;
            gid
        });
        inner.groups.insert(
            name.to_string(),
            GroupRecord {
                name: name.to_string(),
                gid,
                members: Vec::new(),
            },
        );
        Ok(gid)
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IdentityError::GroupNotFound(name.to_string()))
    }

    fn create_user(
        &self,
        name: &str,
        gecos: &str,
        uid: Option<u32>,
        gid: u32,
        home: Option<&Path>,
    ) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        if std::mem::take(&mut inner.fail_user_create) {
            return Err(Self::injected_failure("useradd"));
        }
        if inner.users.contains_key(name) {
            return Err(Self::injected_failure("useradd"));
        }
        let uid = uid.unwrap_or_else(|| {
            let uid = inner.next_uid;
            inner.next_uid += 1;
            uid
        });
        let home = home
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(format!("/home/{name}")));
        inner.users.insert(
            name.to_string(),
            UserRecord {
                name: name.to_string(),
                uid,
                gid,
                gecos: gecos.to_string(),
                home,
            },
        );
        Ok(uid)
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .users
            .remove(name)
            .map(|_| ())
            .ok_or(IdentityError::UserNotFound)
    }

    fn set_gecos(&self, name: &str, gecos: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner.users.get_mut(name).ok_or(IdentityError::UserNotFound)?;
        user.gecos = gecos.to_string();
        Ok(())
    }

    fn add_to_group(&self, user: &str, group: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_membership_for.iter().any(|name| name == group) {
            return Err(Self::injected_failure("gpasswd"));
        }
        let record = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| IdentityError::GroupNotFound(group.to_string()))?;
        if !record.members.iter().any(|member| member == user) {
            record.members.push(user.to_string());
        }
        Ok(())
    }

    fn remove_from_group(&self, user: &str, group: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_membership_for.iter().any(|name| name == group) {
            return Err(Self::injected_failure("gpasswd"));
        }
        let record = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| IdentityError::GroupNotFound(group.to_string()))?;
        record.members.retain(|member| member != user);
        Ok(())
    }
}
