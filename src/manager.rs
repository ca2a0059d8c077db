//! The user manager: D-Bus surface and user switch coordination.
//!
//! Serves `org.sailfishos.usermanager` at `/` on the system bus. User
//! switching stops the old session and autologin services and starts the
//! new ones through the job sequencer, rolling forward or back depending
//! on which step failed. The daemon is transient: an idle timer quits it
//! one minute after the last activity, unless a switch is in flight.

use crate::access;
use crate::config::Settings;
use crate::environment;
use crate::error::ManagerError;
use crate::homes;
use crate::identity::UserHelper;
use crate::mce::CallMonitor;
use crate::quota;
use crate::seat::SeatTracker;
use crate::systemd::{
    Job, JobKind, JobQueueHandle, SystemdEvent, SystemdManager, SystemdSupervisor,
    UnitSupervisor,
};
use crate::types::UserEntry;
use crate::{
    autologin_service, user_service, DEFAULT_TARGET, GUEST_UID, GUEST_USER, MAX_RESERVED_UID,
    MAX_USERNAME_LENGTH, MAX_USERS, OBJECT_PATH, OWNER_USER_UID, UNDEFINED_UID,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};
use zbus::message::Header;
use zbus::object_server::{InterfaceRef, SignalEmitter};
use zbus::Connection;

/// The daemon quits after this much idle time.
const QUIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace period between announcing a switch and tearing sessions down.
const SWITCHING_DELAY: Duration = Duration::from_secs(1);

const SAILFISH_GROUP_PREFIX: &str = "sailfish-";
const ACCOUNT_GROUP_PREFIX: &str = "account-";

/// Restartable countdown deciding when the daemon exits.
pub struct ExitTimer {
    deadline: std::sync::Mutex<Instant>,
    changed: Notify,
    timeout: Duration,
}

impl ExitTimer {
    /// Timer that elapses `timeout` after the last [`ExitTimer::arm`].
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            deadline: std::sync::Mutex::new(Instant::now() + timeout),
            changed: Notify::new(),
            timeout,
        })
    }

    /// Restart the countdown.
    pub fn arm(&self) {
        *self.deadline.lock().unwrap() = Instant::now() + self.timeout;
        self.changed.notify_waiters();
    }

    fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap()
    }
}

/// Block until the exit timer elapses while no user switch is running.
///
/// A timeout during a switch only logs; the countdown restarts and the
/// daemon stays up until the switch has settled.
pub async fn wait_for_exit(connection: &Connection, timer: &ExitTimer) -> zbus::Result<()> {
    let iface_ref = connection
        .object_server()
        .interface::<_, UserManager>(OBJECT_PATH)
        .await?;
    loop {
        let deadline = timer.deadline();
        let rearmed = timer.changed.notified();
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                if timer.deadline() > Instant::now() {
                    // Re-armed while we were asleep.
                    continue;
                }
                if iface_ref.get().await.switching() {
                    debug!("User switching in progress, not quitting yet");
                    timer.arm();
                } else {
                    debug!("Exit timeout reached, quitting");
                    return Ok(());
                }
            }
            _ = rearmed => {}
        }
    }
}

/// Delete the per-user environment directory of `uid` and run the
/// removal hooks. Returns whether the directory is gone.
pub fn remove_user_files(settings: &Settings, uid: u32) -> bool {
    let dir = settings.user_environment_path(uid);
    let removed = match std::fs::remove_dir_all(&dir) {
        Ok(()) => true,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
        Err(err) => {
            warn!("Removing user environment directory failed: {err}");
            false
        }
    };
    homes::execute_hooks(uid, &settings.remove_script_dir);
    removed
}

/// `--removeUserFiles` entry point: resolve `username` and remove its
/// local files.
pub fn remove_user_files_for(settings: &Settings, users: &UserHelper, username: &str) -> bool {
    match users.user_by_name(username) {
        Some(user) => remove_user_files(settings, user.uid),
        None => {
            warn!("User {username} not found");
            false
        }
    }
}

/// The manager served on the bus.
pub struct UserManager {
    settings: Arc<Settings>,
    users: UserHelper,
    seat: Box<dyn SeatTracker>,
    calls: Box<dyn CallMonitor>,
    exit: Arc<ExitTimer>,
    systemd: Option<JobQueueHandle>,
    /// UID being switched to, 0 while no switch is running.
    switch_uid: u32,
    /// UID that was active when the running switch started.
    current_uid: u32,
    switching_delay: Duration,
}

impl UserManager {
    /// Assemble the manager from its collaborators.
    pub fn new(
        settings: Arc<Settings>,
        users: UserHelper,
        seat: Box<dyn SeatTracker>,
        calls: Box<dyn CallMonitor>,
        exit: Arc<ExitTimer>,
    ) -> Self {
        Self {
            settings,
            users,
            seat,
            calls,
            exit,
            systemd: None,
            switch_uid: 0,
            current_uid: 0,
            switching_delay: SWITCHING_DELAY,
        }
    }

    /// Whether a user switch is in flight.
    pub fn switching(&self) -> bool {
        self.switch_uid != 0
    }

    async fn current_user_impl(&self) -> Result<u32, ManagerError> {
        self.exit.arm();
        match self.seat.active_uid().await {
            Ok(uid) => Ok(uid),
            Err(err) => {
                warn!("Failed to get current user id: {err:#}");
                Err(ManagerError::GetUidFailed(
                    "Failed to get current user id".into(),
                ))
            }
        }
    }

    fn user_uuid_impl(&self, uid: u32) -> Result<String, ManagerError> {
        self.exit.arm();
        match self.users.read_uuid(uid) {
            Some(uuid) if !uuid.is_empty() => Ok(uuid),
            _ => {
                warn!("Failed to get user uuid");
                Err(ManagerError::GetUuidFailed("Failed to get user uuid".into()))
            }
        }
    }

    /// Username derived from a display name: lowercased, stripped to
    /// ASCII letters and digits, truncated, made unique with a numeric
    /// suffix against passwd, group and home collisions.
    fn derive_username(&self, name: &str) -> String {
        let simplified = name.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut clean: String = simplified
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(MAX_USERNAME_LENGTH)
            .collect();
        if clean.is_empty() {
            clean = "user".to_string();
        }

        let mut username = clean.clone();
        let mut suffix = 0;
        // Append a number until the name is unused.
        while self.users.user_by_name(&username).is_some()
            || self.users.group_exists(&username)
            || self.settings.home_path(&username).exists()
        {
            username = format!("{clean}{suffix}");
            suffix += 1;
        }
        username
    }

    async fn add_user_inner(
        &self,
        name: &str,
        emitter: &SignalEmitter<'_>,
    ) -> Result<u32, ManagerError> {
        self.exit.arm();

        if name.is_empty() {
            warn!("Empty name");
            return Err(ManagerError::invalid_args("Empty name"));
        }

        // The guest user is not counted against the maximum.
        let count = self
            .users
            .managed_users()
            .map(|users| users.iter().filter(|user| user.uid != GUEST_UID).count())
            .unwrap_or(0);
        if count > (MAX_USERS as usize - 1) {
            // The device owner holds one of the slots.
            warn!("Maximum number of users reached");
            return Err(ManagerError::MaxUsersReached(
                "Maximum number of users reached".into(),
            ));
        }

        let username = self.derive_username(name);
        self.add_sailfish_user(&username, name, None, None, emitter)
            .await
    }

    /// Create a user and everything around it: identity record with its
    /// primary group, supplementary group memberships, home directory,
    /// creation hooks and quota. Each failed step undoes the earlier ones.
    async fn add_sailfish_user(
        &self,
        username: &str,
        name: &str,
        uid: Option<u32>,
        home: Option<&Path>,
        emitter: &SignalEmitter<'_>,
    ) -> Result<u32, ManagerError> {
        let new_uid = match self.users.add_user(username, name, uid, home) {
            Ok(new_uid) => new_uid,
            Err(err) => {
                warn!("Adding user failed: {err}");
                return Err(ManagerError::UserAddFailed("Adding user failed".into()));
            }
        };

        if !self.add_user_to_groups(username) {
            if let Err(err) = self.users.remove_user(new_uid) {
                warn!("cleanup of {username} failed: {err}");
            }
            warn!("Adding user to groups failed");
            return Err(ManagerError::UserModifyFailed(
                "Adding user to groups failed".into(),
            ));
        }

        if uid != Some(GUEST_UID) {
            if let Err(err) = self.make_home(username) {
                warn!("Creating user home failed: {err:#}");
                if let Err(err) = self.users.remove_user(new_uid) {
                    warn!("cleanup of {username} failed: {err}");
                }
                return Err(ManagerError::HomeCreateFailed(
                    "Creating user home failed".into(),
                ));
            }
        }

        homes::execute_hooks(new_uid, &self.settings.create_script_dir);
        quota::set_limits(&self.settings.home_root, new_uid);

        let entry = UserEntry {
            user: username.to_string(),
            name: name.to_string(),
            uid: new_uid,
        };
        if let Err(err) = Self::user_added(emitter, entry).await {
            warn!("failed to emit userAdded: {err}");
        }
        Ok(new_uid)
    }

    /// Join the groups listed in the `USER_GROUPS` lines of the group ids
    /// file. Individual failures are logged; any of them fails the whole
    /// call so the caller can roll the user back.
    fn add_user_to_groups(&self, username: &str) -> bool {
        let content = match std::fs::read_to_string(&self.settings.group_ids_file) {
            Ok(content) => content,
            Err(err) => {
                warn!("Failed to open groups file: {err}");
                return false;
            }
        };

        let mut success = true;
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if !key.starts_with("USER_GROUPS") {
                continue;
            }
            for group in value.trim().split(',') {
                let group = group.trim();
                if let Err(err) = self.users.add_member(username, group) {
                    warn!("Failed to add {username} to group {group}: {err}");
                    success = false;
                }
            }
        }
        success
    }

    fn make_home(&self, username: &str) -> anyhow::Result<()> {
        let user = self
            .users
            .user_by_name(username)
            .ok_or_else(|| anyhow::anyhow!("User not found"))?;
        homes::make_home(&self.settings.skel_dir, &user)
    }

    fn remove_home(&self, uid: u32) -> bool {
        let Some(home) = self.users.home_of(uid) else {
            return false;
        };
        if home.as_os_str().is_empty() {
            return false;
        }
        match homes::remove_tree(&home) {
            Ok(()) => true,
            Err(err) => {
                warn!("{err:#}");
                false
            }
        }
    }

    async fn remove_user_inner(
        &self,
        uid: u32,
        emitter: &SignalEmitter<'_>,
    ) -> Result<(), ManagerError> {
        if uid == OWNER_USER_UID {
            warn!("Can not remove device owner");
            return Err(ManagerError::invalid_args("Can not remove device owner"));
        }

        if uid == self.current_user_impl().await? {
            warn!("Can not remove current user");
            return Err(ManagerError::invalid_args("Can not remove current user"));
        }

        self.exit.arm();

        if uid != GUEST_UID && !self.remove_home(uid) {
            warn!("Removing user home failed");
        }

        remove_user_files(&self.settings, uid);

        if let Err(err) = self.users.remove_user(uid) {
            warn!("User remove failed: {err}");
            return Err(ManagerError::UserRemoveFailed("User remove failed".into()));
        }

        if let Err(err) = Self::user_removed(emitter, uid).await {
            warn!("failed to emit userRemoved: {err}");
        }
        Ok(())
    }

    fn check_permission_groups(&self, groups: &[String]) -> Result<(), ManagerError> {
        for group in groups {
            if !group.starts_with(SAILFISH_GROUP_PREFIX)
                && !group.starts_with(ACCOUNT_GROUP_PREFIX)
            {
                let message = format!(
                    "Only {SAILFISH_GROUP_PREFIX} and {ACCOUNT_GROUP_PREFIX} groups can be managed"
                );
                warn!("{message}");
                return Err(ManagerError::invalid_args(message));
            }
        }
        Ok(())
    }

    async fn add_to_groups_inner(
        &self,
        uid: u32,
        groups: &[String],
    ) -> Result<(), ManagerError> {
        self.exit.arm();
        self.check_permission_groups(groups)?;

        let Some(user) = self.users.user_by_uid(uid) else {
            warn!("User not found");
            return Err(ManagerError::UserNotFound("User not found".into()));
        };

        let original = self.users.groups_of(uid);
        let mut revert = Vec::new();
        for group in groups {
            if original.iter().any(|existing| existing == group) {
                continue;
            }
            match self.users.add_member(&user.name, group) {
                Ok(()) => revert.push(group.clone()),
                Err(err) => {
                    warn!("Failed to add user to group: {err}");
                    // Revert back to the original groups.
                    for added in &revert {
                        if let Err(err) = self.users.remove_member(&user.name, added) {
                            warn!("reverting membership of {added} failed: {err}");
                        }
                    }
                    return Err(ManagerError::AddToGroupFailed(
                        "Failed to add user to group".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn remove_from_groups_inner(
        &self,
        uid: u32,
        groups: &[String],
    ) -> Result<(), ManagerError> {
        self.exit.arm();
        self.check_permission_groups(groups)?;

        let Some(user) = self.users.user_by_uid(uid) else {
            warn!("User not found");
            return Err(ManagerError::UserNotFound("User not found".into()));
        };

        let original = self.users.groups_of(uid);
        let mut revert = Vec::new();
        for group in groups {
            if !original.iter().any(|existing| existing == group) {
                continue;
            }
            match self.users.remove_member(&user.name, group) {
                Ok(()) => revert.push(group.clone()),
                Err(err) => {
                    warn!("Failed to remove user from group: {err}");
                    // Revert back to the original groups.
                    for removed in &revert {
                        if let Err(err) = self.users.add_member(&user.name, removed) {
                            warn!("reverting membership of {removed} failed: {err}");
                        }
                    }
                    return Err(ManagerError::RemoveFromGroupFailed(
                        "Failed to remove user from group".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn enable_guest_user_inner(
        &self,
        enable: bool,
        emitter: &SignalEmitter<'_>,
    ) -> Result<(), ManagerError> {
        self.exit.arm();

        let exists = self.users.user_by_uid(GUEST_UID).is_some();
        if enable == exists {
            return Ok(());
        }

        if enable {
            let guest_home = self.settings.guest_home.clone();
            self.add_sailfish_user(GUEST_USER, "", Some(GUEST_UID), Some(&guest_home), emitter)
                .await?;
            if let Err(err) = Self::guest_user_enabled(emitter, true).await {
                warn!("failed to emit guestUserEnabled: {err}");
            }
            Ok(())
        } else {
            let result = self.remove_user_inner(GUEST_UID, emitter).await;
            if self.users.user_by_uid(GUEST_UID).is_none() {
                if let Err(err) = Self::guest_user_enabled(emitter, false).await {
                    warn!("failed to emit guestUserEnabled: {err}");
                }
            }
            result
        }
    }

    async fn set_current_user_inner(
        &mut self,
        uid: u32,
        connection: &Connection,
        emitter: &SignalEmitter<'_>,
    ) -> Result<(), ManagerError> {
        if self.switch_uid != 0 {
            warn!("Already switching user");
            return Err(ManagerError::Busy("Already switching user".into()));
        }

        self.current_uid = self.current_user_impl().await?;
        if self.current_uid == uid {
            warn!("User already active");
            return Err(ManagerError::invalid_args("User already active"));
        }

        let uid_found = self
            .users
            .managed_users()
            .map(|users| users.iter().any(|user| user.uid == uid))
            .unwrap_or(false);
        if !uid_found {
            warn!("User not found");
            return Err(ManagerError::UserNotFound("User not found".into()));
        }

        if self.calls.call_in_progress().await {
            warn!("Call active");
            return Err(ManagerError::Busy("Call active".into()));
        }

        debug!("About to switch user to uid {uid}");
        if let Err(err) = Self::about_to_change_current_user(emitter, uid).await {
            warn!("failed to emit aboutToChangeCurrentUser: {err}");
        }
        self.switch_uid = uid;

        // Remove guest user's extra data, if any is left from an earlier
        // session.
        if uid == GUEST_UID {
            remove_user_files(&self.settings, GUEST_UID);
        }

        let systemd = match self.ensure_systemd(connection).await {
            Ok(handle) => handle,
            Err(err) => {
                self.switch_uid = 0;
                return Err(err);
            }
        };

        let delay = self.switching_delay;
        let from = self.current_uid;
        let to = self.switch_uid;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("Switching user from {from} to {to} now");
            systemd.add_unit_jobs(vec![
                Job::stop(user_service(from)),
                Job::stop(autologin_service(from)),
                Job::start(autologin_service(to)),
                Job::start_no_replace(user_service(to)),
            ]);
        });
        Ok(())
    }

    async fn ensure_systemd(
        &mut self,
        connection: &Connection,
    ) -> Result<JobQueueHandle, ManagerError> {
        if let Some(handle) = &self.systemd {
            return Ok(handle.clone());
        }

        let supervisor = SystemdSupervisor::connect(connection).await.map_err(|err| {
            warn!("Could not create interface to systemd: {err:#}");
            ManagerError::failed("Could not create interface to systemd")
        })?;
        let iface_ref = connection
            .object_server()
            .interface::<_, UserManager>(OBJECT_PATH)
            .await
            .map_err(|err| {
                warn!("Manager interface is not registered: {err}");
                ManagerError::failed("Manager interface is not registered")
            })?;
        let handle = Self::start_sequencer(Box::new(supervisor), iface_ref)
            .await
            .map_err(|err| {
                warn!("Could not start systemd job sequencer: {err:#}");
                ManagerError::failed("Could not start systemd job sequencer")
            })?;
        self.systemd = Some(handle.clone());
        Ok(handle)
    }

    /// Spawn the job sequencer and the pump feeding its outcomes back
    /// into the manager.
    pub(crate) async fn start_sequencer(
        supervisor: Box<dyn UnitSupervisor>,
        iface_ref: InterfaceRef<UserManager>,
    ) -> anyhow::Result<JobQueueHandle> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handle = SystemdManager::spawn(supervisor, events_tx).await?;
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let emitter = iface_ref.signal_emitter().clone();
                let mut manager = iface_ref.get_mut().await;
                manager.handle_systemd_event(event, &emitter).await;
            }
        });
        Ok(handle)
    }

    fn enqueue(&self, jobs: Vec<Job>) {
        if let Some(systemd) = &self.systemd {
            systemd.add_unit_jobs(jobs);
        }
    }

    /// React to a sequencer outcome according to the switch plan.
    pub(crate) async fn handle_systemd_event(
        &mut self,
        event: SystemdEvent,
        emitter: &SignalEmitter<'_>,
    ) {
        match event {
            SystemdEvent::BusyChanged(busy) => {
                if !busy {
                    debug!("Systemd job queue cleared, can exit");
                    self.exit.arm();
                }
            }
            SystemdEvent::UnitJobFinished(job) => self.on_unit_job_finished(job, emitter).await,
            SystemdEvent::UnitJobFailed { failed, remaining } => {
                self.on_unit_job_failed(failed, remaining, emitter).await
            }
            SystemdEvent::CreatingJobFailed { remaining } => {
                self.on_creating_job_failed(remaining, emitter).await
            }
        }
    }

    async fn on_unit_job_finished(&mut self, job: Job, emitter: &SignalEmitter<'_>) {
        if job.kind == JobKind::Start && job.unit == user_service(self.switch_uid) {
            // Everything went well.
            let uid = self.switch_uid;
            if let Err(err) = Self::current_user_changed(emitter, uid).await {
                warn!("failed to emit currentUserChanged: {err}");
            }
            self.update_environment(uid);
            self.switch_uid = 0;
        } else if job.kind == JobKind::Start && job.unit == DEFAULT_TARGET {
            // The backup plan brought something up; report whoever won.
            if let Ok(active) = self.seat.active_uid().await {
                if self.current_uid != active {
                    if let Err(err) = Self::current_user_changed(emitter, active).await {
                        warn!("failed to emit currentUserChanged: {err}");
                    }
                }
            }
        } // else it's not interesting
    }

    async fn on_unit_job_failed(
        &mut self,
        failed: Job,
        remaining: Vec<Job>,
        emitter: &SignalEmitter<'_>,
    ) {
        if failed.kind == JobKind::Stop && failed.unit == user_service(self.current_uid) {
            // Session systemd is in a bad state, autologin is probably
            // still up.
            warn!("Unit failed while stopping session, trying to continue");
            self.enqueue(remaining);
        } else if failed.kind == JobKind::Stop && failed.unit == autologin_service(self.current_uid)
        {
            // Session systemd is down but stopping autologin failed.
            warn!("Autologin failed while stopping it, trying to continue");
            self.enqueue(remaining);
        } else if failed.kind == JobKind::Start && failed.unit == autologin_service(self.switch_uid)
        {
            // Autologin did not come back up. Try to bring the device to
            // a usable state anyway.
            warn!("User session start failed, trying to start default target as fallback");
            self.enqueue(vec![Job::start(DEFAULT_TARGET)]);
            self.switch_uid = 0;
            if let Err(err) = Self::current_user_change_failed(emitter, self.switch_uid).await {
                warn!("failed to emit currentUserChangeFailed: {err}");
            }
        } else if failed.kind == JobKind::Start && failed.unit == user_service(self.switch_uid) {
            // Autologin was started but session systemd was not.
            warn!("Starting session systemd failed, is it already starting?");
            self.switch_uid = 0;
            if let Err(err) = Self::current_user_change_failed(emitter, self.switch_uid).await {
                warn!("failed to emit currentUserChangeFailed: {err}");
            }
        }
    }

    async fn on_creating_job_failed(&mut self, remaining: Vec<Job>, emitter: &SignalEmitter<'_>) {
        match remaining.len() {
            1 => {
                if remaining[0].unit == user_service(self.switch_uid) {
                    // Autologin was started but session systemd was not.
                    warn!("Could not start session systemd, is it already starting?");
                } // else it was the default target and there is nothing
                  // left to try
            }
            2 => {
                if remaining[0].unit == autologin_service(self.switch_uid) {
                    // Try to bring the device to a usable state anyway.
                    warn!("Could not start user session, trying to start default target as fallback");
                    self.enqueue(vec![Job::start(DEFAULT_TARGET)]);
                }
            }
            3 => {
                if remaining[0].unit == autologin_service(self.current_uid) {
                    // Session systemd is stopped but autologin is still
                    // up and would not come down.
                    warn!("Could not stop autologin, user switch failed");
                    if let Err(err) =
                        Self::current_user_change_failed(emitter, self.switch_uid).await
                    {
                        warn!("failed to emit currentUserChangeFailed: {err}");
                    }
                }
            }
            _ => {
                // Nothing was done.
                warn!("User switching did not begin");
                if let Err(err) = Self::current_user_change_failed(emitter, self.switch_uid).await
                {
                    warn!("failed to emit currentUserChangeFailed: {err}");
                }
            }
        }
        self.switch_uid = 0;
    }

    fn update_environment(&self, uid: u32) {
        // Nothing to record for the guest.
        if uid == GUEST_UID {
            return;
        }

        // Leaving a guest session wipes the guest's extra data.
        if self.current_uid == GUEST_UID {
            remove_user_files(&self.settings, GUEST_UID);
        }

        if uid < MAX_RESERVED_UID || uid > MAX_RESERVED_UID + MAX_USERS {
            // Getting this wrong only makes the device boot up as the
            // wrong user.
            warn!("uid {uid} is outside allowed range, not setting LAST_LOGIN_UID");
            return;
        }

        environment::set_last_login_uid(&self.settings.environment_file, uid);
    }
}

#[zbus::interface(name = "org.sailfishos.usermanager")]
impl UserManager {
    /// List the users on the device.
    #[zbus(name = "users")]
    async fn users(&self) -> Result<Vec<UserEntry>, ManagerError> {
        self.exit.arm();
        self.users.list_users().map_err(|err| {
            warn!("Getting user group failed: {err}");
            ManagerError::failed("Getting user group failed")
        })
    }

    /// Create a new user with `name` as its real name. Returns the UID.
    #[zbus(name = "addUser")]
    async fn add_user(
        &self,
        name: String,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] connection: &Connection,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> Result<u32, ManagerError> {
        // There is no uid to modify when adding a user.
        access::check_access(&self.users, &header, connection, UNDEFINED_UID).await?;
        self.add_user_inner(&name, &emitter).await
    }

    /// Remove the user with `uid` and destroy its data.
    #[zbus(name = "removeUser")]
    async fn remove_user(
        &self,
        uid: u32,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] connection: &Connection,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> Result<(), ManagerError> {
        access::check_access(&self.users, &header, connection, uid).await?;
        self.remove_user_inner(uid, &emitter).await
    }

    /// Change the real name of the user with `uid`.
    #[zbus(name = "modifyUser")]
    async fn modify_user(
        &self,
        uid: u32,
        new_name: String,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] connection: &Connection,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> Result<(), ManagerError> {
        access::check_access(&self.users, &header, connection, uid).await?;
        self.exit.arm();

        if let Err(err) = self.users.modify_display(uid, &new_name) {
            warn!("User modify failed: {err}");
            return Err(ManagerError::UserModifyFailed("User modify failed".into()));
        }

        if let Err(err) = Self::user_modified(&emitter, uid, new_name).await {
            warn!("failed to emit userModified: {err}");
        }
        Ok(())
    }

    /// End the current session and start one for the user with `uid`.
    /// The outcome is reported through `currentUserChanged` or
    /// `currentUserChangeFailed`.
    #[zbus(name = "setCurrentUser")]
    async fn set_current_user(
        &mut self,
        uid: u32,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] connection: &Connection,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> Result<(), ManagerError> {
        access::caller_uid(&self.users, &header, connection).await?;
        self.set_current_user_inner(uid, connection, &emitter).await
    }

    /// UID of the user active on seat0.
    #[zbus(name = "currentUser")]
    async fn current_user(&self) -> Result<u32, ManagerError> {
        self.current_user_impl().await
    }

    /// UUID of the user active on seat0.
    #[zbus(name = "currentUserUuid")]
    async fn current_user_uuid(&self) -> Result<String, ManagerError> {
        let uid = self.current_user_impl().await?;
        self.user_uuid_impl(uid)
    }

    /// UUID of the user with `uid`.
    #[zbus(name = "userUuid")]
    async fn user_uuid(&self, uid: u32) -> Result<String, ManagerError> {
        self.user_uuid_impl(uid)
    }

    /// Supplementary groups of the user with `uid`.
    #[zbus(name = "usersGroups")]
    async fn users_groups(&self, uid: u32) -> Vec<String> {
        self.exit.arm();
        self.users.groups_of(uid)
    }

    /// Grant permissions by adding the user with `uid` to `groups`. Only
    /// `sailfish-` and `account-` prefixed groups are accepted.
    #[zbus(name = "addToGroups")]
    async fn add_to_groups(
        &self,
        uid: u32,
        groups: Vec<String>,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] connection: &Connection,
    ) -> Result<(), ManagerError> {
        access::check_access(&self.users, &header, connection, UNDEFINED_UID).await?;
        self.add_to_groups_inner(uid, &groups).await
    }

    /// Revoke permissions by removing the user with `uid` from `groups`.
    #[zbus(name = "removeFromGroups")]
    async fn remove_from_groups(
        &self,
        uid: u32,
        groups: Vec<String>,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] connection: &Connection,
    ) -> Result<(), ManagerError> {
        access::check_access(&self.users, &header, connection, UNDEFINED_UID).await?;
        self.remove_from_groups_inner(uid, &groups).await
    }

    /// Enable or disable the transient guest user.
    #[zbus(name = "enableGuestUser")]
    async fn enable_guest_user(
        &self,
        enable: bool,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] connection: &Connection,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> Result<(), ManagerError> {
        access::check_access(&self.users, &header, connection, GUEST_UID).await?;
        self.enable_guest_user_inner(enable, &emitter).await
    }

    /// A new user was created.
    #[zbus(signal, name = "userAdded")]
    async fn user_added(emitter: &SignalEmitter<'_>, user: UserEntry) -> zbus::Result<()>;

    /// The user with `uid` was removed.
    #[zbus(signal, name = "userRemoved")]
    async fn user_removed(emitter: &SignalEmitter<'_>, uid: u32) -> zbus::Result<()>;

    /// The real name of `uid` changed to `new_name`.
    #[zbus(signal, name = "userModified")]
    async fn user_modified(
        emitter: &SignalEmitter<'_>,
        uid: u32,
        new_name: String,
    ) -> zbus::Result<()>;

    /// The switch completed; `uid` is now the current user.
    #[zbus(signal, name = "currentUserChanged")]
    async fn current_user_changed(emitter: &SignalEmitter<'_>, uid: u32) -> zbus::Result<()>;

    /// The switch announced by `aboutToChangeCurrentUser` failed.
    #[zbus(signal, name = "currentUserChangeFailed")]
    async fn current_user_change_failed(
        emitter: &SignalEmitter<'_>,
        uid: u32,
    ) -> zbus::Result<()>;

    /// A switch to `uid` is about to tear the current session down.
    #[zbus(signal, name = "aboutToChangeCurrentUser")]
    async fn about_to_change_current_user(
        emitter: &SignalEmitter<'_>,
        uid: u32,
    ) -> zbus::Result<()>;

    /// The guest user came or went.
    #[zbus(signal, name = "guestUserEnabled")]
    async fn guest_user_enabled(emitter: &SignalEmitter<'_>, enabled: bool) -> zbus::Result<()>;
}
