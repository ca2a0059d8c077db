//! systemd unit job sequencing.
//!
//! Orders start/stop commands against systemd as a strict FIFO: at most
//! one dispatch call is in flight and at most one systemd job is running
//! at any time. Outcomes are reported to the owner over a channel, with
//! the untouched remainder of the queue attached to failures so the owner
//! can decide what to salvage.
//!
//! This is currently implemented so that it can do one thing at a time
//! as there is no need for anything more complicated.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

const MODE_REPLACE: &str = "replace";
const MODE_FAIL: &str = "fail";
const RESULT_DONE: &str = "done";
const RESULT_SKIPPED: &str = "skipped";

/// Whether a job starts or stops its unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    /// Start the unit.
    Start,
    /// Stop the unit.
    Stop,
}

/// One start/stop command against the session supervisor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    /// Unit name, e.g. `user@100000.service`.
    pub unit: String,
    /// Start or stop.
    pub kind: JobKind,
    /// Dispatch with mode `replace` instead of `fail`.
    pub replace: bool,
}

impl Job {
    /// Start job in `replace` mode.
    pub fn start(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            kind: JobKind::Start,
            replace: true,
        }
    }

    /// Start job in `fail` mode, refused if the unit already has a job.
    pub fn start_no_replace(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            kind: JobKind::Start,
            replace: false,
        }
    }

    /// Stop job in `replace` mode.
    pub fn stop(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            kind: JobKind::Stop,
            replace: true,
        }
    }
}

/// A `JobRemoved` notification from the supervisor.
#[derive(Clone, Debug)]
pub struct JobRemoval {
    /// Object path of the finished job.
    pub job: String,
    /// Unit the job acted on.
    pub unit: String,
    /// Result string, `done` for success.
    pub result: String,
}

/// Outcomes reported to the sequencer's owner.
#[derive(Clone, Debug)]
pub enum SystemdEvent {
    /// The sequencer became busy or settled idle.
    BusyChanged(bool),
    /// The head job completed successfully.
    UnitJobFinished(Job),
    /// The head job ran and failed; the queue was cleared.
    UnitJobFailed {
        /// The job that failed.
        failed: Job,
        /// Jobs that were still queued behind it.
        remaining: Vec<Job>,
    },
    /// A job could not be created at all; nothing was done and the queue
    /// was cleared.
    CreatingJobFailed {
        /// The entire remaining queue, failed head included.
        remaining: Vec<Job>,
    },
}

/// The slice of the session supervisor the sequencer consumes.
#[async_trait]
pub trait UnitSupervisor: Send + Sync {
    /// Ask the supervisor to start `unit`. Returns the job object path.
    async fn start_unit(&self, unit: &str, mode: &str) -> Result<String>;

    /// Ask the supervisor to stop `unit`. Returns the job object path.
    async fn stop_unit(&self, unit: &str, mode: &str) -> Result<String>;

    /// Stream of job completion notifications.
    async fn job_removals(&self) -> Result<BoxStream<'static, JobRemoval>>;
}

#[zbus::proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1"
)]
trait Systemd1Manager {
    #[zbus(name = "StartUnit")]
    fn start_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    #[zbus(name = "StopUnit")]
    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    /// Required before systemd emits job signals to us.
    #[zbus(name = "Subscribe")]
    fn subscribe(&self) -> zbus::Result<()>;

    #[zbus(signal, name = "JobRemoved")]
    fn job_removed(
        &self,
        id: u32,
        job: OwnedObjectPath,
        unit: String,
        result: String,
    ) -> zbus::Result<()>;
}

/// [`UnitSupervisor`] over the real systemd manager on the system bus.
pub struct SystemdSupervisor {
    proxy: Systemd1ManagerProxy<'static>,
}

impl SystemdSupervisor {
    /// Connect to systemd and subscribe to its job signals.
    pub async fn connect(connection: &Connection) -> Result<Self> {
        let proxy = Systemd1ManagerProxy::new(connection)
            .await
            .context("Could not create interface to systemd")?;
        proxy
            .subscribe()
            .await
            .context("Could not subscribe to systemd signals")?;
        Ok(Self { proxy })
    }
}

#[async_trait]
impl UnitSupervisor for SystemdSupervisor {
    async fn start_unit(&self, unit: &str, mode: &str) -> Result<String> {
        let path = self.proxy.start_unit(unit, mode).await?;
        Ok(path.to_string())
    }

    async fn stop_unit(&self, unit: &str, mode: &str) -> Result<String> {
        let path = self.proxy.stop_unit(unit, mode).await?;
        Ok(path.to_string())
    }

    async fn job_removals(&self) -> Result<BoxStream<'static, JobRemoval>> {
        let stream = self
            .proxy
            .receive_job_removed()
            .await
            .context("Could not connect to JobRemoved signal")?;
        Ok(stream
            .filter_map(|signal| async move {
                match signal.args() {
                    Ok(args) => Some(JobRemoval {
                        job: args.job().to_string(),
                        unit: args.unit().to_string(),
                        result: args.result().to_string(),
                    }),
                    Err(err) => {
                        warn!("malformed JobRemoved signal: {err}");
                        None
                    }
                }
            })
            .boxed())
    }
}

/// Handle for enqueueing jobs into a running sequencer.
#[derive(Clone)]
pub struct JobQueueHandle {
    commands: mpsc::UnboundedSender<Vec<Job>>,
}

impl JobQueueHandle {
    /// Append `jobs` to the queue.
    pub fn add_unit_jobs(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        if self.commands.send(jobs).is_err() {
            error!("systemd job sequencer is gone");
        }
    }

    /// Append a single job to the queue.
    pub fn add_unit_job(&self, job: Job) {
        self.add_unit_jobs(vec![job]);
    }
}

/// The FIFO sequencer itself.
pub struct SystemdManager {
    supervisor: Box<dyn UnitSupervisor>,
    jobs: VecDeque<Job>,
    // Object path of the job systemd is currently running. The job it
    // belongs to stays at the queue head until its removal is seen.
    current_job: Option<String>,
    events: mpsc::UnboundedSender<SystemdEvent>,
}

impl SystemdManager {
    /// Spawn the sequencer task. Outcomes arrive on `events`.
    pub async fn spawn(
        supervisor: Box<dyn UnitSupervisor>,
        events: mpsc::UnboundedSender<SystemdEvent>,
    ) -> Result<JobQueueHandle> {
        // Subscribe before anything can be dispatched so no completion
        // is missed.
        let removals = supervisor.job_removals().await?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let manager = Self {
            supervisor,
            jobs: VecDeque::new(),
            current_job: None,
            events,
        };
        tokio::spawn(manager.run(commands_rx, removals));
        Ok(JobQueueHandle {
            commands: commands_tx,
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Vec<Job>>,
        mut removals: BoxStream<'static, JobRemoval>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(jobs) => self.add_unit_jobs(jobs).await,
                    None => break,
                },
                removal = removals.next() => match removal {
                    Some(removal) => self.on_job_removed(removal).await,
                    None => {
                        error!("lost connection to systemd job signals");
                        break;
                    }
                },
            }
        }
    }

    fn busy(&self) -> bool {
        // Busy if there is something queued or a job removal is waited for.
        !self.jobs.is_empty() || self.current_job.is_some()
    }

    fn send(&self, event: SystemdEvent) {
        let _ = self.events.send(event);
    }

    async fn add_unit_jobs(&mut self, jobs: Vec<Job>) {
        let was_empty = self.jobs.is_empty();
        self.jobs.extend(jobs);
        if was_empty {
            self.send(SystemdEvent::BusyChanged(true));
        }
        self.process_next_job().await;
    }

    async fn process_next_job(&mut self) {
        if self.current_job.is_some() {
            return;
        }
        let Some(head) = self.jobs.front() else {
            return;
        };

        debug!("process next systemd job");
        let mode = if head.replace { MODE_REPLACE } else { MODE_FAIL };
        let dispatched = match head.kind {
            JobKind::Start => self.supervisor.start_unit(&head.unit, mode).await,
            JobKind::Stop => self.supervisor.stop_unit(&head.unit, mode).await,
        };

        match dispatched {
            Ok(path) => {
                debug!("current systemd job is now {path}");
                self.current_job = Some(path);
            }
            Err(err) => {
                // The job didn't do anything yet.
                warn!("systemd job start failed: {err}");
                let remaining: Vec<Job> = self.jobs.drain(..).collect();
                self.send(SystemdEvent::CreatingJobFailed { remaining });
                if !self.busy() {
                    self.send(SystemdEvent::BusyChanged(false));
                }
            }
        }
    }

    async fn on_job_removed(&mut self, removal: JobRemoval) {
        if self.current_job.as_deref() != Some(removal.job.as_str()) {
            return;
        }

        if removal.result != RESULT_DONE {
            warn!(
                "systemd job {} for unit {} ended with result {}",
                removal.job, removal.unit, removal.result
            );
            // Clear busyness before the signal.
            self.current_job = None;
            let mut remaining: Vec<Job> = self.jobs.drain(..).collect();
            if removal.result == RESULT_SKIPPED {
                // This means that the job didn't do anything yet.
                self.send(SystemdEvent::CreatingJobFailed { remaining });
            } else {
                let failed = remaining.remove(0);
                self.send(SystemdEvent::UnitJobFailed { failed, remaining });
            }
        } else {
            debug!(
                "systemd job {} for unit {} ended with result done",
                removal.job, removal.unit
            );
            if let Some(done) = self.jobs.pop_front() {
                self.send(SystemdEvent::UnitJobFinished(done));
            }
            // Clear busyness *after* the signal.
            self.current_job = None;
            if !self.jobs.is_empty() {
                self.process_next_job().await;
            }
        }

        if !self.busy() {
            self.send(SystemdEvent::BusyChanged(false));
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted supervisor used by the sequencer and coordinator tests.

    use super::*;
    use std::sync::{Arc, Mutex};

    pub(crate) struct MockSupervisor {
        dispatched: Mutex<Vec<(JobKind, String, String)>>,
        failures: Mutex<Vec<String>>,
        removals: Mutex<Option<mpsc::UnboundedReceiver<JobRemoval>>>,
        next_job: Mutex<u32>,
    }

    impl MockSupervisor {
        pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedSender<JobRemoval>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let mock = Arc::new(Self {
                dispatched: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
                removals: Mutex::new(Some(rx)),
                next_job: Mutex::new(1),
            });
            (mock, tx)
        }

        /// Make dispatches against `unit` fail.
        pub(crate) fn fail_unit(&self, unit: &str) {
            self.failures.lock().unwrap().push(unit.to_string());
        }

        /// Everything dispatched so far, in order.
        pub(crate) fn dispatched(&self) -> Vec<(JobKind, String, String)> {
            self.dispatched.lock().unwrap().clone()
        }

        /// Job object path of the `n`th successful dispatch (1-based).
        pub(crate) fn job_path(n: u32) -> String {
            format!("/org/freedesktop/systemd1/job/{n}")
        }

        /// Wait until `count` dispatches have been recorded.
        pub(crate) async fn wait_for_dispatches(&self, count: usize) {
            for _ in 0..200 {
                if self.dispatched.lock().unwrap().len() >= count {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            panic!(
                "supervisor saw {} dispatches, expected {count}",
                self.dispatched.lock().unwrap().len()
            );
        }

        fn dispatch(&self, kind: JobKind, unit: &str, mode: &str) -> Result<String> {
            self.dispatched
                .lock()
                .unwrap()
                .push((kind, unit.to_string(), mode.to_string()));
            if self.failures.lock().unwrap().iter().any(|u| u == unit) {
                anyhow::bail!("Unit {unit} rejected");
            }
            let mut next = self.next_job.lock().unwrap();
            let path = Self::job_path(*next);
            *next += 1;
            Ok(path)
        }
    }

    #[async_trait]
    impl UnitSupervisor for Arc<MockSupervisor> {
        async fn start_unit(&self, unit: &str, mode: &str) -> Result<String> {
            self.dispatch(JobKind::Start, unit, mode)
        }

        async fn stop_unit(&self, unit: &str, mode: &str) -> Result<String> {
            self.dispatch(JobKind::Stop, unit, mode)
        }

        async fn job_removals(&self) -> Result<BoxStream<'static, JobRemoval>> {
            let rx = self.removals.lock().unwrap().take().unwrap();
            Ok(futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|removal| (removal, rx))
            })
            .boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockSupervisor;
    use super::*;

    struct Fixture {
        mock: std::sync::Arc<MockSupervisor>,
        removals: mpsc::UnboundedSender<JobRemoval>,
        events: mpsc::UnboundedReceiver<SystemdEvent>,
        handle: JobQueueHandle,
    }

    async fn fixture() -> Fixture {
        let (mock, removals) = MockSupervisor::new();
        let (events_tx, events) = mpsc::unbounded_channel();
        let handle = SystemdManager::spawn(Box::new(mock.clone()), events_tx)
            .await
            .unwrap();
        Fixture {
            mock,
            removals,
            events,
            handle,
        }
    }

    fn done(job: u32, unit: &str) -> JobRemoval {
        JobRemoval {
            job: MockSupervisor::job_path(job),
            unit: unit.to_string(),
            result: "done".to_string(),
        }
    }

    #[tokio::test]
    async fn jobs_finish_in_enqueue_order() {
        let mut fx = fixture().await;
        fx.handle.add_unit_jobs(vec![
            Job::stop("user@100000.service"),
            Job::start("autologin@100001.service"),
        ]);

        assert!(matches!(
            fx.events.recv().await.unwrap(),
            SystemdEvent::BusyChanged(true)
        ));

        // Only the head is dispatched.
        fx.removals.send(done(1, "user@100000.service")).unwrap();
        let SystemdEvent::UnitJobFinished(first) = fx.events.recv().await.unwrap() else {
            panic!("expected first finish");
        };
        assert_eq!(first.unit, "user@100000.service");
        assert_eq!(first.kind, JobKind::Stop);

        fx.removals
            .send(done(2, "autologin@100001.service"))
            .unwrap();
        let SystemdEvent::UnitJobFinished(second) = fx.events.recv().await.unwrap() else {
            panic!("expected second finish");
        };
        assert_eq!(second.unit, "autologin@100001.service");

        assert!(matches!(
            fx.events.recv().await.unwrap(),
            SystemdEvent::BusyChanged(false)
        ));

        let dispatched = fx.mock.dispatched();
        assert_eq!(dispatched.len(), 2);
        assert_eq!(dispatched[0].1, "user@100000.service");
        assert_eq!(dispatched[0].2, "replace");
        assert_eq!(dispatched[1].1, "autologin@100001.service");
    }

    #[tokio::test]
    async fn non_replace_start_uses_fail_mode() {
        let mut fx = fixture().await;
        fx.handle
            .add_unit_job(Job::start_no_replace("user@100001.service"));
        let _ = fx.events.recv().await;
        fx.removals.send(done(1, "user@100001.service")).unwrap();
        let _ = fx.events.recv().await;
        assert_eq!(fx.mock.dispatched()[0].2, "fail");
    }

    #[tokio::test]
    async fn dispatch_failure_reports_whole_queue() {
        let mut fx = fixture().await;
        fx.mock.fail_unit("autologin@100000.service");
        fx.handle.add_unit_jobs(vec![
            Job::stop("autologin@100000.service"),
            Job::start("autologin@100001.service"),
        ]);

        let _ = fx.events.recv().await; // busy
        let SystemdEvent::CreatingJobFailed { remaining } = fx.events.recv().await.unwrap()
        else {
            panic!("expected creation failure");
        };
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].unit, "autologin@100000.service");

        assert!(matches!(
            fx.events.recv().await.unwrap(),
            SystemdEvent::BusyChanged(false)
        ));

        // Nothing after the failed head was dispatched.
        assert_eq!(fx.mock.dispatched().len(), 1);
    }

    #[tokio::test]
    async fn skipped_result_counts_as_nothing_done() {
        let mut fx = fixture().await;
        fx.handle.add_unit_jobs(vec![
            Job::stop("user@100000.service"),
            Job::start("user@100001.service"),
        ]);
        let _ = fx.events.recv().await; // busy

        fx.removals
            .send(JobRemoval {
                job: "/org/freedesktop/systemd1/job/1".to_string(),
                unit: "user@100000.service".to_string(),
                result: "skipped".to_string(),
            })
            .unwrap();

        let SystemdEvent::CreatingJobFailed { remaining } = fx.events.recv().await.unwrap()
        else {
            panic!("expected creation failure");
        };
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].unit, "user@100000.service");
    }

    #[tokio::test]
    async fn failed_job_splits_head_from_remainder() {
        let mut fx = fixture().await;
        fx.handle.add_unit_jobs(vec![
            Job::stop("user@100000.service"),
            Job::stop("autologin@100000.service"),
            Job::start("autologin@100001.service"),
        ]);
        let _ = fx.events.recv().await; // busy

        fx.removals
            .send(JobRemoval {
                job: "/org/freedesktop/systemd1/job/1".to_string(),
                unit: "user@100000.service".to_string(),
                result: "failed".to_string(),
            })
            .unwrap();

        let SystemdEvent::UnitJobFailed { failed, remaining } = fx.events.recv().await.unwrap()
        else {
            panic!("expected job failure");
        };
        assert_eq!(failed.unit, "user@100000.service");
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].unit, "autologin@100000.service");

        // Queue drained, sequencer idle.
        assert!(matches!(
            fx.events.recv().await.unwrap(),
            SystemdEvent::BusyChanged(false)
        ));
    }

    #[tokio::test]
    async fn unrelated_removals_are_ignored() {
        let mut fx = fixture().await;
        fx.handle.add_unit_job(Job::start("user@100001.service"));
        let _ = fx.events.recv().await; // busy

        fx.removals.send(done(99, "other.service")).unwrap();
        fx.removals.send(done(1, "user@100001.service")).unwrap();

        let SystemdEvent::UnitJobFinished(job) = fx.events.recv().await.unwrap() else {
            panic!("expected finish");
        };
        assert_eq!(job.unit, "user@100001.service");
    }
}
