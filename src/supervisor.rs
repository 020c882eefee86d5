//! Process supervision.
//!
//! This module contains the `Supervisor`, a cloneable handle to a single task that owns
//! the table of active launches. Requests from callers and reports from per-launch
//! helper tasks (output readers, exit waiter, grace timer, tree termination) are all
//! serialized onto that task, so no two transitions of the same launch ever race.
//! Every status change and output chunk is published through the `Broadcaster`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcaster, Subscription};
use crate::decode::Utf8Chunker;
use crate::diagnostics;
use crate::events::Event;
use crate::lifecycle::{self, Status, Transition};
use crate::resolver;
use crate::tree_kill::{self, TerminateOutcome};

const READ_BUFFER: usize = 8 * 1024;
// Upper bound on how long an exit report waits for the output readers to drain.
const OUTPUT_DRAIN: Duration = Duration::from_millis(250);

/// Settings of the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long a launch must survive before `starting` becomes `running`.
    pub grace_period: Duration,
    /// How long a graceful tree termination may take before it is forced.
    pub stop_timeout: Duration,
    /// Shell that runs command lines; `None` uses `sh` (Unix) or `cmd` (Windows).
    pub shell: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(500),
            stop_timeout: Duration::from_millis(5000),
            shell: None,
        }
    }
}

/// Handle to the supervisor task.
///
/// Cloning the handle is cheap; all clones talk to the same task. Once every handle is
/// dropped the task force-kills whatever it still tracks and exits.
#[derive(Debug, Clone)]
pub struct Supervisor {
    requests: mpsc::UnboundedSender<Request>,
    broadcaster: Arc<Broadcaster>,
}

#[derive(Debug)]
enum Request {
    Launch {
        id: String,
        command: String,
        cwd: PathBuf,
        reply: oneshot::Sender<bool>,
    },
    Stop {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Status {
        id: String,
        reply: oneshot::Sender<Status>,
    },
    AllStatuses {
        reply: oneshot::Sender<HashMap<String, Status>>,
    },
    HasRunning {
        reply: oneshot::Sender<bool>,
    },
    KillAll {
        reply: oneshot::Sender<()>,
    },
}

/// Reports from per-launch helper tasks. `generation` identifies the launch they belong to.
#[derive(Debug)]
enum ProcessEvent {
    Output {
        id: String,
        generation: u64,
        text: String,
    },
    GraceElapsed {
        id: String,
        generation: u64,
    },
    Exited {
        id: String,
        generation: u64,
        code: Option<i32>,
    },
    WaitFailed {
        id: String,
        generation: u64,
        error: String,
    },
    TerminateFinished {
        id: String,
        generation: u64,
        outcome: TerminateOutcome,
    },
}

/// One supervised attempt to run a command.
#[derive(Debug)]
struct Launch {
    generation: u64,
    status: Status,
    pid: Option<u32>,
}

impl Supervisor {
    /// Starts the supervisor task on the current Tokio runtime.
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_broadcaster(config, Broadcaster::new())
    }

    /// Starts the supervisor task, publishing through an existing broadcaster.
    pub fn with_broadcaster(config: SupervisorConfig, broadcaster: Arc<Broadcaster>) -> Self {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (process_tx, process_rx) = mpsc::unbounded_channel();
        let task = SupervisorTask {
            config,
            launches: HashMap::new(),
            latest_generation: HashMap::new(),
            next_generation: 0,
            broadcaster: broadcaster.clone(),
            process_tx,
        };
        tokio::spawn(task.run(request_rx, process_rx));
        Self {
            requests,
            broadcaster,
        }
    }

    /// Registers an observer for status and output events.
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Requests a launch of `command` in `cwd` under `id`.
    ///
    /// Returns `false` without side effects when `id` is already active, and `false`
    /// after publishing a diagnostic line and an `error` status when validation fails.
    /// Returns `true` as soon as the launch is accepted; whether the process actually
    /// started is reported through events.
    pub async fn launch(&self, id: &str, command: &str, cwd: impl AsRef<Path>) -> bool {
        self.call(|reply| Request::Launch {
            id: id.to_string(),
            command: command.to_string(),
            cwd: cwd.as_ref().to_path_buf(),
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Requests termination of the process tree of `id`.
    ///
    /// Returns `false` when nothing is running under `id`. The `stopped` status follows
    /// later as an event.
    pub async fn stop(&self, id: &str) -> bool {
        self.call(|reply| Request::Stop {
            id: id.to_string(),
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Current status of `id`; unknown ids are `stopped`.
    pub async fn status(&self, id: &str) -> Status {
        self.call(|reply| Request::Status {
            id: id.to_string(),
            reply,
        })
        .await
        .unwrap_or(Status::Stopped)
    }

    /// Snapshot of every tracked launch.
    pub async fn all_statuses(&self) -> HashMap<String, Status> {
        self.call(|reply| Request::AllStatuses { reply })
            .await
            .unwrap_or_default()
    }

    /// Whether any launch is `starting` or `running`.
    pub async fn has_running_processes(&self) -> bool {
        self.call(|reply| Request::HasRunning { reply })
            .await
            .unwrap_or(false)
    }

    /// Force-kills every tracked process tree and clears the table.
    ///
    /// Does not wait for the processes to actually die.
    pub async fn kill_all(&self) {
        let _ = self.call(|reply| Request::KillAll { reply }).await;
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.requests.send(build(reply)).ok()?;
        rx.await.ok()
    }
}

struct SupervisorTask {
    config: SupervisorConfig,
    launches: HashMap<String, Launch>,
    // Highest generation handed out per id, kept after the launch is removed.
    latest_generation: HashMap<String, u64>,
    next_generation: u64,
    broadcaster: Arc<Broadcaster>,
    process_tx: mpsc::UnboundedSender<ProcessEvent>,
}

impl SupervisorTask {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut process_rx: mpsc::UnboundedReceiver<ProcessEvent>,
    ) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some(event) = process_rx.recv() => self.handle_process_event(event),
            }
        }
        debug!("all supervisor handles dropped, killing remaining launches");
        self.kill_all();
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Launch {
                id,
                command,
                cwd,
                reply,
            } => self.launch(id, command, cwd, reply),
            Request::Stop { id, reply } => {
                let _ = reply.send(self.stop(&id));
            }
            Request::Status { id, reply } => {
                let status = self
                    .launches
                    .get(&id)
                    .map(|launch| launch.status)
                    .unwrap_or(Status::Stopped);
                let _ = reply.send(status);
            }
            Request::AllStatuses { reply } => {
                let statuses = self
                    .launches
                    .iter()
                    .map(|(id, launch)| (id.clone(), launch.status))
                    .collect();
                let _ = reply.send(statuses);
            }
            Request::HasRunning { reply } => {
                let running = self.launches.values().any(|launch| launch.status.is_live());
                let _ = reply.send(running);
            }
            Request::KillAll { reply } => {
                self.kill_all();
                let _ = reply.send(());
            }
        }
    }

    fn launch(&mut self, id: String, command: String, cwd: PathBuf, reply: oneshot::Sender<bool>) {
        if let Some(existing) = self.launches.get(&id).filter(|l| l.status.is_active()) {
            debug!(%id, status = %existing.status, "launch refused, already active");
            let _ = reply.send(false);
            return;
        }

        let resolved = match resolver::resolve(&command, &cwd) {
            Ok(resolved) => resolved,
            Err(rejection) => {
                info!(%id, reason = %rejection, "launch refused");
                self.publish_output(&id, diagnostics::launch_refused(&rejection));
                self.publish_status(&id, Status::Error);
                let _ = reply.send(false);
                return;
            }
        };

        let Some(starting) = lifecycle::next(Status::Stopped, Transition::Launch) else {
            let _ = reply.send(false);
            return;
        };
        self.publish_status(&id, starting);
        self.publish_output(&id, diagnostics::launch_banner(&cwd, &command));
        if let Some(script) = &resolved.unwrapped_from {
            self.publish_output(&id, diagnostics::script_unwrapped(script, &resolved.command));
        }
        let _ = reply.send(true);

        let mut shell =
            tree_kill::shell_command(&resolved.command, self.config.shell.as_deref());
        shell
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match shell.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(%id, error = %err, "spawn failed");
                self.publish_output(&id, diagnostics::spawn_failed(&err));
                if let Some(status) = lifecycle::next(starting, Transition::SpawnFailed) {
                    self.publish_status(&id, status);
                }
                return;
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        self.latest_generation.insert(id.clone(), generation);
        let pid = child.id();
        info!(%id, ?pid, generation, command = %resolved.command, "spawned");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_output(
                id.clone(),
                generation,
                stdout,
                self.process_tx.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_output(
                id.clone(),
                generation,
                stderr,
                self.process_tx.clone(),
            )));
        }
        tokio::spawn(wait_for_exit(
            id.clone(),
            generation,
            child,
            readers,
            self.process_tx.clone(),
        ));

        let tx = self.process_tx.clone();
        let grace = self.config.grace_period;
        let grace_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(ProcessEvent::GraceElapsed {
                id: grace_id,
                generation,
            });
        });

        self.launches.insert(
            id,
            Launch {
                generation,
                status: starting,
                pid,
            },
        );
    }

    fn stop(&mut self, id: &str) -> bool {
        let Some(launch) = self.launches.get_mut(id) else {
            return false;
        };
        let Some(pid) = launch.pid else {
            return false;
        };
        let Some(status) = lifecycle::next(launch.status, Transition::StopRequested) else {
            // Already stopping; the pending termination will resolve it.
            return launch.status == Status::Stopping;
        };
        launch.status = status;
        let generation = launch.generation;
        self.publish_status(id, status);

        info!(%id, pid, "terminating process tree");
        let tx = self.process_tx.clone();
        let timeout = self.config.stop_timeout;
        let id = id.to_string();
        tokio::spawn(async move {
            let outcome = tree_kill::terminate_tree(pid, timeout).await;
            let _ = tx.send(ProcessEvent::TerminateFinished {
                id,
                generation,
                outcome,
            });
        });
        true
    }

    fn kill_all(&mut self) {
        for (id, launch) in self.launches.drain() {
            if let Some(pid) = launch.pid {
                info!(%id, pid, "killing process tree");
                tree_kill::kill_tree_now(pid);
            }
            self.broadcaster.publish(Event::status(&id, Status::Stopped));
        }
    }

    fn handle_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Output {
                id,
                generation,
                text,
            } => {
                // Output of a launch that was superseded must not leak into the new one.
                let latest = self.latest_generation.get(&id).copied().unwrap_or(0);
                if generation >= latest {
                    self.publish_output(&id, text);
                } else {
                    debug!(%id, generation, "dropping output of a superseded launch");
                }
            }
            ProcessEvent::GraceElapsed { id, generation } => {
                self.apply(&id, generation, Transition::GraceElapsed);
            }
            ProcessEvent::Exited {
                id,
                generation,
                code,
            } => {
                let Some(previous) = self.current_status(&id, generation) else {
                    debug!(%id, generation, ?code, "exit of an untracked launch");
                    return;
                };
                if previous == Status::Stopping {
                    self.publish_output(&id, diagnostics::stopped());
                } else {
                    self.publish_output(&id, diagnostics::exited(code));
                }
                self.apply(&id, generation, Transition::Exited { code });
            }
            ProcessEvent::WaitFailed {
                id,
                generation,
                error,
            } => {
                let Some(previous) = self.current_status(&id, generation) else {
                    return;
                };
                warn!(%id, %error, "waiting on process failed");
                self.publish_output(&id, format!("[错误] {}\n", error));
                let transition = if previous == Status::Stopping {
                    Transition::TerminateConfirmed
                } else {
                    Transition::SpawnFailed
                };
                self.apply(&id, generation, transition);
            }
            ProcessEvent::TerminateFinished {
                id,
                generation,
                outcome,
            } => {
                if let TerminateOutcome::Failed(error) = &outcome {
                    warn!(%id, %error, "process tree may have survived termination");
                }
                if self.current_status(&id, generation) == Some(Status::Stopping) {
                    self.publish_output(&id, diagnostics::stopped());
                    self.apply(&id, generation, Transition::TerminateConfirmed);
                }
            }
        }
    }

    fn current_status(&self, id: &str, generation: u64) -> Option<Status> {
        self.launches
            .get(id)
            .filter(|launch| launch.generation == generation)
            .map(|launch| launch.status)
    }

    // Applies `transition` to the launch if it is still the one `generation` refers to.
    fn apply(&mut self, id: &str, generation: u64, transition: Transition) {
        let Some(launch) = self
            .launches
            .get_mut(id)
            .filter(|launch| launch.generation == generation)
        else {
            return;
        };
        let Some(status) = lifecycle::next(launch.status, transition) else {
            return;
        };
        launch.status = status;
        debug!(%id, %status, ?transition, "transition");
        if status.is_terminal() {
            self.launches.remove(id);
        }
        self.publish_status(id, status);
    }

    fn publish_status(&self, id: &str, status: Status) {
        self.broadcaster.publish(Event::status(id, status));
    }

    fn publish_output(&self, id: &str, text: String) {
        self.broadcaster.publish(Event::output(id, text));
    }
}

async fn forward_output<R>(
    id: String,
    generation: u64,
    mut reader: R,
    tx: mpsc::UnboundedSender<ProcessEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; READ_BUFFER];
    let mut chunker = Utf8Chunker::new();
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                let text = chunker.push(&buffer[..n]);
                if !text.is_empty() {
                    let _ = tx.send(ProcessEvent::Output {
                        id: id.clone(),
                        generation,
                        text,
                    });
                }
            }
            Err(err) => {
                debug!(%id, error = %err, "output stream closed with error");
                break;
            }
        }
    }
    let tail = chunker.finish();
    if !tail.is_empty() {
        let _ = tx.send(ProcessEvent::Output {
            id,
            generation,
            text: tail,
        });
    }
}

async fn wait_for_exit(
    id: String,
    generation: u64,
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<ProcessEvent>,
) {
    let event = match child.wait().await {
        Ok(status) => ProcessEvent::Exited {
            id,
            generation,
            code: status.code(),
        },
        Err(err) => ProcessEvent::WaitFailed {
            id,
            generation,
            error: err.to_string(),
        },
    };
    // Descendants may keep the pipes open, so the drain is bounded.
    let _ = tokio::time::timeout(OUTPUT_DRAIN, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;
    let _ = tx.send(event);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            grace_period: Duration::from_millis(100),
            stop_timeout: Duration::from_millis(500),
            shell: None,
        }
    }

    async fn next_status(sub: &mut Subscription, id: &str) -> Status {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .expect("timed out waiting for status")
                .expect("broadcaster closed");
            if let Event::StatusChanged { id: event_id, status } = event {
                if event_id == id {
                    return status;
                }
            }
        }
    }

    #[tokio::test]
    async fn refuses_duplicate_active_launch_silently() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(fast_config());
        let mut sub = supervisor.subscribe();
        assert!(supervisor.launch("t1", "sleep 5", dir.path()).await);
        assert_eq!(next_status(&mut sub, "t1").await, Status::Starting);

        assert!(!supervisor.launch("t1", "sleep 5", dir.path()).await);
        assert_eq!(next_status(&mut sub, "t1").await, Status::Running);
        supervisor.kill_all().await;
    }

    #[tokio::test]
    async fn stop_without_launch_emits_nothing() {
        let supervisor = Supervisor::new(fast_config());
        let mut sub = supervisor.subscribe();
        assert!(!supervisor.stop("nobody").await);
        assert_eq!(supervisor.status("nobody").await, Status::Stopped);
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn spawn_failure_reports_error_without_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(SupervisorConfig {
            shell: Some(dir.path().join("no-such-shell")),
            ..fast_config()
        });
        let mut sub = supervisor.subscribe();
        assert!(supervisor.launch("broken", "echo hi", dir.path()).await);

        let mut statuses = Vec::new();
        let mut output = String::new();
        while statuses.last().map_or(true, |s: &Status| !s.is_terminal()) {
            let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .expect("timed out waiting for events")
                .expect("broadcaster closed");
            match event {
                Event::StatusChanged { status, .. } => statuses.push(status),
                Event::Output { text, .. } => output.push_str(&text),
            }
        }
        assert_eq!(statuses, vec![Status::Starting, Status::Error]);
        assert!(output.contains("[错误]"));
        assert!(supervisor.all_statuses().await.is_empty());
        assert!(!supervisor.has_running_processes().await);
    }

    #[tokio::test]
    async fn clean_exit_reaches_stopped_and_is_untracked() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(SupervisorConfig {
            grace_period: Duration::from_secs(3),
            ..fast_config()
        });
        let mut sub = supervisor.subscribe();
        assert!(supervisor.launch("ok", "true", dir.path()).await);
        assert_eq!(next_status(&mut sub, "ok").await, Status::Starting);
        assert_eq!(next_status(&mut sub, "ok").await, Status::Stopped);
        assert!(supervisor.all_statuses().await.is_empty());
    }
}
