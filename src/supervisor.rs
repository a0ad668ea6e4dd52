//! Starts a local server process on demand and stops it when nobody needs it.
//!
//! There is one [`Supervisor`] per server artifact path. Callers announce
//! themselves with [`Supervisor::acquire`] and leave with
//! [`Supervisor::release`]; the process is terminated when the last holder
//! leaves, or when the supervisor itself is dropped.

use crate::config::SupervisorConfig;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    ffi::OsString,
    fmt, io,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock, Weak,
    },
    thread,
    time::Instant,
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("could not find the server to run: {0}")]
    NotFound(String),

    #[error("no interpreter available to run the server script {}", .0.display())]
    NoInterpreter(PathBuf),

    #[error("{0}")]
    IdentityMismatch(String),

    #[error("failed to start the server: {0}")]
    Spawn(#[source] io::Error),
}

/// Identifies one holder of a [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerId(u64);

impl CallerId {
    pub fn unique() -> Self {
        // Kept apart from small caller-chosen ids.
        static NEXT: AtomicU64 = AtomicU64::new(1 << 63);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for CallerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "caller#{}", self.0)
    }
}

/// What to launch. At least one of executable and script must be given.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    executable: Option<PathBuf>,
    script: Option<PathBuf>,
    interpreter: Option<PathBuf>,
    args: Vec<OsString>,
}

impl LaunchSpec {
    pub fn executable(path: impl Into<PathBuf>) -> Self {
        Self::default().with_executable(path)
    }

    pub fn script(path: impl Into<PathBuf>) -> Self {
        Self::default().with_script(path)
    }

    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn with_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.script = Some(path.into());
        self
    }

    /// Interpreter for the script. Without one, the
    /// `INTERFACE_PROXY_INTERPRETER` environment variable is consulted.
    pub fn interpreter(mut self, path: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(path.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

type Registry = Mutex<HashMap<PathBuf, Weak<Supervisor>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

fn resolve(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

pub struct Supervisor {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    executable: Option<PathBuf>,
    script: Option<PathBuf>,
    interpreter: Option<PathBuf>,
    args: Vec<OsString>,
    child: Option<Child>,
    holders: HashSet<CallerId>,
}

impl Supervisor {
    /// Get the supervisor for the artifact in `spec`, start the server if it
    /// is not running, and record `caller` as a holder.
    pub fn acquire(caller: impl Into<CallerId>, spec: LaunchSpec) -> Result<Arc<Self>, SupervisorError> {
        let caller = caller.into();
        let spec = LaunchSpec {
            executable: spec.executable.as_deref().map(resolve),
            script: spec.script.as_deref().map(resolve),
            ..spec
        };
        let keys: Vec<PathBuf> = spec
            .executable
            .iter()
            .chain(spec.script.iter())
            .cloned()
            .collect();
        if keys.is_empty() {
            return Err(SupervisorError::NotFound(
                "neither an executable nor a script was given".to_owned(),
            ));
        }

        let supervisor = {
            let mut registry = registry().lock();
            registry.retain(|_, instance| instance.strong_count() > 0);

            let mut found = keys.iter().filter_map(|key| registry.get(key)?.upgrade());
            let supervisor = match found.next() {
                Some(first) => {
                    if found.any(|other| !Arc::ptr_eq(&first, &other)) {
                        return Err(SupervisorError::IdentityMismatch(
                            "the executable and the script belong to different servers".to_owned(),
                        ));
                    }
                    first
                }
                None => Arc::new(Supervisor {
                    state: Mutex::default(),
                }),
            };
            supervisor.state.lock().bind(&spec)?;
            for key in keys {
                registry.insert(key, Arc::downgrade(&supervisor));
            }
            supervisor
        };

        let mut state = supervisor.state.lock();
        if !state.is_running() {
            state.launch()?;
        }
        state.holders.insert(caller);
        debug!("{} acquired the server ({} holders)", caller, state.holders.len());
        drop(state);
        Ok(supervisor)
    }

    /// Remove `caller`; the last holder to leave terminates the server.
    pub fn release(&self, caller: impl Into<CallerId>) {
        let caller = caller.into();
        let mut state = self.state.lock();
        state.holders.remove(&caller);
        debug!("{} released the server ({} holders)", caller, state.holders.len());
        if state.holders.is_empty() {
            state.terminate();
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_running()
    }

    /// Pid of the running server process, if any.
    pub fn pid(&self) -> Option<u32> {
        let mut state = self.state.lock();
        if state.is_running() {
            state.child.as_ref().map(Child::id)
        } else {
            None
        }
    }

    pub fn holders(&self) -> usize {
        self.state.lock().holders.len()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.state.get_mut().terminate();
    }
}

impl State {
    /// Record the artifact paths. A supervisor manages one server for life.
    fn bind(&mut self, spec: &LaunchSpec) -> Result<(), SupervisorError> {
        bind_path(&mut self.executable, spec.executable.as_ref())?;
        bind_path(&mut self.script, spec.script.as_ref())?;
        if spec.interpreter.is_some() {
            self.interpreter.clone_from(&spec.interpreter);
        }
        if self.args.is_empty() {
            self.args.clone_from(&spec.args);
        }
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_))) | None => false,
            Some(Err(e)) => {
                warn!("Failed to query the server process: {}", e);
                false
            }
        }
    }

    fn launch(&mut self) -> Result<(), SupervisorError> {
        self.terminate();

        let mut command = match (&self.executable, &self.script) {
            (Some(exe), _) if is_executable(exe) => {
                info!("Starting server executable {}", exe.display());
                let mut command = Command::new(exe);
                command.current_dir(parent(exe));
                #[cfg(windows)]
                {
                    use std::os::windows::process::CommandExt;
                    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
                    const DETACHED_PROCESS: u32 = 0x0000_0008;
                    command.creation_flags(CREATE_NO_WINDOW | DETACHED_PROCESS);
                }
                command
            }
            (_, Some(script)) if script.is_file() => {
                let interpreter = self
                    .interpreter
                    .clone()
                    .or_else(|| std::env::var_os(SupervisorConfig::INTERPRETER_ENV).map(PathBuf::from))
                    .ok_or_else(|| SupervisorError::NoInterpreter(script.clone()))?;
                info!(
                    "Starting server script {} with {}",
                    script.display(),
                    interpreter.display()
                );
                let mut command = Command::new(interpreter);
                command.arg(script).current_dir(parent(script));
                command
            }
            (exe, script) => {
                let describe = |p: &Option<PathBuf>| {
                    p.as_ref()
                        .map_or_else(|| "<none>".to_owned(), |p| p.display().to_string())
                };
                return Err(SupervisorError::NotFound(format!(
                    "neither executable {} nor script {} can be run",
                    describe(exe),
                    describe(script)
                )));
            }
        };

        let child = command
            .args(&self.args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(SupervisorError::Spawn)?;
        info!("Server started with pid {}", child.id());
        self.child = Some(child);
        Ok(())
    }

    /// Stop the server if it still runs, forgetting all holders.
    fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Server {} already exited with {}", child.id(), status);
                return;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to query server {}: {}", child.id(), e),
        }
        self.holders.clear();
        info!("Terminating server {}", child.id());
        stop(&mut child);
    }
}

fn bind_path(bound: &mut Option<PathBuf>, new: Option<&PathBuf>) -> Result<(), SupervisorError> {
    match (bound.as_ref(), new) {
        (Some(previous), Some(new)) if previous != new => {
            Err(SupervisorError::IdentityMismatch(format!(
                "this supervisor manages {}, not {}",
                previous.display(),
                new.display()
            )))
        }
        (None, Some(new)) => {
            *bound = Some(new.clone());
            Ok(())
        }
        _ => Ok(()),
    }
}

fn parent(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// SIGTERM, wait out the grace period, then kill. Always reaps.
#[cfg(unix)]
fn stop(child: &mut Child) {
    use nix::{
        sys::signal::{kill, Signal},
        unistd::Pid,
    };

    let pid = match i32::try_from(child.id()) {
        Ok(raw) => Pid::from_raw(raw),
        Err(e) => {
            warn!("Server pid {} is out of range ({}), killing it", child.id(), e);
            kill_and_reap(child);
            return;
        }
    };
    match kill(pid, Signal::SIGTERM) {
        Ok(()) => {
            let deadline = Instant::now() + SupervisorConfig::TERMINATE_GRACE;
            while Instant::now() < deadline {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!("Server {} exited with {}", pid, status);
                        return;
                    }
                    Ok(None) => thread::sleep(SupervisorConfig::TERMINATE_POLL),
                    Err(e) => {
                        warn!("Failed to wait for server {}: {}", pid, e);
                        break;
                    }
                }
            }
            warn!("Server {} did not exit after SIGTERM, killing it", pid);
        }
        Err(e) => warn!("Failed to send SIGTERM to {}: {}", pid, e),
    }
    kill_and_reap(child);
}

#[cfg(not(unix))]
fn stop(child: &mut Child) {
    kill_and_reap(child);
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("Failed to kill server {}: {}", child.id(), e);
    }
    if let Err(e) = child.wait() {
        warn!("Failed to reap server {}: {}", child.id(), e);
    }
}
