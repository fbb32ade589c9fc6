//! Processes confined to a prepared filesystem root


mod handle;
mod relay;

pub use handle::{ExitStatus, ProcessHandle};

use crate::errors::RuntimeError;
use handle::ChildHandle;
use relay::Relay;
use std::{
    ffi::{CStr, CString, OsStr},
    fmt, io,
    io::Write,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{
    process::Command,
    runtime::Handle,
    signal::unix::{signal, SignalKind},
    time,
};

/// Fallback for SIGCHLD notifications that were coalesced or went to
/// another listener
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Where a [Sandbox] is in its lifecycle
///
/// `NotStarted -> Running -> Finished`, never backwards.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Finished,
}

/// A command confined to a filesystem root
///
/// Each sandbox runs at most one process, once. The lifecycle state is never
/// stored; it's read back from the process handle under the sandbox's lock
/// every time it's needed, and that same lock covers starting, signalling,
/// and reaping.
///
/// The child's standard output is relayed line by line to the output sink,
/// which is the parent's stdout unless [Sandbox::set_output()] says
/// otherwise. Standard error is inherited.
pub struct Sandbox {
    root: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    output: Option<Box<dyn Write + Send>>,
    handle: Option<Box<dyn ProcessHandle>>,
    relay: Option<Relay>,
}

impl Inner {
    fn state(&mut self) -> Result<ProcessState, RuntimeError> {
        match &mut self.handle {
            None => Ok(ProcessState::NotStarted),
            Some(handle) => match handle.try_wait().map_err(RuntimeError::Wait)? {
                None => Ok(ProcessState::Running),
                Some(_) => Ok(ProcessState::Finished),
            },
        }
    }

    fn check_startable(&mut self) -> Result<(), RuntimeError> {
        match self.state()? {
            ProcessState::NotStarted => Ok(()),
            ProcessState::Running => Err(RuntimeError::AlreadyRunning),
            ProcessState::Finished => Err(RuntimeError::AlreadyFinished),
        }
    }
}

impl Sandbox {
    /// Prepare to run a process confined to `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Sandbox {
            root: root.into(),
            inner: Mutex::new(Inner {
                output: Some(Box::new(io::stdout())),
                handle: None,
                relay: None,
            }),
        }
    }

    /// The directory this sandbox's processes see as `/`
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the sink for the process's standard output
    ///
    /// `None` discards output. The sink is handed to the output relay when
    /// the process starts, so it can't be changed after that.
    pub fn set_output(&self, sink: Option<Box<dyn Write + Send>>) -> Result<(), RuntimeError> {
        let mut inner = self.lock();
        if inner.handle.is_some() {
            return Err(RuntimeError::OutputInUse);
        }
        inner.output = Some(sink.unwrap_or_else(|| Box::new(io::sink())));
        Ok(())
    }

    /// Start `command` with the filesystem root replaced by this sandbox's root
    ///
    /// The command is resolved inside the new root. This returns as soon as
    /// the process is running. Outside of a tokio runtime this fails with
    /// [RuntimeError::Start] and nothing is spawned. Changing the root needs
    /// `CAP_SYS_CHROOT`.
    pub fn start<S, I, A>(&self, command: S, args: I) -> Result<(), RuntimeError>
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        Handle::try_current()
            .map_err(|e| RuntimeError::Start(io::Error::new(io::ErrorKind::Other, e)))?;
        let mut inner = self.lock();
        inner.check_startable()?;

        let root = CString::new(self.root.as_os_str().as_bytes())?;
        let mut cmd = Command::new(command.as_ref());
        cmd.args(args).stdout(Stdio::piped()).kill_on_drop(true);
        unsafe {
            cmd.pre_exec(move || confine(&root));
        }

        let mut child = cmd.spawn().map_err(RuntimeError::Start)?;
        let stdout = child.stdout.take().ok_or_else(|| {
            RuntimeError::Start(io::Error::new(
                io::ErrorKind::Other,
                "child has no stdout pipe",
            ))
        })?;
        let handle = ChildHandle::new(child).map_err(RuntimeError::Start)?;
        log::debug!(
            "started {:?} in {:?} as pid {}",
            command.as_ref(),
            self.root,
            handle.pid()
        );

        let sink = inner.output.take().ok_or(RuntimeError::OutputInUse)?;
        inner.relay = Some(relay::spawn(stdout, sink));
        inner.handle = Some(Box::new(handle));
        Ok(())
    }

    /// Adopt an existing process handle as if it had just been started
    #[cfg(test)]
    pub(crate) fn start_with(&self, handle: Box<dyn ProcessHandle>) -> Result<(), RuntimeError> {
        let mut inner = self.lock();
        inner.check_startable()?;
        inner.handle = Some(handle);
        Ok(())
    }

    /// Current lifecycle state, as reported by the operating system
    pub fn state(&self) -> Result<ProcessState, RuntimeError> {
        self.lock().state()
    }

    /// Wait for the process to exit, and return its status
    ///
    /// A non-zero exit is not an error. Returning only means the process has
    /// exited; output may still be in flight, see [Sandbox::drain_output()].
    /// There's no timeout here; race this against a timer and use
    /// [Sandbox::send_signal()] to give up on a process.
    pub async fn wait(&self) -> Result<ExitStatus, RuntimeError> {
        let mut sigchld = signal(SignalKind::child())?;
        loop {
            if let Some(status) = self.poll_exit()? {
                log::debug!("{:?} exited with {}", self.root, status);
                return Ok(status);
            }
            tokio::select! {
                _ = sigchld.recv() => (),
                _ = time::sleep(EXIT_POLL_INTERVAL) => (),
            }
        }
    }

    fn poll_exit(&self) -> Result<Option<ExitStatus>, RuntimeError> {
        match self.lock().handle.as_mut() {
            None => Err(RuntimeError::NotStarted),
            Some(handle) => handle.try_wait().map_err(RuntimeError::Wait),
        }
    }

    /// Wait until all of the process's output has reached the sink
    ///
    /// Only meaningful once the process has closed its stdout, which usually
    /// happens when it exits. Does nothing if there's no relay to wait for.
    pub async fn drain_output(&self) -> Result<(), RuntimeError> {
        let relay = self.lock().relay.take();
        match relay {
            Some(relay) => relay.join().await,
            None => Ok(()),
        }
    }

    /// Deliver a signal to the running process
    ///
    /// The state check and the delivery happen under one lock, and reaping
    /// takes the same lock, so the signal can't reach a recycled PID.
    pub fn send_signal(&self, signal: libc::c_int) -> Result<(), RuntimeError> {
        let mut inner = self.lock();
        let handle = match inner.handle.as_mut() {
            None => return Err(RuntimeError::NotRunning),
            Some(handle) => handle,
        };
        if handle.try_wait().map_err(RuntimeError::Wait)?.is_some() {
            return Err(RuntimeError::NotRunning);
        }
        log::debug!("signal pid {} with {}", handle.pid(), signal);
        handle
            .signal(signal)
            .map_err(|source| RuntimeError::Signal { signal, source })
    }

    /// Process ID, available once started
    pub fn pid(&self) -> Result<u32, RuntimeError> {
        match self.lock().handle.as_ref() {
            None => Err(RuntimeError::NotStarted),
            Some(handle) => Ok(handle.pid()),
        }
    }

    /// Exit status, available once finished
    pub fn exit_status(&self) -> Result<ExitStatus, RuntimeError> {
        match self.lock().handle.as_mut() {
            None => Err(RuntimeError::NotFinished),
            Some(handle) => handle
                .try_wait()
                .map_err(RuntimeError::Wait)?
                .ok_or(RuntimeError::NotFinished),
        }
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox").field("root", &self.root).finish()
    }
}

/// Runs in the forked child; must stay async-signal-safe
fn confine(root: &CStr) -> io::Result<()> {
    if unsafe { libc::chroot(root.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::chdir(b"/\0".as_ptr() as *const libc::c_char) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
