use std::{fmt, io, os::unix::process::ExitStatusExt};
use tokio::process::Child;

/// Status of an exited sandbox process
///
/// Much like [std::process::ExitStatus]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ExitStatus {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ExitStatus {
    /// Status of a process that called `exit(code)`
    pub fn from_code(code: i32) -> Self {
        ExitStatus {
            code: Some(code),
            signal: None,
        }
    }

    /// Status of a process terminated by a signal
    pub fn from_signal(signal: i32) -> Self {
        ExitStatus {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    /// The status as a single number, the way a shell reports it
    ///
    /// Signal deaths become `128 + signal`.
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 0xFF,
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        ExitStatus {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// The operating system's view of one child process
///
/// A sandbox's state is always read back from its handle rather than tracked
/// separately. Once `try_wait()` has reported an exit it must keep returning
/// that same status.
pub trait ProcessHandle: Send + fmt::Debug {
    /// Process ID, still valid after exit
    fn pid(&self) -> u32;

    /// Check for exit without blocking
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    /// Deliver a signal
    fn signal(&mut self, signal: libc::c_int) -> io::Result<()>;
}

/// A real child process spawned by tokio
#[derive(Debug)]
pub(crate) struct ChildHandle {
    child: Child,
    pid: u32,
}

impl ChildHandle {
    pub fn new(child: Child) -> io::Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child has no process ID"))?;
        Ok(ChildHandle { child, pid })
    }
}

impl ProcessHandle for ChildHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?.map(ExitStatus::from))
    }

    fn signal(&mut self, signal: libc::c_int) -> io::Result<()> {
        // Only sound while the child is unreaped, which the caller checks
        // under the same lock that reaping happens under.
        if unsafe { libc::kill(self.pid as libc::pid_t, signal) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
