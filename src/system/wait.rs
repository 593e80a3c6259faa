use std::io;

use libc::{c_int, WEXITSTATUS, WIFEXITED, WIFSIGNALED, WTERMSIG};

use crate::cutils::cerr;
use crate::system::interface::ProcessId;

mod sealed {
    pub(crate) trait Sealed {}

    impl Sealed for crate::system::interface::ProcessId {}
}

pub(crate) trait Wait: sealed::Sealed {
    /// Block until the child with this process ID terminates.
    ///
    /// A wait interrupted by a signal is restarted; the call only returns once the child is gone
    /// or `waitpid` fails for another reason.
    fn wait(self) -> io::Result<WaitStatus>;
}

impl Wait for ProcessId {
    fn wait(self) -> io::Result<WaitStatus> {
        loop {
            let mut status: c_int = 0;

            match cerr(unsafe { libc::waitpid(self.get(), &mut status, 0) }) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
                // stop and continue notifications are not requested, so anything else is final
                Ok(_) if WIFEXITED(status) || WIFSIGNALED(status) => {
                    return Ok(WaitStatus { status })
                }
                Ok(_) => continue,
            }
        }
    }
}

/// The status of the waited child.
pub struct WaitStatus {
    status: c_int,
}

impl std::fmt::Debug for WaitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(exit_status) = self.exit_status() {
            write!(f, "ExitStatus({exit_status})")
        } else if let Some(signal) = self.term_signal() {
            write!(f, "TermSignal({signal})")
        } else {
            write!(f, "Unknown")
        }
    }
}

impl WaitStatus {
    /// Return the exit status of the child if the child terminated normally.
    pub const fn exit_status(&self) -> Option<c_int> {
        if WIFEXITED(self.status) {
            Some(WEXITSTATUS(self.status))
        } else {
            None
        }
    }

    /// Return the signal number which caused the child to terminate if the child was terminated by
    /// a signal.
    pub const fn term_signal(&self) -> Option<c_int> {
        if WIFSIGNALED(self.status) {
            Some(WTERMSIG(self.status))
        } else {
            None
        }
    }
}
