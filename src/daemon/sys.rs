// System calls behind the detach transition

use nix::fcntl::{open, OFlag};
use nix::libc;
use nix::sys::stat::{umask, Mode};
use nix::unistd::{chdir, close, dup2, fork, setsid, ForkResult, Pid};

const DEV_NULL: &str = "/dev/null";

const STDIO: [libc::c_int; 3] = [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO];

/// The operating-system primitives the detach transition is built from.
///
/// Everything after `fork` runs in the child only.
pub(crate) trait DetachOps {
    /// Split the process in two
    fn fork(&mut self) -> nix::Result<ForkResult>;

    /// Reset the file-creation mask to 0
    fn clear_umask(&mut self);

    /// Become the leader of a new session with no controlling terminal
    fn new_session(&mut self) -> nix::Result<Pid>;

    /// Move the working directory to `/`
    fn chdir_root(&mut self) -> nix::Result<()>;

    /// Close descriptors 0, 1 and 2, ignoring errors
    fn close_stdio(&mut self);

    /// Bind descriptors 0, 1 and 2 to the null device
    fn redirect_stdio(&mut self) -> nix::Result<()>;

    /// Terminate the current process immediately
    fn exit(&mut self, status: i32) -> !;
}

/// [`DetachOps`] backed by the real system calls
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct UnixOps;

impl DetachOps for UnixOps {
    fn fork(&mut self) -> nix::Result<ForkResult> {
        // SAFETY: the child only issues the raw system calls below before
        // control returns to the caller, which must not have spawned threads.
        unsafe { fork() }
    }

    fn clear_umask(&mut self) {
        umask(Mode::empty());
    }

    fn new_session(&mut self) -> nix::Result<Pid> {
        setsid()
    }

    fn chdir_root(&mut self) -> nix::Result<()> {
        chdir("/")
    }

    fn close_stdio(&mut self) {
        for fd in STDIO {
            let _ = close(fd);
        }
    }

    fn redirect_stdio(&mut self) -> nix::Result<()> {
        // Slots 0-2 are closed at this point, so this is normally slot 0.
        let fd = open(DEV_NULL, OFlag::O_RDWR, Mode::empty())?;
        if fd != libc::STDIN_FILENO {
            dup2(fd, libc::STDIN_FILENO)?;
            let _ = close(fd);
        }

        dup2(libc::STDIN_FILENO, libc::STDOUT_FILENO)?;
        dup2(libc::STDIN_FILENO, libc::STDERR_FILENO)?;
        Ok(())
    }

    fn exit(&mut self, status: i32) -> ! {
        // _exit skips atexit handlers and stdio buffers inherited from the parent
        unsafe { libc::_exit(status) }
    }
}
