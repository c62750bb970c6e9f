// Daemonization support for Unix systems

use super::sys::{DetachOps, UnixOps};
use crate::error::{DaemonError, Result};
use nix::errno::Errno;
use nix::libc::{self, pid_t};
use nix::unistd::{ForkResult, Pid};
use std::fmt;
use tracing::{debug, warn};

/// Which side of the fork the caller is running on after [`detach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSplit {
    /// The original process; `child` is the daemon's pid
    Parent { child: Pid },
    /// The detached daemon
    Child,
}

impl ProcessSplit {
    /// Integer form of the split: the child's pid in the parent, 0 in the child
    pub fn as_raw(&self) -> pid_t {
        match self {
            ProcessSplit::Parent { child } => child.as_raw(),
            ProcessSplit::Child => 0,
        }
    }
}

/// Progress of the child through the detach transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachState {
    Forked,
    SessionDetaching,
    DirectoryChanging,
    DescriptorsClosing,
    DescriptorsRedirected,
    Aborted,
}

impl DetachState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DetachState::DescriptorsRedirected | DetachState::Aborted
        )
    }

    /// States whose step may end the child
    pub fn can_abort(self) -> bool {
        matches!(
            self,
            DetachState::SessionDetaching | DetachState::DirectoryChanging
        )
    }
}

impl fmt::Display for DetachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetachState::Forked => "forked",
            DetachState::SessionDetaching => "starting a new session",
            DetachState::DirectoryChanging => "changing directory to /",
            DetachState::DescriptorsClosing => "closing standard descriptors",
            DetachState::DescriptorsRedirected => "redirecting standard descriptors",
            DetachState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Fork and turn the child into a daemon.
///
/// In the parent this returns [`ProcessSplit::Parent`] immediately, without
/// touching the parent's own umask, session, working directory or
/// descriptors. In the child the umask is cleared, a new session is started,
/// the working directory becomes `/` and descriptors 0, 1 and 2 are bound to
/// `/dev/null` before [`ProcessSplit::Child`] is returned.
///
/// If the child cannot start a new session or change directory it exits with
/// `EXIT_FAILURE` instead of returning. Only a failed fork is reported as an
/// error, and in that case no child exists.
///
/// Call this before creating threads, sockets or other resources.
pub fn detach() -> Result<ProcessSplit> {
    detach_with(&mut UnixOps)
}

/// [`detach`] as a single integer: child pid in the parent, 0 in the child,
/// -1 if the fork failed
pub fn detach_raw() -> pid_t {
    detach_raw_with(&mut UnixOps)
}

pub(crate) fn detach_raw_with<O: DetachOps>(ops: &mut O) -> pid_t {
    match detach_with(ops) {
        Ok(split) => split.as_raw(),
        Err(_) => -1,
    }
}

pub(crate) fn detach_with<O: DetachOps>(ops: &mut O) -> Result<ProcessSplit> {
    match ops.fork() {
        Ok(ForkResult::Parent { child }) => {
            debug!(child = child.as_raw(), "Forked daemon process");
            Ok(ProcessSplit::Parent { child })
        }
        Ok(ForkResult::Child) => match run_child(ops, &mut Transition::new()) {
            Ok(_) => Ok(ProcessSplit::Child),
            Err(e) if e.is_fatal() => ops.exit(libc::EXIT_FAILURE),
            Err(e) => Err(e),
        },
        Err(errno) => {
            warn!(%errno, "Fork failed, no daemon process was created");
            Err(DaemonError::Fork(errno))
        }
    }
}

/// Strictly forward walk through [`DetachState`]
#[derive(Debug)]
pub(crate) struct Transition {
    state: DetachState,
}

impl Transition {
    pub(crate) fn new() -> Self {
        Self {
            state: DetachState::Forked,
        }
    }

    pub(crate) fn state(&self) -> DetachState {
        self.state
    }

    fn advance(&mut self, next: DetachState) {
        debug_assert!(!self.state.is_terminal());
        self.state = next;
    }

    /// Move to `Aborted`, returning the error for the step that failed
    fn abort(&mut self, source: Errno) -> DaemonError {
        debug_assert!(self.state.can_abort());
        let state = self.state;
        self.state = DetachState::Aborted;
        DaemonError::Aborted { state, source }
    }
}

/// Drive the child from `Forked` to a terminal state. No logging happens
/// here since the child's descriptors are being torn down.
pub(crate) fn run_child<O: DetachOps>(
    ops: &mut O,
    transition: &mut Transition,
) -> Result<DetachState> {
    ops.clear_umask();

    transition.advance(DetachState::SessionDetaching);
    if let Err(e) = ops.new_session() {
        return Err(transition.abort(e));
    }

    transition.advance(DetachState::DirectoryChanging);
    if let Err(e) = ops.chdir_root() {
        return Err(transition.abort(e));
    }

    // Close, open and dup failures are not fatal.
    transition.advance(DetachState::DescriptorsClosing);
    ops.close_stdio();
    let _ = ops.redirect_stdio();

    transition.advance(DetachState::DescriptorsRedirected);
    Ok(transition.state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Fork,
        ClearUmask,
        NewSession,
        ChdirRoot,
        CloseStdio,
        RedirectStdio,
        Exit(i32),
    }

    /// Panic payload standing in for process termination
    struct MockExit(i32);

    struct MockOps {
        calls: Vec<Call>,
        fork_result: nix::Result<ForkResult>,
        session_result: nix::Result<Pid>,
        chdir_result: nix::Result<()>,
        redirect_result: nix::Result<()>,
    }

    impl MockOps {
        fn child() -> Self {
            Self {
                calls: Vec::new(),
                fork_result: Ok(ForkResult::Child),
                session_result: Ok(Pid::from_raw(4242)),
                chdir_result: Ok(()),
                redirect_result: Ok(()),
            }
        }

        fn parent(child: i32) -> Self {
            Self {
                fork_result: Ok(ForkResult::Parent {
                    child: Pid::from_raw(child),
                }),
                ..Self::child()
            }
        }
    }

    impl DetachOps for MockOps {
        fn fork(&mut self) -> nix::Result<ForkResult> {
            self.calls.push(Call::Fork);
            self.fork_result
        }

        fn clear_umask(&mut self) {
            self.calls.push(Call::ClearUmask);
        }

        fn new_session(&mut self) -> nix::Result<Pid> {
            self.calls.push(Call::NewSession);
            self.session_result
        }

        fn chdir_root(&mut self) -> nix::Result<()> {
            self.calls.push(Call::ChdirRoot);
            self.chdir_result
        }

        fn close_stdio(&mut self) {
            self.calls.push(Call::CloseStdio);
        }

        fn redirect_stdio(&mut self) -> nix::Result<()> {
            self.calls.push(Call::RedirectStdio);
            self.redirect_result
        }

        fn exit(&mut self, status: i32) -> ! {
            self.calls.push(Call::Exit(status));
            panic::panic_any(MockExit(status))
        }
    }

    fn exit_status(ops: &mut MockOps) -> Option<i32> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| detach_with(ops)));
        match outcome {
            Ok(_) => None,
            Err(payload) => payload.downcast_ref::<MockExit>().map(|e| e.0),
        }
    }

    #[test]
    fn test_parent_path_returns_child_pid() {
        let mut ops = MockOps::parent(1234);

        let split = detach_with(&mut ops).unwrap();

        assert_eq!(split, ProcessSplit::Parent { child: Pid::from_raw(1234) });
        assert_eq!(split.as_raw(), 1234);

        // The parent performs none of the detach steps
        assert_eq!(ops.calls, vec![Call::Fork]);
    }

    #[test]
    fn test_child_path_runs_steps_in_order() {
        let mut ops = MockOps::child();

        let split = detach_with(&mut ops).unwrap();

        assert_eq!(split, ProcessSplit::Child);
        assert_eq!(split.as_raw(), 0);
        assert_eq!(
            ops.calls,
            vec![
                Call::Fork,
                Call::ClearUmask,
                Call::NewSession,
                Call::ChdirRoot,
                Call::CloseStdio,
                Call::RedirectStdio,
            ]
        );
    }

    #[test]
    fn test_child_reaches_descriptors_redirected() {
        let mut ops = MockOps::child();
        let mut transition = Transition::new();
        assert_eq!(transition.state(), DetachState::Forked);

        let state = run_child(&mut ops, &mut transition).unwrap();
        assert_eq!(state, DetachState::DescriptorsRedirected);
        assert_eq!(transition.state(), DetachState::DescriptorsRedirected);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_fork_failure_is_reported() {
        let mut ops = MockOps::child();
        ops.fork_result = Err(Errno::EAGAIN);

        let result = detach_with(&mut ops);

        assert!(matches!(result, Err(DaemonError::Fork(Errno::EAGAIN))));
        assert_eq!(ops.calls, vec![Call::Fork]);
    }

    #[test]
    fn test_fork_failure_raw_is_negative() {
        let mut ops = MockOps::child();
        ops.fork_result = Err(Errno::ENOMEM);

        assert!(detach_raw_with(&mut ops) < 0);
        assert_eq!(ops.calls, vec![Call::Fork]);
    }

    #[test]
    fn test_raw_values_for_both_sides() {
        assert_eq!(detach_raw_with(&mut MockOps::parent(77)), 77);
        assert_eq!(detach_raw_with(&mut MockOps::child()), 0);
    }

    #[test]
    fn test_setsid_failure_exits_child() {
        let mut ops = MockOps::child();
        ops.session_result = Err(Errno::EPERM);

        assert_eq!(exit_status(&mut ops), Some(libc::EXIT_FAILURE));

        // Nothing runs after the failed step
        assert_eq!(
            ops.calls,
            vec![
                Call::Fork,
                Call::ClearUmask,
                Call::NewSession,
                Call::Exit(libc::EXIT_FAILURE),
            ]
        );
    }

    #[test]
    fn test_setsid_failure_still_gives_parent_a_pid() {
        // The parent side of the same split is unaffected by the child aborting
        let mut ops = MockOps::parent(555);
        ops.session_result = Err(Errno::EPERM);

        let split = detach_with(&mut ops).unwrap();
        assert_eq!(split.as_raw(), 555);
    }

    #[test]
    fn test_chdir_failure_exits_child() {
        let mut ops = MockOps::child();
        ops.chdir_result = Err(Errno::EACCES);

        assert_eq!(exit_status(&mut ops), Some(libc::EXIT_FAILURE));
        assert_eq!(
            ops.calls,
            vec![
                Call::Fork,
                Call::ClearUmask,
                Call::NewSession,
                Call::ChdirRoot,
                Call::Exit(libc::EXIT_FAILURE),
            ]
        );
    }

    #[test]
    fn test_aborted_state_is_recorded() {
        let mut ops = MockOps::child();
        ops.chdir_result = Err(Errno::ENOENT);

        let mut transition = Transition::new();
        match run_child(&mut ops, &mut transition) {
            Err(DaemonError::Aborted { state, source }) => {
                assert_eq!(state, DetachState::DirectoryChanging);
                assert_eq!(source, Errno::ENOENT);
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(transition.state(), DetachState::Aborted);
    }

    #[test]
    fn test_setsid_abort_stops_before_directory_change() {
        let mut ops = MockOps::child();
        ops.session_result = Err(Errno::EPERM);

        let mut transition = Transition::new();
        let err = run_child(&mut ops, &mut transition).unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(
            err,
            DaemonError::Aborted {
                state: DetachState::SessionDetaching,
                ..
            }
        ));
        assert_eq!(transition.state(), DetachState::Aborted);
        assert!(!ops.calls.contains(&Call::ChdirRoot));
    }

    #[test]
    fn test_redirect_failure_is_ignored() {
        let mut ops = MockOps::child();
        ops.redirect_result = Err(Errno::ENOENT);

        let split = detach_with(&mut ops).unwrap();
        assert_eq!(split, ProcessSplit::Child);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            DetachState::SessionDetaching.to_string(),
            "starting a new session"
        );
        assert!(!DetachState::Forked.is_terminal());
        assert!(DetachState::Aborted.is_terminal());
        assert!(DetachState::SessionDetaching.can_abort());
        assert!(!DetachState::DescriptorsClosing.can_abort());
    }
}
