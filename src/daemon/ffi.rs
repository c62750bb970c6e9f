// C ABI export of the detach transition for foreign hosts

use super::daemonize::detach_raw;
use nix::libc::pid_t;

/// Detach the calling process into a background daemon.
///
/// Returns the child's pid in the parent, `0` in the detached child and a
/// negative value if the process could not be forked. If the child cannot
/// start a new session or change directory to `/` it exits with
/// `EXIT_FAILURE` and this function never returns there.
///
/// Must be called before the host creates any threads.
#[no_mangle]
pub extern "C" fn daemonizer_detach() -> pid_t {
    detach_raw()
}
