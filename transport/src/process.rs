//! Child-process ownership helpers.

use std::time::Duration;

use tokio::process::Child;

/// Owns a spawned child and kills it (and its process group on Unix) on drop.
///
/// Wrap the child immediately after `spawn()` so a dropped or cancelled
/// execution never leaves the tool running. Call `disarm()` once the child
/// has been reaped normally.
pub(crate) struct ChildGuard {
    child: Child,
    armed: bool,
}

impl ChildGuard {
    pub fn new(child: Child) -> Self {
        Self { child, armed: true }
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Kill the child and wait up to `grace` for it to be reaped.
    pub async fn kill_and_reap(&mut self, grace: Duration) {
        kill_tree(&mut self.child);
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_)) => self.armed = false,
            Ok(Err(e)) => tracing::debug!("failed to reap killed child: {e}"),
            Err(_) => tracing::warn!("killed child did not exit within {grace:?}"),
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        kill_tree(&mut self.child);
        let _ = self.child.try_wait();
    }
}

fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // The child leads its own session (see `set_new_session`), so pid == pgid.
            unsafe {
                if libc::killpg(pid as i32, libc::SIGKILL) == -1 {
                    let _ = child.start_kill();
                }
            }
            return;
        }
    }
    let _ = child.start_kill();
}

/// Put the child process in its own session (Unix only) so the entire process
/// group can be killed via `killpg` on cancel, timeout, or disposal.
#[cfg(unix)]
pub(crate) fn set_new_session(cmd: &mut tokio::process::Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Linux-only: the tool dies with the host even on kill -9.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}
