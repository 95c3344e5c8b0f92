//! Forwarding of SIGINT and SIGTERM to the process being waited on
//!
//! Both the launcher and the bootstrap block on exactly one child. While they
//! do, an interrupt or termination request is passed on as SIGTERM so the
//! child can exit and the waiting side can still unwind and clean up.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::sync::Once;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, warn};

static TARGET: AtomicI32 = AtomicI32::new(0);
static INSTALL: Once = Once::new();

/// Forwarding stays active while this is alive
#[must_use = "forwarding stops when the guard is dropped"]
#[derive(Debug)]
pub struct Forwarding {
    pid: Pid,
}

/// Forward SIGINT and SIGTERM to `pid` until the returned guard is dropped
pub fn forward_to(pid: Pid) -> Forwarding {
    TARGET.store(pid.as_raw(), Ordering::SeqCst);

    INSTALL.call_once(|| {
        if let Err(e) = ctrlc::set_handler(|| {
            let pid = TARGET.load(Ordering::SeqCst);
            if pid > 0 {
                warn!(pid, "Received interrupt, forwarding SIGTERM to child");
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }) {
            // Not fatal: the child can still be stopped directly
            warn!("Could not set signal handler: {}", e);
        }
    });

    debug!(pid = pid.as_raw(), "Forwarding signals");
    Forwarding { pid }
}

impl Drop for Forwarding {
    fn drop(&mut self) {
        // Only clear our own registration
        let _ = TARGET.compare_exchange(self.pid.as_raw(), 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}
