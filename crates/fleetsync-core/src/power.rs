//! System sleep inhibition around a sync pass.
//!
//! A fleet pass can run for minutes; the host must not suspend in the
//! middle of a push. [`PowerGuard::prevent`] asks the OS to stay awake
//! and the guard restores normal power management when dropped, so
//! restoration happens on every exit path.
//!
//! Inhibition is only wired up on Windows (`SetThreadExecutionState`
//! semantics); elsewhere the guard is a logged no-op and the platform's
//! own inhibitor (e.g. systemd-inhibit around the daemon) is expected to
//! cover it.

use tracing::debug;

/// RAII sleep-inhibition guard.
pub struct PowerGuard {
    restored: bool,
}

impl PowerGuard {
    /// Keep the system awake until the guard is dropped or
    /// [`PowerGuard::restore`] is called.
    pub fn prevent() -> Self {
        debug!("preventing system sleep for the duration of the pass");
        platform::prevent();
        Self { restored: false }
    }

    /// Restore normal power management. Idempotent.
    pub fn restore(&mut self) {
        if !self.restored {
            debug!("restoring system sleep behavior");
            platform::restore();
            self.restored = true;
        }
    }
}

impl Drop for PowerGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(windows)]
mod platform {
    // ES_CONTINUOUS | ES_SYSTEM_REQUIRED via SetThreadExecutionState.
    const ES_CONTINUOUS: u32 = 0x8000_0000;
    const ES_SYSTEM_REQUIRED: u32 = 0x0000_0001;

    #[link(name = "kernel32")]
    extern "system" {
        fn SetThreadExecutionState(es_flags: u32) -> u32;
    }

    pub fn prevent() {
        unsafe {
            SetThreadExecutionState(ES_CONTINUOUS | ES_SYSTEM_REQUIRED);
        }
    }

    pub fn restore() {
        unsafe {
            SetThreadExecutionState(ES_CONTINUOUS);
        }
    }
}

#[cfg(not(windows))]
mod platform {
    pub fn prevent() {}
    pub fn restore() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_on_drop_and_is_idempotent() {
        let mut guard = PowerGuard::prevent();
        guard.restore();
        guard.restore();
        drop(guard);

        // drop-only path
        let _guard = PowerGuard::prevent();
    }
}
