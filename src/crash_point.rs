//! Fault point injection for durability testing
//!
//! Two mechanisms share the same named points:
//!
//! - Process crash: when `QUICKCONSULT_CRASH_POINT` names a point, the
//!   process terminates via `std::process::abort()` when it is reached.
//!   No cleanup, no unwinding.
//! - In-process interruption: a [`FaultPoints`] set owned by a store
//!   instance. An armed point makes the surrounding transaction fail and
//!   roll back, which lets tests observe what survives a crash without
//!   killing the test binary.
//!
//! # Testing
//!
//! ```bash
//! QUICKCONSULT_CRASH_POINT=consultation_after_insert quickconsult start
//! ```

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};

/// Cache the crash point name to avoid repeated env var lookups
static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var("QUICKCONSULT_CRASH_POINT").ok())
        .as_deref()
}

/// Check if a process-level crash point is enabled
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Abort the process if the named crash point is enabled
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        tracing::error!(point = name, "triggering crash");
        std::process::abort();
    }
}

/// Points armed on a single store instance
#[derive(Debug, Default)]
pub struct FaultPoints {
    armed: Mutex<HashSet<&'static str>>,
}

impl FaultPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a point; it stays armed until [`FaultPoints::disarm`]
    pub fn arm(&self, name: &'static str) {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name);
    }

    pub fn disarm(&self, name: &str) {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Reached a fault point.
    ///
    /// Aborts if the process-level crash point matches, otherwise
    /// returns whether the point is armed on this instance.
    pub fn fire(&self, name: &'static str) -> bool {
        maybe_crash(name);
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

/// All defined fault point names
pub mod points {
    // Consultation creation
    pub const CONSULTATION_AFTER_INSERT: &str = "consultation_after_insert";
    pub const CONSULTATION_AFTER_SEED: &str = "consultation_after_seed";

    // Consultation close
    pub const CLOSE_AFTER_STATUS_UPDATE: &str = "close_after_status_update";

    // Message append
    pub const MESSAGE_BEFORE_INSERT: &str = "message_before_insert";

    // Identity federation
    pub const IDENTITY_AFTER_INSERT: &str = "identity_after_insert";

    /// Get all fault point names
    pub fn all() -> &'static [&'static str] {
        &[
            CONSULTATION_AFTER_INSERT,
            CONSULTATION_AFTER_SEED,
            CLOSE_AFTER_STATUS_UPDATE,
            MESSAGE_BEFORE_INSERT,
            IDENTITY_AFTER_INSERT,
        ]
    }
}
