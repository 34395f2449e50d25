// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error-injection switches shared by the gateway and the worker.
//! Changed only through the control endpoint.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct FaultInjector {
    fail_store_writes: AtomicBool,
    fail_log_appends: AtomicBool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultSettings {
    pub fail_store_writes: bool,
    #[serde(default)]
    pub fail_log_appends: bool,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_writes_fail(&self) -> bool {
        self.fail_store_writes.load(Ordering::Relaxed)
    }

    pub fn log_appends_fail(&self) -> bool {
        self.fail_log_appends.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> FaultSettings {
        FaultSettings {
            fail_store_writes: self.store_writes_fail(),
            fail_log_appends: self.log_appends_fail(),
        }
    }

    pub fn apply(&self, settings: FaultSettings) {
        let before = self.snapshot();
        self.fail_store_writes.store(settings.fail_store_writes, Ordering::Relaxed);
        self.fail_log_appends.store(settings.fail_log_appends, Ordering::Relaxed);
        if before != settings {
            tracing::warn!("Fault injection changed: {:?} -> {:?}", before, settings);
        }
    }
}
