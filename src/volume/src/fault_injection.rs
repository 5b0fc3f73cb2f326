use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

use common::error::ApiError;

/// Fault switches consulted by the chunk handlers. All off by default; only
/// the `fault-injection` feature mounts the endpoints that flip them.
#[derive(Debug, Default)]
pub struct FaultInjector {
    pub fail_store_once: AtomicBool,
    pub fail_store_always: AtomicBool,

    pub fail_fetch_once: AtomicBool,
    pub fail_fetch_always: AtomicBool,

    pub inject_latency_ms: AtomicU64,

    pub is_killed: AtomicBool,
}

fn take_flag(once: &AtomicBool, always: &AtomicBool) -> bool {
    always.load(Ordering::Relaxed) || once.swap(false, Ordering::Relaxed)
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_fail_store(&self) -> bool {
        take_flag(&self.fail_store_once, &self.fail_store_always)
    }

    pub fn should_fail_fetch(&self) -> bool {
        take_flag(&self.fail_fetch_once, &self.fail_fetch_always)
    }

    pub async fn apply_latency(&self) {
        let latency_ms = self.inject_latency_ms.load(Ordering::Relaxed);
        if latency_ms > 0 {
            sleep(Duration::from_millis(latency_ms)).await;
        }
    }

    /// A killed node answers every chunk request with 500.
    pub fn check_killed(&self) -> Result<(), ApiError> {
        if self.is_killed.load(Ordering::Relaxed) {
            return Err(ApiError::Any(anyhow::anyhow!("Server is killed")));
        }
        Ok(())
    }

    pub fn reset(&self) {
        self.fail_store_once.store(false, Ordering::Relaxed);
        self.fail_store_always.store(false, Ordering::Relaxed);
        self.fail_fetch_once.store(false, Ordering::Relaxed);
        self.fail_fetch_always.store(false, Ordering::Relaxed);
        self.inject_latency_ms.store(0, Ordering::Relaxed);
        self.is_killed.store(false, Ordering::Relaxed);
    }
}

#[cfg(feature = "fault-injection")]
pub use endpoints::*;

#[cfg(feature = "fault-injection")]
mod endpoints {
    use axum::{
        extract::{Query, State},
        http::StatusCode,
    };
    use serde::Deserialize;
    use std::sync::atomic::Ordering;

    use crate::state::VolumeState;

    #[derive(Deserialize)]
    pub struct FaultQuery {
        #[serde(default)]
        pub once: bool,
        #[serde(default)]
        pub always: bool,
        #[serde(default)]
        pub latency_ms: Option<u64>,
    }

    /// POST /admin/fail/store?once=true -> next chunk store returns 500.
    pub async fn fail_store(
        Query(params): Query<FaultQuery>,
        State(ctx): State<VolumeState>,
    ) -> StatusCode {
        let f = &ctx.fault_injector;
        if params.once {
            f.fail_store_once.store(true, Ordering::Relaxed);
        }
        if params.always {
            f.fail_store_always.store(true, Ordering::Relaxed);
        }
        StatusCode::OK
    }

    /// POST /admin/fail/fetch?always=true -> chunk fetches return 500.
    pub async fn fail_fetch(
        Query(params): Query<FaultQuery>,
        State(ctx): State<VolumeState>,
    ) -> StatusCode {
        let f = &ctx.fault_injector;
        if params.once {
            f.fail_fetch_once.store(true, Ordering::Relaxed);
        }
        if params.always {
            f.fail_fetch_always.store(true, Ordering::Relaxed);
        }
        StatusCode::OK
    }

    /// POST /admin/inject/latency?latency_ms=1000
    pub async fn inject_latency(
        Query(params): Query<FaultQuery>,
        State(ctx): State<VolumeState>,
    ) -> StatusCode {
        if let Some(latency_ms) = params.latency_ms {
            ctx.fault_injector
                .inject_latency_ms
                .store(latency_ms, Ordering::Relaxed);
        }
        StatusCode::OK
    }

    /// POST /admin/kill -> simulate a crashed node
    pub async fn kill_server(State(ctx): State<VolumeState>) -> StatusCode {
        ctx.fault_injector.is_killed.store(true, Ordering::Relaxed);
        StatusCode::OK
    }

    /// POST /admin/reset
    pub async fn reset_faults(State(ctx): State<VolumeState>) -> StatusCode {
        ctx.fault_injector.reset();
        StatusCode::OK
    }
}
