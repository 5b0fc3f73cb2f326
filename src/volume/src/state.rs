use std::sync::Arc;

use crate::fault_injection::FaultInjector;
use crate::store::ChunkStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum DurabilityLevel {
    Immediate, // fsync file and directory on every store (default, safest)
    Os,        // no explicit fsync; rely on OS (fastest)
}

#[derive(Clone)]
pub struct VolumeState {
    pub store: ChunkStore,
    pub fault_injector: Arc<FaultInjector>,
}

impl VolumeState {
    pub fn new(store: ChunkStore) -> Self {
        Self {
            store,
            fault_injector: Arc::new(FaultInjector::new()),
        }
    }
}
