use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::idgen::{HandleKind, IdGen};
use crate::slot::NativeSlot;

/// Shared state every wrapper is created from: the bridge settings and the
/// handle id generator. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Context {
    config: Arc<BridgeConfig>,
    ids: Arc<IdGen>,
}

impl Context {
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config: Arc::new(config),
            ids: Arc::new(IdGen::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub(crate) fn slot<T>(&self, kind: HandleKind) -> NativeSlot<T> {
        NativeSlot::new(kind, Arc::clone(&self.ids))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}
