//! Open/closed lifecycle gate.
//!
//! `open` without an identity opens the frontend unconditionally. With
//! an identity, the frontend instead waits for `is_open` to observe the
//! globally-committed service record reach `Open` with a matching cert.
//! Once open, the frontend stays open for the life of the process.

use palisade_core::kv::KvTransaction;
use palisade_core::records::{ServiceRecord, ServiceStatus};

use super::RpcFrontend;

#[derive(Debug, Default)]
pub(super) struct OpenState {
    pub is_open: bool,
    pub service_identity: Option<Vec<u8>>,
}

impl RpcFrontend {
    pub fn open(&self, identity: Option<Vec<u8>>) {
        let mut state = self.open_state.lock();
        match identity {
            Some(identity) => {
                state.service_identity = Some(identity);
            }
            None => {
                if !state.is_open {
                    state.is_open = true;
                    self.registry.init_handlers(&self.store);
                }
            }
        }
    }

    /// Holding the lock across the transition guarantees handler
    /// initialisation runs exactly once across concurrent callers.
    pub fn is_open(&self, tx: &mut dyn KvTransaction) -> bool {
        let mut state = self.open_state.lock();
        if !state.is_open {
            let service = ServiceRecord::read_globally_committed(tx)
                .ok()
                .flatten();
            if let (Some(service), Some(identity)) = (service, state.service_identity.as_ref()) {
                if service.status == ServiceStatus::Open && &service.cert == identity {
                    tracing::info!("service state is OPEN, now accepting user transactions");
                    state.is_open = true;
                    self.registry.init_handlers(&self.store);
                }
            }
        }
        state.is_open
    }
}
