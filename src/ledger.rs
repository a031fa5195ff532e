use std::sync::Arc;

use crate::config::Config;
use crate::{AuditValidator, HistoryReader, LedgerEngine};

/// The ledger services wired to one shared store handle.
///
/// The store's lifecycle belongs to whoever builds the `Arc`; the services
/// only borrow it through clones of the handle.
pub struct Ledger<S> {
    pub engine: LedgerEngine<S>,
    pub history: HistoryReader<S>,
    pub audit: AuditValidator<S>,
}

impl<S: crate::store::Store> Ledger<S> {
    pub fn new(store: Arc<S>, config: &Config) -> Self {
        Self {
            engine: LedgerEngine::new(store.clone(), &config.engine),
            history: HistoryReader::new(store.clone(), &config.history, &config.engine),
            audit: AuditValidator::new(store, &config.engine),
        }
    }
}
