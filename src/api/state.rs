//! Shared application state

use std::sync::Arc;

use crate::auth::TokenService;
use crate::authorization::{ChallengeDelivery, LogDelivery, StepUpGate};
use crate::config::Config;
use crate::handlers::{BillHandler, LoanHandler, TransferHandler};
use crate::mutator::AccountMutator;
use crate::rates::{ExchangeRateSource, StaticRates};
use crate::store::LedgerStore;

/// Everything a request handler needs, cheap to clone per request
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub gate: StepUpGate,
    pub transfers: TransferHandler,
    pub bills: BillHandler,
    pub loans: LoanHandler,
    pub tokens: TokenService,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the default collaborators: log-only challenge delivery and the
    /// configured static rate table
    pub fn new(store: Arc<dyn LedgerStore>, config: Config) -> Self {
        let rates = Arc::new(StaticRates::new(config.exchange_rates.clone()));
        Self::with_collaborators(store, Arc::new(LogDelivery), rates, config)
    }

    pub fn with_collaborators(
        store: Arc<dyn LedgerStore>,
        delivery: Arc<dyn ChallengeDelivery>,
        rates: Arc<dyn ExchangeRateSource>,
        config: Config,
    ) -> Self {
        let mutator = AccountMutator::new(store.clone());
        let gate = StepUpGate::new(store.clone(), delivery, &config);

        Self {
            transfers: TransferHandler::new(store.clone(), mutator.clone(), gate.clone(), rates),
            bills: BillHandler::new(store.clone(), mutator.clone()),
            loans: LoanHandler::new(store.clone(), mutator, &config),
            tokens: TokenService::new(&config.jwt_secret),
            config: Arc::new(config),
            gate,
            store,
        }
    }
}
