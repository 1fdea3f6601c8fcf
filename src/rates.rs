//! Exchange rates
//!
//! Source of the domestic-currency price of one unit of a foreign currency.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::DomainError;

#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    /// Domestic units per unit of `currency`
    async fn rate(&self, currency: &str) -> Result<Decimal, DomainError>;
}

/// Fixed rate table loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticRates {
    rates: HashMap<String, Decimal>,
}

impl StaticRates {
    pub fn new(rates: HashMap<String, Decimal>) -> Self {
        let rates = rates
            .into_iter()
            .map(|(code, rate)| (code.to_ascii_uppercase(), rate))
            .collect();
        Self { rates }
    }
}

#[async_trait]
impl ExchangeRateSource for StaticRates {
    async fn rate(&self, currency: &str) -> Result<Decimal, DomainError> {
        let code = currency.trim().to_ascii_uppercase();
        self.rates
            .get(&code)
            .copied()
            .ok_or(DomainError::UnsupportedCurrency(code))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid rate table entry: {0}")]
pub struct RateTableError(String);

/// Parse `USD=80,EUR=88.5` into a rate map. Rates must be positive.
pub fn parse_rate_table(raw: &str) -> Result<HashMap<String, Decimal>, RateTableError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (code, rate) = pair
                .split_once('=')
                .ok_or_else(|| RateTableError(pair.to_string()))?;
            let code = code.trim().to_ascii_uppercase();
            let rate: Decimal = rate
                .trim()
                .parse()
                .map_err(|_| RateTableError(pair.to_string()))?;
            if code.len() != 3 || rate <= Decimal::ZERO {
                return Err(RateTableError(pair.to_string()));
            }
            Ok((code, rate))
        })
        .collect()
}
