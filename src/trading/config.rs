//! Replication configuration.

use anyhow::{bail, Result};
use clap::ValueEnum;
use rust_decimal::Decimal;

/// How copy orders are executed on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionStyle {
    /// Always MARKET, price dropped
    Market,
    /// Reuse the source order type; price copied for limit-style types
    Mirror,
}

/// Configuration for turning source orders into copies.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Multiplier applied to the source quantity (> 0)
    pub ratio: Decimal,

    pub execution: ExecutionStyle,

    /// Truncate copied quantities to this many decimals
    pub quantity_decimals: Option<u32>,

    /// Source orders whose client id starts with one of these are never copied
    pub ignored_prefixes: Vec<String>,

    /// Cycles a copied-order ledger entry survives without being observed
    pub ledger_retention_cycles: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            ratio: Decimal::ONE,
            execution: ExecutionStyle::Market,
            quantity_decimals: None,
            ignored_prefixes: vec!["android_".to_string()],
            ledger_retention_cycles: 2,
        }
    }
}

impl ReplicationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ratio <= Decimal::ZERO {
            bail!("Ratio must be positive, got {}", self.ratio);
        }
        if self.ledger_retention_cycles == 0 {
            bail!("Ledger retention must cover at least one cycle");
        }
        if self.ignored_prefixes.iter().any(|p| p.is_empty()) {
            bail!("Ignored client id prefixes must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_is_valid() {
        assert!(ReplicationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_ratio() {
        for ratio in [dec!(0), dec!(-1.5)] {
            let config = ReplicationConfig {
                ratio,
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_rejects_empty_prefix() {
        let config = ReplicationConfig {
            ignored_prefixes: vec![String::new()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
