//! Genesis configuration.

use crate::error::{ConfigError, ConfigResult};
use lattix_types::{Account, Amount};
use serde::{Deserialize, Serialize};

/// The account owning the initial supply and its amount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenesisSection {
    /// Genesis account public key
    pub account: Account,
    /// Initial supply in raw units
    pub amount: Amount,
}

impl Default for GenesisSection {
    fn default() -> Self {
        Self {
            account: Account::from([0x11u8; 32]),
            amount: Amount::raw(1u128 << 122),
        }
    }
}

impl GenesisSection {
    /// Validates the section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.account.is_zero() {
            return Err(ConfigError::invalid(
                "genesis.account",
                "must not be the burn account",
            ));
        }
        if self.amount.is_zero() {
            return Err(ConfigError::invalid(
                "genesis.amount",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        GenesisSection::default().validate().unwrap();
    }

    #[test]
    fn test_zero_account_rejected() {
        let genesis = GenesisSection {
            account: Account::ZERO,
            ..GenesisSection::default()
        };
        assert!(genesis.validate().is_err());
    }
}
