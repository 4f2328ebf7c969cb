//! Engine configuration.

use crate::error::{EcdsaFoldError, Result};

/// Environment variable overriding the worker count.
pub const THREADS_ENV_VAR: &str = "ECDSA_FOLD_THREADS";

/// Tuning knobs of an [`Engine`](crate::engine::Engine).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Worker threads per operation; `0` means all available cores.
    pub parallelism: usize,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Reads `ECDSA_FOLD_THREADS`; unset means the default.
    pub fn from_env() -> Result<Self> {
        match std::env::var(THREADS_ENV_VAR) {
            Ok(value) => {
                let parallelism = Self::parse_parallelism(&value)?;
                Ok(Self::default().with_parallelism(parallelism))
            }
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(err) => Err(EcdsaFoldError::InvalidParameters(format!(
                "{}: {}",
                THREADS_ENV_VAR, err
            ))),
        }
    }

    fn parse_parallelism(value: &str) -> Result<usize> {
        value.trim().parse::<usize>().map_err(|_| {
            EcdsaFoldError::InvalidParameters(format!(
                "{} must be a non-negative integer, got {:?}",
                THREADS_ENV_VAR, value
            ))
        })
    }

    /// The thread count actually used.
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            self.parallelism
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallelism_resolution() {
        assert!(EngineConfig::default().effective_parallelism() >= 1);
        assert_eq!(EngineConfig::new().with_parallelism(3).effective_parallelism(), 3);
    }

    #[test]
    fn test_parse_parallelism() {
        assert_eq!(EngineConfig::parse_parallelism(" 4 ").unwrap(), 4);
        assert_eq!(EngineConfig::parse_parallelism("0").unwrap(), 0);
        assert!(EngineConfig::parse_parallelism("many").is_err());
        assert!(EngineConfig::parse_parallelism("-1").is_err());
    }
}
