use std::collections::HashSet;

use super::AppConfig;
use crate::{Error, Result};

/// Highest compression level the generator accepts.
const MAX_COMPRESSION_LEVEL: u8 = 9;

impl AppConfig {
    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        // Staging
        if self.sources.is_empty() {
            return Err(Error::config("At least one source directory is required"));
        }
        if self.plot_extension.trim().is_empty() {
            return Err(Error::config("plot_extension cannot be empty"));
        }

        // Destinations
        if self.destinations.is_empty() {
            return Err(Error::config("At least one destination is required"));
        }
        let mut seen = HashSet::new();
        for entry in &self.destinations {
            let address = entry.address();
            if address.trim().is_empty() {
                return Err(Error::config("Destination address cannot be empty"));
            }
            if !seen.insert(address) {
                return Err(Error::config(format!(
                    "Destination '{}' is listed more than once",
                    address
                )));
            }
        }

        // Transfer
        if self.transfer.program.trim().is_empty() {
            return Err(Error::config("transfer.program cannot be empty"));
        }
        if let Some(0) = self.transfer.bwlimit {
            return Err(Error::config(
                "transfer.bwlimit must be positive; omit it for no limit",
            ));
        }
        self.transfer
            .ionice
            .validate()
            .map_err(|e| Error::config(format!("transfer.ionice: {}", e)))?;

        // Generator
        let generator = &self.generator;
        if generator.batch_size == 0 {
            return Err(Error::config("generator.batch_size must be at least 1"));
        }
        if generator.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(Error::config(format!(
                "generator.compression_level {} is out of range (0-{})",
                generator.compression_level, MAX_COMPRESSION_LEVEL
            )));
        }
        if generator.enabled {
            if generator.farmer_key.trim().is_empty() {
                return Err(Error::config("generator.farmer_key is required"));
            }
            if generator.contract_key.trim().is_empty() {
                return Err(Error::config("generator.contract_key is required"));
            }
            if generator.program.trim().is_empty() {
                return Err(Error::config("generator.program cannot be empty"));
            }
        }

        if self.logging.retention_days < 1 {
            return Err(Error::config("logging.retention_days must be at least 1"));
        }

        Ok(())
    }
}
