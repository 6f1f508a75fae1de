//! Shared HTTP client construction for the provider clients

use std::time::Duration;

use reqwest::Client;

use crate::{CssaError, Result};

/// Build a client whose requests give up after `timeout_secs`
pub fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CssaError::ConfigError(format!("Failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_builds() {
        assert!(http_client(30).is_ok());
    }
}
