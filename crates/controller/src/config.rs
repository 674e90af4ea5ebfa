// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller process inputs (§6 "Process inputs"), read from the
//! environment with explicit per-field validation rather than the
//! reflection-based "field is not empty" check an older design used (§9
//! Design Note).

use std::collections::HashMap;

use dmzero_core::CoreError;

/// One accepted `user:pass` pair for the Controller REST API's HTTP Basic
/// auth, parsed from `API_CREDENTIALS`.
pub type Credentials = HashMap<String, String>;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub credentials: Credentials,
    pub cert_file: String,
    pub key_file: String,
    /// Bootstrap credential handed to the overlay provider's own admin
    /// client; the in-memory reference gateway ignores it, a production
    /// mesh provider uses it to authenticate identity/enrollment CRUD.
    pub enrollment_token: String,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        let credentials = parse_credentials(&require_env("API_CREDENTIALS")?)?;
        let cert_file = require_env("API_CERT_FILE")?;
        let key_file = require_env("API_KEY_FILE")?;
        let enrollment_token = require_env("ENROLLMENT_TOKEN")?;
        Ok(Self { credentials, cert_file, key_file, enrollment_token })
    }
}

fn require_env(name: &str) -> Result<String, CoreError> {
    let value = std::env::var(name).map_err(|_| CoreError::invalid_argument(format!("missing required env var {name}")))?;
    if value.is_empty() {
        return Err(CoreError::invalid_argument(format!("env var {name} must not be empty")));
    }
    Ok(value)
}

fn parse_credentials(raw: &str) -> Result<Credentials, CoreError> {
    let mut credentials = Credentials::new();
    for pair in raw.split(',') {
        let (user, pass) = pair
            .split_once(':')
            .ok_or_else(|| CoreError::invalid_argument(format!("malformed API_CREDENTIALS entry: {pair}")))?;
        if user.is_empty() || pass.is_empty() {
            return Err(CoreError::invalid_argument(format!("malformed API_CREDENTIALS entry: {pair}")));
        }
        credentials.insert(user.to_string(), pass.to_string());
    }
    if credentials.is_empty() {
        return Err(CoreError::invalid_argument("API_CREDENTIALS must contain at least one user:pass pair"));
    }
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_credential_pairs() {
        let credentials = parse_credentials("alice:hunter2,bob:correct-horse").unwrap();
        assert_eq!(credentials.get("alice"), Some(&"hunter2".to_string()));
        assert_eq!(credentials.get("bob"), Some(&"correct-horse".to_string()));
    }

    #[test]
    fn rejects_entry_missing_a_colon() {
        assert!(parse_credentials("alice-hunter2").is_err());
    }

    #[test]
    fn rejects_empty_user_or_password() {
        assert!(parse_credentials(":hunter2").is_err());
        assert!(parse_credentials("alice:").is_err());
    }
}
