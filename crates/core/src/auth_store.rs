// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Username → SHA-256(password) credential store, used both by the
//! controller (operator-defined REST credentials) and by each agent (one
//! entry per running module, populated before the module's container
//! starts and removed when the module stops).

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[derive(Default)]
pub struct AuthStore {
    credentials: RwLock<HashMap<String, String>>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, username: impl Into<String>, password: &str) {
        self.credentials.write().insert(username.into(), hash_password(password));
    }

    pub fn remove(&self, username: &str) {
        self.credentials.write().remove(username);
    }

    /// `false` both when the username is absent and when the password
    /// doesn't match — callers should not distinguish the two.
    pub fn validate(&self, username: &str, password: &str) -> bool {
        match self.credentials.read().get(username) {
            Some(hash) => *hash == hash_password(password),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_true_iff_add_without_intervening_remove() {
        let store = AuthStore::new();
        assert!(!store.validate("bob", "secret"));

        store.add("bob", "secret");
        assert!(store.validate("bob", "secret"));
        assert!(!store.validate("bob", "wrong"));

        store.remove("bob");
        assert!(!store.validate("bob", "secret"));
    }

    #[test]
    fn re_add_after_remove_restores_validity() {
        let store = AuthStore::new();
        store.add("bob", "secret");
        store.remove("bob");
        store.add("bob", "secret2");
        assert!(!store.validate("bob", "secret"));
        assert!(store.validate("bob", "secret2"));
    }
}
