// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parses the peer-address string an overlay connection exposes for an
//! inbound call, in the form:
//!
//! `zitiConn connId=<n> svcId=<s> sourceIdentity=<id>`
//!
//! Every inbound server-side RPC authenticates its caller by parsing this
//! string out of the connection's local/peer address (§4.1).

use regex::Regex;
use std::sync::LazyLock;

use crate::error::CoreError;

#[allow(clippy::expect_used)]
static PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"connId=(\d*)\s+svcId=(\S*)\s+sourceIdentity=([\w-]+)").expect("overlay address pattern is a fixed valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayAddress {
    pub conn_id: String,
    pub svc_id: String,
    pub source_identity: String,
}

/// Parse an overlay connection address string into its three components.
pub fn parse_overlay_address(address: &str) -> Result<OverlayAddress, CoreError> {
    let captures = PATTERN
        .captures(address)
        .ok_or_else(|| CoreError::invalid_argument("could not find enough matches"))?;

    Ok(OverlayAddress {
        conn_id: captures[1].to_string(),
        svc_id: captures[2].to_string(),
        source_identity: captures[3].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        basic = {"zitiConn connId=42 svcId=S sourceIdentity=abc", "42", "S", "abc"},
        uuid_identity = {
            "zitiConn connId=2147483649 svcId=12345 sourceIdentity=6fac665e-58fc-44ec-9918-695ef19a4c21",
            "2147483649",
            "12345",
            "6fac665e-58fc-44ec-9918-695ef19a4c21",
        },
    )]
    fn parses_valid_addresses(input: &str, conn_id: &str, svc_id: &str, identity: &str) {
        let parsed = parse_overlay_address(input).unwrap();
        assert_eq!(parsed.conn_id, conn_id);
        assert_eq!(parsed.svc_id, svc_id);
        assert_eq!(parsed.source_identity, identity);
    }

    #[test]
    fn rejects_malformed_address() {
        let err = parse_overlay_address("not an overlay address").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidArgument);
    }
}
