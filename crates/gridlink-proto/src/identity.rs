//! Tunnel identity derivation
//!
//! Every tunnel is keyed by a deterministic hash of its remote target
//! triple. The hash is stable across process restarts, which is what makes
//! `startProxy` idempotent and lets the CLI address a running tunnel
//! without asking the daemon for its id first.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The remote endpoint a tunnel points at.
///
/// The local port and auth token are deliberately not part of the target:
/// two `startProxy` calls for the same edge/host/port must collapse onto
/// one session regardless of which local port or credential they carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TunnelTarget {
    pub edge_id: String,
    pub host: String,
    pub port: u16,
}

impl TunnelTarget {
    pub fn new(edge_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            edge_id: edge_id.into(),
            host: host.into(),
            port,
        }
    }

    /// Derive the identity hash for this target.
    pub fn id(&self) -> TunnelId {
        TunnelId::for_target(self)
    }
}

/// Deterministic tunnel identity: hex-encoded truncated SHA-256 of the
/// `edge-host-port` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TunnelId(String);

impl TunnelId {
    /// Derive the identity for a remote target.
    pub fn for_target(target: &TunnelTarget) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}-{}-{}", target.edge_id, target.host, target.port).as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        // 16 bytes of digest is plenty for dedup keys
        Self(digest[..32].to_string())
    }

    /// Wrap an identity received over the wire.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_deterministic() {
        let a = TunnelTarget::new("edge-1", "10.0.0.5", 80).id();
        let b = TunnelTarget::new("edge-1", "10.0.0.5", 80).id();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_depends_on_each_field() {
        let base = TunnelTarget::new("edge-1", "10.0.0.5", 80).id();
        assert_ne!(base, TunnelTarget::new("edge-2", "10.0.0.5", 80).id());
        assert_ne!(base, TunnelTarget::new("edge-1", "10.0.0.6", 80).id());
        assert_ne!(base, TunnelTarget::new("edge-1", "10.0.0.5", 81).id());
    }

    #[test]
    fn test_identity_roundtrips_through_json() {
        let id = TunnelTarget::new("c1", "svc.local", 443).id();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_str()));
        let parsed: TunnelId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
