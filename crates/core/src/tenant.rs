//! Tenant identity and API key handling
//!
//! Tenants are created administratively and verified on every request.
//! The orchestrator never mutates them.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An isolated customer account. All data and rate limits are scoped
/// per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: String,
    pub name: String,
    pub api_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Tenant {
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        let api_key = generate_api_key(&tenant_id);
        Self {
            tenant_id,
            name: name.into(),
            api_key,
            is_active: true,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

/// Generate a tenant API key: `vaas_<tenant8>_<random16>_<random24>`.
///
/// The tenant prefix makes keys attributable in logs without a lookup;
/// the random tail carries the entropy.
pub fn generate_api_key(tenant_id: &str) -> String {
    let prefix: String = tenant_id.chars().take(8).collect();
    let mid: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    let tail: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("vaas_{}_{}_{}", prefix, mid, tail)
}

/// Mask an API key for logs and responses: first 8 chars, ellipsis,
/// last 4 chars. Keys too short to mask safely come back fully masked.
pub fn mask_api_key(key: &str) -> String {
    if key.len() <= 12 {
        return "****".to_string();
    }
    format!("{}...{}", &key[..8], &key[key.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_format() {
        let key = generate_api_key("tenant-abc-123");
        assert!(key.starts_with("vaas_tenant-a_"));
        let parts: Vec<&str> = key.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[2].len(), 16);
        assert_eq!(parts[3].len(), 24);
    }

    #[test]
    fn test_api_keys_unique() {
        let a = generate_api_key("tenant-1");
        let b = generate_api_key("tenant-1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_mask_api_key() {
        let masked = mask_api_key("vaas_tenant-a_abcdefghij123456_xyz9");
        assert!(masked.starts_with("vaas_ten"));
        assert!(masked.ends_with("xyz9"));
        assert!(masked.contains("..."));
        // Short keys never leak
        assert_eq!(mask_api_key("short"), "****");
    }

    #[test]
    fn test_new_tenant_is_active() {
        let tenant = Tenant::new("t1", "Acme Realty");
        assert!(tenant.is_active);
        assert!(tenant.api_key.starts_with("vaas_t1_"));
    }
}
