//! Local identity and per-connection peer metadata.

use std::net::IpAddr;

use crate::config::Config;
use crate::diameter::{APP_BASE_ACCOUNTING, APP_CREDIT_CONTROL};

/// Local Diameter identity, built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub origin_host: String,
    pub origin_realm: String,
    pub vendor_id: u32,
    pub product_name: String,
    /// Freshness token, the process start time in Unix seconds.
    pub origin_state_id: u32,
    pub firmware_revision: u32,
    pub host_ip_addresses: Vec<IpAddr>,
    pub auth_application_ids: Vec<u32>,
    pub acct_application_ids: Vec<u32>,
    /// Subject marker placed in single-exchange requests.
    pub user_name: String,
}

impl Identity {
    pub fn from_config(config: &Config) -> Self {
        Self {
            origin_host: config.host.clone(),
            origin_realm: config.realm.clone(),
            vendor_id: config.vendor_id,
            product_name: config.product_name.clone(),
            origin_state_id: chrono::Utc::now().timestamp() as u32,
            firmware_revision: 1,
            host_ip_addresses: vec![config.host_ip],
            auth_application_ids: vec![APP_CREDIT_CONTROL],
            acct_application_ids: vec![APP_BASE_ACCOUNTING],
            user_name: config.user_name.clone(),
        }
    }
}

/// Remote identity learned from the capabilities exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMetadata {
    pub origin_host: String,
    pub origin_realm: String,
}

#[cfg(test)]
pub(crate) fn test_identity() -> Identity {
    Identity {
        origin_host: "client".to_string(),
        origin_realm: "diam-bench".to_string(),
        vendor_id: 13,
        product_name: "diam-bench".to_string(),
        origin_state_id: 1_700_000_000,
        firmware_revision: 1,
        host_ip_addresses: vec![IpAddr::from([127, 0, 0, 1])],
        auth_application_ids: vec![APP_CREDIT_CONTROL],
        acct_application_ids: vec![APP_BASE_ACCOUNTING],
        user_name: "foobar".to_string(),
    }
}
