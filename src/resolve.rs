//! Hook for finding a device again after its address changed (DHCP lease
//! renewal, router swap, ...).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Answer from an [`AddressResolver`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub success: bool,
    /// The device was found somewhere other than where we last knew it
    pub ip_updated: bool,
    pub connection_host: String,
    pub connection_port: u16,
}

impl Resolution {
    /// The new address, if the lookup worked and it moved
    pub fn moved_to(&self) -> Option<(&str, u16)> {
        (self.success && self.ip_updated && !self.connection_host.is_empty())
            .then_some((self.connection_host.as_str(), self.connection_port))
    }
}

/// Looks up a device's current network location by its identity.
///
/// Only consulted between reconnect attempts, never for the first connect.
#[async_trait]
pub trait AddressResolver: Send + Sync + fmt::Debug {
    async fn resolve(&self, device_id: &str) -> Result<Resolution>;
}
