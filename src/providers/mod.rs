//! DNS provider API surface.

mod cloudflare;

pub use cloudflare::CloudflareClient;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Address family of a detected IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// DNS record type that carries addresses of this family.
    pub fn record_type(self) -> RecordType {
        match self {
            IpFamily::V4 => RecordType::A,
            IpFamily::V6 => RecordType::Aaaa,
        }
    }

    /// Family of a concrete address.
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("IPv4"),
            IpFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// Address record types managed by this tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub proxied: bool,
    #[serde(rename = "type")]
    pub record_type: String,
}

/// The record state we want for one (zone, subdomain, family).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredRecord {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub name: String,
    pub content: String,
    pub proxied: bool,
    pub ttl: u32,
}

/// Operations the reconciler and cleaner need from the provider.
///
/// Every call goes to the provider; nothing is cached between calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DnsApi: Send + Sync {
    /// Base domain name of a zone.
    async fn zone_name(&self, zone_id: &str) -> Result<String>;

    /// All records of `record_type` in the zone.
    async fn list_records(&self, zone_id: &str, record_type: RecordType)
        -> Result<Vec<RemoteRecord>>;

    /// Create a record.
    async fn create_record(&self, zone_id: &str, record: &DesiredRecord) -> Result<()>;

    /// Overwrite an existing record.
    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &DesiredRecord,
    ) -> Result<()>;

    /// Delete a record by identifier.
    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()>;
}
