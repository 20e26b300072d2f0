//! Public IP detection.

use crate::cleaner::StaleRecordCleaner;
use crate::error::{DdnsError, Result};
use crate::providers::IpFamily;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

/// Trace endpoint reachable only over IPv4.
pub const IPV4_TRACE_URL: &str = "https://1.1.1.1/cdn-cgi/trace";

/// Same service addressed by its IPv6 literal.
pub const IPV6_TRACE_URL: &str = "https://[2606:4700:4700::1111]/cdn-cgi/trace";

const DETECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A public address learned for one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedIp {
    pub family: IpFamily,
    pub address: IpAddr,
}

/// Result of one detection pass. Families that failed have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedIps(BTreeMap<IpFamily, DetectedIp>);

impl DetectedIps {
    pub fn insert(&mut self, ip: DetectedIp) {
        self.0.insert(ip.family, ip);
    }

    pub fn get(&self, family: IpFamily) -> Option<&DetectedIp> {
        self.0.get(&family)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Detected addresses, IPv4 first.
    pub fn iter(&self) -> impl Iterator<Item = &DetectedIp> {
        self.0.values()
    }
}

impl FromIterator<DetectedIp> for DetectedIps {
    fn from_iter<I: IntoIterator<Item = DetectedIp>>(iter: I) -> Self {
        let mut ips = DetectedIps::default();
        for ip in iter {
            ips.insert(ip);
        }
        ips
    }
}

/// Which families have already produced a "not detected" warning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarningState {
    pub warned_ipv4: bool,
    pub warned_ipv6: bool,
}

impl WarningState {
    /// Mark `family` as warned; true only the first time.
    fn first_failure(&mut self, family: IpFamily) -> bool {
        let flag = match family {
            IpFamily::V4 => &mut self.warned_ipv4,
            IpFamily::V6 => &mut self.warned_ipv6,
        };
        !std::mem::replace(flag, true)
    }
}

/// IP detector backed by the Cloudflare trace endpoints.
pub struct IpDetector {
    client: reqwest::Client,
    ipv4_url: String,
    ipv6_url: String,
    warnings: WarningState,
    warnings_emitted: usize,
}

impl IpDetector {
    /// Create a new IP detector with the default trace endpoints.
    pub fn new() -> Result<Self> {
        Self::with_endpoints(IPV4_TRACE_URL.to_string(), IPV6_TRACE_URL.to_string())
    }

    /// Create a new IP detector with custom endpoints.
    pub fn with_endpoints(ipv4_url: String, ipv6_url: String) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(DETECT_TIMEOUT).build()?;

        Ok(Self {
            client,
            ipv4_url,
            ipv6_url,
            warnings: WarningState::default(),
            warnings_emitted: 0,
        })
    }

    /// Warning flags accumulated so far.
    pub fn warnings(&self) -> WarningState {
        self.warnings
    }

    /// Number of "not detected" warnings logged by this detector.
    pub fn warnings_emitted(&self) -> usize {
        self.warnings_emitted
    }

    /// Detect both families independently.
    ///
    /// A family that cannot be detected is warned about once per detector
    /// and has its records purged through `cleaner` on every failing pass.
    pub async fn detect(&mut self, cleaner: &StaleRecordCleaner<'_>) -> DetectedIps {
        let mut ips = DetectedIps::default();

        for family in [IpFamily::V4, IpFamily::V6] {
            match self.detect_family(family).await {
                Ok(address) => {
                    tracing::debug!("Detected {} {}", family, address);
                    ips.insert(DetectedIp { family, address });
                }
                Err(e) => {
                    if self.warnings.first_failure(family) {
                        self.warnings_emitted += 1;
                        tracing::warn!("{} not detected: {}", family, e);
                    } else {
                        tracing::debug!("{} still not detected: {}", family, e);
                    }
                    cleaner.delete_all_records(family.record_type()).await;
                }
            }
        }

        ips
    }

    /// Query the trace endpoint for one family.
    pub async fn detect_family(&self, family: IpFamily) -> Result<IpAddr> {
        let url = match family {
            IpFamily::V4 => &self.ipv4_url,
            IpFamily::V6 => &self.ipv6_url,
        };

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(DdnsError::IpDetection(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let text = response.text().await?;
        let ip = parse_trace(&text)?;

        if IpFamily::of(&ip) != family {
            return Err(DdnsError::IpDetection(format!(
                "{} returned {} address {}",
                url,
                IpFamily::of(&ip),
                ip
            )));
        }

        Ok(ip)
    }
}

/// Extract the `ip` field from a `key=value` trace body.
pub fn parse_trace(body: &str) -> Result<IpAddr> {
    let mut ip = None;

    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| DdnsError::IpDetection(format!("Malformed trace line: {}", line)))?;
        if key == "ip" {
            ip = Some(value.trim());
        }
    }

    let ip = ip.ok_or_else(|| DdnsError::IpDetection("Trace has no ip field".to_string()))?;

    ip.parse()
        .map_err(|_| DdnsError::IpDetection(format!("Invalid IP response: {}", ip)))
}
