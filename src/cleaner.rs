//! Removal of address records for a family that is no longer reachable.

use crate::config::ZoneConfig;
use crate::error::Result;
use crate::providers::{DnsApi, RecordType};

/// Outcome of one cleanup sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Records deleted.
    pub deleted: usize,
    /// Zones or records that could not be processed.
    pub failures: usize,
}

/// Deletes every record of a type across all configured zones.
pub struct StaleRecordCleaner<'a> {
    api: &'a dyn DnsApi,
    zones: &'a [ZoneConfig],
}

impl<'a> StaleRecordCleaner<'a> {
    pub fn new(api: &'a dyn DnsApi, zones: &'a [ZoneConfig]) -> Self {
        Self { api, zones }
    }

    /// Best effort: failures are logged and never returned.
    pub async fn delete_all_records(&self, record_type: RecordType) -> CleanupReport {
        let mut report = CleanupReport::default();

        for zone in self.zones {
            if let Err(e) = self.clean_zone(zone, record_type, &mut report).await {
                report.failures += 1;
                tracing::warn!(
                    "Error deleting {} record(s) in zone {}: {}",
                    record_type,
                    zone.zone_id,
                    e
                );
            }
        }

        report
    }

    async fn clean_zone(
        &self,
        zone: &ZoneConfig,
        record_type: RecordType,
        report: &mut CleanupReport,
    ) -> Result<()> {
        let records = self.api.list_records(&zone.zone_id, record_type).await?;

        for record in records {
            match self.api.delete_record(&zone.zone_id, &record.id).await {
                Ok(()) => {
                    report.deleted += 1;
                    tracing::info!(
                        "Deleted stale {} record {} ({})",
                        record_type,
                        record.id,
                        record.name
                    );
                }
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!("Error deleting stale record {}: {}", record.id, e);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DdnsError;
    use crate::providers::{MockDnsApi, RemoteRecord};

    fn zone(id: &str) -> ZoneConfig {
        ZoneConfig {
            zone_id: id.to_string(),
            proxied: false,
            subdomains: vec![String::new()],
            ttl: 300,
        }
    }

    fn aaaa(id: &str) -> RemoteRecord {
        RemoteRecord {
            id: id.to_string(),
            name: "example.com".to_string(),
            content: "2001:db8::1".to_string(),
            proxied: false,
            record_type: "AAAA".to_string(),
        }
    }

    #[tokio::test]
    async fn test_deletes_every_record() {
        let mut api = MockDnsApi::new();
        api.expect_list_records()
            .times(1)
            .returning(|_, _| Ok(vec![aaaa("r1"), aaaa("r2"), aaaa("r3")]));
        api.expect_delete_record()
            .withf(|zone, _| zone == "zone-1")
            .times(3)
            .returning(|_, _| Ok(()));

        let zones = vec![zone("zone-1")];
        let report = StaleRecordCleaner::new(&api, &zones)
            .delete_all_records(RecordType::Aaaa)
            .await;

        assert_eq!(report, CleanupReport { deleted: 3, failures: 0 });
    }

    #[tokio::test]
    async fn test_failed_deletes_do_not_stop_the_sweep() {
        let mut api = MockDnsApi::new();
        api.expect_list_records()
            .times(1)
            .returning(|_, _| Ok(vec![aaaa("r1"), aaaa("r2"), aaaa("r3")]));
        api.expect_delete_record()
            .times(3)
            .returning(|_, id| {
                if id == "r2" {
                    Err(DdnsError::Network("connection reset".to_string()))
                } else {
                    Ok(())
                }
            });

        let zones = vec![zone("zone-1")];
        let report = StaleRecordCleaner::new(&api, &zones)
            .delete_all_records(RecordType::Aaaa)
            .await;

        assert_eq!(report, CleanupReport { deleted: 2, failures: 1 });
    }

    #[tokio::test]
    async fn test_zone_failure_does_not_abort_other_zones() {
        let mut api = MockDnsApi::new();
        api.expect_list_records().times(2).returning(|zone, _| {
            if zone == "broken" {
                Err(DdnsError::Api {
                    endpoint: "zones/broken/dns_records".to_string(),
                    message: "Authentication error".to_string(),
                })
            } else {
                Ok(vec![aaaa("r1")])
            }
        });
        api.expect_delete_record()
            .withf(|zone, id| zone == "zone-2" && id == "r1")
            .times(1)
            .returning(|_, _| Ok(()));

        let zones = vec![zone("broken"), zone("zone-2")];
        let report = StaleRecordCleaner::new(&api, &zones)
            .delete_all_records(RecordType::Aaaa)
            .await;

        assert_eq!(report, CleanupReport { deleted: 1, failures: 1 });
    }

    #[tokio::test]
    async fn test_nothing_to_delete_is_success() {
        let mut api = MockDnsApi::new();
        api.expect_list_records()
            .times(1)
            .returning(|_, _| Ok(Vec::new()));
        api.expect_delete_record().never();

        let zones = vec![zone("zone-1")];
        let report = StaleRecordCleaner::new(&api, &zones)
            .delete_all_records(RecordType::A)
            .await;

        assert_eq!(report, CleanupReport::default());
    }
}
