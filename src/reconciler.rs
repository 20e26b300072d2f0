//! Reconciliation of desired address records against the provider.
//!
//! For each zone the base domain is looked up, then every subdomain is
//! handled in order: list the zone's records of the target type, pick the
//! record to keep, create or update it, and delete same-name duplicates.
//! Records are listed again for every subdomain so deletions made for one
//! name are visible when the next one is scanned.

use crate::config::ZoneConfig;
use crate::detector::DetectedIp;
use crate::error::Result;
use crate::providers::{DesiredRecord, DnsApi, RemoteRecord};

/// What happened to the canonical record of one name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    Created,
    Updated,
    Unchanged,
}

/// Per-name outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub name: String,
    pub action: RecordAction,
    pub duplicates_deleted: usize,
}

/// A zone whose pass stopped on a provider error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneFailure {
    pub zone_id: String,
    pub error: String,
}

/// Result of reconciling one detected address across all zones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub records: Vec<RecordOutcome>,
    pub failures: Vec<ZoneFailure>,
}

impl ReconcileReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of create, update and delete calls issued.
    pub fn writes(&self) -> usize {
        self.records
            .iter()
            .map(|r| {
                let primary = usize::from(r.action != RecordAction::Unchanged);
                primary + r.duplicates_deleted
            })
            .sum()
    }
}

/// Which existing record survives, and what else has to go.
#[derive(Debug, Default, PartialEq, Eq)]
struct RecordSelection {
    active: Option<String>,
    modified: bool,
    duplicates: Vec<String>,
}

/// Scan `records` for entries named like `desired`.
///
/// The first match becomes active and decides `modified`. A later match
/// whose content already equals the desired address takes over as active;
/// everything displaced is a duplicate.
fn select_records(records: &[RemoteRecord], desired: &DesiredRecord) -> RecordSelection {
    let mut selection = RecordSelection::default();

    for record in records.iter().filter(|r| r.name == desired.name) {
        match selection.active.take() {
            None => {
                selection.modified =
                    record.content != desired.content || record.proxied != desired.proxied;
                selection.active = Some(record.id.clone());
            }
            Some(current) if record.content == desired.content => {
                selection.duplicates.push(current);
                selection.active = Some(record.id.clone());
            }
            Some(current) => {
                selection.duplicates.push(record.id.clone());
                selection.active = Some(current);
            }
        }
    }

    selection
}

/// Record name for a label under `base_domain`; "" is the apex.
pub fn fully_qualified_name(subdomain: &str, base_domain: &str) -> String {
    if subdomain.is_empty() {
        base_domain.to_string()
    } else {
        format!("{}.{}", subdomain, base_domain)
    }
}

/// Applies desired address records through a [`DnsApi`].
pub struct Reconciler<'a> {
    api: &'a dyn DnsApi,
}

impl<'a> Reconciler<'a> {
    pub fn new(api: &'a dyn DnsApi) -> Self {
        Self { api }
    }

    /// Reconcile `ip` in every zone.
    ///
    /// A provider error stops the remaining subdomains of that zone and is
    /// recorded in the report; later zones are still processed.
    pub async fn reconcile(&self, ip: &DetectedIp, zones: &[ZoneConfig]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for zone in zones {
            if let Err(e) = self.reconcile_zone(ip, zone, &mut report).await {
                tracing::error!(
                    "Failed to update {} records in zone {}: {}",
                    ip.family.record_type(),
                    zone.zone_id,
                    e
                );
                report.failures.push(ZoneFailure {
                    zone_id: zone.zone_id.clone(),
                    error: e.to_string(),
                });
            }
        }

        report
    }

    async fn reconcile_zone(
        &self,
        ip: &DetectedIp,
        zone: &ZoneConfig,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let base_domain = self.api.zone_name(&zone.zone_id).await?;

        for subdomain in zone.normalized_subdomains() {
            let desired = DesiredRecord {
                record_type: ip.family.record_type(),
                name: fully_qualified_name(&subdomain, &base_domain),
                content: ip.address.to_string(),
                proxied: zone.proxied,
                ttl: zone.ttl,
            };
            let outcome = self.reconcile_record(&zone.zone_id, &desired).await?;
            report.records.push(outcome);
        }

        Ok(())
    }

    async fn reconcile_record(
        &self,
        zone_id: &str,
        desired: &DesiredRecord,
    ) -> Result<RecordOutcome> {
        let records = self.api.list_records(zone_id, desired.record_type).await?;
        let selection = select_records(&records, desired);

        let action = match &selection.active {
            Some(id) if selection.modified => {
                tracing::info!(
                    "Updating {} record {} -> {} (proxied: {})",
                    desired.record_type,
                    desired.name,
                    desired.content,
                    desired.proxied
                );
                self.api.update_record(zone_id, id, desired).await?;
                RecordAction::Updated
            }
            Some(_) => {
                tracing::debug!("{} record {} is current", desired.record_type, desired.name);
                RecordAction::Unchanged
            }
            None => {
                tracing::info!(
                    "Adding new {} record {} -> {} (proxied: {})",
                    desired.record_type,
                    desired.name,
                    desired.content,
                    desired.proxied
                );
                self.api.create_record(zone_id, desired).await?;
                RecordAction::Created
            }
        };

        for id in &selection.duplicates {
            tracing::info!("Deleting stale record {} ({})", id, desired.name);
            self.api.delete_record(zone_id, id).await?;
        }

        Ok(RecordOutcome {
            name: desired.name.clone(),
            action,
            duplicates_deleted: selection.duplicates.len(),
        })
    }
}
