//! Detect → compare → reconcile cycle, single-shot or on an interval.

use crate::cleaner::StaleRecordCleaner;
use crate::config::{Config, ZoneConfig};
use crate::detector::{DetectedIps, IpDetector};
use crate::providers::DnsApi;
use crate::reconciler::{ReconcileReport, Reconciler};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Time between cycle starts in repeating mode.
///
/// Older usage text advertised a 15 minute cadence; the loop has always
/// waited 60 seconds and that is what is kept.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest accepted interval; `tokio::time::interval` rejects zero.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Same addresses as the last successful cycle; no provider calls made.
    Unchanged,
    /// One report per detected family.
    Reconciled(Vec<ReconcileReport>),
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            CycleOutcome::Unchanged => true,
            CycleOutcome::Reconciled(reports) => reports.iter().all(ReconcileReport::is_success),
        }
    }
}

/// Owns the detector and drives reconciliation cycles.
pub struct Scheduler {
    api: Box<dyn DnsApi>,
    zones: Vec<ZoneConfig>,
    detector: IpDetector,
    interval: Duration,
    previous: Option<DetectedIps>,
}

impl Scheduler {
    pub fn new(api: Box<dyn DnsApi>, config: &Config, detector: IpDetector) -> Self {
        Self {
            api,
            zones: config.cloudflare.clone(),
            detector,
            interval: DEFAULT_INTERVAL,
            previous: None,
        }
    }

    /// Override the wait between cycle starts, clamped to [`MIN_INTERVAL`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            tracing::warn!(
                "Interval {:?} is too short, using {:?}",
                interval,
                MIN_INTERVAL
            );
        }
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run exactly one cycle.
    pub async fn run_once(&mut self) -> CycleOutcome {
        let outcome = self.run_cycle().await;
        log_outcome(&outcome);
        outcome
    }

    /// Run a cycle now and then once per interval until `shutdown` fires.
    ///
    /// Only the wait between cycles is interrupted; a cycle in progress
    /// always finishes first.
    pub async fn run_repeating(&mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, stopping scheduler");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let outcome = self.run_cycle().await;
            log_outcome(&outcome);
        }
    }

    /// Detect addresses and reconcile them if they changed.
    ///
    /// The detected set is remembered only when every zone succeeded, so a
    /// failed cycle is attempted again on the next tick.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let cleaner = StaleRecordCleaner::new(self.api.as_ref(), &self.zones);
        let ips = self.detector.detect(&cleaner).await;

        if self.previous.as_ref() == Some(&ips) {
            return CycleOutcome::Unchanged;
        }

        let reconciler = Reconciler::new(self.api.as_ref());
        let mut reports = Vec::new();
        for ip in ips.iter() {
            tracing::info!("Reconciling {} address {}", ip.family, ip.address);
            reports.push(reconciler.reconcile(ip, &self.zones).await);
        }

        let outcome = CycleOutcome::Reconciled(reports);
        self.previous = outcome.is_success().then_some(ips);
        outcome
    }
}

fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Unchanged => tracing::debug!("Public addresses unchanged"),
        CycleOutcome::Reconciled(reports) => {
            let writes: usize = reports.iter().map(ReconcileReport::writes).sum();
            let failures: usize = reports.iter().map(|r| r.failures.len()).sum();
            if failures > 0 {
                tracing::warn!(
                    "Cycle finished with {} change(s) and {} failed zone pass(es)",
                    writes,
                    failures
                );
            } else {
                tracing::info!("Cycle finished with {} change(s)", writes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Authentication, Config};
    use crate::error::DdnsError;
    use crate::providers::{MockDnsApi, RecordType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> Config {
        Config {
            authentication: Authentication {
                api_token: "token".to_string(),
                api_key: None,
            },
            cloudflare: vec![ZoneConfig {
                zone_id: "zone-1".to_string(),
                proxied: false,
                subdomains: vec![String::new()],
                ttl: 300,
            }],
        }
    }

    async fn trace_server(v6: bool) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/cdn-cgi/trace"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fl=1\nip=203.0.113.5\n"))
            .mount(&server)
            .await;
        if v6 {
            Mock::given(method("GET"))
                .and(path("/v6/cdn-cgi/trace"))
                .respond_with(ResponseTemplate::new(200).set_body_string("fl=1\nip=2001:db8::5\n"))
                .mount(&server)
                .await;
        }
        server
    }

    fn detector_for(server: &MockServer) -> IpDetector {
        IpDetector::with_endpoints(
            format!("{}/v4/cdn-cgi/trace", server.uri()),
            format!("{}/v6/cdn-cgi/trace", server.uri()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unchanged_addresses_make_no_provider_calls() {
        let server = trace_server(true).await;

        let mut api = MockDnsApi::new();
        api.expect_zone_name()
            .times(2)
            .returning(|_| Ok("example.com".to_string()));
        api.expect_list_records()
            .times(2)
            .returning(|_, _| Ok(Vec::new()));
        api.expect_create_record()
            .times(2)
            .returning(|_, _| Ok(()));

        let mut scheduler = Scheduler::new(Box::new(api), &config(), detector_for(&server));

        let first = scheduler.run_cycle().await;
        match &first {
            CycleOutcome::Reconciled(reports) => assert_eq!(reports.len(), 2),
            other => panic!("expected reconciliation, got {:?}", other),
        }
        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_failed_cycle_is_retried() {
        let server = trace_server(false).await;

        let mut api = MockDnsApi::new();
        api.expect_zone_name()
            .returning(|_| Ok("example.com".to_string()));
        api.expect_list_records()
            .returning(|_, _| Ok(Vec::new()));

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        api.expect_create_record().times(2).returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DdnsError::Network("connection refused".to_string()))
            } else {
                Ok(())
            }
        });

        let mut scheduler = Scheduler::new(Box::new(api), &config(), detector_for(&server));

        assert!(!scheduler.run_once().await.is_success());
        let second = scheduler.run_once().await;
        assert!(second.is_success());
        assert!(matches!(second, CycleOutcome::Reconciled(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_ipv6_cleans_aaaa_each_cycle() {
        let server = trace_server(false).await;

        let mut api = MockDnsApi::new();
        api.expect_zone_name()
            .times(1)
            .returning(|_| Ok("example.com".to_string()));
        api.expect_list_records()
            .withf(|_, ty| *ty == RecordType::Aaaa)
            .times(2)
            .returning(|_, _| Ok(Vec::new()));
        api.expect_list_records()
            .withf(|_, ty| *ty == RecordType::A)
            .times(1)
            .returning(|_, _| Ok(Vec::new()));
        api.expect_create_record()
            .times(1)
            .returning(|_, _| Ok(()));

        let mut scheduler = Scheduler::new(Box::new(api), &config(), detector_for(&server));
        scheduler.run_cycle().await;
        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Unchanged);
        assert!(scheduler.detector.warnings().warned_ipv6);
        assert_eq!(scheduler.detector.warnings_emitted(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_the_wait() {
        let server = trace_server(true).await;

        let mut api = MockDnsApi::new();
        api.expect_zone_name()
            .returning(|_| Ok("example.com".to_string()));
        api.expect_list_records()
            .returning(|_, _| Ok(Vec::new()));
        api.expect_create_record()
            .returning(|_, _| Ok(()));

        let mut scheduler = Scheduler::new(Box::new(api), &config(), detector_for(&server))
            .with_interval(Duration::from_secs(3600));

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { scheduler.run_repeating(token).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        let cancelled_at = Instant::now();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let server = MockServer::start().await;
        let scheduler = Scheduler::new(Box::new(MockDnsApi::new()), &config(), detector_for(&server))
            .with_interval(Duration::ZERO);
        assert_eq!(scheduler.interval(), MIN_INTERVAL);

        let scheduler = Scheduler::new(Box::new(MockDnsApi::new()), &config(), detector_for(&server))
            .with_interval(Duration::from_secs(90));
        assert_eq!(scheduler.interval(), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let api = MockDnsApi::new();
        let server = MockServer::start().await;
        let mut scheduler = Scheduler::new(Box::new(api), &config(), detector_for(&server));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        scheduler.run_repeating(shutdown).await;
        assert!(scheduler.previous.is_none());
    }
}
