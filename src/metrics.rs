use crate::engine::{BackupReport, RestoreReport};

use prometheus::{
    exponential_buckets, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};

use std::fmt::{self, Debug};

const KIND: &[&str] = &["kind"];
const KIND_AND_REASON: &[&str] = &["kind", "reason"];

pub struct Metrics {
    registry: Registry,
    api_server_request_times: Histogram,
    backups_started: IntCounter,
    backup_errors: IntCounter,
    restores_started: IntCounter,
    restore_errors: IntCounter,
    exported_objects: IntCounterVec,
    restored_objects: IntCounterVec,
    skipped_objects: IntCounterVec,
}

impl Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Metrics")
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help)).unwrap();
    registry.register(Box::new(counter.clone())).unwrap();
    counter
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels).unwrap();
    registry.register(Box::new(counter.clone())).unwrap();
    counter
}

impl Metrics {
    pub fn new() -> Metrics {
        let registry = Registry::new();

        let request_time_opts = HistogramOpts::new(
            "api_server_request_time",
            "Total time from sending the request to receiving the response headers",
        )
        .subsystem("client")
        .buckets(exponential_buckets(0.005, 2.0, 12).unwrap());
        let api_server_request_times = Histogram::with_opts(request_time_opts).unwrap();
        registry
            .register(Box::new(api_server_request_times.clone()))
            .unwrap();

        let backups_started = counter(&registry, "backups_started", "number of backup operations started");
        let backup_errors = counter(&registry, "backup_errors", "number of backup operations that failed");
        let restores_started = counter(&registry, "restores_started", "number of restore operations started");
        let restore_errors = counter(&registry, "restore_errors", "number of restore operations that failed");
        let exported_objects = counter_vec(
            &registry,
            "exported_objects",
            "number of objects written to backup files",
            KIND,
        );
        let restored_objects = counter_vec(
            &registry,
            "restored_objects",
            "number of objects created during restores",
            KIND,
        );
        let skipped_objects = counter_vec(
            &registry,
            "skipped_objects",
            "number of objects skipped during backups and restores, by reason",
            KIND_AND_REASON,
        );

        Metrics {
            registry,
            api_server_request_times,
            backups_started,
            backup_errors,
            restores_started,
            restore_errors,
            exported_objects,
            restored_objects,
            skipped_objects,
        }
    }

    pub fn client_metrics(&self) -> ClientMetrics {
        ClientMetrics {
            api_server_request_times: self.api_server_request_times.clone(),
        }
    }

    pub fn backup_started(&self) {
        self.backups_started.inc();
    }

    pub fn backup_failed(&self) {
        self.backup_errors.inc();
    }

    pub fn restore_started(&self) {
        self.restores_started.inc();
    }

    pub fn restore_failed(&self) {
        self.restore_errors.inc();
    }

    pub fn backup_finished(&self, report: &BackupReport) {
        for kind_report in report.kinds.iter() {
            let kind = kind_report.kind.tag();
            self.exported_objects
                .with_label_values(&[kind])
                .inc_by(kind_report.written as i64);
            self.skip(kind, "file_exists", kind_report.skipped_existing);
            self.skip(kind, "excluded", kind_report.excluded);
        }
    }

    pub fn restore_finished(&self, report: &RestoreReport) {
        for kind_report in report.kinds.iter() {
            let kind = kind_report.kind.tag();
            self.restored_objects
                .with_label_values(&[kind])
                .inc_by(kind_report.created as i64);
            self.skip(kind, "already_exists", kind_report.skipped_existing);
            self.skip(kind, "foreign_kind", kind_report.skipped_foreign);
        }
    }

    fn skip(&self, kind: &str, reason: &str, count: usize) {
        if count > 0 {
            self.skipped_objects
                .with_label_values(&[kind, reason])
                .inc_by(count as i64);
        }
    }

    pub fn encode_as_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::with_capacity(4096);
        encoder.encode(self.registry.gather().as_slice(), &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for Metrics {
    fn default() -> Metrics {
        Metrics::new()
    }
}

pub struct ClientMetrics {
    api_server_request_times: Histogram,
}

impl Debug for ClientMetrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ClientMetrics")
    }
}

impl ClientMetrics {
    pub fn request_started(&self) -> prometheus::HistogramTimer {
        self.api_server_request_times.start_timer()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::{ExportReport, ImportReport};
    use crate::kind::ResourceKind;

    #[test]
    fn metrics_are_created_successfully() {
        let _metrics = Metrics::new();
    }

    #[test]
    fn reports_are_counted_by_kind() {
        let metrics = Metrics::new();
        metrics.backup_started();
        metrics.backup_finished(&BackupReport {
            kinds: vec![ExportReport {
                kind: ResourceKind::ConfigMap,
                written: 2,
                skipped_existing: 1,
                excluded: 1,
            }],
        });
        metrics.restore_finished(&RestoreReport {
            kinds: vec![ImportReport {
                kind: ResourceKind::Pod,
                created: 3,
                skipped_existing: 0,
                skipped_foreign: 0,
            }],
        });

        let text = String::from_utf8(metrics.encode_as_text().unwrap()).unwrap();
        assert!(text.contains("backups_started 1"), "metrics: {}", text);
        assert!(text.contains("exported_objects{kind=\"configmap\"} 2"), "metrics: {}", text);
        assert!(text.contains("skipped_objects{kind=\"configmap\",reason=\"excluded\"} 1"), "metrics: {}", text);
        assert!(text.contains("restored_objects{kind=\"pod\"} 3"), "metrics: {}", text);
    }
}
