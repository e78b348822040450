//! Collector turning nftables counters into Prometheus samples.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::MetricType;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::mapping::{family_label, sanitize_name};
use crate::source::{CounterSource, Object, SourceError, Table};

/// Label names shared by every exported metric.
pub const LABEL_NAMES: [&str; 3] = ["family", "table", "counter"];

/// Byte totals of nftables counters.
pub static BYTES_DESCRIPTOR: MetricDescriptor = MetricDescriptor {
    name: "nftables_counter_bytes",
    help: "Total number of bytes referenced by an nftables counter.",
    label_names: LABEL_NAMES,
    metric_type: MetricType::Counter,
};

/// Packet totals of nftables counters.
pub static PACKETS_DESCRIPTOR: MetricDescriptor = MetricDescriptor {
    name: "nftables_counter_packets",
    help: "Total number of packets referenced by an nftables counter.",
    label_names: LABEL_NAMES,
    metric_type: MetricType::Counter,
};

/// Errors that prevent the collector from being created.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("nftables: no table to export")]
    NoTables,

    #[error("nftables: failed to list tables: {0}")]
    ListTables(#[source] SourceError),
}

/// Static description of an exported metric.
#[derive(Debug)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub label_names: [&'static str; 3],
    pub metric_type: MetricType,
}

/// Label values of one counter, in [`LABEL_NAMES`] order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct CounterLabels {
    pub family: String,
    pub table: String,
    pub counter: String,
}

impl CounterLabels {
    /// Label values in the order of the descriptor's label names.
    pub fn values(&self) -> [&str; 3] {
        [&self.family, &self.table, &self.counter]
    }
}

/// One sample produced by a collection pass.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub descriptor: &'static MetricDescriptor,
    pub labels: CounterLabels,
    pub value: f64,
}

impl MetricSample {
    pub fn metric_type(&self) -> MetricType {
        self.descriptor.metric_type
    }
}

/// Collector querying a [`CounterSource`] on every scrape.
///
/// Every call into the source goes through one mutex, so concurrent scrapes
/// queue on it instead of racing the underlying handle. The lock is released
/// between calls and while samples are being built.
pub struct CounterCollector {
    source: Mutex<Box<dyn CounterSource>>,
}

/// Create a shareable collector handle.
pub type SharedCollector = Arc<CounterCollector>;

impl CounterCollector {
    /// Create a collector, failing when the source has no table to export.
    pub fn new<S: CounterSource + 'static>(mut source: S) -> Result<Self, CollectorError> {
        let tables = source.list_tables().map_err(CollectorError::ListTables)?;

        if tables.is_empty() {
            return Err(CollectorError::NoTables);
        }

        debug!(tables = tables.len(), "Counter source is ready");

        Ok(Self {
            source: Mutex::new(Box::new(source)),
        })
    }

    /// The descriptors of every metric this collector emits.
    pub fn describe(&self) -> [&'static MetricDescriptor; 2] {
        [&BYTES_DESCRIPTOR, &PACKETS_DESCRIPTOR]
    }

    /// Collect samples for every counter of every table.
    ///
    /// Counters whose sanitized labels collide with an earlier counter of the
    /// same pass are dropped, so a pass may hold fewer than two samples per
    /// counter object.
    pub fn collect(&self) -> Vec<MetricSample> {
        self.collect_until(None)
    }

    /// Collect samples, giving up on the source once `deadline` has passed.
    ///
    /// No source call is started once the deadline has passed, and waiting
    /// for the source lock stops at the deadline. A call that has already
    /// started runs to completion. Tables not reached before the deadline are
    /// left out of the result.
    pub fn collect_until(&self, deadline: Option<Instant>) -> Vec<MetricSample> {
        let tables = match self.with_source(deadline, |source| source.list_tables()) {
            Some(Ok(tables)) => tables,
            Some(Err(e)) => {
                error!(error = %e, "Failed to list nftables tables");
                return Vec::new();
            }
            None => {
                warn!("Deadline reached while waiting for the counter source");
                return Vec::new();
            }
        };

        let mut samples = Vec::new();
        let mut seen = HashSet::new();

        for table in &tables {
            let objects = match self.with_source(deadline, |source| source.get_objects(table)) {
                Some(Ok(objects)) => objects,
                Some(Err(e)) => {
                    warn!(table = %table, error = %e, "Failed to list table objects");
                    continue;
                }
                None => {
                    warn!(
                        table = %table,
                        "Deadline reached while waiting for the counter source"
                    );
                    break;
                }
            };

            collect_table(table, &objects, &mut seen, &mut samples);
        }

        debug!(
            tables = tables.len(),
            samples = samples.len(),
            "Collected nftables counters"
        );

        samples
    }

    fn with_source<T>(
        &self,
        deadline: Option<Instant>,
        f: impl FnOnce(&mut Box<dyn CounterSource>) -> T,
    ) -> Option<T> {
        let mut source = match deadline {
            Some(deadline) if Instant::now() >= deadline => return None,
            Some(deadline) => self.source.try_lock_until(deadline)?,
            None => self.source.lock(),
        };
        Some(f(&mut *source))
    }
}

/// Append the samples of one table's counters.
///
/// A counter whose sanitized labels were already emitted in this pass is
/// skipped, so each label set appears once per metric.
fn collect_table(
    table: &Table,
    objects: &[Object],
    seen: &mut HashSet<CounterLabels>,
    samples: &mut Vec<MetricSample>,
) {
    let family = family_label(table.family);
    let table_label = sanitize_name(&table.name);

    for counter in objects.iter().filter_map(Object::as_counter) {
        let labels = CounterLabels {
            family: family.to_string(),
            table: table_label.clone(),
            counter: sanitize_name(&counter.name),
        };

        if !seen.insert(labels.clone()) {
            warn!(
                table = %table,
                counter = %counter.name,
                labels = ?labels.values(),
                "Counter name collides with another counter after sanitization, skipping"
            );
            continue;
        }

        samples.push(MetricSample {
            descriptor: &BYTES_DESCRIPTOR,
            labels: labels.clone(),
            value: counter.bytes as f64,
        });
        samples.push(MetricSample {
            descriptor: &PACKETS_DESCRIPTOR,
            labels,
            value: counter.packets as f64,
        });
    }
}
