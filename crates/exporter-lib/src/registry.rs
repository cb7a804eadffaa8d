//! Per-request metric registry
//!
//! A fresh [`SummaryRegistry`] is built for every scrape and dropped after
//! rendering. It is never the process-wide default registry, so concurrent
//! requests cannot see each other's samples.

use crate::projector::MetricRecord;
use crate::schema::{LabelPolicy, METRICS};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;

/// Content type of the rendered exposition
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Accumulates gauge samples and renders them in the text format
pub struct SummaryRegistry {
    registry: Registry,
    gauges: HashMap<&'static str, GaugeVec>,
    policy: LabelPolicy,
}

impl SummaryRegistry {
    /// Create a registry with every catalog metric registered
    pub fn new(policy: LabelPolicy) -> prometheus::Result<Self> {
        let registry = Registry::new();
        let mut gauges = HashMap::with_capacity(METRICS.len());

        for spec in METRICS.iter() {
            let gauge = GaugeVec::new(
                Opts::new(spec.name, spec.help).namespace(crate::schema::METRICS_NAMESPACE),
                policy.label_keys(spec.scope()),
            )?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(spec.name, gauge);
        }

        Ok(Self {
            registry,
            gauges,
            policy,
        })
    }

    pub fn policy(&self) -> LabelPolicy {
        self.policy
    }

    /// Write one sample. A second write with the same labels overwrites
    /// the first.
    pub fn write(&self, record: &MetricRecord) -> prometheus::Result<()> {
        let gauge = self.gauges.get(record.spec.name).ok_or_else(|| {
            prometheus::Error::Msg(format!("metric {} is not registered", record.name()))
        })?;

        let labels: HashMap<&str, &str> = record
            .labels
            .iter()
            .map(|(k, v)| (*k, v.as_str()))
            .collect();

        gauge.get_metric_with(&labels)?.set(record.value);
        Ok(())
    }

    /// Write a batch of samples, stopping at the first invalid one
    pub fn write_all<'a>(
        &self,
        records: impl IntoIterator<Item = &'a MetricRecord>,
    ) -> prometheus::Result<usize> {
        let mut written = 0;
        for record in records {
            self.write(record)?;
            written += 1;
        }
        Ok(written)
    }

    /// Number of distinct series currently held
    pub fn series_count(&self) -> usize {
        self.registry
            .gather()
            .iter()
            .map(|family| family.get_metric().len())
            .sum()
    }

    /// Render every non-empty metric family
    pub fn render(&self) -> prometheus::Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}
