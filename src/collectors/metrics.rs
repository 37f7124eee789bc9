//! Per-scrape metric sink.
//!
//! A [`MetricSet`] wraps a fresh `prometheus::Registry`: nothing outlives the scrape
//! or push it was built for.

use super::catalog::ValueType;
use anyhow::{Context, Result, anyhow};
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::{BTreeSet, HashMap};

/// Labels every sample carries, ahead of the descriptor's own labels.
pub const FIXED_LABELS: [&str; 2] = ["service_id", "host"];

/// Description of one metric as advertised by a collector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricDesc {
    pub name: String,
    pub help: String,
    pub value_type: ValueType,
    /// Fixed labels followed by descriptor labels.
    pub label_names: Vec<String>,
}

impl MetricDesc {
    #[must_use]
    pub fn new(name: &str, help: &str, value_type: ValueType, descriptor_labels: &[&str]) -> Self {
        let help = if help.trim().is_empty() {
            "no description"
        } else {
            help
        };
        Self {
            name: name.to_string(),
            help: help.to_string(),
            value_type,
            label_names: FIXED_LABELS
                .iter()
                .chain(descriptor_labels)
                .map(|l| (*l).to_string())
                .collect(),
        }
    }
}

enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

#[derive(Default)]
pub struct MetricSet {
    registry: Registry,
    families: HashMap<String, Family>,
    populated: BTreeSet<String>,
    samples: usize,
}

impl MetricSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample. Repeating the same label values overwrites the value.
    ///
    /// # Errors
    ///
    /// Returns an error when `label_values` does not match the description, the
    /// family was registered with a different shape, or a counter value is negative
    /// or not finite.
    pub fn add(&mut self, desc: &MetricDesc, label_values: &[&str], value: f64) -> Result<()> {
        if label_values.len() != desc.label_names.len() {
            return Err(anyhow!(
                "{}: expected {} label values, got {}",
                desc.name,
                desc.label_names.len(),
                label_values.len()
            ));
        }

        if !self.families.contains_key(&desc.name) {
            let family = self.register(desc)?;
            self.families.insert(desc.name.clone(), family);
        }
        let family = self
            .families
            .get(&desc.name)
            .ok_or_else(|| anyhow!("{} is not registered", desc.name))?;

        match family {
            Family::Gauge(vec) => {
                vec.get_metric_with_label_values(label_values)
                    .with_context(|| format!("invalid labels for {}", desc.name))?
                    .set(value);
            }
            Family::Counter(vec) => {
                if !value.is_finite() || value < 0.0 {
                    return Err(anyhow!("{}: invalid counter value {value}", desc.name));
                }
                let counter = vec
                    .get_metric_with_label_values(label_values)
                    .with_context(|| format!("invalid labels for {}", desc.name))?;
                counter.reset();
                counter.inc_by(value);
            }
        }

        self.samples += 1;
        self.populated.insert(desc.name.clone());
        Ok(())
    }

    fn register(&self, desc: &MetricDesc) -> Result<Family> {
        let opts = Opts::new(desc.name.clone(), desc.help.clone());
        let labels: Vec<&str> = desc.label_names.iter().map(String::as_str).collect();

        let family = match desc.value_type {
            ValueType::Gauge => Family::Gauge(GaugeVec::new(opts, &labels)?),
            ValueType::Counter => Family::Counter(CounterVec::new(opts, &labels)?),
        };
        match &family {
            Family::Gauge(v) => self.registry.register(Box::new(v.clone())),
            Family::Counter(v) => self.registry.register(Box::new(v.clone())),
        }
        .with_context(|| format!("failed to register {}", desc.name))?;

        Ok(family)
    }

    /// Number of samples recorded so far.
    #[must_use]
    pub const fn samples(&self) -> usize {
        self.samples
    }

    /// Names of families holding at least one sample.
    #[must_use]
    pub fn family_names(&self) -> Vec<String> {
        self.populated.iter().cloned().collect()
    }

    /// Prometheus text exposition of everything recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or produces invalid UTF-8.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).context("metrics are not valid UTF-8")
    }
}

/// Writes samples of one service into a [`MetricSet`], adding the fixed labels and
/// looking up descriptions by metric name.
pub struct Emitter<'a> {
    service_id: &'a str,
    host: &'a str,
    describe: &'a HashMap<String, MetricDesc>,
    set: &'a mut MetricSet,
    emitted: usize,
}

impl<'a> Emitter<'a> {
    pub fn new(
        service_id: &'a str,
        host: &'a str,
        describe: &'a HashMap<String, MetricDesc>,
        set: &'a mut MetricSet,
    ) -> Self {
        Self {
            service_id,
            host,
            describe,
            set,
            emitted: 0,
        }
    }

    /// Record a sample; unknown metrics and rejected values are logged and dropped.
    pub fn emit(&mut self, metric: &str, labels: &[&str], value: f64) -> bool {
        let Some(desc) = self.describe.get(metric) else {
            tracing::debug!(metric, "no description for metric, sample dropped");
            return false;
        };

        let mut values = Vec::with_capacity(FIXED_LABELS.len() + labels.len());
        values.push(self.service_id);
        values.push(self.host);
        values.extend_from_slice(labels);

        match self.set.add(desc, &values, value) {
            Ok(()) => {
                self.emitted += 1;
                true
            }
            Err(e) => {
                tracing::debug!(metric, error = %e, "sample dropped");
                false
            }
        }
    }

    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.emitted
    }
}
