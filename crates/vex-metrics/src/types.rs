use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    pub fn as_prometheus_type(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

/// Canonical metric name plus its ordered label keys.
///
/// Two identities with the same keys in a different order are different
/// identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalIdentity {
    pub name: String,
    pub label_keys: Vec<String>,
}

impl CanonicalIdentity {
    pub fn new(name: impl Into<String>, label_keys: Vec<String>) -> Self {
        Self {
            name: name.into(),
            label_keys,
        }
    }

    pub fn unlabeled(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub variable_labels: Vec<String>,
}

impl MetricDescriptor {
    pub fn from_identity(identity: &CanonicalIdentity, help: &str) -> Self {
        Self {
            name: identity.name.clone(),
            help: help.to_string(),
            variable_labels: identity.label_keys.clone(),
        }
    }
}

/// One sample handed to the exposition sink.
#[derive(Debug, Clone)]
pub struct ConstMetric {
    pub descriptor: Arc<MetricDescriptor>,
    pub metric_type: MetricType,
    pub value: f64,
    pub label_values: Vec<String>,
}

impl ConstMetric {
    pub fn new(
        descriptor: Arc<MetricDescriptor>,
        metric_type: MetricType,
        value: f64,
        label_values: Vec<String>,
    ) -> Self {
        Self {
            descriptor,
            metric_type,
            value,
            label_values,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Label pairs in declared order.
    pub fn labels(&self) -> Vec<(&str, &str)> {
        self.descriptor
            .variable_labels
            .iter()
            .zip(self.label_values.iter())
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect()
    }

    /// Value of the label named `key`, if the descriptor declares it.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.descriptor
            .variable_labels
            .iter()
            .position(|label| label == key)
            .and_then(|index| self.label_values.get(index))
            .map(String::as_str)
    }
}
