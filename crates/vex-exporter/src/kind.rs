use vex_metrics::{CanonicalIdentity, MetricType};

use crate::counter::{CounterFlag, RawCounter};
use crate::naming::{Group, ResolvedName, strip_namespace};

/// Canonical names some varnishstat generations tag as gauges although they
/// only ever grow. Keyed without the namespace.
const FORCED_COUNTERS: &[&str] = &[
    "main_uptime",
    "mgt_uptime",
    "main_n_lru_nuked",
    "main_n_lru_moved",
    "main_n_obj_purged",
];

const HAPPY_SUFFIX: &str = "_happy";
const UP_SUFFIX: &str = "_up";
const BACKEND_UP_HELP: &str = "Backend up as per the latest health probe";

/// Value kind of a resolved counter.
pub fn classify(flag: CounterFlag, name: &str, namespace: &str) -> MetricType {
    if FORCED_COUNTERS.contains(&strip_namespace(namespace, name)) {
        return MetricType::Counter;
    }
    match flag {
        CounterFlag::Counter => MetricType::Counter,
        CounterFlag::Gauge | CounterFlag::Bitmap | CounterFlag::Info | CounterFlag::Unknown => {
            MetricType::Gauge
        }
    }
}

/// Synthetic gauge derived from a backend probe history bitmap.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedHealth {
    pub identity: CanonicalIdentity,
    pub help: &'static str,
    pub value: f64,
}

/// Derives `<family>_up` from a backend `*_happy` bitmap.
///
/// Only bit 0, the most recent probe, is read. The derived gauge keeps the
/// label keys of its source, so its label values can be reused as-is.
pub fn backend_health(resolved: &ResolvedName, counter: &RawCounter) -> Option<DerivedHealth> {
    if resolved.group != Group::Backend || counter.flag != CounterFlag::Bitmap {
        return None;
    }
    let family = resolved.name().strip_suffix(HAPPY_SUFFIX)?;

    Some(DerivedHealth {
        identity: CanonicalIdentity::new(
            format!("{family}{UP_SUFFIX}"),
            resolved.identity.label_keys.clone(),
        ),
        help: BACKEND_UP_HELP,
        value: probe_bit(counter.bits()),
    })
}

fn probe_bit(history: u64) -> f64 {
    (history & 1) as f64
}
