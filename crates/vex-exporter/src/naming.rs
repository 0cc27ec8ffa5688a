//! Maps raw varnishstat counter names onto a stable, low-cardinality metric
//! namespace.
//!
//! Per-instance counters (one per backend, storage, lock class, ...) collapse
//! into one family discriminated by labels. The label keys a family gets depend
//! only on its canonical name, never on which instance or which varnishstat
//! generation produced the counter.
//!
//! See <https://prometheus.io/docs/practices/naming/>.

use once_cell::sync::Lazy;
use regex::Regex;
use vex_common::VarnishVersion;
use vex_metrics::CanonicalIdentity;

// (prefix:)<uuid>.<name>
static BACKEND_UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"([0-9A-Za-z]{8}-[0-9A-Za-z]{4}-[0-9A-Za-z]{4}-[89ABab][0-9A-Za-z]{3}-[0-9A-Za-z]{12})(.*)",
    )
    .expect("backend uuid pattern is valid")
});

// <name>(<ip>,<ipv6>,<port>)
static BACKEND_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(.*)\((.*)\)").expect("backend paren pattern is valid"));

const UNKNOWN_SERVER: &str = "unknown";
const DEFAULT_IDENTIFIER_LABEL: &str = "id";
const DEFAULT_FAMILY_LABEL: &str = "type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Backend,
    Mempool,
    Lock,
    Sma,
    Smf,
    Management,
    Main,
}

/// Classification order; the first matching prefix wins.
const GROUPS: [Group; 7] = [
    Group::Backend,
    Group::Mempool,
    Group::Lock,
    Group::Sma,
    Group::Smf,
    Group::Management,
    Group::Main,
];

impl Group {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Mempool => "mempool",
            Self::Lock => "lck",
            Self::Sma => "sma",
            Self::Smf => "smf",
            Self::Management => "mgt",
            Self::Main => "main",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            Self::Backend => "vbe.",
            Self::Mempool => "mempool.",
            Self::Lock => "lck.",
            Self::Sma => "sma.",
            Self::Smf => "smf.",
            Self::Management => "mgt.",
            Self::Main => "main.",
        }
    }

    /// Group of a raw counter name; names without a known prefix are `Main`.
    pub fn classify(raw_name: &str) -> Self {
        GROUPS
            .into_iter()
            .find(|group| strip_prefix_ignore_case(raw_name, group.prefix()).is_some())
            .unwrap_or(Self::Main)
    }
}

/// Legacy abbreviations renamed after assembly, keyed without the namespace.
const RENAMES: &[(&str, &str)] = &[
    ("lck_colls", "lock_collisions"),
    ("lck_creat", "lock_created"),
    ("lck_destroy", "lock_destroyed"),
    ("lck_locks", "lock_operations"),
];

/// Label key for the identifier of a canonical name, keyed without the
/// namespace. Names not listed use `id`.
const IDENTIFIER_LABELS: &[(&str, &str)] = &[
    ("lock_collisions", "target"),
    ("lock_created", "target"),
    ("lock_destroyed", "target"),
    ("lock_operations", "target"),
    ("sma_c_bytes", "type"),
    ("sma_c_fail", "type"),
    ("sma_c_freed", "type"),
    ("sma_c_req", "type"),
    ("sma_g_alloc", "type"),
    ("sma_g_bytes", "type"),
    ("sma_g_space", "type"),
    ("smf_c_bytes", "type"),
    ("smf_c_fail", "type"),
    ("smf_c_freed", "type"),
    ("smf_c_req", "type"),
    ("smf_g_alloc", "type"),
    ("smf_g_bytes", "type"),
    ("smf_g_smf_frag", "type"),
    ("smf_g_smf_large", "type"),
    ("smf_g_smf", "type"),
    ("smf_g_space", "type"),
];

/// Counter families that collapse into one labeled metric.
struct Family {
    /// Name fragment matched as `<prefix>_<suffix>`.
    prefix: &'static str,
    /// Name that becomes `<family>_total`.
    total: &'static str,
    /// Family name; defaults to `prefix`.
    rename: Option<&'static str>,
    description: &'static str,
    label_key: Option<&'static str>,
}

impl Family {
    fn name(&self) -> &'static str {
        self.rename.unwrap_or(self.prefix)
    }
}

const FAMILIES: &[Family] = &[
    Family {
        prefix: "main_fetch",
        total: "main_s_fetch",
        rename: None,
        description: "Number of fetches",
        label_key: None,
    },
    Family {
        prefix: "main_sess",
        total: "main_s_sess",
        rename: Some("main_sessions"),
        description: "Number of sessions",
        label_key: None,
    },
    Family {
        prefix: "main_n_wrk",
        total: "main_n_wrk",
        rename: Some("main_worker_threads"),
        description: "Number of worker threads",
        label_key: None,
    },
];

/// Canonical name, description and ordered label values of one raw counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub group: Group,
    pub identity: CanonicalIdentity,
    pub description: String,
    pub label_values: Vec<String>,
}

impl ResolvedName {
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.identity
            .label_keys
            .iter()
            .position(|label| label == key)
            .and_then(|index| self.label_values.get(index))
            .map(String::as_str)
    }
}

/// Ordered label accumulator. Keys are appended in algorithm order, never
/// collected from a map.
#[derive(Default)]
struct Labels {
    keys: Vec<String>,
    values: Vec<String>,
}

impl Labels {
    fn push(&mut self, key: &str, value: impl Into<String>) {
        self.keys.push(key.to_string());
        self.values.push(value.into());
    }
}

/// Resolves a raw counter into its canonical metric name and labels.
///
/// Pure: the same inputs always give the same name and the same label order.
/// An identifier passed separately and the same identifier embedded in the
/// dotted name (`group.identifier.metric`) give identical results.
///
/// The version is part of the naming context, but no current rule depends on
/// it: the backend patterns discriminate the identifier forms on their own, so
/// an unresolved version resolves names exactly like a known one.
pub fn resolve(
    namespace: &str,
    raw_name: &str,
    identifier: &str,
    description: &str,
    _version: &VarnishVersion,
) -> ResolvedName {
    let identifier = backfill_identifier(raw_name, identifier);
    let group = Group::classify(raw_name);

    let mut name = base_name(namespace, group, raw_name, identifier);
    let mut description = description.to_string();
    let mut labels = Labels::default();

    if !identifier.is_empty() {
        if group == Group::Backend {
            let (backend, server) = split_backend_identifier(identifier);
            labels.push("backend", backend);
            labels.push("server", server);
        } else {
            let key = lookup(IDENTIFIER_LABELS, strip_namespace(namespace, &name))
                .unwrap_or(DEFAULT_IDENTIFIER_LABEL);
            labels.push(key, identifier);
        }
    }

    for family in FAMILIES {
        let total = qualify(namespace, family.total);
        let prefix = qualify(namespace, family.prefix);
        let family_name = qualify(namespace, family.name());

        if name == total {
            // a total never carries the family label, it would double count
            // under aggregation
            name = format!("{family_name}_total");
            description = family.description.to_string();
            break;
        }
        if let Some(suffix) = name
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .filter(|suffix| !suffix.is_empty())
        {
            labels.push(family.label_key.unwrap_or(DEFAULT_FAMILY_LABEL), suffix);
            name = family_name;
            description = family.description.to_string();
            break;
        }
    }

    ResolvedName {
        group,
        identity: CanonicalIdentity::new(name, labels.keys),
        description,
        label_values: labels.values,
    }
}

/// 5.2 and newer drop the separate identifier; recover it from the middle
/// segment(s) of `<group>.<identifier>.<metric>`. Case is preserved so both
/// sources yield the same label value.
fn backfill_identifier<'a>(raw_name: &'a str, identifier: &'a str) -> &'a str {
    if !identifier.is_empty() || raw_name.matches('.').count() < 2 {
        return identifier;
    }

    let rest = trim_group_prefix(raw_name)
        .or_else(|| raw_name.split_once('.').map(|(_, rest)| rest))
        .unwrap_or(raw_name);
    rest.rfind('.').map_or("", |dot| &rest[..dot])
}

fn base_name(namespace: &str, group: Group, raw_name: &str, identifier: &str) -> String {
    let mut fq = raw_name.to_lowercase();
    if !identifier.is_empty() {
        fq = fq.replacen(&format!(".{}", identifier.to_lowercase()), "", 1);
    }

    let rest = trim_group_prefix(&fq)
        .or_else(|| (fq == group.prefix().trim_end_matches('.')).then_some(""))
        .unwrap_or(fq.as_str());
    let rest = sanitize(rest);

    let name = if rest.is_empty() {
        format!("{namespace}_{}", group.as_str())
    } else {
        format!("{namespace}_{}_{rest}", group.as_str())
    };

    match lookup(RENAMES, strip_namespace(namespace, &name)) {
        Some(renamed) => qualify(namespace, renamed),
        None => name,
    }
}

/// Splits a backend identifier into `(backend, server)`.
///
/// Always yields both values so every backend series carries the same two
/// label keys; a registry rejects a family whose keys vary between series.
fn split_backend_identifier(identifier: &str) -> (String, String) {
    if let Some(captures) = BACKEND_UUID.captures(identifier) {
        return (clean_backend_name(&captures[2]), captures[1].to_string());
    }
    if let Some(captures) = BACKEND_PAREN.captures(identifier) {
        return (
            clean_backend_name(&captures[1]),
            captures[2].replacen(",,", ":", 1),
        );
    }
    (clean_backend_name(identifier), UNKNOWN_SERVER.to_string())
}

fn clean_backend_name(name: &str) -> String {
    let mut name = name.trim_matches('.');
    for prefix in ["boot.", "root:"] {
        if let Some(rest) = strip_prefix_ignore_case(name, prefix) {
            name = rest;
        }
    }

    // reload_2019-08-29T100458.<name> from varnish_reload_vcl (4.x),
    // reload_20191014_091124_78599.<name> from varnishreload (6+)
    if name.starts_with("reload_")
        && let Some((_, rest)) = name.split_once('.')
    {
        name = rest;
    }
    name.to_string()
}

fn trim_group_prefix(name: &str) -> Option<&str> {
    GROUPS
        .into_iter()
        .find_map(|group| strip_prefix_ignore_case(name, group.prefix()))
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

/// Replaces separators and anything else a metric name cannot hold.
fn sanitize(fragment: &str) -> String {
    fragment
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == ':' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn qualify(namespace: &str, suffix: &str) -> String {
    format!("{namespace}_{suffix}")
}

pub(crate) fn strip_namespace<'a>(namespace: &str, name: &'a str) -> &'a str {
    name.strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('_'))
        .unwrap_or(name)
}

fn lookup(table: &[(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, value)| *value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use vex_common::VarnishVersion;

    use super::{Group, ResolvedName, resolve};
    use crate::decode::decode_dump;

    const NS: &str = "varnish";
    const UUID: &str = "81d82226-e891-458e-b7b8-13bdc0ccb1ee";

    fn resolved(raw_name: &str, identifier: &str) -> ResolvedName {
        resolve(NS, raw_name, identifier, "description", &VarnishVersion::new(4, 1, 0))
    }

    fn keys(resolved: &ResolvedName) -> Vec<&str> {
        resolved
            .identity
            .label_keys
            .iter()
            .map(String::as_str)
            .collect()
    }

    #[test]
    fn uuid_backend_splits_server_and_backend() {
        let happy = resolved(
            "VBE.81d82226-e891-458e-b7b8-13bdc0ccb1ee.eu1.happy",
            "81d82226-e891-458e-b7b8-13bdc0ccb1ee.eu1",
        );

        assert_eq!(happy.group, Group::Backend);
        assert_eq!(happy.name(), "varnish_backend_happy");
        assert_eq!(keys(&happy), ["backend", "server"]);
        assert_eq!(happy.label("backend"), Some("eu1"));
        assert_eq!(happy.label("server"), Some(UUID));
    }

    #[test]
    fn parenthesized_backend_rebuilds_host_port() {
        let vcls = resolved(
            "VBE.default(127.0.0.1,,8080).vcls",
            "default(127.0.0.1,,8080)",
        );

        assert_eq!(vcls.name(), "varnish_backend_vcls");
        assert_eq!(vcls.label_values, ["default", "127.0.0.1:8080"]);
    }

    #[test]
    fn unmatched_backend_gets_unknown_server() {
        let conn = resolved("VBE.root:eu2_x.y-z:w.conn", "root:eu2_x.y-z:w");

        assert_eq!(conn.name(), "varnish_backend_conn");
        assert_eq!(keys(&conn), ["backend", "server"]);
        assert_eq!(conn.label_values, ["eu2_x.y-z:w", "unknown"]);
    }

    #[test]
    fn uuid_form_does_not_depend_on_version() {
        let identifier = "81d82226-e891-458e-b7b8-13bdc0ccb1ee.eu1";
        let raw_name = "VBE.81d82226-e891-458e-b7b8-13bdc0ccb1ee.eu1.happy";

        for version in [
            VarnishVersion::unresolved(),
            VarnishVersion::new(3, 0, 7),
            VarnishVersion::new(6, 5, 1),
        ] {
            let happy = resolve(NS, raw_name, identifier, "", &version);
            assert_eq!(happy.name(), "varnish_backend_happy");
            assert_eq!(happy.label_values, ["eu1", UUID]);
        }
    }

    #[test]
    fn backend_vcl_prefixes_are_stripped() {
        let reload = resolved(
            "VBE.reload_20191014_091124_78599.api.req",
            "reload_20191014_091124_78599.api",
        );
        assert_eq!(reload.label_values, ["api", "unknown"]);

        let boot = resolved("VBE.boot.default.req", "boot.default");
        assert_eq!(boot.label_values, ["default", "unknown"]);

        let dynamic = resolved("VBE.boot.www(10.0.0.7,,80).req", "boot.www(10.0.0.7,,80)");
        assert_eq!(dynamic.label_values, ["www", "10.0.0.7:80"]);
    }

    #[test]
    fn embedded_identifier_matches_separate_field() {
        let cases = [
            (
                "VBE.81d82226-e891-458e-b7b8-13bdc0ccb1ee.eu1.happy",
                "81d82226-e891-458e-b7b8-13bdc0ccb1ee.eu1",
            ),
            ("VBE.boot.Default.req", "boot.Default"),
            ("VBE.default(127.0.0.1,,8080).vcls", "default(127.0.0.1,,8080)"),
            ("LCK.sms.creat", "sms"),
            ("SMA.Transient.g_bytes", "Transient"),
            ("MEMPOOL.busyobj.live", "busyobj"),
        ];

        for (raw_name, identifier) in cases {
            let separate = resolved(raw_name, identifier);
            let embedded = resolved(raw_name, "");
            assert_eq!(separate, embedded, "{raw_name}");
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let first = resolved("MAIN.fetch_head", "");
        for _ in 0..16 {
            assert_eq!(resolved("MAIN.fetch_head", ""), first);
        }
        assert_eq!(first.name(), "varnish_main_fetch");
        assert_eq!(first.label_values, ["head"]);
        assert_eq!(first.description, "Number of fetches");
    }

    #[test]
    fn totals_never_carry_the_family_label() {
        let total = resolved("MAIN.s_fetch", "");
        assert_eq!(total.name(), "varnish_main_fetch_total");
        assert!(total.identity.label_keys.is_empty());
        assert_eq!(total.description, "Number of fetches");

        let sessions = resolved("MAIN.s_sess", "");
        assert_eq!(sessions.name(), "varnish_main_sessions_total");
        assert!(sessions.identity.label_keys.is_empty());

        let conn = resolved("MAIN.sess_conn", "");
        assert_eq!(conn.name(), "varnish_main_sessions");
        assert_eq!(keys(&conn), ["type"]);
        assert_eq!(conn.label_values, ["conn"]);

        // 3.x worker thread counters: the bare count is the total
        let threads = resolved("n_wrk", "");
        assert_eq!(threads.name(), "varnish_main_worker_threads_total");
        assert!(threads.identity.label_keys.is_empty());
        let created = resolved("n_wrk_create", "");
        assert_eq!(created.name(), "varnish_main_worker_threads");
        assert_eq!(created.label_values, ["create"]);
    }

    #[test]
    fn legacy_lock_names_are_renamed_with_target_label() {
        let created = resolved("LCK.sms.creat", "sms");
        assert_eq!(created.name(), "varnish_lock_created");
        assert_eq!(keys(&created), ["target"]);
        assert_eq!(created.label_values, ["sms"]);

        let collisions = resolved("LCK.vbe.colls", "vbe");
        assert_eq!(collisions.name(), "varnish_lock_collisions");
        assert_eq!(collisions.label("target"), Some("vbe"));
    }

    #[test]
    fn generic_identifier_uses_table_or_id() {
        let bytes = resolved("SMA.s0.g_bytes", "s0");
        assert_eq!(bytes.name(), "varnish_sma_g_bytes");
        assert_eq!(keys(&bytes), ["type"]);

        let live = resolved("MEMPOOL.busyobj.live", "busyobj");
        assert_eq!(live.name(), "varnish_mempool_live");
        assert_eq!(keys(&live), ["id"]);
        assert_eq!(live.label_values, ["busyobj"]);
    }

    #[test]
    fn plain_counters_only_get_normalized() {
        let uptime = resolve(
            NS,
            "MAIN.uptime",
            "",
            "Child process uptime",
            &VarnishVersion::new(6, 0, 0),
        );
        assert_eq!(uptime.name(), "varnish_main_uptime");
        assert!(uptime.identity.label_keys.is_empty());
        assert_eq!(uptime.description, "Child process uptime");

        let legacy = resolved("client_conn", "");
        assert_eq!(legacy.group, Group::Main);
        assert_eq!(legacy.name(), "varnish_main_client_conn");

        let mgt = resolved("MGT.child_start", "");
        assert_eq!(mgt.name(), "varnish_mgt_child_start");
    }

    #[test]
    fn bare_identifier_still_gets_namespace_and_group() {
        let bare = resolved("VBE.default", "default");
        assert_eq!(bare.name(), "varnish_backend");
        assert_eq!(bare.label_values, ["default", "unknown"]);
    }

    #[test]
    fn unknown_groups_embed_identifier_after_first_segment() {
        let counter = resolved("KVSTORE.vcl1.ns.hits", "");
        assert_eq!(counter.name(), "varnish_main_kvstore_hits");
        assert_eq!(counter.label_values, ["vcl1.ns"]);
    }

    #[test]
    fn namespace_is_configurable() {
        let version = VarnishVersion::new(6, 0, 0);
        let created = resolve("edge", "LCK.sms.creat", "sms", "Created locks", &version);
        assert_eq!(created.name(), "edge_lock_created");
        assert_eq!(keys(&created), ["target"]);

        let total = resolve("edge", "MAIN.s_fetch", "", "Total fetches", &version);
        assert_eq!(total.name(), "edge_main_fetch_total");
    }

    #[test]
    fn label_arity_is_stable_per_family_across_a_batch() {
        for (dump, version) in [
            (include_str!("../testdata/varnish3.json"), VarnishVersion::new(3, 0, 5)),
            (include_str!("../testdata/varnish4.json"), VarnishVersion::new(4, 1, 0)),
            (include_str!("../testdata/varnish6_5.json"), VarnishVersion::new(6, 5, 1)),
        ] {
            let counters = decode_dump(dump.as_bytes(), false).expect("decode");
            let mut families: HashMap<String, Vec<String>> = HashMap::new();
            for counter in counters {
                let resolved = resolve(
                    NS,
                    &counter.name,
                    &counter.identifier,
                    &counter.description,
                    &version,
                );
                assert_eq!(resolved.identity.label_keys.len(), resolved.label_values.len());
                let existing = families
                    .entry(resolved.identity.name.clone())
                    .or_insert_with(|| resolved.identity.label_keys.clone());
                assert_eq!(
                    existing, &resolved.identity.label_keys,
                    "label keys differ for {}",
                    resolved.identity.name
                );
            }
        }
    }
}
