use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Number, Value};
use vex_common::error::{Result, VexError};

use crate::counter::{CounterFlag, RawCounter};

const TIMESTAMP_KEY: &str = "timestamp";
const ENVELOPE_VERSION_KEY: &str = "version";
const ENVELOPE_COUNTERS_KEY: &str = "counters";

/// One counter as it appears in `varnishstat -j` output.
#[derive(Debug, Deserialize)]
struct WireCounter {
    #[serde(default)]
    description: String,
    #[serde(default)]
    ident: String,
    #[serde(default)]
    flag: String,
    // group name and display format; carried by 4.x+ but unused
    #[serde(default, rename = "type")]
    _group: Option<String>,
    #[serde(default, rename = "format")]
    _format: Option<String>,
    value: Number,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

/// Decodes a JSON dump into raw counters, sorted by counter name.
///
/// Both the flat layout (counters at the top level next to `timestamp`) and the
/// versioned envelope (`{"version": 1, "counters": {...}}`) are accepted. With
/// `strict` set, any unexpected counter property is an error.
pub fn decode_dump(bytes: &[u8], strict: bool) -> Result<Vec<RawCounter>> {
    let mut document: Map<String, Value> = serde_json::from_slice(bytes)
        .map_err(|err| VexError::DumpDecode(format!("invalid json: {err}")))?;

    let counters = match document.get(ENVELOPE_VERSION_KEY).map(Value::as_u64) {
        None => document,
        Some(Some(1)) => match document.remove(ENVELOPE_COUNTERS_KEY) {
            Some(Value::Object(counters)) => counters,
            _ => {
                return Err(VexError::DumpDecode(
                    "version 1 output without a counters object".to_string(),
                ));
            }
        },
        Some(_) => {
            return Err(VexError::DumpDecode(format!(
                "unimplemented varnishstat output version {}",
                document[ENVELOPE_VERSION_KEY]
            )));
        }
    };

    let mut decoded = Vec::with_capacity(counters.len());
    for (name, raw) in counters {
        if name == TIMESTAMP_KEY {
            continue;
        }
        decoded.push(decode_counter(name, raw, strict)?);
    }
    Ok(decoded)
}

fn decode_counter(name: String, raw: Value, strict: bool) -> Result<RawCounter> {
    if !raw.is_object() {
        return Err(VexError::DumpDecode(format!(
            "counter {name:?} is not an object: {raw}"
        )));
    }

    let wire: WireCounter = serde_json::from_value(raw)
        .map_err(|err| VexError::DumpDecode(format!("counter {name:?}: {err}")))?;

    if strict && let Some(field) = wire.unknown.keys().next() {
        return Err(VexError::UnrecognizedField {
            counter: name,
            field: field.clone(),
        });
    }

    let value = wire
        .value
        .as_f64()
        .ok_or_else(|| VexError::DumpDecode(format!("counter {name:?} has no numeric value")))?;

    Ok(RawCounter {
        name,
        value,
        integer: wire.value.as_u64(),
        description: wire.description,
        identifier: wire.ident,
        flag: CounterFlag::from_flag(&wire.flag),
    })
}

#[cfg(test)]
mod tests {
    use vex_common::VexError;

    use super::decode_dump;
    use crate::counter::CounterFlag;

    const VARNISH_3: &str = include_str!("../testdata/varnish3.json");
    const VARNISH_4: &str = include_str!("../testdata/varnish4.json");
    const VARNISH_6_5: &str = include_str!("../testdata/varnish6_5.json");

    #[test]
    fn decodes_flat_dumps() {
        let counters = decode_dump(VARNISH_4.as_bytes(), true).expect("decode 4.x");
        assert_eq!(counters.len(), 25);
        assert!(counters.iter().all(|counter| !counter.description.is_empty()));
        assert!(counters.iter().all(|counter| counter.name != "timestamp"));

        let happy = counters
            .iter()
            .find(|counter| counter.name == "VBE.81d82226-e891-458e-b7b8-13bdc0ccb1ee.eu1.happy")
            .expect("happy counter");
        assert_eq!(happy.flag, CounterFlag::Bitmap);
        assert_eq!(happy.integer, Some(u64::MAX));
        assert_eq!(happy.identifier, "81d82226-e891-458e-b7b8-13bdc0ccb1ee.eu1");

        let counters = decode_dump(VARNISH_3.as_bytes(), true).expect("decode 3.x");
        assert_eq!(counters.len(), 11);
        let conn = counters
            .iter()
            .find(|counter| counter.name == "client_conn")
            .expect("client_conn");
        assert_eq!(conn.flag, CounterFlag::Counter);
        assert!(conn.identifier.is_empty());
    }

    #[test]
    fn decodes_versioned_envelope() {
        let counters = decode_dump(VARNISH_6_5.as_bytes(), true).expect("decode 6.5");
        assert_eq!(counters.len(), 8);
        // 6.x carries no ident at all; it is embedded in the name
        assert!(counters.iter().all(|counter| counter.identifier.is_empty()));
        assert!(counters.iter().any(|counter| counter.name == "MAIN.uptime"));
    }

    #[test]
    fn counters_come_out_sorted() {
        let counters = decode_dump(VARNISH_4.as_bytes(), false).expect("decode");
        let names = counters
            .iter()
            .map(|counter| counter.name.as_str())
            .collect::<Vec<_>>();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn unknown_envelope_version_is_fatal() {
        let err = decode_dump(br#"{"version": 2, "counters": {}}"#, false).unwrap_err();
        assert!(matches!(err, VexError::DumpDecode(message) if message.contains("version 2")));
    }

    #[test]
    fn type_mismatch_fails_at_decode_time() {
        let dump = br#"{"MAIN.uptime": {"description": "Child process uptime", "flag": "c", "value": "12"}}"#;
        assert!(matches!(
            decode_dump(dump, false),
            Err(VexError::DumpDecode(message)) if message.contains("MAIN.uptime")
        ));

        let dump = br#"{"MAIN.uptime": 12}"#;
        assert!(matches!(decode_dump(dump, false), Err(VexError::DumpDecode(_))));

        let dump = br#"{"MAIN.uptime": {"description": 7, "value": 12}}"#;
        assert!(matches!(decode_dump(dump, false), Err(VexError::DumpDecode(_))));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            decode_dump(b"varnishstat: Could not open shared memory", false),
            Err(VexError::DumpDecode(_))
        ));
    }

    #[test]
    fn unknown_properties_only_fail_in_strict_mode() {
        let dump = br#"{"MAIN.uptime": {"description": "Child process uptime", "flag": "c", "value": 12, "unit": "s"}}"#;

        let counters = decode_dump(dump, false).expect("lenient decode");
        assert_eq!(counters[0].value, 12.0);

        match decode_dump(dump, true) {
            Err(VexError::UnrecognizedField { counter, field }) => {
                assert_eq!(counter, "MAIN.uptime");
                assert_eq!(field, "unit");
            }
            other => panic!("expected unrecognized field, got {other:?}"),
        }
    }
}
