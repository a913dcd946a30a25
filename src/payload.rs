use serde_json::Value;

/// Opaque column payload: column name to JSON value, deterministically
/// ordered. The planner never interprets data column values.
pub type ColumnMap = serde_json::Map<String, Value>;

/// Copy of `map` with all null entries removed.
pub fn strip_nulls(map: &ColumnMap) -> ColumnMap {
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Right-biased shallow merge; nulls in `overlay` overwrite (UPSERT/REPLACE
/// contribution semantics).
pub fn merge_all(base: &mut ColumnMap, overlay: &ColumnMap) {
    for (k, v) in overlay {
        base.insert(k.clone(), v.clone());
    }
}

/// Right-biased shallow merge that skips nulls in `overlay` (PATCH
/// contribution semantics: null means "leave as is").
pub fn merge_patch(base: &mut ColumnMap, overlay: &ColumnMap) {
    for (k, v) in overlay {
        if !v.is_null() {
            base.insert(k.clone(), v.clone());
        }
    }
}

/// Equality that treats a null entry and a missing entry the same.
pub fn maps_equal_ignoring_nulls(a: &ColumnMap, b: &ColumnMap) -> bool {
    for (k, v) in a {
        if v.is_null() {
            continue;
        }
        match b.get(k) {
            Some(bv) if bv == v => {}
            _ => return false,
        }
    }
    for (k, v) in b {
        if v.is_null() {
            continue;
        }
        match a.get(k) {
            Some(av) if av == v => {}
            _ => return false,
        }
    }
    true
}

/// Change-detection hash over the null-stripped payload. Map keys are sorted,
/// so the serialization is stable across identical inputs.
pub fn payload_hash(map: &ColumnMap) -> u64 {
    let stripped = strip_nulls(map);
    let serialized = serde_json::to_string(&Value::Object(stripped)).unwrap_or_default();
    xxhash_rust::xxh3::xxh3_64(serialized.as_bytes())
}

/// Stable `k=v__k=v` key over the non-null entries of a map.
pub fn map_key(map: &ColumnMap) -> String {
    let mut parts: Vec<String> = map
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| format!("{}={}", k, value_text(v)))
        .collect();
    parts.sort();
    parts.join("__")
}

/// Plain-text rendering of a scalar value for keys and messages.
pub fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "_NULL_".to_string(),
        other => other.to_string(),
    }
}

/// `{"k": v, ...}` rendering with spaces, used in error feedback messages.
pub fn object_text(map: &ColumnMap) -> String {
    let entries: Vec<String> = map
        .iter()
        .map(|(k, v)| {
            let rendered = match v {
                Value::String(s) => format!("\"{s}\""),
                other => other.to_string(),
            };
            format!("\"{k}\": {rendered}")
        })
        .collect();
    format!("{{{}}}", entries.join(", "))
}

/// Null-safe scalar equality (`IS NOT DISTINCT FROM`): two nulls are equal.
pub fn not_distinct(a: &Value, b: &Value) -> bool {
    a == b
}
