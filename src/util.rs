use serde_json::Value;

/// Returns the number of non-leap-milliseconds since January 1, 1970 UTC.
///
/// This is essentially just an alias for `chrono::offset::Local::now().timestamp_millis()`.
#[inline]
pub fn get_epoch_time() -> i64 {
    chrono::offset::Local::now().timestamp_millis()
}

/// Defensively coerces a JSON value into a `bool`. The remote portal encodes boolean status
/// fields (`isFull`, `isConflict`, `isChosen`) in whatever form was convenient at the time:
/// a native boolean, a `0`/`1` integer, or a `"0"`/`"1"` string. Anything else (missing field,
/// `null`, unrecognized string) is treated as `false`.
///
/// # Parameters
/// - `value`: The JSON value to coerce, typically obtained via indexing (`&json["isFull"]`).
///
/// # Returns
/// The canonicalized boolean.
pub fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().map(|n| n != 0).unwrap_or(false),
        Value::String(s) => matches!(s.trim(), "1" | "true" | "True" | "TRUE"),
        _ => false,
    }
}

/// Defensively coerces a JSON value into an `i64`. The remote portal sometimes encodes
/// numeric fields (e.g. remaining seats) as JSON numbers and sometimes as numeric strings.
/// Anything unparseable is treated as absent.
///
/// # Parameters
/// - `value`: The JSON value to coerce.
///
/// # Returns
/// `Some(n)` if the value could be interpreted as an integer, `None` otherwise.
pub fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bool_field_parsing_matches_spec() {
        assert!(to_bool(&json!("1")));
        assert!(to_bool(&json!(1)));
        assert!(to_bool(&json!(true)));
        assert!(!to_bool(&json!("0")));
        assert!(!to_bool(&json!(0)));
        assert!(!to_bool(&json!(false)));
        assert!(!to_bool(&Value::Null));
        assert!(!to_bool(&json!(serde_json::Map::new())["missing"]));
    }

    #[test]
    fn int_field_parsing_accepts_strings_and_numbers() {
        assert_eq!(Some(40), to_int(&json!(40)));
        assert_eq!(Some(40), to_int(&json!("40")));
        assert_eq!(None, to_int(&Value::Null));
        assert_eq!(None, to_int(&json!("not-a-number")));
    }
}
