use bson::Bson;

/// Strip insignificant whitespace between structural JSON tokens.
///
/// Only spaces directly after `[`/`,` (before a value start) and directly
/// before `]`/`}` (after a value end) are removed; string contents and
/// escapes pass through untouched. The output is a fixed point:
/// `normalize_json(normalize_json(x)) == normalize_json(x)`.
pub fn normalize_json(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut normalized = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escape_next = false;

    for i in 0..chars.len() {
        let c = chars[i];
        if escape_next {
            normalized.push(c);
            escape_next = false;
            continue;
        }
        if c == '\\' {
            escape_next = true;
            normalized.push(c);
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            normalized.push(c);
            continue;
        }
        if in_string {
            normalized.push(c);
            continue;
        }
        if c == ' ' && i > 0 && i + 1 < chars.len() {
            let prev = chars[i - 1];
            let next = chars[i + 1];
            // Space after an opener/comma, before a value start.
            let value_start = matches!(next, '"' | '[' | '{' | '-' | 't' | 'f' | 'n')
                || next.is_ascii_digit();
            if (prev == '[' || prev == ',') && value_start {
                continue;
            }
            // Space before a closer, after a value end.
            let value_end =
                matches!(prev, '"' | ']' | '}') || prev.is_ascii_digit();
            if (next == ']' || next == '}') && value_end {
                continue;
            }
        }
        normalized.push(c);
    }
    normalized
}

/// Render a document or array value as compact JSON text.
/// This is the externally visible spillover format for VARCHAR columns.
pub fn bson_to_json(value: &Bson) -> String {
    let json = value.clone().into_relaxed_extjson();
    normalize_json(&serde_json::to_string(&json).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use bson::bson;

    use super::*;

    #[test]
    fn strips_spaces_in_arrays() {
        assert_eq!(normalize_json(r#"[ "a", "b" ]"#), r#"["a","b"]"#);
        assert_eq!(normalize_json(r#"[ 1, -2, 3 ]"#), r#"[1,-2,3]"#);
        assert_eq!(normalize_json(r#"[ true, false, null ]"#), r#"[true,false,null]"#);
    }

    #[test]
    fn preserves_spaces_inside_strings() {
        assert_eq!(normalize_json(r#"[ "a b", "c" ]"#), r#"["a b","c"]"#);
        assert_eq!(normalize_json(r#"["a\" b"]"#), r#"["a\" b"]"#);
    }

    #[test]
    fn nested_structures() {
        // Only array-delimiter spaces go; spaces after `{` and `:` stay.
        assert_eq!(
            normalize_json(r#"{ "a": [ { "b": 1 }, 2 ] }"#),
            r#"{ "a": [{ "b": 1},2]}"#
        );
    }

    #[test]
    fn idempotent() {
        for input in [
            r#"[ "a", "b" ]"#,
            r#"{ "x": [ 1, 2 ], "y": "a b" }"#,
            r#"[[ 1 ], [ 2, 3 ]]"#,
        ] {
            let once = normalize_json(input);
            assert_eq!(normalize_json(&once), once);
        }
    }

    #[test]
    fn bson_arrays_render_compact() {
        let value = bson!(["a", "b", 1]);
        assert_eq!(bson_to_json(&value), r#"["a","b",1]"#);
    }

    #[test]
    fn bson_documents_render_compact() {
        let value = bson!({ "city": "X", "zip": "10" });
        assert_eq!(bson_to_json(&value), r#"{"city":"X","zip":"10"}"#);
    }
}
