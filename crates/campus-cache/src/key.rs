//! Cache key and cache id construction.

use std::fmt::Display;

use serde_json::Value;

/// Join a namespace and its parts with `:`.
///
/// `build_cache_key("mmaModQuiz", ["attempt", "5"])` gives
/// `"mmaModQuiz:attempt:5"`. Feature code builds prefixes the same way so
/// that [`invalidate_key_prefix`](crate::store::invalidate_key_prefix)
/// can drop every key below a namespace.
pub fn build_cache_key<I>(namespace: &str, parts: I) -> String
where
    I: IntoIterator,
    I::Item: Display,
{
    let mut key = namespace.to_string();
    for part in parts {
        key.push(':');
        key.push_str(&part.to_string());
    }
    key
}

/// Row id of a call: hex BLAKE3 of `method:` plus the parameters serialized
/// with sorted object keys.
pub fn cache_id(method: &str, params: &Value) -> String {
    let mut input = String::with_capacity(method.len() + 64);
    input.push_str(method);
    input.push(':');
    write_canonical(params, &mut input);
    hex::encode(blake3::hash(input.as_bytes()).as_bytes())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_cache_key() {
        assert_eq!(build_cache_key("mmaModQuiz", ["attempt", "5"]), "mmaModQuiz:attempt:5");
        assert_eq!(build_cache_key("mmaModQuiz", [7, 9]), "mmaModQuiz:7:9");
        assert_eq!(build_cache_key("core", Vec::<String>::new()), "core");
    }

    #[test]
    fn test_cache_id_ignores_key_order() {
        let a = cache_id("core_course_get_contents", &json!({"courseid": 4, "options": [{"name": "x", "value": 1}]}));
        let b = cache_id("core_course_get_contents", &json!({"options": [{"value": 1, "name": "x"}], "courseid": 4}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_cache_id_depends_on_method_and_values() {
        let params = json!({"courseid": 4});
        assert_ne!(
            cache_id("core_course_get_contents", &params),
            cache_id("core_course_get_courses", &params)
        );
        assert_ne!(
            cache_id("core_course_get_contents", &params),
            cache_id("core_course_get_contents", &json!({"courseid": 5}))
        );
    }
}
