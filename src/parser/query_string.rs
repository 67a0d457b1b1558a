use serde_json::{Map, Number, Value};
use url::form_urlencoded;

/// Decode a URL query string with bracketed keys into a nested JSON value.
///
/// `filter[0][medias.event_id][equal][0]=7` becomes
/// `{"filter": {"0": {"medias.event_id": {"equal": {"0": 7}}}}}`. Keys keep
/// their first-appearance order. A repeated key keeps the last value, an empty
/// `[]` segment appends to an array. Values that are canonical numbers decode
/// as numbers, everything else stays a string.
pub fn decode_nested(query: &str) -> Value {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut root = Value::Object(Map::new());

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let Some(path) = split_key(&key) else {
            continue;
        };
        insert(&mut root, &path, decode_scalar(&value));
    }

    root
}

/// `None` marks an append (`[]`) segment
type Segment = Option<String>;

fn split_key(key: &str) -> Option<Vec<Segment>> {
    let (base, mut rest) = match key.find('[') {
        Some(pos) if pos > 0 => (&key[..pos], &key[pos..]),
        Some(_) => return None,
        None if key.is_empty() => return None,
        None => return Some(vec![Some(key.to_string())]),
    };

    let mut path = vec![Some(base.to_string())];
    while let Some(inner) = rest.strip_prefix('[') {
        let Some(end) = inner.find(']') else {
            // Unterminated bracket: keep the whole key as a plain name
            return Some(vec![Some(key.to_string())]);
        };
        let segment = &inner[..end];
        path.push(if segment.is_empty() {
            None
        } else {
            Some(segment.to_string())
        });
        rest = &inner[end + 1..];
    }

    Some(path)
}

fn insert(node: &mut Value, path: &[Segment], value: Value) {
    let Some((head, tail)) = path.split_first() else {
        *node = value;
        return;
    };

    match head {
        Some(key) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                let child = map.entry(key.clone()).or_insert(Value::Null);
                insert(child, tail, value);
            }
        }
        None => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Value::Array(items) = node {
                items.push(Value::Null);
                if let Some(child) = items.last_mut() {
                    insert(child, tail, value);
                }
            }
        }
    }
}

/// Canonical integers and decimals become numbers, anything else stays a
/// string. `05`, `2.50` and `1e3` are not canonical and keep their text.
pub fn decode_scalar(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        if n.to_string() == raw {
            return Value::Number(Number::from(n));
        }
    }
    if raw.contains('.') {
        if let Some(n) = raw
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.to_string() == raw)
            .and_then(Number::from_f64)
        {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}
