use crate::errors::CompileError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One selector segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    /// `.key`
    Key(String),
    /// `[n]`
    Index(usize),
    /// `[*]`
    Wildcard,
}

/// A parsed `$.`-prefixed selector: dotted keys plus `[index]` / `[*]`
/// steps. Resolution against a document yields zero, one, or many
/// matches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn parse(raw: &str) -> Result<Self, CompileError> {
        let invalid = |reason: &str| CompileError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let rest = raw
            .strip_prefix("$.")
            .ok_or_else(|| invalid("selector must start with '$.'"))?;
        if rest.is_empty() {
            return Err(invalid("selector has no segments"));
        }

        let mut segments = Vec::new();
        let mut chars = rest.chars().peekable();
        let mut key = String::new();

        let flush = |key: &mut String, segments: &mut Vec<Segment>| -> Result<(), CompileError> {
            if key.is_empty() {
                return Err(CompileError::InvalidPath {
                    path: raw.to_string(),
                    reason: "empty key segment".to_string(),
                });
            }
            segments.push(Segment::Key(std::mem::take(key)));
            Ok(())
        };

        // A '.' right after a ']' starts a fresh key rather than
        // separating two keys, so an empty key there is fine.
        let mut after_bracket = false;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if !key.is_empty() {
                        flush(&mut key, &mut segments)?;
                    } else if !after_bracket {
                        return Err(invalid("empty key segment"));
                    }
                    after_bracket = false;
                }
                '[' => {
                    // A bracket may follow a key or another bracket.
                    if !key.is_empty() {
                        flush(&mut key, &mut segments)?;
                    } else if segments.is_empty() {
                        return Err(invalid("bracket before any key"));
                    }
                    let mut inner = String::new();
                    let mut closed = false;
                    for b in chars.by_ref() {
                        if b == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(b);
                    }
                    if !closed {
                        return Err(invalid("unclosed bracket"));
                    }
                    if inner == "*" {
                        segments.push(Segment::Wildcard);
                    } else {
                        let idx: usize = inner
                            .parse()
                            .map_err(|_| invalid("bracket index must be a number or '*'"))?;
                        segments.push(Segment::Index(idx));
                    }
                    after_bracket = true;
                }
                c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => {
                    key.push(c);
                    after_bracket = false;
                }
                other => {
                    return Err(CompileError::InvalidPath {
                        path: raw.to_string(),
                        reason: format!("unexpected character '{other}'"),
                    })
                }
            }
        }
        if !key.is_empty() {
            flush(&mut key, &mut segments)?;
        }
        if segments.is_empty() {
            return Err(invalid("selector has no segments"));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Parameter name derived from the path suffix: non-identifier
    /// characters become underscores (`$.user.name` → `user_name`).
    pub fn param_name(&self) -> String {
        self.raw[2..]
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// All matches of this selector against `doc`, in document order.
    pub fn resolve(&self, doc: &Value) -> Vec<Value> {
        let mut current: Vec<&Value> = vec![doc];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match segment {
                    Segment::Key(k) => {
                        if let Some(v) = value.as_object().and_then(|o| o.get(k)) {
                            next.push(v);
                        }
                    }
                    Segment::Index(i) => {
                        if let Some(v) = value.as_array().and_then(|a| a.get(*i)) {
                            next.push(v);
                        }
                    }
                    Segment::Wildcard => match value {
                        Value::Array(items) => next.extend(items.iter()),
                        Value::Object(map) => next.extend(map.values()),
                        _ => {}
                    },
                }
            }
            current = next;
        }
        current.into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_dotted_keys_and_indices() {
        let path = JsonPath::parse("$.user.items[0]").unwrap();
        assert_eq!(
            path.segments,
            vec![
                Segment::Key("user".into()),
                Segment::Key("items".into()),
                Segment::Index(0)
            ]
        );
    }

    #[test]
    fn rejects_bad_selectors() {
        assert!(JsonPath::parse("user.name").is_err());
        assert!(JsonPath::parse("$.").is_err());
        assert!(JsonPath::parse("$.a..b").is_err());
        assert!(JsonPath::parse("$.a[x]").is_err());
    }

    #[test]
    fn param_name_replaces_non_identifier_chars() {
        assert_eq!(JsonPath::parse("$.user.name").unwrap().param_name(), "user_name");
        assert_eq!(
            JsonPath::parse("$.items[0]").unwrap().param_name(),
            "items_0_"
        );
        assert_eq!(
            JsonPath::parse("$.a-b.c").unwrap().param_name(),
            "a_b_c"
        );
    }

    #[test]
    fn resolves_zero_one_many() {
        let doc = json!({
            "user": {"name": "ada", "items": ["a", "b"]},
            "rows": [{"v": 1}, {"v": 2}]
        });

        let one = JsonPath::parse("$.user.name").unwrap().resolve(&doc);
        assert_eq!(one, vec![json!("ada")]);

        let none = JsonPath::parse("$.user.missing").unwrap().resolve(&doc);
        assert!(none.is_empty());

        let many = JsonPath::parse("$.rows[*].v").unwrap().resolve(&doc);
        assert_eq!(many, vec![json!(1), json!(2)]);

        let indexed = JsonPath::parse("$.user.items[1]").unwrap().resolve(&doc);
        assert_eq!(indexed, vec![json!("b")]);
    }

    #[test]
    fn null_value_is_a_match() {
        let doc = json!({"maybe": null});
        let matches = JsonPath::parse("$.maybe").unwrap().resolve(&doc);
        assert_eq!(matches, vec![Value::Null]);
    }
}
