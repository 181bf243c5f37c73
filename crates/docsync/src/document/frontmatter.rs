//! YAML front-matter handling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A front-matter value: a scalar or an array of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<MetaValue>),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Renders scalars as text (`version: 2` and `version: "2"` read the same).
    pub fn to_text(&self) -> Option<String> {
        match self {
            MetaValue::String(s) => Some(s.clone()),
            MetaValue::Integer(i) => Some(i.to_string()),
            MetaValue::Float(f) => Some(f.to_string()),
            MetaValue::Bool(b) => Some(b.to_string()),
            MetaValue::Null | MetaValue::List(_) => None,
        }
    }

    /// Flattens a string or list of strings.
    pub fn to_string_list(&self) -> Vec<String> {
        match self {
            MetaValue::List(items) => items.iter().filter_map(MetaValue::to_text).collect(),
            other => other.to_text().into_iter().collect(),
        }
    }

    fn from_yaml(value: serde_yaml::Value) -> Self {
        use serde_yaml::Value;
        match value {
            Value::Null => MetaValue::Null,
            Value::Bool(b) => MetaValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Integer(i),
                None => MetaValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => MetaValue::String(s),
            Value::Sequence(items) => {
                MetaValue::List(items.into_iter().map(MetaValue::from_yaml).collect())
            }
            Value::Tagged(tagged) => MetaValue::from_yaml(tagged.value),
            // Nested mappings are kept as their YAML text.
            mapping @ Value::Mapping(_) => MetaValue::String(
                serde_yaml::to_string(&mapping)
                    .unwrap_or_default()
                    .trim_end()
                    .to_string(),
            ),
        }
    }
}

/// Parsed front-matter: field name to value, ordered by name.
pub type FrontMatter = BTreeMap<String, MetaValue>;

const DELIMITER: &str = "---";

/// Splits `content` into its front-matter and body.
///
/// Content without a leading `---` block, or with a block that is not a YAML
/// mapping, yields an empty front-matter and the content unchanged.
pub fn extract(content: &str) -> (FrontMatter, &str) {
    let Some((yaml, body)) = split_block(content) else {
        return (FrontMatter::new(), content);
    };

    match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
        Ok(serde_yaml::Value::Mapping(map)) => {
            let fields = map
                .into_iter()
                .filter_map(|(k, v)| match k {
                    serde_yaml::Value::String(key) => Some((key, MetaValue::from_yaml(v))),
                    _ => None,
                })
                .collect();
            (fields, body)
        }
        Ok(serde_yaml::Value::Null) => (FrontMatter::new(), body),
        Ok(_) => {
            log::warn!("Front-matter is not a mapping; treating document as plain body");
            (FrontMatter::new(), content)
        }
        Err(e) => {
            log::warn!("Failed to parse front-matter: {}", e);
            (FrontMatter::new(), content)
        }
    }
}

/// Joins front-matter and body back into a document.
pub fn combine(front_matter: &FrontMatter, body: &str) -> String {
    if front_matter.is_empty() {
        return body.to_string();
    }
    let yaml = serde_yaml::to_string(front_matter).unwrap_or_default();
    format!("{DELIMITER}\n{}{DELIMITER}\n{}", yaml, body)
}

fn split_block(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}
