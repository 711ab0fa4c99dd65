use serde_json::{Map, Value};

/// Director metadata for a VM.
pub type VmMetadata = Map<String, Value>;

fn tag_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-' | '.' | ':')
}

/// SoftLayer tag list for `metadata`: `key: value` entries joined by commas.
///
/// Characters SoftLayer rejects are dropped and `:` inside values becomes `-`.
#[must_use]
pub fn format_tags(metadata: &VmMetadata) -> String {
    let mut entries: Vec<_> = metadata.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            let key: String = key.chars().filter(|&c| tag_safe(c)).collect();
            let value: String = value
                .chars()
                .filter(|&c| tag_safe(c))
                .map(|c| if c == ':' { '-' } else { c })
                .collect();
            format!("{key}: {value}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: Value) -> VmMetadata {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_format_tags() {
        let tags = format_tags(&metadata(json!({
            "deployment": "cf",
            "job": "router_z1",
            "index": 0,
            "director": "bosh/director:1"
        })));
        assert_eq!(
            tags,
            "deployment: cf, director: boshdirector-1, index: 0, job: router_z1"
        );
    }

    #[test]
    fn test_format_tags_strips_unsafe_characters() {
        let tags = format_tags(&metadata(json!({"na$me": "v@lue!"})));
        assert_eq!(tags, "name: vlue");
    }

    #[test]
    fn test_format_tags_empty() {
        assert_eq!(format_tags(&VmMetadata::new()), "");
    }
}
