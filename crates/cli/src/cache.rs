use std::collections::BTreeMap;

use colored::Colorize;
use keysub::{
    codec::{self, Value},
    store::{Backend, FileBackend},
};
use tabled::{Table, Tabled, settings::Style};

/// Prints every entry of the `namespace` blob, tags decoded.
pub(crate) fn render(backend: &FileBackend, namespace: &str) -> anyhow::Result<()> {
    let Some(blob) = backend.get_item(namespace)? else {
        println!("No cache for {} in {}", namespace.bold(), backend.dir().display());
        return Ok(());
    };
    let entries: BTreeMap<String, Value> = codec::decode(&blob)?;

    println!("{} {} entries\n", namespace.bold(), entries.len());
    let mut table = Table::new(entries.iter().map(|(key, value)| CacheRow::new(key, value)));
    table.with(Style::sharp());
    println!("{table}");
    Ok(())
}

#[derive(Tabled)]
struct CacheRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl CacheRow {
    fn new(key: &str, value: &Value) -> Self {
        Self { key: key.to_string(), value: describe(value) }
    }
}

/// Compact single-line rendering; big integers and binary stay untagged.
fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(value) => value.to_string(),
        Value::Number(value) => value.to_string(),
        Value::String(value) => format!("{value:?}"),
        Value::BigInt(value) => value.to_string(),
        Value::Binary(value) => value.to_string(),
        Value::Array(items) => format!("[{}]", items.iter().map(describe).collect::<Vec<_>>().join(", ")),
        Value::Object(fields) => format!(
            "{{{}}}",
            fields
                .iter()
                .map(|(name, value)| format!("{name}: {}", describe(value)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_tagged_values_untagged() {
        let value: Value =
            codec::decode(r#"{"free":"bigint:-12","location":"binary:0xbeef","ok":true,"n":[1,"x"]}"#).unwrap();
        assert_eq!(describe(&value), r#"{free: -12, location: 0xbeef, n: [1, "x"], ok: true}"#);
    }

    #[test]
    fn missing_blob_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(render(&FileBackend::new(dir.path()), "balances").is_ok());
    }
}
