//! Key normalisation for configuration sources.
//!
//! Settings files use `QueueName`, environment variables `QUEUE_NAME`. Every
//! source is wrapped in [`Normalized`] so both spellings land on one key
//! (`queuename`) before the layers are merged; later layers then override
//! earlier ones key by key.

use config::{ConfigError, Map, Source, Value, ValueKind};

/// A configuration source whose keys are lowercased with `_` and `-` removed.
#[derive(Debug, Clone)]
pub struct Normalized<S>(pub S);

impl<S> Source for Normalized<S>
where
    S: Source + Clone + Send + Sync + 'static,
{
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        Ok(normalize_table(self.0.collect()?))
    }
}

/// Canonical form of a single key segment.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn normalize_table(table: Map<String, Value>) -> Map<String, Value> {
    table
        .into_iter()
        .map(|(key, value)| (normalize_key(&key), normalize_value(value)))
        .collect()
}

fn normalize_value(mut value: Value) -> Value {
    value.kind = match std::mem::replace(&mut value.kind, ValueKind::Nil) {
        ValueKind::Table(table) => ValueKind::Table(normalize_table(table)),
        ValueKind::Array(items) => ValueKind::Array(items.into_iter().map(normalize_value).collect()),
        other => other,
    };
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_and_environment_spellings_agree() {
        assert_eq!(normalize_key("QueueName"), "queuename");
        assert_eq!(normalize_key("queue_name"), "queuename");
        assert_eq!(normalize_key("RabbitMQ"), "rabbitmq");
        assert_eq!(normalize_key("connect-max-attempts"), "connectmaxattempts");
    }

    #[test]
    fn nested_tables_are_normalized() {
        let mut inner = Map::new();
        inner.insert("QueueName".to_string(), Value::new(None, "orders"));
        let mut outer = Map::new();
        outer.insert("RabbitMQ".to_string(), Value::new(None, ValueKind::Table(inner)));

        let normalized = normalize_table(outer);

        let section = normalized["rabbitmq"].clone().into_table().unwrap();
        assert_eq!(
            section["queuename"].clone().into_string().unwrap(),
            "orders"
        );
    }
}
