/*
The shared state store.

Collectors all over the device publish their latest readings as JSON
sections (`sys-misc`, `modem`, `gnss-pos`, ...) into the store, consumers
such as the cloud reporter read a snapshot of all sections at once. The store
only keeps the latest value per section, there is no history.
*/

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, trace};

pub mod sections;

/// Name of the section holding monotonic maximums of selected readings
pub const WATERMARK_SECTION: &str = "watermark";

/// Read/write access to the shared state store
///
/// Components receive the store as an injected handle, typically an
/// `Arc<dyn StateStore>`. Implementations must be safe to use from any
/// thread since collectors and consumers run concurrently.
pub trait StateStore: Send + Sync {
    /// Return a copy of all sections
    fn get_all(&self) -> Snapshot;

    /// Return a copy of a single section if it exists
    fn get_section(&self, section: &str) -> Option<Value>;

    /// Replace the value of a section
    fn publish(&self, section: &str, value: Value);

    /// Remove a section
    fn remove(&self, section: &str);
}

/// A point-in-time copy of the state store
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Snapshot(HashMap<String, Value>);

impl Snapshot {
    pub fn get(&self, section: &str) -> Option<&Value> {
        self.0.get(section)
    }

    pub fn contains(&self, section: &str) -> bool {
        self.0.contains_key(section)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode a section into one of the typed views in [sections]
    ///
    /// Returns `None` if the section does not exist or has an unexpected
    /// shape, readers should treat both cases as missing data.
    pub fn section<T: DeserializeOwned>(&self, section: &str) -> Option<T> {
        let value = self.0.get(section)?;
        match serde_json::from_value(value.clone()) {
            Ok(view) => Some(view),
            Err(e) => {
                trace!("ignoring malformed section {section}: {e}");
                None
            }
        }
    }
}

impl From<HashMap<String, Value>> for Snapshot {
    fn from(sections: HashMap<String, Value>) -> Self {
        Self(sections)
    }
}

impl From<Value> for Snapshot {
    /// Build a snapshot from a JSON object, any other value yields an
    /// empty snapshot
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map.into_iter().collect()),
            _ => Self::default(),
        }
    }
}

/// In-memory state store
#[derive(Debug, Default)]
pub struct Model {
    data: RwLock<HashMap<String, Value>>,
}

impl Model {
    pub fn new() -> Self {
        let mut data = HashMap::new();
        data.insert(WATERMARK_SECTION.to_owned(), Value::Object(Map::new()));
        Self {
            data: RwLock::new(data),
        }
    }
}

/// Sections whose listed numeric fields are tracked as watermarks
const WATERMARKS: &[(&str, &str)] = &[("modem", "bearer-uptime")];

fn update_watermark(data: &mut HashMap<String, Value>, topic: &str, value: f64) {
    let watermarks = data
        .entry(WATERMARK_SECTION.to_owned())
        .or_insert_with(|| Value::Object(Map::new()));

    if !watermarks.is_object() {
        *watermarks = Value::Object(Map::new());
    }

    if let Some(watermarks) = watermarks.as_object_mut() {
        let current = watermarks.get(topic).and_then(Value::as_f64);
        if current.is_none_or(|current| value > current) {
            debug!("new watermark for {topic} = {value}");
            watermarks.insert(topic.to_owned(), Value::from(value));
        }
    }
}

impl StateStore for Model {
    fn get_all(&self) -> Snapshot {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Snapshot(data.clone())
    }

    fn get_section(&self, section: &str) -> Option<Value> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(section).cloned()
    }

    fn publish(&self, section: &str, value: Value) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);

        for (origin, topic) in WATERMARKS {
            if *origin == section
                && let Some(reading) = value.get(*topic).and_then(Value::as_f64)
            {
                update_watermark(&mut data, topic, reading);
            }
        }

        data.insert(section.to_owned(), value);
    }

    fn remove(&self, section: &str) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.remove(section);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn it_publishes_and_reads_sections() {
        let model = Model::new();
        model.publish("link", json!({"delay": 0.05}));

        assert_eq!(model.get_section("link"), Some(json!({"delay": 0.05})));
        assert_eq!(model.get_section("modem"), None);

        let snapshot = model.get_all();
        assert!(snapshot.contains("link"));
        assert!(snapshot.contains(WATERMARK_SECTION));
    }

    #[test]
    fn it_removes_sections() {
        let model = Model::new();
        model.publish("things", json!({"state": "sending"}));
        model.remove("things");
        assert_eq!(model.get_section("things"), None);
    }

    #[test]
    fn it_tracks_the_bearer_uptime_watermark() {
        let model = Model::new();
        model.publish("modem", json!({"bearer-uptime": 100}));
        model.publish("modem", json!({"bearer-uptime": 300}));
        model.publish("modem", json!({"bearer-uptime": 20}));
        model.publish("modem", json!({"state": "registered"}));

        assert_eq!(
            model.get_section(WATERMARK_SECTION),
            Some(json!({"bearer-uptime": 300.0}))
        );
    }

    #[test]
    fn snapshots_are_not_affected_by_later_publishes() {
        let model = Model::new();
        model.publish("link", json!({"delay": 0.05}));
        let snapshot = model.get_all();
        model.publish("link", json!({"delay": 0.5}));

        assert_eq!(snapshot.get("link"), Some(&json!({"delay": 0.05})));
    }

    #[test]
    fn it_supports_concurrent_publishers() {
        let model = Arc::new(Model::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let model = Arc::clone(&model);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        model.publish(&format!("section-{i}"), json!({"value": j}));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = model.get_all();
        for i in 0..8 {
            assert_eq!(
                snapshot.get(&format!("section-{i}")),
                Some(&json!({"value": 99}))
            );
        }
    }

    #[test]
    fn it_builds_snapshots_from_json_objects() {
        let snapshot = Snapshot::from(json!({"link": {"delay": 0.1}}));
        assert_eq!(snapshot.len(), 1);
        assert!(Snapshot::from(json!([1, 2])).is_empty());
    }
}
