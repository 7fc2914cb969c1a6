//! State file structures for persisting applied resource attributes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use strata_core::value::Outputs;

/// Last known attributes of one resource, by attribute name
pub type ResourceAttributes = BTreeMap<String, serde_json::Value>;

/// The state record persisted by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of Strata that last modified this state
    pub strata_version: String,
    /// Resolved attributes keyed by fully qualified resource path
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceAttributes>,
}

impl StateFile {
    /// Current state file format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create a new empty state file
    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    /// Create a new state file with a specific lineage
    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            strata_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: BTreeMap::new(),
        }
    }

    /// Parse a state file, rejecting formats newer than this build understands
    pub fn from_json(bytes: &[u8]) -> Result<Self, String> {
        let state: StateFile =
            serde_json::from_slice(bytes).map_err(|e| format!("Failed to parse state: {}", e))?;
        if state.version > Self::CURRENT_VERSION {
            return Err(format!(
                "State format version {} is newer than supported version {}",
                state.version,
                Self::CURRENT_VERSION
            ));
        }
        Ok(state)
    }

    /// Increment serial and update the writer version for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.strata_version = env!("CARGO_PKG_VERSION").to_string();
    }

    pub fn get_resource(&self, path: &str) -> Option<&ResourceAttributes> {
        self.resources.get(path)
    }

    /// Add or replace the recorded attributes of a resource
    pub fn upsert_resource(&mut self, path: impl Into<String>, attributes: ResourceAttributes) {
        self.resources.insert(path.into(), attributes);
    }

    pub fn remove_resource(&mut self, path: &str) -> Option<ResourceAttributes> {
        self.resources.remove(path)
    }

    /// Tracked resource paths in ascending order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Recorded attributes in the shape deferred values resolve against
    pub fn to_outputs(&self) -> Outputs {
        self.resources
            .iter()
            .map(|(path, attrs)| {
                (
                    path.clone(),
                    attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                )
            })
            .collect()
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket_attributes(region: &str) -> ResourceAttributes {
        [
            ("arn".to_string(), json!("arn:aws:s3:::example.com")),
            ("region".to_string(), json!(region)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_state_file_new() {
        let state = StateFile::new();
        assert_eq!(state.version, StateFile::CURRENT_VERSION);
        assert_eq!(state.serial, 0);
        assert!(!state.lineage.is_empty());
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_state_file_increment_serial() {
        let mut state = StateFile::new();
        state.increment_serial();
        state.increment_serial();
        assert_eq!(state.serial, 2);
    }

    #[test]
    fn test_upsert_and_remove_resource() {
        let mut state = StateFile::new();
        state.upsert_resource("site/bucket", bucket_attributes("us-east-1"));
        state.upsert_resource("site/bucket", bucket_attributes("eu-west-1"));

        assert_eq!(state.resources.len(), 1);
        assert_eq!(
            state.get_resource("site/bucket").unwrap().get("region"),
            Some(&json!("eu-west-1"))
        );

        assert!(state.remove_resource("site/bucket").is_some());
        assert!(state.remove_resource("site/bucket").is_none());
    }

    #[test]
    fn test_state_file_wire_format() {
        let mut state = StateFile::with_lineage("lineage-1".to_string());
        state.upsert_resource("site/bucket", bucket_attributes("us-east-1"));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["version"], json!(1));
        assert_eq!(json["lineage"], json!("lineage-1"));
        assert_eq!(
            json["resources"]["site/bucket"]["arn"],
            json!("arn:aws:s3:::example.com")
        );

        let parsed = StateFile::from_json(&serde_json::to_vec(&state).unwrap()).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_newer_format_is_rejected() {
        let mut state = StateFile::new();
        state.version = StateFile::CURRENT_VERSION + 1;
        let bytes = serde_json::to_vec(&state).unwrap();
        assert!(StateFile::from_json(&bytes).is_err());
        assert!(StateFile::from_json(b"{ not json").is_err());
    }

    #[test]
    fn test_to_outputs() {
        let mut state = StateFile::new();
        state.upsert_resource("site/bucket", bucket_attributes("us-east-1"));
        let outputs = state.to_outputs();
        assert_eq!(
            outputs["site/bucket"]["arn"],
            json!("arn:aws:s3:::example.com")
        );
    }
}
