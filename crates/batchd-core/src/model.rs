//! Node, Batch, Experiment and Action type definitions
//!
//! Field names follow the document layout of the persistence store
//! (`nodeName`, `experimentId`, `protectedKeysVoided`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Connectivity state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Online,
    Offline,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Online => write!(f, "online"),
            NodeState::Offline => write!(f, "offline"),
        }
    }
}

/// A fleet member with fixed RAM capacity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node name
    #[serde(rename = "nodeName")]
    pub name: String,
    /// Current connectivity state
    pub state: NodeState,
    /// Total RAM in MiB
    pub ram: u64,
}

impl Node {
    /// Create a node record
    pub fn new(name: impl Into<String>, state: NodeState, ram: u64) -> Self {
        Self {
            name: name.into(),
            state,
            ram,
        }
    }
}

/// Lifecycle state of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Registered,
    Processing,
    Succeeded,
    Failed,
    Cancelled,
}

impl BatchState {
    /// States a batch never leaves
    pub const TERMINAL: [BatchState; 3] = [
        BatchState::Succeeded,
        BatchState::Failed,
        BatchState::Cancelled,
    ];

    /// Whether the batch has finished for good
    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchState::Registered => write!(f, "registered"),
            BatchState::Processing => write!(f, "processing"),
            BatchState::Succeeded => write!(f, "succeeded"),
            BatchState::Failed => write!(f, "failed"),
            BatchState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One entry of a batch's state history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub state: BatchState,
    pub time: DateTime<Utc>,
    pub node: Option<String>,
}

/// One submitted container-execution unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Unique batch identifier
    pub id: String,
    /// Owning experiment
    pub experiment_id: String,
    /// Current lifecycle state
    pub state: BatchState,
    /// Node the batch was placed on, once scheduled
    #[serde(default)]
    pub node: Option<String>,
    /// Submission time, defines FIFO order
    pub registration_time: DateTime<Utc>,
    /// State transitions
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Number of times the batch was scheduled
    #[serde(default)]
    pub attempts: u32,
    /// Whether sensitive values in this document were redacted
    #[serde(default)]
    pub protected_keys_voided: bool,
    /// Submitted payload (input connectors, result connectors, ...)
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Batch {
    /// Create a freshly registered batch
    pub fn new(experiment_id: impl Into<String>, registration_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            experiment_id: experiment_id.into(),
            state: BatchState::Registered,
            node: None,
            registration_time,
            history: vec![HistoryEntry {
                state: BatchState::Registered,
                time: registration_time,
                node: None,
            }],
            attempts: 0,
            protected_keys_voided: false,
            payload: Map::new(),
        }
    }

    /// Override the generated identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach a top-level payload field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

/// Registry credentials for an image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageAuth {
    pub username: String,
    pub password: String,
}

/// Container image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSettings {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ImageAuth>,
}

/// Container resource and image settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSettings {
    /// Required RAM in MiB
    pub ram: u64,
    pub image: ImageSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSection {
    pub settings: ContainerSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_pull: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default)]
    pub settings: ExecutionSettings,
}

/// Parent definition shared by one or more batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub container: ContainerSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub protected_keys_voided: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Experiment {
    /// Create an experiment running `image_url` with a RAM requirement
    pub fn new(id: impl Into<String>, image_url: impl Into<String>, ram: u64) -> Self {
        Self {
            id: id.into(),
            container: ContainerSection {
                settings: ContainerSettings {
                    ram,
                    image: ImageSettings {
                        url: image_url.into(),
                        auth: None,
                    },
                },
            },
            execution: ExecutionSection::default(),
            protected_keys_voided: false,
            payload: Map::new(),
        }
    }

    /// Set registry credentials
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.container.settings.image.auth = Some(ImageAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Skip image pulls for this experiment's batches
    pub fn with_pull_disabled(mut self) -> Self {
        self.execution.settings.disable_pull = Some(true);
        self
    }

    /// RAM requirement in MiB
    pub fn ram(&self) -> u64 {
        self.container.settings.ram
    }

    pub fn image_url(&self) -> &str {
        &self.container.settings.image.url
    }

    pub fn image_auth(&self) -> Option<&ImageAuth> {
        self.container.settings.image.auth.as_ref()
    }

    /// Whether nodes must not pull the image before running
    pub fn pull_disabled(&self) -> bool {
        self.execution.settings.disable_pull.unwrap_or(false)
    }
}

/// Message sent to a node agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Remove finished containers and stale images
    CleanUp,
    /// Pull an image needed by the listed batches
    PullImage {
        url: String,
        required_by: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<ImageAuth>,
    },
    /// Start the container of a scheduled batch
    RunBatchContainer { batch_id: String },
}

impl Action {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Action::CleanUp => "clean_up",
            Action::PullImage { .. } => "pull_image",
            Action::RunBatchContainer { .. } => "run_batch_container",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_new() {
        let now = Utc::now();
        let batch = Batch::new("exp-1", now);
        assert_eq!(batch.experiment_id, "exp-1");
        assert_eq!(batch.state, BatchState::Registered);
        assert_eq!(batch.attempts, 0);
        assert!(batch.node.is_none());
        assert_eq!(batch.history.len(), 1);
        assert!(!batch.protected_keys_voided);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BatchState::Registered.is_terminal());
        assert!(!BatchState::Processing.is_terminal());
        assert!(BatchState::Succeeded.is_terminal());
        assert!(BatchState::Failed.is_terminal());
        assert!(BatchState::Cancelled.is_terminal());
    }

    #[test]
    fn test_batch_document_layout() {
        let batch = Batch::new("exp-1", Utc::now())
            .with_id("b1")
            .with_field("inputs", json!({"a": {"access": {"password": "x"}}}));
        let doc = serde_json::to_value(&batch).unwrap();

        assert_eq!(doc["experimentId"], "exp-1");
        assert_eq!(doc["state"], "registered");
        assert_eq!(doc["protectedKeysVoided"], false);
        assert_eq!(doc["inputs"]["a"]["access"]["password"], "x");
    }

    #[test]
    fn test_experiment_from_document() {
        let doc = json!({
            "id": "exp-1",
            "container": {
                "settings": {
                    "ram": 512,
                    "image": {"url": "docker.io/app:1", "auth": {"username": "u", "password": "p"}}
                }
            },
            "execution": {"settings": {"disablePull": true}},
            "protectedKeysVoided": false,
            "description": "kept"
        });
        let experiment: Experiment = serde_json::from_value(doc).unwrap();

        assert_eq!(experiment.ram(), 512);
        assert_eq!(experiment.image_url(), "docker.io/app:1");
        assert_eq!(experiment.image_auth().unwrap().username, "u");
        assert!(experiment.pull_disabled());
        assert_eq!(experiment.payload["description"], "kept");
    }

    #[test]
    fn test_experiment_defaults_allow_pull() {
        let experiment = Experiment::new("exp-1", "img", 128);
        assert!(!experiment.pull_disabled());
        assert!(experiment.image_auth().is_none());
    }

    #[test]
    fn test_action_wire_format() {
        let pull = Action::PullImage {
            url: "img".to_string(),
            required_by: vec!["b1".to_string()],
            auth: None,
        };
        assert_eq!(
            serde_json::to_value(&pull).unwrap(),
            json!({"action": "pull_image", "url": "img", "required_by": ["b1"]})
        );
        assert_eq!(
            serde_json::to_value(&Action::CleanUp).unwrap(),
            json!({"action": "clean_up"})
        );
        assert_eq!(
            serde_json::to_value(&Action::RunBatchContainer {
                batch_id: "b1".to_string()
            })
            .unwrap(),
            json!({"action": "run_batch_container", "batch_id": "b1"})
        );
    }

    #[test]
    fn test_node_state_display() {
        assert_eq!(NodeState::Online.to_string(), "online");
        assert_eq!(BatchState::Cancelled.to_string(), "cancelled");
    }
}
