//! Test plan types and loading.

mod duration;
mod lint;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use duration::{format_duration, parse_duration, DurationError};
pub use lint::{lint_plan, PlanIssue, PlanReport, Severity};

/// Token in driver commands replaced by the resolved listen port.
pub const PORT_PLACEHOLDER: &str = "%port";

/// One declared expectation for the Nth inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Assertion {
    /// Header name to the exact, ordered list of values the request must carry.
    #[serde(
        rename = "RequiredHeaders",
        alias = "requiredHeaders",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub required_headers: BTreeMap<String, Vec<String>>,

    /// Exact request path. Absent or empty means the path is not checked.
    #[serde(
        rename = "ExpectedPath",
        alias = "expectedPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_path: Option<String>,

    /// Accepted for plan compatibility; never evaluated.
    #[serde(
        rename = "BodyFilter",
        alias = "bodyFilter",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub body_filter: Option<String>,
}

impl Assertion {
    /// The path constraint, if this assertion checks the path at all.
    pub fn path_constraint(&self) -> Option<&str> {
        self.expected_path.as_deref().filter(|p| !p.is_empty())
    }
}

/// The full ordered plan: assertions plus ports, timeout and driver commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TestPlan {
    /// Assertions in required arrival order.
    #[serde(rename = "Tests", alias = "tests", default)]
    pub assertions: Vec<Assertion>,

    /// Port for the intercepting listener (0 = ephemeral)
    #[serde(rename = "ListenPort", alias = "listenPort", default)]
    pub listen_port: u16,

    /// Port of the real server that validated requests are forwarded to
    #[serde(rename = "TargetPort", alias = "targetPort", default)]
    pub target_port: u16,

    #[serde(
        rename = "Timeout",
        alias = "timeout",
        default,
        deserialize_with = "duration::deserialize_timeout",
        serialize_with = "duration::serialize_timeout"
    )]
    pub timeout: Option<Duration>,

    /// Driver commands run in order once the listener is up.
    #[serde(
        rename = "Commands",
        alias = "commands",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub commands: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("failed to read test plan {source_name}: {error}")]
    Io {
        source_name: String,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to parse test plan: {0}")]
    Parse(#[from] serde_json::Error),
}

impl TestPlan {
    /// Load a plan from a file path, or from stdin when the path is `-`.
    pub fn load(path: &str) -> Result<Self, PlanError> {
        if path == "-" {
            Self::from_reader(std::io::stdin().lock())
        } else {
            Self::from_file(path)
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PlanError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|error| PlanError::Io {
            source_name: path.display().to_string(),
            error,
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PlanError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Replace the target port, as the `--tport` flag does.
    pub fn with_target_port(mut self, port: u16) -> Self {
        self.target_port = port;
        self
    }

    pub fn len(&self) -> usize {
        self.assertions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assertions.is_empty()
    }
}

impl std::str::FromStr for TestPlan {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}
