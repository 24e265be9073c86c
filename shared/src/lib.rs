use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_INSTANCE_ID_LEN: usize = 64;
pub const MAX_COMMAND_LEN: usize = 2048;

/// Stable identifier of a managed server instance.
///
/// Instance ids appear in URLs on both the control-plane and console routes,
/// so only URL-safe characters are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidInstanceId> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_INSTANCE_ID_LEN {
            return Err(InvalidInstanceId(id));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(InvalidInstanceId(id));
        }
        Ok(InstanceId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InstanceId {
    type Err = InvalidInstanceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstanceId::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInstanceId(pub String);

impl fmt::Display for InvalidInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid instance id: {:?}", self.0)
    }
}

impl std::error::Error for InvalidInstanceId {}

/// Run state of an instance as last reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
    Restarting,
}

impl LifecycleState {
    /// Whether a console socket should exist while the instance is in this state.
    pub fn socket_desired(&self) -> bool {
        matches!(
            self,
            LifecycleState::Starting | LifecycleState::Running | LifecycleState::Restarting
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Unknown => "unknown",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Restarting => "restarting",
        };
        f.write_str(s)
    }
}

/// A lifecycle transition requested through the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleTarget {
    Start,
    Stop,
    Restart,
}

impl LifecycleTarget {
    /// Path segment on the control-plane route.
    pub fn path(&self) -> &'static str {
        match self {
            LifecycleTarget::Start => "start",
            LifecycleTarget::Stop => "stop",
            LifecycleTarget::Restart => "restart",
        }
    }

    /// State the instance enters once this request is acknowledged.
    pub fn acknowledged_state(&self) -> LifecycleState {
        match self {
            LifecycleTarget::Start => LifecycleState::Starting,
            LifecycleTarget::Stop => LifecycleState::Stopping,
            LifecycleTarget::Restart => LifecycleState::Restarting,
        }
    }
}

/// One received console line, as exposed to the view layer.
///
/// `sequence` is monotonic within a socket generation and resets to 0 when
/// the generation changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub sequence: u64,
    pub generation: u32,
    pub text: String,
}

/// JSON body returned by every control-plane lifecycle route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LifecycleResponse {
    pub fn ok() -> Self {
        LifecycleResponse {
            success: true,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        LifecycleResponse {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Builds the control-plane URL for a lifecycle request.
pub fn lifecycle_url(base: &str, id: &InstanceId, target: LifecycleTarget) -> String {
    format!(
        "{}/server/{}/{}",
        base.trim_end_matches('/'),
        id,
        target.path()
    )
}

/// Builds the console WebSocket URL for an instance.
///
/// Accepts an http(s) base and rewrites the scheme, mirroring how a browser
/// client derives ws URLs from its page location.
pub fn console_url(base: &str, id: &InstanceId) -> String {
    let base = base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/server/{}", base, id)
}
