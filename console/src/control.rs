use crate::error::SessionError;
use log::{debug, warn};
use shared::{InstanceId, LifecycleResponse, LifecycleTarget};

/// Request/response side of the control plane: start, stop and restart
/// requests for a named instance. No persistent connection is held.
#[allow(async_fn_in_trait)]
pub trait ControlPlane {
    /// Issues one lifecycle request and reports acknowledgement or failure.
    async fn request(
        &mut self,
        instance: &InstanceId,
        target: LifecycleTarget,
    ) -> Result<(), SessionError>;
}

/// HTTP control-plane client (`POST {base}/server/{id}/{start|stop|restart}`).
pub struct ControlPlaneClient {
    base: String,
    http: reqwest::Client,
}

impl ControlPlaneClient {
    pub fn new(base: impl Into<String>) -> Self {
        ControlPlaneClient {
            base: base.into(),
            http: reqwest::Client::new(),
        }
    }
}

impl ControlPlane for ControlPlaneClient {
    async fn request(
        &mut self,
        instance: &InstanceId,
        target: LifecycleTarget,
    ) -> Result<(), SessionError> {
        let url = shared::lifecycle_url(&self.base, instance, target);
        debug!("Lifecycle request: POST {}", url);

        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| SessionError::ControlPlaneFailure(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response
            .json::<LifecycleResponse>()
            .await
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| format!("control plane returned {}", status));
        warn!(
            "Lifecycle request {} for {} rejected: {}",
            target.path(),
            instance,
            message
        );
        Err(SessionError::ControlPlaneFailure(message))
    }
}
