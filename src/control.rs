// Container control passthrough. Actions go straight to the engine and
// never touch pipeline state; the event stream reports the outcome.

use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::query_parameters::{
    RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Grace period handed to the engine when stopping or restarting.
const STOP_GRACE_SECS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
}

impl ContainerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub action: ContainerAction,
    pub ids: Vec<String>,
}

/// Result of one action on one container; `error` is `null` on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub id: String,
    pub ok: bool,
    pub error: Option<String>,
}

pub async fn apply(
    docker: &Docker,
    id: &str,
    action: ContainerAction,
) -> Result<(), BollardError> {
    info!(container = id, action = action.as_str(), "applying container action");
    match action {
        ContainerAction::Start => {
            docker
                .start_container(id, None::<StartContainerOptions>)
                .await
        }
        ContainerAction::Stop => {
            docker
                .stop_container(
                    id,
                    Some(StopContainerOptions {
                        t: Some(STOP_GRACE_SECS),
                        signal: None,
                    }),
                )
                .await
        }
        ContainerAction::Restart => {
            docker
                .restart_container(
                    id,
                    Some(RestartContainerOptions {
                        t: Some(STOP_GRACE_SECS),
                        signal: None,
                    }),
                )
                .await
        }
    }
}

/// Apply one action to several containers concurrently; each container
/// succeeds or fails on its own.
pub async fn apply_batch(
    docker: &Docker,
    action: ContainerAction,
    ids: &[String],
) -> Vec<ActionOutcome> {
    join_all(ids.iter().map(|id| async move {
        match apply(docker, id, action).await {
            Ok(()) => ActionOutcome {
                id: id.clone(),
                ok: true,
                error: None,
            },
            Err(e) => ActionOutcome {
                id: id.clone(),
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }))
    .await
}

pub fn is_not_found(e: &BollardError) -> bool {
    matches!(
        e,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == 404
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_from_lowercase() {
        let action: ContainerAction = serde_json::from_str("\"restart\"").unwrap();
        assert_eq!(action, ContainerAction::Restart);
        assert!(serde_json::from_str::<ContainerAction>("\"kill\"").is_err());
    }

    #[test]
    fn batch_request_shape() {
        let req: BatchRequest =
            serde_json::from_str(r#"{"action":"stop","ids":["a1","b2"]}"#).unwrap();
        assert_eq!(req.action, ContainerAction::Stop);
        assert_eq!(req.ids, vec!["a1", "b2"]);
    }

    #[test]
    fn outcome_serializes_with_null_error_on_success() {
        let json = serde_json::to_string(&ActionOutcome {
            id: "a1".to_string(),
            ok: true,
            error: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"id":"a1","ok":true,"error":null}"#);
    }

    #[tokio::test]
    async fn unknown_container_reports_not_found() {
        let docker = match Docker::connect_with_unix_defaults() {
            Ok(d) => d,
            Err(_) => return, // Skip when Docker is not available (e.g. CI without Docker)
        };
        if docker.ping().await.is_err() {
            return;
        }
        let err = apply(&docker, "no-such-container-zzz", ContainerAction::Start)
            .await
            .unwrap_err();
        assert!(is_not_found(&err));
    }
}
