use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use office_core::AgentFileError;
use serde_json::{json, Value};
use tracing::error;

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<AgentFileError> for ApiError {
    fn from(err: AgentFileError) -> Self {
        let status = match &err {
            AgentFileError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentFileError::EmptyName | AgentFileError::InvalidPatch => StatusCode::BAD_REQUEST,
            _ => {
                error!(event = "api_error", error = %err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "office-bridge" }))
}

pub async fn list_agents(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let agents = state.files.list()?;
    Ok(Json(json!({ "agents": agents })))
}

pub async fn create_agent(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let field = |key: &str| body.get(key).and_then(Value::as_str);
    let Some(name) = field("name").filter(|name| !name.trim().is_empty()) else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Missing required field: name",
        ));
    };
    let agent = state.files.create(name, field("team"), field("task"))?;
    Ok((StatusCode::CREATED, Json(json!({ "agent": agent }))))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    match state.files.get(&name)? {
        Some(agent) => Ok(Json(json!({ "agent": agent }))),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "Agent not found")),
    }
}

pub async fn update_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(patch): Json<Value>,
) -> ApiResult<Json<Value>> {
    let agent = state.files.update(&name, &patch)?;
    Ok(Json(json!({ "agent": agent })))
}

pub async fn delete_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.files.remove(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayConfig;
    use office_core::{AgentFiles, EventHub};
    use std::time::Duration;

    fn state(dir: &std::path::Path) -> AppState {
        AppState {
            hub: EventHub::default(),
            files: AgentFiles::new(dir),
            relay: RelayConfig {
                ping_interval: Duration::ZERO,
                write_timeout: Duration::from_secs(1),
            },
        }
    }

    #[tokio::test]
    async fn create_then_fetch_then_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());

        let (status, Json(body)) = create_agent(
            State(state.clone()),
            Json(json!({"name": "Code Bot", "team": "Design"})),
        )
        .await
        .ok()
        .expect("created");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["agent"]["team"], "design");

        let Json(body) = get_agent(State(state.clone()), Path("Code Bot".to_string()))
            .await
            .ok()
            .expect("found");
        assert_eq!(body["agent"]["id"], "code-bot");

        let Json(body) = list_agents(State(state.clone())).await.ok().expect("listed");
        assert_eq!(body["agents"].as_array().map(Vec::len), Some(1));

        let status = delete_agent(State(state.clone()), Path("Code Bot".to_string()))
            .await
            .ok()
            .expect("deleted");
        assert_eq!(status, StatusCode::NO_CONTENT);
        let missing = get_agent(State(state), Path("Code Bot".to_string())).await;
        assert_eq!(missing.err().map(|err| err.status), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn bad_requests_map_to_client_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());

        let missing_name = create_agent(State(state.clone()), Json(json!({"team": "qa"}))).await;
        assert_eq!(
            missing_name.err().map(|err| err.status),
            Some(StatusCode::BAD_REQUEST)
        );

        let unknown = update_agent(
            State(state.clone()),
            Path("ghost".to_string()),
            Json(json!({"state": "idle"})),
        )
        .await;
        assert_eq!(unknown.err().map(|err| err.status), Some(StatusCode::NOT_FOUND));

        state.files.create("alice", None, None).expect("create");
        let not_object = update_agent(
            State(state),
            Path("alice".to_string()),
            Json(json!("idle")),
        )
        .await;
        assert_eq!(
            not_object.err().map(|err| err.status),
            Some(StatusCode::BAD_REQUEST)
        );
    }

    #[tokio::test]
    async fn patch_changes_state_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());
        state.files.create("alice", None, None).expect("create");

        let Json(body) = update_agent(
            State(state.clone()),
            Path("alice".to_string()),
            Json(json!({"state": "talking", "currentFile": "src/main.rs"})),
        )
        .await
        .ok()
        .expect("updated");
        assert_eq!(body["agent"]["state"], "talking");

        let parsed = office_core::parse_agent_file(&state.files.path_for("alice")).expect("parse");
        assert_eq!(parsed.current_file.as_deref(), Some("src/main.rs"));
        assert_eq!(health().await.0["service"], "office-bridge");
    }
}
