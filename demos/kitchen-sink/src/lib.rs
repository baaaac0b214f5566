//! Kitchen-sink wirebridge example: unary commands, a blocking command, a
//! push stream, recursive types and a chat socket in one registry.

pub mod chat;
pub mod tasks;
pub mod users;
pub mod weather;

use wirebridge_core::{BuildError, Registry};

/// State shared by the handlers. Survives registry reloads.
#[derive(Debug, Clone)]
pub struct AppState {
    pub users: users::Users,
    pub tasks: tasks::Tasks,
    pub room: chat::Room,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            users: users::Users::seeded(),
            tasks: tasks::Tasks::new(),
            room: chat::Room::new(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn registry(state: &AppState) -> Result<Registry, BuildError> {
    let builder = Registry::builder();
    let builder = users::register(builder, &state.users);
    let builder = tasks::register(builder, &state.tasks);
    let builder = weather::register(builder);
    builder.socket(chat::socket(&state.room)).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::{Value, json};
    use wirebridge_core::codegen;
    use wirebridge_core::{ChannelManager, ChannelMessage, Dispatcher, ErrorCode, RegistryHandle};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(RegistryHandle::new(registry(&AppState::new()).unwrap()))
    }

    #[tokio::test]
    async fn users_roundtrip() {
        let dispatcher = dispatcher();

        let user = dispatcher.call("get_user", json!({ "userId": 1 })).await.unwrap();
        assert_eq!(user["name"], "Ada Lovelace");

        let active = dispatcher
            .call("list_users", json!({ "activeOnly": true }))
            .await
            .unwrap();
        assert_eq!(active.as_array().unwrap().len(), 1);

        let created = dispatcher
            .call("create_user", json!({ "name": "Grace", "email": "grace@example.com" }))
            .await
            .unwrap();
        assert_eq!(created["id"], 3);

        let err = dispatcher
            .call("create_user", json!({ "name": "Grace", "email": "nope" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);

        let err = dispatcher.call("get_user", json!({ "userId": 99 })).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Custom("NOT_FOUND".into()));
    }

    #[tokio::test]
    async fn nested_tasks() {
        let dispatcher = dispatcher();

        let root = dispatcher
            .call("create_task", json!({ "title": "Ship it" }))
            .await
            .unwrap();
        let child = dispatcher
            .call(
                "create_task",
                json!({ "title": "Write docs", "parentId": root["id"], "tags": ["docs"] }),
            )
            .await
            .unwrap();
        assert_eq!(child["status"], "todo");

        dispatcher
            .call(
                "update_task_status",
                json!({ "taskId": child["id"], "status": "in_progress" }),
            )
            .await
            .unwrap();

        let tasks = dispatcher.call("list_tasks", Value::Null).await.unwrap();
        assert_eq!(tasks[0]["subtasks"][0]["status"], "in_progress");
        assert_eq!(tasks[0]["subtasks"][0]["tags"], json!(["docs"]));
        assert!(tasks[0].get("tags").is_none());

        let done = dispatcher
            .call("list_tasks", json!({ "status": "done" }))
            .await
            .unwrap();
        assert_eq!(done, json!([]));

        let err = dispatcher
            .call("update_task_status", json!({ "taskId": root["id"], "status": "archived" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn forecast_runs_on_blocking_pool() {
        let dispatcher = dispatcher();
        let forecast = dispatcher
            .call("get_forecast", json!({ "city": "Oslo" }))
            .await
            .unwrap();
        assert_eq!(forecast.as_array().unwrap().len(), 3);
        assert_eq!(forecast[0], serde_json::to_value(weather::reading("Oslo", 0)).unwrap());

        let err = dispatcher
            .call("get_forecast", json!({ "city": "Oslo", "days": 0 }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn weather_updates_stream_and_close() {
        let registry = RegistryHandle::new(registry(&AppState::new()).unwrap());
        let channels = ChannelManager::new(registry);
        let id = channels
            .create(
                "weather_updates",
                json!({ "city": "Oslo", "intervalMs": 1, "count": 2 }),
            )
            .unwrap();
        let messages: Vec<_> = channels.attach(id).unwrap().into_stream().collect().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].payload()["sequence"], 1);
        assert_eq!(messages[2], ChannelMessage::Close);
    }

    #[test]
    fn generates_typescript_client() {
        let api = codegen::generate(&registry(&AppState::new()).unwrap())
            .unwrap()
            .api;
        assert!(api.contains("export type TaskStatus = \"todo\" | \"in_progress\" | \"done\";"));
        assert!(api.contains("subtasks: Task[];"));
        assert!(api.contains("export function weatherUpdates("));
        assert!(api.contains("export function chat(): BridgeSocket<ChatServerEvents, ChatClientEvents>"));
    }
}
