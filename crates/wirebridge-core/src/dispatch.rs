//! Unary command dispatch.

use crate::error::{BridgeError, ErrorCode};
use crate::naming::to_transport_case;
use crate::registry::{Args, Command, CommandKind, Handler, RegistryHandle};
use crate::schema::Definitions;
use crate::validate::validate;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;

/// Routes unary calls to their handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: RegistryHandle,
}

impl Dispatcher {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Invoke `name` with an argument object.
    ///
    /// Returns the transport-case result, or the error envelope to send back.
    /// Nothing a handler does, panics included, escapes as anything but a
    /// [`BridgeError`].
    pub async fn call(&self, name: &str, payload: Value) -> Result<Value, BridgeError> {
        let registry = self.registry.snapshot();
        let command = registry.lookup(name)?.clone();
        let Some(Handler::Unary(handler)) = command.handler_ref().cloned() else {
            return Err(BridgeError::invalid_argument(format!(
                "Command '{name}' is a stream; open a channel instead"
            )));
        };
        let args = prepare_args(registry.definitions(), &command, payload)?;
        drop(registry);

        tracing::debug!("Calling {}", name);
        match AssertUnwindSafe(handler(args)).catch_unwind().await {
            Ok(Ok(value)) => Ok(to_transport_case(value)),
            Ok(Err(err)) => {
                let err = err.into_bridge_error(ErrorCode::ExecutionError);
                tracing::warn!("Command {} failed: {}", name, err);
                Err(err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Command {} panicked: {}", name, message);
                Err(BridgeError::execution(message))
            }
        }
    }
}

/// Turn a client payload into validated handler arguments.
///
/// `null` counts as an empty object. Keys are converted to transport case,
/// undeclared keys are dropped, and every declared parameter is checked
/// against its type.
pub(crate) fn prepare_args(
    defs: &Definitions,
    command: &Command,
    payload: Value,
) -> Result<Args, BridgeError> {
    let mut incoming = match to_transport_case(payload) {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        _ => {
            return Err(BridgeError::invalid_argument(
                "Arguments must be a JSON object",
            ));
        }
    };

    let mut args = Map::new();
    for param in command.params() {
        match incoming.remove(&param.name) {
            Some(Value::Null) if param.has_default => {}
            Some(value) => {
                validate(defs, &param.name, &param.ty, &value)?;
                args.insert(param.name.clone(), value);
            }
            None if param.is_required() => {
                return Err(BridgeError::invalid_field(
                    &param.name,
                    "missing required parameter",
                ));
            }
            None => {}
        }
    }
    if command.kind() == CommandKind::Unary && !incoming.is_empty() {
        tracing::debug!(
            "Ignoring undeclared arguments for {}: {:?}",
            command.name(),
            incoming.keys().collect::<Vec<_>>()
        );
    }
    Ok(Args::new(args))
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandError;
    use crate::registry::{Command, Registry};
    use crate::types::{EnumDef, RecordDef, TypeDescriptor};
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        let profile: TypeDescriptor = RecordDef::new("Profile")
            .field::<i64>("user_id")
            .field::<String>("display_name")
            .field::<bool>("is_active")
            .into();
        let registry = Registry::builder()
            .command(
                Command::unary("get_profile")
                    .param::<i64>("user_id")
                    .param_with_default::<bool>("include_inactive")
                    .returns_with(profile)
                    .handler(|args: Args| async move {
                        let id: i64 = args.get("user_id")?;
                        let include = args.get_or("include_inactive", false)?;
                        Ok(json!({
                            "user_id": id,
                            "display_name": format!("user {id}"),
                            "is_active": include,
                        }))
                    }),
            )
            .command(
                Command::unary("set_status")
                    .param_with("status", EnumDef::new("Status", ["on", "off"]).into())
                    .param::<Option<String>>("reason")
                    .returns::<String>()
                    .handler(|args: Args| async move {
                        let status: String = args.get("status")?;
                        let reason: Option<String> = args.get("reason")?;
                        Ok(format!("{status}:{}", reason.unwrap_or_default()))
                    }),
            )
            .command(
                Command::unary("fail")
                    .handler(|_| async { Err::<(), _>(CommandError::new("nope").with_code("NOT_FOUND")) }),
            )
            .command(Command::unary("explode").handler(|_| async {
                if true {
                    panic!("kaboom");
                }
                Ok(())
            }))
            .command(
                Command::stream("ticks")
                    .yields::<u32>()
                    .stream_handler(|_, _| async { Ok(()) }),
            )
            .build()
            .unwrap();
        Dispatcher::new(registry.into())
    }

    #[tokio::test]
    async fn result_keys_leave_in_transport_case() {
        let out = dispatcher()
            .call("get_profile", json!({"user_id": 7, "include_inactive": true}))
            .await
            .unwrap();
        assert_eq!(
            out,
            json!({"user_id": 7, "display_name": "user 7", "is_active": true})
        );
        assert_eq!(
            crate::naming::to_client_case(out),
            json!({"userId": 7, "displayName": "user 7", "isActive": true})
        );
    }

    #[tokio::test]
    async fn client_case_arguments_are_accepted() {
        let out = dispatcher()
            .call("get_profile", json!({"userId": 3, "includeInactive": true}))
            .await
            .unwrap();
        assert_eq!(out["user_id"], 3);
        assert_eq!(out["is_active"], true);
    }

    #[tokio::test]
    async fn defaults_and_optionals_may_be_absent() {
        let d = dispatcher();
        let out = d.call("get_profile", json!({"user_id": 1})).await.unwrap();
        assert_eq!(out["is_active"], false);
        let out = d.call("set_status", json!({"status": "on"})).await.unwrap();
        assert_eq!(out, json!("on:"));
    }

    #[tokio::test]
    async fn unknown_command() {
        let err = dispatcher().call("nope", Value::Null).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownCommand);
        assert_eq!(err.message, "Command 'nope' not found");
    }

    #[tokio::test]
    async fn invalid_arguments() {
        let d = dispatcher();
        let err = d.call("get_profile", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(err.details, Some(json!({"path": "user_id"})));

        let err = d.call("get_profile", json!({"user_id": "x"})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);

        let err = d.call("set_status", json!({"status": "maybe"})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);

        let err = d.call("get_profile", json!([1])).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn handler_errors_and_panics() {
        let d = dispatcher();
        let err = d.call("fail", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Custom("NOT_FOUND".into()));
        assert_eq!(err.message, "nope");

        let err = d.call("explode", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecutionError);
        assert!(err.message.contains("kaboom"));

        // The dispatcher keeps serving after a panic.
        d.call("get_profile", json!({"user_id": 2})).await.unwrap();
    }

    #[tokio::test]
    async fn stream_commands_are_not_callable() {
        let err = dispatcher().call("ticks", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }
}
