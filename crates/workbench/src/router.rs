//! Command dispatch with fault isolation.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::registry::Registry;
use crate::types::{CommandResponse, CommandText, EnvironmentName};

/// Send `command` to the environment called `name`.
///
/// Never fails: an unknown name, an error returned by the environment and a
/// panic inside it all come back as a failed [`CommandResponse`].
pub async fn dispatch(
    registry: &mut Registry,
    name: &EnvironmentName,
    command: &CommandText,
) -> CommandResponse {
    let environment = match registry.get_mut(name) {
        Some(environment) => environment,
        None => {
            let available = registry
                .names()
                .map(EnvironmentName::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            tracing::debug!(%name, "command for unknown environment");
            return CommandResponse::failed(format!(
                "Unknown environment: {name}. Available environments: {available}"
            ));
        }
    };

    tracing::debug!(%name, instruction = command.instruction(), "dispatching command");

    match AssertUnwindSafe(environment.execute(command))
        .catch_unwind()
        .await
    {
        Ok(Ok(response)) => response,
        Ok(Err(error)) => {
            tracing::debug!(%name, %error, "command failed");
            CommandResponse::failed(format!("Error: {error}"))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(%name, panic = %message, "environment panicked during execute");
            CommandResponse::failed(format!("Internal error: {message}"))
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
