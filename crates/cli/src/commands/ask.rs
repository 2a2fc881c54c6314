use std::sync::Arc;

use anyhow::Context;
use hrflow_agent::AgentRuntime;
use hrflow_core::capabilities::{HrDirectory, MemoryStore};
use hrflow_core::config::{AppConfig, LearningMode, LlmProvider, LoadOptions};
use hrflow_core::domain::response::{ChatRequest, RequestUser};
use hrflow_db::{
    connect_with_settings, migrations, InMemoryHrDirectory, InMemoryMemoryStore, SqlMemoryStore,
};
use tracing::info;
use uuid::Uuid;

use crate::commands::{async_runtime, load_config, CommandResult};
use crate::AskArgs;

/// Opens the configured memory store, applying pending migrations first.
async fn memory_store(
    config: &AppConfig,
    ephemeral: bool,
) -> anyhow::Result<Arc<dyn MemoryStore>> {
    if ephemeral {
        return Ok(Arc::new(InMemoryMemoryStore::new()));
    }

    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .with_context(|| format!("connecting to {}", config.database.url))?;
    migrations::run_pending(&pool).await.context("applying memory-store migrations")?;
    Ok(Arc::new(SqlMemoryStore::new(pool)))
}

fn request(args: AskArgs) -> ChatRequest {
    ChatRequest {
        message: args.message.join(" "),
        session_id: args.session.unwrap_or_else(|| format!("cli-{}", Uuid::new_v4())),
        user_context: RequestUser {
            user_id: args.user_id,
            username: args.username,
            role: args.role,
            department: args.department,
        },
    }
}

pub fn run(options: &LoadOptions, args: AskArgs) -> CommandResult {
    let mut config = match load_config("ask", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    if args.offline {
        config.llm.provider = LlmProvider::Disabled;
    }
    // The process exits right after replying, so a detached write would be lost.
    config.pipeline.learning_mode = LearningMode::Inline;

    let runtime = match async_runtime("ask") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let directory: Arc<dyn HrDirectory> = match InMemoryHrDirectory::seeded() {
        Ok(directory) => Arc::new(directory),
        Err(error) => return CommandResult::failure("ask", "seed_data", error.to_string(), 4),
    };

    let ephemeral = args.ephemeral;
    let request = request(args);
    let outcome = runtime.block_on(async {
        let memory = memory_store(&config, ephemeral)
            .await
            .map_err(|error| ("memory_store", format!("{error:#}"), 4u8))?;
        let assistant = AgentRuntime::from_config(&config, directory, memory)
            .map_err(|error| ("llm_client", error.to_string(), 6u8))?;

        info!(
            event_name = "cli.ask.started",
            session_id = %request.session_id,
            correlation_id = "cli",
            "sending message through the pipeline"
        );
        Ok::<_, (&'static str, String, u8)>(assistant.handle_message(request).await)
    });

    match outcome {
        Ok(response) => CommandResult::json("ask", &response),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("ask", error_class, message, exit_code)
        }
    }
}
