use aide_agent::runtime::TurnError;
use aide_core::domain::conversation::ConversationId;
use aide_core::domain::owner::OwnerId;
use aide_db::repositories::OwnerRepository;
use aide_providers::Services;
use serde_json::{json, Value};

use crate::commands::{finish, interface_failure, open_services, prepare, CommandResult, StepFailure};

#[derive(Debug, Clone, Default)]
pub struct ChatArgs {
    pub owner: String,
    pub conversation: Option<String>,
    pub message: String,
}

/// One persisted turn. Without a conversation id the owner's default
/// conversation is used, created on first use.
pub fn run(args: ChatArgs) -> CommandResult {
    if args.message.trim().is_empty() {
        return CommandResult::failure("chat", "invalid_input", "message must not be empty", 2);
    }

    let (config, runtime) = match prepare("chat") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let (pool, services) = open_services(&config).await?;
        let outcome = turn(&services, &args).await;
        pool.close().await;
        outcome
    });

    finish("chat", result)
}

async fn turn(services: &Services, args: &ChatArgs) -> Result<(String, Value), StepFailure> {
    let owner = services
        .owners
        .find(&OwnerId(args.owner.clone()))
        .await
        .map_err(|error| ("persistence", error.to_string(), 7u8))?
        .ok_or_else(|| ("owner_not_found", format!("unknown owner `{}`", args.owner), 7u8))?;

    let conversation_id = match &args.conversation {
        Some(id) => ConversationId(id.clone()),
        None => {
            services
                .conversations
                .get_or_create_default(&owner.id)
                .await
                .map_err(|error| interface_failure(error.into(), &args.owner))?
                .id
        }
    };

    let outcome = services
        .runtime
        .handle_turn(&owner, &conversation_id, args.message.trim())
        .await
        .map_err(|error| turn_failure(error, &conversation_id))?;

    let sources: Vec<Value> = outcome
        .sources
        .iter()
        .map(|item| {
            json!({
                "entity_type": item.entity_type.as_str(),
                "id": item.source_id,
                "similarity": item.similarity,
            })
        })
        .collect();
    let tools: Vec<Value> = outcome
        .tools_invoked
        .iter()
        .map(|usage| json!({ "tool": usage.tool, "success": usage.success }))
        .collect();

    Ok((
        outcome.answer,
        json!({
            "conversation_id": conversation_id.0,
            "sources": sources,
            "tools_invoked": tools,
        }),
    ))
}

/// The user-facing apology stands in for the answer. The runtime logs the
/// upstream detail.
fn turn_failure(error: TurnError, conversation_id: &ConversationId) -> StepFailure {
    let answer = error.user_message();
    let (error_class, _, exit_code) = interface_failure(error.into(), &conversation_id.0);
    (error_class, answer.to_string(), exit_code)
}
