use aide_core::domain::owner::{Owner, OwnerCredentials, OwnerId};
use aide_db::repositories::{OwnerRepository, SqlOwnerRepository};
use secrecy::SecretString;
use serde_json::json;

use crate::commands::{finish, open_pool, prepare, CommandResult, StepFailure};

#[derive(Debug, Clone, Default)]
pub struct OwnerArgs {
    pub id: String,
    pub address: String,
    pub mailbox_token: Option<String>,
    pub crm_token: Option<String>,
}

/// Registers an owner or updates one in place. Credentials not passed keep
/// their stored value, and so does the ingestion checkpoint.
pub fn run(args: OwnerArgs) -> CommandResult {
    if args.id.trim().is_empty() || args.address.trim().is_empty() {
        return CommandResult::failure("owner", "invalid_input", "owner id and address are required", 2);
    }

    let (config, runtime) = match prepare("owner") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let owners = SqlOwnerRepository::new(pool.clone());
        let saved = async {
            let persistence = |error: aide_db::repositories::RepositoryError| {
                ("persistence", error.to_string(), 7u8)
            };

            let id = OwnerId(args.id.trim().to_string());
            let existing = owners.find(&id).await.map_err(persistence)?;
            let created = existing.is_none();

            let mut owner = existing.unwrap_or_else(|| Owner::new(id.0.clone(), args.address.trim()));
            owner.address = args.address.trim().to_string();
            owner.credentials = OwnerCredentials {
                mailbox_token: secret(args.mailbox_token).or(owner.credentials.mailbox_token),
                crm_token: secret(args.crm_token).or(owner.credentials.crm_token),
            };
            let details = json!({
                "owner_id": owner.id.0,
                "address": owner.address,
                "mailbox_connected": owner.credentials.has_mailbox(),
                "crm_connected": owner.credentials.has_crm(),
            });

            owners.save(owner).await.map_err(persistence)?;
            Ok::<_, StepFailure>((created, details))
        }
        .await;
        pool.close().await;
        let (created, details) = saved?;

        let message = if created { "owner registered" } else { "owner updated" };
        Ok::<_, StepFailure>((message.to_string(), details))
    });

    finish("owner", result)
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value.map(|token| token.trim().to_string()).filter(|token| !token.is_empty()).map(SecretString::from)
}
