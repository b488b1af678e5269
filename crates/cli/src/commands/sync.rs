use serde_json::json;

use crate::commands::{finish, open_services, prepare, CommandResult, StepFailure};

/// Runs one CRM import and embedding backfill pass over every connected owner.
pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("sync") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let (pool, services) = open_services(&config).await?;
        let report = services.sync.run().await;
        pool.close().await;

        let message = if report.failures == 0 { "sync finished" } else { "sync finished with failures" };
        Ok::<_, StepFailure>((
            message.to_string(),
            json!({
                "owners_processed": report.owners_processed,
                "contacts_imported": report.contacts_imported,
                "notes_imported": report.notes_imported,
                "embedded": report.embedded,
                "failures": report.failures,
            }),
        ))
    });

    finish("sync", result)
}
