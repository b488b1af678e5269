use serde_json::json;

use crate::commands::{finish, open_services, prepare, CommandResult, StepFailure};

/// Runs one ingestion cycle in the foreground, regardless of whether the
/// server's scheduler is enabled.
pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("ingest") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let (pool, services) = open_services(&config).await?;
        let report = services.ingestion.run_cycle().await;
        pool.close().await;

        let message = if report.failures == 0 {
            "ingestion cycle finished"
        } else {
            "ingestion cycle finished with failures"
        };
        Ok::<_, StepFailure>((
            message.to_string(),
            json!({
                "owners_processed": report.owners_processed,
                "events_seen": report.events_seen,
                "tasks_completed": report.tasks_completed,
                "contacts_created": report.contacts_created,
                "capped_owners": report.capped_owners,
                "failures": report.failures,
            }),
        ))
    });

    finish("ingest", result)
}
