use aide_core::domain::owner::OwnerId;
use serde_json::json;

use crate::commands::{finish, open_services, prepare, CommandResult, StepFailure};

pub const DEFAULT_BATCH: usize = 100;

pub fn run(owner: Option<String>, batch: usize) -> CommandResult {
    let (config, runtime) = match prepare("index") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let (pool, services) = open_services(&config).await?;
        let owner_id = owner.map(OwnerId);
        let backfilled = services.indexer.backfill(owner_id.as_ref(), batch.max(1)).await;
        pool.close().await;
        let report = backfilled.map_err(|error| ("persistence", error.to_string(), 7u8))?;

        Ok::<_, StepFailure>((
            format!("embedded {} records", report.embedded),
            json!({ "embedded": report.embedded, "failed": report.failed }),
        ))
    });

    finish("index", result)
}
