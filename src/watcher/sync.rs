use crate::container::{Container, parse_env};
use crate::error::ResultOkLogExt;
use crate::runtime::{Cursor, Runtime};
use crate::store::Store;

use super::{Error, Result};

/// Loads every running container into `store`.
///
/// Returns the cursor the event subscription should start from. It is taken
/// before listing so nothing that happens during the listing is missed; the
/// resulting replays are idempotent.
///
/// # Errors
///
/// Fails only if the listing itself fails. Inspect failures leave the
/// container registered with an empty environment.
pub(crate) async fn initial_sync<R: Runtime>(runtime: &R, store: &Store) -> Result<Cursor> {
    let cursor = Cursor::now();
    log::debug!("Starting initial container sync: cursor={cursor}");

    let containers = runtime
        .list_containers()
        .await
        .map_err(|err| Error::InitialList(Box::new(err)))?;
    log::debug!("Found {} running containers", containers.len());

    for summary in containers {
        let env = runtime
            .inspect(&summary.id)
            .await
            .ok_log(
                log::Level::Warn,
                &format!("failed to inspect container `{}`", summary.id),
            )
            .map(|inspection| parse_env(&inspection.env))
            .unwrap_or_default();

        store.upsert(Container::new(
            summary.id,
            summary.name,
            summary.image,
            summary.labels,
            env,
        ));
    }

    Ok(cursor)
}
