use ulid::Ulid;

use crate::model::ReservationQuery;
use crate::store::DocumentStore;

use super::EngineError;

/// True iff a live reservation other than `exclude` holds the exact
/// (table, date, time) slot.
pub(crate) async fn has_conflict(
    store: &dyn DocumentStore,
    table: u32,
    date: &str,
    time: &str,
    exclude: Option<Ulid>,
) -> Result<bool, EngineError> {
    let holders = store
        .query_reservations(&ReservationQuery::slot(table, date, time))
        .await?;
    Ok(holders.iter().any(|r| Some(r.id) != exclude))
}

pub(crate) async fn check_no_conflict(
    store: &dyn DocumentStore,
    table: u32,
    date: &str,
    time: &str,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    if has_conflict(store, table, date, time, exclude).await? {
        return Err(EngineError::DuplicateBooking {
            table,
            date: date.to_string(),
            time: time.to_string(),
        });
    }
    Ok(())
}
