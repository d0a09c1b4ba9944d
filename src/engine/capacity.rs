use crate::model::TableQuery;
use crate::store::DocumentStore;

use super::EngineError;

/// Look the table up by number and check the party fits.
///
/// Checked at write time only; shrinking a table later does not revisit
/// existing reservations.
pub(crate) async fn check_capacity(
    store: &dyn DocumentStore,
    table_number: u32,
    people_count: u32,
) -> Result<(), EngineError> {
    let query = TableQuery {
        table_number: Some(table_number),
        ..TableQuery::default()
    };
    let tables = store.query_tables(&query).await?;
    let Some(table) = tables.first() else {
        return Err(EngineError::TableNotFound(table_number));
    };
    if people_count > table.seats {
        return Err(EngineError::CapacityExceeded {
            table: table_number,
            seats: table.seats,
            requested: people_count,
        });
    }
    Ok(())
}
