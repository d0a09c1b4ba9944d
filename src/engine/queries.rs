use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// The caller's own reservations, in creation order.
    pub async fn list_reservations(&self, owner: &str) -> Result<Vec<Reservation>, EngineError> {
        let query = ReservationQuery {
            owner: Some(owner.to_string()),
            ..ReservationQuery::default()
        };
        Ok(self.store.query_reservations(&query).await?)
    }

    /// Every table, ordered by table number.
    pub async fn list_tables(&self) -> Result<Vec<Table>, EngineError> {
        let mut tables = self.store.query_tables(&TableQuery::default()).await?;
        tables.sort_by_key(|t| t.table_number);
        Ok(tables)
    }
}
