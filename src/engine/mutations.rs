use chrono::{NaiveDate, Utc};
use tracing::debug;
use ulid::Ulid;

use crate::limits::{SEED_OWNER, SEED_TABLE_COUNT};
use crate::model::*;

use super::capacity::check_capacity;
use super::conflict::check_no_conflict;
use super::validation::{validate_reservation, validate_table};
use super::{Engine, EngineError, apply_update, parse_id};

impl Engine {
    // ── Reservations ─────────────────────────────────────────

    pub async fn create_reservation(
        &self,
        owner: &str,
        req: &ReservationRequest,
    ) -> Result<Reservation, EngineError> {
        let valid = validate_reservation(req)?;
        let _slot = self.lock_tables(&[valid.table]).await;

        check_capacity(self.store(), valid.table, valid.people_count).await?;
        check_no_conflict(self.store(), valid.table, &valid.date, &valid.time, None).await?;

        let reservation = Reservation {
            id: self.next_id(),
            owner: owner.to_string(),
            name: valid.name,
            date: valid.date,
            time: valid.time,
            table: valid.table,
            people_count: valid.people_count,
            phone_number: valid.phone_number,
            created_at: Utc::now(),
            updated_at: None,
            history: Vec::new(),
        };
        self.store.insert_reservation(reservation.clone()).await?;
        debug!(id = %reservation.id, table = reservation.table, "reservation created");
        Ok(reservation)
    }

    /// Re-validate against the new slot, then append the prior state to history.
    /// The reservation's own current slot never counts as a conflict.
    pub async fn update_reservation(
        &self,
        owner: &str,
        id: &str,
        req: &ReservationRequest,
    ) -> Result<Reservation, EngineError> {
        let id = parse_id(id)?;
        let existing = self.owned_reservation(owner, id).await?;
        let valid = validate_reservation(req)?;

        let _slots = self.lock_tables(&[existing.table, valid.table]).await;
        // Re-read under the locks: it may have been changed or deleted meanwhile.
        let existing = self.owned_reservation(owner, id).await?;

        check_capacity(self.store(), valid.table, valid.people_count).await?;
        check_no_conflict(self.store(), valid.table, &valid.date, &valid.time, Some(id)).await?;

        let updated = apply_update(existing, valid, Utc::now());
        self.store.update_reservation(updated.clone()).await?;
        debug!(%id, revisions = updated.history.len(), "reservation updated");
        Ok(updated)
    }

    pub async fn delete_reservation(&self, owner: &str, id: &str) -> Result<(), EngineError> {
        let id = parse_id(id)?;
        let mut table = self.owned_reservation(owner, id).await?.table;
        loop {
            let _slot = self.lock_tables(&[table]).await;
            // An update may have moved it to another table while we waited.
            let current = self.owned_reservation(owner, id).await?;
            if current.table == table {
                self.store.delete_reservation(id).await?;
                debug!(%id, table, "reservation deleted");
                return Ok(());
            }
            table = current.table;
        }
    }

    /// Privileged sweep: delete every reservation dated before `today` in one
    /// batch, regardless of owner. The date test is made when the batch
    /// commits, so a reservation rescheduled meanwhile survives. Returns how
    /// many were deleted.
    pub async fn purge_expired(&self, today: NaiveDate) -> Result<usize, EngineError> {
        Ok(self.store.delete_reservations_before(today).await?)
    }

    async fn owned_reservation(&self, owner: &str, id: Ulid) -> Result<Reservation, EngineError> {
        match self.store.get_reservation(id).await? {
            Some(r) if r.owner == owner => Ok(r),
            Some(_) => {
                debug!(%id, "reservation belongs to another user");
                Err(EngineError::NotFoundOrForbidden(id.to_string()))
            }
            None => Err(EngineError::NotFoundOrForbidden(id.to_string())),
        }
    }

    // ── Tables ───────────────────────────────────────────────

    pub async fn create_table(&self, owner: &str, req: &TableRequest) -> Result<Table, EngineError> {
        let valid = validate_table(req)?;
        let _gate = self.registry_gate.lock().await;
        self.ensure_number_free(valid.table_number, None).await?;

        let table = Table {
            id: self.next_id(),
            table_number: valid.table_number,
            seats: valid.seats,
            owner: owner.to_string(),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.store.insert_table(table.clone()).await?;
        debug!(id = %table.id, number = table.table_number, "table created");
        Ok(table)
    }

    /// Owner-only. Ownership never changes; the number must stay unique.
    pub async fn update_table(
        &self,
        owner: &str,
        id: &str,
        req: &TableRequest,
    ) -> Result<Table, EngineError> {
        let id = parse_id(id)?;
        self.owned_table(owner, id).await?;
        let valid = validate_table(req)?;

        let _gate = self.registry_gate.lock().await;
        let existing = self.owned_table(owner, id).await?;
        self.ensure_number_free(valid.table_number, Some(id)).await?;

        let table = Table {
            table_number: valid.table_number,
            seats: valid.seats,
            updated_at: Some(Utc::now()),
            ..existing
        };
        self.store.update_table(table.clone()).await?;
        debug!(%id, number = table.table_number, "table updated");
        Ok(table)
    }

    pub async fn delete_table(&self, owner: &str, id: &str) -> Result<(), EngineError> {
        let id = parse_id(id)?;
        let _gate = self.registry_gate.lock().await;
        self.owned_table(owner, id).await?;
        self.store.delete_table(id).await?;
        debug!(%id, "table deleted");
        Ok(())
    }

    /// Create whichever tables of the default floor plan are missing.
    /// Numbers already taken, by anyone, are left alone. Returns how many
    /// were created.
    pub async fn seed_tables(&self) -> Result<usize, EngineError> {
        let mut created = 0;
        for number in 1..=SEED_TABLE_COUNT {
            let req = TableRequest {
                table_number: Some(number),
                seats: Some(seed_seats(number)),
            };
            match self.create_table(SEED_OWNER, &req).await {
                Ok(_) => created += 1,
                Err(EngineError::DuplicateTable(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    async fn owned_table(&self, owner: &str, id: Ulid) -> Result<Table, EngineError> {
        match self.store.get_table(id).await? {
            Some(t) if t.owner == owner => Ok(t),
            Some(_) => {
                debug!(%id, "table belongs to another user");
                Err(EngineError::NotFoundOrForbidden(id.to_string()))
            }
            None => Err(EngineError::NotFoundOrForbidden(id.to_string())),
        }
    }

    async fn ensure_number_free(&self, number: u32, except: Option<Ulid>) -> Result<(), EngineError> {
        let query = TableQuery {
            table_number: Some(number),
            ..TableQuery::default()
        };
        let taken = self
            .store
            .query_tables(&query)
            .await?
            .iter()
            .any(|t| Some(t.id) != except);
        if taken {
            return Err(EngineError::DuplicateTable(number));
        }
        Ok(())
    }
}

/// Seats for a table of the default floor plan: 1-10 seat two, 11-20 four,
/// 21-25 six and 26-30 eight.
fn seed_seats(number: u32) -> u32 {
    match number {
        0..=10 => 2,
        11..=20 => 4,
        21..=25 => 6,
        _ => 8,
    }
}
