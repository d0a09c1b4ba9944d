use crate::model::*;

/// Merge `patch` into `existing`, appending one history entry that captures
/// `existing` as it was (without its own history).
///
/// Caller has already checked ownership, validation, capacity and conflict.
pub fn apply_update(existing: Reservation, patch: ValidReservation, now: Timestamp) -> Reservation {
    let entry = HistoryEntry {
        updated_at: now,
        previous_state: existing.snapshot(),
    };
    let mut history = existing.history;
    history.push(entry);

    Reservation {
        id: existing.id,
        owner: existing.owner,
        name: patch.name,
        date: patch.date,
        time: patch.time,
        table: patch.table,
        people_count: patch.people_count,
        phone_number: patch.phone_number,
        created_at: existing.created_at,
        updated_at: Some(now),
        history,
    }
}
