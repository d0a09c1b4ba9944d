use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Stable user identifier yielded by the identity provider.
pub type UserId = String;

pub type Timestamp = DateTime<Utc>;

/// A physical table in the restaurant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: Ulid,
    pub table_number: u32,
    pub seats: u32,
    pub owner: UserId,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
}

/// A booking of one table for one date/time slot.
///
/// `table` references a `tableNumber`, not a table id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Ulid,
    pub owner: UserId,
    pub name: String,
    /// Canonical `YYYY-MM-DD`.
    pub date: String,
    /// Canonical `HH:MM`.
    pub time: String,
    pub table: u32,
    pub people_count: u32,
    pub phone_number: String,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
    /// Append-only audit trail, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Every reservation field except `history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationSnapshot {
    pub id: Ulid,
    pub owner: UserId,
    pub name: String,
    pub date: String,
    pub time: String,
    pub table: u32,
    pub people_count: u32,
    pub phone_number: String,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub updated_at: Timestamp,
    pub previous_state: ReservationSnapshot,
}

impl Reservation {
    /// Strictly earlier calendar date than `cutoff`. Stored dates are
    /// validated on write; an unparsable one never counts as earlier.
    pub fn dated_before(&self, cutoff: chrono::NaiveDate) -> bool {
        chrono::NaiveDate::parse_from_str(&self.date, crate::limits::DATE_FORMAT)
            .is_ok_and(|d| d < cutoff)
    }

    pub fn snapshot(&self) -> ReservationSnapshot {
        ReservationSnapshot {
            id: self.id,
            owner: self.owner.clone(),
            name: self.name.clone(),
            date: self.date.clone(),
            time: self.time.clone(),
            table: self.table,
            people_count: self.people_count,
            phone_number: self.phone_number.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────

/// Raw reservation fields as they arrive on the wire. Every field is optional
/// so that absence can be reported as a missing field rather than a parse error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub name: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub table: Option<u32>,
    pub people_count: Option<u32>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRequest {
    pub table_number: Option<u32>,
    pub seats: Option<u32>,
}

/// Reservation fields that passed validation, in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidReservation {
    pub name: String,
    pub date: String,
    pub time: String,
    pub table: u32,
    pub people_count: u32,
    pub phone_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidTable {
    pub table_number: u32,
    pub seats: u32,
}

// ── Store filters ────────────────────────────────────────────────

/// Exact-match filter over the tables collection. `None` matches anything.
#[derive(Debug, Clone, Default)]
pub struct TableQuery {
    pub table_number: Option<u32>,
    pub owner: Option<UserId>,
}

impl TableQuery {
    pub fn matches(&self, t: &Table) -> bool {
        self.table_number.is_none_or(|n| t.table_number == n)
            && self.owner.as_ref().is_none_or(|o| &t.owner == o)
    }
}

/// Filter over the reservations collection. Exact-match fields are ANDed with
/// the `date_before` range filter (strictly earlier calendar date).
#[derive(Debug, Clone, Default)]
pub struct ReservationQuery {
    pub owner: Option<UserId>,
    pub table: Option<u32>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub date_before: Option<chrono::NaiveDate>,
}

impl ReservationQuery {
    pub fn slot(table: u32, date: &str, time: &str) -> Self {
        Self {
            table: Some(table),
            date: Some(date.to_string()),
            time: Some(time.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        self.owner.as_ref().is_none_or(|o| &r.owner == o)
            && self.table.is_none_or(|t| r.table == t)
            && self.date.as_ref().is_none_or(|d| &r.date == d)
            && self.time.as_ref().is_none_or(|t| &r.time == t)
            && self.date_before.is_none_or(|cutoff| r.dated_before(cutoff))
    }
}

/// One event per store mutation. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TableCreated(Table),
    TableUpdated(Table),
    TableDeleted { id: Ulid },
    ReservationCreated(Reservation),
    ReservationUpdated(Reservation),
    ReservationDeleted { id: Ulid },
    /// Batch delete; replayed all-or-nothing since it is a single record.
    ReservationsPurged { ids: Vec<Ulid> },
}
