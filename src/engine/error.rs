use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    MissingField(&'static str),
    InvalidName,
    InvalidPhone,
    InvalidDate(String),
    InvalidTime(String),
    InvalidSeats(u32),
    TableNotFound(u32),
    CapacityExceeded {
        table: u32,
        seats: u32,
        requested: u32,
    },
    DuplicateBooking {
        table: u32,
        date: String,
        time: String,
    },
    DuplicateTable(u32),
    /// Missing and not-yours are deliberately indistinguishable.
    NotFoundOrForbidden(String),
    Unauthenticated,
    InvalidToken(String),
    StoreFailure(String),
}

impl EngineError {
    /// Stable machine-readable name, used as the `error` field of HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MissingField(_) => "MissingField",
            EngineError::InvalidName => "InvalidName",
            EngineError::InvalidPhone => "InvalidPhone",
            EngineError::InvalidDate(_) => "InvalidDate",
            EngineError::InvalidTime(_) => "InvalidTime",
            EngineError::InvalidSeats(_) => "InvalidSeats",
            EngineError::TableNotFound(_) => "TableNotFound",
            EngineError::CapacityExceeded { .. } => "CapacityExceeded",
            EngineError::DuplicateBooking { .. } => "DuplicateBooking",
            EngineError::DuplicateTable(_) => "DuplicateTable",
            EngineError::NotFoundOrForbidden(_) => "NotFoundOrForbidden",
            EngineError::Unauthenticated => "Unauthenticated",
            EngineError::InvalidToken(_) => "InvalidToken",
            EngineError::StoreFailure(_) => "StoreFailure",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MissingField(field) => write!(f, "missing required field: {field}"),
            EngineError::InvalidName => {
                write!(f, "name may only contain letters and spaces")
            }
            EngineError::InvalidPhone => {
                write!(f, "phone number must be exactly 10 digits")
            }
            EngineError::InvalidDate(d) => write!(f, "invalid date {d:?}, expected YYYY-MM-DD"),
            EngineError::InvalidTime(t) => write!(f, "invalid time {t:?}, expected HH:MM"),
            EngineError::InvalidSeats(n) => write!(f, "seats must be between 1 and 200, got {n}"),
            EngineError::TableNotFound(n) => write!(f, "table {n} does not exist"),
            EngineError::CapacityExceeded {
                table,
                seats,
                requested,
            } => write!(
                f,
                "table {table} seats {seats}, cannot fit {requested} people"
            ),
            EngineError::DuplicateBooking { table, date, time } => {
                write!(f, "table {table} is already booked on {date} at {time}")
            }
            EngineError::DuplicateTable(n) => write!(f, "table {n} already exists"),
            EngineError::NotFoundOrForbidden(id) => write!(f, "not found: {id}"),
            EngineError::Unauthenticated => write!(f, "missing bearer token"),
            EngineError::InvalidToken(e) => write!(f, "invalid or expired token: {e}"),
            EngineError::StoreFailure(e) => write!(f, "store failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            // The document vanished between our read and our write.
            StoreError::Missing(id) => EngineError::NotFoundOrForbidden(id.to_string()),
            StoreError::WalError(e) => EngineError::StoreFailure(e),
        }
    }
}
