use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z\s]+$").expect("name pattern compiles"));
// [0-9] rather than \d: \d also matches non-ASCII digits.
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{10}$").expect("phone pattern compiles"));

/// Blank counts as absent, but the value itself is returned untouched.
fn required_text<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, EngineError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(EngineError::MissingField(field)),
    }
}

fn required_count(value: Option<u32>, field: &'static str) -> Result<u32, EngineError> {
    match value {
        Some(n) if n > 0 => Ok(n),
        _ => Err(EngineError::MissingField(field)),
    }
}

pub fn valid_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN && NAME_RE.is_match(name)
}

pub fn valid_phone(phone: &str) -> bool {
    debug_assert_eq!(PHONE_DIGITS, 10);
    PHONE_RE.is_match(phone)
}

/// Parse a calendar date and return it in canonical `YYYY-MM-DD` form.
pub fn canonical_date(raw: &str) -> Result<String, EngineError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map(|d| d.format(DATE_FORMAT).to_string())
        .map_err(|_| EngineError::InvalidDate(raw.to_string()))
}

/// Parse a time of day (`HH:MM`, seconds tolerated) into canonical `HH:MM`.
pub fn canonical_time(raw: &str) -> Result<String, EngineError> {
    NaiveTime::parse_from_str(raw, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map(|t| t.format(TIME_FORMAT).to_string())
        .map_err(|_| EngineError::InvalidTime(raw.to_string()))
}

/// Presence first (in wire order), then name, phone, date, time.
pub fn validate_reservation(req: &ReservationRequest) -> Result<ValidReservation, EngineError> {
    let name = required_text(&req.name, "name")?;
    let date = required_text(&req.date, "date")?;
    let time = required_text(&req.time, "time")?;
    let table = required_count(req.table, "table")?;
    let people_count = required_count(req.people_count, "peopleCount")?;
    let phone_number = required_text(&req.phone_number, "phoneNumber")?;

    if !valid_name(name) {
        return Err(EngineError::InvalidName);
    }
    if !valid_phone(phone_number) {
        return Err(EngineError::InvalidPhone);
    }

    Ok(ValidReservation {
        name: name.to_string(),
        date: canonical_date(date)?,
        time: canonical_time(time)?,
        table,
        people_count,
        phone_number: phone_number.to_string(),
    })
}

pub fn validate_table(req: &TableRequest) -> Result<ValidTable, EngineError> {
    let table_number = required_count(req.table_number, "tableNumber")?;
    let seats = required_count(req.seats, "seats")?;
    if !(MIN_SEATS..=MAX_SEATS).contains(&seats) {
        return Err(EngineError::InvalidSeats(seats));
    }
    Ok(ValidTable {
        table_number,
        seats,
    })
}
