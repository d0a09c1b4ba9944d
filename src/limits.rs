/// Canonical calendar date representation; sorts lexicographically.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Canonical time-of-day representation (24h).
pub const TIME_FORMAT: &str = "%H:%M";

pub const MIN_SEATS: u32 = 1;
pub const MAX_SEATS: u32 = 200;

pub const MAX_NAME_LEN: usize = 200;
pub const PHONE_DIGITS: usize = 10;

/// Owner recorded on tables created by the boot-time seed.
pub const SEED_OWNER: &str = "tablebook-seed";
/// The seed floor plan covers table numbers `1..=SEED_TABLE_COUNT`.
pub const SEED_TABLE_COUNT: u32 = 30;
