use time::OffsetDateTime;

/// Current Unix timestamp in seconds, used throughout for `CreatedAt`/
/// `UpdatedAt`/`ExpiresAt` bookkeeping (spec §3.1).
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
