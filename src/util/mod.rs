//! Small shared utilities.

mod request;

pub use request::RequestReplyHelper;

/// Current Unix time in milliseconds.
///
/// The engine core takes explicit `now_ms` parameters; this is the clock
/// the async driver feeds it from.
pub fn unix_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
