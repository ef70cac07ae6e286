use super::{CacheResult, CleanRequest, CleanStatus};

/// Metadata key holding the time of the last invalidate pass.
pub const LAST_INVALIDATE: &str = "last_invalidate";
/// Metadata key holding the time of the last vacuum pass.
pub const LAST_VACUUM: &str = "last_vacuum";

/// Runs the invalidate and vacuum passes that are due according to `request`.
///
/// Every driver keeps the two timestamps in its own metadata store and delegates the interval
/// bookkeeping to this function. A pass whose interval has not elapsed is skipped and its
/// timestamp left alone. Invalidation always runs before vacuuming so that the quota check
/// sees the reduced size.
pub fn run_due_passes<G, S, I, V>(
    request: CleanRequest,
    get_meta: G,
    set_meta: S,
    invalidate: I,
    vacuum: V,
) -> CacheResult<CleanStatus>
where
    G: Fn(&str) -> CacheResult<Option<String>>,
    S: Fn(&str, &str) -> CacheResult<()>,
    I: FnOnce() -> CacheResult<()>,
    V: FnOnce() -> CacheResult<()>,
{
    let mut status = CleanStatus {
        last_invalidate: read_timestamp(&get_meta, LAST_INVALIDATE)?,
        last_vacuum: read_timestamp(&get_meta, LAST_VACUUM)?,
        invalidated: false,
        vacuumed: false,
    };

    if is_due(status.last_invalidate, request.invalidate_interval.as_secs(), request.now) {
        invalidate()?;
        set_meta(LAST_INVALIDATE, &request.now.to_string())?;
        status.last_invalidate = request.now;
        status.invalidated = true;
    }

    if is_due(status.last_vacuum, request.vacuum_interval.as_secs(), request.now) {
        vacuum()?;
        set_meta(LAST_VACUUM, &request.now.to_string())?;
        status.last_vacuum = request.now;
        status.vacuumed = true;
    }

    tracing::debug!(?status, "Cache maintenance finished");
    Ok(status)
}

fn is_due(last_run: u64, interval: u64, now: u64) -> bool {
    last_run == 0 || now.saturating_sub(last_run) >= interval
}

fn read_timestamp<G>(get_meta: &G, name: &str) -> CacheResult<u64>
where
    G: Fn(&str) -> CacheResult<Option<String>>,
{
    let Some(value) = get_meta(name)? else {
        return Ok(0);
    };
    match value.trim().parse() {
        Ok(timestamp) => Ok(timestamp),
        Err(_) => {
            tracing::warn!(name, value, "Ignoring unparsable maintenance timestamp");
            Ok(0)
        }
    }
}
