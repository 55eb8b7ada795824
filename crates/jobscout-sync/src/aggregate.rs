use std::collections::HashSet;

use jobscout_core::{JobRecord, TargetPlatform};

/// Merges per-page records into one ranked run.
///
/// Pages are concatenated in order, exact-URL duplicates keep their first
/// sighting, and only URLs under the platform's canonical prefix survive.
/// Ranks are reassigned densely from 1 over what remains.
pub fn aggregate<I>(pages: I, platform: &TargetPlatform) -> Vec<JobRecord>
where
    I: IntoIterator<Item = Vec<JobRecord>>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for record in pages.into_iter().flatten() {
        if !record.url.starts_with(&platform.url_prefix) {
            continue;
        }
        if !seen.insert(record.url.clone()) {
            continue;
        }
        merged.push(record);
    }
    for (position, record) in merged.iter_mut().enumerate() {
        record.search_rank = u32::try_from(position + 1).unwrap_or(u32::MAX);
    }
    merged
}
