//! Builds a frozen index by replaying a range of the plaintext logs through
//! the same accumulation machinery the live dynamic tier uses, then
//! serializing the result into the scratch directory.

use crate::error::Error;
use crate::index::dynamic::DynamicIndex;
use crate::index::frozen::{
    FrozenIndex, FrozenMetadata, FrozenReactionCount, FrozenZgramCore,
};
use crate::index::types::ZgramOff;
use crate::logfiles::{read_record_at, scan_log_range, FilePosition, InterFileRange, LogLocation};
use crate::paths::ArchivePaths;
use crate::tokenize::{PlusPlusScanner, PpDeltas};
use crate::zgram::{LogRecord, MetadataRecord, Zgram, ZgramId};
use std::collections::HashMap;

pub struct IndexBuilder;

impl IndexBuilder {
    pub fn clear_scratch(paths: &ArchivePaths) -> Result<(), Error> {
        paths.clear_scratch()
    }

    /// Replays `[logged_range] ∪ [unlogged_range]` and writes the frozen
    /// file into scratch. The recorded coverage ends where the scan actually
    /// ended, so a later open replays exactly the records we did not see.
    pub fn build(
        paths: &ArchivePaths,
        logged_range: &InterFileRange,
        unlogged_range: &InterFileRange,
    ) -> Result<(), Error> {
        let mut zgrams: Vec<(Zgram, LogLocation)> = Vec::new();
        let mut metadata: Vec<MetadataRecord> = Vec::new();
        let mut logged_end = logged_range.begin;
        let mut unlogged_end = unlogged_range.begin;

        for (logged, range, end) in [
            (true, logged_range, &mut logged_end),
            (false, unlogged_range, &mut unlogged_end),
        ] {
            scan_log_range(paths.log_dir(logged), logged, range, &mut |record, location| {
                *end = FilePosition::new(
                    location.file_key,
                    location.offset as u64 + location.size as u64,
                );
                match record {
                    LogRecord::Zgram(zg) => zgrams.push((zg, location)),
                    LogRecord::Metadata(md) => metadata.push(md),
                }
                Ok(())
            })?;
        }

        zgrams.sort_by_key(|(zg, _)| zg.id);
        let mut acc = DynamicIndex::new(0);
        let mut id_to_location: HashMap<ZgramId, LogLocation> = HashMap::new();
        for (i, (zgram, location)) in zgrams.iter().enumerate() {
            acc.append_zgram(zgram, *location, ZgramOff(i as u32));
            id_to_location.insert(zgram.id, *location);
        }

        let empty = FrozenIndex::empty();
        for record in metadata {
            match &record {
                MetadataRecord::Reaction(r) => acc.set_reaction(r, &empty),
                MetadataRecord::Revision(rev) => {
                    let old_body = match current_body(paths, &acc, &id_to_location, rev.zgram_id)? {
                        Some(body) => body,
                        None => {
                            tracing::warn!(
                                "revision of unknown zgram {}, skipping",
                                rev.zgram_id
                            );
                            continue;
                        }
                    };
                    let mut deltas = PpDeltas::new();
                    PlusPlusScanner::scan(&old_body, -1, &mut deltas);
                    PlusPlusScanner::scan(&rev.core.body, 1, &mut deltas);
                    acc.apply_pp_deltas(rev.zgram_id, &deltas);
                    acc.add_revision(rev.zgram_id, rev.core.clone());
                }
                MetadataRecord::RefersTo(rt) => acc.set_refers_to(rt),
                MetadataRecord::Zmojis(zm) => acc.set_zmojis(zm),
            }
        }

        let frozen_metadata = freeze_metadata(&acc);
        FrozenIndex::write(
            &paths.scratch_index_path(),
            &acc,
            &frozen_metadata,
            logged_end,
            unlogged_end,
        )
    }
}

fn current_body(
    paths: &ArchivePaths,
    acc: &DynamicIndex,
    id_to_location: &HashMap<ZgramId, LogLocation>,
    id: ZgramId,
) -> Result<Option<String>, Error> {
    if let Some(revs) = acc.metadata().revisions.get(&id) {
        if let Some(last) = revs.last() {
            return Ok(Some(last.body.clone()));
        }
    }
    let Some(location) = id_to_location.get(&id) else {
        return Ok(None);
    };
    match read_record_at(paths.log_dir(location.file_key.logged()), location)? {
        LogRecord::Zgram(zg) => Ok(Some(zg.core.body)),
        LogRecord::Metadata(_) => Ok(None),
    }
}

/// Folds the accumulated (dynamic-shaped) metadata into the frozen shape:
/// tombstones drop out, reaction counts become sorted positive entries.
fn freeze_metadata(acc: &DynamicIndex) -> FrozenMetadata {
    let md = acc.metadata();
    let mut frozen = FrozenMetadata::default();

    for (id, by_reaction) in &md.reactions {
        for (reaction, users) in by_reaction {
            let present: Vec<String> = users
                .iter()
                .filter(|(_, present)| **present)
                .map(|(user, _)| user.clone())
                .collect();
            if !present.is_empty() {
                frozen
                    .reactions
                    .entry(id.raw())
                    .or_default()
                    .insert(reaction.clone(), present);
            }
        }
    }

    for (reaction, counts) in &md.reaction_counts {
        let entries: Vec<FrozenReactionCount> = counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, count)| FrozenReactionCount {
                zgram_id: id.raw(),
                count: *count as u32,
            })
            .collect();
        if !entries.is_empty() {
            frozen.reaction_counts.insert(reaction.clone(), entries);
        }
    }

    for (id, revs) in &md.revisions {
        frozen.revisions.insert(
            id.raw(),
            revs.iter().map(FrozenZgramCore::from).collect(),
        );
    }

    for (id, targets) in &md.refers_to {
        let present: Vec<u64> = targets
            .iter()
            .filter(|(_, present)| **present)
            .map(|(target, _)| target.raw())
            .collect();
        if !present.is_empty() {
            frozen.refers_to.insert(id.raw(), present);
        }
    }

    frozen.zmojis = md.zmojis.clone();

    for (dict, frozen_dict) in [
        (&md.plus_pluses, &mut frozen.plus_pluses),
        (&md.minus_minuses, &mut frozen.minus_minuses),
    ] {
        for (key, ids) in dict {
            frozen_dict.insert(key.clone(), ids.iter().map(|id| id.raw()).collect());
        }
    }

    frozen
}
