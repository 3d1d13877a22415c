//! The in-memory, append-only overlay holding everything that arrived since
//! the frozen tier was built.

use crate::index::frozen::FrozenIndex;
use crate::index::types::{FieldTag, WordInfo, WordOff, ZgramInfo, ZgramOff};
use crate::logfiles::LogLocation;
use crate::tokenize::{PlusPlusScanner, PpDeltas, WordSplitter};
use crate::zgram::{Reaction, Zgram, ZgramCore, ZgramId, ZgramRefersTo, Zmojis};
use std::collections::{BTreeMap, BTreeSet};

/// The logical metadata dictionaries of the dynamic tier. Where the frozen
/// tier holds folded final state, these hold *overrides* layered on top of
/// it (reactions, refers-to) or appended history (revisions, mentions).
#[derive(Debug, Default)]
pub struct DynamicMetadata {
    /// zgram -> reaction -> user -> present. An entry overrides whatever the
    /// frozen tier says for that (zgram, reaction, user).
    pub reactions: BTreeMap<ZgramId, BTreeMap<String, BTreeMap<String, bool>>>,
    /// reaction -> zgram -> net count change relative to the frozen tier.
    pub reaction_counts: BTreeMap<String, BTreeMap<ZgramId, i64>>,
    /// Revision history appended since the freeze, oldest first.
    pub revisions: BTreeMap<ZgramId, Vec<ZgramCore>>,
    /// zgram -> refers-to -> present, overriding the frozen tier.
    pub refers_to: BTreeMap<ZgramId, BTreeMap<ZgramId, bool>>,
    pub zmojis: BTreeMap<String, String>,
    /// key -> sorted zgram ids of positive mentions (one entry per +1).
    pub plus_pluses: BTreeMap<String, Vec<ZgramId>>,
    /// key -> sorted zgram ids of negative mentions (one entry per -1).
    pub minus_minuses: BTreeMap<String, Vec<ZgramId>>,
}

impl DynamicMetadata {
    /// Net plus-plus count contribution at or before `id`:
    /// mentions are folded as (#plus ≤ id) − (#minus ≤ id).
    pub fn plus_plus_count_after(&self, id: ZgramId, key: &str) -> i64 {
        count_le(self.plus_pluses.get(key), id) - count_le(self.minus_minuses.get(key), id)
    }

    pub fn plus_plus_keys(&self, id: ZgramId, out: &mut BTreeSet<String>) {
        for (key, ids) in self.plus_pluses.iter().chain(self.minus_minuses.iter()) {
            if ids.binary_search(&id).is_ok() {
                out.insert(key.clone());
            }
        }
    }

    /// All zgrams in [begin, end) that mention `key`, in either direction.
    pub fn gather_mentions(&self, key: &str, begin: ZgramId, end: ZgramId, out: &mut Vec<ZgramId>) {
        for dict in [&self.plus_pluses, &self.minus_minuses] {
            if let Some(ids) = dict.get(key) {
                let lo = ids.partition_point(|z| *z < begin);
                let hi = ids.partition_point(|z| *z < end);
                out.extend_from_slice(&ids[lo..hi]);
            }
        }
    }
}

fn count_le(ids: Option<&Vec<ZgramId>>, id: ZgramId) -> i64 {
    match ids {
        Some(v) => v.partition_point(|z| *z <= id) as i64,
        None => 0,
    }
}

/// The dynamic index proper: freshly arrived zgrams and their word postings,
/// plus the metadata overlay.
#[derive(Debug, Default)]
pub struct DynamicIndex {
    /// The absolute word offset of our first word (= the frozen word count).
    first_word_off: u32,
    zgram_infos: Vec<ZgramInfo>,
    word_infos: Vec<WordInfo>,
    /// folded word -> sorted absolute word offsets of its occurrences.
    words: BTreeMap<String, Vec<WordOff>>,
    metadata: DynamicMetadata,
}

impl DynamicIndex {
    pub fn new(first_word_off: u32) -> DynamicIndex {
        DynamicIndex {
            first_word_off,
            ..Default::default()
        }
    }

    pub fn zgram_count(&self) -> usize {
        self.zgram_infos.len()
    }

    pub fn word_count(&self) -> usize {
        self.word_infos.len()
    }

    pub fn zgram_info(&self, local_off: usize) -> &ZgramInfo {
        &self.zgram_infos[local_off]
    }

    pub fn word_info(&self, local_off: usize) -> WordInfo {
        self.word_infos[local_off]
    }

    pub fn zgram_infos(&self) -> &[ZgramInfo] {
        &self.zgram_infos
    }

    pub fn word_infos(&self) -> &[WordInfo] {
        &self.word_infos
    }

    pub fn words(&self) -> &BTreeMap<String, Vec<WordOff>> {
        &self.words
    }

    pub fn metadata(&self) -> &DynamicMetadata {
        &self.metadata
    }

    pub fn last_zgram_id(&self) -> Option<ZgramId> {
        self.zgram_infos.last().map(|info| info.zgram_id)
    }

    /// Indexes one zgram: appends its info record, tokenizes every field into
    /// word postings, and scans the body for plus-plus mentions at parity +1.
    /// Returns the net mention deltas (already applied to the mention lists).
    ///
    /// Ids must arrive in strictly increasing order.
    pub fn append_zgram(&mut self, zgram: &Zgram, location: LogLocation, zgram_off: ZgramOff) -> PpDeltas {
        debug_assert!(self
            .zgram_infos
            .last()
            .map(|prev| prev.zgram_id < zgram.id)
            .unwrap_or(true));

        let starting_word_off = WordOff(self.first_word_off + self.word_infos.len() as u32);
        let mut lengths = [0u16; FieldTag::COUNT];
        for (tag, text) in [
            (FieldTag::Sender, zgram.sender.as_str()),
            (FieldTag::Signature, zgram.signature.as_str()),
            (FieldTag::Instance, zgram.instance()),
            (FieldTag::Body, zgram.body()),
        ] {
            let words = WordSplitter::split(text);
            lengths[tag as usize] = words.len() as u16;
            for word in words {
                let word_off = WordOff(self.first_word_off + self.word_infos.len() as u32);
                self.word_infos.push(WordInfo::new(zgram_off, tag));
                self.words
                    .entry(WordSplitter::fold(word))
                    .or_default()
                    .push(word_off);
            }
        }

        self.zgram_infos.push(ZgramInfo {
            timesecs: zgram.timesecs,
            location,
            zgram_id: zgram.id,
            starting_word_off,
            sender_word_length: lengths[FieldTag::Sender as usize],
            signature_word_length: lengths[FieldTag::Signature as usize],
            instance_word_length: lengths[FieldTag::Instance as usize],
            body_word_length: lengths[FieldTag::Body as usize],
        });

        let mut deltas = PpDeltas::new();
        PlusPlusScanner::scan(zgram.body(), 1, &mut deltas);
        self.apply_pp_deltas(zgram.id, &deltas);
        deltas
    }

    /// Records mention-list entries for net deltas at `id`. A +n delta adds
    /// n plus entries, a -n delta adds n minus entries, and a zero delta adds
    /// one of each so the mention is still visible while the count cancels.
    pub fn apply_pp_deltas(&mut self, id: ZgramId, deltas: &PpDeltas) {
        for (key, delta) in deltas {
            let (plus, minus) = match delta.cmp(&0) {
                std::cmp::Ordering::Greater => (*delta as usize, 0),
                std::cmp::Ordering::Less => (0, (-*delta) as usize),
                std::cmp::Ordering::Equal => (1, 1),
            };
            if plus > 0 {
                insert_mentions(self.metadata.plus_pluses.entry(key.clone()).or_default(), id, plus);
            }
            if minus > 0 {
                insert_mentions(
                    self.metadata.minus_minuses.entry(key.clone()).or_default(),
                    id,
                    minus,
                );
            }
        }
    }

    /// Applies a reaction toggle. The previous state is resolved against the
    /// dynamic override first and the frozen tier second, so repeated toggles
    /// and frozen-tier masking both fold correctly.
    pub fn set_reaction(&mut self, reaction: &Reaction, frozen: &FrozenIndex) {
        let was_present = self
            .metadata
            .reactions
            .get(&reaction.zgram_id)
            .and_then(|by_reaction| by_reaction.get(&reaction.reaction))
            .and_then(|by_user| by_user.get(&reaction.creator))
            .copied()
            .unwrap_or_else(|| {
                frozen
                    .metadata()
                    .reaction_present(reaction.zgram_id, &reaction.reaction, &reaction.creator)
            });

        if was_present != reaction.present {
            let delta = if reaction.present { 1 } else { -1 };
            let counts = self
                .metadata
                .reaction_counts
                .entry(reaction.reaction.clone())
                .or_default();
            *counts.entry(reaction.zgram_id).or_insert(0) += delta;
        }

        self.metadata
            .reactions
            .entry(reaction.zgram_id)
            .or_default()
            .entry(reaction.reaction.clone())
            .or_default()
            .insert(reaction.creator.clone(), reaction.present);
    }

    pub fn add_revision(&mut self, id: ZgramId, core: ZgramCore) {
        self.metadata.revisions.entry(id).or_default().push(core);
    }

    pub fn set_refers_to(&mut self, record: &ZgramRefersTo) {
        self.metadata
            .refers_to
            .entry(record.zgram_id)
            .or_default()
            .insert(record.refers_to, record.present);
    }

    pub fn set_zmojis(&mut self, record: &Zmojis) {
        self.metadata
            .zmojis
            .insert(record.user_id.clone(), record.zmojis.clone());
    }
}

fn insert_mentions(ids: &mut Vec<ZgramId>, id: ZgramId, n: usize) {
    let at = ids.partition_point(|z| *z <= id);
    for _ in 0..n {
        ids.insert(at, id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::logfiles::FileKey;
    use crate::zgram::RenderStyle;

    fn make_zgram(id: u64, body: &str) -> Zgram {
        Zgram {
            id: ZgramId(id),
            timesecs: 947073600 + id,
            sender: "simon".to_string(),
            signature: "Simon Eriksson".to_string(),
            logged: true,
            core: ZgramCore::new("appreciation", body, RenderStyle::Default),
        }
    }

    fn loc() -> LogLocation {
        LogLocation::new(FileKey::from_ymd(2000, 1, 6, true), 0, 10)
    }

    #[test]
    fn test_append_assigns_contiguous_word_offsets() {
        let mut di = DynamicIndex::new(100);
        di.append_zgram(&make_zgram(70, "kosak plus plus day"), loc(), ZgramOff(0));
        di.append_zgram(&make_zgram(71, "indeed"), loc(), ZgramOff(1));
        let first = di.zgram_info(0);
        let second = di.zgram_info(1);
        assert_eq!(first.starting_word_off, WordOff(100));
        assert_eq!(
            second.starting_word_off.0,
            first.starting_word_off.0 + first.total_word_length()
        );
        // sender(1) + signature(2) + instance(1) + body(4)
        assert_eq!(first.total_word_length(), 8);
    }

    #[test]
    fn test_mention_lists_fold_counts() {
        let mut di = DynamicIndex::new(0);
        di.append_zgram(&make_zgram(70, "kosak++ blah kosak++"), loc(), ZgramOff(0));
        di.append_zgram(&make_zgram(71, "kosak--"), loc(), ZgramOff(1));
        let md = di.metadata();
        assert_eq!(md.plus_plus_count_after(ZgramId(69), "kosak"), 0);
        assert_eq!(md.plus_plus_count_after(ZgramId(70), "kosak"), 2);
        assert_eq!(md.plus_plus_count_after(ZgramId(71), "kosak"), 1);
    }

    #[test]
    fn test_zero_delta_mentions_are_visible() {
        let mut di = DynamicIndex::new(0);
        di.append_zgram(&make_zgram(70, "zamboni??"), loc(), ZgramOff(0));
        let md = di.metadata();
        assert_eq!(md.plus_plus_count_after(ZgramId(70), "zamboni"), 0);
        let mut keys = BTreeSet::new();
        md.plus_plus_keys(ZgramId(70), &mut keys);
        assert!(keys.contains("zamboni"));
    }

    #[test]
    fn test_reaction_toggle_folds() {
        let frozen = FrozenIndex::empty();
        let mut di = DynamicIndex::new(0);
        let like = |present| Reaction::new(ZgramId(30), "👍", "simon", present);
        di.set_reaction(&like(true), &frozen);
        assert_eq!(di.metadata().reaction_counts["👍"][&ZgramId(30)], 1);
        di.set_reaction(&like(false), &frozen);
        assert_eq!(di.metadata().reaction_counts["👍"][&ZgramId(30)], 0);
        // Revoking again changes nothing
        di.set_reaction(&like(false), &frozen);
        assert_eq!(di.metadata().reaction_counts["👍"][&ZgramId(30)], 0);
    }
}
