//! The unified query and mutation surface over the frozen and dynamic tiers.
//!
//! Reads union the two tiers: zgram offsets below the frozen size address the
//! frozen array, the rest the dynamic array. Writes append to the dynamic
//! tier and to the plaintext logs, and are flushed before any response is
//! released.

use crate::error::{Error, ErrorKind};
use crate::index::cache::ZgramCache;
use crate::index::dynamic::DynamicIndex;
use crate::index::frozen::FrozenIndex;
use crate::index::types::{WordInfo, WordOff, ZgramInfo, ZgramOff};
use crate::logfiles::{
    list_log_keys, scan_log_range, FileKey, FilePosition, InterFileRange, LogLocation,
};
use crate::magic;
use crate::paths::ArchivePaths;
use crate::tokenize::{PlusPlusScanner, PpDeltas};
use crate::zgram::{
    LogRecord, MetadataRecord, Profile, Reaction, Zgram, ZgramCore, ZgramId, ZgramRefersTo,
    ZgramRevision,
};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Per-zgram, per-key net plus-plus changes produced by one mutation, used
/// to drive the coordinator's fan-out.
pub type PpDeltaMap = BTreeMap<ZgramId, PpDeltas>;

/// A word's occurrence list, wherever it lives.
#[derive(Clone, Copy)]
pub enum OccurrenceList<'a> {
    Frozen(crate::index::frozen::FrozenOccurrences<'a>),
    Dynamic(&'a [WordOff]),
}

impl<'a> OccurrenceList<'a> {
    pub fn len(&self) -> usize {
        match self {
            OccurrenceList::Frozen(occ) => occ.len(),
            OccurrenceList::Dynamic(slice) => slice.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> WordOff {
        match self {
            OccurrenceList::Frozen(occ) => occ.get(i),
            OccurrenceList::Dynamic(slice) => slice[i],
        }
    }
}

/// How a query term selects words. Matchers operate on folded terms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WordMatcher {
    Literal(String),
    Prefix(String),
}

impl std::fmt::Display for WordMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WordMatcher::Literal(word) => write!(f, "{word}"),
            WordMatcher::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// One open log file of one tree, tracking (file key, byte size).
#[derive(Debug)]
struct LogWriter {
    dir: PathBuf,
    logged: bool,
    open: Option<OpenLog>,
    dirty: bool,
}

#[derive(Debug)]
struct OpenLog {
    key: FileKey,
    file: std::fs::File,
    size: u64,
}

impl LogWriter {
    fn new(dir: PathBuf, logged: bool) -> LogWriter {
        LogWriter {
            dir,
            logged,
            open: None,
            dirty: false,
        }
    }

    fn append(&mut self, now_secs: u64, line: &str) -> Result<LogLocation, Error> {
        let key = FileKey::from_timesecs(now_secs, self.logged)?;
        let needs_open = match &self.open {
            Some(open) => open.key != key,
            None => true,
        };
        if needs_open {
            self.flush()?;
            let path = self.dir.join(key.file_name());
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| (e, file!(), line!()))?;
            let size = file.metadata().map_err(|e| (e, file!(), line!()))?.len();
            self.open = Some(OpenLog { key, file, size });
        }
        let open = self.open.as_mut().unwrap();
        open.file
            .write_all(line.as_bytes())
            .and_then(|_| open.file.write_all(b"\n"))
            .map_err(|e| (e, file!(), line!()))?;
        let location = LogLocation::new(key, open.size as u32, (line.len() + 1) as u32);
        open.size += line.len() as u64 + 1;
        self.dirty = true;
        Ok(location)
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.dirty {
            if let Some(open) = &self.open {
                open.file.sync_data().map_err(|e| (e, file!(), line!()))?;
            }
            self.dirty = false;
        }
        Ok(())
    }

    /// The position at or beyond everything durably in this tree.
    fn position(&self, now_secs: u64) -> Result<FilePosition, Error> {
        if let Some(open) = &self.open {
            return Ok(FilePosition::new(open.key, open.size));
        }
        let keys = list_log_keys(&self.dir, self.logged)?;
        if let Some(last) = keys.last() {
            let size = std::fs::metadata(self.dir.join(last.file_name()))
                .map_err(|e| (e, file!(), line!()))?
                .len();
            return Ok(FilePosition::new(*last, size));
        }
        Ok(FilePosition::new(
            FileKey::from_timesecs(now_secs, self.logged)?,
            0,
        ))
    }
}

#[derive(Debug)]
pub struct ConsolidatedIndex {
    paths: Arc<ArchivePaths>,
    frozen: FrozenIndex,
    dynamic: DynamicIndex,
    logged_writer: LogWriter,
    unlogged_writer: LogWriter,
    cache: ZgramCache,
}

impl ConsolidatedIndex {
    /// Opens the published frozen index and replays the log tails beyond its
    /// coverage into a fresh dynamic tier. The logs are the source of truth;
    /// the frozen tier is an optimization over their prefix.
    pub fn open(paths: Arc<ArchivePaths>) -> Result<ConsolidatedIndex, Error> {
        let frozen = FrozenIndex::open(&paths.index_path())?;
        let mut index = ConsolidatedIndex {
            dynamic: DynamicIndex::new(frozen.word_count() as u32),
            logged_writer: LogWriter::new(paths.log_dir(true).to_path_buf(), true),
            unlogged_writer: LogWriter::new(paths.log_dir(false).to_path_buf(), false),
            cache: ZgramCache::new(),
            frozen,
            paths,
        };
        index.replay_tails()?;
        Ok(index)
    }

    fn replay_tails(&mut self) -> Result<(), Error> {
        let mut zgrams: Vec<(Zgram, LogLocation)> = Vec::new();
        // Metadata folds are per-tree (a record lands in the tree of its
        // target zgram), so applying logged then unlogged keeps each fold's
        // internal order.
        let mut metadata: Vec<MetadataRecord> = Vec::new();
        for logged in [true, false] {
            let begin = if logged {
                self.frozen.logged_end()
            } else {
                self.frozen.unlogged_end()
            };
            let range = InterFileRange::new(begin, InterFileRange::everything(logged).end);
            scan_log_range(self.paths.log_dir(logged), logged, &range, &mut |record, location| {
                match record {
                    LogRecord::Zgram(zg) => zgrams.push((zg, location)),
                    LogRecord::Metadata(md) => metadata.push(md),
                }
                Ok(())
            })?;
        }
        zgrams.sort_by_key(|(zg, _)| zg.id);
        for (zgram, location) in zgrams {
            let off = self.zgram_end_off();
            self.dynamic.append_zgram(&zgram, location, off);
        }
        for record in metadata {
            if let Err(e) = self.apply_metadata_record(&record, &mut PpDeltaMap::new()) {
                tracing::warn!("skipping unreplayable metadata record {record:?}: {e}");
            }
        }
        Ok(())
    }

    pub fn paths(&self) -> &Arc<ArchivePaths> {
        &self.paths
    }

    pub fn frozen(&self) -> &FrozenIndex {
        &self.frozen
    }

    pub fn dynamic(&self) -> &DynamicIndex {
        &self.dynamic
    }

    // ----------------------------------------------------------------------
    // Mutation

    /// Assigns the next contiguous block of ids, persists each zgram to its
    /// log, and indexes it. Returns the shared zgrams plus the per-zgram
    /// plus-plus effects.
    pub fn add_zgrams(
        &mut self,
        now_secs: u64,
        profile: &Profile,
        cores: Vec<ZgramCore>,
    ) -> Result<(Vec<Arc<Zgram>>, PpDeltaMap), Error> {
        let mut zgrams = Vec::with_capacity(cores.len());
        let mut delta_map = PpDeltaMap::new();
        for core in cores {
            let id = self.zgram_end();
            let logged = !is_graffiti_instance(&core.instance);
            let zgram = Zgram {
                id,
                timesecs: now_secs,
                sender: profile.user_id.clone(),
                signature: profile.signature.clone(),
                logged,
                core,
            };
            let line = serde_json::to_string(&LogRecord::Zgram(zgram.clone()))
                .map_err(|e| Error::from((e, file!(), line!())))?;
            let writer = if logged {
                &mut self.logged_writer
            } else {
                &mut self.unlogged_writer
            };
            let location = writer.append(now_secs, &line)?;
            let off = self.zgram_end_off();
            let deltas = self.dynamic.append_zgram(&zgram, location, off);
            if !deltas.is_empty() {
                delta_map.insert(id, deltas);
            }
            let zgram = Arc::new(zgram);
            self.cache_insert(zgram.clone());
            zgrams.push(zgram);
        }
        self.flush()?;
        Ok((zgrams, delta_map))
    }

    /// Persists and applies a batch of (already sanitized) metadata records.
    /// Returns the applied records for fan-out plus any plus-plus effects.
    pub fn add_metadata(
        &mut self,
        now_secs: u64,
        records: Vec<MetadataRecord>,
    ) -> Result<(Vec<MetadataRecord>, PpDeltaMap), Error> {
        let mut moved = Vec::with_capacity(records.len());
        let mut delta_map = PpDeltaMap::new();
        for record in records {
            let logged = match self.record_is_logged(&record) {
                Some(logged) => logged,
                None => {
                    tracing::warn!("metadata targets unknown zgram, skipping: {record:?}");
                    continue;
                }
            };
            let line = serde_json::to_string(&LogRecord::Metadata(record.clone()))
                .map_err(|e| Error::from((e, file!(), line!())))?;
            let writer = if logged {
                &mut self.logged_writer
            } else {
                &mut self.unlogged_writer
            };
            writer.append(now_secs, &line)?;
            self.apply_metadata_record(&record, &mut delta_map)?;
            moved.push(record);
        }
        self.flush()?;
        Ok((moved, delta_map))
    }

    /// Which tree a metadata record belongs to: the target zgram's tree, or
    /// the logged tree for user-keyed records. None if the target is unknown.
    fn record_is_logged(&self, record: &MetadataRecord) -> Option<bool> {
        match record.zgram_id() {
            None => Some(true),
            Some(id) => {
                let off = self.try_find(id)?;
                Some(self.get_zgram_info(off).location.file_key.logged())
            }
        }
    }

    fn apply_metadata_record(
        &mut self,
        record: &MetadataRecord,
        delta_map: &mut PpDeltaMap,
    ) -> Result<(), Error> {
        match record {
            MetadataRecord::Reaction(r) => {
                self.dynamic.set_reaction(r, &self.frozen);
            }
            MetadataRecord::Revision(rev) => {
                let old_body = self.current_body(rev.zgram_id)?;
                let mut deltas = PpDeltas::new();
                PlusPlusScanner::scan(&old_body, -1, &mut deltas);
                PlusPlusScanner::scan(&rev.core.body, 1, &mut deltas);
                self.dynamic.apply_pp_deltas(rev.zgram_id, &deltas);
                if !deltas.is_empty() {
                    delta_map.entry(rev.zgram_id).or_default().extend(deltas);
                }
                self.dynamic.add_revision(rev.zgram_id, rev.core.clone());
            }
            MetadataRecord::RefersTo(rt) => {
                self.dynamic.set_refers_to(rt);
            }
            MetadataRecord::Zmojis(zm) => {
                self.dynamic.set_zmojis(zm);
            }
        }
        Ok(())
    }

    /// The body a revision replaces: the latest revision if any, else the
    /// original body read back from the log.
    fn current_body(&mut self, id: ZgramId) -> Result<String, Error> {
        if let Some(revs) = self.dynamic.metadata().revisions.get(&id) {
            if let Some(last) = revs.last() {
                return Ok(last.body.clone());
            }
        }
        if let Some(revs) = self.frozen.metadata().revisions.get(&id.raw()) {
            if let Some(last) = revs.last() {
                return Ok(last.body.clone());
            }
        }
        let off = self
            .try_find(id)
            .ok_or_else(|| Error::from(ErrorKind::ZgramNotFound(id.raw())))?;
        let location = self.get_zgram_info(off).location;
        let zgrams = self.cache.lookup_or_resolve(&self.paths, &[(id, location)])?;
        Ok(zgrams[0].body().to_string())
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.logged_writer.flush()?;
        self.unlogged_writer.flush()?;
        Ok(())
    }

    /// Flushes both logs and reports their end positions. Everything before
    /// the returned positions is durable.
    pub fn checkpoint(&mut self, now_secs: u64) -> Result<(FilePosition, FilePosition), Error> {
        self.flush()?;
        Ok((
            self.logged_writer.position(now_secs)?,
            self.unlogged_writer.position(now_secs)?,
        ))
    }

    // ----------------------------------------------------------------------
    // Zgram lookup

    pub fn zgram_info_size(&self) -> usize {
        self.frozen.zgram_count() + self.dynamic.zgram_count()
    }

    pub fn word_info_size(&self) -> usize {
        self.frozen.word_count() + self.dynamic.word_count()
    }

    pub fn zgram_end_off(&self) -> ZgramOff {
        ZgramOff(self.zgram_info_size() as u32)
    }

    /// The next id to be assigned.
    pub fn zgram_end(&self) -> ZgramId {
        if let Some(last) = self.dynamic.last_zgram_id() {
            return last.next();
        }
        let frozen_count = self.frozen.zgram_count();
        if frozen_count > 0 {
            return self.frozen.zgram_info(frozen_count - 1).zgram_id.next();
        }
        ZgramId(0)
    }

    pub fn get_zgram_info(&self, off: ZgramOff) -> ZgramInfo {
        let frozen_count = self.frozen.zgram_count();
        let off = off.0 as usize;
        if off < frozen_count {
            self.frozen.zgram_info(off)
        } else {
            *self.dynamic.zgram_info(off - frozen_count)
        }
    }

    pub fn get_word_info(&self, off: WordOff) -> WordInfo {
        let frozen_count = self.frozen.word_count();
        let off = off.0 as usize;
        if off < frozen_count {
            self.frozen.word_info(off)
        } else {
            self.dynamic.word_info(off - frozen_count)
        }
    }

    /// First offset whose zgram id is >= `id`.
    pub fn lower_bound(&self, id: ZgramId) -> ZgramOff {
        let size = self.zgram_info_size();
        let at = partition_point(size, |off| {
            self.get_zgram_info(ZgramOff(off as u32)).zgram_id < id
        });
        ZgramOff(at as u32)
    }

    /// First offset whose timestamp is >= `timesecs`. Timestamps are
    /// nondecreasing in id order, which makes this a binary search.
    pub fn lower_bound_timestamp(&self, timesecs: u64) -> ZgramOff {
        let size = self.zgram_info_size();
        let at = partition_point(size, |off| {
            self.get_zgram_info(ZgramOff(off as u32)).timesecs < timesecs
        });
        ZgramOff(at as u32)
    }

    pub fn try_find(&self, id: ZgramId) -> Option<ZgramOff> {
        let off = self.lower_bound(id);
        if off.0 as usize >= self.zgram_info_size() {
            return None;
        }
        if self.get_zgram_info(off).zgram_id != id {
            return None;
        }
        Some(off)
    }

    /// Resolves zgram bodies through the shared cache.
    pub fn resolve_zgrams(
        &mut self,
        locators: &[(ZgramId, LogLocation)],
    ) -> Result<Vec<Arc<Zgram>>, Error> {
        self.cache.lookup_or_resolve(&self.paths, locators)
    }

    fn cache_insert(&mut self, zgram: Arc<Zgram>) {
        self.cache.insert(zgram);
    }

    // ----------------------------------------------------------------------
    // Word lookup

    /// Invokes the callback with every occurrence list whose word matches.
    pub fn match_words<'a>(
        &'a self,
        matcher: &WordMatcher,
        callback: &mut dyn FnMut(OccurrenceList<'a>),
    ) {
        match matcher {
            WordMatcher::Literal(word) => {
                if let Some(idx) = self.frozen.find_word(word) {
                    callback(OccurrenceList::Frozen(self.frozen.table_occurrences(idx)));
                }
                if let Some(offsets) = self.dynamic.words().get(word) {
                    callback(OccurrenceList::Dynamic(offsets));
                }
            }
            WordMatcher::Prefix(prefix) => {
                for idx in self.frozen.prefix_range(prefix) {
                    callback(OccurrenceList::Frozen(self.frozen.table_occurrences(idx)));
                }
                for (word, offsets) in self.dynamic.words().range(prefix.clone()..) {
                    if !word.starts_with(prefix.as_str()) {
                        break;
                    }
                    callback(OccurrenceList::Dynamic(offsets));
                }
            }
        }
    }

    // ----------------------------------------------------------------------
    // Metadata lookup

    pub fn get_zmojis(&self, user_id: &str) -> String {
        if let Some(zmojis) = self.dynamic.metadata().zmojis.get(user_id) {
            return zmojis.clone();
        }
        self.frozen
            .metadata()
            .zmojis
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The current (folded) reaction count for (reaction, zgram).
    pub fn reaction_net_count(&self, reaction: &str, id: ZgramId) -> i64 {
        let frozen = self.frozen.metadata().reaction_count(reaction, id);
        let dynamic = self
            .dynamic
            .metadata()
            .reaction_counts
            .get(reaction)
            .and_then(|counts| counts.get(&id))
            .copied()
            .unwrap_or(0);
        frozen + dynamic
    }

    /// Sorted candidate ids that may currently carry `reaction`. Callers
    /// still need to check [`Self::reaction_net_count`] > 0.
    pub fn reaction_candidates(&self, reaction: &str) -> Vec<ZgramId> {
        let mut ids = BTreeSet::new();
        if let Some(counts) = self.frozen.metadata().reaction_counts.get(reaction) {
            for entry in counts {
                ids.insert(ZgramId(entry.zgram_id));
            }
        }
        if let Some(counts) = self.dynamic.metadata().reaction_counts.get(reaction) {
            for id in counts.keys() {
                ids.insert(*id);
            }
        }
        ids.into_iter().collect()
    }

    /// The currently present reactions on one zgram.
    pub fn get_reactions_for(&self, id: ZgramId, result: &mut Vec<Reaction>) {
        let mut state: BTreeMap<&str, BTreeMap<&str, bool>> = BTreeMap::new();
        if let Some(by_reaction) = self.frozen.metadata().reactions.get(&id.raw()) {
            for (reaction, users) in by_reaction {
                let entry = state.entry(reaction).or_default();
                for user in users {
                    entry.insert(user, true);
                }
            }
        }
        if let Some(by_reaction) = self.dynamic.metadata().reactions.get(&id) {
            for (reaction, users) in by_reaction {
                let entry = state.entry(reaction).or_default();
                for (user, present) in users {
                    entry.insert(user, *present);
                }
            }
        }
        for (reaction, users) in state {
            for (user, present) in users {
                if present {
                    result.push(Reaction::new(id, reaction, user, true));
                }
            }
        }
    }

    /// The revision history of one zgram, oldest first.
    pub fn get_revisions_for(&self, id: ZgramId, result: &mut Vec<ZgramRevision>) {
        if let Some(revs) = self.frozen.metadata().revisions.get(&id.raw()) {
            for rev in revs {
                result.push(ZgramRevision {
                    zgram_id: id,
                    core: rev.to_core(),
                });
            }
        }
        if let Some(revs) = self.dynamic.metadata().revisions.get(&id) {
            for rev in revs {
                result.push(ZgramRevision {
                    zgram_id: id,
                    core: rev.clone(),
                });
            }
        }
    }

    /// The currently present refers-to links of one zgram.
    pub fn get_refers_to_for(&self, id: ZgramId, result: &mut Vec<ZgramRefersTo>) {
        let mut state: BTreeMap<ZgramId, bool> = BTreeMap::new();
        if let Some(targets) = self.frozen.metadata().refers_to.get(&id.raw()) {
            for target in targets {
                state.insert(ZgramId(*target), true);
            }
        }
        if let Some(targets) = self.dynamic.metadata().refers_to.get(&id) {
            for (target, present) in targets {
                state.insert(*target, *present);
            }
        }
        for (target, present) in state {
            if present {
                result.push(ZgramRefersTo {
                    zgram_id: id,
                    refers_to: target,
                    present: true,
                });
            }
        }
    }

    /// Everything currently known about one zgram, appended to `result`.
    pub fn get_metadata_for(&self, id: ZgramId, result: &mut Vec<MetadataRecord>) {
        let mut reactions = Vec::new();
        self.get_reactions_for(id, &mut reactions);
        result.extend(reactions.into_iter().map(MetadataRecord::Reaction));

        let mut revisions = Vec::new();
        self.get_revisions_for(id, &mut revisions);
        result.extend(revisions.into_iter().map(MetadataRecord::Revision));

        let mut refers = Vec::new();
        self.get_refers_to_for(id, &mut refers);
        result.extend(refers.into_iter().map(MetadataRecord::RefersTo));
    }

    // ----------------------------------------------------------------------
    // Plus-plus lookup

    /// The running count of `key` up to and including `id`'s position.
    pub fn get_plus_plus_count_after(&self, id: ZgramId, key: &str) -> i64 {
        self.frozen.metadata().plus_plus_count_after(id, key)
            + self.dynamic.metadata().plus_plus_count_after(id, key)
    }

    /// The keys mentioned by one zgram.
    pub fn get_plus_plus_keys(&self, id: ZgramId) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        self.frozen.metadata().plus_plus_keys(id, &mut keys);
        self.dynamic.metadata().plus_plus_keys(id, &mut keys);
        keys
    }

    /// All zgrams in [begin, end) mentioning `key`, sorted and deduped.
    pub fn gather_pp_mentions(&self, key: &str, begin: ZgramId, end: ZgramId) -> Vec<ZgramId> {
        let mut ids = Vec::new();
        self.frozen.metadata().gather_mentions(key, begin, end, &mut ids);
        self.dynamic.metadata().gather_mentions(key, begin, end, &mut ids);
        ids.sort();
        ids.dedup();
        ids
    }
}

fn is_graffiti_instance(instance: &str) -> bool {
    instance
        .get(..magic::GRAFFITI_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(magic::GRAFFITI_PREFIX))
}

fn partition_point(size: usize, pred: impl Fn(usize) -> bool) -> usize {
    let mut lo = 0;
    let mut hi = size;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
