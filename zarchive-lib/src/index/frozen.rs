//! The read-only, memory-mapped index tier.
//!
//! File layout (all little-endian): a fixed header, then the zgram-info
//! array, the word-info array, the sorted word table, the string pool, the
//! occurrence array, and finally a speedy-encoded metadata dictionary blob.
//! The array sections are addressed directly in the mapped bytes; the
//! dictionary blob is decoded once at open.

use crate::error::{Error, ErrorKind};
use crate::index::dynamic::DynamicIndex;
use crate::index::types::{WordInfo, WordOff, ZgramInfo};
use crate::logfiles::{FileKey, FilePosition};
use crate::zgram::{RenderStyle, ZgramCore, ZgramId};
use memmap2::Mmap;
use speedy::{Readable, Writable};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8; 8] = b"ZARCHIV1";
const HEADER_SIZE: usize = 80;
const WORD_TABLE_ENTRY_SIZE: usize = 16;

#[derive(Clone, Debug, Default, PartialEq, Readable, Writable)]
pub struct FrozenZgramCore {
    pub instance: String,
    pub body: String,
    pub style: u8,
}

impl From<&ZgramCore> for FrozenZgramCore {
    fn from(core: &ZgramCore) -> FrozenZgramCore {
        FrozenZgramCore {
            instance: core.instance.clone(),
            body: core.body.clone(),
            style: core.render_style as u8,
        }
    }
}

impl FrozenZgramCore {
    pub fn to_core(&self) -> ZgramCore {
        let render_style = match self.style {
            1 => RenderStyle::Monospace,
            2 => RenderStyle::MathJax,
            _ => RenderStyle::Default,
        };
        ZgramCore {
            instance: self.instance.clone(),
            body: self.body.clone(),
            render_style,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Readable, Writable)]
pub struct FrozenReactionCount {
    pub zgram_id: u64,
    pub count: u32,
}

/// The folded metadata dictionaries of the frozen tier. Built by replaying a
/// log range, so tombstoned entries are simply absent.
#[derive(Debug, Default, Readable, Writable)]
pub struct FrozenMetadata {
    /// zgram -> reaction -> users currently reacting.
    pub reactions: BTreeMap<u64, BTreeMap<String, Vec<String>>>,
    /// reaction -> (zgram, count) sorted by zgram, count > 0 only.
    pub reaction_counts: BTreeMap<String, Vec<FrozenReactionCount>>,
    /// zgram -> revision history, oldest first.
    pub revisions: BTreeMap<u64, Vec<FrozenZgramCore>>,
    /// zgram -> ids it currently refers to, sorted.
    pub refers_to: BTreeMap<u64, Vec<u64>>,
    pub zmojis: BTreeMap<String, String>,
    /// key -> sorted mention ids, one entry per +1.
    pub plus_pluses: BTreeMap<String, Vec<u64>>,
    /// key -> sorted mention ids, one entry per -1.
    pub minus_minuses: BTreeMap<String, Vec<u64>>,
}

impl FrozenMetadata {
    pub fn reaction_present(&self, id: ZgramId, reaction: &str, user: &str) -> bool {
        self.reactions
            .get(&id.raw())
            .and_then(|by_reaction| by_reaction.get(reaction))
            .map(|users| users.iter().any(|u| u == user))
            .unwrap_or(false)
    }

    pub fn reaction_count(&self, reaction: &str, id: ZgramId) -> i64 {
        let Some(counts) = self.reaction_counts.get(reaction) else {
            return 0;
        };
        match counts.binary_search_by_key(&id.raw(), |c| c.zgram_id) {
            Ok(at) => counts[at].count as i64,
            Err(_) => 0,
        }
    }

    pub fn plus_plus_count_after(&self, id: ZgramId, key: &str) -> i64 {
        count_le(self.plus_pluses.get(key), id) - count_le(self.minus_minuses.get(key), id)
    }

    pub fn plus_plus_keys(&self, id: ZgramId, out: &mut BTreeSet<String>) {
        for (key, ids) in self.plus_pluses.iter().chain(self.minus_minuses.iter()) {
            if ids.binary_search(&id.raw()).is_ok() {
                out.insert(key.clone());
            }
        }
    }

    pub fn gather_mentions(&self, key: &str, begin: ZgramId, end: ZgramId, out: &mut Vec<ZgramId>) {
        for dict in [&self.plus_pluses, &self.minus_minuses] {
            if let Some(ids) = dict.get(key) {
                let lo = ids.partition_point(|z| *z < begin.raw());
                let hi = ids.partition_point(|z| *z < end.raw());
                out.extend(ids[lo..hi].iter().map(|raw| ZgramId(*raw)));
            }
        }
    }
}

fn count_le(ids: Option<&Vec<u64>>, id: ZgramId) -> i64 {
    match ids {
        Some(v) => v.partition_point(|z| *z <= id.raw()) as i64,
        None => 0,
    }
}

/// One entry of the sorted word table: where the folded word lives in the
/// string pool, and where its occurrences live in the occurrence array.
#[derive(Clone, Copy, Debug)]
struct WordTableEntry {
    pool_off: u32,
    pool_len: u32,
    occ_start: u32,
    occ_count: u32,
}

/// The mapped frozen index. All zgram/word lookups read the mapped bytes;
/// metadata dictionaries are decoded once at open.
#[derive(Debug, Default)]
pub struct FrozenIndex {
    map: Option<Mmap>,
    zgram_count: usize,
    word_count: usize,
    word_table_len: usize,
    zgram_infos_at: usize,
    word_infos_at: usize,
    word_table_at: usize,
    string_pool_at: usize,
    occs_at: usize,
    metadata: FrozenMetadata,
    logged_end: FilePosition,
    unlogged_end: FilePosition,
}

impl FrozenIndex {
    /// An index over nothing, with coverage starting at position zero of
    /// both trees.
    pub fn empty() -> FrozenIndex {
        FrozenIndex {
            logged_end: FilePosition::zero(true),
            unlogged_end: FilePosition::zero(false),
            ..Default::default()
        }
    }

    pub fn open(path: &Path) -> Result<FrozenIndex, Error> {
        let file = std::fs::File::open(path).map_err(|e| (e, file!(), line!()))?;
        // Safety: the file is replaced only by atomic rename and never
        // written in place, so the mapping stays stable for its lifetime.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| (e, file!(), line!()))?;
        let bytes: &[u8] = &map;
        if bytes.len() < HEADER_SIZE || &bytes[0..8] != MAGIC {
            return Err(ErrorKind::CorruptIndex(format!("{}: bad header", path.display())).into());
        }
        let u64_at = |at: usize| u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap());
        let u32_at = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());

        let zgram_count = u64_at(8) as usize;
        let word_count = u64_at(16) as usize;
        let word_table_len = u64_at(24) as usize;
        let string_pool_len = u64_at(32) as usize;
        let occ_len = u64_at(40) as usize;
        let meta_len = u64_at(48) as usize;
        let logged_end = FilePosition::new(FileKey::from_raw(u32_at(56)), u64_at(64));
        let unlogged_end = FilePosition::new(FileKey::from_raw(u32_at(60)), u64_at(72));

        let zgram_infos_at = HEADER_SIZE;
        let word_infos_at = zgram_infos_at + zgram_count * ZgramInfo::ENCODED_SIZE;
        let word_table_at = word_infos_at + word_count * 4;
        let string_pool_at = word_table_at + word_table_len * WORD_TABLE_ENTRY_SIZE;
        let occs_at = string_pool_at + string_pool_len;
        let meta_at = occs_at + occ_len * 4;
        if bytes.len() < meta_at + meta_len {
            return Err(ErrorKind::CorruptIndex(format!(
                "{}: truncated ({} < {})",
                path.display(),
                bytes.len(),
                meta_at + meta_len
            ))
            .into());
        }

        let metadata = FrozenMetadata::read_from_buffer(&bytes[meta_at..meta_at + meta_len])
            .map_err(|e| Error::from((e, file!(), line!())))?;

        Ok(FrozenIndex {
            map: Some(map),
            zgram_count,
            word_count,
            word_table_len,
            zgram_infos_at,
            word_infos_at,
            word_table_at,
            string_pool_at,
            occs_at,
            metadata,
            logged_end,
            unlogged_end,
        })
    }

    /// Serializes one fully accumulated tier (held as a [`DynamicIndex`]
    /// whose word offsets start at zero) into the frozen file format.
    pub fn write(
        path: &Path,
        accumulated: &DynamicIndex,
        metadata: &FrozenMetadata,
        logged_end: FilePosition,
        unlogged_end: FilePosition,
    ) -> Result<(), Error> {
        let mut pool = Vec::new();
        let mut table = Vec::new();
        let mut occs: Vec<u32> = Vec::new();
        for (word, offsets) in accumulated.words() {
            table.push(WordTableEntry {
                pool_off: pool.len() as u32,
                pool_len: word.len() as u32,
                occ_start: occs.len() as u32,
                occ_count: offsets.len() as u32,
            });
            pool.extend_from_slice(word.as_bytes());
            occs.extend(offsets.iter().map(|off| off.0));
        }
        let meta_blob = metadata
            .write_to_vec()
            .map_err(|e| Error::from((e, file!(), line!())))?;

        let mut header = [0u8; HEADER_SIZE];
        header[0..8].copy_from_slice(MAGIC);
        header[8..16].copy_from_slice(&(accumulated.zgram_count() as u64).to_le_bytes());
        header[16..24].copy_from_slice(&(accumulated.word_count() as u64).to_le_bytes());
        header[24..32].copy_from_slice(&(table.len() as u64).to_le_bytes());
        header[32..40].copy_from_slice(&(pool.len() as u64).to_le_bytes());
        header[40..48].copy_from_slice(&(occs.len() as u64).to_le_bytes());
        header[48..56].copy_from_slice(&(meta_blob.len() as u64).to_le_bytes());
        header[56..60].copy_from_slice(&logged_end.file_key.raw().to_le_bytes());
        header[60..64].copy_from_slice(&unlogged_end.file_key.raw().to_le_bytes());
        header[64..72].copy_from_slice(&logged_end.offset.to_le_bytes());
        header[72..80].copy_from_slice(&unlogged_end.offset.to_le_bytes());

        let file = std::fs::File::create(path).map_err(|e| (e, file!(), line!()))?;
        let mut writer = std::io::BufWriter::new(file);
        writer.write_all(&header).map_err(|e| (e, file!(), line!()))?;
        let mut info_buf = [0u8; ZgramInfo::ENCODED_SIZE];
        for info in accumulated.zgram_infos() {
            info.write_to(&mut info_buf);
            writer.write_all(&info_buf).map_err(|e| (e, file!(), line!()))?;
        }
        for wi in accumulated.word_infos() {
            writer
                .write_all(&wi.raw().to_le_bytes())
                .map_err(|e| (e, file!(), line!()))?;
        }
        for entry in &table {
            writer
                .write_all(&entry.pool_off.to_le_bytes())
                .map_err(|e| (e, file!(), line!()))?;
            writer
                .write_all(&entry.pool_len.to_le_bytes())
                .map_err(|e| (e, file!(), line!()))?;
            writer
                .write_all(&entry.occ_start.to_le_bytes())
                .map_err(|e| (e, file!(), line!()))?;
            writer
                .write_all(&entry.occ_count.to_le_bytes())
                .map_err(|e| (e, file!(), line!()))?;
        }
        writer.write_all(&pool).map_err(|e| (e, file!(), line!()))?;
        for occ in &occs {
            writer
                .write_all(&occ.to_le_bytes())
                .map_err(|e| (e, file!(), line!()))?;
        }
        writer.write_all(&meta_blob).map_err(|e| (e, file!(), line!()))?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::from(ErrorKind::Io(e.into_error())))?;
        file.sync_all().map_err(|e| (e, file!(), line!()))?;
        Ok(())
    }

    pub fn zgram_count(&self) -> usize {
        self.zgram_count
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn metadata(&self) -> &FrozenMetadata {
        &self.metadata
    }

    pub fn logged_end(&self) -> FilePosition {
        self.logged_end
    }

    pub fn unlogged_end(&self) -> FilePosition {
        self.unlogged_end
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn zgram_info(&self, off: usize) -> ZgramInfo {
        debug_assert!(off < self.zgram_count);
        let at = self.zgram_infos_at + off * ZgramInfo::ENCODED_SIZE;
        ZgramInfo::read_from(&self.bytes()[at..at + ZgramInfo::ENCODED_SIZE])
            .expect("frozen zgram info slice has the right length")
    }

    pub fn word_info(&self, off: usize) -> WordInfo {
        debug_assert!(off < self.word_count);
        let at = self.word_infos_at + off * 4;
        WordInfo::from_raw(u32::from_le_bytes(
            self.bytes()[at..at + 4].try_into().unwrap(),
        ))
    }

    fn table_entry(&self, idx: usize) -> WordTableEntry {
        let at = self.word_table_at + idx * WORD_TABLE_ENTRY_SIZE;
        let bytes = self.bytes();
        let u32_at = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        WordTableEntry {
            pool_off: u32_at(at),
            pool_len: u32_at(at + 4),
            occ_start: u32_at(at + 8),
            occ_count: u32_at(at + 12),
        }
    }

    /// The folded word at a table index.
    pub fn table_word(&self, idx: usize) -> &str {
        let entry = self.table_entry(idx);
        let at = self.string_pool_at + entry.pool_off as usize;
        std::str::from_utf8(&self.bytes()[at..at + entry.pool_len as usize])
            .expect("frozen string pool holds UTF-8")
    }

    /// The sorted occurrence list of the word at a table index.
    pub fn table_occurrences(&self, idx: usize) -> FrozenOccurrences<'_> {
        let entry = self.table_entry(idx);
        let at = self.occs_at + entry.occ_start as usize * 4;
        FrozenOccurrences {
            bytes: &self.bytes()[at..at + entry.occ_count as usize * 4],
        }
    }

    /// Binary search for an exact folded word.
    pub fn find_word(&self, folded: &str) -> Option<usize> {
        let mut lo = 0;
        let mut hi = self.word_table_len;
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.table_word(mid).cmp(folded) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// The contiguous table range of words starting with `folded_prefix`.
    pub fn prefix_range(&self, folded_prefix: &str) -> std::ops::Range<usize> {
        let lower = self.partition(|w| w < folded_prefix);
        let upper = self.partition(|w| w < folded_prefix || w.starts_with(folded_prefix));
        lower..upper.max(lower)
    }

    fn partition(&self, pred: impl Fn(&str) -> bool) -> usize {
        let mut lo = 0;
        let mut hi = self.word_table_len;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if pred(self.table_word(mid)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

/// A zero-copy view of one word's occurrence array.
#[derive(Clone, Copy, Debug)]
pub struct FrozenOccurrences<'a> {
    bytes: &'a [u8],
}

impl<'a> FrozenOccurrences<'a> {
    pub fn len(&self) -> usize {
        self.bytes.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, i: usize) -> WordOff {
        WordOff(u32::from_le_bytes(self.bytes[i * 4..i * 4 + 4].try_into().unwrap()))
    }
}
