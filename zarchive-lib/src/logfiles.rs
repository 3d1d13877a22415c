//! The append-only plaintext log trees: date-partitioned file keys, byte
//! positions within them, and the scanner that replays a range of records.
//!
//! There are two independent trees, "logged" (permanent) and "unlogged"
//! (graffiti, short retention). Each file holds one UTC day of JSON-line
//! records.

use crate::error::Error;
use crate::zgram::LogRecord;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::Path;
use time::OffsetDateTime;

/// Identifies one log file: a UTC date plus which tree it belongs to.
/// Encoded as `(yyyymmdd << 1) | logged` so keys order by date.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileKey(u32);

impl FileKey {
    pub fn new(yyyymmdd: u32, logged: bool) -> FileKey {
        FileKey((yyyymmdd << 1) | (logged as u32))
    }

    pub fn from_ymd(year: u32, month: u32, day: u32, logged: bool) -> FileKey {
        FileKey::new(year * 10000 + month * 100 + day, logged)
    }

    /// The file key for the UTC day containing `timesecs`.
    pub fn from_timesecs(timesecs: u64, logged: bool) -> Result<FileKey, Error> {
        let odt = OffsetDateTime::from_unix_timestamp(timesecs as i64)
            .map_err(|e| crate::error::ErrorKind::BadFileKey(format!("timestamp {timesecs}: {e}")))?;
        let date = odt.date();
        Ok(FileKey::from_ymd(
            date.year() as u32,
            u8::from(date.month()) as u32,
            date.day() as u32,
            logged,
        ))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> FileKey {
        FileKey(raw)
    }

    pub fn yyyymmdd(self) -> u32 {
        self.0 >> 1
    }

    pub fn logged(self) -> bool {
        (self.0 & 1) != 0
    }

    pub fn file_name(self) -> String {
        format!("{:08}.log", self.yyyymmdd())
    }

    /// Parses a `YYYYMMDD.log` name back into a key.
    pub fn from_file_name(name: &str, logged: bool) -> Option<FileKey> {
        let stem = name.strip_suffix(".log")?;
        if stem.len() != 8 || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(FileKey::new(stem.parse().ok()?, logged))
    }
}

impl std::fmt::Display for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{:08}",
            if self.logged() { "logged" } else { "unlogged" },
            self.yyyymmdd()
        )
    }
}

/// A byte position within one log tree: (file, offset).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilePosition {
    pub file_key: FileKey,
    pub offset: u64,
}

impl FilePosition {
    pub fn new(file_key: FileKey, offset: u64) -> FilePosition {
        FilePosition { file_key, offset }
    }

    /// The earliest representable position of a tree.
    pub fn zero(logged: bool) -> FilePosition {
        FilePosition {
            file_key: FileKey::new(0, logged),
            offset: 0,
        }
    }
}

/// A half-open range of one log tree: [begin, end).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterFileRange {
    pub begin: FilePosition,
    pub end: FilePosition,
}

impl InterFileRange {
    pub fn new(begin: FilePosition, end: FilePosition) -> InterFileRange {
        InterFileRange { begin, end }
    }

    /// The whole tree: zero through "far future".
    pub fn everything(logged: bool) -> InterFileRange {
        InterFileRange {
            begin: FilePosition::zero(logged),
            end: FilePosition::new(FileKey::new(99991231, logged), u64::MAX),
        }
    }
}

/// Where one zgram's log record lives, compact enough to embed in the index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogLocation {
    pub file_key: FileKey,
    pub offset: u32,
    pub size: u32,
}

impl LogLocation {
    pub fn new(file_key: FileKey, offset: u32, size: u32) -> LogLocation {
        LogLocation {
            file_key,
            offset,
            size,
        }
    }
}

/// Scans every record of one tree inside `range`, in (file, offset) order,
/// invoking the callback with each parsed record and its location.
pub fn scan_log_range(
    dir: &Path,
    logged: bool,
    range: &InterFileRange,
    callback: &mut dyn FnMut(LogRecord, LogLocation) -> Result<(), Error>,
) -> Result<(), Error> {
    let mut keys = list_log_keys(dir, logged)?;
    keys.retain(|k| *k >= range.begin.file_key && *k <= range.end.file_key);
    keys.sort();

    for key in keys {
        let path = dir.join(key.file_name());
        let file = std::fs::File::open(&path).map_err(|e| (e, file!(), line!()))?;
        let mut reader = BufReader::new(file);
        let mut offset: u64 = 0;
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).map_err(|e| (e, file!(), line!()))?;
            if n == 0 {
                break;
            }
            let record_offset = offset;
            offset += n as u64;

            if key == range.begin.file_key && record_offset < range.begin.offset {
                continue;
            }
            if key == range.end.file_key && record_offset >= range.end.offset {
                break;
            }

            let trimmed = line.trim_end_matches('\n');
            if trimmed.is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(trimmed)
                .map_err(|e| Error::from((e, file!(), line!())))?;
            let location = LogLocation::new(key, record_offset as u32, n as u32);
            callback(record, location)?;
        }
    }
    Ok(())
}

/// The file keys present in one tree's directory.
pub fn list_log_keys(dir: &Path, logged: bool) -> Result<Vec<FileKey>, Error> {
    let mut keys = Vec::new();
    if !dir.exists() {
        return Ok(keys);
    }
    for entry in std::fs::read_dir(dir).map_err(|e| (e, file!(), line!()))? {
        let entry = entry.map_err(|e| (e, file!(), line!()))?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(key) = FileKey::from_file_name(name, logged) {
                keys.push(key);
            }
        }
    }
    keys.sort();
    Ok(keys)
}

/// Reads the single log record at `location`.
pub fn read_record_at(dir: &Path, location: &LogLocation) -> Result<LogRecord, Error> {
    use std::io::{Read, Seek, SeekFrom};
    let path = dir.join(location.file_key.file_name());
    let mut file = std::fs::File::open(&path).map_err(|e| (e, file!(), line!()))?;
    file.seek(SeekFrom::Start(location.offset as u64))
        .map_err(|e| (e, file!(), line!()))?;
    let mut buf = vec![0u8; location.size as usize];
    file.read_exact(&mut buf).map_err(|e| (e, file!(), line!()))?;
    let text = std::str::from_utf8(&buf).map_err(|e| (e, file!(), line!()))?;
    let record = serde_json::from_str(text.trim_end_matches('\n'))
        .map_err(|e| Error::from((e, file!(), line!())))?;
    Ok(record)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_file_key_ordering() {
        let a = FileKey::from_ymd(2000, 1, 1, true);
        let b = FileKey::from_ymd(2000, 1, 2, true);
        let c = FileKey::from_ymd(2000, 1, 10, true);
        assert!(a < b && b < c);
        assert_eq!(a.file_name(), "20000101.log");
        assert_eq!(FileKey::from_file_name("20000101.log", true), Some(a));
        assert_eq!(FileKey::from_file_name("garbage.log", true), None);
    }

    #[test]
    fn test_file_key_from_timesecs() {
        // 2000-01-01T00:00:00Z
        let key = FileKey::from_timesecs(946684800, true).unwrap();
        assert_eq!(key.yyyymmdd(), 20000101);
        assert!(key.logged());
    }
}
