//! The compact, fixed-layout descriptors the reverse index is made of.

use crate::error::{Error, ErrorKind};
use crate::logfiles::{FileKey, LogLocation};
use crate::zgram::ZgramId;

/// An offset into the consolidated zgram-info array. Offsets below the
/// frozen tier's size address the frozen array; the rest address the
/// dynamic array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZgramOff(pub u32);

/// An offset into the consolidated word-info array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WordOff(pub u32);

/// Which field of a zgram a word occurrence came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldTag {
    Sender = 0,
    Signature = 1,
    Instance = 2,
    Body = 3,
}

impl FieldTag {
    pub const COUNT: usize = 4;

    pub fn from_raw(raw: u32) -> FieldTag {
        match raw & 0x7 {
            0 => FieldTag::Sender,
            1 => FieldTag::Signature,
            2 => FieldTag::Instance,
            _ => FieldTag::Body,
        }
    }
}

/// A bitmask of [`FieldTag`]s, used to scope word matches to fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldMask(pub u8);

impl FieldMask {
    pub const ALL: FieldMask = FieldMask(0b1111);

    pub fn of(tag: FieldTag) -> FieldMask {
        FieldMask(1 << (tag as u8))
    }

    pub fn contains(self, tag: FieldTag) -> bool {
        (self.0 >> (tag as u8)) & 1 != 0
    }
}

/// The index record for one zgram. Fixed 40-byte little-endian layout so the
/// frozen tier can address records directly in the mapped file.
///
/// Invariant: within one tier,
/// `info[i].starting_word_off + info[i].total_word_length() == info[i+1].starting_word_off`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZgramInfo {
    pub timesecs: u64,
    pub location: LogLocation,
    pub zgram_id: ZgramId,
    pub starting_word_off: WordOff,
    pub sender_word_length: u16,
    pub signature_word_length: u16,
    pub instance_word_length: u16,
    pub body_word_length: u16,
}

impl ZgramInfo {
    pub const ENCODED_SIZE: usize = 40;

    pub fn total_word_length(&self) -> u32 {
        self.sender_word_length as u32
            + self.signature_word_length as u32
            + self.instance_word_length as u32
            + self.body_word_length as u32
    }

    /// The word-length of `tag`'s field.
    pub fn word_length(&self, tag: FieldTag) -> u16 {
        match tag {
            FieldTag::Sender => self.sender_word_length,
            FieldTag::Signature => self.signature_word_length,
            FieldTag::Instance => self.instance_word_length,
            FieldTag::Body => self.body_word_length,
        }
    }

    pub fn write_to(&self, out: &mut [u8]) {
        assert_eq!(out.len(), Self::ENCODED_SIZE);
        out[0..8].copy_from_slice(&self.timesecs.to_le_bytes());
        out[8..12].copy_from_slice(&self.location.file_key.raw().to_le_bytes());
        out[12..16].copy_from_slice(&self.location.offset.to_le_bytes());
        out[16..20].copy_from_slice(&self.location.size.to_le_bytes());
        out[20..28].copy_from_slice(&self.zgram_id.raw().to_le_bytes());
        out[28..32].copy_from_slice(&self.starting_word_off.0.to_le_bytes());
        out[32..34].copy_from_slice(&self.sender_word_length.to_le_bytes());
        out[34..36].copy_from_slice(&self.signature_word_length.to_le_bytes());
        out[36..38].copy_from_slice(&self.instance_word_length.to_le_bytes());
        out[38..40].copy_from_slice(&self.body_word_length.to_le_bytes());
    }

    pub fn read_from(bytes: &[u8]) -> Result<ZgramInfo, Error> {
        if bytes.len() != Self::ENCODED_SIZE {
            return Err(ErrorKind::CorruptIndex(format!(
                "zgram info record has {} bytes",
                bytes.len()
            ))
            .into());
        }
        let u64_at = |at: usize| u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap());
        let u32_at = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        let u16_at = |at: usize| u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap());
        Ok(ZgramInfo {
            timesecs: u64_at(0),
            location: LogLocation::new(FileKey::from_raw(u32_at(8)), u32_at(12), u32_at(16)),
            zgram_id: ZgramId(u64_at(20)),
            starting_word_off: WordOff(u32_at(28)),
            sender_word_length: u16_at(32),
            signature_word_length: u16_at(34),
            instance_word_length: u16_at(36),
            body_word_length: u16_at(38),
        })
    }
}

/// One word occurrence: which zgram it belongs to and which field it came
/// from, packed 29/3 into 32 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct WordInfo(u32);

impl WordInfo {
    pub const MAX_ZGRAM_OFF: u32 = (1 << 29) - 1;

    pub fn new(zgram_off: ZgramOff, field_tag: FieldTag) -> WordInfo {
        debug_assert!(zgram_off.0 <= Self::MAX_ZGRAM_OFF);
        WordInfo((zgram_off.0 & Self::MAX_ZGRAM_OFF) | ((field_tag as u32) << 29))
    }

    pub fn zgram_off(self) -> ZgramOff {
        ZgramOff(self.0 & Self::MAX_ZGRAM_OFF)
    }

    pub fn field_tag(self) -> FieldTag {
        FieldTag::from_raw(self.0 >> 29)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> WordInfo {
        WordInfo(raw)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_zgram_info_round_trip() {
        let info = ZgramInfo {
            timesecs: 946684812,
            location: LogLocation::new(FileKey::from_ymd(2000, 1, 1, true), 1234, 99),
            zgram_id: ZgramId(12),
            starting_word_off: WordOff(345),
            sender_word_length: 1,
            signature_word_length: 2,
            instance_word_length: 2,
            body_word_length: 10,
        };
        let mut buf = [0u8; ZgramInfo::ENCODED_SIZE];
        info.write_to(&mut buf);
        let back = ZgramInfo::read_from(&buf).unwrap();
        assert_eq!(back, info);
        assert_eq!(back.total_word_length(), 15);
    }

    #[test]
    fn test_word_info_packing() {
        for (off, tag) in [
            (0u32, FieldTag::Sender),
            (12345, FieldTag::Instance),
            (WordInfo::MAX_ZGRAM_OFF, FieldTag::Body),
        ] {
            let wi = WordInfo::new(ZgramOff(off), tag);
            assert_eq!(wi.zgram_off(), ZgramOff(off));
            assert_eq!(wi.field_tag(), tag);
            let back = WordInfo::from_raw(wi.raw());
            assert_eq!(back, wi);
        }
    }

    #[test]
    fn test_field_mask() {
        let mask = FieldMask::of(FieldTag::Sender);
        assert!(mask.contains(FieldTag::Sender));
        assert!(!mask.contains(FieldTag::Body));
        assert!(FieldMask::ALL.contains(FieldTag::Signature));
    }
}
