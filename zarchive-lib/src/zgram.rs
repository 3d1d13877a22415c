//! The archive's core data model: zgrams, their identifiers, and the
//! append-only metadata records that decorate them.

use serde::{Deserialize, Serialize};

/// The permanent identifier of a zgram, assigned by the coordinator at post
/// time. Ids are monotonically non-decreasing across the whole archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZgramId(pub u64);

impl ZgramId {
    pub fn raw(self) -> u64 {
        self.0
    }

    /// The successor id. Used to form half-open id ranges.
    pub fn next(self) -> ZgramId {
        ZgramId(self.0 + 1)
    }
}

impl std::fmt::Display for ZgramId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the frontend should render a zgram body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderStyle {
    #[default]
    Default,
    Monospace,
    MathJax,
}

impl RenderStyle {
    fn as_tag(self) -> &'static str {
        match self {
            RenderStyle::Default => "d",
            RenderStyle::Monospace => "m",
            RenderStyle::MathJax => "x",
        }
    }
}

impl Serialize for RenderStyle {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_tag())
    }
}

impl<'de> Deserialize<'de> for RenderStyle {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag: std::borrow::Cow<'de, str> = Deserialize::deserialize(deserializer)?;
        match tag.as_ref() {
            "d" => Ok(RenderStyle::Default),
            "m" => Ok(RenderStyle::Monospace),
            "x" => Ok(RenderStyle::MathJax),
            other => Err(serde::de::Error::unknown_variant(other, &["d", "m", "x"])),
        }
    }
}

/// The author-supplied part of a zgram. Everything else (id, timestamp,
/// sender, signature, logged bit) is stamped on by the coordinator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ZgramCore {
    pub instance: String,
    pub body: String,
    pub render_style: RenderStyle,
}
tuple_json!(ZgramCore, 3, [instance, body, render_style]);

impl ZgramCore {
    pub fn new(instance: impl Into<String>, body: impl Into<String>, render_style: RenderStyle) -> Self {
        ZgramCore {
            instance: instance.into(),
            body: body.into(),
            render_style,
        }
    }
}

/// A complete, immutable zgram. Once assigned an id it never mutates; edits
/// arrive later as [`ZgramRevision`] metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Zgram {
    pub id: ZgramId,
    pub timesecs: u64,
    pub sender: String,
    pub signature: String,
    pub logged: bool,
    pub core: ZgramCore,
}
tuple_json!(Zgram, 6, [id, timesecs, sender, signature, logged, core]);

impl Zgram {
    pub fn instance(&self) -> &str {
        &self.core.instance
    }

    pub fn body(&self) -> &str {
        &self.core.body
    }
}

/// A reaction (emoji) applied to or removed from a zgram by a user.
/// `present = false` is the tombstone that revokes an earlier reaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reaction {
    pub zgram_id: ZgramId,
    pub reaction: String,
    pub creator: String,
    pub present: bool,
}
tuple_json!(Reaction, 4, [zgram_id, reaction, creator, present]);

impl Reaction {
    pub fn new(
        zgram_id: ZgramId,
        reaction: impl Into<String>,
        creator: impl Into<String>,
        present: bool,
    ) -> Self {
        Reaction {
            zgram_id,
            reaction: reaction.into(),
            creator: creator.into(),
            present,
        }
    }
}

/// A replacement body for an existing zgram. The latest revision wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZgramRevision {
    pub zgram_id: ZgramId,
    pub core: ZgramCore,
}
tuple_json!(ZgramRevision, 2, [zgram_id, core]);

/// A "this zgram refers to that zgram" link, also tombstoneable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZgramRefersTo {
    pub zgram_id: ZgramId,
    pub refers_to: ZgramId,
    pub present: bool,
}
tuple_json!(ZgramRefersTo, 3, [zgram_id, refers_to, present]);

/// A user's personal emoji palette. The latest record for a user wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Zmojis {
    pub user_id: String,
    pub zmojis: String,
}
tuple_json!(Zmojis, 2, [user_id, zmojis]);

/// The append-only metadata stream. Logical state is the fold of these
/// records: latest for a (kind, key) tuple wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataRecord {
    Reaction(Reaction),
    Revision(ZgramRevision),
    RefersTo(ZgramRefersTo),
    Zmojis(Zmojis),
}
tagged_json!(MetadataRecord {
    "rx" => Reaction,
    "zgrev" => Revision,
    "ref" => RefersTo,
    "zmojis" => Zmojis,
});

impl MetadataRecord {
    /// The zgram this record targets, if it targets one (zmojis do not).
    pub fn zgram_id(&self) -> Option<ZgramId> {
        match self {
            MetadataRecord::Reaction(r) => Some(r.zgram_id),
            MetadataRecord::Revision(r) => Some(r.zgram_id),
            MetadataRecord::RefersTo(r) => Some(r.zgram_id),
            MetadataRecord::Zmojis(_) => None,
        }
    }

    /// The user this record belongs to, if it is user-keyed.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            MetadataRecord::Zmojis(z) => Some(&z.user_id),
            _ => None,
        }
    }
}

/// One line of a plaintext log file: either a new zgram or a metadata record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogRecord {
    Zgram(Zgram),
    Metadata(MetadataRecord),
}
tagged_json!(LogRecord {
    "z" => Zgram,
    "m" => Metadata,
});

/// Who a session claims to be. Established by the Hello handshake and
/// immutable for the life of the session. The signature is display text,
/// not a cryptographic signature.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub signature: String,
}

impl Profile {
    pub fn new(user_id: impl Into<String>, signature: impl Into<String>) -> Self {
        Profile {
            user_id: user_id.into(),
            signature: signature.into(),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.user_id, self.signature)
    }
}

/// Where a new subscription starts paging from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchOrigin {
    /// The end of the archive (the next id to be assigned).
    #[default]
    End,
    /// The first zgram at or after this timestamp (seconds).
    Timestamp(u64),
    /// A specific zgram id.
    ZgramId(ZgramId),
}

impl Serialize for SearchOrigin {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeTuple;
        let mut tup = serializer.serialize_tuple(2)?;
        match self {
            SearchOrigin::End => {
                tup.serialize_element("unit")?;
                tup.serialize_element(&())?;
            }
            SearchOrigin::Timestamp(ts) => {
                tup.serialize_element("timestamp")?;
                tup.serialize_element(ts)?;
            }
            SearchOrigin::ZgramId(id) => {
                tup.serialize_element("zgramId")?;
                tup.serialize_element(id)?;
            }
        }
        tup.end()
    }
}

impl<'de> Deserialize<'de> for SearchOrigin {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OriginVisitor;
        impl<'de> serde::de::Visitor<'de> for OriginVisitor {
            type Value = SearchOrigin;
            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "a [tag, payload] search origin")
            }
            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<SearchOrigin, A::Error> {
                let tag: std::borrow::Cow<'de, str> = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                match tag.as_ref() {
                    "unit" => {
                        let _: () = seq
                            .next_element()?
                            .ok_or_else(|| serde::de::Error::invalid_length(1, &self))?;
                        Ok(SearchOrigin::End)
                    }
                    "timestamp" => Ok(SearchOrigin::Timestamp(
                        seq.next_element()?
                            .ok_or_else(|| serde::de::Error::invalid_length(1, &self))?,
                    )),
                    "zgramId" => Ok(SearchOrigin::ZgramId(
                        seq.next_element()?
                            .ok_or_else(|| serde::de::Error::invalid_length(1, &self))?,
                    )),
                    other => Err(serde::de::Error::unknown_variant(
                        other,
                        &["unit", "timestamp", "zgramId"],
                    )),
                }
            }
        }
        deserializer.deserialize_tuple(2, OriginVisitor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_log_record_round_trip() {
        let zg = Zgram {
            id: ZgramId(12),
            timesecs: 946684812,
            sender: "kosak".to_string(),
            signature: "Corey Kosak".to_string(),
            logged: true,
            core: ZgramCore::new(
                "feelings.unikodez",
                "I ❤ to eat π and 𝐂𝐈𝐍𝐍𝐀𝐁𝐎𝐍 at the café",
                RenderStyle::Default,
            ),
        };
        let rec = LogRecord::Zgram(zg.clone());
        let text = serde_json::to_string(&rec).unwrap();
        assert!(text.starts_with(r#"["z",[12,946684812,"#));
        let back: LogRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_metadata_record_round_trip() {
        let records = vec![
            MetadataRecord::Reaction(Reaction::new(ZgramId(30), "👍", "kosak", true)),
            MetadataRecord::Revision(ZgramRevision {
                zgram_id: ZgramId(14),
                core: ZgramCore::new("feelings.Unicode", "(fixed)", RenderStyle::Default),
            }),
            MetadataRecord::RefersTo(ZgramRefersTo {
                zgram_id: ZgramId(42),
                refers_to: ZgramId(41),
                present: true,
            }),
            MetadataRecord::Zmojis(Zmojis {
                user_id: "kosak".to_string(),
                zmojis: "❦,❧,💕".to_string(),
            }),
        ];
        for rec in records {
            let text = serde_json::to_string(&rec).unwrap();
            let back: MetadataRecord = serde_json::from_str(&text).unwrap();
            assert_eq!(back, rec);
        }
    }

    #[test]
    fn test_reaction_wire_shape() {
        let rec = MetadataRecord::Reaction(Reaction::new(ZgramId(30), "👍", "wilhelm", true));
        let text = serde_json::to_string(&rec).unwrap();
        assert_eq!(text, r#"["rx",[30,"👍","wilhelm",true]]"#);
    }

    #[test]
    fn test_search_origin_round_trip() {
        for origin in [
            SearchOrigin::End,
            SearchOrigin::Timestamp(946684800),
            SearchOrigin::ZgramId(ZgramId(13)),
        ] {
            let text = serde_json::to_string(&origin).unwrap();
            let back: SearchOrigin = serde_json::from_str(&text).unwrap();
            assert_eq!(back, origin);
        }
    }
}
