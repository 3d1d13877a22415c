//! Macros for the archive's JSON conventions.
//!
//! Log records and wire frames use compact positional encodings rather than
//! objects: a struct becomes a fixed-length array of its fields, and a union
//! becomes a two-element array of `[tag, payload]`. These two macros generate
//! the serde impls for both shapes.

/// Serialize a named struct as a fixed-length JSON array of its fields,
/// in declaration order.
macro_rules! tuple_json {
    ($name:ident, $len:expr, [ $($field:ident),+ $(,)? ]) => {
        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                use serde::ser::SerializeTuple;
                let mut tup = serializer.serialize_tuple($len)?;
                $( tup.serialize_element(&self.$field)?; )+
                tup.end()
            }
        }
        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct TupleVisitor;
                impl<'de> serde::de::Visitor<'de> for TupleVisitor {
                    type Value = $name;
                    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                        write!(f, concat!("an array encoding a ", stringify!($name)))
                    }
                    fn visit_seq<A: serde::de::SeqAccess<'de>>(
                        self,
                        mut seq: A,
                    ) -> Result<$name, A::Error> {
                        $(
                            let $field = seq
                                .next_element()?
                                .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                        )+
                        Ok($name { $($field),+ })
                    }
                }
                deserializer.deserialize_tuple($len, TupleVisitor)
            }
        }
    };
}

/// Serialize an enum of single-payload variants as `[tag, payload]`.
macro_rules! tagged_json {
    ($name:ident { $( $tag:literal => $variant:ident ),+ $(,)? }) => {
        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                use serde::ser::SerializeTuple;
                let mut tup = serializer.serialize_tuple(2)?;
                match self {
                    $(
                        $name::$variant(payload) => {
                            tup.serialize_element($tag)?;
                            tup.serialize_element(payload)?;
                        }
                    )+
                }
                tup.end()
            }
        }
        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct TaggedVisitor;
                impl<'de> serde::de::Visitor<'de> for TaggedVisitor {
                    type Value = $name;
                    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                        write!(f, concat!("a [tag, payload] encoding of a ", stringify!($name)))
                    }
                    fn visit_seq<A: serde::de::SeqAccess<'de>>(
                        self,
                        mut seq: A,
                    ) -> Result<$name, A::Error> {
                        let tag: std::borrow::Cow<'de, str> = seq
                            .next_element()?
                            .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                        let value = match tag.as_ref() {
                            $(
                                $tag => $name::$variant(
                                    seq.next_element()?
                                        .ok_or_else(|| serde::de::Error::invalid_length(1, &self))?,
                                ),
                            )+
                            other => {
                                return Err(serde::de::Error::unknown_variant(
                                    other,
                                    &[$($tag),+],
                                ))
                            }
                        };
                        Ok(value)
                    }
                }
                deserializer.deserialize_tuple(2, TaggedVisitor)
            }
        }
    };
}
