// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A batch of spans flushed together by a tracer, usually all belonging to one trace.
pub type TraceChunk = Vec<Span>;

/// One span as sent by a tracer in a v0.4 payload.
///
/// Field names match the MessagePack map keys tracers use. Ids are serialized as decimal strings
/// for human-readable formats (JSON) so that consumers limited to 53-bit floats don't lose
/// precision, and as native unsigned integers otherwise.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(default, with = "id_format")]
    pub trace_id: u64,
    #[serde(default, with = "id_format")]
    pub span_id: u64,
    /// `None` when the tracer omitted the field or sent nil. An explicit `0` is kept as
    /// `Some(0)`; see [`Span::is_root`].
    #[serde(default, with = "id_format::option")]
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(rename = "type", default)]
    pub span_type: Option<String>,
    /// Nanoseconds since the unix epoch.
    #[serde(default)]
    pub start: i64,
    /// Nanoseconds.
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub error: u8,
    #[serde(rename = "meta", default)]
    pub tags: Option<HashMap<String, String>>,
    #[serde(default)]
    pub metrics: Option<HashMap<String, f64>>,
}

impl Span {
    /// A span without a parent, or whose parent id is zero, starts a trace.
    pub fn is_root(&self) -> bool {
        matches!(self.parent_id, None | Some(0))
    }

    pub fn is_error(&self) -> bool {
        self.error != 0
    }

    /// End time in nanoseconds since the unix epoch.
    pub fn end(&self) -> i64 {
        self.start.saturating_add(self.duration)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TraceId={}, SpanId={}, Service={}, Name={}, Resource={}",
            self.trace_id,
            self.span_id,
            self.service.as_deref().unwrap_or_default(),
            self.name.as_deref().unwrap_or_default(),
            self.resource.as_deref().unwrap_or_default(),
        )
    }
}

/// Total number of spans across all chunks.
pub fn span_count(chunks: &[TraceChunk]) -> usize {
    chunks.iter().map(Vec::len).sum()
}

/// Serde adapter for 64-bit ids: decimal strings for human-readable formats, integers otherwise.
/// Deserialization accepts either representation. Signed integers are reinterpreted bit for bit,
/// since some tracers encode ids as int64.
pub mod id_format {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(id)
        } else {
            serializer.serialize_u64(*id)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        deserializer.deserialize_any(IdVisitor)
    }

    struct IdVisitor;

    impl Visitor<'_> for IdVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an unsigned 64-bit id as an integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            Ok(v as u64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.parse::<u64>()
                .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
        }
    }

    pub mod option {
        use serde::de::{self, Visitor};
        use serde::{Deserializer, Serializer};
        use std::fmt;

        pub fn serialize<S: Serializer>(id: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
            match id {
                Some(id) if serializer.is_human_readable() => {
                    serializer.serialize_some(&id.to_string())
                }
                Some(id) => serializer.serialize_some(id),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u64>, D::Error> {
            deserializer.deserialize_option(OptionIdVisitor)
        }

        struct OptionIdVisitor;

        impl<'de> Visitor<'de> for OptionIdVisitor {
            type Value = Option<u64>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an optional unsigned 64-bit id")
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_some<D: Deserializer<'de>>(
                self,
                deserializer: D,
            ) -> Result<Self::Value, D::Error> {
                super::deserialize(deserializer).map(Some)
            }
        }
    }
}
