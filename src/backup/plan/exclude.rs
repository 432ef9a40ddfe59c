use crate::backup::result_error::result::Result;

use derive_more::{Display, From};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize};

use std::fmt::Formatter;
use std::path::Path;
use std::result;
use std::str::FromStr;

/// A glob pattern wrapper that handles custom deserialization
///
/// Patterns are matched against paths relative to the backup target root.
/// Literal separator mode is always on, so `*` never crosses a `/`.
#[derive(Clone, Debug, From, Display, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CustomDeserializedGlob {
    glob: Glob,
}

impl FromStr for CustomDeserializedGlob {
    type Err = globset::Error;

    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        GlobBuilder::new(s)
            .literal_separator(true)
            .build()
            .map(CustomDeserializedGlob::from)
    }
}

struct CustomGlobVisitor;

impl Visitor<'_> for CustomGlobVisitor {
    type Value = CustomDeserializedGlob;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a glob pattern")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse().map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for CustomDeserializedGlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(CustomGlobVisitor)
    }
}

/// Compiled exclusion patterns of one run.
#[derive(Clone, Debug)]
pub struct Excluder {
    set: GlobSet,
}

impl Default for Excluder {
    fn default() -> Self {
        Self {
            set: GlobSet::empty(),
        }
    }
}

impl Excluder {
    pub fn new(globs: &[CustomDeserializedGlob]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        globs.iter().for_each(|g| {
            builder.add(g.glob.clone());
        });
        let set = builder.build()?;
        tracing::debug!("Compiled {} exclusion patterns", set.len());
        Ok(Self { set })
    }

    /// The target root (empty relative path) is never excluded.
    pub fn is_excluded<P: AsRef<Path>>(&self, relative: P) -> bool {
        let relative = relative.as_ref();
        !relative.as_os_str().is_empty() && self.set.is_match(relative)
    }
}
