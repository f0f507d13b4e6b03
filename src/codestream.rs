//! Codestream data model.
//!
//! A codestream is one kernel build target (for example `15.4u12`) that needs
//! its own livepatch. The table is read from `codestreams.json` at the start of
//! a run and written back once extraction has filled in the externalized
//! symbols of every file.
//!
//! Both the table and each codestream's file map keep the order of the JSON
//! document: grouping compares files position by position, so the order in
//! which files are enumerated must be stable across runs.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use thiserror::Error;

/// Externalized symbols of one file, keyed by output object (`vmlinux` or a
/// module name).
pub type ExtSymbols = BTreeMap<String, Vec<String>>;

/// Table of all codestreams of a livepatch, in document order.
pub type CodestreamTable = OrderedMap<Codestream>;

/// Object name used for symbols that live in the core kernel image.
pub const VMLINUX: &str = "vmlinux";

/// String-keyed map that iterates in insertion order.
///
/// Serialized as a plain JSON object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing (in place) any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut V)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut map = OrderedMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map with string keys")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = OrderedMap::new();
        while let Some((k, v)) = access.next_entry::<String, V>()? {
            map.insert(k, v);
        }
        Ok(map)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// One codestream as stored in `codestreams.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codestream {
    /// Kernel release without flavor, e.g. `5.14.21-150400.24.46`
    pub kernel: String,
    /// Architectures this codestream is built for
    #[serde(default = "default_archs")]
    pub archs: Vec<String>,
    /// Files to patch, in enumeration order
    #[serde(default)]
    pub files: OrderedMap<FileData>,
    /// Module name -> path of its `.ko` relative to `lib/modules/<kernel>-default`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_archs() -> Vec<String> {
    vec!["x86_64".to_string()]
}

impl Codestream {
    pub fn new(kernel: impl Into<String>) -> Self {
        Self {
            kernel: kernel.into(),
            archs: default_archs(),
            files: OrderedMap::new(),
            modules: BTreeMap::new(),
        }
    }
}

/// Per-file metadata of a codestream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileData {
    /// Object the file is built into (`vmlinux` when empty)
    #[serde(default, rename = "module")]
    pub module: String,
    /// Config guard of the file, e.g. `CONFIG_TUN`
    #[serde(default)]
    pub conf: String,
    /// Functions to extract and patch
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Externalized symbols reported by the extraction tool
    #[serde(default)]
    pub ext_symbols: ExtSymbols,
}

impl FileData {
    pub fn with_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Object this file belongs to, defaulting to `vmlinux`.
    pub fn object(&self) -> &str {
        if self.module.is_empty() {
            VMLINUX
        } else {
            &self.module
        }
    }
}

/// Error returned for codestream ids that do not follow `<major>.<minor>[rt]u<update>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid codestream name '{0}', expected something like 15.4u12")]
pub struct CodestreamParseError(pub String);

/// Parsed version tuple of a codestream id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodestreamVersion {
    pub major: u32,
    pub minor: u32,
    /// Real-time kernel variant (`15.5rtu3`)
    pub rt: bool,
    pub update: u32,
}

impl FromStr for CodestreamVersion {
    type Err = CodestreamParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CodestreamParseError(s.to_string());

        let (major, rest) = s.split_once('.').ok_or_else(err)?;
        let (head, update) = rest.rsplit_once('u').ok_or_else(err)?;
        let (minor, rt) = match head.strip_suffix("rt") {
            Some(minor) => (minor, true),
            None => (head, false),
        };

        let number = |part: &str| -> Result<u32, CodestreamParseError> {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err());
            }
            part.parse().map_err(|_| err())
        };

        Ok(Self {
            major: number(major)?,
            minor: number(minor)?,
            rt,
            update: number(update)?,
        })
    }
}

impl fmt::Display for CodestreamVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rt = if self.rt { "rt" } else { "" };
        write!(f, "{}.{}{}u{}", self.major, self.minor, rt, self.update)
    }
}
