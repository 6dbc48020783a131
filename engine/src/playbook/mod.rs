//! Playbook data model
//!
//! The playbook is a versioned, sectioned list of reusable SQL-generation
//! guidance. Items are addressed by section-scoped ids (`ts-00001`) that are
//! issued monotonically and never reused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod delta;
pub mod store;

pub use delta::{AppliedOp, CommitWarning, CounterDelta, DeltaOperation, ItemChange};
pub use store::{CommitResult, JsonPlaybookStore, PlaybookStore, Snapshot, StoreError};

/// Fixed set of playbook sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    SchemaRules,
    SqlPatterns,
    CommonMistakes,
}

impl Section {
    pub const ALL: [Section; 3] = [
        Section::SchemaRules,
        Section::SqlPatterns,
        Section::CommonMistakes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::SchemaRules => "schema_rules",
            Section::SqlPatterns => "sql_patterns",
            Section::CommonMistakes => "common_mistakes",
        }
    }

    /// Id prefix used for items of this section
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Section::SchemaRules => "sr",
            Section::SqlPatterns => "code",
            Section::CommonMistakes => "ts",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Section::ALL.into_iter().find(|s| s.id_prefix() == prefix)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "schema_rules" | "schema_rule" => Ok(Section::SchemaRules),
            "sql_patterns" | "sql_pattern" => Ok(Section::SqlPatterns),
            "common_mistakes" | "common_mistake" => Ok(Section::CommonMistakes),
            other => Err(format!("unknown playbook section '{}'", other)),
        }
    }
}

/// Section-scoped item identifier, rendered as `<prefix>-NNNNN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId {
    pub section: Section,
    pub seq: u32,
}

impl ItemId {
    pub fn new(section: Section, seq: u32) -> Self {
        Self { section, seq }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:05}", self.section.id_prefix(), self.seq)
    }
}

impl FromStr for ItemId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, digits) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("malformed item id '{}'", s))?;
        let section = Section::from_prefix(prefix)
            .ok_or_else(|| format!("unknown item id prefix '{}'", prefix))?;
        let seq = digits
            .parse::<u32>()
            .map_err(|_| format!("malformed item id '{}'", s))?;
        Ok(ItemId { section, seq })
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A single playbook bullet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookItem {
    pub id: ItemId,
    pub content: String,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub helpful: u64,
    #[serde(default)]
    pub harmful: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlaybookItem {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.content)
    }
}

/// The persisted playbook document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub version: u64,
    pub last_updated: DateTime<Utc>,
    pub sections: BTreeMap<Section, Vec<PlaybookItem>>,

    /// Last sequence issued per section; survives deletes so ids are never reused
    #[serde(default)]
    pub id_counters: BTreeMap<Section, u32>,
}

impl Default for Playbook {
    fn default() -> Self {
        Self::empty(1)
    }
}

impl Playbook {
    /// An empty playbook at `version` with every section present
    pub fn empty(version: u64) -> Self {
        let mut playbook = Self {
            version,
            last_updated: Utc::now(),
            sections: BTreeMap::new(),
            id_counters: BTreeMap::new(),
        };
        playbook.normalize();
        playbook
    }

    /// Ensure every section exists and id counters are not behind any issued id
    pub fn normalize(&mut self) {
        for section in Section::ALL {
            let items = self.sections.entry(section).or_default();
            let highest = items
                .iter()
                .filter(|item| item.id.section == section)
                .map(|item| item.id.seq)
                .max()
                .unwrap_or(0);
            let counter = self.id_counters.entry(section).or_insert(0);
            if *counter < highest {
                *counter = highest;
            }
        }
    }

    pub fn items(&self, section: Section) -> &[PlaybookItem] {
        self.sections.get(&section).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, id: ItemId) -> Option<&PlaybookItem> {
        self.items(id.section).iter().find(|item| item.id == id)
    }

    /// Items of `section` whose normalized content matches `fingerprint`
    pub fn find_by_fingerprint(&self, section: Section, fingerprint: &str) -> Option<&PlaybookItem> {
        self.items(section)
            .iter()
            .find(|item| item.fingerprint() == fingerprint)
    }

    pub fn item_count(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }

    /// Reserve the next id of `section`
    pub(crate) fn issue_id(&mut self, section: Section) -> ItemId {
        let counter = self.id_counters.entry(section).or_insert(0);
        *counter += 1;
        ItemId::new(section, *counter)
    }
}

/// Normalize content for duplicate detection
///
/// Lower-cases, drops arrows and punctuation, and collapses whitespace, so
/// `MISTAKE: x -> FIX: y` and `mistake: x → fix: y.` compare equal.
pub fn normalize_content(content: &str) -> String {
    let lowered = content.to_lowercase().replace("->", " ").replace('→', " ");
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 of the normalized content
pub fn fingerprint(content: &str) -> String {
    let digest = Sha256::digest(normalize_content(content).as_bytes());
    hex::encode(digest)
}
