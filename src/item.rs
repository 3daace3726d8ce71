use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator between the id and the type in a composite item identifier.
pub const ID_DELIMITER: char = ':';

/// Titles longer than this many characters are truncated.
const MAX_TITLE_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Note,
    Bookmark,
    Task,
    Workstream,
    File,
}

impl ItemType {
    pub const ALL: [ItemType; 5] = [
        ItemType::Note,
        ItemType::Bookmark,
        ItemType::Task,
        ItemType::Workstream,
        ItemType::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Note => "note",
            ItemType::Bookmark => "bookmark",
            ItemType::Task => "task",
            ItemType::Workstream => "workstream",
            ItemType::File => "file",
        }
    }

    /// Directory name used for this type, both for metadata and content ("notes", "tasks", ...)
    pub fn dir_name(&self) -> String {
        format!("{}s", self.as_str())
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ItemType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidIdentifier(format!("unknown item type {:?}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    Done,
}

/// Composite identifier of an item: ids are only unique within a type.
///
/// Stored in tag files as the string `<id>:<type>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemRef {
    id: String,
    kind: ItemType,
}

impl ItemRef {
    pub fn new(id: impl Into<String>, kind: ItemType) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self { id, kind })
    }

    /// Parse the `<id>:<type>` form.
    pub fn parse(s: &str) -> Result<Self> {
        let (id, kind) = s
            .split_once(ID_DELIMITER)
            .ok_or_else(|| Error::InvalidIdentifier(s.to_string()))?;
        let kind = kind
            .parse::<ItemType>()
            .map_err(|_| Error::InvalidIdentifier(s.to_string()))?;
        Self::new(id, kind)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ItemType {
        self.kind
    }
}

fn validate_id(id: &str) -> Result<()> {
    let bad_char = id
        .chars()
        .any(|c| c == ID_DELIMITER || c == '/' || c == '\\' || c.is_whitespace());
    if id.is_empty() || id == "." || id == ".." || bad_char {
        return Err(Error::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.id, ID_DELIMITER, self.kind)
    }
}

impl FromStr for ItemRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ItemRef::parse(s)
    }
}

impl TryFrom<String> for ItemRef {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        ItemRef::parse(&s)
    }
}

impl From<ItemRef> for String {
    fn from(r: ItemRef) -> Self {
        r.to_string()
    }
}

/// Item metadata record, persisted as `.meta/<type>s/<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,

    // Type-specific fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Item {
    pub fn new(kind: ItemType, id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            title: String::new(),
            tags: BTreeSet::new(),
            created: now,
            modified: now,
            url: None,
            status: None,
            items: Vec::new(),
            filename: None,
            description: None,
        }
    }

    pub fn item_ref(&self) -> Result<ItemRef> {
        ItemRef::new(self.id.clone(), self.kind)
    }
}

static HEADING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^#[ \t]+(.+?)[ \t\r]*$|^([^\n]+)\n===+[ \t\r]*$").expect("heading pattern")
});

/// Derive a display title from item content.
///
/// Notes use their first level-one heading (ATX or setext); everything else,
/// and notes without a heading, use the first non-empty line.
pub fn derive_title(content: &str, kind: ItemType) -> String {
    if content.is_empty() {
        return String::new();
    }

    if kind == ItemType::Note {
        if let Some(caps) = HEADING_PATTERN.captures(content) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                let heading = m.as_str().trim();
                if !heading.is_empty() {
                    return heading.to_string();
                }
            }
        }
    }

    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(truncate_title)
        .unwrap_or_default()
}

fn truncate_title(line: &str) -> String {
    if line.chars().count() > MAX_TITLE_CHARS {
        let head: String = line.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}
