//! Sign dictionary dataset: JSONL parsing, region derivation and the
//! `full_description` text that gets embedded.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Dialect region of a sign. Encoded as the last letter of a record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    North,
    Central,
    South,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::North, Region::Central, Region::South];

    /// Map an id suffix letter to a region.
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'B' => Some(Region::North),
            'T' => Some(Region::Central),
            'N' => Some(Region::South),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Region::North => "miền Bắc",
            Region::Central => "miền Trung",
            Region::South => "miền Nam",
        }
    }

    /// Region encoded in the trailing character of an id, if any.
    pub fn from_id(id: &str) -> Option<Self> {
        id.chars().last().and_then(Self::from_letter)
    }

    /// Accepts either the display name or the single letter.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let mut chars = value.chars();
        if let (Some(letter), None) = (chars.next(), chars.next()) {
            return Self::from_letter(letter.to_ascii_uppercase());
        }

        let value = value.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|region| region.display_name().to_lowercase() == value)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl Serialize for Region {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.display_name())
    }
}

impl<'de> Deserialize<'de> for Region {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Region::parse(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown region {value:?}")))
    }
}

/// One line of the dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub id: Option<String>,
    pub word: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "video")]
    pub video_url: Option<String>,
    #[serde(default)]
    pub region: Option<Region>,
}

impl Record {
    /// Explicit region if present, otherwise the one encoded in the id.
    pub fn resolved_region(&self) -> Option<Region> {
        self.region
            .or_else(|| self.id.as_deref().and_then(Region::from_id))
    }
}

/// Text embedded for a sign.
pub fn full_description(word: &str, description: Option<&str>, region: Option<Region>) -> String {
    let region = region
        .map(|region| format!(" ({region})"))
        .unwrap_or_default();
    let description = description.unwrap_or_default();
    format!("Ký hiệu của từ '{word}'{region}: {description}")
}

/// A record with its region resolved and its embedding text built.
#[derive(Debug, Clone, PartialEq)]
pub struct SignEntry {
    pub record: Record,
    pub region: Option<Region>,
    pub full_description: String,
}

impl From<Record> for SignEntry {
    fn from(record: Record) -> Self {
        let region = record.resolved_region();
        let full_description =
            full_description(&record.word, record.description.as_deref(), region);
        SignEntry {
            record,
            region,
            full_description,
        }
    }
}

/// Payload stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignPayload {
    pub word: String,
    pub region: Option<Region>,
    pub video: Option<String>,
    pub description: Option<String>,
    pub full_description: String,
}

impl From<&SignEntry> for SignPayload {
    fn from(entry: &SignEntry) -> Self {
        SignPayload {
            word: entry.record.word.clone(),
            region: entry.region,
            video: entry.record.video_url.clone(),
            description: entry.record.description.clone(),
            full_description: entry.full_description.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read dataset: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataset is not valid utf8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

/// Parse JSONL bytes into entries, keeping input order. Blank lines are skipped.
pub fn parse_jsonl(bytes: &[u8]) -> Result<Vec<SignEntry>, DatasetError> {
    let text = std::str::from_utf8(bytes)?;
    // uploads coming from windows editors sometimes carry a BOM
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<Record>(line)
                .map(SignEntry::from)
                .map_err(|source| DatasetError::Parse {
                    line: idx + 1,
                    source,
                })
        })
        .collect()
}

pub fn load_jsonl_file(path: &Path) -> Result<Vec<SignEntry>, DatasetError> {
    let bytes = std::fs::read(path)?;
    let entries = parse_jsonl(&bytes)?;
    log::info!("loaded {} records from {}", entries.len(), path.display());
    Ok(entries)
}
