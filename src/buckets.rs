//! Bucket → owner table.
//!
//! Operators maintain the table in a spreadsheet and export it as delimited
//! text (semicolon-separated by default, comma also accepted). Required
//! columns are `Name` and `Owner`; `Note` is an optional description that is
//! shown to the classifier. Ownership changes are table edits, not code edits.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::ConfigError;

/// One row of the bucket table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEntry {
    /// Bucket name as spelled in the table.
    pub name: String,
    /// Owner display name.
    pub owner: String,
    /// Short description of what belongs in the bucket.
    pub note: Option<String>,
}

impl BucketEntry {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Immutable bucket → owner mapping with case-insensitive lookup.
#[derive(Debug, Clone, Default)]
pub struct BucketTable {
    entries: Vec<BucketEntry>,
    /// normalized name → index into `entries`
    index: HashMap<String, usize>,
}

impl BucketTable {
    /// Load the table from a delimited text file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::BucketTable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let table = parse_table(&raw).map_err(|reason| ConfigError::BucketTable {
            path: path.to_path_buf(),
            reason,
        })?;

        debug!(path = %path.display(), buckets = table.len(), "Loaded bucket table");
        Ok(table)
    }

    /// Build a table from entries. Later entries win on duplicate names.
    pub fn from_entries(entries: impl IntoIterator<Item = BucketEntry>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            table.insert(entry);
        }
        table
    }

    fn insert(&mut self, entry: BucketEntry) {
        let key = normalize(&entry.name);
        if let Some(&existing) = self.index.get(&key) {
            warn!(
                bucket = %entry.name,
                previous_owner = %self.entries[existing].owner,
                owner = %entry.owner,
                "Duplicate bucket row, later row wins"
            );
            self.entries[existing] = entry;
        } else {
            self.index.insert(key, self.entries.len());
            self.entries.push(entry);
        }
    }

    /// Find a bucket by name, ignoring case and surrounding whitespace.
    pub fn lookup(&self, name: &str) -> Option<&BucketEntry> {
        self.index.get(&normalize(name)).map(|&i| &self.entries[i])
    }

    /// Owner of a bucket, if the bucket exists.
    pub fn owner_of(&self, name: &str) -> Option<&str> {
        self.lookup(name).map(|e| e.owner.as_str())
    }

    /// Map a free-form bucket answer back to the table's spelling.
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.lookup(name).map(|e| e.name.as_str()).unwrap_or(name.trim())
    }

    pub fn entries(&self) -> &[BucketEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `- Name: Note` lines for the classifier prompt.
    pub fn prompt_listing(&self) -> String {
        self.entries
            .iter()
            .map(|e| match &e.note {
                Some(note) => format!("- {}: {}", e.name, note),
                None => format!("- {}", e.name),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Pick `;` unless the header line only has commas.
fn detect_delimiter(raw: &str) -> u8 {
    let header = raw.lines().next().unwrap_or_default();
    if !header.contains(';') && header.contains(',') {
        b','
    } else {
        b';'
    }
}

fn parse_table(raw: &str) -> Result<BucketTable, String> {
    let raw = raw.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(raw))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(raw.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| format!("unreadable header row: {e}"))?
        .clone();
    let column = |wanted: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(wanted))
    };

    let name_col = column("Name").ok_or("missing required column 'Name'")?;
    let owner_col = column("Owner").ok_or("missing required column 'Owner'")?;
    let note_col = column("Note");

    let mut table = BucketTable::default();
    for (i, record) in reader.records().enumerate() {
        // header is line 1
        let record = record.map_err(|e| format!("line {}: {e}", i + 2))?;
        let field = |col: usize| record.get(col).map(str::trim).unwrap_or_default();

        let name = field(name_col);
        let owner = field(owner_col);
        if name.is_empty() || owner.is_empty() {
            continue;
        }

        let note = note_col.map(field).filter(|n| !n.is_empty());
        table.insert(BucketEntry {
            name: name.to_string(),
            owner: owner.to_string(),
            note: note.map(String::from),
        });
    }

    if table.is_empty() {
        return Err("no rows with both a Name and an Owner".into());
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_table(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_semicolon_table() {
        let file = write_table(
            "Name;Owner;Note\n\
             Storage;Alice;Tables, files and backends\n\
             AI;Bob;\n\
             Components;Carol;Extractors and writers\n",
        );
        let table = BucketTable::load(file.path()).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.owner_of("Storage"), Some("Alice"));
        assert_eq!(table.owner_of("AI"), Some("Bob"));
        assert_eq!(
            table.lookup("Components").unwrap().note.as_deref(),
            Some("Extractors and writers")
        );
        assert!(table.lookup("AI").unwrap().note.is_none());
    }

    #[test]
    fn loads_comma_table() {
        let file = write_table("Name,Owner\nStorage,Alice\n");
        let table = BucketTable::load(file.path()).unwrap();
        assert_eq!(table.owner_of("storage"), Some("Alice"));
    }

    #[test]
    fn headers_are_case_insensitive_and_bom_tolerant() {
        let file = write_table("\u{feff}name ; OWNER\nStorage;Alice\n");
        let table = BucketTable::load(file.path()).unwrap();
        assert_eq!(table.owner_of("Storage"), Some("Alice"));
    }

    #[test]
    fn blank_rows_are_ignored() {
        let file = write_table("Name;Owner\nStorage;Alice\n;;\nOrphan;\n");
        let table = BucketTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.lookup("Orphan").is_none());
    }

    #[test]
    fn missing_owner_column_is_config_error() {
        let file = write_table("Name;Note\nStorage;stuff\n");
        let err = BucketTable::load(file.path()).unwrap_err();
        match err {
            ConfigError::BucketTable { reason, .. } => assert!(reason.contains("Owner")),
            other => panic!("Expected BucketTable error, got {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BucketTable::load(&dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, ConfigError::BucketTable { .. }));
    }

    #[test]
    fn empty_table_is_config_error() {
        let file = write_table("Name;Owner\n");
        assert!(BucketTable::load(file.path()).is_err());
    }

    #[test]
    fn lookup_ignores_case_and_whitespace() {
        let table = BucketTable::from_entries([BucketEntry::new("Native Datatypes", "Zuzana")]);
        assert!(table.lookup("  native datatypes ").is_some());
        assert_eq!(table.canonical_name("NATIVE DATATYPES"), "Native Datatypes");
        assert_eq!(table.canonical_name(" Unknown "), "Unknown");
    }

    #[test]
    fn duplicate_rows_last_wins() {
        let table = BucketTable::from_entries([
            BucketEntry::new("Storage", "Alice"),
            BucketEntry::new("storage", "Dave"),
        ]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.owner_of("Storage"), Some("Dave"));
    }

    #[test]
    fn prompt_listing_includes_notes() {
        let table = BucketTable::from_entries([
            BucketEntry::new("Storage", "Alice").with_note("tables and files"),
            BucketEntry::new("AI", "Bob"),
        ]);
        assert_eq!(table.prompt_listing(), "- Storage: tables and files\n- AI");
    }
}
