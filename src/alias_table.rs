use std::path::Path;

use ahash::AHashMap;
use csv::{ReaderBuilder, Trim};
use itertools::Itertools;
use log::{info, warn};

/// Joins several target names inside one cell.
pub const TARGET_DELIMITER: char = '|';

///
/// Source curve name to avatar target name(s) mapping, for example ARKit blendshape
/// names to the morph targets of a particular character.
///
/// Keys are lowercase. Values are kept as written and split on `|` at lookup time.
///
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
  entries: AHashMap<String, String>,
  // Keys in the order they first showed up, for diagnostics.
  order: Vec<String>,
}

impl AliasTable {
  pub fn new() -> Self {
    Self::default()
  }

  ///
  /// Load the table from a text file.
  ///
  /// A missing or unreadable file is not an error: you get an empty table and
  /// every lookup falls back to the name itself.
  ///
  pub fn load<P: AsRef<Path>>(path: P) -> Self {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
      Ok(text) => {
        let table = Self::parse(&text);
        info!(
          "avatar-retarget: alias table [{}] loaded with [{}] rows. Sample: {:?}",
          path.display(),
          table.len(),
          table.sample(10)
        );
        table
      }
      Err(e) => {
        warn!(
          "avatar-retarget: alias table [{}] not found, falling back to exact names. {}",
          path.display(),
          e
        );
        Self::new()
      }
    }
  }

  ///
  /// Parse a delimited two column table.
  ///
  /// Blank lines and lines starting with `#` are skipped. If the first line has
  /// both an `arkit` and a `targets` column (any case, any position) it is a header
  /// and those columns are used. Otherwise columns 0 and 1 are.
  ///
  pub fn parse(text: &str) -> Self {
    let mut table = Self::new();

    let cleaned = text
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty() && !line.starts_with('#'))
      .join("\n");
    if cleaned.is_empty() {
      return table;
    }

    // One line is one record. Quotes are stripped per cell, never allowed to span lines.
    let mut reader = ReaderBuilder::new()
      .has_headers(false)
      .flexible(true)
      .quoting(false)
      .trim(Trim::All)
      .from_reader(cleaned.as_bytes());

    let mut rows: Vec<Vec<String>> = vec![];
    for (row_index, record) in reader.records().enumerate() {
      match record {
        Ok(record) => rows.push(record.iter().map(unquote).collect()),
        Err(e) => warn!("avatar-retarget: skipping unreadable alias row [{}]. {}", row_index, e),
      }
    }

    let Some(first) = rows.first() else {
      return table;
    };
    let header_index = |column: &str| first.iter().position(|cell| cell.eq_ignore_ascii_case(column));
    let (source_column, target_column, data_start) = match (header_index("arkit"), header_index("targets")) {
      (Some(source), Some(target)) => (source, target, 1),
      _ => (0, 1, 0),
    };

    for row in rows.iter().skip(data_start) {
      if row.len() < 2 {
        continue;
      }
      let (Some(source), Some(targets)) = (row.get(source_column), row.get(target_column)) else {
        continue;
      };
      if source.is_empty() || targets.is_empty() {
        continue;
      }
      table.insert(source, targets);
    }

    table
  }

  ///
  /// Add or replace a mapping. The source is stored lowercase.
  ///
  pub fn insert(&mut self, source: &str, targets: &str) {
    let key = source.to_lowercase();
    if !self.entries.contains_key(&key) {
      self.order.push(key.clone());
    }
    self.entries.insert(key, targets.to_string());
  }

  ///
  /// Every target name a source name maps to, in table order.
  ///
  /// Unknown names map to themselves so an exact name match still works without a table.
  ///
  pub fn resolve(&self, source_name: &str) -> Vec<String> {
    match self.entries.get(&source_name.to_lowercase()) {
      Some(targets) => targets
        .split(TARGET_DELIMITER)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect(),
      None => vec![source_name.to_string()],
    }
  }

  /// The raw, unsplit value for a source name.
  pub fn get(&self, source_name: &str) -> Option<&str> {
    self
      .entries
      .get(&source_name.to_lowercase())
      .map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// First `count` rows, for logging.
  pub fn sample(&self, count: usize) -> Vec<(&str, &str)> {
    self
      .order
      .iter()
      .take(count)
      .filter_map(|key| Some((key.as_str(), self.entries.get(key)?.as_str())))
      .collect()
  }
}

/// Strip one leading and one trailing double quote, each if present, and trim what was inside.
fn unquote(cell: &str) -> String {
  let cell = cell.trim();
  let cell = cell.strip_prefix('"').unwrap_or(cell);
  let cell = cell.strip_suffix('"').unwrap_or(cell);
  cell.trim().to_string()
}

// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
// ?                            CODE ENDS HERE, BEGIN UNIT TESTS.                                   ? //
// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
