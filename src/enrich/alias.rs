use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::db::models::Game;

const BUILTIN: &str = include_str!("../../data/team_aliases.json");

/// Words dropped from either end of a team name before near-matching.
const SUFFIXES: &[&str] = &["esports", "gaming", "fc", "team", "club"];

/// Case-folded, trimmed, single-spaced.
pub fn normalize_team_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `normalize_team_name` with the common suffix words removed.
/// "Team Liquid Esports" -> "liquid". A name made only of suffix words is
/// left as is.
pub fn strip_suffixes(normalized: &str) -> String {
    let mut words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    while words.len() > 1 && words.last().is_some_and(|w| SUFFIXES.contains(w)) {
        words.pop();
    }
    while words.len() > 1 && words.first().is_some_and(|w| SUFFIXES.contains(w)) {
        words.remove(0);
    }
    words.join(" ")
}

/// Alphanumerics only: "gen.g" -> "geng".
pub fn compact(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Lookup forms of a name, in the order they are tried.
pub fn name_variants(name: &str) -> [String; 3] {
    let exact = normalize_team_name(name);
    let stripped = strip_suffixes(&exact);
    let compacted = compact(&stripped);
    [exact, stripped, compacted]
}

#[derive(Debug, Default, Deserialize)]
struct AliasFile {
    #[serde(default)]
    global: HashMap<String, String>,
    #[serde(default)]
    games: HashMap<Game, HashMap<String, String>>,
}

/// One level of the table, indexed by every lookup form.
#[derive(Debug, Default)]
struct Index {
    by_form: [HashMap<String, String>; 3],
}

impl Index {
    fn insert(&mut self, name: &str, logo: &str) {
        for (map, form) in self.by_form.iter_mut().zip(name_variants(name)) {
            if !form.is_empty() {
                map.entry(form).or_insert_with(|| logo.to_string());
            }
        }
    }

    fn get(&self, form: usize, key: &str) -> Option<&str> {
        self.by_form[form].get(key).map(String::as_str)
    }

    fn len(&self) -> usize {
        self.by_form[0].len()
    }
}

/// Known team name -> logo URL, global and per game.
#[derive(Debug, Default)]
pub struct AliasTable {
    global: Index,
    games: HashMap<Game, Index>,
}

impl AliasTable {
    /// The table shipped with the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN).context("Built-in alias table is invalid")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: AliasFile = serde_json::from_str(json).context("Failed to parse alias table")?;
        let mut table = AliasTable::default();
        table.extend(file);
        Ok(table)
    }

    /// Built-in table plus the entries from `path`; earlier entries win.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut table = Self::builtin()?;
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read alias table {}", path.display()))?;
            let file: AliasFile = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse alias table {}", path.display()))?;
            table.extend(file);
        }
        Ok(table)
    }

    fn extend(&mut self, file: AliasFile) {
        for (name, logo) in &file.global {
            self.global.insert(name, logo);
        }
        for (game, entries) in &file.games {
            let index = self.games.entry(*game).or_default();
            for (name, logo) in entries {
                index.insert(name, logo);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.games.values().map(Index::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try exact, then suffix-stripped, then compacted forms. At each step
    /// the game's own entries are checked before the global ones.
    pub fn lookup(&self, game: Game, name: &str) -> Option<&str> {
        let variants = name_variants(name);
        for (form, key) in variants.iter().enumerate() {
            if key.is_empty() {
                continue;
            }
            if let Some(logo) = self.games.get(&game).and_then(|i| i.get(form, key)) {
                return Some(logo);
            }
            if let Some(logo) = self.global.get(form, key) {
                return Some(logo);
            }
        }
        None
    }
}
