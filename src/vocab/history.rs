// ABOUTME: Quiz history log
// ABOUTME: Append-only JSON file of missed words with cumulative error counts

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors persisting the history file
#[derive(Error, Debug)]
pub enum HistoryError {
    /// File could not be written
    #[error("failed to write history file: {0}")]
    Io(#[from] std::io::Error),

    /// Entries could not be serialized
    #[error("failed to serialize history: {0}")]
    Json(#[from] serde_json::Error),
}

/// Words recorded by one entry.
///
/// Older logs stored a plain word list; current entries map each missed
/// word to its cumulative error count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Vocabulary {
    /// word -> cumulative error count
    Counts(BTreeMap<String, u32>),
    /// Legacy word list without counts
    Words(Vec<String>),
}

impl Vocabulary {
    /// Words recorded in this entry
    pub fn words(&self) -> Vec<&str> {
        match self {
            Vocabulary::Counts(counts) => counts.keys().map(String::as_str).collect(),
            Vocabulary::Words(words) => words.iter().map(String::as_str).collect(),
        }
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Vocabulary::Counts(BTreeMap::new())
    }
}

/// One saved quiz attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the quiz was taken
    pub timestamp: String,
    /// The quizzed sentence
    #[serde(default)]
    pub sentence: Option<String>,
    /// Where the sentence came from
    #[serde(default)]
    pub source: Option<String>,
    /// Missed words
    #[serde(default)]
    pub vocabulary: Vocabulary,
}

/// Answer to one quiz item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnswer {
    /// The quizzed word
    pub word: String,
    /// Whether the user picked the right meaning
    #[serde(default)]
    pub is_correct: bool,
}

/// A completed quiz
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSubmission {
    /// The quizzed sentence
    #[serde(default)]
    pub sentence: Option<String>,
    /// Where the sentence came from
    #[serde(default)]
    pub source: Option<String>,
    /// When the analysis ran; defaults to now
    #[serde(default)]
    pub timestamp: Option<String>,
    /// One answer per quiz item
    #[serde(default)]
    pub results: Vec<QuizAnswer>,
}

/// Result of submitting a quiz
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    /// Always "success"
    pub status: String,
    /// Human-readable summary
    pub message: String,
    /// The entry written, if any word was missed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_entry: Option<HistoryEntry>,
}

/// A previous sighting of a word
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordOccurrence {
    /// Sentence the word was missed in
    pub sentence: Option<String>,
    /// Source of that sentence
    pub source: Option<String>,
    /// When it was missed
    pub timestamp: String,
}

/// Quiz history backed by a JSON file
#[derive(Debug)]
pub struct QuizHistory {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl QuizHistory {
    /// Load history from `path`.
    ///
    /// A missing file starts an empty history; an unreadable or invalid one
    /// is logged and also treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                log::warn!("Ignoring invalid history file {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                log::warn!("Failed to read history file {}: {}", path.display(), e);
                Vec::new()
            }
        };
        log::debug!("Loaded {} history entries from {}", entries.len(), path.display());
        Self { path, entries }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, oldest first
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Highest recorded error count for `word` (case-insensitive), 0 if it
    /// was never missed. Legacy list entries carry no counts and are skipped.
    pub fn error_count(&self, word: &str) -> u32 {
        let word = word.to_lowercase();
        self.entries
            .iter()
            .filter_map(|entry| match &entry.vocabulary {
                Vocabulary::Counts(counts) => Some(counts),
                Vocabulary::Words(_) => None,
            })
            .flat_map(|counts| counts.iter())
            .filter(|(w, _)| w.to_lowercase() == word)
            .map(|(_, count)| *count)
            .max()
            .unwrap_or(0)
    }

    /// Record a finished quiz.
    ///
    /// Nothing is saved when every answer is correct. Otherwise one entry is
    /// appended mapping each missed word to its previous count plus one, and
    /// the file is rewritten.
    pub fn submit(&mut self, submission: QuizSubmission) -> Result<SubmitOutcome, HistoryError> {
        let missed: BTreeMap<String, u32> = submission
            .results
            .iter()
            .filter(|answer| !answer.is_correct)
            .map(|answer| (answer.word.clone(), self.error_count(&answer.word) + 1))
            .collect();

        if missed.is_empty() {
            return Ok(SubmitOutcome {
                status: "success".to_string(),
                message: "All correct! No history saved.".to_string(),
                saved_entry: None,
            });
        }

        let entry = HistoryEntry {
            timestamp: submission.timestamp.unwrap_or_else(super::now_timestamp),
            sentence: submission.sentence,
            source: submission.source,
            vocabulary: Vocabulary::Counts(missed),
        };
        // Commit only once the file write succeeds
        self.entries.push(entry.clone());
        if let Err(e) = self.save() {
            self.entries.pop();
            return Err(e);
        }
        log::info!("Saved quiz history entry with {} missed word(s)", entry.vocabulary.words().len());

        Ok(SubmitOutcome {
            status: "success".to_string(),
            message: "History saved with error counts.".to_string(),
            saved_entry: Some(entry),
        })
    }

    /// Earlier entries that recorded each of `words` (case-insensitive).
    /// Words never seen are left out.
    pub fn find_word_history(&self, words: &[String]) -> BTreeMap<String, Vec<WordOccurrence>> {
        let mut matches = BTreeMap::new();
        for word in words {
            let lower = word.to_lowercase();
            let found: Vec<WordOccurrence> = self
                .entries
                .iter()
                .filter(|entry| {
                    entry
                        .vocabulary
                        .words()
                        .iter()
                        .any(|w| w.to_lowercase() == lower)
                })
                .map(|entry| WordOccurrence {
                    sentence: entry.sentence.clone(),
                    source: entry.source.clone(),
                    timestamp: entry.timestamp.clone(),
                })
                .collect();
            if !found.is_empty() {
                matches.insert(word.clone(), found);
            }
        }
        matches
    }

    /// Write all entries to the backing file
    pub fn save(&self) -> Result<(), HistoryError> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
