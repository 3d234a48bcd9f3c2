use std::collections::BTreeMap;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

use crate::model::{Question, ReconcileSummary, Subject};

/// Official answers keyed by the ordinal printed in the source document.
pub type AnswerKey = BTreeMap<u32, char>;

/// How far past a bare ordinal line the parser looks for its answer letter.
/// Tables in the published keys wrap across at most a few layout lines.
const LOOKAHEAD_LINES: usize = 4;

#[derive(Debug)]
pub struct KeyParser {
    inline_pair: Regex,
    ordinal_line: Regex,
    letter_line: Regex,
    stem_ordinal: Regex,
}

impl KeyParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            inline_pair: Regex::new(r"^(\d{1,3})[.)]?\s+([A-E])\*?$")
                .context("failed to compile inline pair regex")?,
            ordinal_line: Regex::new(r"^(\d{1,3})[.)]?$")
                .context("failed to compile ordinal line regex")?,
            letter_line: Regex::new(r"^([A-E])\*?$")
                .context("failed to compile letter line regex")?,
            stem_ordinal: Regex::new(r"^(\d+)\.\s")
                .context("failed to compile stem ordinal regex")?,
        })
    }

    /// Parses one official answer key ("clavijero") document. Two layouts
    /// occur in practice: `N C` pairs on one line, and columnar tables where
    /// the ordinal and its letter land on nearby lines. Letters marked with
    /// an asterisk (piloted items) count like any other. Letters outside the
    /// subject's alternative range are dropped with a warning.
    pub fn parse_answer_key(&self, text: &str, subject: Subject) -> AnswerKey {
        let letters = subject.answer_letters();
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let mut key = AnswerKey::new();

        let mut index = 0;
        while index < lines.len() {
            let line = lines[index];

            if let Some(captures) = self.inline_pair.captures(line) {
                self.record(&mut key, &captures[1], &captures[2], letters, subject);
                index += 1;
                continue;
            }

            if let Some(captures) = self.ordinal_line.captures(line) {
                let ordinal = captures[1].to_string();
                let window_end = (index + 1 + LOOKAHEAD_LINES).min(lines.len());
                for ahead in index + 1..window_end {
                    if let Some(letter) = self.letter_line.captures(lines[ahead]) {
                        self.record(&mut key, &ordinal, &letter[1], letters, subject);
                        break;
                    }
                    // Another ordinal before a letter means this one has none.
                    if self.ordinal_line.is_match(lines[ahead]) {
                        break;
                    }
                }
            }

            index += 1;
        }

        key
    }

    fn record(
        &self,
        key: &mut AnswerKey,
        ordinal: &str,
        letter: &str,
        letters: &'static [char],
        subject: Subject,
    ) {
        let Ok(ordinal) = ordinal.parse::<u32>() else {
            return;
        };
        let Some(letter) = letter.chars().next().map(|l| l.to_ascii_uppercase()) else {
            return;
        };

        if !letters.contains(&letter.to_ascii_lowercase()) {
            warn!(
                subject = subject.code(),
                ordinal, %letter,
                "answer letter outside the subject's alternatives, dropping"
            );
            return;
        }
        key.insert(ordinal, letter);
    }

    /// Recovers the printed ordinal from a question stem, which keeps its
    /// `N. ` prefix through normalization.
    pub fn ordinal_from_stem(&self, stem: &str) -> Option<u32> {
        self.stem_ordinal
            .captures(stem)
            .and_then(|captures| captures.get(1))
            .and_then(|digits| digits.as_str().parse().ok())
    }
}

/// Merges answer keys from several documents. Keys are applied in the order
/// given; when two documents disagree on an ordinal the later one wins and
/// the disagreement is counted.
pub fn merge_keys(sources: &[AnswerKey]) -> (AnswerKey, usize) {
    let mut merged = AnswerKey::new();
    let mut conflicts = 0;

    for source in sources {
        for (&ordinal, &letter) in source {
            if let Some(&previous) = merged.get(&ordinal) {
                if previous != letter {
                    conflicts += 1;
                    debug!(ordinal, %previous, %letter, "answer key conflict, later source wins");
                }
            }
            merged.insert(ordinal, letter);
        }
    }

    (merged, conflicts)
}

/// Overwrites answers in a bank with the official key, matching questions to
/// key entries by printed ordinal. Corrected questions get a key-sourced
/// explanation and lose their inferred flag.
pub fn apply_answer_key(
    parser: &KeyParser,
    questions: &mut [Question],
    key: &AnswerKey,
    key_sources: usize,
    conflicts: usize,
) -> ReconcileSummary {
    let mut matched = 0;
    let mut changed = 0;
    let mut unmatched = 0;

    for question in questions.iter_mut() {
        let Some(ordinal) = parser.ordinal_from_stem(&question.content) else {
            unmatched += 1;
            continue;
        };
        let Some(&letter) = key.get(&ordinal) else {
            unmatched += 1;
            continue;
        };

        matched += 1;
        let official = letter.to_ascii_lowercase().to_string();
        if question.correct_answer != official {
            changed += 1;
        }
        question.correct_answer = official;
        question.answer_inferred = false;
        question.explanation = format!(
            "La alternativa {letter} es la correcta según el clavijero oficial PAES {}.",
            question.subject.display_name()
        );
    }

    ReconcileSummary {
        key_sources,
        key_entries: key.len(),
        matched,
        changed,
        unmatched,
        conflicts,
    }
}
