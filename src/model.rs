use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Fixed PAES subject vocabulary. Each code pins the canonical option count
/// and the label used for taxonomy lookups.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
pub enum Subject {
    H,
    L,
    M1,
    M2,
    CB,
    CF,
    CQ,
}

impl Subject {
    pub fn code(self) -> &'static str {
        match self {
            Self::H => "H",
            Self::L => "L",
            Self::M1 => "M1",
            Self::M2 => "M2",
            Self::CB => "CB",
            Self::CF => "CF",
            Self::CQ => "CQ",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::H => "Historia",
            Self::L => "Lenguaje",
            Self::M1 => "Matemática 1",
            Self::M2 => "Matemática 2",
            Self::CB => "Biología",
            Self::CF => "Física",
            Self::CQ => "Química",
        }
    }

    /// History and language use five alternatives, math and science four.
    pub fn option_count(self) -> usize {
        match self {
            Self::H | Self::L => 5,
            _ => 4,
        }
    }

    /// Subject label used in the curriculum table, which splits the sciences
    /// into per-discipline rows.
    pub fn taxonomy_label(self) -> &'static str {
        match self {
            Self::CB => "C-biologia",
            Self::CF => "C-fisica",
            Self::CQ => "C-quimica",
            other => other.code(),
        }
    }

    pub fn answer_letters(self) -> &'static [char] {
        match self.option_count() {
            5 => &['a', 'b', 'c', 'd', 'e'],
            _ => &['a', 'b', 'c', 'd'],
        }
    }

    /// Official skill tags attached to questions of this subject.
    pub fn ability_labels(self) -> &'static [&'static str] {
        match self {
            Self::H | Self::L => &["Evaluar", "Interpretar", "Localizar"],
            _ => &["Resolver problemas", "Modelar", "Representar", "Argumentar"],
        }
    }

    pub fn is_math(self) -> bool {
        matches!(self, Self::M1 | Self::M2)
    }

    /// Infer the subject from an exam filename prefix such as `H-2024.pdf`
    /// or `cb_question_bank.json`.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_lowercase();
        // Longer codes first so `m1` is not shadowed by a bare prefix match.
        const PATTERNS: &[(&str, Subject)] = &[
            ("m1", Subject::M1),
            ("m2", Subject::M2),
            ("cb", Subject::CB),
            ("cf", Subject::CF),
            ("cq", Subject::CQ),
            ("h", Subject::H),
            ("l", Subject::L),
        ];

        for (prefix, subject) in PATTERNS {
            if lower.starts_with(&format!("{prefix}-")) || lower.starts_with(&format!("{prefix}_"))
            {
                return Some(*subject);
            }
        }

        if lower.contains("biologia") {
            return Some(Self::CB);
        }
        if lower.contains("fisica") {
            return Some(Self::CF);
        }
        if lower.contains("quimica") {
            return Some(Self::CQ);
        }

        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub text: String,
}

fn default_true() -> bool {
    true
}

/// Canonical question record: the bank-file unit and the store payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub subject: Subject,
    pub content: String,
    pub options: Vec<QuestionOption>,
    pub correct_answer: String,
    pub explanation: String,
    pub area_tematica: String,
    pub tema: String,
    pub subtema: String,
    pub difficulty: u8,
    #[serde(default)]
    pub habilidad: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub answer_inferred: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_visual_content: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankFile {
    pub prueba_id: String,
    pub generated_at: String,
    pub preguntas: Vec<Question>,
}

/// Hand-off payload between pipeline passes. Accepts both the wrapped
/// `{preguntas: [...]}` object and a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BankPayload {
    Wrapped { preguntas: Vec<Question> },
    Bare(Vec<Question>),
}

pub fn read_bank_file(path: &Path) -> Result<Vec<Question>> {
    if !path.exists() {
        bail!("bank file not found: {}", path.display());
    }

    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let payload: BankPayload = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse bank file {}", path.display()))?;

    Ok(match payload {
        BankPayload::Wrapped { preguntas } => preguntas,
        BankPayload::Bare(preguntas) => preguntas,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceDocument {
    pub filename: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractCounts {
    pub documents: usize,
    pub documents_skipped: usize,
    pub blocks_extracted: usize,
    pub blocks_discarded: usize,
    pub questions: usize,
    pub answers_detected: usize,
    pub answers_inferred: usize,
    pub unknown_area: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractRunSummary {
    pub manifest_version: u32,
    pub run_id: String,
    pub subject: String,
    pub started_at: String,
    pub updated_at: String,
    pub sources: Vec<SourceDocument>,
    pub counts: ExtractCounts,
    pub output_path: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileSummary {
    pub key_sources: usize,
    pub key_entries: usize,
    pub matched: usize,
    pub changed: usize,
    pub unmatched: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSummary {
    pub total: usize,
    pub inserted: usize,
    pub failed: usize,
    pub failures: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_option_counts_follow_code() {
        assert_eq!(Subject::H.option_count(), 5);
        assert_eq!(Subject::L.option_count(), 5);
        assert_eq!(Subject::M1.option_count(), 4);
        assert_eq!(Subject::CQ.option_count(), 4);
    }

    #[test]
    fn taxonomy_labels_split_sciences() {
        assert_eq!(Subject::CB.taxonomy_label(), "C-biologia");
        assert_eq!(Subject::CQ.taxonomy_label(), "C-quimica");
        assert_eq!(Subject::H.taxonomy_label(), "H");
    }

    #[test]
    fn subject_from_filename_prefix() {
        assert_eq!(Subject::from_filename("H-2024-modelo.pdf"), Some(Subject::H));
        assert_eq!(Subject::from_filename("m1_prueba.txt"), Some(Subject::M1));
        assert_eq!(
            Subject::from_filename("paes-biologia-2023.pdf"),
            Some(Subject::CB)
        );
        assert_eq!(Subject::from_filename("temario.csv"), None);
    }

    #[test]
    fn bank_payload_accepts_wrapped_and_bare() {
        let question = serde_json::json!({
            "id": "H_001",
            "subject": "H",
            "content": "1. ¿Pregunta?",
            "options": [
                {"label": "a", "text": "uno"},
                {"label": "b", "text": "dos"},
                {"label": "c", "text": "tres"},
                {"label": "d", "text": "cuatro"},
                {"label": "e", "text": "cinco"}
            ],
            "correct_answer": "a",
            "explanation": "",
            "area_tematica": "Historia Universal",
            "tema": "Edad Contemporánea",
            "subtema": "Unknown",
            "difficulty": 2
        });

        let wrapped = serde_json::json!({
            "prueba_id": "H_combined",
            "preguntas": [question.clone()]
        });
        let dir = tempfile::tempdir().unwrap();

        let wrapped_path = dir.path().join("wrapped.json");
        fs::write(&wrapped_path, wrapped.to_string()).unwrap();
        let questions = read_bank_file(&wrapped_path).unwrap();
        assert_eq!(questions.len(), 1);
        assert!(questions[0].active);
        assert!(!questions[0].answer_inferred);

        let bare_path = dir.path().join("bare.json");
        fs::write(&bare_path, serde_json::json!([question]).to_string()).unwrap();
        assert_eq!(read_bank_file(&bare_path).unwrap().len(), 1);
    }
}
