use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::model::Subject;
use crate::util::read_file_to_string;

/// Versioned default lexicon shipped with the binary.
const BUILTIN_LEXICON: &str = include_str!("../data/lexicon.json");

/// Hand-authored keyword tables for one subject. `areas` scores thematic
/// areas; `themes` holds optional per-theme refinement tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubjectLexicon {
    #[serde(default)]
    pub areas: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub themes: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Lexicon {
    pub version: u32,
    subjects: BTreeMap<String, SubjectLexicon>,
}

impl Lexicon {
    pub fn builtin() -> Result<Self> {
        let lexicon: Self =
            serde_json::from_str(BUILTIN_LEXICON).context("failed to parse built-in lexicon")?;
        Ok(lexicon)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = read_file_to_string(path)?;
        let lexicon: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse lexicon {}", path.display()))?;

        debug!(
            path = %path.display(),
            version = lexicon.version,
            subjects = lexicon.subjects.len(),
            "loaded lexicon"
        );

        Ok(lexicon)
    }

    pub fn for_subject(&self, subject: Subject) -> Option<&SubjectLexicon> {
        self.subjects.get(subject.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lexicon_parses_and_covers_keyword_subjects() {
        let lexicon = Lexicon::builtin().unwrap();
        assert_eq!(lexicon.version, 1);

        for subject in [Subject::CQ, Subject::H, Subject::L, Subject::M1, Subject::M2] {
            let tables = lexicon.for_subject(subject).unwrap();
            assert!(!tables.areas.is_empty(), "missing areas for {subject:?}");
        }

        // Pure science subjects rely on the taxonomy fallback instead.
        assert!(lexicon.for_subject(Subject::CB).is_none());
        assert!(lexicon.for_subject(Subject::CF).is_none());
    }

    #[test]
    fn chemistry_tables_know_stoichiometry() {
        let lexicon = Lexicon::builtin().unwrap();
        let tables = lexicon.for_subject(Subject::CQ).unwrap();

        let reacciones = &tables.areas["Reacciones químicas"];
        assert!(reacciones.iter().any(|keyword| keyword == "mol"));
        assert!(reacciones.iter().any(|keyword| keyword == "estequiometría"));
        assert!(tables.themes.contains_key("Estequiometría"));
    }
}
