use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use crate::model::Subject;
use crate::util::read_file_to_string;

/// One curriculum row. Duplicate (subject, area, theme, subtopic) tuples with
/// different keyword sets may coexist; all of them feed the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyEntry {
    pub subject: String,
    pub area: String,
    pub theme: String,
    pub subtopic: String,
    pub keywords: Vec<String>,
}

/// In-memory curriculum table, immutable after load. Row order is preserved
/// so "first theme / first subtopic" fallbacks stay deterministic.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyStore {
    entries: Vec<TaxonomyEntry>,
}

impl TaxonomyStore {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("curriculum table not found: {}", path.display());
        }

        let raw = read_file_to_string(path)?;
        let store = Self::parse(&raw)
            .with_context(|| format!("failed to parse curriculum table {}", path.display()))?;

        debug!(
            path = %path.display(),
            entries = store.entries.len(),
            "loaded curriculum table"
        );

        Ok(store)
    }

    /// Parses a delimited curriculum table. The delimiter is sniffed from the
    /// first line (`;` wins over `,`); the header row is skipped and rows with
    /// fewer than four fields are dropped with a warning.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines().filter(|line| !line.trim().is_empty());

        let header = match lines.next() {
            Some(line) => line,
            None => bail!("curriculum table is empty"),
        };
        let delimiter = if header.contains(';') { ';' } else { ',' };

        let mut entries = Vec::new();
        for (index, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split(delimiter).map(str::trim).collect();
            if fields.len() < 4 {
                warn!(row = index + 2, line, "skipping short curriculum row");
                continue;
            }

            // With a comma-delimited table the keyword list itself splits
            // across fields, so everything past the fourth column is keywords.
            let keywords = fields
                .iter()
                .skip(4)
                .flat_map(|raw| raw.split(','))
                .map(|value| value.trim().to_lowercase())
                .filter(|value| !value.is_empty())
                .collect();

            entries.push(TaxonomyEntry {
                subject: fields[0].to_string(),
                area: fields[1].to_string(),
                theme: fields[2].to_string(),
                subtopic: fields[3].to_string(),
                keywords,
            });
        }

        if entries.is_empty() {
            bail!("curriculum table has no usable rows");
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows for one subject. Curriculum revisions label the sciences either
    /// with the bare code (`CQ`) or the split label (`C-quimica`); both match.
    pub fn entries_for(&self, subject: Subject) -> Vec<&TaxonomyEntry> {
        let label = subject.taxonomy_label();
        let code = subject.code();
        self.entries
            .iter()
            .filter(|entry| {
                entry.subject.eq_ignore_ascii_case(label) || entry.subject.eq_ignore_ascii_case(code)
            })
            .collect()
    }

    /// Distinct areas for a subject in first-appearance order.
    pub fn areas_for(&self, subject: Subject) -> Vec<String> {
        let mut areas = Vec::new();
        for entry in self.entries_for(subject) {
            if !areas.iter().any(|known: &String| known == &entry.area) {
                areas.push(entry.area.clone());
            }
        }
        areas
    }

    /// Distinct themes for (subject, area) in first-appearance order.
    pub fn themes_for(&self, subject: Subject, area: &str) -> Vec<String> {
        let mut themes = Vec::new();
        for entry in self.entries_for(subject) {
            if entry.area == area && !themes.iter().any(|known: &String| known == &entry.theme) {
                themes.push(entry.theme.clone());
            }
        }
        themes
    }

    /// Subtopics for (subject, area, theme) in table order.
    pub fn subtopics_for(&self, subject: Subject, area: &str, theme: &str) -> Vec<String> {
        self.entries_for(subject)
            .into_iter()
            .filter(|entry| entry.area == area && entry.theme == theme)
            .map(|entry| entry.subtopic.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Subject;Area_tematica;Tema;Subtema;Keywords
CQ;Reacciones químicas;Estequiometría;Balance;mol, balance
CQ;Reacciones químicas;Equilibrio químico;Constante de equilibrio
CQ;Estructura atómica;Modelos atómicos;Bohr
H;Historia;Chile en el siglo XIX;Guerra del Pacífico
broken-row";

    #[test]
    fn parse_sniffs_semicolon_and_skips_short_rows() {
        let store = TaxonomyStore::parse(SAMPLE).unwrap();
        assert_eq!(store.len(), 4);

        let entry = &store.entries_for(Subject::CQ)[0];
        assert_eq!(entry.area, "Reacciones químicas");
        assert_eq!(entry.keywords, vec!["mol", "balance"]);
    }

    #[test]
    fn parse_sniffs_comma_delimiter() {
        let raw = "Subject,Area,Tema,Subtema\nM1,Numeros,Potencias,Raices";
        let store = TaxonomyStore::parse(raw).unwrap();
        assert_eq!(store.entries_for(Subject::M1).len(), 1);
    }

    #[test]
    fn comma_tables_keep_every_keyword() {
        let raw = "Subject,Area,Tema,Subtema,Keywords\nM1,Numeros,Porcentajes,Calculo,porcentaje,descuento,interés";
        let store = TaxonomyStore::parse(raw).unwrap();

        let entry = &store.entries_for(Subject::M1)[0];
        assert_eq!(entry.keywords, vec!["porcentaje", "descuento", "interés"]);
    }

    #[test]
    fn parse_rejects_empty_table() {
        assert!(TaxonomyStore::parse("").is_err());
        assert!(TaxonomyStore::parse("Subject;Area;Tema;Subtema").is_err());
    }

    #[test]
    fn indexes_preserve_table_order() {
        let store = TaxonomyStore::parse(SAMPLE).unwrap();

        assert_eq!(
            store.areas_for(Subject::CQ),
            vec!["Reacciones químicas", "Estructura atómica"]
        );
        assert_eq!(
            store.themes_for(Subject::CQ, "Reacciones químicas"),
            vec!["Estequiometría", "Equilibrio químico"]
        );
        assert_eq!(
            store.subtopics_for(Subject::CQ, "Reacciones químicas", "Estequiometría"),
            vec!["Balance"]
        );
    }

    #[test]
    fn sciences_filter_on_taxonomy_label() {
        let raw = "Subject;Area;Tema;Subtema\nC-biologia;Herencia;Genética;ADN";
        let store = TaxonomyStore::parse(raw).unwrap();
        assert_eq!(store.entries_for(Subject::CB).len(), 1);
        assert!(store.entries_for(Subject::CF).is_empty());
    }
}
