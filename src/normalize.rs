use anyhow::{Context, Result};
use regex::Regex;

use crate::extract::PLACEHOLDER_OPTION;
use crate::model::Subject;

/// Cleans the page noise out of extracted question text: exam footers, page
/// markers, PDF glyph artifacts and hard line wraps. Normalization is
/// idempotent, so re-running a bank through the pipeline leaves it unchanged.
#[derive(Debug)]
pub struct Normalizer {
    footer_patterns: Vec<Regex>,
    inline_footer_patterns: Vec<Regex>,
    option_prefix: Regex,
}

impl Normalizer {
    pub fn new() -> Result<Self> {
        let footer_sources = [
            r"(?i)^forma\b.*$",
            r"(?i)^modelo de prueba.*$",
            r"(?i)^proceso de admisión.*$",
            r"(?i)^prueba de acceso.*$",
            r"^-\s*\d+\s*-$",
            r"(?i)^p[áa]gina\s+\d+.*$",
            r"(?i)^trv$",
            r"(?i)^https?://\S+$",
            r"(?i)^www\.\S+$",
            r"^[-–—]{3,}$",
        ];
        let inline_sources = [
            r"(?i)\bmodelo de prueba\b",
            r"(?i)\bproceso de admisión \d{4}\b",
            r"https?://\S+",
            r"\bwww\.\S+",
            r"[-–—]{4,}",
        ];

        Ok(Self {
            footer_patterns: compile_all(&footer_sources)
                .context("failed to compile footer patterns")?,
            inline_footer_patterns: compile_all(&inline_sources)
                .context("failed to compile inline footer patterns")?,
            option_prefix: Regex::new(r"^([a-eA-E])[.)]\s*")
                .context("failed to compile option prefix regex")?,
        })
    }

    /// Normalizes a stem or explanation: glyph fixes, footer removal, then
    /// paragraph collapse so wrapped lines rejoin and blank lines become real
    /// paragraph breaks.
    pub fn normalize_text(&self, text: &str) -> String {
        let text = fix_glyphs(text);

        let mut kept = Vec::new();
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if self
                .footer_patterns
                .iter()
                .any(|pattern| pattern.is_match(line))
            {
                continue;
            }
            let mut line = line.to_string();
            for pattern in &self.inline_footer_patterns {
                line = pattern.replace_all(&line, " ").into_owned();
            }
            // Inline removals can leave double spaces behind.
            kept.push(line.split_whitespace().collect::<Vec<_>>().join(" "));
        }

        collapse_lines(&kept)
    }

    /// Canonicalizes an option list into exactly `subject.option_count()`
    /// entries of the form `"A) text"`. The first text seen for a label wins;
    /// missing labels are padded with a placeholder.
    pub fn normalize_options(&self, options: &[String], subject: Subject) -> Vec<String> {
        let count = subject.option_count();
        let mut by_label: Vec<Option<String>> = vec![None; count];

        for option in options {
            let cleaned = self.normalize_text(option);
            if cleaned.is_empty() {
                continue;
            }

            let (label, text) = match self.option_prefix.captures(&cleaned) {
                Some(captures) => {
                    let letter = captures[1].chars().next().unwrap_or('A').to_ascii_uppercase();
                    let mut rest = cleaned[captures[0].len()..].trim().to_string();
                    // Extraction sometimes leaves the label printed twice.
                    while let Some(repeat) = self.option_prefix.find(&rest) {
                        rest = rest[repeat.end()..].trim().to_string();
                    }
                    (letter, rest)
                }
                None => continue,
            };

            let index = (label as u8).wrapping_sub(b'A') as usize;
            if index >= count {
                continue;
            }
            let slot = &mut by_label[index];
            if slot.is_none() && !text.is_empty() {
                *slot = Some(text);
            }
        }

        (0..count)
            .map(|index| {
                let letter = (b'A' + index as u8) as char;
                let text = by_label[index]
                    .take()
                    .unwrap_or_else(|| PLACEHOLDER_OPTION.to_string());
                format!("{letter}) {text}")
            })
            .collect()
    }
}

fn compile_all(sources: &[&str]) -> Result<Vec<Regex>> {
    sources
        .iter()
        .map(|source| {
            Regex::new(source).with_context(|| format!("invalid pattern: {source}"))
        })
        .collect()
}

/// Maps PDF private-use-area glyphs and lookalike math symbols back to ASCII.
fn fix_glyphs(text: &str) -> String {
    text.chars()
        .map(|character| match character {
            '\u{f05b}' => '[',
            '\u{f05d}' => ']',
            '\u{f028}' => '(',
            '\u{f029}' => ')',
            '\u{f02d}' | '\u{2212}' => '-',
            '\u{f02f}' | '\u{2215}' => '/',
            other => other,
        })
        .collect()
}

/// Joins consecutive non-empty lines with single spaces; runs of blank lines
/// become one paragraph break.
fn collapse_lines(lines: &[String]) -> String {
    let mut paragraphs: Vec<Vec<&str>> = vec![Vec::new()];
    for line in lines {
        if line.is_empty() {
            if !paragraphs.last().map(Vec::is_empty).unwrap_or(true) {
                paragraphs.push(Vec::new());
            }
        } else {
            paragraphs
                .last_mut()
                .expect("paragraphs starts non-empty")
                .push(line);
        }
    }

    paragraphs
        .iter()
        .filter(|paragraph| !paragraph.is_empty())
        .map(|paragraph| paragraph.join(" "))
        .collect::<Vec<_>>()
        .join("\n\n")
}
