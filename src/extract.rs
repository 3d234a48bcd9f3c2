use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::debug;

use crate::model::Subject;
use crate::util::read_file_to_string;

pub const PLACEHOLDER_OPTION: &str = "TBD";

/// A question as it came off the page: numbered stem, raw option strings and
/// an answer letter when the document printed one. The ordinal is the number
/// printed in the source document, not a bank id; answer keys are indexed by
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawQuestionBlock {
    pub ordinal: Option<u32>,
    pub stem: String,
    pub options: Vec<String>,
    pub detected_answer: Option<char>,
}

impl RawQuestionBlock {
    pub fn real_option_count(&self) -> usize {
        self.options
            .iter()
            .filter(|option| !option.contains(PLACEHOLDER_OPTION))
            .count()
    }
}

#[derive(Debug)]
pub struct Extractor {
    question_start: Regex,
    ordinal_prefix: Regex,
    option_paren: Regex,
    option_dot: Regex,
    answer_indicator: Regex,
    answer_inline: Regex,
    line_option: Regex,
    line_answer_indicator: Regex,
    line_answer_letter: Regex,
}

impl Extractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            question_start: Regex::new(r"(?m)^\d+\.\s")
                .context("failed to compile question start regex")?,
            ordinal_prefix: Regex::new(r"^(\d+)\.\s")
                .context("failed to compile ordinal prefix regex")?,
            option_paren: Regex::new(r"[A-D]\)")
                .context("failed to compile paren option marker regex")?,
            option_dot: Regex::new(r"[A-D]\.")
                .context("failed to compile dot option marker regex")?,
            // Case-sensitive on purpose: the lowercase word "respuesta" shows
            // up inside ordinary stems and must not cut the chunk.
            answer_indicator: Regex::new(r"\b(?:Clave|Respuesta|Solución)\b")
                .context("failed to compile answer indicator regex")?,
            answer_inline: Regex::new(r"(?:Clave|Respuesta|Solución)[\s:]+([A-D])")
                .context("failed to compile inline answer regex")?,
            line_option: Regex::new(r"^[a-dA-D][.)]")
                .context("failed to compile line option regex")?,
            line_answer_indicator: Regex::new(r"(?i)^(?:clave|respuesta|solución)\s*:")
                .context("failed to compile line answer indicator regex")?,
            line_answer_letter: Regex::new(r"[:\s]+([a-dA-D])[.)\s]*")
                .context("failed to compile line answer letter regex")?,
        })
    }

    /// Extracts raw question blocks from the concatenated page text of one
    /// exam document. The whole-text block strategy runs first; when it finds
    /// nothing the line-by-line state machine takes over.
    pub fn extract(&self, text: &str, subject: Subject) -> Vec<RawQuestionBlock> {
        let mut blocks = self.extract_blocks(text);
        if !blocks.is_empty() {
            for block in &mut blocks {
                pad_options(block, subject.option_count());
            }
            return blocks;
        }

        debug!("block strategy found nothing, falling back to line scan");
        self.extract_line_by_line(text, subject)
    }

    /// Whole-text strategy: each chunk starts at a line matching `N. ` and
    /// runs until the next such line.
    fn extract_blocks(&self, text: &str) -> Vec<RawQuestionBlock> {
        let starts: Vec<usize> = self
            .question_start
            .find_iter(text)
            .map(|found| found.start())
            .collect();

        let mut blocks = Vec::new();
        for (index, &start) in starts.iter().enumerate() {
            let end = starts.get(index + 1).copied().unwrap_or(text.len());
            if let Some(block) = self.parse_chunk(&text[start..end]) {
                blocks.push(block);
            }
        }

        blocks
    }

    fn parse_chunk(&self, chunk: &str) -> Option<RawQuestionBlock> {
        // Options live before any answer-indicator keyword.
        let cut = self
            .answer_indicator
            .find(chunk)
            .map(|found| found.start())
            .unwrap_or(chunk.len());
        let body = &chunk[..cut];

        let mut options = self.slice_options(body, &self.option_paren);
        if options.is_empty() {
            options = self.slice_options(body, &self.option_dot);
        }

        let stem_end = self
            .option_paren
            .find(body)
            .or_else(|| self.option_dot.find(body))
            .map(|found| found.start())
            .unwrap_or(body.len());
        let stem = body[..stem_end].trim().to_string();
        if stem.is_empty() {
            return None;
        }

        let detected_answer = self
            .answer_inline
            .captures(chunk)
            .and_then(|captures| captures.get(1))
            .and_then(|letter| letter.as_str().chars().next())
            .map(|letter| letter.to_ascii_uppercase());

        Some(RawQuestionBlock {
            ordinal: self.ordinal_of(&stem),
            stem,
            options,
            detected_answer,
        })
    }

    /// Slices `body` at successive option markers; each option runs to the
    /// next marker or to the end of the body.
    fn slice_options(&self, body: &str, marker: &Regex) -> Vec<String> {
        let positions: Vec<usize> = marker.find_iter(body).map(|found| found.start()).collect();

        let mut options = Vec::new();
        for (index, &start) in positions.iter().enumerate() {
            let end = positions.get(index + 1).copied().unwrap_or(body.len());
            let option = body[start..end].trim().to_string();
            if option.len() > 1 {
                options.push(option);
            }
        }

        options
    }

    /// Line-by-line fallback: a single pass maintaining whether stem or
    /// option text is being collected, rejoining wrapped lines with a space.
    fn extract_line_by_line(&self, text: &str, subject: Subject) -> Vec<RawQuestionBlock> {
        let mut blocks = Vec::new();
        let mut current: Option<RawQuestionBlock> = None;
        let mut current_option: Option<String> = None;
        let mut collecting_stem = false;
        let mut collecting_option = false;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            if self.ordinal_prefix.is_match(line) {
                if let Some(mut block) = current.take() {
                    if let Some(option) = current_option.take() {
                        block.options.push(option);
                    }
                    pad_options(&mut block, subject.option_count());
                    blocks.push(block);
                }

                current = Some(RawQuestionBlock {
                    ordinal: self.ordinal_of(line),
                    stem: line.to_string(),
                    options: Vec::new(),
                    detected_answer: None,
                });
                collecting_stem = true;
                collecting_option = false;
            } else if self.line_option.is_match(line) {
                collecting_stem = false;
                collecting_option = true;

                if let (Some(option), Some(block)) = (current_option.take(), current.as_mut()) {
                    block.options.push(option);
                }
                current_option = Some(line.to_string());
            } else if self.line_answer_indicator.is_match(line) {
                collecting_option = false;

                if let Some(block) = current.as_mut() {
                    if let Some(option) = current_option.take() {
                        block.options.push(option);
                    }
                    block.detected_answer = self
                        .line_answer_letter
                        .captures(line)
                        .and_then(|captures| captures.get(1))
                        .and_then(|letter| letter.as_str().chars().next())
                        .map(|letter| letter.to_ascii_uppercase());
                }
            } else if collecting_option {
                if let Some(option) = current_option.as_mut() {
                    option.push(' ');
                    option.push_str(line);
                }
            } else if collecting_stem {
                if let Some(block) = current.as_mut() {
                    block.stem.push(' ');
                    block.stem.push_str(line);
                }
            }
        }

        if let Some(mut block) = current.take() {
            if let Some(option) = current_option.take() {
                block.options.push(option);
            }
            pad_options(&mut block, subject.option_count());
            blocks.push(block);
        }

        blocks
    }

    fn ordinal_of(&self, stem: &str) -> Option<u32> {
        self.ordinal_prefix
            .captures(stem)
            .and_then(|captures| captures.get(1))
            .and_then(|digits| digits.as_str().parse().ok())
    }
}

fn pad_options(block: &mut RawQuestionBlock, count: usize) {
    while block.options.len() < count {
        let letter = (b'A' + block.options.len() as u8) as char;
        block.options.push(format!("{letter}) {PLACEHOLDER_OPTION}"));
    }
}

/// Drops instruction headers and fragments that cannot be real questions.
pub fn filter_valid_blocks(blocks: Vec<RawQuestionBlock>) -> Vec<RawQuestionBlock> {
    blocks.into_iter().filter(is_valid_block).collect()
}

fn is_valid_block(block: &RawQuestionBlock) -> bool {
    let stem_lower = block.stem.to_lowercase();

    if ["instrucciones", "indicativas"]
        .iter()
        .any(|marker| stem_lower.contains(marker))
    {
        return false;
    }
    // Exam-form headers sometimes survive as a leading pseudo-stem.
    if stem_lower.split_whitespace().next() == Some("forma") {
        return false;
    }
    if block.ordinal.is_none() && !block.stem.contains('?') {
        return false;
    }
    if block.stem.split_whitespace().count() < 5 {
        return false;
    }

    block.real_option_count() >= 2
}

/// Reads the page text of one exam document. Plain-text files are consumed
/// as-is; PDFs go through the external `pdftotext` tool, which owns the
/// PDF-to-text concern entirely.
pub fn read_document_text(path: &Path) -> Result<String> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if !is_pdf {
        return read_file_to_string(path);
    }

    let output = Command::new("pdftotext")
        .arg("-enc")
        .arg("UTF-8")
        .arg(path)
        .arg("-")
        .output()
        .with_context(|| format!("failed to execute pdftotext for {}", path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdftotext returned non-zero exit status for {}: {}",
            path.display(),
            stderr.trim()
        );
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    // Page breaks become plain line breaks; the extractor is line-oriented.
    Ok(raw.replace('\u{000C}', "\n").replace('\u{0000}', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> Extractor {
        Extractor::new().unwrap()
    }

    #[test]
    fn block_strategy_extracts_capital_question() {
        let text = "1. ¿Cuál es la capital de Francia?\nA) Madrid\nB) París\nC) Roma\nD) Berlín\nClave: B";
        let blocks = extractor().extract(text, Subject::H);

        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.ordinal, Some(1));
        assert_eq!(block.stem, "1. ¿Cuál es la capital de Francia?");
        // Four real options plus one placeholder to reach the 5-slot canon.
        assert_eq!(block.options.len(), 5);
        assert_eq!(block.real_option_count(), 4);
        assert_eq!(block.options[0], "A) Madrid");
        assert_eq!(block.options[3], "D) Berlín");
        assert!(block.options[4].contains(PLACEHOLDER_OPTION));
        assert_eq!(block.detected_answer, Some('B'));
    }

    #[test]
    fn lowercase_respuesta_in_stem_does_not_truncate_the_chunk() {
        let text = "1. Señale cuál es la respuesta correcta del problema planteado.\nA) uno\nB) dos\nC) tres\nD) cuatro\n";
        let blocks = filter_valid_blocks(extractor().extract(text, Subject::M1));

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].real_option_count(), 4);
        assert_eq!(blocks[0].options[0], "A) uno");
    }

    #[test]
    fn line_strategy_ignores_answer_words_without_a_colon() {
        let text = "7. Indique la respuesta correcta de la pregunta\na) uno\nb) dos\nla respuesta depende del contexto dado\nRespuesta: a";
        let blocks = extractor().extract_line_by_line(text, Subject::M1);

        assert_eq!(blocks.len(), 1);
        // The colon-free line is wrapped option text, not an answer marker.
        assert_eq!(blocks[0].options[1], "b) dos la respuesta depende del contexto dado");
        assert_eq!(blocks[0].detected_answer, Some('A'));
    }

    #[test]
    fn block_strategy_splits_on_numbered_lines() {
        let text = "1. Primera pregunta de prueba sobre algo\nA) uno\nB) dos\nC) tres\nD) cuatro\n2. Segunda pregunta de prueba sobre algo\nA) cinco\nB) seis\nC) siete\nD) ocho\n";
        let blocks = extractor().extract(text, Subject::M1);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].ordinal, Some(1));
        assert_eq!(blocks[1].ordinal, Some(2));
        assert_eq!(blocks[1].options[0], "A) cinco");
    }

    #[test]
    fn block_strategy_retries_with_dot_markers() {
        let text = "3. Pregunta con opciones de punto aquí\nA. primera\nB. segunda\nC. tercera\nD. cuarta\n";
        let blocks = extractor().extract(text, Subject::M1);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].options.len(), 4);
        assert!(blocks[0].options[0].starts_with("A."));
    }

    #[test]
    fn line_strategy_rejoins_wrapped_options() {
        let text = "5. Una pregunta cuyo enunciado continúa\nen la línea siguiente ¿cuál es?\na) opción uno\npartida en dos líneas\nb) opción dos\nRespuesta: c";
        let blocks = extractor().extract_line_by_line(text, Subject::M1);

        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(
            block.stem,
            "5. Una pregunta cuyo enunciado continúa en la línea siguiente ¿cuál es?"
        );
        assert_eq!(block.options[0], "a) opción uno partida en dos líneas");
        assert_eq!(block.options[1], "b) opción dos");
        // Padded to the canonical count of four.
        assert_eq!(block.options.len(), 4);
        assert!(block.options[3].contains(PLACEHOLDER_OPTION));
        assert_eq!(block.detected_answer, Some('C'));
    }

    #[test]
    fn filter_drops_instructions_short_stems_and_thin_blocks() {
        let valid = RawQuestionBlock {
            ordinal: Some(1),
            stem: "1. Una pregunta suficientemente larga para pasar".to_string(),
            options: vec!["A) x".to_string(), "B) y".to_string()],
            detected_answer: None,
        };
        let instructions = RawQuestionBlock {
            stem: "1. Lea las instrucciones antes de responder la prueba".to_string(),
            ..valid.clone()
        };
        let too_short = RawQuestionBlock {
            stem: "1. Muy corta".to_string(),
            ..valid.clone()
        };
        let no_number_no_question = RawQuestionBlock {
            ordinal: None,
            stem: "Texto introductorio sin número y sin interrogación final".to_string(),
            ..valid.clone()
        };
        let thin = RawQuestionBlock {
            options: vec!["A) x".to_string(), format!("B) {PLACEHOLDER_OPTION}")],
            ..valid.clone()
        };

        let kept = filter_valid_blocks(vec![
            valid,
            instructions,
            too_short,
            no_number_no_question,
            thin,
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ordinal, Some(1));
    }
}
