use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::classify::{Classifier, ZeroShotClassifier};
use crate::difficulty;
use crate::extract::RawQuestionBlock;
use crate::model::{Question, QuestionOption, Subject};
use crate::normalize::Normalizer;

/// Turns raw extracted blocks into bank questions: normalization,
/// classification, difficulty estimation and id assignment, in that order.
/// Ids are handed out in push order, so they are stable regardless of any
/// later rebalancing.
pub struct BankBuilder<'a> {
    subject: Subject,
    normalizer: &'a Normalizer,
    classifier: &'a Classifier<'a>,
    external: Option<&'a dyn ZeroShotClassifier>,
    option_prefix: Regex,
    visual_cue: Regex,
    sequence: u32,
}

impl<'a> BankBuilder<'a> {
    pub fn new(
        subject: Subject,
        normalizer: &'a Normalizer,
        classifier: &'a Classifier<'a>,
        external: Option<&'a dyn ZeroShotClassifier>,
    ) -> Result<Self> {
        Ok(Self {
            subject,
            normalizer,
            classifier,
            external,
            option_prefix: Regex::new(r"^([A-E])\)\s*")
                .context("failed to compile option prefix regex")?,
            visual_cue: Regex::new(
                r"(?i)\b(figura|imagen|diagrama|gr[áa]fico adjunto|esquema|mapa)\b",
            )
            .context("failed to compile visual cue regex")?,
            sequence: 0,
        })
    }

    pub fn push(&mut self, block: &RawQuestionBlock) -> Question {
        self.sequence += 1;
        let id = format!("{}_{:03}", self.subject.code(), self.sequence);

        let content = self.normalizer.normalize_text(&block.stem);
        let canonical = self
            .normalizer
            .normalize_options(&block.options, self.subject);
        let options = self.split_options(&canonical);
        let option_texts: Vec<String> = canonical;

        let classification =
            self.classifier
                .classify(&content, &option_texts, self.subject, self.external);
        let level = difficulty::estimate(&content, &option_texts, self.subject);

        let correct_answer = block
            .detected_answer
            .map(|letter| letter.to_ascii_lowercase().to_string())
            .unwrap_or_default();
        let has_visual = self.visual_cue.is_match(&content);

        debug!(%id, area = %classification.area_tematica, level, "assembled question");

        Question {
            id,
            subject: self.subject,
            content,
            options,
            correct_answer,
            explanation: String::new(),
            area_tematica: classification.area_tematica,
            tema: classification.tema,
            subtema: classification.subtema,
            difficulty: level,
            habilidad: Some(classification.habilidad),
            active: true,
            answer_inferred: false,
            has_visual_content: has_visual.then_some(true),
            image_ids: Vec::new(),
        }
    }

    fn split_options(&self, canonical: &[String]) -> Vec<QuestionOption> {
        canonical
            .iter()
            .map(|option| match self.option_prefix.captures(option) {
                Some(captures) => QuestionOption {
                    label: captures[1].to_lowercase(),
                    text: option[captures[0].len()..].to_string(),
                },
                None => QuestionOption {
                    label: String::new(),
                    text: option.clone(),
                },
            })
            .collect()
    }
}

/// Fills in answers the sources never printed. The historical keys skew
/// toward the later alternatives, so four-option subjects default to "d" and
/// five-option subjects to "b"; either way the question is flagged so a later
/// reconcile pass can overwrite it.
pub fn infer_missing_answers(questions: &mut [Question]) -> usize {
    let mut inferred = 0;
    for question in questions.iter_mut() {
        if !question.correct_answer.is_empty() {
            continue;
        }
        question.correct_answer = if question.subject.option_count() == 4 {
            "d".to_string()
        } else {
            "b".to_string()
        };
        question.answer_inferred = true;
        inferred += 1;
    }
    inferred
}
