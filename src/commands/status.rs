use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{info, warn};

use crate::classify::UNKNOWN;
use crate::cli::StatusArgs;
use crate::model::{Subject, read_bank_file};
use crate::store::{StoreClient, StoreConfig};

const SUBJECTS: [Subject; 7] = [
    Subject::H,
    Subject::L,
    Subject::M1,
    Subject::M2,
    Subject::CB,
    Subject::CF,
    Subject::CQ,
];

pub fn run(args: StatusArgs) -> Result<()> {
    for bank in &args.banks {
        let questions = match read_bank_file(bank) {
            Ok(questions) => questions,
            Err(error) => {
                warn!(bank = %bank.display(), "unreadable bank: {error:#}");
                continue;
            }
        };

        let mut by_subject: BTreeMap<&str, usize> = BTreeMap::new();
        let mut by_area: BTreeMap<&str, usize> = BTreeMap::new();
        let mut by_answer: BTreeMap<&str, usize> = BTreeMap::new();
        let mut difficulty = [0usize; 5];
        let mut unknown_area = 0;
        let mut inferred = 0;
        for question in &questions {
            *by_subject.entry(question.subject.code()).or_default() += 1;
            *by_area.entry(question.area_tematica.as_str()).or_default() += 1;
            *by_answer.entry(question.correct_answer.as_str()).or_default() += 1;
            if (1..=5).contains(&question.difficulty) {
                difficulty[(question.difficulty - 1) as usize] += 1;
            }
            if question.area_tematica == UNKNOWN {
                unknown_area += 1;
            }
            if question.answer_inferred {
                inferred += 1;
            }
        }

        info!(
            bank = %bank.display(),
            questions = questions.len(),
            subjects = ?by_subject,
            areas = ?by_area,
            answers = ?by_answer,
            difficulty = ?difficulty,
            unknown_area,
            answers_inferred = inferred,
            "bank status"
        );
    }

    if args.remote {
        let config = StoreConfig::from_env()?;
        let client = StoreClient::new(config)?;

        for subject in SUBJECTS {
            match client.count_for_subject(subject.code()) {
                Ok(count) => {
                    info!(subject = subject.code(), rows = count, "store row count");
                }
                Err(error) => {
                    warn!(subject = subject.code(), "store count failed: {error:#}");
                }
            }
        }
    }

    Ok(())
}
