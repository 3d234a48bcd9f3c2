use anyhow::{Context, Result, bail};
use tracing::info;

use crate::cli::ReconcileArgs;
use crate::extract::read_document_text;
use crate::model::{BankFile, Subject, read_bank_file};
use crate::reconcile::{AnswerKey, KeyParser, apply_answer_key, merge_keys};
use crate::util::{now_utc_string, write_json_pretty};

pub fn run(args: ReconcileArgs) -> Result<()> {
    let mut questions = read_bank_file(&args.bank_path)?;
    if questions.is_empty() {
        bail!("bank {} contains no questions", args.bank_path.display());
    }

    let subject = resolve_subject(&args, questions[0].subject)?;
    info!(
        bank = %args.bank_path.display(),
        subject = subject.code(),
        questions = questions.len(),
        keys = args.keys.len(),
        "reconcile started"
    );

    let parser = KeyParser::new()?;
    let mut keys: Vec<AnswerKey> = Vec::new();
    for path in &args.keys {
        let text = read_document_text(path)
            .with_context(|| format!("failed to read answer key {}", path.display()))?;
        let key = parser.parse_answer_key(&text, subject);
        if key.is_empty() {
            bail!("answer key {} yielded no entries", path.display());
        }
        info!(path = %path.display(), entries = key.len(), "parsed answer key");
        keys.push(key);
    }

    let (merged, conflicts) = merge_keys(&keys);
    let summary = apply_answer_key(&parser, &mut questions, &merged, keys.len(), conflicts);

    let output_path = args.output_path.as_ref().unwrap_or(&args.bank_path);
    write_json_pretty(
        output_path,
        &BankFile {
            prueba_id: subject.code().to_string(),
            generated_at: now_utc_string(),
            preguntas: questions,
        },
    )?;

    info!(
        matched = summary.matched,
        changed = summary.changed,
        unmatched = summary.unmatched,
        conflicts = summary.conflicts,
        output = %output_path.display(),
        "reconcile finished"
    );

    if let Some(manifest_path) = &args.manifest_path {
        write_json_pretty(manifest_path, &summary)?;
    }

    Ok(())
}

fn resolve_subject(args: &ReconcileArgs, from_bank: Subject) -> Result<Subject> {
    match args.subject {
        Some(subject) if subject != from_bank => {
            bail!(
                "--subject {} does not match the bank's subject {}",
                subject.code(),
                from_bank.code()
            );
        }
        _ => Ok(from_bank),
    }
}
