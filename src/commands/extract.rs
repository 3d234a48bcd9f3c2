use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::assemble::{self, BankBuilder};
use crate::classify::{Classifier, UNKNOWN, ZeroShotClassifier};
use crate::cli::ExtractArgs;
use crate::difficulty;
use crate::extract::{Extractor, filter_valid_blocks, read_document_text};
use crate::lexicon::Lexicon;
use crate::model::{
    BankFile, ExtractCounts, ExtractRunSummary, SourceDocument, Subject,
};
use crate::normalize::Normalizer;
use crate::store::RemoteClassifier;
use crate::taxonomy::TaxonomyStore;
use crate::util::{ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty};

pub fn run(args: ExtractArgs) -> Result<()> {
    let taxonomy = TaxonomyStore::load(&args.taxonomy_path)?;
    let lexicon = match &args.lexicon_path {
        Some(path) => Lexicon::from_path(path)?,
        None => Lexicon::builtin()?,
    };
    let classifier = Classifier::new(&taxonomy, &lexicon)?;
    let remote = args
        .classifier_url
        .clone()
        .map(RemoteClassifier::new)
        .transpose()?;
    let external: Option<&dyn ZeroShotClassifier> = remote
        .as_ref()
        .map(|classifier| classifier as &dyn ZeroShotClassifier);

    let extractor = Extractor::new()?;
    let normalizer = Normalizer::new()?;
    ensure_directory(&args.output_dir)?;

    for (subject, inputs) in group_by_subject(&args)? {
        extract_subject(
            &args,
            subject,
            &inputs,
            &extractor,
            &normalizer,
            &classifier,
            external,
        )?;
    }

    Ok(())
}

/// Maps each input file to its subject, from the global flag or from the
/// filename prefix.
fn group_by_subject(args: &ExtractArgs) -> Result<BTreeMap<Subject, Vec<PathBuf>>> {
    let mut groups: BTreeMap<Subject, Vec<PathBuf>> = BTreeMap::new();

    for input in &args.inputs {
        let subject = match args.subject {
            Some(subject) => subject,
            None => {
                let filename = input
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or_default();
                match Subject::from_filename(filename) {
                    Some(subject) => subject,
                    None => bail!(
                        "cannot infer the subject of {}; pass --subject",
                        input.display()
                    ),
                }
            }
        };
        groups.entry(subject).or_default().push(input.clone());
    }

    Ok(groups)
}

fn extract_subject(
    args: &ExtractArgs,
    subject: Subject,
    inputs: &[PathBuf],
    extractor: &Extractor,
    normalizer: &Normalizer,
    classifier: &Classifier,
    external: Option<&dyn ZeroShotClassifier>,
) -> Result<()> {
    let started_at = now_utc_string();
    let run_id = format!("extract-{}-{}", subject.code(), utc_compact_string(Utc::now()));
    info!(run_id = %run_id, subject = subject.code(), inputs = inputs.len(), "extract started");

    let mut builder = BankBuilder::new(subject, normalizer, classifier, external)?;
    let mut questions = Vec::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();
    let mut counts = ExtractCounts::default();

    for input in inputs {
        let text = match read_document_text(input) {
            Ok(text) => text,
            Err(error) => {
                warn!(path = %input.display(), "skipping unreadable input: {error:#}");
                warnings.push(format!("skipped {}: {error:#}", input.display()));
                counts.documents_skipped += 1;
                continue;
            }
        };

        sources.push(SourceDocument {
            filename: input
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string(),
            sha256: sha256_file(input)?,
        });
        counts.documents += 1;

        let blocks = extractor.extract(&text, subject);
        let extracted = blocks.len();
        let blocks = filter_valid_blocks(blocks);
        counts.blocks_extracted += extracted;
        counts.blocks_discarded += extracted - blocks.len();

        for block in &blocks {
            if block.detected_answer.is_some() {
                counts.answers_detected += 1;
            }
            questions.push(builder.push(block));
        }
    }

    counts.answers_inferred = assemble::infer_missing_answers(&mut questions);

    if args.balance_difficulty {
        let mut rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        difficulty::rebalance(&mut questions, &mut rng);
    }

    counts.questions = questions.len();
    counts.unknown_area = questions
        .iter()
        .filter(|question| question.area_tematica == UNKNOWN)
        .count();

    let output_path = args.output_dir.join(format!("{}_bank.json", subject.code()));
    write_json_pretty(
        &output_path,
        &BankFile {
            prueba_id: subject.code().to_string(),
            generated_at: now_utc_string(),
            preguntas: questions,
        },
    )?;

    info!(
        subject = subject.code(),
        questions = counts.questions,
        answers_detected = counts.answers_detected,
        answers_inferred = counts.answers_inferred,
        unknown_area = counts.unknown_area,
        output = %output_path.display(),
        "extract finished"
    );

    let manifest_path = manifest_path_for(args, subject, &output_path);
    write_json_pretty(
        &manifest_path,
        &ExtractRunSummary {
            manifest_version: 1,
            run_id,
            subject: subject.code().to_string(),
            started_at,
            updated_at: now_utc_string(),
            sources,
            counts,
            output_path: output_path.display().to_string(),
            warnings,
        },
    )?;

    Ok(())
}

fn manifest_path_for(args: &ExtractArgs, subject: Subject, output_path: &Path) -> PathBuf {
    match &args.manifest_path {
        Some(path) if args.subject.is_some() => path.clone(),
        // Several subjects share one run; keep one manifest per bank file.
        _ => output_path.with_file_name(format!("{}_extract_manifest.json", subject.code())),
    }
}
