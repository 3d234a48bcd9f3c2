use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{error, info, warn};

use crate::cli::{LoadArgs, WritePolicy};
use crate::model::{LoadSummary, read_bank_file};
use crate::store::{StoreClient, StoreConfig};

pub fn run(args: LoadArgs) -> Result<()> {
    let mut questions = Vec::new();
    for bank in &args.banks {
        let mut batch = read_bank_file(bank)?;
        info!(bank = %bank.display(), questions = batch.len(), "bank loaded");
        questions.append(&mut batch);
    }

    if questions.is_empty() {
        bail!("no questions to load");
    }

    if args.dry_run {
        info!(
            total = questions.len(),
            "dry run, nothing written to the store"
        );
        return Ok(());
    }

    let config = StoreConfig::from_env()?;
    let client = StoreClient::new(config)?;
    let delay = Duration::from_millis(args.write_delay_ms);

    info!(
        total = questions.len(),
        upsert = args.upsert,
        policy = args.on_error.as_str(),
        "load started"
    );

    let mut summary = LoadSummary {
        total: questions.len(),
        ..LoadSummary::default()
    };

    for question in &questions {
        let written = if args.upsert {
            client.upsert_by_id(question)
        } else {
            client.insert_one(question)
        };

        match written {
            Ok(()) => summary.inserted += 1,
            Err(error) => {
                summary.failed += 1;
                summary.failures.push(format!("{}: {error:#}", question.id));
                match args.on_error {
                    WritePolicy::FailFast => {
                        write_manifest(&args, &summary)?;
                        return Err(error)
                            .with_context(|| format!("failed to write question {}", question.id));
                    }
                    WritePolicy::BestEffort => {
                        warn!(id = %question.id, "write failed, continuing: {error:#}");
                    }
                }
            }
        }

        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    write_manifest(&args, &summary)?;

    if summary.failed > 0 {
        error!(
            inserted = summary.inserted,
            failed = summary.failed,
            "load finished with failures"
        );
    } else {
        info!(inserted = summary.inserted, "load finished");
    }

    Ok(())
}

fn write_manifest(args: &LoadArgs, summary: &LoadSummary) -> Result<()> {
    if let Some(path) = &args.manifest_path {
        crate::util::write_json_pretty(path, summary)?;
    }
    Ok(())
}
