use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use glob::glob;
use indicatif::ProgressBar;
use log::{debug, error, info, warn};

use crate::{
    aggregate::{export_journal, ExportContext},
    config::ExportConfig,
    control::{self, TakeoffList},
    eligibility,
    report,
    stats::RunStats,
    store::ArticleStore,
    watermark,
};

/// Required directories under the working directory.
pub fn check_working_dir(config: &ExportConfig) -> Result<()> {
    for (label, path) in [
        ("controller", config.controller_path()),
        ("xml", config.xml_path()),
        ("xml errors", config.xml_errors_path()),
    ] {
        if !path.is_dir() {
            bail!(
                "Working directory {} has no {} directory ({})",
                config.working_dir.display(),
                label,
                path.display()
            );
        }
    }
    Ok(())
}

/// Deletes composites and archives left by earlier runs.
pub fn clean_garbage(config: &ExportConfig) -> Result<usize> {
    let patterns = [
        format!("{}/*.xml", config.xml_path().display()),
        format!("{}/*.zip", config.xml_path().display()),
        format!("{}/*.zip", config.working_dir.display()),
        format!("{}/*.zip", config.collections_reports_path().display()),
    ];
    let mut removed = 0;
    for pattern in &patterns {
        for entry in glob(pattern).context("Failed to read glob pattern")? {
            let path = entry?;
            if path.is_file() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                debug!("Removed {}", path.display());
                removed += 1;
            }
        }
    }
    info!("Removed {} files left by previous runs", removed);
    Ok(removed)
}

fn remove_local(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

fn sync_delivery_state(
    ctx: &ExportContext<'_>,
    store: &mut dyn ArticleStore,
    clean: bool,
) -> Result<u64> {
    let codes = control::fetch_processed_ids(ctx.transfer, ctx.config, clean)?;
    let changed = eligibility::sync_sent_documents(&mut *store, &codes)?;
    if clean {
        remove_local(&ctx.config.controller_path().join(control::VALIDATED_IDS_FILE));
    }
    Ok(changed)
}

fn prepare_takeoff(
    ctx: &ExportContext<'_>,
    store: &dyn ArticleStore,
    clean: bool,
) -> Result<TakeoffList> {
    let takeoff = control::fetch_takeoff_list(ctx.transfer, ctx.config, clean)?;
    control::write_removal_file(
        &takeoff,
        store,
        &ctx.config.controller_path(),
        &watermark::format_yyyymmdd(ctx.today),
    )?;
    let sent = control::send_removal_files(ctx.transfer, ctx.config, clean)?;
    info!("{} removal files sent", sent);
    Ok(takeoff)
}

/// Full export run: control lists, state synchronisation, the journal loop
/// and the collection reports. Precondition failures return before anything
/// is changed; failures inside one journal are logged and the loop moves on.
pub fn run(
    ctx: &ExportContext<'_>,
    store: &mut dyn ArticleStore,
    clean: bool,
    progress: &ProgressBar,
) -> Result<RunStats> {
    let config = ctx.config;
    check_working_dir(config)?;

    let journals = control::fetch_journal_list(ctx.transfer, config, ctx.task)?;
    if journals.is_empty() {
        warn!("Journal list for task {} is empty", ctx.task);
    }

    if clean {
        clean_garbage(config)?;
    }

    match ctx.transfer.remove_matching(&config.inbound_dir, "*") {
        Ok(removed) => info!("Removed {} previous inbound files", removed),
        Err(e) => warn!("Could not clear the inbound directory: {:#}", e),
    }

    if let Err(e) = sync_delivery_state(ctx, &mut *store, clean) {
        warn!("Delivery state synchronisation skipped: {:#}", e);
    }

    let takeoff = match prepare_takeoff(ctx, &*store, clean) {
        Ok(takeoff) => takeoff,
        Err(e) => {
            warn!("Takeoff lists not processed: {:#}", e);
            TakeoffList::default()
        }
    };

    eligibility::mark_applicable_document_types(&mut *store, &config.eligible_document_types)?;

    let mut stats = RunStats::new();
    progress.set_length(journals.len() as u64);
    for issn in &journals {
        stats.journals_listed += 1;
        if takeoff.contains_issn(issn) {
            stats.journals_skipped_takeoff += 1;
            info!(
                "{} is in the takeoff list and will not be sent until it is removed from it",
                issn
            );
            progress.inc(1);
            continue;
        }

        match export_journal(ctx, &mut *store, issn) {
            Ok((outcome, journal_stats)) => {
                debug!("{}: {:?}", issn, outcome);
                stats.absorb(&journal_stats);
            }
            Err(e) => {
                stats.journals_failed += 1;
                error!("{}: journal export aborted: {:#}", issn, e);
            }
        }
        progress.inc(1);
    }
    progress.finish_with_message("Journals processed");

    match report::publish_collection_reports(config, ctx.transfer, ctx.today) {
        Ok(count) => info!("{} collection report archives delivered", count),
        Err(e) => warn!("Collection reports not delivered: {:#}", e),
    }

    Ok(stats)
}
