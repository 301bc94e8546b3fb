use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use time::Date;

use crate::{
    archive,
    config::{ExportConfig, Task},
    eligibility::{self, Candidate},
    fetch::{ArticleOutcome, ArticleValidator, MetadataSource},
    record::{ArticleKey, FieldUpdate, TRUE},
    schema::SchemaValidator,
    stats::RunStats,
    store::ArticleStore,
    transfer::Transfer,
    watermark::ProcessingDateWatermark,
    xml::{self, Element},
};

pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Collaborators shared by every journal of a run.
pub struct ExportContext<'a> {
    pub config: &'a ExportConfig,
    pub task: Task,
    pub today: Date,
    pub source: &'a dyn MetadataSource,
    pub schema: &'a dyn SchemaValidator,
    pub transfer: &'a dyn Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Collecting,
    Packaging,
    Delivering,
    Empty,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOutcome {
    SkippedExisting,
    Empty,
    Delivered { articles: usize, marked: u64 },
    PackagingFailed,
    DeliveryFailed,
}

/// The `articles` document gathering validated fragments for one journal.
#[derive(Debug, Clone)]
pub struct CompositeDocument {
    root: Element,
    keys: Vec<ArticleKey>,
}

impl CompositeDocument {
    pub fn new(schema_version: &str, schema_location: &str) -> Self {
        let root = Element::new("articles")
            .with_attribute("xmlns:xlink", XLINK_NS)
            .with_attribute("xmlns:xsi", XSI_NS)
            .with_attribute("dtd-version", schema_version)
            .with_attribute("xsi:noNamespaceSchemaLocation", schema_location);
        CompositeDocument {
            root,
            keys: Vec::new(),
        }
    }

    pub fn push(&mut self, key: ArticleKey, article: Element) {
        self.root.push(article);
        self.keys.push(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[ArticleKey] {
        &self.keys
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn to_xml_string(&self) -> Result<String> {
        xml::to_document_string(&self.root, false)
    }
}

pub fn format_iso_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn output_path(config: &ExportConfig, task: Task, today: Date, issn: &str) -> PathBuf {
    config.xml_path().join(format!(
        "{}_{}_{}.xml",
        task.output_prefix(),
        format_iso_date(today),
        issn
    ))
}

/// One journal's pass through collecting, packaging and delivery.
pub struct JournalExport<'c, 'a> {
    ctx: &'c ExportContext<'a>,
    issn: String,
    output_path: PathBuf,
    state: ExportState,
    document: CompositeDocument,
    watermark: Option<ProcessingDateWatermark>,
    stats: RunStats,
}

impl<'c, 'a> JournalExport<'c, 'a> {
    pub fn new(ctx: &'c ExportContext<'a>, issn: &str) -> Self {
        let config = ctx.config;
        let watermark = match ctx.task {
            Task::Update => Some(
                ProcessingDateWatermark::new(&config.processing_dates_path(), issn, config.safer_days)
                    .with_today(ctx.today),
            ),
            Task::Add => None,
        };
        JournalExport {
            ctx,
            issn: issn.to_string(),
            output_path: output_path(config, ctx.task, ctx.today, issn),
            state: ExportState::Collecting,
            document: CompositeDocument::new(&config.schema_version, &config.schema_location),
            watermark,
            stats: RunStats::new(),
        }
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn document(&self) -> &CompositeDocument {
        &self.document
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn into_stats(self) -> RunStats {
        self.stats
    }

    pub fn collect(&mut self, store: &dyn ArticleStore) -> Result<()> {
        let candidates = match self.ctx.task {
            Task::Add => eligibility::not_sent(store, self.ctx.config, Some(&self.issn))?,
            Task::Update => eligibility::sent_to_wos(store, Some(&self.issn))?,
        };
        info!("{}: {} candidate articles", self.issn, candidates.total());

        let validator = ArticleValidator::new(
            self.ctx.source,
            self.ctx.schema,
            self.ctx.config.xml_errors_path(),
        );

        for candidate in candidates {
            match candidate {
                Ok(candidate) => self.consider(&candidate, &validator),
                Err(e) => {
                    self.stats.articles_errored += 1;
                    warn!("{}: failed to read candidate article: {:#}", self.issn, e);
                }
            }
        }

        self.state = if self.document.is_empty() {
            ExportState::Empty
        } else {
            ExportState::Packaging
        };
        debug!("{}: collecting finished in state {:?}", self.issn, self.state);
        Ok(())
    }

    fn consider(
        &mut self,
        candidate: &Candidate,
        validator: &ArticleValidator<'_, dyn MetadataSource + '_, dyn SchemaValidator + '_>,
    ) {
        let record = &candidate.record;
        debug!(
            "{}: article {} of {}: {}",
            self.issn, candidate.position, candidate.total, record.code
        );

        if record.is_ahead_of_print() {
            self.stats.articles_skipped_ahead += 1;
            debug!("{}: {} is ahead of print, skipped", self.issn, record.code);
            return;
        }

        let processing_date = record.processing_date();
        if let Some(watermark) = &self.watermark {
            if watermark.should_skip(processing_date.as_deref()) {
                self.stats.articles_skipped_processing_date += 1;
                debug!(
                    "{}: {} processed on {:?}, before {}, skipped",
                    self.issn,
                    record.code,
                    processing_date,
                    watermark.from_date()
                );
                return;
            }
        }

        self.stats.articles_seen += 1;
        match validator.validate(&record.collection, &record.code) {
            Ok(ArticleOutcome::Valid(article)) => {
                self.stats.articles_valid += 1;
                self.document.push(record.key(), article);
            }
            Ok(ArticleOutcome::Invalid(errors)) => {
                self.stats.articles_invalid += 1;
                debug!("{}: {} failed with {} errors", self.issn, record.code, errors.len());
            }
            Err(e) => {
                self.stats.articles_errored += 1;
                error!("{}: error while validating {}: {:#}", self.issn, record.code, e);
            }
        }

        if let Some(watermark) = &self.watermark {
            watermark.save_most_recent_processing_date(processing_date.as_deref());
        }
    }

    /// Packages and delivers the composite document. Flags are only set once
    /// the archive has been accepted by the transfer endpoint.
    pub fn finish(&mut self, store: &mut dyn ArticleStore) -> Result<JournalOutcome> {
        if self.state == ExportState::Collecting {
            anyhow::bail!("{}: finish called before collecting", self.issn);
        }

        if self.state == ExportState::Empty {
            self.state = ExportState::Done;
            self.stats.journals_empty += 1;
            info!("{}: no valid articles, nothing to deliver", self.issn);
            return Ok(JournalOutcome::Empty);
        }

        if let Err(e) = self.package() {
            self.state = ExportState::Done;
            self.stats.journals_failed += 1;
            error!("{}: packaging failed: {:#}", self.issn, e);
            return Ok(JournalOutcome::PackagingFailed);
        }
        self.state = ExportState::Delivering;

        let zip_path = self.output_path.with_extension("zip");
        let delivered = archive::zip_file(&self.output_path, &zip_path).and_then(|_| {
            let name = file_name(&zip_path);
            self.ctx
                .transfer
                .upload(&zip_path, &self.ctx.config.inbound_dir, &name)
        });
        self.state = ExportState::Done;

        if let Err(e) = delivered {
            self.stats.journals_failed += 1;
            error!(
                "{}: delivery failed, {} articles stay unsent: {:#}",
                self.issn,
                self.document.len(),
                e
            );
            return Ok(JournalOutcome::DeliveryFailed);
        }

        let marked = store.update_keys(self.document.keys(), &FieldUpdate::SentWos(TRUE.to_string()))?;
        self.stats.articles_marked_sent += marked;
        self.stats.journals_delivered += 1;

        if let Err(e) = self.write_manifest() {
            warn!("{}: manifest not written: {:#}", self.issn, e);
        }
        info!(
            "{}: delivered {} articles in {}",
            self.issn,
            self.document.len(),
            zip_path.display()
        );
        Ok(JournalOutcome::Delivered {
            articles: self.document.len(),
            marked,
        })
    }

    fn package(&self) -> Result<()> {
        let text = self.document.to_xml_string()?;
        if let Some(parent) = self.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.output_path, text)
            .with_context(|| format!("Failed to write {}", self.output_path.display()))?;
        debug!("{}: composite written to {}", self.issn, self.output_path.display());
        Ok(())
    }

    fn manifest_path(&self) -> PathBuf {
        let stem = self
            .output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.issn.clone());
        self.ctx.config.manifests_path().join(format!("{}.txt", stem))
    }

    fn write_manifest(&self) -> Result<()> {
        let path = self.manifest_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = File::create(&path)
            .with_context(|| format!("Failed to create manifest: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for key in self.document.keys() {
            writeln!(writer, "{}", key.code)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Runs one journal end to end. An existing composite for today is left
/// alone and the journal is skipped.
pub fn export_journal(
    ctx: &ExportContext<'_>,
    store: &mut dyn ArticleStore,
    issn: &str,
) -> Result<(JournalOutcome, RunStats)> {
    let mut export = JournalExport::new(ctx, issn);
    if export.output_path().exists() {
        warn!(
            "{}: {} already exists, journal skipped",
            issn,
            export.output_path().display()
        );
        let mut stats = export.into_stats();
        stats.journals_skipped_existing += 1;
        return Ok((JournalOutcome::SkippedExisting, stats));
    }

    export.collect(&*store)?;
    let outcome = export.finish(store)?;
    export.stats().log_journal_stats(issn);
    Ok((outcome, export.into_stats()))
}
