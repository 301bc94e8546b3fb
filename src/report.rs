use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use time::{macros::format_description, Date, OffsetDateTime};

use crate::{archive, config::ExportConfig, record::issn_from_code, transfer::Transfer, watermark};

pub const XML_NOT_AVAILABLE: &str = "XML is not available";

/// Error report for one article, kept at
/// `<errors_root>/<collection>/<issn>/<code>.err` while the article fails
/// validation.
#[derive(Debug, Clone)]
pub struct ArticleReport {
    path: PathBuf,
}

impl ArticleReport {
    pub fn new(errors_root: &Path, collection: &str, code: &str) -> Self {
        ArticleReport {
            path: errors_root
                .join(collection)
                .join(issn_from_code(code))
                .join(format!("{}.err", code)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn write(&self, display_xml: &str, url: &str, errors: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
        }
        let content = report_content(display_xml, &timestamp(), url, errors);
        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create report: {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(content.as_bytes())
            .and_then(|_| writer.flush())
            .with_context(|| format!("Failed to write report: {}", self.path.display()))?;
        debug!("Report written: {}", self.path.display());
        Ok(())
    }

    /// Removes a report left by an earlier failed validation. Returns whether
    /// a file was removed.
    pub fn delete(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove stale report: {}", self.path.display()))?;
        debug!("Stale report removed: {}", self.path.display());
        Ok(true)
    }
}

pub fn report_content(display_xml: &str, timestamp: &str, url: &str, errors: &[String]) -> String {
    [
        display_xml.to_string(),
        "-".repeat(30),
        timestamp.to_string(),
        url.to_string(),
        format!("ERRORS\n{}", "=".repeat(6)),
        errors.join("\n"),
    ]
    .join("\n\n")
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| now.to_string())
}

/// Collection directories currently holding reports.
pub fn report_collections(errors_root: &Path) -> Result<Vec<String>> {
    if !errors_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut collections = Vec::new();
    for entry in fs::read_dir(errors_root)
        .with_context(|| format!("Failed to read reports directory: {}", errors_root.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            collections.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    collections.sort();
    Ok(collections)
}

/// Zips each collection's report tree and uploads it as
/// `<collection>_<yyyymmdd>.zip`. A failure for one collection is logged and
/// the others still go out. Returns the number of archives delivered.
pub fn publish_collection_reports<T: Transfer + ?Sized>(
    config: &ExportConfig,
    transfer: &T,
    today: Date,
) -> Result<usize> {
    let errors_root = config.xml_errors_path();
    let target_dir = config.collections_reports_path();
    fs::create_dir_all(&target_dir)
        .with_context(|| format!("Failed to create directory: {}", target_dir.display()))?;

    let stamp = watermark::format_yyyymmdd(today);
    let mut delivered = 0;
    for collection in report_collections(&errors_root)? {
        let zip_path = target_dir.join(format!("{}.zip", collection));
        let remote_name = format!("{}_{}.zip", collection, stamp);

        let result = archive::zip_directory(&errors_root.join(&collection), &collection, &zip_path)
            .and_then(|entries| {
                transfer.upload(&zip_path, &config.remote_collections_reports_dir, &remote_name)?;
                Ok(entries)
            });

        match result {
            Ok(entries) => {
                info!(
                    "Collection report {} delivered with {} files as {}",
                    collection, entries, remote_name
                );
                delivered += 1;
                if let Err(e) = fs::remove_file(&zip_path) {
                    warn!("Could not remove {}: {}", zip_path.display(), e);
                }
            }
            Err(e) => warn!("Failed to publish reports for collection {}: {:#}", collection, e),
        }
    }
    Ok(delivered)
}
