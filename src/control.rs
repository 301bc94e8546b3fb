use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use glob::glob;
use log::{debug, info, warn};
use regex::Regex;

use crate::{
    config::{ExportConfig, Task},
    store::{ArticleFilter, ArticleStore},
    transfer::Transfer,
};

pub const PROCESSED_IDS_PATTERN: &str = "SCIELO_ProcessedRecordIds*";
pub const TAKEOFF_PATTERN: &str = "takeoff_*.del";
pub const VALIDATED_IDS_FILE: &str = "validated_ids.txt";
pub const TAKEOFF_FILE: &str = "takeoff.txt";

/// Journal ISSNs from a control list: one per line, uppercased, blank and
/// `#` lines ignored, invalid entries logged with their line number.
pub fn parse_journal_list(text: &str) -> Result<Vec<String>> {
    let issn = Regex::new(r"^[0-9]{4}-[0-9]{3}[0-9X]$")?;
    let mut journals = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let value = line.trim().to_uppercase();
        if value.is_empty() || value.starts_with('#') {
            continue;
        }
        if issn.is_match(&value) {
            journals.push(value);
        } else {
            warn!(
                "Invalid ISSN format at line {} of the journal list: '{}'",
                index + 1,
                value
            );
        }
    }
    Ok(journals)
}

/// Brings the task's journal list from the remote controller directory,
/// falling back to a copy already present locally.
pub fn fetch_journal_list<T: Transfer + ?Sized>(
    transfer: &T,
    config: &ExportConfig,
    task: Task,
) -> Result<Vec<String>> {
    let name = task.control_file();
    let local = config.controller_path().join(name);

    match transfer.download(&config.remote_controller_dir, name, &local) {
        Ok(true) => info!("Journal list {} downloaded", name),
        Ok(false) => warn!("Journal list {} not found remotely, using local copy", name),
        Err(e) => warn!("Journal list {} could not be downloaded ({:#}), using local copy", name, e),
    }

    if !local.is_file() {
        bail!(
            "Journal list {} is not available remotely nor at {}",
            name,
            local.display()
        );
    }
    let text = fs::read_to_string(&local)
        .with_context(|| format!("Failed to read journal list: {}", local.display()))?;
    let journals = parse_journal_list(&text)?;
    info!("{} journals listed in {}", journals.len(), name);
    Ok(journals)
}

/// Article codes from processed-ids reports, one per line.
pub fn parse_processed_ids(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Gathers the remote processed-ids reports into the local validated ids
/// file and returns the codes listed.
pub fn fetch_processed_ids<T: Transfer + ?Sized>(
    transfer: &T,
    config: &ExportConfig,
    remove_origin: bool,
) -> Result<Vec<String>> {
    let local = config.controller_path().join(VALIDATED_IDS_FILE);
    let names = transfer.download_matching(&config.remote_reports_dir, PROCESSED_IDS_PATTERN, &local)?;
    if remove_origin {
        for name in &names {
            if let Err(e) = transfer.remove(&config.remote_reports_dir, name) {
                warn!("Could not remove processed report {}: {:#}", name, e);
            }
        }
    }

    let text = fs::read_to_string(&local)
        .with_context(|| format!("Failed to read {}", local.display()))?;
    let codes = parse_processed_ids(&text);
    info!("{} processed ids read from {} reports", codes.len(), names.len());
    Ok(codes)
}

/// Entries of the takeoff list: ISSNs (9 characters) or article codes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TakeoffList {
    pub entries: Vec<String>,
}

impl TakeoffList {
    pub fn parse(text: &str) -> Self {
        TakeoffList {
            entries: text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn contains_issn(&self, issn: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.len() == 9 && e.eq_ignore_ascii_case(issn))
    }

    /// Removal lines, one per article code, with journal entries expanded
    /// to every article the store holds for them.
    pub fn removal_lines<S: ArticleStore + ?Sized>(&self, store: &S) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        for entry in &self.entries {
            if entry.len() == 9 {
                let keys = store.find_keys(&ArticleFilter::new().with_code_title(entry.to_uppercase()))?;
                let codes: BTreeSet<String> = keys.into_iter().map(|k| k.code).collect();
                debug!("Takeoff journal {} expands to {} articles", entry, codes.len());
                lines.extend(codes.into_iter().map(|code| format!("SCIELO,{},Y\r\n", code)));
            } else {
                lines.push(format!("SCIELO,{},Y\r\n", entry));
            }
        }
        Ok(lines)
    }
}

pub fn fetch_takeoff_list<T: Transfer + ?Sized>(
    transfer: &T,
    config: &ExportConfig,
    remove_origin: bool,
) -> Result<TakeoffList> {
    let local = config.controller_path().join(TAKEOFF_FILE);
    let names = transfer.download_matching(&config.remote_controller_dir, TAKEOFF_PATTERN, &local)?;
    if remove_origin {
        for name in &names {
            if let Err(e) = transfer.remove(&config.remote_controller_dir, name) {
                warn!("Could not remove takeoff file {}: {:#}", name, e);
            }
        }
    }
    let text = fs::read_to_string(&local)
        .with_context(|| format!("Failed to read {}", local.display()))?;
    let list = TakeoffList::parse(&text);
    info!("{} takeoff entries read from {} files", list.entries.len(), names.len());
    Ok(list)
}

/// Writes `SCIELO_DEL_<yyyymmdd>.del` into the controller directory.
pub fn write_removal_file<S: ArticleStore + ?Sized>(
    takeoff: &TakeoffList,
    store: &S,
    controller_dir: &Path,
    yyyymmdd: &str,
) -> Result<PathBuf> {
    let path = controller_dir.join(format!("SCIELO_DEL_{}.del", yyyymmdd));
    let lines = takeoff.removal_lines(store)?;
    let file = File::create(&path)
        .with_context(|| format!("Failed to create removal file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for line in &lines {
        writer.write_all(line.as_bytes())?;
    }
    writer.flush()?;
    info!("Removal file {} written with {} entries", path.display(), lines.len());
    Ok(path)
}

/// Uploads every local `*.del` file to the inbound directory.
pub fn send_removal_files<T: Transfer + ?Sized>(
    transfer: &T,
    config: &ExportConfig,
    remove_origin: bool,
) -> Result<usize> {
    let pattern = format!("{}/*.del", config.controller_path().display());
    let mut sent = 0;
    for entry in glob(&pattern).context("Failed to read glob pattern")? {
        let path = entry?;
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        transfer.upload(&path, &config.inbound_dir, &name)?;
        sent += 1;
        if remove_origin {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            debug!("Removal file {} removed locally", name);
        }
    }
    Ok(sent)
}
