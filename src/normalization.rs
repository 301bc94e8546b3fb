use std::{
    collections::{BTreeSet, HashMap},
    fs::File,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use log::{debug, info};
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use crate::{
    record::{Field, FieldMap, FieldUpdate},
    store::{ArticleFilter, ArticleStore},
};

pub const PID_LENGTH: usize = 23;

/// Compatibility decomposition, keeping printable ASCII only, lowercased.
pub fn remove_accents(value: &str) -> String {
    value
        .nfkd()
        .filter(|c| c.is_ascii_graphic() || c.is_ascii_whitespace() || *c == '\x0b')
        .collect::<String>()
        .to_lowercase()
}

/// `find|replace` lookup keyed by accent-stripped lowercase text.
#[derive(Debug, Clone, Default)]
pub struct ConversionTable {
    entries: HashMap<String, String>,
}

impl ConversionTable {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open conversion table: {}", path.display()))?;
        Self::from_reader(file)
            .with_context(|| format!("Invalid conversion table: {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(b'|')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut entries = HashMap::new();
        for (index, row) in rdr.records().enumerate() {
            let row = row.with_context(|| format!("Failed to read line {}", index + 1))?;
            if row.len() != 2 {
                bail!(
                    "Line {} has {} values; each line must have 2 values separated by |",
                    index + 1,
                    row.len()
                );
            }
            let replacement = row[1].trim().to_string();
            entries.insert(remove_accents(&replacement), replacement.clone());
            entries.insert(remove_accents(row[0].trim()), replacement);
        }

        if entries.is_empty() {
            bail!("The conversion table must have at least one valid line");
        }
        Ok(ConversionTable { entries })
    }

    pub fn lookup(&self, value: &str) -> Option<&str> {
        self.entries
            .get(&remove_accents(value.trim()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Field path such as `article.v70`. Only the `article` context is stored.
fn parse_field_path(field: &str) -> Result<String> {
    match field.split_once('.') {
        Some(("article", tag)) if !tag.is_empty() && !tag.contains('.') => Ok(tag.to_string()),
        _ => bail!(
            "The field must be given as article.<field>, e.g. article.v70 (got {:?})",
            field
        ),
    }
}

/// `key:value` record filter.
pub fn parse_filter(filter: &str) -> Result<ArticleFilter> {
    let (key, value) = filter
        .split_once(':')
        .ok_or_else(|| anyhow!("Filter must be given as key:value (got {:?})", filter))?;
    Ok(ArticleFilter::new().with_field_equals(key.trim(), value.trim()))
}

#[derive(Debug, Clone)]
pub struct FieldFix {
    pub field: String,
    pub subfield: String,
    pub write_into: Option<String>,
    pub filter: ArticleFilter,
}

#[derive(Debug, Default)]
pub struct FixSummary {
    pub records_seen: u64,
    pub records_updated: u64,
    pub values_fixed: u64,
    pub not_found: BTreeSet<String>,
    pub not_found_path: PathBuf,
}

impl FieldFix {
    fn target_subfield(&self) -> &str {
        match self.write_into.as_deref() {
            Some(s) if !s.is_empty() => s,
            _ => &self.subfield,
        }
    }

    pub fn not_found_file_name(&self) -> String {
        format!("notfound_{}.{}.txt", self.field, self.target_subfield())
    }

    /// Rewrites every occurrence carrying `subfield` with its table value and
    /// writes the unmatched `code|value` pairs under `output_dir`.
    pub fn apply<S: ArticleStore + ?Sized>(
        &self,
        table: &ConversionTable,
        store: &mut S,
        output_dir: &Path,
    ) -> Result<FixSummary> {
        let tag = parse_field_path(&self.field)?;
        let target = self.target_subfield().to_string();
        let mut summary = FixSummary::default();
        let mut updates = Vec::new();

        for key in store.find_keys(&self.filter)? {
            let Some(record) = store.find_one(&key)? else {
                continue;
            };
            summary.records_seen += 1;

            let fields = FieldMap::from_value(&record.article);
            let Field::Present(occurrences) = fields.field(&tag) else {
                continue;
            };

            let mut occurrences = occurrences.to_vec();
            for occurrence in occurrences.iter_mut() {
                let Some(value) = occurrence.get(&self.subfield).cloned() else {
                    continue;
                };
                match table.lookup(&value) {
                    Some(replacement) => {
                        occurrence.insert(target.clone(), replacement.to_string());
                        summary.values_fixed += 1;
                    }
                    None => {
                        summary.not_found.insert(format!("{}|{}", record.code, value));
                    }
                }
            }

            let value = FieldMap::occurrences_value(&occurrences);
            if record.article.get(&tag) == Some(&value) {
                continue;
            }
            debug!("Normalized {} of {}", self.field, record.code);
            updates.push((
                key,
                FieldUpdate::ArticleField {
                    tag: tag.clone(),
                    value,
                },
            ));
        }
        summary.records_updated = store.update_many(&updates)?;

        summary.not_found_path = output_dir.join(self.not_found_file_name());
        write_not_found(&summary.not_found_path, &summary.not_found)?;
        info!(
            "{} records read, {} updated, {} values fixed, {} values not found",
            summary.records_seen,
            summary.records_updated,
            summary.values_fixed,
            summary.not_found.len()
        );
        Ok(summary)
    }
}

fn write_not_found(path: &Path, entries: &BTreeSet<String>) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .delimiter(b'|')
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::CRLF)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for entry in entries {
        let (code, value) = entry.split_once('|').unwrap_or((entry.as_str(), ""));
        wtr.write_record([code, value])?;
    }
    wtr.flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// `code|doi` pairs; lines with another shape or a code that is not a
/// full article PID are ignored.
pub fn parse_dois<R: BufRead>(reader: R) -> Result<HashMap<String, String>> {
    let mut dois = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() != 2 || parts[0].len() != PID_LENGTH {
            continue;
        }
        dois.insert(parts[0].to_string(), parts[1].trim().to_string());
    }
    Ok(dois)
}

/// Sets `article.doi` on records that lack one. Returns how many changed.
pub fn load_dois<S: ArticleStore + ?Sized>(store: &mut S, path: &Path) -> Result<u64> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open DOI list: {}", path.display()))?;
    let dois = parse_dois(BufReader::new(file))?;
    info!("{} DOIs read from {}", dois.len(), path.display());

    let mut updates = Vec::new();
    for key in store.find_keys(&ArticleFilter::new())? {
        let Some(doi) = dois.get(&key.code) else {
            continue;
        };
        let Some(record) = store.find_one(&key)? else {
            continue;
        };
        if record.article.get("doi").is_some() {
            continue;
        }
        info!("Including DOI for {}", key.code);
        let update = FieldUpdate::ArticleField {
            tag: "doi".to_string(),
            value: Value::String(doi.clone()),
        };
        updates.push((key, update));
    }
    store.update_many(&updates)
}
