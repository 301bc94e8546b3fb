use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use log::{debug, info, warn};
use serde_json::Value;

use crate::record::{ArticleKey, ArticleRecord, FieldUpdate};

pub trait ArticleStore {
    /// Projection of every matching record down to its key.
    fn find_keys(&self, filter: &ArticleFilter) -> Result<Vec<ArticleKey>>;

    /// Full record without its `citations` payload.
    fn find_one(&self, key: &ArticleKey) -> Result<Option<ArticleRecord>>;

    /// Applies `update` to every matching record and returns how many changed.
    fn update(&mut self, filter: &ArticleFilter, update: &FieldUpdate) -> Result<u64>;

    /// Applies each keyed update in turn; returns how many changed.
    fn update_many(&mut self, updates: &[(ArticleKey, FieldUpdate)]) -> Result<u64> {
        let mut changed = 0;
        for (key, update) in updates {
            changed += self.update(&ArticleFilter::by_key(key), update)?;
        }
        Ok(changed)
    }

    /// Applies `update` to each keyed record independently.
    fn update_keys(&mut self, keys: &[ArticleKey], update: &FieldUpdate) -> Result<u64> {
        let mut changed = 0;
        for key in keys {
            changed += self.update(&ArticleFilter::by_key(key), update)?;
        }
        Ok(changed)
    }

    fn count(&self, filter: &ArticleFilter) -> Result<u64> {
        Ok(self.find_keys(filter)?.len() as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleFilter {
    pub code: Option<String>,
    pub collection: Option<String>,
    pub code_title: Option<String>,
    pub sent_wos: Option<String>,
    pub applicable: Option<String>,
    pub collections_in: Option<Vec<String>>,
    pub min_publication_year: Option<String>,
    pub field_equals: Option<(String, String)>,
}

impl ArticleFilter {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn by_key(key: &ArticleKey) -> Self {
        ArticleFilter {
            code: Some(key.code.clone()),
            collection: Some(key.collection.clone()),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_code_title(mut self, issn: impl Into<String>) -> Self {
        self.code_title = Some(issn.into());
        self
    }

    pub fn with_sent_wos(mut self, value: &str) -> Self {
        self.sent_wos = Some(value.to_string());
        self
    }

    pub fn with_applicable(mut self, value: &str) -> Self {
        self.applicable = Some(value.to_string());
        self
    }

    pub fn with_collections_in(mut self, collections: &[String]) -> Self {
        self.collections_in = Some(collections.to_vec());
        self
    }

    pub fn with_min_publication_year(mut self, year: u32) -> Self {
        self.min_publication_year = Some(year.to_string());
        self
    }

    pub fn with_field_equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.field_equals = Some((key.into(), value.into()));
        self
    }

    pub fn matches(&self, record: &ArticleRecord) -> bool {
        if let Some(code) = &self.code {
            if &record.code != code {
                return false;
            }
        }
        if let Some(collection) = &self.collection {
            if &record.collection != collection {
                return false;
            }
        }
        if let Some(issn) = &self.code_title {
            if !record.journal_issn().eq_ignore_ascii_case(issn) {
                return false;
            }
        }
        if let Some(sent) = &self.sent_wos {
            if &record.sent_wos != sent {
                return false;
            }
        }
        if let Some(applicable) = &self.applicable {
            if &record.applicable != applicable {
                return false;
            }
        }
        if let Some(allowed) = &self.collections_in {
            if !allowed.iter().any(|c| c == &record.collection) {
                return false;
            }
        }
        if let Some(year) = &self.min_publication_year {
            // string comparison, same as the store's `$gte` on string years
            if record.publication_year.as_str() < year.as_str() {
                return false;
            }
        }
        if let Some((key, value)) = &self.field_equals {
            if top_level_str(record, key).as_deref() != Some(value.as_str()) {
                return false;
            }
        }
        true
    }
}

fn top_level_str(record: &ArticleRecord, key: &str) -> Option<String> {
    match key {
        "code" => Some(record.code.clone()),
        "collection" => Some(record.collection.clone()),
        "code_title" => Some(record.journal_issn()),
        "publication_year" => Some(record.publication_year.clone()),
        "sent_wos" => Some(record.sent_wos.clone()),
        "applicable" => Some(record.applicable.clone()),
        other => match record.extra.get(other) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        },
    }
}

/// Article store backed by a JSON-lines snapshot (optionally gzipped).
/// Records are held in memory with indexes on key, code and journal ISSN;
/// every effective update rewrites the snapshot. Lines that do not parse
/// and repeated keys are carried through rewrites untouched.
pub struct JsonlArticleStore {
    path: Option<PathBuf>,
    records: Vec<ArticleRecord>,
    unparsed: Vec<String>,
    by_key: HashMap<ArticleKey, usize>,
    by_code: HashMap<String, Vec<usize>>,
    by_issn: HashMap<String, Vec<usize>>,
}

impl JsonlArticleStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open article store: {}", path.display()))?;
        let reader: Box<dyn Read> = if is_gzipped(path) {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let reader = BufReader::new(reader);

        let mut store = JsonlArticleStore::empty(Some(path.to_path_buf()));
        let mut json_parse_errors = 0u64;
        let mut duplicates = 0u64;

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result.with_context(|| {
                format!("Failed reading line {} of {}", line_num + 1, path.display())
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ArticleRecord>(&line) {
                Ok(record) => {
                    if let Some(duplicate) = store.index(record) {
                        duplicates += 1;
                        warn!(
                            "Duplicate article {} in collection {} at line {}, kept as-is",
                            duplicate.code,
                            duplicate.collection,
                            line_num + 1
                        );
                        store.unparsed.push(line);
                    }
                }
                Err(e) => {
                    json_parse_errors += 1;
                    if json_parse_errors < 5 || json_parse_errors % 10000 == 0 {
                        warn!(
                            "JSON parse error in {} line ~{}: {} (Line starts: {}...)",
                            path.display(),
                            line_num + 1,
                            e,
                            line.chars().take(100).collect::<String>()
                        );
                    }
                    store.unparsed.push(line);
                }
            }
        }

        info!(
            "Loaded {} articles from {} ({} unparseable lines and {} duplicates kept as-is)",
            store.records.len(),
            path.display(),
            json_parse_errors,
            duplicates
        );
        Ok(store)
    }

    pub fn in_memory(records: Vec<ArticleRecord>) -> Self {
        let mut store = JsonlArticleStore::empty(None);
        for record in records {
            let Some(duplicate) = store.index(record) else {
                continue;
            };
            warn!(
                "Duplicate article {} in collection {}, kept as-is",
                duplicate.code, duplicate.collection
            );
            match serde_json::to_string(&duplicate) {
                Ok(line) => store.unparsed.push(line),
                Err(e) => warn!("Failed to serialize duplicate {}: {}", duplicate.code, e),
            }
        }
        store
    }

    fn empty(path: Option<PathBuf>) -> Self {
        JsonlArticleStore {
            path,
            records: Vec::new(),
            unparsed: Vec::new(),
            by_key: HashMap::new(),
            by_code: HashMap::new(),
            by_issn: HashMap::new(),
        }
    }

    /// Indexes `record`; a record whose key is already held is handed back.
    fn index(&mut self, record: ArticleRecord) -> Option<ArticleRecord> {
        let key = record.key();
        if self.by_key.contains_key(&key) {
            return Some(record);
        }
        let idx = self.records.len();
        self.by_key.insert(key, idx);
        self.by_code.entry(record.code.clone()).or_default().push(idx);
        self.by_issn.entry(record.journal_issn()).or_default().push(idx);
        self.records.push(record);
        None
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ArticleRecord] {
        &self.records
    }

    fn candidates(&self, filter: &ArticleFilter) -> Vec<usize> {
        if let (Some(code), Some(collection)) = (&filter.code, &filter.collection) {
            return self
                .by_key
                .get(&ArticleKey::new(collection.clone(), code.clone()))
                .map(|idx| vec![*idx])
                .unwrap_or_default();
        }
        if let Some(code) = &filter.code {
            return self.by_code.get(code).cloned().unwrap_or_default();
        }
        if let Some(issn) = &filter.code_title {
            return self.by_issn.get(&issn.to_uppercase()).cloned().unwrap_or_default();
        }
        (0..self.records.len()).collect()
    }

    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp_path = PathBuf::from(format!("{}.tmp", path.display()));

        {
            let file = File::create(&tmp_path).with_context(|| {
                format!("Failed to create store snapshot: {}", tmp_path.display())
            })?;
            if is_gzipped(path) {
                let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
                self.write_lines(&mut encoder)?;
                encoder
                    .finish()
                    .context("Failed to finish gzip stream")?
                    .flush()
                    .context("Failed to flush store snapshot")?;
            } else {
                let mut writer = BufWriter::new(file);
                self.write_lines(&mut writer)?;
                writer.flush().context("Failed to flush store snapshot")?;
            }
        }

        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to replace store {} with {}",
                path.display(),
                tmp_path.display()
            )
        })?;
        debug!("Persisted {} articles to {}", self.records.len(), path.display());
        Ok(())
    }

    fn write_lines<W: Write>(&self, writer: &mut W) -> Result<()> {
        for record in &self.records {
            serde_json::to_writer(&mut *writer, record)
                .with_context(|| format!("Failed to serialize article {}", record.code))?;
            writer.write_all(b"\n")?;
        }
        for line in &self.unparsed {
            writeln!(writer, "{}", line)?;
        }
        Ok(())
    }
}

fn is_gzipped(path: &Path) -> bool {
    path.extension().map(|ext| ext == "gz").unwrap_or(false)
}

impl ArticleStore for JsonlArticleStore {
    fn find_keys(&self, filter: &ArticleFilter) -> Result<Vec<ArticleKey>> {
        Ok(self
            .candidates(filter)
            .into_iter()
            .map(|idx| &self.records[idx])
            .filter(|record| filter.matches(record))
            .map(ArticleRecord::key)
            .collect())
    }

    fn find_one(&self, key: &ArticleKey) -> Result<Option<ArticleRecord>> {
        Ok(self.by_key.get(key).map(|idx| {
            let mut record = self.records[*idx].clone();
            record.citations = None;
            record
        }))
    }

    fn update(&mut self, filter: &ArticleFilter, update: &FieldUpdate) -> Result<u64> {
        let mut changed = 0u64;
        for idx in self.candidates(filter) {
            if !filter.matches(&self.records[idx]) {
                continue;
            }
            if self.records[idx].apply(update) {
                changed += 1;
            }
        }
        if changed > 0 {
            self.persist()?;
        }
        Ok(changed)
    }

    fn update_many(&mut self, updates: &[(ArticleKey, FieldUpdate)]) -> Result<u64> {
        let mut changed = 0u64;
        for (key, update) in updates {
            match self.by_key.get(key) {
                Some(idx) => {
                    if self.records[*idx].apply(update) {
                        changed += 1;
                    }
                }
                None => warn!("Article {} not found in collection {}", key.code, key.collection),
            }
        }
        if changed > 0 {
            self.persist()?;
        }
        Ok(changed)
    }

    fn update_keys(&mut self, keys: &[ArticleKey], update: &FieldUpdate) -> Result<u64> {
        let mut changed = 0u64;
        for key in keys {
            match self.by_key.get(key) {
                Some(idx) => {
                    if self.records[*idx].apply(update) {
                        changed += 1;
                    }
                }
                None => warn!("Article {} not found in collection {}", key.code, key.collection),
            }
        }
        if changed > 0 {
            self.persist()?;
        }
        Ok(changed)
    }
}
