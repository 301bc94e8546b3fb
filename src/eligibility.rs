use anyhow::Result;
use log::{debug, info};

use crate::{
    config::ExportConfig,
    record::{ArticleKey, ArticleRecord, FieldUpdate, FALSE, TRUE},
    store::{ArticleFilter, ArticleStore},
};

pub fn not_sent_filter(config: &ExportConfig, issn: Option<&str>) -> ArticleFilter {
    let filter = ArticleFilter::new()
        .with_sent_wos(FALSE)
        .with_applicable(TRUE)
        .with_collections_in(&config.allowed_collections)
        .with_min_publication_year(config.min_publication_year);
    match issn {
        Some(issn) => filter.with_code_title(issn),
        None => filter,
    }
}

pub fn sent_to_wos_filter(issn: Option<&str>) -> ArticleFilter {
    let filter = ArticleFilter::new().with_sent_wos(TRUE);
    match issn {
        Some(issn) => filter.with_code_title(issn),
        None => filter,
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub total: usize,
    pub position: usize,
    pub record: ArticleRecord,
}

/// Count-prefixed stream of candidate articles. The key set (and so the
/// total) is fixed when the stream is created; bodies are fetched one at a
/// time as the stream advances.
pub struct Candidates<'a, S: ArticleStore + ?Sized> {
    store: &'a S,
    keys: std::vec::IntoIter<ArticleKey>,
    total: usize,
    position: usize,
}

impl<'a, S: ArticleStore + ?Sized> Candidates<'a, S> {
    pub fn query(store: &'a S, filter: &ArticleFilter) -> Result<Self> {
        let keys = store.find_keys(filter)?;
        Ok(Candidates {
            store,
            total: keys.len(),
            keys: keys.into_iter(),
            position: 0,
        })
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

impl<'a, S: ArticleStore + ?Sized> Iterator for Candidates<'a, S> {
    type Item = Result<Candidate>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.keys.next()?;
            self.position += 1;
            match self.store.find_one(&key) {
                Ok(Some(record)) => {
                    return Some(Ok(Candidate {
                        total: self.total,
                        position: self.position,
                        record,
                    }))
                }
                Ok(None) => {
                    debug!(
                        "Article {} vanished from collection {} since the query, skipping",
                        key.code, key.collection
                    );
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

pub fn not_sent<'a, S: ArticleStore + ?Sized>(
    store: &'a S,
    config: &ExportConfig,
    issn: Option<&str>,
) -> Result<Candidates<'a, S>> {
    Candidates::query(store, &not_sent_filter(config, issn))
}

pub fn sent_to_wos<'a, S: ArticleStore + ?Sized>(
    store: &'a S,
    issn: Option<&str>,
) -> Result<Candidates<'a, S>> {
    Candidates::query(store, &sent_to_wos_filter(issn))
}

/// Flags every not-yet-applicable article whose document type is eligible.
pub fn mark_applicable_document_types<S: ArticleStore + ?Sized>(
    store: &mut S,
    eligible_types: &[String],
) -> Result<u64> {
    let keys = store.find_keys(&ArticleFilter::new().with_applicable(FALSE))?;
    let mut eligible = Vec::new();
    for key in keys {
        let Some(record) = store.find_one(&key)? else {
            continue;
        };
        match record.document_type() {
            Some(doc_type) if eligible_types.iter().any(|t| t == &doc_type) => eligible.push(key),
            _ => {}
        }
    }
    let changed = store.update_keys(&eligible, &FieldUpdate::Applicable(TRUE.to_string()))?;
    info!("Marked {} articles as applicable by document type", changed);
    Ok(changed)
}

/// Marks every article whose code appears in `codes` as sent, in every
/// collection that holds it.
pub fn sync_sent_documents<S: ArticleStore + ?Sized>(
    store: &mut S,
    codes: &[String],
) -> Result<u64> {
    let mut keys = Vec::new();
    for code in codes {
        keys.extend(store.find_keys(&ArticleFilter::new().with_code(code.as_str()))?);
    }
    let changed = store.update_keys(&keys, &FieldUpdate::SentWos(TRUE.to_string()))?;
    info!(
        "Synchronized delivery state: {} codes listed, {} articles newly marked as sent",
        codes.len(),
        changed
    );
    Ok(changed)
}
