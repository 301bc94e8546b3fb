use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Result};
use indicatif::ProgressBar;
use serde_json::json;
use time::{macros::date, Date};

use wos_export::{
    aggregate::ExportContext,
    config::{ExportConfig, Task},
    fetch::MetadataSource,
    pipeline,
    record::ArticleKey,
    schema::XsdSchema,
    store::{ArticleStore, JsonlArticleStore},
    transfer::{DirectoryTransfer, Transfer},
    xml,
};

const XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="articles">
    <xs:complexType>
      <xs:sequence><xs:element name="article" type="ArticleType" maxOccurs="unbounded"/></xs:sequence>
    </xs:complexType>
  </xs:element>
  <xs:complexType name="ArticleType">
    <xs:sequence><xs:element name="title" type="xs:string"/></xs:sequence>
    <xs:attribute name="lang" type="xs:string"/>
  </xs:complexType>
</xs:schema>"#;

const TODAY: Date = date!(2019 - 03 - 12);
const VALID_A: &str = "S0001-00012019000100001";
const VALID_B: &str = "S0001-00012019000100002";
const INVALID: &str = "S0001-00012019000100003";

struct StubSource(HashMap<String, String>);

impl MetadataSource for StubSource {
    fn article_url(&self, collection: &str, code: &str) -> String {
        format!("http://articlemeta.test/api/v1/article?collection={}&code={}&format=xmlwos", collection, code)
    }

    fn article_xml(&self, _collection: &str, code: &str) -> Result<String> {
        self.0
            .get(code)
            .cloned()
            .ok_or_else(|| anyhow!("connection timed out"))
    }
}

/// Remote endpoint that accepts control traffic but refuses every upload.
struct RefusingUploads(DirectoryTransfer);

impl Transfer for RefusingUploads {
    fn list(&self, remote_dir: &str, pattern: &str) -> Result<Vec<String>> {
        self.0.list(remote_dir, pattern)
    }

    fn fetch(&self, remote_dir: &str, name: &str) -> Result<Option<Vec<u8>>> {
        self.0.fetch(remote_dir, name)
    }

    fn upload(&self, _local: &Path, remote_dir: &str, remote_name: &str) -> Result<()> {
        bail!("550 {}/{}: permission denied", remote_dir, remote_name)
    }

    fn remove(&self, remote_dir: &str, name: &str) -> Result<()> {
        self.0.remove(remote_dir, name)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    config: ExportConfig,
    remote: PathBuf,
    schema: XsdSchema,
    source: StubSource,
}

fn article_line(code: &str, issue: &str) -> String {
    json!({
        "code": code,
        "collection": "scl",
        "code_title": "0001-0001",
        "publication_year": "2019",
        "sent_wos": "False",
        "applicable": "False",
        "article": {"v32": [{"_": issue}], "v71": [{"_": "oa"}], "v91": [{"_": "20190301"}]},
    })
    .to_string()
}

fn fixture(lines: &[String]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    for name in ["controller", "xml", "xml_errors"] {
        fs::create_dir_all(work.join(name)).unwrap();
    }
    let remote = dir.path().join("remote");
    fs::create_dir_all(remote.join("controller")).unwrap();
    fs::write(remote.join("controller/keepinto.txt"), "# journals\n0001-0001\n").unwrap();

    let articles = dir.path().join("articles.jsonl");
    fs::write(&articles, lines.join("\n")).unwrap();

    let config = ExportConfig {
        working_dir: work,
        articles_path: articles,
        ..Default::default()
    };

    let mut docs = HashMap::new();
    docs.insert(
        VALID_A.to_string(),
        r#"<articles><article lang="en"><title>One</title></article></articles>"#.to_string(),
    );
    docs.insert(
        VALID_B.to_string(),
        r#"<articles><article><title>Two</title></article></articles>"#.to_string(),
    );
    docs.insert(
        INVALID.to_string(),
        r#"<articles><article><subject>Three</subject></article></articles>"#.to_string(),
    );

    Fixture {
        _dir: dir,
        config,
        remote,
        schema: XsdSchema::parse(XSD).unwrap(),
        source: StubSource(docs),
    }
}

fn default_articles() -> Vec<String> {
    vec![
        article_line(VALID_A, "1"),
        article_line(VALID_B, "1"),
        article_line(INVALID, "1"),
    ]
}

fn run_with(fx: &Fixture, transfer: &dyn Transfer, clean: bool) -> Result<wos_export::stats::RunStats> {
    let mut store = JsonlArticleStore::open(&fx.config.articles_path)?;
    let ctx = ExportContext {
        config: &fx.config,
        task: Task::Add,
        today: TODAY,
        source: &fx.source,
        schema: &fx.schema,
        transfer,
    };
    pipeline::run(&ctx, &mut store, clean, &ProgressBar::hidden())
}

fn sent_codes(fx: &Fixture) -> Vec<String> {
    let store = JsonlArticleStore::open(&fx.config.articles_path).unwrap();
    let mut codes: Vec<String> = store
        .records()
        .iter()
        .filter(|r| r.is_sent())
        .map(|r| r.code.clone())
        .collect();
    codes.sort();
    codes
}

fn report_path(fx: &Fixture, code: &str) -> PathBuf {
    fx.config
        .xml_errors_path()
        .join("scl")
        .join("0001-0001")
        .join(format!("{}.err", code))
}

#[test]
fn journal_with_one_invalid_article_delivers_the_valid_ones() {
    let fx = fixture(&default_articles());
    let transfer = DirectoryTransfer::new(&fx.remote);

    let stats = run_with(&fx, &transfer, false).unwrap();
    assert_eq!(stats.journals_delivered, 1);
    assert_eq!(stats.articles_valid, 2);
    assert_eq!(stats.articles_invalid, 1);
    assert_eq!(stats.articles_marked_sent, 2);

    let composite = fx.config.xml_path().join("SciELO_2019-03-12_0001-0001.xml");
    let text = fs::read_to_string(&composite).unwrap();
    assert!(text.starts_with("<?xml"));
    let root = xml::parse(&text).unwrap();
    assert_eq!(root.name, "articles");
    assert_eq!(root.find_all("article").count(), 2);

    assert!(report_path(&fx, INVALID).is_file());
    assert!(!report_path(&fx, VALID_A).exists());
    assert_eq!(sent_codes(&fx), vec![VALID_A.to_string(), VALID_B.to_string()]);

    assert!(fx.remote.join("inbound/SciELO_2019-03-12_0001-0001.zip").is_file());
    assert!(fx.remote.join("collections_reports/scl_20190312.zip").is_file());
    let manifest = fs::read_to_string(
        fx.config.manifests_path().join("SciELO_2019-03-12_0001-0001.txt"),
    )
    .unwrap();
    assert_eq!(manifest.lines().count(), 2);
}

#[test]
fn rerun_after_cleanup_marks_nothing_new() {
    let fx = fixture(&default_articles());
    let transfer = DirectoryTransfer::new(&fx.remote);
    run_with(&fx, &transfer, false).unwrap();

    let stats = run_with(&fx, &transfer, true).unwrap();
    assert_eq!(stats.journals_delivered, 0);
    assert_eq!(stats.journals_empty, 1);
    assert_eq!(stats.articles_marked_sent, 0);
    assert_eq!(sent_codes(&fx), vec![VALID_A.to_string(), VALID_B.to_string()]);
}

#[test]
fn second_run_on_the_same_day_skips_the_journal() {
    let fx = fixture(&default_articles());
    let transfer = DirectoryTransfer::new(&fx.remote);
    run_with(&fx, &transfer, false).unwrap();

    let stats = run_with(&fx, &transfer, false).unwrap();
    assert_eq!(stats.journals_skipped_existing, 1);
    assert_eq!(stats.articles_seen, 0);
}

#[test]
fn refused_delivery_changes_no_flags() {
    let fx = fixture(&default_articles());
    let transfer = RefusingUploads(DirectoryTransfer::new(&fx.remote));

    let stats = run_with(&fx, &transfer, false).unwrap();
    assert_eq!(stats.journals_failed, 1);
    assert_eq!(stats.journals_delivered, 0);

    assert!(fx.config.xml_path().join("SciELO_2019-03-12_0001-0001.xml").is_file());
    assert!(report_path(&fx, INVALID).is_file());
    assert!(sent_codes(&fx).is_empty());
    assert!(!fx.config.manifests_path().join("SciELO_2019-03-12_0001-0001.txt").exists());
}

#[test]
fn ahead_of_print_articles_are_never_validated() {
    let mut lines = default_articles();
    lines.push(article_line("S0001-00012019005000004", "ahead"));
    let fx = fixture(&lines);
    let transfer = DirectoryTransfer::new(&fx.remote);

    let stats = run_with(&fx, &transfer, false).unwrap();
    assert_eq!(stats.articles_skipped_ahead, 1);
    assert_eq!(stats.articles_seen, 3);
    assert!(!report_path(&fx, "S0001-00012019005000004").exists());
    assert!(!sent_codes(&fx).contains(&"S0001-00012019005000004".to_string()));
}

#[test]
fn stale_report_removed_once_article_validates() {
    let fx = fixture(&default_articles());
    let stale = report_path(&fx, VALID_B);
    fs::create_dir_all(stale.parent().unwrap()).unwrap();
    fs::write(&stale, "old errors").unwrap();
    let transfer = DirectoryTransfer::new(&fx.remote);

    run_with(&fx, &transfer, false).unwrap();
    assert!(!stale.exists());
    let report = fs::read_to_string(report_path(&fx, INVALID)).unwrap();
    assert!(report.contains("ERRORS\n======"));
    assert!(report.contains("format=xmlwos"));
}

#[test]
fn missing_working_directories_abort_before_any_change() {
    let fx = fixture(&default_articles());
    fs::remove_dir_all(fx.config.xml_errors_path()).unwrap();
    fs::create_dir_all(fx.remote.join("inbound")).unwrap();
    fs::write(fx.remote.join("inbound/previous.zip"), "x").unwrap();
    let transfer = DirectoryTransfer::new(&fx.remote);

    assert!(run_with(&fx, &transfer, true).is_err());
    assert!(fx.remote.join("inbound/previous.zip").exists());
    assert!(sent_codes(&fx).is_empty());
}

#[test]
fn takeoff_journal_is_withheld_and_listed_for_removal() {
    let fx = fixture(&default_articles());
    fs::write(fx.remote.join("controller/takeoff_20190311.del"), "0001-0001\n").unwrap();
    let transfer = DirectoryTransfer::new(&fx.remote);

    let stats = run_with(&fx, &transfer, false).unwrap();
    assert_eq!(stats.journals_skipped_takeoff, 1);
    assert_eq!(stats.journals_delivered, 0);

    let removal = fs::read_to_string(fx.remote.join("inbound/SCIELO_DEL_20190312.del")).unwrap();
    assert_eq!(
        removal,
        format!("SCIELO,{},Y\r\nSCIELO,{},Y\r\nSCIELO,{},Y\r\n", VALID_A, VALID_B, INVALID)
    );
}

#[test]
fn processed_ids_reports_mark_articles_as_sent() {
    let fx = fixture(&default_articles());
    fs::create_dir_all(fx.remote.join("reports")).unwrap();
    fs::write(
        fx.remote.join("reports/SCIELO_ProcessedRecordIds_20190311.txt"),
        format!("{}\n", VALID_B),
    )
    .unwrap();
    let transfer = DirectoryTransfer::new(&fx.remote);

    let stats = run_with(&fx, &transfer, false).unwrap();
    assert_eq!(stats.articles_valid, 1);
    assert_eq!(stats.articles_marked_sent, 1);
    assert_eq!(sent_codes(&fx), vec![VALID_A.to_string(), VALID_B.to_string()]);

    let store = JsonlArticleStore::open(&fx.config.articles_path).unwrap();
    let record = store.find_one(&ArticleKey::new("scl", VALID_B)).unwrap().unwrap();
    assert!(record.is_applicable());
}
