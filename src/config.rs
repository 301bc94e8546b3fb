use std::{
    fmt,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const WOS_ARTICLE_TYPES: &[&str] = &[
    "ab", "an", "ax", "co", "cr", "ct", "ed", "er", "in", "le", "mt", "nd", "oa", "pr", "pv", "rc",
    "rn", "ra", "sc", "tr", "up",
];

pub const WOS_COLLECTIONS_ALLOWED: &[&str] = &[
    "scl", "arg", "cub", "esp", "col", "ven", "chl", "sza", "prt", "cri", "per", "mex", "ury", "bol",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Task {
    Add,
    Update,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Add => write!(f, "add"),
            Task::Update => write!(f, "update"),
        }
    }
}

impl Task {
    pub fn control_file(&self) -> &'static str {
        match self {
            Task::Add => "keepinto.txt",
            Task::Update => "toupdate.txt",
        }
    }

    pub fn output_prefix(&self) -> &'static str {
        match self {
            Task::Add => "SciELO",
            Task::Update => "SciELO_COR",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub passwd: String,
    pub connect_timeout_secs: u64,
}

impl Default for FtpConfig {
    fn default() -> Self {
        FtpConfig {
            host: "localhost".to_string(),
            port: 21,
            user: "anonymous".to_string(),
            passwd: "anonymous".to_string(),
            connect_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub working_dir: PathBuf,
    pub controller_dir: String,
    pub xml_dir: String,
    pub xml_errors_dir: String,
    pub processing_dates_dir: String,
    pub manifests_dir: String,
    pub collections_reports_dir: String,

    pub articles_path: PathBuf,
    pub schema_path: PathBuf,
    pub schema_version: String,
    pub schema_location: String,

    pub articlemeta_url: String,
    pub http_timeout_secs: u64,

    pub ftp: FtpConfig,
    pub inbound_dir: String,
    pub remote_controller_dir: String,
    pub remote_reports_dir: String,
    pub remote_collections_reports_dir: String,

    pub allowed_collections: Vec<String>,
    pub eligible_document_types: Vec<String>,
    pub min_publication_year: u32,
    pub safer_days: i64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            working_dir: PathBuf::from("."),
            controller_dir: "controller".to_string(),
            xml_dir: "xml".to_string(),
            xml_errors_dir: "xml_errors".to_string(),
            processing_dates_dir: "processing_dates".to_string(),
            manifests_dir: "manifests".to_string(),
            collections_reports_dir: "collections_reports".to_string(),
            articles_path: PathBuf::from("articles.jsonl.gz"),
            schema_path: PathBuf::from("xsd/ThomsonReuters_publishing.xsd"),
            schema_version: "1.10".to_string(),
            schema_location: "ThomsonReuters_publishing_1.10.xsd".to_string(),
            articlemeta_url: "http://articlemeta.scielo.org/api/v1/article".to_string(),
            http_timeout_secs: 30,
            ftp: FtpConfig::default(),
            inbound_dir: "inbound".to_string(),
            remote_controller_dir: "controller".to_string(),
            remote_reports_dir: "reports".to_string(),
            remote_collections_reports_dir: "collections_reports".to_string(),
            allowed_collections: WOS_COLLECTIONS_ALLOWED.iter().map(|c| c.to_string()).collect(),
            eligible_document_types: WOS_ARTICLE_TYPES.iter().map(|t| t.to_string()).collect(),
            min_publication_year: 2002,
            safer_days: 10,
        }
    }
}

impl ExportConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file: {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn controller_path(&self) -> PathBuf {
        self.working_dir.join(&self.controller_dir)
    }

    pub fn xml_path(&self) -> PathBuf {
        self.working_dir.join(&self.xml_dir)
    }

    pub fn xml_errors_path(&self) -> PathBuf {
        self.working_dir.join(&self.xml_errors_dir)
    }

    pub fn processing_dates_path(&self) -> PathBuf {
        self.working_dir.join(&self.processing_dates_dir)
    }

    pub fn manifests_path(&self) -> PathBuf {
        self.working_dir.join(&self.manifests_dir)
    }

    pub fn collections_reports_path(&self) -> PathBuf {
        self.working_dir.join(&self.collections_reports_dir)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn is_allowed_collection(&self, collection: &str) -> bool {
        self.allowed_collections.iter().any(|c| c == collection)
    }
}
