use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use time::OffsetDateTime;

use wos_export::{
    aggregate::ExportContext,
    config::{ExportConfig, Task},
    fetch::ArticleMetaClient,
    logging::init_logger,
    pipeline,
    schema::XsdSchema,
    stats::format_elapsed,
    store::JsonlArticleStore,
    transfer::{DirectoryTransfer, FtpTransfer, Transfer},
};

#[derive(Parser)]
#[command(name = "wos-export", version, about = "Export validated article XML per journal and deliver it over FTP")]
struct Cli {
    #[arg(short, long, value_enum, default_value_t = Task::Add, help = "Export task: add new articles or update already sent ones")]
    task: Task,

    #[arg(long, help = "Remove outputs of previous runs and consumed control files")]
    clean_garbage: bool,

    #[arg(short, long, help = "JSON configuration file")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Working directory holding controller/, xml/ and xml_errors/")]
    working_dir: Option<PathBuf>,

    #[arg(short, long, help = "Article store snapshot (.jsonl or .jsonl.gz)")]
    articles: Option<PathBuf>,

    #[arg(short, long, help = "XSD schema used to validate article XML")]
    schema: Option<PathBuf>,

    #[arg(long, env = "WOS_FTP_HOST", help = "FTP host")]
    ftp_host: Option<String>,

    #[arg(long, env = "WOS_FTP_USER", help = "FTP user")]
    ftp_user: Option<String>,

    #[arg(long, env = "WOS_FTP_PASSWD", hide_env_values = true, help = "FTP password")]
    ftp_passwd: Option<String>,

    #[arg(long, help = "Deliver into a local directory instead of the FTP server")]
    local_transfer: Option<PathBuf>,

    #[arg(
        short,
        long,
        default_value = "INFO",
        help = "Logging level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    log_level: String,

    #[arg(long, help = "Also append log records to this file")]
    log_file: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<ExportConfig> {
    let mut config = match &cli.config {
        Some(path) => ExportConfig::from_json_file(path)?,
        None => ExportConfig::default(),
    };
    if let Some(dir) = &cli.working_dir {
        config.working_dir = dir.clone();
    }
    if let Some(path) = &cli.articles {
        config.articles_path = path.clone();
    }
    if let Some(path) = &cli.schema {
        config.schema_path = path.clone();
    }
    if let Some(host) = &cli.ftp_host {
        config.ftp.host = host.clone();
    }
    if let Some(user) = &cli.ftp_user {
        config.ftp.user = user.clone();
    }
    if let Some(passwd) = &cli.ftp_passwd {
        config.ftp.passwd = passwd.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    let main_start_time = Instant::now();
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_deref())?;

    info!("Starting WoS Export v1.0.0");
    let config = load_config(&cli)?;
    info!("Task: {}", cli.task);
    info!("Working directory: {}", config.working_dir.display());
    info!("Article store: {}", config.articles_path.display());
    info!("Schema: {}", config.schema_path.display());

    let mut store = JsonlArticleStore::open(&config.articles_path)?;
    let schema = XsdSchema::from_file(&config.schema_path)?;
    let source = ArticleMetaClient::new(&config.articlemeta_url, config.http_timeout())
        .context("Failed to build metadata service client")?;

    let transfer: Box<dyn Transfer> = match &cli.local_transfer {
        Some(dir) => {
            warn!("Delivering into local directory {} instead of FTP", dir.display());
            Box::new(DirectoryTransfer::new(dir.clone()))
        }
        None => {
            info!("FTP host: {}:{}", config.ftp.host, config.ftp.port);
            Box::new(FtpTransfer::new(config.ftp.clone()))
        }
    };

    let ctx = ExportContext {
        config: &config,
        task: cli.task,
        today: OffsetDateTime::now_utc().date(),
        source: &source,
        schema: &schema,
        transfer: transfer.as_ref(),
    };

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] Journals: [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .expect("Failed to create progress bar template")
            .progress_chars("=> "),
    );

    let stats = pipeline::run(&ctx, &mut store, cli.clean_garbage, &progress)?;
    stats.log_final_stats();

    info!("-------------------- FINAL SUMMARY --------------------");
    info!("Task: {}", cli.task);
    info!("Journals delivered: {}", stats.journals_delivered);
    info!("Articles marked as sent: {}", stats.articles_marked_sent);
    info!("Total execution time: {}", format_elapsed(main_start_time.elapsed()));
    info!("-------------------------------------------------------");

    Ok(())
}
