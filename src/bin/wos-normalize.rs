use std::{path::PathBuf, time::Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use wos_export::{
    logging::init_logger,
    normalization::{self, ConversionTable, FieldFix},
    stats::format_elapsed,
    store::{ArticleFilter, JsonlArticleStore},
};

#[derive(Parser)]
#[command(name = "wos-normalize", version, about = "Normalize article fields in the article store")]
struct Cli {
    #[arg(short, long, help = "Article store snapshot (.jsonl or .jsonl.gz)", required = true)]
    articles: PathBuf,

    #[arg(
        short,
        long,
        default_value = "INFO",
        help = "Logging level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    log_level: String,

    #[arg(long, help = "Also append log records to this file")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replace field values using a find|replace conversion table
    FixField {
        #[arg(long, help = "Field to fix, e.g. article.v70", required = true)]
        field: String,

        #[arg(long, default_value = "_", help = "Subfield holding the value to look up")]
        subfield: String,

        #[arg(long, help = "Subfield receiving the normalized value (defaults to --subfield)")]
        write_into: Option<String>,

        #[arg(long, help = "Restrict to records matching key:value")]
        filter: Option<String>,

        #[arg(long, default_value = "conversion_table.csv", help = "Conversion table file")]
        conversion_table: PathBuf,

        #[arg(long, default_value = ".", help = "Directory for the not-found report")]
        output_dir: PathBuf,
    },
    /// Set article.doi from a code|doi list on records without one
    LoadDois {
        #[arg(long, default_value = "dois.txt", help = "File with code|doi lines")]
        dois: PathBuf,
    },
}

fn main() -> Result<()> {
    let main_start_time = Instant::now();
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_deref())?;

    info!("Starting WoS Normalize v1.0.0");
    let mut store = JsonlArticleStore::open(&cli.articles)?;

    match cli.command {
        Command::FixField {
            field,
            subfield,
            write_into,
            filter,
            conversion_table,
            output_dir,
        } => {
            let table = ConversionTable::from_path(&conversion_table)?;
            info!("{} conversion keys loaded from {}", table.len(), conversion_table.display());
            let filter = match filter {
                Some(f) => normalization::parse_filter(&f)?,
                None => ArticleFilter::new(),
            };
            let fix = FieldFix {
                field,
                subfield,
                write_into,
                filter,
            };
            let summary = fix.apply(&table, &mut store, &output_dir)?;
            info!("Values not found written to {}", summary.not_found_path.display());
        }
        Command::LoadDois { dois } => {
            let changed = normalization::load_dois(&mut store, &dois)?;
            info!("{} articles received a DOI", changed);
        }
    }

    info!("Total execution time: {}", format_elapsed(main_start_time.elapsed()));
    Ok(())
}
