use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use echem_app::{config::IngestConfig, logging, workflow};

#[derive(Parser)]
#[command(name = "echem", about = "Ingest electrochemistry instrument files into ELN archives")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, default_value = "echem.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch, normalize and plot every file of the upload
    Ingest,
    /// Re-normalize the archives of the upload
    Normalize,
    /// Import a batch workbook of samples, environments and setups
    ImportBatch {
        /// Workbook path relative to the upload directory
        file: String,
        /// Lab id root new records are minted under, e.g. CE-NOME_AbCd_230314
        #[arg(long, default_value = "")]
        base: String,
    },
    /// Print the next free sample lab id
    MintId {
        owner: String,
        /// Preparation date, YYYY-MM-DD
        date: NaiveDate,
        #[arg(long)]
        institute: Option<String>,
    },
    /// Write a template configuration file
    NewConfig { path: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::NewConfig { path } = &cli.command {
        logging::init("info", None)?;
        log::info!("Making a template config at {:?}...", path);
        IngestConfig::write_template(path)?;
        log::info!("Done.");
        return Ok(());
    }

    let config = IngestConfig::load(&cli.config)?;
    logging::init(&config.log_level, config.log_file.as_deref())?;
    log::info!("Config loaded from {:?}", cli.config);

    match cli.command {
        Command::Ingest => {
            let summary = workflow::ingest(&config)?;
            if summary.status("failed") > 0 {
                log::warn!("{} files failed, see {:?}", summary.status("failed"), config.report_path);
            }
        }
        Command::Normalize => {
            workflow::normalize(&config)?;
        }
        Command::ImportBatch { file, base } => {
            for row in workflow::import_batch(&config, &file, &base)? {
                println!("{}\t{}\t{:?}\t{}", row.sheet, row.row, row.action, row.lab_id);
            }
        }
        Command::MintId {
            owner,
            date,
            institute,
        } => {
            println!("{}", workflow::mint_id(&config, &owner, date, institute.as_deref())?);
        }
        Command::NewConfig { .. } => {}
    }
    Ok(())
}
