//! mvg-grader command-line entry point

use clap::{Parser, Subcommand};
use mvg_common::config::{resolve_root_folder, OracleConfig};
use mvg_common::db::init_database;
use mvg_grader::services::leaderboard::Leaderboard;
use mvg_grader::services::moderation::SubmissionImages;
use mvg_grader::services::publish_scheduler::PublishScheduler;
use mvg_grader::services::specimen_store::SpecimenStore;
use mvg_grader::services::submission_pipeline::{
    generate_specimen_id, SubmissionOutcome, SubmissionPipeline, SubmissionRequest,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mvg-grader", about = "Multi-view specimen grading pipeline", version)]
struct Cli {
    /// Root data folder (overrides MVG_ROOT and the config file)
    #[arg(long, global = true)]
    root: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Grade one specimen from its view images
    Grade {
        /// Front view image
        #[arg(long)]
        front: PathBuf,
        /// Side (profile) view image
        #[arg(long)]
        side: PathBuf,
        /// Optional back view image
        #[arg(long)]
        back: Option<PathBuf>,
        /// Submitting device identity
        #[arg(long)]
        device_id: String,
        /// Submitting address
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,
        /// Three-character display tag (A-Z, 0-9)
        #[arg(long)]
        user_tag: Option<String>,
        /// Specimen id (minted when omitted)
        #[arg(long)]
        specimen_id: Option<String>,
        /// Measured corner radius proxy in millimetres
        #[arg(long)]
        corner_radius_mm: Option<f64>,
    },
    /// Show one graded specimen
    Show {
        /// Specimen id
        specimen_id: String,
    },
    /// List published specimens, most recent first
    Published {
        /// Number of entries to show
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show the leaderboard
    Leaderboard {
        /// Number of entries to show
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Publish every specimen whose hold-down delay has elapsed
    PublishDue,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let root = resolve_root_folder(cli.root.as_deref(), "MVG_ROOT");
    let db = init_database(&root.join("grades.db")).await?;

    match cli.command {
        Command::Grade {
            front,
            side,
            back,
            device_id,
            ip,
            user_tag,
            specimen_id,
            corner_radius_mm,
        } => {
            let pipeline =
                SubmissionPipeline::new(db, OracleConfig::from_env()?, root.join("reports"))?;

            let request = SubmissionRequest {
                specimen_id: specimen_id.unwrap_or_else(generate_specimen_id),
                images: SubmissionImages { front, side, back },
                device_id,
                ip,
                user_tag,
                corner_radius_mm,
            };

            match pipeline.process(request).await? {
                SubmissionOutcome::Graded(graded) => {
                    println!(
                        "{}: {:.1} ({})",
                        graded.record.specimen_id, graded.record.grade, graded.record.grade_label
                    );
                    println!("Report: {}", graded.report_path.display());
                    for warning in &graded.warnings {
                        println!("Warning: {}", warning);
                    }
                }
                SubmissionOutcome::Rejected(report) => {
                    eprintln!("Submission rejected:");
                    for error in &report.errors {
                        eprintln!("  - {}", error);
                    }
                    std::process::exit(1);
                }
            }
        }
        Command::Show { specimen_id } => {
            let store = SpecimenStore::new(db);
            match store.fetch(&specimen_id).await? {
                Some(record) => {
                    println!(
                        "{}: {:.1} ({})  curvature {:.1}%  by {}  graded {}",
                        record.specimen_id,
                        record.grade,
                        record.grade_label,
                        record.curvature,
                        record.user_tag,
                        record.date_graded
                    );
                    if let Some(report) = &record.report_path {
                        println!("Report: {}", report);
                    }
                    if !record.published {
                        println!("Not yet published.");
                    }
                }
                None => {
                    eprintln!("No specimen with id {}", specimen_id);
                    std::process::exit(1);
                }
            }
        }
        Command::Published { limit } => {
            let store = SpecimenStore::new(db);
            for record in store.list_published(limit).await? {
                println!(
                    "{}  {:.1} ({})  {}  {}",
                    record.specimen_id,
                    record.grade,
                    record.grade_label,
                    record.user_tag,
                    record.date_graded
                );
            }
        }
        Command::Leaderboard { limit } => {
            let board = Leaderboard::new(db);
            let entries = board.top(limit).await?;
            if entries.is_empty() {
                println!("Leaderboard is empty.");
            } else {
                for (rank, entry) in entries.iter().enumerate() {
                    println!(
                        "{:>3}. {}  {:.1}  {} (curvature {:.1}%, {} submissions)",
                        rank + 1,
                        entry.user_tag,
                        entry.highest_grade,
                        entry.best_specimen_id,
                        entry.best_curvature,
                        entry.total_submissions
                    );
                }
            }
            let stats = board.stats().await?;
            match (stats.top_grade, stats.average_grade) {
                (Some(top), Some(avg)) => println!(
                    "{} devices, {} submissions, top {:.1}, average {:.2}",
                    stats.total_devices, stats.total_submissions, top, avg
                ),
                _ => println!(
                    "{} devices, {} submissions total",
                    stats.total_devices, stats.total_submissions
                ),
            }
        }
        Command::PublishDue => {
            let published = PublishScheduler::new(db).publish_due().await?;
            println!("Published {} specimen(s)", published.len());
            for id in published {
                println!("  {}", id);
            }
        }
    }

    Ok(())
}
