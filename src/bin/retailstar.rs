use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use retailstar::checks::run_checks;
use retailstar::config::{PipelineConfig, ScoreBands};
use retailstar::data::{
    read_categories_from, read_countries_from, read_optional, read_transactions, SqliteStore,
    StarStore,
};
use retailstar::pipeline::rfm::create_segmenter;
use retailstar::pipeline::Pipeline;
use retailstar::report::{export_csv, print_segment_rules, BuildReport};

#[derive(Parser)]
#[command(name = "retailstar", about = "Retail star schema, cohort and RFM builder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every table from a transaction export
    Build {
        /// Transaction export CSV
        #[arg(long)]
        transactions: PathBuf,

        /// Country reference CSV (country,region,continent)
        #[arg(long)]
        countries: Option<PathBuf>,

        /// Product category CSV (product,category)
        #[arg(long)]
        categories: Option<PathBuf>,

        /// Output SQLite database
        #[arg(long, default_value = "retailstar.db")]
        db: PathBuf,

        /// Also export every table as CSV into this directory
        #[arg(long)]
        export_dir: Option<PathBuf>,

        /// Score bands JSON file
        #[arg(long)]
        bands: Option<PathBuf>,

        /// Rhai script defining segment(r, f, m)
        #[arg(long)]
        segment_script: Option<PathBuf>,

        /// Minimum customers for a market-significant country
        #[arg(long, default_value = "20")]
        significance_threshold: i64,
    },

    /// Check a built database for consistency
    Validate {
        /// SQLite database to check
        #[arg(long, default_value = "retailstar.db")]
        db: PathBuf,

        /// Threshold the database was built with
        #[arg(long, default_value = "20")]
        significance_threshold: i64,
    },

    /// List the built-in segment rules
    Segments,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            transactions,
            countries,
            categories,
            db,
            export_dir,
            bands,
            segment_script,
            significance_threshold,
        } => cmd_build(BuildArgs {
            transactions,
            countries,
            categories,
            db,
            export_dir,
            bands,
            segment_script,
            significance_threshold,
        }),
        Commands::Validate {
            db,
            significance_threshold,
        } => cmd_validate(db, significance_threshold),
        Commands::Segments => {
            print_segment_rules();
            Ok(())
        }
    }
}

struct BuildArgs {
    transactions: PathBuf,
    countries: Option<PathBuf>,
    categories: Option<PathBuf>,
    db: PathBuf,
    export_dir: Option<PathBuf>,
    bands: Option<PathBuf>,
    segment_script: Option<PathBuf>,
    significance_threshold: i64,
}

fn cmd_build(args: BuildArgs) -> Result<()> {
    if args.significance_threshold < 0 {
        bail!(
            "significance threshold must be non-negative, got {}",
            args.significance_threshold
        );
    }

    // Load configuration before touching any data.
    let bands = match args.bands {
        Some(ref path) => ScoreBands::from_file(path)?,
        None => ScoreBands::default(),
    };
    let segmenter = create_segmenter(args.segment_script.as_deref())
        .context("failed to load segment rules")?;
    let config = PipelineConfig {
        bands,
        significance_threshold: args.significance_threshold,
        ..Default::default()
    };

    let batch = read_transactions(&args.transactions)?;
    if batch.records.is_empty() {
        bail!(
            "no usable rows in {} ({} read)",
            args.transactions.display(),
            batch.rows_read
        );
    }
    let countries = read_optional(args.countries.as_deref(), read_countries_from)?;
    let categories = read_optional(args.categories.as_deref(), read_categories_from)?;

    let pipeline = Pipeline::new(config, segmenter);
    let (star, stats) = pipeline.run(&batch, &countries, &categories);
    if star.facts.is_empty() {
        bail!(
            "no rows of {} survived cleaning; leaving {} untouched",
            args.transactions.display(),
            args.db.display()
        );
    }

    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("failed to open database at {}", args.db.display()))?;
    store.init().context("failed to initialize schema")?;
    store
        .write_schema(&star)
        .with_context(|| format!("failed to write tables to {}", args.db.display()))?;

    let report = BuildReport::from_build(&star, &stats, pipeline.segmenter_name());
    report.print();
    println!("Tables written to {}", args.db.display());

    if let Some(ref dir) = args.export_dir {
        let paths = export_csv(&star, dir)
            .with_context(|| format!("failed to export CSV to {}", dir.display()))?;
        println!("{} tables exported to {}", paths.len(), dir.display());
    }

    Ok(())
}

fn cmd_validate(db: PathBuf, significance_threshold: i64) -> Result<()> {
    if !db.exists() {
        bail!("database not found: {}", db.display());
    }
    let store = SqliteStore::open(&db)
        .with_context(|| format!("failed to open database at {}", db.display()))?;

    let violations = run_checks(&store, significance_threshold)?;
    if violations.is_empty() {
        println!("All checks passed for {}", db.display());
        return Ok(());
    }

    println!();
    for v in &violations {
        println!("  {}", v);
    }
    println!();
    bail!("{} violations in {}", violations.len(), db.display());
}
