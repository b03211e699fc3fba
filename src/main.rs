use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ocrfuse::core::config::PipelineSettings;
use ocrfuse::export::json_export::PAGES_FILE;
use ocrfuse::pipeline::{build_document, export_document, load_results, summarize, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "ocrfuse")]
#[command(version, about = "Line-level voting across several OCR engines' transcriptions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fuse engine outputs (JSON Lines or JSON array of engine sets)
    Fuse {
        /// Input file with one engine set per page
        input: PathBuf,

        /// Output directory (default: ./<input_name>_fused)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Settings file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Worker threads (default: all cores)
        #[arg(long)]
        threads: Option<usize>,

        /// Wordlist for spell scoring (default: built-in English list)
        #[arg(long)]
        dictionary: Option<PathBuf>,

        /// Only let these engines vote (comma separated)
        #[arg(long, value_delimiter = ',')]
        engines: Vec<String>,

        /// Let dictionary quality settle close confidence races and ambiguous characters
        #[arg(long)]
        spell_voting: bool,

        /// Also write one text file per page
        #[arg(long)]
        per_page: bool,

        /// Only print errors
        #[arg(short, long)]
        quiet: bool,
    },

    /// Summarize a pages.jsonl produced by `fuse`
    Report {
        /// pages.jsonl file, or the output directory containing it
        input: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ocrfuse=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fuse {
            input,
            output,
            config,
            threads,
            dictionary,
            engines,
            spell_voting,
            per_page,
            quiet,
        } => {
            let mut settings = match &config {
                Some(path) => PipelineSettings::from_file(path)
                    .with_context(|| format!("Failed to load settings: {}", path.display()))?,
                None => PipelineSettings::default(),
            };
            if threads.is_some() {
                settings.threads = threads;
            }
            if dictionary.is_some() {
                settings.dictionary = dictionary;
            }
            if !engines.is_empty() {
                settings.fusion.engine_ids = engines;
            }
            if spell_voting {
                settings.fusion.enable_spell_weighted_voting = true;
            }
            fuse(input, output, settings, per_page, quiet)
        }
        Commands::Report { input, json } => report(input, json),
    }
}

fn fuse(input: PathBuf, output: Option<PathBuf>, settings: PipelineSettings, per_page: bool, quiet: bool) -> Result<()> {
    if !input.is_file() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }

    let output_dir = output.unwrap_or_else(|| {
        let stem = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "pages".to_string());
        PathBuf::from(format!("{stem}_fused"))
    });

    let mut config = PipelineConfig::new(input.clone(), output_dir.clone(), settings);
    config.per_page_text = per_page;

    let document = build_document(&config).with_context(|| format!("Failed to fuse: {}", input.display()))?;
    export_document(&document, &config.output, config.per_page_text)
        .with_context(|| format!("Failed to export to: {}", output_dir.display()))?;

    if !quiet {
        let escalations = document.pages.iter().filter(|page| page.needs_escalation).count();
        println!(
            "[+] {} page(s) fused, {} flagged for escalation, {} rejected",
            document.pages.len(),
            escalations,
            document.failures.len()
        );
        for failure in &document.failures {
            eprintln!("  [!] page {}: {}", failure.page_id, failure.error);
        }
        println!("[+] Results saved to: {}", output_dir.display());
    }

    if !document.failures.is_empty() {
        anyhow::bail!("{} page(s) were rejected", document.failures.len());
    }
    Ok(())
}

fn report(input: PathBuf, json: bool) -> Result<()> {
    let path = if input.is_dir() { input.join(PAGES_FILE) } else { input };
    let pages = load_results(&path)?;
    let summary = summarize(&pages);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Pages: {}", summary.pages);
    println!("Lines: {}", summary.lines);
    println!("Mean disagreement: {:.3}", summary.mean_disagreement);
    println!("Methods:");
    for (method, count) in &summary.methods {
        println!("  {method}: {count}");
    }
    if !summary.outliers.is_empty() {
        println!("Outlier engines:");
        for (engine, count) in &summary.outliers {
            println!("  {engine}: {count} page(s)");
        }
    }
    println!("Needs escalation:");
    if summary.escalations.is_empty() {
        println!("  none");
    }
    for (reason, count) in &summary.escalations {
        println!("  {reason}: {count}");
    }
    for page in pages.iter().filter(|page| page.needs_escalation) {
        println!(
            "  page {} ({}), disagreement {:.2}",
            page.page_id,
            page.escalation_reason.as_deref().unwrap_or("unknown"),
            page.disagreement_score
        );
    }
    Ok(())
}
