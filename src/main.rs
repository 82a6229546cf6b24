use clap::{Args, Parser, Subcommand};
use multiplex_align::logging;
use multiplex_align::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mxalign")]
#[command(about = "Register multiplexed imaging rounds onto a common reference marker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write JSON logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct SelectionArgs {
    /// Folder holding the images of all rounds
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Common marker present in every round, matched case-insensitively
    #[arg(short, long)]
    marker: Option<String>,

    /// Number of imaging rounds
    #[arg(short, long)]
    rounds: Option<usize>,

    /// Token preceding the round number in file names
    #[arg(short = 'k', long)]
    layer_keyword: Option<String>,

    /// Settings file (TOML, or JSON when it starts with '{')
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Align all rounds and write the stacks and landmarks under <output>/Results
    Register {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Folder receiving Results/ (defaults to the input folder)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use the inlier ratio and initial steps given here instead of the defaults
        #[arg(long)]
        fine_tune: bool,

        #[arg(long)]
        min_inlier_ratio: Option<f64>,

        /// Initial steps per scale octave of the first strategy
        #[arg(long)]
        initial_steps: Option<u32>,
    },

    /// Show how the input files are assigned to rounds without writing anything
    Inspect {
        #[command(flatten)]
        selection: SelectionArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = err
                .downcast_ref::<RegistrationError>()
                .map(|e| e.kind())
                .unwrap_or("Error");
            eprintln!("{kind}: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (selection, overrides) = match cli.command {
        Commands::Register {
            selection,
            output,
            fine_tune,
            min_inlier_ratio,
            initial_steps,
        } => (
            selection,
            Some((output, fine_tune, min_inlier_ratio, initial_steps)),
        ),
        Commands::Inspect { selection } => (selection, None),
    };

    let mut settings = match &selection.config {
        Some(path) => RegistrationSettings::load_from_file(path)?,
        None => RegistrationSettings::default(),
    };
    apply_selection(&mut settings, selection);

    let mut logging_config = settings
        .logging
        .clone()
        .unwrap_or_default()
        .with_verbosity(cli.verbose);
    if cli.log_dir.is_some() {
        logging_config.log_directory = cli.log_dir;
    }
    let _guard = logging::init_logging(&logging_config)?;

    match overrides {
        Some((output, fine_tune, min_inlier_ratio, initial_steps)) => {
            if output.is_some() {
                settings.save_folder = output;
            }
            if fine_tune {
                settings.fine_tune = Some(true);
            }
            if min_inlier_ratio.is_some() {
                settings.min_inlier_ratio = min_inlier_ratio;
            }
            if initial_steps.is_some() {
                settings.initial_steps = initial_steps;
            }
            handle_register(settings).await
        }
        None => handle_inspect(settings),
    }
}

fn apply_selection(settings: &mut RegistrationSettings, selection: SelectionArgs) {
    if selection.input.is_some() {
        settings.input_folder = selection.input;
    }
    if selection.marker.is_some() {
        settings.marker = selection.marker;
    }
    if selection.rounds.is_some() {
        settings.rounds = selection.rounds;
    }
    if selection.layer_keyword.is_some() {
        settings.layer_keyword = selection.layer_keyword;
    }
}

async fn handle_register(settings: RegistrationSettings) -> anyhow::Result<()> {
    let matching = settings.matching.clone();
    let config = settings.into_builder().build()?;
    let pipeline = Arc::new(RegistrationPipeline::with_matching(matching));
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling after the current step");
            signal_token.cancel();
        }
    });

    let worker = pipeline.clone();
    let outputs = tokio::task::spawn_blocking(move || worker.run_with_cancel(&config, cancel)).await??;

    println!("Registration complete (run {})", outputs.run_id);
    println!("  QC stack:      {}", outputs.qc_stack_path.display());
    println!("  Aligned stack: {}", outputs.aligned_stack_path.display());
    println!("  Landmarks:     {}", outputs.landmark_export_path.display());
    println!("  Landmark pairs: {}", outputs.landmark_pairs);
    println!("  Slices:");
    for (index, label) in outputs.slice_labels.iter().enumerate() {
        println!("    {:>3}  {}", index + 1, label);
    }
    Ok(())
}

fn handle_inspect(settings: RegistrationSettings) -> anyhow::Result<()> {
    let config = settings.into_builder().build()?;
    let catalog = ImageCatalog::scan(config.input_folder())?;
    println!(
        "{} image files in {}",
        catalog.len(),
        config.input_folder().display()
    );

    let markers = catalog.marker_files(config.marker());
    match markers.first() {
        Some(reference) => println!("Reference: {}", reference.file_name),
        None => println!("Reference: none (no file contains '{}')", config.marker()),
    }
    println!("Marker files ({}):", markers.len());
    for (pair_index, entry) in markers.iter().enumerate() {
        if pair_index == 0 {
            println!("  {}  (reference)", entry.file_name);
        } else {
            println!("  {}  (pair {})", entry.file_name, pair_index);
        }
    }

    for round in catalog.rounds(config.marker(), config.layer_keyword(), config.rounds()) {
        println!(
            "Round {} [{}]: {} channel(s)",
            round.index,
            round_token(config.layer_keyword(), round.index),
            round.channels.len()
        );
        for entry in &round.channels {
            println!("  {}", entry.file_name);
        }
    }

    let missing = config.rounds().saturating_sub(markers.len());
    if missing > 0 {
        println!(
            "Warning: {} round(s) have no marker image; registration would stop at round {}",
            missing,
            markers.len() + 1
        );
    }
    Ok(())
}
