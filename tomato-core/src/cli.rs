use crate::{
    decode_all, download_and_extract, organize, split_dataset, AcquireConfig, Backbone, LabelMap,
    OrganizeReport, SplitConfig,
};
use anyhow::{Context, Result};
use burn::config::Config as _;
use clap::{Args, CommandFactory as _, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    #[clap(subcommand)]
    subcmd: SubCmd,
}

#[derive(Debug, Subcommand)]
enum SubCmd {
    /// Download the dataset archive and extract it
    Fetch(FetchArgs),
    /// Move the images of the English class folders into the Portuguese ones
    Organize {
        /// Root of the extracted dataset
        root: PathBuf,
    },
    /// Fetch, then organize the extract directory
    Prepare(FetchArgs),
    /// Split an organized dataset into train, validation and test batches
    Split {
        /// Image height after decoding
        #[arg(long, default_value = "224")]
        height: u32,
        /// Image width after decoding
        #[arg(long, default_value = "224")]
        width: u32,
        #[arg(short, long, default_value = "32")]
        batch_size: usize,
        /// Random seed of the one-time shuffle
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Share of all batches used for testing
        #[arg(long, default_value = "0.2")]
        test_split: f64,
        /// Share of the remaining batches used for validation
        #[arg(long, default_value = "0.2")]
        val_split: f64,
        /// Backbone whose input normalization is applied
        #[arg(short = 'm', long, default_value = Backbone::default())]
        backbone: Backbone,
        /// Augment the training batches (flip, rotation, brightness)
        #[arg(short, long)]
        augment: bool,
        /// Where to write the split manifest; the config is saved next to it
        #[arg(short, long, default_value = "split.json")]
        output: PathBuf,
        /// Decode every batch to check that all images load
        #[arg(long)]
        decode: bool,
        /// Root of the organized dataset
        root: PathBuf,
    },
    /// generate auto completion script
    GenCompletion {
        /// shell name
        shell: Shell,
    },
}

#[derive(Debug, Args)]
struct FetchArgs {
    /// Directory the archive is downloaded to (it is deleted after extraction)
    #[arg(short, long, default_value = "downloads")]
    download_dir: PathBuf,
    /// Directory the archive is extracted into
    #[arg(short, long, default_value = "dataset")]
    extract_dir: PathBuf,
    /// Timeout of the download in seconds
    #[arg(short, long, default_value = "300")]
    timeout: u64,
    /// URL of the zip archive, or a local path
    source: String,
}

impl From<FetchArgs> for AcquireConfig {
    fn from(args: FetchArgs) -> Self {
        AcquireConfig::new(args.source, args.download_dir, args.extract_dir)
            .with_timeout_secs(args.timeout)
    }
}

#[cfg(feature = "tch")]
type MyBackend = burn::backend::LibTorch<f32, i8>;
#[cfg(all(feature = "ndarray", not(feature = "tch")))]
type MyBackend = burn::backend::NdArray<f32>;

pub fn run() -> Result<()> {
    let args = Cli::parse();
    match args.subcmd {
        SubCmd::Fetch(args) => {
            fetch(args.into())?;
        }
        SubCmd::Organize { root } => print_report(&organize(root, &LabelMap::TOMATO)?),
        SubCmd::Prepare(args) => {
            let config = fetch(args.into())?;
            print_report(&organize(&config.extract_dir, &LabelMap::TOMATO)?);
        }
        SubCmd::Split {
            height,
            width,
            batch_size,
            seed,
            test_split,
            val_split,
            backbone,
            augment,
            output,
            decode,
            root,
        } => {
            let config = SplitConfig::new(root)
                .with_height(height)
                .with_width(width)
                .with_batch_size(batch_size)
                .with_seed(seed)
                .with_test_split(test_split)
                .with_val_split(val_split)
                .with_backbone(backbone)
                .with_augment(augment);
            let split = split_dataset(&config)?;

            println!("{:<8}{:<9}Images", "Subset", "Batches");
            for (name, seq) in [
                ("train", &split.train),
                ("valid", &split.valid),
                ("test", &split.test),
            ] {
                println!("{:<8}{:<9}{}", name, seq.len(), seq.num_images());
            }
            println!("Classes: {}", split.class_names.join(", "));

            split.save(&output)?;
            let config_path = config_path(&output);
            config
                .save(&config_path)
                .with_context(|| format!("failed to write {}", config_path.display()))?;

            if decode {
                let decoded = decode_all::<MyBackend>(&split, &config, Default::default())?;
                println!("Decoded {decoded} images");
            }
        }
        SubCmd::GenCompletion { shell } => {
            generate(shell, &mut Cli::command(), "tomato", &mut std::io::stdout());
        }
    }
    Ok(())
}

/// Acquire the archive and record where it came from next to the extract
/// directory (`dataset` -> `dataset.config.json`).
fn fetch(config: AcquireConfig) -> Result<AcquireConfig> {
    let acquired = download_and_extract(&config)?;
    println!(
        "{} extracted to {} ({} files)",
        acquired.archive_name,
        config.extract_dir.display(),
        acquired.extracted
    );
    let config_path = config_path(&config.extract_dir);
    config
        .save(&config_path)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(config)
}

fn print_report(report: &OrganizeReport) {
    println!("{:<14}Moved", "Directory");
    for (target, moved) in &report.moved {
        println!("{:<14}{}", target, moved);
    }
    if report.renamed > 0 {
        println!("{} files renamed to avoid overwriting", report.renamed);
    }
}

/// `split.json` -> `split.config.json`, `dataset` -> `dataset.config.json`
fn config_path(output: &Path) -> PathBuf {
    output.with_extension("config.json")
}
