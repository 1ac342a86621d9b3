use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use sigforge::cli::{Args, OutputFormat};
use sigforge::formatter::create_formatter;
use sigforge::siggen::SignatureGenerator;
use sigforge::types::{Signature, TrimAlgorithm};

fn main() -> Result<()> {
    let args = Args::parse();

    // Use RUST_LOG if set, otherwise fall back to the verbose flag.
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if args.verbose {
        EnvFilter::new("sigforge=debug")
    } else {
        EnvFilter::new("sigforge=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut definition = args.to_signature_definition()?;
    if definition.trim_algorithm == TrimAlgorithm::Weighted {
        // The knapsack strategy needs a solver backend; the greedy
        // strategy is the documented fallback.
        warn!("weighted trimming is not available, falling back to weighted-greedy");
        definition.trim_algorithm = TrimAlgorithm::WeightedGreedy;
    }

    let mut signature = Signature { definition, ..Default::default() };
    let mut generator = SignatureGenerator::new();
    generator.add_diff_results(&args.diff_results);
    generator
        .generate(&mut signature)
        .context("failed to generate signature")?;

    create_formatter(args.format.into())
        .format(&mut signature)
        .context("failed to format signature")?;

    let data = match args.format {
        OutputFormat::Yara => signature.yara_signature,
        OutputFormat::Clamav => signature.clam_av_signature,
    };
    // The signature itself is the only thing on stdout, so redirected
    // output stays scriptable.
    println!("{}", data.unwrap_or_default());
    Ok(())
}
