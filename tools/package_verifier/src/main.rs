use clap::{Parser, ValueEnum};
use epi_verify_core::{PackageVerifier, TrustPolicy, VerifierConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    RequireValidSignature,
    AllowUnsigned,
}

impl From<PolicyArg> for TrustPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::RequireValidSignature => TrustPolicy::REQUIRE_VALID_SIGNATURE,
            PolicyArg::AllowUnsigned => TrustPolicy::ALLOW_UNSIGNED,
        }
    }
}

/// Verify an .epi evidence package before anything renders it.
#[derive(Debug, Parser)]
#[command(name = "package_verifier", version)]
struct Args {
    /// Path to the .epi package
    package: PathBuf,

    /// JSON verifier config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Directory of <key_id>.pub files
    #[arg(long)]
    key_dir: Option<PathBuf>,

    /// Accept the package's own public_key (self-consistency only)
    #[arg(long)]
    trust_embedded_key: bool,

    /// Return viewer.html even when file_manifest does not cover it
    #[arg(long)]
    release_undeclared_markup: bool,

    /// Keep the extracted payload and print its location to stderr
    #[arg(long)]
    keep: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(p) => match VerifierConfig::from_json_file(p) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("invalid config {}: {}", p.display(), e);
                return ExitCode::from(2);
            }
        },
        None => VerifierConfig::default(),
    };
    if let Some(p) = args.policy {
        config.trust_policy = p.into();
    }
    if args.key_dir.is_some() {
        config.key_dir = args.key_dir.clone();
    }
    if args.trust_embedded_key {
        config.trust_embedded_public_key = true;
    }
    if args.release_undeclared_markup {
        config.release_undeclared_markup = true;
    }

    let mut result = PackageVerifier::new(config).verify(&args.package);

    match serde_json::to_string_pretty(&result) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            eprintln!("failed to render result: {}", e);
            return ExitCode::from(2);
        }
    }

    if args.keep {
        if let Some(scratch) = result.take_scratch() {
            eprintln!("payload kept at {}", scratch.keep().display());
        }
    } else {
        result.dispose();
    }

    if result.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
