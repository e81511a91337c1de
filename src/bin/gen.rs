//! geoip-gen: rebuild the country database and rule-sets from the latest upstream release.

use clap::{ArgAction, Parser};
use geoip_ruleset::pipeline::{
    DEFAULT_ASSET_NAME, DEFAULT_DESTINATION_REPO, DEFAULT_OVERRIDE_CODE, DEFAULT_SOURCE_REPO,
};
use geoip_ruleset::source::DEFAULT_OVERRIDE_SOURCES;
use geoip_ruleset::{BuildConfig, BuildOutcome, CidrSource, Pipeline};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "geoip-gen")]
#[command(version)]
#[command(about = "Rebuild a country GeoIP database and emit routing rule-sets", long_about = None)]
struct Cli {
    /// Upstream repository providing the source database
    #[arg(long, default_value = DEFAULT_SOURCE_REPO)]
    source: String,

    /// Repository the build is published to; its latest release decides skipping
    #[arg(long, default_value = DEFAULT_DESTINATION_REPO)]
    destination: String,

    /// Asset to download from the source release
    #[arg(long, default_value = DEFAULT_ASSET_NAME)]
    asset: String,

    /// Use this release tag instead of the latest release
    #[arg(long, env = "FIXED_RELEASE")]
    fixed_release: Option<String>,

    /// GitHub access token
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Build even if the destination already carries the source release
    #[arg(
        long,
        env = "NO_SKIP",
        action = ArgAction::Set,
        value_parser = parse_flag,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    no_skip: bool,

    /// Full database output
    #[arg(short, long, default_value = "geoip.db")]
    output: PathBuf,

    /// Country whose ranges are replaced by the override sources
    #[arg(long = "override", default_value = DEFAULT_OVERRIDE_CODE)]
    override_code: String,

    /// Single-country database output
    #[arg(long, default_value = "geoip-cn.db")]
    single_output: PathBuf,

    /// Rule-set output directory (recreated on each build)
    #[arg(long, default_value = "rule-set")]
    rule_set_dir: PathBuf,

    /// Override source URL or file; repeat for several (defaults to the China lists)
    #[arg(long = "override-source")]
    override_sources: Vec<String>,

    /// Write .sha256sum files beside the databases
    #[arg(long)]
    checksums: bool,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Build from a local database instead of fetching a release
    #[arg(long)]
    input: Option<PathBuf>,
}

/// Only the literal `true` enables a flag, as the CI workflow sets it.
fn parse_flag(s: &str) -> Result<bool, String> {
    Ok(s == "true")
}

impl Cli {
    fn build_config(&self) -> BuildConfig {
        let sources: Vec<&str> = if self.override_sources.is_empty() {
            DEFAULT_OVERRIDE_SOURCES.to_vec()
        } else {
            self.override_sources.iter().map(String::as_str).collect()
        };
        let override_sources = sources.into_iter().map(CidrSource::parse).collect();

        BuildConfig {
            source_repo: self.source.clone(),
            destination_repo: self.destination.clone(),
            asset_name: self.asset.clone(),
            fixed_release: self.fixed_release.clone().filter(|t| !t.is_empty()),
            access_token: self.access_token.clone(),
            no_skip: self.no_skip,
            output: self.output.clone(),
            override_code: self.override_code.clone(),
            single_output: self.single_output.clone(),
            rule_set_dir: self.rule_set_dir.clone(),
            override_sources,
            checksums: self.checksums,
            timeout: Duration::from_secs(self.timeout),
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::new(cli.build_config())?;

    if let Some(input) = &cli.input {
        let bytes = std::fs::read(input)?;
        let report = pipeline.build_from_bytes(&bytes)?;
        println!(
            "Built {} countries into {} artifacts",
            report.countries,
            report.artifacts.len()
        );
        return Ok(());
    }

    match pipeline.run()? {
        BuildOutcome::Skipped { .. } => set_action_output("skip", "true")?,
        BuildOutcome::Built { tag, report } => {
            if !report.malformed.is_empty() {
                log::warn!("{} override lines were skipped", report.malformed.len());
            }
            set_action_output("tag", &tag)?;
        }
    }
    Ok(())
}

/// Report a step output to GitHub Actions.
fn set_action_output(name: &str, value: &str) -> std::io::Result<()> {
    match std::env::var_os("GITHUB_OUTPUT") {
        Some(path) if !path.is_empty() => {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}={}", name, value)
        }
        _ => {
            println!("::set-output name={}::{}", name, value);
            Ok(())
        }
    }
}
