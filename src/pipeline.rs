//! The build pipeline.
//!
//! ```text
//! fetch source release ─► skip? ─► download asset ─► decode ─► override one code
//!        ─► encode full trie ─► encode single-country trie ─► emit rule-sets
//! ```
//!
//! Every input comes from [`BuildConfig`]; nothing is read from the process
//! environment here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::artifact::{recreate_dir, write_atomic, write_bytes, write_checksum};
use crate::country::{CountryRangeMap, OverridePolicy};
use crate::error::MalformedLineError;
use crate::mmdb::encoder::{encode_with_stats, EncodeStats};
use crate::mmdb::{decode, TrieBuildOptions};
use crate::release::{Release, ReleaseClient};
use crate::ruleset::{artifact_name, emitters};
use crate::source::{CidrSource, CidrSourceReader, DEFAULT_OVERRIDE_SOURCES};
use crate::Result;

/// Default upstream repository.
pub const DEFAULT_SOURCE_REPO: &str = "Dreamacro/maxmind-geoip";
/// Default repository the rebuilt database is published to.
pub const DEFAULT_DESTINATION_REPO: &str = "caocaocc/geoip";
/// Default upstream asset.
pub const DEFAULT_ASSET_NAME: &str = "Country.mmdb";
/// Default overridden country.
pub const DEFAULT_OVERRIDE_CODE: &str = "cn";

/// Everything a build needs.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Upstream repository (`owner/name`)
    pub source_repo: String,
    /// Repository whose latest release decides whether to skip
    pub destination_repo: String,
    /// Asset to download from the source release
    pub asset_name: String,
    /// Release tag to use instead of the latest release
    pub fixed_release: Option<String>,
    /// GitHub access token
    pub access_token: Option<String>,
    /// Build even when the destination already carries the source release
    pub no_skip: bool,
    /// Full database output path
    pub output: PathBuf,
    /// Country whose ranges are replaced
    pub override_code: String,
    /// Single-country database output path
    pub single_output: PathBuf,
    /// Directory for per-country rule-sets; recreated on each build
    pub rule_set_dir: PathBuf,
    /// Replacement ranges for the override code
    pub override_sources: Vec<CidrSource>,
    /// Write `.sha256sum` files beside the databases
    pub checksums: bool,
    /// HTTP timeout
    pub timeout: Duration,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_repo: DEFAULT_SOURCE_REPO.to_string(),
            destination_repo: DEFAULT_DESTINATION_REPO.to_string(),
            asset_name: DEFAULT_ASSET_NAME.to_string(),
            fixed_release: None,
            access_token: None,
            no_skip: false,
            output: PathBuf::from("geoip.db"),
            override_code: DEFAULT_OVERRIDE_CODE.to_string(),
            single_output: PathBuf::from("geoip-cn.db"),
            rule_set_dir: PathBuf::from("rule-set"),
            override_sources: DEFAULT_OVERRIDE_SOURCES
                .iter()
                .map(|s| CidrSource::parse(s))
                .collect(),
            checksums: false,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Result of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    /// The destination already carries this source release
    Skipped { release: String },
    /// Artifacts were written for the source release named `tag`
    Built { tag: String, report: BuildReport },
}

/// What a build produced.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Countries in the final map
    pub countries: usize,
    /// Networks decoded from the source database
    pub decoded_networks: usize,
    /// Networks read for the override code
    pub override_networks: usize,
    /// Override lines that failed to parse
    pub malformed: Vec<MalformedLineError>,
    /// Full database encode
    pub full: EncodeStats,
    /// Single-country database encode
    pub single: EncodeStats,
    /// Every file written, in write order
    pub artifacts: Vec<PathBuf>,
}

/// Runs builds for one [`BuildConfig`].
pub struct Pipeline {
    config: BuildConfig,
    policy: OverridePolicy,
    sources: CidrSourceReader,
}

impl Pipeline {
    /// Create a pipeline. Fails on an invalid override code.
    pub fn new(config: BuildConfig) -> Result<Self> {
        let policy = OverridePolicy::new(&config.override_code)?;
        let sources = CidrSourceReader::new(config.timeout)?;
        Ok(Self {
            config,
            policy,
            sources,
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Fetch the source release and build unless the destination carries it.
    pub fn run(&self) -> Result<BuildOutcome> {
        let client = ReleaseClient::new(self.config.access_token.clone(), self.config.timeout)?;
        let tag = self.config.fixed_release.as_deref();

        let source = client.fetch(&self.config.source_repo, tag)?;
        if self.should_skip(&client, &source, tag) {
            log::info!("already latest: {}", source.display_name());
            return Ok(BuildOutcome::Skipped {
                release: source.display_name().to_string(),
            });
        }

        let bytes = client.download_asset(&source, &self.config.asset_name)?;
        let report = self.build_from_bytes(&bytes)?;
        Ok(BuildOutcome::Built {
            tag: source.display_name().to_string(),
            report,
        })
    }

    fn should_skip(&self, client: &ReleaseClient, source: &Release, tag: Option<&str>) -> bool {
        match client.fetch(&self.config.destination_repo, tag) {
            Ok(destination) => !self.config.no_skip && destination.carries(source),
            Err(e) => {
                log::warn!("missing destination latest release: {}", e);
                false
            }
        }
    }

    /// Build every artifact from source database bytes.
    pub fn build_from_bytes(&self, bytes: &[u8]) -> Result<BuildReport> {
        let decoded = decode(bytes)?;
        let mut report = BuildReport {
            decoded_networks: decoded.countries.network_count(),
            ..BuildReport::default()
        };

        let sources = self.sources.read_all(&self.config.override_sources)?;
        report.override_networks = sources.networks.len();
        report.malformed = sources.malformed;
        let countries = self.policy.apply(decoded.countries, sources.networks);
        report.countries = countries.len();

        let full_options = TrieBuildOptions::new(&decoded.metadata);
        let single_options =
            TrieBuildOptions::new(&decoded.metadata).with_codes([self.policy.code()]);

        let (full, full_stats) = encode_with_stats(&full_options, &countries)?;
        let (single, single_stats) = encode_with_stats(&single_options, &countries)?;
        report.full = full_stats;
        report.single = single_stats;

        self.write_trie(&self.config.output, &full, &mut report.artifacts)?;
        self.write_trie(&self.config.single_output, &single, &mut report.artifacts)?;

        emit_rule_sets(&countries, &self.config.rule_set_dir, &mut report.artifacts)?;

        log::info!(
            "built {} countries, {} artifacts",
            report.countries,
            report.artifacts.len()
        );
        Ok(report)
    }

    fn write_trie(&self, path: &Path, bytes: &[u8], written: &mut Vec<PathBuf>) -> Result<()> {
        write_bytes(path, bytes)?;
        log::info!("write {}", path.display());
        written.push(path.to_path_buf());

        if self.config.checksums {
            written.push(write_checksum(path, bytes)?);
        }
        Ok(())
    }
}

/// Recreate `dir` and write every format for every code, codes ascending.
pub fn emit_rule_sets(
    countries: &CountryRangeMap,
    dir: &Path,
    written: &mut Vec<PathBuf>,
) -> Result<()> {
    recreate_dir(dir)?;
    let emitters = emitters();

    for (code, networks) in countries.iter() {
        for emitter in &emitters {
            let path = dir.join(artifact_name(code, emitter.extension()));
            write_atomic(&path, |w| {
                emitter.emit(networks, w)?;
                Ok(())
            })?;
            log::info!("write {}", path.display());
            written.push(path);
        }
    }
    Ok(())
}
