//! geoip-ruleset - Rebuild a country GeoIP database and emit routing rule-sets.
//!
//! Takes an upstream MaxMind-format country database, replaces one country's
//! ranges with an authoritative CIDR list, and writes:
//!
//! - a full database with every country (record value = lowercase code)
//! - a single-country database for the overridden code
//! - per-country rule-sets in sing-box binary (`.srs`), plain text (`.txt`),
//!   Clash/Surge list (`.list`), Clash rule-provider YAML (`.yaml`) and
//!   Quantumult X snippet (`.snippet`) formats
//!
//! # Quick Start
//!
//! ```ignore
//! use geoip_ruleset::{BuildConfig, BuildOutcome, Pipeline};
//!
//! let pipeline = Pipeline::new(BuildConfig::default())?;
//! match pipeline.run()? {
//!     BuildOutcome::Skipped { release } => println!("{} already published", release),
//!     BuildOutcome::Built { tag, report } => {
//!         println!("built {}: {} artifacts", tag, report.artifacts.len())
//!     }
//! }
//! ```
//!
//! # Building Blocks
//!
//! The stages are usable on their own:
//!
//! ```ignore
//! use geoip_ruleset::mmdb::{decode, encode, TrieBuildOptions};
//! use geoip_ruleset::OverridePolicy;
//!
//! let decoded = decode(&std::fs::read("Country.mmdb")?)?;
//! let countries = OverridePolicy::new("cn")?.apply(decoded.countries, china_ranges);
//! let bytes = encode(&TrieBuildOptions::new(&decoded.metadata), &countries)?;
//! ```

mod error;

pub mod artifact;
pub mod country;
pub mod mmdb;
pub mod pipeline;
pub mod release;
pub mod ruleset;
pub mod source;

// Re-export core types
pub use error::{Error, MalformedLineError, Result};

pub use country::{CountryRangeMap, OverridePolicy};
pub use mmdb::{BuildMetadata, IpVersion, RecordSize};
pub use pipeline::{BuildConfig, BuildOutcome, BuildReport, Pipeline};
pub use release::{Release, ReleaseAsset, ReleaseClient};
pub use ruleset::RuleSetEmitter;
pub use source::{CidrSource, CidrSourceReader, SourceReport};
