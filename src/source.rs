//! CIDR list sources.
//!
//! A source is a line-oriented text list: one CIDR per line, blank lines and
//! `#` comments ignored. A line that does not parse is reported and skipped;
//! only a source that cannot be read at all is an error.

use ipnet::IpNet;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, MalformedLineError, Result};

/// Default sources for the overridden country's ranges.
pub const DEFAULT_OVERRIDE_SOURCES: &[&str] = &[
    "https://raw.githubusercontent.com/misakaio/chnroutes2/master/chnroutes.txt",
    "https://raw.githubusercontent.com/gaoyifan/china-operator-ip/ip-lists/china6.txt",
];

/// Where a CIDR list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CidrSource {
    /// Fetched over HTTP(S)
    Url(String),
    /// Read from a local file
    File(PathBuf),
}

impl CidrSource {
    /// Interpret a string as a URL when it has an http(s) scheme, else a path.
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            CidrSource::Url(s.to_string())
        } else {
            CidrSource::File(PathBuf::from(s))
        }
    }
}

impl fmt::Display for CidrSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CidrSource::Url(url) => f.write_str(url),
            CidrSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Networks read from one or more sources, plus the lines that were skipped.
#[derive(Debug, Clone, Default)]
pub struct SourceReport {
    /// Parsed networks, in source then line order
    pub networks: Vec<IpNet>,
    /// Lines that failed to parse
    pub malformed: Vec<MalformedLineError>,
}

impl SourceReport {
    /// Append another report, keeping order.
    pub fn extend(&mut self, other: SourceReport) {
        self.networks.extend(other.networks);
        self.malformed.extend(other.malformed);
    }
}

/// Parse a single CIDR, clearing any host bits.
pub fn parse_cidr(s: &str) -> Option<IpNet> {
    s.parse::<IpNet>().ok().map(|net| net.trunc())
}

/// Parse CIDR lines from a reader.
///
/// `origin` names the source in warnings. Fails only if the stream itself fails.
pub fn parse_cidr_lines<R: BufRead>(mut reader: R, origin: &str) -> Result<SourceReport> {
    let mut report = SourceReport::default();
    let mut buf = Vec::new();
    let mut line_number = 0;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| Error::source_unavailable(origin, e))?;
        if read == 0 {
            break;
        }
        line_number += 1;

        let text = String::from_utf8_lossy(&buf);
        let line = text.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_cidr(line) {
            Some(network) => report.networks.push(network),
            None => {
                let err = MalformedLineError {
                    origin: origin.to_string(),
                    line: line_number,
                    content: line.to_string(),
                };
                log::warn!("{}", err);
                report.malformed.push(err);
            }
        }
    }

    Ok(report)
}

/// Reads CIDR sources with a blocking HTTP client.
pub struct CidrSourceReader {
    client: reqwest::blocking::Client,
}

impl CidrSourceReader {
    /// Create a reader whose HTTP requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Create a reader around an existing client.
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }

    /// Read one source.
    pub fn read(&self, source: &CidrSource) -> Result<SourceReport> {
        let name = source.to_string();
        let reader = self.open(source)?;
        let report = parse_cidr_lines(BufReader::new(reader), &name)?;
        log::info!(
            "read {} networks from {} ({} skipped)",
            report.networks.len(),
            name,
            report.malformed.len()
        );
        Ok(report)
    }

    /// Read all sources and concatenate them in order. No cross-source dedup.
    pub fn read_all(&self, sources: &[CidrSource]) -> Result<SourceReport> {
        let mut report = SourceReport::default();
        for source in sources {
            report.extend(self.read(source)?);
        }
        Ok(report)
    }

    fn open(&self, source: &CidrSource) -> Result<Box<dyn Read>> {
        match source {
            CidrSource::Url(url) => {
                log::info!("download {}", url);
                let response = self
                    .client
                    .get(url)
                    .send()
                    .map_err(|e| Error::source_unavailable(url.as_str(), e))?;
                if !response.status().is_success() {
                    return Err(Error::source_unavailable(
                        url.as_str(),
                        format!("HTTP {}", response.status()),
                    ));
                }
                Ok(Box::new(response))
            }
            CidrSource::File(path) => {
                let file = File::open(path)
                    .map_err(|e| Error::source_unavailable(path.display().to_string(), e))?;
                Ok(Box::new(file))
            }
        }
    }
}
