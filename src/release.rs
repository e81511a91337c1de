//! GitHub release lookup and asset download.

use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

use crate::{Error, Result};

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("geoip-ruleset/", env!("CARGO_PKG_VERSION"));

/// A file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

/// A published release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub name: Option<String>,
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// Release name, or the tag when the release is unnamed.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.tag_name,
        }
    }

    /// Find an asset by exact name.
    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name == name)
    }

    /// Whether this release already carries `source`'s build.
    ///
    /// Destination releases are named after the source release they were
    /// built from, so a substring match means nothing new upstream.
    pub fn carries(&self, source: &Release) -> bool {
        self.display_name().contains(source.display_name())
    }
}

/// Blocking client for the GitHub releases API.
pub struct ReleaseClient {
    client: reqwest::blocking::Client,
    api_base: String,
    access_token: Option<String>,
}

impl ReleaseClient {
    /// Create a client. The token, when given, is sent as the basic-auth user.
    pub fn new(access_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            api_base: GITHUB_API.to_string(),
            access_token: access_token.filter(|t| !t.is_empty()),
        })
    }

    /// Point the client at another API root (GitHub Enterprise, mirrors).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Fetch the latest release of `owner/repo`, or the release tagged `tag`.
    pub fn fetch(&self, repo: &str, tag: Option<&str>) -> Result<Release> {
        let (owner, name) = split_repo(repo)?;
        let url = match tag {
            Some(tag) => format!("{}/repos/{}/{}/releases/tags/{}", self.api_base, owner, name, tag),
            None => format!("{}/repos/{}/{}/releases/latest", self.api_base, owner, name),
        };
        log::debug!("fetch release {}", url);

        let response = self
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .map_err(|e| Error::source_unavailable(repo, e))?;
        if !response.status().is_success() {
            return Err(Error::source_unavailable(
                repo,
                format!("HTTP {}", response.status()),
            ));
        }

        let release: Release = response
            .json()
            .map_err(|e| Error::source_unavailable(repo, e))?;
        log::info!("{}: release {}", repo, release.display_name());
        Ok(release)
    }

    /// Download a named asset of a release.
    pub fn download_asset(&self, release: &Release, asset_name: &str) -> Result<Vec<u8>> {
        let asset = release.asset(asset_name).ok_or_else(|| {
            Error::source_unavailable(
                asset_name,
                format!("not found in release {}", release.display_name()),
            )
        })?;

        log::info!("download {}", asset.browser_download_url);
        let mut response = self
            .get(&asset.browser_download_url)
            .send()
            .map_err(|e| Error::source_unavailable(asset_name, e))?;
        if !response.status().is_success() {
            return Err(Error::source_unavailable(
                asset_name,
                format!("HTTP {}", response.status()),
            ));
        }

        let mut bytes = Vec::new();
        response
            .read_to_end(&mut bytes)
            .map_err(|e| Error::source_unavailable(asset_name, e))?;
        log::info!("downloaded {} ({} bytes)", asset_name, bytes.len());
        Ok(bytes)
    }

    fn get(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        let request = self.client.get(url);
        match &self.access_token {
            Some(token) => request.basic_auth(token, None::<&str>),
            None => request,
        }
    }
}

/// Split `owner/repo`.
pub fn split_repo(repo: &str) -> Result<(&str, &str)> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => Ok((owner, name)),
        _ => Err(Error::Config(format!(
            "repository must be owner/name, got {:?}",
            repo
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELEASE_JSON: &str = r#"{
        "id": 1,
        "name": "20240102",
        "tag_name": "v20240102",
        "draft": false,
        "assets": [
            {"name": "Country.mmdb", "size": 10, "browser_download_url": "https://example.com/Country.mmdb"},
            {"name": "Country.mmdb.sha256sum", "browser_download_url": "https://example.com/Country.mmdb.sha256sum"}
        ]
    }"#;

    #[test]
    fn test_release_deserialize() {
        let release: Release = serde_json::from_str(RELEASE_JSON).unwrap();
        assert_eq!(release.display_name(), "20240102");
        assert_eq!(release.assets.len(), 2);
        assert_eq!(
            release.asset("Country.mmdb").unwrap().browser_download_url,
            "https://example.com/Country.mmdb"
        );
        assert!(release.asset("country.mmdb").is_none());
    }

    #[test]
    fn test_display_name_falls_back_to_tag() {
        let release: Release =
            serde_json::from_str(r#"{"name": null, "tag_name": "v1"}"#).unwrap();
        assert_eq!(release.display_name(), "v1");
        assert!(release.assets.is_empty());
    }

    #[test]
    fn test_carries() {
        let source: Release = serde_json::from_str(r#"{"name": "20240102", "tag_name": "t"}"#).unwrap();
        let built: Release =
            serde_json::from_str(r#"{"name": "geoip 20240102", "tag_name": "t"}"#).unwrap();
        let stale: Release =
            serde_json::from_str(r#"{"name": "geoip 20231201", "tag_name": "t"}"#).unwrap();

        assert!(built.carries(&source));
        assert!(!stale.carries(&source));
    }

    #[test]
    fn test_missing_asset_is_source_unavailable() {
        let release: Release = serde_json::from_str(RELEASE_JSON).unwrap();
        let client = ReleaseClient::new(None, Duration::from_secs(1)).unwrap();

        let err = client.download_asset(&release, "GeoLite2-ASN.mmdb").unwrap_err();
        match err {
            Error::SourceUnavailable { name, reason } => {
                assert_eq!(name, "GeoLite2-ASN.mmdb");
                assert!(reason.contains("20240102"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_split_repo() {
        assert_eq!(
            split_repo("Dreamacro/maxmind-geoip").unwrap(),
            ("Dreamacro", "maxmind-geoip")
        );
        assert!(split_repo("maxmind-geoip").is_err());
        assert!(split_repo("/geoip").is_err());
    }
}
