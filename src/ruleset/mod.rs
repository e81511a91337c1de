//! Rule-set emitters.
//!
//! Each emitter projects one country's networks into one file format, in the
//! order received, without filtering or sorting. New formats are added by
//! implementing [`RuleSetEmitter`] and listing the emitter in [`emitters`].

mod srs;
mod text;

pub use srs::{SrsEmitter, SRS_MAGIC, SRS_VERSION};
pub use text::{ListEmitter, SnippetEmitter, TxtEmitter, YamlEmitter};

use ipnet::IpNet;
use std::io::{self, Write};

/// A rule-set output format.
pub trait RuleSetEmitter {
    /// File extension, without the dot.
    fn extension(&self) -> &'static str;

    /// Write the artifact for a list of networks.
    fn emit(&self, networks: &[IpNet], out: &mut dyn Write) -> io::Result<()>;

    /// Render the artifact into memory.
    fn render(&self, networks: &[IpNet]) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.emit(networks, &mut buf)?;
        Ok(buf)
    }
}

/// Every emitter, in the order artifacts are written.
pub fn emitters() -> Vec<Box<dyn RuleSetEmitter>> {
    vec![
        Box::new(SrsEmitter),
        Box::new(TxtEmitter),
        Box::new(ListEmitter),
        Box::new(YamlEmitter),
        Box::new(SnippetEmitter),
    ]
}

/// Look up an emitter by extension.
pub fn emitter_for(extension: &str) -> Option<Box<dyn RuleSetEmitter>> {
    emitters()
        .into_iter()
        .find(|e| e.extension().eq_ignore_ascii_case(extension))
}

/// Artifact file name for a country and format: `geoip-<code>.<ext>`.
pub fn artifact_name(code: &str, extension: &str) -> String {
    format!("geoip-{}.{}", code, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_name() {
        assert_eq!(artifact_name("cn", "list"), "geoip-cn.list");
        assert_eq!(artifact_name("us", "srs"), "geoip-us.srs");
    }

    #[test]
    fn test_emitter_extensions_are_unique() {
        let mut extensions: Vec<&str> = emitters().iter().map(|e| e.extension()).collect();
        assert_eq!(extensions, vec!["srs", "txt", "list", "yaml", "snippet"]);
        extensions.dedup();
        assert_eq!(extensions.len(), 5);
    }

    #[test]
    fn test_emitter_for() {
        assert_eq!(emitter_for("YAML").unwrap().extension(), "yaml");
        assert!(emitter_for("json").is_none());
    }
}
