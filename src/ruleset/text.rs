//! Plain-text rule-set formats.

use ipnet::IpNet;
use std::io::{self, Write};

use super::RuleSetEmitter;

/// One CIDR per line.
pub struct TxtEmitter;

/// Clash/Surge classical list: `IP-CIDR,` / `IP-CIDR6,` prefixed lines.
pub struct ListEmitter;

/// Clash rule-provider payload.
pub struct YamlEmitter;

/// Quantumult X style snippet: `ip-cidr, ` / `ip6-cidr, ` prefixed lines.
pub struct SnippetEmitter;

/// Write one line per network, with a family-dependent prefix.
fn write_prefixed(
    networks: &[IpNet],
    out: &mut dyn Write,
    v4_prefix: &str,
    v6_prefix: &str,
) -> io::Result<()> {
    for network in networks {
        let prefix = match network {
            IpNet::V4(_) => v4_prefix,
            IpNet::V6(_) => v6_prefix,
        };
        writeln!(out, "{}{}", prefix, network)?;
    }
    Ok(())
}

impl RuleSetEmitter for TxtEmitter {
    fn extension(&self) -> &'static str {
        "txt"
    }

    fn emit(&self, networks: &[IpNet], out: &mut dyn Write) -> io::Result<()> {
        write_prefixed(networks, out, "", "")
    }
}

impl RuleSetEmitter for ListEmitter {
    fn extension(&self) -> &'static str {
        "list"
    }

    fn emit(&self, networks: &[IpNet], out: &mut dyn Write) -> io::Result<()> {
        write_prefixed(networks, out, "IP-CIDR,", "IP-CIDR6,")
    }
}

impl RuleSetEmitter for YamlEmitter {
    fn extension(&self) -> &'static str {
        "yaml"
    }

    fn emit(&self, networks: &[IpNet], out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "payload:")?;
        write_prefixed(networks, out, "  - ", "  - ")
    }
}

impl RuleSetEmitter for SnippetEmitter {
    fn extension(&self) -> &'static str {
        "snippet"
    }

    fn emit(&self, networks: &[IpNet], out: &mut dyn Write) -> io::Result<()> {
        write_prefixed(networks, out, "ip-cidr, ", "ip6-cidr, ")
    }
}
