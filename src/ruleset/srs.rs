//! sing-box binary rule-set (`.srs`, version 1).
//!
//! Layout:
//!
//! ```text
//! "SRS" | version u8 | zlib(
//!     uvarint rule_count (1)
//!     u8 rule_type (0 = default)
//!     [u8 item_ipcidr | ip_set]      present when the list is non-empty
//!     u8 item_final | u8 invert (0)
//! )
//!
//! ip_set: u8 version (1) | u64 BE range_count | { uvarint len | from | uvarint len | to }*
//! ```
//!
//! Ranges are inclusive, merged when overlapping or adjacent, sorted with
//! IPv4 before IPv6.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use ipnet::IpNet;
use std::io::{self, Write};

use super::RuleSetEmitter;

pub const SRS_MAGIC: &[u8; 3] = b"SRS";
pub const SRS_VERSION: u8 = 1;

const RULE_TYPE_DEFAULT: u8 = 0;
const ITEM_IP_CIDR: u8 = 6;
const ITEM_FINAL: u8 = 0xFF;
const IP_SET_VERSION: u8 = 1;

/// Binary rule-set with a single IP-CIDR rule.
pub struct SrsEmitter;

impl RuleSetEmitter for SrsEmitter {
    fn extension(&self) -> &'static str {
        "srs"
    }

    fn emit(&self, networks: &[IpNet], out: &mut dyn Write) -> io::Result<()> {
        out.write_all(SRS_MAGIC)?;
        out.write_all(&[SRS_VERSION])?;

        let mut body = Vec::new();
        write_uvarint(&mut body, 1);
        body.push(RULE_TYPE_DEFAULT);
        if !networks.is_empty() {
            body.push(ITEM_IP_CIDR);
            write_ip_set(&mut body, &merge_ranges(networks));
        }
        body.push(ITEM_FINAL);
        body.push(0);

        let mut encoder = ZlibEncoder::new(out, Compression::best());
        encoder.write_all(&body)?;
        encoder.finish()?;
        Ok(())
    }
}

/// Inclusive address range in one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddrRange {
    V4(u32, u32),
    V6(u128, u128),
}

/// Collapse networks into sorted, disjoint, non-adjacent ranges.
fn merge_ranges(networks: &[IpNet]) -> Vec<AddrRange> {
    let mut v4: Vec<(u128, u128)> = Vec::new();
    let mut v6: Vec<(u128, u128)> = Vec::new();
    for network in networks {
        match network {
            IpNet::V4(n) => v4.push((
                u32::from(n.network()).into(),
                u32::from(n.broadcast()).into(),
            )),
            IpNet::V6(n) => v6.push((n.network().into(), n.broadcast().into())),
        }
    }

    merge(v4)
        .into_iter()
        .map(|(from, to)| AddrRange::V4(from as u32, to as u32))
        .chain(merge(v6).into_iter().map(|(from, to)| AddrRange::V6(from, to)))
        .collect()
}

fn merge(mut ranges: Vec<(u128, u128)>) -> Vec<(u128, u128)> {
    ranges.sort_unstable();
    let mut merged: Vec<(u128, u128)> = Vec::with_capacity(ranges.len());
    for (from, to) in ranges {
        match merged.last_mut() {
            Some(last) if last.1.checked_add(1).map_or(true, |next| from <= next) => {
                last.1 = last.1.max(to);
            }
            _ => merged.push((from, to)),
        }
    }
    merged
}

fn write_ip_set(buf: &mut Vec<u8>, ranges: &[AddrRange]) {
    buf.push(IP_SET_VERSION);
    buf.extend_from_slice(&(ranges.len() as u64).to_be_bytes());
    for range in ranges {
        match *range {
            AddrRange::V4(from, to) => {
                write_bytes(buf, &from.to_be_bytes());
                write_bytes(buf, &to.to_be_bytes());
            }
            AddrRange::V6(from, to) => {
                write_bytes(buf, &from.to_be_bytes());
                write_bytes(buf, &to.to_be_bytes());
            }
        }
    }
}

/// Length-prefixed byte string.
fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_uvarint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// LEB128 unsigned varint.
fn write_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}
