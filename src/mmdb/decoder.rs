//! MMDB database decoder.
//!
//! Walks the search tree depth-first, left before right, so networks come out
//! in ascending address order. Records are deserialized through `maxminddb`
//! and cached per data pointer.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::{BuildMetadata, IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
use crate::country::{normalize_code, CountryRangeMap};
use crate::error::{Error, Result};

/// A decoded database: its addressing metadata and its networks by country.
#[derive(Debug, Clone)]
pub struct DecodedTrie {
    pub metadata: BuildMetadata,
    pub countries: CountryRangeMap,
}

#[derive(Deserialize)]
struct IsoCountry {
    iso_code: Option<String>,
}

/// The record shapes we accept: a GeoIP2 country record, or a bare code.
#[derive(Deserialize)]
#[serde(untagged)]
enum CountryRecord {
    Code(String),
    Geo {
        registered_country: Option<IsoCountry>,
        country: Option<IsoCountry>,
    },
}

impl CountryRecord {
    fn into_code(self) -> Option<String> {
        match self {
            CountryRecord::Code(code) => normalize_code(&code),
            CountryRecord::Geo {
                registered_country,
                country,
            } => registered_country
                .and_then(|c| c.iso_code)
                .or_else(|| country.and_then(|c| c.iso_code))
                .and_then(|code| normalize_code(&code)),
        }
    }
}

/// A pending subtree during the walk.
struct WalkNode {
    record: u32,
    bits: u128,
    depth: u8,
}

/// Decode a database into networks grouped by lowercase country code.
///
/// Aliased IPv6 ranges that lead back to the IPv4 subtree are walked once,
/// through `::/96`, and reported as IPv4 networks.
pub fn decode(bytes: &[u8]) -> Result<DecodedTrie> {
    let reader = maxminddb::Reader::from_source(bytes)?;
    let meta = &reader.metadata;

    let ip_version = IpVersion::from_number(meta.ip_version)?;
    let record_size = RecordSize::from_bits(meta.record_size)?;
    let metadata = BuildMetadata::new(ip_version, record_size, meta.build_epoch);

    let node_count = meta.node_count;
    let tree_len = node_count as usize * record_size.node_bytes();
    let metadata_start = bytes
        .windows(METADATA_MARKER.len())
        .rposition(|w| w == METADATA_MARKER)
        .unwrap_or(0);
    if tree_len + DATA_SECTION_SEPARATOR_SIZE > metadata_start {
        return Err(Error::Decode(format!(
            "search tree of {} nodes overruns the metadata at byte {}",
            node_count, metadata_start
        )));
    }
    let tree = &bytes[..tree_len];

    let read_node = |node: u32| {
        record_size
            .read_node(tree, node as usize)
            .ok_or_else(|| Error::Decode(format!("node {} out of bounds", node)))
    };

    // Node reached by 96 zero bits; anything else pointing at it is an alias.
    let mut alias_target = None;
    if ip_version == IpVersion::V6 {
        let mut record = 0u32;
        let mut depth = 0;
        while depth < 96 && record < node_count {
            record = read_node(record)?.0;
            depth += 1;
        }
        if record != 0 && record < node_count {
            alias_target = Some(record);
        }
    }

    let bit_count = ip_version.bit_count();
    let mut countries = CountryRangeMap::new();
    let mut codes: HashMap<u32, Option<String>> = HashMap::new();
    let mut uncoded = 0usize;
    let mut stack = vec![WalkNode {
        record: 0,
        bits: 0,
        depth: 0,
    }];

    while let Some(mut current) = stack.pop() {
        while current.record != node_count {
            if alias_target == Some(current.record)
                && !in_ipv4_subtree(ip_version, current.bits, current.depth)
            {
                break;
            }

            if current.record > node_count {
                let network = to_network(ip_version, current.bits, current.depth)?;
                let code = match codes.get(&current.record) {
                    Some(code) => code.clone(),
                    None => {
                        let address = lookup_address(ip_version, current.bits);
                        let record: CountryRecord = reader.lookup(address)?;
                        let code = record.into_code();
                        codes.insert(current.record, code.clone());
                        code
                    }
                };
                match code {
                    Some(code) => {
                        countries.push(&code, network);
                    }
                    None => uncoded += 1,
                }
                break;
            }

            if current.depth >= bit_count {
                return Err(Error::Decode(format!(
                    "search tree deeper than {} bits",
                    bit_count
                )));
            }

            let (left, right) = read_node(current.record)?;
            stack.push(WalkNode {
                record: right,
                bits: current.bits | 1u128 << (127 - current.depth),
                depth: current.depth + 1,
            });
            current.record = left;
            current.depth += 1;
        }
    }

    if uncoded > 0 {
        log::debug!("skipped {} networks without a country code", uncoded);
    }
    log::info!(
        "decoded {} networks in {} countries (ip_version {}, record_size {})",
        countries.network_count(),
        countries.len(),
        ip_version.number(),
        record_size.bits()
    );

    Ok(DecodedTrie {
        metadata,
        countries,
    })
}

/// Whether a path lies inside `::/96` at or below the IPv4 subtree root.
fn in_ipv4_subtree(ip_version: IpVersion, bits: u128, depth: u8) -> bool {
    ip_version == IpVersion::V6 && depth >= 96 && bits >> 32 == 0
}

/// First address of a left-aligned path.
fn lookup_address(ip_version: IpVersion, bits: u128) -> IpAddr {
    match ip_version {
        IpVersion::V4 => IpAddr::V4(Ipv4Addr::from((bits >> 96) as u32)),
        IpVersion::V6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

fn to_network(ip_version: IpVersion, bits: u128, depth: u8) -> Result<IpNet> {
    let invalid = |e: ipnet::PrefixLenError| Error::Decode(e.to_string());
    let network = match ip_version {
        IpVersion::V4 => {
            IpNet::V4(Ipv4Net::new(Ipv4Addr::from((bits >> 96) as u32), depth).map_err(invalid)?)
        }
        IpVersion::V6 if in_ipv4_subtree(ip_version, bits, depth) => IpNet::V4(
            Ipv4Net::new(Ipv4Addr::from(bits as u32), depth - 96).map_err(invalid)?,
        ),
        IpVersion::V6 => IpNet::V6(Ipv6Net::new(Ipv6Addr::from(bits), depth).map_err(invalid)?),
    };
    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmdb::encoder::{encode, TrieBuildOptions};

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn options(ip_version: IpVersion) -> TrieBuildOptions {
        TrieBuildOptions::new(&BuildMetadata::new(ip_version, RecordSize::Bits28, 1_600_000_000))
    }

    #[test]
    fn test_decode_groups_by_code() {
        let map: CountryRangeMap = vec![
            ("us", net("1.2.3.0/24")),
            ("cn", net("9.9.9.0/24")),
            ("cn", net("2400:da00::/32")),
        ]
        .into_iter()
        .collect();

        let bytes = encode(&options(IpVersion::V6), &map).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.metadata.ip_version, IpVersion::V6);
        assert_eq!(decoded.metadata.record_size, RecordSize::Bits28);
        assert_eq!(decoded.metadata.build_epoch, 1_600_000_000);
        assert_eq!(decoded.countries, map);
    }

    #[test]
    fn test_decode_ipv4_database() {
        let map: CountryRangeMap = vec![
            ("de", net("5.0.0.0/8")),
            ("fr", net("2.0.0.0/16")),
        ]
        .into_iter()
        .collect();

        let bytes = encode(&options(IpVersion::V4), &map).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.metadata.ip_version, IpVersion::V4);
        assert_eq!(decoded.countries, map);
    }

    #[test]
    fn test_networks_come_out_in_address_order() {
        let map: CountryRangeMap = vec![
            ("us", net("8.0.0.0/8")),
            ("us", net("1.0.0.0/8")),
            ("us", net("4.0.0.0/8")),
        ]
        .into_iter()
        .collect();

        let bytes = encode(&options(IpVersion::V6), &map).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(
            decoded.countries.get("us").unwrap(),
            &[net("1.0.0.0/8"), net("4.0.0.0/8"), net("8.0.0.0/8")]
        );
    }

    #[test]
    fn test_aliased_networks_are_skipped() {
        let map: CountryRangeMap = vec![
            ("us", net("1.2.3.0/24")),
            ("jp", net("2400:4000::/22")),
        ]
        .into_iter()
        .collect();

        let plain = encode(&options(IpVersion::V6), &map).unwrap();
        let aliased = encode(&options(IpVersion::V6).with_ipv4_aliasing(true), &map).unwrap();
        assert_ne!(plain, aliased);

        let decoded = decode(&aliased).unwrap();
        assert_eq!(decoded.countries, map);
        assert_eq!(decoded.countries.network_count(), 2);
    }

    #[test]
    fn test_overlap_split_networks_are_all_reported() {
        let map: CountryRangeMap = vec![
            ("cn", net("10.0.0.0/8")),
            ("us", net("10.0.0.0/16")),
        ]
        .into_iter()
        .collect();

        let bytes = encode(&options(IpVersion::V4), &map).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.countries.get("us").unwrap(), &[net("10.0.0.0/16")]);
        // The /8 is split around the /16: one sibling per level from /9 to /16
        let cn = decoded.countries.get("cn").unwrap();
        assert_eq!(cn.len(), 8);
        assert_eq!(cn[0], net("10.1.0.0/16"));
        assert_eq!(cn[7], net("10.128.0.0/9"));
    }

    #[test]
    fn test_invalid_bytes_fail() {
        assert!(matches!(decode(b"not a database"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_truncated_tree_fails() {
        let map: CountryRangeMap = vec![("us", net("1.2.3.0/24"))].into_iter().collect();
        let bytes = encode(&options(IpVersion::V4), &map).unwrap();

        // Keep the metadata but drop most of the search tree
        let marker = bytes
            .windows(METADATA_MARKER.len())
            .position(|w| w == METADATA_MARKER)
            .unwrap();
        let truncated = [&bytes[..10], &bytes[marker..]].concat();
        assert!(decode(&truncated).is_err());
    }

    #[test]
    fn test_geoip2_shaped_records() {
        let record: CountryRecord = serde_json::from_str(
            r#"{"registered_country": {"iso_code": "CN"}, "country": {"iso_code": "HK"}}"#,
        )
        .unwrap();
        assert_eq!(record.into_code(), Some("cn".to_string()));

        let record: CountryRecord =
            serde_json::from_str(r#"{"country": {"iso_code": "JP"}}"#).unwrap();
        assert_eq!(record.into_code(), Some("jp".to_string()));

        let record: CountryRecord = serde_json::from_str(r#"{"continent": {}}"#).unwrap();
        assert_eq!(record.into_code(), None);

        let record: CountryRecord = serde_json::from_str(r#""US""#).unwrap();
        assert_eq!(record.into_code(), Some("us".to_string()));
    }
}
