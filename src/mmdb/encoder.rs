//! MMDB database encoder.

use std::collections::BTreeMap;

use super::data::{DataEncoder, DataValue};
use super::tree::TrieBuilder;
use super::{BuildMetadata, IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
use crate::country::CountryRangeMap;
use crate::error::Result;

/// Default `database_type` metadata value.
pub const DEFAULT_DATABASE_TYPE: &str = "geoip";

/// Options for building a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieBuildOptions {
    ip_version: IpVersion,
    record_size: RecordSize,
    build_epoch: u64,
    codes: Vec<String>,
    languages: Option<Vec<String>>,
    database_type: String,
    description: BTreeMap<String, String>,
    ipv4_aliasing: bool,
}

impl TrieBuildOptions {
    /// Options matching the addressing of a source database; retains every code.
    pub fn new(metadata: &BuildMetadata) -> Self {
        Self {
            ip_version: metadata.ip_version,
            record_size: metadata.record_size,
            build_epoch: metadata.build_epoch,
            codes: Vec::new(),
            languages: None,
            database_type: DEFAULT_DATABASE_TYPE.to_string(),
            description: BTreeMap::new(),
            ipv4_aliasing: false,
        }
    }

    /// Retain only these codes. An empty list retains all.
    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.codes = codes
            .into_iter()
            .map(|c| c.as_ref().trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        self
    }

    /// Set the `languages` metadata. Defaults to the retained code list.
    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = Some(languages);
        self
    }

    /// Set the `database_type` metadata.
    pub fn with_database_type(mut self, database_type: impl Into<String>) -> Self {
        self.database_type = database_type.into();
        self
    }

    /// Add a description in a specific language.
    pub fn with_description(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.description.insert(language.into(), text.into());
        self
    }

    /// Alias `::ffff:0:0/96`, `2001::/32` and `2002::/16` to the IPv4 subtree.
    pub fn with_ipv4_aliasing(mut self, enabled: bool) -> Self {
        self.ipv4_aliasing = enabled;
        self
    }

    /// The codes that will be written, in insertion order.
    ///
    /// Explicit filter or every key of the map; sorted and deduplicated. Later
    /// codes win where ranges of different codes overlap.
    pub fn insertion_order(&self, countries: &CountryRangeMap) -> Vec<String> {
        let mut codes: Vec<String> = if self.codes.is_empty() {
            countries.codes().map(str::to_string).collect()
        } else {
            self.codes.clone()
        };
        codes.sort();
        codes.dedup();
        codes
    }
}

/// Statistics from an encode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Networks inserted
    pub networks: usize,
    /// Inserts that overwrote a range held by a different code
    pub overlaps: usize,
    /// Nodes written
    pub node_count: u32,
}

/// Encode a country map into MMDB bytes.
pub fn encode(options: &TrieBuildOptions, countries: &CountryRangeMap) -> Result<Vec<u8>> {
    encode_with_stats(options, countries).map(|(bytes, _)| bytes)
}

/// Encode a country map into MMDB bytes, also returning [`EncodeStats`].
///
/// Nothing is returned unless every insert succeeds.
pub fn encode_with_stats(
    options: &TrieBuildOptions,
    countries: &CountryRangeMap,
) -> Result<(Vec<u8>, EncodeStats)> {
    let codes = options.insertion_order(countries);

    let mut data = DataEncoder::new();
    let offsets: Vec<u32> = codes
        .iter()
        .map(|code| data.encode(&DataValue::String(code.clone())))
        .collect();

    let mut tree = TrieBuilder::new(options.ip_version);
    let mut stats = EncodeStats::default();

    for (index, code) in codes.iter().enumerate() {
        let Some(networks) = countries.get(code) else {
            continue;
        };
        let mut code_overlaps = 0;
        for network in networks {
            if tree.insert(network, index as u32)? {
                code_overlaps += 1;
            }
        }
        if code_overlaps > 0 {
            log::warn!(
                "{}: {} networks overwrote ranges of other codes",
                code,
                code_overlaps
            );
        }
        stats.networks += networks.len();
        stats.overlaps += code_overlaps;
    }

    if options.ipv4_aliasing {
        tree.alias_ipv4();
    }

    let (tree_bytes, node_count) = tree.serialize(options.record_size, &offsets, data.len())?;
    stats.node_count = node_count;

    let languages = options.languages.clone().unwrap_or_else(|| codes.clone());
    let metadata = metadata_value(options, languages, node_count);
    let mut meta_encoder = DataEncoder::new();
    meta_encoder.encode(&metadata);

    let data_bytes = data.into_bytes();
    let meta_bytes = meta_encoder.into_bytes();

    let mut database = Vec::with_capacity(
        tree_bytes.len()
            + DATA_SECTION_SEPARATOR_SIZE
            + data_bytes.len()
            + METADATA_MARKER.len()
            + meta_bytes.len(),
    );
    database.extend_from_slice(&tree_bytes);
    database.extend_from_slice(&[0u8; DATA_SECTION_SEPARATOR_SIZE]);
    database.extend_from_slice(&data_bytes);
    database.extend_from_slice(METADATA_MARKER);
    database.extend_from_slice(&meta_bytes);

    log::debug!(
        "encoded {} codes, {} networks, {} nodes, {} bytes",
        codes.len(),
        stats.networks,
        node_count,
        database.len()
    );

    Ok((database, stats))
}

fn metadata_value(options: &TrieBuildOptions, languages: Vec<String>, node_count: u32) -> DataValue {
    let description = options
        .description
        .iter()
        .map(|(k, v)| (k.clone(), DataValue::String(v.clone())))
        .collect();

    let mut metadata = BTreeMap::new();
    metadata.insert("binary_format_major_version".to_string(), DataValue::Uint16(2));
    metadata.insert("binary_format_minor_version".to_string(), DataValue::Uint16(0));
    metadata.insert("build_epoch".to_string(), DataValue::Uint64(options.build_epoch));
    metadata.insert(
        "database_type".to_string(),
        DataValue::String(options.database_type.clone()),
    );
    metadata.insert("description".to_string(), DataValue::Map(description));
    metadata.insert(
        "ip_version".to_string(),
        DataValue::Uint16(options.ip_version.number()),
    );
    metadata.insert(
        "languages".to_string(),
        DataValue::Array(languages.into_iter().map(DataValue::String).collect()),
    );
    metadata.insert("node_count".to_string(), DataValue::Uint32(node_count));
    metadata.insert(
        "record_size".to_string(),
        DataValue::Uint16(options.record_size.bits()),
    );
    DataValue::Map(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipnet::IpNet;
    use std::net::IpAddr;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn sample_map() -> CountryRangeMap {
        vec![
            ("us", net("1.2.3.0/24")),
            ("cn", net("1.1.1.0/24")),
            ("cn", net("2.2.2.0/23")),
            ("jp", net("2400:4000::/22")),
        ]
        .into_iter()
        .collect()
    }

    fn v6_options() -> TrieBuildOptions {
        TrieBuildOptions::new(&BuildMetadata::new(IpVersion::V6, RecordSize::Bits24, 1_700_000_000))
    }

    #[test]
    fn test_insertion_order_is_sorted() {
        let map: CountryRangeMap = vec![
            ("us", net("1.0.0.0/24")),
            ("cn", net("2.0.0.0/24")),
            ("jp", net("3.0.0.0/24")),
        ]
        .into_iter()
        .collect();

        let options = v6_options();
        assert_eq!(options.insertion_order(&map), vec!["cn", "jp", "us"]);

        let options = v6_options().with_codes(["us", "CN", "us"]);
        assert_eq!(options.insertion_order(&map), vec!["cn", "us"]);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let map = sample_map();
        let options = v6_options();
        let first = encode(&options, &map).unwrap();
        let second = encode(&options, &map).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_encoded_database_is_readable() {
        let bytes = encode(&v6_options(), &sample_map()).unwrap();
        let reader = maxminddb::Reader::from_source(bytes).unwrap();

        assert_eq!(reader.metadata.ip_version, 6);
        assert_eq!(reader.metadata.record_size, 24);
        assert_eq!(reader.metadata.build_epoch, 1_700_000_000);
        assert_eq!(reader.metadata.database_type, "geoip");
        assert_eq!(reader.metadata.languages, vec!["cn", "jp", "us"]);

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        assert_eq!(reader.lookup::<String>(ip).unwrap(), "us");
        let ip: IpAddr = "2.2.3.255".parse().unwrap();
        assert_eq!(reader.lookup::<String>(ip).unwrap(), "cn");
        let ip: IpAddr = "2400:4000::1".parse().unwrap();
        assert_eq!(reader.lookup::<String>(ip).unwrap(), "jp");
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert!(reader.lookup::<String>(ip).is_err());
    }

    #[test]
    fn test_filtered_encode_keeps_only_requested_code() {
        let options = v6_options().with_codes(["cn"]);
        let bytes = encode(&options, &sample_map()).unwrap();
        let reader = maxminddb::Reader::from_source(bytes).unwrap();

        assert_eq!(reader.metadata.languages, vec!["cn"]);
        let ip: IpAddr = "1.1.1.1".parse().unwrap();
        assert_eq!(reader.lookup::<String>(ip).unwrap(), "cn");
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        assert!(reader.lookup::<String>(ip).is_err());
    }

    #[test]
    fn test_later_code_wins_overlap() {
        let map: CountryRangeMap = vec![
            ("us", net("10.0.0.0/16")),
            ("cn", net("10.0.0.0/8")),
        ]
        .into_iter()
        .collect();

        let options = TrieBuildOptions::new(&BuildMetadata::new(
            IpVersion::V4,
            RecordSize::Bits32,
            0,
        ));
        let (bytes, stats) = encode_with_stats(&options, &map).unwrap();
        assert_eq!(stats.overlaps, 1);

        let reader = maxminddb::Reader::from_source(bytes).unwrap();
        // cn is inserted first, us overwrites its /16
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(reader.lookup::<String>(ip).unwrap(), "us");
        let ip: IpAddr = "10.1.0.1".parse().unwrap();
        assert_eq!(reader.lookup::<String>(ip).unwrap(), "cn");
    }

    #[test]
    fn test_ipv6_network_in_ipv4_database_fails() {
        let options = TrieBuildOptions::new(&BuildMetadata::new(
            IpVersion::V4,
            RecordSize::Bits24,
            0,
        ));
        assert!(encode(&options, &sample_map()).is_err());
    }

    #[test]
    fn test_record_sizes_produce_readable_databases() {
        for record_size in [RecordSize::Bits24, RecordSize::Bits28, RecordSize::Bits32] {
            let options =
                TrieBuildOptions::new(&BuildMetadata::new(IpVersion::V6, record_size, 0));
            let bytes = encode(&options, &sample_map()).unwrap();
            let reader = maxminddb::Reader::from_source(bytes).unwrap();
            let ip: IpAddr = "2.2.2.2".parse().unwrap();
            assert_eq!(reader.lookup::<String>(ip).unwrap(), "cn");
        }
    }

    #[test]
    fn test_aliasing_makes_mapped_addresses_resolve() {
        let options = v6_options().with_ipv4_aliasing(true);
        let bytes = encode(&options, &sample_map()).unwrap();
        let reader = maxminddb::Reader::from_source(bytes).unwrap();

        let mapped: IpAddr = "::ffff:1.2.3.4".parse().unwrap();
        assert_eq!(reader.lookup::<String>(mapped).unwrap(), "us");
        let six_to_four: IpAddr = "2002:0101:0101::".parse().unwrap();
        assert_eq!(reader.lookup::<String>(six_to_four).unwrap(), "cn");
    }
}
