//! Search tree builder for the MMDB format.
//!
//! Nodes live in an arena; records point to another node, to a value index,
//! or nowhere. Inserts replace: the newest network owns its whole range, even
//! where earlier, more specific networks had been inserted.

use ipnet::IpNet;
use std::collections::VecDeque;
use std::net::Ipv6Addr;

use super::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use crate::error::{Error, Result};

/// IPv6 ranges that mirror the IPv4 subtree when aliasing is enabled.
const IPV4_ALIASES: &[(Ipv6Addr, u8)] = &[
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0, 0), 96),
    (Ipv6Addr::new(0x2001, 0, 0, 0, 0, 0, 0, 0), 32),
    (Ipv6Addr::new(0x2002, 0, 0, 0, 0, 0, 0, 0), 16),
];

/// Depth of the IPv4 subtree inside an IPv6 tree.
const IPV4_SUBTREE_DEPTH: u8 = 96;

/// A record: where one side of a node leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    /// Not found
    Empty,
    /// Another node (arena id)
    Node(u32),
    /// A value (index into the caller's value table)
    Data(u32),
}

#[derive(Debug, Clone, Copy)]
struct Node {
    left: Record,
    right: Record,
}

impl Node {
    const EMPTY: Node = Node {
        left: Record::Empty,
        right: Record::Empty,
    };

    fn child(&self, bit: u8) -> Record {
        if bit == 0 {
            self.left
        } else {
            self.right
        }
    }

    fn set_child(&mut self, bit: u8, record: Record) {
        if bit == 0 {
            self.left = record;
        } else {
            self.right = record;
        }
    }
}

/// Search tree builder.
pub struct TrieBuilder {
    ip_version: IpVersion,
    nodes: Vec<Node>,
}

impl TrieBuilder {
    /// Create a builder with an empty root.
    pub fn new(ip_version: IpVersion) -> Self {
        Self {
            ip_version,
            nodes: vec![Node::EMPTY],
        }
    }

    /// Insert a network tagged with `value`.
    ///
    /// Returns `true` when the insert overwrote part of a range that held a
    /// different value.
    pub fn insert(&mut self, network: &IpNet, value: u32) -> Result<bool> {
        let (bits, prefix_len) = match (network, self.ip_version) {
            (IpNet::V4(net), IpVersion::V4) => {
                ((u32::from(net.network()) as u128) << 96, net.prefix_len())
            }
            (IpNet::V4(net), IpVersion::V6) => (
                u32::from(net.network()) as u128,
                IPV4_SUBTREE_DEPTH + net.prefix_len(),
            ),
            (IpNet::V6(net), IpVersion::V6) => (u128::from(net.network()), net.prefix_len()),
            (IpNet::V6(_), IpVersion::V4) => {
                return Err(Error::Encode(format!(
                    "cannot insert IPv6 network {} into an IPv4 tree",
                    network
                )));
            }
        };

        if prefix_len > self.ip_version.bit_count() {
            return Err(Error::Encode(format!(
                "prefix length {} exceeds tree depth {}",
                prefix_len,
                self.ip_version.bit_count()
            )));
        }

        if prefix_len == 0 {
            // The root has no incoming record; cover both halves instead.
            let left = self.insert_bits(0, 1, Record::Data(value));
            let right = self.insert_bits(1 << 127, 1, Record::Data(value));
            return Ok(left | right);
        }

        Ok(self.insert_bits(bits, prefix_len, Record::Data(value)))
    }

    /// Walk (creating nodes as needed) to `prefix_len` and set the final record.
    ///
    /// `bits` is left-aligned: bit 0 of the path is bit 127 of the value.
    fn insert_bits(&mut self, bits: u128, prefix_len: u8, record: Record) -> bool {
        let mut node_id = 0usize;
        let mut overlapped = false;

        for depth in 0..prefix_len {
            let bit = ((bits >> (127 - depth)) & 1) as u8;
            let child = self.nodes[node_id].child(bit);

            if depth + 1 == prefix_len {
                overlapped |= match (child, record) {
                    (Record::Empty, _) => false,
                    (Record::Data(existing), Record::Data(value)) => existing != value,
                    (Record::Node(id), Record::Data(value)) => self.subtree_holds_other(id, value),
                    _ => false,
                };
                self.nodes[node_id].set_child(bit, record);
                return overlapped;
            }

            node_id = match child {
                Record::Node(id) => id as usize,
                Record::Empty => {
                    let id = self.allocate(Node::EMPTY);
                    self.nodes[node_id].set_child(bit, Record::Node(id));
                    id as usize
                }
                Record::Data(existing) => {
                    // Split a less specific range so the deeper insert can land;
                    // the rest of the range keeps its old value.
                    if let Record::Data(value) = record {
                        overlapped |= existing != value;
                    }
                    let id = self.allocate(Node {
                        left: Record::Data(existing),
                        right: Record::Data(existing),
                    });
                    self.nodes[node_id].set_child(bit, Record::Node(id));
                    id as usize
                }
            };
        }

        overlapped
    }

    fn allocate(&mut self, node: Node) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(node);
        id
    }

    /// Whether any data below `root` differs from `value`.
    fn subtree_holds_other(&self, root: u32, value: u32) -> bool {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.nodes[id as usize];
            for record in [node.left, node.right] {
                match record {
                    Record::Data(existing) if existing != value => return true,
                    Record::Node(child) => stack.push(child),
                    _ => {}
                }
            }
        }
        false
    }

    /// Point the IPv4-mirroring IPv6 ranges at the IPv4 subtree.
    ///
    /// Only applies to IPv6 trees whose `::/96` subtree exists as a node.
    pub fn alias_ipv4(&mut self) {
        if self.ip_version != IpVersion::V6 {
            return;
        }
        let mut node_id = 0usize;
        for depth in 0..IPV4_SUBTREE_DEPTH {
            match self.nodes[node_id].left {
                Record::Node(id) if depth + 1 == IPV4_SUBTREE_DEPTH => {
                    let ipv4_start = Record::Node(id);
                    for (addr, prefix_len) in IPV4_ALIASES {
                        self.insert_bits(u128::from(*addr), *prefix_len, ipv4_start);
                    }
                    return;
                }
                Record::Node(id) => node_id = id as usize,
                _ => return,
            }
        }
    }

    /// Serialize the reachable part of the tree.
    ///
    /// Nodes are renumbered breadth-first from the root. `data_offsets` maps
    /// value indexes to offsets in a data section of `data_len` bytes.
    /// Returns `(tree_bytes, node_count)`.
    pub fn serialize(
        &self,
        record_size: RecordSize,
        data_offsets: &[u32],
        data_len: usize,
    ) -> Result<(Vec<u8>, u32)> {
        let mut new_ids = vec![u32::MAX; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([0u32]);
        new_ids[0] = 0;
        order.push(0u32);

        while let Some(id) = queue.pop_front() {
            let node = self.nodes[id as usize];
            for record in [node.left, node.right] {
                if let Record::Node(child) = record {
                    if new_ids[child as usize] == u32::MAX {
                        new_ids[child as usize] = order.len() as u32;
                        order.push(child);
                        queue.push_back(child);
                    }
                }
            }
        }

        let node_count = order.len() as u32;
        let max_record = node_count as u64 + DATA_SECTION_SEPARATOR_SIZE as u64 + data_len as u64;
        if max_record > record_size.max_value() as u64 {
            return Err(Error::Encode(format!(
                "{} nodes and {} data bytes do not fit {}-bit records",
                node_count,
                data_len,
                record_size.bits()
            )));
        }

        let resolve = |record: Record| -> Result<u32> {
            Ok(match record {
                Record::Empty => node_count,
                Record::Node(id) => new_ids[id as usize],
                Record::Data(index) => {
                    let offset = data_offsets.get(index as usize).ok_or_else(|| {
                        Error::Encode(format!("record refers to unknown value {}", index))
                    })?;
                    node_count + DATA_SECTION_SEPARATOR_SIZE as u32 + offset
                }
            })
        };

        let mut tree = Vec::with_capacity(order.len() * record_size.node_bytes());
        for id in &order {
            let node = self.nodes[*id as usize];
            record_size.write_node(&mut tree, resolve(node.left)?, resolve(node.right)?);
        }

        Ok((tree, node_count))
    }

    /// Number of arena nodes, reachable or not.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }
}
