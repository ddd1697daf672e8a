use luapeek_pine::Memory;

use crate::dump::Seen;
use crate::error::Result;
use crate::layout::{self, Layout, TableLayout, TVALUE_SIZE};
use crate::object::GcRef;
use crate::snapshot::Snapshot;
use crate::value::{Key, TValue, Value};

/// Node counts are `2^n`; anything past this is a corrupt header.
const MAX_LOG_NODE_COUNT: u8 = 30;

/// A table: an array part of `array_size` slots and a hash part of
/// `node_count` nodes.
#[derive(Debug, Clone)]
pub struct Table {
    pub address: u32,
    pub metatable: Option<u32>,
    pub array: u32,
    pub array_size: u32,
    pub node: u32,
    pub node_count: u32,
    layout: TableLayout,
}

/// One hash-part entry. The node is empty when its key is nil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub address: u32,
    pub key: TValue,
    pub value: TValue,
    next: u32,
}

impl Node {
    /// Address of the next node in this node's collision chain, 0 for none.
    pub fn next<M: Memory + ?Sized>(&self, mem: &mut M) -> Result<u32> {
        Ok(mem.read_u32(self.next)?)
    }
}

impl Table {
    /// `address` must leave room for the table's [`Layout::extent`].
    pub(crate) fn read<M: Memory + ?Sized>(mem: &mut M, layout: &Layout, address: u32) -> Result<Self> {
        let l = &layout.table;
        let log_nodes = mem.read_u8(address + l.log_node_count)?;
        let metatable = mem.read_u32(address + l.metatable)?;
        let array = mem.read_u32(address + l.array)?;
        let node = mem.read_u32(address + l.node)?;
        let array_size = mem.read_u32(address + l.array_size)?;

        let node_count = if log_nodes > MAX_LOG_NODE_COUNT {
            log::warn!("table ${:08X} has lsizenode {}, ignoring hash part", address, log_nodes);
            0
        } else {
            1u32 << log_nodes
        };

        Ok(Self {
            address,
            metatable: (metatable != 0).then_some(metatable),
            array,
            array_size,
            node,
            node_count,
            layout: l.clone(),
        })
    }

    /// `None` past the array part, or when a torn size or pointer would put
    /// the slot beyond the top of memory.
    pub fn array_slot(&self, index: u32) -> Option<TValue> {
        if index >= self.array_size {
            return None;
        }
        layout::element(self.array, index, TVALUE_SIZE).map(TValue::new)
    }

    pub fn array_slots(&self) -> impl Iterator<Item = TValue> + '_ {
        (0..self.array_size).map_while(|i| self.array_slot(i))
    }

    pub fn node(&self, index: u32) -> Option<Node> {
        if index >= self.node_count {
            return None;
        }
        let l = &self.layout;
        let address = layout::element(self.node, index, l.node_size)?;
        Some(Node {
            address,
            key: TValue::new(layout::offset(address, l.node_key)?),
            value: TValue::new(layout::offset(address, l.node_value)?),
            next: layout::offset(address, l.node_next)?,
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        (0..self.node_count).map_while(|i| self.node(i))
    }

    pub fn metatable<M: Memory + ?Sized>(&self, snap: &mut Snapshot<'_, M>) -> Result<Option<GcRef>> {
        match self.metatable {
            Some(address) => snap.decode_object(address),
            None => Ok(None),
        }
    }

    /// True when the table has a metatable the caller has not already
    /// visited or excluded.
    pub fn has_visible_metatable(&self, seen: &Seen) -> bool {
        self.metatable.is_some_and(|mt| !seen.contains(mt))
    }

    /// Looks `key` up without invoking any metamethod.
    ///
    /// [`Key::Index`] addresses the array part directly and falls back to a
    /// numeric key `index + 1` in the hash part. [`Key::Str`] scans the hash
    /// part for a string key with the same bytes. Entries whose value is
    /// invalid are skipped.
    pub fn get<'k, M: Memory + ?Sized>(
        &self,
        snap: &mut Snapshot<'_, M>,
        key: impl Into<Key<'k>>,
    ) -> Result<Option<TValue>> {
        match key.into() {
            Key::Index(index) => {
                if let Some(slot) = self.array_slot(index) {
                    return Ok(Some(slot));
                }
                let wanted = index as f32 + 1.0;
                self.find(snap, |key| key.as_number() == Some(wanted))
            }
            Key::Str(name) => self.find(snap, |key| {
                key.as_string().and_then(|s| s.bytes()) == Some(name)
            }),
        }
    }

    fn find<M: Memory + ?Sized>(
        &self,
        snap: &mut Snapshot<'_, M>,
        matches: impl Fn(&Value) -> bool,
    ) -> Result<Option<TValue>> {
        for node in self.nodes() {
            let key = node.key.read(snap)?;
            if !matches(&key) {
                continue;
            }
            if node.value.read(snap)?.is_valid() {
                return Ok(Some(node.value));
            }
        }
        Ok(None)
    }
}
