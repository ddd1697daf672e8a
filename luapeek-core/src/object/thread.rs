use std::collections::HashMap;

use luapeek_pine::Memory;

use crate::dump::Seen;
use crate::error::{Error, Result};
use crate::layout::{self, Layout, TVALUE_SIZE};
use crate::object::GcRef;
use crate::snapshot::Snapshot;
use crate::value::{TValue, Tag, Value};

/// An execution context. Its globals table and the global state's registry and
/// default metatable are the roots every lookup starts from.
#[derive(Debug, Clone)]
pub struct Thread {
    pub address: u32,
    pub top: u32,
    pub stack_base: u32,
    pub stack_capacity: u32,
    pub global_state: u32,
    pub globals: TValue,
    pub registry: TValue,
    pub default_metatable: TValue,
}

impl Thread {
    /// `address` must leave room for the thread's [`Layout::extent`]. `None`
    /// when the global state pointer is wild.
    pub(crate) fn read<M: Memory + ?Sized>(mem: &mut M, layout: &Layout, address: u32) -> Result<Option<Self>> {
        let l = &layout.thread;
        let global_state = mem.read_u32(address + l.global_state)?;
        if layout::offset(global_state, layout.global_state_extent()).is_none() {
            log::debug!("thread ${:08X} has wild global state ${:08X}", address, global_state);
            return Ok(None);
        }
        let thread = Self {
            address,
            top: mem.read_u32(address + l.top)?,
            stack_base: mem.read_u32(address + l.stack)?,
            stack_capacity: mem.read_u32(address + l.stack_size)?,
            global_state,
            globals: TValue::new(address + l.globals),
            registry: TValue::new(global_state + layout.global_state.registry),
            default_metatable: TValue::new(global_state + layout.global_state.default_metatable),
        };
        log::debug!(
            "thread ${:08X}: stack ${:08X}..${:08X}, global state ${:08X}",
            address,
            thread.stack_base,
            thread.top,
            global_state
        );
        Ok(Some(thread))
    }

    /// Live stack slots, base through top inclusive.
    pub fn stack(&self) -> impl Iterator<Item = TValue> + '_ {
        let count = if self.top >= self.stack_base {
            (self.top - self.stack_base) / TVALUE_SIZE + 1
        } else {
            0
        };
        (0..count).map_while(move |i| layout::element(self.stack_base, i, TVALUE_SIZE).map(TValue::new))
    }

    /// The globals table. A thread whose globals slot does not hold a table
    /// is still being set up.
    pub fn globals_table<M: Memory + ?Sized>(&self, snap: &mut Snapshot<'_, M>) -> Result<GcRef> {
        match self.globals.read(snap)? {
            Value::Object(obj) if obj.tag() == Tag::Table => Ok(obj),
            other => {
                log::debug!("thread ${:08X} globals slot holds {}", self.address, other);
                Err(Error::HandleUnresolved { name: "_G".into() })
            }
        }
    }

    pub fn global<M: Memory + ?Sized>(&self, snap: &mut Snapshot<'_, M>, name: &str) -> Result<Option<TValue>> {
        let globals = self.globals_table(snap)?;
        match globals.as_table() {
            Some(table) => table.get(snap, name),
            None => Ok(None),
        }
    }

    /// A [`Seen`] set with the shared roots marked, so dumps of individual
    /// objects do not wander into the whole global environment.
    pub fn initial_seen<M: Memory + ?Sized>(&self, snap: &mut Snapshot<'_, M>) -> Result<Seen> {
        let mut seen = Seen::new();
        for root in [self.default_metatable, self.globals] {
            if let Value::Object(obj) = root.read(snap)? {
                seen.insert(obj.address);
            }
        }
        Ok(seen)
    }

    /// Maps each closure stored in a global to that global's name.
    pub fn function_names<M: Memory + ?Sized>(&self, snap: &mut Snapshot<'_, M>) -> Result<HashMap<u32, String>> {
        let globals = self.globals_table(snap)?;
        let mut names = HashMap::new();
        let Some(table) = globals.as_table() else {
            return Ok(names);
        };

        for node in table.nodes() {
            let key = node.key.read(snap)?;
            let Some(name) = key.as_string().and_then(|s| s.to_string_lossy()) else {
                continue;
            };
            if let Value::Object(obj) = node.value.read(snap)? {
                if obj.tag() == Tag::Function {
                    names.insert(obj.address, name.into_owned());
                }
            }
        }
        Ok(names)
    }
}
