//! Indented text rendering of object trees.

use std::collections::{HashMap, HashSet};

use luapeek_pine::Memory;

use crate::error::Result;
use crate::object::{ClosureKind, GcBody, GcRef};
use crate::opcode;
use crate::snapshot::Snapshot;
use crate::value::Value;

/// Addresses a walk has already visited or must not enter.
#[derive(Debug, Clone, Default)]
pub struct Seen {
    addresses: HashSet<u32>,
}

impl Seen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `address` was already present.
    pub fn insert(&mut self, address: u32) -> bool {
        self.addresses.insert(address)
    }

    pub fn contains(&self, address: u32) -> bool {
        self.addresses.contains(&address)
    }

    pub fn remove(&mut self, address: u32) -> bool {
        self.addresses.remove(&address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Nesting below which [`Dumper`] prints `...` instead of descending.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Walks objects reachable from a value and renders each once.
///
/// ```text
/// [0:$00100010] true
/// [Node$00100080] "x": 42
/// CONST$00100200 k0  "hello"
///  CODE$00100210
///   000 00000001     LOADK r0 := k0 ("hello")
/// ```
pub struct Dumper<'s, 'm, M: Memory + ?Sized> {
    snap: &'s mut Snapshot<'m, M>,
    seen: Seen,
    names: HashMap<u32, String>,
    out: String,
    depth: usize,
    max_depth: usize,
}

impl<'s, 'm, M: Memory + ?Sized> Dumper<'s, 'm, M> {
    pub fn new(snap: &'s mut Snapshot<'m, M>, seen: Seen) -> Self {
        Self {
            snap,
            seen,
            names: HashMap::new(),
            out: String::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Objects nested deeper than `max_depth` render as a single `...` line.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Labels closures found at these addresses.
    pub fn with_names(mut self, names: HashMap<u32, String>) -> Self {
        self.names = names;
        self
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn line(&mut self, indent: &str, text: &str) {
        self.out.push_str(indent);
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn label(&self, value: &Value) -> String {
        match value.as_object().and_then(|obj| self.names.get(&obj.address)) {
            Some(name) => format!("{} {}", value, name),
            None => value.to_string(),
        }
    }

    pub fn value(&mut self, value: &Value, indent: &str) -> Result<()> {
        if let Value::Object(obj) = value {
            self.object(obj, indent)?;
        }
        Ok(())
    }

    pub fn object(&mut self, obj: &GcRef, indent: &str) -> Result<()> {
        if self.depth >= self.max_depth {
            if self.expands(obj) {
                self.line(indent, "...");
            }
            return Ok(());
        }
        self.depth += 1;
        let result = self.expand(obj, indent);
        self.depth -= 1;
        result
    }

    /// Whether `object` would print anything for `obj`.
    fn expands(&self, obj: &GcRef) -> bool {
        match &obj.body {
            GcBody::String(_) => false,
            GcBody::Userdata(u) => u.metatable.is_some_and(|mt| !self.seen.contains(mt)),
            GcBody::Closure(c) => {
                matches!(c.kind, ClosureKind::Script { .. }) && !self.seen.contains(obj.address)
            }
            GcBody::Table(_) | GcBody::Thread(_) => !self.seen.contains(obj.address),
        }
    }

    fn expand(&mut self, obj: &GcRef, indent: &str) -> Result<()> {
        match &obj.body {
            GcBody::String(_) => Ok(()),
            GcBody::Table(_) => self.table(obj, indent),
            GcBody::Closure(_) => self.closure(obj, indent),
            GcBody::Userdata(u) => match u.metatable {
                Some(mt) if !self.seen.contains(mt) => self.metatable(mt, indent),
                _ => Ok(()),
            },
            GcBody::Thread(_) => self.thread(obj, indent),
        }
    }

    fn table(&mut self, obj: &GcRef, indent: &str) -> Result<()> {
        let Some(table) = obj.as_table() else {
            return Ok(());
        };
        if !self.seen.insert(obj.address) {
            return Ok(());
        }
        let nested = format!("{}  ", indent);

        for (i, slot) in table.array_slots().enumerate() {
            let value = slot.read(self.snap)?;
            if !value.is_valid() || value.is_nil() {
                continue;
            }
            self.line(indent, &format!("[{}:${:08X}] {}", i, slot.address, self.label(&value)));
            self.value(&value, &nested)?;
        }

        for node in table.nodes() {
            let key = node.key.read(self.snap)?;
            if !key.is_valid() || key.is_nil() {
                continue;
            }
            let value = node.value.read(self.snap)?;
            self.line(
                indent,
                &format!("[Node${:08X}] {}: {}", node.address, key, self.label(&value)),
            );
            self.value(&key, &format!("{}K ", indent))?;
            self.value(&value, &nested)?;
        }

        match table.metatable {
            Some(mt) if table.has_visible_metatable(&self.seen) => self.metatable(mt, indent),
            _ => Ok(()),
        }
    }

    fn metatable(&mut self, address: u32, indent: &str) -> Result<()> {
        if let Some(mt) = self.snap.decode_object(address)? {
            let text = format!("META: {}", Value::Object(mt.clone()));
            self.line(indent, &text);
            self.object(&mt, &format!("{}  ", indent))?;
        }
        Ok(())
    }

    fn closure(&mut self, obj: &GcRef, indent: &str) -> Result<()> {
        let Some(closure) = obj.as_closure() else {
            return Ok(());
        };
        let ClosureKind::Script { proto, env } = &closure.kind else {
            return Ok(());
        };
        if !self.seen.insert(obj.address) {
            return Ok(());
        }

        let env = env.read(self.snap)?;
        if let Value::Object(table) = &env {
            if !self.seen.contains(table.address) {
                self.line(indent, &format!("FENV: {}", env));
                self.object(table, &format!("{}  ", indent))?;
            }
        }

        let constants = proto.read_constants(self.snap)?;
        for (i, (slot, value)) in proto.constant_slots().zip(&constants).enumerate() {
            let index = format!("k{}", i);
            self.line(indent, &format!("CONST${:08X} {:<3} {}", slot.address, index, value));
        }

        self.line(indent, &format!(" CODE${:08X}", proto.code));
        let code = proto.read_code(self.snap.memory())?;
        for (pc, inst) in code.into_iter().enumerate() {
            let text = opcode::disassemble(inst, &constants, proto.registers, pc as u32);
            self.line(indent, &format!("  {:03} {:08X} {}", pc, inst.0, text));
        }
        Ok(())
    }

    fn thread(&mut self, obj: &GcRef, indent: &str) -> Result<()> {
        let Some(thread) = obj.as_thread() else {
            return Ok(());
        };
        if !self.seen.insert(obj.address) {
            return Ok(());
        }
        let nested = format!("{}    ", indent);

        self.line(indent, "STACK:");
        for slot in thread.stack() {
            let value = slot.read(self.snap)?;
            self.line(indent, &format!("- {}", self.label(&value)));
            self.value(&value, &nested)?;
        }

        let roots = [
            ("_METATABLE", thread.default_metatable),
            ("_REGISTRY", thread.registry),
            ("_G", thread.globals),
        ];
        for (name, slot) in roots {
            let value = slot.read(self.snap)?;
            self.line(indent, &format!("{}: {}", name, value));
            if let Value::Object(root) = &value {
                // roots are usually pre-marked; show them anyway when dumping the thread
                self.seen.remove(root.address);
                self.object(root, &format!("{}  ", indent))?;
            }
        }
        Ok(())
    }
}
