//! Guarded access to a VM that can disappear or be rebuilt at any time.
//!
//! Before touching the heap, a [`Session`] checks a set of probe addresses
//! that tell whether the target is in a state where the VM is safe to read
//! (not loading, not mid-save). It then follows the configured pointer to the
//! current execution context; when that pointer changes, every cached handle
//! is dropped and re-resolved, and every [`Hook`] is installed again.

use std::collections::HashMap;
use std::fmt;

use luapeek_pine::Memory;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::snapshot::Snapshot;
use crate::value::TValue;

/// A comparison applied to the word a probe reads.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    Equals(u32),
    NotEquals(u32),
    AtMost(u32),
    AtLeast(u32),
    NonZero,
    Zero,
}

impl Check {
    pub fn holds(self, value: u32) -> bool {
        match self {
            Check::Equals(v) => value == v,
            Check::NotEquals(v) => value != v,
            Check::AtMost(v) => value <= v,
            Check::AtLeast(v) => value >= v,
            Check::NonZero => value != 0,
            Check::Zero => value == 0,
        }
    }
}

/// Reads `address`, then follows `offsets` as a pointer chain
/// (`value = read(value + offset)`), and applies `check` to the final word.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Probe {
    #[serde(default)]
    pub name: String,
    pub address: u32,
    #[serde(default)]
    pub offsets: Vec<u32>,
    pub check: Check,
}

impl Probe {
    /// The final address read and the word found there.
    pub fn read<M: Memory + ?Sized>(&self, mem: &mut M) -> Result<(u32, u32)> {
        let mut address = self.address;
        let mut value = mem.read_u32(address)?;
        for &offset in &self.offsets {
            address = value
                .checked_add(offset)
                .ok_or(Error::AddressOverflow { address: value, offset })?;
            value = mem.read_u32(address)?;
        }
        Ok((address, value))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Where the target keeps its pointer to the current execution context.
    pub state_pointer: u32,
    pub probes: Vec<Probe>,
    /// Globals resolved on every bind; a missing one fails the bind.
    pub required_globals: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_pointer: 0x0056_CBD0,
            probes: Vec::new(),
            required_globals: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindState {
    Uninitialized,
    Bound { state: u32 },
}

/// Handles resolved by the current bind.
#[derive(Debug, Clone)]
pub struct Globals {
    pub state: u32,
    handles: HashMap<String, TValue>,
}

impl Globals {
    pub fn get(&self, name: &str) -> Option<TValue> {
        self.handles.get(name).copied()
    }

    pub fn require(&self, name: &str) -> Result<TValue> {
        self.get(name).ok_or_else(|| Error::HandleUnresolved { name: name.into() })
    }
}

/// Installed into the VM after every bind, since a rebuilt VM has lost any
/// earlier patches.
pub trait Hook {
    fn name(&self) -> &str;

    fn install(&mut self, snap: &mut Snapshot<'_, dyn Memory + '_>, globals: &Globals) -> Result<()>;
}

pub struct Session<M> {
    memory: M,
    layout: Layout,
    config: SessionConfig,
    state: BindState,
    globals: Option<Globals>,
    hooks: Vec<Box<dyn Hook>>,
}

impl<M> fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl<M: Memory> Session<M> {
    pub fn new(memory: M, layout: Layout, config: SessionConfig) -> Self {
        Self {
            memory,
            layout,
            config,
            state: BindState::Uninitialized,
            globals: None,
            hooks: Vec::new(),
        }
    }

    pub fn add_hook(&mut self, hook: impl Hook + 'static) {
        self.hooks.push(Box::new(hook));
    }

    pub fn state(&self) -> BindState {
        self.state
    }

    pub fn globals(&self) -> Option<&Globals> {
        self.globals.as_ref()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn into_memory(self) -> M {
        self.memory
    }

    /// Opens a fresh inspection pass.
    pub fn snapshot(&mut self) -> Snapshot<'_, M> {
        Snapshot::new(&mut self.memory, &self.layout)
    }

    /// Evaluates every probe. Reads only.
    pub fn check_probes(&mut self) -> Result<()> {
        for (index, probe) in self.config.probes.iter().enumerate() {
            let (address, value) = probe.read(&mut self.memory)?;
            if !probe.check.holds(value) {
                log::debug!("probe {} ({}) failed: {:08X}", index, probe.name, value);
                return Err(Error::NotSafe {
                    probe: index,
                    address,
                    value,
                });
            }
        }
        Ok(())
    }

    /// Confirms the target is safe to use and that the session is bound to the
    /// current execution context, rebinding if it moved.
    pub fn validate(&mut self) -> Result<()> {
        self.check_probes()?;
        let state = self.memory.read_u32(self.config.state_pointer)?;
        match self.state {
            BindState::Bound { state: bound } if bound == state => Ok(()),
            BindState::Bound { state: bound } => {
                log::info!("execution context moved from ${:08X} to ${:08X}", bound, state);
                self.bind(state)
            }
            BindState::Uninitialized => self.bind(state),
        }
    }

    /// Resolves the required globals in the thread at `state` and installs the
    /// hooks. The session stays unbound if anything fails.
    pub fn bind(&mut self, state: u32) -> Result<()> {
        self.state = BindState::Uninitialized;
        self.globals = None;

        let mem: &mut dyn Memory = &mut self.memory;
        let mut snap = Snapshot::new(mem, &self.layout);
        let thread = snap.thread(state)?;
        let thread = thread.as_thread().ok_or(Error::NotAThread { address: state })?;
        let table = thread.globals_table(&mut snap)?;
        let table = table.as_table().ok_or_else(|| Error::HandleUnresolved { name: "_G".into() })?;

        let mut handles = HashMap::new();
        for name in &self.config.required_globals {
            match table.get(&mut snap, name.as_str())? {
                Some(handle) => {
                    handles.insert(name.clone(), handle);
                }
                None => {
                    log::warn!("global {:?} missing from ${:08X}", name, state);
                    return Err(Error::HandleUnresolved { name: name.clone() });
                }
            }
        }

        let globals = Globals { state, handles };
        for hook in &mut self.hooks {
            log::info!("installing hook {}", hook.name());
            hook.install(&mut snap, &globals)?;
        }

        log::info!(
            "bound to execution context ${:08X} ({} globals, {} hooks)",
            state,
            globals.handles.len(),
            self.hooks.len()
        );
        self.globals = Some(globals);
        self.state = BindState::Bound { state };
        Ok(())
    }

    /// The handle for global `name`: cached when it was resolved by the bind,
    /// looked up live otherwise. Validates first, so a failed safety check or
    /// a moved execution context is seen before any heap read.
    pub fn global(&mut self, name: &str) -> Result<TValue> {
        self.validate()?;
        let state = match (&self.globals, self.state) {
            (Some(globals), BindState::Bound { state }) => {
                if let Some(handle) = globals.get(name) {
                    return Ok(handle);
                }
                state
            }
            _ => return Err(Error::HandleUnresolved { name: name.into() }),
        };

        let mut snap = self.snapshot();
        let thread = snap.thread(state)?;
        let thread = thread.as_thread().ok_or(Error::NotAThread { address: state })?;
        thread
            .global(&mut snap, name)?
            .ok_or_else(|| Error::HandleUnresolved { name: name.into() })
    }
}
