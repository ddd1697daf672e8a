use serde::Deserialize;

use crate::value::Tag;

/// Byte offsets of the VM structures inside the target.
///
/// Every field defaults to the 32-bit Lua 5.0 build found in the target and can
/// be overridden from configuration, one table at a time:
///
/// ```toml
/// [table]
/// array_size = 0x20
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Layout {
    pub object: ObjectLayout,
    pub string: StringLayout,
    pub table: TableLayout,
    pub closure: ClosureLayout,
    pub proto: ProtoLayout,
    pub userdata: UserdataLayout,
    pub thread: ThreadLayout,
    pub global_state: GlobalStateLayout,
    /// Operands below this are registers, the rest index the constant pool.
    pub rk_registers: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            object: ObjectLayout::default(),
            string: StringLayout::default(),
            table: TableLayout::default(),
            closure: ClosureLayout::default(),
            proto: ProtoLayout::default(),
            userdata: UserdataLayout::default(),
            thread: ThreadLayout::default(),
            global_state: GlobalStateLayout::default(),
            rk_registers: 250,
        }
    }
}

impl Layout {
    /// Bytes past an object's address that decoding an object of kind `tag`
    /// reads, header included.
    pub fn extent(&self, tag: Tag) -> u32 {
        let o = &self.object;
        let header = span(&[(o.next, 4), (o.kind, 1)]);
        let body = match tag {
            Tag::String => {
                let s = &self.string;
                span(&[(s.hash, 4), (s.len, 4), (s.data, 0)])
            }
            Tag::Table => {
                let t = &self.table;
                span(&[
                    (t.log_node_count, 1),
                    (t.metatable, 4),
                    (t.array, 4),
                    (t.node, 4),
                    (t.array_size, 4),
                ])
            }
            Tag::Function => {
                let c = &self.closure;
                span(&[
                    (c.is_native, 1),
                    (c.upvalue_count, 1),
                    (c.function, 4),
                    (c.proto, 4),
                    (c.env, TVALUE_SIZE),
                ])
            }
            Tag::Userdata => span(&[(self.userdata.metatable, 4), (self.userdata.size, 4)]),
            Tag::Thread => {
                let t = &self.thread;
                span(&[
                    (t.top, 4),
                    (t.global_state, 4),
                    (t.stack, 4),
                    (t.stack_size, 4),
                    (t.globals, TVALUE_SIZE),
                ])
            }
            _ => 0,
        };
        header.max(body)
    }

    pub fn proto_extent(&self) -> u32 {
        let p = &self.proto;
        span(&[(p.constants, 4), (p.code, 4), (p.constant_count, 4), (p.code_count, 4)])
    }

    pub fn global_state_extent(&self) -> u32 {
        let g = &self.global_state;
        span(&[(g.registry, TVALUE_SIZE), (g.default_metatable, TVALUE_SIZE)])
    }
}

fn span(fields: &[(u32, u32)]) -> u32 {
    fields
        .iter()
        .map(|&(at, width)| at.saturating_add(width))
        .max()
        .unwrap_or(0)
}

/// `base + off`, or `None` past the top of the 32-bit address space.
pub fn offset(base: u32, off: u32) -> Option<u32> {
    base.checked_add(off)
}

/// Address of record `index` in an array of `size`-byte records at `base`.
pub fn element(base: u32, index: u32, size: u32) -> Option<u32> {
    index.checked_mul(size).and_then(|off| base.checked_add(off))
}

/// Tagged value: `u32 tag` at 0, `u32 payload` at 4.
pub const TVALUE_SIZE: u32 = 8;
pub const TVALUE_PAYLOAD: u32 = 4;

/// Common header of every collectible object.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObjectLayout {
    pub next: u32,
    pub kind: u32,
}

impl Default for ObjectLayout {
    fn default() -> Self {
        Self { next: 0x00, kind: 0x04 }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StringLayout {
    pub hash: u32,
    pub len: u32,
    pub data: u32,
    /// Longer strings are described but their bytes are not fetched.
    pub max_fetch: u32,
}

impl Default for StringLayout {
    fn default() -> Self {
        Self {
            hash: 0x08,
            len: 0x0C,
            data: 0x10,
            max_fetch: 0x1_0000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TableLayout {
    /// `u8` log2 of the node count.
    pub log_node_count: u32,
    pub metatable: u32,
    pub array: u32,
    pub node: u32,
    pub array_size: u32,
    pub node_size: u32,
    pub node_key: u32,
    pub node_value: u32,
    pub node_next: u32,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            log_node_count: 0x07,
            metatable: 0x08,
            array: 0x0C,
            node: 0x10,
            array_size: 0x1C,
            node_size: 20,
            node_key: 0,
            node_value: 8,
            node_next: 16,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClosureLayout {
    /// `u8`, non-zero for native closures.
    pub is_native: u32,
    /// `u8`
    pub upvalue_count: u32,
    pub function: u32,
    pub proto: u32,
    pub env: u32,
}

impl Default for ClosureLayout {
    fn default() -> Self {
        Self {
            is_native: 6,
            upvalue_count: 7,
            function: 12,
            proto: 12,
            env: 16,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProtoLayout {
    pub constants: u32,
    pub code: u32,
    pub constant_count: u32,
    pub code_count: u32,
}

impl Default for ProtoLayout {
    fn default() -> Self {
        Self {
            constants: 8,
            code: 12,
            constant_count: 40,
            code_count: 44,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserdataLayout {
    pub metatable: u32,
    pub size: u32,
}

impl Default for UserdataLayout {
    fn default() -> Self {
        Self {
            metatable: 8,
            size: 12,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThreadLayout {
    pub top: u32,
    pub global_state: u32,
    pub stack: u32,
    pub stack_size: u32,
    pub globals: u32,
}

impl Default for ThreadLayout {
    fn default() -> Self {
        Self {
            top: 0x08,
            global_state: 0x10,
            stack: 0x1C,
            stack_size: 0x20,
            globals: 0x40,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GlobalStateLayout {
    pub registry: u32,
    pub default_metatable: u32,
}

impl Default for GlobalStateLayout {
    fn default() -> Self {
        Self {
            registry: 0x38,
            default_metatable: 0x40,
        }
    }
}
