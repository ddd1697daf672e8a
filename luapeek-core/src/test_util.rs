//! Builds small VM heaps inside a [`MemoryImage`] using the default layout.

use luapeek_pine::MemoryImage;

use crate::value::{Tag, TAG_COLLECTED};

#[derive(Debug, Clone, Copy)]
pub enum Slot {
    Nil,
    Bool(bool),
    Num(f32),
    Ptr(u32),
    Obj(Tag, u32),
    Collected,
    Raw(u32, u32),
}

impl Slot {
    fn words(self) -> (u32, u32) {
        match self {
            Slot::Nil => (Tag::Nil as u32, 0),
            Slot::Bool(b) => (Tag::Boolean as u32, b as u32),
            Slot::Num(n) => (Tag::Number as u32, n.to_bits()),
            Slot::Ptr(p) => (Tag::LightPointer as u32, p),
            Slot::Obj(tag, address) => (tag as u32, address),
            Slot::Collected => (TAG_COLLECTED, 0),
            Slot::Raw(tag, word) => (tag, word),
        }
    }
}

pub struct HeapBuilder {
    pub image: MemoryImage,
    next: u32,
}

impl HeapBuilder {
    pub fn new() -> Self {
        Self {
            image: MemoryImage::new(),
            next: 0x0010_0000,
        }
    }

    pub fn alloc(&mut self, size: u32) -> u32 {
        let address = self.next;
        self.next += (size.max(1) + 15) & !15;
        self.image.map(address, size as usize);
        address
    }

    pub fn write_slot(&mut self, address: u32, slot: Slot) {
        let (tag, word) = slot.words();
        self.image.put_u32(address, tag).put_u32(address + 4, word);
    }

    /// Consecutive value slots, as found in an array part or a stack.
    pub fn slots(&mut self, slots: &[Slot]) -> u32 {
        let base = self.alloc(8 * slots.len() as u32);
        for (i, &slot) in slots.iter().enumerate() {
            self.write_slot(base + 8 * i as u32, slot);
        }
        base
    }

    fn header(&mut self, address: u32, tag: Tag) {
        self.image.put_u32(address, 0).put_u8(address + 4, tag as u8);
    }

    pub fn string(&mut self, text: &str) -> u32 {
        let address = self.alloc(16 + text.len() as u32 + 1);
        self.header(address, Tag::String);
        self.image
            .put_u32(address + 8, text.len() as u32 * 31)
            .put_u32(address + 12, text.len() as u32)
            .load(address + 16, text.as_bytes())
            .put_u8(address + 16 + text.len() as u32, 0);
        address
    }

    pub fn table(&mut self, array: &[Slot], hash: &[(Slot, Slot)]) -> u32 {
        let address = self.alloc(0x20);
        self.header(address, Tag::Table);

        let array_ptr = self.slots(array);

        let node_count = hash.len().max(1).next_power_of_two() as u32;
        let node_ptr = self.alloc(20 * node_count);
        for i in 0..node_count {
            let node = node_ptr + 20 * i;
            let (key, value) = hash.get(i as usize).copied().unwrap_or((Slot::Nil, Slot::Nil));
            self.write_slot(node, key);
            self.write_slot(node + 8, value);
            self.image.put_u32(node + 16, 0);
        }

        self.image
            .put_u8(address + 7, node_count.trailing_zeros() as u8)
            .put_u32(address + 0x08, 0)
            .put_u32(address + 0x0C, array_ptr)
            .put_u32(address + 0x10, node_ptr)
            .put_u32(address + 0x1C, array.len() as u32);
        address
    }

    pub fn set_metatable(&mut self, table: u32, metatable: u32) {
        self.image.put_u32(table + 0x08, metatable);
    }

    pub fn native_closure(&mut self, function: u32) -> u32 {
        let address = self.alloc(16);
        self.header(address, Tag::Function);
        self.image
            .put_u8(address + 6, 1)
            .put_u8(address + 7, 0)
            .put_u32(address + 12, function);
        address
    }

    pub fn script_closure(&mut self, constants: &[Slot], code: &[u32], env: Slot) -> u32 {
        let k = self.slots(constants);
        let code_ptr = self.alloc(4 * code.len() as u32);
        for (pc, &word) in code.iter().enumerate() {
            self.image.put_u32(code_ptr + 4 * pc as u32, word);
        }

        let proto = self.alloc(48);
        self.image
            .put_u32(proto + 8, k)
            .put_u32(proto + 12, code_ptr)
            .put_u32(proto + 40, constants.len() as u32)
            .put_u32(proto + 44, code.len() as u32);

        let address = self.alloc(24);
        self.header(address, Tag::Function);
        self.image
            .put_u8(address + 6, 0)
            .put_u8(address + 7, 0)
            .put_u32(address + 12, proto);
        self.write_slot(address + 16, env);
        address
    }

    /// A thread whose globals slot points at `globals`, with its own global
    /// state, an empty registry and an empty default metatable.
    pub fn thread(&mut self, globals: u32, stack: &[Slot]) -> u32 {
        let registry = self.table(&[], &[]);
        let default_metatable = self.table(&[], &[]);
        let global_state = self.alloc(0x48);
        self.write_slot(global_state + 0x38, Slot::Obj(Tag::Table, registry));
        self.write_slot(global_state + 0x40, Slot::Obj(Tag::Table, default_metatable));

        let base = self.slots(stack);
        let top = base.wrapping_add(8 * stack.len() as u32).wrapping_sub(8);

        let address = self.alloc(0x48);
        self.header(address, Tag::Thread);
        self.image
            .put_u32(address + 0x08, top)
            .put_u32(address + 0x10, global_state)
            .put_u32(address + 0x1C, base)
            .put_u32(address + 0x20, stack.len() as u32);
        self.write_slot(address + 0x40, Slot::Obj(Tag::Table, globals));
        address
    }
}
