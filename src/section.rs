//! Section table (§3 "Section", §4.5).
//!
//! A [`Section`] is a named block of bytes-or-reserved-space with placement
//! constraints (fixed/floating address, bank, alignment) and a modifier
//! (`Normal`/`Union`/`Fragment`) controlling how repeated `SECTION` blocks of
//! the same name combine. [`SectionTable`] owns every section for one
//! assembly/link unit and resolves re-declarations against the existing one.

use crate::rpn::Expr;

/// Which memory region a section lives in. Address ranges and bank counts
/// are the real Game Boy memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SectionType {
    Rom0 = 0,
    Romx = 1,
    Vram = 2,
    Sram = 3,
    Wram0 = 4,
    Wramx = 5,
    Oam = 6,
    Hram = 7,
}

pub const NB_SECTION_TYPES: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct SectionTypeInfo {
    pub start_addr: u16,
    pub size: u16,
    pub first_bank: u32,
    pub last_bank: u32,
    pub name: &'static str,
}

impl SectionType {
    pub fn from_u8(b: u8) -> Option<SectionType> {
        use SectionType::*;
        [Rom0, Romx, Vram, Sram, Wram0, Wramx, Oam, Hram].get(b as usize).copied()
    }

    /// Whether this type carries data bytes on disk (ROM0/ROMX), as opposed
    /// to merely reserving address space (§4.5 "ROM-data types additionally
    /// accept emitted bytes").
    pub fn has_data(self) -> bool {
        matches!(self, SectionType::Rom0 | SectionType::Romx)
    }

    /// Default bank configuration; a real toolchain would let `-t`/`-w`/`-d`
    /// (§6 Linker CLI) widen ROM0/WRAM0/VRAM, but parsing those flags is out
    /// of scope - callers needing non-default geometry build their own
    /// `SectionTypeInfo` table instead of using this one.
    pub fn info(self) -> SectionTypeInfo {
        match self {
            SectionType::Rom0 => SectionTypeInfo { start_addr: 0x0000, size: 0x4000, first_bank: 0, last_bank: 0, name: "ROM0" },
            SectionType::Romx => SectionTypeInfo { start_addr: 0x4000, size: 0x4000, first_bank: 1, last_bank: 511, name: "ROMX" },
            SectionType::Vram => SectionTypeInfo { start_addr: 0x8000, size: 0x2000, first_bank: 0, last_bank: 1, name: "VRAM" },
            SectionType::Sram => SectionTypeInfo { start_addr: 0xA000, size: 0x2000, first_bank: 0, last_bank: 15, name: "SRAM" },
            SectionType::Wram0 => SectionTypeInfo { start_addr: 0xC000, size: 0x1000, first_bank: 0, last_bank: 0, name: "WRAM0" },
            SectionType::Wramx => SectionTypeInfo { start_addr: 0xD000, size: 0x1000, first_bank: 1, last_bank: 7, name: "WRAMX" },
            SectionType::Oam => SectionTypeInfo { start_addr: 0xFE00, size: 0x00A0, first_bank: 0, last_bank: 0, name: "OAM" },
            SectionType::Hram => SectionTypeInfo { start_addr: 0xFF80, size: 0x007F, first_bank: 0, last_bank: 0, name: "HRAM" },
        }
    }

    pub fn nb_banks(self) -> u32 {
        let info = self.info();
        info.last_bank - info.first_bank + 1
    }
}

/// How repeated `SECTION "name", ...` declarations combine (§3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Normal,
    Union,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    Byte,
    Word,
    Long,
    Jr,
}

/// A point in a section's data requiring link-time value substitution (§3).
#[derive(Debug, Clone)]
pub struct Patch {
    pub kind: PatchKind,
    /// Offset within the owning section (or fragment piece, before the
    /// fragment's `offset` is added - see `Section::patch_addr`).
    pub offset: u32,
    /// The section `jr`'s implicit PC operand refers to, and the PC offset
    /// within it (needed even for non-`jr` patches that reference `@`).
    pub pc_section: Option<u32>,
    pub pc_offset: u32,
    pub rpn: Vec<u8>,
    pub line_no: u32,
    pub node: Option<std::rc::Rc<crate::fstack::FileStackNode>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertKind {
    Warn,
    Error,
    Fatal,
}

/// A patch whose "value" is a boolean condition (§3 "Assertion").
#[derive(Debug, Clone)]
pub struct Assertion {
    pub patch: Patch,
    pub kind: AssertKind,
    pub message: String,
}

/// One `SECTION` (or one piece of a `Fragment`, or one member of a `Union`).
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub ty: SectionType,
    pub modifier: Modifier,
    pub size: u16,
    pub data: Vec<u8>,
    pub patches: Vec<Patch>,
    pub assertions: Vec<Assertion>,

    pub org: Option<u16>,
    pub bank: Option<u32>,
    /// `align_bits` of 0 means unaligned; otherwise the section must start at
    /// a multiple of `1 << align_bits` plus `align_ofs`.
    pub align_bits: u8,
    pub align_ofs: u16,

    /// For `Fragment` pieces after the first: byte offset within the overall
    /// (merged) section (§3 "Fragment: ... accumulating an offset per
    /// piece").
    pub offset: u32,

    /// Index, within the owning `SectionTable`, of the next Union/Fragment
    /// sibling sharing this section's name - used to propagate a resolved
    /// placement to every sibling (§4.7 "Write back the chosen org/bank to
    /// the section and to all its Union/Fragment siblings").
    pub next_piece: Option<usize>,

    /// Where the `SECTION` statement that created this piece lives, for
    /// object-file node IDs (§6 "Sections: ... u32 nodeId").
    pub node: Option<std::rc::Rc<crate::fstack::FileStackNode>>,
    pub line_no: u32,
}

impl Section {
    fn new(name: impl Into<String>, ty: SectionType, modifier: Modifier) -> Section {
        Section {
            name: name.into(),
            ty,
            modifier,
            size: 0,
            data: Vec::new(),
            patches: Vec::new(),
            assertions: Vec::new(),
            org: None,
            bank: None,
            align_bits: 0,
            align_ofs: 0,
            offset: 0,
            next_piece: None,
            node: None,
            line_no: 0,
        }
    }

    pub fn is_address_fixed(&self) -> bool {
        self.org.is_some()
    }

    pub fn is_bank_fixed(&self) -> bool {
        self.bank.is_some()
    }

    pub fn is_align_fixed(&self) -> bool {
        self.align_bits != 0
    }

    pub fn is_size_known(&self) -> bool {
        // Floating Fragment sections still grow until the assembler moves
        // on; callers that need "is this its final size" should only ask
        // once assembly of the section is complete. For the data model this
        // simply mirrors the field.
        true
    }

    pub fn align_mask(&self) -> u16 {
        if self.align_bits == 0 {
            0
        } else {
            (1u16 << self.align_bits).wrapping_sub(1)
        }
    }

    /// Emits `bytes` at the current end of this section's data, returning the
    /// offset they were written at. Only valid for `has_data` types (§4.5).
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> Result<u32, String> {
        if !self.ty.has_data() {
            return Err(format!("Section '{}' cannot contain code or data (not ROM0 or ROMX)", self.name));
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(bytes);
        self.size = self.data.len() as u16;
        Ok(offset)
    }

    /// `DS n` - reserve `n` bytes, filled with `pad` for data sections.
    pub fn reserve(&mut self, n: u32, pad: u8) -> u32 {
        let offset = self.size as u32;
        if self.ty.has_data() {
            self.data.resize(self.data.len() + n as usize, pad);
        }
        self.size = self.size.saturating_add(n as u16);
        offset
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_patch(
        &mut self,
        kind: PatchKind,
        offset: u32,
        pc_section: Option<u32>,
        pc_offset: u32,
        rpn: Vec<u8>,
        line_no: u32,
        node: Option<std::rc::Rc<crate::fstack::FileStackNode>>,
    ) {
        self.patches.push(Patch { kind, offset, pc_section, pc_offset, rpn, line_no, node });
    }
}

/// Owns every section for one assembly/link unit.
#[derive(Debug, Default)]
pub struct SectionTable {
    pub sections: Vec<Section>,
    by_name: std::collections::HashMap<String, usize>,
}

impl SectionTable {
    pub fn new() -> SectionTable {
        SectionTable::default()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Section> {
        self.by_name.get(name).map(|&i| &self.sections[i])
    }

    pub fn find_id_by_name(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied().map(|i| i as u32)
    }

    pub fn get(&self, id: u32) -> Option<&Section> {
        self.sections.get(id as usize)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Section> {
        self.sections.get_mut(id as usize)
    }

    /// Convenience used heavily in tests: a plain ROM0 section with no
    /// placement constraints.
    pub fn create_rom0(&mut self, name: &str) -> Result<u32, String> {
        self.create(name, SectionType::Rom0, None, None, 0, 0, Modifier::Normal)
    }

    /// `createSection` (§4.5): resolves constraints against an existing
    /// section of the same name (merging Union/Fragment declarations), or
    /// creates a fresh one.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        name: &str,
        ty: SectionType,
        org: Option<u16>,
        bank: Option<u32>,
        align_bits: u8,
        align_ofs: u16,
        modifier: Modifier,
    ) -> Result<u32, String> {
        if let Some(&existing_id) = self.by_name.get(name) {
            return self.merge(existing_id, ty, org, bank, align_bits, align_ofs, modifier);
        }

        let mut section = Section::new(name, ty, modifier);
        section.org = org;
        section.bank = bank;
        section.align_bits = align_bits;
        section.align_ofs = align_ofs;
        let id = self.sections.len();
        self.sections.push(section);
        self.by_name.insert(name.to_string(), id);
        Ok(id as u32)
    }

    #[allow(clippy::too_many_arguments)]
    fn merge(
        &mut self,
        existing_id: usize,
        ty: SectionType,
        org: Option<u16>,
        bank: Option<u32>,
        align_bits: u8,
        align_ofs: u16,
        modifier: Modifier,
    ) -> Result<u32, String> {
        // Find the tail of the Union/Fragment chain (the most recent piece).
        let mut tail = existing_id;
        while let Some(next) = self.sections[tail].next_piece {
            tail = next;
        }

        {
            let head = &self.sections[existing_id];
            if head.modifier != modifier {
                return Err(format!("Section '{name}' previously declared as {prev:?}, not {now:?}", name = head.name, prev = head.modifier, now = modifier));
            }
            if head.ty != ty {
                return Err(format!("Section '{name}' already declared as a different type", name = head.name));
            }
            if let (Some(a), Some(b)) = (head.bank, bank) {
                if a != b {
                    return Err(format!("Section '{name}' already declared in a different bank", name = head.name));
                }
            }
        }

        match modifier {
            Modifier::Normal => Err(format!(
                "Section '{}' already defined",
                self.sections[existing_id].name
            )),
            Modifier::Union => {
                let head = &mut self.sections[existing_id];
                Self::tighten_constraint(head, org, bank, align_bits, align_ofs)?;
                Ok(existing_id as u32)
            }
            Modifier::Fragment => {
                let name = self.sections[existing_id].name.clone();
                let parent_size = self.sections[existing_id].size as u32;
                let mut piece = Section::new(&name, ty, modifier);
                piece.org = org;
                piece.bank = bank;
                piece.align_bits = align_bits;
                piece.align_ofs = align_ofs;
                piece.offset = parent_size;
                let new_id = self.sections.len();
                self.sections.push(piece);
                self.sections[tail].next_piece = Some(new_id);
                // The head's reported size grows to cover every fragment.
                self.sections[existing_id].size = self.sections[existing_id].size; // unchanged here; grows as bytes are emitted into the new piece
                Ok(new_id as u32)
            }
        }
    }

    fn tighten_constraint(head: &mut Section, org: Option<u16>, bank: Option<u32>, align_bits: u8, align_ofs: u16) -> Result<(), String> {
        if let Some(o) = org {
            match head.org {
                Some(existing) if existing != o => {
                    return Err(format!("Section '{}' already declared as fixed at a different address", head.name));
                }
                _ => head.org = Some(o),
            }
        }
        if let Some(b) = bank {
            head.bank.get_or_insert(b);
        }
        if align_bits > head.align_bits {
            head.align_bits = align_bits;
            head.align_ofs = align_ofs;
        }
        Ok(())
    }

    /// Extends the head's reported `size` to the max of its Union members, or
    /// the sum of its Fragment pieces (§8 "Union bounds", "Fragment
    /// continuity"). Called once assembly of a name's last piece completes.
    pub fn finalize_union_or_fragment(&mut self, head_id: u32) {
        let mut cur = Some(head_id as usize);
        let modifier = self.sections[head_id as usize].modifier;
        match modifier {
            Modifier::Union => {
                let mut max_size = 0u16;
                while let Some(id) = cur {
                    max_size = max_size.max(self.sections[id].size);
                    cur = self.sections[id].next_piece;
                }
                cur = Some(head_id as usize);
                while let Some(id) = cur {
                    self.sections[id].size = max_size;
                    cur = self.sections[id].next_piece;
                }
            }
            Modifier::Fragment => {
                let mut total = 0u32;
                while let Some(id) = cur {
                    total += self.sections[id].size as u32;
                    cur = self.sections[id].next_piece;
                }
                self.sections[head_id as usize].size = total as u16;
            }
            Modifier::Normal => {}
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Link-time counterpart to [`Self::create`]/[`Self::merge`]: adopts a
    /// fully-formed `Section` read from one object file into this (shared,
    /// cross-object) table, chaining it onto any existing same-named section
    /// the same way a second `SECTION` statement would during assembly
    /// (§4.9 "sections of the same name across files combine the same way
    /// Union/Fragment declarations do within one file").
    pub fn adopt_section(&mut self, mut section: Section) -> Result<u32, String> {
        let name = section.name.clone();
        let Some(&existing_id) = self.by_name.get(&name) else {
            let id = self.sections.len();
            section.offset = 0;
            section.next_piece = None;
            self.by_name.insert(name, id);
            self.sections.push(section);
            return Ok(id as u32);
        };

        let mut tail = existing_id;
        while let Some(next) = self.sections[tail].next_piece {
            tail = next;
        }

        {
            let head = &self.sections[existing_id];
            if head.modifier != section.modifier {
                return Err(format!(
                    "Section '{name}' previously declared as {prev:?}, not {now:?}",
                    prev = head.modifier,
                    now = section.modifier
                ));
            }
            if head.ty != section.ty {
                return Err(format!("Section '{name}' already declared as a different type"));
            }
            if let (Some(a), Some(b)) = (head.bank, section.bank) {
                if a != b {
                    return Err(format!("Section '{name}' already declared in a different bank"));
                }
            }
        }

        match section.modifier {
            Modifier::Normal => Err(format!("Section '{name}' already defined")),
            Modifier::Union => {
                Self::tighten_constraint(
                    &mut self.sections[existing_id],
                    section.org,
                    section.bank,
                    section.align_bits,
                    section.align_ofs,
                )?;
                section.offset = 0;
                section.next_piece = None;
                let new_id = self.sections.len();
                self.sections.push(section);
                self.sections[tail].next_piece = Some(new_id);
                Ok(new_id as u32)
            }
            Modifier::Fragment => {
                let mut running_total = 0u32;
                let mut cur = Some(existing_id);
                while let Some(id) = cur {
                    running_total += self.sections[id].size as u32;
                    cur = self.sections[id].next_piece;
                }
                section.offset = running_total;
                section.next_piece = None;
                let new_id = self.sections.len();
                self.sections.push(section);
                self.sections[tail].next_piece = Some(new_id);
                Ok(new_id as u32)
            }
        }
    }
}

/// `STARTOF`/`SIZEOF` builders dispatch through [`crate::rpn::Expr`]; kept
/// here so call sites don't need to import both modules for one line.
pub fn sizeof_section_type(ty: SectionType) -> Expr {
    Expr::make_sizeof_section_type(ty)
}

/// A `LOAD "name", TYPE[...] ... ENDL` block in progress (§4.5 "LOAD
/// blocks"): bytes keep being emitted into the enclosing ROM section, but
/// labels defined inside are bound to `ram_section` at an offset that tracks
/// how far the ROM section has grown since the block started.
#[derive(Debug, Clone, Copy)]
pub struct LoadBlock {
    pub rom_section: u32,
    pub ram_section: u32,
    /// `loadOffset = curOffset - newSection.size`, captured at block entry.
    load_offset: i64,
}

impl SectionTable {
    /// Enters a `LOAD` block: `rom_section` is whatever ROM section is
    /// currently receiving emitted bytes, `ram_section` the (already
    /// created, as-yet-empty-of-data) section labels inside the block bind
    /// to.
    pub fn begin_load(&self, rom_section: u32, ram_section: u32) -> Result<LoadBlock, String> {
        let rom = self.get(rom_section).ok_or_else(|| "LOAD: no such enclosing section".to_string())?;
        let ram = self.get(ram_section).ok_or_else(|| "LOAD: no such target section".to_string())?;
        if !rom.ty.has_data() {
            return Err(format!("Cannot open a LOAD block inside '{}' (not ROM0 or ROMX)", rom.name));
        }
        if ram.ty.has_data() {
            return Err(format!("Section '{}' cannot be a LOAD block's target (it has data)", ram.name));
        }
        let load_offset = rom.data.len() as i64 - ram.size as i64;
        Ok(LoadBlock { rom_section, ram_section, load_offset })
    }

    /// Translates the enclosing ROM section's current write position into
    /// the bound RAM section's offset, for binding a label defined inside an
    /// open `LoadBlock`.
    pub fn load_offset(&self, block: &LoadBlock) -> Result<u32, String> {
        let rom = self.get(block.rom_section).expect("LOAD block's ROM section was removed while open");
        let ram_offset = rom.data.len() as i64 - block.load_offset;
        u32::try_from(ram_offset).map_err(|_| "LOAD block's computed offset underflowed".to_string())
    }

    /// `ENDL`: grows the RAM section's reported `size` to cover every byte
    /// emitted while the block was open (so `SIZEOF`/`STARTOF` against it
    /// reflect the data actually loaded there).
    pub fn end_load(&mut self, block: &LoadBlock) -> Result<(), String> {
        let new_size = self.load_offset(block)?;
        let ram = self.get_mut(block.ram_section).ok_or_else(|| "LOAD: target section disappeared".to_string())?;
        ram.size = ram.size.max(new_size as u16);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_takes_max_size() {
        let mut sections = SectionTable::new();
        let a = sections.create("U", SectionType::Wram0, None, None, 0, 0, Modifier::Union).unwrap();
        sections.get_mut(a).unwrap().reserve(2, 0);
        let b = sections.create("U", SectionType::Wram0, None, None, 0, 0, Modifier::Union).unwrap();
        sections.get_mut(b).unwrap().reserve(4, 0);
        sections.finalize_union_or_fragment(a);
        assert_eq!(sections.get(a).unwrap().size, 4);
        assert_eq!(sections.get(b).unwrap().size, 4);
    }

    #[test]
    fn fragment_offsets_accumulate() {
        let mut sections = SectionTable::new();
        let a = sections.create_rom0("F").unwrap();
        sections.get_mut(a).unwrap().emit_bytes(&[1, 2]).unwrap();
        let b = sections.create("F", SectionType::Rom0, None, None, 0, 0, Modifier::Fragment).unwrap();
        assert_eq!(sections.get(b).unwrap().offset, 2);
        sections.get_mut(b).unwrap().emit_bytes(&[3, 4, 5]).unwrap();
        sections.finalize_union_or_fragment(a);
        assert_eq!(sections.get(a).unwrap().size, 5);
    }

    #[test]
    fn emitting_into_ram_section_errors() {
        let mut sections = SectionTable::new();
        let id = sections.create("W", SectionType::Wram0, None, None, 0, 0, Modifier::Normal).unwrap();
        assert!(sections.get_mut(id).unwrap().emit_bytes(&[1]).is_err());
    }

    #[test]
    fn load_block_binds_labels_to_ram_offsets_while_emitting_to_rom() {
        let mut sections = SectionTable::new();
        let rom = sections.create_rom0("Compressed").unwrap();
        sections.get_mut(rom).unwrap().emit_bytes(&[0xAA, 0xBB]).unwrap();

        let ram = sections.create("Unpacked", SectionType::Wram0, None, None, 0, 0, Modifier::Normal).unwrap();
        let block = sections.begin_load(rom, ram).unwrap();
        // Entering with 2 ROM bytes already emitted and an empty RAM section:
        // the first label inside the block should land at RAM offset 0.
        assert_eq!(sections.load_offset(&block).unwrap(), 0);

        sections.get_mut(rom).unwrap().emit_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(sections.load_offset(&block).unwrap(), 3);

        sections.end_load(&block).unwrap();
        assert_eq!(sections.get(ram).unwrap().size, 3);
    }

    #[test]
    fn load_block_rejects_data_section_as_target() {
        let mut sections = SectionTable::new();
        let rom = sections.create_rom0("A").unwrap();
        let rom2 = sections.create_rom0("B").unwrap();
        assert!(sections.begin_load(rom, rom2).is_err());
    }
}
