//! SDCC `.rel` object reader (§4.9, §9 "SDCC relocation translation").
//!
//! Unlike [`crate::object::reader`], this is a line-oriented *text* format
//! (`sdas`/`sdld`'s `.rel`): a header line picks the number base and address
//! width, then `H`/`A`/`S`/`T`/`R` lines declare area (section) counts,
//! areas themselves, symbols, raw data, and relocations. Relocations are
//! translated into the same RPN byte stream [`crate::rpn::Expr`] produces,
//! so the linker's patch resolver never needs to know a patch came from an
//! SDCC object instead of an RGBDS one.
//!
//! SDLD's 8-bit relocations are the main wrinkle: despite patching a single
//! byte, they're encoded as overwriting one byte of a wider (16- or 24-bit)
//! "gap" in the `T` line's data, with the other byte(s) of that gap simply
//! discarded. `T`-line offsets are relative to the data *before* any such
//! discarding, so the bookkeeping below tracks a separate read cursor
//! (`written_ofs`) and write cursor (`write_index`) per area.

use crate::error::{Error, Result};
use crate::fstack::FileStackNode;
use crate::object::reader::ObjectFile;
use crate::rpn::RpnOp;
use crate::section::{Modifier, PatchKind, SectionTable, SectionType};
use crate::symbol::SymbolTable;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberBase {
    Base8,
    Base10,
    Base16,
}

fn parse_num(base: NumberBase, tok: &str) -> Result<u64> {
    let radix = match base {
        NumberBase::Base8 => 8,
        NumberBase::Base10 => 10,
        NumberBase::Base16 => 16,
    };
    u64::from_str_radix(tok, radix).map_err(|_| Error::Malformed(format!("expected a number, got \"{tok}\"")))
}

fn parse_u32(base: NumberBase, tok: &str) -> Result<u32> {
    let v = parse_num(base, tok)?;
    u32::try_from(v).map_err(|_| Error::Malformed(format!("\"{tok}\" is not a 32-bit int")))
}

fn parse_u8(base: NumberBase, tok: &str) -> Result<u8> {
    let v = parse_num(base, tok)?;
    u8::try_from(v).map_err(|_| Error::Malformed(format!("\"{tok}\" is not a byte")))
}

// `AreaFlags`/`RelocFlags` bit positions (sdas_obj.cpp).
const AREA_TYPE: u32 = 1 << 2;
const AREA_ISABS: u32 = 1 << 3;
const AREA_PAGING: u32 = 1 << 4;

const RELOC_SIZE: u16 = 1 << 0;
const RELOC_ISSYM: u16 = 1 << 1;
const RELOC_ISPCREL: u16 = 1 << 2;
const RELOC_EXPR16: u16 = 1 << 3;
const RELOC_SIGNED: u16 = 1 << 4;
const RELOC_ZPAGE: u16 = 1 << 5;
const RELOC_NPAGE: u16 = 1 << 6;
const RELOC_WHICHBYTE: u16 = 1 << 7;
const RELOC_EXPR24: u16 = 1 << 8;
const RELOC_BANKBYTE: u16 = 1 << 9;

struct PendingPatch {
    offset: u32,
    pc_offset: u32,
    rpn: Vec<u8>,
    kind: PatchKind,
}

struct Area {
    section_id: u32,
    is_address_fixed: bool,
    org: u16,
    size: u16,
    write_index: u16,
    data: Vec<u8>,
    patches: Vec<PendingPatch>,
}

fn section_type_for_addr(org: u16) -> Result<SectionType> {
    let high = (org >> 8) as u8;
    Ok(match high {
        0x00..=0x3F => SectionType::Rom0,
        0x40..=0x7F => SectionType::Romx,
        0x80..=0x9F => SectionType::Vram,
        0xA0..=0xBF => SectionType::Sram,
        0xC0..=0xCF => SectionType::Wram0,
        0xD0..=0xDF => SectionType::Wramx,
        0xE0..=0xFD => return Err(Error::Malformed("areas in echo RAM are not supported".into())),
        0xFE => SectionType::Oam,
        _ => SectionType::Hram,
    })
}

/// Reads one SDCC `.rel` file's text, producing an [`ObjectFile`] comparable
/// to one parsed by [`crate::object::reader::read`] (local symbol table plus
/// a `SectionTable` with inline patches), ready for the linker to merge.
pub fn read(node: Rc<FileStackNode>, text: &str) -> Result<ObjectFile> {
    let mut lines = text.lines().filter(|l| !l.trim_start().starts_with(';') && !l.trim().is_empty());

    let header = lines.next().ok_or_else(|| Error::Malformed("empty SDCC object".to_string()))?;
    let mut chars = header.chars();
    let base = match chars.next() {
        Some('X') => NumberBase::Base16,
        Some('D') => NumberBase::Base10,
        Some('Q') => NumberBase::Base8,
        other => return Err(Error::Malformed(format!("unknown SDCC number format {other:?}"))),
    };
    match chars.next() {
        Some('L') => {}
        Some('H') => return Err(Error::Malformed("big-endian SDCC object files are not supported".to_string())),
        other => return Err(Error::Malformed(format!("unknown endianness type {other:?}"))),
    }
    let addr_size: u8 = match chars.next() {
        Some('3') => 3,
        Some('4') => 4,
        other => return Err(Error::Malformed(format!("unknown address size {other:?}"))),
    };

    let h_line = lines.next().ok_or_else(|| Error::Malformed("missing 'H' line".to_string()))?;
    if !h_line.starts_with('H') {
        return Err(Error::Malformed("expected 'H' line".to_string()));
    }
    let h_tokens: Vec<&str> = h_line[1..].split_whitespace().collect();
    if h_tokens.len() < 4 {
        return Err(Error::Malformed("'H' line is too short".to_string()));
    }
    let _expected_areas = parse_u32(base, h_tokens[0])?;
    let _expected_symbols = parse_u32(base, h_tokens[2])?;

    let mut symbols = SymbolTable::new();
    let mut sections = SectionTable::new();
    let mut areas: Vec<Area> = Vec::new();
    // Maps a raw SDCC symbol index (file order, no builtins) to this
    // module's own `SymbolTable` id, so RPN bytes we emit use the real id
    // (§4.9's general rule that RPN `SYM`/`BANK_SYM` operands index a
    // file-local symbol array; ours happens to start after the builtins).
    let mut sdcc_to_local: Vec<u32> = Vec::new();
    let mut area_names: Vec<String> = Vec::new();
    let mut pending_data: Vec<u8> = Vec::new();

    for line in lines {
        let line_type = line.as_bytes()[0] as char;
        let rest = &line[1..];
        match line_type {
            'M' | 'O' => {}
            'A' => {
                let toks: Vec<&str> = rest.split_whitespace().collect();
                if toks.len() < 6 {
                    return Err(Error::Malformed("'A' line is too short".to_string()));
                }
                let name = toks[0];
                let size = parse_u32(base, toks[2])?;
                if size > u16::MAX as u32 {
                    return Err(Error::Malformed(format!("area \"{name}\" is larger than the GB address space")));
                }
                let flags = parse_u32(base, toks[4])?;
                if flags & AREA_PAGING != 0 {
                    return Err(Error::Malformed("paging is not supported".to_string()));
                }
                let is_address_fixed = flags & AREA_ISABS != 0;
                let modifier = if is_address_fixed || flags & AREA_TYPE != 0 { Modifier::Normal } else { Modifier::Fragment };
                let mangled = if modifier == Modifier::Normal { format!("{} {}", node.describe(), name) } else { name.to_string() };

                let addr = parse_u32(base, toks[5])?;
                let org = (addr & 0xFFFF) as u16;
                let bank = addr >> 16;

                let ty = if is_address_fixed { section_type_for_addr(org)? } else { SectionType::Rom0 };
                let section_id = sections
                    .create(&mangled, ty, if is_address_fixed { Some(org) } else { None }, if is_address_fixed { Some(bank) } else { None }, 0, 0, modifier)
                    .map_err(Error::Malformed)?;
                if let Some(sect) = sections.get_mut(section_id) {
                    sect.node = Some(Rc::clone(&node));
                    sect.size = size as u16;
                }
                area_names.push(mangled);
                areas.push(Area {
                    section_id,
                    is_address_fixed,
                    org,
                    size: size as u16,
                    write_index: 0,
                    data: Vec::new(),
                    patches: Vec::new(),
                });
            }
            'S' => {
                let toks: Vec<&str> = rest.split_whitespace().collect();
                if toks.len() < 2 {
                    return Err(Error::Malformed("'S' line is too short".to_string()));
                }
                let name = toks[0];
                let tag = toks[1];
                let value_str = tag.get(3..).ok_or_else(|| Error::Malformed("'S' line is too short".to_string()))?;
                let mut value = parse_u32(base, value_str)? as i32;

                let is_ref = tag.starts_with('R') || tag.starts_with('r');
                let is_def = tag.starts_with('D') || tag.starts_with('d');
                if !is_ref && !is_def {
                    return Err(Error::Malformed("'S' line is neither \"Def\" nor \"Ref\"".to_string()));
                }

                let local_id = if is_ref {
                    symbols.ref_only(name)
                } else if let Some(area) = areas.last() {
                    if area.is_address_fixed {
                        value -= area.org as i32;
                    }
                    symbols.add_label(name, area.section_id, value as u32, true).map_err(Error::Malformed)?
                } else {
                    symbols.add_equ(name, value).map_err(Error::Malformed)?
                };
                sdcc_to_local.push(local_id);
            }
            'T' => {
                if !pending_data.is_empty() {
                    // Previous 'T' line had no 'R' line; matches the
                    // original's "ignored" warning rather than a hard error.
                    pending_data.clear();
                }
                let mut data = Vec::new();
                for tok in rest.split_whitespace() {
                    data.push(parse_u8(base, tok)?);
                }
                if data.len() < addr_size as usize {
                    return Err(Error::Malformed("'T' line is too short".to_string()));
                }
                pending_data = data;
            }
            'R' => {
                if pending_data.is_empty() {
                    continue;
                }
                let toks: Vec<&str> = rest.split_whitespace().collect();
                if toks.len() < 4 {
                    return Err(Error::Malformed("'R' line is too short".to_string()));
                }
                let area_idx = parse_u8(base, toks[2])? as u16 | (parse_u8(base, toks[3])? as u16) << 8;
                let area_idx = area_idx as usize;
                let area = areas
                    .get_mut(area_idx)
                    .ok_or_else(|| Error::Malformed(format!("'R' line references undeclared area #{area_idx}")))?;

                let mut written_ofs = addr_size;
                let data = std::mem::take(&mut pending_data);
                let mut addr = data[0] as u16 | (data[1] as u16) << 8;
                if area.is_address_fixed {
                    addr = addr.wrapping_sub(area.org);
                }
                if data.len() != addr_size as usize && area.data.is_empty() && area.size != 0 {
                    area.data.resize(area.size as usize, 0);
                }

                let mut reloc_toks = toks[4..].iter();
                while let Some(&flag_tok) = reloc_toks.next() {
                    let mut flags = parse_u8(base, flag_tok)? as u16;
                    if flags & 0xF0 == 0xF0 {
                        let hi = reloc_toks.next().ok_or_else(|| Error::Malformed("incomplete relocation".to_string()))?;
                        flags = (flags & 0x0F) | (parse_u8(base, hi)? as u16) << 4;
                    }
                    let offset = reloc_toks
                        .next()
                        .ok_or_else(|| Error::Malformed("incomplete relocation".to_string()))
                        .and_then(|t| parse_u8(base, t))? as usize;
                    if offset < addr_size as usize || offset >= data.len() {
                        return Err(Error::Malformed("relocation index out of bounds".to_string()));
                    }
                    let idx_lo = reloc_toks
                        .next()
                        .ok_or_else(|| Error::Malformed("incomplete relocation".to_string()))
                        .and_then(|t| parse_u8(base, t))?;
                    let idx_hi = reloc_toks
                        .next()
                        .ok_or_else(|| Error::Malformed("incomplete relocation".to_string()))
                        .and_then(|t| parse_u8(base, t))?;
                    let idx = idx_lo as u16 | (idx_hi as u16) << 8;

                    if flags & (RELOC_ZPAGE | RELOC_NPAGE) != 0 {
                        return Err(Error::Malformed("paging flags are not supported".to_string()));
                    }

                    let mut kind = if flags & RELOC_SIZE != 0 { PatchKind::Byte } else { PatchKind::Word };
                    let nb_base_bytes = if kind == PatchKind::Byte { addr_size } else { 2 };
                    if data.len() - offset < nb_base_bytes as usize {
                        return Err(Error::Malformed("reloc would patch out of bounds".to_string()));
                    }
                    let mut base_value: u32 = 0;
                    for i in 0..nb_base_bytes {
                        base_value |= (data[offset + i as usize] as u32) << (8 * i as u32);
                    }

                    let mut rpn = Vec::new();
                    if flags & RELOC_ISSYM != 0 {
                        let idx = idx as usize;
                        let sym_name = {
                            let raw_name_id = sdcc_to_local.get(idx).copied().ok_or_else(|| Error::Malformed("reloc symbol index out of range".to_string()))?;
                            symbols.get(raw_name_id).map(|s| s.name.clone()).unwrap_or_default()
                        };
                        if let Some(referenced) = sym_name.strip_prefix("b_") {
                            let target_idx = sdcc_to_local
                                .iter()
                                .position(|&id| symbols.get(id).map(|s| s.name.as_str()) == Some(referenced))
                                .ok_or_else(|| Error::Malformed(format!("\"{sym_name}\" is missing a reference to \"{referenced}\"")))?;
                            let local_id = sdcc_to_local[target_idx];
                            rpn.push(RpnOp::BankSym as u8);
                            rpn.extend_from_slice(&local_id.to_le_bytes());
                        } else if let Some(sect_name) = sym_name.strip_prefix("l_") {
                            rpn.push(RpnOp::SizeofSect as u8);
                            rpn.extend_from_slice(sect_name.as_bytes());
                            rpn.push(0);
                        } else if let Some(sect_name) = sym_name.strip_prefix("s_") {
                            rpn.push(RpnOp::StartofSect as u8);
                            rpn.extend_from_slice(sect_name.as_bytes());
                            rpn.push(0);
                        } else {
                            let local_id = sdcc_to_local.get(idx).copied().unwrap_or(0);
                            rpn.push(RpnOp::Sym as u8);
                            rpn.extend_from_slice(&local_id.to_le_bytes());
                        }
                    } else {
                        let idx = idx as usize;
                        let target = area_names.get(idx).ok_or_else(|| Error::Malformed("reloc area index out of range".to_string()))?;
                        if let Some(other) = areas.get(idx) {
                            if other.is_address_fixed {
                                base_value = base_value.wrapping_sub(other.org as u32);
                            }
                            base_value = base_value.wrapping_add(other.data.len() as u32);
                        }
                        rpn.push(RpnOp::StartofSect as u8);
                        rpn.extend_from_slice(target.as_bytes());
                        rpn.push(0);
                    }
                    rpn.push(RpnOp::Const as u8);
                    rpn.extend_from_slice(&base_value.to_le_bytes());
                    rpn.push(RpnOp::Add as u8);

                    if kind == PatchKind::Byte {
                        if flags & RELOC_EXPR16 != 0 {
                            let copy_len = offset - written_ofs as usize + 1;
                            area.data.resize((area.write_index as usize + copy_len).max(area.data.len()), 0);
                            area.data[area.write_index as usize..area.write_index as usize + copy_len]
                                .copy_from_slice(&data[written_ofs as usize..written_ofs as usize + copy_len]);
                            area.write_index += copy_len as u16;
                            written_ofs = (offset + 3) as u8;
                        }
                        if flags & RELOC_ISPCREL != 0 {
                            kind = PatchKind::Jr;
                        } else if flags & RELOC_EXPR24 != 0 && flags & RELOC_BANKBYTE != 0 {
                            rpn.push(RpnOp::Const as u8);
                            rpn.extend_from_slice(&16u32.to_le_bytes());
                            rpn.push(if flags & RELOC_SIGNED != 0 { RpnOp::Shr } else { RpnOp::Ushr } as u8);
                        } else {
                            if flags & RELOC_EXPR16 != 0 && flags & RELOC_WHICHBYTE != 0 {
                                rpn.push(RpnOp::Const as u8);
                                rpn.extend_from_slice(&8u32.to_le_bytes());
                                rpn.push(if flags & RELOC_SIGNED != 0 { RpnOp::Shr } else { RpnOp::Ushr } as u8);
                            }
                            rpn.push(RpnOp::Const as u8);
                            rpn.extend_from_slice(&0xFFu32.to_le_bytes());
                            rpn.push(RpnOp::And as u8);
                        }
                    } else if flags & RELOC_ISPCREL != 0 {
                        return Err(Error::Malformed("16-bit PC-relative relocations are not supported".to_string()));
                    } else if flags & (RELOC_EXPR16 | RELOC_EXPR24) != 0 {
                        return Err(Error::Malformed("those flags are not supported for 16-bit relocs".to_string()));
                    }

                    let patch_offset = (offset as u32) - written_ofs as u32 + area.write_index as u32;
                    area.patches.push(PendingPatch {
                        offset: patch_offset,
                        pc_offset: patch_offset.wrapping_sub(1),
                        rpn,
                        kind,
                    });
                }

                if written_ofs as usize != data.len() {
                    let remaining = data.len() - written_ofs as usize;
                    let start = area.write_index as usize;
                    area.data.resize((start + remaining).max(area.data.len()), 0);
                    area.data[start..start + remaining].copy_from_slice(&data[written_ofs as usize..]);
                    area.write_index += remaining as u16;
                }
            }
            _ => {}
        }
    }

    for area in areas {
        if let Some(sect) = sections.get_mut(area.section_id) {
            if sect.ty.has_data() {
                sect.data = area.data;
                sect.size = sect.size.max(sect.data.len() as u16);
                for patch in area.patches {
                    sect.add_patch(patch.kind, patch.offset, Some(area.section_id), patch.pc_offset, patch.rpn, 0, Some(Rc::clone(&node)));
                }
            }
        }
    }

    Ok(ObjectFile { nodes: vec![node], symbols, sections })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fstack::FileStackNode;

    #[test]
    fn reads_minimal_object_with_one_absolute_area_and_no_relocs() {
        let text = "\
XL3
H 1 areas 1 global symbols
A CODE size 4 flags 8 addr 0
S _main Def00000000
T 00 00 DE AD BE EF
R 00 00 00 00
";
        let node = FileStackNode::root_file("test.rel");
        let obj = read(node, text).unwrap();
        assert_eq!(obj.sections.sections.len(), 1);
        assert_eq!(obj.sections.sections[0].data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(obj.symbols.find_exact("_main").is_some());
    }

    #[test]
    fn rejects_big_endian_objects() {
        let node = FileStackNode::root_file("test.rel");
        assert!(read(node, "XH3\n").is_err());
    }
}
