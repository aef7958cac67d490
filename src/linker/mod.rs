//! Link orchestration (§4.9 "Linking", §6 "Linker CLI").
//!
//! [`link`] merges every input object file's sections into one shared
//! [`SectionTable`] (renumbering each patch's `pc_section` as sections are
//! adopted - see [`crate::section::SectionTable::adopt_section`]), resolves
//! `Import` symbols by name against a `global_symbols` table built from every
//! object's exported definitions, places sections (`placement`), resolves
//! patches and checks assertions (`patch`) against the merged result, and
//! finally lays the patched section data out into a ROM image.
//!
//! Each object's patches are always replayed against *that object's own*
//! reconstructed symbol table - `SYM`/`BANK_SYM` RPN operands embed raw ids
//! into the object file they came from, and those ids are only meaningful
//! relative to that file (§4.9). Only symbol *names* cross the object
//! boundary, through `global_symbols`.

pub mod output;
pub mod patch;
pub mod placement;
pub mod script;

use crate::diagnostics::DiagnosticSink;
use crate::object::reader::ObjectFile;
use crate::options::LinkerOptions;
use crate::section::{SectionTable, SectionType};
use crate::symbol::{SymbolKind, SymbolTable};
use std::collections::HashMap;

/// The finished product of one link: the ROM bytes plus the merged tables a
/// caller needs to emit a symbol/map file (`output`).
pub struct LinkResult {
    pub rom: Vec<u8>,
    pub sections: SectionTable,
    pub symbols: SymbolTable,
}

/// Links a set of already-parsed object files into one ROM image. Returns a
/// result even when diagnostics were recorded - `rom` is empty if linking
/// couldn't complete; callers should check `diagnostics.error_count` (§7).
///
/// `linker_script`, if given, is applied after every object's sections are
/// adopted into the shared table and before the ordinary bin-packer runs
/// (§4.7, §6 "Linker script") - a script-pinned section is simply a fully
/// bank+org-constrained one by the time placement sees it.
pub fn link(
    objects: &[ObjectFile],
    options: &LinkerOptions,
    linker_script: Option<&script::LinkerScript>,
    diagnostics: &mut DiagnosticSink,
) -> LinkResult {
    #[cfg(feature = "log")]
    log::debug!("linking {} object file(s)", objects.len());

    let mut sections = SectionTable::new();
    let mut global_symbols = SymbolTable::new();
    let mut object_section_ids: Vec<Vec<u32>> = Vec::with_capacity(objects.len());

    for object in objects {
        let mut id_map: HashMap<u32, u32> = HashMap::new();
        for (local_id, section) in object.sections.sections.iter().enumerate() {
            match sections.adopt_section(section.clone()) {
                Ok(new_id) => {
                    id_map.insert(local_id as u32, new_id);
                }
                Err(message) => diagnostics.error(message, section.node.as_ref()),
            }
        }
        remap_pc_sections(&mut sections, &id_map);
        object_section_ids.push(id_map.values().copied().collect());

        for (_, symbol) in object.symbols.iter() {
            if !symbol.is_exported() {
                continue;
            }
            match &symbol.kind {
                SymbolKind::Label { section, offset } => {
                    let merged_section = id_map.get(section).copied().unwrap_or(*section);
                    if let Err(message) = global_symbols.add_label(&symbol.name, merged_section, *offset, true) {
                        diagnostics.error(message, symbol.node.as_ref());
                    }
                }
                SymbolKind::Equ(value) => {
                    if let Err(message) = global_symbols.add_equ(&symbol.name, *value) {
                        diagnostics.error(message, symbol.node.as_ref());
                    } else if let Err(message) = global_symbols.export(&symbol.name) {
                        diagnostics.error(message, symbol.node.as_ref());
                    }
                }
                _ => {}
            }
        }
    }

    for object in objects {
        for (_, symbol) in object.symbols.iter() {
            if matches!(symbol.kind, SymbolKind::Ref) && global_symbols.find_exact(&symbol.name).is_none() {
                diagnostics.error(format!("Undefined symbol \"{}\"", symbol.name), symbol.node.as_ref());
            }
        }
    }

    if diagnostics.error_count > 0 {
        return LinkResult { rom: Vec::new(), sections, symbols: global_symbols };
    }

    if let Some(script) = linker_script {
        let placed = script.apply(&mut sections, diagnostics);
        #[cfg(feature = "log")]
        log::debug!("linker script pinned {} section(s): {placed:?}", placed.len());
        #[cfg(not(feature = "log"))]
        let _ = placed;
    }

    placement::assign_sections(&mut sections, options, diagnostics);
    if diagnostics.error_count > 0 {
        return LinkResult { rom: Vec::new(), sections, symbols: global_symbols };
    }

    for (object, ids) in objects.iter().zip(&object_section_ids) {
        patch::apply_patches(&mut sections, ids, &object.symbols, &global_symbols, diagnostics);
        patch::check_assertions(&sections, ids, &object.symbols, &global_symbols, diagnostics);
    }

    #[cfg(feature = "log")]
    log::debug!("applied patches for {} object file(s), {} error(s) so far", objects.len(), diagnostics.error_count);

    let rom = emit_rom(&sections, options);
    LinkResult { rom, sections, symbols: global_symbols }
}

/// Rewrites every just-adopted section's patches' `pc_section` from "index
/// into the object that produced them" to "index into the shared table" -
/// `adopt_section` only renumbers the section itself, not the patches
/// embedded inside it (§4.9).
fn remap_pc_sections(sections: &mut SectionTable, id_map: &HashMap<u32, u32>) {
    for &new_id in id_map.values() {
        let Some(section) = sections.get_mut(new_id) else { continue };
        for patch in &mut section.patches {
            if let Some(old) = patch.pc_section {
                if let Some(&mapped) = id_map.get(&old) {
                    patch.pc_section = Some(mapped);
                }
            }
        }
        for assertion in &mut section.assertions {
            if let Some(old) = assertion.patch.pc_section {
                if let Some(&mapped) = id_map.get(&old) {
                    assertion.patch.pc_section = Some(mapped);
                }
            }
        }
    }
}

/// Lays every ROM0/ROMX section's (already patched) bytes into one flat ROM
/// image at their placed address, the standard "bank N lives at file offset
/// N * 0x4000" layout (§4.7, §4.12).
fn emit_rom(sections: &SectionTable, options: &LinkerOptions) -> Vec<u8> {
    let mut max_bank: u32 = if options.tiny_rom0 { 1 } else { 0 };
    for section in sections.iter() {
        if section.ty == SectionType::Romx {
            if let Some(bank) = section.bank {
                max_bank = max_bank.max(bank);
            }
        }
    }

    let pad = if options.no_padding { 0 } else { options.pad_byte };
    let mut rom = vec![pad; (max_bank as usize + 1) * 0x4000];

    for section in sections.iter() {
        if !section.ty.has_data() {
            continue;
        }
        let Some(org) = section.org else { continue };
        let file_offset = match section.ty {
            SectionType::Rom0 => org as usize,
            SectionType::Romx => section.bank.unwrap_or(1) as usize * 0x4000 + (org as usize - 0x4000),
            _ => continue,
        };
        let end = file_offset + section.data.len();
        if end <= rom.len() {
            rom[file_offset..end].copy_from_slice(&section.data);
        }
    }

    rom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::writer;
    use crate::section::{Modifier, SectionType as Ty};

    fn build_object(f: impl FnOnce(&mut SymbolTable, &mut SectionTable)) -> ObjectFile {
        let mut symbols = SymbolTable::new();
        let mut sections = SectionTable::new();
        f(&mut symbols, &mut sections);
        let buf = writer::write(&symbols, &sections);
        crate::object::reader::read(&buf).unwrap()
    }

    #[test]
    fn links_single_object_with_no_references() {
        let object = build_object(|_symbols, sections| {
            let id = sections.create("CODE", Ty::Rom0, Some(0x150), None, 0, 0, Modifier::Normal).unwrap();
            sections.get_mut(id).unwrap().emit_bytes(&[0x00, 0xC9]).unwrap();
        });

        let mut diags = DiagnosticSink::new(0);
        let result = link(&[object], &LinkerOptions::new(), None, &mut diags);
        assert_eq!(diags.error_count, 0);
        assert_eq!(&result.rom[0x150..0x152], &[0x00, 0xC9]);
    }

    #[test]
    fn resolves_cross_object_label_reference() {
        let provider = build_object(|symbols, sections| {
            let id = sections.create("A", Ty::Rom0, Some(0x100), None, 0, 0, Modifier::Normal).unwrap();
            sections.get_mut(id).unwrap().emit_bytes(&[0]).unwrap();
            symbols.add_label("Target", id, 0, true).unwrap();
        });
        let consumer = build_object(|symbols, sections| {
            let id = sections.create("B", Ty::Rom0, Some(0x200), None, 0, 0, Modifier::Normal).unwrap();
            sections.get_mut(id).unwrap().emit_bytes(&[0, 0]).unwrap();
            let sym_id = symbols.ref_scoped("Target");
            let mut rpn = vec![crate::rpn::RpnOp::Sym as u8];
            rpn.extend_from_slice(&sym_id.to_le_bytes());
            sections.get_mut(id).unwrap().add_patch(crate::section::PatchKind::Word, 0, Some(id), 0, rpn, 0, None);
        });

        let mut diags = DiagnosticSink::new(0);
        let result = link(&[provider, consumer], &LinkerOptions::new(), None, &mut diags);
        assert_eq!(diags.error_count, 0);
        assert_eq!(u16::from_le_bytes([result.rom[0x200], result.rom[0x201]]), 0x100);
    }

    #[test]
    fn unresolved_import_is_a_link_error() {
        let lone = build_object(|symbols, sections| {
            let id = sections.create("B", Ty::Rom0, Some(0x200), None, 0, 0, Modifier::Normal).unwrap();
            sections.get_mut(id).unwrap().emit_bytes(&[0, 0]).unwrap();
            symbols.ref_scoped("Nowhere");
        });

        let mut diags = DiagnosticSink::new(0);
        let result = link(&[lone], &LinkerOptions::new(), None, &mut diags);
        assert!(diags.error_count > 0);
        assert!(result.rom.is_empty());
    }
}
