//! Object file writer (§4.9, §6).
//!
//! Builds the on-disk byte layout directly into a growable `Vec<u8>`, the
//! same "extend_from_slice as you go" style `rpn::Expr` uses for its RPN
//! buffer - `scroll`'s `Pwrite` shines for fixed-layout structs read back
//! through a cursor (see `reader`), but a monotonically-growing variable
//! format is simplest built by hand.

use crate::fstack::{self, FileStackNode, NodeKind, Payload};
use crate::object::{SymbolFileKind, MAGIC, REVISION};
use crate::section::{AssertKind, Patch, Section, SectionTable};
use crate::symbol::{Symbol, SymbolKind, SymbolTable};
use std::rc::Rc;

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

fn node_id_of(node: &Option<Rc<FileStackNode>>, ids: &std::collections::HashMap<*const FileStackNode, u32>) -> u32 {
    match node {
        Some(n) => *ids.get(&Rc::as_ptr(n)).unwrap_or(&0),
        None => 0,
    }
}

fn write_node(buf: &mut Vec<u8>, node: &FileStackNode, ids: &std::collections::HashMap<*const FileStackNode, u32>) {
    let parent_id = match &node.parent {
        Some(p) => *ids.get(&Rc::as_ptr(p)).unwrap_or(&u32::MAX),
        None => u32::MAX,
    };
    push_u32(buf, parent_id);
    push_u32(buf, node.line_no);
    let type_byte: u8 = match node.kind {
        NodeKind::Rept => 0,
        NodeKind::File => 1,
        NodeKind::Macro => 2,
    };
    buf.push(type_byte);
    match &node.payload {
        Payload::Name(name) => push_cstr(buf, name),
        Payload::IterCounts(counts) => {
            push_u32(buf, counts.len() as u32);
            for c in counts {
                push_u32(buf, *c);
            }
        }
    }
}

fn write_symbol(buf: &mut Vec<u8>, sym: &Symbol, ids: &std::collections::HashMap<*const FileStackNode, u32>) {
    push_cstr(buf, &sym.name);
    let (kind_byte, section_id, value): (u8, i32, i32) = match &sym.kind {
        SymbolKind::Ref => (SymbolFileKind::Import as u8, -1, 0),
        SymbolKind::Equ(v) => {
            (if sym.exported { SymbolFileKind::Export as u8 } else { SymbolFileKind::Local as u8 }, -1, *v)
        }
        SymbolKind::Label { section, offset } => (
            if sym.exported { SymbolFileKind::Export as u8 } else { SymbolFileKind::Local as u8 },
            *section as i32,
            *offset as i32,
        ),
        _ => unreachable!("non-object-file symbol kind filtered out before writing"),
    };
    buf.push(kind_byte);
    if kind_byte != SymbolFileKind::Import as u8 {
        push_u32(buf, node_id_of(&sym.node, ids));
        push_u32(buf, sym.line_no);
        push_i32(buf, section_id);
        push_i32(buf, value);
    }
}

fn write_patch(
    buf: &mut Vec<u8>,
    patch: &Patch,
    ids: &std::collections::HashMap<*const FileStackNode, u32>,
    symbol_ids: &std::collections::HashMap<u32, u32>,
) {
    push_u32(buf, node_id_of(&patch.node, ids));
    push_u32(buf, patch.line_no);
    push_u32(buf, patch.offset);
    push_u32(buf, patch.pc_section.unwrap_or(u32::MAX));
    push_u32(buf, patch.pc_offset);
    buf.push(patch.kind as u8);
    let rpn = remap_symbol_ids(&patch.rpn, symbol_ids);
    push_u32(buf, rpn.len() as u32);
    buf.extend_from_slice(&rpn);
}

/// Rewrites every `SYM`/`BANK_SYM` operand in an RPN byte stream from "index
/// into the whole assembly-time `SymbolTable` (builtins included)" to "index
/// into the object file's own serialized symbol list" - the same index space
/// `object::reader`/the linker's patch resolver reconstruct on the other end
/// (mirrors the original's `fileSymbols` array being exactly what's on disk).
fn remap_symbol_ids(rpn: &[u8], symbol_ids: &std::collections::HashMap<u32, u32>) -> Vec<u8> {
    use crate::rpn::RpnOp;
    let mut out = Vec::with_capacity(rpn.len());
    let mut i = 0;
    while i < rpn.len() {
        let op_byte = rpn[i];
        out.push(op_byte);
        i += 1;
        let op = match RpnOp::from_u8(op_byte) {
            Some(op) => op,
            None => continue,
        };
        match op {
            RpnOp::Const => {
                out.extend_from_slice(&rpn[i..i + 4]);
                i += 4;
            }
            RpnOp::Sym | RpnOp::BankSym => {
                let old_id = u32::from_le_bytes(rpn[i..i + 4].try_into().unwrap());
                let new_id = symbol_ids.get(&old_id).copied().unwrap_or(old_id);
                out.extend_from_slice(&new_id.to_le_bytes());
                i += 4;
            }
            RpnOp::BankSect | RpnOp::SizeofSect | RpnOp::StartofSect => {
                let start = i;
                while rpn[i] != 0 {
                    i += 1;
                }
                out.extend_from_slice(&rpn[start..=i]);
                i += 1;
            }
            RpnOp::SizeofSectType | RpnOp::StartofSectType | RpnOp::BitIndex => {
                out.push(rpn[i]);
                i += 1;
            }
            _ => {}
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn write_section(
    buf: &mut Vec<u8>,
    section: &Section,
    ids: &std::collections::HashMap<*const FileStackNode, u32>,
    symbol_ids: &std::collections::HashMap<u32, u32>,
) {
    push_cstr(buf, &section.name);
    push_u32(buf, node_id_of(&section.node, ids));
    push_u32(buf, section.line_no);
    push_u32(buf, section.size as u32);
    let mut type_byte = section.ty as u8 & 0x3F;
    if section.modifier == crate::section::Modifier::Union {
        type_byte |= 0x80;
    } else if section.modifier == crate::section::Modifier::Fragment {
        type_byte |= 0x40;
    }
    buf.push(type_byte);
    push_u32(buf, section.org.map(u32::from).unwrap_or(u32::MAX));
    push_u32(buf, section.bank.unwrap_or(u32::MAX));
    buf.push(section.align_bits);
    push_u32(buf, section.align_ofs as u32);
    if section.ty.has_data() {
        buf.extend_from_slice(&section.data);
        push_u32(buf, section.patches.len() as u32);
        for patch in &section.patches {
            write_patch(buf, patch, ids, symbol_ids);
        }
    }
}

/// Collects every `FileStackNode` reachable from symbols/sections/patches
/// and assigns the id each reference will use (§6 "Nodes (written in
/// reverse so the root is last)").
fn collect_node_ids(symbols: &SymbolTable, sections: &SectionTable) -> (Vec<Rc<FileStackNode>>, std::collections::HashMap<*const FileStackNode, u32>) {
    let mut leaves = Vec::new();
    for (_, sym) in symbols.iter() {
        if let Some(node) = &sym.node {
            leaves.push(Rc::clone(node));
        }
    }
    for section in sections.iter() {
        if let Some(node) = &section.node {
            leaves.push(Rc::clone(node));
        }
        for patch in &section.patches {
            if let Some(node) = &patch.node {
                leaves.push(Rc::clone(node));
            }
        }
        for assertion in &section.assertions {
            if let Some(node) = &assertion.patch.node {
                leaves.push(Rc::clone(node));
            }
        }
    }
    let ordered = fstack::register_nodes(&leaves);
    let mut ids = std::collections::HashMap::new();
    for node in &ordered {
        ids.insert(Rc::as_ptr(node), node.id.get().expect("register_nodes assigns every id"));
    }
    (ordered, ids)
}

fn is_object_symbol(kind: &SymbolKind) -> bool {
    matches!(kind, SymbolKind::Equ(_) | SymbolKind::Label { .. } | SymbolKind::Ref)
}

/// Serializes `symbols`/`sections` into the on-disk object file format.
pub fn write(symbols: &SymbolTable, sections: &SectionTable) -> Vec<u8> {
    let object_symbols: Vec<(u32, &Symbol)> = symbols.iter().filter(|(_, s)| is_object_symbol(&s.kind)).collect();
    let symbol_ids: std::collections::HashMap<u32, u32> =
        object_symbols.iter().enumerate().map(|(new_id, (old_id, _))| (*old_id, new_id as u32)).collect();
    let (nodes, ids) = collect_node_ids(symbols, sections);

    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    push_u32(&mut buf, REVISION);
    push_u32(&mut buf, object_symbols.len() as u32);
    push_u32(&mut buf, sections.sections.len() as u32);
    push_u32(&mut buf, nodes.len() as u32);

    for node in &nodes {
        write_node(&mut buf, node, &ids);
    }
    for (_, sym) in &object_symbols {
        write_symbol(&mut buf, sym, &ids);
    }
    for section in sections.iter() {
        write_section(&mut buf, section, &ids, &symbol_ids);
    }

    let assertions: Vec<&crate::section::Assertion> = sections.iter().flat_map(|s| s.assertions.iter()).collect();
    push_u32(&mut buf, assertions.len() as u32);
    for assertion in assertions {
        write_patch(&mut buf, &assertion.patch, &ids, &symbol_ids);
        let severity_byte = match assertion.kind {
            AssertKind::Warn => 0u8,
            AssertKind::Error => 1,
            AssertKind::Fatal => 2,
        };
        // Patch type already written by write_patch; the severity rides
        // along in the message-prefixed byte per §6 ("patchType encodes
        // severity" - the assertion's own severity byte follows its patch).
        buf.push(severity_byte);
        push_cstr(&mut buf, &assertion.message);
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionTable;
    use crate::symbol::SymbolTable;

    #[test]
    fn writes_magic_and_counts() {
        let symbols = SymbolTable::new();
        let mut sections = SectionTable::new();
        sections.create_rom0("CODE").unwrap();
        let buf = write(&symbols, &sections);
        assert_eq!(&buf[0..4], MAGIC);
        let revision = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(revision, REVISION);
    }

    #[test]
    fn label_round_trips_through_section_and_offset() {
        let mut symbols = SymbolTable::new();
        let mut sections = SectionTable::new();
        let sid = sections.create_rom0("CODE").unwrap();
        symbols.add_label("Start", sid, 0, true).unwrap();
        let buf = write(&symbols, &sections);
        assert!(buf.len() > 13);
    }
}
