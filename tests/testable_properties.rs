//! Testable properties (§8): invariants the data model and linker must
//! uphold regardless of which scenario exercises them.

use gbds::diagnostics::DiagnosticSink;
use gbds::fstack::{check_recursion_depth, FileStackNode};
use gbds::linker::link;
use gbds::object::{reader, writer};
use gbds::options::LinkerOptions;
use gbds::rpn::{Expr, RpnOp};
use gbds::section::{Modifier, PatchKind, SectionTable, SectionType};
use gbds::symbol::SymbolTable;

fn build_object(f: impl FnOnce(&mut SymbolTable, &mut SectionTable)) -> reader::ObjectFile {
    let mut symbols = SymbolTable::new();
    let mut sections = SectionTable::new();
    f(&mut symbols, &mut sections);
    let buf = writer::write(&symbols, &sections);
    reader::read(&buf).expect("round-trips through the object format")
}

/// Expression determinism: folding `X+3` at assembly time (both operands
/// known) agrees with deferring the same expression to link time (`X`
/// forward-declared, resolved through a patch) once the same value is known.
#[test]
fn assembly_time_and_link_time_folding_agree() {
    let mut symbols = SymbolTable::new();
    symbols.add_equ("X", 5).unwrap();
    let mut fold_diags = DiagnosticSink::new(0);
    let at_assembly_time =
        Expr::make_binary_op(RpnOp::Add, Expr::make_symbol(&mut symbols, "X"), Expr::known(3), &symbols, &mut fold_diags, None)
            .unwrap();
    assert_eq!(at_assembly_time.value(), Some(8));

    let object = build_object(|symbols, sections| {
        let id = sections.create_rom0("CODE").unwrap();
        sections.get_mut(id).unwrap().emit_bytes(&[0, 0]).unwrap();
        symbols.add_equ("X", 5).unwrap();
        symbols.export("X").unwrap();
        let x_id = symbols.ref_scoped("X");
        let mut rpn = vec![RpnOp::Sym as u8];
        rpn.extend_from_slice(&x_id.to_le_bytes());
        rpn.push(RpnOp::Const as u8);
        rpn.extend_from_slice(&3i32.to_le_bytes());
        rpn.push(RpnOp::Add as u8);
        sections.get_mut(id).unwrap().add_patch(PatchKind::Word, 0, Some(id), 0, rpn, 0, None);
    });
    let mut diags = DiagnosticSink::new(0);
    let result = link(&[object], &LinkerOptions::new(), None, &mut diags);
    assert_eq!(diags.error_count, 0);
    assert_eq!(u16::from_le_bytes([result.rom[0x0000], result.rom[0x0001]]), 8);
}

/// Section layout disjointness: no two placed sections' byte ranges overlap,
/// even when three compete for the same bank.
#[test]
fn placed_sections_never_overlap() {
    let mut sections = SectionTable::new();
    let ids: Vec<u32> = ["A", "B", "C"]
        .iter()
        .map(|name| {
            let id = sections.create_rom0(name).unwrap();
            sections.get_mut(id).unwrap().emit_bytes(&[0; 100]).unwrap();
            id
        })
        .collect();

    let mut diags = DiagnosticSink::new(0);
    gbds::linker::placement::assign_sections(&mut sections, &LinkerOptions::new(), &mut diags);
    assert_eq!(diags.error_count, 0);

    let mut spans: Vec<(u32, u32)> = ids
        .iter()
        .map(|&id| {
            let section = sections.get(id).unwrap();
            let org = section.org.unwrap() as u32;
            (org, org + section.size as u32)
        })
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "sections overlap: {:?}", pair);
    }
}

/// Constraint respect: a fixed-bank, fixed-org, fixed-alignment section is
/// placed exactly where it demands, never somewhere merely compatible.
#[test]
fn fixed_constraints_are_honored_exactly() {
    let mut sections = SectionTable::new();
    let id = sections.create("Fixed", SectionType::Romx, Some(0x4010), Some(3), 4, 0, Modifier::Normal).unwrap();
    sections.get_mut(id).unwrap().emit_bytes(&[0; 8]).unwrap();

    let mut diags = DiagnosticSink::new(0);
    gbds::linker::placement::assign_sections(&mut sections, &LinkerOptions::new(), &mut diags);
    assert_eq!(diags.error_count, 0);
    assert_eq!(sections.get(id).unwrap().org, Some(0x4010));
    assert_eq!(sections.get(id).unwrap().bank, Some(3));
}

/// Fragment continuity: pieces of a Fragment land back to back, each one
/// starting exactly where the previous piece's bytes end.
#[test]
fn fragment_pieces_are_contiguous_after_placement() {
    let mut sections = SectionTable::new();
    let head = sections.create_rom0("Frag").unwrap();
    sections.get_mut(head).unwrap().emit_bytes(&[0; 3]).unwrap();
    let tail = sections.create("Frag", SectionType::Rom0, None, None, 0, 0, Modifier::Fragment).unwrap();
    sections.get_mut(tail).unwrap().emit_bytes(&[0; 5]).unwrap();
    sections.finalize_union_or_fragment(head);

    let mut diags = DiagnosticSink::new(0);
    gbds::linker::placement::assign_sections(&mut sections, &LinkerOptions::new(), &mut diags);
    assert_eq!(diags.error_count, 0);

    let head_org = sections.get(head).unwrap().org.unwrap();
    let tail_org = sections.get(tail).unwrap().org.unwrap();
    assert_eq!(tail_org, head_org + 3);
}

/// Union bounds: a union's reported size is the largest member's size, and
/// every member is placed at the same address.
#[test]
fn union_size_is_the_largest_member() {
    let mut sections = SectionTable::new();
    let a = sections.create("U", SectionType::Hram, None, None, 0, 0, Modifier::Union).unwrap();
    sections.get_mut(a).unwrap().reserve(1, 0);
    let b = sections.create("U", SectionType::Hram, None, None, 0, 0, Modifier::Union).unwrap();
    sections.get_mut(b).unwrap().reserve(6, 0);
    sections.finalize_union_or_fragment(a);
    assert_eq!(sections.get(a).unwrap().size, 6);
    assert_eq!(sections.get(b).unwrap().size, 6);
}

/// Object round-trip: assembling (building tables), writing, and reading an
/// object file back reproduces the same sections/labels a direct link would
/// see, bytes included.
#[test]
fn object_round_trip_preserves_section_bytes_and_labels() {
    let mut symbols = SymbolTable::new();
    let mut sections = SectionTable::new();
    let id = sections.create_rom0("CODE").unwrap();
    sections.get_mut(id).unwrap().emit_bytes(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    symbols.add_label("Entry", id, 2, true).unwrap();

    let buf = writer::write(&symbols, &sections);
    let parsed = reader::read(&buf).unwrap();

    assert_eq!(parsed.sections.sections[0].data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    let entry = parsed.symbols.find_exact("Entry").unwrap();
    assert_eq!(entry.label_offset(), Some(2));
    assert!(entry.is_exported());
}

/// Scope qualification: a local label defined after a global one is stored
/// fully qualified, and stays resolvable by its bare local spelling as long
/// as the same global scope is active.
#[test]
fn local_labels_stay_resolvable_within_their_scope() {
    let mut symbols = SymbolTable::new();
    symbols.add_label("Outer", 0, 0, false).unwrap();
    symbols.add_local_label(".inner", 0, 2).unwrap();
    assert!(symbols.find_scoped(".inner").is_some());
    assert_eq!(symbols.find_scoped(".inner").unwrap().name, "Outer.inner");

    symbols.add_label("NextOuter", 0, 10, false).unwrap();
    assert!(symbols.find_scoped(".inner").is_none(), "scope moved on to NextOuter");
}

/// Purge correctness: referencing a purged symbol by name reports "was
/// purged" rather than silently resolving, and the symbol no longer appears
/// in a plain lookup.
#[test]
fn purged_symbol_reports_was_purged_not_undefined() {
    let mut symbols = SymbolTable::new();
    symbols.add_equ("Temp", 1).unwrap();
    symbols.purge("Temp").unwrap();
    assert!(symbols.find_exact("Temp").is_none());
    assert!(symbols.was_purged("Temp"));

    let expr = Expr::make_symbol(&mut symbols, "Temp");
    match expr {
        Expr::Unknown { reason, .. } => assert!(reason.contains("purged"), "reason was: {reason}"),
        Expr::Known(_) => panic!("a purged symbol must not fold to a known value"),
    }
}

/// Recursion cap: N nested file-stack levels succeed, N+1 is rejected.
#[test]
fn recursion_cap_admits_n_and_rejects_n_plus_one() {
    const MAX: u32 = 8;
    let mut node = FileStackNode::root_file("main.asm");
    for i in 0..MAX {
        node = FileStackNode::push_file(&node, i, "inc.asm");
    }
    assert!(check_recursion_depth(&node, MAX).is_ok());

    let one_too_many = FileStackNode::push_file(&node, MAX, "inc.asm");
    assert!(check_recursion_depth(&one_too_many, MAX).is_err());
}

/// `jr` range: a target within [-128, 127] bytes of the instruction's end
/// patches cleanly; one byte further out is reported as a link error.
#[test]
fn jr_out_of_range_is_a_link_error_not_a_silent_wrap() {
    let provider = build_object(|symbols, sections| {
        // ROM0 is only 0x4000 bytes; place the far target at a safe, valid
        // ROM0 address comfortably past any `jr` range from 0x100.
        let target_section = sections.create("Far", SectionType::Rom0, Some(0x300), None, 0, 0, Modifier::Normal).unwrap();
        symbols.add_label("Target", target_section, 0, true).unwrap();
    });
    let consumer = build_object(|symbols, sections| {
        let id = sections.create("Jumper", SectionType::Rom0, Some(0x100), None, 0, 0, Modifier::Normal).unwrap();
        sections.get_mut(id).unwrap().emit_bytes(&[0x18, 0x00]).unwrap();
        let sym_id = symbols.ref_scoped("Target");
        let mut rpn = vec![RpnOp::Sym as u8];
        rpn.extend_from_slice(&sym_id.to_le_bytes());
        sections.get_mut(id).unwrap().add_patch(PatchKind::Jr, 1, Some(id), 0, rpn, 0, None);
    });

    let mut diags = DiagnosticSink::new(0);
    let result = link(&[provider, consumer], &LinkerOptions::new(), None, &mut diags);
    // 0x300 - (0x100 + 2) = 0x1FE, far outside [-128, 127].
    assert!(diags.error_count > 0);
    let _ = result;
}
