//! `-s F=FILE` state dump writer (`[ADD]`, §6 "Assembler CLI", §6 "State dump
//! format").
//!
//! The dump is plain assembly text, re-parseable by a front end that
//! re-assembles with it pre-included: `def NAME equ $hex` / `def NAME = $hex`
//! / `def NAME equs "..."` for constants, variables and string-equates,
//! `newcharmap`/`charmap` pairs for every user-declared charmap, and
//! `macro NAME ... endm` blocks. Which categories are emitted is controlled
//! by [`StateDumpFeatures`], mirroring the CLI's `F ⊆ {EQU, VAR, EQUS,
//! CHARMAP, MACRO}` feature set - this crate doesn't parse that flag syntax
//! itself (§1), so a front end builds the struct directly.
//!
//! Macro bodies aren't owned by [`crate::symbol::SymbolTable`] (a `Macro`
//! symbol only keeps a `(node, start, len)` view into a buffer the lexer
//! owns, §3 "Symbol" - Macro), so this writer takes the already-resolved
//! source text for each macro name as an explicit map rather than reaching
//! into lexer internals it has no access to.

use crate::charmap::CharmapTable;
use crate::symbol::{SymbolKind, SymbolTable};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Which `-s` feature letters to include, per §6's `F ⊆ {EQU, VAR, EQUS,
/// CHARMAP, MACRO}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateDumpFeatures {
    pub equ: bool,
    pub var: bool,
    pub equs: bool,
    pub charmap: bool,
    pub macros: bool,
}

impl StateDumpFeatures {
    pub fn all() -> Self {
        StateDumpFeatures { equ: true, var: true, equs: true, charmap: true, macros: true }
    }
}

/// Escapes a `"..."` string-literal body the way the assembler's own string
/// lexing would need to re-read it (backslash and double-quote only - the
/// format isn't trying to round-trip every lexer escape, just the two
/// characters that would otherwise terminate or corrupt the literal).
fn escape_string_body(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    out
}

/// `sym_StateDump`-equivalent: renders the requested feature categories as
/// re-parseable assembly text, each category sorted by name for a
/// deterministic dump.
pub fn write_state_dump(
    features: StateDumpFeatures,
    symbols: &SymbolTable,
    charmaps: &CharmapTable,
    macro_bodies: &HashMap<String, String>,
) -> String {
    #[cfg(feature = "log")]
    log::debug!("writing state dump ({features:?})");

    let mut out = String::new();

    if features.equ {
        let mut equs: Vec<(&str, i32)> = symbols
            .iter()
            .filter_map(|(_, s)| match s.kind {
                SymbolKind::Equ(v) => Some((s.name.as_str(), v)),
                _ => None,
            })
            .collect();
        equs.sort_by_key(|&(name, _)| name);
        for (name, value) in equs {
            writeln!(out, "def {name} equ ${value:X}").unwrap();
        }
    }

    if features.var {
        let mut vars: Vec<(&str, i32)> = symbols
            .iter()
            .filter_map(|(_, s)| match s.kind {
                SymbolKind::Var(v) => Some((s.name.as_str(), v)),
                _ => None,
            })
            .collect();
        vars.sort_by_key(|&(name, _)| name);
        for (name, value) in vars {
            writeln!(out, "def {name} = ${value:X}").unwrap();
        }
    }

    if features.equs {
        let mut strings: Vec<(&str, &str)> = symbols
            .iter()
            .filter_map(|(_, s)| match &s.kind {
                SymbolKind::StringEqu(v) => Some((s.name.as_str(), v.as_ref())),
                _ => None,
            })
            .collect();
        strings.sort_by_key(|&(name, _)| name);
        for (name, value) in strings {
            writeln!(out, "def {name} equs \"{}\"", escape_string_body(value)).unwrap();
        }
    }

    if features.charmap {
        let mut maps: Vec<(&str, std::cell::Ref<'_, crate::charmap::Charmap>)> = charmaps.iter().collect();
        maps.sort_by(|a, b| a.0.cmp(b.0));
        for (name, map) in maps {
            writeln!(out, "newcharmap {name}").unwrap();
            let mut entries: Vec<(&str, &[u8])> = map.entries().collect();
            entries.sort_by_key(|&(key, _)| key);
            for (key, bytes) in entries {
                let hex: Vec<String> = bytes.iter().map(|b| format!("${b:02X}")).collect();
                writeln!(out, "charmap \"{}\", {}", escape_string_body(key), hex.join(", ")).unwrap();
            }
        }
    }

    if features.macros {
        let mut macros: Vec<&str> = symbols
            .iter()
            .filter_map(|(_, s)| matches!(s.kind, SymbolKind::Macro { .. }).then_some(s.name.as_str()))
            .collect();
        macros.sort_unstable();
        for name in macros {
            if let Some(body) = macro_bodies.get(name) {
                writeln!(out, "macro {name}").unwrap();
                out.push_str(body);
                if !body.ends_with('\n') {
                    out.push('\n');
                }
                writeln!(out, "endm").unwrap();
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    #[test]
    fn dumps_equ_var_and_equs_sorted_by_name() {
        let mut symbols = SymbolTable::new();
        symbols.add_equ("B_CONST", 2).unwrap();
        symbols.add_equ("A_CONST", 1).unwrap();
        symbols.add_var("COUNTER", 0).unwrap();
        symbols.add_string("GREETING", "hi \"there\"").unwrap();

        let text = write_state_dump(StateDumpFeatures::all(), &symbols, &CharmapTable::new(), &HashMap::new());
        let a_line = text.find("def A_CONST equ $1").unwrap();
        let b_line = text.find("def B_CONST equ $2").unwrap();
        assert!(a_line < b_line);
        assert!(text.contains("def COUNTER = $0"));
        assert!(text.contains("def GREETING equs \"hi \\\"there\\\"\""));
    }

    #[test]
    fn dumps_user_charmaps_but_not_the_implicit_main_one() {
        let mut charmaps = CharmapTable::new();
        charmaps.new_charmap("game", None).unwrap();
        charmaps.add("<A>", vec![0x10]);

        let text = write_state_dump(StateDumpFeatures::all(), &SymbolTable::new(), &charmaps, &HashMap::new());
        assert!(text.contains("newcharmap game"));
        assert!(text.contains("charmap \"<A>\", $10"));
        assert!(!text.contains("newcharmap main"));
    }

    #[test]
    fn omits_category_when_feature_flag_is_off() {
        let mut symbols = SymbolTable::new();
        symbols.add_equ("X", 1).unwrap();
        symbols.add_var("Y", 2).unwrap();

        let features = StateDumpFeatures { equ: true, var: false, equs: false, charmap: false, macros: false };
        let text = write_state_dump(features, &symbols, &CharmapTable::new(), &HashMap::new());
        assert!(text.contains("def X equ"));
        assert!(!text.contains("Y"));
    }

    #[test]
    fn dumps_macro_body_when_provided() {
        let mut symbols = SymbolTable::new();
        symbols.add_macro("swap", None, 0, 0).unwrap();
        let mut bodies = HashMap::new();
        bodies.insert("swap".to_string(), "  ld a, \\1\n  ld \\1, \\2\n  ld \\2, a".to_string());

        let text = write_state_dump(StateDumpFeatures::all(), &symbols, &CharmapTable::new(), &bodies);
        assert!(text.contains("macro swap\n"));
        assert!(text.contains("ld a, \\1"));
        assert!(text.contains("\nendm\n"));
    }
}
