//! Symbol table (§3 "Symbol", §3 "Scope", §4.4).
//!
//! A [`Symbol`] is a tagged union keyed by [`SymbolKind`]: `Equ`/`Var` carry a
//! plain `i32`, `Label` carries a section id plus an offset into it,
//! `StringEqu` a shared string, `Macro` a captured source span, and `Ref` no
//! value at all (a forward declaration waiting to be upgraded). [`SymbolTable`]
//! owns every symbol plus the scope-qualification and purge bookkeeping
//! described in §4.4.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// The kind-specific payload of a [`Symbol`].
#[derive(Debug, Clone)]
pub enum SymbolKind {
    Equ(i32),
    Var(i32),
    Label { section: u32, offset: u32 },
    StringEqu(Rc<str>),
    /// A (ptr,len) view into the captured macro body, expressed here as an
    /// offset/length pair into the source node's owning buffer. Macro bodies
    /// aren't replayed by this crate (no mnemonic parser, §1) - the span is
    /// kept only so `SymbolTable` can round-trip `MACRO`/`ENDM` definitions.
    Macro { node: Option<Rc<crate::fstack::FileStackNode>>, start: usize, len: usize },
    Ref,
    /// A built-in whose value is computed on demand (`@`, `_NARG`, ...).
    Builtin(BuiltinKind),
}

impl PartialEq for SymbolKind {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
impl Eq for SymbolKind {}

/// Identifies which built-in thunk a `Builtin` symbol invokes (§5 "symbols
/// seeded with built-ins").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    /// `@` - the current section's org plus the current emit offset.
    Pc,
    /// `_NARG` - the number of arguments bound in the current macro context.
    Narg,
    IsoDateLocal,
    RgbdsVersion,
    UtcYear,
    UtcMonth,
    UtcDay,
    UtcHour,
    UtcMinute,
    UtcSecond,
}

impl BuiltinKind {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinKind::Pc => "@",
            BuiltinKind::Narg => "_NARG",
            BuiltinKind::IsoDateLocal => "__ISO_8601_LOCAL__",
            BuiltinKind::RgbdsVersion => "__RGBDS_VERSION__",
            BuiltinKind::UtcYear => "__UTC_YEAR__",
            BuiltinKind::UtcMonth => "__UTC_MONTH__",
            BuiltinKind::UtcDay => "__UTC_DAY__",
            BuiltinKind::UtcHour => "__UTC_HOUR__",
            BuiltinKind::UtcMinute => "__UTC_MINUTE__",
            BuiltinKind::UtcSecond => "__UTC_SECOND__",
        }
    }
}

/// A snapshot of the fields a containing [`crate::section::Section`] had when
/// the label was defined - enough for the alignment-aware constant-folding
/// rules in `rpn` without those functions needing a borrow of the whole
/// section table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSnapshot {
    pub org: Option<u16>,
    pub align_bits: u8,
    pub align_ofs: u16,
}

/// One entry of the symbol table.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub exported: bool,
    pub node: Option<Rc<crate::fstack::FileStackNode>>,
    pub line_no: u32,
    section_snapshot: Option<SectionSnapshot>,
}

impl Symbol {
    /// For `Equ`/`Var`, the literal value; labels and everything else defer
    /// to the RPN `SYM` opcode (§4.3 "makeSymbol").
    pub fn constant_value(&self) -> Option<i32> {
        match self.kind {
            SymbolKind::Equ(v) | SymbolKind::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn section_of(&self) -> Option<u32> {
        match self.kind {
            SymbolKind::Label { section, .. } => Some(section),
            _ => None,
        }
    }

    /// Offset within the owning section - used directly (never `org +
    /// offset`) by the alignment-folding helpers, since they only need bits
    /// that are invariant under the section's eventual placement.
    pub fn label_offset(&self) -> Option<u32> {
        match self.kind {
            SymbolKind::Label { offset, .. } => Some(offset),
            _ => None,
        }
    }

    /// `offset`, or `org + offset` once the owning section has a fixed
    /// address. Either convention is fine for same-section subtraction
    /// (`rpn::make_binary_op`'s `SUB`-of-same-section rule), since the
    /// common `org` term cancels.
    pub fn label_value(&self) -> Option<i32> {
        match self.kind {
            SymbolKind::Label { offset, .. } => {
                let base = self.section_snapshot.and_then(|s| s.org).map(|o| o as i32).unwrap_or(0);
                Some(base + offset as i32)
            }
            _ => None,
        }
    }

    pub fn section_ref(&self) -> Option<SectionSnapshot> {
        self.section_snapshot
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self.kind, SymbolKind::Ref)
    }

    pub fn is_label(&self) -> bool {
        matches!(self.kind, SymbolKind::Label { .. })
    }

    pub fn is_exported(&self) -> bool {
        self.exported
    }
}

/// Current (globalScope, localScope) pair (§3 "Scope"). `.`/`..` resolve
/// against these names; a bare `.sub` qualifies against `global`.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub global: Option<String>,
    pub local: Option<String>,
}

/// Owns every symbol for one assembly unit.
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, u32>,
    purged: HashSet<String>,
    anon_counter: u32,
    scope: Scope,
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

impl SymbolTable {
    /// Seeds the table with the process-wide built-ins (§5).
    pub fn new() -> SymbolTable {
        let mut table = SymbolTable {
            symbols: Vec::new(),
            by_name: HashMap::new(),
            purged: HashSet::new(),
            anon_counter: 0,
            scope: Scope::default(),
        };
        for kind in [
            BuiltinKind::Pc,
            BuiltinKind::Narg,
            BuiltinKind::IsoDateLocal,
            BuiltinKind::RgbdsVersion,
            BuiltinKind::UtcYear,
            BuiltinKind::UtcMonth,
            BuiltinKind::UtcDay,
            BuiltinKind::UtcHour,
            BuiltinKind::UtcMinute,
            BuiltinKind::UtcSecond,
        ] {
            table.insert(Symbol {
                name: kind.name().to_string(),
                kind: SymbolKind::Builtin(kind),
                exported: false,
                node: None,
                line_no: 0,
                section_snapshot: None,
            });
        }
        table
    }

    fn insert(&mut self, symbol: Symbol) -> u32 {
        let id = self.symbols.len() as u32;
        self.by_name.insert(symbol.name.clone(), id);
        self.symbols.push(symbol);
        id
    }

    pub fn get(&self, id: u32) -> Option<&Symbol> {
        self.symbols.get(id as usize)
    }

    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// `findExact` - the raw, unqualified map lookup.
    pub fn find_exact(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&id| &self.symbols[id as usize])
    }

    pub fn find_exact_id(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Qualifies a bare local label (`.sub`), `.`, or `..` against the
    /// current scope; leaves every other name untouched (§3 "Scope", §4.4).
    pub fn qualify(&self, name: &str) -> String {
        if name == "." {
            return self.scope.global.clone().unwrap_or_default();
        }
        if name == ".." {
            return self.scope.local.clone().unwrap_or_default();
        }
        if name.starts_with('.') && !name.starts_with("..") {
            if let Some(global) = &self.scope.global {
                return format!("{global}{name}");
            }
        }
        name.to_string()
    }

    /// `findScoped` - qualifies local names against the current global scope
    /// before looking them up.
    pub fn find_scoped(&self, name: &str) -> Option<&Symbol> {
        self.find_exact(&self.qualify(name))
    }

    /// `findScopedValid` - like `find_scoped`, but built-ins that have no
    /// value in the current context (e.g. `@` outside a section, `_NARG`
    /// outside a macro) are reported as absent. Determining "current
    /// context" is the caller's job (assembler state, not the table's); this
    /// takes it as a parameter instead of threading global mutable state
    /// through the table.
    pub fn find_scoped_valid(&self, name: &str, has_pc: bool, has_nargs: bool) -> Option<&Symbol> {
        let sym = self.find_scoped(name)?;
        match sym.kind {
            SymbolKind::Builtin(BuiltinKind::Pc) if !has_pc => None,
            SymbolKind::Builtin(BuiltinKind::Narg) if !has_nargs => None,
            _ => Some(sym),
        }
    }

    pub fn was_purged(&self, name: &str) -> bool {
        self.purged.contains(&self.qualify(name))
    }

    /// Returns the id of `name`, creating a `Ref` forward declaration if it
    /// doesn't exist yet (`rpn::Expr::make_symbol`/`make_bank_symbol`'s
    /// `ref()` call).
    pub fn ref_scoped(&mut self, name: &str) -> u32 {
        let qualified = self.qualify(name);
        if let Some(&id) = self.by_name.get(&qualified) {
            return id;
        }
        self.insert(Symbol {
            name: qualified,
            kind: SymbolKind::Ref,
            exported: false,
            node: None,
            line_no: 0,
            section_snapshot: None,
        })
    }

    fn check_definable(&self, qualified: &str, is_builtin_kind: bool) -> Result<Option<u32>, String> {
        if let Some(&id) = self.by_name.get(qualified) {
            let existing = &self.symbols[id];
            if matches!(existing.kind, SymbolKind::Builtin(_)) {
                return Err(format!("'{qualified}' is a built-in symbol and cannot be redefined"));
            }
            if matches!(existing.kind, SymbolKind::Ref) {
                return Ok(Some(id));
            }
            if is_builtin_kind {
                // caller will decide whether same-kind overwrite (redef) is allowed
                return Ok(Some(id));
            }
            return Err(format!("'{qualified}' already defined as {kind}", kind = kind_name(&existing.kind)));
        }
        Ok(None)
    }

    /// `addLabel` (§3 "exported labels must belong to a section").
    pub fn add_label(&mut self, name: &str, section: u32, offset: u32, exported: bool) -> Result<u32, String> {
        let qualified = self.qualify(name);
        if qualified.contains('.') {
            self.scope.local = Some(qualified.clone());
        } else {
            self.scope.global = Some(qualified.clone());
            self.scope.local = None;
        }
        let symbol = Symbol {
            name: qualified.clone(),
            kind: SymbolKind::Label { section, offset },
            exported,
            node: None,
            line_no: 0,
            section_snapshot: None,
        };
        match self.check_definable(&qualified, false)? {
            Some(id) => {
                self.symbols[id as usize] = symbol;
                Ok(id)
            }
            None => Ok(self.insert(symbol)),
        }
    }

    /// Attaches a section snapshot to an already-inserted label, for the
    /// alignment-aware constant-folding rules in `rpn`. Called right after
    /// `add_label` while the owning section is still in scope.
    pub fn attach_section_snapshot(&mut self, id: u32, snapshot: SectionSnapshot) {
        if let Some(sym) = self.symbols.get_mut(id as usize) {
            sym.section_snapshot = Some(snapshot);
        }
    }

    pub fn add_local_label(&mut self, sub_name: &str, section: u32, offset: u32) -> Result<u32, String> {
        self.add_label(sub_name, section, offset, false)
    }

    /// `!N` anonymous labels: a monotonically increasing counter, referenced
    /// later as `:-`/`:+` via [`Self::make_anon_label_name`].
    pub fn add_anon_label(&mut self, section: u32, offset: u32) -> u32 {
        let n = self.anon_counter;
        self.anon_counter += 1;
        let name = format!("!{n}");
        self.insert(Symbol {
            name,
            kind: SymbolKind::Label { section, offset },
            exported: false,
            node: None,
            line_no: 0,
            section_snapshot: None,
        })
    }

    /// `MakeAnonLabelName` - resolves `:-`/`:+` (`neg` = true for `:-`) to a
    /// concrete anonymous-label name `ofs` steps away from the current
    /// counter.
    pub fn make_anon_label_name(&self, ofs: u32, neg: bool) -> Option<String> {
        let current = self.anon_counter;
        let n = if neg { current.checked_sub(ofs + 1)? } else { current.checked_add(ofs.wrapping_sub(1))? };
        Some(format!("!{n}"))
    }

    pub fn add_equ(&mut self, name: &str, value: i32) -> Result<u32, String> {
        self.define_value(name, SymbolKind::Equ(value), false)
    }

    pub fn redef_equ(&mut self, name: &str, value: i32) -> Result<u32, String> {
        self.define_value(name, SymbolKind::Equ(value), true)
    }

    pub fn add_var(&mut self, name: &str, value: i32) -> Result<u32, String> {
        // VAR always allows redefinition (it's the mutable kind, §3).
        self.define_value(name, SymbolKind::Var(value), true)
    }

    pub fn add_string(&mut self, name: &str, value: impl Into<Rc<str>>) -> Result<u32, String> {
        self.define_value(name, SymbolKind::StringEqu(value.into()), false)
    }

    pub fn redef_string(&mut self, name: &str, value: impl Into<Rc<str>>) -> Result<u32, String> {
        self.define_value(name, SymbolKind::StringEqu(value.into()), true)
    }

    pub fn add_macro(&mut self, name: &str, node: Option<Rc<crate::fstack::FileStackNode>>, start: usize, len: usize) -> Result<u32, String> {
        self.define_value(name, SymbolKind::Macro { node, start, len }, false)
    }

    fn define_value(&mut self, name: &str, kind: SymbolKind, allow_redef: bool) -> Result<u32, String> {
        let qualified = self.qualify(name);
        if let Some(&id) = self.by_name.get(&qualified) {
            let existing_kind = self.symbols[id as usize].kind.clone();
            match existing_kind {
                SymbolKind::Builtin(_) => {
                    return Err(format!("'{qualified}' is a built-in symbol and cannot be redefined"));
                }
                SymbolKind::Ref => {
                    // Ref may be promoted to any defined kind.
                }
                ref k if allow_redef && *k == kind => {}
                ref k => {
                    return Err(format!("'{qualified}' already defined as {kind}", kind = kind_name(k)));
                }
            }
            self.symbols[id as usize].kind = kind;
            return Ok(id);
        }
        Ok(self.insert(Symbol {
            name: qualified,
            kind,
            exported: false,
            node: None,
            line_no: 0,
            section_snapshot: None,
        }))
    }

    /// An explicit forward declaration (used by `rpn::Expr::make_symbol` and
    /// similar "reference without defining" call sites); identical to
    /// [`Self::ref_scoped`] but named to match `symtab_Ref` for readability
    /// at call sites that aren't touching expressions.
    pub fn ref_only(&mut self, name: &str) -> u32 {
        self.ref_scoped(name)
    }

    /// Marks `name` purged: erased from the live map, but remembered so a
    /// later reference reports "was purged" rather than "undefined" (§3, §4.4).
    /// Fails if the symbol has already been assigned an object-file id
    /// (`id.get().is_some()` on its file-stack node is not tracked here -
    /// callers must check "no outstanding references" themselves per §3's
    /// lifecycle note before calling this).
    pub fn purge(&mut self, name: &str) -> Result<(), String> {
        let qualified = self.qualify(name);
        match self.by_name.get(&qualified) {
            Some(&id) if matches!(self.symbols[id as usize].kind, SymbolKind::Builtin(_)) => {
                Err(format!("'{qualified}' is a built-in symbol and cannot be purged"))
            }
            Some(&id) => {
                self.by_name.remove(&qualified);
                self.purged.insert(qualified);
                // Leave a tombstone at `id` so any id already handed out
                // (e.g. embedded in an Expr::Unknown's RPN SYM operand)
                // still resolves, just to an undefined symbol.
                self.symbols[id as usize].kind = SymbolKind::Ref;
                Ok(())
            }
            None => Err(format!("'{qualified}' is not defined")),
        }
    }

    pub fn export(&mut self, name: &str) -> Result<(), String> {
        let qualified = self.qualify(name);
        let id = *self.by_name.get(&qualified).ok_or_else(|| format!("'{qualified}' is not defined"))?;
        let sym = &mut self.symbols[id as usize];
        if let SymbolKind::Label { section: _, .. } = sym.kind {
            sym.exported = true;
            Ok(())
        } else if matches!(sym.kind, SymbolKind::Equ(_) | SymbolKind::Var(_)) {
            sym.exported = true;
            Ok(())
        } else {
            Err(format!("'{qualified}' cannot be exported (not a label or constant)"))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Symbol)> {
        self.symbols.iter().enumerate().map(|(i, s)| (i as u32, s))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

fn kind_name(kind: &SymbolKind) -> &'static str {
    match kind {
        SymbolKind::Equ(_) => "an EQU constant",
        SymbolKind::Var(_) => "a variable",
        SymbolKind::Label { .. } => "a label",
        SymbolKind::StringEqu(_) => "a string equate",
        SymbolKind::Macro { .. } => "a macro",
        SymbolKind::Ref => "a forward reference",
        SymbolKind::Builtin(_) => "a built-in symbol",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_label_qualifies_against_global_scope() {
        let mut symbols = SymbolTable::new();
        symbols.add_label("Foo", 0, 0, false).unwrap();
        let id = symbols.add_local_label(".bar", 0, 4).unwrap();
        assert_eq!(symbols.get(id).unwrap().name, "Foo.bar");
        assert!(symbols.find_scoped(".bar").is_some());
    }

    #[test]
    fn redefining_equ_without_redef_fails() {
        let mut symbols = SymbolTable::new();
        symbols.add_equ("N", 1).unwrap();
        assert!(symbols.add_equ("N", 2).is_err());
        symbols.redef_equ("N", 2).unwrap();
        assert_eq!(symbols.find_exact("N").unwrap().constant_value(), Some(2));
    }

    #[test]
    fn ref_then_define_upgrades_in_place() {
        let mut symbols = SymbolTable::new();
        let ref_id = symbols.ref_scoped("LATER");
        let def_id = symbols.add_equ("LATER", 42).unwrap();
        assert_eq!(ref_id, def_id);
        assert_eq!(symbols.get(def_id).unwrap().constant_value(), Some(42));
    }

    #[test]
    fn purge_then_reference_reports_was_purged() {
        let mut symbols = SymbolTable::new();
        symbols.add_equ("GONE", 1).unwrap();
        symbols.purge("GONE").unwrap();
        assert!(symbols.was_purged("GONE"));
        assert!(symbols.find_exact("GONE").is_none());
    }

    #[test]
    fn builtins_cannot_be_redefined_or_purged() {
        let mut symbols = SymbolTable::new();
        assert!(symbols.add_equ("_NARG", 1).is_err());
        assert!(symbols.purge("_NARG").is_err());
    }

    #[test]
    fn anon_label_round_trip() {
        let mut symbols = SymbolTable::new();
        symbols.add_anon_label(0, 0);
        symbols.add_anon_label(0, 4);
        symbols.add_anon_label(0, 8);
        // From just after the 2nd anon label, `:-` (neg) should hit `!1`.
        assert_eq!(symbols.make_anon_label_name(0, true), Some("!2".to_string()));
    }

    #[test]
    fn export_requires_label_or_constant() {
        let mut symbols = SymbolTable::new();
        symbols.add_macro("M", None, 0, 0).unwrap();
        assert!(symbols.export("M").is_err());
        symbols.add_equ("K", 1).unwrap();
        symbols.export("K").unwrap();
        assert!(symbols.find_exact("K").unwrap().is_exported());
    }
}
