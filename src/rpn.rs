//! Expression engine (§3 "Expression", §4.3).
//!
//! An [`Expr`] is either a fully-known 32-bit value, or a symbolic value
//! carrying a human-readable reason (for diagnostics) plus an RPN byte stream
//! to be replayed by the linker's patch resolver ([`crate::linker::patch`])
//! once every symbol, section, and bank is known. Folding is eager: any
//! operator whose operands are both known computes its result immediately
//! without ever touching the byte stream, mirroring the "RPN buffer" dance in
//! the original `Expression::makeBinaryOp`/`makeUnaryOp`.

use crate::diagnostics::{DiagnosticSink, WarningId};
use crate::fstack::FileStackNode;
use crate::section::{Section, SectionType};
use crate::symbol::{Symbol, SymbolTable};
use std::rc::Rc;

/// One opcode in the deferred RPN byte stream (§3, §6 "RPN opcodes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RpnOp {
    Const = 0,
    Sym = 1,
    BankSym = 2,
    BankSect = 3,
    BankSelf = 4,
    SizeofSect = 5,
    StartofSect = 6,
    SizeofSectType = 7,
    StartofSectType = 8,
    Add = 9,
    Sub = 10,
    Mul = 11,
    Div = 12,
    Mod = 13,
    Neg = 14,
    Exp = 15,
    Or = 16,
    And = 17,
    Xor = 18,
    Not = 19,
    Shl = 20,
    Shr = 21,
    Ushr = 22,
    LogAnd = 23,
    LogOr = 24,
    LogNot = 25,
    LogEq = 26,
    LogNe = 27,
    LogGt = 28,
    LogLt = 29,
    LogGe = 30,
    LogLe = 31,
    High = 32,
    Low = 33,
    Bitwidth = 34,
    Tzcount = 35,
    Hram = 36,
    Rst = 37,
    BitIndex = 38,
}

impl RpnOp {
    pub fn from_u8(b: u8) -> Option<RpnOp> {
        use RpnOp::*;
        const TABLE: &[RpnOp] = &[
            Const, Sym, BankSym, BankSect, BankSelf, SizeofSect, StartofSect, SizeofSectType,
            StartofSectType, Add, Sub, Mul, Div, Mod, Neg, Exp, Or, And, Xor, Not, Shl, Shr, Ushr,
            LogAnd, LogOr, LogNot, LogEq, LogNe, LogGt, LogLt, LogGe, LogLe, High, Low, Bitwidth,
            Tzcount, Hram, Rst, BitIndex,
        ];
        TABLE.get(b as usize).copied()
    }

    pub fn is_unary(self) -> bool {
        matches!(
            self,
            RpnOp::Neg | RpnOp::Not | RpnOp::LogNot | RpnOp::High | RpnOp::Low | RpnOp::Bitwidth | RpnOp::Tzcount
        )
    }
}

/// Either a fully-folded value, or a deferred computation.
#[derive(Debug, Clone)]
pub enum Expr {
    Known(i32),
    Unknown { reason: String, rpn: Vec<u8> },
}

impl Expr {
    pub fn is_known(&self) -> bool {
        matches!(self, Expr::Known(_))
    }

    pub fn value(&self) -> Option<i32> {
        match self {
            Expr::Known(v) => Some(*v),
            Expr::Unknown { .. } => None,
        }
    }

    pub fn known(v: i32) -> Expr {
        Expr::Known(v)
    }

    fn unknown(reason: impl Into<String>) -> Expr {
        Expr::Unknown {
            reason: reason.into(),
            rpn: Vec::new(),
        }
    }

    fn push_const(buf: &mut Vec<u8>, value: i32) {
        buf.push(RpnOp::Const as u8);
        buf.extend_from_slice(&(value as u32).to_le_bytes());
    }

    fn push_name(buf: &mut Vec<u8>, name: &str) {
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
    }

    /// `makeSymbol` - reference a (possibly forward-declared) symbol by name.
    /// Numeric constants fold immediately; everything else defers to `SYM`.
    pub fn make_symbol(symbols: &mut SymbolTable, name: &str) -> Expr {
        if let Some(sym) = symbols.find_scoped(name) {
            if let Some(v) = sym.constant_value() {
                return Expr::Known(v);
            }
        }
        let id = symbols.ref_scoped(name);
        let reason = if symbols.was_purged(name) {
            format!("'{name}' is not constant at assembly time; it was purged")
        } else {
            format!("'{name}' is not constant at assembly time")
        };
        let mut rpn = Vec::new();
        rpn.push(RpnOp::Sym as u8);
        rpn.extend_from_slice(&id.to_le_bytes());
        Expr::Unknown { reason, rpn }
    }

    /// `makeBankSymbol` - `BANK(symbol)`.
    pub fn make_bank_symbol(symbols: &mut SymbolTable, sections: &[Section], name: &str) -> Expr {
        let id = symbols.ref_scoped(name);
        if let Some(sym) = symbols.get(id) {
            if let Some(sect_id) = sym.section_of() {
                if let Some(bank) = sections.get(sect_id as usize).and_then(|s| s.bank) {
                    return Expr::Known(bank as i32);
                }
            }
        }
        let reason = if symbols.was_purged(name) {
            format!("\"{name}\"'s bank is not known; it was purged")
        } else {
            format!("\"{name}\"'s bank is not known")
        };
        let mut rpn = Vec::new();
        rpn.push(RpnOp::BankSym as u8);
        rpn.extend_from_slice(&id.to_le_bytes());
        Expr::Unknown { reason, rpn }
    }

    /// `makeBankSection` - `BANK("section")`.
    pub fn make_bank_section(sections: &[Section], name: &str) -> Expr {
        if let Some(sect) = sections.iter().find(|s| s.name == name) {
            if let Some(bank) = sect.bank {
                return Expr::Known(bank as i32);
            }
        }
        let mut rpn = vec![RpnOp::BankSect as u8];
        Self::push_name(&mut rpn, name);
        Expr::Unknown {
            reason: format!("Section \"{name}\"'s bank is not known"),
            rpn,
        }
    }

    /// `makeSizeOfSection` - `SIZEOF("section")`.
    pub fn make_sizeof_section(sections: &[Section], name: &str) -> Expr {
        if let Some(sect) = sections.iter().find(|s| s.name == name) {
            return Expr::Known(sect.size as i32);
        }
        let mut rpn = vec![RpnOp::SizeofSect as u8];
        Self::push_name(&mut rpn, name);
        Expr::Unknown {
            reason: format!("Section \"{name}\"'s size is not known"),
            rpn,
        }
    }

    /// `makeStartOfSection` - `STARTOF("section")`.
    pub fn make_startof_section(sections: &[Section], name: &str) -> Expr {
        if let Some(sect) = sections.iter().find(|s| s.name == name) {
            if let Some(org) = sect.org {
                return Expr::Known(org as i32);
            }
        }
        let mut rpn = vec![RpnOp::StartofSect as u8];
        Self::push_name(&mut rpn, name);
        Expr::Unknown {
            reason: format!("Section \"{name}\"'s start is not known"),
            rpn,
        }
    }

    pub fn make_sizeof_section_type(ty: SectionType) -> Expr {
        Expr::Unknown {
            reason: "Section type's size is not known".into(),
            rpn: vec![RpnOp::SizeofSectType as u8, ty as u8],
        }
    }

    pub fn make_startof_section_type(ty: SectionType) -> Expr {
        Expr::Unknown {
            reason: "Section type's start is not known".into(),
            rpn: vec![RpnOp::StartofSectType as u8, ty as u8],
        }
    }

    /// Whether this expression is a bare reference to a single symbol (used
    /// by the `SUB`-of-same-section and `ALIGN`-aware folding rules below).
    fn symbol_of<'a>(&self, symbols: &'a SymbolTable) -> Option<&'a Symbol> {
        match self {
            Expr::Unknown { rpn, .. } if rpn.first() == Some(&(RpnOp::Sym as u8)) && rpn.len() >= 5 => {
                let id = u32::from_le_bytes(rpn[1..5].try_into().ok()?);
                symbols.get(id)
            }
            _ => None,
        }
    }

    fn reason(&self) -> String {
        match self {
            Expr::Known(_) => String::new(),
            Expr::Unknown { reason, .. } => reason.clone(),
        }
    }

    fn take_rpn(self) -> (String, Vec<u8>) {
        match self {
            Expr::Known(_) => (String::new(), Vec::new()),
            Expr::Unknown { reason, rpn } => (reason, rpn),
        }
    }

    pub fn make_unary_op(op: RpnOp, src: Expr, symbols: &SymbolTable) -> Expr {
        if let Expr::Known(val) = src {
            let uval = val as u32;
            return Expr::Known(match op {
                RpnOp::Neg => (uval.wrapping_neg()) as i32,
                RpnOp::Not => !val,
                RpnOp::LogNot => (val == 0) as i32,
                RpnOp::High => ((uval >> 8) & 0xFF) as i32,
                RpnOp::Low => (val & 0xFF),
                RpnOp::Bitwidth => {
                    if val != 0 {
                        32 - uval.leading_zeros() as i32
                    } else {
                        0
                    }
                }
                RpnOp::Tzcount => {
                    if val != 0 {
                        uval.trailing_zeros() as i32
                    } else {
                        32
                    }
                }
                _ => unreachable!("make_unary_op called with non-unary operator"),
            });
        }

        if op == RpnOp::LogNot {
            if let Some(v) = try_const_lognot(&src, symbols) {
                return Expr::Known(v);
            }
        }
        if op == RpnOp::Low {
            if let Some(v) = try_const_low(&src, symbols) {
                return Expr::Known(v);
            }
        }

        let (reason, mut rpn) = src.take_rpn();
        rpn.push(op as u8);
        Expr::Unknown { reason, rpn }
    }

    /// Folds/defers a binary operator. Takes a diagnostics sink and the
    /// current file-stack node because three of its both-known cases can't
    /// just compute a value: `DIV`/`MOD` by a known zero and `EXP` by a known
    /// negative power are fatal at assembly time (§4.3, mirroring the
    /// original `Expression::makeBinaryOp`'s `fatalerror` calls), and `DIV`
    /// of `INT32_MIN` by `-1` is a diagnosed (non-fatal) special case. Without
    /// this, folding them with plain `/`/`%` would panic instead of
    /// reporting the spec-mandated diagnostic (§8 "no panics on valid
    /// input"); the link-time evaluator (`linker::patch::compute_rpn`)
    /// already handles the same three cases the same way.
    pub fn make_binary_op(
        op: RpnOp,
        lhs: Expr,
        rhs: Expr,
        symbols: &SymbolTable,
        diagnostics: &mut DiagnosticSink,
        node: Option<&Rc<FileStackNode>>,
    ) -> crate::error::Result<Expr> {
        if let (Expr::Known(lval), Expr::Known(rval)) = (&lhs, &rhs) {
            let (lval, rval) = (*lval, *rval);
            let (ulval, urval) = (lval as u32, rval as u32);
            if op == RpnOp::Div && rval == 0 {
                return Err(diagnostics.fatal("Division by 0", node));
            }
            if op == RpnOp::Mod && rval == 0 {
                return Err(diagnostics.fatal("Modulo by 0", node));
            }
            if op == RpnOp::Exp && rval < 0 {
                return Err(diagnostics.fatal(format!("Exponentiation by negative power {rval}"), node));
            }
            return Ok(Expr::Known(match op {
                RpnOp::LogOr => ((lval != 0) || (rval != 0)) as i32,
                RpnOp::LogAnd => ((lval != 0) && (rval != 0)) as i32,
                RpnOp::LogEq => (lval == rval) as i32,
                RpnOp::LogGt => (lval > rval) as i32,
                RpnOp::LogLt => (lval < rval) as i32,
                RpnOp::LogGe => (lval >= rval) as i32,
                RpnOp::LogLe => (lval <= rval) as i32,
                RpnOp::LogNe => (lval != rval) as i32,
                RpnOp::Add => ulval.wrapping_add(urval) as i32,
                RpnOp::Sub => ulval.wrapping_sub(urval) as i32,
                RpnOp::Xor => lval ^ rval,
                RpnOp::Or => lval | rval,
                RpnOp::And => lval & rval,
                RpnOp::Shl => op_shift_left(lval, rval),
                RpnOp::Shr => op_shift_right(lval, rval),
                RpnOp::Ushr => op_shift_right_unsigned(lval, rval),
                RpnOp::Mul => ulval.wrapping_mul(urval) as i32,
                RpnOp::Div => {
                    if lval == i32::MIN && rval == -1 {
                        diagnostics.warn(WarningId::Div, format!("Division of {} by -1 yields {}", i32::MIN, i32::MIN), node);
                        i32::MIN
                    } else {
                        op_divide(lval, rval)
                    }
                }
                RpnOp::Mod => {
                    if lval == i32::MIN && rval == -1 {
                        0
                    } else {
                        op_modulo(lval, rval)
                    }
                }
                RpnOp::Exp => op_exponent(lval, rval),
                _ => unreachable!("make_binary_op called with non-binary operator"),
            }));
        }

        if op == RpnOp::Sub {
            if let (Some(l), Some(r)) = (lhs.symbol_of(symbols), rhs.symbol_of(symbols)) {
                if l.is_label()
                    && r.is_label()
                    && l.section_of().is_some()
                    && l.section_of() == r.section_of()
                {
                    if let (Some(lv), Some(rv)) = (l.label_value(), r.label_value()) {
                        return Ok(Expr::Known(lv - rv));
                    }
                }
            }
        }
        if matches!(op, RpnOp::LogAnd | RpnOp::And) {
            if try_const_zero(&lhs, &rhs) {
                return Ok(Expr::Known(0));
            }
        }
        if op == RpnOp::LogOr && try_const_nonzero(&lhs, &rhs) {
            return Ok(Expr::Known(1));
        }
        if op == RpnOp::And {
            if let Some(v) = try_const_mask(&lhs, &rhs, symbols) {
                return Ok(Expr::Known(v));
            }
        }

        let mut rpn;
        let reason;
        match lhs {
            Expr::Known(lval) => {
                rpn = Vec::new();
                Self::push_const(&mut rpn, lval);
                reason = rhs.reason();
            }
            Expr::Unknown { reason: r, rpn: buf } => {
                rpn = buf;
                reason = r;
            }
        }
        match rhs {
            Expr::Known(rval) => {
                Self::push_const(&mut rpn, rval);
                rpn.push(op as u8);
            }
            Expr::Unknown { rpn: rbuf, .. } => {
                rpn.extend_from_slice(&rbuf);
                rpn.push(op as u8);
            }
        }
        Ok(Expr::Unknown { reason, rpn })
    }

    /// `makeCheckHRAM` - validates/encodes an `LDH` operand. Returns `true`
    /// when the (already-known) value fell in the deprecated `$00-$FF`
    /// range, mirroring the original's boolean "deprecated" return.
    pub fn make_check_hram(self) -> (Expr, bool) {
        match self {
            Expr::Known(val) if (0xFF00..=0xFFFF).contains(&val) => (Expr::Known(val & 0xFF), false),
            Expr::Known(val) if (0..=0xFF).contains(&val) => (Expr::Known(val), true),
            Expr::Known(_) => (self, false),
            Expr::Unknown { reason, mut rpn } => {
                rpn.push(RpnOp::Hram as u8);
                (Expr::Unknown { reason, rpn }, false)
            }
        }
    }

    /// `makeCheckRST`.
    pub fn make_check_rst(self) -> Expr {
        match self {
            Expr::Unknown { reason, mut rpn } => {
                rpn.push(RpnOp::Rst as u8);
                Expr::Unknown { reason, rpn }
            }
            known => known,
        }
    }

    /// `makeCheckBitIndex`.
    pub fn make_check_bit_index(self, mask: u8) -> Expr {
        match self {
            Expr::Unknown { reason, mut rpn } => {
                rpn.push(RpnOp::BitIndex as u8);
                rpn.push(mask);
                Expr::Unknown { reason, rpn }
            }
            known => known,
        }
    }

    pub fn check_n_bit(&self, n: u32) -> Option<WarningKind> {
        self.value().and_then(|v| check_n_bit(v, n))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    Truncation1,
    Truncation2,
}

/// `checkNBit` (§4.3). Returns which truncation warning (if any) applies.
pub fn check_n_bit(v: i32, n: u32) -> Option<WarningKind> {
    assert!(n != 0 && (n as usize) < 32);
    if v < -(1i64 << n) as i32 || v as i64 >= (1i64 << n) {
        return Some(WarningKind::Truncation1);
    }
    if v < -(1i32 << (n - 1)) {
        return Some(WarningKind::Truncation2);
    }
    None
}

fn try_const_zero(lhs: &Expr, rhs: &Expr) -> bool {
    let known = if lhs.is_known() { lhs } else { rhs };
    matches!(known.value(), Some(0))
}

fn try_const_nonzero(lhs: &Expr, rhs: &Expr) -> bool {
    let known = if lhs.is_known() { lhs } else { rhs };
    matches!(known.value(), Some(v) if v != 0)
}

/// Mirrors `tryConstLogNot`: `!sym` is constant-foldable when `sym` belongs to
/// a floating, aligned section - the unknown low bits can never all be zero
/// if the alignment guarantees at least one is forced to a known nonzero
/// value by `alignOfs`.
fn try_const_lognot(expr: &Expr, symbols: &SymbolTable) -> Option<i32> {
    let sym = expr.symbol_of(symbols)?;
    let sect = sym.section_ref()?;
    if sect.org.is_some() || !sym.is_defined() {
        return None;
    }
    let unknown_bits: i32 = (1 << 16) - (1 << sect.align_bits);
    let symbol_ofs = sym.label_offset()? as i32;
    let known_bits = (symbol_ofs + sect.align_ofs as i32) & !unknown_bits;
    Some((known_bits != 0) as i32)
}

/// Mirrors `tryConstLow`.
fn try_const_low(expr: &Expr, symbols: &SymbolTable) -> Option<i32> {
    let sym = expr.symbol_of(symbols)?;
    let sect = sym.section_ref()?;
    if !sym.is_defined() || sect.align_bits < 8 || sect.org.is_some() {
        return None;
    }
    let symbol_ofs = sym.label_offset()? as i32;
    Some((symbol_ofs + sect.align_ofs as i32) & 0xFF)
}

/// Mirrors `tryConstMask`.
fn try_const_mask(lhs: &Expr, rhs: &Expr, symbols: &SymbolTable) -> Option<i32> {
    let (sym, other) = match lhs.symbol_of(symbols) {
        Some(s) if s.section_ref().is_some() => (s, rhs),
        _ => match rhs.symbol_of(symbols) {
            Some(s) if s.section_ref().is_some() => (s, lhs),
            _ => return None,
        },
    };
    if !sym.is_defined() || !other.is_known() {
        return None;
    }
    let mask = other.value().unwrap();
    let sect = sym.section_ref()?;
    let unknown_bits: i32 = (1 << 16) - (1 << sect.align_bits);
    if unknown_bits & mask != 0 {
        return None;
    }
    let symbol_ofs = sym.label_offset()? as i32;
    Some((symbol_ofs + sect.align_ofs as i32) & mask)
}

// --- integer semantics (§4.3) -------------------------------------------------

/// Division rounds toward negative infinity.
pub fn op_divide(dividend: i32, divisor: i32) -> i32 {
    let q = dividend / divisor;
    let r = dividend % divisor;
    if r != 0 && ((r < 0) != (divisor < 0)) {
        q - 1
    } else {
        q
    }
}

/// Modulo's sign matches the divisor's (consistent with floor division).
pub fn op_modulo(dividend: i32, divisor: i32) -> i32 {
    let r = dividend % divisor;
    if r != 0 && ((r < 0) != (divisor < 0)) {
        r + divisor
    } else {
        r
    }
}

pub fn op_exponent(base: i32, power: i32) -> i32 {
    let mut result: u32 = 1;
    let ubase = base as u32;
    for _ in 0..power.max(0) {
        result = result.wrapping_mul(ubase);
    }
    result as i32
}

/// Shifting by a negative or out-of-range amount saturates rather than
/// invoking undefined behavior (§4.3).
fn normalize_shift(amount: i32) -> (bool, u32) {
    if amount < 0 {
        (true, (-(amount as i64)).min(31) as u32)
    } else {
        (false, (amount as i64).min(32) as u32)
    }
}

pub fn op_shift_left(value: i32, amount: i32) -> i32 {
    let (negate, amount) = normalize_shift(amount);
    if negate {
        op_shift_right(value, amount as i32)
    } else if amount >= 32 {
        0
    } else {
        ((value as u32) << amount) as i32
    }
}

/// Arithmetic (sign-extending) right shift.
pub fn op_shift_right(value: i32, amount: i32) -> i32 {
    let (negate, amount) = normalize_shift(amount);
    if negate {
        op_shift_left(value, amount as i32)
    } else if amount >= 32 {
        if value < 0 { -1 } else { 0 }
    } else {
        value >> amount
    }
}

/// Logical (zero-filling) right shift.
pub fn op_shift_right_unsigned(value: i32, amount: i32) -> i32 {
    let (negate, amount) = normalize_shift(amount);
    if negate {
        op_shift_left(value, amount as i32)
    } else if amount >= 32 {
        0
    } else {
        ((value as u32) >> amount) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionTable;
    use crate::symbol::SymbolTable;

    #[test]
    fn fold_eager_add() {
        let symbols = SymbolTable::new();
        let mut diagnostics = DiagnosticSink::new(0);
        let e = Expr::make_binary_op(RpnOp::Add, Expr::Known(2), Expr::Known(3), &symbols, &mut diagnostics, None).unwrap();
        assert_eq!(e.value(), Some(5));
    }

    #[test]
    fn division_rounds_to_negative_infinity() {
        assert_eq!(op_divide(-7, 2), -4);
        assert_eq!(op_modulo(-7, 2), 1);
        assert_eq!(op_divide(7, -2), -4);
        assert_eq!(op_modulo(7, -2), -1);
    }

    #[test]
    fn shl_saturates_on_large_amount() {
        assert_eq!(op_shift_left(1, 40), 0);
        assert_eq!(op_shift_right(-8, 40), -1);
        assert_eq!(op_shift_right_unsigned(-8i32, 40), 0);
    }

    #[test]
    fn sub_of_two_same_section_symbols_is_constant() {
        let mut sections = SectionTable::new();
        let sid = sections.create_rom0("CODE").unwrap();
        let mut symbols = SymbolTable::new();
        symbols.add_label("A", sid, 4, false).unwrap();
        symbols.add_label("B", sid, 10, false).unwrap();

        let a = Expr::make_symbol(&mut symbols, "A");
        let b = Expr::make_symbol(&mut symbols, "B");
        let mut diagnostics = DiagnosticSink::new(0);
        let diff = Expr::make_binary_op(RpnOp::Sub, b, a, &symbols, &mut diagnostics, None).unwrap();
        assert_eq!(diff.value(), Some(6));
    }

    #[test]
    fn logand_with_constant_zero_short_circuits() {
        let symbols = SymbolTable::new();
        let unknown = Expr::Unknown { reason: "x".into(), rpn: vec![RpnOp::Sym as u8, 0, 0, 0, 0] };
        let mut diagnostics = DiagnosticSink::new(0);
        let e = Expr::make_binary_op(RpnOp::LogAnd, unknown, Expr::Known(0), &symbols, &mut diagnostics, None).unwrap();
        assert_eq!(e.value(), Some(0));
    }

    #[test]
    fn n_bit_check() {
        assert_eq!(check_n_bit(127, 8), None);
        assert_eq!(check_n_bit(-129, 8), Some(WarningKind::Truncation2));
        assert_eq!(check_n_bit(256, 8), Some(WarningKind::Truncation1));
    }

    #[test]
    fn division_by_known_zero_is_fatal_not_a_panic() {
        let symbols = SymbolTable::new();
        let mut diagnostics = DiagnosticSink::new(0);
        let err = Expr::make_binary_op(RpnOp::Div, Expr::Known(5), Expr::Known(0), &symbols, &mut diagnostics, None);
        assert!(err.is_err());
        assert_eq!(diagnostics.diagnostics.last().unwrap().severity, crate::diagnostics::Severity::Fatal);
    }

    #[test]
    fn modulo_by_known_zero_is_fatal_not_a_panic() {
        let symbols = SymbolTable::new();
        let mut diagnostics = DiagnosticSink::new(0);
        let err = Expr::make_binary_op(RpnOp::Mod, Expr::Known(5), Expr::Known(0), &symbols, &mut diagnostics, None);
        assert!(err.is_err());
    }

    #[test]
    fn negative_exponent_is_fatal_not_silently_one() {
        let symbols = SymbolTable::new();
        let mut diagnostics = DiagnosticSink::new(0);
        let err = Expr::make_binary_op(RpnOp::Exp, Expr::Known(2), Expr::Known(-1), &symbols, &mut diagnostics, None);
        assert!(err.is_err());
    }

    #[test]
    fn int_min_divided_by_negative_one_is_diagnosed() {
        let symbols = SymbolTable::new();
        let mut diagnostics = DiagnosticSink::new(0);
        let e = Expr::make_binary_op(RpnOp::Div, Expr::Known(i32::MIN), Expr::Known(-1), &symbols, &mut diagnostics, None).unwrap();
        assert_eq!(e.value(), Some(i32::MIN));
        assert!(diagnostics.diagnostics.iter().any(|d| d.message.contains("Division of")));
    }
}
