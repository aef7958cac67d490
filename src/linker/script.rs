//! Linker script (§6 "Linker script", C9), grounded on `link/script.cpp`.
//!
//! One statement per line: a section-type keyword (optionally followed by a
//! bank number) selects the current placement context; `ORG`/`FLOATING`
//! fix or release the address cursor within it; a quoted `"section name"`
//! places that section at the cursor and advances it by the section's size;
//! `ALIGN`/`DS` move the cursor without placing anything; `INCLUDE` splices
//! another script in verbatim; `;` starts a line comment.
//!
//! [`LinkerScript::apply`] assigns `org`/`bank` directly onto the named
//! sections (propagating to Union/Fragment siblings the same way
//! [`crate::linker::placement::assign_sections`] does) rather than running
//! its own bin-packer: a script-pinned section becomes fully constrained
//! (bank- and org-fixed), so the ordinary placement pass treats it exactly
//! like a `SECTION ... [$addr]` declaration and still detects overlaps
//! against everything else.

use crate::diagnostics::DiagnosticSink;
use crate::section::{SectionTable, SectionType};

#[derive(Debug, Clone)]
enum Command {
    SetType(SectionType, Option<u32>),
    Org(u16),
    Floating,
    Default(u32),
    Align(u8, u16),
    Skip(u16),
    Place(String),
}

/// A parsed linker script, ready to be [`apply`](LinkerScript::apply)ed to a
/// [`SectionTable`].
#[derive(Debug, Clone, Default)]
pub struct LinkerScript {
    commands: Vec<Command>,
}

impl LinkerScript {
    /// Parses `text`. `include` resolves an `INCLUDE path` line to that
    /// file's contents (file I/O itself is the caller's concern, §1).
    pub fn parse(text: &str, mut include: impl FnMut(&str) -> Result<String, String>) -> Result<LinkerScript, String> {
        let mut commands = Vec::new();
        Self::parse_into(text, &mut commands, &mut include, 0)?;
        Ok(LinkerScript { commands })
    }

    /// Parses a script with no `INCLUDE` support (errors if one appears).
    pub fn parse_standalone(text: &str) -> Result<LinkerScript, String> {
        Self::parse(text, |path| Err(format!("INCLUDE \"{path}\" is not supported by this parser")))
    }

    fn parse_into(
        text: &str,
        commands: &mut Vec<Command>,
        include: &mut impl FnMut(&str) -> Result<String, String>,
        depth: u32,
    ) -> Result<(), String> {
        if depth > 32 {
            return Err("linker script INCLUDE nesting is too deep".to_string());
        }
        for (idx, raw_line) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('"') {
                let end = rest.find('"').ok_or_else(|| format!("line {lineno}: unterminated section name"))?;
                commands.push(Command::Place(rest[..end].to_string()));
                continue;
            }

            let mut words = line.split_whitespace();
            let keyword = words.next().expect("non-empty line");
            let rest: Vec<&str> = words.collect();

            match keyword.to_ascii_uppercase().as_str() {
                "ORG" => {
                    let addr = parse_num(rest.first().ok_or_else(|| format!("line {lineno}: ORG needs an address"))?)
                        .map_err(|e| format!("line {lineno}: {e}"))?;
                    commands.push(Command::Org(addr as u16));
                }
                "FLOATING" => commands.push(Command::Floating),
                "DEFAULT" => {
                    let bank = parse_num(rest.first().ok_or_else(|| format!("line {lineno}: DEFAULT needs a bank"))?)
                        .map_err(|e| format!("line {lineno}: {e}"))?;
                    commands.push(Command::Default(bank));
                }
                "ALIGN" => {
                    let joined = rest.join(" ");
                    let mut fields = joined.splitn(2, ',');
                    let n = parse_num(fields.next().unwrap_or("").trim()).map_err(|e| format!("line {lineno}: {e}"))?;
                    let ofs = match fields.next() {
                        Some(s) => parse_num(s.trim()).map_err(|e| format!("line {lineno}: {e}"))?,
                        None => 0,
                    };
                    commands.push(Command::Align(n as u8, ofs as u16));
                }
                "DS" => {
                    let n = parse_num(rest.first().ok_or_else(|| format!("line {lineno}: DS needs a length"))?)
                        .map_err(|e| format!("line {lineno}: {e}"))?;
                    commands.push(Command::Skip(n as u16));
                }
                "INCLUDE" => {
                    let path = rest.join(" ");
                    let path = path.trim_matches('"');
                    let text = include(path).map_err(|e| format!("line {lineno}: {e}"))?;
                    Self::parse_into(&text, commands, include, depth + 1)?;
                }
                other => {
                    let Some(ty) = section_type_from_name(other) else {
                        return Err(format!("line {lineno}: unrecognized linker script directive '{other}'"));
                    };
                    let bank = rest
                        .first()
                        .map(|s| parse_num(s).map_err(|e| format!("line {lineno}: {e}")))
                        .transpose()?;
                    commands.push(Command::SetType(ty, bank));
                }
            }
        }
        Ok(())
    }

    /// Runs every directive in order, pinning named sections' `org`/`bank`
    /// (or, after `FLOATING`, just their `bank`) as the cursor advances.
    /// Returns the names placed by the script, purely informational -
    /// nothing further is needed to make the ordinary placement pass (§4.7)
    /// honor them, since a fully bank+org-fixed section is already its most
    /// constrained tier.
    pub fn apply(&self, sections: &mut SectionTable, diagnostics: &mut DiagnosticSink) -> Vec<String> {
        let mut placed = Vec::new();
        let mut cur_type: Option<SectionType> = None;
        let mut cur_bank: u32 = 0;
        let mut cursor: u32 = 0;
        let mut floating = false;

        for command in &self.commands {
            match command {
                Command::SetType(ty, bank) => {
                    cur_type = Some(*ty);
                    cur_bank = bank.unwrap_or_else(|| ty.info().first_bank);
                    cursor = ty.info().start_addr as u32;
                    floating = false;
                }
                Command::Org(addr) => {
                    cursor = *addr as u32;
                    floating = false;
                }
                Command::Floating => floating = true,
                Command::Default(bank) => cur_bank = *bank,
                Command::Align(bits, ofs) => {
                    if *bits > 0 {
                        let mask = (1u32 << bits) - 1;
                        let ofs = *ofs as u32;
                        let rem = cursor % (mask + 1);
                        if rem != ofs {
                            cursor += if ofs >= rem { ofs - rem } else { mask + 1 - (rem - ofs) };
                        }
                    }
                }
                Command::Skip(n) => cursor += *n as u32,
                Command::Place(name) => {
                    let Some(ty) = cur_type else {
                        diagnostics.error(format!("linker script places \"{name}\" before any section-type directive"), None);
                        continue;
                    };
                    let Some(id) = sections.find_id_by_name(name) else {
                        diagnostics.error(format!("linker script places unknown section \"{name}\""), None);
                        continue;
                    };
                    sections.finalize_union_or_fragment(id);
                    let section_ty = sections.get(id).unwrap().ty;
                    if section_ty != ty {
                        diagnostics.error(
                            format!("linker script places \"{name}\" in {ty:?} but it was declared {section_ty:?}"),
                            None,
                        );
                        continue;
                    }
                    let size = sections.get(id).unwrap().size as u32;

                    if floating {
                        super::placement::pin_bank_only(sections, id, cur_bank);
                    } else {
                        super::placement::propagate_placement(sections, id, cur_bank, cursor as u16);
                        cursor += size.max(1);
                    }
                    placed.push(name.clone());
                }
            }
        }
        placed
    }
}

fn section_type_from_name(s: &str) -> Option<SectionType> {
    match s {
        "ROM0" => Some(SectionType::Rom0),
        "ROMX" => Some(SectionType::Romx),
        "VRAM" => Some(SectionType::Vram),
        "SRAM" => Some(SectionType::Sram),
        "WRAM0" => Some(SectionType::Wram0),
        "WRAMX" => Some(SectionType::Wramx),
        "OAM" => Some(SectionType::Oam),
        "HRAM" => Some(SectionType::Hram),
        _ => None,
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_num(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('$') {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else if let Some(oct) = s.strip_prefix('&') {
        u32::from_str_radix(oct, 8).map_err(|e| e.to_string())
    } else if let Some(bin) = s.strip_prefix('%') {
        u32::from_str_radix(bin, 2).map_err(|e| e.to_string())
    } else {
        s.parse::<u32>().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::{Modifier, SectionType as Ty};

    #[test]
    fn places_section_at_cursor_and_advances() {
        let mut sections = SectionTable::new();
        let a = sections.create_rom0("A").unwrap();
        sections.get_mut(a).unwrap().emit_bytes(&[0; 4]).unwrap();
        let b = sections.create_rom0("B").unwrap();
        sections.get_mut(b).unwrap().emit_bytes(&[0; 2]).unwrap();

        let script = LinkerScript::parse_standalone(
            "ROM0\nORG $0150\n\"A\"\n\"B\"\n",
        )
        .unwrap();
        let mut diags = DiagnosticSink::new(0);
        let placed = script.apply(&mut sections, &mut diags);

        assert_eq!(diags.error_count, 0);
        assert_eq!(placed, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(sections.get(a).unwrap().org, Some(0x0150));
        assert_eq!(sections.get(b).unwrap().org, Some(0x0154));
    }

    #[test]
    fn unknown_section_is_an_error() {
        let mut sections = SectionTable::new();
        let script = LinkerScript::parse_standalone("ROM0\n\"Missing\"\n").unwrap();
        let mut diags = DiagnosticSink::new(0);
        script.apply(&mut sections, &mut diags);
        assert_eq!(diags.error_count, 1);
    }

    #[test]
    fn align_and_ds_advance_the_cursor_without_placing() {
        let mut sections = SectionTable::new();
        let a = sections.create("A", Ty::Wram0, None, None, 0, 0, Modifier::Normal).unwrap();
        sections.get_mut(a).unwrap().reserve(1, 0);

        let script = LinkerScript::parse_standalone("WRAM0\nDS 4\nALIGN 2\n\"A\"\n").unwrap();
        let mut diags = DiagnosticSink::new(0);
        script.apply(&mut sections, &mut diags);
        assert_eq!(diags.error_count, 0);
        // start 0xC000 + DS 4 -> 0xC004, ALIGN 2 (4-byte) already aligned.
        assert_eq!(sections.get(a).unwrap().org, Some(0xC004));
    }

    #[test]
    fn floating_pins_bank_only() {
        let mut sections = SectionTable::new();
        let a = sections.create("A", Ty::Wramx, None, None, 0, 0, Modifier::Normal).unwrap();
        sections.get_mut(a).unwrap().reserve(1, 0);

        let script = LinkerScript::parse_standalone("WRAMX 3\nFLOATING\n\"A\"\n").unwrap();
        let mut diags = DiagnosticSink::new(0);
        script.apply(&mut sections, &mut diags);
        assert_eq!(sections.get(a).unwrap().bank, Some(3));
        assert_eq!(sections.get(a).unwrap().org, None);
    }
}
