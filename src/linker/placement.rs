//! Section placement (§3 "Placement", §4.7), grounded on `assign.cpp`'s
//! `assign_AssignSections`.
//!
//! Every section gets a free-space pool per `(type, bank)`: a sorted list of
//! non-overlapping `[start, end)` byte ranges still available in that bank.
//! Sections are processed most-constrained-first (fixed bank+org+align
//! before fixed bank+org before fixed bank before fully floating, largest
//! first within a tier - `categorizeSection`'s bucketing), and each is
//! placed by first fit: the first free range in a candidate bank that's
//! large enough, honoring any `org`/`align` constraint. Union/Fragment
//! siblings all resolve to the placement chosen for the chain's head.

use crate::diagnostics::DiagnosticSink;
use crate::section::{Modifier, Section, SectionTable, SectionType};
use std::collections::HashMap;

/// One bank's still-available address ranges, as `[start, end)` pairs kept
/// sorted and non-overlapping.
#[derive(Debug, Clone, Default)]
struct FreeSpace {
    ranges: Vec<(u32, u32)>,
}

impl FreeSpace {
    fn whole(start: u32, end: u32) -> Self {
        FreeSpace { ranges: vec![(start, end)] }
    }

    /// First range offering `size` contiguous bytes satisfying `align`
    /// (`addr % (mask+1) == ofs`) and, if present, an exact `fixed_addr`.
    fn find_fit(&self, size: u32, align_mask: u32, align_ofs: u32, fixed_addr: Option<u32>) -> Option<u32> {
        for &(start, end) in &self.ranges {
            if let Some(addr) = fixed_addr {
                if addr >= start && addr + size <= end {
                    return Some(addr);
                }
                continue;
            }
            let mut addr = start;
            if align_mask != 0 {
                let rem = addr % (align_mask + 1);
                if rem != align_ofs {
                    let step = if align_ofs >= rem { align_ofs - rem } else { align_mask + 1 - (rem - align_ofs) };
                    addr += step;
                }
            }
            if addr + size <= end {
                return Some(addr);
            }
        }
        None
    }

    /// Removes `[addr, addr+size)` from the pool, splitting the containing
    /// range in two if there's space left on both sides (`placeSection`'s
    /// "delete, split, or shrink" cases).
    fn consume(&mut self, addr: u32, size: u32) {
        let end = addr + size;
        if let Some(idx) = self.ranges.iter().position(|&(s, e)| addr >= s && end <= e) {
            let (s, e) = self.ranges[idx];
            self.ranges.remove(idx);
            if s < addr {
                self.ranges.insert(idx, (s, addr));
            }
            if end < e {
                self.ranges.insert(if s < addr { idx + 1 } else { idx }, (end, e));
            }
            self.ranges.sort_unstable();
        }
    }
}

fn nb_banks_considering_options(ty: SectionType, options: &crate::options::LinkerOptions) -> u32 {
    if ty == SectionType::Vram && options.dmg_mode {
        1
    } else {
        ty.nb_banks()
    }
}

/// Owns the free-space pool for every `(type, bank)` and hands out
/// placements for sections in constraint-tightness order.
pub struct Placer {
    free: HashMap<(u8, u32), FreeSpace>,
    scramble_limits: HashMap<u8, u32>,
}

impl Placer {
    /// `initFreeSpace`.
    pub fn new(options: &crate::options::LinkerOptions) -> Self {
        let mut free = HashMap::new();
        for &ty in &[
            SectionType::Rom0,
            SectionType::Romx,
            SectionType::Vram,
            SectionType::Sram,
            SectionType::Wram0,
            SectionType::Wramx,
            SectionType::Oam,
            SectionType::Hram,
        ] {
            let info = ty.info();
            let banks = nb_banks_considering_options(ty, options);
            for bank in info.first_bank..info.first_bank + banks {
                let (start, size) = if ty == SectionType::Rom0 && options.tiny_rom0 {
                    (0u32, 0x8000u32)
                } else if ty == SectionType::Wram0 && options.wram0_is_8k {
                    (info.start_addr as u32, 0x2000u32)
                } else {
                    (info.start_addr as u32, info.size as u32)
                };
                free.insert((ty as u8, bank), FreeSpace::whole(start, start + size));
            }
        }
        let scramble_limits = options.scramble.iter().filter_map(|s| s.limit.map(|l| (s.region as u8, l))).collect();
        Placer { free, scramble_limits }
    }

    fn candidate_banks(&self, ty: SectionType, fixed_bank: Option<u32>) -> Vec<u32> {
        if let Some(b) = fixed_bank {
            return vec![b];
        }
        let info = ty.info();
        let last = self.scramble_limits.get(&(ty as u8)).copied().unwrap_or(info.last_bank);
        (info.first_bank..=last.min(info.last_bank)).collect()
    }

    /// `getPlacement`: finds a `(bank, addr)` for one section's constraints.
    fn find_placement(&self, ty: SectionType, fixed_org: Option<u16>, fixed_bank: Option<u32>, align_mask: u16, align_ofs: u16, size: u32) -> Option<(u32, u32)> {
        for bank in self.candidate_banks(ty, fixed_bank) {
            if let Some(space) = self.free.get(&(ty as u8, bank)) {
                if let Some(addr) = space.find_fit(size, align_mask as u32, align_ofs as u32, fixed_org.map(u32::from)) {
                    return Some((bank, addr));
                }
            }
        }
        None
    }

    fn place(&mut self, ty: SectionType, bank: u32, addr: u32, size: u32) {
        if let Some(space) = self.free.get_mut(&(ty as u8, bank)) {
            space.consume(addr, size);
        }
    }
}

/// Sort key matching `categorizeSection`'s bucket order: most-constrained
/// (bank+org+align fixed) first, largest size first within a tier.
fn constraint_rank(section: &Section) -> (u8, std::cmp::Reverse<u16>) {
    let bits = (section.is_bank_fixed() as u8) << 2 | (section.is_address_fixed() as u8) << 1 | section.is_align_fixed() as u8;
    (7 - bits, std::cmp::Reverse(section.size))
}

/// Places every section in `sections` (assigning `org`/`bank` on the chain
/// head and propagating to `next_piece` siblings), or records a diagnostic
/// per section that doesn't fit anywhere (§4.7 "a section that fits nowhere
/// is a linker error, not a panic").
pub fn assign_sections(sections: &mut SectionTable, options: &crate::options::LinkerOptions, diagnostics: &mut DiagnosticSink) {
    let mut placer = Placer::new(options);

    // Only chain heads (first piece of each Union/Fragment/Normal section)
    // carry the placement; a piece reached via another's `next_piece` is
    // skipped here and gets its address from propagation below.
    let is_head: Vec<bool> = {
        let mut reached = vec![false; sections.sections.len()];
        for section in sections.iter() {
            if let Some(next) = section.next_piece {
                if next < reached.len() {
                    reached[next] = true;
                }
            }
        }
        reached.iter().map(|&r| !r).collect()
    };

    let mut head_ids: Vec<u32> = (0..sections.sections.len() as u32).filter(|&id| is_head[id as usize]).collect();
    head_ids.sort_by_key(|&id| constraint_rank(sections.get(id).unwrap()));

    for head_id in head_ids {
        sections.finalize_union_or_fragment(head_id);
        let head = sections.get(head_id).unwrap();
        if head.size == 0 && head.org.is_none() {
            continue;
        }
        let (ty, fixed_org, fixed_bank, align_mask, align_ofs, size) =
            (head.ty, head.org, head.bank, head.align_mask(), head.align_ofs, head.size as u32);

        match placer.find_placement(ty, fixed_org, fixed_bank, align_mask, align_ofs, size.max(1)) {
            Some((bank, addr)) => {
                placer.place(ty, bank, addr, size.max(1));
                #[cfg(feature = "log")]
                log::trace!("placed section \"{}\" at bank {bank:02X}:{addr:04X}", sections.get(head_id).unwrap().name);
                propagate_placement(sections, head_id, bank, addr as u16);
            }
            None => {
                let name = sections.get(head_id).unwrap().name.clone();
                diagnostics.error(format!("Unable to place section \"{name}\" ({size} bytes) anywhere in {:?}", ty), None);
            }
        }
    }
}

/// Assigns `(bank, addr)` to `head_id` and every Union/Fragment sibling
/// chained after it, offsetting each Fragment piece by its accumulated
/// `offset` (§4.7 "Write back the chosen org/bank ... to all its
/// Union/Fragment siblings"). Shared with [`crate::linker::script`], which
/// pins sections the same way a `SECTION ... [$addr]` declaration would.
pub(crate) fn propagate_placement(sections: &mut SectionTable, head_id: u32, bank: u32, addr: u16) {
    let mut cur = Some(head_id as usize);
    while let Some(id) = cur {
        let piece_offset = sections.sections[id].offset;
        let modifier = sections.sections[id].modifier;
        sections.sections[id].bank = Some(bank);
        sections.sections[id].org = Some(match modifier {
            Modifier::Fragment => addr.wrapping_add(piece_offset as u16),
            _ => addr,
        });
        cur = sections.sections[id].next_piece;
    }
}

/// Pins just the bank of `head_id` and its siblings, leaving `org` floating
/// - the linker script's `FLOATING` directive (§6): the section still only
/// competes for space within that one bank during the ordinary placement
/// pass.
pub(crate) fn pin_bank_only(sections: &mut SectionTable, head_id: u32, bank: u32) {
    let mut cur = Some(head_id as usize);
    while let Some(id) = cur {
        sections.sections[id].bank = Some(bank);
        cur = sections.sections[id].next_piece;
    }
}
