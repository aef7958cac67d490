//! Charmap translation (`[ADD] §4.10`, grounded on
//! `asm/charmap.h`/`asm/charmap.c`).
//!
//! Each named charmap maps UTF-8 key strings to one-or-more output bytes.
//! Conversion is longest-prefix-match: at every position, the longest key
//! that matches the remaining input wins. The original keeps a 256-ary trie
//! (`struct Charnode`) for O(1) per-byte transitions; this keeps the same
//! matching semantics with a `BTreeMap<String, Vec<u8>>` searched by
//! decreasing candidate-key length, trading a constant factor for a much
//! smaller and simpler implementation - conversion throughput isn't on this
//! crate's critical path the way it is for a hand-rolled trie walker.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub struct Charmap {
    pub name: String,
    entries: BTreeMap<String, Vec<u8>>,
    /// Longest key length currently registered, so conversion knows how far
    /// to probe without scanning every entry.
    max_key_len: usize,
}

impl Charmap {
    fn new(name: impl Into<String>) -> Charmap {
        Charmap { name: name.into(), entries: BTreeMap::new(), max_key_len: 0 }
    }

    /// `charmap_Add` - registers (or overwrites) one mapping.
    pub fn add(&mut self, key: impl Into<String>, output: Vec<u8>) {
        let key = key.into();
        self.max_key_len = self.max_key_len.max(key.chars().count());
        self.entries.insert(key, output);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every registered `(key, output bytes)` pair, in key order - used by
    /// [`crate::statedump`] to emit `charmap "key", $hex...` lines.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// `charmap_Convert` - consumes the longest matching prefix of `input`,
    /// returning its output bytes and how many *characters* were consumed.
    /// Falls back to consuming one character verbatim (its byte value, valid
    /// only for ASCII - matching the original's fallback of "emit the raw
    /// byte") when nothing in the map matches.
    pub fn convert<'a>(&self, input: &'a str) -> (Vec<u8>, usize) {
        let chars: Vec<char> = input.chars().collect();
        let longest = self.max_key_len.min(chars.len());
        for len in (1..=longest).rev() {
            let candidate: String = chars[..len].iter().collect();
            if let Some(out) = self.entries.get(&candidate) {
                return (out.clone(), len);
            }
        }
        if let Some(&c) = chars.first() {
            let mut buf = [0u8; 4];
            let bytes = c.encode_utf8(&mut buf).as_bytes();
            (bytes.to_vec(), 1)
        } else {
            (Vec::new(), 0)
        }
    }

    /// Translates an entire string, one longest-match step at a time.
    pub fn convert_all(&self, input: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut rest = input;
        while !rest.is_empty() {
            let (bytes, consumed_chars) = self.convert(rest);
            out.extend_from_slice(&bytes);
            let consumed_bytes: usize = rest.chars().take(consumed_chars).map(char::len_utf8).sum();
            rest = &rest[consumed_bytes..];
        }
        out
    }
}

/// Owns every named charmap plus the current active one and a push/pop
/// stack (`charmap_Push`/`charmap_Pop`, used to save/restore the active
/// charmap across `INCLUDE`-like scopes).
pub struct CharmapTable {
    maps: HashMap<String, Rc<std::cell::RefCell<Charmap>>>,
    current: String,
    stack: Vec<String>,
}

const MAIN: &str = "main";

impl Default for CharmapTable {
    fn default() -> Self {
        CharmapTable::new()
    }
}

impl CharmapTable {
    /// `charmap_InitMain` - seeds the implicit "main" charmap, mapping every
    /// ASCII byte to itself (the identity charmap used when the source never
    /// declares one).
    pub fn new() -> CharmapTable {
        let mut main = Charmap::new(MAIN);
        for b in 0u8..=255 {
            main.add((b as char).to_string(), vec![b]);
        }
        let mut maps = HashMap::new();
        maps.insert(MAIN.to_string(), Rc::new(std::cell::RefCell::new(main)));
        CharmapTable { maps, current: MAIN.to_string(), stack: Vec::new() }
    }

    /// `charmap_New` - creates a new charmap, optionally cloning `base_name`'s
    /// entries as a starting point, and makes it current.
    pub fn new_charmap(&mut self, name: &str, base_name: Option<&str>) -> Result<(), String> {
        if self.maps.contains_key(name) {
            return Err(format!("Charmap '{name}' already exists"));
        }
        let mut map = Charmap::new(name);
        if let Some(base) = base_name {
            let base = self.maps.get(base).ok_or_else(|| format!("Base charmap '{base}' doesn't exist"))?;
            map.entries = base.borrow().entries.clone();
            map.max_key_len = base.borrow().max_key_len;
        }
        self.maps.insert(name.to_string(), Rc::new(std::cell::RefCell::new(map)));
        self.current = name.to_string();
        Ok(())
    }

    /// `charmap_Set` - switches the active charmap by name.
    pub fn set(&mut self, name: &str) -> Result<(), String> {
        if !self.maps.contains_key(name) {
            return Err(format!("Charmap '{name}' doesn't exist"));
        }
        self.current = name.to_string();
        Ok(())
    }

    pub fn push(&mut self) {
        self.stack.push(self.current.clone());
    }

    pub fn pop(&mut self) -> Result<(), String> {
        self.current = self.stack.pop().ok_or_else(|| "charmap stack is empty".to_string())?;
        Ok(())
    }

    pub fn add(&mut self, key: &str, output: Vec<u8>) {
        self.maps[&self.current].borrow_mut().add(key, output);
    }

    pub fn current(&self) -> Rc<std::cell::RefCell<Charmap>> {
        Rc::clone(&self.maps[&self.current])
    }

    pub fn current_name(&self) -> &str {
        &self.current
    }

    /// Every user-declared charmap (i.e. every `NEWCHARMAP`, excluding the
    /// implicit identity `"main"` map nothing ever explicitly declares) - used
    /// by [`crate::statedump`]'s `-s CHARMAP` output.
    pub fn iter(&self) -> impl Iterator<Item = (&str, std::cell::Ref<'_, Charmap>)> {
        self.maps.iter().filter(|(name, _)| name.as_str() != MAIN).map(|(name, map)| (name.as_str(), map.borrow()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let mut map = Charmap::new("test");
        map.add("A", vec![0x01]);
        map.add("AB", vec![0x02]);
        let (out, consumed) = map.convert("ABC");
        assert_eq!(out, vec![0x02]);
        assert_eq!(consumed, 2);
    }

    #[test]
    fn unmapped_char_falls_back_to_raw_byte() {
        let map = Charmap::new("empty");
        let (out, consumed) = map.convert("x");
        assert_eq!(out, vec![b'x']);
        assert_eq!(consumed, 1);
    }

    #[test]
    fn push_pop_restores_active_charmap() {
        let mut table = CharmapTable::new();
        table.new_charmap("custom", None).unwrap();
        table.push();
        table.set(MAIN).unwrap();
        assert_eq!(table.current_name(), MAIN);
        table.pop().unwrap();
        assert_eq!(table.current_name(), "custom");
    }

    #[test]
    fn convert_all_translates_full_string() {
        let mut table = CharmapTable::new();
        table.new_charmap("game", Some(MAIN)).unwrap();
        table.set("game").unwrap();
        table.add("<A>", vec![0x10]);
        let out = table.current().borrow().convert_all("x<A>y");
        assert_eq!(out, vec![b'x', 0x10, b'y']);
    }
}
