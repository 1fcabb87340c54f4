//! String cells
//!
//! A string is an immutable cell pointing at its UTF-16 units. Strings whose
//! units all fit a byte are stored one byte per unit and flagged 8-bit.
//! Every Latin-1 unit has a preallocated one-character string that compiled
//! code hands out for `s[i]` without allocating.

use otter_dfg_graph::JsValue;
use otter_dfg_jit::ValueRepresentation;
use otter_dfg_jit::layout::{CellType, string};

use crate::error::VmResult;
use crate::heap;
use crate::vm::Vm;

/// Bytes in a string cell.
const STRING_CELL_SIZE: usize = 24;

impl<R: ValueRepresentation> Vm<R> {
    /// Allocate a string.
    pub fn new_string(&mut self, text: &str) -> VmResult<JsValue> {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.new_string_from_units(&units).map(JsValue::Cell)
    }

    pub(crate) fn new_string_from_units(&mut self, units: &[u16]) -> VmResult<usize> {
        let narrow = units.iter().all(|unit| *unit < 0x100);
        let bytes = if narrow { units.len() } else { units.len() * 2 };
        let characters = self.heap.allocate(bytes)?;
        for (i, unit) in units.iter().enumerate() {
            // SAFETY: `characters` holds `bytes` bytes.
            unsafe {
                if narrow {
                    ((characters + i) as *mut u8).write(*unit as u8);
                } else {
                    ((characters + i * 2) as *mut u16).write(*unit);
                }
            }
        }
        let structure = self.root_structure(CellType::String, 0);
        let address = self.allocate_cell(STRING_CELL_SIZE, structure, CellType::String)?;
        // SAFETY: string cells are `STRING_CELL_SIZE` bytes.
        unsafe {
            heap::write_u32(address, string::LENGTH, units.len() as u32);
            heap::write_u32(address, string::FLAGS, if narrow { string::FLAG_8BIT } else { 0 });
            heap::write_u64(address, string::CHARACTERS, characters as u64);
        }
        Ok(address)
    }

    pub(crate) fn string_length(&self, address: usize) -> u32 {
        // SAFETY: callers pass string cells.
        unsafe { heap::read_u32(address, string::LENGTH) }
    }

    /// UTF-16 unit at `index`.
    pub(crate) fn char_code_at(&self, address: usize, index: u32) -> Option<u16> {
        if index >= self.string_length(address) {
            return None;
        }
        // SAFETY: callers pass string cells; the index is below the length.
        unsafe {
            let flags = heap::read_u32(address, string::FLAGS);
            let characters = heap::read_u64(address, string::CHARACTERS) as usize;
            Some(if flags & string::FLAG_8BIT != 0 {
                ((characters + index as usize) as *const u8).read() as u16
            } else {
                ((characters + index as usize * 2) as *const u16).read()
            })
        }
    }

    pub(crate) fn string_units(&self, address: usize) -> Vec<u16> {
        (0..self.string_length(address))
            .filter_map(|i| self.char_code_at(address, i))
            .collect()
    }

    /// Contents of a string value.
    pub fn string_value(&self, value: JsValue) -> Option<String> {
        let address = value.as_cell()?;
        (self.cell_type(address) == Some(CellType::String))
            .then(|| String::from_utf16_lossy(&self.string_units(address)))
    }

    /// One-unit string, shared for Latin-1 units.
    pub(crate) fn single_character_string(&mut self, unit: u16) -> VmResult<usize> {
        match self.single_character_strings.get(unit as usize) {
            Some(address) => Ok(*address as usize),
            None => self.new_string_from_units(&[unit]),
        }
    }

    pub(crate) fn build_single_character_strings(&mut self) -> VmResult<Box<[u64]>> {
        (0..0x100u16)
            .map(|unit| self.new_string_from_units(&[unit]).map(|a| a as u64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::VmConfig;
    use crate::vm::Vm;
    use otter_dfg_graph::JsValue;
    use otter_dfg_jit::ActiveEncoding;

    #[test]
    fn wide_and_narrow_strings() {
        let mut vm = Vm::<ActiveEncoding>::new(VmConfig {
            heap_size: 1 << 20,
            register_file_slots: 1024,
            ..VmConfig::baseline_only()
        })
        .expect("vm should be created");
        let latin = vm.new_string("café").expect("allocation should succeed");
        let wide = vm.new_string("π≈3").expect("allocation should succeed");
        assert_eq!(vm.string_value(latin).as_deref(), Some("café"));
        assert_eq!(vm.string_value(wide).as_deref(), Some("π≈3"));
        assert_eq!(vm.array_length(wide), Some(3));

        let first = vm.get_index(latin, 0).expect("get should succeed");
        let again = vm.get_index(latin, 0).expect("get should succeed");
        assert_eq!(first, again);
        assert_eq!(vm.string_value(first).as_deref(), Some("c"));
        let pi = vm.get_index(wide, 0).expect("get should succeed");
        assert_eq!(vm.string_value(pi).as_deref(), Some("π"));
        assert_eq!(vm.string_value(JsValue::Int32(1)), None);
    }
}
