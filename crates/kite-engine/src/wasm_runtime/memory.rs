//! WASM Memory Access
//!
//! Bounds-checked reads and writes into a guest's linear memory. Every
//! (offset, length) pair handed over by a guest goes through [`GuestMemory`];
//! an out-of-range region is a typed error, never a host panic.

use wasmtime::{AsContext, AsContextMut, Caller, Extern, Memory};

use super::types::{WasmError, WasmResult};

/// Guest pointer type (32-bit address in WASM linear memory)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuestPtr(pub u32);

impl GuestPtr {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

/// Guest slice (pointer + length)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestSlice {
    pub ptr: GuestPtr,
    pub len: u32,
}

impl GuestSlice {
    pub fn from_raw(ptr: u32, len: u32) -> Self {
        Self {
            ptr: GuestPtr(ptr),
            len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Host byte range covered by this slice, if it fits in `memory_size`.
    fn range(&self, memory_size: usize) -> WasmResult<std::ops::Range<usize>> {
        let start = self.ptr.as_usize();
        let end = start
            .checked_add(self.len as usize)
            .filter(|end| *end <= memory_size)
            .ok_or(WasmError::MemoryOutOfBounds {
                offset: self.ptr.0,
                size: self.len,
            })?;
        Ok(start..end)
    }
}

/// The exported linear memory of one instance.
#[derive(Debug, Clone, Copy)]
pub struct GuestMemory {
    memory: Memory,
}

impl GuestMemory {
    pub const EXPORT_NAME: &'static str = "memory";

    pub fn new(memory: Memory) -> Self {
        Self { memory }
    }

    /// Resolve the `memory` export of the calling instance.
    pub fn from_caller<T>(caller: &mut Caller<'_, T>) -> WasmResult<Self> {
        caller
            .get_export(Self::EXPORT_NAME)
            .and_then(Extern::into_memory)
            .map(Self::new)
            .ok_or_else(|| WasmError::ExportNotFound(Self::EXPORT_NAME.to_string()))
    }

    /// Copy `slice` out of guest memory.
    pub fn read<T: 'static>(
        &self,
        store: impl AsContext<Data = T>,
        slice: GuestSlice,
    ) -> WasmResult<Vec<u8>> {
        let data = self.memory.data(&store);
        let range = slice.range(data.len())?;
        Ok(data[range].to_vec())
    }

    /// Copy `bytes` into guest memory starting at `ptr`.
    pub fn write<T: 'static>(
        &self,
        mut store: impl AsContextMut<Data = T>,
        ptr: GuestPtr,
        bytes: &[u8],
    ) -> WasmResult<()> {
        let len =
            u32::try_from(bytes.len()).map_err(|_| WasmError::PayloadTooLarge(bytes.len()))?;
        let data = self.memory.data_mut(&mut store);
        let range = GuestSlice { ptr, len }.range(data.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn size_bytes(&self, store: impl AsContext) -> usize {
        self.memory.data_size(store)
    }
}
