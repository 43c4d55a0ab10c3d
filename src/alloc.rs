//! Raw buffer allocation for engine-managed binary data.
//!
//! Engines allocate backing stores for binary buffers (ArrayBuffer-style
//! objects) through an embedder-supplied allocator rather than their own
//! heap. This module provides that allocator: a zero-initializing variant,
//! an uninitialized variant for cases where the engine will overwrite the
//! memory anyway, and the matching free.

/// Embedder-supplied allocator for engine-managed binary buffers.
///
/// The engine calls `allocate` when script code creates a binary buffer,
/// and `free` when the buffer is collected. Implementations must be safe to
/// call from the engine's owning thread at arbitrary points during script
/// execution.
pub trait ArrayBufferAllocator: Send + Sync {
    /// Allocate `len` bytes of zeroed memory.
    fn allocate(&self, len: usize) -> *mut u8;

    /// Allocate `len` bytes without zeroing (the engine initializes them).
    fn allocate_uninitialized(&self, len: usize) -> *mut u8;

    /// Free a buffer previously returned by one of the allocate variants.
    ///
    /// # Safety
    ///
    /// `data` must have been returned by `allocate` or
    /// `allocate_uninitialized` on this allocator with the same `len`, and
    /// must not be used after this call.
    unsafe fn free(&self, data: *mut u8, len: usize);
}

/// Stateless default allocator backed by the Rust global allocator.
pub struct GenericAllocator;

/// Shared instance handed to every isolate this crate creates.
pub static GENERIC_ALLOCATOR: GenericAllocator = GenericAllocator;

impl ArrayBufferAllocator for GenericAllocator {
    fn allocate(&self, len: usize) -> *mut u8 {
        // vec![0u8; len] zeroes, into_boxed_slice drops the capacity field,
        // into_raw hands ownership to the engine.
        Box::into_raw(vec![0u8; len].into_boxed_slice()) as *mut u8
    }

    #[allow(clippy::uninit_vec)]
    fn allocate_uninitialized(&self, len: usize) -> *mut u8 {
        let mut store: Vec<u8> = Vec::with_capacity(len);
        // SAFETY: capacity for len bytes was just reserved; the engine
        // initializes the contents before script code can observe them.
        unsafe { store.set_len(len) };
        Box::into_raw(store.into_boxed_slice()) as *mut u8
    }

    unsafe fn free(&self, data: *mut u8, len: usize) {
        // SAFETY: data was produced by Box::into_raw of a len-byte boxed
        // slice in one of the allocate variants.
        let _ = unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(data, len)) };
    }
}
