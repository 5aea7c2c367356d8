//! C ABI exported to AFL++'s custom mutator loader.
//!
//! The host dlopens the cdylib and resolves these symbols by name. Every
//! hook is a hard boundary: a panic crossing an `extern "C"` frame aborts
//! the whole fuzzer, so each body runs under `catch_unwind` and resolves
//! failure to a usable buffer instead.

use crate::config::{LOG_ENV, MutatorConfig};
use crate::engine::MutationEngine;
use std::ffi::{c_char, c_uint, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::slice;

/// Emitted when not even the host's own buffer is available to fall back on.
static PLACEHOLDER: &[u8] = b"{}";

struct MutatorState {
    engine: MutationEngine,
    /// Owns the most recent output; the pointer handed to the host stays
    /// valid until the next fuzz call or deinit, per the AFL++ contract.
    scratch: Vec<u8>,
}

fn init_logging() {
    if std::env::var_os(LOG_ENV).is_some() {
        let _ = env_logger::Builder::from_env(env_logger::Env::new().filter(LOG_ENV)).try_init();
    }
}

/// Called once per fuzzer instance before any mutation.
///
/// Reads configuration from the environment (see [`MutatorConfig::from_env`])
/// and seeds the engine from the host-provided value so runs are replayable.
///
/// # Safety
/// `_afl` is opaque and never dereferenced. The returned pointer must be
/// released through [`afl_custom_deinit`] and not freed by other means.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn afl_custom_init(_afl: *mut c_void, seed: c_uint) -> *mut c_void {
    let state = catch_unwind(|| {
        init_logging();
        let config = MutatorConfig::from_env();
        log::info!("Mutator initialized with seed {}", seed);
        Box::new(MutatorState {
            engine: MutationEngine::with_seed(&config, u64::from(seed)),
            scratch: Vec::new(),
        })
    });
    match state {
        Ok(state) => Box::into_raw(state) as *mut c_void,
        Err(_) => std::ptr::null_mut(),
    }
}

/// Produces one mutated testcase.
///
/// Writes the output pointer into `*out_buf` and returns its length, which
/// never exceeds `max_size`. On any internal failure the host's own `buf`
/// is handed back clipped; with no usable `buf` a static `{}` placeholder
/// goes out instead. Returns 0 only when `out_buf` itself is null.
///
/// # Safety
/// `data` must be null or a pointer from [`afl_custom_init`]. `buf` and
/// `add_buf`, when non-null, must point to readable memory of the stated
/// sizes. `out_buf`, when non-null, must be writable. The buffer placed in
/// `*out_buf` is owned by the mutator and only valid until the next call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn afl_custom_fuzz(
    data: *mut c_void,
    buf: *mut u8,
    buf_size: usize,
    out_buf: *mut *mut u8,
    add_buf: *mut u8,
    add_buf_size: usize,
    max_size: usize,
) -> usize {
    if out_buf.is_null() {
        return 0;
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let state = unsafe { (data as *mut MutatorState).as_mut() }?;
        let seed: &[u8] = if buf.is_null() {
            &[]
        } else {
            unsafe { slice::from_raw_parts(buf, buf_size) }
        };
        let aux: &[u8] = if add_buf.is_null() {
            &[]
        } else {
            unsafe { slice::from_raw_parts(add_buf, add_buf_size) }
        };
        state.scratch = state.engine.mutate(seed, aux, max_size);
        Some((state.scratch.as_mut_ptr(), state.scratch.len()))
    }));

    match outcome {
        Ok(Some((ptr, len))) => {
            unsafe { *out_buf = ptr };
            len
        }
        _ => unsafe { fallback_out(buf, buf_size, out_buf, max_size) },
    }
}

/// Hands the host a buffer when the engine could not. Prefers the host's
/// own input clipped to the cap; a null input gets the placeholder.
///
/// # Safety
/// `out_buf` must be non-null and writable; `buf`, when non-null, must be
/// readable for `buf_size` bytes.
unsafe fn fallback_out(
    buf: *mut u8,
    buf_size: usize,
    out_buf: *mut *mut u8,
    max_size: usize,
) -> usize {
    if !buf.is_null() {
        unsafe { *out_buf = buf };
        return buf_size.min(max_size);
    }
    let len = PLACEHOLDER.len().min(max_size);
    unsafe { *out_buf = PLACEHOLDER.as_ptr() as *mut u8 };
    len
}

/// Notifies the mutator that the host kept a testcase in its queue.
///
/// Credits the operator behind the most recent mutation with a new-path
/// reward. Always returns 0: the queue file itself is never rewritten.
///
/// # Safety
/// `data` must be null or a pointer from [`afl_custom_init`]. The filename
/// pointers are unused and may be anything.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn afl_custom_queue_new_entry(
    data: *mut c_void,
    _filename_new_queue: *const c_char,
    _filename_orig_queue: *const c_char,
) -> u8 {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        if let Some(state) = unsafe { (data as *mut MutatorState).as_mut() } {
            state.engine.record_outcome(0, false, true);
        }
    }));
    0
}

/// Releases the state allocated by [`afl_custom_init`]. Null is tolerated.
///
/// # Safety
/// `data` must be null or a pointer from [`afl_custom_init`] that has not
/// already been passed here.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn afl_custom_deinit(data: *mut c_void) {
    if data.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        drop(unsafe { Box::from_raw(data as *mut MutatorState) });
    }));
}
