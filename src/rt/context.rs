//! Low-level execution context capture and transfer.
//!
//! A [`Context`] is a snapshot of the callee-saved register set, including
//! the stack pointer and the address execution resumes at. Saving into one
//! and restoring from another is the entire mechanism behind suspending a
//! coroutine mid-call and re-entering it later at the exact same program
//! point. Everything `unsafe` about control transfer lives in this module;
//! the scheduler only ever hands it raw pointers to two contexts.

use std::arch::naked_asm;

/// Saved CPU state for a suspended coroutine.
///
/// Holds exactly the registers the platform ABI requires a callee to
/// preserve. Caller-saved registers do not need to be part of the snapshot:
/// a context switch only ever happens inside a function call
/// ([`context_switch`]), so the compiler has already spilled anything live
/// in them.
#[cfg(target_arch = "x86_64")]
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct Context {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

/// Saved CPU state for a suspended coroutine.
///
/// Holds exactly the registers the AAPCS64 ABI requires a callee to
/// preserve: `sp`, `x19`-`x28`, the frame pointer and link register, and
/// the low halves of `v8`-`v15`.
#[cfg(target_arch = "aarch64")]
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct Context {
    sp: u64,
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    fp: u64,
    lr: u64,
    d: [u64; 8],
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("only x86_64 and aarch64 are supported");

/// Saves the calling context into `old` and resumes execution from `new`.
///
/// For a context previously saved by this function, the resume point is the
/// instruction after its own `context_switch` call, with the full register
/// and stack state of that moment intact. For a context built by
/// [`Context::with_entry`], the resume point is the entry function at the
/// top of a fresh stack.
///
/// This call "returns" only once some later switch restores `old`.
///
/// # Safety
///
/// Both pointers must be valid and distinct. `new` must hold either a
/// previously saved context or one built by [`Context::with_entry`] over a
/// live stack; restoring anything else transfers control to garbage.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn context_switch(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        // Spill callee-saved registers into `old` (rdi). The return address
        // of this very call is already on the stack, so saving rsp here is
        // what makes resumption land on the instruction after the call.
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        // Restore callee-saved registers from `new` (rsi).
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        // Pops either the saved return address (suspended context) or the
        // entry address planted by `with_entry` (fresh context).
        "ret",
    );
}

/// Saves the calling context into `old` and resumes execution from `new`.
///
/// See the x86_64 variant for the contract.
///
/// # Safety
///
/// Both pointers must be valid and distinct. `new` must hold either a
/// previously saved context or one built by [`Context::with_entry`] over a
/// live stack.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn context_switch(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        // Spill callee-saved state into `old` (x0). The link register holds
        // this call's return address; restoring it later and issuing `ret`
        // resumes right after the call.
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "stp x19, x20, [x0, #0x08]",
        "stp x21, x22, [x0, #0x18]",
        "stp x23, x24, [x0, #0x28]",
        "stp x25, x26, [x0, #0x38]",
        "stp x27, x28, [x0, #0x48]",
        "stp x29, x30, [x0, #0x58]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Restore callee-saved state from `new` (x1).
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldp x19, x20, [x1, #0x08]",
        "ldp x21, x22, [x1, #0x18]",
        "ldp x23, x24, [x1, #0x28]",
        "ldp x25, x26, [x1, #0x38]",
        "ldp x27, x28, [x1, #0x48]",
        "ldp x29, x30, [x1, #0x58]",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}

impl Context {
    /// Builds a context whose first restore calls `entry` at the top of the
    /// stack ending at `stack_top` (one past the highest usable byte).
    ///
    /// `entry` must never return: there is no frame beneath it to return
    /// into.
    #[cfg(target_arch = "x86_64")]
    pub(crate) fn with_entry(entry: extern "C" fn() -> !, stack_top: *mut u8) -> Context {
        // Plant `entry` where `context_switch`'s `ret` will pop it. The slot
        // sits 16 bytes below the aligned top so that after the pop
        // `rsp % 16 == 8`, exactly the alignment a function observes on
        // entry after a `call`.
        let slot = ((stack_top as u64) & !15) - 16;

        // SAFETY: `slot` is in bounds of the private stack (which is far
        // larger than 16 bytes) and 8-byte aligned.
        unsafe {
            std::ptr::write(slot as *mut u64, entry as usize as u64);
        }

        Context {
            rsp: slot,
            ..Default::default()
        }
    }

    /// Builds a context whose first restore calls `entry` at the top of the
    /// stack ending at `stack_top` (one past the highest usable byte).
    ///
    /// `entry` must never return: there is no frame beneath it to return
    /// into.
    #[cfg(target_arch = "aarch64")]
    pub(crate) fn with_entry(entry: extern "C" fn() -> !, stack_top: *mut u8) -> Context {
        // `ret` branches to the link register, so the fresh context only
        // needs `lr` pointing at the entry and `sp` at the aligned top.
        Context {
            sp: (stack_top as u64) & !15,
            lr: entry as usize as u64,
            ..Default::default()
        }
    }
}
