//! Private, fixed-size coroutine stacks.

use std::{io, ptr};

/// Creates an `io::Error` with a message prefixed to the `errno` value.
macro_rules! errno {
    ($($arg:tt)+) => {{
        let errno = ::std::io::Error::last_os_error();
        let prefix = format!($($arg)+);
        ::std::io::Error::new(errno.kind(), format!("{prefix}: {errno}"))
    }};
}

/// A privately owned, fixed-size stack region for one coroutine.
///
/// Backed by an anonymous `mmap(2)` with a `PROT_NONE` guard page at the
/// low end, so running off the bottom of the stack faults immediately
/// instead of scribbling over an unrelated allocation. The region is never
/// shared and never resized; it is unmapped when the owning coroutine is
/// reaped.
#[derive(Debug)]
pub(crate) struct CoroStack {
    /// Lowest mapped address (the guard page).
    base: *mut u8,
    /// Total mapping length, guard page included.
    len: usize,
}

impl CoroStack {
    /// Maps a new stack with `size` usable bytes (rounded up to the page
    /// size) plus one guard page.
    pub(crate) fn new(size: usize) -> io::Result<CoroStack> {
        let page = page_size();
        let len = size.div_ceil(page) * page + page;

        // SAFETY: Anonymous private mapping with no requested address;
        // failure is reported through `MAP_FAILED` and checked below.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(errno!("failed to map coroutine stack"));
        }

        // SAFETY: `base` is the start of a mapping at least one page long.
        if unsafe { libc::mprotect(base, page, libc::PROT_NONE) } == -1 {
            let err = errno!("failed to protect stack guard page");
            // SAFETY: `base` was returned by `mmap` with length `len`.
            unsafe { libc::munmap(base, len) };
            return Err(err);
        }

        Ok(CoroStack {
            base: base.cast(),
            len,
        })
    }

    /// One past the highest usable byte; stacks grow downward from here.
    pub(crate) fn top(&self) -> *mut u8 {
        // SAFETY: `base + len` stays within (one past) the mapping.
        unsafe { self.base.add(self.len) }
    }
}

impl Drop for CoroStack {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` describe exactly the mapping created in
        // `new`, and no context referencing it can run again once the
        // owning coroutine record is dropped.
        unsafe {
            libc::munmap(self.base.cast(), self.len);
        }
    }
}

fn page_size() -> usize {
    // SAFETY: `sysconf(_SC_PAGESIZE)` has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
