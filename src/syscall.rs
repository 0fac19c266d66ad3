//! Syscall dispatch.
//!
//! A [`Kernel`](crate::Kernel) is parameterized over a [`SyscallDispatch`].
//! Whatever implementation is plugged in replaces the dispatch logic as a
//! whole: there is no chaining to a default handler.

use crate::context::ExtCtx;
use crate::errors::{halt, FatalError, PortResult, SyscallError};

/// Syscall handler, called with the caller's exception frame.
///
/// Arguments are in `r0..r3`; whatever is left in `r0` is the return value.
pub type SyscallFn = fn(&mut ExtCtx);

/// Routes a syscall number to its implementation.
pub trait SyscallDispatch: Sync {
    /// Handle syscall `number` raised with frame `ctx`.
    fn dispatch(&self, ctx: &mut ExtCtx, number: u32);
}

/// Dispatcher used when the kernel registers no syscalls: every number halts.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaltOnUnregistered;

impl SyscallDispatch for HaltOnUnregistered {
    fn dispatch(&self, _ctx: &mut ExtCtx, number: u32) {
        halt(FatalError::UnregisteredSyscall(number))
    }
}

/// Allow-list of up to `N` syscalls. Numbers not in the list halt.
pub struct SyscallTable<const N: usize> {
    entries: heapless::Vec<(u32, SyscallFn), N>,
}

impl<const N: usize> SyscallTable<N> {
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Add `handler` for syscall `number`.
    ///
    /// # Returns
    ///
    /// `Err` if the number is already taken or the table is full.
    pub fn register(&mut self, number: u32, handler: SyscallFn) -> PortResult<()> {
        if self.lookup(number).is_some() {
            return Err(SyscallError::AlreadyRegistered(number).into());
        }
        self.entries
            .push((number, handler))
            .map_err(|_| SyscallError::TableFull)?;
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, number: u32, handler: SyscallFn) -> PortResult<Self> {
        self.register(number, handler)?;
        Ok(self)
    }

    pub fn lookup(&self, number: u32) -> Option<SyscallFn> {
        self.entries
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, handler)| *handler)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<const N: usize> Default for SyscallTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SyscallDispatch for SyscallTable<N> {
    fn dispatch(&self, ctx: &mut ExtCtx, number: u32) {
        match self.lookup(number) {
            Some(handler) => handler(ctx),
            None => halt(FatalError::UnregisteredSyscall(number)),
        }
    }
}
