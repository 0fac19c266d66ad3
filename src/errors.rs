//! Error handling for the port layer.
//!
//! Two kinds of failure exist here. Configuration mistakes made before the
//! scheduler runs (a full syscall table, a duplicate registration) are ordinary
//! [`PortError`] values. Everything detected while switching or transitioning
//! privilege is a [`FatalError`]: the execution context may already be
//! inconsistent, so the only response is [`halt`].

#![allow(clippy::uninlined_format_args)]

use crate::thread::ThreadId;
use core::fmt;

/// Result type for fallible port operations.
pub type PortResult<T> = Result<T, PortError>;

/// Recoverable errors, reported while the system is being set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    /// Syscall errors
    Syscall(SyscallError),
    /// Scheduler table errors
    Schedule(ScheduleError),
}

/// Errors raised while building the syscall allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// The table has no free slot left
    TableFull,
    /// A handler is already registered for this number
    AlreadyRegistered(u32),
}

/// Errors raised by the reference scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// Every thread slot is in use
    TooManyThreads,
    /// The ready list cannot take another entry
    QueueFull,
}

/// Invariant violations that stop the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// A thread issued a syscall number nobody registered
    UnregisteredSyscall(u32),
    /// The privilege-elevation SVC returned to its caller
    ElevationReturned,
    /// A syscall was issued while the thread was already serving one
    NestedSyscall,
    /// A syscall step ran with no syscall in progress
    NoSyscallInProgress,
    /// The kernel lock was taken while already held
    LockStateViolation,
    /// The kernel lock was released while not held
    UnlockStateViolation,
    /// The scheduler handed out an id it does not own
    UnknownThread(ThreadId),
}

impl FatalError {
    /// Short diagnostic tag recorded by the halt path.
    pub fn tag(&self) -> &'static str {
        match self {
            FatalError::UnregisteredSyscall(_) => "svc",
            FatalError::ElevationReturned => "svc",
            FatalError::NestedSyscall => "svc",
            FatalError::NoSyscallInProgress => "svc",
            FatalError::LockStateViolation => "SV#4",
            FatalError::UnlockStateViolation => "SV#5",
            FatalError::UnknownThread(_) => "thread",
        }
    }
}

/// Stops the system.
///
/// The reason is logged, then the port panics with the diagnostic tag. Release
/// and dev profiles build with `panic = "abort"`, and the bare-metal panic
/// handler masks interrupts and parks the core, so nothing resumes after this.
#[cold]
#[inline(never)]
pub fn halt(reason: FatalError) -> ! {
    log::error!("port halted: {}", reason);
    panic!("{}", reason.tag())
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::Syscall(e) => write!(f, "Syscall error: {}", e),
            PortError::Schedule(e) => write!(f, "Scheduling error: {}", e),
        }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyscallError::TableFull => write!(f, "Syscall table is full"),
            SyscallError::AlreadyRegistered(n) => write!(f, "Syscall {} already registered", n),
        }
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::TooManyThreads => write!(f, "Maximum number of threads reached"),
            ScheduleError::QueueFull => write!(f, "Ready list is full"),
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::UnregisteredSyscall(n) => write!(f, "unregistered syscall {}", n),
            FatalError::ElevationReturned => write!(f, "privilege elevation returned"),
            FatalError::NestedSyscall => write!(f, "syscall issued inside a syscall"),
            FatalError::NoSyscallInProgress => write!(f, "no syscall in progress"),
            FatalError::LockStateViolation => write!(f, "kernel lock already held"),
            FatalError::UnlockStateViolation => write!(f, "kernel lock not held"),
            FatalError::UnknownThread(id) => write!(f, "unknown thread {}", id),
        }
    }
}

impl From<SyscallError> for PortError {
    fn from(error: SyscallError) -> Self {
        PortError::Syscall(error)
    }
}

impl From<ScheduleError> for PortError {
    fn from(error: ScheduleError) -> Self {
        PortError::Schedule(error)
    }
}
