//! PendSV and SVCall handlers.
//!
//! Both handlers are thin assembly wrappers around Rust entry points that go
//! through the kernel registered with
//! [`Kernel::register_global`](crate::Kernel::register_global).
//!
//! # PendSV
//!
//! `__port_schedule_next` returns the old and new thread context addresses in
//! `r0`/`r1` (low/high half of a `u64`), or zero when no switch is needed.
//! On a switch the epilogue pushes the old thread's [`IntCtx`] on its process
//! stack, stores the resulting stack pointer in the old context, pops the new
//! thread's [`IntCtx`] and loads its PSP, then calls `__port_switch_done` to
//! release the kernel lock before returning into the new thread.
//!
//! # SVCall
//!
//! `__port_svc` receives PSP and `EXC_RETURN` and returns the `EXC_RETURN`
//! to leave with. `svc 1` consumes the link context placed by
//! [`Kernel::unprivileged_jump`](crate::Kernel::unprivileged_jump). Any
//! number above 1 is a syscall: the handler returns into
//! `__port_syscall_entry` on the thread's trusted stack, which runs the
//! dispatcher in privileged thread mode and ends with `svc 0`.
//!
//! [`IntCtx`]: crate::context::IntCtx

use super::CortexM;
use crate::context::{self, ExtCtx, EXC_RETURN_THREAD};
use crate::errors::{halt, FatalError};
use crate::gateway::{self, SVC_RETURN, SVC_UNPRIVILEGED};
use crate::kernel;
use core::arch::global_asm;

#[cfg(feature = "full-fpu")]
global_asm!(
    ".section .text.PendSV_Handler,\"ax\",%progbits",
    ".global PendSV_Handler",
    ".type PendSV_Handler,%function",
    ".thumb_func",
    "PendSV_Handler:",
    "    push    {{r3, lr}}",
    "    bl      __port_schedule_next",
    "    pop     {{r3, lr}}",
    "    cbz     r0, 1f",
    "    mrs     r2, psp",
    "    stmdb   r2!, {{r4-r11, lr}}",
    "    vstmdb  r2!, {{s16-s31}}",
    "    str     r2, [r0]",
    "    ldr     r2, [r1]",
    "    vldmia  r2!, {{s16-s31}}",
    "    ldmia   r2!, {{r4-r11, lr}}",
    "    msr     psp, r2",
    "    push    {{r3, lr}}",
    "    bl      __port_switch_done",
    "    pop     {{r3, lr}}",
    "1:",
    "    bx      lr",
    ".size PendSV_Handler, . - PendSV_Handler",
);

#[cfg(not(feature = "full-fpu"))]
global_asm!(
    ".section .text.PendSV_Handler,\"ax\",%progbits",
    ".global PendSV_Handler",
    ".type PendSV_Handler,%function",
    ".thumb_func",
    "PendSV_Handler:",
    "    push    {{r3, lr}}",
    "    bl      __port_schedule_next",
    "    pop     {{r3, lr}}",
    "    cbz     r0, 1f",
    "    mrs     r2, psp",
    "    stmdb   r2!, {{r4-r11, lr}}",
    "    str     r2, [r0]",
    "    ldr     r2, [r1]",
    "    ldmia   r2!, {{r4-r11, lr}}",
    "    msr     psp, r2",
    "    push    {{r3, lr}}",
    "    bl      __port_switch_done",
    "    pop     {{r3, lr}}",
    "1:",
    "    bx      lr",
    ".size PendSV_Handler, . - PendSV_Handler",
);

global_asm!(
    ".section .text.SVC_Handler,\"ax\",%progbits",
    ".global SVC_Handler",
    ".type SVC_Handler,%function",
    ".thumb_func",
    "SVC_Handler:",
    "    mrs     r0, psp",
    "    mov     r1, lr",
    "    push    {{r3, lr}}",
    "    bl      __port_svc",
    "    pop     {{r3, lr}}",
    "    bx      r0",
    ".size SVC_Handler, . - SVC_Handler",
);

// Entered by exception return, privileged, on the trusted stack, r0 = number
global_asm!(
    ".section .text.__port_syscall_entry,\"ax\",%progbits",
    ".global __port_syscall_entry",
    ".type __port_syscall_entry,%function",
    ".thumb_func",
    "__port_syscall_entry:",
    "    bl      __port_syscall_run",
    "    svc     0",
    "2:",
    "    b       2b",
    ".size __port_syscall_entry, . - __port_syscall_entry",
);

extern "C" {
    fn __port_syscall_entry();
}

#[no_mangle]
extern "C" fn __port_schedule_next() -> u64 {
    match kernel::global().and_then(|k| k.schedule_next_raw()) {
        Some((old, new)) => ((new as u32 as u64) << 32) | (old as u32 as u64),
        None => 0,
    }
}

#[no_mangle]
unsafe extern "C" fn __port_switch_done() {
    if let Some(k) = kernel::global() {
        unsafe {
            k.switch_done();
        }
    }
}

#[no_mangle]
unsafe extern "C" fn __port_syscall_run(number: u32) {
    match kernel::global() {
        Some(k) => unsafe { k.syscall_run(number) },
        None => halt(FatalError::UnregisteredSyscall(number)),
    }
}

#[no_mangle]
unsafe extern "C" fn __port_svc(psp: u32, exc_return: u32) -> u32 {
    let psp = psp as usize;
    let frame = psp as *const ExtCtx;

    // The immediate of `svc #n` is the low byte of the instruction before pc
    let pc = unsafe { (*frame).pc } as usize;
    let number = unsafe { *((pc - 2) as *const u8) } as u32;

    if number == SVC_UNPRIVILEGED {
        unsafe {
            gateway::consume_link_ctx(&CortexM, psp + context::stacked_frame_size(exc_return));
        }
        return EXC_RETURN_THREAD;
    }

    match kernel::global() {
        Some(k) if number == SVC_RETURN => unsafe { k.syscall_return() },
        Some(k) => unsafe {
            k.syscall_entry(psp, number, exc_return, __port_syscall_entry as usize & !1)
        },
        None => halt(FatalError::UnregisteredSyscall(number)),
    }
}
