//! Thread execution context layouts.
//!
//! These records mirror what the ARMv7-M exception entry/return sequence and
//! the PendSV epilogue push and pop. Field order and size are part of the
//! hardware contract: a mismatch silently corrupts the resumed thread, so the
//! sizes are checked at compile time and the raw stack writes all live here.
//!
//! Layout version 1:
//!
//! ```text
//! ExtCtx   r0 r1 r2 r3 r12 lr_thd pc xpsr [s0..s15 fpscr reserved]
//! IntCtx   [s16..s31] r4 r5 r6 r7 r8 r9 r10 r11 lr_exc
//! LinkCtx  control ectxp
//! ```

use core::mem::size_of;

/// `xPSR` of a thread that has not executed an instruction yet: Thumb state only.
pub const XPSR_THREAD_START: u32 = 0x0100_0000;

/// `CONTROL.nPRIV`: thread mode is unprivileged.
pub const CONTROL_NPRIV: u32 = 1 << 0;
/// `CONTROL.SPSEL`: thread mode uses PSP.
pub const CONTROL_SPSEL: u32 = 1 << 1;
/// `CONTROL.FPCA`: a floating point context is active.
pub const CONTROL_FPCA: u32 = 1 << 2;

/// `EXC_RETURN` value that resumes thread mode on PSP with the frame layout
/// [`ExtCtx`] describes.
#[cfg(feature = "full-fpu")]
pub const EXC_RETURN_THREAD: u32 = 0xFFFF_FFED;
#[cfg(not(feature = "full-fpu"))]
pub const EXC_RETURN_THREAD: u32 = 0xFFFF_FFFD;

/// `EXC_RETURN` bit set when the stacked frame has no FPU state.
pub const EXC_RETURN_STD_FRAME: u32 = 1 << 4;

/// Hardware frame sizes without and with FPU state.
pub const FRAME_BASIC: usize = 32;
pub const FRAME_EXTENDED: usize = 104;

/// Size of the frame exception entry stacked, as `exc_return` describes it.
pub const fn stacked_frame_size(exc_return: u32) -> usize {
    if exc_return & EXC_RETURN_STD_FRAME == 0 {
        FRAME_EXTENDED
    } else {
        FRAME_BASIC
    }
}

/// Exception frame, consumed by exception return.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtCtx {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr_thd: u32,
    pub pc: u32,
    pub xpsr: u32,
    #[cfg(feature = "full-fpu")]
    pub s0_s15: [u32; 16],
    #[cfg(feature = "full-fpu")]
    pub fpscr: u32,
    #[cfg(feature = "full-fpu")]
    pub reserved: u32,
}

#[cfg(not(feature = "full-fpu"))]
const _: () = assert!(size_of::<ExtCtx>() == 32);
#[cfg(feature = "full-fpu")]
const _: () = assert!(size_of::<ExtCtx>() == 104);

impl ExtCtx {
    /// Frame for the first instruction of a thread entered at `pc`.
    ///
    /// Every register is zero apart from `pc` and the start `xPSR`.
    pub fn thread_start(pc: usize) -> Self {
        Self {
            pc: pc as u32,
            xpsr: XPSR_THREAD_START,
            ..Self::default()
        }
    }

    /// Same frame with the FPU status word set.
    #[cfg(feature = "full-fpu")]
    pub fn with_fpscr(mut self, fpscr: u32) -> Self {
        self.fpscr = fpscr;
        self
    }

    /// Syscall arguments as passed in `r0..r3`.
    pub fn args(&self) -> [u32; 4] {
        [self.r0, self.r1, self.r2, self.r3]
    }

    /// Value the caller sees in `r0` once the syscall returns.
    pub fn set_return(&mut self, value: u32) {
        self.r0 = value;
    }
}

/// Callee-saved frame pushed by the switch epilogue.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntCtx {
    #[cfg(feature = "full-fpu")]
    pub s16_s31: [u32; 16],
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub lr_exc: u32,
}

#[cfg(not(feature = "full-fpu"))]
const _: () = assert!(size_of::<IntCtx>() == 36);
#[cfg(feature = "full-fpu")]
const _: () = assert!(size_of::<IntCtx>() == 100);

/// Transitional record carrying the target CONTROL value and the exception
/// frame address across the `svc` that drops privilege.
///
/// It lives just below the trusted PSP and is gone once that `svc` completes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkCtx {
    pub control: u32,
    pub ectxp: *mut ExtCtx,
}

const _: () = assert!(size_of::<LinkCtx>() == 2 * size_of::<usize>());

/// Per-thread syscall state.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallContext {
    /// Trusted process stack pointer, where syscalls of this thread run.
    pub psp: usize,
    /// Whether the thread has left privileged mode.
    pub unprivileged: bool,
    /// Caller's exception frame while a syscall is in progress, else 0.
    pub caller: usize,
    /// `EXC_RETURN` the caller entered the syscall with.
    pub exc_return: u32,
    /// CONTROL of the caller.
    pub control: u32,
}

impl SyscallContext {
    pub const fn new() -> Self {
        Self {
            psp: 0,
            unprivileged: false,
            caller: 0,
            exc_return: 0,
            control: 0,
        }
    }

    /// Whether a syscall of this thread is being served.
    pub const fn in_progress(&self) -> bool {
        self.caller != 0
    }
}

/// Port context of a thread, embedded in the scheduler's thread record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadContext {
    /// Saved [`IntCtx`] address. Offset 0, the switch epilogue stores here.
    pub sp: usize,
    pub syscall: SyscallContext,
}

impl ThreadContext {
    /// Builds the initial frames of a thread on the stack ending at `stack_top`.
    ///
    /// The thread starts at `entry` with `arg` in `r0` and returns into `exit`.
    ///
    /// # Safety
    ///
    /// `[stack_top - size_of::<ExtCtx>() - size_of::<IntCtx>(), stack_top)`
    /// must be writable memory owned by the new thread.
    pub unsafe fn setup(&mut self, stack_top: usize, entry: usize, arg: u32, exit: usize) {
        let frame = ExtCtx {
            r0: arg,
            lr_thd: exit as u32,
            ..ExtCtx::thread_start(entry)
        };
        let ectxp = unsafe { push_ext_ctx(stack_top & !7, frame) };
        let ictxp = (ectxp as usize - size_of::<IntCtx>()) as *mut IntCtx;
        unsafe {
            ictxp.write(IntCtx {
                lr_exc: EXC_RETURN_THREAD,
                ..IntCtx::default()
            });
        }
        self.sp = ictxp as usize;
        self.syscall = SyscallContext::default();
    }
}

/// Writes `frame` immediately below `sp` and returns its address.
///
/// # Safety
///
/// `sp` must be 8-byte aligned and the `size_of::<ExtCtx>()` bytes below it
/// writable.
pub unsafe fn push_ext_ctx(sp: usize, frame: ExtCtx) -> *mut ExtCtx {
    debug_assert_eq!(sp % 8, 0, "exception frames need 8-byte alignment");
    let ectxp = (sp - size_of::<ExtCtx>()) as *mut ExtCtx;
    unsafe {
        ectxp.write(frame);
    }
    ectxp
}

/// Reads the exception frame at `sp` and returns it with the stack pointer
/// after exception return has popped it.
///
/// # Safety
///
/// `sp` must point at a frame written by [`push_ext_ctx`] or by the hardware.
pub unsafe fn pop_ext_ctx(sp: usize) -> (ExtCtx, usize) {
    let frame = unsafe { (sp as *const ExtCtx).read() };
    (frame, sp + size_of::<ExtCtx>())
}

/// Reads the frame exception entry stacked at `sp`.
///
/// Only the words `exc_return` says were stacked are read; the rest of the
/// returned [`ExtCtx`] is zero.
///
/// # Safety
///
/// `sp` must point at a frame the hardware stacked with `exc_return`.
pub unsafe fn load_stacked(sp: usize, exc_return: u32) -> ExtCtx {
    let len = stacked_frame_size(exc_return).min(size_of::<ExtCtx>());
    let mut frame = ExtCtx::default();
    unsafe {
        core::ptr::copy_nonoverlapping(
            sp as *const u8,
            &mut frame as *mut ExtCtx as *mut u8,
            len,
        );
    }
    frame
}

/// Writes `frame` back over the frame stacked at `sp`, leaving everything
/// beyond what `exc_return` says was stacked alone.
///
/// # Safety
///
/// Same as [`load_stacked`].
pub unsafe fn store_stacked(sp: usize, exc_return: u32, frame: &ExtCtx) {
    let len = stacked_frame_size(exc_return).min(size_of::<ExtCtx>());
    unsafe {
        core::ptr::copy_nonoverlapping(frame as *const ExtCtx as *const u8, sp as *mut u8, len);
    }
}

/// Writes `link` immediately below `sp` and returns its address.
///
/// # Safety
///
/// The `size_of::<LinkCtx>()` bytes below `sp` must be writable and suitably
/// aligned for a pointer.
pub unsafe fn push_link_ctx(sp: usize, link: LinkCtx) -> *mut LinkCtx {
    let lctxp = (sp - size_of::<LinkCtx>()) as *mut LinkCtx;
    unsafe {
        lctxp.write(link);
    }
    lctxp
}

/// Reads the link context at `sp` and returns it with the stack pointer just
/// above it.
///
/// # Safety
///
/// `sp` must point at a record written by [`push_link_ctx`].
pub unsafe fn pop_link_ctx(sp: usize) -> (LinkCtx, usize) {
    let link = unsafe { (sp as *const LinkCtx).read() };
    (link, sp + size_of::<LinkCtx>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::TestStack;

    #[test]
    fn test_ext_ctx_field_order() {
        let frame = ExtCtx {
            r0: 10,
            r12: 12,
            lr_thd: 14,
            ..ExtCtx::thread_start(0x0800_1234)
        };
        let words = unsafe {
            core::slice::from_raw_parts(
                &frame as *const ExtCtx as *const u32,
                size_of::<ExtCtx>() / 4,
            )
        };
        assert_eq!(words[0], 10);
        assert_eq!(words[4], 12);
        assert_eq!(words[5], 14);
        assert_eq!(words[6], 0x0800_1234);
        assert_eq!(words[7], XPSR_THREAD_START);
    }

    #[cfg(feature = "full-fpu")]
    #[test]
    fn test_fpscr_slot() {
        let frame = ExtCtx::thread_start(0x100).with_fpscr(0x0300_0000);
        let words = unsafe {
            core::slice::from_raw_parts(&frame as *const ExtCtx as *const u32, 26)
        };
        assert_eq!(words[24], 0x0300_0000);
        assert_eq!(words[25], 0);
    }

    #[test]
    fn test_syscall_args_and_return() {
        let mut frame = ExtCtx {
            r0: 1,
            r1: 2,
            r2: 3,
            r3: 4,
            ..ExtCtx::default()
        };
        assert_eq!(frame.args(), [1, 2, 3, 4]);
        frame.set_return(0xdead);
        assert_eq!(frame.r0, 0xdead);
    }

    #[test]
    fn test_link_ctx_pop_restores_stack_pointer() {
        let stack = TestStack::new();
        let top = stack.top();
        let mut frame = ExtCtx::default();

        let lctxp = unsafe {
            push_link_ctx(
                top,
                LinkCtx {
                    control: CONTROL_NPRIV,
                    ectxp: &mut frame,
                },
            )
        };
        assert_eq!(lctxp as usize, top - size_of::<LinkCtx>());

        let (link, sp) = unsafe { pop_link_ctx(lctxp as usize) };
        assert_eq!(sp, top);
        assert_eq!(link.control, CONTROL_NPRIV);
        assert_eq!(link.ectxp, &mut frame as *mut ExtCtx);
    }

    #[test]
    fn test_stacked_frame_size_follows_exc_return() {
        assert_eq!(stacked_frame_size(0xFFFF_FFFD), FRAME_BASIC);
        assert_eq!(stacked_frame_size(0xFFFF_FFED), FRAME_EXTENDED);
        assert_eq!(stacked_frame_size(EXC_RETURN_THREAD), size_of::<ExtCtx>());
    }

    #[test]
    fn test_basic_frame_store_stays_in_bounds() {
        let stack = TestStack::new();
        let sp = stack.top() - 128;
        let above = (sp + FRAME_BASIC) as *mut u32;
        unsafe {
            for i in 0..16 {
                above.add(i).write(0xA5A5_A5A5);
            }
            (sp as *mut u32).write(7);
        }

        let mut frame = unsafe { load_stacked(sp, 0xFFFF_FFFD) };
        assert_eq!(frame.r0, 7);
        frame.r0 = 8;
        #[cfg(feature = "full-fpu")]
        {
            assert_eq!(frame.fpscr, 0);
            frame.fpscr = 0xFFFF_FFFF;
            frame.s0_s15 = [0xFFFF_FFFF; 16];
        }
        unsafe { store_stacked(sp, 0xFFFF_FFFD, &frame) };

        assert_eq!(unsafe { (sp as *const u32).read() }, 8);
        for i in 0..16 {
            assert_eq!(unsafe { above.add(i).read() }, 0xA5A5_A5A5);
        }
    }

    #[test]
    fn test_thread_setup_frames() {
        let stack = TestStack::new();
        let mut ctx = ThreadContext::default();

        unsafe {
            ctx.setup(stack.top(), 0x0800_0101, 42, 0x0800_0201);
        }

        let ictx = unsafe { (ctx.sp as *const IntCtx).read() };
        assert_eq!(ictx.lr_exc, EXC_RETURN_THREAD);
        assert_eq!(ictx.r4, 0);

        let (frame, sp) = unsafe { pop_ext_ctx(ctx.sp + size_of::<IntCtx>()) };
        assert_eq!(sp, stack.top());
        assert_eq!(frame.r0, 42);
        assert_eq!(frame.pc, 0x0800_0101);
        assert_eq!(frame.lr_thd, 0x0800_0201);
        assert_eq!(frame.xpsr, XPSR_THREAD_START);
    }
}
