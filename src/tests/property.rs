//! Property-based tests for verifying port invariants.

use super::helpers::{halt_tag, test_kernel, SimpleRng, TestStack};
use crate::arch::Arch;
use crate::context::LinkCtx;
use crate::sched::Scheduler;
use core::mem::size_of;

#[test]
fn property_binding_follows_running_thread() {
    let mut rng = SimpleRng::new(0x12345678);

    for _ in 0..20 {
        let kernel = test_kernel();
        kernel.init();
        let mut spawned = 0;

        for _ in 0..30 {
            if spawned < 4 && rng.gen_bool() {
                let priority = rng.gen_range(0, 256) as u8;
                let wabase = 0x2001_0000 + (spawned as usize) * 0x1000;
                kernel.lock().spawn(priority, wabase).unwrap();
                spawned += 1;
            }

            let before = kernel.guard_region().base();
            match kernel.schedule_next() {
                Some(token) => {
                    let pair = token.pair();
                    // Property: a committed switch changes thread
                    assert_ne!(pair.old, pair.new);
                    assert!(kernel.is_locked());
                    token.finish();
                }
                None => {
                    // Property: no switch leaves the binding alone
                    assert_eq!(kernel.guard_region().base(), before);
                }
            }

            // Property: the lock is never left held and the binding matches
            assert!(!kernel.is_locked());
            assert_eq!(kernel.arch().basepri(), 0);
            let guard = kernel.lock();
            assert_eq!(
                guard.current_thread().region_base(),
                kernel.guard_region().base()
            );
            assert!(!guard.is_preemption_required());
        }
    }
}

#[test]
fn property_trusted_stack_restored_for_any_depth() {
    let mut rng = SimpleRng::new(0x87654321);
    let kernel = test_kernel();
    kernel.init();
    let trusted = TestStack::new();
    let user = TestStack::new();

    for _ in 0..50 {
        // somewhere in the upper half, 8-byte aligned
        let depth = rng.gen_range(0, 128) as usize * 8;
        let s_psp = trusted.top() - depth;
        let user_top = user.top() - rng.gen_range(0, 128) as usize * 8;
        unsafe {
            kernel.arch().set_psp(s_psp);
        }

        let tag = halt_tag(|| {
            kernel.unprivileged_jump(0x0800_0001 + depth * 2, user_top);
        });
        assert_eq!(tag, "svc");

        let link = kernel.arch().last_link().expect("link context consumed");
        // Property: the link context is dropped and nothing else
        let lctxp = s_psp - size_of::<LinkCtx>();
        assert_eq!(link.trusted_psp, lctxp + size_of::<LinkCtx>());
        assert_eq!(link.trusted_psp, s_psp);
        assert_eq!(kernel.arch().resumed().map(|r| r.psp), Some(user_top));
        assert_eq!(kernel.syscall_stack_pointer(&kernel.lock()), s_psp);
    }
}
