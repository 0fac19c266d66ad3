//! Integration tests: initialization, switching and the handler entry points.

use super::helpers::{test_kernel, TestKernel, TestStack, MAIN_STACK_BASE};
use crate::arch::{Arch, SystemHandler};
use crate::context::{IntCtx, EXC_RETURN_THREAD};
use crate::kernel::{self, PortHooks};
use crate::mpu::{MpuCtrl, RegionAttributes};
use crate::sched::{priority, Scheduler};
use crate::switch::SwitchPair;
use crate::thread::ThreadId;
use std::boxed::Box;

#[test]
fn test_init_twice_same_configuration() {
    let kernel = test_kernel();
    let arch = kernel.arch();

    kernel.init();
    let first = (
        arch.prigroup(),
        arch.system_priority(SystemHandler::SVCall),
        arch.system_priority(SystemHandler::PendSV),
        arch.cycle_counter_enabled(),
        arch.mpu_region(7),
        arch.mpu_ctrl(),
    );

    kernel.init();
    let second = (
        arch.prigroup(),
        arch.system_priority(SystemHandler::SVCall),
        arch.system_priority(SystemHandler::PendSV),
        arch.cycle_counter_enabled(),
        arch.mpu_region(7),
        arch.mpu_ctrl(),
    );

    assert_eq!(first, second);
    assert_eq!(
        second.4.map(|r| r.attributes),
        Some(RegionAttributes::guard(32))
    );
    assert_eq!(second.5, Some(MpuCtrl::ENABLE | MpuCtrl::PRIVDEFENA));
}

#[test]
fn test_preemption_by_higher_priority_thread() {
    let kernel = test_kernel();
    kernel.init();
    kernel.enable();

    let b = kernel.lock().spawn(priority::HIGH, 0x2000_4000).unwrap();

    let token = kernel.schedule_next().expect("B preempts main");
    assert_eq!(
        token.pair(),
        SwitchPair {
            old: ThreadId::MAIN,
            new: b
        }
    );
    assert_eq!(kernel.guard_region().base(), 0x2000_4000);
    assert_eq!(kernel.arch().mpu_region(7).map(|r| r.base), Some(0x2000_4000));
    token.finish();

    // B runs now, main waits with lower priority
    assert!(kernel.schedule_next().is_none());
    assert_eq!(kernel.arch().basepri(), 0);
}

#[test]
fn test_token_holds_lock_until_finished() {
    let kernel = test_kernel();
    kernel.init();
    kernel.lock().spawn(priority::HIGH, 0x2000_4000).unwrap();

    let token = kernel.schedule_next().expect("switch committed");
    assert!(kernel.try_lock().is_none());
    assert_eq!(token.scheduler().current(), token.pair().new);
    token.finish();

    let guard = kernel.try_lock().expect("lock released");
    assert_eq!(
        guard.current_thread().region_base(),
        kernel.guard_region().base()
    );
}

#[test]
fn test_switch_without_guard_pages_leaves_region() {
    use super::helpers::test_config;
    use crate::arch::sim::SimArch;
    use crate::kernel::Kernel;
    use crate::sched::PriorityScheduler;
    use crate::syscall::HaltOnUnregistered;

    let kernel: Kernel<SimArch, PriorityScheduler<2>> = Kernel::new(
        SimArch::new(),
        PriorityScheduler::new(priority::LOW, MAIN_STACK_BASE),
        HaltOnUnregistered,
        test_config().with_guard_pages(false),
    );
    kernel.init();
    kernel.lock().spawn(priority::HIGH, 0x2000_4000).unwrap();

    kernel.schedule_next().expect("switch committed").finish();

    assert_eq!(kernel.arch().mpu_writes(), 0);
    assert_eq!(kernel.arch().mpu_ctrl(), Some(MpuCtrl::ENABLE | MpuCtrl::PRIVDEFENA));
}

#[test]
fn test_new_thread_context_ready_for_epilogue() {
    let kernel = test_kernel();
    kernel.init();
    let stack = TestStack::new();

    {
        let mut guard = kernel.lock();
        let id = guard.spawn(priority::HIGH, stack.base()).unwrap();
        unsafe {
            guard
                .thread_mut(id)
                .context_mut()
                .setup(stack.top(), 0x0800_3001, 7, 0x0800_3101);
        }
    }

    let mut token = kernel.schedule_next().expect("switch committed");
    let (_, new) = token.contexts();
    let ictx = unsafe { ((*new).sp as *const IntCtx).read() };
    assert_eq!(ictx.lr_exc, EXC_RETURN_THREAD);
    token.finish();

    assert_eq!(kernel.guard_region().base(), stack.base());
}

#[test]
fn test_rebind_current_region() {
    let kernel = test_kernel();
    kernel.init();
    unsafe {
        kernel.guard_region().bind(kernel.arch(), 0x2000_9000);
    }

    kernel.bind_current_region();

    assert_eq!(kernel.guard_region().base(), MAIN_STACK_BASE);
}

#[test]
fn test_global_hooks_drive_switch() {
    let kernel: &'static TestKernel = Box::leak(Box::new(test_kernel()));
    kernel.init();
    unsafe {
        kernel.register_global();
    }
    let hooks = kernel::global().expect("kernel registered");

    assert!(hooks.schedule_next_raw().is_none());
    assert!(!kernel.is_locked());

    kernel.lock().spawn(priority::HIGH, 0x2000_4000).unwrap();
    let (old, new) = hooks.schedule_next_raw().expect("switch committed");
    assert_ne!(old, new);
    assert!(kernel.is_locked());

    unsafe {
        hooks.switch_done();
    }
    assert!(!kernel.is_locked());
    assert_eq!(kernel.arch().basepri(), 0);
}
