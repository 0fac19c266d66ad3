//! Fixed-capacity priority scheduler.
//!
//! Threads live in fixed slots and never move once spawned, so the address
//! of a thread's context stays valid for the switch epilogue. The ready list
//! is kept sorted by priority, FIFO among equal priorities.

use super::trait_def::Scheduler;
use crate::errors::{halt, FatalError, PortResult, ScheduleError};
use crate::thread::{Thread, ThreadId, ThreadState};

/// Priority scheduler with room for the main thread plus `N` spawned threads.
pub struct PriorityScheduler<const N: usize> {
    main: Thread,
    slots: [Option<Thread>; N],
    ready: heapless::Vec<ThreadId, N>,
    current: ThreadId,
}

impl<const N: usize> PriorityScheduler<N> {
    const EMPTY_SLOT: Option<Thread> = None;

    /// Create a scheduler whose only thread is the caller of `main()`, running.
    ///
    /// # Arguments
    ///
    /// * `main_priority` - Priority of the main thread
    /// * `main_wabase` - Base of the main stack, where its guard region goes
    pub const fn new(main_priority: u8, main_wabase: usize) -> Self {
        Self {
            main: Thread::new(ThreadId::MAIN, main_priority, main_wabase)
                .with_state(ThreadState::Running),
            slots: [Self::EMPTY_SLOT; N],
            ready: heapless::Vec::new(),
            current: ThreadId::MAIN,
        }
    }

    /// Create a thread and put it on the ready list.
    ///
    /// The thread's context is empty; set it up through
    /// [`thread_mut`](Scheduler::thread_mut) before it is first selected.
    ///
    /// # Returns
    ///
    /// The new thread's ID, or `TooManyThreads` when every slot is in use.
    pub fn spawn(&mut self, priority: u8, wabase: usize) -> PortResult<ThreadId> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ScheduleError::TooManyThreads)?;
        let id = ThreadId::new(index + 2).ok_or(ScheduleError::TooManyThreads)?;

        self.slots[index] = Some(Thread::new(id, priority, wabase));
        self.enqueue(id)?;
        log::trace!("spawned thread {} at priority {}", id, priority);
        Ok(id)
    }

    /// Number of threads on the ready list.
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Whether `id` is on the ready list.
    pub fn is_ready(&self, id: ThreadId) -> bool {
        self.ready.contains(&id)
    }

    fn enqueue(&mut self, id: ThreadId) -> PortResult<()> {
        let priority = self.thread(id).priority();
        let position = self
            .ready
            .iter()
            .position(|&other| self.thread(other).priority() < priority)
            .unwrap_or(self.ready.len());
        self.ready
            .insert(position, id)
            .map_err(|_| ScheduleError::QueueFull)?;
        self.thread_mut(id).set_state(ThreadState::Ready);
        Ok(())
    }

    fn lookup(&self, id: ThreadId) -> Option<&Thread> {
        if id == ThreadId::MAIN {
            return Some(&self.main);
        }
        self.slots.get(id.get() - 2)?.as_ref()
    }

    fn lookup_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        if id == ThreadId::MAIN {
            return Some(&mut self.main);
        }
        self.slots.get_mut(id.get() - 2)?.as_mut()
    }
}

impl<const N: usize> Scheduler for PriorityScheduler<N> {
    fn is_preemption_required(&self) -> bool {
        match self.ready.first() {
            Some(&first) => self.thread(first).priority() > self.current_thread().priority(),
            None => false,
        }
    }

    fn select_first(&mut self) -> ThreadId {
        if self.ready.is_empty() {
            return self.current;
        }

        let new = self.ready.remove(0);
        let old = self.current;
        self.current = new;
        self.thread_mut(new).set_state(ThreadState::Running);

        // Cannot fail, the removal above freed a slot
        let _ = self.enqueue(old);
        new
    }

    fn current(&self) -> ThreadId {
        self.current
    }

    fn thread(&self, id: ThreadId) -> &Thread {
        match self.lookup(id) {
            Some(thread) => thread,
            None => halt(FatalError::UnknownThread(id)),
        }
    }

    fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        match self.lookup_mut(id) {
            Some(thread) => thread,
            None => halt(FatalError::UnknownThread(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PortError;
    use crate::sched::priority as level;

    #[test]
    fn test_higher_priority_requires_preemption() {
        let mut sched = PriorityScheduler::<4>::new(level::NORMAL, 0x2000_0000);
        assert!(!sched.is_preemption_required());

        let low = sched.spawn(level::LOW, 0x2000_1000).unwrap();
        assert!(!sched.is_preemption_required());

        let high = sched.spawn(level::HIGH, 0x2000_2000).unwrap();
        assert!(sched.is_preemption_required());

        assert_eq!(sched.select_first(), high);
        assert_eq!(sched.current(), high);
        assert_eq!(sched.current_thread().state(), ThreadState::Running);
        assert_eq!(sched.thread(ThreadId::MAIN).state(), ThreadState::Ready);

        // main outranks low, so it is first in line again
        assert!(sched.is_ready(ThreadId::MAIN));
        assert!(sched.is_ready(low));
        assert_eq!(sched.ready_count(), 2);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut sched = PriorityScheduler::<4>::new(level::IDLE, 0);
        let a = sched.spawn(level::NORMAL, 0x100).unwrap();
        let b = sched.spawn(level::NORMAL, 0x200).unwrap();

        assert_eq!(sched.select_first(), a);
        // a and b share a priority, no preemption between them
        assert!(!sched.is_preemption_required());
        assert_eq!(sched.select_first(), b);
    }

    #[test]
    fn test_select_with_nothing_ready_keeps_current() {
        let mut sched = PriorityScheduler::<2>::new(level::NORMAL, 0);
        assert_eq!(sched.select_first(), ThreadId::MAIN);
        assert_eq!(sched.current_thread().state(), ThreadState::Running);
    }

    #[test]
    fn test_spawn_beyond_capacity() {
        let mut sched = PriorityScheduler::<1>::new(level::NORMAL, 0);
        sched.spawn(level::LOW, 0x100).unwrap();
        assert_eq!(
            sched.spawn(level::LOW, 0x200),
            Err(PortError::Schedule(ScheduleError::TooManyThreads))
        );
    }

    #[test]
    #[should_panic(expected = "thread")]
    fn test_unknown_thread_halts() {
        let sched = PriorityScheduler::<1>::new(level::NORMAL, 0);
        let _ = sched.thread(ThreadId::new(9).unwrap());
    }
}
