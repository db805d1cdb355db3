//! The round-robin preemptive scheduler.
//!
//! One CPU, one RUNNING thread. The ready and all-threads queues live in a
//! single global cell that is only touched with interrupts disabled; the
//! PIT tick (vector 0x20) is the preemption point. Base priority doubles
//! as the slice length in ticks: the tick handler burns one tick per
//! interrupt and rotates the runner to the ready-queue tail when its slice
//! is spent.

use core::cell::UnsafeCell;
use core::mem::size_of;
use core::ptr::{addr_of_mut, NonNull};

use crate::arch;
use crate::error::KernelError;
use crate::interrupts::InterruptGuard;
use crate::mm::PAGE_SIZE;

use super::queue::ThreadQueue;
#[cfg(target_os = "none")]
use super::thread::TCB_MASK;
use super::thread::{InterruptFrame, SwitchFrame, Tcb, ThreadState};

/// Thread entry point. `extern "C"` so the spawn frame's argument layout
/// matches what the launch trampoline pops.
pub type ThreadEntry = extern "C" fn(usize);

/// Vector the scheduler ticks on.
pub const TIMER_VECTOR: u8 = 0x20;

/// Slice length threads get unless the spawner chooses otherwise.
pub const DEFAULT_PRIORITY: u32 = 30;

struct Scheduler {
    ready: ThreadQueue,
    registry: ThreadQueue,
    next_tid: u32,
}

impl Scheduler {
    const fn new() -> Scheduler {
        Scheduler {
            ready: ThreadQueue::new(),
            registry: ThreadQueue::new(),
            next_tid: 1,
        }
    }

    fn allocate_tid(&mut self) -> u32 {
        let tid = self.next_tid;
        self.next_tid += 1;
        tid
    }
}

struct SchedulerCell(UnsafeCell<Scheduler>);

// SAFETY: single-CPU kernel. The scheduler state is only accessed with
// interrupts disabled (guards in the public API, interrupt gates in the
// tick path), which serializes every access.
unsafe impl Sync for SchedulerCell {}

static SCHEDULER: SchedulerCell = SchedulerCell(UnsafeCell::new(Scheduler::new()));

fn state() -> *mut Scheduler {
    SCHEDULER.0.get()
}

/// The running thread's TCB, recovered from the stack pointer: TCB and
/// kernel stack share one page-aligned frame, so masking ESP yields the
/// page base.
#[cfg(target_os = "none")]
pub fn current() -> NonNull<Tcb> {
    let base = arch::stack_pointer() & TCB_MASK;
    // SAFETY: every kernel stack lives in a TCB page, so the masked value
    // is a valid non-null TCB pointer.
    unsafe { NonNull::new_unchecked(base as *mut Tcb) }
}

/// Host builds cannot mask a real kernel stack pointer; tests install the
/// "running" thread explicitly.
#[cfg(not(target_os = "none"))]
pub fn current() -> NonNull<Tcb> {
    let ptr = host_current::CURRENT.load(core::sync::atomic::Ordering::SeqCst);
    NonNull::new(ptr).expect("no current thread installed")
}

#[cfg(not(target_os = "none"))]
pub(crate) mod host_current {
    use core::sync::atomic::AtomicPtr;

    use super::Tcb;

    pub static CURRENT: AtomicPtr<Tcb> = AtomicPtr::new(core::ptr::null_mut());
}

/// Turn the executing boot stack into the "main" thread and register the
/// timer ISR. Must run before the timer line is unmasked.
#[cfg(target_os = "none")]
pub fn init() {
    adopt_boot_thread();
    crate::interrupts::register(TIMER_VECTOR, timer_tick);
    log::info!(target: "sched", "scheduler online, tick on vector {TIMER_VECTOR:#04x}");
}

/// Write a minimal TCB at the base of the page the boot stack runs on and
/// mark it RUNNING. From here on `current()` works for the boot flow too.
#[cfg(target_os = "none")]
fn adopt_boot_thread() {
    let _guard = InterruptGuard::disabled();
    let base = (arch::stack_pointer() & TCB_MASK) as *mut Tcb;
    assert!(
        base as usize + size_of::<Tcb>() + 256 < arch::stack_pointer(),
        "boot stack is too close to its page base to hold the TCB"
    );
    // SAFETY: the bottom of the boot stack page is dead space reserved for
    // exactly this TCB (asserted above), and interrupts are disabled.
    unsafe {
        let sched = &mut *state();
        let tid = sched.allocate_tid();
        base.write(Tcb::new(tid, ThreadState::Running, "main", DEFAULT_PRIORITY));
        (*base).bind_nodes();
        sched.registry.push_back(addr_of_mut!((*base).registry_node));
    }
}

/// Create a kernel thread.
///
/// One kernel frame is allocated; the TCB goes at its base and the
/// remainder becomes the thread's stack, primed so the first dispatch
/// lands in the launch trampoline with `entry` and `arg` on the stack.
pub fn spawn(
    entry: ThreadEntry,
    arg: usize,
    name: &str,
    priority: u32,
) -> Result<u32, KernelError> {
    if priority == 0 {
        return Err(KernelError::InvalidArgument { name: "priority" });
    }
    let page = crate::mm::alloc(crate::mm::Space::Kernel, 1).ok_or(KernelError::OutOfMemory {
        requested_pages: 1,
    })?;
    let base = page.as_usize() as *mut Tcb;

    let _guard = InterruptGuard::disabled();
    // SAFETY: `page` is a freshly mapped, page-aligned kernel frame owned
    // by the new thread from here on; interrupts are disabled for the
    // queue updates.
    unsafe {
        let sched = &mut *state();
        let tid = sched.allocate_tid();
        base.write(Tcb::new(tid, ThreadState::Ready, name, priority));
        (*base).bind_nodes();
        prime_stack(base, entry, arg);
        sched.ready.push_back(addr_of_mut!((*base).state_node));
        sched.registry.push_back(addr_of_mut!((*base).registry_node));
        log::debug!(target: "sched", "spawned '{}' as tid {}", (*base).name(), tid);
        Ok(tid)
    }
}

/// Lay out the initial stack in the thread's page: room for an interrupt
/// frame at the very top, then the switch frame the first dispatch pops.
///
/// # Safety
///
/// `tcb` must point at the base of a freshly allocated, writable page.
unsafe fn prime_stack(tcb: *mut Tcb, entry: ThreadEntry, arg: usize) {
    let top = tcb as usize + PAGE_SIZE;
    let sp = top - size_of::<InterruptFrame>() - size_of::<SwitchFrame>();
    let trampoline: extern "C" fn(ThreadEntry, usize) -> ! = launch;
    // SAFETY: `sp` lies inside the thread's page, far above the TCB
    // fields; the page is exclusively ours.
    unsafe {
        (sp as *mut SwitchFrame).write(SwitchFrame {
            ebp: 0,
            ebx: 0,
            edi: 0,
            esi: 0,
            eip: trampoline as usize as u32,
            return_slot: 0,
            entry: entry as usize as u32,
            arg: arg as u32,
        });
        (*tcb).set_saved_sp(sp as *mut u32);
    }
}

/// First code a spawned thread executes. The context switch "returns"
/// here with `entry` and `arg` on the stack. Interrupts were disabled by
/// whoever dispatched us; turn them back on before entering the thread
/// body, and park the thread if the body ever returns.
extern "C" fn launch(entry: ThreadEntry, arg: usize) -> ! {
    arch::enable_interrupts();
    entry(arg);
    exit_current();
}

/// Block the calling thread. Interrupts must already be disabled, and the
/// caller is responsible for having parked itself on a wait queue first
/// (or for never being woken). Returns when the thread is next
/// dispatched.
pub fn block_current() {
    assert!(
        !arch::interrupts_enabled(),
        "block_current needs interrupts disabled"
    );
    let mut cur = current();
    // SAFETY: interrupts are disabled on a single CPU; the TCB is ours.
    unsafe {
        assert_eq!(cur.as_ref().state(), ThreadState::Running);
        cur.as_mut().set_state(ThreadState::Blocked);
    }
    switch_to_next(cur);
}

/// Make a blocked thread runnable again.
pub fn unblock(thread: NonNull<Tcb>) {
    let _guard = InterruptGuard::disabled();
    // SAFETY: interrupts are disabled; the caller vouches the TCB is live.
    unsafe {
        let tcb = &mut *thread.as_ptr();
        assert_eq!(
            tcb.state(),
            ThreadState::Blocked,
            "unblock of a thread that is not blocked"
        );
        tcb.set_state(ThreadState::Ready);
        (*state()).ready.push_back(addr_of_mut!(tcb.state_node));
    }
}

/// Voluntarily hand the CPU to the next ready thread, if any.
pub fn yield_now() {
    let _guard = InterruptGuard::disabled();
    let cur = current();
    // SAFETY: interrupts are disabled on a single CPU.
    unsafe {
        if (*state()).ready.is_empty() {
            return;
        }
        let tcb = &mut *cur.as_ptr();
        tcb.set_state(ThreadState::Ready);
        (*state()).ready.push_back(addr_of_mut!(tcb.state_node));
    }
    switch_to_next(cur);
}

/// Park the calling thread forever. Used when a thread's entry function
/// returns; the TCB page is not reclaimed.
pub fn exit_current() -> ! {
    arch::disable_interrupts();
    let mut cur = current();
    // SAFETY: interrupts are disabled on a single CPU; the TCB is ours.
    unsafe {
        log::debug!(target: "sched", "tid {} finished, parking", cur.as_ref().tid());
        cur.as_mut().set_state(ThreadState::Blocked);
    }
    switch_to_next(cur);
    unreachable!("a parked thread was dispatched again");
}

/// Timer ISR: the preemption point. Checks the stack canary, burns one
/// tick, and rotates the runner out when its slice is spent.
#[cfg_attr(not(target_os = "none"), allow(dead_code))]
fn timer_tick(_vector: u8) {
    let cur = current();
    // SAFETY: ISR context, the interrupt gate cleared IF; single CPU.
    unsafe {
        let tcb = &mut *cur.as_ptr();
        assert!(
            tcb.canary_intact(),
            "kernel stack overflow on tid {}",
            tcb.tid()
        );
        if !tcb.expire_tick() {
            return;
        }
        tcb.reset_slice();
        if (*state()).ready.is_empty() {
            // Nobody else wants the CPU; keep running on a fresh slice.
            return;
        }
        tcb.set_state(ThreadState::Ready);
        (*state()).ready.push_back(addr_of_mut!(tcb.state_node));
    }
    switch_to_next(cur);
}

/// Dispatch the head of the ready queue. Interrupts must be disabled.
/// The outgoing thread has already been queued or blocked by the caller.
fn switch_to_next(cur: NonNull<Tcb>) {
    debug_assert!(!arch::interrupts_enabled());
    let old_slot;
    let new_slot;
    // SAFETY: interrupts are disabled on a single CPU; queue nodes belong
    // to live TCBs.
    unsafe {
        let sched = &mut *state();
        let next = sched
            .ready
            .pop_front()
            .expect("all threads are blocked, nothing left to run");
        (*next.as_ptr()).set_state(ThreadState::Running);
        old_slot = (*cur.as_ptr()).sp_slot();
        new_slot = (*next.as_ptr()).sp_slot();
        #[cfg(not(target_os = "none"))]
        host_current::CURRENT.store(next.as_ptr(), core::sync::atomic::Ordering::SeqCst);
    }
    // SAFETY: both slots point into live TCBs; the incoming stack carries
    // either a switch frame from a previous dispatch or a spawn frame.
    unsafe { arch::switch_context(old_slot, new_slot) };
}

/// Number of threads in the all-threads registry.
pub fn thread_count() -> usize {
    let _guard = InterruptGuard::disabled();
    // SAFETY: interrupts are disabled on a single CPU.
    unsafe { (*state()).registry.len() }
}


#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn block_dispatches_the_ready_head() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Running);
        let mut b = make_thread(2, "b", ThreadState::Ready);
        set_current(&mut a);
        enqueue_ready(&mut b);

        let _guard = InterruptGuard::disabled();
        let switches = arch::context_switch_count();
        block_current();
        assert_eq!(a.state(), ThreadState::Blocked);
        assert_eq!(b.state(), ThreadState::Running);
        assert_eq!(current().as_ptr(), &mut *b as *mut Tcb);
        assert_eq!(arch::context_switch_count(), switches + 1);
        assert!(ready_tids().is_empty());
    }

    #[test]
    fn unblock_appends_to_the_ready_queue() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Ready);
        let mut b = make_thread(2, "b", ThreadState::Blocked);
        enqueue_ready(&mut a);
        unblock(NonNull::from(&mut *b));
        assert_eq!(b.state(), ThreadState::Ready);
        assert_eq!(ready_tids(), [1, 2]);
    }

    #[test]
    #[should_panic(expected = "not blocked")]
    fn unblocking_a_ready_thread_is_fatal() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Ready);
        unblock(NonNull::from(&mut *a));
    }

    #[test]
    fn yield_rotates_through_the_ready_queue() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Running);
        let mut b = make_thread(2, "b", ThreadState::Ready);
        set_current(&mut a);
        enqueue_ready(&mut b);

        yield_now();
        assert_eq!(b.state(), ThreadState::Running);
        assert_eq!(ready_tids(), [1]);
    }

    #[test]
    fn yield_with_an_empty_queue_keeps_running() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Running);
        set_current(&mut a);
        yield_now();
        assert_eq!(a.state(), ThreadState::Running);
        assert_eq!(current().as_ptr(), &mut *a as *mut Tcb);
    }

    #[test]
    fn tick_preempts_only_when_the_slice_is_spent() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Running);
        let mut b = make_thread(2, "b", ThreadState::Ready);
        set_current(&mut a);
        enqueue_ready(&mut b);

        let _guard = InterruptGuard::disabled();
        for _ in 0..DEFAULT_PRIORITY - 1 {
            timer_tick(TIMER_VECTOR);
            assert_eq!(a.state(), ThreadState::Running);
        }
        timer_tick(TIMER_VECTOR);
        assert_eq!(a.state(), ThreadState::Ready);
        assert_eq!(b.state(), ThreadState::Running);
        // The preempted thread rejoined at the tail with a fresh slice.
        assert_eq!(ready_tids(), [1]);
        assert_eq!(a.ticks_left(), DEFAULT_PRIORITY);
    }

    #[test]
    fn tick_with_no_ready_thread_grants_a_fresh_slice() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Running);
        set_current(&mut a);
        let _guard = InterruptGuard::disabled();
        for _ in 0..DEFAULT_PRIORITY {
            timer_tick(TIMER_VECTOR);
        }
        assert_eq!(a.state(), ThreadState::Running);
        assert_eq!(a.ticks_left(), DEFAULT_PRIORITY);
    }

    #[test]
    #[should_panic(expected = "stack overflow")]
    fn smashed_canary_is_fatal_on_tick() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Running);
        a.smash_canary();
        set_current(&mut a);
        let _guard = InterruptGuard::disabled();
        timer_tick(TIMER_VECTOR);
    }

    #[test]
    #[should_panic(expected = "nothing left to run")]
    fn blocking_the_last_runnable_thread_is_fatal() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Running);
        set_current(&mut a);
        let _guard = InterruptGuard::disabled();
        block_current();
    }
}
