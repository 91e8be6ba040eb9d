use super::helpers::{boot, boot_with, drive, HostKernel, Trace};
use crate::arch::host::HostArch;
use crate::config::priority;
use crate::errors::{KResult, KernelError};
use crate::irq::{self, HwIrq, IrqChip, IrqController};
use crate::sched::{Preemptive, PriorityPoll, RoundRobin};
use crate::sync::{
    wait_event_interruptible_timeout, wait_event_timeout, wake_up, Semaphore, WaitQueueHead, Work,
};
use crate::thread::{ThreadAttr, ThreadBuilder, ThreadPolicy, ThreadStatus};
use crate::time::{Jiffies, TickSource};
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec;
use portable_atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

fn slot<T: Send>() -> &'static spin::Mutex<Option<T>> {
    Box::leak(Box::new(spin::Mutex::new(None)))
}

#[test]
fn test_higher_priority_thread_preempts_at_tick() {
    let (k, _) = boot::<Preemptive>(10);
    k.start_preempt_checker().unwrap();
    assert_eq!(k.start_preempt_checker(), Err(KernelError::Busy));
    let trace = Trace::leak();

    trace.push("low start");
    let high = ThreadBuilder::new()
        .name("high")
        .priority(20)
        .spawn(k, move || trace.push("high"))
        .unwrap();
    trace.push("high ready");
    // Creation alone never switches.
    assert!(!k.need_resched());

    k.timer_interrupt();
    assert!(k.need_resched());
    k.irq_exit();
    trace.push("low resumed");

    assert!(!k.need_resched());
    assert_eq!(
        trace.events(),
        ["low start", "high ready", "high", "low resumed"]
    );
    high.join(k).unwrap();
    k.check_invariants().unwrap();
}

#[test]
fn test_cooperative_policy_never_requests_preemption() {
    let (k, _) = boot::<PriorityPoll>(10);
    k.start_preempt_checker().unwrap();
    let trace = Trace::leak();
    let high = ThreadBuilder::new()
        .priority(20)
        .spawn(k, move || trace.push("high"))
        .unwrap();

    for _ in 0..5 {
        k.timer_interrupt();
        k.irq_exit();
    }
    assert!(!k.need_resched());
    assert!(trace.events().is_empty());

    k.schedule_thread();
    assert_eq!(trace.events(), ["high"]);
    high.join(k).unwrap();
}

#[test]
fn test_time_slice_expiry_rotates_equal_priorities() {
    let attr = ThreadAttr::new()
        .with_policy(ThreadPolicy::RoundRobin)
        .with_time_slice(2);
    let (k, _) = boot_with::<Preemptive>(priority::NORMAL, attr);
    k.start_preempt_checker().unwrap();
    let trace = Trace::leak();
    let peer = ThreadBuilder::new()
        .spawn(k, move || trace.push("peer"))
        .unwrap();

    k.timer_interrupt();
    assert!(!k.need_resched());
    k.timer_interrupt();
    assert!(k.need_resched());
    k.irq_exit();
    assert_eq!(trace.events(), ["peer"]);
    peer.join(k).unwrap();
}

#[test]
fn test_roll_poll_ignores_priority() {
    let (k, _) = boot::<RoundRobin>(priority::NORMAL);
    let trace = Trace::leak();
    let low = ThreadBuilder::new()
        .priority(1)
        .spawn(k, move || trace.push("low"))
        .unwrap();
    let high = ThreadBuilder::new()
        .priority(200)
        .spawn(k, move || trace.push("high"))
        .unwrap();
    low.join(k).unwrap();
    high.join(k).unwrap();
    assert_eq!(trace.events(), ["low", "high"]);
}

#[test]
fn test_semaphore_hands_unit_between_threads() {
    let (k, _) = boot::<PriorityPoll>(priority::NORMAL);
    let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::new(0)));
    let trace = Trace::leak();

    let taker = ThreadBuilder::new()
        .name("taker")
        .spawn(k, move || {
            trace.push("down");
            sem.down(k).unwrap();
            trace.push("taken");
        })
        .unwrap();
    let giver = ThreadBuilder::new()
        .name("giver")
        .spawn(k, move || {
            assert!(sem.up());
            trace.push("up");
        })
        .unwrap();

    taker.join(k).unwrap();
    giver.join(k).unwrap();
    assert_eq!(trace.events(), ["down", "up", "taken"]);
    assert_eq!(sem.count(), 0);
    assert_eq!(sem.down_try_lock(), Err(KernelError::Busy));
    assert_eq!(k.stats().zombies, 0);
}

#[test]
fn test_wait_times_out_after_deadline() {
    let (k, _) = boot::<Preemptive>(priority::IDLE);
    let head: &'static WaitQueueHead = Box::leak(Box::new(WaitQueueHead::new()));
    let outcome = slot::<(KResult<Jiffies>, Jiffies)>();

    let waiter = ThreadBuilder::new()
        .name("waiter")
        .spawn(k, move || {
            let start = k.jiffies();
            let result = wait_event_timeout(k, head, || false, 10);
            *outcome.lock() = Some((result, k.jiffies().wrapping_sub(start)));
        })
        .unwrap();

    k.schedule_thread();
    assert_eq!(k.thread_status(waiter.tid()), Ok(ThreadStatus::Suspend));
    assert_eq!(head.len(), 1);

    assert!(drive(k, 20, || outcome.lock().is_some()));
    let (result, elapsed) = outcome.lock().take().unwrap();
    assert_eq!(result, Err(KernelError::TimedOut));
    assert!((10..=12).contains(&elapsed), "elapsed {}", elapsed);
    assert!(head.is_empty());
    waiter.join(k).unwrap();
}

#[test]
fn test_wake_during_condition_check_is_not_lost() {
    let (k, _) = boot::<Preemptive>(priority::NORMAL);
    let head = WaitQueueHead::new();
    let mut checks = 0;
    let result = wait_event_timeout(
        k,
        &head,
        || {
            checks += 1;
            if checks == 2 {
                assert_eq!(wake_up(k, &head), 1);
            }
            checks == 3
        },
        1000,
    );
    assert_eq!(result, Ok(1000));
    assert!(head.is_empty());
}

#[test]
fn test_wake_up_readies_suspended_waiter() {
    let (k, _) = boot::<Preemptive>(priority::IDLE);
    let head: &'static WaitQueueHead = Box::leak(Box::new(WaitQueueHead::new()));
    let flag: &'static AtomicBool = Box::leak(Box::new(AtomicBool::new(false)));
    let outcome = slot::<KResult<Jiffies>>();

    let waiter = ThreadBuilder::new()
        .spawn(k, move || {
            let result = wait_event_timeout(k, head, || flag.load(Ordering::Acquire), 1000);
            *outcome.lock() = Some(result);
        })
        .unwrap();
    k.schedule_thread();
    assert_eq!(k.thread_status(waiter.tid()), Ok(ThreadStatus::Suspend));

    flag.store(true, Ordering::Release);
    assert_eq!(wake_up(k, head), 1);
    assert_eq!(k.thread_status(waiter.tid()), Ok(ThreadStatus::Ready));

    waiter.join(k).unwrap();
    assert_eq!(outcome.lock().take(), Some(Ok(1000)));
}

#[test]
fn test_kill_interrupts_waiter_and_join_reclaims_it() {
    let (k, _) = boot::<Preemptive>(priority::IDLE);
    let head: &'static WaitQueueHead = Box::leak(Box::new(WaitQueueHead::new()));
    let outcome = slot::<KResult<Jiffies>>();

    let victim = ThreadBuilder::new()
        .name("victim")
        .spawn(k, move || {
            let result = wait_event_interruptible_timeout(k, head, || false, 1000);
            *outcome.lock() = Some(result);
        })
        .unwrap();
    let tid = victim.tid();
    k.schedule_thread();
    assert_eq!(k.thread_status(tid), Ok(ThreadStatus::Suspend));

    k.thread_kill(tid).unwrap();
    assert_eq!(k.thread_status(tid), Ok(ThreadStatus::Ready));
    let in_use = k.stack_counters().in_use;

    victim.join(k).unwrap();
    assert_eq!(outcome.lock().take(), Some(Err(KernelError::Interrupted)));
    assert_eq!(k.thread_status(tid), Err(KernelError::NotFound));
    assert_eq!(k.thread_kill(tid), Err(KernelError::NotFound));
    assert_eq!(k.stack_counters().in_use, in_use - 1);
    assert!(head.is_empty());
}

fn join_lower_priority_thread<P: crate::sched::Policy>() {
    let (k, me) = boot::<P>(200);
    let ran: &'static AtomicBool = Box::leak(Box::new(AtomicBool::new(false)));
    let low = ThreadBuilder::new()
        .name("low")
        .priority(10)
        .spawn(k, move || ran.store(true, Ordering::SeqCst))
        .unwrap();
    let tid = low.tid();

    low.join(k).unwrap();
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(k.thread_status(tid), Err(KernelError::NotFound));
    assert_eq!(k.current_tid(), Some(me));
    assert_eq!(k.thread_status(me), Ok(ThreadStatus::Running));
    k.check_invariants().unwrap();
}

#[test]
fn test_join_parks_until_lower_priority_thread_exits() {
    join_lower_priority_thread::<PriorityPoll>();
}

#[test]
fn test_preemptive_join_of_lower_priority_thread() {
    join_lower_priority_thread::<Preemptive>();
}

#[test]
fn test_join_of_exited_thread_returns_at_once() {
    let (k, me) = boot::<PriorityPoll>(10);
    let done = ThreadBuilder::new().priority(200).spawn(k, || {}).unwrap();
    k.schedule_thread();
    assert_eq!(k.thread_status(done.tid()), Ok(ThreadStatus::None));
    let switches = k.stats().schedule_count;
    done.join(k).unwrap();
    assert_eq!(k.stats().schedule_count, switches);
    assert_eq!(k.current_tid(), Some(me));
}

#[test]
fn test_delay_survives_early_wakeup() {
    let (k, _) = boot::<Preemptive>(priority::IDLE);
    let outcome = slot::<(KResult<()>, Jiffies)>();
    let sleeper = ThreadBuilder::new()
        .spawn(k, move || {
            let result = k.schedule_delay(5);
            *outcome.lock() = Some((result, k.jiffies()));
        })
        .unwrap();
    k.schedule_thread();

    k.timer_interrupt();
    k.schedule_thread_wakeup(sleeper.tid()).unwrap();
    k.schedule_thread();
    assert_eq!(k.thread_status(sleeper.tid()), Ok(ThreadStatus::Suspend));

    assert!(drive(k, 10, || outcome.lock().is_some()));
    assert_eq!(outcome.lock().take(), Some((Ok(()), 5)));
    sleeper.join(k).unwrap();
}

static INITCALL_RAN: AtomicBool = AtomicBool::new(false);
static WORK_DATA: AtomicUsize = AtomicUsize::new(0);

fn mark_initcall(_kernel: &'static HostKernel<Preemptive>) -> KResult<()> {
    INITCALL_RAN.store(true, Ordering::SeqCst);
    Ok(())
}

fn failing_initcall(_kernel: &'static HostKernel<Preemptive>) -> KResult<()> {
    Err(KernelError::NoDev)
}

fn record_work(data: usize) {
    WORK_DATA.store(data, Ordering::SeqCst);
}

static WORK: Work = Work::new(record_work, 42);

#[test]
fn test_kernel_threads_run_initcalls_and_work() {
    let (k, _) = boot::<Preemptive>(priority::IDLE);
    k.register_initcall("mark", mark_initcall).unwrap();
    k.register_initcall("fail", failing_initcall).unwrap();
    k.kthread_init().unwrap();

    // kthread -> init -> kworker, each one parking in turn.
    k.schedule_thread();
    assert!(INITCALL_RAN.load(Ordering::SeqCst));
    assert_eq!(
        k.register_initcall("late", mark_initcall),
        Err(KernelError::Busy)
    );
    assert_eq!(k.run_initcalls(), 0);
    let kworker = k.kworker_tid().unwrap();
    assert_eq!(k.thread_status(kworker), Ok(ThreadStatus::Suspend));
    assert_eq!(k.stats().sleeping, 1);

    assert_eq!(k.schedule_work(&WORK), Ok(true));
    assert_eq!(k.schedule_work(&WORK), Ok(false));
    assert_eq!(k.thread_status(kworker), Ok(ThreadStatus::Ready));
    k.schedule_thread();
    assert_eq!(WORK_DATA.load(Ordering::SeqCst), 42);
    assert!(!WORK.is_pending());

    k.thread_kill(kworker).unwrap();
    k.schedule_thread();
    k.reap_zombies();
    assert_eq!(k.thread_status(kworker), Err(KernelError::NotFound));
    k.check_invariants().unwrap();
}

struct FakeChip {
    pending: spin::Mutex<VecDeque<HwIrq>>,
}

impl IrqChip for FakeChip {
    fn ack(&self) -> Option<HwIrq> {
        self.pending.lock().pop_front()
    }
    fn eoi(&self, _hwirq: HwIrq) {}
    fn mask(&self, _hwirq: HwIrq) {}
    fn unmask(&self, _hwirq: HwIrq) {}
}

#[derive(Default)]
struct FakeTimer {
    hz: AtomicU32,
    acks: AtomicU32,
}

impl TickSource for FakeTimer {
    fn start(&self, hz: u32) {
        self.hz.store(hz, Ordering::SeqCst);
    }

    fn ack(&self) {
        self.acks.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_tick_interrupt_drives_jiffies_and_preemption() {
    const TIMER_IRQ: HwIrq = 27;

    let (k, _) = boot::<Preemptive>(priority::IDLE);
    let chip: &'static FakeChip = Box::leak(Box::new(FakeChip {
        pending: spin::Mutex::new(VecDeque::new()),
    }));
    let timer: &'static FakeTimer = Box::leak(Box::default());
    let ctrl: &'static IrqController<HostArch> = Box::leak(Box::new(IrqController::new(chip)));

    let soft = k.install_tick(ctrl, TIMER_IRQ, timer).unwrap();
    assert_eq!(timer.hz.load(Ordering::SeqCst), k.config().hz);

    chip.pending.lock().push_back(TIMER_IRQ);
    assert_eq!(ctrl.do_irq(), 1);
    assert_eq!(k.jiffies(), 1);
    assert_eq!(timer.acks.load(Ordering::SeqCst), 1);
    assert_eq!(ctrl.irq_count(soft), Some(1));

    k.start_preempt_checker().unwrap();
    let trace = Trace::leak();
    let worker = ThreadBuilder::new()
        .spawn(k, move || trace.push("worker"))
        .unwrap();

    irq::install_global(ctrl);
    chip.pending.lock().push_back(TIMER_IRQ);
    irq::mrt_do_irq();
    assert_eq!(k.jiffies(), 2);
    assert_eq!(trace.events(), ["worker"]);
    assert_eq!(ctrl.unhandled_count(), 0);
    worker.join(k).unwrap();
}

#[test]
fn test_thread_on_caller_provided_stack() {
    let (k, _) = boot::<PriorityPoll>(priority::NORMAL);
    let memory: &'static mut [u8] = Box::leak(vec![0u8; 4096].into_boxed_slice());
    let ran: &'static AtomicBool = Box::leak(Box::new(AtomicBool::new(false)));
    let before = k.stack_counters();

    let handle = ThreadBuilder::new()
        .name("static")
        .static_stack(memory)
        .spawn(k, move || ran.store(true, Ordering::SeqCst))
        .unwrap();
    assert_eq!(k.thread_name(handle.tid()).unwrap().as_str(), "static");
    handle.join(k).unwrap();

    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(k.stack_counters().allocated, before.allocated);
}

#[test]
fn test_undersized_static_stack_is_rejected() {
    let (k, _) = boot::<PriorityPoll>(priority::NORMAL);
    let memory: &'static mut [u8] = Box::leak(vec![0u8; 64].into_boxed_slice());
    let result = ThreadBuilder::new().static_stack(memory).spawn(k, || {});
    assert_eq!(result.err(), Some(KernelError::Unvalid));
    assert_eq!(k.stats().threads, 1);
}
