//! Reactor interface: the single-threaded event loop the engine is built
//! against.
//!
//! The source drove its TCP segment loop with a single `poll(2)` call per
//! iteration via the `nix` crate, checking per-connection timeouts before
//! blocking again. `PollReactor` generalizes that same shape into a
//! standalone, reusable loop: register readable descriptors and one-shot
//! timers, and `run()` services both from one thread with one syscall per
//! iteration.
//!
//! `PollReactor` is a cheap `Clone`-able handle around a `RefCell`-guarded
//! inner state, not a plain owned struct: callbacks dispatched by `run()`
//! routinely need to register new timers or re-arm descriptors on the very
//! same reactor that is invoking them, so every public method borrows only
//! for the duration of the mutation and never while a callback is running.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags};

pub type TimerId = u64;

struct TimerSlot {
    deadline: Instant,
    id: TimerId,
}

impl PartialEq for TimerSlot {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for TimerSlot {}
impl PartialOrd for TimerSlot {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerSlot {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline).then(self.id.cmp(&other.id))
    }
}

struct Inner {
    readable: HashMap<RawFd, Box<dyn FnMut()>>,
    // fds cancelled while their own callback was running; consulted once
    // right after that callback returns so it is not accidentally re-armed.
    cancelled_fds: HashSet<RawFd>,
    heap: BinaryHeap<Reverse<TimerSlot>>,
    pending: HashMap<TimerId, Box<dyn FnOnce()>>,
    next_id: TimerId,
    running: bool,
}

/// A `poll(2)`-backed, single-threaded reactor.
///
/// Timer handles are owning tokens: cancelling one just removes its
/// callback from `pending`, leaving an orphaned entry in the heap that is
/// silently discarded the next time it would have fired. That makes
/// cancellation idempotent against a timer that already fired but whose
/// callback has not yet run: `run()` only ever invokes a callback it can
/// still find in `pending`.
#[derive(Clone)]
pub struct PollReactor(Rc<RefCell<Inner>>);

impl Default for PollReactor {
    fn default() -> Self {
        PollReactor(Rc::new(RefCell::new(Inner {
            readable: HashMap::new(),
            cancelled_fds: HashSet::new(),
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            next_id: 0,
            running: false,
        })))
    }
}

impl PollReactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_readable(&self, fd: RawFd, callback: Box<dyn FnMut() + 'static>) {
        let mut inner = self.0.borrow_mut();
        inner.cancelled_fds.remove(&fd);
        inner.readable.insert(fd, callback);
    }

    pub fn cancel_readable(&self, fd: RawFd) {
        let mut inner = self.0.borrow_mut();
        inner.readable.remove(&fd);
        inner.cancelled_fds.insert(fd);
    }

    pub fn schedule_timer(&self, delay: Duration, callback: Box<dyn FnOnce() + 'static>) -> TimerId {
        let mut inner = self.0.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.heap.push(Reverse(TimerSlot { deadline: Instant::now() + delay, id }));
        inner.pending.insert(id, callback);
        id
    }

    pub fn cancel_timer(&self, id: TimerId) {
        self.0.borrow_mut().pending.remove(&id);
    }

    /// Ask a running (or about-to-run) loop to exit after the current
    /// iteration.
    pub fn stop(&self) {
        self.0.borrow_mut().running = false;
    }

    fn is_running(&self) -> bool {
        self.0.borrow().running
    }

    fn fire_due_timers(&self) {
        let mut due = Vec::new();
        {
            let mut inner = self.0.borrow_mut();
            let now = Instant::now();
            while let Some(Reverse(slot)) = inner.heap.peek() {
                if slot.deadline > now {
                    break;
                }
                let Reverse(slot) = inner.heap.pop().expect("just peeked");
                if let Some(callback) = inner.pending.remove(&slot.id) {
                    due.push(callback);
                }
            }
        }
        for callback in due {
            callback();
        }
    }

    fn next_timeout_ms(&self) -> Option<i32> {
        let inner = self.0.borrow();
        let slot = inner.heap.peek()?;
        let now = Instant::now();
        let ms = slot.0.deadline.saturating_duration_since(now).as_millis().min(i32::MAX as u128) as i32;
        Some(ms)
    }

    /// Run until `stop()` is called or there is nothing left to wait on.
    pub fn run(&self) -> std::io::Result<()> {
        self.0.borrow_mut().running = true;

        while self.is_running() {
            self.fire_due_timers();
            if !self.is_running() {
                break;
            }

            let timeout_ms = self.next_timeout_ms();
            let fds: Vec<RawFd> = self.0.borrow().readable.keys().copied().collect();

            if fds.is_empty() {
                match timeout_ms {
                    Some(ms) => {
                        std::thread::sleep(Duration::from_millis(ms as u64));
                        continue;
                    }
                    None => break, // nothing left to wait on
                }
            }

            let mut pollfds: Vec<PollFd> =
                fds.iter().map(|&fd| PollFd::new(fd, PollFlags::POLLIN)).collect();
            let timeout = timeout_ms.unwrap_or(-1);
            let ready = poll(&mut pollfds, timeout)
                .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;

            if ready <= 0 {
                continue;
            }

            for (pollfd, fd) in pollfds.iter().zip(fds.iter()) {
                let Some(revents) = pollfd.revents() else { continue };
                if !revents.contains(PollFlags::POLLIN) {
                    continue;
                }

                // Take the callback out so it may itself re-register,
                // cancel, or schedule timers on this same reactor without
                // re-entering a held borrow.
                let callback = self.0.borrow_mut().readable.remove(fd);
                if let Some(mut callback) = callback {
                    callback();

                    let mut inner = self.0.borrow_mut();
                    if !inner.cancelled_fds.remove(fd) {
                        inner.readable.insert(*fd, callback);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn timer_fires_and_is_removed() {
        let reactor = PollReactor::new();
        let fired = Rc::new(StdRefCell::new(false));
        let fired2 = fired.clone();

        reactor.schedule_timer(Duration::from_millis(1), Box::new(move || {
            *fired2.borrow_mut() = true;
        }));

        std::thread::sleep(Duration::from_millis(5));
        reactor.fire_due_timers();

        assert!(*fired.borrow());
        assert!(reactor.0.borrow().pending.is_empty());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let reactor = PollReactor::new();
        let fired = Rc::new(StdRefCell::new(false));
        let fired2 = fired.clone();

        let id = reactor.schedule_timer(Duration::from_millis(1), Box::new(move || {
            *fired2.borrow_mut() = true;
        }));
        reactor.cancel_timer(id);

        std::thread::sleep(Duration::from_millis(5));
        reactor.fire_due_timers();

        assert!(!*fired.borrow());
    }

    #[test]
    fn cancel_after_fire_is_a_harmless_noop() {
        let reactor = PollReactor::new();
        let id = reactor.schedule_timer(Duration::from_millis(0), Box::new(|| {}));
        std::thread::sleep(Duration::from_millis(2));
        reactor.fire_due_timers();
        reactor.cancel_timer(id);
    }

    #[test]
    fn timer_callback_can_schedule_another_timer_on_the_same_reactor() {
        let reactor = PollReactor::new();
        let runs = Rc::new(StdRefCell::new(0));

        fn schedule_chain(reactor: PollReactor, runs: Rc<StdRefCell<u32>>) {
            reactor.clone().schedule_timer(Duration::from_millis(0), Box::new(move || {
                *runs.borrow_mut() += 1;
                if *runs.borrow() < 3 {
                    schedule_chain(reactor, runs);
                }
            }));
        }
        schedule_chain(reactor.clone(), runs.clone());

        for _ in 0..3 {
            std::thread::sleep(Duration::from_millis(2));
            reactor.fire_due_timers();
        }

        assert_eq!(*runs.borrow(), 3);
    }
}
