use crate::{
    error::{payload_message, ErrorKind, ReactiveError},
    runtime::{current_runtime, with_current_runtime, with_runtime, Runtime, RuntimeId},
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::{
    cell::Cell,
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

/// How many times one job may run within a single flush before the engine
/// treats it as a reactive feedback loop, reports an error, and skips it.
pub(crate) const RECURSION_LIMIT: u32 = 100;

/// Uid of the external component instance that owns a job. Parents are
/// expected to carry smaller uids than their children, which is what makes
/// `(id, pre)` ordering run parents first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

pub type Job = Rc<SchedulerJob>;

/// One unit of work on the tick queue.
///
/// Jobs are deduplicated by identity, ordered by `(id, pre)` with missing
/// ids last, skipped once inactive, and attributed to their owning instance
/// when they fail.
pub struct SchedulerJob {
    task: Box<dyn Fn()>,
    id: Cell<Option<u64>>,
    pre: Cell<bool>,
    active: Cell<bool>,
    allow_recurse: Cell<bool>,
    instance: Cell<Option<InstanceId>>,
}

impl SchedulerJob {
    pub fn new(task: impl Fn() + 'static) -> Job {
        Rc::new(Self {
            task: Box::new(task),
            id: Cell::new(None),
            pre: Cell::new(false),
            active: Cell::new(true),
            allow_recurse: Cell::new(false),
            instance: Cell::new(None),
        })
    }

    pub fn id(&self) -> Option<u64> {
        self.id.get()
    }

    /// Smaller ids run first; `None` sorts last.
    pub fn set_id(&self, id: Option<u64>) {
        self.id.set(id)
    }

    pub fn pre(&self) -> bool {
        self.pre.get()
    }

    /// Pre jobs run before non-pre jobs of the same id.
    pub fn set_pre(&self, pre: bool) {
        self.pre.set(pre)
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Inactive jobs are skipped by the flush; used when the job's owner has
    /// been unmounted after the job was queued.
    pub fn set_active(&self, active: bool) {
        self.active.set(active)
    }

    pub fn allows_recurse(&self) -> bool {
        self.allow_recurse.get()
    }

    /// Permits this job to re-enqueue itself while it is running.
    pub fn set_allow_recurse(&self, allow_recurse: bool) {
        self.allow_recurse.set(allow_recurse)
    }

    pub fn instance(&self) -> Option<InstanceId> {
        self.instance.get()
    }

    pub fn set_instance(&self, instance: Option<InstanceId>) {
        self.instance.set(instance)
    }

    fn sort_key(&self) -> (u64, bool) {
        // missing ids run last; pre sorts before non-pre at the same id
        (self.id.get().unwrap_or(u64::MAX), !self.pre.get())
    }
}

/// First index in `queue[start..]` whose `(id, pre)` position is not before
/// the given id.
fn find_insertion_index(queue: &[Job], id: u64, mut start: usize) -> usize {
    let mut end = queue.len();
    while start < end {
        let middle = (start + end) >> 1;
        let middle_id = queue[middle].id.get().unwrap_or(u64::MAX);
        if middle_id < id || (middle_id == id && queue[middle].pre.get()) {
            start = middle + 1;
        } else {
            end = middle;
        }
    }
    start
}

impl Runtime {
    pub(crate) fn queue_job(&self, job: &Job) {
        let exists = {
            let queue = self.queue.borrow();
            if queue.is_empty() {
                false
            } else {
                // a running job may only see itself past the flush cursor
                // when it opted into recursion
                let start = if self.is_flushing.get() && job.allow_recurse.get() {
                    self.flush_index.get() + 1
                } else {
                    self.flush_index.get()
                };
                queue.iter().skip(start).any(|queued| Rc::ptr_eq(queued, job))
            }
        };
        if exists {
            return;
        }
        {
            let mut queue = self.queue.borrow_mut();
            match job.id.get() {
                None => queue.push(Rc::clone(job)),
                Some(id) => {
                    let start = if self.is_flushing.get() {
                        self.flush_index.get() + 1
                    } else {
                        0
                    };
                    let start = start.min(queue.len());
                    let index = find_insertion_index(&queue, id, start);
                    queue.insert(index, Rc::clone(job));
                }
            }
        }
        self.queue_flush();
    }

    pub(crate) fn queue_flush(&self) {
        if !self.is_flushing.get() && !self.is_flush_pending.get() {
            self.is_flush_pending.set(true);
        }
    }

    pub(crate) fn queue_post_flush_cb(&self, job: Job) {
        let exists = {
            let active = self.active_post_cbs.borrow();
            match active.as_ref() {
                Some(active) => {
                    let start = if job.allow_recurse.get() {
                        self.post_flush_index.get() + 1
                    } else {
                        self.post_flush_index.get()
                    };
                    let start = start.min(active.len());
                    active[start..].iter().any(|queued| Rc::ptr_eq(queued, &job))
                }
                None => false,
            }
        };
        if !exists {
            self.pending_post_cbs.borrow_mut().push(job);
        }
        self.queue_flush();
    }

    /// Enqueues a pre-deduplicated batch of post-flush callbacks, e.g. a
    /// lifecycle bundle, without the identity check.
    pub(crate) fn queue_post_flush_cbs(&self, jobs: Vec<Job>) {
        self.pending_post_cbs.borrow_mut().extend(jobs);
        self.queue_flush();
    }

    pub(crate) fn invalidate_job(&self, job: &Job) {
        let mut queue = self.queue.borrow_mut();
        if let Some(index) = queue.iter().position(|queued| Rc::ptr_eq(queued, job)) {
            // never cancel the running job or one already executed
            if index > self.flush_index.get() {
                queue.remove(index);
            }
        }
    }

    /// Runs the whole tick: pre/main jobs in `(id, pre)` order, then
    /// post-flush callbacks, repeating until both queues are quiescent.
    pub(crate) fn flush_jobs(&self) {
        let mut seen: FxHashMap<usize, u32> = FxHashMap::default();
        loop {
            self.is_flush_pending.set(false);
            self.is_flushing.set(true);
            self.queue.borrow_mut().sort_by_key(|job| job.sort_key());

            loop {
                let job = {
                    let queue = self.queue.borrow();
                    let index = self.flush_index.get();
                    if index >= queue.len() {
                        break;
                    }
                    Rc::clone(&queue[index])
                };
                if job.active.get() && !self.check_recursive(&mut seen, &job) {
                    self.call_job(&job);
                }
                self.flush_index.set(self.flush_index.get() + 1);
            }

            self.flush_index.set(0);
            self.queue.borrow_mut().clear();
            self.flush_post_flush_cbs(&mut seen);
            self.is_flushing.set(false);

            // anything enqueued by the jobs themselves starts another pass
            if self.queue.borrow().is_empty() && self.pending_post_cbs.borrow().is_empty() {
                break;
            }
        }
    }

    pub(crate) fn flush_post_flush_cbs(&self, seen: &mut FxHashMap<usize, u32>) {
        let pending: Vec<Job> = self.pending_post_cbs.borrow_mut().drain(..).collect();
        if pending.is_empty() {
            return;
        }
        let mut unique = FxHashSet::default();
        let mut deduped: Vec<Job> = pending
            .into_iter()
            .filter(|job| unique.insert(Rc::as_ptr(job) as usize))
            .collect();
        deduped.sort_by_key(|job| job.id.get().unwrap_or(u64::MAX));

        {
            let mut active = self.active_post_cbs.borrow_mut();
            if let Some(active) = active.as_mut() {
                // nested call: splice into the batch already being drained
                active.extend(deduped);
                return;
            }
            *active = Some(deduped);
        }
        self.post_flush_index.set(0);

        loop {
            let job = {
                let active = self.active_post_cbs.borrow();
                let Some(jobs) = active.as_ref() else {
                    break;
                };
                let index = self.post_flush_index.get();
                if index >= jobs.len() {
                    break;
                }
                Rc::clone(&jobs[index])
            };
            if !self.check_recursive(seen, &job) {
                self.call_job(&job);
            }
            self.post_flush_index.set(self.post_flush_index.get() + 1);
        }

        *self.active_post_cbs.borrow_mut() = None;
        self.post_flush_index.set(0);
    }

    /// Pulls pre-flagged jobs out of the queue and runs them immediately,
    /// optionally only those owned by `instance`. Lets pre-watchers observe
    /// a consistent parent state before the parent's own job runs.
    pub(crate) fn flush_pre_flush_cbs(&self, instance: Option<InstanceId>) {
        let mut index = if self.is_flushing.get() {
            self.flush_index.get() + 1
        } else {
            0
        };
        loop {
            let job = {
                let queue = self.queue.borrow();
                if index >= queue.len() {
                    break;
                }
                let job = &queue[index];
                if !job.pre.get() {
                    None
                } else if instance.is_some_and(|instance| job.id.get() != Some(instance.0)) {
                    None
                } else {
                    Some(Rc::clone(job))
                }
            };
            match job {
                Some(job) => {
                    self.queue.borrow_mut().remove(index);
                    self.call_job(&job);
                }
                None => index += 1,
            }
        }
    }

    /// Returns true when the job exceeded the per-flush recursion budget;
    /// the violation is reported exactly once.
    fn check_recursive(&self, seen: &mut FxHashMap<usize, u32>, job: &Job) -> bool {
        let count = seen.entry(Rc::as_ptr(job) as usize).or_insert(0);
        if *count >= RECURSION_LIMIT {
            if *count == RECURSION_LIMIT {
                *count += 1;
                self.handle_error(ReactiveError {
                    kind: ErrorKind::RecursionLimit,
                    instance: job.instance.get(),
                    detail: format!(
                        "job exceeded {RECURSION_LIMIT} runs in one flush; this is likely \
                         a reactive feedback loop where an effect mutates its own \
                         dependencies"
                    ),
                });
            }
            true
        } else {
            *count += 1;
            false
        }
    }

    /// Uniform error-handled call site for every job the scheduler runs.
    pub(crate) fn call_job(&self, job: &Job) {
        let result = catch_unwind(AssertUnwindSafe(|| (job.task)()));
        if let Err(payload) = result {
            let kind = if job.instance.get().is_some() {
                ErrorKind::ComponentUpdate
            } else {
                ErrorKind::Scheduler
            };
            self.handle_error(ReactiveError {
                kind,
                instance: job.instance.get(),
                detail: payload_message(payload.as_ref()),
            });
        }
    }
}

fn with_scheduler<T>(f: impl FnOnce(&Runtime) -> T) -> T {
    with_current_runtime(f).expect("tried to use the scheduler outside a reactive runtime")
}

/// Enqueues a job for the next tick, deduplicating against jobs already
/// queued and keeping the queue in `(id, pre)` order.
pub fn queue_job(job: &Job) {
    with_scheduler(|runtime| runtime.queue_job(job));
}

/// Enqueues a callback to run after the main jobs of the next tick.
pub fn queue_post_flush_cb(job: &Job) {
    with_scheduler(|runtime| runtime.queue_post_flush_cb(Rc::clone(job)));
}

/// Enqueues a pre-deduplicated batch of post-flush callbacks.
pub fn queue_post_flush_cbs(jobs: impl IntoIterator<Item = Job>) {
    with_scheduler(|runtime| runtime.queue_post_flush_cbs(jobs.into_iter().collect()));
}

/// Runs queued pre-flagged jobs immediately, optionally only those whose id
/// matches `instance`.
pub fn flush_pre_flush_cbs(instance: Option<InstanceId>) {
    with_scheduler(|runtime| runtime.flush_pre_flush_cbs(instance));
}

/// Removes a job from the queue if it has not started running yet.
pub fn invalidate_job(job: &Job) {
    with_scheduler(|runtime| runtime.invalidate_job(job));
}

/// Returns a future that performs the pending flush, if any, when first
/// polled, and resolves once the tick has fully settled.
///
/// Awaiting this is the tick boundary: every mutation made before the await
/// has had its jobs run once the future resolves. Awaiting again without
/// intervening mutations resolves immediately.
pub fn next_tick() -> NextTick {
    NextTick {
        runtime: current_runtime().expect("tried to await a tick outside a reactive runtime"),
        done: false,
    }
}

/// Like [`next_tick`], then runs `f` once the tick has settled.
pub async fn next_tick_with<T>(f: impl FnOnce() -> T) -> T {
    next_tick().await;
    f()
}

/// Future returned by [`next_tick`].
pub struct NextTick {
    runtime: RuntimeId,
    done: bool,
}

impl Future for NextTick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if !self.done {
            self.done = true;
            _ = with_runtime(self.runtime, |runtime| {
                if runtime.is_flush_pending.get() && !runtime.is_flushing.get() {
                    runtime.flush_jobs();
                }
            });
        }
        Poll::Ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_id(id: Option<u64>, pre: bool) -> Job {
        let job = SchedulerJob::new(|| {});
        job.set_id(id);
        job.set_pre(pre);
        job
    }

    #[test]
    fn insertion_index_respects_id_order() {
        let queue: Vec<Job> = [1, 2, 4, 8]
            .into_iter()
            .map(|id| job_with_id(Some(id), false))
            .collect();
        assert_eq!(find_insertion_index(&queue, 3, 0), 2);
        assert_eq!(find_insertion_index(&queue, 0, 0), 0);
        assert_eq!(find_insertion_index(&queue, 9, 0), 4);
    }

    #[test]
    fn insertion_index_places_after_pre_jobs_of_same_id() {
        let queue = vec![
            job_with_id(Some(1), true),
            job_with_id(Some(1), false),
            job_with_id(Some(2), false),
        ];
        assert_eq!(find_insertion_index(&queue, 1, 0), 1);
    }

    #[test]
    fn missing_ids_sort_last_and_pre_first() {
        let anonymous = job_with_id(None, false);
        let pre = job_with_id(Some(3), true);
        let main = job_with_id(Some(3), false);
        let mut queue = vec![anonymous, main, pre];
        queue.sort_by_key(|job| job.sort_key());
        assert_eq!(queue[0].id(), Some(3));
        assert!(queue[0].pre());
        assert_eq!(queue[1].id(), Some(3));
        assert!(!queue[1].pre());
        assert_eq!(queue[2].id(), None);
    }
}
