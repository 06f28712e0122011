//! Fixed-size worker pool and pipeline-stage task composition (§4.7).
//!
//! `TaskDependencies` is a refcounted predecessor count plus a list of
//! dependee groups to notify once that count (and this node's own task
//! count) both reach zero; a `TaskGroup` is the handle callers enqueue work
//! onto and wait on. `TaskComposer` chains groups into pipeline stages: a
//! task in stage N cannot start before every task in stage N-1 has
//! completed, but tasks within one stage run in no particular order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size worker-thread pool draining one shared job queue. Sized to
/// hardware concurrency minus the main thread, clamped to at least one.
pub struct Pool {
    sender: Mutex<Option<Sender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    pub fn new() -> Arc<Pool> {
        Self::with_thread_count(num_cpus::get().saturating_sub(1).max(1))
    }

    pub fn with_thread_count(worker_count: usize) -> Arc<Pool> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let threads = (0..worker_count.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("vkforge-worker-{id}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Arc::new(Pool {
            sender: Mutex::new(Some(sender)),
            threads: Mutex::new(threads),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.threads.lock().len()
    }

    fn submit(&self, job: Job) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(job);
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Dropping every Sender closes the channel; each worker's `recv()`
        // then returns `Err` and its loop exits on its own.
        self.sender.lock().take();
        for handle in self.threads.get_mut().drain(..) {
            let _ = handle.join();
        }
    }
}

struct TaskDependencies {
    pool: Arc<Pool>,
    pending_predecessors: AtomicUsize,
    remaining_tasks: AtomicUsize,
    flushed: Mutex<bool>,
    buffered: Mutex<Vec<Job>>,
    dependees: Mutex<Vec<Arc<TaskDependencies>>>,
    // Completion bookkeeping uses std::sync rather than parking_lot: `wait`
    // is the one genuine blocking suspension point in this module (§5), and
    // a plain Condvar is all it needs.
    done: std::sync::Mutex<bool>,
    condvar: Condvar,
}

impl TaskDependencies {
    fn new(pool: Arc<Pool>) -> Arc<TaskDependencies> {
        Arc::new(TaskDependencies {
            pool,
            pending_predecessors: AtomicUsize::new(0),
            remaining_tasks: AtomicUsize::new(0),
            flushed: Mutex::new(false),
            buffered: Mutex::new(Vec::new()),
            dependees: Mutex::new(Vec::new()),
            done: std::sync::Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    /// Registers `self` as a dependee of `predecessor`: `self` cannot
    /// dispatch its own buffered tasks until `predecessor` completes. A
    /// predecessor that already completed satisfies the dependency on the
    /// spot rather than being registered, since its dependee list has
    /// already been drained.
    fn add_dependency(self: &Arc<Self>, predecessor: &Arc<TaskDependencies>) {
        let predecessor_done = predecessor.done.lock().unwrap();
        if *predecessor_done {
            drop(predecessor_done);
            self.dependency_satisfied();
            return;
        }
        predecessor.dependees.lock().push(self.clone());
        self.pending_predecessors.fetch_add(1, Ordering::AcqRel);
    }

    fn enqueue(&self, job: Job) {
        self.remaining_tasks.fetch_add(1, Ordering::AcqRel);
        self.buffered.lock().push(job);
    }

    fn flush(self: &Arc<Self>) {
        *self.flushed.lock() = true;
        if self.pending_predecessors.load(Ordering::Acquire) == 0 {
            self.dispatch_buffered();
        }
    }

    fn dispatch_buffered(self: &Arc<Self>) {
        let jobs: Vec<Job> = std::mem::take(&mut *self.buffered.lock());
        if jobs.is_empty() {
            self.maybe_complete();
            return;
        }
        for job in jobs {
            let deps = self.clone();
            self.pool.submit(Box::new(move || {
                job();
                deps.task_completed();
            }));
        }
    }

    fn task_completed(self: &Arc<Self>) {
        if self.remaining_tasks.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.maybe_complete();
        }
    }

    fn dependency_satisfied(self: &Arc<Self>) {
        if self.pending_predecessors.fetch_sub(1, Ordering::AcqRel) == 1 && *self.flushed.lock() {
            self.dispatch_buffered();
        }
    }

    fn maybe_complete(self: &Arc<Self>) {
        if !*self.flushed.lock()
            || self.pending_predecessors.load(Ordering::Acquire) != 0
            || self.remaining_tasks.load(Ordering::Acquire) != 0
        {
            return;
        }
        {
            let mut done = self.done.lock().unwrap();
            if *done {
                return;
            }
            *done = true;
        }
        self.condvar.notify_all();
        for dependee in self.dependees.lock().drain(..) {
            dependee.dependency_satisfied();
        }
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.condvar.wait(done).unwrap();
        }
    }
}

/// A batch of tasks sharing one dependency node. Cheap to clone; every
/// clone refers to the same underlying group.
#[derive(Clone)]
pub struct TaskGroup {
    deps: Arc<TaskDependencies>,
}

impl TaskGroup {
    fn new(pool: Arc<Pool>) -> TaskGroup {
        TaskGroup {
            deps: TaskDependencies::new(pool),
        }
    }

    /// Makes this group a dependee of `other`: none of this group's tasks
    /// may start until every task `other` was flushed with has completed.
    /// Must be called before `self` is flushed.
    pub fn depend_on(&self, other: &TaskGroup) {
        self.deps.add_dependency(&other.deps);
    }

    /// Queues `job` to run on the worker pool once this group's
    /// dependencies are satisfied. Must be called before `flush`.
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        self.deps.enqueue(Box::new(job));
    }

    /// Closes the group to further `enqueue` calls. Dispatches its buffered
    /// tasks immediately if its dependencies are already satisfied, or as
    /// soon as they become satisfied otherwise.
    pub fn flush(&self) {
        self.deps.flush();
    }

    /// Blocks the calling thread until every task in this group has
    /// completed. `flush` must have been called, directly or via
    /// `TaskComposer`, or this never returns.
    pub fn wait(&self) {
        self.deps.wait();
    }
}

/// Chains `TaskGroup`s into ordered pipeline stages on top of one `Pool`.
pub struct TaskComposer {
    pool: Arc<Pool>,
    current_stage: Mutex<Option<TaskGroup>>,
    deferred: Mutex<Vec<TaskGroup>>,
}

impl TaskComposer {
    pub fn new(pool: Arc<Pool>) -> TaskComposer {
        TaskComposer {
            pool,
            current_stage: Mutex::new(None),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Starts a new stage depending on the current stage (flushing it) and
    /// every deferred group registered since the last call (flushing each
    /// of those too), then becomes the new current stage.
    pub fn begin_pipeline_stage(&self) -> TaskGroup {
        let group = TaskGroup::new(self.pool.clone());

        if let Some(previous) = self.current_stage.lock().take() {
            group.depend_on(&previous);
            previous.flush();
        }
        for handle in self.deferred.lock().drain(..) {
            group.depend_on(&handle);
            handle.flush();
        }

        *self.current_stage.lock() = Some(group.clone());
        group
    }

    /// Returns a group that gates the *next* `begin_pipeline_stage` call
    /// without becoming a dependency of the current stage — for
    /// off-critical-path work (e.g. background asset streaming) that must
    /// finish before some later stage runs but shouldn't block this one.
    pub fn get_deferred_enqueue_handle(&self) -> TaskGroup {
        let group = TaskGroup::new(self.pool.clone());
        self.deferred.lock().push(group.clone());
        group
    }

    /// Finalizes the chain: flushes and returns the current stage so the
    /// caller can attach further external dependencies (e.g. wait on it
    /// before a frame-end fence wait). Returns `None` if no stage was ever
    /// begun.
    pub fn get_outgoing_task(&self) -> Option<TaskGroup> {
        let group = self.current_stage.lock().take();
        if let Some(group) = &group {
            group.flush();
        }
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn every_enqueued_task_runs_before_wait_returns() {
        let pool = Pool::new();
        let composer = TaskComposer::new(pool);
        let group = composer.begin_pipeline_stage();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = counter.clone();
            group.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        group.flush();
        group.wait();

        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn a_stage_never_starts_before_its_predecessor_finishes() {
        let pool = Pool::new();
        let composer = TaskComposer::new(pool);

        let stage1_done = Arc::new(AtomicBool::new(false));
        let stage1 = composer.begin_pipeline_stage();
        {
            let stage1_done = stage1_done.clone();
            stage1.enqueue(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                stage1_done.store(true, Ordering::SeqCst);
            });
        }

        let stage2_saw_stage1_done = Arc::new(AtomicBool::new(false));
        let stage2 = composer.begin_pipeline_stage(); // depends on stage1, flushes it
        {
            let stage1_done = stage1_done.clone();
            let stage2_saw_stage1_done = stage2_saw_stage1_done.clone();
            stage2.enqueue(move || {
                stage2_saw_stage1_done.store(stage1_done.load(Ordering::SeqCst), Ordering::SeqCst);
            });
        }

        composer.get_outgoing_task().expect("a stage was begun").wait();
        assert!(stage2_saw_stage1_done.load(Ordering::SeqCst));
    }

    #[test]
    fn a_deferred_handle_gates_the_next_stage_but_not_the_one_it_was_taken_in() {
        let pool = Pool::new();
        let composer = TaskComposer::new(pool);

        let stage1 = composer.begin_pipeline_stage();
        stage1.enqueue(|| {});

        let deferred_done = Arc::new(AtomicBool::new(false));
        let deferred = composer.get_deferred_enqueue_handle();
        {
            let deferred_done = deferred_done.clone();
            deferred.enqueue(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                deferred_done.store(true, Ordering::SeqCst);
            });
        }
        deferred.flush();

        let saw_deferred_done = Arc::new(AtomicBool::new(false));
        let stage2 = composer.begin_pipeline_stage(); // depends on stage1 AND the deferred handle
        {
            let deferred_done = deferred_done.clone();
            let saw_deferred_done = saw_deferred_done.clone();
            stage2.enqueue(move || {
                saw_deferred_done.store(deferred_done.load(Ordering::SeqCst), Ordering::SeqCst);
            });
        }

        composer.get_outgoing_task().expect("a stage was begun").wait();
        assert!(saw_deferred_done.load(Ordering::SeqCst));
    }

    #[test]
    fn worker_count_is_never_less_than_one() {
        let pool = Pool::with_thread_count(0);
        assert_eq!(pool.worker_count(), 1);
    }
}
