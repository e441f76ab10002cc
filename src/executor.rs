use std::sync::mpsc;
use std::thread::JoinHandle;

/// Runs flush tasks off the aggregator's consumer thread.
///
/// Kept abstract the way the aggregator's `Ticker`/`Clock` are: a host
/// embedding this crate may already have a thread pool or async runtime
/// it would rather flushes ride on.
pub trait Executor: Send + Sync {
    fn submit(&self, task: Box<dyn FnOnce() + Send>);
}

enum Job {
    Task(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// The default `Executor`: a small fixed pool of worker threads pulling
/// jobs off a shared channel.
pub struct ThreadExecutor {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadExecutor {
    pub fn new(parallelism: usize, thread_name_prefix: &str) -> Self {
        let parallelism = parallelism.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = std::sync::Arc::new(std::sync::Mutex::new(receiver));

        let workers = (0..parallelism)
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("{thread_name_prefix}-{i}"))
                    .spawn(move || loop {
                        let job = receiver.lock().unwrap().recv();
                        match job {
                            Ok(Job::Task(task)) => task(),
                            Ok(Job::Shutdown) | Err(_) => break,
                        }
                    })
                    .expect("failed to spawn executor worker thread")
            })
            .collect();

        Self { sender, workers }
    }

    /// Stops accepting new work and waits for in-flight tasks to drain.
    pub fn shutdown(mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(Job::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Executor for ThreadExecutor {
    fn submit(&self, task: Box<dyn FnOnce() + Send>) {
        // A full channel send only fails once every worker has already
        // exited; dropping the task then is the only option left.
        let _ = self.sender.send(Job::Task(task));
    }
}

/// Runs every task synchronously on the calling thread. Useful for
/// tests and for embedding in a host that already serializes flushes.
#[derive(Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn submit(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn thread_executor_runs_every_submitted_task() {
        let executor = ThreadExecutor::new(2, "test-exec");
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            executor.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        executor.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn inline_executor_runs_synchronously() {
        let executor = InlineExecutor;
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = flag.clone();
        executor.submit(Box::new(move || {
            flag2.store(1, Ordering::SeqCst);
        }));
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }
}
