//! Handing payloads to background workers or external queues.

use crate::Error;
use serde_json::Value;
use std::{
    collections::VecDeque,
    error::Error as StdError,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{error, warn};

/// Error returned by an [`AsyncHandler`].
pub type HandlerError = Box<dyn StdError + Send + Sync + 'static>;

/// Default deadline of [`ThreadHandler::shutdown`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(6);

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Receives payloads instead of the calling thread sending them.
///
/// An implementation either processes the job right away on another thread, or stores
/// [`AsyncJob::to_json`] in a queue and later hands it to
/// [`Notifier::process_from_async_handler`](crate::Notifier::process_from_async_handler).
pub trait AsyncHandler: fmt::Debug + Send + Sync {
    /// Accept the job. An error makes the notifier try the failover handlers.
    fn call(&self, job: AsyncJob) -> Result<(), HandlerError>;
}

impl<H: AsyncHandler + ?Sized> AsyncHandler for Arc<H> {
    fn call(&self, job: AsyncJob) -> Result<(), HandlerError> {
        self.as_ref().call(job)
    }
}

/// Delivery pipeline an [`AsyncJob`] calls back into.
pub(crate) trait Deliver: Send + Sync {
    fn deliver(&self, payload: &Value) -> Result<(), Error>;

    fn deliver_json(&self, json: &str) -> Result<(), Error> {
        let payload: Value = serde_json::from_str(json).map_err(Error::DeserializePayload)?;
        self.deliver(&payload)
    }
}

/// Payload of an [`AsyncJob`].
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncPayload {
    /// The payload as built.
    Value(Value),
    /// The truncated payload serialized to JSON.
    Json(String),
}

/// A payload waiting to be delivered.
#[derive(Clone)]
pub struct AsyncJob {
    payload: AsyncPayload,
    deliver: Arc<dyn Deliver>,
}

impl fmt::Debug for AsyncJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncJob")
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

impl AsyncJob {
    pub(crate) fn new(payload: AsyncPayload, deliver: Arc<dyn Deliver>) -> Self {
        AsyncJob { payload, deliver }
    }

    /// The payload.
    pub fn payload(&self) -> &AsyncPayload {
        &self.payload
    }

    /// The payload as JSON, e.g. to put it in a queue.
    pub fn to_json(&self) -> Result<String, Error> {
        match &self.payload {
            AsyncPayload::Value(value) => {
                serde_json::to_string(value).map_err(Error::SerializePayload)
            }
            AsyncPayload::Json(json) => Ok(json.clone()),
        }
    }

    /// Truncate and send the payload.
    pub fn process(&self) -> Result<(), Error> {
        match &self.payload {
            AsyncPayload::Value(value) => self.deliver.deliver(value),
            AsyncPayload::Json(json) => self.deliver.deliver_json(json),
        }
    }
}

/// Call `primary`, then each failover handler in order until one accepts the job.
pub(crate) fn dispatch(
    primary: &dyn AsyncHandler,
    failovers: &[Arc<dyn AsyncHandler>],
    job: AsyncJob,
) -> Result<(), Error> {
    let Err(err) = primary.call(job.clone()) else {
        return Ok(());
    };
    if failovers.is_empty() {
        error!(
            "[faultline] Async handler failed, and there are no failover handlers configured: {}",
            err
        );
        return Err(Error::AsyncHandler(err));
    }
    warn!("[faultline] Async handler failed, trying failover handlers: {}", err);

    let mut last_err = err;
    for handler in failovers {
        match handler.call(job.clone()) {
            Ok(()) => return Ok(()),
            Err(err) => last_err = err,
        }
    }
    error!(
        "[faultline] All failover handlers failed while processing item: {}. Payload: {}",
        last_err,
        job.to_json().unwrap_or_default()
    );
    Err(Error::AsyncHandler(last_err))
}

/// Processes every job on its own named thread.
///
/// Dropping the handler waits for its workers like [`ThreadHandler::shutdown`] does.
///
/// ```no_run
/// use faultline::{Config, Notifier, ThreadHandler};
/// use std::sync::Arc;
///
/// let threads = Arc::new(ThreadHandler::new());
/// let config = Config::new("POST_SERVER_ITEM_TOKEN").with_async_handler(threads.clone());
/// let notifier = Notifier::new(config, reqwest::blocking::Client::new());
/// notifier.info("deployed");
/// threads.shutdown().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct ThreadHandler {
    workers: Mutex<VecDeque<JoinHandle<()>>>,
    spawned: AtomicUsize,
}

impl ThreadHandler {
    /// Create a handler without workers.
    pub fn new() -> Self {
        ThreadHandler::default()
    }

    /// Wait up to [`DEFAULT_SHUTDOWN_TIMEOUT`] for the jobs accepted so far.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.shutdown_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Wait up to `timeout` for the jobs accepted so far.
    ///
    /// Workers still running at the deadline stay with the handler, so a later shutdown
    /// waits for them again.
    pub fn shutdown_timeout(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        let mut pending = std::mem::take(&mut *self.lock_workers());

        while let Some(handle) = pending.pop_front() {
            // A worker dropping the last reference to its own handler cannot join itself.
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    warn!(
                        "[faultline] Async workers did not finish within {:?}",
                        timeout
                    );
                    pending.push_front(handle);
                    let mut workers = self.lock_workers();
                    pending.append(&mut workers);
                    *workers = pending;
                    return Err(Error::ShutdownTimeout(timeout));
                }
                thread::sleep(JOIN_POLL_INTERVAL);
            }
            if handle.join().is_err() {
                error!("[faultline] Async worker panicked");
            }
        }
        Ok(())
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, VecDeque<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AsyncHandler for ThreadHandler {
    fn call(&self, job: AsyncJob) -> Result<(), HandlerError> {
        let id = self.spawned.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("faultline-worker-{}", id))
            .spawn(move || {
                if let Err(err) = job.process() {
                    error!("[faultline] Error processing item on worker thread: {}", err);
                }
            })?;

        let mut workers = self.lock_workers();
        workers.retain(|worker| !worker.is_finished());
        workers.push_back(handle);
        Ok(())
    }
}

impl Drop for ThreadHandler {
    fn drop(&mut self) {
        // Timeouts are already logged.
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct Recorder {
        delivered: Mutex<Vec<Value>>,
        delay: Option<Duration>,
    }

    impl Deliver for Recorder {
        fn deliver(&self, payload: &Value) -> Result<(), Error> {
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            self.delivered.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl AsyncHandler for Failing {
        fn call(&self, _job: AsyncJob) -> Result<(), HandlerError> {
            Err("queue is down".into())
        }
    }

    #[derive(Debug, Default)]
    struct Accepting(AtomicBool);

    impl AsyncHandler for Accepting {
        fn call(&self, _job: AsyncJob) -> Result<(), HandlerError> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn slow_recorder(delay_ms: u64) -> Arc<Recorder> {
        Arc::new(Recorder {
            delivered: Mutex::default(),
            delay: Some(Duration::from_millis(delay_ms)),
        })
    }

    fn job(recorder: Arc<Recorder>) -> AsyncJob {
        AsyncJob::new(AsyncPayload::Value(json!({"data": {"level": "info"}})), recorder)
    }

    #[test]
    fn json_payload_is_parsed_before_delivery() {
        let recorder = Arc::new(Recorder::default());
        let job = AsyncJob::new(AsyncPayload::Json("{\"data\":{}}".into()), recorder.clone());
        job.process().unwrap();
        assert_eq!(vec![json!({"data": {}})], *recorder.delivered.lock().unwrap());
    }

    #[test]
    fn invalid_json_payload_is_an_error() {
        let job = AsyncJob::new(
            AsyncPayload::Json("not json".into()),
            Arc::new(Recorder::default()),
        );
        assert!(matches!(job.process(), Err(Error::DeserializePayload(_))));
    }

    #[test]
    fn failover_stops_at_first_success() {
        let first = Arc::new(Accepting::default());
        let second = Arc::new(Accepting::default());
        let failovers: Vec<Arc<dyn AsyncHandler>> =
            vec![Arc::new(Failing), first.clone(), second.clone()];

        dispatch(&Failing, &failovers, job(Arc::new(Recorder::default()))).unwrap();
        assert!(first.0.load(Ordering::SeqCst));
        assert!(!second.0.load(Ordering::SeqCst));
    }

    #[test]
    fn failure_without_failovers_is_an_error() {
        let result = dispatch(&Failing, &[], job(Arc::new(Recorder::default())));
        assert!(matches!(result, Err(Error::AsyncHandler(_))));
    }

    #[test]
    fn thread_handler_processes_jobs_before_shutdown() {
        let recorder = Arc::new(Recorder::default());
        let handler = ThreadHandler::new();
        for _ in 0..3 {
            handler.call(job(recorder.clone())).unwrap();
        }
        handler.shutdown().unwrap();
        assert_eq!(3, recorder.delivered.lock().unwrap().len());
    }

    #[test]
    fn thread_handler_shutdown_times_out() {
        let handler = ThreadHandler::new();
        handler.call(job(slow_recorder(500))).unwrap();
        assert!(matches!(
            handler.shutdown_timeout(Duration::from_millis(20)),
            Err(Error::ShutdownTimeout(_))
        ));
    }

    #[test]
    fn shutdown_after_timeout_still_waits_for_all_workers() {
        let recorder = slow_recorder(300);
        let handler = ThreadHandler::new();
        handler.call(job(recorder.clone())).unwrap();
        handler.call(job(recorder.clone())).unwrap();
        assert!(matches!(
            handler.shutdown_timeout(Duration::from_millis(10)),
            Err(Error::ShutdownTimeout(_))
        ));

        handler.call(job(recorder.clone())).unwrap();
        handler.shutdown().unwrap();
        assert_eq!(3, recorder.delivered.lock().unwrap().len());
    }

    #[test]
    fn dropping_thread_handler_waits_for_workers() {
        let recorder = slow_recorder(100);
        let handler = ThreadHandler::new();
        handler.call(job(recorder.clone())).unwrap();
        drop(handler);
        assert_eq!(1, recorder.delivered.lock().unwrap().len());
    }
}
