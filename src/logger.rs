//! Pooled per-request loggers
//!
//! Every in-flight request gets its own [`RequestLogger`] handle stamped with
//! the request id. Handles are expensive to treat as throwaway (they share one
//! sink and carry tag state), so the server keeps them in a free-list pool and
//! reuses them across requests. Handles live for the life of the pool; they
//! are released, never destroyed.

use crate::error::{Result, ServerError};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Where a pool writes its log lines.
#[derive(Debug, PartialEq, Eq)]
enum SinkTarget {
    Stdout,
    Stderr,
    Null,
    File(PathBuf),
}

/// Resolve the configured output selector.
///
/// Recognized selectors are `stdout`, `stderr`, and `null`/`nil`. Anything
/// else is a filesystem path; relative paths are treated as a directory and
/// joined with `<filename>.log`.
fn resolve_sink(output: &str, filename: &str) -> SinkTarget {
    match output {
        "stdout" => SinkTarget::Stdout,
        "stderr" => SinkTarget::Stderr,
        "null" | "nil" => SinkTarget::Null,
        path if path.starts_with('/') => SinkTarget::File(PathBuf::from(path)),
        dir => SinkTarget::File(PathBuf::from(dir).join(format!("{}.log", filename))),
    }
}

enum SinkWriter {
    Stdout,
    Stderr,
    Null,
    File(std::fs::File),
}

/// A log destination shared by every handle a pool produces.
pub(crate) struct Sink {
    inner: Mutex<SinkWriter>,
}

impl Sink {
    /// Open the configured sink. Failure here is startup-fatal.
    fn open(output: &str, filename: &str) -> Result<Arc<Self>> {
        let writer = match resolve_sink(output, filename) {
            SinkTarget::Stdout => SinkWriter::Stdout,
            SinkTarget::Stderr => SinkWriter::Stderr,
            SinkTarget::Null => SinkWriter::Null,
            SinkTarget::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|source| ServerError::Sink {
                        path: path.display().to_string(),
                        source,
                    })?;
                SinkWriter::File(file)
            }
        };
        Ok(Arc::new(Self {
            inner: Mutex::new(writer),
        }))
    }

    fn stderr() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(SinkWriter::Stderr),
        })
    }

    fn write_line(&self, line: &str) {
        let mut writer = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Write failures on a log sink are not worth failing a request over.
        let _ = match &mut *writer {
            SinkWriter::Stdout => writeln!(std::io::stdout(), "{}", line),
            SinkWriter::Stderr => writeln!(std::io::stderr(), "{}", line),
            SinkWriter::Null => Ok(()),
            SinkWriter::File(file) => writeln!(file, "{}", line),
        };
    }
}

/// A pooled, per-request logging handle.
///
/// The request id is set once per acquisition; the tag it derives is prefixed
/// to every line. All handles from one pool write to the same sink.
pub struct RequestLogger {
    sink: Arc<Sink>,
    request_id: RwLock<String>,
    tag: RwLock<String>,
}

impl RequestLogger {
    fn with_sink(sink: Arc<Sink>) -> Self {
        Self {
            sink,
            request_id: RwLock::new(String::new()),
            tag: RwLock::new(String::new()),
        }
    }

    /// A fallback handle writing to stderr, for code paths that have no
    /// request-scoped logger available. Never fails.
    pub fn fallback() -> Arc<Self> {
        Arc::new(Self::with_sink(Sink::stderr()))
    }

    /// The request id bound to this handle.
    pub fn request_id(&self) -> String {
        self.request_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn id_matches(&self, request_id: &str) -> bool {
        *self
            .request_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            == *request_id
    }

    fn set_request_id(&self, request_id: &str) {
        *self
            .request_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = request_id.to_string();
        *self.tag.write().unwrap_or_else(PoisonError::into_inner) =
            format!("[{}]", request_id);
    }

    fn log(&self, level: &str, message: &str) {
        let tag = self.tag.read().unwrap_or_else(PoisonError::into_inner);
        self.sink.write_line(&format!("{} {} {}", *tag, level, message));
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log("DEBUG", message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log("INFO", message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log("WARN", message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log("ERROR", message.as_ref());
    }
}

/// Free-list pool of [`RequestLogger`] handles, owned by one server instance.
pub struct LoggerPool {
    root: Arc<RequestLogger>,
    free: Mutex<Vec<Arc<RequestLogger>>>,
    sink: Arc<Sink>,
}

impl LoggerPool {
    /// Open the configured sink and build an empty pool around it.
    ///
    /// An unopenable sink is a startup-fatal error; there is no per-request
    /// fallback for a pool that never existed.
    pub fn new(output: &str, filename: &str) -> Result<Self> {
        let sink = Sink::open(output, filename)?;
        Ok(Self {
            root: Arc::new(RequestLogger::with_sink(sink.clone())),
            free: Mutex::new(Vec::new()),
            sink,
        })
    }

    /// Hand out a handle stamped with `request_id`.
    ///
    /// Fast path: when the root handle already carries a matching id the root
    /// is returned unchanged, with only a read lock taken for the comparison.
    /// Otherwise an idle handle is pulled from the free-list (or allocated on
    /// a miss) and restamped.
    pub fn acquire(&self, request_id: &str) -> Arc<RequestLogger> {
        if self.root.id_matches(request_id) {
            return self.root.clone();
        }

        let handle = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| Arc::new(RequestLogger::with_sink(self.sink.clone())));
        handle.set_request_id(request_id);
        handle
    }

    /// Return a handle to the free-list.
    ///
    /// No validation that the handle came from this pool; that is the
    /// caller's responsibility.
    pub fn release(&self, handle: Arc<RequestLogger>) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// A handle for code paths with no request in scope (background tasks).
    pub fn default_logger(&self) -> Arc<RequestLogger> {
        RequestLogger::fallback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn resolve_sink_selectors() {
        assert_eq!(resolve_sink("stdout", ""), SinkTarget::Stdout);
        assert_eq!(resolve_sink("stderr", ""), SinkTarget::Stderr);
        assert_eq!(resolve_sink("null", ""), SinkTarget::Null);
        assert_eq!(resolve_sink("nil", ""), SinkTarget::Null);
        assert_eq!(
            resolve_sink("/var/log/app.log", "ignored"),
            SinkTarget::File(PathBuf::from("/var/log/app.log"))
        );
        assert_eq!(
            resolve_sink("log", "server"),
            SinkTarget::File(PathBuf::from("log/server.log"))
        );
    }

    #[test]
    fn sink_open_fails_on_missing_directory() {
        let err = LoggerPool::new("/nonexistent-gantry-dir/deep/sink.log", "server");
        assert!(matches!(err, Err(ServerError::Sink { .. })));
    }

    #[test]
    fn acquire_stamps_request_id() {
        let pool = LoggerPool::new("nil", "").unwrap();
        let handle = pool.acquire("di-tseuqer-x");
        assert_eq!(handle.request_id(), "di-tseuqer-x");
    }

    #[test]
    fn released_handle_is_reused_with_identity() {
        let pool = LoggerPool::new("nil", "").unwrap();

        let a = pool.acquire("di-tseuqer-x");
        assert_eq!(a.request_id(), "di-tseuqer-x");
        pool.release(a.clone());

        // Same id comes back as the very same object.
        let b = pool.acquire("di-tseuqer-x");
        assert_eq!(b.request_id(), "di-tseuqer-x");
        assert!(Arc::ptr_eq(&a, &b));
        pool.release(b);

        // A different id restamps the pooled object in place.
        let c = pool.acquire("x-request-id");
        assert_eq!(c.request_id(), "x-request-id");
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn concurrent_ids_never_cross_assign() {
        let pool = Arc::new(LoggerPool::new("nil", "").unwrap());

        let mut workers = Vec::new();
        for i in 0..8 {
            let pool = pool.clone();
            workers.push(thread::spawn(move || {
                let id = format!("req-{}", i);
                for _ in 0..200 {
                    let handle = pool.acquire(&id);
                    assert_eq!(handle.request_id(), id);
                    pool.release(handle);
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn concurrent_distinct_handles_are_distinct_objects() {
        let pool = Arc::new(LoggerPool::new("nil", "").unwrap());

        // Held simultaneously, so the pool must hand out separate objects.
        let a = pool.acquire("r1");
        let b = pool.acquire("r2");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.request_id(), "r1");
        assert_eq!(b.request_id(), "r2");
    }

    #[test]
    fn default_logger_never_fails() {
        let pool = LoggerPool::new("nil", "").unwrap();
        let fallback = pool.default_logger();
        fallback.info("background task");
        assert_eq!(fallback.request_id(), "");
    }
}
