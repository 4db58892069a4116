use std::sync::Mutex;

/// Reporting capability handed to a pipeline. `on_progress` receives milestone
/// messages, `on_debug` the line-oriented firehose (installer output and the
/// like). Both are called synchronously on the pipeline task, so
/// implementations must return quickly.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, message: &str);
    fn on_debug(&self, message: &str);
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&self, _message: &str) {}
    fn on_debug(&self, _message: &str) {}
}

/// Collects both channels in memory. Handy for transports that flush after the
/// fact, and for asserting on pipeline output in tests.
#[derive(Default)]
pub struct BufferSink {
    progress: Mutex<Vec<String>>,
    debug: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress_messages(&self) -> Vec<String> {
        self.progress.lock().expect("progress buffer poisoned").clone()
    }

    pub fn debug_messages(&self) -> Vec<String> {
        self.debug.lock().expect("debug buffer poisoned").clone()
    }
}

impl ProgressSink for BufferSink {
    fn on_progress(&self, message: &str) {
        self.progress
            .lock()
            .expect("progress buffer poisoned")
            .push(message.to_string());
    }

    fn on_debug(&self, message: &str) {
        self.debug
            .lock()
            .expect("debug buffer poisoned")
            .push(message.to_string());
    }
}
