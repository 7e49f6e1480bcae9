#![allow(dead_code)]

use std::future::Ready;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use skein::callback::{Component, GraphCallbacks, RunInfo};
use skein::error::GraphError;

/// Route test-run tracing through the env-filtered subscriber once.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Local state used by staged pipelines under test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub a: String,
}

/// A unary node that appends a fixed suffix to its string input.
pub fn append(
    suffix: &'static str,
) -> impl Fn(String) -> Ready<Result<String, GraphError>> + Send + Sync + 'static {
    move |input: String| std::future::ready(Ok(format!("{input}{suffix}")))
}

/// Counts graph-component callback firings across a run.
#[derive(Debug, Default)]
pub struct CountingCallbacks {
    pub started: AtomicUsize,
    pub ended: AtomicUsize,
    pub errored: AtomicUsize,
}

impl CountingCallbacks {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn errored(&self) -> usize {
        self.errored.load(Ordering::SeqCst)
    }
}

impl GraphCallbacks for CountingCallbacks {
    fn on_start(&self, info: &RunInfo) {
        if info.component == Component::Graph {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_end(&self, info: &RunInfo) {
        if info.component == Component::Graph {
            self.ended.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_error(&self, info: &RunInfo, _error: &GraphError) {
        if info.component == Component::Graph {
            self.errored.fetch_add(1, Ordering::SeqCst);
        }
    }
}
