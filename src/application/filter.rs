//! Debounced local search over cached collections.
//!
//! Input is applied to `input_value` at once; the query used for
//! filtering only changes after the input has been quiet for the debounce
//! window:
//!
//! ```text
//! Idle --set_input_value--> Pending --debounce elapsed--> Committed
//!            ^                  |                             |
//!            +-- new input -----+------- new input -----------+
//! ```
//!
//! Filtering never touches the network and never fails: items that cannot
//! be inspected are logged and treated as non-matching.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::mutex_lock;

const SOURCE: &str = "application::filter";

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
#[error("failed to inspect item for search: {source}")]
pub struct FilterProcessingError {
    #[from]
    source: serde_json::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    Idle,
    Pending,
    Committed,
}

#[derive(Debug)]
struct FilterState {
    raw_input: String,
    debounced_query: String,
    phase: FilterPhase,
    /// Bumped by every input; a timer only commits its own generation.
    input_seq: u64,
    timer: Option<JoinHandle<()>>,
    commits: usize,
}

struct Memo<T> {
    data: Arc<[T]>,
    keys: Vec<String>,
    query: String,
    result: Arc<[T]>,
}

/// Per-consumer search state. Never shared between consumers.
pub struct SearchFilter<T> {
    keys: Vec<String>,
    debounce: Duration,
    state: Arc<Mutex<FilterState>>,
    memo: Mutex<Option<Memo<T>>>,
    recomputations: AtomicUsize,
}

/// Create a filter matching against `keys` (dotted paths reach into
/// nested objects).
pub fn use_filter<T, I, K>(keys: I, debounce: Duration) -> SearchFilter<T>
where
    I: IntoIterator<Item = K>,
    K: Into<String>,
{
    SearchFilter::new(keys, debounce)
}

impl<T> SearchFilter<T> {
    pub fn new<I, K>(keys: I, debounce: Duration) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            debounce,
            state: Arc::new(Mutex::new(FilterState {
                raw_input: String::new(),
                debounced_query: String::new(),
                phase: FilterPhase::Idle,
                input_seq: 0,
                timer: None,
                commits: 0,
            })),
            memo: Mutex::new(None),
            recomputations: AtomicUsize::new(0),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn set_keys<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
    }

    pub fn input_value(&self) -> String {
        mutex_lock(&self.state, SOURCE, "input_value").raw_input.clone()
    }

    /// The committed, normalized query currently used for filtering.
    pub fn query(&self) -> String {
        mutex_lock(&self.state, SOURCE, "query").debounced_query.clone()
    }

    pub fn phase(&self) -> FilterPhase {
        mutex_lock(&self.state, SOURCE, "phase").phase
    }

    pub fn is_pending(&self) -> bool {
        self.phase() == FilterPhase::Pending
    }

    /// How many times the debounced query has been committed.
    pub fn commits(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "commits").commits
    }

    /// How many times `filtered_data` actually re-filtered.
    pub fn recomputations(&self) -> usize {
        self.recomputations.load(Ordering::Relaxed)
    }

    /// Record new input and restart the debounce timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set_input_value(&self, value: impl Into<String>) {
        let mut state = mutex_lock(&self.state, SOURCE, "set_input_value");
        state.raw_input = value.into();
        state.input_seq += 1;
        state.phase = FilterPhase::Pending;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let seq = state.input_seq;
        let debounce = self.debounce;
        let shared = Arc::clone(&self.state);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let mut state = mutex_lock(&shared, SOURCE, "commit");
            if state.input_seq != seq {
                return;
            }
            state.debounced_query = normalize(&state.raw_input);
            state.phase = FilterPhase::Committed;
            state.timer = None;
            state.commits += 1;
            debug!(query = %state.debounced_query, "Search query committed");
        }));
    }

    /// Commit pending input now instead of waiting out the debounce.
    pub fn flush(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "flush");
        if state.phase != FilterPhase::Pending {
            return;
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.input_seq += 1;
        state.debounced_query = normalize(&state.raw_input);
        state.phase = FilterPhase::Committed;
        state.commits += 1;
    }
}

impl<T: Serialize + Clone> SearchFilter<T> {
    /// Items of `data` matching the committed query.
    ///
    /// Empty data yields an empty result and an empty query returns `data`
    /// itself. Otherwise an item matches when at least one key's value,
    /// stringified and lowercased, contains the query; missing and null
    /// values count as empty strings.
    pub fn filtered_data(&self, data: &Arc<[T]>) -> Arc<[T]> {
        if data.is_empty() {
            return Arc::clone(data);
        }
        let query = self.query();
        if query.is_empty() {
            return Arc::clone(data);
        }

        let mut memo = mutex_lock(&self.memo, SOURCE, "filtered_data");
        if let Some(cached) = memo.as_ref() {
            if Arc::ptr_eq(&cached.data, data) && cached.keys == self.keys && cached.query == query
            {
                return Arc::clone(&cached.result);
            }
        }

        let result: Arc<[T]> = data
            .iter()
            .filter(|item| self.matches(*item, &query))
            .cloned()
            .collect();
        self.recomputations.fetch_add(1, Ordering::Relaxed);

        *memo = Some(Memo {
            data: Arc::clone(data),
            keys: self.keys.clone(),
            query,
            result: Arc::clone(&result),
        });
        result
    }

    fn matches(&self, item: &T, query: &str) -> bool {
        match searchable_fields(item, &self.keys) {
            Ok(fields) => fields
                .iter()
                .any(|field| field.to_lowercase().contains(query)),
            Err(error) => {
                warn!(error = %error, "Search skipped an item it could not inspect");
                false
            }
        }
    }
}

impl<T> Drop for SearchFilter<T> {
    fn drop(&mut self) {
        if let Some(timer) = mutex_lock(&self.state, SOURCE, "drop").timer.take() {
            timer.abort();
        }
    }
}

fn normalize(input: &str) -> String {
    input.trim().to_lowercase()
}

fn searchable_fields<T: Serialize>(
    item: &T,
    keys: &[String],
) -> Result<Vec<String>, FilterProcessingError> {
    let value = serde_json::to_value(item)?;
    Ok(keys.iter().map(|key| field_text(&value, key)).collect())
}

fn field_text(value: &Value, key: &str) -> String {
    let field = key
        .split('.')
        .try_fold(value, |current, segment| current.get(segment));
    match field {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
