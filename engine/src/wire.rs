//! Terminal wiring: one pipe's output feeding another pipe's configuration.
//!
//! A configuration value `{"terminal": "rates", "path": "rate"}` does not read
//! the current item; it pulls the next item from the wire named `rates` and
//! extracts `path` (default `content`) from it. Wires are explicit handles
//! attached to a step when the pipeline is assembled.
//!
//! Every read consumes one item. Reading a wire past its end fails with
//! [`PipeError::TerminalExhausted`].

use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::dispatch::Feed;
use crate::error::{PipeError, PipeResult};
use crate::record::Record;

/// A named, shared, forward-only source of records.
#[derive(Clone)]
pub struct Terminal {
    name: String,
    source: Arc<Mutex<Feed>>,
}

impl Terminal {
    pub fn new<I>(name: impl Into<String>, feed: I) -> Self
    where
        I: Iterator<Item = PipeResult<Record>> + Send + 'static,
    {
        Self {
            name: name.into(),
            source: Arc::new(Mutex::new(Box::new(feed))),
        }
    }

    pub fn from_records(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self::new(name, records.into_iter().map(Ok))
    }

    /// Materialise an async feed into a wire.
    ///
    /// Bodies pull synchronously, so a cooperative pipeline drains the
    /// source before the consuming pipe runs.
    pub async fn collect<S>(name: impl Into<String>, stream: S) -> Self
    where
        S: Stream<Item = PipeResult<Record>> + Send,
    {
        let items: Vec<PipeResult<Record>> = stream.collect().await;
        Self::new(name, items.into_iter())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pull the next record off the wire.
    pub fn pull(&self) -> PipeResult<Record> {
        let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        match source.next() {
            Some(item) => item,
            None => Err(PipeError::TerminalExhausted(self.name.clone())),
        }
    }
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Wires available to one pipe, by name.
#[derive(Debug, Clone, Default)]
pub struct Wires {
    terminals: HashMap<String, Terminal>,
}

impl Wires {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, terminal: Terminal) -> Self {
        self.insert(terminal);
        self
    }

    pub fn insert(&mut self, terminal: Terminal) {
        self.terminals.insert(terminal.name.clone(), terminal);
    }

    pub fn get(&self, name: &str) -> Option<&Terminal> {
        self.terminals.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.terminals.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clones_share_the_same_source() {
        let terminal = Terminal::from_records(
            "nums",
            vec![
                Record::from_value(json!({"content": 1})).unwrap(),
                Record::from_value(json!({"content": 2})).unwrap(),
            ],
        );
        let other = terminal.clone();

        assert_eq!(terminal.pull().unwrap()["content"], 1);
        assert_eq!(other.pull().unwrap()["content"], 2);
        assert!(matches!(terminal.pull(), Err(PipeError::TerminalExhausted(_))));
    }

    #[test]
    fn test_upstream_error_is_returned_by_pull() {
        let terminal = Terminal::new("broken", vec![Err(PipeError::UnknownPipe("x".into()))].into_iter());
        assert!(matches!(terminal.pull(), Err(PipeError::UnknownPipe(_))));
    }

    #[tokio::test]
    async fn test_collect_async_feed() {
        let stream = futures::stream::iter(vec![Ok(Record::from_value(json!({"content": "a"})).unwrap())]);
        let terminal = Terminal::collect("letters", stream).await;
        assert_eq!(terminal.name(), "letters");
        assert_eq!(terminal.pull().unwrap()["content"], "a");
    }
}
