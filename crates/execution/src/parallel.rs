//! A projection evaluated by a fixed pool of worker threads.
//!
//! ```text
//!                    +----------+
//!               +--> | worker 0 | --+
//! +-------+     |    +----------+   |    +------+
//! | input | ----+--> | worker 1 | --+--> | rows | --> next()
//! +-------+     |    +----------+   |    +------+
//!   (lock)      +--> | worker n | --+--> | errs | --> next()
//!                    +----------+        +------+
//! ```
//!
//! Workers take turns pulling a row from the shared input,
//! evaluate the projection outside of the lock,
//! and push the result onto a bounded queue.
//! Rows are returned in no particular order.

use std::{
    mem,
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{Error, Result};
use crossbeam_channel::{self as channel, select, Receiver, Sender};
use gitql_expr::{Expr, Row};
use gitql_plan::{Context, RowIter};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::iter::project;

/// A worker observed that the query was cancelled
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("query execution was cancelled")]
pub struct Cancelled;

/// The input iterator shared by all workers
struct Source {
    iter: Box<dyn RowIter>,
    /// The input returned its last row or an error
    finished: bool,
    closed: bool,
}

impl Source {
    fn pull(&mut self) -> Result<Option<Row>> {
        if self.finished || self.closed {
            return Ok(None);
        }
        let row = self.iter.next();
        if !matches!(row, Ok(Some(_))) {
            self.finished = true;
        }
        row
    }

    /// Closes the input at most once
    fn close(&mut self) -> Result<()> {
        if mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.iter.close()
    }
}

enum State {
    /// No worker has been started
    Idle,
    Running {
        rows: Receiver<Row>,
        errors: Receiver<Error>,
        coordinator: JoinHandle<()>,
    },
    /// The output was drained or an error was returned.
    /// Workers are winding down and no more rows are returned.
    Draining { coordinator: JoinHandle<()> },
    Closed,
}

/// Evaluates a list of expressions over the rows of its input using `parallelism` workers
pub struct ParallelIter {
    exprs: Arc<[Expr]>,
    source: Arc<Mutex<Source>>,
    parallelism: usize,
    ctx: Context,
    cancel: CancellationToken,
    state: State,
}

impl ParallelIter {
    pub fn new(ctx: &Context, exprs: Vec<Expr>, input: Box<dyn RowIter>, parallelism: usize) -> Self {
        let (ctx, cancel) = ctx.with_cancel();
        Self {
            exprs: exprs.into(),
            source: Arc::new(Mutex::new(Source {
                iter: input,
                finished: false,
                closed: false,
            })),
            parallelism: parallelism.max(1),
            ctx,
            cancel,
            state: State::Idle,
        }
    }

    fn start(&self) -> Result<State> {
        let (rows_tx, rows) = channel::bounded(self.parallelism);
        let (errors_tx, errors) = channel::bounded(self.parallelism);

        let workers = (0..self.parallelism)
            .map(|id| {
                let worker = Worker {
                    id,
                    exprs: self.exprs.clone(),
                    source: self.source.clone(),
                    ctx: self.ctx.clone(),
                    rows: rows_tx.clone(),
                    errors: errors_tx.clone(),
                };
                thread::Builder::new()
                    .name(format!("parallel-project-{id}"))
                    .spawn(move || worker.run())
            })
            .collect::<Result<Vec<_>, _>>()?;

        // The output is closed once every worker has exited
        let coordinator = thread::Builder::new()
            .name("parallel-project".to_owned())
            .spawn(move || {
                for worker in workers {
                    if worker.join().is_err() {
                        warn!("parallel projection worker panicked");
                    }
                }
                drop(rows_tx);
            })?;

        debug!("started {} parallel projection workers", self.parallelism);
        Ok(State::Running {
            rows,
            errors,
            coordinator,
        })
    }

    /// Stop the workers and stop returning rows
    fn finish(&mut self) {
        self.cancel.cancel();
        self.state = match mem::replace(&mut self.state, State::Closed) {
            State::Running { coordinator, .. } => State::Draining { coordinator },
            state => state,
        };
    }
}

impl RowIter for ParallelIter {
    fn next(&mut self) -> Result<Option<Row>> {
        if let State::Idle = self.state {
            self.state = self.start()?;
        }
        let State::Running { rows, errors, .. } = &self.state else {
            return Ok(None);
        };

        let failure = select! {
            recv(rows) -> row => match row {
                Ok(row) => return Ok(Some(row)),
                // Every worker has exited, possibly after failing
                Err(_) => errors.try_recv().ok(),
            },
            recv(errors) -> err => match err {
                Ok(err) => Some(err),
                // No worker failed, keep draining the output
                Err(_) => match rows.recv() {
                    Ok(row) => return Ok(Some(row)),
                    Err(_) => None,
                },
            },
        };

        self.finish();
        match failure {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.cancel.cancel();
        // Dropping the receivers unblocks workers waiting to push a row
        let coordinator = match mem::replace(&mut self.state, State::Closed) {
            State::Running { coordinator, .. } | State::Draining { coordinator } => Some(coordinator),
            State::Idle | State::Closed => None,
        };
        if let Some(coordinator) = coordinator
            && coordinator.join().is_err()
        {
            warn!("parallel projection coordinator panicked");
        }
        self.source.lock().close()
    }
}

impl Drop for ParallelIter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    id: usize,
    exprs: Arc<[Expr]>,
    source: Arc<Mutex<Source>>,
    ctx: Context,
    rows: Sender<Row>,
    errors: Sender<Error>,
}

impl Worker {
    fn run(self) {
        let _span = self.ctx.span().clone().entered();
        trace!("parallel projection worker {} started", self.id);
        loop {
            if self.ctx.is_cancelled() {
                let _ = self.errors.try_send(Cancelled.into());
                break;
            }
            // The lock is only held for the pull
            let pulled = self.source.lock().pull();
            let row = match pulled {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => {
                    let _ = self.errors.try_send(e);
                    break;
                }
            };
            match project(&self.exprs, &row) {
                Ok(row) => {
                    if self.rows.send(row).is_err() {
                        // The consumer is gone
                        break;
                    }
                }
                Err(e) => {
                    let _ = self.errors.try_send(e);
                    break;
                }
            }
        }
        trace!("parallel projection worker {} exited", self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicU64, AtomicUsize, Ordering},
            Arc,
        },
        thread::{self, ThreadId},
    };

    use anyhow::{bail, Result};
    use gitql_expr::{errors::EvalError, Column, Expr, Row, Schema, Type, Value};
    use gitql_plan::{mem::MemTable, Context, RowIter, Table};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use tracing::{span, Event, Metadata, Subscriber};

    use super::{Cancelled, ParallelIter};

    fn enable_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Yields `limit` rows and counts how often it was closed
    struct Counting {
        next: i64,
        limit: i64,
        fail_at: Option<i64>,
        closes: Arc<AtomicUsize>,
    }

    impl Counting {
        fn new(limit: i64) -> (Self, Arc<AtomicUsize>) {
            let closes = Arc::new(AtomicUsize::new(0));
            let iter = Self {
                next: 0,
                limit,
                fail_at: None,
                closes: closes.clone(),
            };
            (iter, closes)
        }
    }

    impl RowIter for Counting {
        fn next(&mut self) -> Result<Option<Row>> {
            if Some(self.next) == self.fail_at {
                bail!("disk on fire");
            }
            if self.next == self.limit {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(vec![Value::Int64(self.next)]))
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn drain(iter: &mut ParallelIter) -> Result<Vec<Row>> {
        let mut rows = vec![];
        while let Some(row) = iter.next()? {
            rows.push(row);
        }
        Ok(rows)
    }

    #[test]
    fn projects_every_row() -> Result<()> {
        enable_logging();
        let schema: Schema = vec![Column::new("t", "col1", Type::Text), Column::new("t", "col2", Type::Text)].into();
        let rows = (0..499)
            .map(|i| vec![Value::Text(format!("col1_{i}")), Value::Text(format!("col2_{i}"))])
            .collect();
        let table = MemTable::new("t", schema, rows);

        let ctx = Context::new();
        let input = table.row_iter(&ctx)?;
        let exprs = vec![Expr::field("t", "col2", 1, Type::Text)];
        let mut iter = ParallelIter::new(&ctx, exprs, input, 4);

        let mut got = drain(&mut iter)?;
        got.sort();
        let mut expected = (0..499)
            .map(|i| vec![Value::Text(format!("col2_{i}"))])
            .collect::<Vec<_>>();
        expected.sort();
        assert_eq!(got, expected);

        assert_eq!(iter.next()?, None);
        iter.close()
    }

    #[test]
    fn close_mid_stream() -> Result<()> {
        enable_logging();
        let (input, closes) = Counting::new(10_000);
        let exprs = vec![Expr::field("t", "n", 0, Type::Int64)];
        let mut iter = ParallelIter::new(&Context::new(), exprs, Box::new(input), 3);

        assert!(iter.next()?.is_some());
        assert!(iter.next()?.is_some());

        iter.close()?;
        iter.close()?;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        // Every worker has exited and released its handle on the input
        assert_eq!(Arc::strong_count(&iter.source), 1);
        assert_eq!(iter.next()?, None);
        Ok(())
    }

    #[test]
    fn close_before_start() -> Result<()> {
        let (input, closes) = Counting::new(10);
        let mut iter = ParallelIter::new(&Context::new(), vec![], Box::new(input), 2);
        iter.close()?;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(iter.next()?, None);
        Ok(())
    }

    #[test]
    fn evaluation_error_is_returned_once() -> Result<()> {
        let (input, closes) = Counting::new(100);
        // Comparing an integer with a string fails for every row
        let exprs = vec![Expr::equals(Expr::field("t", "n", 0, Type::Int64), Expr::lit("x"))];
        let mut iter = ParallelIter::new(&Context::new(), exprs, Box::new(input), 4);

        let err = iter.next().unwrap_err();
        assert!(matches!(err.downcast_ref::<EvalError>(), Some(EvalError::TypeMismatch { .. })));
        assert_eq!(iter.next()?, None);

        iter.close()?;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn input_error_is_returned() -> Result<()> {
        let (mut input, _) = Counting::new(100);
        input.fail_at = Some(0);
        let exprs = vec![Expr::field("t", "n", 0, Type::Int64)];
        let mut iter = ParallelIter::new(&Context::new(), exprs, Box::new(input), 2);

        assert_eq!(iter.next().unwrap_err().to_string(), "disk on fire");
        iter.close()
    }

    #[test]
    fn cancelled_query() -> Result<()> {
        let (input, closes) = Counting::new(100);
        let ctx = Context::new();
        let mut iter = ParallelIter::new(&ctx, vec![Expr::lit(1i64)], Box::new(input), 2);

        ctx.cancel();
        let err = iter.next().unwrap_err();
        assert_eq!(err.downcast_ref::<Cancelled>(), Some(&Cancelled));

        iter.close()?;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        Ok(())
    }

    /// Records the threads that enter each span
    #[derive(Default)]
    struct Entered {
        ids: AtomicU64,
        enters: Mutex<Vec<(span::Id, ThreadId)>>,
    }

    impl Subscriber for Entered {
        fn enabled(&self, _: &Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &span::Attributes<'_>) -> span::Id {
            span::Id::from_u64(self.ids.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn record(&self, _: &span::Id, _: &span::Record<'_>) {}

        fn record_follows_from(&self, _: &span::Id, _: &span::Id) {}

        fn event(&self, _: &Event<'_>) {}

        fn enter(&self, span: &span::Id) {
            self.enters.lock().push((span.clone(), thread::current().id()));
        }

        fn exit(&self, _: &span::Id) {}
    }

    #[test]
    fn workers_run_in_the_query_span() -> Result<()> {
        let entered = Arc::new(Entered::default());
        let span = tracing::subscriber::with_default(entered.clone(), || tracing::debug_span!("plan.Project"));
        let Some(id) = span.id() else {
            panic!("the span was not recorded");
        };

        let (input, _) = Counting::new(40);
        let ctx = Context::new().with_span(span);
        let mut iter = ParallelIter::new(&ctx, vec![Expr::field("t", "n", 0, Type::Int64)], Box::new(input), 4);
        assert_eq!(drain(&mut iter)?.len(), 40);
        iter.close()?;

        let test = thread::current().id();
        let workers = entered
            .enters
            .lock()
            .iter()
            .filter(|(span, thread)| *span == id && *thread != test)
            .count();
        assert_eq!(workers, 4);
        Ok(())
    }
}
