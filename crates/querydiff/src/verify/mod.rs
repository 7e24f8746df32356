use std::borrow::Cow;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};

use crate::equivalence::{ExecutorFactory, QueryExecutor, check_equivalence};
use crate::models::{IgnoreSet, Outcome, ParsedPairs, QueryPair, RunCounters, RunSummary};
use crate::report::{LogKind, NOT_EQUIVALENT_LABEL, ReportHandle, error_label, render_block};
use crate::wrap::{WrapPolicy, WrapResult, wrap_query};

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOptions {
    pub wrap: Option<WrapPolicy>,
    pub workers: usize,
    pub batch_size: usize,
    pub ignore: IgnoreSet,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            wrap: Some(WrapPolicy::default()),
            workers: default_workers(),
            batch_size: DEFAULT_BATCH_SIZE,
            ignore: IgnoreSet::default(),
        }
    }
}

#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Normalizes both sides (when a policy is given) and runs the equivalence
/// check. A side the normalizer rejects makes the whole pair `Skipped`.
pub fn verify_pair<E>(executor: &mut E, pair: &QueryPair, wrap: Option<&WrapPolicy>) -> Outcome
where
    E: QueryExecutor + ?Sized,
{
    let (first, second) = match wrap {
        None => (Cow::Borrowed(pair.first.as_str()), Cow::Borrowed(pair.second.as_str())),
        Some(policy) => {
            let WrapResult::Wrapped(first) = wrap_query(&pair.first, policy) else {
                return Outcome::Skipped;
            };
            let WrapResult::Wrapped(second) = wrap_query(&pair.second, policy) else {
                return Outcome::Skipped;
            };
            (Cow::Owned(first), Cow::Owned(second))
        }
    };

    check_equivalence(executor, &first, &second)
}

struct RunContext<'a> {
    pairs: &'a ParsedPairs,
    options: &'a VerifyOptions,
    counters: RunCounters,
}

impl<'a> RunContext<'a> {
    fn new(pairs: &'a ParsedPairs, options: &'a VerifyOptions) -> Self {
        Self {
            pairs,
            options,
            counters: RunCounters::new(),
        }
    }

    fn process<E>(&self, executor: &mut E, index: usize, sink: &ReportHandle)
    where
        E: QueryExecutor + ?Sized,
    {
        let (pair, description) = &self.pairs.entries()[index];
        if self.options.ignore.contains(description) {
            self.counters.record_ignored();
            return;
        }

        let outcome = verify_pair(executor, pair, self.options.wrap.as_ref());
        match &outcome {
            Outcome::Skipped => {
                self.counters.record_skipped();
                return;
            }
            Outcome::Equivalent => {}
            Outcome::NotEquivalent => {
                self.counters.record_mismatch();
                sink.append(
                    LogKind::Mismatch,
                    render_block(pair, NOT_EQUIVALENT_LABEL, description),
                );
            }
            Outcome::Error(error) => {
                self.counters.record_error();
                sink.append(
                    LogKind::Error,
                    render_block(pair, &error_label(error), description),
                );
            }
        }

        let processed = self.counters.record_processed();
        if processed % self.options.batch_size.max(1) == 0 {
            println!(
                "check: progress processed={} total={} mismatches={} errors={}",
                processed,
                self.pairs.len(),
                self.counters.mismatches(),
                self.counters.errors()
            );
        }
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            discovered: self.pairs.len(),
            ignored: self.pairs.ignored() + self.counters.ignored(),
            processed: self.counters.processed(),
            skipped: self.counters.skipped(),
            mismatches: self.counters.mismatches(),
            errors: self.counters.errors(),
        }
    }
}

/// Checks every pair in order on the caller's executor.
pub fn verify_sequential<E>(
    pairs: &ParsedPairs,
    executor: &mut E,
    options: &VerifyOptions,
    sink: &ReportHandle,
) -> RunSummary
where
    E: QueryExecutor + ?Sized,
{
    let context = RunContext::new(pairs, options);
    for index in 0..pairs.len() {
        context.process(executor, index, sink);
    }
    context.summary()
}

/// Checks pairs on up to `options.workers` threads, each with its own
/// executor from `factory`. Every executor is opened before the first pair is
/// checked, so a failed open leaves the logs untouched. Pair order across
/// workers is not preserved.
pub fn verify_parallel<F>(
    pairs: &ParsedPairs,
    factory: &F,
    options: &VerifyOptions,
    sink: &ReportHandle,
) -> Result<RunSummary>
where
    F: ExecutorFactory,
{
    let context = RunContext::new(pairs, options);
    let workers = options.workers.clamp(1, pairs.len().max(1));
    let executors = (0..workers)
        .map(|worker| factory.open(worker))
        .collect::<Result<Vec<_>>>()?;
    let cursor = AtomicUsize::new(0);

    let results: Vec<Result<()>> = std::thread::scope(|scope| {
        let joins: Vec<_> = executors
            .into_iter()
            .map(|mut executor| {
                let context = &context;
                let cursor = &cursor;
                let sink = sink.clone();
                scope.spawn(move || {
                    loop {
                        let index = cursor.fetch_add(1, Ordering::SeqCst);
                        if index >= context.pairs.len() {
                            break;
                        }
                        context.process(&mut executor, index, &sink);
                    }
                })
            })
            .collect();

        joins
            .into_iter()
            .map(|join| {
                join.join()
                    .map_err(|_| anyhow!("verification worker panicked"))
            })
            .collect()
    });

    for result in results {
        result?;
    }
    Ok(context.summary())
}
