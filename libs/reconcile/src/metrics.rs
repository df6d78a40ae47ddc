//! Remote call metrics.
//!
//! Every call to the orchestration API increments one counter labelled with
//! the operation (`{kind}-{verb}`) and its outcome. A not-found answer to a
//! get is its own outcome so that the create path is not counted as a failure.

use metrics::{counter, describe_counter};

use crate::error::ApplyError;
use crate::object::ResourceKind;

/// Remote orchestration API call counter.
pub const KUBE_CALLS: &str = "bidplane_kube_calls_total";

/// Registers reconciler metric descriptions.
///
/// Call this once at application startup after installing a metrics recorder.
pub fn register_metrics() {
    describe_counter!(KUBE_CALLS, "Calls made against the orchestration API");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Update,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    NotFound,
    Fail,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not-found",
            Self::Fail => "fail",
        }
    }

    /// Outcome of a get, where not-found is expected.
    pub fn of_get<T>(res: &Result<T, ApplyError>) -> Self {
        match res {
            Ok(_) => Self::Success,
            Err(e) if e.is_not_found() => Self::NotFound,
            Err(_) => Self::Fail,
        }
    }

    /// Outcome of a write.
    pub fn of_write<T>(res: &Result<T, ApplyError>) -> Self {
        match res {
            Ok(_) => Self::Success,
            Err(_) => Self::Fail,
        }
    }
}

/// Records one remote call.
pub fn record_call(kind: ResourceKind, verb: Verb, outcome: Outcome) {
    counter!(
        KUBE_CALLS,
        "operation" => format!("{}-{}", kind.metric_prefix(), verb.as_str()),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use metrics::{
        Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };

    use rstest::rstest;
    use tokio::sync::watch;

    use super::*;
    use crate::apply::{apply, Builder};
    use crate::context::ApplyContext;
    use crate::error::{ApiError, BuilderError};
    use crate::memory::MemoryStore;
    use crate::object::{Namespace, ObjectMeta};

    /// Counts increments per `operation/outcome` pair.
    #[derive(Default, Clone)]
    struct CallRecorder {
        counters: Arc<Mutex<BTreeMap<String, Arc<AtomicU64>>>>,
    }

    struct Cell(Arc<AtomicU64>);

    impl CounterFn for Cell {
        fn increment(&self, value: u64) {
            self.0.fetch_add(value, Ordering::SeqCst);
        }

        fn absolute(&self, value: u64) {
            self.0.store(value, Ordering::SeqCst);
        }
    }

    impl CallRecorder {
        fn get(&self, operation: &str, outcome: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .get(&format!("{operation}/{outcome}"))
                .map_or(0, |c| c.load(Ordering::SeqCst))
        }
    }

    impl Recorder for CallRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            assert_eq!(key.name(), KUBE_CALLS);
            let label = |name: &str| {
                key.labels()
                    .find(|l| l.key() == name)
                    .map(|l| l.value().to_string())
                    .unwrap_or_default()
            };
            let id = format!("{}/{}", label("operation"), label("outcome"));
            let cell = self
                .counters
                .lock()
                .unwrap()
                .entry(id)
                .or_default()
                .clone();
            Counter::from_arc(Arc::new(Cell(cell)))
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    impl CallRecorder {
        fn total(&self) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .values()
                .map(|c| c.load(Ordering::SeqCst))
                .sum()
        }
    }

    struct Ns;

    impl Builder for Ns {
        type Object = Namespace;

        fn name(&self) -> &str {
            "lease-123"
        }

        fn ns(&self) -> &str {
            "lease-123"
        }

        fn create(&self) -> Result<Namespace, BuilderError> {
            Ok(Namespace {
                meta: ObjectMeta::new("", "lease-123"),
            })
        }

        fn update(&self, current: Namespace) -> Result<Namespace, BuilderError> {
            Ok(current)
        }
    }

    #[test]
    fn test_not_found_is_not_a_failure() {
        let recorder = CallRecorder::default();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            rt.block_on(async {
                let store = MemoryStore::<Namespace>::new();
                let ctx = ApplyContext::background();
                apply(&ctx, &store, &Ns).await.unwrap();
                apply(&ctx, &store, &Ns).await.unwrap();

                store
                    .fail_next(Verb::Get, None, ApiError::Transport("reset".into()))
                    .await;
                assert!(apply(&ctx, &store, &Ns).await.is_err());
            })
        });

        assert_eq!(recorder.get("namespaces-get", "not-found"), 1);
        assert_eq!(recorder.get("namespaces-get", "success"), 1);
        assert_eq!(recorder.get("namespaces-get", "fail"), 1);
        assert_eq!(recorder.get("namespaces-create", "success"), 1);
        assert_eq!(recorder.get("namespaces-update", "success"), 1);
    }

    #[rstest]
    #[case::cancelled(true)]
    #[case::deadline_passed(false)]
    fn test_skipped_calls_not_recorded(#[case] cancel: bool) {
        let recorder = CallRecorder::default();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let err = metrics::with_local_recorder(&recorder, || {
            rt.block_on(async {
                let store = MemoryStore::<Namespace>::new();
                let (tx, rx) = watch::channel(false);
                let mut ctx = ApplyContext::new(rx);
                if cancel {
                    tx.send_replace(true);
                } else {
                    ctx = ctx.with_deadline(tokio::time::Instant::now());
                }
                let err = apply(&ctx, &store, &Ns).await.unwrap_err();
                assert_eq!(store.calls().await.len(), 0);
                err
            })
        });

        if cancel {
            assert!(matches!(err, ApplyError::Cancelled), "{err}");
        } else {
            assert!(matches!(err, ApplyError::DeadlineExceeded), "{err}");
        }
        assert_eq!(recorder.total(), 0);
    }
}
