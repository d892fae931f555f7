use std::{
    collections::BTreeSet,
    ffi::OsStr,
    num::NonZeroUsize,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use pretty_assertions::assert_eq;
use testloom::{
    ExecError, IsolatedState, RunLoopError, Session, ShadowEnviron, ThreadedRunner, WorkerCount,
    run_test_loop,
};

fn items(len: usize) -> Vec<String> {
    (0..len)
        .map(|case| format!("tests/suite.rs::case_{case}"))
        .collect()
}

fn fixed(workers: usize) -> WorkerCount {
    WorkerCount::Fixed(NonZeroUsize::new(workers).expect("worker count is positive"))
}

#[test]
fn every_item_runs_exactly_once_for_any_worker_count() {
    // 16 workers over 13 items leaves some workers with nothing but their
    // stop signal.
    for workers in [1, 2, 4, 8, 16] {
        let session = Arc::new(Session::new(items(13)));
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = {
            let log = Arc::clone(&log);
            move |item: &String, _: Option<&String>| {
                log.lock().unwrap().push(item.clone());
                Ok(())
            }
        };

        run_test_loop(Arc::clone(&session), executor, fixed(workers))
            .unwrap_or_else(|error| panic!("clean run with {workers} workers failed: {error}"));

        let executed = log.lock().unwrap().clone();
        assert_eq!(executed.len(), 13, "with {workers} workers");
        let unique: BTreeSet<_> = executed.iter().collect();
        assert_eq!(unique.len(), 13, "duplicate executions with {workers} workers");
    }
}

#[test]
fn failures_surface_as_one_aggregate() {
    let session = Arc::new(Session::new(items(10)));
    let ran = Arc::new(AtomicUsize::new(0));
    let executor = {
        let ran = Arc::clone(&ran);
        move |item: &String, _: Option<&String>| {
            ran.fetch_add(1, Ordering::SeqCst);
            match item.ends_with("case_3") || item.ends_with("case_7") {
                true => Err(ExecError::failed(format!("{item} hit an assertion"))),
                false => Ok(()),
            }
        }
    };

    let error = run_test_loop(session, executor, fixed(3)).expect_err("two items fail");

    let RunLoopError::Aggregate { records } = error else {
        panic!("expected an aggregate run failure");
    };
    assert_eq!(records.len(), 2);
    assert_eq!(ran.load(Ordering::SeqCst), 10, "the other items still run");
    let mut failed: Vec<_> = records
        .iter()
        .map(|record| record.failure.to_string())
        .collect();
    failed.sort();
    assert_eq!(
        failed,
        vec![
            "tests/suite.rs::case_3 hit an assertion",
            "tests/suite.rs::case_7 hit an assertion",
        ]
    );
}

#[test]
fn the_aggregate_message_names_the_failing_workers() {
    let session = Arc::new(Session::new(items(5)));
    let executor = |item: &String, _: Option<&String>| -> Result<(), ExecError> {
        Err(ExecError::failed(format!("{item} broke")))
    };

    let error = run_test_loop(session, executor, fixed(2)).expect_err("every item fails");
    let message = error.to_string();

    let mut lines = message.lines();
    assert_eq!(lines.next(), Some("errors occurred:"));
    let rest: Vec<_> = lines.collect();
    assert_eq!(rest.len(), 5);
    for line in &rest {
        assert!(
            line.starts_with("testloom-worker-0: ") || line.starts_with("testloom-worker-1: "),
            "line {line:?} does not name a worker"
        );
    }
}

#[test]
fn a_single_collection_error_reads_singular() {
    let session = Arc::new(Session::new(items(2)).with_collection_failures(1));
    let executor = |_: &String, _: Option<&String>| Ok(());

    let error = run_test_loop(session, executor, fixed(2)).expect_err("collection failed");

    assert_eq!(error.to_string(), "1 error during collection");
}

#[test]
fn a_stop_requested_before_the_run_interrupts_every_item() {
    let session = Arc::new(Session::new(items(4)));
    session.request_stop("user abort");
    let ran = Arc::new(AtomicUsize::new(0));
    let executor = {
        let ran = Arc::clone(&ran);
        move |_: &String, _: Option<&String>| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    };

    let error =
        run_test_loop(Arc::clone(&session), executor, fixed(2)).expect_err("the run was stopped");

    // Items already queued are not cancelled; each one runs and then
    // reports the interruption.
    assert_eq!(ran.load(Ordering::SeqCst), 4);
    let RunLoopError::Aggregate { records } = error else {
        panic!("expected an aggregate run failure");
    };
    assert_eq!(records.len(), 4);
    for record in &records {
        assert_eq!(record.failure.to_string(), "interrupted: user abort");
    }
}

#[test]
fn the_current_test_marker_stays_on_its_thread() {
    let session: Arc<Session<String>> = Arc::new(Session::new(items(16)));
    let executor = {
        let session = Arc::clone(&session);
        move |item: &String, _: Option<&String>| {
            let environ = session.environ();
            environ.set(environ.shadowed_key(), item);
            let marker = environ.get(environ.shadowed_key());
            match marker.as_deref() == Some(OsStr::new(item)) {
                true => Ok(()),
                false => Err(ExecError::failed(format!(
                    "marker bled across threads: {marker:?} while running {item}"
                ))),
            }
        }
    };

    run_test_loop(session, executor, fixed(4)).expect("markers never cross threads");
}

#[test]
fn setup_scopes_and_fixtures_stay_per_thread() {
    let workers = 2;
    let session: Arc<Session<String>> = Arc::new(Session::new(items(12)));
    let builds = Arc::new(AtomicUsize::new(0));
    let executor = {
        let session = Arc::clone(&session);
        let builds = Arc::clone(&builds);
        move |item: &String, _: Option<&String>| {
            let setup = session.setup_state();
            setup.enter(item);
            setup.add_finalizer(Box::new(|| {}));

            let builds = Arc::clone(&builds);
            session.fixtures().get_or_create("shared-conn", &move || {
                builds.fetch_add(1, Ordering::SeqCst);
                Arc::new(())
            });

            setup.teardown();
            match setup.depth() {
                0 => Ok(()),
                depth => Err(ExecError::failed(format!(
                    "scope stack leaked across threads: depth {depth} after {item}"
                ))),
            }
        }
    };

    run_test_loop(session, executor, fixed(workers)).expect("state stays per thread");

    let built = builds.load(Ordering::SeqCst);
    assert!(
        (1..=workers).contains(&built),
        "each thread builds the fixture at most once, got {built}"
    );
}

#[test]
fn the_run_installs_the_configured_environ() {
    let session: Arc<Session<String>> = Arc::new(Session::new(items(3)));
    let probe = {
        let session = Arc::clone(&session);
        move |_: &String, _: Option<&String>| {
            match session.environ().shadowed_key() == OsStr::new("SUITE_MARKER") {
                true => Ok(()),
                false => Err(ExecError::failed("wrong environ installed")),
            }
        }
    };

    ThreadedRunner::new(probe)
        .with_workers(fixed(2))
        .with_state(IsolatedState::new().with_environ(ShadowEnviron::with_vars("SUITE_MARKER", [])))
        .run(Arc::clone(&session))
        .expect("the configured state reaches the workers");

    assert_eq!(session.environ().shadowed_key(), "SUITE_MARKER");
}
