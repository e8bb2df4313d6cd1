//! Task state-machine behavior: run, retry, timeout, panic, stop, reset,
//! pause, max-runs, hooks and metrics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskling::{
    ExponentialBackoffPolicy, FixedDelayPolicy, JobResult, Priority, Task, TaskError, TaskState,
};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[tokio::test(start_paused = true)]
async fn simple_async_run_completes_once() {
    let runs = counter();
    let job_runs = Arc::clone(&runs);
    let task = Task::builder("A")
        .with_job(move |_ctx| {
            let job_runs = Arc::clone(&job_runs);
            async move {
                job_runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.run_count(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(task.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn sync_run_blocks_until_terminal() {
    let task = Task::builder("sync")
        .with_sync(true)
        .with_job(|_ctx| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        })
        .build();

    task.run().await;
    // No settling sleep: the await itself covered the body.
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.run_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_invokes_handler_once_then_completes() {
    let attempts = counter();
    let handled: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let metrics: Arc<Mutex<Vec<JobResult>>> = Arc::new(Mutex::new(Vec::new()));

    let job_attempts = Arc::clone(&attempts);
    let handler_sink = Arc::clone(&handled);
    let metric_sink = Arc::clone(&metrics);
    let task = Task::builder("boomer")
        .with_job(move |_ctx| {
            let job_attempts = Arc::clone(&job_attempts);
            async move {
                job_attempts.fetch_add(1, Ordering::SeqCst);
                Err(TaskError::fail("boom"))
            }
        })
        .with_retry_policy(Arc::new(FixedDelayPolicy::new(Duration::from_millis(10), 3)))
        .with_error_handler(move |err| {
            handler_sink.lock().unwrap().push(err.to_string());
        })
        .with_metric_collector(move |result| {
            metric_sink.lock().unwrap().push(result);
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // max_retries + 1 attempts, one final error, Completed (no interval, no
    // cancel-on-failure).
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    let handled = handled.lock().unwrap();
    assert_eq!(handled.len(), 1);
    assert!(handled[0].contains("boom"));
    assert_eq!(task.state(), TaskState::Completed);

    let metrics = metrics.lock().unwrap();
    assert_eq!(metrics.len(), 4);
    assert!(metrics.iter().all(|m| !m.success && m.name == "boomer"));
}

#[tokio::test(start_paused = true)]
async fn simple_retry_budget_without_policy() {
    let attempts = counter();
    let job_attempts = Arc::clone(&attempts);
    let task = Task::builder("plain-retry")
        .with_retry(2)
        .with_job(move |_ctx| {
            let job_attempts = Arc::clone(&job_attempts);
            async move {
                job_attempts.fetch_add(1, Ordering::SeqCst);
                Err(TaskError::fail("nope"))
            }
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_error_stops_the_cycle() {
    let attempts = counter();
    let job_attempts = Arc::clone(&attempts);
    let policy =
        FixedDelayPolicy::new(Duration::from_millis(5), 5).with_retryable_labels(["task_timeout"]);
    let task = Task::builder("picky")
        .with_retry_policy(Arc::new(policy))
        .with_job(move |_ctx| {
            let job_attempts = Arc::clone(&job_attempts);
            async move {
                job_attempts.fetch_add(1, Ordering::SeqCst);
                Err(TaskError::fail("not a timeout"))
            }
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn periodic_task_honors_max_runs() {
    let task = Task::builder("ticker")
        .with_job(|_ctx| async { Ok(()) })
        .with_repeat(Duration::from_millis(50))
        .with_max_runs(3)
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(task.run_count(), 3);
    assert_eq!(task.state(), TaskState::Completed);
}

#[tokio::test(start_paused = true)]
async fn timeout_produces_typed_error() {
    let finished = counter();
    let job_finished = Arc::clone(&finished);
    let seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let handler_sink = Arc::clone(&seen);

    let task = Task::builder("slowpoke")
        .with_timeout(Duration::from_millis(100))
        .with_job(move |ctx| {
            let job_finished = Arc::clone(&job_finished);
            async move {
                tokio::select! {
                    _ = ctx.cancelled() => return Err(TaskError::Canceled),
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                }
                job_finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .with_error_handler(move |err| {
            *handler_sink.lock().unwrap() = Some(err.to_string());
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(finished.load(Ordering::SeqCst), 0);
    let seen = seen.lock().unwrap();
    let msg = seen.as_deref().unwrap();
    assert!(msg.contains("timed out after 100ms"), "got: {msg}");
    let last = task.last_error().unwrap();
    assert!(matches!(*last, TaskError::Timeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn timeout_zero_disables_the_deadline() {
    let task = Task::builder("no-deadline")
        .with_timeout(Duration::ZERO)
        .with_job(|_ctx| async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok(())
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(task.state(), TaskState::Completed);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_without_error_handler() {
    let handled = counter();
    let handler_calls = Arc::clone(&handled);
    let task = Task::builder("stoppable")
        .with_job(|ctx| async move {
            ctx.cancelled().await;
            Err(TaskError::Canceled)
        })
        .with_error_handler(move |_| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(handled.load(Ordering::SeqCst), 0);

    // Idempotent against the terminal state.
    task.stop();
    assert_eq!(task.state(), TaskState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_startup_delay() {
    let ran = counter();
    let job_ran = Arc::clone(&ran);
    let task = Task::builder("delayed")
        .with_startup_delay(Duration::from_secs(10))
        .with_job(move |_ctx| {
            let job_ran = Arc::clone(&job_ran);
            async move {
                job_ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn panic_becomes_failed_with_recovery_hook() {
    let recovered: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let hook_sink = Arc::clone(&recovered);
    let task = Task::builder("bomber")
        .with_job(|_ctx| async { panic!("kaboom") })
        .with_recover(move |payload| {
            *hook_sink.lock().unwrap() = Some(payload.to_string());
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(task.state(), TaskState::Failed);
    assert_eq!(recovered.lock().unwrap().as_deref(), Some("kaboom"));
    let last = task.last_error().unwrap();
    assert!(matches!(*last, TaskError::Panic { .. }));
}

#[tokio::test(start_paused = true)]
async fn cancel_on_failure_drives_failed() {
    let task = Task::builder("fragile")
        .with_cancel_on_failure(true)
        .with_job(|_ctx| async { Err(TaskError::fail("fatal-ish")) })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(task.state(), TaskState::Failed);
    assert!(task.last_error().is_some());
}

#[tokio::test(start_paused = true)]
async fn run_while_running_is_a_no_op() {
    let starts = counter();
    let job_starts = Arc::clone(&starts);
    let task = Task::builder("busy")
        .with_job(move |ctx| {
            let job_starts = Arc::clone(&job_starts);
            async move {
                job_starts.fetch_add(1, Ordering::SeqCst);
                ctx.cancelled().await;
                Err(TaskError::Canceled)
            }
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    task.run().await;
    task.run().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(starts.load(Ordering::SeqCst), 1);
    task.stop();
}

#[tokio::test(start_paused = true)]
async fn reset_restores_fresh_observable_state() {
    let task = Task::builder("phoenix")
        .with_job(|_ctx| async { Err(TaskError::fail("first life")) })
        .with_cancel_on_failure(true)
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(task.state(), TaskState::Failed);
    assert!(task.last_error().is_some());

    task.reset();
    assert_eq!(task.state(), TaskState::Idle);
    assert_eq!(task.run_count(), 0);
    assert!(task.last_error().is_none());
    assert!(task.last_run_time().is_none());

    // The replaced token lets the task run again.
    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(task.state(), TaskState::Failed);
}

#[tokio::test(start_paused = true)]
async fn pause_gates_iterations_and_resume_releases() {
    let task = Task::builder("metronome")
        .with_job(|_ctx| async { Ok(()) })
        .with_repeat(Duration::from_millis(50))
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(task.pause());
    assert_eq!(task.state(), TaskState::Paused);

    // Give any armed interval a chance to land; the gate then holds.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let frozen = task.run_count();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(task.run_count(), frozen);

    assert!(task.resume());
    assert_eq!(task.state(), TaskState::Running);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(task.run_count() > frozen);

    task.stop();
}

#[tokio::test(start_paused = true)]
async fn hooks_wrap_each_iteration() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let pre = Arc::clone(&order);
    let post = Arc::clone(&order);
    let job = Arc::clone(&order);

    let task = Task::builder("hooked")
        .with_pre_hook(move || pre.lock().unwrap().push("pre"))
        .with_post_hook(move || post.lock().unwrap().push("post"))
        .with_job(move |_ctx| {
            let job = Arc::clone(&job);
            async move {
                job.lock().unwrap().push("job");
                Ok(())
            }
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*order.lock().unwrap(), vec!["pre", "job", "post"]);
}

#[tokio::test(start_paused = true)]
async fn backoff_policy_delays_grow() {
    let attempts = counter();
    let job_attempts = Arc::clone(&attempts);
    let policy = ExponentialBackoffPolicy::new(
        Duration::from_millis(10),
        Duration::from_millis(100),
        2.0,
        2,
    )
    .with_jitter(false);

    let task = Task::builder("backoff")
        .with_retry_policy(Arc::new(policy))
        .with_job(move |_ctx| {
            let job_attempts = Arc::clone(&job_attempts);
            async move {
                job_attempts.fetch_add(1, Ordering::SeqCst);
                Err(TaskError::fail("still broken"))
            }
        })
        .build();

    task.run().await;
    // 10ms + 20ms of backoff inside the cycle.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(task.state(), TaskState::Completed);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_retry_delay_skips_further_attempts() {
    let attempts = counter();
    let job_attempts = Arc::clone(&attempts);
    let task = Task::builder("interrupted")
        .with_retry_policy(Arc::new(FixedDelayPolicy::new(Duration::from_secs(5), 3)))
        .with_job(move |_ctx| {
            let job_attempts = Arc::clone(&job_attempts);
            async move {
                job_attempts.fetch_add(1, Ordering::SeqCst);
                Err(TaskError::fail("flaky"))
            }
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    task.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn job_reaches_its_own_task_through_the_context() {
    let seen_name: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen_name);
    let task = Task::builder("introspective")
        .with_priority(Priority::High)
        .with_job(move |ctx| {
            let sink = Arc::clone(&sink);
            async move {
                *sink.lock().unwrap() = Some(ctx.task().name().to_string());
                ctx.context().set("left-behind", 1_i64);
                Ok(())
            }
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(seen_name.lock().unwrap().as_deref(), Some("introspective"));
    assert_eq!(task.context().get_i64("left-behind"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn required_context_keys_fail_before_the_job_runs() {
    let ran = counter();
    let job_ran = Arc::clone(&ran);
    let task = Task::builder("strict")
        .with_required_context_keys(["must-have"])
        .with_job(move |_ctx| {
            let job_ran = Arc::clone(&job_ran);
            async move {
                job_ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(task.state(), TaskState::Failed);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    let last = task.last_error().unwrap();
    assert!(last.to_string().contains("must-have"));
}

#[tokio::test(start_paused = true)]
async fn state_transitions_are_contiguous() {
    let transitions: Arc<Mutex<Vec<(TaskState, TaskState)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&transitions);
    let task = Task::builder("observed")
        .with_state_listener(move |old, new| {
            sink.lock().unwrap().push((old, new));
        })
        .with_job(|_ctx| async { Ok(()) })
        .build();

    task.run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let transitions = transitions.lock().unwrap();
    assert!(!transitions.is_empty());
    assert_eq!(transitions[0].0, TaskState::Idle);
    for pair in transitions.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "non-contiguous: {transitions:?}");
    }
    assert_eq!(transitions.last().unwrap().1, TaskState::Completed);
}
