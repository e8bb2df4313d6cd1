//! Worker pool behavior: lifecycle idempotence, priority dispatch, task-info
//! tracking, stats, callbacks and shutdown cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskling::{Priority, Task, TaskError, TaskState, TaskStatus, WorkerPool};

fn recording_task(name: &str, priority: Priority, log: &Arc<Mutex<Vec<String>>>) -> Task {
    let log = Arc::clone(log);
    let task_name = name.to_string();
    Task::builder(name)
        .with_priority(priority)
        .with_job(move |_ctx| {
            let log = Arc::clone(&log);
            let task_name = task_name.clone();
            async move {
                log.lock().unwrap().push(task_name);
                Ok(())
            }
        })
        .build()
}

#[tokio::test(start_paused = true)]
async fn zero_size_coerces_to_one_worker() {
    let pool = WorkerPool::new(0, None);
    assert_eq!(pool.size(), 1);
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_are_idempotent() {
    let pool = WorkerPool::new(3, None);
    assert!(!pool.is_running());

    pool.start();
    assert!(pool.is_running());
    pool.start();
    assert!(pool.is_running());

    pool.stop().await;
    assert!(!pool.is_running());
    pool.stop().await;
    assert!(!pool.is_running());
}

#[tokio::test(start_paused = true)]
async fn submit_to_stopped_pool_never_executes() {
    let pool = WorkerPool::new(1, None);
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let task = recording_task("orphan", Priority::Normal, &log);
    pool.submit(task.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(log.lock().unwrap().is_empty());
    assert_eq!(task.state(), TaskState::Idle);
    assert!(pool.task_info("orphan").is_none());
}

#[tokio::test(start_paused = true)]
async fn executes_submitted_task() {
    let pool = WorkerPool::new(1, None);
    pool.start();

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let task = recording_task("worker-food", Priority::Normal, &log);
    pool.submit(task.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(*log.lock().unwrap(), vec!["worker-food".to_string()]);
    assert_eq!(task.state(), TaskState::Completed);

    let info = pool.task_info("worker-food").unwrap();
    assert_eq!(info.status, TaskStatus::Completed);
    assert_eq!(info.worker_id, Some(0));
    assert!(info.started_at.is_some());
    assert!(info.finished_at.is_some());

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn high_priority_dequeues_first() {
    let pool = WorkerPool::new(1, None);
    pool.start();

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    // No awaits between submits: all three sit in the queue before the
    // scheduler gets a chance to dequeue.
    pool.submit(recording_task("low-1", Priority::Low, &log));
    pool.submit(recording_task("low-2", Priority::Low, &log));
    pool.submit(recording_task("high", Priority::High, &log));

    tokio::time::sleep(Duration::from_millis(500)).await;

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0], "high");
    assert!(log[1].starts_with("low"));
    assert!(log[2].starts_with("low"));

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stats_track_completed_and_failed() {
    let pool = WorkerPool::new(2, None);
    pool.start();

    let ok = Task::builder("ok")
        .with_job(|_ctx| async { Ok(()) })
        .build();
    let bad = Task::builder("bad")
        .with_cancel_on_failure(true)
        .with_job(|_ctx| async { Err(TaskError::fail("broken")) })
        .build();

    pool.submit(ok);
    pool.submit(bad);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = pool.stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);

    let info = pool.task_info("bad").unwrap();
    assert_eq!(info.status, TaskStatus::Failed);
    assert!(info.error.is_some());

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn callbacks_fire_around_execution() {
    let started: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let finished: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));

    let start_sink = Arc::clone(&started);
    let finish_sink = Arc::clone(&finished);
    let pool = WorkerPool::new(1, None)
        .with_task_start_callback(move |task| {
            start_sink.lock().unwrap().push(task.name().to_string());
        })
        .with_task_finish_callback(move |task, err| {
            finish_sink
                .lock()
                .unwrap()
                .push((task.name().to_string(), err.is_some()));
        });
    pool.start();

    pool.submit(
        Task::builder("fine")
            .with_job(|_ctx| async { Ok(()) })
            .build(),
    );
    pool.submit(
        Task::builder("doomed")
            .with_cancel_on_failure(true)
            .with_job(|_ctx| async { Err(TaskError::fail("nope")) })
            .build(),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(started.lock().unwrap().len(), 2);
    let finished = finished.lock().unwrap();
    assert!(finished.contains(&("fine".to_string(), false)));
    assert!(finished.contains(&("doomed".to_string(), true)));

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn pool_stop_cancels_in_flight_tasks() {
    let pool = WorkerPool::new(1, None);
    pool.start();

    let task = Task::builder("long-haul")
        .with_job(|ctx| async move {
            ctx.cancelled().await;
            Err(TaskError::Canceled)
        })
        .build();
    pool.submit(task.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(task.state(), TaskState::Running);

    pool.stop().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(task.state(), TaskState::Cancelled);
    let info = pool.task_info("long-haul").unwrap();
    assert_eq!(info.status, TaskStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn bounded_concurrency_all_tasks_complete() {
    let pool = WorkerPool::new(3, None);
    pool.start();

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for i in 0..10 {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        let done = Arc::clone(&done);
        pool.submit(
            Task::builder(format!("load-{i}"))
                .with_job(move |_ctx| {
                    let active = Arc::clone(&active);
                    let peak = Arc::clone(&peak);
                    let done = Arc::clone(&done);
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .build(),
        );
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(done.load(Ordering::SeqCst), 10);
    assert_eq!(pool.stats().completed, 10);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn name_collisions_keep_separate_bookkeeping() {
    let pool = WorkerPool::new(2, None);
    pool.start();

    let a = Task::builder("twin")
        .with_job(|_ctx| async { Ok(()) })
        .build();
    let b = Task::builder("twin")
        .with_job(|_ctx| async { Ok(()) })
        .build();
    pool.submit(a.clone());
    pool.submit(b.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;

    let twins: Vec<_> = pool
        .all_tasks_info()
        .into_iter()
        .filter(|info| info.task.name() == "twin")
        .collect();
    assert_eq!(twins.len(), 2);
    assert!(twins.iter().all(|info| info.status == TaskStatus::Completed));
    assert!(pool.task_info_by_id(a.id()).is_some());
    assert!(pool.task_info_by_id(b.id()).is_some());

    pool.stop().await;
}
