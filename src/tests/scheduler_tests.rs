use super::*;
use chrono::Duration as ChronoDuration;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

fn scheduler() -> Scheduler {
    Scheduler::new(Arc::new(RecoveryManager::new(Duration::from_secs(60), 5)))
}

async fn wait_for(scheduler: &Scheduler, id: u64, status: TaskStatus) {
    for _ in 0..300 {
        if scheduler.status(id) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {} never reached {:?}", id, status);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_past_deadline_runs_immediately() {
    let scheduler = scheduler();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);

    let due = TimestampUtc(TimestampUtc::now().0 - ChronoDuration::seconds(5));
    let id = scheduler.schedule_at("overdue", due, async move {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });

    wait_for(&scheduler, id, TaskStatus::Completed).await;
    assert!(ran.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_future_task_waits_then_runs() {
    let scheduler = scheduler();
    let due = TimestampUtc(TimestampUtc::now().0 + ChronoDuration::milliseconds(50));
    let id = scheduler.schedule_at("soon", due, async { Ok(()) });

    assert_eq!(scheduler.status(id), Some(TaskStatus::Scheduled));
    wait_for(&scheduler, id, TaskStatus::Completed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_all_stops_waiting_tasks() {
    let scheduler = scheduler();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);

    let due = TimestampUtc(TimestampUtc::now().0 + ChronoDuration::seconds(3600));
    let id = scheduler.schedule_at("next-year", due, async move {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });

    scheduler.cancel_all();
    wait_for(&scheduler, id, TaskStatus::Cancelled).await;
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_task_marked_failed() {
    let scheduler = scheduler();
    let due = TimestampUtc::now();
    let id = scheduler.schedule_at("doomed", due, async { anyhow::bail!("nope") });
    wait_for(&scheduler, id, TaskStatus::Failed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_task_listing_keeps_insertion_order() {
    let scheduler = scheduler();
    let due = TimestampUtc(TimestampUtc::now().0 + ChronoDuration::seconds(3600));
    scheduler.schedule_at("first", due, async { Ok(()) });
    scheduler.schedule_at("second", due, async { Ok(()) });

    let names: Vec<String> = scheduler.tasks().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["first", "second"]);
    scheduler.cancel_all();
}
