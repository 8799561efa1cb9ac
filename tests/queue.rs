mod common;

use std::time::Duration;

use common::Harness;

use codelore::projects;
use codelore::queue::IngestQueue;

#[tokio::test]
async fn jobs_run_one_at_a_time_in_submission_order() {
    let h = Harness::new(false).await;
    h.write("src/app.py", "def main():\n    return run()\n");

    let other_root = h.dir.path().join("other");
    std::fs::create_dir_all(&other_root).unwrap();
    std::fs::write(other_root.join("notes.txt"), "Deployments happen every Tuesday afternoon.\n").unwrap();
    let other = projects::create_project(&h.app.pool, "other", other_root.to_str().unwrap())
        .await
        .unwrap();

    let gate = h.vcs.hold(&h.root);
    let (queue, worker) = IngestQueue::spawn(h.app.clone(), 4);
    let first = queue
        .submit(h.project_id, h.root.to_str().unwrap())
        .await
        .unwrap();
    let second = queue
        .submit(other.id, other_root.to_str().unwrap())
        .await
        .unwrap();

    // The second job must not start while the first is still running.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.vcs.resolved(), vec![h.root.clone()]);
    assert!(h.gateway.prompts().is_empty());

    gate.notify_one();
    let mut first_logs = first.logs;
    let mut lines = Vec::new();
    while let Some(line) = first_logs.recv().await {
        lines.push(line);
    }
    assert_eq!(lines.last().map(String::as_str), Some("done"));

    let first_report = first.done.await.unwrap().unwrap();
    let second_report = second.wait().await.unwrap();
    assert_eq!(first_report.files.indexed, 1);
    assert_eq!(second_report.files.indexed, 1);
    assert_eq!(h.vcs.resolved(), vec![h.root.clone(), other_root.clone()]);

    let prompts = h.gateway.prompts();
    let first_last = prompts.iter().rposition(|p| p.contains("File: src/app.py")).unwrap();
    let second_first = prompts.iter().position(|p| p.contains("File: notes.txt")).unwrap();
    assert!(first_last < second_first, "prompts interleaved: {:?}", prompts);

    drop(queue);
    worker.await.unwrap();
}

#[tokio::test]
async fn abandoned_handle_does_not_cancel_the_job() {
    let h = Harness::new(false).await;
    h.write("src/app.py", "def main():\n    return run()\n");

    let (queue, worker) = IngestQueue::spawn(h.app.clone(), 1);
    let handle = queue
        .submit(h.project_id, h.root.to_str().unwrap())
        .await
        .unwrap();
    drop(handle);

    drop(queue);
    worker.await.unwrap();
    assert_eq!(h.file_paths().await, vec!["src/app.py"]);
}

#[tokio::test]
async fn failed_job_reports_error_and_worker_continues() {
    let h = Harness::new(false).await;
    h.write("src/app.py", "def main():\n    return run()\n");

    let (queue, worker) = IngestQueue::spawn(h.app.clone(), 2);
    let missing = queue.submit(9_999, "/nowhere").await.unwrap();
    let real = queue
        .submit(h.project_id, h.root.to_str().unwrap())
        .await
        .unwrap();

    assert!(missing.wait().await.is_err());
    assert_eq!(real.wait().await.unwrap().files.indexed, 1);

    drop(queue);
    worker.await.unwrap();
}
