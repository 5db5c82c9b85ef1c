//! Shared fixtures for engine tests.

use chrono::NaiveDate;
use opspulse_store::{DirectoryUser, OpsDb, Period, SubtaskTemplate, TaskTemplate};

/// Open a throwaway database under the system temp dir.
pub fn temp_db(tag: &str) -> (OpsDb, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("opspulse-eng-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).ok();
    let path = dir.join("test.db");
    std::fs::remove_file(&path).ok();
    (OpsDb::open(&path).unwrap(), path)
}

/// Seed one template with `subtasks` steps at 06:00, owned by Alice with
/// Bob reporting and Carol escalating, plus matching directory users.
pub fn seed_defs(db: &OpsDb, task_id: &str, period: Period, subtasks: usize) {
    db.upsert_template(&TaskTemplate {
        id: task_id.into(),
        name: format!("Task {task_id}"),
        period,
        effective_from: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        active: true,
        owner: "Alice Tran".into(),
        report_managers: vec!["Bob Le".into()],
        escalation_managers: vec!["Carol Vu".into()],
        status: "active".into(),
    })
    .unwrap();
    for i in 0..subtasks {
        db.upsert_subtask(&SubtaskTemplate {
            id: format!("{task_id}-s{i}"),
            task_id: task_id.into(),
            name: format!("Step {i}"),
            position: i as i64,
            scheduled_time: "06:00".into(),
            sla_hours: 1,
            sla_minutes: 0,
        })
        .unwrap();
    }
    for (id, name, email) in [
        ("u-alice", "Alice Tran", "alice.tran@example.com"),
        ("u-bob", "Bob Le", "bob.le@example.com"),
        ("u-carol", "Carol Vu", "carol.vu@example.com"),
    ] {
        db.upsert_user(&DirectoryUser {
            id: id.into(),
            full_name: name.into(),
            email: email.into(),
        })
        .unwrap();
    }
}

/// The fixed business timezone tests run in.
pub fn tz() -> chrono_tz::Tz {
    "Asia/Ho_Chi_Minh".parse().unwrap()
}
