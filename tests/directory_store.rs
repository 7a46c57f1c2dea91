// File: tests/directory_store.rs
use chrono::{Duration, TimeZone, Utc};
use lessoncal::context::{AppContext, TestContext};
use lessoncal::directory::{LessonDirectory, LocalDirectory};
use lessoncal::model::{Occurrence, Settlement};
use lessoncal::reconcile::reconcile;
use std::sync::Arc;
use std::thread;

fn lesson_occ(id: &str, summary: &str) -> Occurrence {
    let start = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
    Occurrence {
        id: id.to_string(),
        summary: summary.to_string(),
        start,
        end: start + Duration::hours(1),
    }
}

#[test]
fn test_concurrent_settles_charge_once() {
    let ctx = Arc::new(TestContext::new());
    let dir = LocalDirectory::open(ctx.as_ref()).unwrap();
    reconcile(&dir, &lesson_occ("l#20250106", "Alice")).unwrap();
    dir.set_paid_lessons("Alice", 5).unwrap();

    let mut handles = vec![];
    for _ in 0..8 {
        let ctx = ctx.clone();
        handles.push(thread::spawn(move || {
            let dir = LocalDirectory::open(ctx.as_ref()).unwrap();
            dir.settle_lesson("l#20250106").unwrap()
        }));
    }
    let outcomes: Vec<Settlement> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let deducted = outcomes
        .iter()
        .filter(|s| matches!(s, Settlement::Deducted { .. }))
        .count();
    assert_eq!(deducted, 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|s| **s == Settlement::AlreadyPaid)
            .count(),
        7
    );
    assert_eq!(dir.list_students().unwrap()[0].paid_lessons, 4);
}

#[test]
fn test_admin_can_reopen_a_settled_lesson() {
    let ctx = TestContext::new();
    let dir = LocalDirectory::open(&ctx).unwrap();
    reconcile(&dir, &lesson_occ("l#20250106", "Alice")).unwrap();
    dir.set_paid_lessons("Alice", 2).unwrap();

    dir.settle_lesson("l#20250106").unwrap();
    dir.set_lesson_paid("l#20250106", false).unwrap();
    let again = dir.settle_lesson("l#20250106").unwrap();

    assert_eq!(
        again,
        Settlement::Deducted {
            student: "Alice".to_string(),
            remaining: 0
        }
    );
}

#[test]
fn test_directory_file_from_newer_build_is_refused() {
    let ctx = TestContext::new();
    let path = ctx.get_directory_path().unwrap();
    std::fs::write(&path, r#"{"version": 99, "data": {}}"#).unwrap();
    assert!(LocalDirectory::open(&ctx).is_err());
}

#[test]
fn test_reconcile_same_name_same_student() {
    let dir = LocalDirectory::in_memory();
    let (a, _) = reconcile(&dir, &lesson_occ("x#20250106", "Alice")).unwrap();
    let (b, _) = reconcile(&dir, &lesson_occ("y#20250106", "Alice")).unwrap();
    assert_eq!(a.student_id, b.student_id);
    assert_ne!(a.id, b.id);
}
