use std::path::PathBuf;

use jmn_core::{EmploymentType, JobStatus, SalaryKind};
use jmn_events::{load_event_fixture, normalize, EventKind, NormalizeError};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/events")
        .join(name)
}

#[test]
fn wrapped_created_fixture_normalizes() {
    let raw = load_event_fixture(fixture("job_created_singapore.json")).expect("fixture");
    assert_eq!(raw.kind(), EventKind::PostingCreated);
    let posting = normalize(&raw).expect("posting");
    assert_eq!(posting.id, "job-sg-backend-001");
    assert_eq!(posting.location.as_deref(), Some("Singapore"));
    assert!(posting.is_open());
}

#[test]
fn flat_legacy_fixture_normalizes() {
    let raw = load_event_fixture(fixture("job_updated_flat_legacy.json")).expect("fixture");
    assert_eq!(raw.kind(), EventKind::PostingUpdated);
    let posting = normalize(&raw).expect("posting");
    assert_eq!(posting.title, "Data Engineer");
    assert_eq!(
        posting.employment_types,
        vec![EmploymentType::FullTime, EmploymentType::Contract]
    );
    assert_eq!(posting.salary.kinds, vec![SalaryKind::Negotiable]);
    assert_eq!(posting.status, JobStatus::Open);
}

#[test]
fn deleted_fixture_is_unsupported() {
    let raw = load_event_fixture(fixture("job_deleted.json")).expect("fixture");
    assert_eq!(raw.kind(), EventKind::Unsupported);
}

#[test]
fn malformed_fixture_fails_closed() {
    let raw = load_event_fixture(fixture("malformed_missing_title.json")).expect("fixture");
    assert!(matches!(
        normalize(&raw),
        Err(NormalizeError::MalformedEvent { field: "title" })
    ));
}
