use aafs_store::conformance::run_conformance_suite;
use aafs_store::MemoryStore;

#[tokio::test]
async fn memory_store_passes_conformance_suite() {
    let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
    assert_eq!(report.failed, 0, "{report}");
    assert!(report.total >= 20, "suite ran only {} tests", report.total);
}
