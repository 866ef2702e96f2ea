// Gateway file to expose integration tests from the integration/ subdirectory
// This file allows Rust's test runner to discover tests in subdirectories

mod common;

#[path = "integration/test_sync_scenarios.rs"]
mod test_sync_scenarios;

#[path = "integration/test_partial_write.rs"]
mod test_partial_write;

#[path = "integration/test_concurrent_sync.rs"]
mod test_concurrent_sync;

#[path = "integration/test_recall.rs"]
mod test_recall;

#[path = "integration/test_search_end_to_end.rs"]
mod test_search_end_to_end;

#[path = "integration/test_filesystem_stack.rs"]
mod test_filesystem_stack;
