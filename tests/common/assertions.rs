//! Custom assertion macros
//!
//! Short forms for the checks the offline tests repeat, with messages that
//! show the offending value.

/// Assert that a result is ok and return the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is an error, optionally of a given variant
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        assert!($result.is_err(), "Expected Err, got Ok");
    };
    ($result:expr, $pattern:pat) => {
        match $result {
            Err($pattern) => {}
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => panic!("Expected different error variant, got: {:?}", e),
        }
    };
}

/// Assert that a string contains a substring
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        assert!(
            $haystack.contains($needle),
            "Expected '{}' to contain '{}'",
            $haystack,
            $needle
        );
    };
}

/// Assert the number of pending operations in a queue
#[macro_export]
macro_rules! assert_queue_len {
    ($queue:expr, $expected:expr) => {
        let pending = $queue.pending().await.expect("queue readable");
        assert_eq!(
            pending.len(),
            $expected,
            "Unexpected queue contents: {:?}",
            pending
                .iter()
                .map(|op| format!("{:?} {} {}", op.kind, op.entity, op.target_id))
                .collect::<Vec<_>>()
        );
    };
}
