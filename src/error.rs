/// A centralized error type for all dispatcher operations.
///
/// Errors are reported synchronously to the calling thread at the point of
/// misuse and are never recovered internally. Panics raised by task payloads
/// are not represented here; they unwind through the worker thread that ran
/// the payload.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatcher method invoked before initialization")]
    Uninitialized,

    #[error("task-context method invoked from outside task execution")]
    TaskContext,

    #[error("process_main invoked from outside the main thread")]
    WrongThread,

    #[error("placement policy could not select a worker for the submitted task")]
    Placement,
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(DispatchError: Send, Sync, std::error::Error);

    #[test]
    fn test_display_names_the_misuse() {
        assert!(DispatchError::Uninitialized.to_string().contains("initialization"));
        assert!(DispatchError::TaskContext.to_string().contains("task"));
        assert!(DispatchError::WrongThread.to_string().contains("main thread"));
        assert!(DispatchError::Placement.to_string().contains("placement"));
    }
}
