/// A guard that executes a closure when it goes out of scope.
///
/// Used to restore flag state on every exit path, including unwinds from
/// panicking task payloads.
pub(crate) struct ScopeGuard<F: FnOnce()> {
    // The closure lives in an `Option` so it can be taken out exactly once
    // on drop.
    closure: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub(crate) fn new(closure: F) -> Self {
        ScopeGuard {
            closure: Some(closure),
        }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}
