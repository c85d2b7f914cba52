use std::sync::atomic::{AtomicBool, Ordering};

/// Single-flight flag: at most one operation of a kind is outstanding.
///
/// A trigger that finds the flag taken is dropped, not queued.
#[derive(Debug, Default)]
pub(crate) struct Flight(AtomicBool);

impl Flight {
    pub(crate) fn try_begin(&self) -> Option<FlightGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(&self.0))
    }

    pub(crate) fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the flag on drop, including when the future holding it is
/// dropped mid-request.
pub(crate) struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_fails_until_release() {
        let flight = Flight::default();
        let guard = flight.try_begin();
        assert!(guard.is_some());
        assert!(flight.is_active());
        assert!(flight.try_begin().is_none());

        drop(guard);
        assert!(!flight.is_active());
        assert!(flight.try_begin().is_some());
    }
}
