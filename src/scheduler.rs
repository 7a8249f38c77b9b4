use tokio::task::JoinHandle;

/// Holds the interval tasks driving one room. Every handle registered here is
/// aborted before the room is removed or reset, so no tick can outlive its
/// room.
#[derive(Debug, Default)]
pub struct RoomScheduler {
    handles: Vec<JoinHandle<()>>,
}

impl RoomScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: JoinHandle<()>) {
        self.handles.retain(|existing| !existing.is_finished());
        self.handles.push(handle);
    }

    pub fn active_count(&self) -> usize {
        self.handles
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Abort is synchronous; once this returns no registered task will run
    /// another iteration.
    pub fn cancel_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for RoomScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_all_stops_registered_intervals() {
        let counter = Arc::new(AtomicU64::new(0));
        let mut scheduler = RoomScheduler::new();

        let task_counter = counter.clone();
        scheduler.register(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(5));
            loop {
                interval.tick().await;
                task_counter.fetch_add(1, Ordering::Relaxed);
            }
        }));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(counter.load(Ordering::Relaxed) > 0);

        scheduler.cancel_all();
        let after_cancel = counter.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::Relaxed), after_cancel);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn register_drops_finished_handles() {
        let mut scheduler = RoomScheduler::new();
        scheduler.register(tokio::spawn(async {}));
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.register(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }));
        assert_eq!(scheduler.active_count(), 1);
        scheduler.cancel_all();
    }
}
