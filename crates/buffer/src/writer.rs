use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::pool::BufferPool;

/// Background checkpoint writer: wakes when the dirty ratio is exceeded
/// (or on its own timeout) and runs a `check_point()` pass.
pub struct BackgroundWriter {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
    woken: Arc<AtomicBool>,
}

impl BackgroundWriter {
    pub fn spawn(pool: Arc<BufferPool>, poll_interval: Duration) -> Self {
        Self::spawn_with_hook(pool, poll_interval, None)
    }

    /// Same as `spawn`, but runs `after_checkpoint` once a checkpoint pass
    /// completes — the caller's hook for log truncation, which this crate
    /// knows nothing about.
    pub fn spawn_with_hook(
        pool: Arc<BufferPool>,
        poll_interval: Duration,
        after_checkpoint: Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let woken = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let woken_clone = woken.clone();

        let handle = std::thread::spawn(move || {
            let (lock, cvar) = &*stop_clone;
            let mut guard = lock.lock().unwrap();
            loop {
                let (g, timeout) = cvar.wait_timeout(guard, poll_interval).unwrap();
                guard = g;
                if *guard {
                    break;
                }
                woken_clone.store(false, Ordering::SeqCst);
                if timeout.timed_out() && !pool.should_wake_writer() {
                    continue;
                }
                match pool.check_point() {
                    Ok(still_dirty) if !still_dirty.is_empty() => {
                        info!(remaining = still_dirty.len(), "checkpoint pass left frames dirty");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "checkpoint pass failed"),
                }
                if let Some(hook) = &after_checkpoint {
                    hook();
                }
            }
        });

        Self { stop, handle: Some(handle), woken }
    }

    /// Signals the writer to run a pass immediately rather than waiting out
    /// its poll interval.
    pub fn wake(&self) {
        self.woken.store(true, Ordering::SeqCst);
        self.stop.1.notify_all();
    }

    pub fn stop(mut self) {
        {
            let (lock, cvar) = &*self.stop;
            let mut guard = lock.lock().unwrap();
            *guard = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundWriter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            {
                let (lock, cvar) = &*self.stop;
                let mut guard = lock.lock().unwrap();
                *guard = true;
                cvar.notify_all();
            }
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_manager::FileManager;
    use crate::frame::Affinity;
    use crate::pool::NoopWalDelegate;
    use cooldb_common::PageId;
    use tempfile::tempdir;

    #[test]
    fn background_writer_flushes_dirty_frames_on_demand() {
        let dir = tempdir().unwrap();
        let mut fm = FileManager::new(64);
        fm.open(0, &dir.path().join("data.0")).unwrap();
        fm.extend(0, 4).unwrap();
        let pool = Arc::new(BufferPool::new(fm, 4, 4, 64, 500, Arc::new(NoopWalDelegate)));

        let token = pool.pin_new(PageId::new(0, 0)).unwrap();
        pool.unpin_dirty(token, Affinity::Liked, 1).unwrap();
        assert_eq!(pool.dirty_len(), 1);

        let writer = BackgroundWriter::spawn(pool.clone(), Duration::from_millis(20));
        writer.wake();
        std::thread::sleep(Duration::from_millis(100));
        writer.stop();

        assert_eq!(pool.dirty_len(), 0);
    }
}
