use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

/// A long-lived worker the Page Pool leases out (C4). Tracks enough state
/// to decide retirement: age, use count, and consecutive errors.
pub struct Page {
    pub id: u64,
    created_at: Instant,
    uses: u64,
    consecutive_errors: u32,
}

impl Page {
    fn new(id: u64) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            uses: 0,
            consecutive_errors: 0,
        }
    }

    fn should_retire(&self, max_age: Duration, max_uses: u64) -> bool {
        self.created_at.elapsed() >= max_age || self.uses >= max_uses || self.consecutive_errors >= 3
    }
}

/// A leased [`Page`]. Dropping it without calling [`PagePool::release`]
/// still returns it to the pool via `Drop`, so `acquire` can never leak a
/// lease on cancellation (§4.4).
pub struct PageLease<'a> {
    page: Option<Page>,
    pool: &'a PagePool,
    _permit: SemaphorePermit<'a>,
    outcome: LeaseOutcome,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LeaseOutcome {
    Unset,
    Success,
    Error,
}

impl<'a> PageLease<'a> {
    pub fn id(&self) -> u64 {
        self.page.as_ref().expect("page present while leased").id
    }

    pub fn mark_success(&mut self) {
        self.outcome = LeaseOutcome::Success;
    }

    pub fn mark_error(&mut self) {
        self.outcome = LeaseOutcome::Error;
    }
}

impl<'a> Drop for PageLease<'a> {
    fn drop(&mut self) {
        if let Some(mut page) = self.page.take() {
            page.uses += 1;
            match self.outcome {
                LeaseOutcome::Error => page.consecutive_errors += 1,
                LeaseOutcome::Success => page.consecutive_errors = 0,
                LeaseOutcome::Unset => {}
            }
            self.pool.reclaim(page);
        }
    }
}

struct PoolState {
    free: Vec<Page>,
    next_id: u64,
}

/// Maintains `min_size..max_size` long-lived pages, resetting them on
/// release and retiring pages by age/uses/error count (§4.4).
pub struct PagePool {
    min_size: usize,
    max_size: usize,
    max_age: Duration,
    max_uses: u64,
    state: Mutex<PoolState>,
    permits: Semaphore,
    created_total: AtomicU64,
    retired_total: AtomicU64,
}

impl PagePool {
    pub fn new(min_size: usize, max_size: usize, max_age: Duration, max_uses: u64) -> Self {
        let max_size = max_size.max(min_size).max(1);
        Self {
            min_size,
            max_size,
            max_age,
            max_uses,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                next_id: 0,
            }),
            permits: Semaphore::new(max_size),
            created_total: AtomicU64::new(0),
            retired_total: AtomicU64::new(0),
        }
    }

    /// Blocks if at capacity; creates pages lazily up to `max_size`.
    /// Guaranteed to return the leased page via `Drop` on every exit path,
    /// including cancellation of the surrounding future.
    pub async fn acquire(&self) -> PageLease<'_> {
        let permit = self.permits.acquire().await.expect("pool semaphore closed");

        let mut state = self.state.lock().await;
        let page = loop {
            if let Some(page) = state.free.pop() {
                if page.should_retire(self.max_age, self.max_uses) {
                    self.retired_total.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                break page;
            }
            let id = state.next_id;
            state.next_id += 1;
            self.created_total.fetch_add(1, Ordering::Relaxed);
            break Page::new(id);
        };
        drop(state);

        PageLease {
            page: Some(page),
            pool: self,
            _permit: permit,
            outcome: LeaseOutcome::Unset,
        }
    }

    fn reclaim(&self, page: Page) {
        if page.should_retire(self.max_age, self.max_uses) {
            self.retired_total.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if let Ok(mut state) = self.state.try_lock() {
            state.free.push(page);
        }
    }

    /// Periodic maintenance: retire aged/idle pages down to `min_size`.
    /// Intended to be called on a `cleanup_interval` timer (default 60s).
    pub async fn run_maintenance(&self) {
        let mut state = self.state.lock().await;
        state.free.retain(|p| !p.should_retire(self.max_age, self.max_uses));
        while state.free.len() > self.min_size {
            state.free.pop();
            self.retired_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        let n = state.free.len() as u64;
        state.free.clear();
        self.retired_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn stats(&self) -> (u64, u64) {
        (
            self.created_total.load(Ordering::Relaxed),
            self.retired_total.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_reuses_released_pages() {
        let pool = PagePool::new(1, 2, Duration::from_secs(1800), 200);
        let id_a = {
            let lease = pool.acquire().await;
            lease.id()
        };
        let id_b = {
            let lease = pool.acquire().await;
            lease.id()
        };
        assert_eq!(id_a, id_b);
    }

    #[tokio::test]
    async fn lease_is_returned_even_when_dropped_without_marking_outcome() {
        let pool = PagePool::new(1, 1, Duration::from_secs(1800), 200);
        {
            let _lease = pool.acquire().await;
        }
        // Second acquire must not deadlock: the permit was released by Drop.
        let _lease2 = tokio::time::timeout(Duration::from_millis(200), pool.acquire())
            .await
            .expect("acquire should not block after prior lease dropped");
    }

    #[tokio::test]
    async fn retires_page_after_max_uses() {
        let pool = PagePool::new(1, 1, Duration::from_secs(1800), 1);
        let id_a = {
            let mut lease = pool.acquire().await;
            lease.mark_success();
            lease.id()
        };
        let id_b = {
            let lease = pool.acquire().await;
            lease.id()
        };
        assert_ne!(id_a, id_b);
    }
}
