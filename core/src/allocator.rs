//! Port pool management.
//!
//! Tracks which ports this process has leased and probes the OS before
//! handing one out, so ports held by unrelated processes are never granted.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::ops::RangeInclusive;

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::config::MIN_USER_PORT;
use crate::error::{Error, Result};

/// Probes whether a port can actually be bound right now.
///
/// Implementations must not hold the port after returning; the probe is a
/// momentary bind-and-release. Injected so tests can fake OS-level occupancy.
pub trait PortProber: Send + Sync {
    fn is_bindable(&self, port: u16) -> bool;
}

/// Real probe: bind a TCP listener on all interfaces and drop it.
#[derive(Debug, Default)]
pub struct TcpProber;

impl PortProber for TcpProber {
    fn is_bindable(&self, port: u16) -> bool {
        TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).is_ok()
    }
}

/// Leases ports from a fixed pool without collisions.
///
/// The leased set is always a subset of the configured range and never
/// contains duplicates. The allocator owns lease bookkeeping only; callers
/// own the lifetime of whatever they bind on a granted port.
pub struct PortAllocator<P = TcpProber> {
    range: RangeInclusive<u16>,
    prober: P,
    leased: Mutex<HashSet<u16>>,
}

impl PortAllocator<TcpProber> {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self::with_prober(range, TcpProber)
    }
}

impl<P: PortProber> PortAllocator<P> {
    pub fn with_prober(range: RangeInclusive<u16>, prober: P) -> Self {
        Self {
            range,
            prober,
            leased: Mutex::new(HashSet::new()),
        }
    }

    /// Lease a port.
    ///
    /// A `preferred` port inside the range is granted when it is neither
    /// leased here nor held elsewhere, letting a restarted project keep its
    /// previous address. Otherwise the remaining range is scanned in
    /// randomized order and the first bindable port wins; random order trades
    /// determinism for even reuse across the pool.
    pub fn acquire(&self, preferred: Option<u16>) -> Result<u16> {
        // Probes run outside the lease lock; a full-range scan must not
        // stall other acquisitions. Each grant re-checks under the lock.
        if let Some(port) = preferred {
            if port >= MIN_USER_PORT
                && self.range.contains(&port)
                && !self.is_leased(port)
                && self.prober.is_bindable(port)
                && self.leased.lock().insert(port)
            {
                return Ok(port);
            }
        }

        // Privileged ports are never handed out, even from a range that
        // includes them.
        let mut candidates: Vec<u16> = {
            let leased = self.leased.lock();
            self.range
                .clone()
                .filter(|port| *port >= MIN_USER_PORT && !leased.contains(port))
                .collect()
        };
        candidates.shuffle(&mut rand::thread_rng());

        for port in candidates {
            if self.prober.is_bindable(port) && self.leased.lock().insert(port) {
                return Ok(port);
            }
        }

        Err(Error::PortExhausted {
            start: *self.range.start(),
            end: *self.range.end(),
        })
    }

    /// Return a port to the pool. Idempotent: releasing an unleased port is
    /// a no-op.
    pub fn release(&self, port: u16) {
        self.leased.lock().remove(&port);
    }

    pub fn is_leased(&self, port: u16) -> bool {
        self.leased.lock().contains(&port)
    }

    pub fn leased_count(&self) -> usize {
        self.leased.lock().len()
    }

    pub fn range(&self) -> &RangeInclusive<u16> {
        &self.range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Prober that treats every port as free.
    struct OpenProber;

    impl PortProber for OpenProber {
        fn is_bindable(&self, _port: u16) -> bool {
            true
        }
    }

    /// Prober that simulates specific ports being held by other processes.
    struct BusyProber {
        busy: HashSet<u16>,
    }

    impl PortProber for BusyProber {
        fn is_bindable(&self, port: u16) -> bool {
            !self.busy.contains(&port)
        }
    }

    #[test]
    fn test_preferred_port_is_granted() {
        let allocator = PortAllocator::with_prober(8000..=8010, OpenProber);
        assert_eq!(allocator.acquire(Some(8005)).unwrap(), 8005);
        assert!(allocator.is_leased(8005));
    }

    #[test]
    fn test_preferred_port_outside_range_falls_through() {
        let allocator = PortAllocator::with_prober(8000..=8010, OpenProber);
        let port = allocator.acquire(Some(3000)).unwrap();
        assert!((8000..=8010).contains(&port));
    }

    #[test]
    fn test_busy_preferred_port_falls_through() {
        let allocator = PortAllocator::with_prober(
            8000..=8010,
            BusyProber {
                busy: [8005].into_iter().collect(),
            },
        );
        let port = allocator.acquire(Some(8005)).unwrap();
        assert_ne!(port, 8005);
        assert!((8000..=8010).contains(&port));
    }

    #[test]
    fn test_externally_bound_preferred_port_falls_through() {
        // Hold a real port open to simulate an unrelated process.
        let holder = TcpListener::bind("0.0.0.0:0").unwrap();
        let held = holder.local_addr().unwrap().port();

        let allocator = PortAllocator::new(held..=held.saturating_add(20));
        let port = allocator.acquire(Some(held)).unwrap();
        assert_ne!(port, held);
    }

    #[test]
    fn test_privileged_ports_are_never_allocated() {
        let allocator = PortAllocator::with_prober(1000..=1030, OpenProber);
        for _ in 0..7 {
            let port = allocator.acquire(None).unwrap();
            assert!(port >= 1024, "allocated privileged port {port}");
        }
        let err = allocator.acquire(Some(1000)).unwrap_err();
        assert!(matches!(err, Error::PortExhausted { .. }));
    }

    #[test]
    fn test_exhausted_pool() {
        let allocator = PortAllocator::with_prober(
            8000..=8001,
            BusyProber {
                busy: [8000, 8001].into_iter().collect(),
            },
        );
        let err = allocator.acquire(None).unwrap_err();
        assert!(matches!(
            err,
            Error::PortExhausted { start: 8000, end: 8001 }
        ));
    }

    #[test]
    fn test_release_is_idempotent() {
        let allocator = PortAllocator::with_prober(8000..=8010, OpenProber);
        let port = allocator.acquire(None).unwrap();
        allocator.release(port);
        allocator.release(port);
        allocator.release(12345);
        assert_eq!(allocator.leased_count(), 0);
    }

    #[test]
    fn test_released_port_can_be_reacquired() {
        let allocator = PortAllocator::with_prober(8000..=8010, OpenProber);
        let port = allocator.acquire(None).unwrap();
        allocator.release(port);
        assert_eq!(allocator.acquire(Some(port)).unwrap(), port);
    }

    #[test]
    fn test_slow_probe_does_not_block_other_acquisitions() {
        use std::time::{Duration, Instant};

        /// Prober that stalls on one specific port.
        struct StallProber {
            slow_port: u16,
        }

        impl PortProber for StallProber {
            fn is_bindable(&self, port: u16) -> bool {
                if port == self.slow_port {
                    std::thread::sleep(Duration::from_millis(300));
                }
                true
            }
        }

        let allocator = Arc::new(PortAllocator::with_prober(
            8000..=8010,
            StallProber { slow_port: 8000 },
        ));

        let background = {
            let allocator = allocator.clone();
            std::thread::spawn(move || allocator.acquire(Some(8000)).unwrap())
        };
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        assert_eq!(allocator.acquire(Some(8005)).unwrap(), 8005);
        assert!(
            started.elapsed() < Duration::from_millis(200),
            "acquire waited behind another caller's probe"
        );

        assert_eq!(background.join().unwrap(), 8000);
    }

    #[test]
    fn test_concurrent_acquires_never_collide() {
        let allocator = Arc::new(PortAllocator::with_prober(8000..=8099, OpenProber));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || allocator.acquire(None).unwrap())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let port = handle.join().unwrap();
            assert!((8000..=8099).contains(&port));
            assert!(seen.insert(port), "port {port} leased twice");
        }
        assert_eq!(allocator.leased_count(), 50);
    }
}
