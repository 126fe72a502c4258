use crate::QueueError;
use std::{
    cell::Cell,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Default number of calls served from a cached core id before resampling.
pub const DEFAULT_RESAMPLE_INTERVAL: u32 = 500;

/// Width of the per-thread rotating offset added to the core id.
pub const OFFSET_BITS: u32 = 2;

const OFFSET_MASK: usize = (1 << OFFSET_BITS) - 1;

/// Source of offsets for threads using the queue's thread-local selector.
static NEXT_THREAD_OFFSET: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_SELECTOR: Cell<Option<ShardSelector>> = const { Cell::new(None) };
}

/// How often a [`ShardSelector`] refreshes its cached core id.
///
/// Querying the executing core on every operation costs more than the shard
/// acquisition it steers, so the id is sampled once and reused for the next
/// `resample_interval` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffinityPolicy {
    resample_interval: u32,
}

impl AffinityPolicy {
    /// Creates a policy that resamples after `resample_interval` cached calls.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidResampleInterval`] for an interval of zero.
    pub const fn new(resample_interval: u32) -> Result<Self, QueueError> {
        if resample_interval == 0 {
            return Err(QueueError::InvalidResampleInterval);
        }
        Ok(Self { resample_interval })
    }

    /// Number of calls served from the cache between two samples.
    pub const fn resample_interval(self) -> u32 {
        self.resample_interval
    }
}

impl Default for AffinityPolicy {
    fn default() -> Self {
        Self {
            resample_interval: DEFAULT_RESAMPLE_INTERVAL,
        }
    }
}

/// Which kind of core query a [`ShardSelector`] is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreSample {
    /// First sample for this selector; accuracy matters more than cost.
    Initial,
    /// Periodic refresh; cost matters more than accuracy.
    Refresh,
}

/// Per-thread affinity hint producing a starting shard index.
///
/// The hint is `core * 4 + offset`, where `core` approximates the executing
/// processor and `offset` is a 2-bit value fixed for the selector's lifetime.
/// Threads sharing a core therefore start on different shards. The hint only
/// steers; the shard table verifies ownership atomically regardless, so a
/// stale or wrong core id costs throughput, never correctness.
///
/// A selector is a plain value. The queue keeps one per thread in
/// thread-local storage, and producer/consumer handles each carry their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSelector {
    core: Option<usize>,
    remaining: u32,
    offset: usize,
}

impl ShardSelector {
    /// Creates a selector whose offset is the low bits of `seed`.
    pub const fn with_offset(seed: usize) -> Self {
        Self {
            core: None,
            remaining: 0,
            offset: seed & OFFSET_MASK,
        }
    }

    /// The fixed rotating offset, in `0..4`.
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// The cached core id, if one has been sampled.
    pub const fn cached_core(&self) -> Option<usize> {
        self.core
    }

    /// Next starting shard hint, sampling the core with the platform probe.
    #[inline]
    pub fn next_hint(&mut self, policy: AffinityPolicy) -> usize {
        self.next_hint_with(policy, probe_core)
    }

    /// Next starting shard hint, sampling the core with `probe`.
    ///
    /// `probe` is called on the first use. Each sample is then reused for the
    /// next `policy.resample_interval()` calls before `probe` runs again.
    #[inline]
    pub fn next_hint_with<F>(&mut self, policy: AffinityPolicy, probe: F) -> usize
    where
        F: FnOnce(CoreSample) -> usize,
    {
        let core = match self.core {
            Some(core) if self.remaining > 0 => {
                self.remaining -= 1;
                core
            },
            cached => {
                let kind = if cached.is_some() {
                    CoreSample::Refresh
                } else {
                    CoreSample::Initial
                };
                let core = probe(kind);
                self.core = Some(core);
                self.remaining = policy.resample_interval();
                core
            },
        };
        (core << OFFSET_BITS).wrapping_add(self.offset)
    }
}

/// Next hint from the calling thread's selector.
///
/// The selector is created on first use with an offset drawn from a
/// process-wide counter. During thread teardown, once thread-local storage is
/// gone, a one-off selector is used instead.
pub(crate) fn thread_hint(policy: AffinityPolicy) -> usize {
    THREAD_SELECTOR
        .try_with(|slot| {
            let mut selector = slot.get().unwrap_or_else(|| {
                ShardSelector::with_offset(NEXT_THREAD_OFFSET.fetch_add(1, Ordering::Relaxed))
            });
            let hint = selector.next_hint(policy);
            slot.set(Some(selector));
            hint
        })
        .unwrap_or_else(|_| ShardSelector::with_offset(0).next_hint(policy))
}

/// Approximates the id of the executing core.
///
/// Initial samples ask the OS. Refreshes read `TSC_AUX` through `rdtscp` on
/// x86_64, where the kernel stores the cpu number in the low 12 bits, and
/// fall back to the OS query elsewhere.
pub fn probe_core(kind: CoreSample) -> usize {
    match kind {
        CoreSample::Initial => os_core(),
        CoreSample::Refresh => hardware_core().unwrap_or_else(os_core),
    }
}

#[cfg(target_os = "linux")]
fn os_core() -> usize {
    // SAFETY: sched_getcpu takes no arguments and only reads per-cpu state.
    let cpu = unsafe { libc::sched_getcpu() };
    usize::try_from(cpu).unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn os_core() -> usize {
    hardware_core().unwrap_or(0)
}

#[cfg(target_arch = "x86_64")]
fn hardware_core() -> Option<usize> {
    use std::{arch::x86_64::__rdtscp, sync::OnceLock};

    static HAS_RDTSCP: OnceLock<bool> = OnceLock::new();

    let supported = *HAS_RDTSCP.get_or_init(|| {
        use std::arch::x86_64::__cpuid;
        // Leaf 0x8000_0001 is only queried when the max extended leaf covers it.
        __cpuid(0x8000_0000).eax >= 0x8000_0001 && __cpuid(0x8000_0001).edx & (1 << 27) != 0
    });
    if !supported {
        return None;
    }

    let mut aux = 0u32;
    // SAFETY: rdtscp support was confirmed through cpuid above.
    unsafe {
        let _ = __rdtscp(&raw mut aux);
    }
    Some((aux & 0x0FFF) as usize)
}

#[cfg(not(target_arch = "x86_64"))]
const fn hardware_core() -> Option<usize> {
    None
}
