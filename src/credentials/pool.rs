use std::time::Duration;

use tokio::time::Instant;

use super::keys::Credential;

/// A key handed to exactly one worker. Consumed by [`CredentialPool::release`]
/// or [`CredentialPool::cool_down`], so a lease cannot be returned twice.
#[derive(Debug)]
pub struct Lease {
    index: usize,
    credential: Credential,
}

impl Lease {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Position of the key in the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based key number, as shown in logs.
    pub fn key_number(&self) -> usize {
        self.index + 1
    }
}

#[derive(Debug)]
struct KeySlot {
    credential: Credential,
    in_use: bool,
    cooldown_until: Option<Instant>,
}

impl KeySlot {
    fn is_eligible(&self, now: Instant) -> bool {
        !self.in_use && self.cooldown_until.map_or(true, |until| until <= now)
    }
}

/// Round-robin pool of API keys with busy and cooldown tracking.
///
/// Cooldowns expire lazily: nothing runs in the background, every
/// [`acquire`](Self::acquire) first drops deadlines that have passed.
#[derive(Debug)]
pub struct CredentialPool {
    slots: Vec<KeySlot>,
    cursor: usize,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self {
            slots: credentials
                .into_iter()
                .map(|credential| KeySlot {
                    credential,
                    in_use: false,
                    cooldown_until: None,
                })
                .collect(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index the next scan starts from.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Hand out the first eligible key at or after the cursor.
    ///
    /// Scans each key at most once. On success the key is marked in use and
    /// the cursor moves just past it.
    pub fn acquire(&mut self, now: Instant) -> Option<Lease> {
        let total = self.slots.len();
        if total == 0 {
            return None;
        }

        for slot in &mut self.slots {
            if slot.cooldown_until.is_some_and(|until| until <= now) {
                slot.cooldown_until = None;
            }
        }

        for offset in 0..total {
            let index = (self.cursor + offset) % total;
            let slot = &mut self.slots[index];
            if slot.is_eligible(now) {
                slot.in_use = true;
                self.cursor = (index + 1) % total;
                return Some(Lease {
                    index,
                    credential: slot.credential.clone(),
                });
            }
        }

        None
    }

    /// Return a key after a success or a permanent failure.
    pub fn release(&mut self, lease: Lease) {
        if let Some(slot) = self.slots.get_mut(lease.index) {
            debug_assert!(slot.in_use, "released a key that was not leased");
            slot.in_use = false;
        }
    }

    /// Return a key and park it until `now + duration`. Returns the deadline.
    pub fn cool_down(&mut self, lease: Lease, duration: Duration, now: Instant) -> Instant {
        let until = now + duration;
        if let Some(slot) = self.slots.get_mut(lease.index) {
            debug_assert!(slot.in_use, "cooled a key that was not leased");
            slot.in_use = false;
            slot.cooldown_until = Some(until);
        }
        until
    }

    pub fn in_use_count(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }

    /// Keys whose cooldown has not yet passed at `now`.
    pub fn cooling_count(&self, now: Instant) -> usize {
        self.slots
            .iter()
            .filter(|s| s.cooldown_until.is_some_and(|until| until > now))
            .count()
    }

    pub fn cooldown_until(&self, index: usize) -> Option<Instant> {
        self.slots.get(index).and_then(|s| s.cooldown_until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> CredentialPool {
        CredentialPool::new((0..n).map(|i| Credential::new(format!("key-{i}"))).collect())
    }

    #[test]
    fn acquire_rotates_round_robin() {
        let mut pool = pool(3);
        let now = Instant::now();

        let a = pool.acquire(now).unwrap();
        assert_eq!(a.index(), 0);
        pool.release(a);

        let b = pool.acquire(now).unwrap();
        assert_eq!(b.index(), 1);
        pool.release(b);

        let c = pool.acquire(now).unwrap();
        assert_eq!(c.index(), 2);
        pool.release(c);

        let d = pool.acquire(now).unwrap();
        assert_eq!(d.index(), 0);
        assert_eq!(d.key_number(), 1);
    }

    #[test]
    fn acquire_skips_busy_keys() {
        let mut pool = pool(2);
        let now = Instant::now();

        let a = pool.acquire(now).unwrap();
        let b = pool.acquire(now).unwrap();
        assert_ne!(a.index(), b.index());
        assert_eq!(pool.in_use_count(), 2);
        assert!(pool.acquire(now).is_none());

        pool.release(a);
        let c = pool.acquire(now).unwrap();
        assert_eq!(c.index(), 0);
    }

    #[test]
    fn cooling_key_is_skipped_until_deadline() {
        let mut pool = pool(1);
        let now = Instant::now();
        let cooldown = Duration::from_secs(45);

        let lease = pool.acquire(now).unwrap();
        let until = pool.cool_down(lease, cooldown, now);
        assert_eq!(until, now + cooldown);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.cooling_count(now), 1);

        assert!(pool.acquire(now + Duration::from_secs(44)).is_none());
        let lease = pool.acquire(until).unwrap();
        assert_eq!(lease.index(), 0);
        assert!(pool.cooldown_until(0).is_none());
    }

    #[test]
    fn cooling_key_does_not_block_others() {
        let mut pool = pool(2);
        let now = Instant::now();

        let first = pool.acquire(now).unwrap();
        pool.cool_down(first, Duration::from_secs(45), now);

        let second = pool.acquire(now).unwrap();
        assert_eq!(second.index(), 1);
        pool.release(second);

        // key 0 still cooling, so the scan wraps back to key 1
        let third = pool.acquire(now + Duration::from_secs(1)).unwrap();
        assert_eq!(third.index(), 1);
    }

    #[test]
    fn empty_pool_never_acquires() {
        let mut pool = pool(0);
        assert!(pool.is_empty());
        assert!(pool.acquire(Instant::now()).is_none());
    }

    #[test]
    fn cursor_advances_past_acquired_key() {
        let mut pool = pool(4);
        let now = Instant::now();
        let a = pool.acquire(now).unwrap();
        let b = pool.acquire(now).unwrap();
        assert_eq!(pool.cursor(), 2);
        pool.release(b);
        pool.release(a);
        let c = pool.acquire(now).unwrap();
        assert_eq!(c.index(), 2);
        assert_eq!(pool.cursor(), 3);
    }
}
