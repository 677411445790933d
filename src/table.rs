//! ScalingTable: chained-bucket engine with automatic grow/shrink.

use crate::gate::{AllocGate, Unbounded};
use crate::policy::{KeyPolicy, WordKeys};
use crate::reentrancy::{Reentrancy, ReentrancyGuard};
use core::mem::size_of;
use core::ops::ControlFlow;
use slotmap::{DefaultKey, SlotMap};

/// Reserved "absent" value returned by [`ScalingTable::remove`] and
/// [`ScalingTable::retrieve`] on a miss.
///
/// Indistinguishable from a legitimately stored 0: callers that store 0
/// must track presence out of band, or use [`ScalingTable::lookup_bytes`]
/// / [`ScalingTable::take_bytes`] instead.
pub const ABSENT: usize = 0;

/// Integrity tag carried by every live bucket.
const BUCKET_SIG: u32 = 0xBEA5_7FED;
/// Tag written into a bucket immediately before it is freed.
const BUCKET_FREE: u32 = 0xBCE7_DEAD;

fn slot_bytes(len: usize) -> usize {
    len * size_of::<Option<DefaultKey>>()
}

fn bucket_bytes(key_size: usize) -> usize {
    size_of::<Bucket>() + key_size
}

#[derive(Debug)]
struct Bucket {
    sig: u32,
    /// Next bucket on the same chain.
    next: Option<DefaultKey>,
    /// Entry value, opaque to the table.
    value: usize,
    /// Entry key, exactly `key_size` bytes.
    key: Box<[u8]>,
}

/// Failure to create a table. Nothing is allocated on any of these paths.
#[derive(Debug, PartialEq, Eq)]
pub enum CreateError {
    /// The initial (and minimum) slot count was zero.
    ZeroLength,
    /// The key length was zero.
    ZeroKeySize,
    /// The allocation gate refused the initial slot array.
    AllocDenied,
}

impl core::fmt::Display for CreateError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CreateError::ZeroLength => f.write_str("initial slot count must be nonzero"),
            CreateError::ZeroKeySize => f.write_str("key size must be nonzero"),
            CreateError::AllocDenied => f.write_str("slot array allocation denied"),
        }
    }
}

impl std::error::Error for CreateError {}

/// A self-scaling hash table mapping fixed-length byte keys to opaque
/// word values.
///
/// Collisions chain bucket nodes off each slot. The slot array doubles
/// when the table is more than half full and halves when less than a
/// quarter full, never below the creation-time minimum; either resize is
/// best-effort and its failure only affects chain lengths. Bucket nodes
/// live in an arena and are linked by stable arena keys, so a resize
/// relinks entries without moving or reallocating them.
pub struct ScalingTable<P = WordKeys, G = Unbounded> {
    /// Chain heads; `heads.len()` is the current table size.
    heads: Box<[Option<DefaultKey>]>,
    /// Bucket storage using generational keys.
    arena: SlotMap<DefaultKey, Bucket>,
    /// Creation-time size floor.
    minimum: usize,
    /// Live entries reachable across all chains.
    count: usize,
    /// Fixed key length in bytes.
    key_size: usize,
    policy: P,
    gate: G,
    depth: Reentrancy,
}

impl ScalingTable {
    /// Create a table keyed by a single machine word, using the default
    /// word policy and an unbounded allocation gate.
    ///
    /// `initial_len` is both the starting and the minimum slot count.
    pub fn new(initial_len: usize) -> Result<Self, CreateError> {
        Self::with_policy(initial_len, size_of::<usize>(), WordKeys, Unbounded)
    }
}

impl<P, G> ScalingTable<P, G>
where
    P: KeyPolicy,
    G: AllocGate,
{
    /// General constructor: explicit key length, hash/equality policy and
    /// allocation gate.
    ///
    /// `initial_len` is both the starting and the minimum slot count;
    /// the table never shrinks below it. Fails without allocating when
    /// either length is zero or the gate refuses the slot array.
    pub fn with_policy(
        initial_len: usize,
        key_size: usize,
        policy: P,
        gate: G,
    ) -> Result<Self, CreateError> {
        if initial_len == 0 {
            return Err(CreateError::ZeroLength);
        }
        if key_size == 0 {
            return Err(CreateError::ZeroKeySize);
        }
        if !gate.admit(slot_bytes(initial_len)) {
            tracing::warn!(initial_len, "slot array allocation denied at creation");
            return Err(CreateError::AllocDenied);
        }
        tracing::debug!(initial_len, key_size, "creating table");
        Ok(Self {
            heads: vec![None; initial_len].into_boxed_slice(),
            arena: SlotMap::with_key(),
            minimum: initial_len,
            count: 0,
            key_size,
            policy,
            gate,
            depth: Reentrancy::new(),
        })
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current number of slots (chain heads).
    pub fn slot_count(&self) -> usize {
        self.heads.len()
    }

    /// The floor the table never shrinks below.
    pub fn minimum_size(&self) -> usize {
        self.minimum
    }

    /// Fixed key length in bytes; every key passed to this table must be
    /// exactly this long.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    fn check_key(&self, key: &[u8]) {
        assert_eq!(
            key.len(),
            self.key_size,
            "key length {} does not match table key size {}",
            key.len(),
            self.key_size
        );
    }

    /// Tag check performed on every traversed bucket. A mismatch means
    /// the node was freed or overwritten while still chained.
    fn check_sig(bucket: &Bucket, slot: usize, pos: usize) {
        if bucket.sig != BUCKET_SIG {
            tracing::error!(
                slot,
                pos,
                sig = %format_args!("{:#010x}", bucket.sig),
                "corrupt bucket tag"
            );
        }
    }

    /// Prepend `id` into the chain of its key's slot in `heads`, which
    /// may be the live array or a replacement being built by a resize.
    fn chain_insert(
        policy: &P,
        arena: &mut SlotMap<DefaultKey, Bucket>,
        heads: &mut [Option<DefaultKey>],
        id: DefaultKey,
    ) {
        let idx = policy.hash(&arena[id].key, heads.len()) as usize % heads.len();
        arena[id].next = heads[idx];
        heads[idx] = Some(id);
    }

    /// Insert a key/value pair. The key bytes are copied into the new
    /// bucket and the bucket is prepended to its chain.
    ///
    /// Returns `false` only when the gate refuses the bucket allocation;
    /// the table is left unchanged in that case. Duplicate keys are not
    /// detected: a re-inserted key adds a second entry that shadows the
    /// older one until removed.
    pub fn insert_bytes(&mut self, key: &[u8], value: usize) -> bool {
        self.check_key(key);
        let _g = self.depth.enter();

        if !self.gate.admit(bucket_bytes(self.key_size)) {
            tracing::warn!("bucket allocation denied; entry not inserted");
            return false;
        }
        let id = self.arena.insert(Bucket {
            sig: BUCKET_SIG,
            next: None,
            value,
            key: key.into(),
        });
        Self::chain_insert(&self.policy, &mut self.arena, &mut self.heads, id);
        self.count += 1;

        if self.count * 2 > self.heads.len() {
            // A failed grow leaves the table valid, just denser.
            let target = self.heads.len() * 2;
            let _ = Self::try_resize(
                &self.gate,
                &self.policy,
                &mut self.arena,
                &mut self.heads,
                target,
            );
        }
        true
    }

    /// Remove the first entry matching `key` and return its value, or
    /// `None` if the key is absent.
    pub fn take_bytes(&mut self, key: &[u8]) -> Option<usize> {
        self.check_key(key);
        let _g = self.depth.enter();

        let len = self.heads.len();
        let idx = self.policy.hash(key, len) as usize % len;
        let mut prev: Option<DefaultKey> = None;
        let mut cur = self.heads[idx];
        let mut pos = 0;
        while let Some(id) = cur {
            let (matched, next) = {
                let b = &self.arena[id];
                Self::check_sig(b, idx, pos);
                (self.policy.eq(&b.key, key), b.next)
            };
            if matched {
                match prev {
                    None => self.heads[idx] = next,
                    Some(p) => self.arena[p].next = next,
                }
                self.arena[id].sig = BUCKET_FREE;
                let value = self.arena.remove(id).map(|b| b.value);
                self.count -= 1;

                if self.heads.len() > self.count * 4 && self.heads.len() > self.minimum {
                    // A failed shrink leaves the table valid, just sparser.
                    let target = (self.heads.len() / 2).max(self.minimum);
                    let _ = Self::try_resize(
                        &self.gate,
                        &self.policy,
                        &mut self.arena,
                        &mut self.heads,
                        target,
                    );
                }
                return value;
            }
            prev = cur;
            cur = next;
            pos += 1;
        }
        // A miss is a defined outcome, not an error.
        tracing::trace!("remove: key not found");
        None
    }

    /// Remove the first entry matching `key`.
    ///
    /// Returns the stored value, or [`ABSENT`] if the key is missing —
    /// ambiguous when 0 was stored; see [`ScalingTable::take_bytes`].
    pub fn remove_bytes(&mut self, key: &[u8]) -> usize {
        self.take_bytes(key).unwrap_or(ABSENT)
    }

    /// Look up `key` without mutating the table. Never resizes.
    pub fn lookup_bytes(&self, key: &[u8]) -> Option<usize> {
        self.check_key(key);
        let _g = self.depth.enter();

        let len = self.heads.len();
        let idx = self.policy.hash(key, len) as usize % len;
        let mut cur = self.heads[idx];
        let mut pos = 0;
        while let Some(id) = cur {
            let b = &self.arena[id];
            Self::check_sig(b, idx, pos);
            if self.policy.eq(&b.key, key) {
                return Some(b.value);
            }
            cur = b.next;
            pos += 1;
        }
        None
    }

    /// Look up `key`, returning the stored value or [`ABSENT`] on a miss
    /// (with the same ambiguity caveat as [`ScalingTable::remove_bytes`]).
    pub fn retrieve_bytes(&self, key: &[u8]) -> usize {
        self.lookup_bytes(key).unwrap_or(ABSENT)
    }

    /// Visit every entry, slot by slot and within each slot in chain
    /// order, until the visitor breaks; the break value is propagated.
    ///
    /// The visitor runs under the table's reentrancy guard: calling back
    /// into this table from inside it is detected as misuse.
    pub fn visit<B>(&self, mut f: impl FnMut(&[u8], usize) -> ControlFlow<B>) -> ControlFlow<B> {
        let _g = self.depth.enter();
        for idx in 0..self.heads.len() {
            let mut cur = self.heads[idx];
            let mut pos = 0;
            while let Some(id) = cur {
                let b = &self.arena[id];
                Self::check_sig(b, idx, pos);
                f(&b.key[..], b.value)?;
                cur = b.next;
                pos += 1;
            }
        }
        ControlFlow::Continue(())
    }

    /// Iterate over `(key, value)` pairs in slot order, then chain order.
    ///
    /// The iterator holds the table's reentrancy guard for its whole
    /// lifetime, so overlapping table calls while it is alive are
    /// detected exactly like visitor reentry.
    pub fn iter(&self) -> Iter<'_, P, G> {
        let g = self.depth.enter();
        Iter {
            table: self,
            slot: 0,
            cur: self.heads[0],
            _g: g,
        }
    }

    /// Attempt to move to `new_len` slots. A no-op at the current size.
    ///
    /// Failure to allocate the new slot array is not a hard failure: the
    /// table stays fully valid at its old size and chains simply run
    /// longer (or stay sparse) than ideal.
    fn try_resize(
        gate: &G,
        policy: &P,
        arena: &mut SlotMap<DefaultKey, Bucket>,
        heads: &mut Box<[Option<DefaultKey>]>,
        new_len: usize,
    ) -> bool {
        if new_len == heads.len() {
            return true;
        }
        if !gate.admit(slot_bytes(new_len)) {
            tracing::warn!(new_len, "slot array allocation denied; keeping current size");
            return false;
        }
        let mut new_heads = vec![None; new_len].into_boxed_slice();
        // Relink every bucket into the new array; nodes stay in place.
        for idx in 0..heads.len() {
            let mut cur = heads[idx];
            let mut pos = 0;
            while let Some(id) = cur {
                let next = arena[id].next;
                Self::check_sig(&arena[id], idx, pos);
                Self::chain_insert(policy, arena, &mut new_heads, id);
                cur = next;
                pos += 1;
            }
        }
        // Entries are all moved; adopt the new array in one swap.
        *heads = new_heads;
        true
    }
}

impl<G: AllocGate> ScalingTable<WordKeys, G> {
    /// Insert with a single-word key. Requires a table created with a
    /// word-sized key length, as [`ScalingTable::new`] does.
    pub fn insert(&mut self, key: usize, value: usize) -> bool {
        self.insert_bytes(&key.to_ne_bytes(), value)
    }

    /// Remove a single-word key, returning the stored value or
    /// [`ABSENT`] on a miss.
    pub fn remove(&mut self, key: usize) -> usize {
        self.remove_bytes(&key.to_ne_bytes())
    }

    /// Look up a single-word key, returning the stored value or
    /// [`ABSENT`] on a miss.
    pub fn retrieve(&self, key: usize) -> usize {
        self.retrieve_bytes(&key.to_ne_bytes())
    }
}

impl<P, G> Drop for ScalingTable<P, G> {
    fn drop(&mut self) {
        if self.count != 0 {
            // Leak: the owner was expected to remove every entry first.
            // Suppressed mid-unwind so a primary fault is not drowned out
            // by secondary leak reports.
            if !std::thread::panicking() {
                tracing::error!(
                    remaining = self.count,
                    "leak detected: table destroyed with live entries; freeing them"
                );
            }
        }
        // Best-effort cleanup: tombstone whatever is still chained; the
        // arena releases the nodes.
        for bucket in self.arena.values_mut() {
            bucket.sig = BUCKET_FREE;
        }
    }
}

/// Iterator over `(key, value)` pairs of a [`ScalingTable`].
pub struct Iter<'a, P = WordKeys, G = Unbounded> {
    table: &'a ScalingTable<P, G>,
    slot: usize,
    cur: Option<DefaultKey>,
    _g: ReentrancyGuard<'a>,
}

impl<'a, P, G> Iterator for Iter<'a, P, G> {
    type Item = (&'a [u8], usize);

    fn next(&mut self) -> Option<Self::Item> {
        let table = self.table;
        loop {
            if let Some(id) = self.cur {
                let b = &table.arena[id];
                self.cur = b.next;
                return Some((&b.key[..], b.value));
            }
            self.slot += 1;
            if self.slot >= table.heads.len() {
                return None;
            }
            self.cur = table.heads[self.slot];
        }
    }
}

/// Slot-occupancy snapshot.
#[cfg(feature = "stats")]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableStats {
    pub slots: usize,
    pub entries: usize,
    pub empty_slots: usize,
    pub longest_chain: usize,
}

#[cfg(feature = "stats")]
impl<P, G> ScalingTable<P, G>
where
    P: KeyPolicy,
    G: AllocGate,
{
    /// Walk every chain and report occupancy, logging the summary at
    /// debug level.
    pub fn stats(&self) -> TableStats {
        let _g = self.depth.enter();
        let mut empty_slots = 0;
        let mut longest_chain = 0;
        for idx in 0..self.heads.len() {
            let mut chain = 0;
            let mut cur = self.heads[idx];
            if cur.is_none() {
                empty_slots += 1;
            }
            while let Some(id) = cur {
                chain += 1;
                cur = self.arena[id].next;
            }
            longest_chain = longest_chain.max(chain);
        }
        tracing::debug!(
            minimum = self.minimum,
            slots = self.heads.len(),
            entries = self.count,
            empty_slots,
            longest_chain,
            "table occupancy"
        );
        TableStats {
            slots: self.heads.len(),
            entries: self.count,
            empty_slots,
            longest_chain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    const WORD: usize = size_of::<usize>();

    /// Gate that routes bucket-sized requests and slot-array requests to
    /// separate switches, so either can be denied independently.
    #[derive(Clone)]
    struct TestGate {
        allow_buckets: Rc<Cell<bool>>,
        allow_slots: Rc<Cell<bool>>,
    }

    impl TestGate {
        fn open() -> Self {
            Self {
                allow_buckets: Rc::new(Cell::new(true)),
                allow_slots: Rc::new(Cell::new(true)),
            }
        }
    }

    impl AllocGate for TestGate {
        fn admit(&self, bytes: usize) -> bool {
            if bytes == bucket_bytes(WORD) {
                self.allow_buckets.get()
            } else {
                self.allow_slots.get()
            }
        }
    }

    /// Policy that forces every key into slot 0.
    struct OneSlot;

    impl KeyPolicy for OneSlot {
        fn hash(&self, _key: &[u8], _table_len: usize) -> u32 {
            0
        }
        fn eq(&self, a: &[u8], b: &[u8]) -> bool {
            a == b
        }
    }

    /// Invariant: `retrieve(k)` after `insert(k, v)` returns `v`; a miss
    /// returns the sentinel.
    #[test]
    fn round_trip_insert_retrieve() {
        let mut t = ScalingTable::new(4).unwrap();
        assert!(t.insert(7, 700));
        assert_eq!(t.retrieve(7), 700);
        assert_eq!(t.retrieve(8), ABSENT);
        assert_eq!(t.lookup_bytes(&8usize.to_ne_bytes()), None);
        assert_eq!(t.len(), 1);
        t.remove(7);
    }

    /// Invariant: `remove` returns the stored value and decrements the
    /// count by exactly one; removing an absent key returns the sentinel
    /// and leaves the count unchanged.
    #[test]
    fn remove_bookkeeping() {
        let mut t = ScalingTable::new(4).unwrap();
        t.insert(1, 10);
        t.insert(2, 20);
        assert_eq!(t.remove(1), 10);
        assert_eq!(t.len(), 1);
        assert_eq!(t.retrieve(1), ABSENT);

        assert_eq!(t.remove(99), ABSENT);
        assert_eq!(t.len(), 1);
        assert_eq!(t.take_bytes(&99usize.to_ne_bytes()), None);

        assert_eq!(t.remove(2), 20);
        assert!(t.is_empty());
    }

    /// Invariant: a table of size 4 grows to 8 on the third insert
    /// (`count*2 > size`) and shrinks back to the minimum of 4 once a
    /// single entry remains (`size > count*4`).
    #[test]
    fn grow_and_shrink_follow_load_factor() {
        let mut t = ScalingTable::new(4).unwrap();
        t.insert(1, 100);
        t.insert(2, 200);
        assert_eq!(t.slot_count(), 4);
        t.insert(3, 300);
        assert_eq!(t.slot_count(), 8);
        for k in 1..=3 {
            assert_eq!(t.retrieve(k), k * 100);
        }

        assert_eq!(t.remove(1), 100);
        assert_eq!(t.slot_count(), 8);
        assert_eq!(t.remove(2), 200);
        assert_eq!(t.slot_count(), 4);
        assert_eq!(t.retrieve(3), 300);
        t.remove(3);
    }

    /// Invariant: every entry stays retrievable with its value across
    /// repeated growth, and draining the table shrinks it back to its
    /// minimum and never below.
    #[test]
    fn churn_preserves_entries_and_floor() {
        let mut t = ScalingTable::new(4).unwrap();
        for k in 0..64usize {
            assert!(t.insert(k, k + 1));
        }
        assert_eq!(t.len(), 64);
        assert_eq!(t.slot_count(), 128);
        for k in 0..64usize {
            assert_eq!(t.retrieve(k), k + 1);
        }
        for k in 0..64usize {
            assert_eq!(t.remove(k), k + 1);
            assert!(t.slot_count() >= t.minimum_size());
        }
        assert!(t.is_empty());
        assert_eq!(t.slot_count(), 4);
    }

    /// Invariant: duplicate keys are not rejected; the newest entry
    /// shadows older ones and removal unlinks newest-first (no resize
    /// runs in this sequence, so chain order is deterministic).
    #[test]
    fn duplicate_keys_shadow_in_lifo_order() {
        let mut t = ScalingTable::new(4).unwrap();
        t.insert(5, 1);
        t.insert(5, 2);
        assert_eq!(t.len(), 2);
        assert_eq!(t.retrieve(5), 2);
        assert_eq!(t.remove(5), 2);
        assert_eq!(t.retrieve(5), 1);
        assert_eq!(t.remove(5), 1);
        assert_eq!(t.retrieve(5), ABSENT);
    }

    /// Invariant: multi-word keys round-trip through the byte surface.
    #[test]
    fn multi_word_keys_round_trip() {
        let mut t = ScalingTable::with_policy(4, 2 * WORD, WordKeys, Unbounded).unwrap();
        let mut key = [0u8; 2 * WORD];
        for i in 0..8usize {
            key[..WORD].copy_from_slice(&i.to_ne_bytes());
            key[WORD..].copy_from_slice(&(i * 31).to_ne_bytes());
            assert!(t.insert_bytes(&key, i + 1));
        }
        for i in 0..8usize {
            key[..WORD].copy_from_slice(&i.to_ne_bytes());
            key[WORD..].copy_from_slice(&(i * 31).to_ne_bytes());
            assert_eq!(t.lookup_bytes(&key), Some(i + 1));
            assert_eq!(t.take_bytes(&key), Some(i + 1));
        }
        assert!(t.is_empty());
    }

    /// Invariant: with every key hashed to one slot, lookups resolve by
    /// equality alone and unlinking from the middle of the chain keeps
    /// the rest reachable.
    #[test]
    fn single_chain_resolves_by_equality() {
        let mut t = ScalingTable::with_policy(4, WORD, OneSlot, Unbounded).unwrap();
        for k in 0..6usize {
            assert!(t.insert_bytes(&k.to_ne_bytes(), k + 100));
        }
        assert_eq!(t.take_bytes(&3usize.to_ne_bytes()), Some(103));
        for k in [0usize, 1, 2, 4, 5] {
            assert_eq!(t.lookup_bytes(&k.to_ne_bytes()), Some(k + 100));
        }
        assert_eq!(t.lookup_bytes(&3usize.to_ne_bytes()), None);
        for k in [0usize, 1, 2, 4, 5] {
            t.remove_bytes(&k.to_ne_bytes());
        }
    }

    /// Invariant: a denied bucket allocation fails the insert and leaves
    /// the table untouched.
    #[test]
    fn denied_bucket_allocation_leaves_table_unchanged() {
        let gate = TestGate::open();
        let mut t = ScalingTable::with_policy(4, WORD, WordKeys, gate.clone()).unwrap();
        t.insert(1, 10);

        gate.allow_buckets.set(false);
        assert!(!t.insert(2, 20));
        assert_eq!(t.len(), 1);
        assert_eq!(t.slot_count(), 4);
        assert_eq!(t.retrieve(1), 10);

        gate.allow_buckets.set(true);
        assert!(t.insert(2, 20));
        assert_eq!(t.retrieve(2), 20);
        t.remove(1);
        t.remove(2);
    }

    /// Invariant: a denied grow is swallowed — inserts keep succeeding
    /// into a denser table and everything stays retrievable; once the
    /// gate opens, the next trigger grows by a single doubling.
    #[test]
    fn denied_grow_degrades_but_stays_correct() {
        let gate = TestGate::open();
        let mut t = ScalingTable::with_policy(4, WORD, WordKeys, gate.clone()).unwrap();
        t.insert(0, 1);
        t.insert(1, 2);

        gate.allow_slots.set(false);
        for k in 2..10usize {
            assert!(t.insert(k, k + 1));
        }
        assert_eq!(t.len(), 10);
        assert_eq!(t.slot_count(), 4);
        for k in 0..10usize {
            assert_eq!(t.retrieve(k), k + 1);
        }

        gate.allow_slots.set(true);
        assert!(t.insert(10, 11));
        assert_eq!(t.slot_count(), 8);
        for k in 0..11usize {
            assert_eq!(t.retrieve(k), k + 1);
            t.remove(k);
        }
    }

    /// Invariant: a denied shrink keeps the table at its current size
    /// without affecting correctness.
    #[test]
    fn denied_shrink_is_swallowed() {
        let gate = TestGate::open();
        let mut t = ScalingTable::with_policy(4, WORD, WordKeys, gate.clone()).unwrap();
        for k in 0..9usize {
            t.insert(k, k + 1);
        }
        assert_eq!(t.slot_count(), 32);

        gate.allow_slots.set(false);
        for k in 2..9usize {
            assert_eq!(t.remove(k), k + 1);
        }
        assert_eq!(t.len(), 2);
        assert_eq!(t.slot_count(), 32);
        assert_eq!(t.retrieve(0), 1);
        assert_eq!(t.retrieve(1), 2);

        gate.allow_slots.set(true);
        assert_eq!(t.remove(1), 2);
        assert_eq!(t.slot_count(), 16);
        t.remove(0);
    }

    /// Invariant: invalid creation parameters fail before anything is
    /// allocated.
    #[test]
    fn create_validation() {
        assert!(matches!(ScalingTable::new(0), Err(CreateError::ZeroLength)));
        assert!(matches!(
            ScalingTable::with_policy(4, 0, WordKeys, Unbounded),
            Err(CreateError::ZeroKeySize)
        ));
        let gate = TestGate::open();
        gate.allow_slots.set(false);
        assert!(matches!(
            ScalingTable::with_policy(4, WORD, WordKeys, gate),
            Err(CreateError::AllocDenied)
        ));
    }

    /// Invariant: `visit` invokes the visitor exactly `len` times when it
    /// never breaks, and a break is propagated immediately.
    #[test]
    fn visit_completeness_and_early_exit() {
        let mut t = ScalingTable::new(4).unwrap();
        for k in 0..5usize {
            t.insert(k, k + 1);
        }

        let mut seen = 0;
        let done = t.visit(|_, _| {
            seen += 1;
            ControlFlow::<()>::Continue(())
        });
        assert_eq!(done, ControlFlow::Continue(()));
        assert_eq!(seen, 5);

        let mut visited = 0;
        let out = t.visit(|_, value| {
            visited += 1;
            if visited == 2 {
                ControlFlow::Break(value)
            } else {
                ControlFlow::Continue(())
            }
        });
        assert!(matches!(out, ControlFlow::Break(_)));
        assert_eq!(visited, 2);
        for k in 0..5usize {
            t.remove(k);
        }
    }

    /// Invariant: `iter` yields each live entry exactly once, matching
    /// the set of inserted pairs across resizes.
    #[test]
    fn iter_yields_each_entry_once() {
        let mut t = ScalingTable::new(4).unwrap();
        let mut expected = BTreeSet::new();
        for k in 0..20usize {
            t.insert(k, k * 3 + 1);
            expected.insert((k, k * 3 + 1));
        }
        let seen: BTreeSet<(usize, usize)> = t
            .iter()
            .map(|(key, value)| (usize::from_ne_bytes(key.try_into().unwrap()), value))
            .collect();
        assert_eq!(seen, expected);
        for k in 0..20usize {
            t.remove(k);
        }
    }

    /// Invariant: a wrong-length key is a caller bug and panics.
    #[test]
    #[should_panic(expected = "key length")]
    fn wrong_key_length_panics() {
        let mut t = ScalingTable::new(4).unwrap();
        t.insert_bytes(&[1, 2, 3], 9);
    }

    /// Dropping a nonempty table is a reported leak, cleaned up on a
    /// best-effort basis rather than a crash.
    #[test]
    fn drop_with_live_entries_is_best_effort() {
        let mut t = ScalingTable::new(4).unwrap();
        for k in 0..5usize {
            t.insert(k, k + 1);
        }
        drop(t);
    }

    /// Invariant: occupancy statistics agree with the scaling policy.
    #[cfg(feature = "stats")]
    #[test]
    fn stats_reflect_occupancy() {
        let mut t = ScalingTable::with_policy(4, WORD, OneSlot, Unbounded).unwrap();
        for k in 0..3usize {
            t.insert_bytes(&k.to_ne_bytes(), k + 1);
        }
        let s = t.stats();
        assert_eq!(s.slots, 8);
        assert_eq!(s.entries, 3);
        assert_eq!(s.empty_slots, 7);
        assert_eq!(s.longest_chain, 3);
        for k in 0..3usize {
            t.remove_bytes(&k.to_ne_bytes());
        }
    }
}
