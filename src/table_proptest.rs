#![cfg(test)]

// Property tests for ScalingTable kept inside the crate so they can
// assert against internal sizing without feature gates.

use crate::gate::Unbounded;
use crate::policy::KeyPolicy;
use crate::table::{ScalingTable, ABSENT};
use core::mem::size_of;
use core::ops::ControlFlow;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::HashMap;

// Pool-indexed operations to improve shrinking: indices shrink to
// earlier keys, pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, usize),
    Remove(usize),
    Retrieve(usize),
    Visit,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<usize>, Vec<OpI>)> {
    proptest::collection::vec(any::<usize>(), 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let op = prop_oneof![
            (idx.clone(), any::<usize>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            idx.clone().prop_map(OpI::Remove),
            idx.clone().prop_map(OpI::Retrieve),
            Just(OpI::Visit),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

/// Model of the deterministic sizing under an always-admitting gate:
/// one doubling after an insert that leaves the table more than half
/// full, one floored halving after a removal that leaves it less than a
/// quarter full.
struct SizeModel {
    slots: usize,
    minimum: usize,
}

impl SizeModel {
    fn new(initial: usize) -> Self {
        Self {
            slots: initial,
            minimum: initial,
        }
    }
    fn inserted(&mut self, count: usize) {
        if count * 2 > self.slots {
            self.slots *= 2;
        }
    }
    fn removed(&mut self, count: usize) {
        if self.slots > count * 4 && self.slots > self.minimum {
            self.slots = (self.slots / 2).max(self.minimum);
        }
    }
}

// The value model is a stack per key: inserts of a duplicated key
// shadow older entries. Chain order among duplicates is unspecified
// once a resize has happened, so lookups assert membership (and exact
// value when the key is unique) rather than stack order; removal pops
// whichever duplicate the table returned.
fn run_state_machine<P: KeyPolicy>(
    mut sut: ScalingTable<P, Unbounded>,
    pool: &[usize],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut sizes = SizeModel::new(sut.slot_count());
    let mut count = 0usize;

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = pool[i];
                prop_assert!(sut.insert_bytes(&k.to_ne_bytes(), v));
                model.entry(k).or_default().push(v);
                count += 1;
                sizes.inserted(count);
            }
            OpI::Remove(i) => {
                let k = pool[i];
                let got = sut.take_bytes(&k.to_ne_bytes());
                match model.get_mut(&k) {
                    None => prop_assert_eq!(got, None),
                    Some(stack) => {
                        let v = match got {
                            Some(v) => v,
                            None => return Err(TestCaseError::fail("present key not removed")),
                        };
                        let pos = stack.iter().position(|&x| x == v);
                        prop_assert!(pos.is_some(), "removed value not among stored duplicates");
                        stack.remove(pos.unwrap());
                        if stack.is_empty() {
                            model.remove(&k);
                        }
                        count -= 1;
                        sizes.removed(count);
                    }
                }
            }
            OpI::Retrieve(i) => {
                let k = pool[i];
                let got = sut.lookup_bytes(&k.to_ne_bytes());
                match model.get(&k) {
                    None => prop_assert_eq!(got, None),
                    Some(stack) => {
                        let v = match got {
                            Some(v) => v,
                            None => return Err(TestCaseError::fail("present key not found")),
                        };
                        prop_assert!(stack.contains(&v));
                        if stack.len() == 1 {
                            prop_assert_eq!(v, stack[0]);
                        }
                    }
                }
                // The sentinel surface must agree with the Option one.
                prop_assert_eq!(sut.retrieve_bytes(&k.to_ne_bytes()), got.unwrap_or(ABSENT));
            }
            OpI::Visit => {
                let mut seen: Vec<(usize, usize)> = Vec::new();
                let flow = sut.visit(|key, value| {
                    seen.push((usize::from_ne_bytes(key.try_into().unwrap()), value));
                    ControlFlow::<()>::Continue(())
                });
                prop_assert_eq!(flow, ControlFlow::Continue(()));
                seen.sort_unstable();
                let mut want: Vec<(usize, usize)> = model
                    .iter()
                    .flat_map(|(k, vs)| vs.iter().map(move |v| (*k, *v)))
                    .collect();
                want.sort_unstable();
                prop_assert_eq!(seen, want);
            }
        }

        // Post-conditions after each op
        prop_assert_eq!(sut.len(), count);
        prop_assert_eq!(sut.slot_count(), sizes.slots);
        prop_assert!(sut.slot_count() >= sut.minimum_size());
    }

    // Drain so the table drops empty.
    let keys: Vec<usize> = model.keys().copied().collect();
    for k in keys {
        while sut.take_bytes(&k.to_ne_bytes()).is_some() {}
    }
    Ok(())
}

// Property: state-machine equivalence against a per-key stack model.
// Invariants exercised across random operation sequences:
// - `len` equals inserts minus successful removals after every op.
// - Retrieval agrees between the Option and sentinel surfaces, and
//   always resolves a present key to one of its stored values.
// - `visit` yields exactly the live multiset of entries.
// - The slot count follows the grow/shrink policy deterministically and
//   never falls below the creation-time minimum.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let sut = ScalingTable::new(4).unwrap();
        run_state_machine(sut, &pool, ops)?;
    }
}

/// Policy that funnels every key into one chain to stress equality
/// resolution and unlink order under worst-case collisions.
struct OneSlot;

impl KeyPolicy for OneSlot {
    fn hash(&self, _key: &[u8], _table_len: usize) -> u32 {
        0
    }
    fn eq(&self, a: &[u8], b: &[u8]) -> bool {
        a == b
    }
}

// Property: the same invariants hold when every entry collides into a
// single chain, including the sizing model (slot indices never affect
// the load-factor arithmetic).
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut =
            ScalingTable::with_policy(4, size_of::<usize>(), OneSlot, Unbounded).unwrap();
        run_state_machine(sut, &pool, ops)?;
    }
}
