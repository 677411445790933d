//! scaling-hashmap: a single-threaded, self-scaling hash table with
//! chained buckets, built for in-process bookkeeping: handle tables,
//! address maps, resource registries.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep the scaling engine in small, separately verifiable
//!   layers so each piece can be reasoned about independently.
//! - Layers:
//!   - `KeyPolicy` / `WordKeys`: pluggable hash + equality over
//!     fixed-length byte keys; the default treats keys as arrays of
//!     machine words.
//!   - `AllocGate`: admission gate in front of every slot-array and
//!     bucket allocation; a denial takes the operation's documented
//!     failure path instead of aborting anything.
//!   - `Reentrancy`: per-table call-depth detector; overlapping use of
//!     one table is reported on entry and fatal at exit.
//!   - `ScalingTable`: the chained-bucket engine with automatic
//!     grow/shrink and wholesale slot-array swaps on resize.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` by design (no atomics); callers
//!   serialize access per table instance.
//! - Values are opaque machine words, never interpreted by the table;
//!   0 is reserved as the absent sentinel on the word surface.
//! - Keys are fixed-length byte buffers, copied into the bucket at
//!   insert time; the length is fixed for the table's lifetime.
//! - Resize is inline and best-effort: a denied grow or shrink never
//!   fails the insert or remove that triggered it, it only changes
//!   future chain lengths.
//!
//! Scaling policy
//! - Grow to twice the slot count when `count * 2 > slots`; shrink to
//!   half (never below the creation-time minimum) when
//!   `slots > count * 4`. Both checks run after the mutation that made
//!   them true, at most one resize per operation.
//!
//! Reentrancy policy
//! - The guard detects, it does not lock. Entering a table that is
//!   already inside a call logs the violation with a backtrace and
//!   proceeds; the exit check then treats the overlap as fatal.
//!   Visitors and iterators hold the guard, so calling back into the
//!   table from inside them is exactly the misuse the guard catches.
//!
//! Notes and non-goals
//! - No internal locking; distinct tables are fully independent.
//! - No persistence or wire format.
//! - Chain order is unspecified: rehash reverses chains, so entries
//!   sharing a key may be observed in either age order after a resize.
//! - Removal during iteration is not supported.

mod gate;
pub mod policy;
mod reentrancy;
pub mod table;
mod table_proptest;

// Public surface
pub use gate::{AllocGate, Unbounded};
pub use policy::{KeyPolicy, WordKeys};
pub use reentrancy::{Reentrancy, ReentrancyGuard};
#[cfg(feature = "stats")]
pub use table::TableStats;
pub use table::{CreateError, Iter, ScalingTable, ABSENT};
