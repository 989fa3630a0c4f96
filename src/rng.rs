//! C2 — deterministic RNG stream splitting (spec §4.2). Grounded on
//! `original_source/.../engine.py::_run_simulation_batch`, which seeds each
//! batch's `np.random.RandomState` with `seed + start_idx`; and on the
//! teacher's `ChaCha20Rng::seed_from_u64(...)` idiom in
//! `samthorold-rins/src/perils.rs`/`simulation.rs`.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Mix a root seed with a batch start index into a single `u64` seed.
///
/// Plain addition (`seed + start_idx`, as the Python original does) would
/// make nearby batches share most of their seed bits under ChaCha's
/// counter-based stream construction; this finalizer (splitmix64's mixing
/// step) decorrelates adjacent batch seeds while remaining a pure,
/// deterministic function of `(root_seed, batch_start_index)` — the
/// property spec §4.2 actually requires ("or equivalent deterministic
/// mixing").
fn mix(root_seed: u64, batch_start_index: u64) -> u64 {
    let mut z = root_seed.wrapping_add(batch_start_index.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Construct the RNG for one batch. Given the same `(root_seed,
/// batch_start_index)` this always returns bit-identical state, independent
/// of how batches are scheduled across workers (spec §4.2 rationale).
pub fn batch_rng(root_seed: u64, batch_start_index: u64) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(mix(root_seed, batch_start_index))
}

/// The single-stream RNG for a sequential (non-parallel) run.
pub fn sequential_rng(root_seed: u64) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(root_seed)
}
