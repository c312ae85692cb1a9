//! Row initialization policies
//!
//! Initializers run whenever tensor rows come into existence, at
//! construction and on every growth step. `Uniform` derives each row's
//! values from the seed and the row index alone, so a tensor grown in
//! several steps holds exactly the values it would have held after one
//! big step. The shard store leans on that to keep staged sparse growth
//! reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::tensor::Element;

/// Value initialization policy for tensor rows.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Init {
    /// Every element zero.
    #[default]
    Zeros,
    /// Every element the given value, cast to the element type.
    Fill(f64),
    /// Elements drawn uniformly from `[low, high)`, deterministic per
    /// seed and row. When `high <= low` every element is `low`.
    Uniform {
        /// Inclusive lower bound
        low: f64,
        /// Exclusive upper bound
        high: f64,
        /// Base seed; each row derives its own stream from it
        seed: u64,
    },
}

impl Init {
    /// Fill one row's worth of elements for row index `row`.
    pub(crate) fn fill_row<T: Element>(&self, row: usize, out: &mut [T]) {
        match *self {
            Init::Zeros => out.fill(T::from_f64(0.0)),
            Init::Fill(value) => out.fill(T::from_f64(value)),
            Init::Uniform { low, high, seed } => {
                if high <= low {
                    out.fill(T::from_f64(low));
                    return;
                }
                let mut rng = row_rng(seed, row);
                for slot in out.iter_mut() {
                    *slot = T::from_f64(rng.random_range(low..high));
                }
            }
        }
    }
}

/// Per-row generator. Mixing the row index through splitmix64 keeps
/// adjacent rows' streams uncorrelated under `seed_from_u64`.
fn row_rng(seed: u64, row: usize) -> StdRng {
    let mut mixed = seed ^ (row as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    mixed = (mixed ^ (mixed >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    mixed = (mixed ^ (mixed >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    StdRng::seed_from_u64(mixed ^ (mixed >> 31))
}
