//! Space-filling initial design.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

/// Latin hypercube sample of `n` points in the `dims`-dimensional unit cube.
///
/// Each dimension is cut into `n` equal strata and every stratum holds
/// exactly one point. The same seed always yields the same design.
pub fn latin_hypercube(n: usize, dims: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut points = vec![vec![0.0; dims]; n];

    for d in 0..dims {
        let mut strata: Vec<usize> = (0..n).collect();
        strata.shuffle(&mut rng);
        for (point, stratum) in points.iter_mut().zip(strata) {
            point[d] = (stratum as f64 + rng.gen::<f64>()) / n as f64;
        }
    }

    points
}
