use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Length of the random label prepended to the test domain
pub const LABEL_LEN: usize = 8;

/// Random ASCII-letter label of length `len`.
pub fn random_label<R: Rng>(rng: &mut R, len: usize) -> String {
	(0..len)
		.map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
		.collect()
}

/// Pregenerate `count` synthetic names under `base`.
///
/// Each name carries a fresh random label, so it almost certainly does not
/// exist and an honest resolver has to answer NXDOMAIN.
pub fn synthetic_names<R: Rng>(rng: &mut R, count: u32, base: &str) -> Vec<String> {
	let base = base.trim_end_matches('.');
	(0..count)
		.map(|_| format!("{}.{}", random_label(rng, LABEL_LEN), base))
		.collect()
}

/// Seeded RNG when a seed is given, entropy otherwise.
pub fn name_rng(seed: Option<u64>) -> StdRng {
	match seed {
		Some(seed) => StdRng::seed_from_u64(seed),
		None => StdRng::from_entropy(),
	}
}
