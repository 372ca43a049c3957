//! Simulated leakage of the two HMAC compression calls
//!
//! A device computing HMAC over a two-word message runs one compression under
//! the inner secret and one under the outer secret. The simulator replays
//! both and records the per-round Hamming weight leakage of each.

use crate::compression::{HashState, Variant, BLOCK_WORDS};
use crate::error::AttackError;
use crate::key::Key;
use ndarray::{aview1, concatenate, s, Array2, ArrayView2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Number of random message words per trace.
pub const DATA_WORDS: usize = 2;

/// Default number of leakage samples per bulk trace.
pub const BULK_TRACE_SIZE: usize = 2;

/// Inner and outer hash states derived from a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Secrets {
    pub inner: HashState,
    pub outer: HashState,
}

/// Message words plus the leakage they produced, one row per trace.
#[derive(Debug, Clone)]
pub struct TraceSet {
    pub data: Array2<u64>,
    pub inner: Array2<f64>,
    pub outer: Option<Array2<f64>>,
}

impl TraceSet {
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct LeakageSimulator {
    variant: Variant,
    noise: Option<Normal<f64>>,
}

impl LeakageSimulator {
    /// A zero standard deviation disables noise.
    pub fn new(variant: Variant, noise_stddev: f64) -> Result<Self, AttackError> {
        if !noise_stddev.is_finite() || noise_stddev < 0.0 {
            return Err(AttackError::InvalidNoise(noise_stddev));
        }
        let noise = if noise_stddev > 0.0 {
            Some(Normal::new(0.0, noise_stddev).map_err(|_| AttackError::InvalidNoise(noise_stddev))?)
        } else {
            None
        };
        Ok(Self { variant, noise })
    }

    pub fn noiseless(variant: Variant) -> Self {
        Self {
            variant,
            noise: None,
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn noise_stddev(&self) -> f64 {
        self.noise.map(|n| n.std_dev()).unwrap_or(0.0)
    }

    /// Compresses `key ^ ipad` and `key ^ opad` from the standard IV.
    pub fn generate_secrets(&self, key: &Key) -> Secrets {
        let iv = self.variant.iv();
        Secrets {
            inner: self.variant.compress(&key.xor_pad(self.variant.ipad()), &iv),
            outer: self.variant.compress(&key.xor_pad(self.variant.opad()), &iv),
        }
    }

    /// Draws `count` random messages and records their leakage.
    ///
    /// Noise, when configured, is added independently to every sample.
    pub fn generate_traces<R: Rng + ?Sized>(
        &self,
        inner: &HashState,
        outer: Option<&HashState>,
        count: usize,
        trace_size: usize,
        rng: &mut R,
    ) -> TraceSet {
        let mask = self.variant.mask();
        let data = Array2::from_shape_fn((count, DATA_WORDS), |_| rng.random::<u64>() & mask);
        let mut set = self.simulate(inner, outer, data.view(), trace_size);

        if let Some(normal) = &self.noise {
            set.inner.mapv_inplace(|x| x + normal.sample(&mut *rng));
            if let Some(outer) = set.outer.as_mut() {
                outer.mapv_inplace(|x| x + normal.sample(&mut *rng));
            }
        }
        set
    }

    /// Noise-free leakage of fixed messages.
    pub fn simulate(
        &self,
        inner: &HashState,
        outer: Option<&HashState>,
        data: ArrayView2<u64>,
        trace_size: usize,
    ) -> TraceSet {
        let variant = self.variant;
        let count = data.nrows();
        let width = trace_size.min(variant.rounds());
        let mut inner_traces = Array2::zeros((count, width));
        let mut outer_traces = outer.map(|_| Array2::zeros((count, width)));
        let mut buf = vec![0.0; width];

        for (i, row) in data.rows().into_iter().enumerate() {
            let block = variant.inner_block(row[0], row[1]);
            let digest = variant.compress_into(&block, inner, &mut buf);
            inner_traces.row_mut(i).assign(&aview1(&buf));

            if let (Some(state), Some(traces)) = (outer, outer_traces.as_mut()) {
                variant.compress_into(&variant.outer_block(&digest), state, &mut buf);
                traces.row_mut(i).assign(&aview1(&buf));
            }
        }

        TraceSet {
            data: data.to_owned(),
            inner: inner_traces,
            outer: outer_traces,
        }
    }

    /// Outer-hash input blocks for `data`, computed under an inner state.
    pub fn outer_blocks(&self, inner: &HashState, data: ArrayView2<u64>) -> Array2<u64> {
        let variant = self.variant;
        let mut blocks = Array2::zeros((data.nrows(), BLOCK_WORDS));
        for (i, row) in data.rows().into_iter().enumerate() {
            let digest = variant.compress(&variant.inner_block(row[0], row[1]), inner);
            blocks.row_mut(i).assign(&aview1(&variant.outer_block(&digest)));
        }
        blocks
    }
}

/// Cumulative, append-only trace collection for one attack run.
#[derive(Debug, Clone)]
pub struct TracePool {
    data: Array2<u64>,
    inner: Array2<f64>,
    outer: Array2<f64>,
}

impl TracePool {
    pub fn new(set: TraceSet) -> Result<Self, AttackError> {
        let outer = set.outer.ok_or(AttackError::IncompleteTraceSet)?;
        Ok(Self {
            data: set.data,
            inner: set.inner,
            outer,
        })
    }

    pub fn append(&mut self, set: TraceSet) -> Result<(), AttackError> {
        let outer = set.outer.ok_or(AttackError::IncompleteTraceSet)?;
        self.data = concatenate(Axis(0), &[self.data.view(), set.data.view()])?;
        self.inner = concatenate(Axis(0), &[self.inner.view(), set.inner.view()])?;
        self.outer = concatenate(Axis(0), &[self.outer.view(), outer.view()])?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> ArrayView2<'_, u64> {
        self.data.view()
    }

    pub fn inner_traces(&self) -> ArrayView2<'_, f64> {
        self.inner.view()
    }

    pub fn outer_traces(&self) -> ArrayView2<'_, f64> {
        self.outer.view()
    }

    /// The first `count` messages.
    pub fn data_prefix(&self, count: usize) -> ArrayView2<'_, u64> {
        self.data.slice(s![..count.min(self.len()), ..])
    }

    /// Outer-hash traces of the first `count` messages.
    pub fn outer_prefix(&self, count: usize) -> ArrayView2<'_, f64> {
        self.outer.slice(s![..count.min(self.len()), ..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::{Hmac, Mac};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use sha2::{Sha256, Sha512};

    fn be_bytes(words: &[u64], variant: Variant) -> Vec<u8> {
        let word_bytes = variant.bits() as usize / 8;
        words
            .iter()
            .flat_map(|w| w.to_be_bytes()[8 - word_bytes..].to_vec())
            .collect()
    }

    fn simulated_hmac(variant: Variant, key: &Key, d0: u64, d1: u64) -> Vec<u8> {
        let sim = LeakageSimulator::noiseless(variant);
        let secrets = sim.generate_secrets(key);
        let data = Array2::from_shape_vec((1, 2), vec![d0, d1]).unwrap();
        let blocks = sim.outer_blocks(&secrets.inner, data.view());
        let block: [u64; BLOCK_WORDS] = blocks.row(0).to_vec().try_into().unwrap();
        let tag = variant.compress(&block, &secrets.outer);
        be_bytes(tag.words(), variant)
    }

    #[test]
    fn test_chain_matches_hmac_sha256() {
        let variant = Variant::Sha256;
        let key = Key::from_hex("0123456789abcdef", variant).unwrap();
        let (d0, d1) = (0xdeadbeef, 0x01020304);

        let mut mac = Hmac::<Sha256>::new_from_slice(&be_bytes(key.words(), variant)).unwrap();
        mac.update(&be_bytes(&[d0, d1], variant));
        let expected = mac.finalize().into_bytes().to_vec();

        assert_eq!(simulated_hmac(variant, &key, d0, d1), expected);
    }

    #[test]
    fn test_chain_matches_hmac_sha512() {
        let variant = Variant::Sha512;
        let key = Key::random(&mut StdRng::seed_from_u64(3), variant);
        let (d0, d1) = (0x0011223344556677, 0x8899aabbccddeeff);

        let mut mac = Hmac::<Sha512>::new_from_slice(&be_bytes(key.words(), variant)).unwrap();
        mac.update(&be_bytes(&[d0, d1], variant));
        let expected = mac.finalize().into_bytes().to_vec();

        assert_eq!(simulated_hmac(variant, &key, d0, d1), expected);
    }

    #[test]
    fn test_generate_traces_shapes() {
        let sim = LeakageSimulator::noiseless(Variant::Sha256);
        let secrets = sim.generate_secrets(&Key::from_hex("", Variant::Sha256).unwrap());
        let mut rng = StdRng::seed_from_u64(1);

        let set = sim.generate_traces(&secrets.inner, Some(&secrets.outer), 16, 2, &mut rng);
        assert_eq!(set.data.dim(), (16, DATA_WORDS));
        assert_eq!(set.inner.dim(), (16, 2));
        assert_eq!(set.outer.as_ref().unwrap().dim(), (16, 2));

        let set = sim.generate_traces(&secrets.inner, None, 4, 1000, &mut rng);
        assert_eq!(set.inner.dim(), (4, 64));
        assert!(set.outer.is_none());
    }

    #[test]
    fn test_generate_traces_deterministic_given_seed() {
        let sim = LeakageSimulator::new(Variant::Sha256, 2.0).unwrap();
        let secrets = sim.generate_secrets(&Key::from_hex("42", Variant::Sha256).unwrap());

        let a = sim.generate_traces(&secrets.inner, Some(&secrets.outer), 8, 2, &mut StdRng::seed_from_u64(9));
        let b = sim.generate_traces(&secrets.inner, Some(&secrets.outer), 8, 2, &mut StdRng::seed_from_u64(9));
        assert_eq!(a.data, b.data);
        assert_eq!(a.inner, b.inner);
        assert_eq!(a.outer, b.outer);
    }

    #[test]
    fn test_noise_perturbs_only_samples() {
        let variant = Variant::Sha256;
        let noisy = LeakageSimulator::new(variant, 1.0).unwrap();
        let clean = LeakageSimulator::noiseless(variant);
        let secrets = clean.generate_secrets(&Key::from_hex("aa", variant).unwrap());

        let set = noisy.generate_traces(&secrets.inner, Some(&secrets.outer), 32, 4, &mut StdRng::seed_from_u64(5));
        let replay = clean.simulate(&secrets.inner, Some(&secrets.outer), set.data.view(), 4);

        assert_ne!(set.inner, replay.inner);
        let diff = &set.inner - &replay.inner;
        let mean = diff.mean().unwrap();
        assert!(mean.abs() < 0.5);
        assert!(set.inner.iter().any(|x| x.fract() != 0.0));
    }

    #[test]
    fn test_noiseless_samples_are_integral() {
        let sim = LeakageSimulator::new(Variant::Sha512, 0.0).unwrap();
        let secrets = sim.generate_secrets(&Key::from_hex("", Variant::Sha512).unwrap());
        let set = sim.generate_traces(&secrets.inner, Some(&secrets.outer), 8, 2, &mut StdRng::seed_from_u64(5));
        assert!(set.inner.iter().all(|x| x.fract() == 0.0));
        assert_eq!(sim.noise_stddev(), 0.0);
    }

    #[test]
    fn test_invalid_noise_rejected() {
        assert!(LeakageSimulator::new(Variant::Sha256, -1.0).is_err());
        assert!(LeakageSimulator::new(Variant::Sha256, f64::NAN).is_err());
    }

    #[test]
    fn test_trace_pool_appends() {
        let sim = LeakageSimulator::noiseless(Variant::Sha256);
        let secrets = sim.generate_secrets(&Key::from_hex("", Variant::Sha256).unwrap());
        let mut rng = StdRng::seed_from_u64(11);

        let first = sim.generate_traces(&secrets.inner, Some(&secrets.outer), 4, 2, &mut rng);
        let first_data = first.data.clone();
        let mut pool = TracePool::new(first).unwrap();
        pool.append(sim.generate_traces(&secrets.inner, Some(&secrets.outer), 4, 2, &mut rng))
            .unwrap();

        assert_eq!(pool.len(), 8);
        assert_eq!(pool.inner_traces().nrows(), 8);
        assert_eq!(pool.outer_traces().nrows(), 8);
        assert_eq!(pool.data_prefix(4), first_data.view());
        assert_eq!(pool.outer_prefix(100).nrows(), 8);
    }

    #[test]
    fn test_trace_pool_requires_outer_traces() {
        let sim = LeakageSimulator::noiseless(Variant::Sha256);
        let secrets = sim.generate_secrets(&Key::from_hex("", Variant::Sha256).unwrap());
        let set = sim.generate_traces(&secrets.inner, None, 4, 2, &mut StdRng::seed_from_u64(1));
        assert!(matches!(TracePool::new(set), Err(AttackError::IncompleteTraceSet)));
    }
}
