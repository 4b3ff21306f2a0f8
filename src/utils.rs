//! # Some useful functions for simulating HARQ transmissions
//!
//! The [`random_bytes`] function returns a random transport block; [`bits_from_bytes`] and
//! [`bytes_from_bits`] convert between packed and unpacked bits; the [`bpsk_awgn_channel`]
//! function returns the LLR values at the output of a BPSK-AWGN channel corresponding to given
//! input bits, and [`quantize_llrs`] converts them to the 8-bit LLR values stored in soft
//! buffers; and the [`error_count`] function returns the number of errors in a sequence with
//! respect to a reference sequence.
//!
//! # Examples
//!
//! The code below illustrates the usage of the functions in this module.
//! ```
//! use harqbuf::{utils, Bit};
//!
//! let mut rng = rand::rng();
//! let num_bytes = 5;
//! let es_over_n0_db = 10.0;
//! let tb = utils::random_bytes(num_bytes, &mut rng);
//! let bits = utils::bits_from_bytes(&tb);
//! let llrs = utils::quantize_llrs(&utils::bpsk_awgn_channel(&bits, es_over_n0_db, &mut rng));
//! let bits_hat: Vec<Bit> = llrs
//!     .iter()
//!     .map(|&llr| if llr >= 0 { Bit::Zero } else { Bit::One })
//!     .collect();
//! let err_count = utils::error_count(&bits_hat, &bits);
//! ```

use itertools::Itertools;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::Bit;

/// Returns given number of random bytes.
///
/// # Parameters
///
/// - `num_bytes`: Number of random bytes to be generated.
///
/// - `rng`: Random number generator to be used.
///
/// # Returns
///
/// - `bytes`: Random bytes.
pub fn random_bytes<R: Rng>(num_bytes: usize, rng: &mut R) -> Vec<u8> {
    (0 .. num_bytes).map(|_| rng.random()).collect()
}

/// Returns bits of given bytes, most significant bit first.
#[must_use]
pub fn bits_from_bytes(bytes: &[u8]) -> Vec<Bit> {
    bytes
        .iter()
        .flat_map(|&byte| {
            (0 .. 8).rev().map(move |k| {
                if (byte >> k) & 1 == 1 {
                    Bit::One
                } else {
                    Bit::Zero
                }
            })
        })
        .collect()
}

/// Returns bytes packing given bits, most significant bit first.
///
/// If the number of bits is not a multiple of `8`, then the last byte is padded with zeros.
#[must_use]
pub fn bytes_from_bits(bits: &[Bit]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .chain(std::iter::repeat(&Bit::Zero))
                .take(8)
                .fold(0u8, |byte, &bit| (byte << 1) | bit as u8)
        })
        .collect_vec()
}

/// Returns LLR values at BPSK-AWGN channel output corresponding to given input bits.
///
/// # Parameters
///
/// - `bits`: Bits to be transmitted over the BPSK-AWGN channel.
///
/// - `es_over_n0_db`: Ratio (dB) of symbol energy to noise power spectral density at the BPSK-AWGN
///   channel output (if the BPSK symbols are `+1.0` and `-1.0`, then the noise variance is
///   `0.5 / 10f64.powf(0.1 * es_over_n0_db)`).
///
/// - `rng`: Random number generator to be used.
///
/// # Returns
///
/// - `bits_llr`: Log-likelihood-ratio (LLR) values at the BPSK-AWGN channel output corresponding
///   to the transmitted bits, with positive values indicating that `Zero` is more likely.
pub fn bpsk_awgn_channel<R: Rng>(bits: &[Bit], es_over_n0_db: f64, rng: &mut R) -> Vec<f64> {
    let es_over_n0 = 10f64.powf(0.1 * es_over_n0_db);
    let noise_var = 0.5 / es_over_n0;
    bits.iter()
        .map(|b| match b {
            Bit::Zero => 1f64,
            Bit::One => -1f64,
        })
        .map(|x| 4.0 * es_over_n0 * (x + noise_var.sqrt() * rng.sample::<f64, _>(StandardNormal)))
        .collect()
}

/// Returns 8-bit LLR values for given real LLR values.
///
/// Values are rounded away from zero and saturated to `[-127, 127]`, so that only an exact `0.0`
/// maps to `0` (which a decoder reads as "no information").
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize_llrs(llrs: &[f64]) -> Vec<i8> {
    llrs.iter()
        .map(|&x| (x.signum() * x.abs().ceil()).clamp(-127.0, 127.0) as i8)
        .collect()
}

/// Returns number of errors in a sequence with respect to a reference sequence.
///
/// # Parameters
///
/// - `seq`: Sequence in which errors must be counted.
///
/// - `ref_seq`: Reference sequence to which the given sequence is compared.
///
/// # Returns
///
/// - `err_count`: Number of positions in which the two sequences differ. If they are of different
///   lengths, then the longer sequence is effectively truncated to the length of the shorter one.
pub fn error_count<T: PartialEq>(seq: &[T], ref_seq: &[T]) -> usize {
    ref_seq
        .iter()
        .zip(seq.iter())
        .filter(|&(x, y)| x != y)
        .count()
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use Bit::{One, Zero};

    #[test]
    fn test_random_bytes() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(random_bytes(0, &mut rng).is_empty());
        let bytes = random_bytes(10000, &mut rng);
        let num_ones: u32 = bytes.iter().map(|byte| byte.count_ones()).sum();
        assert!(num_ones > 38000 && num_ones < 42000);
    }

    #[test]
    fn test_bits_from_bytes() {
        assert!(bits_from_bytes(&[]).is_empty());
        assert_eq!(
            bits_from_bytes(&[0xa1, 0x0f]),
            [One, Zero, One, Zero, Zero, Zero, Zero, One, Zero, Zero, Zero, Zero, One, One, One, One]
        );
    }

    #[test]
    fn test_bytes_from_bits() {
        assert!(bytes_from_bits(&[]).is_empty());
        assert_eq!(
            bytes_from_bits(&bits_from_bytes(&[0xa1, 0x0f, 0x80])),
            [0xa1, 0x0f, 0x80]
        );
        assert_eq!(bytes_from_bits(&[One, One, Zero]), [0xc0]);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_bpsk_awgn_channel() {
        let mut rng = StdRng::seed_from_u64(11);
        assert!(bpsk_awgn_channel(&[], 0.0, &mut rng).is_empty());
        let es_over_n0_db = 20f64;
        let num_bits = 10000;
        let bits = bits_from_bytes(&random_bytes(num_bits / 8, &mut rng));
        let bits_llr = bpsk_awgn_channel(&bits, es_over_n0_db, &mut rng);
        let es_over_n0 = 10f64.powf(0.1 * es_over_n0_db);
        let noise_var_est = bits_llr
            .iter()
            .zip(bits)
            .map(|(y, b)| match b {
                Zero => y - 4.0 * es_over_n0,
                One => y + 4.0 * es_over_n0,
            })
            .map(|x| x * x)
            .sum::<f64>()
            / f64::from(u32::try_from(num_bits).unwrap());
        assert!(noise_var_est > 7.2 * es_over_n0 && noise_var_est < 8.8 * es_over_n0);
    }

    #[test]
    fn test_quantize_llrs() {
        assert!(quantize_llrs(&[]).is_empty());
        assert_eq!(
            quantize_llrs(&[0.0, 0.01, -0.01, 2.5, -2.5, 300.0, -300.0]),
            [0, 1, -1, 3, -3, 127, -127]
        );
    }

    #[test]
    fn test_error_count() {
        assert_eq!(error_count(&[], &[One, Zero]), 0);
        assert_eq!(error_count(&[One, Zero], &[]), 0);
        // Longer `seq`
        let ref_seq = [One, Zero, Zero, One, One, One, Zero, Zero];
        let seq = [One, One, Zero, Zero, One, One, Zero, Zero, Zero, One];
        assert_eq!(error_count(&seq, &ref_seq), 2);
        // Shorter `seq`
        let ref_seq = [One, Zero, Zero, One, One, One, Zero, Zero, Zero, One];
        let seq = [One, One, Zero, Zero, One, One, Zero, Zero];
        assert_eq!(error_count(&seq, &ref_seq), 2);
    }
}
