//! Decoder interface and reference soft-combining decoder
//!
//! The [`Decoder`] trait is the seam between soft-buffer bookkeeping and forward error
//! correction: given the LLR values of one transmission and the soft buffer reserved for it, a
//! decoder combines the LLR values into the soft buffer, decodes every codeblock, records the CRC
//! outcome of each codeblock in the soft buffer, and returns the transport block.
//!
//! [`ReferenceDecoder`] is a deliberately simple implementation for simulation and testing. The
//! transport block is split into codeblocks, each protected by a 24-bit CRC, and the bits of each
//! codeblock are repeated cyclically over its share of the transmission, starting at an offset
//! that depends on the redundancy version. The [`encoder`] function produces such transmissions.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{utils, Bit, Error, SoftBuffer};

/// Number of CRC bits attached to each codeblock
pub const CRC_LEN: usize = 24;

/// Generator polynomial of the codeblock CRC (CRC24A of 3GPP TS 38.212, without the `x^24` term)
const CRC24A_POLY: u32 = 0x0086_4CFB;

/// Segmentation and decoding configuration of one transport block
#[derive(Clone, Eq, Hash, PartialEq, Debug, Copy, Deserialize, Serialize)]
pub struct SegmentationConfig {
    /// Transport block size in bits (must be a multiple of `8`)
    pub tbs: usize,
    /// Redundancy version (`0` to `3`)
    #[serde(default)]
    pub rv: u8,
    /// Maximum number of bits per codeblock, including the CRC
    #[serde(default = "default_max_codeblock_info_bits")]
    pub max_codeblock_info_bits: usize,
    /// Maximum number of decoding attempts per codeblock
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Slot of the transmission, used to advance the logical time of the buffer pool
    #[serde(default)]
    pub slot: Option<u64>,
}

/// Default for [`SegmentationConfig::max_codeblock_info_bits`]
fn default_max_codeblock_info_bits() -> usize {
    8448
}

/// Default for [`SegmentationConfig::max_iterations`]
fn default_max_iterations() -> u32 {
    6
}

impl SegmentationConfig {
    /// Returns configuration for a transport block of `tbs` bits with default decoding settings.
    #[must_use]
    pub fn new(tbs: usize, rv: u8) -> Self {
        Self {
            tbs,
            rv,
            max_codeblock_info_bits: default_max_codeblock_info_bits(),
            max_iterations: default_max_iterations(),
            slot: None,
        }
    }

    /// Checks validity of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `tbs` is `0` or not a multiple of `8`, if `rv` exceeds `3`, if
    /// `max_codeblock_info_bits` does not exceed the CRC length, or if `max_iterations` is `0`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.tbs == 0 {
            return Err(Error::InvalidArgument(
                "Transport block size must be a positive integer".to_string(),
            ));
        }
        if self.tbs % 8 != 0 {
            return Err(Error::InvalidArgument(format!(
                "Transport block size of {} bits: bit length not byte-aligned",
                self.tbs
            )));
        }
        if self.rv > 3 {
            return Err(Error::InvalidArgument(format!(
                "Redundancy version must be in the range [0, 3] (found {})",
                self.rv
            )));
        }
        if self.max_codeblock_info_bits <= CRC_LEN {
            return Err(Error::InvalidArgument(format!(
                "Maximum codeblock size must exceed {CRC_LEN} bits (found {})",
                self.max_codeblock_info_bits
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidArgument(
                "Maximum number of iterations must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns number of payload bits in each codeblock.
    fn payload_sizes(&self) -> Result<Vec<usize>, Error> {
        self.validate()?;
        let max_payload = self.max_codeblock_info_bits - CRC_LEN;
        let nof_codeblocks = self.tbs.div_ceil(max_payload);
        let base = self.tbs / nof_codeblocks;
        let nof_longer = self.tbs % nof_codeblocks;
        Ok((0 .. nof_codeblocks)
            .map(|cb| if cb < nof_longer { base + 1 } else { base })
            .collect())
    }
}

/// Decoding statistics of one transport block
#[derive(Clone, PartialEq, Debug, Copy, Default, Deserialize, Serialize)]
pub struct DecodeStats {
    /// `true` if every codeblock passed its CRC
    pub crc_ok: bool,
    /// Maximum number of iterations over the codeblocks decoded in this call
    pub ldpc_iterations_max: u32,
    /// Average number of iterations over the codeblocks decoded in this call
    pub ldpc_iterations_mean: f64,
}

impl DecodeStats {
    /// Returns statistics for given CRC outcome and per-codeblock iteration counts.
    fn new(crc_ok: bool, iterations: &[u32]) -> Self {
        let ldpc_iterations_mean = if iterations.is_empty() {
            0.0
        } else {
            f64::from(iterations.iter().sum::<u32>())
                / f64::from(u32::try_from(iterations.len()).unwrap_or(u32::MAX))
        };
        Self {
            crc_ok,
            ldpc_iterations_max: iterations.iter().copied().max().unwrap_or(0),
            ldpc_iterations_mean,
        }
    }
}

/// Forward-error-correction decoder operating on soft buffers
pub trait Decoder {
    /// Returns the number of codeblocks of a transport block.
    ///
    /// # Parameters
    ///
    /// - `cfg`: Segmentation configuration of the transport block.
    ///
    /// - `nof_llrs`: Number of LLR values in the transmission.
    ///
    /// - `codeblock_size`: Number of LLR values that a soft buffer stores per codeblock.
    ///
    /// # Errors
    ///
    /// Returns an error if a transmission with these parameters cannot be decoded.
    fn nof_codeblocks(
        &self,
        cfg: &SegmentationConfig,
        nof_llrs: usize,
        codeblock_size: usize,
    ) -> Result<usize, Error>;

    /// Combines LLR values into a soft buffer and decodes the transport block.
    ///
    /// # Parameters
    ///
    /// - `llrs`: LLR values of the transmission, with positive values indicating that `Zero` is
    ///   more likely.
    ///
    /// - `softbuffer`: Soft buffer of the transport block. Its CRC flags are updated.
    ///
    /// - `cfg`: Segmentation configuration of the transport block.
    ///
    /// # Returns
    ///
    /// - `tb`: Decoded transport block, `cfg.tbs / 8` bytes long.
    ///
    /// - `stats`: Decoding statistics.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving `softbuffer` untouched, if the inputs are inconsistent.
    fn decode(
        &mut self,
        llrs: &[i8],
        softbuffer: &mut SoftBuffer,
        cfg: &SegmentationConfig,
    ) -> Result<(Vec<u8>, DecodeStats), Error>;
}

/// Reference decoder for cyclic-repetition codeblocks with CRC
///
/// LLR values of each transmission are added (with saturation) to the soft buffer. A codeblock
/// that passed its CRC in an earlier call is not decoded again until its CRC flag is reset. A
/// codeblock with any zero combined LLR value is treated as undecodable. Otherwise, the first
/// iteration slices the combined LLR values, and each further iteration flips one of the least
/// reliable bits, until the CRC passes or `max_iterations` is reached.
#[derive(Clone, Eq, PartialEq, Debug, Copy, Default)]
pub struct ReferenceDecoder;

impl Decoder for ReferenceDecoder {
    fn nof_codeblocks(
        &self,
        cfg: &SegmentationConfig,
        nof_llrs: usize,
        codeblock_size: usize,
    ) -> Result<usize, Error> {
        let payload_sizes = cfg.payload_sizes()?;
        let nof_codeblocks = payload_sizes.len();
        if nof_llrs < nof_codeblocks {
            return Err(Error::InvalidArgument(format!(
                "Expected at least {nof_codeblocks} LLR values (found {nof_llrs})"
            )));
        }
        let longest = payload_sizes[0] + CRC_LEN;
        if longest > codeblock_size {
            return Err(Error::InvalidArgument(format!(
                "Codeblocks of {longest} bits do not fit in soft buffers of size {codeblock_size}"
            )));
        }
        Ok(nof_codeblocks)
    }

    fn decode(
        &mut self,
        llrs: &[i8],
        softbuffer: &mut SoftBuffer,
        cfg: &SegmentationConfig,
    ) -> Result<(Vec<u8>, DecodeStats), Error> {
        let nof_codeblocks = self.nof_codeblocks(cfg, llrs.len(), softbuffer.codeblock_size())?;
        if nof_codeblocks != softbuffer.nof_codeblocks() {
            return Err(Error::InvalidArgument(format!(
                "Transport block has {nof_codeblocks} codeblocks, but soft buffer has {}",
                softbuffer.nof_codeblocks()
            )));
        }
        let payload_sizes = cfg.payload_sizes()?;
        let mut tb_bits = Vec::with_capacity(cfg.tbs);
        let mut iterations = Vec::with_capacity(nof_codeblocks);
        for (cb, (&payload_size, cb_llrs)) in payload_sizes
            .iter()
            .zip(rate_match_ranges(llrs.len(), nof_codeblocks).map(|range| &llrs[range]))
            .enumerate()
        {
            let cb_len = payload_size + CRC_LEN;
            if softbuffer.codeblocks_crc()[cb] {
                let bits = slice_llrs(&softbuffer.codeblock(cb)[.. cb_len]);
                tb_bits.extend(bits.into_iter().take(payload_size));
                continue;
            }
            let combined = &mut softbuffer.codeblock_mut(cb)[.. cb_len];
            let k0 = usize::from(cfg.rv) * cb_len / 4;
            for (j, &llr) in cb_llrs.iter().enumerate() {
                let pos = (k0 + j) % cb_len;
                combined[pos] = combined[pos].saturating_add(llr);
            }
            let (bits, crc_ok, num_iter) = decode_codeblock(combined, cfg.max_iterations);
            softbuffer.codeblocks_crc_mut()[cb] = crc_ok;
            iterations.push(num_iter);
            tb_bits.extend(bits.into_iter().take(payload_size));
        }
        let stats = DecodeStats::new(softbuffer.all_crc_ok(), &iterations);
        Ok((utils::bytes_from_bits(&tb_bits), stats))
    }
}

/// Returns bits transmitted for a transport block with the reference code.
///
/// # Parameters
///
/// - `tb`: Transport block, `cfg.tbs / 8` bytes long.
///
/// - `cfg`: Segmentation configuration (including the redundancy version).
///
/// - `nof_bits`: Number of bits to be transmitted.
///
/// # Errors
///
/// Returns an error if `cfg` is invalid, if the length of `tb` does not match `cfg.tbs`, or if
/// `nof_bits` is less than the number of codeblocks.
///
/// # Examples
///
/// ```
/// use harqbuf::decoder::{encoder, Decoder, ReferenceDecoder, SegmentationConfig};
/// use harqbuf::{utils, BufferIdentifier, BufferPool, PoolConfig};
///
/// let cfg = SegmentationConfig::new(64, 0);
/// let tb = [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0];
/// let bits = encoder(&tb, &cfg, 100)?;
/// let llrs = utils::quantize_llrs(&utils::bpsk_awgn_channel(&bits, 20.0, &mut rand::rng()));
/// let mut pool = BufferPool::new(PoolConfig {
///     max_codeblock_size: 128,
///     max_buffers: 1,
///     max_codeblocks: 1,
///     expire_timeout_slots: 10,
/// })?;
/// let softbuffer = pool.reserve(BufferIdentifier::new(0x4601, 0), 1, true)?;
/// let (tb_hat, stats) = ReferenceDecoder.decode(&llrs, softbuffer, &cfg)?;
/// assert!(stats.crc_ok);
/// assert_eq!(tb_hat, tb);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn encoder(tb: &[u8], cfg: &SegmentationConfig, nof_bits: usize) -> Result<Vec<Bit>, Error> {
    let payload_sizes = cfg.payload_sizes()?;
    if tb.len() * 8 != cfg.tbs {
        return Err(Error::InvalidArgument(format!(
            "Expected transport block of {} bytes (found {})",
            cfg.tbs / 8,
            tb.len()
        )));
    }
    if nof_bits < payload_sizes.len() {
        return Err(Error::InvalidArgument(format!(
            "Cannot transmit {} codeblocks in {nof_bits} bits",
            payload_sizes.len()
        )));
    }
    let tb_bits = utils::bits_from_bytes(tb);
    let mut code_bits = Vec::with_capacity(nof_bits);
    let mut offset = 0;
    for (&payload_size, range) in payload_sizes
        .iter()
        .zip(rate_match_ranges(nof_bits, payload_sizes.len()))
    {
        let mut cb_bits = tb_bits[offset .. offset + payload_size].to_vec();
        offset += payload_size;
        let crc = crc24(&cb_bits);
        cb_bits.extend((0 .. CRC_LEN).rev().map(|k| {
            if (crc >> k) & 1 == 1 {
                Bit::One
            } else {
                Bit::Zero
            }
        }));
        let cb_len = cb_bits.len();
        let k0 = usize::from(cfg.rv) * cb_len / 4;
        code_bits.extend((0 .. range.len()).map(|j| cb_bits[(k0 + j) % cb_len]));
    }
    Ok(code_bits)
}

/// Returns ranges of the transmission assigned to each codeblock (the first codeblocks receive
/// one more value when the transmission length is not a multiple of the codeblock count).
fn rate_match_ranges(
    nof_values: usize,
    nof_codeblocks: usize,
) -> impl Iterator<Item = std::ops::Range<usize>> {
    let base = nof_values / nof_codeblocks;
    let nof_longer = nof_values % nof_codeblocks;
    (0 .. nof_codeblocks).scan(0, move |start, cb| {
        let len = if cb < nof_longer { base + 1 } else { base };
        let range = *start .. *start + len;
        *start += len;
        Some(range)
    })
}

/// Returns bit decisions, CRC outcome and number of iterations for a codeblock.
fn decode_codeblock(llrs: &[i8], max_iterations: u32) -> (Vec<Bit>, bool, u32) {
    let mut bits = slice_llrs(llrs);
    if llrs.contains(&0) {
        return (bits, false, 0);
    }
    if crc24(&bits) == 0 {
        return (bits, true, 1);
    }
    let least_reliable = (0 .. llrs.len())
        .sorted_by_key(|&k| llrs[k].unsigned_abs())
        .take(max_iterations as usize - 1)
        .collect_vec();
    let mut num_iter = 1;
    for k in least_reliable {
        num_iter += 1;
        bits[k] = flip(bits[k]);
        if crc24(&bits) == 0 {
            return (bits, true, num_iter);
        }
        bits[k] = flip(bits[k]);
    }
    (bits, false, num_iter)
}

/// Returns bit decisions for LLR values (nonnegative values are mapped to `Zero`).
fn slice_llrs(llrs: &[i8]) -> Vec<Bit> {
    llrs.iter()
        .map(|&llr| if llr >= 0 { Bit::Zero } else { Bit::One })
        .collect()
}

/// Returns the complement of a bit.
fn flip(bit: Bit) -> Bit {
    match bit {
        Bit::Zero => Bit::One,
        Bit::One => Bit::Zero,
    }
}

/// Returns CRC24A remainder of a bit sequence (`0` for a sequence ending in its own CRC).
fn crc24(bits: &[Bit]) -> u32 {
    bits.iter().fold(0, |reg, &bit| {
        let feedback = ((reg >> 23) & 1) ^ bit as u32;
        let reg = (reg << 1) & 0x00FF_FFFF;
        if feedback == 1 {
            reg ^ CRC24A_POLY
        } else {
            reg
        }
    })
}

#[cfg(test)]
mod tests_of_functions {
    use float_eq::assert_float_eq;

    use super::*;
    use crate::{BufferIdentifier, BufferPool, PoolConfig};
    use Bit::{One, Zero};

    fn pool_for_test(max_codeblock_size: usize) -> BufferPool {
        BufferPool::new(PoolConfig {
            max_codeblock_size,
            max_buffers: 4,
            max_codeblocks: 16,
            expire_timeout_slots: 10,
        })
        .unwrap()
    }

    fn tb_for_test(num_bytes: usize) -> Vec<u8> {
        (0 .. num_bytes)
            .map(|k| u8::try_from((37 * k + 11) % 256).unwrap())
            .collect()
    }

    fn llrs_for_test(bits: &[Bit]) -> Vec<i8> {
        bits.iter()
            .map(|&b| if b == Zero { 20 } else { -20 })
            .collect()
    }

    #[test]
    fn test_validate() {
        assert!(SegmentationConfig::new(64, 3).validate().is_ok());
        assert!(SegmentationConfig::new(0, 0).validate().is_err());
        assert!(SegmentationConfig::new(63, 0).validate().is_err());
        assert!(SegmentationConfig::new(64, 4).validate().is_err());
        let mut cfg = SegmentationConfig::new(64, 0);
        cfg.max_codeblock_info_bits = CRC_LEN;
        assert!(cfg.validate().is_err());
        let mut cfg = SegmentationConfig::new(64, 0);
        cfg.max_iterations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_deserialize_defaults() {
        let cfg: SegmentationConfig = serde_json::from_str(r#"{"tbs": 64}"#).unwrap();
        assert_eq!(cfg, SegmentationConfig::new(64, 0));
        let cfg: SegmentationConfig =
            serde_json::from_str(r#"{"tbs": 64, "rv": 2, "slot": 7}"#).unwrap();
        assert_eq!(cfg.rv, 2);
        assert_eq!(cfg.slot, Some(7));
    }

    #[test]
    fn test_payload_sizes() {
        let mut cfg = SegmentationConfig::new(8448 - 24, 0);
        assert_eq!(cfg.payload_sizes().unwrap(), [8424]);
        cfg.tbs = 8432;
        assert_eq!(cfg.payload_sizes().unwrap(), [4216, 4216]);
        cfg.tbs = 104;
        cfg.max_codeblock_info_bits = 64;
        assert_eq!(cfg.payload_sizes().unwrap(), [35, 35, 34]);
    }

    #[test]
    fn test_rate_match_ranges() {
        assert_eq!(
            rate_match_ranges(10, 3).collect_vec(),
            [0 .. 4, 4 .. 7, 7 .. 10]
        );
        assert_eq!(rate_match_ranges(6, 2).collect_vec(), [0 .. 3, 3 .. 6]);
    }

    #[test]
    fn test_crc24() {
        assert_eq!(crc24(&[]), 0);
        assert_eq!(crc24(&[One]), CRC24A_POLY);
        let mut bits = utils::bits_from_bytes(&[0xde, 0xad, 0xbe, 0xef]);
        let crc = crc24(&bits);
        assert_ne!(crc, 0);
        bits.extend(
            utils::bits_from_bytes(&crc.to_be_bytes())
                .into_iter()
                .skip(8),
        );
        assert_eq!(crc24(&bits), 0);
        bits[5] = flip(bits[5]);
        assert_ne!(crc24(&bits), 0);
    }

    #[test]
    fn test_encoder() {
        let cfg = SegmentationConfig::new(16, 0);
        // Invalid inputs
        assert!(encoder(&[0x00], &cfg, 40).is_err());
        assert!(encoder(&[0x00, 0x00], &SegmentationConfig::new(12, 0), 40).is_err());
        // Valid inputs
        let bits = encoder(&[0xf0, 0x0f], &cfg, 44).unwrap();
        assert_eq!(bits.len(), 44);
        assert_eq!(
            bits[.. 16],
            [One, One, One, One, Zero, Zero, Zero, Zero, Zero, Zero, Zero, Zero, One, One, One, One]
        );
        assert_eq!(crc24(&bits[.. 40]), 0);
        assert_eq!(bits[40 ..], bits[.. 4]);
        let bits_rv2 = encoder(&[0xf0, 0x0f], &SegmentationConfig::new(16, 2), 40).unwrap();
        assert_eq!(bits_rv2[.. 20], bits[20 .. 40]);
        assert_eq!(bits_rv2[20 ..], bits[.. 20]);
    }

    #[test]
    fn test_nof_codeblocks() {
        let mut cfg = SegmentationConfig::new(104, 0);
        cfg.max_codeblock_info_bits = 64;
        assert_eq!(ReferenceDecoder.nof_codeblocks(&cfg, 200, 64).unwrap(), 3);
        assert!(ReferenceDecoder.nof_codeblocks(&cfg, 2, 64).is_err());
        assert!(ReferenceDecoder.nof_codeblocks(&cfg, 200, 58).is_err());
        cfg.tbs = 100;
        assert!(ReferenceDecoder.nof_codeblocks(&cfg, 200, 64).is_err());
    }

    #[test]
    fn test_decode_single_transmission() {
        let cfg = SegmentationConfig::new(64, 0);
        let tb = tb_for_test(8);
        let llrs = llrs_for_test(&encoder(&tb, &cfg, 176).unwrap());
        let mut pool = pool_for_test(128);
        let softbuffer = pool.reserve(BufferIdentifier::new(1, 0), 1, true).unwrap();
        let (tb_hat, stats) = ReferenceDecoder.decode(&llrs, softbuffer, &cfg).unwrap();
        assert_eq!(tb_hat, tb);
        assert!(stats.crc_ok);
        assert_eq!(stats.ldpc_iterations_max, 1);
        assert_float_eq!(stats.ldpc_iterations_mean, 1.0, abs <= 1e-12);
        assert_eq!(softbuffer.codeblocks_crc(), [true]);
        // Repeated positions were combined, and positions past the codeblock are untouched
        assert_eq!(softbuffer.codeblock(0)[0], 40 * llrs[0].signum());
        assert_eq!(softbuffer.codeblock(0)[100], 0);
    }

    #[test]
    fn test_decode_flips_least_reliable_bit() {
        let cfg = SegmentationConfig::new(32, 0);
        let tb = tb_for_test(4);
        let mut llrs = llrs_for_test(&encoder(&tb, &cfg, 56).unwrap());
        llrs[9] = if llrs[9] > 0 { -1 } else { 1 };
        let mut pool = pool_for_test(64);
        let softbuffer = pool.reserve(BufferIdentifier::new(1, 0), 1, true).unwrap();
        let (tb_hat, stats) = ReferenceDecoder.decode(&llrs, softbuffer, &cfg).unwrap();
        assert_eq!(tb_hat, tb);
        assert!(stats.crc_ok);
        assert_eq!(stats.ldpc_iterations_max, 2);
    }

    #[test]
    fn test_decode_incremental_redundancy() {
        let cfg_rv0 = SegmentationConfig::new(40, 0);
        let cfg_rv2 = SegmentationConfig::new(40, 2);
        let tb = tb_for_test(5);
        let id = BufferIdentifier::new(0x4601, 3);
        let mut pool = pool_for_test(64);
        // First half of the codeblock only: remaining positions are erased
        let llrs = llrs_for_test(&encoder(&tb, &cfg_rv0, 32).unwrap());
        let softbuffer = pool.reserve(id, 1, true).unwrap();
        let (_, stats) = ReferenceDecoder.decode(&llrs, softbuffer, &cfg_rv0).unwrap();
        assert!(!stats.crc_ok);
        assert_eq!(stats.ldpc_iterations_max, 0);
        assert_eq!(softbuffer.codeblocks_crc(), [false]);
        // Second half arrives in the retransmission
        let llrs = llrs_for_test(&encoder(&tb, &cfg_rv2, 32).unwrap());
        let softbuffer = pool.reserve(id, 1, false).unwrap();
        let (tb_hat, stats) = ReferenceDecoder.decode(&llrs, softbuffer, &cfg_rv2).unwrap();
        assert!(stats.crc_ok);
        assert_eq!(tb_hat, tb);
        // Same retransmission into a fresh soft buffer is not enough
        let softbuffer = pool.reserve(id, 1, true).unwrap();
        let (_, stats) = ReferenceDecoder.decode(&llrs, softbuffer, &cfg_rv2).unwrap();
        assert!(!stats.crc_ok);
    }

    #[test]
    fn test_decode_skips_codeblocks_with_crc_ok() {
        let mut cfg = SegmentationConfig::new(96, 0);
        cfg.max_codeblock_info_bits = 72;
        let tb = tb_for_test(12);
        let id = BufferIdentifier::new(2, 1);
        let mut pool = pool_for_test(72);
        let mut llrs = llrs_for_test(&encoder(&tb, &cfg, 144).unwrap());
        // Erase one position of the second codeblock
        llrs[100] = 0;
        let softbuffer = pool.reserve(id, 2, true).unwrap();
        let (_, stats) = ReferenceDecoder.decode(&llrs, softbuffer, &cfg).unwrap();
        assert!(!stats.crc_ok);
        assert_eq!(softbuffer.codeblocks_crc(), [true, false]);
        assert_eq!(stats.ldpc_iterations_max, 1);
        assert_float_eq!(stats.ldpc_iterations_mean, 0.5, abs <= 1e-12);
        let llrs = llrs_for_test(&encoder(&tb, &cfg, 144).unwrap());
        let softbuffer = pool.reserve(id, 2, false).unwrap();
        let (tb_hat, stats) = ReferenceDecoder.decode(&llrs, softbuffer, &cfg).unwrap();
        assert!(stats.crc_ok);
        assert_eq!(tb_hat, tb);
        assert_float_eq!(stats.ldpc_iterations_mean, 1.0, abs <= 1e-12);
        // The first codeblock was not combined again
        assert_eq!(softbuffer.codeblock(0)[0].unsigned_abs(), 20);
        assert_eq!(softbuffer.codeblock(1)[0].unsigned_abs(), 40);
    }

    #[test]
    fn test_decode_invalid_inputs_leave_soft_buffer_untouched() {
        let cfg = SegmentationConfig::new(64, 0);
        // Wrong number of codeblocks
        let mut pool = pool_for_test(128);
        let softbuffer = pool.reserve(BufferIdentifier::new(1, 0), 2, true).unwrap();
        assert!(ReferenceDecoder.decode(&[1; 88], softbuffer, &cfg).is_err());
        assert!(softbuffer.codeblock(0).iter().all(|&llr| llr == 0));
        // Codeblock does not fit
        let mut pool = pool_for_test(96);
        let softbuffer = pool.reserve(BufferIdentifier::new(1, 0), 1, true).unwrap();
        assert!(ReferenceDecoder.decode(&[1; 88], softbuffer, &cfg).is_ok());
        assert!(ReferenceDecoder
            .decode(&[1; 88], softbuffer, &SegmentationConfig::new(128, 0))
            .is_err());
        assert_eq!(softbuffer.codeblock(0)[0], 1);
    }
}
