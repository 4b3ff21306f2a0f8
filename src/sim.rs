//! Simulator of HARQ soft combining over a BPSK-AWGN channel
//!
//! Random transport blocks are encoded with the reference code, sent over a BPSK-AWGN channel
//! with redundancy versions `0, 2, 3, 1` (repeated as needed), and decoded through a
//! [`Dispatcher`] until the CRC passes or the maximum number of transmissions is reached.

use std::fs::File;
use std::io::BufWriter;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::decoder::encoder;
use crate::{
    utils, BufferIdentifier, Decoder, Dispatcher, Error, PoolConfig, ReferenceDecoder,
    SegmentationConfig,
};

/// Redundancy versions of successive transmissions
const RV_SEQUENCE: [u8; 4] = [0, 2, 3, 1];

/// RNTI of the simulated UE
const SIM_RNTI: u16 = 0x4601;

/// Parameters for HARQ simulation over BPSK-AWGN channel
#[derive(Clone, PartialEq, Debug, Copy, Deserialize, Serialize)]
pub struct SimParams {
    /// Transport block size in bits
    pub tbs: usize,
    /// Maximum number of bits per codeblock, including the CRC
    pub max_codeblock_info_bits: usize,
    /// Number of LLR values per transmission
    pub nof_llrs: usize,
    /// Ratio (dB) of symbol energy to noise power spectral density at BPSK-AWGN channel output
    pub es_over_n0_db: f64,
    /// Maximum number of transmissions per transport block
    pub max_transmissions: u32,
    /// Number of transport blocks to be simulated
    pub num_blocks: u32,
    /// Configuration of the soft-buffer pool
    pub pool: PoolConfig,
}

/// Results of HARQ simulation over BPSK-AWGN channel
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct SimResults {
    /// Simulation parameters
    pub params: SimParams,
    /// Number of transport blocks simulated
    pub num_blocks: u32,
    /// Number of transport blocks not decoded after all transmissions
    pub num_block_errors: u32,
    /// Number of transport blocks not decoded after each number of transmissions
    pub num_block_errors_per_round: Vec<u32>,
    /// Total number of transmissions
    pub num_transmissions: u32,
    /// Maximum number of decoding iterations over all transmissions
    pub ldpc_iterations_max: u32,
    /// Sum over all transmissions of the average number of decoding iterations
    pub ldpc_iterations_sum: f64,
}

impl SimResults {
    /// Returns initialized simulation results.
    #[must_use]
    fn new(params: &SimParams) -> Self {
        Self {
            params: *params,
            num_blocks: 0,
            num_block_errors: 0,
            num_block_errors_per_round: vec![0; params.max_transmissions as usize],
            num_transmissions: 0,
            ldpc_iterations_max: 0,
            ldpc_iterations_sum: 0.0,
        }
    }

    /// Returns block error rate after all transmissions.
    #[must_use]
    pub fn block_error_rate(&self) -> f64 {
        ratio(self.num_block_errors, self.num_blocks)
    }

    /// Returns block error rate after each number of transmissions.
    #[must_use]
    pub fn residual_bler(&self) -> Vec<f64> {
        self.num_block_errors_per_round
            .iter()
            .map(|&num_errors| ratio(num_errors, self.num_blocks))
            .collect()
    }

    /// Returns average number of transmissions per transport block.
    #[must_use]
    pub fn mean_transmissions(&self) -> f64 {
        ratio(self.num_transmissions, self.num_blocks)
    }

    /// Returns average number of decoding iterations per transmission.
    #[must_use]
    pub fn ldpc_iterations_mean(&self) -> f64 {
        if self.num_transmissions == 0 {
            0.0
        } else {
            self.ldpc_iterations_sum / f64::from(self.num_transmissions)
        }
    }

    /// Updates simulation results after a transport block.
    fn update_after_block(&mut self, num_rounds: usize, decoded: bool) {
        self.num_blocks += 1;
        if !decoded {
            self.num_block_errors += 1;
        }
        for (round, num_errors) in self.num_block_errors_per_round.iter_mut().enumerate() {
            if !decoded || round + 1 < num_rounds {
                *num_errors += 1;
            }
        }
    }
}

/// Returns `num / den`, or `0.0` if `den` is `0`.
fn ratio(num: u32, den: u32) -> f64 {
    if den == 0 {
        0.0
    } else {
        f64::from(num) / f64::from(den)
    }
}

/// Runs HARQ simulation over BPSK-AWGN channel.
///
/// # Parameters
///
/// - `params`: Parameters for the simulation.
///
/// - `rng`: Random number generator for the simulation.
///
/// # Returns
///
/// - `results`: Results from the simulation.
///
/// # Errors
///
/// Returns an error if `params` is invalid.
///
/// # Examples
///
/// ```
/// use harqbuf::sim::{self, SimParams};
/// use harqbuf::PoolConfig;
///
/// let params = SimParams {
///     tbs: 64,
///     max_codeblock_info_bits: 8448,
///     nof_llrs: 176,
///     es_over_n0_db: 20.0,
///     max_transmissions: 4,
///     num_blocks: 10,
///     pool: PoolConfig {
///         max_codeblock_size: 128,
///         max_buffers: 4,
///         max_codeblocks: 4,
///         expire_timeout_slots: 10,
///     },
/// };
/// let results = sim::run_harq_sim(&params, &mut rand::rng())?;
/// assert_eq!(results.num_blocks, 10);
/// assert_eq!(results.num_block_errors, 0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn run_harq_sim<R: Rng>(params: &SimParams, rng: &mut R) -> Result<SimResults, Error> {
    check_sim_params(params)?;
    let mut cfg = SegmentationConfig::new(params.tbs, 0);
    cfg.max_codeblock_info_bits = params.max_codeblock_info_bits;
    let nof_codeblocks =
        ReferenceDecoder.nof_codeblocks(&cfg, params.nof_llrs, params.pool.max_codeblock_size)?;
    let nof_processes = params
        .pool
        .max_buffers
        .min(params.pool.max_codeblocks / nof_codeblocks);
    if nof_processes == 0 {
        return Err(Error::InvalidArgument(format!(
            "Pool of {} codeblocks cannot hold a transport block of {nof_codeblocks} codeblocks",
            params.pool.max_codeblocks
        )));
    }
    let nof_processes = u32::try_from(nof_processes).unwrap_or(u32::MAX);
    let mut dispatcher = Dispatcher::new(ReferenceDecoder);
    let handle = dispatcher.new_pool(&params.pool)?;
    let mut results = SimResults::new(params);
    for block in 0 .. params.num_blocks {
        let id = BufferIdentifier::new(SIM_RNTI, block % nof_processes);
        let tb = utils::random_bytes(params.tbs / 8, rng);
        cfg.slot = Some(u64::from(block));
        let mut num_rounds = 0;
        let mut decoded = false;
        for &rv in RV_SEQUENCE
            .iter()
            .cycle()
            .take(params.max_transmissions as usize)
        {
            cfg.rv = rv;
            let code_bits = encoder(&tb, &cfg, params.nof_llrs)?;
            let llrs = utils::quantize_llrs(&utils::bpsk_awgn_channel(
                &code_bits,
                params.es_over_n0_db,
                rng,
            ));
            let (tb_hat, stats) =
                dispatcher.step(handle, id, nof_codeblocks, num_rounds == 0, &llrs, &cfg)?;
            num_rounds += 1;
            results.num_transmissions += 1;
            results.ldpc_iterations_max =
                results.ldpc_iterations_max.max(stats.ldpc_iterations_max);
            results.ldpc_iterations_sum += stats.ldpc_iterations_mean;
            if stats.crc_ok {
                decoded = tb_hat == tb;
                break;
            }
        }
        results.update_after_block(num_rounds, decoded);
    }
    dispatcher.release(handle);
    Ok(results)
}

/// Runs HARQ simulations in parallel and saves results to a JSON file.
///
/// # Parameters
///
/// - `all_params`: Parameters for each simulation scenario of interest.
///
/// - `seed`: Seed for reproducible simulations (each scenario derives its own generator from
///   it), or `None` to use the thread-local generator.
///
/// - `json_filename`: Name of the JSON file to which all simulation results must be written.
///
/// # Errors
///
/// Returns an error if any of the simulation parameters are invalid, or if the simulation results
/// cannot be written to the JSON file.
pub fn run_harq_sims(
    all_params: &[SimParams],
    seed: Option<u64>,
    json_filename: &str,
) -> Result<Vec<SimResults>, Error> {
    let all_results = all_params
        .par_iter()
        .enumerate()
        .map(|(index, params)| match seed {
            Some(seed) => run_harq_sim(params, &mut StdRng::seed_from_u64(seed ^ index as u64)),
            None => run_harq_sim(params, &mut rand::rng()),
        })
        .collect::<Result<Vec<_>, _>>()?;
    for results in &all_results {
        info!(
            es_over_n0_db = results.params.es_over_n0_db,
            bler = results.block_error_rate(),
            mean_transmissions = results.mean_transmissions(),
            ldpc_iterations_mean = results.ldpc_iterations_mean(),
            "simulation complete"
        );
    }
    save_all_sim_results_to_file(&all_results, json_filename)?;
    Ok(all_results)
}

/// Checks validity of simulation parameters.
fn check_sim_params(params: &SimParams) -> Result<(), Error> {
    SegmentationConfig::new(params.tbs, 0).validate()?;
    if params.nof_llrs == 0 {
        return Err(Error::InvalidArgument(
            "Number of LLR values per transmission cannot be zero".to_string(),
        ));
    }
    if params.max_transmissions == 0 {
        return Err(Error::InvalidArgument(
            "Maximum number of transmissions cannot be zero".to_string(),
        ));
    }
    if params.num_blocks == 0 {
        return Err(Error::InvalidArgument(
            "Number of transport blocks cannot be zero".to_string(),
        ));
    }
    Ok(())
}

/// Saves all simulation results to a JSON file.
fn save_all_sim_results_to_file(
    all_results: &[SimResults],
    json_filename: &str,
) -> Result<(), Error> {
    let writer = BufWriter::new(File::create(json_filename)?);
    serde_json::to_writer_pretty(writer, all_results)?;
    Ok(())
}

#[cfg(test)]
mod tests_of_functions {
    use float_eq::assert_float_eq;

    use super::*;

    fn params_for_test() -> SimParams {
        SimParams {
            tbs: 64,
            max_codeblock_info_bits: 8448,
            nof_llrs: 176,
            es_over_n0_db: 20.0,
            max_transmissions: 4,
            num_blocks: 20,
            pool: PoolConfig {
                max_codeblock_size: 128,
                max_buffers: 4,
                max_codeblocks: 4,
                expire_timeout_slots: 10,
            },
        }
    }

    #[test]
    fn test_check_sim_params() {
        assert!(check_sim_params(&params_for_test()).is_ok());
        let mut params = params_for_test();
        params.tbs = 60;
        assert!(check_sim_params(&params).is_err());
        let mut params = params_for_test();
        params.nof_llrs = 0;
        assert!(check_sim_params(&params).is_err());
        let mut params = params_for_test();
        params.max_transmissions = 0;
        assert!(check_sim_params(&params).is_err());
        let mut params = params_for_test();
        params.num_blocks = 0;
        assert!(check_sim_params(&params).is_err());
    }

    #[test]
    fn test_update_after_block() {
        let mut results = SimResults::new(&params_for_test());
        results.update_after_block(1, true);
        results.update_after_block(3, true);
        results.update_after_block(4, false);
        results.update_after_block(2, false);
        assert_eq!(results.num_blocks, 4);
        assert_eq!(results.num_block_errors, 2);
        assert_eq!(results.num_block_errors_per_round, [3, 3, 2, 2]);
        assert_float_eq!(results.block_error_rate(), 0.5, abs <= 1e-12);
        assert_float_eq!(results.residual_bler()[0], 0.75, abs <= 1e-12);
    }

    #[test]
    fn test_run_harq_sim_single_transmission() {
        let results = run_harq_sim(&params_for_test(), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(results.num_blocks, 20);
        assert_eq!(results.num_block_errors, 0);
        assert_eq!(results.num_block_errors_per_round, [0, 0, 0, 0]);
        assert_float_eq!(results.mean_transmissions(), 1.0, abs <= 1e-12);
        assert_float_eq!(results.ldpc_iterations_mean(), 1.0, abs <= 1e-12);
    }

    #[test]
    fn test_run_harq_sim_soft_combining() {
        // Each transmission covers half of the codeblock
        let mut params = params_for_test();
        params.nof_llrs = 44;
        let results = run_harq_sim(&params, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(results.num_block_errors, 0);
        assert_eq!(results.num_block_errors_per_round, [20, 0, 0, 0]);
        assert_float_eq!(results.mean_transmissions(), 2.0, abs <= 1e-12);
        assert_float_eq!(results.ldpc_iterations_mean(), 0.5, abs <= 1e-12);
        // Without retransmissions, no transport block is decoded
        params.max_transmissions = 1;
        let results = run_harq_sim(&params, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(results.num_block_errors, 20);
        assert_float_eq!(results.block_error_rate(), 1.0, abs <= 1e-12);
    }

    #[test]
    fn test_run_harq_sim_invalid_pool() {
        let mut params = params_for_test();
        params.pool.max_codeblock_size = 64;
        assert!(run_harq_sim(&params, &mut rand::rng()).is_err());
        let mut params = params_for_test();
        params.pool.max_buffers = 0;
        assert!(run_harq_sim(&params, &mut rand::rng()).is_err());
    }

    #[test]
    fn test_run_harq_sims() {
        let json_filename = std::env::temp_dir().join("harqbuf_test_run_harq_sims.json");
        let json_filename = json_filename.to_str().unwrap();
        let all_params: Vec<SimParams> = [10.0, 15.0, 20.0]
            .into_iter()
            .map(|es_over_n0_db| SimParams {
                es_over_n0_db,
                num_blocks: 5,
                ..params_for_test()
            })
            .collect();
        let all_results = run_harq_sims(&all_params, Some(3), json_filename).unwrap();
        assert_eq!(all_results.len(), 3);
        let saved: Vec<SimResults> =
            serde_json::from_reader(File::open(json_filename).unwrap()).unwrap();
        assert_eq!(saved, all_results);
        assert!(run_harq_sims(&all_params, Some(3), "").is_err());
        std::fs::remove_file(json_filename).unwrap();
    }
}
