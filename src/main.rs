//! This crate simulates the block-error-rate-versus-SNR performance of HARQ soft combining over a
//! BPSK-AWGN channel, with soft buffers held in a bounded pool and decoded by the reference
//! decoder. Simulation parameters are specified on the command line, and simulation results are
//! saved to a JSON file.
//!
//! Build the executable with `cargo build --release` and then run `./target/release/harqbuf -h`
//! for help on the command-line interface. Set `RUST_LOG` (for example, `RUST_LOG=debug`) to
//! control log output.

#![warn(
    clippy::complexity,
    clippy::pedantic,
    clippy::perf,
    clippy::style,
    clippy::suspicious,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_allocation,
    unused_import_braces,
    unused_qualifications
)]

use anyhow::Result;
use clap::{crate_name, crate_version, value_parser, Arg, ArgMatches, Command};
use harqbuf::{sim, PoolConfig};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Main function
fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let timer = Instant::now();
    let matches = command_line_parser().get_matches();
    let json_filename = &json_filename_from_matches(&matches);
    sim::run_harq_sims(
        &all_sim_params(&matches),
        seed_from_matches(&matches),
        json_filename,
    )?;
    eprintln!("Elapsed time: {:.3?}", timer.elapsed());
    Ok(())
}

/// Returns command line parser.
fn command_line_parser() -> Command {
    Command::new(crate_name!())
        .version(crate_version!())
        .about("Evaluates HARQ soft combining over a BPSK-AWGN channel")
        .arg(tbs())
        .arg(max_codeblock_info_bits())
        .arg(nof_llrs())
        .arg(first_snr_db())
        .arg(snr_step_db())
        .arg(num_snr())
        .arg(max_transmissions())
        .arg(num_blocks())
        .arg(max_codeblock_size())
        .arg(max_buffers())
        .arg(max_codeblocks())
        .arg(expire_timeout_slots())
        .arg(seed())
        .arg(json_filename())
}

/// Returns argument for transport block size.
fn tbs() -> Arg {
    Arg::new("tbs")
        .short('t')
        .value_parser(value_parser!(usize))
        .default_value("1024")
        .help("Transport block size in bits (multiple of 8)")
}

/// Returns argument for maximum number of bits per codeblock.
fn max_codeblock_info_bits() -> Arg {
    Arg::new("max_codeblock_info_bits")
        .short('c')
        .value_parser(value_parser!(usize))
        .default_value("8448")
        .help("Maximum number of bits per codeblock, including the CRC")
}

/// Returns argument for number of LLR values per transmission.
fn nof_llrs() -> Arg {
    Arg::new("nof_llrs")
        .short('l')
        .value_parser(value_parser!(usize))
        .default_value("3144")
        .help("Number of LLR values per transmission")
}

/// Returns argument for first Es/N0 (dB).
fn first_snr_db() -> Arg {
    Arg::new("first_snr_db")
        .short('r')
        .value_parser(value_parser!(f64))
        .allow_negative_numbers(true)
        .default_value("-5.0")
        .help("First Es/N0 (dB)")
}

/// Returns argument for Es/N0 step (dB).
fn snr_step_db() -> Arg {
    Arg::new("snr_step_db")
        .short('p')
        .value_parser(value_parser!(f64))
        .allow_negative_numbers(true)
        .default_value("1.0")
        .help("Es/N0 step (dB)")
}

/// Returns argument for number of Es/N0 values.
fn num_snr() -> Arg {
    Arg::new("num_snr")
        .short('s')
        .value_parser(value_parser!(u32))
        .default_value("6")
        .help("Number of Es/N0 values")
}

/// Returns argument for maximum number of transmissions per transport block.
fn max_transmissions() -> Arg {
    Arg::new("max_transmissions")
        .short('m')
        .value_parser(value_parser!(u32))
        .default_value("4")
        .help("Maximum number of transmissions per transport block")
}

/// Returns argument for number of transport blocks to be simulated.
fn num_blocks() -> Arg {
    Arg::new("num_blocks")
        .short('b')
        .value_parser(value_parser!(u32))
        .default_value("1000")
        .help("Number of transport blocks to be simulated")
}

/// Returns argument for maximum number of LLR values per codeblock in a soft buffer.
fn max_codeblock_size() -> Arg {
    Arg::new("max_codeblock_size")
        .short('z')
        .value_parser(value_parser!(usize))
        .default_value("8448")
        .help("Maximum number of LLR values per codeblock in a soft buffer")
}

/// Returns argument for maximum number of soft buffers in the pool.
fn max_buffers() -> Arg {
    Arg::new("max_buffers")
        .short('u')
        .value_parser(value_parser!(usize))
        .default_value("16")
        .help("Maximum number of soft buffers in the pool")
}

/// Returns argument for maximum number of codeblocks in the pool.
fn max_codeblocks() -> Arg {
    Arg::new("max_codeblocks")
        .short('k')
        .value_parser(value_parser!(usize))
        .default_value("64")
        .help("Maximum number of codeblocks in the pool")
}

/// Returns argument for soft-buffer expiration timeout.
fn expire_timeout_slots() -> Arg {
    Arg::new("expire_timeout_slots")
        .short('e')
        .value_parser(value_parser!(u64))
        .default_value("100")
        .help("Number of slots after which an untouched soft buffer may be evicted")
}

/// Returns argument for random seed.
fn seed() -> Arg {
    Arg::new("seed")
        .short('d')
        .value_parser(value_parser!(u64))
        .help("Seed for reproducible simulations")
}

/// Returns argument for name of JSON file to which results must be saved.
fn json_filename() -> Arg {
    Arg::new("json_filename")
        .short('f')
        .default_value("results.json")
        .help("Name of JSON file to which results must be saved")
}

/// Returns simulation parameters based on command-line arguments.
fn all_sim_params(matches: &ArgMatches) -> Vec<sim::SimParams> {
    // OK to unwrap: All command-line arguments used below have default values, so none of the
    // lookups can fail.
    let pool = pool_config_from_matches(matches);
    all_es_over_n0_db_from_matches(matches)
        .into_iter()
        .map(|es_over_n0_db| sim::SimParams {
            tbs: *matches.get_one("tbs").unwrap(),
            max_codeblock_info_bits: *matches.get_one("max_codeblock_info_bits").unwrap(),
            nof_llrs: *matches.get_one("nof_llrs").unwrap(),
            es_over_n0_db,
            max_transmissions: *matches.get_one("max_transmissions").unwrap(),
            num_blocks: *matches.get_one("num_blocks").unwrap(),
            pool,
        })
        .collect()
}

/// Returns soft-buffer pool configuration.
fn pool_config_from_matches(matches: &ArgMatches) -> PoolConfig {
    PoolConfig {
        max_codeblock_size: *matches.get_one("max_codeblock_size").unwrap(),
        max_buffers: *matches.get_one("max_buffers").unwrap(),
        max_codeblocks: *matches.get_one("max_codeblocks").unwrap(),
        expire_timeout_slots: *matches.get_one("expire_timeout_slots").unwrap(),
    }
}

/// Returns all Es/N0 (dB) values.
fn all_es_over_n0_db_from_matches(matches: &ArgMatches) -> Vec<f64> {
    let first_snr_db: f64 = *matches.get_one("first_snr_db").unwrap();
    let snr_step_db: f64 = *matches.get_one("snr_step_db").unwrap();
    let num_snr: u32 = *matches.get_one("num_snr").unwrap();
    (0 .. num_snr)
        .map(|n| first_snr_db + snr_step_db * f64::from(n))
        .collect()
}

/// Returns random seed, if given.
fn seed_from_matches(matches: &ArgMatches) -> Option<u64> {
    matches.get_one("seed").copied()
}

/// Returns name of JSON file to which simulation results must be saved.
fn json_filename_from_matches(matches: &ArgMatches) -> String {
    matches
        .get_one::<String>("json_filename")
        .unwrap()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_line_for_test() -> Vec<&'static str> {
        vec![
            crate_name!(),
            "-t",
            "256",
            "-c",
            "128",
            "-l",
            "600",
            "-r",
            "-4.0",
            "-p",
            "0.2",
            "-s",
            "6",
            "-m",
            "3",
            "-b",
            "100",
            "-z",
            "128",
            "-u",
            "8",
            "-k",
            "24",
            "-e",
            "10",
            "-d",
            "42",
            "-f",
            "results.json",
        ]
    }

    #[test]
    fn test_command_line_parser() {
        assert!(command_line_parser()
            .try_get_matches_from(command_line_for_test())
            .is_ok());
        assert!(command_line_parser()
            .try_get_matches_from([crate_name!(), "-t", "abc"])
            .is_err());
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_all_sim_params() {
        let matches = command_line_parser().get_matches_from(command_line_for_test());
        let all_params = all_sim_params(&matches);
        let all_es_over_n0_db = [-4.0, -3.8, -3.6, -3.4, -3.2, -3.0];
        assert_eq!(all_params.len(), 6);
        for (idx, &params) in all_params.iter().enumerate() {
            assert_eq!(params.tbs, 256);
            assert_eq!(params.max_codeblock_info_bits, 128);
            assert_eq!(params.nof_llrs, 600);
            assert_eq!(params.es_over_n0_db, all_es_over_n0_db[idx]);
            assert_eq!(params.max_transmissions, 3);
            assert_eq!(params.num_blocks, 100);
            assert_eq!(
                params.pool,
                PoolConfig {
                    max_codeblock_size: 128,
                    max_buffers: 8,
                    max_codeblocks: 24,
                    expire_timeout_slots: 10,
                }
            );
        }
        assert_eq!(seed_from_matches(&matches), Some(42));
        assert_eq!(json_filename_from_matches(&matches), "results.json");
    }

    #[test]
    fn test_defaults() {
        let matches = command_line_parser().get_matches_from([crate_name!()]);
        assert_eq!(seed_from_matches(&matches), None);
        assert_eq!(all_sim_params(&matches).len(), 6);
    }
}
