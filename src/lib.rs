//! This crate implements the soft-buffer bookkeeping behind an uplink data-channel decoder with
//! hybrid automatic repeat request (HARQ). Log-likelihood-ratio (LLR) values received in
//! successive transmissions of a transport block are combined in a soft buffer identified by the
//! UE RNTI and HARQ process ID, so that each retransmission improves the odds of decoding.
//!
//! Soft buffers live in bounded [`BufferPool`]s. Pools are owned by a [`HandleRegistry`] and
//! addressed by opaque [`Handle`]s, which lets a sequence of independent calls share long-lived
//! buffers. The [`Dispatcher`] exposes the registry through four named commands (`new`, `step`,
//! `reset_crcs` and `release`) and hands each reserved buffer to a [`Decoder`].
//!
//! # Examples
//!
//! ```
//! use harqbuf::{BufferIdentifier, Dispatcher, PoolConfig, ReferenceDecoder};
//!
//! let mut dispatcher = Dispatcher::new(ReferenceDecoder);
//! let handle = dispatcher.new_pool(&PoolConfig {
//!     max_codeblock_size: 8192,
//!     max_buffers: 4,
//!     max_codeblocks: 16,
//!     expire_timeout_slots: 10,
//! })?;
//! let id = BufferIdentifier::new(0x4601, 3);
//! let pool = dispatcher.registry_mut().get_mut(handle)?;
//! pool.reserve(id, 4, true)?;
//! assert_eq!(pool.reserve(id, 4, false)?.nof_codeblocks(), 4);
//! assert!(pool.reserve(id, 5, false).is_err());
//! assert!(dispatcher.release(handle));
//! assert!(!dispatcher.release(handle));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

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

pub mod decoder;
pub mod dispatcher;
pub mod pool;
pub mod registry;
pub mod sim;
pub mod softbuffer;
pub mod utils;

pub use decoder::{DecodeStats, Decoder, ReferenceDecoder, SegmentationConfig};
pub use dispatcher::{Command, Dispatcher, Value};
pub use pool::{BufferPool, PoolConfig};
pub use registry::{Handle, HandleRegistry};
pub use softbuffer::{BufferIdentifier, SoftBuffer};

/// Custom error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed call (wrong arity, wrong type, invalid size or configuration)
    #[error("{0}")]
    InvalidArgument(String),
    /// Handle that was never issued or has been released
    #[error("No buffer pool with handle {0}")]
    HandleNotFound(u64),
    /// Retransmission or CRC reset for an identifier without a soft buffer
    #[error("No soft buffer with ID {id}")]
    IdentifierNotFound {
        /// Identifier that was looked up
        id: BufferIdentifier,
    },
    /// Allocation that would violate the buffer-count or codeblock-count bound of a pool
    #[error(
        "Cannot reserve {requested} codeblocks for soft buffer {id}: {in_use} of {max_codeblocks} \
         codeblocks and {nof_buffers} of {max_buffers} soft buffers in use"
    )]
    CapacityExceeded {
        /// Identifier for which the allocation was attempted
        id: BufferIdentifier,
        /// Number of codeblocks requested
        requested: usize,
        /// Number of codeblocks held by other soft buffers
        in_use: usize,
        /// Codeblock bound of the pool
        max_codeblocks: usize,
        /// Number of other soft buffers
        nof_buffers: usize,
        /// Soft-buffer bound of the pool
        max_buffers: usize,
    },
    /// Retransmission whose codeblock count disagrees with the stored soft buffer
    #[error("Soft buffer {id} holds {expected} codeblocks, but {found} were requested")]
    CodeblockCountMismatch {
        /// Identifier of the soft buffer
        id: BufferIdentifier,
        /// Number of codeblocks in the stored soft buffer
        expected: usize,
        /// Number of codeblocks requested
        found: usize,
    },
    /// File read/write error
    #[error("{0}")]
    FileReadWriteError(#[from] std::io::Error),
    /// Serde read/write error
    #[error("{0}")]
    SerdeReadWriteError(#[from] serde_json::Error),
}

/// Enumeration of binary symbol values
#[derive(Clone, Eq, PartialEq, Debug, Copy)]
pub enum Bit {
    /// Binary symbol `0`
    Zero = 0,
    /// Binary symbol `1`
    One = 1,
}
