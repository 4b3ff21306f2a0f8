//! Command dispatcher over a handle registry and a decoder
//!
//! A [`Dispatcher`] is the context object of a decoding session: it owns the [`HandleRegistry`]
//! holding every buffer pool and the [`Decoder`] used by `step`. Commands are issued either
//! through the typed methods ([`Dispatcher::new_pool`], [`Dispatcher::step`],
//! [`Dispatcher::reset_crcs`] and [`Dispatcher::release`]) or through [`Dispatcher::dispatch`],
//! which takes the command name and its arguments as a list of dynamically-typed [`Value`]s,
//! checks them against the contract of the command, and returns the results as [`Value`]s.
//!
//! | Command | Arguments | Results |
//! |---|---|---|
//! | `new` | pool configuration (struct) | handle (scalar `u64`) |
//! | `step` | handle (scalar `u64`), buffer ID (struct), number of codeblocks (scalar `u32`), new-data flag (scalar logical), LLRs (`i8` array), segmentation configuration (struct) | transport block (`u8` array), decoding statistics (struct) |
//! | `reset_crcs` | handle (scalar `u64`), buffer ID (struct) | none |
//! | `release` | handle (scalar `u64`) | released flag (scalar logical) |

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    BufferIdentifier, DecodeStats, Decoder, Error, Handle, HandleRegistry, PoolConfig,
    SegmentationConfig,
};

/// Dynamically-typed command argument or result
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    /// Character array
    Char(String),
    /// Array of logical values
    Logical(Vec<bool>),
    /// Array of `i8` values
    Int8(Vec<i8>),
    /// Array of `u8` values
    Uint8(Vec<u8>),
    /// Array of `u32` values
    Uint32(Vec<u32>),
    /// Array of `u64` values
    Uint64(Vec<u64>),
    /// Structure with named fields
    Struct(serde_json::Map<String, serde_json::Value>),
}

impl Value {
    /// Returns structure with the fields of a serializable record.
    ///
    /// # Errors
    ///
    /// Returns an error if `record` does not serialize to a structure.
    pub fn record<T: Serialize>(record: &T) -> Result<Self, Error> {
        match serde_json::to_value(record)? {
            serde_json::Value::Object(fields) => Ok(Value::Struct(fields)),
            other => Err(Error::InvalidArgument(format!(
                "Expected a record, found {other}"
            ))),
        }
    }

    /// Returns record decoded from a structure.
    ///
    /// # Errors
    ///
    /// Returns an error if `self` is not a structure or if its fields do not describe a `T`.
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T, Error> {
        match self {
            Value::Struct(fields) => {
                serde_json::from_value(serde_json::Value::Object(fields.clone())).map_err(|err| {
                    Error::InvalidArgument(format!("Invalid structure fields: {err}"))
                })
            }
            other => Err(Error::InvalidArgument(format!(
                "Expected a structure, found {}",
                other.type_name()
            ))),
        }
    }

    /// Returns the value of a scalar `u64`.
    ///
    /// # Errors
    ///
    /// Returns an error if `self` is not a scalar `u64`.
    pub fn as_u64(&self) -> Result<u64, Error> {
        match self {
            Value::Uint64(values) if values.len() == 1 => Ok(values[0]),
            other => Err(unexpected("a scalar uint64", other)),
        }
    }

    /// Returns the value of a scalar `u32`.
    ///
    /// # Errors
    ///
    /// Returns an error if `self` is not a scalar `u32`.
    pub fn as_u32(&self) -> Result<u32, Error> {
        match self {
            Value::Uint32(values) if values.len() == 1 => Ok(values[0]),
            other => Err(unexpected("a scalar uint32", other)),
        }
    }

    /// Returns the value of a scalar logical.
    ///
    /// # Errors
    ///
    /// Returns an error if `self` is not a scalar logical.
    pub fn as_bool(&self) -> Result<bool, Error> {
        match self {
            Value::Logical(values) if values.len() == 1 => Ok(values[0]),
            other => Err(unexpected("a scalar logical", other)),
        }
    }

    /// Returns the values of an `i8` array.
    ///
    /// # Errors
    ///
    /// Returns an error if `self` is not an `i8` array.
    pub fn as_i8_slice(&self) -> Result<&[i8], Error> {
        match self {
            Value::Int8(values) => Ok(values),
            other => Err(unexpected("an array of int8", other)),
        }
    }

    /// Returns the name of the variant.
    fn type_name(&self) -> &'static str {
        match self {
            Value::Char(_) => "char",
            Value::Logical(_) => "logical",
            Value::Int8(_) => "int8",
            Value::Uint8(_) => "uint8",
            Value::Uint32(_) => "uint32",
            Value::Uint64(_) => "uint64",
            Value::Struct(_) => "struct",
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Char(text.to_string())
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Logical(vec![flag])
    }
}

impl From<u32> for Value {
    fn from(number: u32) -> Self {
        Value::Uint32(vec![number])
    }
}

impl From<Handle> for Value {
    fn from(handle: Handle) -> Self {
        Value::Uint64(vec![handle.as_u64()])
    }
}

impl From<Vec<i8>> for Value {
    fn from(llrs: Vec<i8>) -> Self {
        Value::Int8(llrs)
    }
}

/// Returns error for an argument of the wrong type or shape.
fn unexpected(expected: &str, found: &Value) -> Error {
    Error::InvalidArgument(format!("Expected {expected}, found {}", found.type_name()))
}

/// Type and shape required for a command argument
#[derive(Clone, Eq, PartialEq, Debug, Copy)]
enum Kind {
    /// Scalar logical
    LogicalScalar,
    /// Array of `i8` values of any length
    Int8Array,
    /// Scalar `u32`
    Uint32Scalar,
    /// Scalar `u64`
    Uint64Scalar,
    /// Scalar structure
    Struct,
}

impl Kind {
    /// Returns `true` if `value` has this type and shape.
    fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (Kind::LogicalScalar, Value::Logical(values)) => values.len() == 1,
            (Kind::Uint32Scalar, Value::Uint32(values)) => values.len() == 1,
            (Kind::Uint64Scalar, Value::Uint64(values)) => values.len() == 1,
            (Kind::Int8Array, Value::Int8(_)) | (Kind::Struct, Value::Struct(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::LogicalScalar => "a scalar logical",
            Kind::Int8Array => "an array of int8",
            Kind::Uint32Scalar => "a scalar uint32",
            Kind::Uint64Scalar => "a scalar uint64",
            Kind::Struct => "a scalar structure",
        })
    }
}

/// Enumeration of dispatcher commands
#[derive(Clone, Eq, Hash, PartialEq, Debug, Copy)]
pub enum Command {
    /// Creates a buffer pool
    New,
    /// Decodes one transmission
    Step,
    /// Resets the CRC flags of a soft buffer
    ResetCrcs,
    /// Releases a buffer pool
    Release,
}

impl Command {
    /// Returns the name of the command.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Command::New => "new",
            Command::Step => "step",
            Command::ResetCrcs => "reset_crcs",
            Command::Release => "release",
        }
    }

    /// Returns name and required kind of each argument (after the command name).
    fn inputs(self) -> &'static [(&'static str, Kind)] {
        match self {
            Command::New => &[("pool_config", Kind::Struct)],
            Command::Step => &[
                ("handle", Kind::Uint64Scalar),
                ("buffer_id", Kind::Struct),
                ("nof_codeblocks", Kind::Uint32Scalar),
                ("new_data", Kind::LogicalScalar),
                ("llrs", Kind::Int8Array),
                ("seg_cfg", Kind::Struct),
            ],
            Command::ResetCrcs => &[("handle", Kind::Uint64Scalar), ("buffer_id", Kind::Struct)],
            Command::Release => &[("handle", Kind::Uint64Scalar)],
        }
    }

    /// Returns number of results.
    #[must_use]
    pub fn nof_outputs(self) -> usize {
        match self {
            Command::New | Command::Release => 1,
            Command::Step => 2,
            Command::ResetCrcs => 0,
        }
    }

    /// Checks arguments and number of requested results against the contract of the command.
    fn check(self, nof_outputs: usize, inputs: &[Value]) -> Result<(), Error> {
        let expected = self.inputs();
        if inputs.len() != expected.len() {
            return Err(Error::InvalidArgument(format!(
                "Wrong number of inputs for '{self}' (expected {}, found {}).",
                expected.len(),
                inputs.len()
            )));
        }
        if let Some(((name, kind), _)) = expected
            .iter()
            .zip(inputs)
            .find(|((_, kind), value)| !kind.matches(value))
        {
            return Err(Error::InvalidArgument(format!(
                "Input '{name}' of '{self}' must be {kind}."
            )));
        }
        if nof_outputs != self.nof_outputs() {
            return Err(Error::InvalidArgument(format!(
                "Wrong number of outputs for '{self}' (expected {}, found {nof_outputs}).",
                self.nof_outputs()
            )));
        }
        Ok(())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "new" => Ok(Command::New),
            "step" => Ok(Command::Step),
            "reset_crcs" => Ok(Command::ResetCrcs),
            "release" => Ok(Command::Release),
            _ => Err(Error::InvalidArgument(format!("Unknown action: {name}."))),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Context object owning the buffer pools of a session and the decoder that uses them
#[derive(Debug, Default)]
pub struct Dispatcher<D> {
    /// Owner of all buffer pools
    registry: HandleRegistry,
    /// Decoder used by `step`
    decoder: D,
}

impl<D: Decoder> Dispatcher<D> {
    /// Returns dispatcher with an empty registry and the given decoder.
    pub fn new(decoder: D) -> Self {
        Self {
            registry: HandleRegistry::new(),
            decoder,
        }
    }

    /// Returns the registry of buffer pools.
    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Returns the mutable registry of buffer pools.
    pub fn registry_mut(&mut self) -> &mut HandleRegistry {
        &mut self.registry
    }

    /// Runs the command named by the first input.
    ///
    /// # Parameters
    ///
    /// - `nof_outputs`: Number of results requested by the caller.
    ///
    /// - `inputs`: Command name (a [`Value::Char`]) followed by the arguments of the command.
    ///
    /// # Returns
    ///
    /// - `outputs`: Results of the command (exactly `nof_outputs` values).
    ///
    /// # Errors
    ///
    /// Returns an error if the command is unknown, if the arguments or the number of results do
    /// not match the contract of the command, or if the command itself fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use harqbuf::{Dispatcher, PoolConfig, ReferenceDecoder, Value};
    ///
    /// let mut dispatcher = Dispatcher::new(ReferenceDecoder);
    /// let config = Value::record(&PoolConfig {
    ///     max_codeblock_size: 8192,
    ///     max_buffers: 4,
    ///     max_codeblocks: 16,
    ///     expire_timeout_slots: 10,
    /// })?;
    /// let handle = dispatcher.dispatch(1, &["new".into(), config])?.remove(0);
    /// let released = dispatcher.dispatch(1, &["release".into(), handle.clone()])?;
    /// assert_eq!(released, [Value::from(true)]);
    /// let released = dispatcher.dispatch(1, &["release".into(), handle])?;
    /// assert_eq!(released, [Value::from(false)]);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn dispatch(&mut self, nof_outputs: usize, inputs: &[Value]) -> Result<Vec<Value>, Error> {
        let command = match inputs.first() {
            Some(Value::Char(name)) => name.parse::<Command>(),
            _ => Err(Error::InvalidArgument(
                "First input must be a char.".to_string(),
            )),
        }
        .and_then(|command| {
            command.check(nof_outputs, &inputs[1 ..])?;
            Ok(command)
        });
        let result = command.and_then(|command| {
            let args = &inputs[1 ..];
            match command {
                Command::New => self.method_new(args),
                Command::Step => self.method_step(args),
                Command::ResetCrcs => self.method_reset_crcs(args),
                Command::Release => self.method_release(args),
            }
        });
        if let Err(err) = &result {
            warn!(%err, "command rejected");
        }
        result
    }

    /// Creates a buffer pool and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if any bound in `config` is `0`.
    pub fn new_pool(&mut self, config: &PoolConfig) -> Result<Handle, Error> {
        self.registry.create(*config)
    }

    /// Reserves the soft buffer of a transmission and decodes it.
    ///
    /// # Parameters
    ///
    /// - `handle`: Handle of the buffer pool.
    ///
    /// - `id`: Soft-buffer identifier.
    ///
    /// - `nof_codeblocks`: Number of codeblocks in the transport block, which must agree with the
    ///   segmentation computed by the decoder.
    ///
    /// - `is_new_data`: `true` for a new transmission, `false` for a retransmission.
    ///
    /// - `llrs`: LLR values of the transmission.
    ///
    /// - `cfg`: Segmentation configuration. If it carries a slot, the soft buffer is reserved at
    ///   that slot, and the logical time of the pool advances to it if the reservation succeeds.
    ///
    /// # Returns
    ///
    /// - `tb`: Decoded transport block.
    ///
    /// - `stats`: Decoding statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if `handle` does not address a live pool, if the transmission cannot be
    /// decoded with the given configuration, if `nof_codeblocks` disagrees with the segmentation,
    /// or if the soft buffer cannot be reserved.
    pub fn step(
        &mut self,
        handle: Handle,
        id: BufferIdentifier,
        nof_codeblocks: usize,
        is_new_data: bool,
        llrs: &[i8],
        cfg: &SegmentationConfig,
    ) -> Result<(Vec<u8>, DecodeStats), Error> {
        let codeblock_size = self.registry.get(handle)?.config().max_codeblock_size;
        let nof_codeblocks_check = self
            .decoder
            .nof_codeblocks(cfg, llrs.len(), codeblock_size)?;
        if nof_codeblocks != nof_codeblocks_check {
            return Err(Error::InvalidArgument(format!(
                "Soft buffer {id} requested with {nof_codeblocks} codeblocks, but the codeword \
                 has {nof_codeblocks_check} codeblocks."
            )));
        }
        let pool = self.registry.get_mut(handle)?;
        let slot = cfg.slot.unwrap_or(pool.current_slot());
        let softbuffer = pool.reserve_at(slot, id, nof_codeblocks, is_new_data)?;
        let (tb, stats) = self.decoder.decode(llrs, softbuffer, cfg)?;
        debug!(
            %handle,
            %id,
            is_new_data,
            crc_ok = stats.crc_ok,
            iterations = stats.ldpc_iterations_max,
            "decoded transport block"
        );
        Ok((tb, stats))
    }

    /// Clears the CRC flags of a soft buffer, keeping its combined LLR values.
    ///
    /// # Errors
    ///
    /// Returns an error if `handle` does not address a live pool or if the pool holds no soft
    /// buffer for `id`.
    pub fn reset_crcs(&mut self, handle: Handle, id: BufferIdentifier) -> Result<(), Error> {
        self.registry.get_mut(handle)?.reset_codeblocks_crc(id)
    }

    /// Releases a buffer pool and all its soft buffers.
    ///
    /// Returns `true` if `handle` addressed a live pool, and `false` otherwise.
    pub fn release(&mut self, handle: Handle) -> bool {
        self.registry.release(handle)
    }

    /// Runs `new` on checked arguments.
    fn method_new(&mut self, args: &[Value]) -> Result<Vec<Value>, Error> {
        let config: PoolConfig = args[0].to_record()?;
        let handle = self.new_pool(&config)?;
        Ok(vec![Value::from(handle)])
    }

    /// Runs `step` on checked arguments.
    fn method_step(&mut self, args: &[Value]) -> Result<Vec<Value>, Error> {
        let handle = Handle::from(args[0].as_u64()?);
        let id: BufferIdentifier = args[1].to_record()?;
        let nof_codeblocks = usize::try_from(args[2].as_u32()?)
            .map_err(|_| Error::InvalidArgument("Too many codeblocks".to_string()))?;
        let is_new_data = args[3].as_bool()?;
        let llrs = args[4].as_i8_slice()?;
        let cfg: SegmentationConfig = args[5].to_record()?;
        let (tb, stats) = self.step(handle, id, nof_codeblocks, is_new_data, llrs, &cfg)?;
        Ok(vec![Value::Uint8(tb), Value::record(&stats)?])
    }

    /// Runs `reset_crcs` on checked arguments.
    fn method_reset_crcs(&mut self, args: &[Value]) -> Result<Vec<Value>, Error> {
        let handle = Handle::from(args[0].as_u64()?);
        let id: BufferIdentifier = args[1].to_record()?;
        self.reset_crcs(handle, id)?;
        Ok(Vec::new())
    }

    /// Runs `release` on checked arguments.
    fn method_release(&mut self, args: &[Value]) -> Result<Vec<Value>, Error> {
        let handle = Handle::from(args[0].as_u64()?);
        Ok(vec![Value::from(self.release(handle))])
    }
}
