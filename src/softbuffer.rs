//! Soft buffers and their identifiers

use serde::{Deserialize, Serialize};

/// Identifier of a soft buffer within a pool (UE RNTI and HARQ process ID)
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd, Debug, Copy, Deserialize, Serialize)]
pub struct BufferIdentifier {
    /// Radio network temporary identifier of the UE
    pub rnti: u16,
    /// HARQ process ID
    pub harq_process_id: u32,
}

impl BufferIdentifier {
    /// Returns identifier for given RNTI and HARQ process ID.
    #[must_use]
    pub fn new(rnti: u16, harq_process_id: u32) -> Self {
        Self {
            rnti,
            harq_process_id,
        }
    }
}

impl std::fmt::Display for BufferIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(RNTI {:#06x}, HARQ {})", self.rnti, self.harq_process_id)
    }
}

/// Soft-combining storage for the codeblocks of one transport block
///
/// Each codeblock owns a fixed-size array of LLR values, with positive values indicating that
/// `Zero` is more likely, and a flag recording whether the codeblock passed its CRC. The number of
/// codeblocks is fixed when the buffer is created.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct SoftBuffer {
    /// Combined LLR values, one array per codeblock
    codeblocks: Vec<Vec<i8>>,
    /// CRC outcome, one flag per codeblock
    crc_ok: Vec<bool>,
}

impl SoftBuffer {
    /// Returns zero-initialized soft buffer with given number of codeblocks, or `None` if the
    /// memory for it cannot be allocated.
    pub(crate) fn try_new(nof_codeblocks: usize, codeblock_size: usize) -> Option<Self> {
        let mut codeblocks = Vec::new();
        codeblocks.try_reserve_exact(nof_codeblocks).ok()?;
        for _ in 0 .. nof_codeblocks {
            let mut codeblock = Vec::new();
            codeblock.try_reserve_exact(codeblock_size).ok()?;
            codeblock.resize(codeblock_size, 0);
            codeblocks.push(codeblock);
        }
        Some(Self {
            codeblocks,
            crc_ok: vec![false; nof_codeblocks],
        })
    }

    /// Returns number of codeblocks.
    #[must_use]
    pub fn nof_codeblocks(&self) -> usize {
        self.codeblocks.len()
    }

    /// Returns number of LLR values that can be stored per codeblock.
    #[must_use]
    pub fn codeblock_size(&self) -> usize {
        self.codeblocks.first().map_or(0, Vec::len)
    }

    /// Returns combined LLR values of a codeblock.
    ///
    /// # Panics
    ///
    /// Panics if `cb_index` is not less than the number of codeblocks.
    #[must_use]
    pub fn codeblock(&self, cb_index: usize) -> &[i8] {
        &self.codeblocks[cb_index]
    }

    /// Returns mutable combined LLR values of a codeblock.
    ///
    /// # Panics
    ///
    /// Panics if `cb_index` is not less than the number of codeblocks.
    pub fn codeblock_mut(&mut self, cb_index: usize) -> &mut [i8] {
        &mut self.codeblocks[cb_index]
    }

    /// Returns CRC flags of all codeblocks.
    #[must_use]
    pub fn codeblocks_crc(&self) -> &[bool] {
        &self.crc_ok
    }

    /// Returns mutable CRC flags of all codeblocks.
    pub fn codeblocks_crc_mut(&mut self) -> &mut [bool] {
        &mut self.crc_ok
    }

    /// Returns `true` if every codeblock passed its CRC.
    #[must_use]
    pub fn all_crc_ok(&self) -> bool {
        self.crc_ok.iter().all(|&ok| ok)
    }

    /// Clears the CRC flag of every codeblock, keeping the combined LLR values.
    pub fn reset_codeblocks_crc(&mut self) {
        self.crc_ok.fill(false);
    }
}

#[cfg(test)]
mod tests_of_soft_buffer {
    use super::*;

    #[test]
    fn test_identifier() {
        let id = BufferIdentifier::new(0x4601, 3);
        assert_eq!(id, BufferIdentifier::new(0x4601, 3));
        assert_ne!(id, BufferIdentifier::new(0x4601, 4));
        assert_ne!(id, BufferIdentifier::new(0x4602, 3));
        assert_eq!(id.to_string(), "(RNTI 0x4601, HARQ 3)");
    }

    #[test]
    fn test_new() {
        let buf = SoftBuffer::try_new(3, 16).unwrap();
        assert_eq!(buf.nof_codeblocks(), 3);
        assert_eq!(buf.codeblock_size(), 16);
        assert!((0 .. 3).all(|cb| buf.codeblock(cb).iter().all(|&llr| llr == 0)));
        assert_eq!(buf.codeblocks_crc(), [false, false, false]);
        assert!(!buf.all_crc_ok());
    }

    #[test]
    fn test_reset_codeblocks_crc() {
        let mut buf = SoftBuffer::try_new(2, 4).unwrap();
        buf.codeblock_mut(1).copy_from_slice(&[1, -2, 3, -4]);
        buf.codeblocks_crc_mut().fill(true);
        assert!(buf.all_crc_ok());
        buf.reset_codeblocks_crc();
        assert_eq!(buf.codeblocks_crc(), [false, false]);
        assert_eq!(buf.codeblock(1), [1, -2, 3, -4]);
        assert_eq!(buf.nof_codeblocks(), 2);
    }
}
