// Blocks module - decoded-basic-block cache
//
// Amortizes decode cost across repeated execution of the same straight-line
// run. Blocks are keyed by their starting IP in a chained hash table; a
// lookup miss allocates a fresh empty block that the execute loop then fills
// by running the decoder until the first branch point or the size cap.
//
// Entries are append-only and never invalidated: decoding is pure with
// respect to IP and memory, and self-modifying code is out of scope, so a
// cached block stays valid for the lifetime of the run.

use crate::cpu::decode::DecodedInstruction;

/// Maximum instructions per basic block
pub const MAX_BLOCK: usize = 32;

/// Number of hash buckets. Power of two so the bucket index is a mask.
const BUCKET_COUNT: usize = 1 << 10;

/// A straight-line run of decoded instructions
///
/// Ends at the first branch-point instruction or at `MAX_BLOCK`, whichever
/// the fill loop hits first.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// IP of the block's first instruction
    pub start: u64,
    /// Decoded instructions, appended in program order
    pub instructions: Vec<DecodedInstruction>,
}

/// Hash table of decoded basic blocks keyed by starting address
pub struct BlockTable {
    buckets: Vec<Vec<BasicBlock>>,
    len: usize,
}

impl BlockTable {
    /// Create an empty table
    pub fn new() -> Self {
        BlockTable {
            buckets: vec![Vec::new(); BUCKET_COUNT],
            len: 0,
        }
    }

    #[inline]
    fn bucket_index(address: u64) -> usize {
        (address & (BUCKET_COUNT as u64 - 1)) as usize
    }

    /// Look up the block starting at `address`, allocating a fresh empty
    /// block on a miss.
    ///
    /// The same address always yields the same entry; the table never stores
    /// two blocks with the same key.
    pub fn get_or_insert(&mut self, address: u64) -> &mut BasicBlock {
        let bucket = &mut self.buckets[Self::bucket_index(address)];

        if let Some(found) = bucket.iter().position(|block| block.start == address) {
            return &mut bucket[found];
        }

        self.len += 1;
        bucket.push(BasicBlock {
            start: address,
            instructions: Vec::with_capacity(MAX_BLOCK),
        });
        let last = bucket.len() - 1;
        &mut bucket[last]
    }

    /// Number of blocks in the table
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the table holds no blocks yet
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for BlockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::SrcOperand;
    use crate::cpu::opcodes::{Cond, Op};
    use crate::cpu::INVALID_ID;

    fn halt_instruction() -> DecodedInstruction {
        DecodedInstruction {
            op: Op::Halt,
            cond: Cond::True,
            dest: INVALID_ID,
            src: SrcOperand::Immediate(0),
            instruction_size: 1,
        }
    }

    #[test]
    fn test_miss_allocates_empty_block() {
        let mut table = BlockTable::new();
        assert!(table.is_empty());

        let block = table.get_or_insert(0x40);
        assert_eq!(block.start, 0x40);
        assert!(block.instructions.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_same_address_yields_same_entry() {
        let mut table = BlockTable::new();

        table.get_or_insert(0x100).instructions.push(halt_instruction());

        let block = table.get_or_insert(0x100);
        assert_eq!(block.instructions.len(), 1, "Filled block is found again");
        assert_eq!(table.len(), 1, "No duplicate entry for the same key");
    }

    #[test]
    fn test_distinct_addresses_get_distinct_entries() {
        let mut table = BlockTable::new();

        table.get_or_insert(0).instructions.push(halt_instruction());
        let other = table.get_or_insert(8);
        assert!(other.instructions.is_empty());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_colliding_keys_chain_in_one_bucket() {
        let mut table = BlockTable::new();

        // These addresses differ only above the mask, so they share a bucket.
        let a = 0x40u64;
        let b = a + (BUCKET_COUNT as u64);
        let c = a + 2 * (BUCKET_COUNT as u64);

        table.get_or_insert(a).instructions.push(halt_instruction());
        table.get_or_insert(b);
        table.get_or_insert(c);

        assert_eq!(table.len(), 3);
        assert_eq!(table.get_or_insert(a).instructions.len(), 1);
        assert_eq!(table.get_or_insert(b).instructions.len(), 0);
        assert_eq!(table.get_or_insert(c).instructions.len(), 0);
    }

    #[test]
    fn test_entries_survive_many_inserts() {
        let mut table = BlockTable::new();
        table.get_or_insert(7).instructions.push(halt_instruction());

        for address in 0..4096u64 {
            table.get_or_insert(address * 16 + 8);
        }

        assert_eq!(
            table.get_or_insert(7).instructions.len(),
            1,
            "Existing entries keep their instructions as the table grows"
        );
    }
}
