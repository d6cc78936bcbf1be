//! Coalesces scattered register addresses into burst reads.

use crate::serial::RegisterAddress;

use super::types::BurstBlock;

/// Upper bound on registers served by one burst read.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 32;

/// Group `addresses` into the fewest contiguous blocks with stride `size_bytes`.
///
/// Input order is irrelevant and duplicates collapse. Each block holds at most
/// `max_block_size` members and never wraps past the top of the address space.
pub fn group_addresses(
    addresses: &[RegisterAddress],
    size_bytes: u8,
    max_block_size: usize,
) -> Vec<BurstBlock> {
    let stride = u32::from(size_bytes);
    let cap = max_block_size.max(1);

    let mut sorted = addresses.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut blocks: Vec<BurstBlock> = Vec::new();
    for address in sorted {
        if let Some(current) = blocks.last_mut() {
            let last = current.members[current.members.len() - 1];
            if last.offset(stride) == Some(address) && current.members.len() < cap {
                current.members.push(address);
                current.length_bytes += stride;
                continue;
            }
        }
        blocks.push(BurstBlock {
            start_address: address,
            length_bytes: stride,
            members: vec![address],
        });
    }
    blocks
}
