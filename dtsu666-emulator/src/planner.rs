use crate::catalog::Catalog;
use crate::codec::{Address, Quantity};

/// Largest number of registers requested in one read. Keeps RTU frames short.
pub const MAX_BLOCK_WORDS: Quantity = 16;

/// Meter configuration words.
pub const CONFIG_SECTION: Section = Section::new(0x0000, 0x0100);
/// Energy counters.
pub const ENERGY_SECTION: Section = Section::new(0x1000, 0x1FFF);
/// Live electrical quantities (voltage, current, power, power factor, frequency).
pub const LIVE_SECTION: Section = Section::new(0x2000, 0x2046);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Address range scanned by a single [`plan_section`] call.
///
/// Planning starts at the catalog entry located exactly at `start`; only entries below `end` are read.
pub struct Section {
    pub start: Address,
    pub end: Address,
}

impl Section {
    pub const fn new(start: Address, end: Address) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Contiguous run of registers read with one request.
pub struct Block {
    pub start: Address,
    pub count: Quantity,
}

impl Block {
    /// First address after the block.
    pub fn end(&self) -> u32 {
        self.start as u32 + self.count as u32
    }
}

/// Split the catalog entries of `section` into the fewest gap-free reads of at most [`MAX_BLOCK_WORDS`].
///
/// A block is closed at the first address gap, at the size cap, or at the section end, whichever
/// comes first. The next block starts at the following catalog entry. A section whose start
/// address is not a catalog entry produces no blocks.
pub fn plan_section(catalog: &Catalog, section: Section) -> Vec<Block> {
    let mut blocks = Vec::new();

    let Some(mut i) = catalog.position(section.start) else {
        tracing::trace!(
            "no register at section start 0x{:04x}, nothing to read",
            section.start
        );
        return blocks;
    };

    let mut block_start = catalog.address_at(i);
    while i < catalog.len() && catalog.address_at(i) <= section.end {
        let mut count: Quantity = 0;
        while let Some(descriptor) = catalog.get(i) {
            let size = descriptor.kind.word_size();
            let contiguous = descriptor.address as u32 == block_start as u32 + count as u32;
            let fits = count + size <= MAX_BLOCK_WORDS;
            if !contiguous || descriptor.address >= section.end || !fits {
                break;
            }
            count += size;
            i += 1;
        }
        if count == 0 {
            // Entry sits on the section end: nothing left to read.
            break;
        }

        tracing::trace!("block of {count} registers at 0x{block_start:04x}");
        blocks.push(Block {
            start: block_start,
            count,
        });
        block_start = catalog.address_at(i);
    }

    blocks
}
