use std::sync::Arc;

/// A byte-addressable region that can be installed into an [`AddressSpace`].
///
/// Regions own their bytes (or a shared read-only view of them); aliasing
/// between regions is expressed with `Mirror`, which redirects back through
/// the owning address space instead of sharing a buffer.
pub enum Region {
    /// Plain read/write memory.
    Ram(Vec<u8>),
    /// Read-only window into shared cartridge data. Writing is a
    /// programming error; wrap in `WriteProtect` where writes must be
    /// silently dropped instead.
    Rom {
        data: Arc<[u8]>,
        start: usize,
        len: usize,
    },
    /// Redirects accesses to `target + (rel % source_size)` in the same
    /// address space. `size` is the extent of the mirror window itself.
    Mirror {
        target: u16,
        source_size: u16,
        size: u16,
    },
    /// Reads hit one target, writes another. Models hardware where read
    /// and write decode to different silicon at the same address.
    Mixed {
        read: Box<Region>,
        write: Box<Region>,
    },
    /// Reads pass through, writes are dropped.
    WriteProtect(Box<Region>),
}

enum Resolved {
    Value(u8),
    Redirect(u16),
}

enum WriteResolved {
    Done,
    Redirect(u16),
}

impl Region {
    pub fn ram(size: usize) -> Region {
        Region::Ram(vec![0; size])
    }

    pub fn rom(data: Arc<[u8]>, start: usize, len: usize) -> Region {
        debug_assert!(start + len <= data.len());
        Region::Rom { data, start, len }
    }

    pub fn len(&self) -> usize {
        match self {
            Region::Ram(bytes) => bytes.len(),
            Region::Rom { len, .. } => *len,
            Region::Mirror { size, .. } => *size as usize,
            Region::Mixed { read, .. } => read.len(),
            Region::WriteProtect(inner) => inner.len(),
        }
    }

    fn read_at(&self, rel: u16) -> Resolved {
        match self {
            Region::Ram(bytes) => Resolved::Value(bytes[rel as usize]),
            Region::Rom { data, start, .. } => Resolved::Value(data[start + rel as usize]),
            Region::Mirror {
                target,
                source_size,
                ..
            } => Resolved::Redirect(target.wrapping_add(rel % source_size)),
            Region::Mixed { read, .. } => read.read_at(rel),
            Region::WriteProtect(inner) => inner.read_at(rel),
        }
    }

    fn write_at(&mut self, rel: u16, value: u8) -> WriteResolved {
        match self {
            Region::Ram(bytes) => {
                bytes[rel as usize] = value;
                WriteResolved::Done
            }
            Region::Rom { .. } => panic!("write to read-only region at +{rel:#06X}"),
            Region::Mirror {
                target,
                source_size,
                ..
            } => WriteResolved::Redirect(target.wrapping_add(rel % *source_size)),
            Region::Mixed { write, .. } => write.write_at(rel, value),
            Region::WriteProtect(_) => WriteResolved::Done,
        }
    }
}

/// Flat address range composed of non-overlapping regions, resolved by the
/// greatest installed offset at or below the accessed address.
///
/// Every address the bus masters can produce must be covered; the mapper
/// contract guarantees this, so a miss panics rather than returning junk.
pub struct AddressSpace {
    regions: Vec<(u16, Region)>,
}

impl AddressSpace {
    pub fn new() -> AddressSpace {
        AddressSpace {
            regions: Vec::new(),
        }
    }

    /// Installs `region` at `offset`, replacing any region already at the
    /// exact same offset.
    pub fn install(&mut self, offset: u16, region: Region) {
        match self.regions.binary_search_by_key(&offset, |(o, _)| *o) {
            Ok(i) => self.regions[i].1 = region,
            Err(i) => self.regions.insert(i, (offset, region)),
        }
    }

    fn locate(&self, addr: u16) -> usize {
        let i = self.regions.partition_point(|(o, _)| *o <= addr);
        if i == 0 {
            panic!("unmapped address {addr:#06X}");
        }
        let (offset, region) = &self.regions[i - 1];
        if (addr - offset) as usize >= region.len() {
            panic!("unmapped address {addr:#06X}");
        }
        i - 1
    }

    pub fn read(&self, mut addr: u16) -> u8 {
        // Mirrors may chain (a mirror window over another mirror); anything
        // deeper than a few hops is a wiring bug.
        for _ in 0..8 {
            let i = self.locate(addr);
            let (offset, region) = &self.regions[i];
            match region.read_at(addr - offset) {
                Resolved::Value(v) => return v,
                Resolved::Redirect(next) => addr = next,
            }
        }
        panic!("mirror chain too deep at {addr:#06X}");
    }

    pub fn write(&mut self, mut addr: u16, value: u8) {
        for _ in 0..8 {
            let i = self.locate(addr);
            let offset = self.regions[i].0;
            match self.regions[i].1.write_at(addr - offset, value) {
                WriteResolved::Done => return,
                WriteResolved::Redirect(next) => addr = next,
            }
        }
        panic!("mirror chain too deep at {addr:#06X}");
    }
}
