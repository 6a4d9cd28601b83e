use anyhow::{Result, bail};
use std::sync::Arc;

use super::cartridge::Cartridge;
use super::memory::{AddressSpace, Region};

/// Nametable wiring. The PPU derives its physical-table map from this;
/// mappers may rewire it at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    OneScreenLow,
    OneScreenHigh,
    FourScreen,
}

/// Cartridge hardware behind the CPU's $6000-$FFFF window and the PPU's
/// pattern range. Bank switches re-install windows in the owned address
/// spaces rather than mutating shared buffers.
pub trait Mapper: Send {
    fn cpu_read(&mut self, addr: u16) -> u8;
    fn cpu_write(&mut self, addr: u16, value: u8);
    /// Pattern memory ($0000-$1FFF in PPU space).
    fn chr(&mut self) -> &mut AddressSpace;
    fn mirroring(&self) -> Mirroring;
    /// Scanline counter clock, driven by the PPU's fetch pattern.
    fn clock_scanline(&mut self) {}
    fn irq_asserted(&self) -> bool {
        false
    }
}

pub fn create_mapper(cart: Cartridge) -> Result<Box<dyn Mapper>> {
    match cart.mapper_id {
        0 => Ok(Box::new(Nrom::new(cart))),
        2 => Ok(Box::new(UxRom::new(cart))),
        4 => Ok(Box::new(Mmc3::new(cart))),
        22 => Ok(Box::new(Vrc2::new(cart, Vrc2Revision::A))),
        23 => Ok(Box::new(Vrc2::new(cart, Vrc2Revision::B))),
        id => bail!("unsupported mapper {id}"),
    }
}

const PRG_RAM_BASE: u16 = 0x6000;
const PRG_RAM_SIZE: usize = 0x2000;
const TRAINER_BASE: u16 = 0x7000;

/// $6000-$7FFF work RAM, with any trainer blob preloaded at $7000.
fn prg_space_with_ram(cart: &Cartridge) -> AddressSpace {
    let mut prg = AddressSpace::new();
    prg.install(PRG_RAM_BASE, Region::ram(PRG_RAM_SIZE));
    if let Some(trainer) = &cart.trainer {
        for (i, &byte) in trainer.iter().enumerate() {
            prg.write(TRAINER_BASE + i as u16, byte);
        }
    }
    prg
}

fn chr_window(data: &Arc<[u8]>, start: usize, len: usize) -> Region {
    Region::WriteProtect(Box::new(Region::rom(data.clone(), start, len)))
}

/// Full 8 KB CHR space: RAM when the image carries none, protected ROM
/// otherwise.
fn flat_chr_space(cart: &Cartridge) -> AddressSpace {
    let mut chr = AddressSpace::new();
    if cart.chr_is_ram {
        chr.install(0x0000, Region::Ram(cart.chr.to_vec()));
    } else {
        chr.install(0x0000, chr_window(&cart.chr, 0, 0x2000));
    }
    chr
}

/// Mapper 0. PRG is wired straight through; a single 16 KB page shows up
/// at both $8000 and $C000.
pub struct Nrom {
    prg: AddressSpace,
    chr: AddressSpace,
    mirroring: Mirroring,
}

impl Nrom {
    pub fn new(cart: Cartridge) -> Nrom {
        let mut prg = prg_space_with_ram(&cart);
        prg.install(
            0x8000,
            Region::rom(cart.prg.clone(), 0, 0x4000.min(cart.prg.len())),
        );
        let last = cart.prg_bank_start(cart.prg_page_count() - 1, 0x4000);
        prg.install(0xC000, Region::rom(cart.prg.clone(), last, 0x4000));
        Nrom {
            prg,
            chr: flat_chr_space(&cart),
            mirroring: cart.mirroring,
        }
    }
}

impl Mapper for Nrom {
    fn cpu_read(&mut self, addr: u16) -> u8 {
        self.prg.read(addr)
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        if addr < 0x8000 {
            self.prg.write(addr, value);
        }
    }

    fn chr(&mut self) -> &mut AddressSpace {
        &mut self.chr
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }
}

/// Mapper 2. 16 KB switchable window at $8000, last page fixed at $C000.
pub struct UxRom {
    cart: Cartridge,
    prg: AddressSpace,
    chr: AddressSpace,
    mirroring: Mirroring,
}

impl UxRom {
    pub fn new(cart: Cartridge) -> UxRom {
        let mut prg = prg_space_with_ram(&cart);
        prg.install(0x8000, Region::rom(cart.prg.clone(), 0, 0x4000));
        let last = cart.prg_bank_start(cart.prg_page_count() - 1, 0x4000);
        prg.install(0xC000, Region::rom(cart.prg.clone(), last, 0x4000));
        let chr = flat_chr_space(&cart);
        let mirroring = cart.mirroring;
        UxRom {
            cart,
            prg,
            chr,
            mirroring,
        }
    }
}

impl Mapper for UxRom {
    fn cpu_read(&mut self, addr: u16) -> u8 {
        self.prg.read(addr)
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        if addr < 0x8000 {
            self.prg.write(addr, value);
            return;
        }
        let start = self.cart.prg_bank_start((value & 0x0F) as usize, 0x4000);
        self.prg
            .install(0x8000, Region::rom(self.cart.prg.clone(), start, 0x4000));
    }

    fn chr(&mut self) -> &mut AddressSpace {
        &mut self.chr
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }
}

/// Mapper 4. Eight bank registers behind a select port, plus the
/// scanline IRQ counter.
pub struct Mmc3 {
    cart: Cartridge,
    prg: AddressSpace,
    chr: AddressSpace,
    mirroring: Mirroring,

    regs: [u8; 8],
    select: u8,
    prg_bank_mode: bool,
    chr_bank_mode: bool,

    irq_counter: u8,
    irq_latch: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_pending: bool,
}

impl Mmc3 {
    pub fn new(cart: Cartridge) -> Mmc3 {
        let prg = prg_space_with_ram(&cart);
        let chr = if cart.chr_is_ram {
            flat_chr_space(&cart)
        } else {
            AddressSpace::new()
        };
        let mirroring = cart.mirroring;
        let mut mapper = Mmc3 {
            cart,
            prg,
            chr,
            mirroring,
            regs: [0; 8],
            select: 0,
            prg_bank_mode: false,
            chr_bank_mode: false,
            irq_counter: 0,
            irq_latch: 0,
            irq_reload: false,
            irq_enabled: false,
            irq_pending: false,
        };
        mapper.apply_banks();
        mapper
    }

    fn apply_banks(&mut self) {
        // CHR RAM images keep the flat 8 KB space; only ROM is banked.
        if !self.cart.chr_is_ram {
            let (group1, group2) = if self.chr_bank_mode {
                (0x1000u16, 0x0000u16)
            } else {
                (0x0000u16, 0x1000u16)
            };
            for i in 0..2u16 {
                let start = self
                    .cart
                    .chr_bank_start((self.regs[i as usize] >> 1) as usize, 0x800);
                self.chr
                    .install(group1 + 0x800 * i, chr_window(&self.cart.chr, start, 0x800));
            }
            for i in 2..6u16 {
                let start = self.cart.chr_bank_start(self.regs[i as usize] as usize, 0x400);
                self.chr.install(
                    group2 + 0x400 * (i - 2),
                    chr_window(&self.cart.chr, start, 0x400),
                );
            }
        }

        let bank_count = self.cart.prg.len() / 0x2000;
        let last = self.cart.prg_bank_start(bank_count - 1, 0x2000);
        let second_last = self.cart.prg_bank_start(bank_count - 2, 0x2000);
        let r6 = self.cart.prg_bank_start((self.regs[6] & 0x3F) as usize, 0x2000);
        let r7 = self.cart.prg_bank_start((self.regs[7] & 0x3F) as usize, 0x2000);

        let (at_8000, at_c000) = if self.prg_bank_mode {
            (second_last, r6)
        } else {
            (r6, second_last)
        };
        self.prg
            .install(0x8000, Region::rom(self.cart.prg.clone(), at_8000, 0x2000));
        self.prg
            .install(0xA000, Region::rom(self.cart.prg.clone(), r7, 0x2000));
        self.prg
            .install(0xC000, Region::rom(self.cart.prg.clone(), at_c000, 0x2000));
        self.prg
            .install(0xE000, Region::rom(self.cart.prg.clone(), last, 0x2000));
    }
}

impl Mapper for Mmc3 {
    fn cpu_read(&mut self, addr: u16) -> u8 {
        self.prg.read(addr)
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        if addr < 0x8000 {
            self.prg.write(addr, value);
            return;
        }
        match ((addr >> 12) & 0x6) | (addr & 1) {
            0 => {
                self.select = value & 0x07;
                self.prg_bank_mode = (value & 0x40) != 0;
                self.chr_bank_mode = (value & 0x80) != 0;
                self.apply_banks();
            }
            1 => {
                self.regs[self.select as usize] = value;
                self.apply_banks();
            }
            2 => {
                if self.mirroring != Mirroring::FourScreen {
                    self.mirroring = if (value & 1) == 0 {
                        Mirroring::Vertical
                    } else {
                        Mirroring::Horizontal
                    };
                }
            }
            3 => {
                // PRG RAM protect, ignored for MMC6 compatibility.
            }
            4 => self.irq_latch = value,
            5 => self.irq_reload = true,
            6 => {
                self.irq_enabled = false;
                self.irq_pending = false;
            }
            _ => self.irq_enabled = true,
        }
    }

    fn chr(&mut self) -> &mut AddressSpace {
        &mut self.chr
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    fn clock_scanline(&mut self) {
        if self.irq_counter == 0 || self.irq_reload {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter -= 1;
        }
        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_pending = true;
        }
    }

    fn irq_asserted(&self) -> bool {
        self.irq_pending
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Vrc2Revision {
    /// Mapper 22. Register lines A0/A1 arrive swapped and CHR registers
    /// drop their low bit.
    A,
    /// Mapper 23.
    B,
}

/// Mappers 22 and 23. Two switchable 8 KB PRG windows and eight 1 KB CHR
/// banks selected through split nibble registers.
pub struct Vrc2 {
    cart: Cartridge,
    revision: Vrc2Revision,
    prg: AddressSpace,
    chr: AddressSpace,
    mirroring: Mirroring,
    chr_regs: [u8; 8],
}

impl Vrc2 {
    pub fn new(cart: Cartridge, revision: Vrc2Revision) -> Vrc2 {
        let mut prg = prg_space_with_ram(&cart);
        prg.install(0x8000, Region::rom(cart.prg.clone(), 0, 0x2000));
        prg.install(0xA000, Region::rom(cart.prg.clone(), 0x2000, 0x2000));
        let fixed = cart.prg_bank_start(cart.prg_page_count() - 1, 0x4000);
        prg.install(0xC000, Region::rom(cart.prg.clone(), fixed, 0x4000));

        let mut chr = AddressSpace::new();
        if cart.chr_is_ram {
            chr.install(0x0000, Region::Ram(cart.chr.to_vec()));
        } else {
            for i in 0..8u16 {
                chr.install(
                    0x400 * i,
                    chr_window(&cart.chr, 0x400 * i as usize, 0x400),
                );
            }
        }

        let mirroring = cart.mirroring;
        Vrc2 {
            cart,
            revision,
            prg,
            chr,
            mirroring,
            chr_regs: [0; 8],
        }
    }

    fn install_prg_bank(&mut self, base: u16, bank: u8) {
        let start = self.cart.prg_bank_start((bank & 0x1F) as usize, 0x2000);
        self.prg
            .install(base, Region::rom(self.cart.prg.clone(), start, 0x2000));
    }

    fn install_chr_bank(&mut self, index: usize) {
        if self.cart.chr_is_ram {
            return;
        }
        let mut bank = self.chr_regs[index];
        if self.revision == Vrc2Revision::A {
            bank >>= 1;
        }
        let start = self.cart.chr_bank_start(bank as usize, 0x400);
        self.chr.install(
            0x400 * index as u16,
            chr_window(&self.cart.chr, start, 0x400),
        );
    }
}

impl Mapper for Vrc2 {
    fn cpu_read(&mut self, addr: u16) -> u8 {
        self.prg.read(addr)
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        if addr < 0x8000 {
            self.prg.write(addr, value);
            return;
        }
        let mut rel = addr - 0x8000;
        if self.revision == Vrc2Revision::A {
            rel = (rel & 0xFFFC) | ((rel & 2) >> 1) | ((rel & 1) << 1);
        }
        // Only the two register-select lines may be set below bit 12.
        if (rel & 0x0FFC) != 0 {
            return;
        }
        match rel >> 12 {
            0 => self.install_prg_bank(0x8000, value & 0x1F),
            2 => self.install_prg_bank(0xA000, value & 0x1F),
            1 => {
                self.mirroring = if (value & 1) == 0 {
                    Mirroring::Vertical
                } else {
                    Mirroring::Horizontal
                };
            }
            3..=6 => {
                let index = (((rel >> 1) & 1) | (((rel >> 12) - 3) << 1)) as usize;
                if (rel & 1) == 0 {
                    self.chr_regs[index] = (self.chr_regs[index] & 0xF0) | (value & 0x0F);
                } else {
                    self.chr_regs[index] = (self.chr_regs[index] & 0x0F) | ((value & 0x0F) << 4);
                }
                self.install_chr_bank(index);
            }
            _ => {}
        }
    }

    fn chr(&mut self) -> &mut AddressSpace {
        &mut self.chr
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }
}

#[cfg(test)]
mod tests {
    use super::super::cartridge::tests::build_ines;
    use super::*;

    fn cart(mapper_id: u8, prg_pages: u8, chr_pages: u8) -> Cartridge {
        let mut bytes = build_ines(prg_pages, chr_pages, (mapper_id & 0x0F) << 4, |i| {
            (i / 1024) as u8
        });
        bytes[7] = mapper_id & 0xF0;
        Cartridge::load(&bytes).unwrap()
    }

    #[test]
    fn unknown_mapper_is_rejected_at_load() {
        let err = match create_mapper(cart(7, 1, 1)) {
            Ok(_) => panic!("mapper 7 must be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("unsupported mapper"));
    }

    #[test]
    fn nrom_mirrors_a_single_prg_page() {
        let mut mapper = Nrom::new(cart(0, 1, 1));
        assert_eq!(mapper.cpu_read(0x8000), mapper.cpu_read(0xC000));
        assert_eq!(mapper.cpu_read(0x9400), mapper.cpu_read(0xD400));
    }

    #[test]
    fn prg_ram_is_writable_and_trainer_lands_at_7000() {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(b"NES\x1A");
        bytes[4] = 1;
        bytes[5] = 1;
        bytes[6] = 0x04;
        bytes.extend((0..512).map(|i| (i % 251) as u8));
        bytes.extend(std::iter::repeat(0).take(0x4000 + 0x2000));
        let mut mapper = Nrom::new(Cartridge::load(&bytes).unwrap());

        assert_eq!(mapper.cpu_read(0x7005), 5);
        mapper.cpu_write(0x6123, 0x99);
        assert_eq!(mapper.cpu_read(0x6123), 0x99);
    }

    #[test]
    fn uxrom_switches_8000_and_keeps_last_page_fixed() {
        let mut mapper = UxRom::new(cart(2, 4, 0));
        let fixed = mapper.cpu_read(0xC000);
        assert_eq!(fixed, (3 * 0x4000 / 1024) as u8);

        mapper.cpu_write(0x8000, 2);
        assert_eq!(mapper.cpu_read(0x8000), (2 * 0x4000 / 1024) as u8);
        assert_eq!(mapper.cpu_read(0xC000), fixed);

        // Bank indices wrap modulo the page count.
        mapper.cpu_write(0x8000, 5);
        assert_eq!(mapper.cpu_read(0x8000), (0x4000 / 1024) as u8);
    }

    #[test]
    fn mmc3_bank_register_six_moves_the_8000_window() {
        let mut mapper = Mmc3::new(cart(4, 4, 1));
        mapper.cpu_write(0x8000, 6);
        mapper.cpu_write(0x8001, 0x02);
        assert_eq!(mapper.cpu_read(0x8000), (2 * 0x2000 / 1024) as u8);

        // Mode 1 parks the second-to-last bank at $8000 and moves R6 to
        // $C000 instead.
        mapper.cpu_write(0x8000, 0x40 | 6);
        assert_eq!(mapper.cpu_read(0xC000), (2 * 0x2000 / 1024) as u8);
        assert_eq!(mapper.cpu_read(0x8000), (6 * 0x2000 / 1024) as u8);

        // Last bank never moves.
        assert_eq!(mapper.cpu_read(0xE000), (7 * 0x2000 / 1024) as u8);
    }

    #[test]
    fn mmc3_chr_mode_swaps_the_pattern_halves() {
        let mut mapper = Mmc3::new(cart(4, 1, 1));
        mapper.cpu_write(0x8000, 2);
        mapper.cpu_write(0x8001, 5); // 1 KB bank 5 at $1000
        // CHR data sits after 16 KB of PRG in the test image.
        assert_eq!(mapper.chr().read(0x1000), 16 + 5);

        mapper.cpu_write(0x8000, 0x80 | 2);
        assert_eq!(mapper.chr().read(0x0000), 16 + 5);
    }

    #[test]
    fn mmc3_scanline_counter_raises_irq_after_latch_lines() {
        let mut mapper = Mmc3::new(cart(4, 2, 1));
        mapper.cpu_write(0xC000, 3); // latch
        mapper.cpu_write(0xC001, 0); // reload
        mapper.cpu_write(0xE001, 0); // enable

        for _ in 0..3 {
            mapper.clock_scanline();
            assert!(!mapper.irq_asserted());
        }
        mapper.clock_scanline();
        assert!(mapper.irq_asserted());

        // Disabling acknowledges the pending line.
        mapper.cpu_write(0xE000, 0);
        assert!(!mapper.irq_asserted());
    }

    #[test]
    fn mmc3_mirroring_register() {
        let mut mapper = Mmc3::new(cart(4, 2, 1));
        mapper.cpu_write(0xA000, 0);
        assert_eq!(mapper.mirroring(), Mirroring::Vertical);
        mapper.cpu_write(0xA000, 1);
        assert_eq!(mapper.mirroring(), Mirroring::Horizontal);
    }

    #[test]
    fn vrc2b_chr_register_combines_nibbles() {
        let mut mapper = Vrc2::new(cart(23, 2, 2), Vrc2Revision::B);
        mapper.cpu_write(0xB000, 0x0D); // low nibble of CHR bank 0
        mapper.cpu_write(0xB001, 0x00); // high nibble
        // CHR data sits after 32 KB of PRG in the test image.
        assert_eq!(mapper.chr().read(0x0000), 32 + 13);

        mapper.cpu_write(0xB002, 0x07); // CHR bank 1
        assert_eq!(mapper.chr().read(0x0400), 32 + 7);
    }

    #[test]
    fn vrc2a_swaps_register_lines_and_halves_chr_banks() {
        let mut mapper = Vrc2::new(cart(22, 2, 2), Vrc2Revision::A);
        // On revision A the high-nibble port for CHR bank 0 sits at
        // $B002 because A0 and A1 arrive swapped.
        mapper.cpu_write(0xB000, 0x0A);
        mapper.cpu_write(0xB002, 0x00);
        // Registers are shifted right once before selecting the bank.
        assert_eq!(mapper.chr().read(0x0000), 32 + 5);
    }

    #[test]
    fn vrc2_prg_banks_switch_independently() {
        let mut mapper = Vrc2::new(cart(23, 4, 1), Vrc2Revision::B);
        mapper.cpu_write(0x8000, 3);
        mapper.cpu_write(0xA000, 5);
        assert_eq!(mapper.cpu_read(0x8000), (3 * 0x2000 / 1024) as u8);
        assert_eq!(mapper.cpu_read(0xA000), (5 * 0x2000 / 1024) as u8);
        // Upper half stays pinned to the last 16 KB page.
        assert_eq!(mapper.cpu_read(0xC000), (3 * 0x4000 / 1024) as u8);
    }
}
