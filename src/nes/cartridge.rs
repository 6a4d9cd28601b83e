use anyhow::{Context, Result, bail};
use std::{fs, path::Path, sync::Arc};

use super::mapper::Mirroring;

pub const PRG_PAGE_SIZE: usize = 16 * 1024;
pub const CHR_PAGE_SIZE: usize = 8 * 1024;
pub const TRAINER_SIZE: usize = 512;

/// Parsed iNES image. PRG and CHR live behind shared slices so mappers can
/// hand out read-only bank windows without copying.
#[derive(Debug, Clone)]
pub struct Cartridge {
    pub mapper_id: u8,
    pub mirroring: Mirroring,
    pub has_battery: bool,
    pub trainer: Option<Box<[u8]>>,
    pub prg: Arc<[u8]>,
    pub chr: Arc<[u8]>,
    pub chr_is_ram: bool,
}

impl Cartridge {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read ROM: {}", path.display()))?;
        Self::load(&bytes)
    }

    pub fn load(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            bail!("ROM is too small to contain an iNES header");
        }
        if &bytes[0..4] != b"NES\x1A" {
            bail!("invalid iNES header magic, expected NES<EOF>");
        }

        let prg_pages = (bytes[4] as usize).max(1);
        let chr_pages = bytes[5] as usize;
        let flags6 = bytes[6];
        let flags7 = bytes[7];

        let mapper_id = (flags6 >> 4) | (flags7 & 0xF0);
        let four_screen = (flags6 & 0x08) != 0;
        let mirroring = if four_screen {
            Mirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let has_battery = (flags6 & 0x02) != 0;
        let trainer_present = (flags6 & 0x04) != 0;

        let mut cursor = 16usize;
        let trainer = if trainer_present {
            if bytes.len() < cursor + TRAINER_SIZE {
                bail!("ROM truncated: trainer declared but file ended early");
            }
            let blob = bytes[cursor..cursor + TRAINER_SIZE].to_vec().into();
            cursor += TRAINER_SIZE;
            Some(blob)
        } else {
            None
        };

        let prg_size = prg_pages * PRG_PAGE_SIZE;
        if bytes.len() < cursor + prg_size {
            bail!(
                "ROM truncated: expected {} PRG bytes but file ended early",
                prg_size
            );
        }
        let prg: Arc<[u8]> = bytes[cursor..cursor + prg_size].to_vec().into();
        cursor += prg_size;

        let chr_size = chr_pages * CHR_PAGE_SIZE;
        let (chr, chr_is_ram): (Arc<[u8]>, bool) = if chr_size == 0 {
            (vec![0; CHR_PAGE_SIZE].into(), true)
        } else {
            if bytes.len() < cursor + chr_size {
                bail!(
                    "ROM truncated: expected {} CHR bytes but file ended early",
                    chr_size
                );
            }
            (bytes[cursor..cursor + chr_size].to_vec().into(), false)
        };

        Ok(Self {
            mapper_id,
            mirroring,
            has_battery,
            trainer,
            prg,
            chr,
            chr_is_ram,
        })
    }

    pub fn prg_page_count(&self) -> usize {
        self.prg.len() / PRG_PAGE_SIZE
    }

    pub fn chr_page_count(&self) -> usize {
        self.chr.len() / CHR_PAGE_SIZE
    }

    /// Byte offset of PRG bank `index` of the given size. Indices beyond
    /// the available bank count wrap modulo, per the loader contract.
    pub fn prg_bank_start(&self, index: usize, bank_size: usize) -> usize {
        let banks = self.prg.len() / bank_size;
        (index % banks) * bank_size
    }

    pub fn chr_bank_start(&self, index: usize, bank_size: usize) -> usize {
        let banks = self.chr.len() / bank_size;
        (index % banks) * bank_size
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn build_ines(
        prg_pages: u8,
        chr_pages: u8,
        flags6: u8,
        fill: impl Fn(usize) -> u8,
    ) -> Vec<u8> {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(b"NES\x1A");
        bytes[4] = prg_pages;
        bytes[5] = chr_pages;
        bytes[6] = flags6;
        let body = prg_pages as usize * PRG_PAGE_SIZE + chr_pages as usize * CHR_PAGE_SIZE;
        bytes.extend((0..body).map(fill));
        bytes
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = build_ines(1, 1, 0, |_| 0);
        bytes[0] = b'M';
        assert!(Cartridge::load(&bytes).is_err());
    }

    #[test]
    fn rejects_truncated_prg() {
        let mut bytes = build_ines(2, 0, 0, |_| 0);
        bytes.truncate(16 + PRG_PAGE_SIZE);
        let err = Cartridge::load(&bytes).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn parses_header_fields() {
        // flags6: vertical mirroring + battery, mapper low nibble 2.
        let bytes = build_ines(2, 1, 0x23, |i| i as u8);
        let cart = Cartridge::load(&bytes).unwrap();
        assert_eq!(cart.mapper_id, 2);
        assert_eq!(cart.mirroring, Mirroring::Vertical);
        assert!(cart.has_battery);
        assert_eq!(cart.prg_page_count(), 2);
        assert_eq!(cart.chr_page_count(), 1);
        assert!(!cart.chr_is_ram);
    }

    #[test]
    fn missing_chr_becomes_chr_ram() {
        let cart = Cartridge::load(&build_ines(1, 0, 0, |_| 0)).unwrap();
        assert!(cart.chr_is_ram);
        assert_eq!(cart.chr.len(), CHR_PAGE_SIZE);
    }

    #[test]
    fn trainer_is_extracted() {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(b"NES\x1A");
        bytes[4] = 1;
        bytes[5] = 0;
        bytes[6] = 0x04;
        bytes.extend((0..TRAINER_SIZE).map(|i| i as u8));
        bytes.extend(std::iter::repeat(0).take(PRG_PAGE_SIZE));
        let cart = Cartridge::load(&bytes).unwrap();
        let trainer = cart.trainer.unwrap();
        assert_eq!(trainer.len(), TRAINER_SIZE);
        assert_eq!(trainer[5], 5);
    }

    #[test]
    fn bank_indices_wrap_modulo_page_count() {
        let bytes = build_ines(2, 1, 0, |i| i as u8);
        let cart = Cartridge::load(&bytes).unwrap();
        assert_eq!(cart.prg_bank_start(0, PRG_PAGE_SIZE), 0);
        assert_eq!(cart.prg_bank_start(5, PRG_PAGE_SIZE), PRG_PAGE_SIZE);
        assert_eq!(cart.chr_bank_start(9, 0x400), 0x400);
    }
}
