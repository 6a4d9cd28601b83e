use bitflags::bitflags;

use super::mapper::Mirroring;
use super::memory::AddressSpace;

pub const SCREEN_WIDTH: usize = 256;
pub const SCREEN_HEIGHT: usize = 240;

const PRE_RENDER_LINE: u16 = 261;
const DOTS_PER_LINE: u16 = 341;

// Transparent marker in the composition buffers.
const BLANK: u8 = 0xFF;

bitflags! {
    struct Ctrl: u8 {
        const NAMETABLE_LO    = 0x01;
        const NAMETABLE_HI    = 0x02;
        const VRAM_STEP_32    = 0x04;
        const SPRITE_TABLE_HI = 0x08;
        const BG_TABLE_HI     = 0x10;
        const SPRITES_8X16    = 0x20;
        const MASTER_SLAVE    = 0x40;
        const NMI_ON_VBLANK   = 0x80;
    }
}

bitflags! {
    struct Mask: u8 {
        const GREYSCALE         = 0x01;
        const SHOW_LEFT_BG      = 0x02;
        const SHOW_LEFT_SPRITES = 0x04;
        const SHOW_BG           = 0x08;
        const SHOW_SPRITES      = 0x10;
        const EMPHASIZE_RED     = 0x20;
        const EMPHASIZE_GREEN   = 0x40;
        const EMPHASIZE_BLUE    = 0x80;
    }
}

bitflags! {
    struct PpuStatus: u8 {
        const SPRITE_OVERFLOW = 0x20;
        const SPRITE_0_HIT    = 0x40;
        const VBLANK          = 0x80;
    }
}

/// Edges the console reacts to after one PPU dot.
#[derive(Clone, Copy, Default)]
pub struct PpuSignals {
    pub nmi: bool,
    pub frame_complete: bool,
    /// Stand-in for the PPU A12 rise some mappers count scanlines with.
    pub mapper_clock: bool,
}

const SPRITE_FLAG_ZERO: u8 = 0x01;
const SPRITE_FLAG_BEHIND: u8 = 0x02;

/// Scanline/dot pixel pipeline. Pattern data lives in the mapper's CHR
/// address space and is passed into every access that can touch it;
/// nametables, palette and OAM are owned here.
pub struct Ppu {
    ctrl: Ctrl,
    mask: Mask,
    status: PpuStatus,

    oam_addr: u8,
    oam: [u8; 256],

    nametables: [[u8; 0x400]; 4],
    nt_map: [usize; 4],
    palette: [u8; 32],
    read_buffer: u8,

    // Loopy scroll state.
    v: u16,
    t: u16,
    fine_x: u8,
    w: bool,

    scanline: u16,
    dot: u16,

    // Composited palette indices for the frame being built, and the
    // finished frame handed to the caller. BLANK marks not-yet-resolved
    // pixels during composition.
    scratch: Box<[u8; SCREEN_WIDTH * SCREEN_HEIGHT]>,
    frame: Box<[u8; SCREEN_WIDTH * SCREEN_HEIGHT]>,

    // Whole-frame sprite layer rebuilt during pre-render.
    sprite_pixels: Box<[u8; SCREEN_WIDTH * SCREEN_HEIGHT]>,
    sprite_flags: Box<[u8; SCREEN_WIDTH * SCREEN_HEIGHT]>,
    scanline_sprite_counts: [u8; SCREEN_HEIGHT],

    sprite0_hit_dot: i32,
    render_x: i32,
    render_y: i32,
}

impl Ppu {
    pub fn new() -> Ppu {
        Ppu {
            ctrl: Ctrl::empty(),
            mask: Mask::empty(),
            status: PpuStatus::from_bits_truncate(0xA0),
            oam_addr: 0,
            oam: [0; 256],
            nametables: [[0; 0x400]; 4],
            nt_map: [0, 1, 2, 3],
            palette: [0; 32],
            read_buffer: 0,
            v: 0,
            t: 0,
            fine_x: 0,
            w: false,
            scanline: PRE_RENDER_LINE,
            dot: 0,
            scratch: Box::new([0; SCREEN_WIDTH * SCREEN_HEIGHT]),
            frame: Box::new([0; SCREEN_WIDTH * SCREEN_HEIGHT]),
            sprite_pixels: Box::new([BLANK; SCREEN_WIDTH * SCREEN_HEIGHT]),
            sprite_flags: Box::new([0; SCREEN_WIDTH * SCREEN_HEIGHT]),
            scanline_sprite_counts: [0; SCREEN_HEIGHT],
            sprite0_hit_dot: -1,
            render_x: 0,
            render_y: 0,
        }
    }

    pub fn power_up(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.ctrl = Ctrl::empty();
        self.mask = Mask::empty();
        self.status = PpuStatus::from_bits_truncate(0xA0);
        self.w = false;
        self.scanline = PRE_RENDER_LINE;
        self.dot = 0;
    }

    pub fn set_mirroring(&mut self, mirroring: Mirroring) {
        self.nt_map = match mirroring {
            Mirroring::Horizontal => [0, 0, 1, 1],
            Mirroring::Vertical => [0, 1, 0, 1],
            Mirroring::OneScreenLow => [0, 0, 0, 0],
            Mirroring::OneScreenHigh => [1, 1, 1, 1],
            Mirroring::FourScreen => [0, 1, 2, 3],
        };
    }

    pub fn in_vertical_blank(&self) -> bool {
        self.scanline >= SCREEN_HEIGHT as u16 && self.scanline != PRE_RENDER_LINE
    }

    /// Finished frame of 6-bit palette indices. The simulation overwrites
    /// this buffer in place during the next frame, so callers needing the
    /// data later must copy it out.
    pub fn frame(&self) -> &[u8; SCREEN_WIDTH * SCREEN_HEIGHT] {
        &self.frame
    }

    pub fn write_register(&mut self, index: u8, value: u8, chr: &mut AddressSpace) {
        match index & 0x07 {
            0 => {
                self.ctrl = Ctrl::from_bits_truncate(value);
                self.t = (self.t & !0x0C00) | (((value & 0x03) as u16) << 10);
            }
            1 => self.mask = Mask::from_bits_truncate(value),
            3 => self.oam_addr = value,
            4 => {
                self.oam[self.oam_addr as usize] = value;
                self.oam_addr = self.oam_addr.wrapping_add(1);
            }
            5 => {
                if !self.w {
                    self.t = (self.t & !0x001F) | ((value >> 3) as u16);
                    self.fine_x = value & 0x07;
                } else {
                    self.t = (self.t & !0x7000) | (((value & 0x07) as u16) << 12);
                    self.t = (self.t & !0x03E0) | (((value & 0xF8) as u16) << 2);
                }
                self.w = !self.w;
            }
            6 => {
                if !self.w {
                    self.t = (self.t & !0x7F00) | (((value & 0x3F) as u16) << 8);
                } else {
                    self.t = (self.t & !0x00FF) | value as u16;
                    self.v = self.t;
                }
                self.w = !self.w;
            }
            7 => {
                self.vram_write(self.v & 0x3FFF, value, chr);
                self.increment_vram_addr();
            }
            _ => {}
        }
    }

    pub fn read_register(&mut self, index: u8, chr: &mut AddressSpace) -> u8 {
        match index & 0x07 {
            2 => {
                let result = self.status.bits();
                self.status.remove(PpuStatus::VBLANK);
                self.w = false;
                result
            }
            4 => self.oam[self.oam_addr as usize],
            7 => {
                let addr = self.v & 0x3FFF;
                let mut result = self.read_buffer;
                // Palette reads bypass the one-read delay.
                if addr >= 0x3F00 {
                    result = self.vram_read(addr, chr);
                }
                self.read_buffer = self.vram_read(addr, chr);
                self.increment_vram_addr();
                result
            }
            _ => 0,
        }
    }

    /// Advances one dot.
    pub fn cycle(&mut self, chr: &mut AddressSpace) -> PpuSignals {
        let mut signals = PpuSignals::default();

        if self.scanline == PRE_RENDER_LINE {
            if self.dot == 1 {
                self.status.remove(PpuStatus::VBLANK);
                self.status.remove(PpuStatus::SPRITE_0_HIT);
                self.status.remove(PpuStatus::SPRITE_OVERFLOW);
                self.render_y = -1;
            } else if (280..=304).contains(&self.dot) {
                if self.rendering_enabled() {
                    // Copy the vertical scroll bits from t.
                    self.v = (self.v & !0x7BE0) | (self.t & 0x7BE0);
                }
                if self.dot == 280 {
                    self.prerender_sprites(chr);
                }
            }
        } else if self.scanline == 241 && self.dot == 1 {
            self.status.insert(PpuStatus::VBLANK);
            signals.frame_complete = true;
            if self.ctrl.contains(Ctrl::NMI_ON_VBLANK) {
                signals.nmi = true;
            }
        }

        if self.scanline == PRE_RENDER_LINE || self.scanline < SCREEN_HEIGHT as u16 {
            let in_fetch_window =
                (self.dot > 0 && self.dot <= SCREEN_WIDTH as u16) || self.dot > 320;
            if in_fetch_window && (self.dot & 7) == 0 && self.rendering_enabled() {
                self.render_tile_line(chr);
                if self.dot == SCREEN_WIDTH as u16 {
                    self.increment_y();
                } else {
                    self.increment_coarse_x();
                }
            }
            if self.dot == 257 && self.rendering_enabled() {
                // Copy the horizontal scroll bits from t.
                self.v = (self.v & !0x041F) | (self.t & 0x041F);
                self.render_x = 0;
                self.render_y += 1;
                self.sprite0_hit_dot = -1;
            }
        }

        if (self.scanline == PRE_RENDER_LINE || self.scanline < SCREEN_HEIGHT as u16)
            && self.rendering_enabled()
        {
            let clock_dot = if self.ctrl.contains(Ctrl::BG_TABLE_HI) {
                324
            } else {
                260
            };
            if self.dot == clock_dot {
                signals.mapper_clock = true;
            }
        }

        if self.scanline < SCREEN_HEIGHT as u16
            && self.dot >= 1
            && self.dot <= SCREEN_WIDTH as u16
        {
            let x = (self.dot - 1) as usize;
            let index = self.scanline as usize * SCREEN_WIDTH + x;
            self.frame[index] = if self.rendering_enabled() {
                self.scratch[index]
            } else {
                self.palette_read(0)
            };
            if self.mask.contains(Mask::SHOW_BG | Mask::SHOW_SPRITES)
                && self.sprite0_hit_dot == self.dot as i32
            {
                self.status.insert(PpuStatus::SPRITE_0_HIT);
            }
        }

        self.dot += 1;
        if self.dot == DOTS_PER_LINE {
            self.dot = 0;
            self.scanline += 1;
            if self.scanline == PRE_RENDER_LINE + 1 {
                self.scanline = 0;
            }
        }

        signals
    }

    fn rendering_enabled(&self) -> bool {
        self.mask.intersects(Mask::SHOW_BG | Mask::SHOW_SPRITES)
    }

    fn increment_vram_addr(&mut self) {
        let step = if self.ctrl.contains(Ctrl::VRAM_STEP_32) {
            32
        } else {
            1
        };
        self.v = (self.v + step) & 0x3FFF;
    }

    fn increment_coarse_x(&mut self) {
        if (self.v & 0x001F) == 31 {
            self.v &= !0x001F;
            self.v ^= 0x0400; // switch horizontal nametable
        } else {
            self.v += 1;
        }
    }

    fn increment_y(&mut self) {
        if (self.v & 0x7000) != 0x7000 {
            self.v += 0x1000;
        } else {
            self.v &= !0x7000;
            let mut y = (self.v & 0x03E0) >> 5;
            if y == 29 {
                y = 0;
                self.v ^= 0x0800; // switch vertical nametable
            } else if y == 31 {
                y = 0; // out-of-range row, nametable not switched
            } else {
                y += 1;
            }
            self.v = (self.v & !0x03E0) | (y << 5);
        }
    }

    fn vram_read(&self, addr: u16, chr: &mut AddressSpace) -> u8 {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => chr.read(addr),
            0x2000..=0x3EFF => {
                let rel = (addr - 0x2000) & 0x0FFF;
                let table = self.nt_map[(rel / 0x400) as usize];
                self.nametables[table][(rel & 0x3FF) as usize]
            }
            _ => self.palette_read((addr & 0x1F) as usize),
        }
    }

    fn vram_write(&mut self, addr: u16, value: u8, chr: &mut AddressSpace) {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => chr.write(addr, value),
            0x2000..=0x3EFF => {
                let rel = (addr - 0x2000) & 0x0FFF;
                let table = self.nt_map[(rel / 0x400) as usize];
                self.nametables[table][(rel & 0x3FF) as usize] = value;
            }
            _ => self.palette_write((addr & 0x1F) as usize, value),
        }
    }

    // $3F10/$3F14/$3F18/$3F1C are the same cells as $3F00/$3F04/$3F08/
    // $3F0C; both halves read and write through one entry.
    fn resolve_palette_index(index: usize) -> usize {
        let index = index & 0x1F;
        if index >= 0x10 && (index & 0x03) == 0 {
            index - 0x10
        } else {
            index
        }
    }

    fn palette_read(&self, index: usize) -> u8 {
        let value = self.palette[Self::resolve_palette_index(index)];
        if self.mask.contains(Mask::GREYSCALE) {
            value & 0x30
        } else {
            value
        }
    }

    fn palette_write(&mut self, index: usize, value: u8) {
        self.palette[Self::resolve_palette_index(index)] = value;
    }

    /// Fetches one background tile row and composites eight pixels with
    /// the pre-rendered sprite layer.
    fn render_tile_line(&mut self, chr: &mut AddressSpace) {
        if self.render_y < 0 || self.render_y >= SCREEN_HEIGHT as i32 {
            return;
        }
        let row = self.render_y as usize * SCREEN_WIDTH;
        let x0 = self.render_x - self.fine_x as i32;

        // With the background disabled the fetch is skipped entirely and
        // every pixel falls through to sprites and the backdrop.
        let show_bg = self.mask.contains(Mask::SHOW_BG);
        let (palette_base, mut pattern_low, mut pattern_high) = if show_bg {
            let attr_addr =
                0x23C0 | (self.v & 0x0C00) | ((self.v >> 4) & 0x38) | ((self.v >> 2) & 0x07);
            let attribute = self.vram_read(attr_addr, chr);
            let left = ((self.v >> 1) & 1) == 0;
            let top = ((self.v >> 6) & 1) == 0;
            let palette_select = match (top, left) {
                (true, true) => attribute & 3,
                (true, false) => (attribute >> 2) & 3,
                (false, true) => (attribute >> 4) & 3,
                (false, false) => (attribute >> 6) & 3,
            };

            let fine_y = self.v >> 12;
            let tile = self.vram_read(0x2000 | (self.v & 0x0FFF), chr) as u16;
            let table = if self.ctrl.contains(Ctrl::BG_TABLE_HI) {
                0x1000
            } else {
                0x0000
            };
            let pattern_addr = table + (tile << 4) + fine_y;
            (
                (palette_select as usize) << 2,
                chr.read(pattern_addr),
                chr.read(pattern_addr + 8),
            )
        } else {
            (0, 0, 0)
        };

        let backdrop = self.palette_read(0);
        let show_sprites = self.mask.contains(Mask::SHOW_SPRITES);
        let show_left_bg = self.mask.contains(Mask::SHOW_LEFT_BG);

        for i in x0..x0 + 8 {
            if i >= 0 && (i as usize) < SCREEN_WIDTH {
                let index = row + i as usize;
                self.scratch[index] = BLANK;
                let bg = if show_bg && (i >= 8 || show_left_bg) {
                    ((pattern_high >> 6) & 2) | ((pattern_low >> 7) & 1)
                } else {
                    0
                };
                if bg != 0 {
                    self.scratch[index] = self.palette_read(palette_base | bg as usize);
                }
                if show_sprites && self.sprite_pixels[index] != BLANK {
                    let flags = self.sprite_flags[index];
                    if self.sprite0_hit_dot == -1
                        && (flags & SPRITE_FLAG_ZERO) != 0
                        && self.scratch[index] != BLANK
                    {
                        self.sprite0_hit_dot = i + 1;
                    }
                    if self.scratch[index] == BLANK || (flags & SPRITE_FLAG_BEHIND) == 0 {
                        self.scratch[index] = self.sprite_pixels[index];
                    }
                }
                if self.scratch[index] == BLANK {
                    self.scratch[index] = backdrop;
                }
            }
            pattern_high <<= 1;
            pattern_low <<= 1;
        }

        self.render_x += 8;
    }

    /// Rebuilds the whole-frame sprite layer for the upcoming frame.
    /// Every sprite is drawn regardless of the hardware's eight-per-
    /// scanline limit; the overflow status bit is still derived from the
    /// per-scanline counts.
    fn prerender_sprites(&mut self, chr: &mut AddressSpace) {
        self.sprite_pixels.fill(BLANK);
        self.sprite_flags.fill(0);
        self.scanline_sprite_counts = [0; SCREEN_HEIGHT];

        if !self.mask.contains(Mask::SHOW_SPRITES) {
            return;
        }

        let is_8x16 = self.ctrl.contains(Ctrl::SPRITES_8X16);
        let default_table: u16 = if self.ctrl.contains(Ctrl::SPRITE_TABLE_HI) {
            0x1000
        } else {
            0x0000
        };

        // Back to front so lower-index sprites win ties.
        for id in (0..64).rev() {
            let base = id * 4;
            let y = self.oam[base] as i32 + 1;
            let mut tile = self.oam[base + 1] as u16;
            let attribute = self.oam[base + 2];
            let x = self.oam[base + 3] as i32;

            if y >= SCREEN_HEIGHT as i32 {
                continue;
            }

            let palette_base = 0x10 + (((attribute & 3) as usize) << 2);
            let behind = (attribute & 0x20) != 0;
            let flip_h = (attribute & 0x40) != 0;
            let flip_v = (attribute & 0x80) != 0;
            let height = if is_8x16 { 16 } else { 8 };

            for dy in 0..height {
                let line = y + dy;
                if (0..SCREEN_HEIGHT as i32).contains(&line) {
                    self.scanline_sprite_counts[line as usize] =
                        self.scanline_sprite_counts[line as usize].saturating_add(1);
                }
            }

            if is_8x16 {
                let table = (tile & 1) << 12;
                tile &= !1;
                let (top_tile, bottom_tile) = if flip_v {
                    (tile + 1, tile)
                } else {
                    (tile, tile + 1)
                };
                self.prerender_sprite(
                    chr,
                    id,
                    x,
                    y,
                    table + (top_tile << 4),
                    palette_base,
                    behind,
                    flip_h,
                    flip_v,
                );
                self.prerender_sprite(
                    chr,
                    id,
                    x,
                    y + 8,
                    table + (bottom_tile << 4),
                    palette_base,
                    behind,
                    flip_h,
                    flip_v,
                );
            } else {
                self.prerender_sprite(
                    chr,
                    id,
                    x,
                    y,
                    default_table + (tile << 4),
                    palette_base,
                    behind,
                    flip_h,
                    flip_v,
                );
            }
        }

        if self.scanline_sprite_counts.iter().any(|&count| count > 8) {
            self.status.insert(PpuStatus::SPRITE_OVERFLOW);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn prerender_sprite(
        &mut self,
        chr: &mut AddressSpace,
        id: usize,
        x: i32,
        y: i32,
        pattern_addr: u16,
        palette_base: usize,
        behind: bool,
        flip_h: bool,
        flip_v: bool,
    ) {
        if x <= -8 || y <= -8 || x >= SCREEN_WIDTH as i32 || y >= SCREEN_HEIGHT as i32 {
            return;
        }
        let show_left = self.mask.contains(Mask::SHOW_LEFT_SPRITES);

        for dy in 0..8 {
            let line = y + dy;
            if !(0..SCREEN_HEIGHT as i32).contains(&line) {
                continue;
            }
            let source_row = if flip_v { 7 - dy } else { dy } as u16;
            let mut pattern_low = chr.read(pattern_addr + source_row);
            let mut pattern_high = chr.read(pattern_addr + source_row + 8);
            let row = line as usize * SCREEN_WIDTH;

            for i in x..x + 8 {
                if i >= 0 && (i as usize) < SCREEN_WIDTH && (i >= 8 || show_left) {
                    let pixel = if flip_h {
                        ((pattern_high << 1) & 2) | (pattern_low & 1)
                    } else {
                        ((pattern_high >> 6) & 2) | ((pattern_low >> 7) & 1)
                    };
                    if pixel != 0 {
                        let index = row + i as usize;
                        let existing_front =
                            (self.sprite_flags[index] & SPRITE_FLAG_BEHIND) == 0;
                        if self.sprite_pixels[index] == BLANK || !(behind && existing_front) {
                            self.sprite_pixels[index] =
                                self.palette_read(palette_base | pixel as usize);
                            self.sprite_flags[index] =
                                (if behind { SPRITE_FLAG_BEHIND } else { 0 })
                                    | (self.sprite_flags[index] & SPRITE_FLAG_ZERO);
                        }
                        if id == 0 {
                            self.sprite_flags[index] |= SPRITE_FLAG_ZERO;
                        }
                    }
                }
                if flip_h {
                    pattern_high >>= 1;
                    pattern_low >>= 1;
                } else {
                    pattern_high <<= 1;
                    pattern_low <<= 1;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn position(&self) -> (u16, u16) {
        (self.scanline, self.dot)
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::Region;
    use super::*;

    fn chr_ram() -> AddressSpace {
        let mut space = AddressSpace::new();
        space.install(0x0000, Region::ram(0x2000));
        space
    }

    fn run_to(ppu: &mut Ppu, chr: &mut AddressSpace, scanline: u16, dot: u16) {
        while ppu.position() != (scanline, dot) {
            ppu.cycle(chr);
        }
    }

    #[test]
    fn horizontal_mirroring_pairs_tables_vertically() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.set_mirroring(Mirroring::Horizontal);
        ppu.vram_write(0x2005, 0x11, &mut chr);
        ppu.vram_write(0x2805, 0x22, &mut chr);
        assert_eq!(ppu.vram_read(0x2405, &mut chr), 0x11);
        assert_eq!(ppu.vram_read(0x2C05, &mut chr), 0x22);
        assert_eq!(ppu.vram_read(0x2005, &mut chr), 0x11);
    }

    #[test]
    fn vertical_mirroring_pairs_tables_horizontally() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.set_mirroring(Mirroring::Vertical);
        ppu.vram_write(0x2005, 0x11, &mut chr);
        ppu.vram_write(0x2405, 0x22, &mut chr);
        assert_eq!(ppu.vram_read(0x2805, &mut chr), 0x11);
        assert_eq!(ppu.vram_read(0x2C05, &mut chr), 0x22);
    }

    #[test]
    fn one_screen_mirroring_aliases_all_slots() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.set_mirroring(Mirroring::OneScreenLow);
        ppu.vram_write(0x2005, 0x33, &mut chr);
        for base in [0x2005u16, 0x2405, 0x2805, 0x2C05] {
            assert_eq!(ppu.vram_read(base, &mut chr), 0x33);
        }
    }

    #[test]
    fn nametable_range_mirrors_at_0x3000() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.vram_write(0x2005, 0x44, &mut chr);
        assert_eq!(ppu.vram_read(0x3005, &mut chr), 0x44);
    }

    #[test]
    fn status_read_clears_vblank_and_write_toggle() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        run_to(&mut ppu, &mut chr, 241, 2);
        ppu.write_register(5, 0x10, &mut chr); // first scroll write sets w

        let status = ppu.read_register(2, &mut chr);
        assert_ne!(status & 0x80, 0);
        assert!(!ppu.w);
        assert_eq!(ppu.read_register(2, &mut chr) & 0x80, 0);
    }

    #[test]
    fn vblank_signals_nmi_when_enabled() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.write_register(0, 0x80, &mut chr);
        run_to(&mut ppu, &mut chr, 241, 1);
        let signals = ppu.cycle(&mut chr);
        assert!(signals.nmi);
        assert!(signals.frame_complete);
        assert!(ppu.in_vertical_blank());
    }

    #[test]
    fn vblank_does_not_signal_nmi_when_disabled() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        run_to(&mut ppu, &mut chr, 241, 1);
        let signals = ppu.cycle(&mut chr);
        assert!(!signals.nmi);
        assert!(signals.frame_complete);
    }

    #[test]
    fn prerender_dot_one_clears_flags() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        run_to(&mut ppu, &mut chr, 241, 1);
        ppu.cycle(&mut chr);
        assert!(ppu.status.contains(PpuStatus::VBLANK));
        run_to(&mut ppu, &mut chr, PRE_RENDER_LINE, 1);
        ppu.cycle(&mut chr);
        assert!(!ppu.status.contains(PpuStatus::VBLANK));
    }

    #[test]
    fn scroll_and_addr_writes_build_t_and_v() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.write_register(6, 0x21, &mut chr);
        ppu.write_register(6, 0x08, &mut chr);
        assert_eq!(ppu.v, 0x2108);

        ppu.write_register(5, 0x7D, &mut chr); // coarse X 15, fine X 5
        assert_eq!(ppu.t & 0x001F, 15);
        assert_eq!(ppu.fine_x, 5);
        ppu.write_register(5, 0x5E, &mut chr); // coarse Y 11, fine Y 6
        assert_eq!((ppu.t >> 5) & 0x1F, 11);
        assert_eq!(ppu.t >> 12, 6);
    }

    #[test]
    fn coarse_x_wrap_toggles_horizontal_nametable() {
        let mut ppu = Ppu::new();
        ppu.v = 31;
        ppu.increment_coarse_x();
        assert_eq!(ppu.v & 0x001F, 0);
        assert_ne!(ppu.v & 0x0400, 0);
    }

    #[test]
    fn coarse_y_wrap_rules() {
        let mut ppu = Ppu::new();
        // Fine Y 7, coarse Y 29: wraps and toggles the vertical bit.
        ppu.v = 0x7000 | (29 << 5);
        ppu.increment_y();
        assert_eq!((ppu.v >> 5) & 0x1F, 0);
        assert_ne!(ppu.v & 0x0800, 0);

        // Coarse Y 31 wraps without toggling.
        ppu.v = 0x7000 | (31 << 5);
        ppu.increment_y();
        assert_eq!((ppu.v >> 5) & 0x1F, 0);
        assert_eq!(ppu.v & 0x0800, 0);
    }

    #[test]
    fn data_port_reads_are_buffered_except_palette() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.vram_write(0x2100, 0x55, &mut chr);
        ppu.write_register(6, 0x21, &mut chr);
        ppu.write_register(6, 0x00, &mut chr);
        let first = ppu.read_register(7, &mut chr);
        let second = ppu.read_register(7, &mut chr);
        assert_ne!(first, 0x55);
        assert_eq!(second, 0x55);

        ppu.vram_write(0x3F01, 0x27, &mut chr);
        ppu.write_register(6, 0x3F, &mut chr);
        ppu.write_register(6, 0x01, &mut chr);
        assert_eq!(ppu.read_register(7, &mut chr), 0x27);
    }

    #[test]
    fn data_port_honours_increment_mode() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.write_register(0, 0x04, &mut chr); // 32-byte steps
        ppu.write_register(6, 0x20, &mut chr);
        ppu.write_register(6, 0x00, &mut chr);
        ppu.write_register(7, 0xAA, &mut chr);
        ppu.write_register(7, 0xBB, &mut chr);
        assert_eq!(ppu.vram_read(0x2000, &mut chr), 0xAA);
        assert_eq!(ppu.vram_read(0x2020, &mut chr), 0xBB);
    }

    #[test]
    fn palette_mirror_and_greyscale() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.vram_write(0x3F10, 0x35, &mut chr);
        assert_eq!(ppu.vram_read(0x3F00, &mut chr), 0x35);

        ppu.mask.insert(Mask::GREYSCALE);
        assert_eq!(ppu.vram_read(0x3F00, &mut chr), 0x30);
    }

    #[test]
    fn oam_data_writes_advance_address() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.write_register(3, 0x10, &mut chr);
        ppu.write_register(4, 0xAB, &mut chr);
        ppu.write_register(4, 0xCD, &mut chr);
        assert_eq!(ppu.oam[0x10], 0xAB);
        assert_eq!(ppu.oam[0x11], 0xCD);
        ppu.write_register(3, 0x11, &mut chr);
        assert_eq!(ppu.read_register(4, &mut chr), 0xCD);
    }

    #[test]
    fn more_than_eight_sprites_on_a_line_sets_overflow() {
        // Sprite drawing itself is not limited to eight per scanline;
        // only the status bit reflects the hardware limit.
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        // Power-up status carries stale flag bits; start from a clean set
        // so only the counting logic is observed.
        ppu.status = PpuStatus::empty();
        ppu.mask.insert(Mask::SHOW_SPRITES);
        for sprite in 0..10usize {
            let base = sprite * 4;
            ppu.oam[base] = 40; // all on the same scanline
            ppu.oam[base + 1] = 1;
            ppu.oam[base + 2] = 0;
            ppu.oam[base + 3] = (sprite * 8) as u8;
        }
        ppu.prerender_sprites(&mut chr);
        assert!(ppu.status.contains(PpuStatus::SPRITE_OVERFLOW));

        let mut ppu = Ppu::new();
        ppu.status = PpuStatus::empty();
        ppu.mask.insert(Mask::SHOW_SPRITES);
        for sprite in 0..8usize {
            let base = sprite * 4;
            ppu.oam[base] = 40;
            ppu.oam[base + 3] = (sprite * 8) as u8;
        }
        ppu.prerender_sprites(&mut chr);
        assert!(!ppu.status.contains(PpuStatus::SPRITE_OVERFLOW));
    }

    #[test]
    fn sprite_zero_hit_requires_opaque_overlap() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        // Solid tile 1 in CHR: all low-plane bits set for every row.
        for row in 0..8u16 {
            chr.write(0x0010 + row, 0xFF);
        }
        // Background nametable all tile 1.
        for offset in 0..0x3C0u16 {
            ppu.vram_write(0x2000 + offset, 1, &mut chr);
        }
        // Sprite 0 near the top left, clear of the masked left column.
        ppu.oam[0] = 30;
        ppu.oam[1] = 1;
        ppu.oam[2] = 0;
        ppu.oam[3] = 40;
        ppu.write_register(1, 0x1E, &mut chr); // bg + sprites + left columns

        let mut frames = 0;
        while frames < 2 && !ppu.status.contains(PpuStatus::SPRITE_0_HIT) {
            if ppu.cycle(&mut chr).frame_complete {
                frames += 1;
            }
        }
        assert!(ppu.status.contains(PpuStatus::SPRITE_0_HIT));
    }

    #[test]
    fn disabled_rendering_outputs_backdrop() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.vram_write(0x3F00, 0x21, &mut chr);
        run_to(&mut ppu, &mut chr, 241, 0);
        assert!(ppu.frame().iter().all(|&p| p == 0x21));
    }

    #[test]
    fn sprites_without_background_still_composite() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        // Solid tile 1 in CHR, backdrop $0F, sprite palette entry $2A.
        for row in 0..8u16 {
            chr.write(0x0010 + row, 0xFF);
        }
        ppu.vram_write(0x3F00, 0x0F, &mut chr);
        ppu.vram_write(0x3F11, 0x2A, &mut chr);
        ppu.oam[0] = 99; // renders on scanline 100
        ppu.oam[1] = 1;
        ppu.oam[2] = 0;
        ppu.oam[3] = 100;
        ppu.write_register(1, 0x14, &mut chr); // sprites on, background off

        let mut frames = 0;
        while frames < 2 {
            if ppu.cycle(&mut chr).frame_complete {
                frames += 1;
            }
        }

        // Every pixel must carry a palette value, never an internal
        // transparency marker.
        assert!(ppu.frame().iter().all(|&p| p != 0xFF));
        assert_eq!(ppu.frame()[100 * SCREEN_WIDTH + 100], 0x2A);
        assert_eq!(ppu.frame()[10 * SCREEN_WIDTH + 10], 0x0F);
    }

    #[test]
    fn mapper_clock_requires_rendering_enabled() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        let frame_dots = DOTS_PER_LINE as u32 * (PRE_RENDER_LINE as u32 + 1);

        let mut clocks = 0;
        for _ in 0..frame_dots {
            if ppu.cycle(&mut chr).mapper_clock {
                clocks += 1;
            }
        }
        assert_eq!(clocks, 0);

        ppu.write_register(1, 0x08, &mut chr); // background on
        let mut clocks = 0;
        for _ in 0..frame_dots {
            if ppu.cycle(&mut chr).mapper_clock {
                clocks += 1;
            }
        }
        // 240 visible scanlines plus the pre-render line.
        assert_eq!(clocks, 241);
    }

    #[test]
    fn sprite_backdrop_palette_entries_alias_background() {
        let mut ppu = Ppu::new();
        let mut chr = chr_ram();
        ppu.vram_write(0x3F00, 0x0D, &mut chr);
        assert_eq!(ppu.vram_read(0x3F10, &mut chr), 0x0D);
        ppu.vram_write(0x3F04, 0x16, &mut chr);
        assert_eq!(ppu.vram_read(0x3F14, &mut chr), 0x16);
        ppu.vram_write(0x3F18, 0x2C, &mut chr);
        assert_eq!(ppu.vram_read(0x3F08, &mut chr), 0x2C);
    }
}
