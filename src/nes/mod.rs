pub mod apu;
pub mod cartridge;
pub mod cpu;
pub mod input;
pub mod mapper;
pub mod memory;
pub mod ppu;
pub mod runner;

use anyhow::{Result, bail};
use std::path::Path;

use apu::Apu;
use cartridge::Cartridge;
use cpu::{Bus, Cpu, NmiPolicy};
use input::{ControllerHandle, Controllers};
use mapper::{Mapper, create_mapper};
use memory::{AddressSpace, Region};
use ppu::Ppu;

/// NTSC CPU clock. The PPU runs at exactly three times this rate.
pub const CPU_CLOCK_HZ: f64 = 1_789_772.5;

const RAM_SIZE: usize = 0x800;

/// Everything the CPU can see on its bus. Kept separate from the CPU so
/// the core can borrow both halves at once while servicing interrupts.
struct ConsoleBus {
    ram: AddressSpace,
    ppu: Ppu,
    apu: Apu,
    mapper: Box<dyn Mapper>,
    controllers: Controllers,

    cycle_count: u64,
    stall_cycles: u64,
    frame_complete: bool,
    samples: Vec<u8>,
}

impl ConsoleBus {
    fn new(mapper: Box<dyn Mapper>) -> ConsoleBus {
        // 2 KB of internal RAM, echoed across the rest of the low 8 KB.
        let mut ram = AddressSpace::new();
        ram.install(0x0000, Region::ram(RAM_SIZE));
        ram.install(
            0x0800,
            Region::Mirror {
                target: 0x0000,
                source_size: RAM_SIZE as u16,
                size: 0x1800,
            },
        );

        ConsoleBus {
            ram,
            ppu: Ppu::new(),
            apu: Apu::new(),
            mapper,
            controllers: Controllers::new(),
            cycle_count: 0,
            stall_cycles: 0,
            frame_complete: false,
            samples: Vec::new(),
        }
    }

    /// Copies one page into OAM through the $2004 port and charges the
    /// CPU stall: 513 cycles, 514 when started on an odd cycle.
    fn oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        for offset in 0..256u16 {
            let value = self.read(base.wrapping_add(offset));
            self.ppu.write_register(4, value, self.mapper.chr());
        }
        self.stall_cycles += 513 + (self.cycle_count & 1);
    }

    fn service_dmc_dma(&mut self) {
        if let Some(addr) = self.apu.take_dmc_dma_request() {
            let value = self.read(addr);
            self.apu.complete_dmc_dma(value);
            self.stall_cycles += 513 + (self.cycle_count & 1);
        }
    }
}

impl Bus for ConsoleBus {
    fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram.read(addr),
            0x2000..=0x3FFF => self
                .ppu
                .read_register((addr & 0x07) as u8, self.mapper.chr()),
            0x4015 => self.apu.read_status(),
            0x4016 => 0x40 | self.controllers.read(0),
            0x4017 => 0x40 | self.controllers.read(1),
            0x4000..=0x401F => 0,
            // Expansion area, unpopulated on the stock console.
            0x4020..=0x5FFF => 0,
            _ => self.mapper.cpu_read(addr),
        }
    }

    fn write(&mut self, addr: u16, value: u8) {
        match addr {
            0x0000..=0x1FFF => self.ram.write(addr, value),
            0x2000..=0x3FFF => {
                self.ppu
                    .write_register((addr & 0x07) as u8, value, self.mapper.chr());
            }
            0x4014 => self.oam_dma(value),
            0x4016 => self.controllers.write_strobe(value),
            0x4000..=0x4013 | 0x4015 | 0x4017 => self.apu.write_register(addr, value),
            0x4018..=0x401F => {}
            0x4020..=0x5FFF => {}
            _ => {
                self.mapper.cpu_write(addr, value);
                // Register writes may rewire the nametables.
                self.ppu.set_mirroring(self.mapper.mirroring());
            }
        }
    }
}

/// The wired-up console: CPU, PPU, APU, cartridge and pads.
pub struct Nes {
    cpu: Cpu,
    bus: ConsoleBus,
}

impl Nes {
    pub fn from_file(path: &Path) -> Result<Nes> {
        Self::with_cartridge(Cartridge::from_file(path)?)
    }

    pub fn load(bytes: &[u8]) -> Result<Nes> {
        Self::with_cartridge(Cartridge::load(bytes)?)
    }

    pub fn with_cartridge(cart: Cartridge) -> Result<Nes> {
        let mapper = create_mapper(cart)?;
        let mut bus = ConsoleBus::new(mapper);
        bus.ppu.power_up();
        bus.ppu.set_mirroring(bus.mapper.mirroring());
        bus.apu.power_up();

        let mut cpu = Cpu::new();
        cpu.power_up(&mut bus);
        Ok(Nes { cpu, bus })
    }

    pub fn reset(&mut self) {
        self.bus.ppu.reset();
        self.cpu.reset(&mut self.bus);
    }

    pub fn set_nmi_policy(&mut self, policy: NmiPolicy) {
        self.cpu.set_nmi_policy(policy);
    }

    pub fn controller(&self, port: usize) -> ControllerHandle {
        self.bus.controllers.handle(port)
    }

    pub fn cycles(&self) -> u64 {
        self.bus.cycle_count
    }

    pub fn program_counter(&self) -> u16 {
        self.cpu.pc
    }

    pub fn in_vertical_blank(&self) -> bool {
        self.bus.ppu.in_vertical_blank()
    }

    /// Palette-index frame buffer of the most recently completed frame.
    pub fn frame(&self) -> &[u8; ppu::SCREEN_WIDTH * ppu::SCREEN_HEIGHT] {
        self.bus.ppu.frame()
    }

    /// Drains the audio samples accumulated since the last call, one u8
    /// per CPU cycle.
    pub fn take_samples(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bus.samples)
    }

    /// Runs one instruction plus any DMA stall it triggered, keeping the
    /// PPU and APU in lockstep. Returns the CPU cycles consumed.
    pub fn step(&mut self) -> Result<u64> {
        let before = self.cpu.cycles();
        self.cpu.execute(&mut self.bus)?;
        let mut pending =
            self.cpu.cycles() - before + std::mem::take(&mut self.bus.stall_cycles);

        let mut ticked = 0;
        while ticked < pending {
            self.tick();
            ticked += 1;
            // DMC fetches raised mid-tick extend the stall.
            pending += std::mem::take(&mut self.bus.stall_cycles);
        }

        // The IRQ line is level-triggered: any still-asserted source
        // keeps it low.
        self.cpu
            .set_irq_line(self.bus.apu.irq_asserted() || self.bus.mapper.irq_asserted());
        Ok(ticked)
    }

    /// One CPU cycle: one APU cycle and three PPU dots.
    fn tick(&mut self) {
        let bus = &mut self.bus;
        bus.cycle_count += 1;

        let sample = bus.apu.cycle();
        bus.samples.push(sample);
        bus.service_dmc_dma();

        for _ in 0..3 {
            let signals = bus.ppu.cycle(bus.mapper.chr());
            if signals.nmi {
                self.cpu.trigger_nmi();
            }
            if signals.frame_complete {
                bus.frame_complete = true;
            }
            if signals.mapper_clock {
                bus.mapper.clock_scanline();
            }
        }
    }

    /// True once after each completed frame; reading clears the edge.
    pub fn poll_frame(&mut self) -> bool {
        std::mem::take(&mut self.bus.frame_complete)
    }

    /// Steps until the PPU enters vertical blank.
    pub fn run_frame(&mut self) -> Result<()> {
        self.bus.frame_complete = false;
        let mut guard: u32 = 0;
        while !self.bus.frame_complete {
            self.step()?;
            guard += 1;
            if guard > 1_000_000 {
                bail!("frame never completed; the program is stuck without rendering");
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn peek(&mut self, addr: u16) -> u8 {
        self.bus.read(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::cartridge::tests::build_ines;
    use super::*;

    /// NROM image with `program` at $8000 and an NMI handler at $9000.
    fn console(program: &[u8], nmi_handler: &[u8]) -> Nes {
        let mut bytes = build_ines(1, 1, 0, |_| 0);
        let prg = 16;
        bytes[prg..prg + program.len()].copy_from_slice(program);
        bytes[prg + 0x1000..prg + 0x1000 + nmi_handler.len()].copy_from_slice(nmi_handler);
        // Vectors live at the top of the page, echoed at $FFFA-$FFFF.
        bytes[prg + 0x3FFA] = 0x00;
        bytes[prg + 0x3FFB] = 0x90; // NMI -> $9000
        bytes[prg + 0x3FFC] = 0x00;
        bytes[prg + 0x3FFD] = 0x80; // reset -> $8000
        Nes::load(&bytes).unwrap()
    }

    #[test]
    fn reset_vector_seeds_the_program_counter() {
        let nes = console(&[0xEA], &[0x40]);
        assert_eq!(nes.cpu.pc, 0x8000);
    }

    #[test]
    fn ram_mirrors_repeat_every_2k() {
        let mut nes = console(&[0xEA], &[0x40]);
        nes.bus.write(0x0123, 0x5A);
        assert_eq!(nes.peek(0x0923), 0x5A);
        assert_eq!(nes.peek(0x1923), 0x5A);
    }

    #[test]
    fn frame_runs_to_vblank_and_fires_nmi() {
        // LDA #$80 / STA $2000, then spin; the NMI handler counts into
        // $0200 and returns.
        let program = [0xA9, 0x80, 0x8D, 0x00, 0x20, 0x4C, 0x05, 0x80];
        let handler = [0xEE, 0x00, 0x02, 0x40]; // INC $0200 / RTI
        let mut nes = console(&program, &handler);

        nes.run_frame().unwrap();
        assert!(nes.in_vertical_blank());
        // One NTSC frame is roughly 29780 CPU cycles.
        assert!(nes.cycles() > 20_000 && nes.cycles() < 40_000);

        // Give the handler time to run after the vblank edge.
        for _ in 0..20 {
            nes.step().unwrap();
        }
        assert_eq!(nes.peek(0x0200), 1);

        nes.run_frame().unwrap();
        for _ in 0..20 {
            nes.step().unwrap();
        }
        assert_eq!(nes.peek(0x0200), 2);
    }

    #[test]
    fn audio_samples_accumulate_one_per_cpu_cycle() {
        let mut nes = console(&[0x4C, 0x00, 0x80], &[0x40]);
        nes.run_frame().unwrap();
        let samples = nes.take_samples();
        assert_eq!(samples.len() as u64, nes.cycles());
        assert!(nes.take_samples().is_empty());
    }

    #[test]
    fn oam_dma_stalls_for_at_least_513_cycles() {
        // LDA #$02 / STA $4014
        let program = [0xA9, 0x02, 0x8D, 0x14, 0x40, 0x4C, 0x05, 0x80];
        let mut nes = console(&program, &[0x40]);
        nes.step().unwrap(); // LDA
        let dma_cost = nes.step().unwrap(); // STA + DMA stall
        assert!(dma_cost >= 513 + 4, "got {dma_cost}");
    }

    #[test]
    fn unofficial_opcode_aborts_emulation() {
        let mut nes = console(&[0x02], &[0x40]);
        let err = nes.run_frame().unwrap_err();
        assert!(err.to_string().contains("unknown opcode"));
    }

    #[test]
    fn controller_reads_reach_the_pads() {
        // Strobe, then read $4016 twice into RAM.
        let program = [
            0xA9, 0x01, 0x8D, 0x16, 0x40, // LDA #$01 / STA $4016
            0xA9, 0x00, 0x8D, 0x16, 0x40, // LDA #$00 / STA $4016
            0xAD, 0x16, 0x40, 0x8D, 0x00, 0x03, // LDA $4016 / STA $0300
            0xAD, 0x16, 0x40, 0x8D, 0x01, 0x03, // LDA $4016 / STA $0301
            0x4C, 0x16, 0x80, // spin
        ];
        let mut nes = console(&program, &[0x40]);
        nes.controller(0).press(input::Buttons::A);
        for _ in 0..10 {
            nes.step().unwrap();
        }
        assert_eq!(nes.peek(0x0300) & 1, 1); // A pressed
        assert_eq!(nes.peek(0x0301) & 1, 0); // B not pressed
    }
}
