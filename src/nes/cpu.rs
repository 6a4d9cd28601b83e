use anyhow::Result;
use bitflags::bitflags;

use super::memory::AddressSpace;

/// Byte-wide bus the CPU executes over. The console implements this with
/// its full device dispatch; tests drive the CPU over a bare
/// [`AddressSpace`].
pub trait Bus {
    fn read(&mut self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);
}

impl Bus for AddressSpace {
    fn read(&mut self, addr: u16) -> u8 {
        AddressSpace::read(self, addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        AddressSpace::write(self, addr, value)
    }
}

bitflags! {
    pub struct Status: u8 {
        const CARRY     = 0x01;
        const ZERO      = 0x02;
        const INTERRUPT = 0x04;
        const DECIMAL   = 0x08;
        const BREAK     = 0x10;
        const UNUSED    = 0x20;
        const OVERFLOW  = 0x40;
        const NEGATIVE  = 0x80;
    }
}

/// When an NMI asserted mid-instruction is actually serviced. The hardware
/// edge detector makes this ambiguous by roughly one instruction; the
/// policy pins it down so runs are reproducible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NmiPolicy {
    /// Service before the next instruction fetch.
    Immediate,
    /// Let one more instruction complete first.
    DelayOneInstruction,
}

impl Default for NmiPolicy {
    fn default() -> Self {
        NmiPolicy::Immediate
    }
}

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

pub struct Cpu {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub p: Status,
    cycles: u64,
    nmi_pending: bool,
    nmi_defer: u8,
    irq_line: bool,
    nmi_policy: NmiPolicy,
}

impl Cpu {
    pub fn new() -> Cpu {
        Cpu {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFD,
            pc: 0,
            p: Status::INTERRUPT | Status::UNUSED,
            cycles: 0,
            nmi_pending: false,
            nmi_defer: 0,
            irq_line: false,
            nmi_policy: NmiPolicy::default(),
        }
    }

    pub fn power_up(&mut self, bus: &mut impl Bus) {
        self.reset(bus);
    }

    pub fn reset(&mut self, bus: &mut impl Bus) {
        self.sp = 0xFD;
        self.p = Status::INTERRUPT | Status::UNUSED;
        self.pc = self.read_u16(bus, RESET_VECTOR);
        self.cycles += 7;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn set_nmi_policy(&mut self, policy: NmiPolicy) {
        self.nmi_policy = policy;
    }

    /// Edge-triggered: one call queues exactly one NMI.
    pub fn trigger_nmi(&mut self) {
        self.nmi_pending = true;
        self.nmi_defer = match self.nmi_policy {
            NmiPolicy::Immediate => 0,
            NmiPolicy::DelayOneInstruction => 1,
        };
    }

    /// Level-triggered: the line stays asserted until every source clears.
    pub fn set_irq_line(&mut self, asserted: bool) {
        self.irq_line = asserted;
    }

    /// Services one pending interrupt or runs one instruction, returning
    /// the cumulative cycle count.
    pub fn execute(&mut self, bus: &mut impl Bus) -> Result<u64> {
        if self.nmi_pending {
            if self.nmi_defer == 0 {
                self.nmi_pending = false;
                self.interrupt(bus, NMI_VECTOR);
                self.cycles += 7;
                return Ok(self.cycles);
            }
            self.nmi_defer -= 1;
        } else if self.irq_line && !self.p.contains(Status::INTERRUPT) {
            self.interrupt(bus, IRQ_VECTOR);
            self.cycles += 7;
            return Ok(self.cycles);
        }

        let opcode_pc = self.pc;
        let opcode = self.fetch_byte(bus);

        // Single-byte register transfers sit across the group columns, so
        // they get dispatched up front.
        match opcode {
            0x8A => {
                self.a = self.x;
                self.update_zn(self.a);
                self.cycles += 2;
                return Ok(self.cycles);
            }
            0x9A => {
                self.sp = self.x;
                self.cycles += 2;
                return Ok(self.cycles);
            }
            0xAA => {
                self.x = self.a;
                self.update_zn(self.x);
                self.cycles += 2;
                return Ok(self.cycles);
            }
            0xBA => {
                self.x = self.sp;
                self.update_zn(self.x);
                self.cycles += 2;
                return Ok(self.cycles);
            }
            0xCA => {
                self.x = self.x.wrapping_sub(1);
                self.update_zn(self.x);
                self.cycles += 2;
                return Ok(self.cycles);
            }
            0xEA => {
                self.cycles += 2;
                return Ok(self.cycles);
            }
            _ => {}
        }

        let cc = opcode & 0x03;
        let aaa = opcode >> 5;
        let bbb = (opcode >> 2) & 0x07;

        let cycles = match cc {
            0x01 => self.exec_group1(bus, opcode, aaa, bbb, opcode_pc)?,
            0x02 => self.exec_group2(bus, opcode, aaa, bbb, opcode_pc)?,
            0x03 => return Err(unknown_opcode(opcode, opcode_pc)),
            _ => self.exec_group0(bus, opcode, opcode_pc)?,
        };

        self.cycles += cycles as u64;
        Ok(self.cycles)
    }

    fn interrupt(&mut self, bus: &mut impl Bus, vector: u16) {
        self.push_u16(bus, self.pc);
        self.push(bus, ((self.p | Status::UNUSED) - Status::BREAK).bits());
        self.p.insert(Status::INTERRUPT);
        self.pc = self.read_u16(bus, vector);
    }

    fn exec_group1(
        &mut self,
        bus: &mut impl Bus,
        opcode: u8,
        aaa: u8,
        bbb: u8,
        opcode_pc: u16,
    ) -> Result<u32> {
        let is_store = aaa == 4;

        if bbb == 2 {
            if is_store {
                // STA immediate does not exist.
                return Err(unknown_opcode(opcode, opcode_pc));
            }
            let value = self.fetch_byte(bus);
            self.exec_group1_alu(aaa, value);
            return Ok(2);
        }

        let (addr, base, page_crossed, mut cycles) = match bbb {
            0 => (self.addr_indx(bus), 0, false, 6),
            1 => (self.addr_zp(bus), 0, false, 3),
            3 => (self.addr_abs(bus), 0, false, 4),
            4 => {
                let (addr, page, base) = self.addr_indy_with_base(bus);
                (addr, base, page, 5)
            }
            5 => (self.addr_zpx(bus), 0, false, 4),
            6 => {
                let (addr, page, base) = self.addr_absy_with_base(bus);
                (addr, base, page, 4)
            }
            7 => {
                let (addr, page, base) = self.addr_absx_with_base(bus);
                (addr, base, page, 4)
            }
            _ => return Err(unknown_opcode(opcode, opcode_pc)),
        };

        if is_store {
            // Indexed stores always pay the page-cross cycle; the hardware
            // performs a dummy read of the unfixed address first.
            if matches!(bbb, 4 | 6 | 7) {
                let dummy_addr = (base & 0xFF00) | (addr & 0x00FF);
                let _ = bus.read(dummy_addr);
            }
            bus.write(addr, self.a);
            return Ok(match bbb {
                4 => 6,
                6 | 7 => 5,
                _ => cycles,
            });
        }

        if page_crossed && matches!(bbb, 4 | 6 | 7) {
            let dummy_addr = (base & 0xFF00) | (addr & 0x00FF);
            let _ = bus.read(dummy_addr);
            cycles += 1;
        }

        let value = bus.read(addr);
        self.exec_group1_alu(aaa, value);

        Ok(cycles)
    }

    fn exec_group1_alu(&mut self, aaa: u8, value: u8) {
        match aaa {
            0 => self.ora(value),
            1 => self.and(value),
            2 => self.eor(value),
            3 => self.adc(value),
            5 => {
                self.a = value;
                self.update_zn(self.a);
            }
            6 => self.compare(self.a, value),
            7 => self.sbc(value),
            _ => {}
        }
    }

    fn exec_group2(
        &mut self,
        bus: &mut impl Bus,
        opcode: u8,
        aaa: u8,
        bbb: u8,
        opcode_pc: u16,
    ) -> Result<u32> {
        match aaa {
            0 => self.exec_rmw(bus, opcode, bbb, opcode_pc, RmwOp::Asl),
            1 => self.exec_rmw(bus, opcode, bbb, opcode_pc, RmwOp::Rol),
            2 => self.exec_rmw(bus, opcode, bbb, opcode_pc, RmwOp::Lsr),
            3 => self.exec_rmw(bus, opcode, bbb, opcode_pc, RmwOp::Ror),
            4 => self.exec_stx(bus, opcode, bbb, opcode_pc),
            5 => self.exec_ldx(bus, opcode, bbb, opcode_pc),
            6 => self.exec_rmw(bus, opcode, bbb, opcode_pc, RmwOp::Dec),
            7 => self.exec_rmw(bus, opcode, bbb, opcode_pc, RmwOp::Inc),
            _ => Err(unknown_opcode(opcode, opcode_pc)),
        }
    }

    fn exec_stx(
        &mut self,
        bus: &mut impl Bus,
        opcode: u8,
        bbb: u8,
        opcode_pc: u16,
    ) -> Result<u32> {
        match bbb {
            1 => {
                let addr = self.addr_zp(bus);
                bus.write(addr, self.x);
                Ok(3)
            }
            3 => {
                let addr = self.addr_abs(bus);
                bus.write(addr, self.x);
                Ok(4)
            }
            5 => {
                let addr = self.addr_zpy(bus);
                bus.write(addr, self.x);
                Ok(4)
            }
            _ => Err(unknown_opcode(opcode, opcode_pc)),
        }
    }

    fn exec_ldx(
        &mut self,
        bus: &mut impl Bus,
        opcode: u8,
        bbb: u8,
        opcode_pc: u16,
    ) -> Result<u32> {
        match bbb {
            0 => {
                self.x = self.fetch_byte(bus);
                self.update_zn(self.x);
                Ok(2)
            }
            1 => {
                let addr = self.addr_zp(bus);
                self.x = bus.read(addr);
                self.update_zn(self.x);
                Ok(3)
            }
            3 => {
                let addr = self.addr_abs(bus);
                self.x = bus.read(addr);
                self.update_zn(self.x);
                Ok(4)
            }
            5 => {
                let addr = self.addr_zpy(bus);
                self.x = bus.read(addr);
                self.update_zn(self.x);
                Ok(4)
            }
            7 => {
                let (addr, page, base) = self.addr_absy_with_base(bus);
                if page {
                    let dummy_addr = (base & 0xFF00) | (addr & 0x00FF);
                    let _ = bus.read(dummy_addr);
                }
                self.x = bus.read(addr);
                self.update_zn(self.x);
                Ok(4 + page as u32)
            }
            _ => Err(unknown_opcode(opcode, opcode_pc)),
        }
    }

    fn exec_rmw(
        &mut self,
        bus: &mut impl Bus,
        opcode: u8,
        bbb: u8,
        opcode_pc: u16,
        op: RmwOp,
    ) -> Result<u32> {
        if bbb == 2 {
            if matches!(op, RmwOp::Dec | RmwOp::Inc) {
                // DEC/INC have no accumulator form.
                return Err(unknown_opcode(opcode, opcode_pc));
            }
            self.a = self.apply_rmw(op, self.a);
            return Ok(2);
        }

        let (addr, cycles, indexed_base) = match bbb {
            1 => (self.addr_zp(bus), 5, None),
            3 => (self.addr_abs(bus), 6, None),
            5 => (self.addr_zpx(bus), 6, None),
            7 => {
                let (addr, _page, base) = self.addr_absx_with_base(bus);
                (addr, 7, Some(base))
            }
            _ => return Err(unknown_opcode(opcode, opcode_pc)),
        };

        if let Some(base) = indexed_base {
            let dummy_addr = (base & 0xFF00) | (addr & 0x00FF);
            let _ = bus.read(dummy_addr);
        }

        // Read-modify-write: the unmodified value is written back first.
        let value = bus.read(addr);
        bus.write(addr, value);
        let out = self.apply_rmw(op, value);
        bus.write(addr, out);
        Ok(cycles)
    }

    fn apply_rmw(&mut self, op: RmwOp, value: u8) -> u8 {
        match op {
            RmwOp::Asl => self.asl(value),
            RmwOp::Rol => self.rol(value),
            RmwOp::Lsr => self.lsr(value),
            RmwOp::Ror => self.ror(value),
            RmwOp::Dec => {
                let out = value.wrapping_sub(1);
                self.update_zn(out);
                out
            }
            RmwOp::Inc => {
                let out = value.wrapping_add(1);
                self.update_zn(out);
                out
            }
        }
    }

    fn exec_group0(&mut self, bus: &mut impl Bus, opcode: u8, opcode_pc: u16) -> Result<u32> {
        let cycles = match opcode {
            0x00 => {
                // BRK pushes the address after its padding byte.
                self.pc = self.pc.wrapping_add(1);
                self.push_u16(bus, self.pc);
                self.push(bus, (self.p | Status::BREAK | Status::UNUSED).bits());
                self.p.insert(Status::INTERRUPT);
                self.pc = self.read_u16(bus, IRQ_VECTOR);
                7
            }
            0x08 => {
                self.push(bus, (self.p | Status::BREAK | Status::UNUSED).bits());
                3
            }
            0x10 => self.branch(bus, !self.p.contains(Status::NEGATIVE)),
            0x18 => {
                self.p.remove(Status::CARRY);
                2
            }
            0x20 => {
                let addr = self.fetch_word(bus);
                self.push_u16(bus, self.pc.wrapping_sub(1));
                self.pc = addr;
                6
            }
            0x24 => {
                let addr = self.addr_zp(bus);
                let value = bus.read(addr);
                self.bit(value);
                3
            }
            0x28 => {
                self.p = Status::from_bits_truncate(self.pop(bus))
                    | Status::BREAK
                    | Status::UNUSED;
                4
            }
            0x2C => {
                let addr = self.addr_abs(bus);
                let value = bus.read(addr);
                self.bit(value);
                4
            }
            0x30 => self.branch(bus, self.p.contains(Status::NEGATIVE)),
            0x38 => {
                self.p.insert(Status::CARRY);
                2
            }
            0x40 => {
                // The break flag comes back forced set.
                self.p = Status::from_bits_truncate(self.pop(bus))
                    | Status::BREAK
                    | Status::UNUSED;
                self.pc = self.pop_u16(bus);
                6
            }
            0x48 => {
                self.push(bus, self.a);
                3
            }
            0x4C => {
                self.pc = self.fetch_word(bus);
                3
            }
            0x50 => self.branch(bus, !self.p.contains(Status::OVERFLOW)),
            0x58 => {
                self.p.remove(Status::INTERRUPT);
                2
            }
            0x60 => {
                self.pc = self.pop_u16(bus).wrapping_add(1);
                6
            }
            0x68 => {
                self.a = self.pop(bus);
                self.update_zn(self.a);
                4
            }
            0x6C => {
                let ptr = self.fetch_word(bus);
                self.pc = self.read_u16_bug(bus, ptr);
                5
            }
            0x70 => self.branch(bus, self.p.contains(Status::OVERFLOW)),
            0x78 => {
                self.p.insert(Status::INTERRUPT);
                2
            }
            0x84 => {
                let addr = self.addr_zp(bus);
                bus.write(addr, self.y);
                3
            }
            0x88 => {
                self.y = self.y.wrapping_sub(1);
                self.update_zn(self.y);
                2
            }
            0x8C => {
                let addr = self.addr_abs(bus);
                bus.write(addr, self.y);
                4
            }
            0x90 => self.branch(bus, !self.p.contains(Status::CARRY)),
            0x94 => {
                let addr = self.addr_zpx(bus);
                bus.write(addr, self.y);
                4
            }
            0x98 => {
                self.a = self.y;
                self.update_zn(self.a);
                2
            }
            0xA0 => {
                self.y = self.fetch_byte(bus);
                self.update_zn(self.y);
                2
            }
            0xA4 => {
                let addr = self.addr_zp(bus);
                self.y = bus.read(addr);
                self.update_zn(self.y);
                3
            }
            0xA8 => {
                self.y = self.a;
                self.update_zn(self.y);
                2
            }
            0xAC => {
                let addr = self.addr_abs(bus);
                self.y = bus.read(addr);
                self.update_zn(self.y);
                4
            }
            0xB0 => self.branch(bus, self.p.contains(Status::CARRY)),
            0xB4 => {
                let addr = self.addr_zpx(bus);
                self.y = bus.read(addr);
                self.update_zn(self.y);
                4
            }
            0xB8 => {
                self.p.remove(Status::OVERFLOW);
                2
            }
            0xBC => {
                let (addr, page, base) = self.addr_absx_with_base(bus);
                if page {
                    let dummy_addr = (base & 0xFF00) | (addr & 0x00FF);
                    let _ = bus.read(dummy_addr);
                }
                self.y = bus.read(addr);
                self.update_zn(self.y);
                4 + page as u32
            }
            0xC0 => {
                let value = self.fetch_byte(bus);
                self.compare(self.y, value);
                2
            }
            0xC4 => {
                let addr = self.addr_zp(bus);
                let value = bus.read(addr);
                self.compare(self.y, value);
                3
            }
            0xC8 => {
                self.y = self.y.wrapping_add(1);
                self.update_zn(self.y);
                2
            }
            0xCC => {
                let addr = self.addr_abs(bus);
                let value = bus.read(addr);
                self.compare(self.y, value);
                4
            }
            0xD0 => self.branch(bus, !self.p.contains(Status::ZERO)),
            0xD8 => {
                self.p.remove(Status::DECIMAL);
                2
            }
            0xE0 => {
                let value = self.fetch_byte(bus);
                self.compare(self.x, value);
                2
            }
            0xE4 => {
                let addr = self.addr_zp(bus);
                let value = bus.read(addr);
                self.compare(self.x, value);
                3
            }
            0xE8 => {
                self.x = self.x.wrapping_add(1);
                self.update_zn(self.x);
                2
            }
            0xEC => {
                let addr = self.addr_abs(bus);
                let value = bus.read(addr);
                self.compare(self.x, value);
                4
            }
            0xF0 => self.branch(bus, self.p.contains(Status::ZERO)),
            0xF8 => {
                self.p.insert(Status::DECIMAL);
                2
            }
            _ => return Err(unknown_opcode(opcode, opcode_pc)),
        };
        Ok(cycles)
    }

    fn addr_zp(&mut self, bus: &mut impl Bus) -> u16 {
        self.fetch_byte(bus) as u16
    }

    fn addr_zpx(&mut self, bus: &mut impl Bus) -> u16 {
        let base = self.fetch_byte(bus);
        let _ = bus.read(base as u16);
        base.wrapping_add(self.x) as u16
    }

    fn addr_zpy(&mut self, bus: &mut impl Bus) -> u16 {
        let base = self.fetch_byte(bus);
        let _ = bus.read(base as u16);
        base.wrapping_add(self.y) as u16
    }

    fn addr_abs(&mut self, bus: &mut impl Bus) -> u16 {
        self.fetch_word(bus)
    }

    fn addr_absx_with_base(&mut self, bus: &mut impl Bus) -> (u16, bool, u16) {
        let base = self.fetch_word(bus);
        let addr = base.wrapping_add(self.x as u16);
        (addr, (base & 0xFF00) != (addr & 0xFF00), base)
    }

    fn addr_absy_with_base(&mut self, bus: &mut impl Bus) -> (u16, bool, u16) {
        let base = self.fetch_word(bus);
        let addr = base.wrapping_add(self.y as u16);
        (addr, (base & 0xFF00) != (addr & 0xFF00), base)
    }

    fn addr_indx(&mut self, bus: &mut impl Bus) -> u16 {
        let zp = self.fetch_byte(bus);
        let _ = bus.read(zp as u16);
        let base = zp.wrapping_add(self.x);
        self.read_zp_u16(bus, base)
    }

    fn addr_indy_with_base(&mut self, bus: &mut impl Bus) -> (u16, bool, u16) {
        let base = self.fetch_byte(bus);
        let ptr = self.read_zp_u16(bus, base);
        let addr = ptr.wrapping_add(self.y as u16);
        (addr, (ptr & 0xFF00) != (addr & 0xFF00), ptr)
    }

    fn read_zp_u16(&mut self, bus: &mut impl Bus, addr: u8) -> u16 {
        let lo = bus.read(addr as u16) as u16;
        let hi = bus.read(addr.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    fn branch(&mut self, bus: &mut impl Bus, condition: bool) -> u32 {
        let offset = self.fetch_byte(bus) as i8;
        if condition {
            let old_pc = self.pc;
            let _ = bus.read(old_pc);
            let new_pc = self.pc.wrapping_add(offset as i16 as u16);
            self.pc = new_pc;
            if (old_pc & 0xFF00) != (new_pc & 0xFF00) {
                let dummy_addr = (old_pc & 0xFF00) | (new_pc & 0x00FF);
                let _ = bus.read(dummy_addr);
                4
            } else {
                3
            }
        } else {
            2
        }
    }

    fn fetch_byte(&mut self, bus: &mut impl Bus) -> u8 {
        let value = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch_word(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.fetch_byte(bus) as u16;
        let hi = self.fetch_byte(bus) as u16;
        (hi << 8) | lo
    }

    fn read_u16(&mut self, bus: &mut impl Bus, addr: u16) -> u16 {
        let lo = bus.read(addr) as u16;
        let hi = bus.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// JMP (indirect) fetches the high byte without carrying into the
    /// pointer's high byte.
    fn read_u16_bug(&mut self, bus: &mut impl Bus, addr: u16) -> u16 {
        let lo = bus.read(addr) as u16;
        let hi_addr = (addr & 0xFF00) | ((addr.wrapping_add(1)) & 0x00FF);
        let hi = bus.read(hi_addr) as u16;
        (hi << 8) | lo
    }

    fn push(&mut self, bus: &mut impl Bus, value: u8) {
        bus.write(0x0100 | self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn push_u16(&mut self, bus: &mut impl Bus, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, value as u8);
    }

    fn pop(&mut self, bus: &mut impl Bus) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        bus.read(0x0100 | self.sp as u16)
    }

    fn pop_u16(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.pop(bus) as u16;
        let hi = self.pop(bus) as u16;
        (hi << 8) | lo
    }

    fn update_zn(&mut self, value: u8) {
        self.p.set(Status::ZERO, value == 0);
        self.p.set(Status::NEGATIVE, (value & 0x80) != 0);
    }

    fn ora(&mut self, value: u8) {
        self.a |= value;
        self.update_zn(self.a);
    }

    fn and(&mut self, value: u8) {
        self.a &= value;
        self.update_zn(self.a);
    }

    fn eor(&mut self, value: u8) {
        self.a ^= value;
        self.update_zn(self.a);
    }

    fn bit(&mut self, value: u8) {
        self.p.set(Status::ZERO, (self.a & value) == 0);
        self.p.set(Status::NEGATIVE, (value & 0x80) != 0);
        self.p.set(Status::OVERFLOW, (value & 0x40) != 0);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.p.set(Status::CARRY, register >= value);
        self.update_zn(result);
    }

    fn adc(&mut self, value: u8) {
        let carry_in = self.p.contains(Status::CARRY) as u16;
        let result = self.a as u16 + value as u16 + carry_in;
        let out = result as u8;

        self.p.set(Status::CARRY, result > 0xFF);
        self.p
            .set(Status::OVERFLOW, ((self.a ^ out) & (value ^ out) & 0x80) != 0);

        self.a = out;
        self.update_zn(self.a);
    }

    fn sbc(&mut self, value: u8) {
        self.adc(value ^ 0xFF);
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.p.set(Status::CARRY, (value & 0x80) != 0);
        let result = value << 1;
        self.update_zn(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.p.set(Status::CARRY, (value & 0x01) != 0);
        let result = value >> 1;
        self.update_zn(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let carry_in = self.p.contains(Status::CARRY) as u8;
        self.p.set(Status::CARRY, (value & 0x80) != 0);
        let result = (value << 1) | carry_in;
        self.update_zn(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let carry_in = if self.p.contains(Status::CARRY) { 0x80 } else { 0 };
        self.p.set(Status::CARRY, (value & 0x01) != 0);
        let result = (value >> 1) | carry_in;
        self.update_zn(result);
        result
    }
}

fn unknown_opcode(opcode: u8, pc: u16) -> anyhow::Error {
    anyhow::anyhow!(
        "unknown opcode {opcode:#04X} at {pc:#06X}: unofficial instructions are unsupported"
    )
}

#[derive(Clone, Copy)]
enum RmwOp {
    Asl,
    Rol,
    Lsr,
    Ror,
    Dec,
    Inc,
}
