pub(crate) const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

const TRI_TABLE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12,
    13, 14, 15,
];

const NOISE_PERIOD_TABLE: [u16; 16] = [
    4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];

const DMC_RATE_TABLE: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];

// Frame sequencer boundaries in CPU cycles.
const FC_4STEP_Q1: u32 = 7_457;
const FC_4STEP_Q2_H2: u32 = 14_913;
const FC_4STEP_Q3: u32 = 22_371;
const FC_4STEP_Q4_H4_IRQ: u32 = 29_829;
const FC_4STEP_RESET: u32 = 29_830;

const FC_5STEP_Q1: u32 = 7_457;
const FC_5STEP_Q2_H2: u32 = 14_913;
const FC_5STEP_Q3: u32 = 22_371;
const FC_5STEP_Q4_H4: u32 = 37_281;
const FC_5STEP_RESET: u32 = 37_282;

/// Frame-sequenced five-channel synthesizer. One call to [`Apu::cycle`] per
/// CPU cycle produces one unsigned 8-bit sample; the caller owns any
/// resampling for playback.
pub struct Apu {
    pulse1: Pulse,
    pulse2: Pulse,
    triangle: Triangle,
    noise: Noise,
    dmc: Dmc,

    frame_counter: u32,
    five_step_mode: bool,
    frame_irq_inhibit: bool,
    frame_irq_flag: bool,
    frame_write_pending: bool,
    frame_write_value: u8,
    frame_write_delay: u8,

    cpu_cycle: u64,
    dmc_dma_request: Option<u16>,
}

impl Apu {
    pub fn new() -> Self {
        Self {
            pulse1: Pulse::new(true),
            pulse2: Pulse::new(false),
            triangle: Triangle::new(),
            noise: Noise::new(),
            dmc: Dmc::new(),
            frame_counter: 0,
            five_step_mode: false,
            frame_irq_inhibit: false,
            frame_irq_flag: false,
            frame_write_pending: false,
            frame_write_value: 0,
            frame_write_delay: 0,
            cpu_cycle: 0,
            dmc_dma_request: None,
        }
    }

    pub fn power_up(&mut self) {
        *self = Apu::new();
    }

    pub fn write_register(&mut self, addr: u16, value: u8) {
        match addr {
            0x4000 => self.pulse1.write_control(value),
            0x4001 => self.pulse1.write_sweep(value),
            0x4002 => self.pulse1.write_timer_low(value),
            0x4003 => self.pulse1.write_timer_high(value),

            0x4004 => self.pulse2.write_control(value),
            0x4005 => self.pulse2.write_sweep(value),
            0x4006 => self.pulse2.write_timer_low(value),
            0x4007 => self.pulse2.write_timer_high(value),

            0x4008 => self.triangle.write_linear(value),
            0x400A => self.triangle.write_timer_low(value),
            0x400B => self.triangle.write_timer_high(value),

            0x400C => self.noise.write_control(value),
            0x400E => self.noise.write_period(value),
            0x400F => self.noise.write_length(value),

            0x4010 => self.dmc.write_control(value),
            0x4011 => self.dmc.write_output_level(value),
            0x4012 => self.dmc.write_sample_addr(value),
            0x4013 => self.dmc.write_sample_length(value),

            0x4015 => self.write_status(value),
            0x4017 => self.write_frame_counter(value),
            _ => {}
        }
    }

    pub fn read_status(&mut self) -> u8 {
        let mut status = 0u8;
        if self.pulse1.length_counter > 0 {
            status |= 0x01;
        }
        if self.pulse2.length_counter > 0 {
            status |= 0x02;
        }
        if self.triangle.length_counter > 0 {
            status |= 0x04;
        }
        if self.noise.length_counter > 0 {
            status |= 0x08;
        }
        if self.dmc.playback_active() {
            status |= 0x10;
        }
        if self.frame_irq_flag {
            status |= 0x40;
        }
        if self.dmc.irq_flag {
            status |= 0x80;
        }

        // Reading acknowledges the frame IRQ but not the DMC IRQ.
        self.frame_irq_flag = false;
        status
    }

    pub fn irq_asserted(&self) -> bool {
        self.frame_irq_flag || self.dmc.irq_flag
    }

    /// Advances one CPU cycle and returns the mixed sample.
    pub fn cycle(&mut self) -> u8 {
        self.cpu_cycle = self.cpu_cycle.wrapping_add(1);

        if self.frame_write_pending {
            if self.frame_write_delay > 0 {
                self.frame_write_delay -= 1;
            }
            if self.frame_write_delay == 0 {
                self.apply_frame_counter_write(self.frame_write_value);
                self.frame_write_pending = false;
            }
        }

        if (self.cpu_cycle & 1) == 0 {
            self.pulse1.clock_timer();
            self.pulse2.clock_timer();
            self.noise.clock_timer();
        }
        self.triangle.clock_timer();
        // The DMC timer runs every CPU cycle, unlike the other dividers.
        self.dmc.clock_timer();
        if self.dmc.needs_dma() && self.dmc_dma_request.is_none() {
            self.dmc_dma_request = Some(self.dmc.current_dma_addr());
        }

        self.clock_frame_counter();

        self.mix_sample()
    }

    /// Pending DMC sample fetch; the console services it with a stalled
    /// CPU read and calls [`Apu::complete_dmc_dma`].
    pub fn take_dmc_dma_request(&mut self) -> Option<u16> {
        self.dmc_dma_request.take()
    }

    pub fn complete_dmc_dma(&mut self, value: u8) {
        self.dmc.consume_dma_byte(value);
        if self.dmc.needs_dma() && self.dmc_dma_request.is_none() {
            self.dmc_dma_request = Some(self.dmc.current_dma_addr());
        }
    }

    fn write_status(&mut self, value: u8) {
        // Any $4015 write clears a pending DMC IRQ.
        self.dmc.irq_flag = false;

        self.pulse1.enabled = (value & 0x01) != 0;
        if !self.pulse1.enabled {
            self.pulse1.length_counter = 0;
        }

        self.pulse2.enabled = (value & 0x02) != 0;
        if !self.pulse2.enabled {
            self.pulse2.length_counter = 0;
        }

        self.triangle.enabled = (value & 0x04) != 0;
        if !self.triangle.enabled {
            self.triangle.length_counter = 0;
        }

        self.noise.enabled = (value & 0x08) != 0;
        if !self.noise.enabled {
            self.noise.length_counter = 0;
        }

        self.dmc.enabled = (value & 0x10) != 0;
        if !self.dmc.enabled {
            self.dmc.stop();
        } else if !self.dmc.playback_active() {
            self.dmc.restart_sample();
            if self.dmc.needs_dma() && self.dmc_dma_request.is_none() {
                self.dmc_dma_request = Some(self.dmc.current_dma_addr());
            }
        }
    }

    fn write_frame_counter(&mut self, value: u8) {
        if (value & 0x40) != 0 {
            self.frame_irq_flag = false;
        }
        self.frame_write_pending = true;
        self.frame_write_value = value;
        // The write lands on the next even APU cycle.
        self.frame_write_delay = if (self.cpu_cycle & 1) == 0 { 3 } else { 4 };
    }

    fn apply_frame_counter_write(&mut self, value: u8) {
        self.five_step_mode = (value & 0x80) != 0;
        self.frame_irq_inhibit = (value & 0x40) != 0;
        if self.frame_irq_inhibit {
            self.frame_irq_flag = false;
        }
        self.frame_counter = 0;
        if self.five_step_mode {
            self.clock_quarter_frame();
            self.clock_half_frame();
        }
    }

    fn clock_frame_counter(&mut self) {
        self.frame_counter = self.frame_counter.wrapping_add(1);

        if self.five_step_mode {
            match self.frame_counter {
                FC_5STEP_Q1 | FC_5STEP_Q3 => self.clock_quarter_frame(),
                FC_5STEP_Q2_H2 | FC_5STEP_Q4_H4 => {
                    self.clock_quarter_frame();
                    self.clock_half_frame();
                }
                FC_5STEP_RESET => {
                    self.frame_counter = 0;
                }
                _ => {}
            }
        } else {
            match self.frame_counter {
                FC_4STEP_Q1 | FC_4STEP_Q3 => self.clock_quarter_frame(),
                FC_4STEP_Q2_H2 => {
                    self.clock_quarter_frame();
                    self.clock_half_frame();
                }
                FC_4STEP_Q4_H4_IRQ => {
                    self.clock_quarter_frame();
                    self.clock_half_frame();
                    if !self.frame_irq_inhibit {
                        self.frame_irq_flag = true;
                    }
                }
                FC_4STEP_RESET => {
                    if !self.frame_irq_inhibit {
                        self.frame_irq_flag = true;
                    }
                    self.frame_counter = 0;
                }
                _ => {}
            }
        }
    }

    fn clock_quarter_frame(&mut self) {
        self.pulse1.envelope.clock();
        self.pulse2.envelope.clock();
        self.triangle.clock_linear_counter();
        self.noise.envelope.clock();
    }

    fn clock_half_frame(&mut self) {
        self.pulse1.clock_length_and_sweep();
        self.pulse2.clock_length_and_sweep();
        self.triangle.clock_length_counter();
        self.noise.clock_length_counter();
    }

    fn mix_sample(&self) -> u8 {
        let pulse_sum = (self.pulse1.output() + self.pulse2.output()) as f32;
        let pulse_out = if pulse_sum > 0.0 {
            95.88 / ((8128.0 / pulse_sum) + 100.0)
        } else {
            0.0
        };

        let t = self.triangle.output() as f32;
        let n = self.noise.output() as f32;
        let d = self.dmc.output() as f32;
        let tnd_in = (t / 8227.0) + (n / 12241.0) + (d / 22638.0);
        let tnd_out = if tnd_in > 0.0 {
            159.79 / ((1.0 / tnd_in) + 100.0)
        } else {
            0.0
        };

        let mixed = (pulse_out + tnd_out).clamp(0.0, 1.0);
        (mixed * 255.0) as u8
    }
}

/// Shared volume envelope for the pulse and noise channels. The loop bit
/// doubles as the length-counter halt flag.
#[derive(Clone, Copy)]
struct Envelope {
    start: bool,
    period: u8,
    divider: u8,
    decay: u8,
    loop_flag: bool,
    constant: bool,
    volume: u8,
}

impl Envelope {
    fn new() -> Self {
        Self {
            start: false,
            period: 0,
            divider: 0,
            decay: 0,
            loop_flag: false,
            constant: false,
            volume: 0,
        }
    }

    fn write(&mut self, value: u8) {
        self.loop_flag = (value & 0x20) != 0;
        self.constant = (value & 0x10) != 0;
        self.volume = value & 0x0F;
        self.period = value & 0x0F;
        self.start = true;
    }

    fn clock(&mut self) {
        if self.start {
            self.start = false;
            self.decay = 15;
            self.divider = self.period;
            return;
        }

        if self.divider == 0 {
            self.divider = self.period;
            if self.decay == 0 {
                if self.loop_flag {
                    self.decay = 15;
                }
            } else {
                self.decay -= 1;
            }
        } else {
            self.divider -= 1;
        }
    }

    fn output(&self) -> u8 {
        if self.constant { self.volume } else { self.decay }
    }
}

/// Pitch sweep unit. The first pulse channel uses one's-complement
/// negation (an extra subtraction of 1), the second two's-complement.
#[derive(Clone, Copy)]
struct Sweep {
    ones_complement: bool,
    enabled: bool,
    period: u8,
    negate: bool,
    shift: u8,
    reload: bool,
    divider: u8,
}

impl Sweep {
    fn new(ones_complement: bool) -> Self {
        Self {
            ones_complement,
            enabled: false,
            period: 1,
            negate: false,
            shift: 0,
            reload: false,
            divider: 0,
        }
    }

    fn write(&mut self, value: u8) {
        self.enabled = (value & 0x80) != 0;
        self.period = ((value >> 4) & 0x07) + 1;
        self.negate = (value & 0x08) != 0;
        self.shift = value & 0x07;
        self.reload = true;
    }

    fn target_period(&self, timer_period: u16) -> u16 {
        if self.shift == 0 {
            return timer_period;
        }
        let change = timer_period >> self.shift;
        if self.negate {
            let extra = self.ones_complement as u16;
            timer_period.wrapping_sub(change + extra)
        } else {
            timer_period.wrapping_add(change)
        }
    }

    fn clock(&mut self, timer_period: &mut u16) {
        if self.reload {
            if self.enabled && self.divider == 0 {
                self.apply(timer_period);
            }
            self.divider = self.period;
            self.reload = false;
            return;
        }

        if self.divider == 0 {
            if self.enabled {
                self.apply(timer_period);
            }
            self.divider = self.period;
        } else {
            self.divider -= 1;
        }
    }

    fn apply(&self, timer_period: &mut u16) {
        if self.shift == 0 {
            return;
        }
        let target = self.target_period(*timer_period);
        if target <= 0x07FF {
            *timer_period = target;
        }
    }
}

#[derive(Clone, Copy)]
struct Pulse {
    enabled: bool,
    duty: u8,
    duty_pos: u8,
    timer_period: u16,
    timer: u16,
    length_counter: u8,
    envelope: Envelope,
    sweep: Sweep,
}

impl Pulse {
    fn new(first_channel: bool) -> Self {
        Self {
            enabled: false,
            duty: 0,
            duty_pos: 0,
            timer_period: 0,
            timer: 0,
            length_counter: 0,
            envelope: Envelope::new(),
            sweep: Sweep::new(first_channel),
        }
    }

    fn write_control(&mut self, value: u8) {
        self.duty = (value >> 6) & 0x03;
        self.envelope.write(value);
    }

    fn write_sweep(&mut self, value: u8) {
        self.sweep.write(value);
    }

    fn write_timer_low(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0xFF00) | value as u16;
    }

    fn write_timer_high(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x00FF) | (((value & 0x07) as u16) << 8);
        if self.enabled {
            self.length_counter = LENGTH_TABLE[(value >> 3) as usize];
        }
        self.duty_pos = 0;
        self.envelope.start = true;
    }

    fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.timer_period;
            self.duty_pos = (self.duty_pos + 1) & 0x07;
        } else {
            self.timer -= 1;
        }
    }

    fn clock_length_and_sweep(&mut self) {
        if !self.envelope.loop_flag && self.length_counter > 0 {
            self.length_counter -= 1;
        }
        self.sweep.clock(&mut self.timer_period);
    }

    fn output(&self) -> u8 {
        if !self.enabled || self.length_counter == 0 {
            return 0;
        }
        if DUTY_TABLE[self.duty as usize][self.duty_pos as usize] == 0 {
            return 0;
        }
        // Periods below 8 and sweep targets beyond 11 bits mute the channel.
        if self.timer_period < 8 || self.sweep.target_period(self.timer_period) > 0x07FF {
            return 0;
        }
        self.envelope.output()
    }
}

#[derive(Clone, Copy)]
struct Triangle {
    enabled: bool,
    control_flag: bool,
    linear_reload_value: u8,
    linear_counter: u8,
    linear_reload_flag: bool,
    timer_period: u16,
    timer: u16,
    length_counter: u8,
    seq_step: u8,
}

impl Triangle {
    fn new() -> Self {
        Self {
            enabled: false,
            control_flag: false,
            linear_reload_value: 0,
            linear_counter: 0,
            linear_reload_flag: false,
            timer_period: 0,
            timer: 0,
            length_counter: 0,
            seq_step: 0,
        }
    }

    fn write_linear(&mut self, value: u8) {
        self.control_flag = (value & 0x80) != 0;
        self.linear_reload_value = value & 0x7F;
    }

    fn write_timer_low(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0xFF00) | value as u16;
    }

    fn write_timer_high(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x00FF) | (((value & 0x07) as u16) << 8);
        if self.enabled {
            self.length_counter = LENGTH_TABLE[(value >> 3) as usize];
        }
        self.linear_reload_flag = true;
    }

    fn clock_linear_counter(&mut self) {
        if self.linear_reload_flag {
            self.linear_counter = self.linear_reload_value;
        } else if self.linear_counter > 0 {
            self.linear_counter -= 1;
        }

        if !self.control_flag {
            self.linear_reload_flag = false;
        }
    }

    fn clock_length_counter(&mut self) {
        if !self.control_flag && self.length_counter > 0 {
            self.length_counter -= 1;
        }
    }

    fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.timer_period;
            if self.length_counter > 0 && self.linear_counter > 0 && self.timer_period > 1 {
                self.seq_step = (self.seq_step + 1) & 0x1F;
            }
        } else {
            self.timer -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled
            || self.length_counter == 0
            || self.linear_counter == 0
            || self.timer_period < 2
        {
            0
        } else {
            TRI_TABLE[self.seq_step as usize]
        }
    }
}

#[derive(Clone, Copy)]
struct Noise {
    enabled: bool,
    envelope: Envelope,
    mode: bool,
    timer_period: u16,
    timer: u16,
    shift_register: u16,
    length_counter: u8,
}

impl Noise {
    fn new() -> Self {
        Self {
            enabled: false,
            envelope: Envelope::new(),
            mode: false,
            timer_period: NOISE_PERIOD_TABLE[0],
            timer: 0,
            shift_register: 1,
            length_counter: 0,
        }
    }

    fn write_control(&mut self, value: u8) {
        self.envelope.write(value);
    }

    fn write_period(&mut self, value: u8) {
        self.mode = (value & 0x80) != 0;
        self.timer_period = NOISE_PERIOD_TABLE[(value & 0x0F) as usize];
    }

    fn write_length(&mut self, value: u8) {
        if self.enabled {
            self.length_counter = LENGTH_TABLE[(value >> 3) as usize];
        }
        self.envelope.start = true;
    }

    fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.timer_period;
            let tap = if self.mode { 6 } else { 1 };
            let feedback = (self.shift_register ^ (self.shift_register >> tap)) & 0x0001;
            self.shift_register >>= 1;
            self.shift_register |= feedback << 14;
        } else {
            self.timer -= 1;
        }
    }

    fn clock_length_counter(&mut self) {
        if !self.envelope.loop_flag && self.length_counter > 0 {
            self.length_counter -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled || self.length_counter == 0 || (self.shift_register & 0x0001) != 0 {
            return 0;
        }
        self.envelope.output()
    }
}

#[derive(Clone, Copy)]
struct Dmc {
    enabled: bool,
    irq_enabled: bool,
    irq_flag: bool,
    loop_flag: bool,
    timer_period: u16,
    timer: u16,
    output_level: u8,
    sample_addr: u8,
    sample_length: u8,
    current_addr: u16,
    bytes_remaining: u16,
    sample_buffer: Option<u8>,
    shift_register: u8,
    bits_remaining: u8,
    silence: bool,
    dma_pending: bool,
    dma_delay: u8,
}

impl Dmc {
    fn new() -> Self {
        Self {
            enabled: false,
            irq_enabled: false,
            irq_flag: false,
            loop_flag: false,
            timer_period: DMC_RATE_TABLE[0],
            timer: DMC_RATE_TABLE[0],
            output_level: 0,
            sample_addr: 0,
            sample_length: 0,
            current_addr: 0xC000,
            bytes_remaining: 0,
            sample_buffer: None,
            shift_register: 0,
            bits_remaining: 8,
            silence: true,
            dma_pending: false,
            dma_delay: 0,
        }
    }

    fn write_control(&mut self, value: u8) {
        self.irq_enabled = (value & 0x80) != 0;
        if !self.irq_enabled {
            self.irq_flag = false;
        }
        self.loop_flag = (value & 0x40) != 0;
        self.timer_period = DMC_RATE_TABLE[(value & 0x0F) as usize];
        if self.timer == 0 || self.timer > self.timer_period {
            self.timer = self.timer_period;
        }
    }

    fn write_output_level(&mut self, value: u8) {
        self.output_level = value & 0x7F;
    }

    fn write_sample_addr(&mut self, value: u8) {
        self.sample_addr = value;
    }

    fn write_sample_length(&mut self, value: u8) {
        self.sample_length = value;
    }

    fn restart_sample(&mut self) {
        self.current_addr = 0xC000 | ((self.sample_addr as u16) << 6);
        self.bytes_remaining = ((self.sample_length as u16) << 4) | 0x0001;
        if self.sample_buffer.is_none() && self.bytes_remaining > 0 {
            self.schedule_dma(2);
        }
    }

    fn playback_active(&self) -> bool {
        self.bytes_remaining > 0 || self.sample_buffer.is_some()
    }

    fn needs_dma(&self) -> bool {
        self.enabled && self.dma_pending && self.dma_delay == 0
    }

    fn current_dma_addr(&self) -> u16 {
        self.current_addr
    }

    fn stop(&mut self) {
        self.bytes_remaining = 0;
        self.dma_pending = false;
        self.dma_delay = 0;
    }

    fn consume_dma_byte(&mut self, byte: u8) {
        self.dma_pending = false;
        self.dma_delay = 0;
        self.sample_buffer = Some(byte);
        if self.bytes_remaining > 0 {
            // The address wraps from $FFFF back into the $8000 ROM window.
            self.current_addr = if self.current_addr == 0xFFFF {
                0x8000
            } else {
                self.current_addr.wrapping_add(1)
            };
            self.bytes_remaining -= 1;

            if self.bytes_remaining == 0 {
                if self.loop_flag {
                    self.restart_sample();
                } else if self.irq_enabled {
                    self.irq_flag = true;
                }
            }
        }
    }

    fn clock_output_unit(&mut self) {
        if !self.silence {
            if (self.shift_register & 0x01) != 0 {
                if self.output_level <= 125 {
                    self.output_level += 2;
                }
            } else if self.output_level >= 2 {
                self.output_level -= 2;
            }
        }

        self.shift_register >>= 1;
        if self.bits_remaining > 0 {
            self.bits_remaining -= 1;
        }

        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            if let Some(sample) = self.sample_buffer.take() {
                self.shift_register = sample;
                self.silence = false;
                if self.bytes_remaining > 0 {
                    self.schedule_dma(1);
                }
            } else {
                self.silence = true;
            }
        }
    }

    fn clock_timer(&mut self) {
        if self.dma_pending && self.dma_delay > 0 {
            self.dma_delay -= 1;
        }

        if self.timer == 0 {
            self.timer = self.timer_period;
        }
        self.timer -= 1;
        if self.timer == 0 {
            self.clock_output_unit();
        }
    }

    fn schedule_dma(&mut self, delay: u8) {
        if self.enabled && self.sample_buffer.is_none() && self.bytes_remaining > 0 {
            self.dma_pending = true;
            self.dma_delay = delay;
        }
    }

    fn output(&self) -> u8 {
        self.output_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_table_documented_entries() {
        assert_eq!(LENGTH_TABLE[0x00], 10);
        assert_eq!(LENGTH_TABLE[0x08], 160);
    }

    #[test]
    fn length_loads_only_when_channel_enabled() {
        let mut apu = Apu::new();
        apu.write_register(0x4003, 0x00);
        assert_eq!(apu.read_status() & 0x01, 0);

        apu.write_register(0x4015, 0x01);
        apu.write_register(0x4003, 0x00);
        assert_eq!(apu.read_status() & 0x01, 0x01);
    }

    #[test]
    fn four_step_mode_raises_frame_irq_only_at_step_four() {
        let mut apu = Apu::new();
        for _ in 0..FC_4STEP_Q4_H4_IRQ - 1 {
            apu.cycle();
            assert!(!apu.irq_asserted());
        }
        apu.cycle();
        assert!(apu.irq_asserted());
    }

    #[test]
    fn inhibit_bit_suppresses_frame_irq() {
        let mut apu = Apu::new();
        apu.write_register(0x4017, 0x40);
        for _ in 0..FC_4STEP_RESET + 8 {
            apu.cycle();
        }
        assert!(!apu.irq_asserted());
    }

    #[test]
    fn five_step_mode_never_raises_frame_irq() {
        let mut apu = Apu::new();
        apu.write_register(0x4017, 0x80);
        for _ in 0..FC_5STEP_RESET + 8 {
            apu.cycle();
        }
        assert!(!apu.irq_asserted());
    }

    #[test]
    fn reading_status_acknowledges_frame_irq() {
        let mut apu = Apu::new();
        for _ in 0..FC_4STEP_Q4_H4_IRQ {
            apu.cycle();
        }
        assert_eq!(apu.read_status() & 0x40, 0x40);
        assert!(!apu.irq_asserted());
    }

    #[test]
    fn sweep_negate_differs_between_pulse_channels() {
        let mut one = Sweep::new(true);
        let mut two = Sweep::new(false);
        one.write(0x0A); // negate, shift 2
        two.write(0x0A);
        assert_eq!(one.target_period(0x0100), 0x0100 - 0x40 - 1);
        assert_eq!(two.target_period(0x0100), 0x0100 - 0x40);
    }

    #[test]
    fn pulse_mutes_below_minimum_period() {
        let mut apu = Apu::new();
        apu.write_register(0x4015, 0x01);
        apu.write_register(0x4000, 0x3F); // constant volume 15, halt
        apu.write_register(0x4002, 0x04); // period 4 < 8
        apu.write_register(0x4003, 0x00);
        assert_eq!(apu.pulse1.output(), 0);
    }

    #[test]
    fn dmc_level_drives_nonzero_sample() {
        let mut apu = Apu::new();
        assert_eq!(apu.cycle(), 0);
        apu.write_register(0x4011, 0x40);
        assert!(apu.cycle() > 0);
    }

    #[test]
    fn enabling_dmc_requests_sample_fetch() {
        let mut apu = Apu::new();
        apu.write_register(0x4012, 0x04); // sample at $C100
        apu.write_register(0x4013, 0x01); // 17 bytes
        apu.write_register(0x4015, 0x10);
        // The first fetch shows up after the short startup delay.
        apu.cycle();
        apu.cycle();
        apu.cycle();
        let addr = apu.take_dmc_dma_request().expect("fetch requested");
        assert_eq!(addr, 0xC100);

        apu.complete_dmc_dma(0xFF);
        assert_eq!(apu.read_status() & 0x10, 0x10);
    }
}
