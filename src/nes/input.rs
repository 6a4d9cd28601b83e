use bitflags::bitflags;
use std::sync::{Arc, Mutex};

bitflags! {
    /// Pad buttons in shift-register order: A reads out first.
    pub struct Buttons: u8 {
        const A      = 0x01;
        const B      = 0x02;
        const SELECT = 0x04;
        const START  = 0x08;
        const UP     = 0x10;
        const DOWN   = 0x20;
        const LEFT   = 0x40;
        const RIGHT  = 0x80;
    }
}

/// Host-side handle to one pad. The simulation thread reads the same
/// state through [`Controllers`], so updates take effect mid-frame.
#[derive(Clone)]
pub struct ControllerHandle {
    buttons: Arc<Mutex<Buttons>>,
}

impl ControllerHandle {
    pub fn press(&self, buttons: Buttons) {
        self.buttons.lock().unwrap().insert(buttons);
    }

    pub fn release(&self, buttons: Buttons) {
        self.buttons.lock().unwrap().remove(buttons);
    }

    pub fn set(&self, buttons: Buttons) {
        *self.buttons.lock().unwrap() = buttons;
    }
}

/// Two standard pads behind $4016/$4017.
///
/// While the strobe bit is high both shift registers stay parked on A;
/// dropping it lets each read advance the register, wrapping after
/// eight bits.
pub struct Controllers {
    strobe: bool,
    shift: [u8; 2],
    buttons: [Arc<Mutex<Buttons>>; 2],
}

impl Controllers {
    pub fn new() -> Controllers {
        Controllers {
            strobe: false,
            shift: [0; 2],
            buttons: [
                Arc::new(Mutex::new(Buttons::empty())),
                Arc::new(Mutex::new(Buttons::empty())),
            ],
        }
    }

    pub fn handle(&self, port: usize) -> ControllerHandle {
        ControllerHandle {
            buttons: self.buttons[port & 1].clone(),
        }
    }

    pub fn write_strobe(&mut self, value: u8) {
        self.strobe = (value & 1) != 0;
        self.shift = [0; 2];
    }

    pub fn read(&mut self, port: usize) -> u8 {
        let port = port & 1;
        let pressed = self.buttons[port].lock().unwrap().bits();
        let bit = (pressed >> self.shift[port]) & 1;
        if !self.strobe {
            self.shift[port] = (self.shift[port] + 1) & 0x7;
        }
        bit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strobe_high_keeps_reporting_a() {
        let mut pads = Controllers::new();
        pads.handle(0).press(Buttons::A);
        pads.write_strobe(1);
        for _ in 0..4 {
            assert_eq!(pads.read(0), 1);
        }
    }

    #[test]
    fn released_strobe_shifts_out_all_eight_buttons() {
        let mut pads = Controllers::new();
        pads.handle(0)
            .set(Buttons::A | Buttons::START | Buttons::LEFT);
        pads.write_strobe(1);
        pads.write_strobe(0);

        let bits: Vec<u8> = (0..8).map(|_| pads.read(0)).collect();
        assert_eq!(bits, vec![1, 0, 0, 1, 0, 0, 1, 0]);
    }

    #[test]
    fn shift_index_wraps_after_eight_reads() {
        let mut pads = Controllers::new();
        pads.handle(0).press(Buttons::A);
        pads.write_strobe(1);
        pads.write_strobe(0);
        for _ in 0..8 {
            pads.read(0);
        }
        // Ninth read starts over at A rather than reading open bus.
        assert_eq!(pads.read(0), 1);
    }

    #[test]
    fn ports_shift_independently() {
        let mut pads = Controllers::new();
        pads.handle(0).press(Buttons::A);
        pads.handle(1).press(Buttons::B);
        pads.write_strobe(1);
        pads.write_strobe(0);

        assert_eq!(pads.read(0), 1);
        assert_eq!(pads.read(1), 0);
        assert_eq!(pads.read(1), 1);
    }
}
