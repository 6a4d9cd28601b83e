pub mod nes;

pub use nes::Nes;
pub use nes::cpu::NmiPolicy;
pub use nes::input::Buttons;
pub use nes::runner::{Inspector, NullInspector, Runner, RunnerOptions};
