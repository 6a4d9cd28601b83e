use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use famicore::nes::Nes;
use famicore::nes::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Headless console runner: loads an iNES image, runs a number of
/// frames and reports where the machine ended up.
#[derive(Parser, Debug)]
#[command(name = "run_rom")]
#[command(about = "Run an iNES ROM headless for a fixed number of frames", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    rom: PathBuf,

    /// Number of frames to run
    #[arg(short, long, default_value_t = 60)]
    frames: u32,

    /// Print the final frame as ASCII art
    #[arg(long)]
    dump_frame: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut nes = Nes::from_file(&args.rom)
        .with_context(|| format!("failed to start {}", args.rom.display()))?;

    let start = Instant::now();
    for _ in 0..args.frames {
        nes.run_frame()
            .with_context(|| format!("emulation aborted in {}", args.rom.display()))?;
    }
    let elapsed = start.elapsed().as_secs_f32();

    let samples = nes.take_samples();
    let frame = nes.frame();
    let backdrop = frame[0];
    let foreground_pixels = frame.iter().filter(|&&p| p != backdrop).count();

    println!("{}", args.rom.display());
    println!("- Frames: {}", args.frames);
    println!("- CPU cycles: {}", nes.cycles());
    println!("- PC: ${:04X}", nes.program_counter());
    println!("- Audio samples: {}", samples.len());
    println!(
        "- Foreground pixels: {}/{}",
        foreground_pixels,
        SCREEN_WIDTH * SCREEN_HEIGHT
    );
    println!("- Runtime: {elapsed:.2}s");

    if args.dump_frame {
        dump_frame(frame, backdrop);
    }

    Ok(())
}

/// Coarse 8x8-block view of the palette-index frame buffer.
fn dump_frame(frame: &[u8; SCREEN_WIDTH * SCREEN_HEIGHT], backdrop: u8) {
    const GLYPHS: &[u8] = b" .:-=+*#%@";
    for block_y in 0..SCREEN_HEIGHT / 8 {
        let mut line = String::with_capacity(SCREEN_WIDTH / 8);
        for block_x in 0..SCREEN_WIDTH / 8 {
            let mut lit = 0usize;
            for y in 0..8 {
                for x in 0..8 {
                    let index = (block_y * 8 + y) * SCREEN_WIDTH + block_x * 8 + x;
                    if frame[index] != backdrop {
                        lit += 1;
                    }
                }
            }
            let glyph = GLYPHS[(lit * (GLYPHS.len() - 1)) / 64];
            line.push(glyph as char);
        }
        println!("{line}");
    }
}
