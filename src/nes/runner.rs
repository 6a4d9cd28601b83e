use anyhow::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{CPU_CLOCK_HZ, Nes};

/// Samples per audio queue entry.
pub const AUDIO_CHUNK_SIZE: usize = 1024;
/// Bounded depth of the audio queue; full chunks are dropped rather
/// than blocking the simulation.
const AUDIO_QUEUE_DEPTH: usize = 32;
/// Instructions between pause-gate and throttle checks.
const BATCH_INSTRUCTIONS: u32 = 100;
/// If the simulation falls this far behind, stop chasing and resync.
const RESYNC_AFTER: Duration = Duration::from_millis(250);

/// Observation points on the simulation thread, handed in by the host.
/// Every method defaults to a no-op.
pub trait Inspector: Send {
    fn frame_completed(&mut self, _frame_index: u64, _frame: &[u8]) {}
    fn batch_retired(&mut self, _instructions: u64, _cycles: u64) {}
    fn stopped(&mut self, _error: Option<&Error>) {}
}

/// Inspector that observes nothing.
pub struct NullInspector;

impl Inspector for NullInspector {}

#[derive(Clone, Copy)]
pub struct RunnerOptions {
    /// Pace the simulation against the wall clock. Disable to run the
    /// core as fast as the host allows.
    pub throttle: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        RunnerOptions { throttle: true }
    }
}

struct Gate {
    paused: Mutex<bool>,
    resumed: Condvar,
    stop: AtomicBool,
}

/// Owns the simulation thread. The console runs in real time against a
/// monotonic deadline, pausing and stopping at instruction-batch
/// boundaries.
pub struct Runner {
    gate: Arc<Gate>,
    thread: Option<JoinHandle<Result<()>>>,
    audio: Receiver<Vec<u8>>,
}

impl Runner {
    pub fn spawn<F>(
        nes: Nes,
        options: RunnerOptions,
        frame_sink: F,
        inspector: Box<dyn Inspector>,
    ) -> Runner
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let gate = Arc::new(Gate {
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let (audio_tx, audio_rx) = sync_channel(AUDIO_QUEUE_DEPTH);

        let worker_gate = gate.clone();
        let thread = thread::spawn(move || {
            simulate(nes, options, worker_gate, audio_tx, frame_sink, inspector)
        });

        Runner {
            gate,
            thread: Some(thread),
            audio: audio_rx,
        }
    }

    pub fn pause(&self) {
        *self.gate.paused.lock().unwrap() = true;
    }

    pub fn resume(&self) {
        *self.gate.paused.lock().unwrap() = false;
        self.gate.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.gate.paused.lock().unwrap()
    }

    /// Fixed-size audio chunks, one u8 sample per CPU cycle.
    pub fn audio(&self) -> &Receiver<Vec<u8>> {
        &self.audio
    }

    /// Stops the simulation thread and returns its outcome.
    pub fn stop(mut self) -> Result<()> {
        self.signal_stop();
        match self.thread.take() {
            Some(thread) => match thread.join() {
                Ok(outcome) => outcome,
                Err(panic) => std::panic::resume_unwind(panic),
            },
            None => Ok(()),
        }
    }

    fn signal_stop(&self) {
        self.gate.stop.store(true, Ordering::SeqCst);
        self.gate.resumed.notify_all();
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn simulate<F>(
    mut nes: Nes,
    options: RunnerOptions,
    gate: Arc<Gate>,
    audio_tx: SyncSender<Vec<u8>>,
    mut frame_sink: F,
    mut inspector: Box<dyn Inspector>,
) -> Result<()>
where
    F: FnMut(&[u8]) + Send + 'static,
{
    let mut deadline = Instant::now();
    let mut chunk: Vec<u8> = Vec::with_capacity(AUDIO_CHUNK_SIZE);
    let mut frame_index: u64 = 0;

    loop {
        // Pause gate, checked between batches only.
        {
            let mut paused = gate.paused.lock().unwrap();
            let was_paused = *paused;
            while *paused && !gate.stop.load(Ordering::SeqCst) {
                paused = gate.resumed.wait(paused).unwrap();
            }
            if was_paused {
                deadline = Instant::now();
            }
        }
        if gate.stop.load(Ordering::SeqCst) {
            inspector.stopped(None);
            return Ok(());
        }

        let mut batch_cycles: u64 = 0;
        for _ in 0..BATCH_INSTRUCTIONS {
            let cycles = match nes.step() {
                Ok(cycles) => cycles,
                Err(err) => {
                    inspector.stopped(Some(&err));
                    return Err(err);
                }
            };
            batch_cycles += cycles;

            if nes.poll_frame() {
                frame_index += 1;
                frame_sink(nes.frame());
                inspector.frame_completed(frame_index, nes.frame());
            }
        }
        inspector.batch_retired(BATCH_INSTRUCTIONS as u64, batch_cycles);

        for sample in nes.take_samples() {
            chunk.push(sample);
            if chunk.len() == AUDIO_CHUNK_SIZE {
                let full = std::mem::replace(&mut chunk, Vec::with_capacity(AUDIO_CHUNK_SIZE));
                match audio_tx.try_send(full) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => {}
                }
            }
        }

        if options.throttle {
            deadline += Duration::from_secs_f64(batch_cycles as f64 / CPU_CLOCK_HZ);
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else if now - deadline > RESYNC_AFTER {
                deadline = now;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::cartridge::tests::build_ines;
    use super::*;

    fn idle_console() -> Nes {
        // Spins at $8000 with NMI enabled so frames keep completing.
        let mut bytes = build_ines(1, 1, 0, |_| 0);
        let program = [0xA9, 0x80, 0x8D, 0x00, 0x20, 0x4C, 0x05, 0x80];
        bytes[16..16 + program.len()].copy_from_slice(&program);
        bytes[16 + 0x3FFA] = 0x05;
        bytes[16 + 0x3FFB] = 0x80; // NMI -> the spin loop
        bytes[16 + 0x3FFC] = 0x00;
        bytes[16 + 0x3FFD] = 0x80;
        Nes::load(&bytes).unwrap()
    }

    fn spawn_counting(options: RunnerOptions) -> (Runner, Arc<Mutex<u64>>) {
        let frames = Arc::new(Mutex::new(0u64));
        let sink_frames = frames.clone();
        let runner = Runner::spawn(
            idle_console(),
            options,
            move |_frame| {
                *sink_frames.lock().unwrap() += 1;
            },
            Box::new(NullInspector),
        );
        (runner, frames)
    }

    fn wait_for_frames(frames: &Arc<Mutex<u64>>, at_least: u64) {
        for _ in 0..200 {
            if *frames.lock().unwrap() >= at_least {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("simulation produced no frames");
    }

    #[test]
    fn produces_frames_and_stops_cleanly() {
        let (runner, frames) = spawn_counting(RunnerOptions { throttle: false });
        wait_for_frames(&frames, 2);
        runner.stop().unwrap();
    }

    #[test]
    fn pause_halts_frame_production_until_resume() {
        let (runner, frames) = spawn_counting(RunnerOptions { throttle: false });
        wait_for_frames(&frames, 1);

        runner.pause();
        // Let the in-flight batch drain before sampling.
        thread::sleep(Duration::from_millis(50));
        let frozen = *frames.lock().unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(*frames.lock().unwrap() <= frozen + 1);

        runner.resume();
        wait_for_frames(&frames, frozen + 2);
        runner.stop().unwrap();
    }

    #[test]
    fn audio_chunks_arrive_at_fixed_size() {
        let (runner, frames) = spawn_counting(RunnerOptions { throttle: false });
        wait_for_frames(&frames, 1);
        let chunk = runner
            .audio()
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(chunk.len(), AUDIO_CHUNK_SIZE);
        runner.stop().unwrap();
    }

    #[test]
    fn throttled_run_tracks_the_wall_clock() {
        let (runner, frames) = spawn_counting(RunnerOptions::default());
        // At the NTSC frame rate, a quarter second is about 15 frames;
        // allow generous slack for scheduling.
        thread::sleep(Duration::from_millis(250));
        let produced = *frames.lock().unwrap();
        assert!(produced >= 5 && produced <= 30, "got {produced}");
        runner.stop().unwrap();
    }

    #[test]
    fn fatal_cpu_error_surfaces_from_stop() {
        let mut bytes = build_ines(1, 1, 0, |_| 0);
        bytes[16] = 0x02; // unofficial opcode at reset
        bytes[16 + 0x3FFC] = 0x00;
        bytes[16 + 0x3FFD] = 0x80;
        let nes = Nes::load(&bytes).unwrap();

        let runner = Runner::spawn(
            nes,
            RunnerOptions { throttle: false },
            |_frame| {},
            Box::new(NullInspector),
        );
        thread::sleep(Duration::from_millis(50));
        let err = runner.stop().unwrap_err();
        assert!(err.to_string().contains("unknown opcode"));
    }
}
