//! Decode thread
//!
//! A single background thread keeps every playing voice's ring buffer full.
//! It wakes every decode period (or when notified), then:
//!
//! 1. Reports underruns, throttled
//! 2. Releases voices that finished draining and notifies their sources
//! 3. Reads blocks from each playing voice's source until its ring is full
//!
//! Source reads happen with the slot's source lock held and the data lock
//! released, so the mix callback never waits on a decoder.

use super::engine::EngineShared;
use super::ring_buffer::{SoundBlock, BLOCK_FRAMES};
use super::voice::{FinishInfo, VoiceHandle, VoiceState};
use crate::reader::ReadError;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use tracing::{debug, error, trace, warn};

/// Why a fill pass stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FillOutcome {
    /// Ring buffer is full
    Full,
    /// Source had nothing ready
    Starved,
    /// Source ended or failed; the voice is now Stopping
    Ended,
    /// Handle went stale or the source was released
    Detached,
}

/// Decode thread main loop
pub(crate) fn run(shared: Arc<EngineShared>) {
    debug!("Decode thread started");
    let mut block = Box::<SoundBlock>::default();

    loop {
        {
            let mut woken = shared.wake.lock().unwrap_or_else(PoisonError::into_inner);
            if !*woken && !shared.stop_flag.load(Ordering::SeqCst) {
                woken = shared
                    .wake_signal
                    .wait_timeout(woken, shared.decode_period)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            *woken = false;
        }

        if shared.stop_flag.load(Ordering::SeqCst) {
            debug!("Decode thread received stop signal");
            break;
        }

        shared.underruns.log_if_due();
        release_finished(&shared);

        for handle in voices_in(&shared, VoiceState::Playing) {
            if fill_into(&shared, handle, &mut block) == FillOutcome::Starved {
                trace!("Voice {} starved", handle.index);
            }
        }
    }

    debug!("Decode thread exited");
}

/// Fill one voice's ring buffer from its source
///
/// Used for prebuffering on the caller's thread as well as by the decode
/// thread.
pub(crate) fn fill_voice(shared: &EngineShared, handle: VoiceHandle) -> FillOutcome {
    let mut block = Box::<SoundBlock>::default();
    fill_into(shared, handle, &mut block)
}

fn fill_into(shared: &EngineShared, handle: VoiceHandle, block: &mut SoundBlock) -> FillOutcome {
    let slot = &shared.slots[handle.index];
    let source_guard = slot.source.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(attached) = source_guard.as_ref() else {
        return FillOutcome::Detached;
    };
    if attached.generation != handle.generation {
        return FillOutcome::Detached;
    }

    loop {
        let vacant = slot
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .vacant_blocks();
        if vacant == 0 {
            return FillOutcome::Full;
        }

        let result = attached.source.read_block(&mut block.samples, BLOCK_FRAMES);

        let mut data = shared.lock_data();
        let voice = &mut data.voices[handle.index];
        if voice.generation != handle.generation
            || !matches!(voice.state, VoiceState::Buffering | VoiceState::Playing)
        {
            return FillOutcome::Detached;
        }

        match result {
            Ok(read) if read.frames > 0 => {
                block.frames = read.frames.min(BLOCK_FRAMES);
                block.position = voice.next_stream_frame;
                voice.next_stream_frame += block.frames as i64;
                voice.stream_to_source.insert(
                    block.position,
                    block.frames as i64,
                    read.source_frame,
                    read.ratio,
                );
                drop(data);

                let mut producer = slot.producer.lock().unwrap_or_else(PoisonError::into_inner);
                if producer.push(block.clone()).is_err() {
                    // Only this function pushes, and it checked for room
                    warn!("Voice {} ring buffer unexpectedly full", handle.index);
                    return FillOutcome::Full;
                }
            }
            Ok(_) | Err(ReadError::WouldBlock) => return FillOutcome::Starved,
            Err(ReadError::EndOfFile) => {
                voice.state = VoiceState::Stopping;
                debug!("Voice {} reached end of source", handle.index);
                return FillOutcome::Ended;
            }
            Err(ReadError::Error) => {
                let message = attached
                    .source
                    .error()
                    .unwrap_or_else(|| "unknown read error".to_string());
                error!("Voice {} source failed: {}", handle.index, message);
                voice.error = Some(message);
                voice.state = VoiceState::Stopping;
                return FillOutcome::Ended;
            }
        }
    }
}

/// Move drained voices to Halting and deliver their finish notification
fn release_finished(shared: &EngineShared) {
    for handle in voices_in(shared, VoiceState::Stopping) {
        let info = {
            let mut data = shared.lock_data();
            let voice = &mut data.voices[handle.index];
            if voice.generation != handle.generation
                || voice.state != VoiceState::Stopping
                || !voice.drained
            {
                continue;
            }
            voice.state = VoiceState::Halting;
            FinishInfo {
                source_frame: voice.stream_to_source.search(voice.play_stream_frame),
                error: voice.error.take(),
            }
        };

        // stop_mixing may have taken the source first; then nobody is told
        if let Some(source) = shared.detach_source(handle.index, handle.generation) {
            debug!(
                "Voice {} finished at source frame {}",
                handle.index, info.source_frame
            );
            source.finished(info);
        }
    }
}

fn voices_in(shared: &EngineShared, state: VoiceState) -> Vec<VoiceHandle> {
    let data = shared.lock_data();
    data.voices
        .iter()
        .enumerate()
        .filter(|(_, v)| v.state == state)
        .map(|(index, v)| VoiceHandle {
            index,
            generation: v.generation,
        })
        .collect()
}
