use crate::audio::buffer::MixedAudioBuffer;
use crate::audio::mix::AudioMixer;
use crate::foundation::cancel::CancelToken;
use crate::foundation::error::{ExportError, ExportResult};
use crate::worker::protocol::{AudioReply, AudioRequest, ProcessPayload};
use crate::worker::supervisor::spawn_supervised;
use std::cell::Cell;
use std::sync::mpsc;
use std::thread::JoinHandle;

const WORKER: &str = "audio-worker";

/// Handle to the audio mixing thread.
///
/// Dropping the handle while a request is unanswered aborts that mix and detaches the thread,
/// which exits after the fetch or decode it is currently blocked in.
pub struct AudioWorker {
    requests: Option<mpsc::Sender<AudioRequest>>,
    replies: mpsc::Receiver<AudioReply>,
    handle: Option<JoinHandle<()>>,
    abort: CancelToken,
    outstanding: Cell<usize>,
}

impl std::fmt::Debug for AudioWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioWorker").finish_non_exhaustive()
    }
}

impl AudioWorker {
    /// Spawn the worker thread around `mixer`.
    pub fn spawn(mixer: AudioMixer, cancel: CancelToken) -> ExportResult<Self> {
        let (req_tx, req_rx) = mpsc::channel::<AudioRequest>();
        let (rep_tx, rep_rx) = mpsc::channel::<AudioReply>();
        let panic_tx = rep_tx.clone();
        let abort = cancel.child();
        let token = abort.clone();
        let handle = spawn_supervised(
            WORKER,
            move || {
                for req in req_rx {
                    let AudioRequest::Process(payload) = req;
                    let reply = match process(&mixer, &token, &payload) {
                        Ok(mix) => AudioReply::Done(mix),
                        Err(e) => AudioReply::Error(e),
                    };
                    if rep_tx.send(reply).is_err() {
                        return;
                    }
                }
            },
            move |e| {
                let _ = panic_tx.send(AudioReply::Error(e));
            },
        )?;
        Ok(Self {
            requests: Some(req_tx),
            replies: rep_rx,
            handle: Some(handle),
            abort,
            outstanding: Cell::new(0),
        })
    }

    /// Queue a mix request. The result is collected with [`wait`](Self::wait).
    pub fn request(&self, payload: ProcessPayload) -> ExportResult<()> {
        self.requests
            .as_ref()
            .ok_or_else(|| ExportError::WorkerDisconnected(WORKER.to_owned()))?
            .send(AudioRequest::Process(payload))
            .map_err(|_| ExportError::WorkerDisconnected(WORKER.to_owned()))?;
        self.outstanding.set(self.outstanding.get() + 1);
        Ok(())
    }

    /// Wait for the reply to the oldest outstanding request.
    pub fn wait(&self) -> ExportResult<Option<MixedAudioBuffer>> {
        let reply = self.replies.recv();
        self.outstanding.set(self.outstanding.get().saturating_sub(1));
        match reply {
            Ok(AudioReply::Done(mix)) => Ok(mix),
            Ok(AudioReply::Error(e)) => Err(e),
            Err(_) => Err(ExportError::WorkerDisconnected(WORKER.to_owned())),
        }
    }

    /// Send one request and wait for its reply.
    pub fn mix(&self, payload: ProcessPayload) -> ExportResult<Option<MixedAudioBuffer>> {
        self.request(payload)?;
        self.wait()
    }
}

impl Drop for AudioWorker {
    fn drop(&mut self) {
        self.requests = None;
        if self.outstanding.get() > 0 {
            self.abort.cancel();
            tracing::debug!(pending = self.outstanding.get(), "abandoning audio mix");
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn process(
    mixer: &AudioMixer,
    cancel: &CancelToken,
    payload: &ProcessPayload,
) -> ExportResult<Option<MixedAudioBuffer>> {
    cancel.check()?;
    let mix = mixer.mix_until(&payload.audio_sources, payload.max_duration, cancel)?;
    cancel.check()?;
    Ok(mix)
}

#[cfg(test)]
#[path = "../../tests/unit/worker/audio.rs"]
mod tests;
