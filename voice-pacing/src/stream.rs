//! A pacing stream: releases `EncodedPacket`s to its packetizer in real
//! time, with pause/resume and A/V pair-sync (spec §4.4).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

use voice_rtp::{EncodedPacket, Packetizer, SendOutput};

use crate::clock::PacingClock;

/// Bounded to 1: the input channel is the backpressure mechanism described
/// in spec §5 ("highWaterMark = 1 object").
const INPUT_HIGH_WATER_MARK: usize = 1;

/// Polling cadence for the pause-wait loop (spec §5 "50-ms polling loop
/// while paused").
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Polling cadence for the sync-wait loop (spec §4.4 step 4).
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingState {
    Idle,
    Running,
    Paused,
    Terminated,
}

/// A running pacing stream. Cloning the `Arc` and downgrading to a `Weak`
/// is how a sync peer is attached without granting ownership (spec §4.4
/// "Pair-sync").
pub struct PacingStream {
    state: StdMutex<PacingState>,
    pts_bits: AtomicU64,
    pts_known: AtomicBool,
    ended: AtomicBool,
    paused: AtomicBool,
    clock: AsyncMutex<PacingClock>,
    sync_peer: StdMutex<Option<Weak<PacingStream>>>,
    terminate: Notify,
    sync_tolerance_ms: f64,
    no_sleep: bool,
    /// The error that ended the run loop, if any. Unset on a deliberate
    /// `stop()` or a clean end of input.
    last_error: StdMutex<Option<voice_rtp::Error>>,
}

impl PacingStream {
    /// Spawns the run loop as a Tokio task and returns a handle, the bounded
    /// input sender, and an unbounded channel of outbound RTP/RTCP
    /// datagrams the caller is responsible for writing to the UDP socket.
    ///
    /// `no_sleep` skips the step-7 paced sleep entirely (spec §4.4 step 7:
    /// "unless configured with no-sleep (sync peer only)") — intended for a
    /// stream that only paces via its sync-peer wait, never on its own
    /// clock.
    pub fn spawn(
        packetizer: Packetizer,
        frametime_ms: u32,
        sync_tolerance_ms: f64,
        no_sleep: bool,
    ) -> (
        Arc<PacingStream>,
        mpsc::Sender<EncodedPacket>,
        mpsc::UnboundedReceiver<SendOutput>,
    ) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_HIGH_WATER_MARK);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let stream = Arc::new(PacingStream {
            state: StdMutex::new(PacingState::Idle),
            pts_bits: AtomicU64::new(0),
            pts_known: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            clock: AsyncMutex::new(PacingClock::new()),
            sync_peer: StdMutex::new(None),
            terminate: Notify::new(),
            sync_tolerance_ms,
            no_sleep,
            last_error: StdMutex::new(None),
        });

        let task_stream = stream.clone();
        tokio::spawn(async move {
            task_stream.run(input_rx, packetizer, frametime_ms, out_tx).await;
        });

        (stream, input_tx, out_rx)
    }

    pub fn state(&self) -> PacingState {
        *self.state.lock().unwrap()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Awaits the packetizer error that ended this stream's run loop (spec
    /// §7: a codec error is surfaced to the controller rather than only
    /// logged). Never resolves after a deliberate [`Self::stop`] or a clean
    /// end of input.
    pub async fn wait_error(&self) -> voice_rtp::Error {
        loop {
            if let Some(err) = self.last_error.lock().unwrap().take() {
                return err;
            }
            if self.is_ended() {
                std::future::pending::<()>().await;
            }
            tokio::select! {
                _ = tokio::time::sleep(PAUSE_POLL_INTERVAL) => {}
                _ = self.terminate.notified() => {}
            }
        }
    }

    pub fn pts_ms(&self) -> Option<f64> {
        if self.pts_known.load(Ordering::Acquire) {
            Some(f64::from_bits(self.pts_bits.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    /// Attaches a sync peer. The relation is not ownership: when the peer
    /// terminates, this stream continues independently (spec §4.4).
    pub fn set_sync_peer(&self, peer: Weak<PacingStream>) {
        *self.sync_peer.lock().unwrap() = Some(peer);
    }

    pub async fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = PacingState::Paused;
        self.clock.lock().await.pause(Instant::now());
    }

    pub async fn resume(&self) {
        self.clock.lock().await.resume(Instant::now());
        self.paused.store(false, Ordering::SeqCst);
        if !self.ended.load(Ordering::SeqCst) {
            *self.state.lock().unwrap() = PacingState::Running;
        }
    }

    /// Unblocks any pending sleep/wait and detaches the sync peer
    /// (spec §4.4 "Cancellation").
    pub fn stop(&self) {
        self.ended.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = PacingState::Terminated;
        self.sync_peer.lock().unwrap().take();
        self.terminate.notify_waiters();
    }

    fn set_pts(&self, pts_ms: f64) {
        self.pts_bits.store(pts_ms.to_bits(), Ordering::Release);
        self.pts_known.store(true, Ordering::Release);
    }

    async fn wait_while_paused(&self) {
        while self.paused.load(Ordering::SeqCst) && !self.ended.load(Ordering::SeqCst) {
            tokio::select! {
                _ = tokio::time::sleep(PAUSE_POLL_INTERVAL) => {}
                _ = self.terminate.notified() => break,
            }
        }
    }

    async fn wait_for_sync(&self) {
        loop {
            if self.ended.load(Ordering::SeqCst) {
                break;
            }
            let peer = self.sync_peer.lock().unwrap().clone();
            let Some(peer) = peer.and_then(|weak| weak.upgrade()) else {
                break;
            };
            if peer.is_ended() {
                break;
            }
            let (Some(this_pts), Some(peer_pts)) = (self.pts_ms(), peer.pts_ms()) else {
                break;
            };
            if this_pts - peer_pts <= self.sync_tolerance_ms {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(SYNC_POLL_INTERVAL) => {}
                _ = self.terminate.notified() => break,
            }
        }
    }

    async fn paced_sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.terminate.notified() => {}
        }
    }

    async fn run(
        self: Arc<Self>,
        mut input: mpsc::Receiver<EncodedPacket>,
        mut packetizer: Packetizer,
        frametime_ms: u32,
        output: mpsc::UnboundedSender<SendOutput>,
    ) {
        *self.state.lock().unwrap() = PacingState::Running;

        loop {
            let packet = tokio::select! {
                _ = self.terminate.notified() => break,
                received = input.recv() => match received {
                    Some(packet) => packet,
                    None => break,
                },
            };

            let pts_ms = packet.pts_ms();
            {
                let mut clock = self.clock.lock().await;
                clock.latch_start(Instant::now(), pts_ms);
            }

            self.wait_while_paused().await;
            if self.ended.load(Ordering::SeqCst) {
                break;
            }

            self.wait_for_sync().await;
            if self.ended.load(Ordering::SeqCst) {
                break;
            }

            let wall_time = SystemTime::now();
            match packetizer.send_frame(&packet, frametime_ms, wall_time) {
                Ok(send_output) => {
                    if output.send(send_output).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    log::warn!("pacing stream packetizer error: {err}");
                    *self.last_error.lock().unwrap() = Some(err);
                    break;
                }
            }

            self.set_pts(pts_ms);

            if !self.no_sleep {
                let sleep_for = {
                    let clock = self.clock.lock().await;
                    clock.sleep_duration(Instant::now(), pts_ms)
                };
                self.paced_sleep(sleep_for).await;
            }
        }

        self.ended.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = PacingState::Terminated;
        self.sync_peer.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_is_unknown_until_first_record() {
        let stream = PacingStream {
            state: StdMutex::new(PacingState::Idle),
            pts_bits: AtomicU64::new(0),
            pts_known: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            clock: AsyncMutex::new(PacingClock::new()),
            sync_peer: StdMutex::new(None),
            terminate: Notify::new(),
            sync_tolerance_ms: 50.0,
            no_sleep: false,
            last_error: StdMutex::new(None),
        };
        assert_eq!(stream.pts_ms(), None);
        stream.set_pts(123.5);
        assert_eq!(stream.pts_ms(), Some(123.5));
    }

    #[tokio::test]
    async fn stop_marks_terminated_and_clears_sync_peer() {
        let a = Arc::new(PacingStream {
            state: StdMutex::new(PacingState::Idle),
            pts_bits: AtomicU64::new(0),
            pts_known: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            clock: AsyncMutex::new(PacingClock::new()),
            sync_peer: StdMutex::new(None),
            terminate: Notify::new(),
            sync_tolerance_ms: 50.0,
            no_sleep: false,
            last_error: StdMutex::new(None),
        });
        let b = Arc::new(PacingStream {
            state: StdMutex::new(PacingState::Idle),
            pts_bits: AtomicU64::new(0),
            pts_known: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            clock: AsyncMutex::new(PacingClock::new()),
            sync_peer: StdMutex::new(None),
            terminate: Notify::new(),
            sync_tolerance_ms: 50.0,
            no_sleep: false,
            last_error: StdMutex::new(None),
        });
        a.set_sync_peer(Arc::downgrade(&b));
        a.stop();
        assert_eq!(a.state(), PacingState::Terminated);
        assert!(a.is_ended());
        assert!(a.sync_peer.lock().unwrap().is_none());
    }

    fn opus_packetizer() -> Packetizer {
        let aead = voice_crypto::Aead::new(voice_crypto::AeadKind::Aes256Gcm, &[0u8; 32]).unwrap();
        let state = voice_rtp::RtpStreamState::new(0x1234, 120, 250);
        Packetizer::Opus(voice_rtp::RtpPacketizer::new(
            state,
            aead,
            voice_rtp::codec::opus::OpusPayloader,
            true,
        ))
    }

    fn opus_frame(pts_lo: u32) -> EncodedPacket {
        EncodedPacket {
            codec: voice_rtp::Codec::Opus,
            payload: vec![1, 2, 3, 4],
            pts_hi: 0,
            pts_lo,
            time_base_num: 1,
            time_base_den: 48_000,
            duration: 960,
            flags: voice_rtp::PacketFlags::default(),
        }
    }

    #[tokio::test]
    async fn no_sleep_skips_the_paced_wait() {
        let (stream, input_tx, mut out_rx) = PacingStream::spawn(opus_packetizer(), 20, 5.0, true);

        let started = Instant::now();
        // First frame latches the clock's start point with no sleep owed yet;
        // the second frame is where a paced stream would normally wait out
        // most of a 20ms frame interval.
        input_tx.send(opus_frame(0)).await.unwrap();
        out_rx.recv().await.unwrap();
        input_tx.send(opus_frame(48_000)).await.unwrap();
        out_rx.recv().await.unwrap();

        assert!(
            started.elapsed() < Duration::from_millis(15),
            "no_sleep stream should not block on its own pacing clock"
        );

        stream.stop();
    }
}
