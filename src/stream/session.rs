use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::hub::{Relayed, Subscription};
use super::multipart::FrameSink;
use super::pump::{ExitReason, StreamPump};
use crate::ingest::CameraSource;

const RELAY_POLL: Duration = Duration::from_millis(200);

/// One live-viewing connection, already past setup.
///
/// `Exclusive` owns the camera through its own pump. `Shared` relays frames
/// from the hub's capture loop.
pub enum StreamSession {
    Exclusive(Box<StreamPump<CameraSource>>),
    Shared {
        subscription: Subscription,
        shutdown: Arc<AtomicBool>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames_sent: u64,
    pub exit: ExitReason,
}

impl StreamSession {
    /// Stream into `sink` until the session ends.
    pub fn run<K: FrameSink + ?Sized>(self, sink: &mut K) -> SessionSummary {
        match self {
            StreamSession::Exclusive(mut pump) => {
                let report = pump.run(sink);
                SessionSummary {
                    frames_sent: report.frames_sent,
                    exit: report.exit,
                }
            }
            StreamSession::Shared {
                subscription,
                shutdown,
            } => relay(&subscription, sink, &shutdown),
        }
    }
}

fn relay<K: FrameSink + ?Sized>(
    subscription: &Subscription,
    sink: &mut K,
    shutdown: &AtomicBool,
) -> SessionSummary {
    let mut frames_sent = 0;
    let exit = loop {
        if shutdown.load(Ordering::SeqCst) {
            break ExitReason::Shutdown;
        }
        match subscription.next(RELAY_POLL) {
            Relayed::Frame(frame) => {
                if sink.push(&frame).is_err() {
                    break ExitReason::ClientDisconnected;
                }
                frames_sent += 1;
            }
            Relayed::Idle => continue,
            Relayed::Ended => break ExitReason::EndOfStream,
        }
    };
    log::info!("shared stream viewer left: exit={:?} sent={}", exit, frames_sent);
    SessionSummary { frames_sent, exit }
}
