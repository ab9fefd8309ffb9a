//! RTCDataChannel adapter with send-side backpressure

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

use crate::transfer::{Frame, PeerChannel, TransferError};

use super::types::{PeerEvent, WebRTCConfig};

/// An ordered, reliable data channel to the remote peer
pub struct DataChannel {
    dc: Arc<RTCDataChannel>,
    max_buffered_amount: usize,
    drained: Arc<Notify>,
}

impl DataChannel {
    /// Take over `dc`: install its handlers and report its lifecycle on
    /// `events`. `Open` carries the returned handle.
    pub async fn attach(
        dc: Arc<RTCDataChannel>,
        config: &WebRTCConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Arc<Self> {
        let drained = Arc::new(Notify::new());
        let channel = Arc::new(Self {
            dc: dc.clone(),
            max_buffered_amount: config.max_buffered_amount,
            drained: drained.clone(),
        });
        let label = dc.label().to_string();

        dc.set_buffered_amount_low_threshold(config.buffered_amount_low_threshold)
            .await;
        let drained_low = drained.clone();
        dc.on_buffered_amount_low(Box::new(move || {
            drained_low.notify_one();
            Box::pin(async {})
        }))
        .await;

        let open_events = events.clone();
        let open_channel = channel.clone();
        let open_label = label.clone();
        dc.on_open(Box::new(move || {
            info!("Data channel '{}' open", open_label);
            let _ = open_events.send(PeerEvent::Open(open_channel));
            Box::pin(async {})
        }));

        let msg_events = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let frame = if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        trace!("Received text: {}", text);
                        Some(Frame::Text(text))
                    }
                    Err(e) => {
                        warn!("Dropping non UTF-8 text message: {}", e);
                        None
                    }
                }
            } else {
                trace!("Received {} bytes binary", msg.data.len());
                Some(Frame::Binary(msg.data))
            };
            if let Some(frame) = frame {
                let _ = msg_events.send(PeerEvent::Frame(frame));
            }
            Box::pin(async {})
        }));

        let close_label = label;
        dc.on_close(Box::new(move || {
            info!("Data channel '{}' closed", close_label);
            // wake a sender blocked on backpressure
            drained.notify_one();
            let _ = events.send(PeerEvent::Closed);
            Box::pin(async {})
        }));

        channel
    }

    pub fn label(&self) -> &str {
        self.dc.label()
    }

    pub async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.dc.close().await?;
        Ok(())
    }

    fn ready(&self) -> Result<(), TransferError> {
        ready(self.dc.ready_state())
    }
}

/// The parts of a data channel the send path waits on
#[async_trait]
trait SendQueue: Send + Sync {
    fn state(&self) -> RTCDataChannelState;

    async fn buffered_amount(&self) -> usize;
}

#[async_trait]
impl SendQueue for RTCDataChannel {
    fn state(&self) -> RTCDataChannelState {
        self.ready_state()
    }

    async fn buffered_amount(&self) -> usize {
        RTCDataChannel::buffered_amount(self).await
    }
}

/// A channel that is still connecting is not ready yet; one that is closing
/// or closed has been lost
fn ready(state: RTCDataChannelState) -> Result<(), TransferError> {
    match state {
        RTCDataChannelState::Open => Ok(()),
        RTCDataChannelState::Closing | RTCDataChannelState::Closed => Err(
            TransferError::TransportLost(format!("data channel {}", state)),
        ),
        _ => Err(TransferError::ChannelNotReady),
    }
}

/// Wait until `queue` holds at most `max_buffered` bytes. `drained` is
/// notified on the low-threshold event and on close.
async fn wait_for_room<Q: SendQueue + ?Sized>(
    queue: &Q,
    drained: &Notify,
    max_buffered: usize,
) -> Result<(), TransferError> {
    loop {
        let notified = drained.notified();
        ready(queue.state())?;
        let queued = queue.buffered_amount().await;
        if queued <= max_buffered {
            return Ok(());
        }
        debug!("Waiting for data channel to drain ({} bytes queued)", queued);
        notified.await;
    }
}

#[async_trait]
impl PeerChannel for DataChannel {
    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> Result<(), TransferError> {
        self.ready()?;
        self.dc
            .send_text(text)
            .await
            .map_err(|e| TransferError::TransportLost(e.to_string()))?;
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), TransferError> {
        wait_for_room(self.dc.as_ref(), &self.drained, self.max_buffered_amount).await?;
        self.dc
            .send(&data)
            .await
            .map_err(|e| TransferError::TransportLost(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use webrtc::api::APIBuilder;
    use webrtc::peer_connection::configuration::RTCConfiguration;

    struct FakeQueue {
        state: Mutex<RTCDataChannelState>,
        buffered: AtomicUsize,
    }

    impl FakeQueue {
        fn new(buffered: usize) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(RTCDataChannelState::Open),
                buffered: AtomicUsize::new(buffered),
            })
        }

        fn set_state(&self, state: RTCDataChannelState) {
            *self.state.lock().unwrap() = state;
        }
    }

    #[async_trait]
    impl SendQueue for FakeQueue {
        fn state(&self) -> RTCDataChannelState {
            *self.state.lock().unwrap()
        }

        async fn buffered_amount(&self) -> usize {
            self.buffered.load(Ordering::SeqCst)
        }
    }

    fn spawn_wait(
        queue: Arc<FakeQueue>,
        drained: Arc<Notify>,
    ) -> tokio::task::JoinHandle<Result<(), TransferError>> {
        tokio::spawn(async move { wait_for_room(queue.as_ref(), &drained, 1000).await })
    }

    #[test]
    fn test_state_to_error() {
        assert!(ready(RTCDataChannelState::Open).is_ok());
        assert!(matches!(
            ready(RTCDataChannelState::Connecting),
            Err(TransferError::ChannelNotReady)
        ));
        assert!(matches!(
            ready(RTCDataChannelState::Closing),
            Err(TransferError::TransportLost(_))
        ));
        assert!(matches!(
            ready(RTCDataChannelState::Closed),
            Err(TransferError::TransportLost(_))
        ));
    }

    #[tokio::test]
    async fn test_below_high_water_mark_does_not_wait() {
        let queue = FakeQueue::new(1000);
        let drained = Notify::new();
        wait_for_room(queue.as_ref(), &drained, 1000).await.unwrap();
    }

    #[tokio::test]
    async fn test_waits_for_drain() {
        let queue = FakeQueue::new(5000);
        let drained = Arc::new(Notify::new());
        let waiter = spawn_wait(queue.clone(), drained.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // a low-threshold event that has not drained enough keeps waiting
        queue.buffered.store(2000, Ordering::SeqCst);
        drained.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        queue.buffered.store(200, Ordering::SeqCst);
        drained.notify_one();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_close_while_waiting_is_transport_lost() {
        let queue = FakeQueue::new(5000);
        let drained = Arc::new(Notify::new());
        let waiter = spawn_wait(queue.clone(), drained.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.set_state(RTCDataChannelState::Closed);
        drained.notify_one();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransferError::TransportLost(_))));
    }

    #[tokio::test]
    async fn test_closed_data_channel_reports_transport_lost() {
        let api = APIBuilder::new().build();
        let pc = api
            .new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap();
        let dc = pc.create_data_channel("fileTransfer", None).await.unwrap();
        let (events, _events_rx) = mpsc::unbounded_channel();
        let channel = DataChannel::attach(dc, &WebRTCConfig::default(), events).await;

        // never negotiated: still connecting
        assert!(!channel.is_open());
        assert!(matches!(
            channel.send_binary(Bytes::from_static(b"chunk")).await,
            Err(TransferError::ChannelNotReady)
        ));

        pc.close().await.unwrap();
        assert!(matches!(
            channel.send_binary(Bytes::from_static(b"chunk")).await,
            Err(TransferError::TransportLost(_))
        ));
        assert!(matches!(
            channel.send_text("{}".to_string()).await,
            Err(TransferError::TransportLost(_))
        ));
    }
}
