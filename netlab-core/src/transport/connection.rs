//! The reliable connection: a per-peer stop-and-wait endpoint (§4.2).

use crate::addr::{Port, Vip};
use crate::error::TransportError;
use crate::segment::{Flags, Segment, MSS};
use crate::shutdown::Shutdown;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;

use super::key::ConnectionKey;

/// One of the seven connection states of §3 (the data model lists `CLOSED`
/// twice, as the start and end of the lifecycle; there is only one variant
/// here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    SynSent,
    SynReceived,
    Established,
    FinWait,
    CloseWait,
    LastAck,
}

/// A function that hands a segment's encoded bytes to the packet service
/// for the remote peer. Type-erased so that [`Connection`] needs no
/// reference to the [`Host`](crate::network::Host) or the multiplexer that
/// owns it (§9, "cyclic reference between connection and multiplexer").
pub type SendFn =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<(), TransportError>> + Send + Sync>;

/// Called exactly once, when a connection finishes its teardown, so the
/// multiplexer can remove it from its table.
pub type CloseNotify = Arc<dyn Fn() + Send + Sync>;

/// Tunable knobs for the retransmission loops. The base contract retries
/// forever; tests may configure a cap (§4.2, §9).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// `None` means retransmit forever, guaranteeing delivery as long as
    /// the peer remains reachable.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded(timeout: Duration) -> Self {
        Self { timeout, max_retries: None }
    }
}

struct Queue {
    tx: mpsc::Sender<Segment>,
    rx: Mutex<mpsc::Receiver<Segment>>,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx: Mutex::new(rx) }
    }
}

/// A reliable, stop-and-wait connection endpoint.
pub struct Connection {
    pub key: ConnectionKey,
    local_vip: Vip,
    local_port: Port,

    state: Mutex<State>,
    send_lock: Mutex<()>,

    ack_queue: Queue,
    syn_ack_queue: Queue,
    fin_queue: Queue,
    /// Receiving half of the data channel. The sending half lives solely in
    /// `data_tx_open`, so there is exactly one live producer handle for this
    /// channel at any time.
    data_rx: Mutex<mpsc::Receiver<Segment>>,
    /// Taken (set to `None`) once the peer's FIN has been observed. Since
    /// this is the only `Sender` clone for `data_rx`'s channel, dropping it
    /// here is what makes `receive()`'s `recv()` return `None` once
    /// whatever was already buffered drains (§4.2).
    data_tx_open: Mutex<Option<mpsc::Sender<Segment>>>,

    send_seq: Mutex<bool>,
    expected_seq: Mutex<bool>,

    send: SendFn,
    on_close: CloseNotify,
    retry: RetryPolicy,

    shutdown: Shutdown,
    handshake_guard_stop: Notify,
}

impl Connection {
    pub fn new(
        key: ConnectionKey,
        local_vip: Vip,
        local_port: Port,
        send: SendFn,
        on_close: CloseNotify,
        retry: RetryPolicy,
        shutdown: Shutdown,
    ) -> Arc<Self> {
        let (data_tx, data_rx) = mpsc::channel(64);
        Arc::new(Self {
            key,
            local_vip,
            local_port,
            state: Mutex::new(State::Closed),
            send_lock: Mutex::new(()),
            ack_queue: Queue::new(16),
            syn_ack_queue: Queue::new(16),
            fin_queue: Queue::new(4),
            data_rx: Mutex::new(data_rx),
            data_tx_open: Mutex::new(Some(data_tx)),
            send_seq: Mutex::new(false),
            expected_seq: Mutex::new(false),
            send,
            on_close,
            retry,
            shutdown,
            handshake_guard_stop: Notify::new(),
        })
    }

    pub async fn state(&self) -> State {
        *self.state.lock().await
    }

    fn control(&self, flags: Flags, seq: bool) -> Segment {
        Segment {
            source_vip: self.local_vip.clone(),
            dest_vip: self.key.remote_vip.clone(),
            source_port: self.local_port,
            dest_port: self.key.remote_port,
            flags,
            seq,
            more: false,
            payload: Vec::new(),
        }
    }

    fn data_segment(&self, seq: bool, more: bool, payload: Vec<u8>) -> Segment {
        Segment::data(
            self.local_vip.clone(),
            self.key.remote_vip.clone(),
            self.local_port,
            self.key.remote_port,
            seq,
            more,
            payload,
        )
    }

    async fn transmit(&self, segment: Segment) -> Result<(), TransportError> {
        (self.send)(segment.encode()).await
    }

    /// Sends `segment`, then retransmits it every `T` until `accept` finds
    /// a match in `queue`, honouring `max_retries` if configured.
    async fn retransmit_until<F>(
        &self,
        segment: Segment,
        queue: &Queue,
        mut accept: F,
    ) -> Result<Segment, TransportError>
    where
        F: FnMut(&Segment) -> bool,
    {
        let mut attempts = 0u32;
        loop {
            self.transmit(segment.clone()).await?;
            let mut rx = queue.rx.lock().await;
            match timeout(self.retry.timeout, async {
                loop {
                    match rx.recv().await {
                        Some(seg) if accept(&seg) => return Some(seg),
                        Some(_) => continue,
                        None => return None,
                    }
                }
            })
            .await
            {
                Ok(Some(seg)) => return Ok(seg),
                Ok(None) => return Err(TransportError::ChannelClosed),
                Err(_elapsed) => {
                    attempts += 1;
                    if let Some(max) = self.retry.max_retries {
                        if attempts >= max {
                            return Err(TransportError::HandshakeFailed);
                        }
                    }
                    continue;
                }
            }
        }
    }

    /// Active open (§4.2).
    pub async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock().await;
            if *state != State::Closed {
                return Err(TransportError::NotConnected);
            }
            *state = State::SynSent;
        }

        let syn = self.control(Flags::SYN, false);
        self.retransmit_until(syn, &self.syn_ack_queue, |seg| seg.flags.syn && seg.flags.ack)
            .await?;

        self.transmit(self.control(Flags::ACK, false)).await?;
        *self.state.lock().await = State::Established;

        // A lost final ACK leaves the passive side retransmitting SYN+ACK.
        // This guard keeps re-acking any stragglers that still land on
        // `syn_ack_queue` after we've moved on, until the connection
        // closes (§4.2 edge cases).
        let guard = self.clone();
        tokio::spawn(async move {
            loop {
                let next = {
                    let mut rx = guard.syn_ack_queue.rx.lock().await;
                    tokio::select! {
                        biased;
                        _ = guard.shutdown.wait_for_shutdown() => None,
                        _ = guard.handshake_guard_stop.notified() => None,
                        seg = rx.recv() => seg,
                    }
                };
                match next {
                    Some(_) => {
                        if guard.transmit(guard.control(Flags::ACK, false)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        });

        Ok(())
    }

    /// Passive open, driven by the multiplexer after it dequeues a SYN
    /// (§4.2, §4.3).
    pub async fn accept_from(self: &Arc<Self>) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock().await;
            if *state != State::Closed {
                return Err(TransportError::NotConnected);
            }
            *state = State::SynReceived;
        }

        let syn_ack = self.control(Flags::SYN_ACK, false);
        self.retransmit_until(syn_ack, &self.ack_queue, |seg| {
            seg.flags.ack && !seg.flags.syn && !seg.flags.fin
        })
        .await?;

        *self.state.lock().await = State::Established;
        Ok(())
    }

    /// Fragments `message` into at most [`MSS`]-sized chunks and sends
    /// each as a confirmed data segment in order, not returning until the
    /// last fragment has been acknowledged (§4.2, §5).
    pub async fn send(self: &Arc<Self>, message: &[u8]) -> Result<(), TransportError> {
        {
            let state = self.state.lock().await;
            if *state != State::Established {
                return Err(TransportError::NotConnected);
            }
        }
        // Serializes concurrent `send` calls on the same connection (§5).
        let _guard = self.send_lock.lock().await;

        let chunks: Vec<&[u8]> = if message.is_empty() {
            vec![&[][..]]
        } else {
            message.chunks(MSS).collect()
        };
        let last = chunks.len() - 1;

        for (i, chunk) in chunks.into_iter().enumerate() {
            let seq = {
                let s = self.send_seq.lock().await;
                *s
            };
            let more = i < last;
            let segment = self.data_segment(seq, more, chunk.to_vec());

            self.retransmit_until(segment, &self.ack_queue, |seg| {
                seg.flags.ack && !seg.flags.syn && !seg.flags.fin && seg.seq == seq
            })
            .await?;

            let mut s = self.send_seq.lock().await;
            *s = !*s;
        }
        Ok(())
    }

    /// Blocks for the next reassembled message, buffering data segments in
    /// order and acking each. Returns `None` once the peer has closed and
    /// no buffered data remains (§4.2).
    pub async fn receive(self: &Arc<Self>) -> Result<Option<Vec<u8>>, TransportError> {
        {
            let state = self.state.lock().await;
            if !matches!(*state, State::Established | State::CloseWait) {
                return Err(TransportError::NotConnected);
            }
        }

        let mut message = Vec::new();
        loop {
            let segment = {
                let mut rx = self.data_rx.lock().await;
                rx.recv().await
            };
            let Some(segment) = segment else {
                return Ok(None);
            };

            let expected = {
                let e = self.expected_seq.lock().await;
                *e
            };

            if segment.seq == expected {
                message.extend_from_slice(&segment.payload);
                self.transmit(self.control(Flags::ACK, segment.seq)).await?;
                {
                    let mut e = self.expected_seq.lock().await;
                    *e = !*e;
                }
                if !segment.more {
                    return Ok(Some(message));
                }
            } else {
                // Duplicate: the peer's ack of our previous ack was lost.
                // Re-ack the same (previous) seq without buffering.
                self.transmit(self.control(Flags::ACK, segment.seq)).await?;
            }
        }
    }

    /// Graceful four-way teardown, active or passive (§4.2).
    pub async fn close(self: &Arc<Self>) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock().await;
            *state = match *state {
                State::Established => State::FinWait,
                State::CloseWait => State::LastAck,
                State::Closed => return Ok(()),
                _ => return Err(TransportError::NotConnected),
            };
        }

        let fin = self.control(Flags::FIN, false);
        self.retransmit_until(fin, &self.ack_queue, |seg| {
            seg.flags.ack && !seg.flags.syn && !seg.flags.fin
        })
        .await?;

        // The peer's FIN is already queued if it arrived first (passive
        // path); otherwise this blocks until dispatch pushes it (active
        // path). Either way dispatch has already emitted the reflexive ACK.
        {
            let mut rx = self.fin_queue.rx.lock().await;
            rx.recv().await;
        }

        *self.state.lock().await = State::Closed;
        self.handshake_guard_stop.notify_waiters();
        (self.on_close)();
        Ok(())
    }

    /// Classifies an arriving segment and routes it to the matching queue
    /// (§4.2, §4.3). Called by the multiplexer's reader task.
    pub async fn dispatch(self: &Arc<Self>, segment: Segment) {
        if segment.flags.fin {
            // Dispatch always acks FIN immediately, independent of whether
            // the application has called `close()` yet (§9).
            if self.transmit(self.control(Flags::ACK, false)).await.is_err() {
                return;
            }
            {
                let mut state = self.state.lock().await;
                if *state == State::Established {
                    *state = State::CloseWait;
                    *self.data_tx_open.lock().await = None;
                }
            }
            let _ = self.fin_queue.tx.send(segment).await;
            return;
        }

        if segment.flags.syn {
            if segment.flags.ack {
                let _ = self.syn_ack_queue.tx.send(segment).await;
            } else {
                tracing::warn!(key = ?self.key, "dropped stray SYN on an open connection");
            }
            return;
        }

        if segment.flags.ack {
            let _ = self.ack_queue.tx.send(segment).await;
            return;
        }

        // A data segment.
        let guard = self.data_tx_open.lock().await;
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(segment).await;
        } else {
            tracing::debug!(key = ?self.key, "dropped data segment arriving after close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_send() -> (SendFn, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        let f: SendFn = Arc::new(move |_bytes| {
            counted.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });
        (f, count)
    }

    fn test_connection() -> Arc<Connection> {
        let (send, _count) = noop_send();
        let on_close: CloseNotify = Arc::new(|| {});
        Connection::new(
            ConnectionKey::new(Vip::new("HOST_B"), Port::new(2000).unwrap(), Port::new(1000).unwrap()),
            Vip::new("HOST_A"),
            Port::new(1000).unwrap(),
            send,
            on_close,
            RetryPolicy::unbounded(Duration::from_millis(50)),
            Shutdown::new(),
        )
    }

    /// Wires two connections' `send` handles to each other's `dispatch`, via
    /// raw-byte forwarder tasks, so handshake/data exchange can be driven
    /// end-to-end without a real packet service. `drop_a_to_b` can veto one
    /// segment sent from `a` to `b`, simulating a lost datagram.
    fn wire_pair(
        key_ab: ConnectionKey,
        vip_a: Vip,
        vip_b: Vip,
        port_a: Port,
        retry: RetryPolicy,
        drop_a_to_b: impl Fn(&Segment) -> bool + Send + Sync + 'static,
    ) -> (Arc<Connection>, Arc<Connection>) {
        let (a_to_b_tx, mut a_to_b_rx) = mpsc::channel::<Vec<u8>>(64);
        let (b_to_a_tx, mut b_to_a_rx) = mpsc::channel::<Vec<u8>>(64);

        let drop_a_to_b = Arc::new(drop_a_to_b);
        let send_a: SendFn = {
            let tx = a_to_b_tx;
            let drop_a_to_b = drop_a_to_b.clone();
            Arc::new(move |bytes: Vec<u8>| {
                let tx = tx.clone();
                let drop_a_to_b = drop_a_to_b.clone();
                Box::pin(async move {
                    if let Ok(seg) = Segment::decode(&bytes) {
                        if drop_a_to_b(&seg) {
                            return Ok(());
                        }
                    }
                    let _ = tx.send(bytes).await;
                    Ok(())
                })
            })
        };
        let send_b: SendFn = {
            let tx = b_to_a_tx;
            Arc::new(move |bytes: Vec<u8>| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send(bytes).await;
                    Ok(())
                })
            })
        };

        let port_b = key_ab.local_port;
        let key_ba = ConnectionKey::new(vip_a.clone(), port_a, port_b);
        let conn_a = Connection::new(
            key_ab,
            vip_a,
            port_a,
            send_a,
            Arc::new(|| {}),
            retry,
            Shutdown::new(),
        );
        let conn_b = Connection::new(key_ba, vip_b, port_b, send_b, Arc::new(|| {}), retry, Shutdown::new());

        let to_b = conn_b.clone();
        tokio::spawn(async move {
            while let Some(bytes) = a_to_b_rx.recv().await {
                if let Ok(seg) = Segment::decode(&bytes) {
                    to_b.dispatch(seg).await;
                }
            }
        });
        let to_a = conn_a.clone();
        tokio::spawn(async move {
            while let Some(bytes) = b_to_a_rx.recv().await {
                if let Ok(seg) = Segment::decode(&bytes) {
                    to_a.dispatch(seg).await;
                }
            }
        });

        (conn_a, conn_b)
    }

    #[tokio::test]
    async fn send_and_receive_require_established() {
        let conn = test_connection();
        assert!(matches!(conn.send(b"hi").await, Err(TransportError::NotConnected)));
        assert!(matches!(conn.receive().await, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn duplicate_data_segment_does_not_advance_expected_bit() {
        let conn = test_connection();
        *conn.state.lock().await = State::Established;

        let seg = conn.data_segment(false, false, b"hello".to_vec());
        conn.dispatch(seg.clone()).await;
        let received = conn.receive().await.unwrap();
        assert_eq!(received, Some(b"hello".to_vec()));

        // Peer retransmits because our ack was (simulated as) lost: same
        // seq bit arrives again. It must not be buffered twice.
        let dup = conn.data_segment(false, false, b"hello".to_vec());
        conn.dispatch(dup).await;

        let fresh = conn.data_segment(true, false, b"world".to_vec());
        conn.dispatch(fresh).await;
        let received = conn.receive().await.unwrap();
        assert_eq!(received, Some(b"world".to_vec()));
    }

    #[tokio::test]
    async fn fin_is_acked_immediately_and_transitions_to_close_wait() {
        let conn = test_connection();
        *conn.state.lock().await = State::Established;
        let fin = conn.control(Flags::FIN, false);
        conn.dispatch(fin).await;
        assert_eq!(conn.state().await, State::CloseWait);
    }

    #[tokio::test]
    async fn receive_returns_none_after_fin_once_buffered_data_drains() {
        let conn = test_connection();
        *conn.state.lock().await = State::Established;

        let data = conn.data_segment(false, false, b"last message".to_vec());
        conn.dispatch(data).await;
        let fin = conn.control(Flags::FIN, false);
        conn.dispatch(fin).await;
        assert_eq!(conn.state().await, State::CloseWait);

        let received = conn.receive().await.unwrap();
        assert_eq!(received, Some(b"last message".to_vec()));

        // No more data is coming and the peer has closed: the blocked
        // `recv()` must observe every producer handle gone and return
        // `None`, not hang.
        let received = conn.receive().await.unwrap();
        assert_eq!(received, None);
    }

    #[tokio::test]
    async fn lost_final_handshake_ack_still_reaches_established_on_both_sides() {
        let retry = RetryPolicy::unbounded(Duration::from_millis(30));
        let dropped_once = std::sync::atomic::AtomicBool::new(false);
        let (conn_a, conn_b) = wire_pair(
            ConnectionKey::new(Vip::new("HOST_B"), Port::new(2000).unwrap(), Port::new(1000).unwrap()),
            Vip::new("HOST_A"),
            Vip::new("HOST_B"),
            Port::new(1000).unwrap(),
            retry,
            move |seg| {
                // Drop only the bare ACK that finishes the handshake, and
                // only the first time it is sent.
                if seg.flags.ack && !seg.flags.syn && !seg.flags.fin {
                    !dropped_once.swap(true, Ordering::SeqCst)
                } else {
                    false
                }
            },
        );

        let accept = tokio::spawn(async move {
            conn_b.accept_from().await.unwrap();
            conn_b
        });
        conn_a.connect().await.unwrap();
        let conn_b = accept.await.unwrap();

        assert_eq!(conn_a.state().await, State::Established);
        assert_eq!(conn_b.state().await, State::Established);
    }
}
