//! One levin connection: a stream socket, a dispatch task owning all
//! reads, and a correlation table mapping in-flight command ids to
//! waiting callers.
//!
//! The correlation table is only ever touched by the dispatch task;
//! waiter registration and removal reach it over a control channel, and
//! each waiting caller blocks on its own oneshot slot. An `invoke` is
//! therefore a three-way race: matching response, timeout, or connection
//! teardown -- first ready wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use flakenet_storage::Storable;

use crate::codec::{BucketCodec, BucketHead, Frame};
use crate::error::{LevinError, Result};

/// Anything a connection can run over. Tests drive this with
/// `tokio::io::duplex`; production uses `TcpStream`.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

type BoxedFramed = Framed<Box<dyn Transport>, BucketCodec>;

/// A packet the dispatch task had no waiter for: either an unsolicited
/// request/notification, or a response nobody is waiting on.
#[derive(Debug)]
pub struct IncomingMessage {
    pub head: BucketHead,
    pub payload: Bytes,
}

type WaiterSlot = oneshot::Sender<Result<Frame>>;

enum Control {
    Register { command: u32, slot: WaiterSlot },
    Deregister { command: u32 },
}

/// A live levin connection.
pub struct Connection {
    peer: String,
    sink: Mutex<SplitSink<BoxedFramed, Frame>>,
    control_tx: mpsc::UnboundedSender<Control>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    dispatch: Mutex<Option<tokio::task::JoinHandle<()>>>,
    incoming_rx: StdMutex<Option<mpsc::UnboundedReceiver<IncomingMessage>>>,
    incoming_wanted: Arc<AtomicBool>,
}

impl Connection {
    /// Open a TCP stream to `address` and start the dispatch task.
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;
        Ok(Self::spawn(stream, address.to_owned()))
    }

    /// Run a connection over an established stream. `peer` is only used
    /// for logging.
    pub fn spawn<S: Transport + 'static>(stream: S, peer: String) -> Self {
        let boxed: Box<dyn Transport> = Box::new(stream);
        let framed = Framed::new(boxed, BucketCodec::new());
        let (sink, read_half) = framed.split();

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let incoming_wanted = Arc::new(AtomicBool::new(false));

        let dispatch = tokio::spawn(dispatch_loop(
            read_half,
            control_rx,
            shutdown_rx,
            incoming_tx,
            incoming_wanted.clone(),
            peer.clone(),
        ));

        Self {
            peer,
            sink: Mutex::new(sink),
            control_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            dispatch: Mutex::new(Some(dispatch)),
            incoming_rx: StdMutex::new(Some(incoming_rx)),
            incoming_wanted,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Take the unsolicited-message receiver. Until this is called the
    /// dispatch task discards waiter-less packets instead of queueing
    /// them, so a connection whose owner never reads gossip cannot
    /// accumulate an unbounded backlog. Yields `None` after the first
    /// call.
    pub fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<IncomingMessage>> {
        self.incoming_wanted.store(true, Ordering::Release);
        self.incoming_rx.lock().expect("incoming lock").take()
    }

    /// Send `request` under `command` and wait for the correlated
    /// response, decoded into `Resp`, alongside its embedded return code.
    ///
    /// Errors with `TimedOut` once `timeout` elapses (the waiter is then
    /// removed, so a late response is diverted to the unsolicited path
    /// and the command id is free again), `ConnectionClosed` if the
    /// connection tears down first, and `CommandBusy` if an invocation
    /// for this command id is already pending.
    pub async fn invoke<Req, Resp>(
        &self,
        command: u32,
        request: &Req,
        timeout: Duration,
    ) -> Result<(i32, Resp)>
    where
        Req: Storable,
        Resp: Storable,
    {
        let payload = Bytes::from(flakenet_storage::to_bytes(request)?);

        // Register before writing so a fast response cannot slip past the
        // dispatch task while nobody is waiting.
        let (slot, waiter) = oneshot::channel();
        self.control_tx
            .send(Control::Register { command, slot })
            .map_err(|_| LevinError::ConnectionClosed)?;

        let head = BucketHead::request(command, payload.len() as u64);
        if let Err(e) = self.send(Frame::new(head, payload)).await {
            let _ = self.control_tx.send(Control::Deregister { command });
            return Err(e);
        }

        match tokio::time::timeout(timeout, waiter).await {
            Err(_) => {
                let _ = self.control_tx.send(Control::Deregister { command });
                Err(LevinError::TimedOut)
            }
            Ok(Err(_)) => Err(LevinError::ConnectionClosed),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Ok(Ok(frame))) => {
                let response = flakenet_storage::from_bytes(&frame.payload)?;
                Ok((frame.head.return_code, response))
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify<Req: Storable>(&self, command: u32, request: &Req) -> Result<()> {
        let payload = Bytes::from(flakenet_storage::to_bytes(request)?);
        let head = BucketHead::notification(command, payload.len() as u64);
        self.send(Frame::new(head, payload)).await
    }

    /// Send a response for `command` with the given return code.
    pub async fn respond<Resp: Storable>(
        &self,
        command: u32,
        response: &Resp,
        return_code: i32,
    ) -> Result<()> {
        let payload = Bytes::from(flakenet_storage::to_bytes(response)?);
        let head = BucketHead::response(command, payload.len() as u64, return_code);
        self.send(Frame::new(head, payload)).await
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(frame).await
    }

    /// Stop the dispatch task and wait for it to exit. Pending waiters
    /// are released with `ConnectionClosed`. Safe to call more than once.
    pub async fn close(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.dispatch.lock().await.take() {
            if let Err(e) = task.await {
                warn!(peer = %self.peer, "dispatch task join failed: {e}");
            }
        }
    }
}

async fn dispatch_loop(
    mut read_half: SplitStream<BoxedFramed>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    mut shutdown_rx: oneshot::Receiver<()>,
    incoming_tx: mpsc::UnboundedSender<IncomingMessage>,
    incoming_wanted: Arc<AtomicBool>,
    peer: String,
) {
    let mut waiters: HashMap<u32, WaiterSlot> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => {
                debug!(peer = %peer, "dispatch shutting down");
                break;
            }
            control = control_rx.recv() => match control {
                Some(Control::Register { command, slot }) => {
                    if waiters.contains_key(&command) {
                        // Usage fault; abort the connection like any other
                        // fatal transport error.
                        let _ = slot.send(Err(LevinError::CommandBusy { command }));
                        warn!(peer = %peer, command, "duplicate waiter registration");
                        break;
                    }
                    waiters.insert(command, slot);
                }
                Some(Control::Deregister { command }) => {
                    waiters.remove(&command);
                }
                // Connection handle dropped.
                None => break,
            },
            frame = read_half.next() => match frame {
                Some(Ok(frame)) => {
                    if frame.head.is_response() {
                        if let Some(slot) = waiters.remove(&frame.head.command) {
                            let _ = slot.send(Ok(frame));
                            continue;
                        }
                    }
                    let command = frame.head.command;
                    if !incoming_wanted.load(Ordering::Acquire) {
                        debug!(peer = %peer, command, "unsolicited packet discarded");
                        continue;
                    }
                    let message = IncomingMessage {
                        head: frame.head,
                        payload: frame.payload,
                    };
                    if incoming_tx.send(message).is_err() {
                        debug!(peer = %peer, command, "unhandled packet dropped");
                    }
                }
                Some(Err(e)) => {
                    warn!(peer = %peer, "receive error: {e}");
                    break;
                }
                None => {
                    debug!(peer = %peer, "peer closed connection");
                    break;
                }
            }
        }
    }

    // Dropping the table releases every pending waiter with a closed
    // channel, which callers surface as ConnectionClosed.
    drop(waiters);
}

#[cfg(test)]
mod tests {
    use super::*;
    use flakenet_storage::{Result as StorageResult, Section, SectionReader, Value};

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Echo {
        text: String,
    }

    impl Storable for Echo {
        fn to_section(&self) -> Section {
            let mut s = Section::new();
            s.insert("text", Value::text(&self.text));
            s
        }

        fn from_section(section: Section) -> StorageResult<Self> {
            let mut r = SectionReader::new(section);
            let out = Self {
                text: r.take("text")?.into_string()?,
            };
            r.finish()?;
            Ok(out)
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Empty;

    impl Storable for Empty {
        fn to_section(&self) -> Section {
            Section::new()
        }

        fn from_section(section: Section) -> StorageResult<Self> {
            SectionReader::new(section).finish()?;
            Ok(Empty)
        }
    }

    fn pair() -> (Connection, Connection) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            Connection::spawn(a, "a".into()),
            Connection::spawn(b, "b".into()),
        )
    }

    /// Serve one request on `conn`: wait for it, echo its payload back
    /// under the same command id.
    async fn echo_once(conn: &Connection, rx: &mut mpsc::UnboundedReceiver<IncomingMessage>) {
        let request = rx.recv().await.expect("request");
        let echo: Echo = flakenet_storage::from_bytes(&request.payload).unwrap();
        conn.respond(request.head.command, &echo, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_roundtrip() {
        let (client, server) = pair();
        let mut server_rx = server.take_incoming().unwrap();

        let serve = tokio::spawn(async move {
            echo_once(&server, &mut server_rx).await;
            server
        });

        let request = Echo { text: "hi".into() };
        let (code, response): (i32, Echo) = client
            .invoke(1001, &request, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(response, request);

        let server = serve.await.unwrap();
        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_invokes_correlate_out_of_order() {
        let (client, server) = pair();
        let client = std::sync::Arc::new(client);
        let mut server_rx = server.take_incoming().unwrap();

        let serve = tokio::spawn(async move {
            let first = server_rx.recv().await.expect("first request");
            let second = server_rx.recv().await.expect("second request");
            // Answer in reverse arrival order.
            for request in [second, first] {
                let echo: Echo = flakenet_storage::from_bytes(&request.payload).unwrap();
                server.respond(request.head.command, &echo, 0).await.unwrap();
            }
            server
        });

        let c1 = client.clone();
        let call_a = tokio::spawn(async move {
            c1.invoke::<_, Echo>(10, &Echo { text: "a".into() }, Duration::from_secs(5))
                .await
        });
        let c2 = client.clone();
        let call_b = tokio::spawn(async move {
            c2.invoke::<_, Echo>(20, &Echo { text: "b".into() }, Duration::from_secs(5))
                .await
        });

        let (_, got_a) = call_a.await.unwrap().unwrap();
        let (_, got_b) = call_b.await.unwrap().unwrap();
        assert_eq!(got_a.text, "a");
        assert_eq!(got_b.text, "b");

        let server = serve.await.unwrap();
        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_dropped() {
        let (client, server) = pair();
        let mut server_rx = server.take_incoming().unwrap();

        let result: Result<(i32, Echo)> = client
            .invoke(30, &Echo { text: "slow".into() }, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(LevinError::TimedOut)));

        // The request did arrive; answer it late.
        echo_once(&server, &mut server_rx).await;

        // The late response finds no waiter and the id is free for reuse.
        let serve = tokio::spawn(async move {
            echo_once(&server, &mut server_rx).await;
            server
        });
        let (_, response): (i32, Echo) = client
            .invoke(30, &Echo { text: "again".into() }, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.text, "again");

        let server = serve.await.unwrap();
        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn test_peer_close_releases_waiter() {
        let (client, server) = pair();

        let waiter = tokio::spawn(async move {
            let result: Result<(i32, Echo)> = client
                .invoke(40, &Echo::default(), Duration::from_secs(30))
                .await;
            result
        });

        // Give the invoke time to register, then drop the peer end.
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.close().await;
        drop(server);

        assert!(matches!(
            waiter.await.unwrap(),
            Err(LevinError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_invocation_is_a_fault() {
        let (client, server) = pair();
        let client = std::sync::Arc::new(client);

        let c1 = client.clone();
        let first = tokio::spawn(async move {
            c1.invoke::<_, Echo>(50, &Echo::default(), Duration::from_secs(30))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second: Result<(i32, Echo)> = client
            .invoke(50, &Echo::default(), Duration::from_secs(5))
            .await;
        assert!(matches!(second, Err(LevinError::CommandBusy { command: 50 })));

        // The fault aborts the connection; the first caller is released.
        assert!(matches!(
            first.await.unwrap(),
            Err(LevinError::ConnectionClosed)
        ));
        server.close().await;
    }

    #[tokio::test]
    async fn test_zero_length_response_payload() {
        use bytes::BytesMut;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio_util::codec::Encoder;

        let (a, mut raw_server) = tokio::io::duplex(64 * 1024);
        let client = Connection::spawn(a, "client".into());

        // Hand-written peer: swallow the request, answer each invoke with
        // a response frame declaring payload length 0.
        let serve = tokio::spawn(async move {
            for command in [1001u32, 1001] {
                let mut request = vec![0u8; crate::BUCKET_HEAD_SIZE + 10];
                raw_server.read_exact(&mut request).await.unwrap();

                let mut buf = BytesMut::new();
                BucketCodec::new()
                    .encode(
                        Frame::new(BucketHead::response(command, 0, 0), Bytes::new()),
                        &mut buf,
                    )
                    .unwrap();
                raw_server.write_all(&buf).await.unwrap();
            }
            raw_server
        });

        // Accepted by a shape with zero declared fields...
        let (code, _empty): (i32, Empty) = client
            .invoke(1001, &Empty, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code, 0);

        // ...rejected with a missing-entry error by any other shape.
        let result: Result<(i32, Echo)> = client
            .invoke(1001, &Empty, Duration::from_secs(5))
            .await;
        assert!(matches!(
            result,
            Err(LevinError::Storage(
                flakenet_storage::StorageError::MissingEntry { name: "text" }
            ))
        ));

        drop(serve.await.unwrap());
        client.close().await;
    }

    #[tokio::test]
    async fn test_missing_fields_in_response_fail_decode() {
        let (client, server) = pair();
        let mut server_rx = server.take_incoming().unwrap();

        let serve = tokio::spawn(async move {
            let request = server_rx.recv().await.expect("request");
            server.respond(request.head.command, &Empty, 0).await.unwrap();
            server
        });

        let result: Result<(i32, Echo)> = client
            .invoke(60, &Empty, Duration::from_secs(5))
            .await;
        assert!(matches!(
            result,
            Err(LevinError::Storage(
                flakenet_storage::StorageError::MissingEntry { name: "text" }
            ))
        ));

        let server = serve.await.unwrap();
        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn test_unsolicited_packets_discarded_until_receiver_taken() {
        let (client, server) = pair();

        // Gossip arriving while nobody has claimed the receiver must not
        // pile up inside the connection.
        for _ in 0..1000 {
            client.notify(70, &Echo { text: "x".into() }).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut incoming = server.take_incoming().unwrap();
        assert!(matches!(
            incoming.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));

        // Once taken, traffic flows.
        client.notify(71, &Echo { text: "y".into() }).await.unwrap();
        let message = incoming.recv().await.expect("notification");
        assert_eq!(message.head.command, 71);

        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, server) = pair();
        client.close().await;
        client.close().await;
        server.close().await;
    }
}
