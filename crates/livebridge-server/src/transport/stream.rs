//! Connection-oriented transport: one upgraded stream client at a time.

use std::io::{BufReader, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use livebridge_protocol::framing::Frame;
use livebridge_protocol::handshake::perform_handshake;
use livebridge_protocol::{
    FrameReader, FrameWriter, Message, ProtocolError, Request, Response, encode_message,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ResponseSink, Transport};
use crate::config::StreamConfig;
use crate::error::{ServerError, ServerResult};
use crate::queue::CommandSender;

type Outbox = mpsc::UnboundedSender<Vec<u8>>;

struct ClientHandle {
    id: u64,
    outbox: Outbox,
    stream: TcpStream,
}

impl ClientHandle {
    fn disconnect(self) {
        // Unblocks the reader thread; dropping the outbox ends the writer.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

type ClientSlot = Arc<Mutex<Option<ClientHandle>>>;

fn lock(slot: &ClientSlot) -> MutexGuard<'_, Option<ClientHandle>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct StreamSink {
    client: ClientSlot,
}

impl ResponseSink for StreamSink {
    fn send(&self, response: &Response) {
        let frame = match encode_message(response) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = %response.event, error = %e, "Failed to encode response");
                return;
            }
        };
        match lock(&self.client).as_ref() {
            Some(client) => {
                if client.outbox.send(frame).is_err() {
                    debug!(client = client.id, "Client writer gone, dropping response");
                }
            }
            None => debug!(event = %response.event, "No client connected, dropping response"),
        }
    }
}

/// Listens for stream clients on a background thread.
///
/// Each accepted connection gets a reader thread (handshake, then frames)
/// and a writer thread fed by the response sink. A new client replaces the
/// current one.
pub struct StreamTransport {
    config: StreamConfig,
    client: ClientSlot,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl StreamTransport {
    /// Creates a transport that is not listening yet.
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            client: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_thread: None,
            local_addr: None,
        }
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns true while a client is connected.
    pub fn has_client(&self) -> bool {
        lock(&self.client).is_some()
    }

    fn bind(&self) -> ServerResult<TcpListener> {
        for port in self.config.ports.clone() {
            match TcpListener::bind((self.config.host.as_str(), port)) {
                Ok(listener) => return Ok(listener),
                Err(e) => debug!(port, error = %e, "Port unavailable"),
            }
        }
        Err(ServerError::NoFreePort {
            host: self.config.host.clone(),
            first: *self.config.ports.start(),
            last: *self.config.ports.end(),
        })
    }
}

impl Transport for StreamTransport {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn start(&mut self, commands: CommandSender) -> ServerResult<()> {
        if self.accept_thread.is_some() {
            return Ok(());
        }

        let listener = self.bind()?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        info!(%addr, "Listening for stream clients");

        self.shutdown.store(false, Ordering::SeqCst);
        let accept = AcceptLoop {
            listener,
            commands,
            client: self.client.clone(),
            shutdown: self.shutdown.clone(),
            poll_interval: self.config.accept_poll_interval,
            next_id: 1,
        };
        let handle = thread::Builder::new()
            .name("livebridge-accept".to_string())
            .spawn(move || accept.run())?;

        self.accept_thread = Some(handle);
        self.local_addr = Some(addr);
        Ok(())
    }

    fn sink(&self) -> Arc<dyn ResponseSink> {
        Arc::new(StreamSink {
            client: self.client.clone(),
        })
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.accept_thread.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(client) = lock(&self.client).take() {
            client.disconnect();
        }
        if handle.join().is_err() {
            warn!("Accept thread panicked");
        }
        self.local_addr = None;
        info!("Stream transport stopped");
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct AcceptLoop {
    listener: TcpListener,
    commands: CommandSender,
    client: ClientSlot,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    next_id: u64,
}

impl AcceptLoop {
    fn run(mut self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let id = self.next_id;
                    self.next_id += 1;
                    let connection = Connection {
                        id,
                        addr,
                        commands: self.commands.clone(),
                        client: self.client.clone(),
                    };
                    let spawned = thread::Builder::new()
                        .name(format!("livebridge-conn-{id}"))
                        .spawn(move || connection.run(stream));
                    if let Err(e) = spawned {
                        warn!(%addr, error = %e, "Failed to spawn connection thread");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(self.poll_interval),
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    thread::sleep(self.poll_interval);
                }
            }
        }
        debug!("Accept loop finished");
    }
}

struct Connection {
    id: u64,
    addr: SocketAddr,
    commands: CommandSender,
    client: ClientSlot,
}

impl Connection {
    fn run(self, stream: TcpStream) {
        if let Err(e) = self.serve(stream) {
            warn!(client = self.id, addr = %self.addr, error = %e, "Connection ended with error");
        }
    }

    fn serve(&self, stream: TcpStream) -> ServerResult<()> {
        stream.set_nonblocking(false)?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream.try_clone()?;

        perform_handshake(&mut reader, &mut writer)?;
        info!(client = self.id, addr = %self.addr, "Client connected");

        let (outbox, inbox) = mpsc::unbounded_channel();
        let writer_thread = thread::Builder::new()
            .name(format!("livebridge-write-{}", self.id))
            .spawn(move || write_loop(writer, inbox))?;

        let previous = lock(&self.client).replace(ClientHandle {
            id: self.id,
            outbox: outbox.clone(),
            stream: stream.try_clone()?,
        });
        if let Some(previous) = previous {
            info!(client = previous.id, "Replacing previous client");
            previous.disconnect();
        }

        queue_frame(&outbox, encode_message(&Response::connect(None)));

        let result = self.read_loop(FrameReader::new(reader), &outbox);

        {
            let mut slot = lock(&self.client);
            if slot.as_ref().is_some_and(|c| c.id == self.id) {
                slot.take();
            }
        }
        drop(outbox);
        if writer_thread.join().is_err() {
            warn!(client = self.id, "Writer thread panicked");
        }
        let _ = stream.shutdown(Shutdown::Both);
        info!(client = self.id, "Client disconnected");
        result
    }

    fn read_loop(
        &self,
        mut frames: FrameReader<BufReader<TcpStream>>,
        outbox: &Outbox,
    ) -> ServerResult<()> {
        loop {
            let message = match frames.read_message() {
                // The frame was read in full, so the stream is still in sync.
                Err(ProtocolError::InvalidUtf8(e)) => {
                    warn!(client = self.id, error = %e, "Dropping text message");
                    continue;
                }
                Err(e) => return Err(e.into()),
                Ok(None) => return Ok(()),
                Ok(Some(Message::Close)) => {
                    queue_frame(outbox, Ok(Frame::close().encode(None)));
                    return Ok(());
                }
                Ok(Some(Message::Ping(payload))) => {
                    queue_frame(outbox, Ok(Frame::pong(payload).encode(None)));
                    continue;
                }
                Ok(Some(Message::Pong(_))) => continue,
                Ok(Some(message)) => message,
            };

            match message.decode_json::<Request>() {
                Ok(Some(request)) => {
                    if self.commands.send(request).is_err() {
                        debug!(client = self.id, "Command queue closed");
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(client = self.id, error = %e, "Dropping undecodable message"),
            }
        }
    }
}

fn queue_frame(outbox: &Outbox, frame: livebridge_protocol::ProtocolResult<Vec<u8>>) {
    match frame {
        Ok(frame) => {
            let _ = outbox.send(frame);
        }
        Err(e) => warn!(error = %e, "Failed to encode frame"),
    }
}

fn write_loop(stream: TcpStream, mut inbox: mpsc::UnboundedReceiver<Vec<u8>>) {
    let mut writer = FrameWriter::new(stream);
    while let Some(frame) = inbox.blocking_recv() {
        if let Err(e) = writer.write_encoded(&frame).and_then(|()| writer.flush()) {
            debug!(error = %e, "Write failed, closing writer");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{CommandQueue, command_queue};
    use livebridge_protocol::handshake::client_request;
    use std::io::{BufRead, Write};

    const KEY: [u8; 4] = [1, 2, 3, 4];

    struct Client {
        reader: FrameReader<BufReader<TcpStream>>,
        stream: TcpStream,
    }

    impl Client {
        fn connect(addr: SocketAddr) -> Self {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            stream
                .write_all(client_request(&addr.to_string(), "dGhlIHNhbXBsZSBub25jZQ==").as_bytes())
                .unwrap();

            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut status = String::new();
            reader.read_line(&mut status).unwrap();
            assert!(status.starts_with("HTTP/1.1 101"));
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" {
                    break;
                }
            }

            Self {
                reader: FrameReader::lenient(reader),
                stream,
            }
        }

        fn send(&mut self, frame: Frame) {
            self.stream.write_all(&frame.encode(Some(KEY))).unwrap();
        }

        /// Next message, or `None` once the server has closed the stream.
        fn recv(&mut self) -> Option<Message> {
            self.reader.read_message().ok().flatten()
        }

        fn recv_response(&mut self) -> Response {
            self.recv().unwrap().decode_json().unwrap().unwrap()
        }
    }

    fn start() -> (StreamTransport, CommandQueue) {
        let mut transport =
            StreamTransport::new(StreamConfig::default().with_listen("127.0.0.1", 0..=0));
        let (tx, queue) = command_queue();
        transport.start(tx).unwrap();
        (transport, queue)
    }

    fn wait_for_request(queue: &mut CommandQueue) -> Request {
        for _ in 0..200 {
            if let Some(request) = queue.try_next() {
                return request;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no request arrived");
    }

    fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    #[test]
    fn handshake_then_connect_event() {
        let (transport, _queue) = start();
        let mut client = Client::connect(transport.local_addr().unwrap());

        assert_eq!(client.recv_response(), Response::connect(None));
    }

    #[test]
    fn masked_requests_reach_the_queue() {
        let (transport, mut queue) = start();
        let mut client = Client::connect(transport.local_addr().unwrap());
        client.recv_response();

        client.send(Frame::text(r#"{"ns":"song","name":"get_tracks","uuid":"a1"}"#));
        assert_eq!(
            wait_for_request(&mut queue),
            Request::new("song", "get_tracks").with_uuid("a1")
        );

        let compressed = livebridge_protocol::compression::encode_json(
            &Request::new("track", "get_name").with_nsid("live_1"),
        )
        .unwrap();
        client.send(Frame::binary(compressed));
        assert_eq!(wait_for_request(&mut queue).name, "get_name");
    }

    #[test]
    fn responses_reach_the_client() {
        let (transport, _queue) = start();
        let mut client = Client::connect(transport.local_addr().unwrap());
        client.recv_response();
        wait_until(|| transport.has_client());

        let response = Response::result(serde_json::json!({"tempo": 120}), Some("a1".into()));
        transport.sink().send(&response);
        assert_eq!(client.recv_response(), response);
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let (transport, _queue) = start();
        let mut client = Client::connect(transport.local_addr().unwrap());
        client.recv_response();

        client.send(Frame::new(livebridge_protocol::framing::opcode::PING, b"hb".to_vec()));
        assert_eq!(client.recv(), Some(Message::Pong(b"hb".to_vec())));
    }

    #[test]
    fn unmasked_frame_drops_connection_but_keeps_listening() {
        let (transport, mut queue) = start();
        let addr = transport.local_addr().unwrap();
        let mut client = Client::connect(addr);
        client.recv_response();

        client
            .stream
            .write_all(&Frame::text("{}").encode(None))
            .unwrap();
        assert_eq!(client.recv(), None);

        let mut second = Client::connect(addr);
        assert_eq!(second.recv_response(), Response::connect(None));
        second.send(Frame::text(r#"{"ns":"song","name":"get_tempo"}"#));
        assert_eq!(wait_for_request(&mut queue).name, "get_tempo");
    }

    #[test]
    fn invalid_utf8_text_is_dropped_not_fatal() {
        let (transport, mut queue) = start();
        let mut client = Client::connect(transport.local_addr().unwrap());
        client.recv_response();

        client.send(Frame::new(
            livebridge_protocol::framing::opcode::TEXT,
            vec![0xff, 0xfe],
        ));
        client.send(Frame::text(r#"{"ns":"song","name":"get_tempo","uuid":"t1"}"#));

        assert_eq!(
            wait_for_request(&mut queue),
            Request::new("song", "get_tempo").with_uuid("t1")
        );
        assert!(transport.has_client());
    }

    #[test]
    fn close_frame_is_echoed() {
        let (transport, _queue) = start();
        let mut client = Client::connect(transport.local_addr().unwrap());
        client.recv_response();

        client.send(Frame::close());
        assert_eq!(client.recv(), Some(Message::Close));
        wait_until(|| !transport.has_client());
    }

    #[test]
    fn new_client_replaces_old() {
        let (transport, _queue) = start();
        let addr = transport.local_addr().unwrap();
        let mut first = Client::connect(addr);
        first.recv_response();

        let mut second = Client::connect(addr);
        second.recv_response();
        assert_eq!(first.recv(), None);

        let response = Response::event("ev-1", serde_json::json!(1));
        transport.sink().send(&response);
        assert_eq!(second.recv_response(), response);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (mut transport, _queue) = start();
        let mut client = Client::connect(transport.local_addr().unwrap());
        client.recv_response();

        transport.shutdown();
        transport.shutdown();
        assert!(transport.local_addr().is_none());
        assert_eq!(client.recv(), None);
    }
}
