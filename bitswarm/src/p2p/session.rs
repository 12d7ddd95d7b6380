use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Instant,
};

use futures::{stream::SplitStream, SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle, time};
use tokio_util::codec::Framed;

use crate::{
    block::{Block, BlockRequest},
    disk::DiskCommand,
    torrent::{TorrentCommand, TorrentContext},
    Bitfield,
};

use super::{extension::*, handshake::*, message::*, state::*, *};

type MessageStream = SplitStream<Framed<TcpStream, MessageCodec>>;
type MessageSink = futures::stream::SplitSink<Framed<TcpStream, MessageCodec>, Message>;

// §4.2: "read deadline of 3 minutes between messages". Applies when no
// request is outstanding; a pending request tightens the deadline to
// `config.piece_read_timeout` instead.
const READ_TIMEOUT: time::Duration = time::Duration::from_secs(180);

// A connected peer is driven by two independent tasks rather than one
// combined select loop: the reader decodes incoming messages and updates
// piece-picker/interest state, the writer owns the socket's write half and
// serves both disk-read results and requests the reader decides to make.
// They share only what they must: session state (for stats/timeout) and
// the set of the peer's pending requests to us (so the writer knows which
// ones a disk read actually satisfies).
pub struct PeerSession {
    address: SocketAddr,
    torrent_ctx: Arc<TorrentContext>,
    peer_rx: PeerRx,
    peer_tx: PeerTx,
    state: Arc<Mutex<SessionState>>,
}

impl PeerSession {
    pub fn new(address: SocketAddr, torrent_ctx: Arc<TorrentContext>) -> (PeerSession, PeerTx) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();

        (
            PeerSession {
                address,
                torrent_ctx,
                peer_rx,
                peer_tx: peer_tx.clone(),
                state: Arc::new(Mutex::new(SessionState::default())),
            },
            peer_tx,
        )
    }

    #[tracing::instrument(name = "peer", skip(self, inbound_stream), fields(address = %self.address))]
    pub async fn start_session(&mut self, inbound_stream: Option<TcpStream>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.conn_state = ConnState::Connecting;
        }
        let inbound = inbound_stream.is_some();
        let mut socket = if let Some(stream) = inbound_stream {
            Framed::new(stream, HandshakeCodec)
        } else {
            let timeout = self.torrent_ctx.config.peer_connect_timeout;
            let stream = time::timeout(timeout, TcpStream::connect(self.address))
                .await
                .map_err(|_| PeerError::Timeout)??;
            tracing::trace!("outbound connection successful");
            Framed::new(stream, HandshakeCodec)
        };

        let handshake = self.exchange_handshake(&mut socket, inbound).await?;
        self.torrent_ctx
            .torrent_tx
            .send(TorrentCommand::PeerConnected {
                address: self.address,
                id: handshake.peer_id,
            })
            .ok();
        {
            let mut state = self.state.lock().unwrap();
            state.fast_extension = handshake.supports_fast();
        }

        let mut socket = Framed::new(socket.into_inner(), MessageCodec);
        if handshake.supports_extended() && self.torrent_ctx.config.pex_enabled {
            let ours = ExtendedHandshake::ours(None).encode().map_err(|_| PeerError::InvalidMessage)?;
            socket.send(Message::Extended { id: 0, payload: ours }).await?;
        }

        self.run(socket).await
    }

    pub async fn disconnect(&mut self) {
        {
            let mut state = self.state.lock().unwrap();
            *state = SessionState::default();
        }
        self.torrent_ctx
            .picker
            .piece_picker
            .write()
            .await
            .handle_disconnect(self.address);
        self.torrent_ctx
            .torrent_tx
            .send(TorrentCommand::PeerState {
                address: self.address,
                state: *self.state.lock().unwrap(),
            })
            .ok();
    }

    async fn exchange_handshake(
        &mut self,
        socket: &mut Framed<TcpStream, HandshakeCodec>,
        inbound: bool,
    ) -> Result<Handshake> {
        {
            let mut state = self.state.lock().unwrap();
            state.conn_state = ConnState::Handshaking;
        }
        let handshake = Handshake::new(self.torrent_ctx.info_hash, self.torrent_ctx.client_id);

        if !inbound {
            tracing::info!("send handshake");
            socket.send(handshake).await?;
        }

        tracing::trace!("waiting for handshake");
        if let Some(Ok(handshake)) = socket.next().await {
            tracing::info!("read: handshake");

            if handshake.protocol != PROTOCOL {
                return Err(PeerError::IncorrectProtocol);
            }
            if handshake.info_hash != self.torrent_ctx.info_hash {
                return Err(PeerError::IncorrectInfoHash);
            }

            if inbound {
                tracing::info!("send handshake");
                socket.send(handshake).await?;
            }

            tracing::info!("handshake successful, peer connected");
            Ok(handshake)
        } else {
            Err(PeerError::NoHandshake)
        }
    }

    async fn run(&mut self, socket: Framed<TcpStream, MessageCodec>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.connect_time = Some(Instant::now());
            state.conn_state = ConnState::Introducing;
        }

        let (sink, stream) = socket.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let requests_in: Arc<Mutex<HashSet<BlockRequest>>> = Arc::new(Mutex::new(HashSet::new()));

        let mut reader = Reader {
            address: self.address,
            torrent_ctx: self.torrent_ctx.clone(),
            state: self.state.clone(),
            requests_in: requests_in.clone(),
            outbound_tx: outbound_tx.clone(),
            peer_tx: self.peer_tx.clone(),
            bitfield: Bitfield::repeat(false, self.torrent_ctx.info.num_pieces as usize),
            requests_out: HashSet::new(),
            request_sent_at: HashMap::new(),
        };

        let mut writer = Writer {
            address: self.address,
            torrent_ctx: self.torrent_ctx.clone(),
            state: self.state.clone(),
            requests_in,
            outbound_rx,
            requeued: std::collections::VecDeque::new(),
        };

        let reader_fut = reader.run(stream);
        let writer_fut = writer.run(sink, &mut self.peer_rx);

        tokio::select! {
            res = reader_fut => res,
            res = writer_fut => res,
        }
    }
}

// Owns the read half. Decodes messages, updates interest/bitfield state,
// and decides what the writer should send in response by pushing onto
// `outbound_tx`.
struct Reader {
    address: SocketAddr,
    torrent_ctx: Arc<TorrentContext>,
    state: Arc<Mutex<SessionState>>,
    requests_in: Arc<Mutex<HashSet<BlockRequest>>>,
    outbound_tx: mpsc::UnboundedSender<Message>,
    // Clone of the channel the writer task drains `PeerCommand`s from; handed
    // to the disk actor so a completed read is routed back to this peer.
    peer_tx: PeerTx,
    bitfield: Bitfield,
    requests_out: HashSet<BlockRequest>,
    // When each outstanding request was sent, so a request sitting unanswered
    // past `config.request_timeout` can be reported as snubbed (§4.1 step 10)
    // rather than silently counted as still running.
    request_sent_at: HashMap<BlockRequest, Instant>,
}

impl Reader {
    async fn run(&mut self, mut stream: MessageStream) -> Result<()> {
        let mut snub_ticker = time::interval(time::Duration::from_secs(5));

        loop {
            // While a request is outstanding, whatever arrives next may be
            // its `Piece` and must complete within `piece_read_timeout`
            // (§4.2's per-block timer); otherwise the 3-minute general
            // inactivity deadline between messages applies.
            let deadline = if self.requests_out.is_empty() {
                READ_TIMEOUT
            } else {
                self.torrent_ctx.config.piece_read_timeout
            };

            tokio::select! {
                res = time::timeout(deadline, stream.next()) => {
                    match res {
                        Ok(Some(msg)) => {
                            let msg = msg?;
                            self.handle_msg(msg).await?;
                        }
                        Ok(None) => break,
                        Err(_) => {
                            tracing::warn!("peer {} read timed out", self.address);
                            return Err(PeerError::Timeout);
                        }
                    }
                }

                _ = snub_ticker.tick() => self.check_snubbed().await,
            }
        }
        Ok(())
    }

    // Any request still unanswered past `request_timeout` is reported to
    // the picker as snubbed (§4.1 step 10), so stalled re-request (§4.4
    // step 7) counts this piece as having a stalled, not running, download.
    async fn check_snubbed(&mut self) {
        let timeout = self.torrent_ctx.config.request_timeout;
        let now = Instant::now();
        for request in self.requests_out.iter() {
            let Some(sent_at) = self.request_sent_at.get(request) else { continue };
            if now.duration_since(*sent_at) >= timeout {
                self.torrent_ctx.picker.handle_snubbed(self.address, request.piece_idx).await;
            }
        }
    }

    async fn handle_msg(&mut self, msg: Message) -> Result<()> {
        tracing::info!("read: {}", msg);

        let conn_state = self.state.lock().unwrap().conn_state;

        match msg {
            Message::Bitfield(bitfield) => {
                if conn_state == ConnState::Introducing {
                    self.handle_bitfield(bitfield).await?;
                } else {
                    tracing::error!("unexpected bitfield");
                    return Err(PeerError::UnexpectedBitfield);
                }
            }

            Message::KeepAlive => {}

            Message::HaveAll => {
                self.bitfield.fill(true);
                let interested = self
                    .torrent_ctx
                    .picker
                    .piece_picker
                    .write()
                    .await
                    .handle_bitfield(self.address, &self.bitfield);
                self.update_interest(interested).await?;
            }

            Message::HaveNone => {}

            Message::Choke => {
                let was_choking = {
                    let mut state = self.state.lock().unwrap();
                    let was = state.peer_choking;
                    state.peer_choking = true;
                    state.changed = true;
                    was
                };
                if !was_choking {
                    // Allowed-fast requests stay live across a real choke
                    // (BEP 6 §3); only cancel/free the rest.
                    let piece_indices: HashSet<usize> = {
                        let mut out = HashSet::new();
                        for r in self.requests_out.iter() {
                            if !self.torrent_ctx.picker.is_allowed_fast(&self.address, r.piece_idx).await {
                                out.insert(r.piece_idx);
                            }
                        }
                        out
                    };
                    {
                        let mut picker = self.torrent_ctx.picker.piece_picker.write().await;
                        for idx in piece_indices.iter() {
                            picker.handle_choke(self.address, *idx);
                        }
                    }
                    self.free_requests_out(&piece_indices).await;
                }
            }

            Message::Unchoke => {
                let (was_choking, interested) = {
                    let mut state = self.state.lock().unwrap();
                    let was = state.peer_choking;
                    state.peer_choking = false;
                    state.changed = true;
                    (was, state.interested)
                };
                if was_choking && interested {
                    self.make_requests().await?;
                }
            }

            Message::Interested => {
                // Choke state itself is owned entirely by the periodic
                // unchoker (§4.7); the reader only records interest.
                self.state.lock().unwrap().peer_interested = true;
            }

            Message::NotInterested => {
                self.state.lock().unwrap().peer_interested = false;
            }

            Message::Block(block) => {
                self.handle_block(block).await?;
                self.make_requests().await?;
            }

            Message::Request(request) => self.handle_request(request).await?,

            Message::Have { idx } => self.handle_have(idx).await?,

            Message::Suggest { .. } => {
                // A hint only; the rarest-first pass already covers what we'd
                // otherwise request next, so nothing to act on.
            }

            Message::AllowedFast { idx } => {
                if idx >= self.torrent_ctx.info.num_pieces {
                    tracing::error!("allowed fast msg with invalid idx: {}", idx);
                    return Err(PeerError::InvalidMessage);
                }
                let idx = idx as usize;
                self.torrent_ctx.picker.handle_allowed_fast(self.address, idx).await;
                if !self.torrent_ctx.picker.have(idx).await {
                    self.update_interest(true).await?;
                }
                self.make_requests().await?;
            }

            Message::Reject(request) => {
                self.requests_out.remove(&request);
                self.request_sent_at.remove(&request);
            }

            Message::Port { port: _ } => {
                // DHT port announcement; DHT routing lives outside the
                // torrent loop, nothing to do per-connection.
            }

            Message::Cancel(block_info) => self.handle_cancel(block_info).await?,

            Message::Extended { id, payload } => self.handle_extended(id, &payload).await?,
        }

        let conn_state = self.state.lock().unwrap().conn_state;
        if conn_state == ConnState::Introducing {
            let own_has_any = self
                .torrent_ctx
                .picker
                .piece_picker
                .read()
                .await
                .own_bitfield()
                .any();
            if !own_has_any && self.bitfield.not_any() {
                tracing::warn!("no pieces in connection");
                self.outbound_tx.send(Message::KeepAlive).ok();
                return Err(PeerError::NoHandshake);
            }
            self.state.lock().unwrap().conn_state = ConnState::Connected;
        }

        Ok(())
    }

    async fn handle_bitfield(&mut self, mut bitfield: Bitfield) -> Result<()> {
        tracing::info!(
            "peer has {}/{} pieces",
            bitfield.count_ones(),
            self.torrent_ctx.info.num_pieces
        );
        bitfield.resize(self.torrent_ctx.info.num_pieces as usize, false);
        let interested = self
            .torrent_ctx
            .picker
            .piece_picker
            .write()
            .await
            .handle_bitfield(self.address, &bitfield);
        self.state.lock().unwrap().num_pieces = bitfield.count_ones() as usize;
        self.bitfield = bitfield;
        self.update_interest(interested).await
    }

    async fn handle_have(&mut self, idx: u32) -> Result<()> {
        if idx >= self.torrent_ctx.info.num_pieces {
            tracing::error!("have msg with invalid idx: {}", idx);
            return Err(PeerError::InvalidMessage);
        }
        if self.bitfield[idx as usize] {
            return Ok(());
        }
        self.bitfield.set(idx as usize, true);
        self.state.lock().unwrap().num_pieces += 1;

        let interested = self
            .torrent_ctx
            .picker
            .piece_picker
            .write()
            .await
            .handle_have(self.address, idx as usize);

        self.update_interest(interested).await
    }

    async fn handle_block(&mut self, block: Block) -> Result<()> {
        let request = BlockRequest::from_block(&block);
        if !self.requests_out.remove(&request) {
            tracing::warn!("unexpected block: {:?}", &request);
            return Ok(());
        }
        self.request_sent_at.remove(&request);

        let is_duplicate = if let Some(partial_piece) = self
            .torrent_ctx
            .picker
            .partial_pieces
            .read()
            .await
            .get(&request.piece_idx)
        {
            partial_piece.write().await.received_block(&request)
        } else {
            tracing::warn!("received block for non-existent piece: {:?}", &request);
            return Ok(());
        };

        if !is_duplicate {
            self.state.lock().unwrap().throughput.down += block.data.len() as u64;
            self.torrent_ctx
                .disk_tx
                .send(DiskCommand::WriteBlock {
                    id: self.torrent_ctx.id,
                    block,
                })
                .map_err(|e| e.into())
        } else {
            tracing::warn!("duplicate block: {:?}", &request);
            Ok(())
        }
    }

    async fn handle_request(&mut self, request: BlockRequest) -> Result<()> {
        let choked = self.state.lock().unwrap().choked;
        if choked {
            tracing::error!("sending requests whilst choked");
            return Err(PeerError::InvalidMessage);
        }
        if !request.is_valid(&self.torrent_ctx.info) {
            tracing::error!("invalid request: {:?}", request);
            return Err(PeerError::InvalidMessage);
        }

        let inserted = self.requests_in.lock().unwrap().insert(request);
        if !inserted {
            tracing::warn!("duplicate request: {:?}", request);
            return Ok(());
        }
        if self.requests_in.lock().unwrap().len() > self.torrent_ctx.config.max_requests_in as usize {
            tracing::warn!("peer exceeded max requests in, disconnecting");
            return Err(PeerError::InvalidMessage);
        }

        self.torrent_ctx.disk_tx.send(DiskCommand::ReadBlock {
            id: self.torrent_ctx.id,
            block: request,
            tx: self.peer_tx.clone(),
        })?;

        Ok(())
    }

    // BEP 10 extended messages are addressed using the local id *we*
    // assigned in our own handshake, so dispatch is keyed on our constants
    // rather than anything the peer advertised.
    async fn handle_extended(&mut self, id: u8, payload: &[u8]) -> Result<()> {
        match id {
            0 => {
                // Peer's own extended handshake; nothing in it changes how
                // the reader interprets incoming messages.
            }
            UT_PEX_LOCAL_ID => {
                let pex = PexMessage::decode(payload).map_err(|_| PeerError::InvalidMessage)?;
                let peers = pex.added_peers();
                if !peers.is_empty() {
                    self.torrent_ctx
                        .torrent_tx
                        .send(TorrentCommand::Peers(peers))?;
                }
            }
            UT_METADATA_LOCAL_ID => {
                // We fetch metadata through a standalone downloader, not
                // through an established session; a peer requesting it from
                // us here gets turned down rather than left hanging.
                if let Ok((msg, _)) = MetadataMessage::decode(payload) {
                    if msg.kind == MetadataMsgType::Request {
                        if let Ok(reply) = MetadataMessage::reject(msg.piece).encode() {
                            self.outbound_tx
                                .send(Message::Extended { id: UT_METADATA_LOCAL_ID, payload: reply })
                                .ok();
                        }
                    }
                }
            }
            _ => {
                tracing::trace!("unrecognized extended message id: {}", id);
            }
        }
        Ok(())
    }

    async fn handle_cancel(&mut self, block_info: BlockRequest) -> Result<()> {
        if !block_info.is_valid(&self.torrent_ctx.info) {
            tracing::warn!("invalid cancel: {:?}", block_info);
            return Err(PeerError::InvalidMessage);
        }
        self.requests_in.lock().unwrap().remove(&block_info);
        Ok(())
    }

    async fn make_requests(&mut self) -> Result<()> {
        let (peer_choking, interested) = {
            let state = self.state.lock().unwrap();
            (state.peer_choking, state.interested)
        };
        if !interested {
            return Ok(());
        }

        let target = self.torrent_ctx.config.default_requests_out as usize;

        if peer_choking {
            // Still choked overall, but BEP 6 allowed-fast pieces may be
            // requested regardless.
            let requests = self
                .torrent_ctx
                .picker
                .pick_allowed_fast_blocks(self.address, &self.requests_out, target, &self.bitfield)
                .await;
            for block in requests {
                tracing::info!("send allowed fast request: {:?}", block);
                self.requests_out.insert(block);
                self.request_sent_at.insert(block, Instant::now());
                if self.outbound_tx.send(Message::Request(block)).is_err() {
                    break;
                }
            }
            return Ok(());
        }

        let (requests, stolen) = self
            .torrent_ctx
            .picker
            .pick_blocks(self.address, &self.requests_out, target, &self.bitfield)
            .await;

        for idx in stolen {
            self.torrent_ctx
                .torrent_tx
                .send(TorrentCommand::WebseedStolen(idx))
                .ok();
        }

        for block in requests {
            tracing::info!("send request: {:?}", block);
            self.requests_out.insert(block);
            self.request_sent_at.insert(block, Instant::now());
            if self.outbound_tx.send(Message::Request(block)).is_err() {
                break;
            }
        }

        Ok(())
    }

    // Frees every outstanding request whose piece index is in `pieces`,
    // leaving requests for other pieces (e.g. allowed-fast ones kept alive
    // across a choke) queued as before.
    async fn free_requests_out(&mut self, pieces: &HashSet<usize>) {
        tracing::info!("freeing requested blocks");
        let partial_pieces = self.torrent_ctx.picker.partial_pieces.read().await;
        let (to_free, to_keep): (HashSet<_>, HashSet<_>) = self
            .requests_out
            .drain()
            .partition(|r| pieces.contains(&r.piece_idx));
        for request in to_free {
            self.request_sent_at.remove(&request);
            if let Some(partial_piece) = partial_pieces.get(&request.piece_idx) {
                partial_piece.write().await.free_block(&request);
                tracing::trace!("freed block request: {:?}", request);
            }
        }
        self.requests_out = to_keep;
    }

    async fn update_interest(&mut self, interested: bool) -> Result<()> {
        let became_interested = {
            let mut state = self.state.lock().unwrap();
            if !state.interested && interested {
                state.interested = true;
                true
            } else {
                if state.interested && !interested {
                    state.interested = false;
                }
                false
            }
        };
        if became_interested {
            self.outbound_tx.send(Message::Interested).ok();
        }
        Ok(())
    }
}

// Owns the write half. Serves disk-read results and piece-written
// notifications addressed to this peer, forwards messages the reader
// decided to send, and periodically pushes stats / checks for inactivity.
struct Writer {
    address: SocketAddr,
    torrent_ctx: Arc<TorrentContext>,
    state: Arc<Mutex<SessionState>>,
    requests_in: Arc<Mutex<HashSet<BlockRequest>>>,
    outbound_rx: mpsc::UnboundedReceiver<Message>,
    // Commands pulled out of `peer_rx` while draining queued serves on a
    // choke, but not themselves serves; replayed before the next recv.
    requeued: std::collections::VecDeque<PeerCommand>,
}

impl Writer {
    async fn run(&mut self, mut sink: MessageSink, peer_rx: &mut PeerRx) -> Result<()> {
        let mut ticker = time::interval(time::Duration::from_secs(1));

        loop {
            if let Some(cmd) = self.requeued.pop_front() {
                match cmd {
                    PeerCommand::BlockRead(block) => self.send_block(&mut sink, block).await?,
                    PeerCommand::PieceWritten(idx) => self.handle_written_piece(&mut sink, idx).await?,
                    PeerCommand::Choke => self.handle_choke(&mut sink, peer_rx).await?,
                    PeerCommand::Unchoke => {
                        self.state.lock().unwrap().choked = false;
                        self.send_message(&mut sink, Message::Unchoke).await?;
                    }
                    PeerCommand::Shutdown => {
                        tracing::info!("session shutdown");
                        break;
                    }
                }
                continue;
            }

            tokio::select! {
                Some(msg) = self.outbound_rx.recv() => {
                    self.send_message(&mut sink, msg).await?;
                }

                Some(cmd) = peer_rx.recv() => {
                    match cmd {
                        PeerCommand::BlockRead(block) => self.send_block(&mut sink, block).await?,
                        PeerCommand::PieceWritten(idx) => self.handle_written_piece(&mut sink, idx).await?,
                        PeerCommand::Choke => self.handle_choke(&mut sink, peer_rx).await?,
                        PeerCommand::Unchoke => {
                            self.state.lock().unwrap().choked = false;
                            self.send_message(&mut sink, Message::Unchoke).await?;
                        }
                        PeerCommand::Shutdown => {
                            tracing::info!("session shutdown");
                            break;
                        }
                    }
                }

                t = ticker.tick() => self.tick(t.into_std()).await?,

                else => break,
            }
        }

        Ok(())
    }

    #[inline(always)]
    async fn send_message(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::info!("send: {}", msg);
        sink.send(msg).await
    }

    async fn send_block(&mut self, sink: &mut MessageSink, block: Block) -> Result<()> {
        let request = BlockRequest::from_block(&block);
        if !self.requests_in.lock().unwrap().remove(&request) {
            tracing::warn!("block read but no request: {:?}", request);
            return Ok(());
        }
        self.send_message(sink, Message::Block(block)).await?;
        self.state.lock().unwrap().throughput.up += request.len as u64;
        Ok(())
    }

    async fn handle_written_piece(&mut self, sink: &mut MessageSink, idx: usize) -> Result<()> {
        self.send_message(sink, Message::Have { idx: idx as u32 }).await
    }

    // Choke cancels serves (§4.2): any block read already queued behind
    // this choke is purged rather than sent, converting to `Reject` when
    // the fast extension was negotiated instead of being dropped silently.
    // Non-serve commands queued behind it (piece-written, shutdown) are
    // preserved in arrival order.
    async fn handle_choke(&mut self, sink: &mut MessageSink, peer_rx: &mut PeerRx) -> Result<()> {
        let fast_extension = self.state.lock().unwrap().fast_extension;
        self.state.lock().unwrap().choked = true;
        self.send_message(sink, Message::Choke).await?;

        let mut requeue = Vec::new();
        while let Ok(cmd) = peer_rx.try_recv() {
            match cmd {
                PeerCommand::BlockRead(block) => {
                    let request = BlockRequest::from_block(&block);
                    self.requests_in.lock().unwrap().remove(&request);
                    if fast_extension {
                        self.send_message(sink, Message::Reject(request)).await?;
                    }
                }
                other => requeue.push(other),
            }
        }
        for cmd in requeue {
            self.requeued.push_back(cmd);
        }

        Ok(())
    }

    async fn tick(&mut self, time: Instant) -> Result<()> {
        let (should_timeout, changed, snapshot) = {
            let mut state = self.state.lock().unwrap();
            let should_timeout = !state.interested
                && !state.peer_interested
                && state
                    .connect_time
                    .map(|c| time.saturating_duration_since(c) >= time::Duration::from_secs(180))
                    .unwrap_or(false);
            let changed = state.changed;
            state.tick();
            (should_timeout, changed, *state)
        };

        if should_timeout {
            tracing::warn!("disconnecting peer due to inactivity");
            return Err(PeerError::Timeout);
        }

        if changed {
            self.torrent_ctx.torrent_tx.send(TorrentCommand::PeerState {
                address: self.address,
                state: snapshot,
            })?;
        }

        Ok(())
    }
}

