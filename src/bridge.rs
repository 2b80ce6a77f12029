use std::sync::Arc;
use std::thread::sleep;

use async_stream::stream;
use futures::{pin_mut, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{spawn_blocking, JoinHandle};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

use crate::attribute::{handle_write, mirror, AttributeTree, AttributeWrite};
use crate::hvac::HvacDriver;
use crate::protocol::{hex, Frame, Resynchronizer};
use crate::transport::Transport;

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Time between status requests.
    pub poll_period: Duration,
    /// How long the tree is left alone after a change before it gets a fresh mirror.
    pub sync_delay: Duration,
    /// Silence on the link after which buffered bytes are scanned for frames.
    pub quiet_window: Duration,
    pub read_timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            poll_period: Duration::from_secs(30),
            sync_delay: Duration::from_millis(500),
            quiet_window: Duration::from_millis(10),
            read_timeout: Duration::from_millis(100),
            settle_delay: Duration::from_millis(100),
        }
    }
}

/// Polls the transport on a blocking thread, forwarding every non-empty read.
///
/// The thread exits once the receiving side is dropped.
pub fn spawn_reader(
    transport: Arc<dyn Transport>,
    read_timeout: Duration,
) -> (mpsc::UnboundedReceiver<Vec<u8>>, JoinHandle<()>) {
    let (chunk_sender, chunk_receiver) = mpsc::unbounded_channel();
    let handle = spawn_blocking(move || loop {
        if chunk_sender.is_closed() {
            info!("serial reader stopping, no more consumers");
            break;
        }
        match transport.read(read_timeout) {
            Ok(chunk) if chunk.is_empty() => {}
            Ok(chunk) => {
                trace!("read [{}]", hex(&chunk));
                if chunk_sender.send(chunk).is_err() {
                    info!("serial reader stopping, receiver closed");
                    break;
                }
            }
            Err(e) => {
                error!("could not read from serial link: {}", e);
                sleep(read_timeout);
            }
        }
    });
    (chunk_receiver, handle)
}

/// Turns raw chunks into frames, scanning only once the link has been quiet for `quiet`.
pub fn frame_stream<S: Stream<Item = Vec<u8>> + Unpin>(
    mut chunks: S,
    quiet: Duration,
) -> impl Stream<Item = Frame> {
    stream! {
        let mut resync = Resynchronizer::new();
        let mut pending = false;
        loop {
            let next = if pending {
                match time::timeout(quiet, chunks.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        pending = false;
                        let frames = resync.frames().collect::<Vec<_>>();
                        if !resync.is_empty() {
                            trace!("{} bytes left after scan", resync.len());
                        }
                        for frame in frames {
                            yield frame;
                        }
                        continue;
                    }
                }
            } else {
                chunks.next().await
            };

            match next {
                Some(chunk) => {
                    resync.push(&chunk);
                    pending = true;
                }
                None => {
                    debug!("serial chunk stream ended");
                    let frames = resync.frames().collect::<Vec<_>>();
                    for frame in frames {
                        yield frame;
                    }
                    break;
                }
            }
        }
    }
}

/// Single owner of the control flow between the attribute tree and the unit.
pub struct Bridge {
    driver: Arc<HvacDriver>,
    tree: Arc<dyn AttributeTree>,
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(
        driver: Arc<HvacDriver>,
        tree: Arc<dyn AttributeTree>,
        config: BridgeConfig,
    ) -> Self {
        Bridge {
            driver,
            tree,
            config,
        }
    }

    pub fn driver(&self) -> &Arc<HvacDriver> {
        &self.driver
    }

    /// Lets the link settle, then wakes the unit up with a keepalive.
    pub async fn start(&self) {
        time::sleep(self.config.settle_delay).await;
        if let Err(e) = self.driver.send_keepalive() {
            warn!("initial keepalive failed: {}", e);
        }
    }

    /// Full startup on a live transport: settle, keepalive, reader thread, then the event loop.
    pub async fn serve(
        &self,
        transport: Arc<dyn Transport>,
        writes: mpsc::UnboundedReceiver<AttributeWrite>,
    ) {
        self.start().await;
        let (chunks, reader) = spawn_reader(transport, self.config.read_timeout);
        let frames = frame_stream(
            tokio_stream::wrappers::UnboundedReceiverStream::new(chunks),
            self.config.quiet_window,
        );
        self.run(writes, frames).await;
        if let Err(e) = reader.await {
            error!("serial reader failed: {}", e);
        }
    }

    /// Runs until both the write channel and the frame stream have closed.
    pub async fn run<F: Stream<Item = Frame>>(
        &self,
        mut writes: mpsc::UnboundedReceiver<AttributeWrite>,
        frames: F,
    ) {
        pin_mut!(frames);
        let period = self.config.poll_period;
        let mut poll = time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sync_at: Option<Instant> = None;
        let mut writes_open = true;
        let mut frames_open = true;

        while writes_open || frames_open {
            let sync_deadline = sync_at.unwrap_or_else(Instant::now);
            tokio::select! {
                write = writes.recv(), if writes_open => match write {
                    Some(write) => {
                        debug!("attribute write {} = {:?}", write.path, write.value);
                        if self.handle_write(write).await {
                            sync_at = Some(Instant::now() + self.config.sync_delay);
                        }
                    }
                    None => {
                        debug!("attribute write channel closed");
                        writes_open = false;
                    }
                },
                frame = frames.next(), if frames_open => match frame {
                    Some(frame) => {
                        if self.apply_frame(&frame) {
                            sync_at = Some(Instant::now() + self.config.sync_delay);
                        }
                    }
                    None => {
                        debug!("frame stream ended");
                        frames_open = false;
                    }
                },
                _ = poll.tick() => self.periodic_update(),
                _ = time::sleep_until(sync_deadline), if sync_at.is_some() => {
                    sync_at = None;
                    self.sync();
                },
            }
        }

        if sync_at.is_some() {
            self.sync();
        }
        info!("bridge stopped");
    }

    /// Setters persist to disk, so they run on the blocking pool.
    async fn handle_write(&self, write: AttributeWrite) -> bool {
        let driver = self.driver.clone();
        match spawn_blocking(move || handle_write(&driver, &write)).await {
            Ok(resync) => resync,
            Err(e) => {
                error!("attribute write handler failed: {}", e);
                true
            }
        }
    }

    fn apply_frame(&self, frame: &Frame) -> bool {
        match frame {
            Frame::Ack => trace!("ack"),
            Frame::Fault(codes) if codes.is_active() => {
                warn!(
                    "unit reports fault 0x{:02X} warning 0x{:02X}",
                    codes.fault, codes.warning
                )
            }
            Frame::Unknown { length, marker } => {
                debug!("unknown frame of {} bytes, marker 0x{:02X}", length, marker)
            }
            other => debug!("received {:?}", other),
        }
        match self.driver.store().apply(&frame.delta()) {
            Ok(changed) => changed,
            Err(e) => {
                error!("could not apply frame: {}", e);
                false
            }
        }
    }

    fn periodic_update(&self) {
        if let Err(e) = self.driver.request_status() {
            warn!("status request failed: {}", e);
        }
        self.sync();
        if let Err(e) = self.driver.send_keepalive() {
            warn!("keepalive failed: {}", e);
        }
    }

    fn sync(&self) {
        match self.driver.store().snapshot() {
            Ok(state) => {
                let pushed = mirror(self.tree.as_ref(), &state);
                trace!("mirrored {} attributes", pushed);
            }
            Err(e) => error!("could not read state for sync: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{decode_response, KEEPALIVE};
    use crate::transport::MemoryTransport;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    const ACK: [u8; 13] = [
        0x7A, 0x7A, 0x21, 0xD5, 0x0D, 0x00, 0x00, 0xA0, 0x00, 0x00, 0x00, 0x04, 0x08,
    ];

    #[tokio::test(start_paused = true)]
    async fn frames_wait_for_quiet_link() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let frames = frame_stream(
            UnboundedReceiverStream::new(receiver),
            Duration::from_millis(10),
        );
        pin_mut!(frames);

        sender.send(ACK[..6].to_vec()).unwrap();
        sender.send(ACK[6..].to_vec()).unwrap();
        sender.send(vec![0x00, 0x01]).unwrap();
        assert_eq!(frames.next().await, Some(Frame::Ack));

        sender.send(ACK.to_vec()).unwrap();
        drop(sender);
        assert_eq!(frames.next().await, Some(Frame::Ack));
        assert_eq!(frames.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_frame_waits_for_rest() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let frames = frame_stream(
            UnboundedReceiverStream::new(receiver),
            Duration::from_millis(10),
        );
        pin_mut!(frames);

        sender.send(ACK[..8].to_vec()).unwrap();
        let early = time::timeout(Duration::from_millis(50), frames.next()).await;
        assert!(early.is_err());

        sender.send(ACK[8..].to_vec()).unwrap();
        assert_eq!(frames.next().await, Some(Frame::Ack));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reader_forwards_chunks() {
        let transport = Arc::new(MemoryTransport::new());
        transport.feed(&KEEPALIVE).unwrap();
        transport.feed(&ACK).unwrap();

        let (mut chunks, handle) = spawn_reader(transport.clone(), Duration::from_millis(5));
        assert_eq!(chunks.recv().await, Some(KEEPALIVE.to_vec()));
        let ack = chunks.recv().await.unwrap();
        assert_eq!(decode_response(&ack).unwrap(), Frame::Ack);

        drop(chunks);
        handle.await.unwrap();
    }
}
