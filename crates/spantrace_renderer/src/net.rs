//! Distributed tile rendering over TCP.
//!
//! The protocol is line based:
//!
//! ```text
//! server: 1                 (0 when too busy, then close)
//! client: <x> <y> <size>
//! server: S
//! server: P<x>,<y>=<r>,<g>,<b>   one per finished pixel, repeated
//! server: E                 end of one snapshot
//! ...                       more snapshots while the tile renders
//! server: F                 tile complete
//! ```
//!
//! Snapshots repeat every pixel rendered so far, so a client that only
//! keeps the latest value for each pixel always holds a consistent tile.

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::seq::SliceRandom;
use spantrace_math::Color;
use thiserror::Error;

use crate::block::{BlockError, BlockRenderer, BlockResult, RenderBlock, TileBuffer};
use crate::object::Object;
use crate::pool::{lock, JobError, ThreadPool};
use crate::renderer::ImageBuffer;
use crate::settings::RenderSettings;
use crate::tile::Tile;

pub const DEFAULT_PORT: u16 = 12346;

/// Largest tile a server agrees to render.
pub const MAX_REQUEST_SIZE: i64 = 1_000_000;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Longest silence a client tolerates from a server. Servers send a
/// snapshot every poll interval, so this only trips on a stalled peer.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Network I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid server address {0:?}")]
    BadAddress(String),

    #[error("Server {0} is busy")]
    Busy(String),

    #[error("Rejected block request {0:?}")]
    BadRequest(String),

    #[error("Protocol violation: {0:?}")]
    Protocol(String),

    #[error("Connection closed before the block finished")]
    Disconnected,

    #[error("No render servers configured")]
    NoServers,

    #[error("Gave up after {attempts} attempts, last error: {last}")]
    AttemptsExhausted { attempts: u32, last: String },

    #[error(transparent)]
    Block(#[from] BlockError),
}

pub type NetResult<T> = Result<T, NetError>;

/// Parse a `"<x> <y> <size>"` request against a `width` x `height` screen.
/// Sizes must be powers of two.
fn parse_request(line: &str, width: u32, height: u32) -> NetResult<Tile> {
    let bad = || NetError::BadRequest(line.trim().to_string());
    let fields: Vec<i64> = line
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| bad())?;
    let &[x, y, size] = fields.as_slice() else {
        return Err(bad());
    };

    let (w, h) = (width as i64, height as i64);
    if x < 0 || y < 0 || size <= 0 || size > MAX_REQUEST_SIZE || x > w || y > h || size > w || size > h {
        return Err(bad());
    }
    if !(size as u64).is_power_of_two() {
        return Err(bad());
    }
    Ok(Tile::new(x as u32, y as u32, size as u32, 0))
}

/// Parse the body of a `P` line, `"<x>,<y>=<r>,<g>,<b>"`, for `tile`.
fn parse_pixel(body: &str, tile: &Tile) -> NetResult<(i64, i64, Color)> {
    let bad = || NetError::Protocol(format!("P{}", body));
    let (coords, rgb) = body.split_once('=').ok_or_else(bad)?;
    let (x, y) = coords.split_once(',').ok_or_else(bad)?;
    let x: i64 = x.trim().parse().map_err(|_| bad())?;
    let y: i64 = y.trim().parse().map_err(|_| bad())?;

    let channels: Vec<f32> = rgb
        .split(',')
        .map(|c| c.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| bad())?;
    let &[r, g, b] = channels.as_slice() else {
        return Err(bad());
    };

    if !tile.contains(x, y) {
        return Err(bad());
    }
    Ok((x, y, Color::rgb(r, g, b)))
}

fn write_snapshot(w: &mut impl Write, pixels: &[(u32, u32, Color)]) -> io::Result<()> {
    for (x, y, c) in pixels {
        writeln!(w, "P{},{}={},{},{}", x, y, c.r, c.g, c.b)?;
    }
    w.write_all(b"E\n")?;
    w.flush()
}

/// Split `"host:port"`, falling back to [`DEFAULT_PORT`].
fn split_address(address: &str) -> NetResult<(String, u16)> {
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| NetError::BadAddress(address.to_string()))?;
            if host.is_empty() {
                return Err(NetError::BadAddress(address.to_string()));
            }
            Ok((host.to_string(), port))
        }
        None if !address.is_empty() => Ok((address.to_string(), DEFAULT_PORT)),
        None => Err(NetError::BadAddress(address.to_string())),
    }
}

/// Counts a connection as running until dropped.
struct RunningSlot(Arc<AtomicUsize>);

impl RunningSlot {
    fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        if counter.fetch_add(1, Ordering::SeqCst) >= max {
            counter.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self(Arc::clone(counter)))
    }
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Renders tiles for remote clients.
pub struct RenderServer {
    listener: TcpListener,
    scene: Arc<dyn Object>,
    settings: Arc<RenderSettings>,
    pool: ThreadPool,
    running: Arc<AtomicUsize>,
    max_running: usize,
    poll_interval: Duration,
}

impl RenderServer {
    pub fn bind(addr: impl ToSocketAddrs, scene: Arc<dyn Object>, settings: RenderSettings, pool: ThreadPool) -> NetResult<Self> {
        let listener = TcpListener::bind(addr)?;
        let max_running = pool.threads() * 2;
        Ok(Self {
            listener,
            scene,
            settings: Arc::new(settings),
            pool,
            running: Arc::new(AtomicUsize::new(0)),
            max_running,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Blocks rendered at once before new clients are turned away.
    pub fn with_max_running(mut self, max_running: usize) -> Self {
        self.max_running = max_running;
        self
    }

    /// Interval between pixel snapshots sent to the client.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Accept connections until the listener fails, one thread each.
    pub fn serve(self) -> NetResult<()> {
        log::info!("Render server listening on {}", self.listener.local_addr()?);
        for stream in self.listener.incoming() {
            let stream = stream?;
            let conn = Connection {
                scene: Arc::clone(&self.scene),
                settings: Arc::clone(&self.settings),
                pool: self.pool.clone(),
                running: Arc::clone(&self.running),
                max_running: self.max_running,
                poll_interval: self.poll_interval,
            };
            let spawned = thread::Builder::new()
                .name("spantrace-conn".into())
                .spawn(move || conn.handle(stream));
            if let Err(e) = spawned {
                log::error!("Failed to start connection thread: {}", e);
            }
        }
        Ok(())
    }
}

struct Connection {
    scene: Arc<dyn Object>,
    settings: Arc<RenderSettings>,
    pool: ThreadPool,
    running: Arc<AtomicUsize>,
    max_running: usize,
    poll_interval: Duration,
}

impl Connection {
    fn handle(self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());
        if let Err(e) = self.serve_block(stream) {
            log::warn!("Connection from {} ended: {}", peer, e);
        }
    }

    fn serve_block(&self, stream: TcpStream) -> NetResult<()> {
        let mut writer = BufWriter::new(stream.try_clone()?);
        let Some(_slot) = RunningSlot::acquire(&self.running, self.max_running) else {
            log::warn!("Busy, turning client away ({} blocks running)", self.max_running);
            writer.write_all(b"0\n")?;
            writer.flush()?;
            return Ok(());
        };
        writer.write_all(b"1\n")?;
        writer.flush()?;

        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line)?;
        let tile = parse_request(&line, self.settings.width, self.settings.height)?;

        log::info!("Started block ({}, {}) {}", tile.x, tile.y, tile.size);
        writer.write_all(b"S\n")?;
        writer.flush()?;

        let mut block = RenderBlock::start(tile, Arc::clone(&self.scene), Arc::clone(&self.settings), &self.pool)?;
        while !block.done() {
            write_snapshot(&mut writer, &block.valid_pixels())?;
            thread::sleep(self.poll_interval);
        }
        block.finish()?;
        write_snapshot(&mut writer, &block.valid_pixels())?;
        writer.write_all(b"F\n")?;
        writer.flush()?;

        log::info!("Finished block ({}, {}) {}", tile.x, tile.y, tile.size);
        Ok(())
    }
}

/// Where and how persistently to request remote tiles.
#[derive(Debug, Clone)]
pub struct NetClient {
    addresses: Vec<String>,
    retry_delay: Duration,
    max_attempts: u32,
    read_timeout: Duration,
}

impl NetClient {
    /// Client for `host[:port]` servers.
    pub fn new(addresses: Vec<String>) -> NetResult<Self> {
        if addresses.is_empty() {
            return Err(NetError::NoServers);
        }
        for address in &addresses {
            split_address(address)?;
        }
        Ok(Self {
            addresses,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    fn pick_address(&self) -> NetResult<&str> {
        self.addresses
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .ok_or(NetError::NoServers)
    }

    /// Render `tile` on random servers until one succeeds.
    fn fetch_with_retries(&self, tile: Tile, buffer: &Mutex<TileBuffer>) -> NetResult<()> {
        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            let address = self.pick_address()?;
            match self.fetch(address, tile, buffer) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!(
                        "Block ({}, {}) on {} failed (attempt {}/{}): {}",
                        tile.x,
                        tile.y,
                        address,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    last = e.to_string();
                    if attempt < self.max_attempts {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }
        Err(NetError::AttemptsExhausted {
            attempts: self.max_attempts,
            last,
        })
    }

    /// One attempt at rendering `tile` on `address`.
    fn fetch(&self, address: &str, tile: Tile, buffer: &Mutex<TileBuffer>) -> NetResult<()> {
        let (host, port) = split_address(address)?;
        let stream = TcpStream::connect((host.as_str(), port))?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream;

        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.trim_end() != "1" {
            return Err(NetError::Busy(address.to_string()));
        }
        writeln!(writer, "{} {} {}", tile.x, tile.y, tile.size)?;
        writer.flush()?;

        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(NetError::Disconnected);
            }
            let msg = line.trim_end();
            match msg.as_bytes().first() {
                None | Some(b'S') | Some(b'E') => {}
                Some(b'P') => {
                    let (x, y, color) = parse_pixel(&msg[1..], &tile)?;
                    lock(buffer).set(x, y, color);
                }
                Some(b'F') => return Ok(()),
                Some(_) => return Err(NetError::Protocol(msg.to_string())),
            }
        }
    }
}

/// A tile rendered by a remote server, fetched on a background thread.
pub struct NetRenderBlock {
    tile: Tile,
    buffer: Arc<Mutex<TileBuffer>>,
    finished: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<NetResult<()>>>,
    outcome: Option<BlockResult<()>>,
}

impl NetRenderBlock {
    pub fn start(tile: Tile, client: Arc<NetClient>) -> BlockResult<Self> {
        if !tile.size.is_power_of_two() {
            return Err(BlockError::TileSize(tile.size));
        }
        let buffer = Arc::new(Mutex::new(TileBuffer::new(tile, tile.size)?));
        let finished = Arc::new(AtomicBool::new(false));

        let worker_buffer = Arc::clone(&buffer);
        let worker_finished = Arc::clone(&finished);
        let worker = thread::Builder::new()
            .name(format!("spantrace-net-{}", tile.index))
            .spawn(move || {
                let result = client.fetch_with_retries(tile, &worker_buffer);
                worker_finished.store(true, Ordering::SeqCst);
                result
            })
            .map_err(|e| BlockError::Job(JobError::Spawn(e.to_string())))?;

        Ok(Self {
            tile,
            buffer,
            finished,
            worker: Some(worker),
            outcome: None,
        })
    }
}

impl BlockRenderer for NetRenderBlock {
    fn tile(&self) -> Tile {
        self.tile
    }

    fn done(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn copy_to_buffer(&self, image: &mut ImageBuffer) {
        lock(&self.buffer).copy_to(image);
    }

    fn finish(&mut self) -> BlockResult<()> {
        if let Some(worker) = self.worker.take() {
            let outcome = match worker.join() {
                Ok(result) => result.map_err(|e| BlockError::Remote(e.to_string())),
                Err(_) => Err(BlockError::Job(JobError::Panicked("network worker panicked".to_string()))),
            };
            if let Err(e) = &outcome {
                log::error!("Remote tile ({}, {}) failed: {}", self.tile.x, self.tile.y, e);
            }
            self.outcome = Some(outcome);
        }
        self.outcome.clone().unwrap_or(Ok(()))
    }
}

impl Drop for NetRenderBlock {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
