//! Control surface of the bus driver.
//!
//! A [`Driver`] owns the worker thread that runs the [`Bus`] state machine.
//! The application talks to the bus through the two [`PacketQueue`]s handed out
//! by [`Driver::queues`] and observes it through [`Driver::statistics`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use snafu::{ensure, ResultExt, Snafu};

use crate::bus::Bus;
use crate::logging::{clamp_to_logger, default_mask, LogFilter, LogMask};
use crate::queue::{self, PacketQueue, RX_QUEUE_NAME, TX_QUEUE_NAME};
use crate::serial::SerialTransport;
use crate::stats::{Statistics, Stats};
use crate::transport::Transport;
use crate::types::Address;
use crate::CLIENT_ID;

/// Error type for this module
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not open {}: {}", port, source))]
    OpenPort {
        port: String,
        source: serialport::Error,
    },
    #[snafu(display("Could not configure the terminal: {}", source))]
    Termios { source: nix::Error },
    #[snafu(display("Could not create queue: {}", source))]
    Queue { source: queue::Error },
    #[snafu(display("Could not start the worker thread: {}", source))]
    SpawnWorker { source: io::Error },
    #[snafu(display("The driver is already running"))]
    AlreadyRunning,
    #[snafu(display("The driver is not running"))]
    NotRunning,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    /// Our own address on the bus.
    pub client_id: Address,
    pub log_mask: LogMask,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: CLIENT_ID,
            log_mask: default_mask(),
        }
    }
}

/// State shared between the worker and the controlling thread.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub stats: Stats,
    pub log: LogFilter,
    pub running: AtomicBool,
    pub stop: AtomicBool,
}

/// Clears the running flag when the worker ends, however it ends.
struct RunningGuard(Arc<Shared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Requests the worker to stop from anywhere, e.g. a signal handler.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<Shared>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.stop.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct Driver {
    config: Config,
    shared: Arc<Shared>,
    queues: Option<(PacketQueue, PacketQueue)>,
    worker: Option<JoinHandle<()>>,
}

impl Driver {
    pub fn new(config: Config) -> Self {
        let shared = Shared {
            log: LogFilter::new(config.log_mask),
            ..Default::default()
        };
        Self {
            config,
            shared: Arc::new(shared),
            queues: None,
            worker: None,
        }
    }

    /// Open the tty at `port` and start the worker on it.
    pub fn start(&mut self, port: &str) -> Result<(), Error> {
        ensure!(!self.is_running(), AlreadyRunningSnafu);
        let transport = SerialTransport::open(port)?;
        self.start_with(transport)
    }

    /// Start the worker on an already opened transport.
    pub fn start_with<T>(&mut self, transport: T) -> Result<(), Error>
    where
        T: Transport + Send + 'static,
    {
        ensure!(!self.is_running(), AlreadyRunningSnafu);
        self.join();

        let outbound = PacketQueue::open(TX_QUEUE_NAME).context(QueueSnafu)?;
        let inbound = PacketQueue::open(RX_QUEUE_NAME).context(QueueSnafu)?;
        let mut bus = Bus::new(
            self.config.client_id,
            transport,
            outbound.clone(),
            inbound.clone(),
            self.shared.clone(),
        );

        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);
        // dropped with the closure if the thread can't be spawned
        let guard = RunningGuard(self.shared.clone());
        let shared = self.shared.clone();
        let worker = thread::Builder::new()
            .name("ems-bus".into())
            .spawn(move || {
                let _running = guard;
                bus_log!(
                    shared.log,
                    Info,
                    "Serving the bus as {}",
                    bus.context().client_id()
                );
                bus.run(&shared.stop);
                bus_log!(shared.log, Info, "Bus worker stopped");
            })
            .context(SpawnWorkerSnafu)?;

        self.queues = Some((outbound, inbound));
        self.worker = Some(worker);
        Ok(())
    }

    /// Ask the worker to stop. It exits within one read poll interval.
    pub fn stop(&self) -> Result<(), Error> {
        ensure!(self.is_running(), NotRunningSnafu);
        self.shared.stop.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Wait for the worker to exit.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Bus worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.shared.clone())
    }

    /// The (outbound, inbound) queues of the last start.
    pub fn queues(&self) -> Option<(PacketQueue, PacketQueue)> {
        self.queues.clone()
    }

    pub fn statistics(&self) -> Statistics {
        self.shared
            .stats
            .snapshot(self.shared.log.mask(), self.is_running())
    }

    pub fn log_mask(&self) -> LogMask {
        self.shared.log.mask()
    }

    /// Change the log mask, returning the categories that will actually be logged.
    pub fn set_log_mask(&self, mask: LogMask) -> LogMask {
        let effective = clamp_to_logger(mask);
        self.shared.log.set_mask(effective);
        effective
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.join();
    }
}
