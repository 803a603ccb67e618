//! ZMQ PUB transport sink.
//!
//! Each sink owns one worker thread with a blocking PUB socket. The frame
//! loop hands completed stores through a bounded queue; when a slow consumer
//! fills it, the oldest queued frame is dropped so the loop never stalls and
//! subscribers always converge on the freshest data.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use optitact_config::SinkConfig;
use optitact_serialization::{encode_packet, WireType};
use optitact_structures::FieldStore;

use crate::error::{TransportError, TransportResult};

/// Parses and validates the ordered field schema of one sink entry.
pub fn parse_schema(config: &SinkConfig) -> TransportResult<Vec<(String, WireType)>> {
    if config.fields.is_empty() {
        return Err(TransportError::BadSchema(format!(
            "Sink '{}' declares no fields", config.address
        )));
    }
    config
        .fields
        .iter()
        .map(|field| {
            let wire_type = WireType::from_str(&field.wire_type)
                .map_err(|e| TransportError::BadSchema(e.to_string()))?;
            Ok((field.name.clone(), wire_type))
        })
        .collect()
}

pub struct TransportSink {
    address: String,
    sender: Option<Sender<Arc<FieldStore>>>,
    /// Consumer-side handle used to evict the oldest frame on overflow
    receiver: Receiver<Arc<FieldStore>>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl TransportSink {
    /// Binds the PUB socket and starts the worker. A bind failure surfaces
    /// here, not on the first publish.
    pub fn start(config: &SinkConfig) -> TransportResult<Self> {
        let schema = parse_schema(config)?;
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = bounded::<Arc<FieldStore>>(capacity);
        let (ready_tx, ready_rx) = bounded::<TransportResult<()>>(1);

        let address = config.address.clone();
        let worker_address = address.clone();
        let worker_receiver = receiver.clone();
        let worker = std::thread::Builder::new()
            .name(format!("optitact-sink-{}", address))
            .spawn(move || {
                run_worker(worker_address, schema, worker_receiver, ready_tx);
            })
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(TransportError::NotRunning);
            }
        }

        info!(address = %address, queue_capacity = capacity, "Transport sink started");
        Ok(TransportSink {
            address,
            sender: Some(sender),
            receiver,
            dropped: Arc::new(AtomicU64::new(0)),
            worker: Some(worker),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queues a completed frame without blocking. Under backpressure the
    /// oldest queued frame is evicted in its favor.
    pub fn publish(&self, frame: Arc<FieldStore>) -> TransportResult<()> {
        let sender = self.sender.as_ref().ok_or(TransportError::NotRunning)?;
        match sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::NotRunning),
            Err(TrySendError::Full(frame)) => {
                if self.receiver.try_recv().is_ok() {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(address = %self.address, total_dropped = total, "Sink queue full, dropped oldest frame");
                }
                sender
                    .try_send(frame)
                    .map_err(|_| TransportError::SendFailed("Queue refused the frame twice".into()))
            }
        }
    }
}

impl Drop for TransportSink {
    fn drop(&mut self) {
        // Disconnect the channel so the worker's recv loop terminates
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(
    address: String,
    schema: Vec<(String, WireType)>,
    receiver: Receiver<Arc<FieldStore>>,
    ready: Sender<TransportResult<()>>,
) {
    let context = zmq::Context::new();
    let socket = match open_socket(&context, &address) {
        Ok(socket) => {
            let _ = ready.send(Ok(()));
            socket
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Ok(frame) = receiver.recv() {
        let bytes = match encode_packet(&frame, &schema) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Startup frames may not carry the full schema yet
                debug!(address = %address, error = %e, "Frame not encodable, skipped");
                continue;
            }
        };
        if let Err(e) = socket.send(&bytes, 0) {
            warn!(address = %address, error = %e, "Publish failed");
        }
    }
    debug!(address = %address, "Sink worker stopped");
}

fn open_socket(context: &zmq::Context, address: &str) -> TransportResult<zmq::Socket> {
    let socket = context.socket(zmq::PUB)?;
    socket.set_linger(0)?;
    socket.set_sndhwm(4)?;
    socket
        .bind(address)
        .map_err(|e| TransportError::BindFailed { address: address.to_string(), reason: e.to_string() })?;
    Ok(socket)
}
