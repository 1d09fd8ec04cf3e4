//! Background delivery for the outbox.
//!
//! The dispatcher thread sleeps until [`EventOutbox::publish`] wakes it or
//! the idle interval passes, then flushes. Transport calls happen only
//! here (and in explicit flushes), never on the caller's thread.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::EventOutbox;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Longest sleep between flushes when nothing is published.
    pub idle_interval: Duration,
    /// Thread name, also used in logs.
    pub name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(250),
            name: "censudx-dispatcher".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct DispatcherHandle {
    stop: Arc<AtomicBool>,
    wake: SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Stop the thread after one last flush.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Blocking send: a wake already consumed by the loop must not hide this one.
        let _ = self.wake.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub struct OutboxDispatcher;

impl OutboxDispatcher {
    /// Spawn the dispatcher. An outbox takes at most one.
    pub fn spawn(outbox: Arc<EventOutbox>, config: DispatcherConfig) -> io::Result<DispatcherHandle> {
        let wake_rx = outbox
            .take_wake_receiver()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AlreadyExists, "outbox already has a dispatcher"))?;
        let wake = outbox.wake_sender();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || dispatch_loop(&outbox, &config, &wake_rx, &stop_flag))?;

        Ok(DispatcherHandle {
            stop,
            wake,
            join: Some(join),
        })
    }
}

fn dispatch_loop(outbox: &EventOutbox, config: &DispatcherConfig, wake: &Receiver<()>, stop: &AtomicBool) {
    info!(
        dispatcher = %config.name,
        idle_ms = config.idle_interval.as_millis() as u64,
        "outbox dispatcher started"
    );

    loop {
        match wake.recv_timeout(config.idle_interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let report = outbox.flush();
        if report.remaining > 0 {
            debug!(dispatcher = %config.name, remaining = report.remaining, "events still buffered");
        }
    }

    let report = outbox.flush();
    info!(
        dispatcher = %config.name,
        delivered = report.delivered,
        remaining = report.remaining,
        "outbox dispatcher stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{OutboxConfig, RetryPolicy};
    use censudx_core::{Location, ProductId};
    use censudx_events::{RecordingTransport, StockValidation};
    use chrono::Utc;
    use std::time::Instant;

    fn validation(product: &str) -> StockValidation {
        StockValidation {
            product_id: ProductId::parse(product).unwrap(),
            location: Location::parse("warehouse_a").unwrap(),
            requested_quantity: 1,
            available_quantity: 10,
            order_id: None,
            validation_result: true,
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            idle_interval: Duration::from_millis(20),
            name: "test-dispatcher".to_string(),
        }
    }

    #[test]
    fn delivers_published_events_in_the_background() {
        let transport = Arc::new(RecordingTransport::new());
        let outbox = Arc::new(EventOutbox::new(transport.clone(), OutboxConfig::default()));
        let handle = OutboxDispatcher::spawn(outbox.clone(), config()).unwrap();

        for product in ["a", "b", "a"] {
            outbox.publish(validation(product), Utc::now());
        }

        assert!(wait_for(|| transport.sent().len() == 3));
        handle.shutdown();
        assert_eq!(outbox.stats().published, 3);
    }

    #[test]
    fn redelivers_after_the_broker_returns() {
        let transport = Arc::new(RecordingTransport::new());
        let outbox = Arc::new(EventOutbox::new(
            transport.clone(),
            OutboxConfig {
                capacity: 16,
                retry: RetryPolicy::fixed(1, Duration::from_millis(10)),
            },
        ));
        transport.set_available(false);
        let handle = OutboxDispatcher::spawn(outbox.clone(), config()).unwrap();

        outbox.publish(validation("a"), Utc::now());
        assert!(wait_for(|| transport.rejected_count() >= 3));
        assert_eq!(outbox.stats().dead_lettered, 0);

        transport.set_available(true);
        assert!(wait_for(|| transport.sent().len() == 1));
        handle.shutdown();
    }

    #[test]
    fn one_dispatcher_per_outbox() {
        let outbox = Arc::new(EventOutbox::new(
            Arc::new(RecordingTransport::new()),
            OutboxConfig::default(),
        ));
        let first = OutboxDispatcher::spawn(outbox.clone(), config()).unwrap();

        let err = OutboxDispatcher::spawn(outbox.clone(), config()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        first.shutdown();
    }

    #[test]
    fn shutdown_flushes_what_is_left() {
        let transport = Arc::new(RecordingTransport::new());
        let outbox = Arc::new(EventOutbox::new(transport.clone(), OutboxConfig::default()));
        let handle = OutboxDispatcher::spawn(
            outbox.clone(),
            DispatcherConfig {
                idle_interval: Duration::from_secs(3600),
                name: "test-dispatcher".to_string(),
            },
        )
        .unwrap();

        outbox.publish(validation("a"), Utc::now());
        handle.shutdown();
        assert_eq!(transport.sent().len(), 1);
    }
}
