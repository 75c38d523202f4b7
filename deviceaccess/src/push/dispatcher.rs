//! Backend-owned poll/distribute loop, one thread per interrupt source.

use super::domain::AsyncDomain;
use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// How long one wait iteration blocks before re-checking the stop flag.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Edge-counting interrupt line of a transport.
pub trait InterruptSource: Send + Sync {
    /// Waits up to `timeout` and returns the number of edges seen since the
    /// last clear. A zero timeout polls.
    fn wait_for_interrupt(&self, timeout: Duration) -> Result<u32>;

    /// Re-arms the line, forgetting latched edges.
    fn clear_interrupts(&self) -> Result<()>;
}

/// Owns the dispatcher thread of one interrupt source.
pub struct InterruptDispatcher {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl InterruptDispatcher {
    /// Spawns the loop. `ready_tx` fires exactly once, after stale edges have
    /// been swallowed, so the caller knows initial values polled afterwards
    /// cannot race a pre-subscription edge.
    pub fn spawn(
        interrupt: u32,
        source: Arc<dyn InterruptSource>,
        domain: Arc<AsyncDomain>,
        ready_tx: mpsc::Sender<()>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread = thread::Builder::new()
            .name(format!("irq-dispatch-{interrupt}"))
            .spawn(move || dispatch_loop(interrupt, &source, &domain, &stop_flag, ready_tx))
            .expect("spawning the interrupt dispatcher thread failed");
        InterruptDispatcher {
            stop,
            thread: Some(thread),
        }
    }

    /// Signals the loop to finish and joins it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for InterruptDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop(
    interrupt: u32,
    source: &Arc<dyn InterruptSource>,
    domain: &Arc<AsyncDomain>,
    stop: &AtomicBool,
    ready_tx: mpsc::Sender<()>,
) {
    log::debug!("interrupt {interrupt}: dispatcher started");

    // clear latched edges, poll once and re-clear to swallow stale ones
    let armed = source.clear_interrupts().and_then(|()| {
        if source.wait_for_interrupt(Duration::ZERO)? > 0 {
            source.clear_interrupts()?;
        }
        Ok(())
    });
    let _ = ready_tx.send(());
    if let Err(e) = armed {
        log::error!("interrupt {interrupt}: arming failed: {e}");
        domain.send_exception(e);
        return;
    }

    while !stop.load(Ordering::Acquire) {
        match source.wait_for_interrupt(WAIT_SLICE) {
            Ok(0) => {}
            Ok(edges) => {
                if edges > 1 {
                    log::debug!("interrupt {interrupt}: merged {} edges", edges - 1);
                }
                if let Err(e) = source.clear_interrupts() {
                    domain.send_exception(e);
                    break;
                }
                if let Err(e) = domain.distribute() {
                    log::error!("interrupt {interrupt}: distribution failed: {e}");
                    domain.send_exception(e);
                    break;
                }
            }
            Err(e) => {
                log::error!("interrupt {interrupt}: wait failed: {e}");
                domain.send_exception(e);
                break;
            }
        }
    }

    log::debug!("interrupt {interrupt}: dispatcher stopped");
}
