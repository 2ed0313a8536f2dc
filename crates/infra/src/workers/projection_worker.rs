use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use stockledger_core::TenantId;
use stockledger_events::{EventBus, Subscription, TenantScoped};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request shutdown and wait for the worker to stop.
    ///
    /// Messages already buffered in the subscription are handled first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Feeds every message of a bus subscription into a handler on its own thread.
///
/// Handlers must be idempotent: delivery is at-least-once.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Subscribe now and spawn the consumer thread.
    ///
    /// `tenant_id`, when given, drops messages of every other tenant.
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: TenantScoped + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, tenant_id, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    handler: &mut H,
) where
    M: TenantScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(50);
    let mut handle = |msg: M| {
        if tenant_id.is_some_and(|t| !msg.belongs_to(t)) {
            return;
        }
        if let Err(err) = handler(msg) {
            warn!(worker = name, error = ?err, "projection worker handler failed");
        }
    };

    loop {
        if shutdown_rx.try_recv().is_ok() {
            for msg in sub.drain() {
                handle(msg);
            }
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => handle(msg),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use stockledger_events::InMemoryEventBus;

    #[derive(Debug, Clone)]
    struct Tagged(TenantId, u32);

    impl TenantScoped for Tagged {
        fn tenant_id(&self) -> TenantId {
            self.0
        }
    }

    #[test]
    fn worker_filters_tenant_and_drains_on_shutdown() {
        let bus = InMemoryEventBus::<Tagged>::new();
        let mine = TenantId::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let worker = ProjectionWorker::spawn("test-worker", &bus, Some(mine), move |m: Tagged| {
            sink.lock().map(|mut s| s.push(m.1)).map_err(|_| "poisoned")
        })
        .unwrap();

        bus.publish(Tagged(mine, 1)).unwrap();
        bus.publish(Tagged(TenantId::new(), 2)).unwrap();
        bus.publish(Tagged(mine, 3)).unwrap();
        worker.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
    }
}
