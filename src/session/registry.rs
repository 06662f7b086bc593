//! Connection registry: starts and stops the cycles as clients come and go.
//!
//! - connect from 0 → fresh broadcast loop, plus any monitor not alive
//! - connect while > 0 → restart the broadcast loop only if it has exited
//! - disconnect to 0 → cancel the broadcast loop, clear recording; monitors keep running
//!
//! Liveness is checked with [`TaskHandle::is_running`], so a loop that
//! faulted or panicked is detected and replaced.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{SessionSnapshot, SessionState, TaskHandle};
use crate::background::{lifetime, notifier, overheat};
use crate::pipeline::{BroadcastLoop, ServerEvent};
use crate::sensors::SensorSet;
use crate::storage::SensorStore;

/// Everything a cycle needs to run.
#[derive(Clone)]
pub struct CycleContext {
    pub sensors: SensorSet,
    pub store: Arc<dyn SensorStore>,
    pub events: broadcast::Sender<ServerEvent>,
    /// Process-wide shutdown; every cycle token is a child of it.
    pub shutdown: CancellationToken,
}

#[derive(Default)]
struct Tasks {
    connections: usize,
    broadcast: Option<TaskHandle>,
    lifetime: Option<TaskHandle>,
    overheat: Option<TaskHandle>,
    notifier: Option<TaskHandle>,
}

pub struct ConnectionRegistry {
    ctx: CycleContext,
    session: Arc<SessionState>,
    tasks: Mutex<Tasks>,
}

impl ConnectionRegistry {
    pub fn new(ctx: CycleContext, session: Arc<SessionState>) -> Self {
        Self {
            ctx,
            session,
            tasks: Mutex::new(Tasks::default()),
        }
    }

    pub const fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn events(&self) -> &broadcast::Sender<ServerEvent> {
        &self.ctx.events
    }

    // Counters stay consistent even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a client. Returns the new connection count.
    pub fn connect(&self) -> usize {
        let mut tasks = self.lock();
        tasks.connections += 1;
        let count = tasks.connections;
        self.session.set_connections(count);

        let restart = match &tasks.broadcast {
            Some(handle) if count == 1 && handle.is_running() => {
                // Previous run is still finishing its last window after the
                // final disconnect.
                warn!("[Registry] Aborting stale broadcast loop");
                handle.abort();
                true
            }
            Some(handle) => !handle.is_running(),
            None => true,
        };
        if restart {
            tasks.broadcast = Some(self.spawn_broadcast());
        }

        self.ensure_monitors(&mut tasks);
        info!(connections = count, "[Registry] Client connected");
        count
    }

    /// Deregister a client. Returns the new connection count.
    pub fn disconnect(&self) -> usize {
        let mut tasks = self.lock();
        if tasks.connections == 0 {
            warn!("[Registry] Disconnect without a registered connection ignored");
            return 0;
        }
        tasks.connections -= 1;
        let count = tasks.connections;
        self.session.set_connections(count);

        if count == 0 {
            if let Some(handle) = &tasks.broadcast {
                handle.cancel();
            }
            self.session.set_recording(false);
            info!("[Registry] Last client left, broadcast loop stopping");
        } else {
            info!(connections = count, "[Registry] Client disconnected");
        }
        count
    }

    pub fn set_recording(&self, recording: bool) {
        self.session.set_recording(recording);
        info!(recording, "[Registry] Recording toggled");
    }

    pub fn broadcast_running(&self) -> bool {
        self.lock().broadcast.as_ref().is_some_and(TaskHandle::is_running)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let tasks = self.lock();
        let monitors_running = [&tasks.lifetime, &tasks.overheat, &tasks.notifier]
            .into_iter()
            .filter(|h| h.as_ref().is_some_and(TaskHandle::is_running))
            .count();
        SessionSnapshot {
            connections: tasks.connections,
            recording: self.session.is_recording(),
            broadcast_running: tasks.broadcast.as_ref().is_some_and(TaskHandle::is_running),
            monitors_running,
            loop_starts: self.session.loop_starts(),
            cycles: self.session.cycles(),
        }
    }

    /// Cancel every cycle (process shutdown).
    pub fn shutdown(&self) {
        let tasks = self.lock();
        for handle in [&tasks.broadcast, &tasks.lifetime, &tasks.overheat, &tasks.notifier]
            .into_iter()
            .flatten()
        {
            handle.cancel();
        }
    }

    fn spawn_broadcast(&self) -> TaskHandle {
        self.session.record_loop_start();
        let ctx = self.ctx.clone();
        let session = Arc::clone(&self.session);
        TaskHandle::spawn("broadcast", self.ctx.shutdown.child_token(), move |token| async move {
            BroadcastLoop::new(ctx.sensors, ctx.store, ctx.events, session, token)
                .run()
                .await;
        })
    }

    fn ensure_monitors(&self, tasks: &mut Tasks) {
        let alive = |slot: &Option<TaskHandle>| slot.as_ref().is_some_and(TaskHandle::is_running);

        if !alive(&tasks.lifetime) {
            let (sensors, store) = (self.ctx.sensors.clone(), Arc::clone(&self.ctx.store));
            tasks.lifetime = Some(TaskHandle::spawn("lifetime", self.ctx.shutdown.child_token(), |token| {
                lifetime::run(sensors, store, token)
            }));
        }
        if !alive(&tasks.overheat) {
            let (sensors, store) = (self.ctx.sensors.clone(), Arc::clone(&self.ctx.store));
            tasks.overheat = Some(TaskHandle::spawn("overheat", self.ctx.shutdown.child_token(), |token| {
                overheat::run(sensors, store, token)
            }));
        }
        if !alive(&tasks.notifier) {
            let (store, events) = (Arc::clone(&self.ctx.store), self.ctx.events.clone());
            tasks.notifier = Some(TaskHandle::spawn("notifier", self.ctx.shutdown.child_token(), |token| {
                notifier::run(store, events, token)
            }));
        }
    }
}
