use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use rolecall_core::events::EventKind;
use rolecall_core::room::{CountdownTick, Room};

use crate::notifier::Notifier;
use crate::repository::RoomRepository;

struct CountdownTask {
    generation: u64,
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

type TaskMap = HashMap<String, CountdownTask>;

/// Owns one cancellable ticking task per room in `Countdown`.
///
/// Each tick decrements the stored room under the repository lock and then
/// publishes `countdown_update`. The tick that reaches zero also flips the
/// room to `Playing` and publishes `game_playing`, after which the task ends.
pub struct CountdownSynchronizer {
    repo: Arc<RoomRepository>,
    notifier: Notifier,
    tasks: Mutex<TaskMap>,
    generation: AtomicU64,
    tick: Duration,
}

impl CountdownSynchronizer {
    pub fn new(repo: Arc<RoomRepository>, notifier: Notifier, tick: Duration) -> Self {
        Self {
            repo,
            notifier,
            tasks: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            tick,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskMap> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start ticking a room. A task already running for the code is
    /// cancelled and replaced.
    pub fn spawn(self: &Arc<Self>, room_code: &str) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let this = Arc::clone(self);
        let code = room_code.to_string();
        let child = token.clone();

        // Hold the map lock across spawn so the task's own removal on exit
        // cannot run before it has been inserted.
        let mut tasks = self.lock();
        let handle = tokio::spawn(async move {
            this.run(&code, child).await;
            this.finished(&code, generation);
        });
        let task = CountdownTask {
            generation,
            token,
            _handle: handle,
        };
        if let Some(old) = tasks.insert(room_code.to_string(), task) {
            old.token.cancel();
        }
        tracing::info!(room = room_code, "Countdown started");
    }

    /// Stop a room's countdown. Returns false if none was running.
    pub fn cancel(&self, room_code: &str) -> bool {
        match self.lock().remove(room_code) {
            Some(task) => {
                task.token.cancel();
                tracing::info!(room = room_code, "Countdown cancelled");
                true
            },
            None => false,
        }
    }

    pub fn is_running(&self, room_code: &str) -> bool {
        self.lock().contains_key(room_code)
    }

    /// Cancel every running countdown.
    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, task) in drained {
            task.token.cancel();
        }
    }

    // Only the task that is still registered may remove its own entry; a
    // replaced or cancelled one leaves its successor alone.
    fn finished(&self, room_code: &str, generation: u64) {
        let mut tasks = self.lock();
        if tasks
            .get(room_code)
            .is_some_and(|t| t.generation == generation)
        {
            tasks.remove(room_code);
        }
    }

    async fn run(&self, room_code: &str, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => return,
                _ = ticker.tick() => {},
            }

            match self.repo.modify(room_code, Room::advance_countdown).await {
                Ok((CountdownTick::Remaining(remaining), _)) => {
                    self.notifier
                        .publish(room_code, EventKind::CountdownUpdate { remaining });
                },
                Ok((CountdownTick::Finished, _)) => {
                    self.notifier
                        .publish(room_code, EventKind::CountdownUpdate { remaining: 0 });
                    self.notifier.publish(room_code, EventKind::GamePlaying);
                    tracing::info!(room = room_code, "Countdown finished, game playing");
                    return;
                },
                Err(e) => {
                    // Room gone, or a late joiner already finished it.
                    tracing::debug!(room = room_code, error = %e, "Countdown stopped");
                    return;
                },
            }
        }
    }
}
