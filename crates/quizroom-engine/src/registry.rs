//! Registry of live games, keyed by join code and by id.
//!
//! The maps are only locked for a single lookup or insert. A game's own lock
//! is never taken while a map shard is held.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use quizroom_core::ids::{GameId, JoinCode};
use quizroom_core::{EndReason, GameError, GameEvent, QuizTemplate};

use crate::room::{GameHandle, GameRoom};
use crate::session::{GameConfig, GameSession};

pub const DEFAULT_CODE_LENGTH: usize = 6;
pub const DEFAULT_MAX_CODE_ATTEMPTS: usize = 1000;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_HOST_GRACE: Duration = Duration::from_secs(60);
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Digits per join code.
    pub code_length: usize,
    pub max_code_attempts: usize,
    /// A game with no inbound activity for this long is destroyed.
    pub idle_timeout: Duration,
    /// How long a game survives without an attached host.
    pub host_grace: Duration,
    pub reap_interval: Duration,
    pub game: GameConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            code_length: DEFAULT_CODE_LENGTH,
            max_code_attempts: DEFAULT_MAX_CODE_ATTEMPTS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            host_grace: DEFAULT_HOST_GRACE,
            reap_interval: DEFAULT_REAP_INTERVAL,
            game: GameConfig::default(),
        }
    }
}

type CodeGenerator = Box<dyn Fn() -> JoinCode + Send + Sync>;

fn random_digits(len: usize) -> JoinCode {
    let mut rng = rand::thread_rng();
    let code: String = (0..len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect();
    JoinCode::from_raw(code)
}

pub struct SessionRegistry {
    config: RegistryConfig,
    by_code: DashMap<JoinCode, Arc<GameHandle>>,
    by_id: DashMap<GameId, Arc<GameHandle>>,
    generate: CodeGenerator,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let len = config.code_length.max(1);
        Self::with_generator(config, move || random_digits(len))
    }

    /// Use a custom join code source.
    pub fn with_generator(
        config: RegistryConfig,
        generate: impl Fn() -> JoinCode + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            by_code: DashMap::new(),
            by_id: DashMap::new(),
            generate: Box::new(generate),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Allocate a game with a join code no other active game holds.
    /// A taken code is retried; the insert itself is the uniqueness check.
    #[instrument(skip(self, quiz), fields(quiz_id = %quiz.id))]
    pub fn create_session(
        &self,
        quiz: Arc<QuizTemplate>,
        host_user: &str,
    ) -> Result<Arc<GameHandle>, GameError> {
        let attempts = self.config.max_code_attempts.max(1);
        for attempt in 1..=attempts {
            let code = (self.generate)();
            let Entry::Vacant(slot) = self.by_code.entry(code.clone()) else {
                debug!(attempt, "join code collision");
                continue;
            };

            let session = GameSession::new(
                GameId::new(),
                code,
                Arc::clone(&quiz),
                self.config.game.clone(),
            );
            let handle = Arc::new(GameHandle::new(GameRoom::new(session, host_user.to_string())));
            slot.insert(Arc::clone(&handle));
            self.by_id.insert(handle.id().clone(), Arc::clone(&handle));

            info!(game_id = %handle.id(), join_code = %handle.code(), "game created");
            return Ok(handle);
        }
        Err(GameError::CodesExhausted { attempts })
    }

    pub fn resolve(&self, code: &JoinCode) -> Result<Arc<GameHandle>, GameError> {
        self.by_code
            .get(code)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| GameError::NotFound(format!("join code {code}")))
    }

    pub fn get(&self, id: &GameId) -> Result<Arc<GameHandle>, GameError> {
        self.by_id
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| GameError::NotFound(format!("game {id}")))
    }

    /// Remove a game and close every connection attached to it. The code is
    /// free for reuse as soon as this returns.
    #[instrument(skip(self), fields(game_id = %id))]
    pub fn destroy(&self, id: &GameId, reason: EndReason) -> Result<(), GameError> {
        let (_, handle) = self
            .by_id
            .remove(id)
            .ok_or_else(|| GameError::NotFound(format!("game {id}")))?;
        self.by_code
            .remove_if(handle.code(), |_, existing| existing.id() == id);

        let mut room = handle.lock();
        room.closed = true;
        room.hub.close_all(GameEvent::GameEnded { reason });
        info!(join_code = %handle.code(), ?reason, "game destroyed");
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn handles(&self) -> Vec<Arc<GameHandle>> {
        self.by_id.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Destroy games that went idle or lost their host for too long.
    /// Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<(GameId, EndReason)> = self
            .handles()
            .into_iter()
            .filter_map(|handle| {
                let room = handle.lock();
                if room.idle_for(now) >= self.config.idle_timeout {
                    Some((handle.id().clone(), EndReason::IdleTimeout))
                } else if room
                    .host
                    .vacant_for(now)
                    .is_some_and(|vacant| vacant >= self.config.host_grace)
                {
                    Some((handle.id().clone(), EndReason::HostAbandoned))
                } else {
                    None
                }
            })
            .collect();

        expired
            .into_iter()
            .filter(|(id, reason)| self.destroy(id, *reason).is_ok())
            .count()
    }
}

/// Periodically destroy expired games.
pub fn start_reaper(registry: Arc<SessionRegistry>) -> tokio::task::JoinHandle<()> {
    let interval = registry.config.reap_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.sweep(Instant::now());
            if removed > 0 {
                info!(removed, "expired games reaped");
            }
        }
    })
}
