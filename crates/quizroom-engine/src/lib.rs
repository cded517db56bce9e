//! Game engine: quiz catalog, per-game state machine, connection fan-out,
//! the registry of live games, and the orchestrator the transport calls.

pub mod catalog;
pub mod hub;
pub mod orchestrator;
pub mod registry;
pub mod room;
pub mod session;

pub use catalog::{demo_quiz, QuizCatalog};
pub use hub::{ChannelHub, ConnectionHandle, Dropped, TransportError};
pub use orchestrator::{
    CreatedGame, GameOrchestrator, GameSummary, HostAction, JoinedGame, SessionOrchestrator,
};
pub use registry::{start_reaper, RegistryConfig, SessionRegistry};
pub use room::{GameHandle, GameRoom, HostSeat};
pub use session::{GameConfig, GameSession, Participant};
