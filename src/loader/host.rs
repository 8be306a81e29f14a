//! Host context handed to every unit's setup and every service's initialize.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The application shell the loader is booting into.
///
/// Cheap to clone. Units that spawn their own tasks should watch
/// `shutdown` to stop cooperatively.
#[derive(Debug, Clone)]
pub struct Host {
    pub bot_name: String,
    /// Random per-process id, useful for correlating logs across restarts.
    pub boot_id: Uuid,
    pub shutdown: CancellationToken,
}

impl Host {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self::with_shutdown(bot_name, CancellationToken::new())
    }

    pub fn with_shutdown(bot_name: impl Into<String>, shutdown: CancellationToken) -> Self {
        Self { bot_name: bot_name.into(), boot_id: Uuid::new_v4(), shutdown }
    }
}
