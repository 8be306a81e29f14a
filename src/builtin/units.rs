//! Built-in units: `memory` and `chat`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::info;

use super::services::{CacheService, DatabaseService};
use crate::core::error::BoxError;
use crate::lifecycle::HookFuture;
use crate::loader::{Capability, Dependencies, Dependency, Host, Provider, Unit};

pub const SHORT_TERM_MEMORY: &str = "short_term_memory";

// ── Memory ────────────────────────────────────────────────────────────────────

/// Bounded FIFO of recent conversation lines.
#[derive(Debug)]
pub struct ShortTermMemory {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl ShortTermMemory {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, lines: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Owns the process-wide [`ShortTermMemory`] and provides it to siblings.
pub struct MemoryUnit {
    store: Arc<ShortTermMemory>,
}

impl MemoryUnit {
    pub const CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self { store: Arc::new(ShortTermMemory::new(Self::CAPACITY)) }
    }
}

impl Default for MemoryUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for MemoryUnit {
    fn provides(&self) -> Vec<String> {
        vec![SHORT_TERM_MEMORY.to_string()]
    }

    fn get(&self, capability: &str) -> Option<Capability> {
        (capability == SHORT_TERM_MEMORY).then(|| Arc::clone(&self.store) as Capability)
    }
}

impl Unit for MemoryUnit {
    fn name(&self) -> &str {
        "memory"
    }

    fn setup<'a>(&'a self, _host: &'a Host, _deps: Dependencies) -> HookFuture<'a, ()> {
        Box::pin(async {
            info!(capacity = self.store.capacity, "short-term memory ready");
            Ok(())
        })
    }

    fn teardown(&self) -> HookFuture<'_, ()> {
        Box::pin(async {
            self.store.clear();
            Ok(())
        })
    }

    fn provider(&self) -> Option<&dyn Provider> {
        Some(self)
    }
}

// ── Chat ──────────────────────────────────────────────────────────────────────

struct ChatDeps {
    bot_name: String,
    database: Arc<DatabaseService>,
    cache: Arc<CacheService>,
    memory: Arc<ShortTermMemory>,
}

/// Echo-style chat front end wired to the database, cache and memory.
#[derive(Default)]
pub struct ChatUnit {
    deps: OnceLock<ChatDeps>,
}

impl ChatUnit {
    pub const READY_KEY: &'static str = "chat:ready";

    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one message: remember it, log it, and cache the reply.
    pub fn handle(&self, message: &str) -> Result<String, BoxError> {
        let deps = self.deps.get().ok_or("chat is not set up")?;
        deps.memory.push(format!("user: {message}"));
        deps.database.execute("insert into messages")?;
        let reply = format!("[{}] {message}", deps.bot_name);
        deps.memory.push(format!("bot: {reply}"));
        deps.cache.set("chat:last_reply", reply.clone());
        Ok(reply)
    }
}

impl Unit for ChatUnit {
    fn name(&self) -> &str {
        "chat"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![
            Dependency::of::<DatabaseService>("database"),
            Dependency::of::<CacheService>("cache"),
            Dependency::of::<ShortTermMemory>(SHORT_TERM_MEMORY),
        ]
    }

    fn setup<'a>(&'a self, host: &'a Host, deps: Dependencies) -> HookFuture<'a, ()> {
        Box::pin(async move {
            let wired = ChatDeps {
                bot_name: host.bot_name.clone(),
                database: deps.require("database")?,
                cache: deps.require("cache")?,
                memory: deps.require(SHORT_TERM_MEMORY)?,
            };
            if self.deps.set(wired).is_err() {
                return Err("chat set up twice".into());
            }
            info!(bot = %host.bot_name, "chat wired");
            Ok(())
        })
    }

    fn start(&self) -> HookFuture<'_, ()> {
        Box::pin(async {
            let deps = self.deps.get().ok_or("chat is not set up")?;
            deps.cache.set(Self::READY_KEY, deps.bot_name.clone());
            deps.memory.push("bot: online");
            Ok(())
        })
    }

    fn teardown(&self) -> HookFuture<'_, ()> {
        Box::pin(async {
            if let Some(deps) = self.deps.get() {
                deps.cache.remove(Self::READY_KEY);
            }
            Ok(())
        })
    }
}

pub fn memory_unit() -> Box<dyn Unit> {
    Box::new(MemoryUnit::new())
}

pub fn chat_unit() -> Box<dyn Unit> {
    Box::new(ChatUnit::new())
}
