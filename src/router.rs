use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Result, anyhow};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::protocol::Message;

/// Identifies one session for the lifetime of the process. Ids are handed
/// out by [`RouterHandle::next_session_id`] and never reused.
pub type SessionId = u64;

/// Capacity of the event queue feeding the router. Senders are per-session
/// read loops; a full queue makes them wait, which slows only their own
/// session.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Lifetime cap on lines dropped for one session before the router evicts
/// it as unrecoverably stalled.
const MAX_LINE_DROPS: u64 = 100;

/// Everything a session can tell the router.
#[derive(Debug)]
pub enum SessionEvent {
    /// The session finished its handshake and can receive broadcasts.
    Joined {
        id: SessionId,
        name: String,
        outbound: mpsc::Sender<Arc<str>>,
    },
    /// The session read one line of chat text from its client.
    Line { id: SessionId, text: String },
    /// The session's connection ended; tear it down.
    Departed { id: SessionId },
}

/// Policy knobs for the router.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterConfig {
    /// Deliver a sender's chat lines back to itself. Off by default; the
    /// sender already sees what it typed.
    pub self_echo: bool,
}

/// Cloneable handle sessions use to reach the router.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    events: mpsc::Sender<SessionEvent>,
    next_id: Arc<AtomicU64>,
}

impl RouterHandle {
    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn send(&self, event: SessionEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| anyhow!("session router has shut down"))
    }
}

struct Member {
    name: String,
    outbound: mpsc::Sender<Arc<str>>,
    /// Lines this member never received because its queue was full.
    drops: u64,
}

/// The live session set. Owned exclusively by the router task, so membership
/// changes never need a lock.
struct Registry {
    members: HashMap<SessionId, Member>,
}

impl Registry {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
        }
    }

    fn insert(&mut self, id: SessionId, member: Member) {
        self.members.insert(id, member);
    }

    fn remove(&mut self, id: SessionId) -> Option<Member> {
        self.members.remove(&id)
    }

    fn name_of(&self, id: SessionId) -> Option<&str> {
        self.members.get(&id).map(|member| member.name.as_str())
    }

    fn len(&self) -> usize {
        self.members.len()
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (&SessionId, &mut Member)> {
        self.members.iter_mut()
    }
}

/// The single task that owns the registry and fans out every line.
pub struct Router {
    events: mpsc::Receiver<SessionEvent>,
    registry: Registry,
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig) -> (RouterHandle, Router) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let handle = RouterHandle {
            events: events_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let router = Router {
            events: events_rx,
            registry: Registry::new(),
            config,
        };
        (handle, router)
    }

    /// Number of currently registered sessions.
    pub fn member_count(&self) -> usize {
        self.registry.len()
    }

    /// Processes events until every handle, and with them every session, is
    /// gone.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.apply(event);
        }
        debug!("router stopped");
    }

    /// Applies one event. Deliberately synchronous: the fan-out path has no
    /// await point, so no client can ever make the router wait.
    fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Joined { id, name, outbound } => self.register(id, name, outbound),
            SessionEvent::Line { id, text } => self.route_line(id, text),
            SessionEvent::Departed { id } => self.remove_session(id),
        }
    }

    fn register(&mut self, id: SessionId, name: String, outbound: mpsc::Sender<Arc<str>>) {
        self.registry.insert(
            id,
            Member {
                name: name.clone(),
                outbound,
                drops: 0,
            },
        );
        debug!(id, name, members = self.registry.len(), "session registered");
        self.announce(Message::Joined { name }, Some(id));
    }

    fn route_line(&mut self, id: SessionId, text: String) {
        let Some(from) = self.registry.name_of(id).map(String::from) else {
            // Line from a session already torn down; nobody to attribute it to.
            debug!(id, "discarding line from unregistered session");
            return;
        };
        let exclude = if self.config.self_echo { None } else { Some(id) };
        self.announce(Message::Chat { from, text }, exclude);
    }

    /// Removes a session and tells everyone else. Safe to call repeatedly:
    /// only the call that actually removes the entry announces anything, and
    /// the departing session is excluded so it can never see its own notice.
    fn remove_session(&mut self, id: SessionId) {
        let Some(member) = self.registry.remove(id) else {
            return;
        };
        info!(
            id,
            name = %member.name,
            members = self.registry.len(),
            "session departed"
        );
        self.announce(Message::Left { name: member.name }, Some(id));
    }

    /// Renders `message` once and delivers it to every member except
    /// `exclude`, then tears down the members that turned out to be
    /// undeliverable. Those teardowns announce departures of their own; each
    /// one shrinks the registry, so the recursion through
    /// [`Self::remove_session`] always bottoms out.
    fn announce(&mut self, message: Message, exclude: Option<SessionId>) {
        let line: Arc<str> = message.to_string().into();
        let doomed = self.fan_out(&line, exclude);
        for id in doomed {
            self.remove_session(id);
        }
    }

    /// Best-effort delivery sweep. Never blocks; returns the members that
    /// can no longer be delivered to.
    fn fan_out(&mut self, line: &Arc<str>, exclude: Option<SessionId>) -> Vec<SessionId> {
        let mut doomed = Vec::new();
        for (&id, member) in self.registry.iter_mut() {
            if Some(id) == exclude {
                continue;
            }
            match member.outbound.try_send(Arc::clone(line)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    member.drops += 1;
                    warn!(
                        id,
                        name = %member.name,
                        drops = member.drops,
                        "outbound queue full, dropping line"
                    );
                    if member.drops >= MAX_LINE_DROPS {
                        doomed.push(id);
                    }
                }
                Err(TrySendError::Closed(_)) => doomed.push(id),
            }
        }
        doomed
    }
}
