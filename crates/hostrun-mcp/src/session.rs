//! Session manager. Maps session ids to live MCP server connections.
//!
//! Each [`ManagedSession`] exclusively owns one subprocess and the client bound
//! to its stdio. The session map lock is only held to look up, insert or
//! remove entries. Create and stop are serialized per session by a lifecycle
//! lock; tool calls run concurrently and are tracked by an in-flight count so
//! idle reclamation never interrupts a busy session.

use crate::cache::ToolCache;
use crate::client::{ClientTimeouts, McpClient, ServerInfo, ToolDescriptor, ToolResult};
use crate::config::{Fingerprint, ServerConfig};
use crate::error::McpError;
use crate::process::{Platform, ProcessHandle};
use crate::settings::SessionSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Lifecycle of a managed session.
///
/// `Creating → Ready ⇄ Busy → Stopping → Stopped`, with `Failed` reachable
/// from any live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Creating,
    Ready,
    Busy,
    Stopping,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Creating => "CREATING",
            SessionState::Ready => "READY",
            SessionState::Busy => "BUSY",
            SessionState::Stopping => "STOPPING",
            SessionState::Stopped => "STOPPED",
            SessionState::Failed => "FAILED",
        }
    }

    /// Creating, ready or busy.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Creating | SessionState::Ready | SessionState::Busy
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionState,
    pub server_name: String,
    pub fingerprint: Fingerprint,
    pub idle_seconds: u64,
    pub in_flight: usize,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub pid: Option<u32>,
    pub tool_count: Option<usize>,
    pub server_info: Option<ServerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Entry in the active-session listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub server_name: String,
    pub state: SessionState,
    pub fingerprint: Fingerprint,
    pub idle_seconds: u64,
    pub last_used: DateTime<Utc>,
    pub tool_count: Option<usize>,
}

/// Result of [`SessionManager::discover`].
#[derive(Debug, Clone, Serialize)]
pub struct Discovery {
    pub tools: Vec<ToolDescriptor>,
    pub server_info: Option<ServerInfo>,
    /// Whether the tool cache answered instead of the server.
    pub cached: bool,
}

/// Counters reported by [`SessionManager::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub active_sessions: usize,
    pub busy_sessions: usize,
    pub failed_sessions: usize,
    pub cached_fingerprints: usize,
    pub cache_enabled: bool,
    pub auto_cleanup: bool,
    pub platform: &'static str,
}

/// What one cleanup pass reclaimed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub idle_stopped: Vec<String>,
    pub failed_stopped: Vec<String>,
    /// Sessions left mid-stop by a cancelled caller.
    pub interrupted_stopped: Vec<String>,
    pub tombstones_pruned: usize,
    pub cache_purged: usize,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.idle_stopped.is_empty()
            && self.failed_stopped.is_empty()
            && self.interrupted_stopped.is_empty()
            && self.tombstones_pruned == 0
            && self.cache_purged == 0
    }
}

struct Runtime {
    state: SessionState,
    last_activity: Instant,
    last_used: DateTime<Utc>,
    in_flight: usize,
    pid: Option<u32>,
    failure: Option<String>,
    failed_at: Option<Instant>,
    tools: Option<Arc<Vec<ToolDescriptor>>>,
    server_info: Option<ServerInfo>,
}

impl Runtime {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_used = Utc::now();
    }
}

struct Link {
    client: Arc<McpClient>,
    process: ProcessHandle,
}

/// One session: a subprocess, the client on its stdio, and bookkeeping.
pub struct ManagedSession {
    id: String,
    config: ServerConfig,
    fingerprint: Fingerprint,
    created_at: DateTime<Utc>,
    /// Held for the whole of create and stop.
    lifecycle: Arc<Mutex<()>>,
    runtime: parking_lot::Mutex<Runtime>,
    link: Mutex<Option<Link>>,
}

impl ManagedSession {
    fn new(id: &str, config: &ServerConfig) -> Self {
        Self {
            id: id.to_string(),
            config: config.clone(),
            fingerprint: config.fingerprint(),
            created_at: Utc::now(),
            lifecycle: Arc::new(Mutex::new(())),
            runtime: parking_lot::Mutex::new(Runtime {
                state: SessionState::Creating,
                last_activity: Instant::now(),
                last_used: Utc::now(),
                in_flight: 0,
                pid: None,
                failure: None,
                failed_at: None,
                tools: None,
                server_info: None,
            }),
            link: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn state(&self) -> SessionState {
        self.runtime.lock().state
    }

    fn status(&self) -> SessionStatus {
        let rt = self.runtime.lock();
        SessionStatus {
            session_id: self.id.clone(),
            state: rt.state,
            server_name: self.config.name.clone(),
            fingerprint: self.fingerprint.clone(),
            idle_seconds: rt.last_activity.elapsed().as_secs(),
            in_flight: rt.in_flight,
            created_at: self.created_at,
            last_used: rt.last_used,
            pid: rt.pid,
            tool_count: rt.tools.as_ref().map(|t| t.len()),
            server_info: rt.server_info.clone(),
            failure: rt.failure.clone(),
            stopped_at: None,
        }
    }

    fn summary(&self) -> SessionSummary {
        let rt = self.runtime.lock();
        SessionSummary {
            session_id: self.id.clone(),
            server_name: self.config.name.clone(),
            state: rt.state,
            fingerprint: self.fingerprint.clone(),
            idle_seconds: rt.last_activity.elapsed().as_secs(),
            last_used: rt.last_used,
            tool_count: rt.tools.as_ref().map(|t| t.len()),
        }
    }

    fn failed_error(&self) -> McpError {
        let reason = self
            .runtime
            .lock()
            .failure
            .clone()
            .unwrap_or_else(|| "unknown failure".to_string());
        McpError::SessionFailed {
            session_id: self.id.clone(),
            reason,
        }
    }

    /// Move a live session to `Failed`. Returns false if it was not live.
    fn mark_failed(&self, reason: String) -> bool {
        let mut rt = self.runtime.lock();
        if !rt.state.is_live() {
            return false;
        }
        rt.state = SessionState::Failed;
        rt.failure = Some(reason);
        rt.failed_at = Some(Instant::now());
        true
    }

    fn record_tools(&self, tools: Arc<Vec<ToolDescriptor>>) {
        self.runtime.lock().tools = Some(tools);
    }

    fn known_tools(&self) -> Option<Arc<Vec<ToolDescriptor>>> {
        self.runtime.lock().tools.clone()
    }

    fn server_info(&self) -> Option<ServerInfo> {
        self.runtime.lock().server_info.clone()
    }

    /// Start a tool call if the session accepts work.
    fn begin_call(self: &Arc<Self>) -> Result<CallGuard, SessionState> {
        let mut rt = self.runtime.lock();
        match rt.state {
            SessionState::Ready | SessionState::Busy => {
                rt.in_flight += 1;
                rt.state = SessionState::Busy;
                rt.touch();
                Ok(CallGuard {
                    session: Arc::clone(self),
                })
            }
            other => Err(other),
        }
    }

    async fn client(&self) -> Option<Arc<McpClient>> {
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| Arc::clone(&link.client))
    }

    /// Close the client and terminate the process. Safe to repeat.
    async fn teardown(&self, grace: Duration) {
        let mut link = self.link.lock().await;
        if let Some(Link {
            client,
            mut process,
        }) = link.take()
        {
            client.close().await;
            let status = process.terminate(grace).await;
            tracing::debug!(session_id = %self.id, ?status, "Session resources released");
        }
    }
}

/// Marks a session busy while alive.
struct CallGuard {
    session: Arc<ManagedSession>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let mut rt = self.session.runtime.lock();
        rt.in_flight = rt.in_flight.saturating_sub(1);
        if rt.in_flight == 0 && rt.state == SessionState::Busy {
            rt.state = SessionState::Ready;
        }
        rt.touch();
    }
}

/// A session checked out for one operation.
struct Checkout {
    session: Arc<ManagedSession>,
    client: Arc<McpClient>,
    _call: CallGuard,
}

/// Final status of a stopped session, kept so `status` can report it.
struct Tombstone {
    status: SessionStatus,
    last_activity: Instant,
    stopped: Instant,
}

/// Why a cleanup pass is stopping a session.
enum Reclaim {
    Idle,
    Failed,
    /// Stuck in `Stopping` or `Stopped` with nobody holding its lifecycle lock.
    Interrupted(OwnedMutexGuard<()>),
}

/// Owner of every MCP server session.
pub struct SessionManager {
    settings: SessionSettings,
    sessions: Mutex<HashMap<String, Arc<ManagedSession>>>,
    tombstones: parking_lot::Mutex<HashMap<String, Tombstone>>,
    cache: ToolCache,
}

impl SessionManager {
    pub fn new(settings: SessionSettings) -> Self {
        let cache = ToolCache::new(settings.cache_enabled, settings.cache_ttl);
        Self {
            settings,
            sessions: Mutex::new(HashMap::new()),
            tombstones: parking_lot::Mutex::new(HashMap::new()),
            cache,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    /// Discover the tools of the server bound to `session_id`, starting it if
    /// needed. Served from the tool cache unless `refresh` is set.
    pub async fn discover(
        &self,
        session_id: &str,
        config: &ServerConfig,
        refresh: bool,
    ) -> Result<Discovery, McpError> {
        let checkout = self.checkout(session_id, Some(config)).await?;
        let session = &checkout.session;

        if !refresh {
            if let Some(tools) = self.cache.get(&session.fingerprint) {
                tracing::debug!(
                    session_id = %session.id,
                    fingerprint = %session.fingerprint.short(),
                    "Tools served from cache"
                );
                session.record_tools(Arc::clone(&tools));
                return Ok(Discovery {
                    tools: tools.to_vec(),
                    server_info: session.server_info(),
                    cached: true,
                });
            }
        }

        let result = checkout.client.list_tools().await;
        let tools = Arc::new(self.settle(session, result).await?);
        self.cache.put(session.fingerprint.clone(), Arc::clone(&tools));
        session.record_tools(Arc::clone(&tools));

        tracing::info!(
            session_id = %session.id,
            server = %session.config.name,
            count = tools.len(),
            "Discovered tools"
        );

        Ok(Discovery {
            tools: tools.to_vec(),
            server_info: session.server_info(),
            cached: false,
        })
    }

    /// Call `tool_name` on the session's server.
    ///
    /// A missing session is started from `config` when one is given;
    /// otherwise the call fails with `SessionNotFound`.
    pub async fn execute(
        &self,
        session_id: &str,
        config: Option<&ServerConfig>,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, McpError> {
        let checkout = self.checkout(session_id, config).await?;
        let session = &checkout.session;

        let known = session
            .known_tools()
            .or_else(|| self.cache.get(&session.fingerprint));
        if let Some(tools) = known {
            if !tools.iter().any(|t| t.name == tool_name) {
                tracing::warn!(
                    session_id = %session.id,
                    tool = %tool_name,
                    "Tool not in last discovery result, forwarding anyway"
                );
            }
        }

        tracing::debug!(session_id = %session.id, tool = %tool_name, "Calling tool");
        let result = checkout.client.call_tool(tool_name, arguments).await;
        self.settle(session, result).await
    }

    /// Stop a session and release its process.
    ///
    /// Returns false when nothing was running under `session_id`.
    pub async fn stop(&self, session_id: &str) -> bool {
        let session = self.sessions.lock().await.get(session_id).cloned();
        match session {
            Some(session) => self.stop_session(&session).await,
            None => false,
        }
    }

    /// Current status of `session_id`, including recently stopped sessions.
    pub async fn status(&self, session_id: &str) -> Result<SessionStatus, McpError> {
        let session = self.sessions.lock().await.get(session_id).cloned();
        if let Some(session) = session {
            return Ok(session.status());
        }

        let tombstones = self.tombstones.lock();
        match tombstones.get(session_id) {
            Some(tomb) => {
                let mut status = tomb.status.clone();
                status.idle_seconds = tomb.last_activity.elapsed().as_secs();
                Ok(status)
            }
            None => Err(McpError::SessionNotFound {
                session_id: session_id.to_string(),
            }),
        }
    }

    /// Summaries of all creating, ready and busy sessions.
    pub async fn list_active(&self) -> Vec<SessionSummary> {
        let mut active: Vec<SessionSummary> = self
            .snapshot()
            .await
            .iter()
            .map(|s| s.summary())
            .filter(|s| s.state.is_live())
            .collect();
        active.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        active
    }

    pub async fn stats(&self) -> ManagerStats {
        let sessions = self.snapshot().await;
        let states: Vec<SessionState> = sessions.iter().map(|s| s.state()).collect();
        ManagerStats {
            active_sessions: states.iter().filter(|s| s.is_live()).count(),
            busy_sessions: states
                .iter()
                .filter(|s| **s == SessionState::Busy)
                .count(),
            failed_sessions: states
                .iter()
                .filter(|s| **s == SessionState::Failed)
                .count(),
            cached_fingerprints: self.cache.len(),
            cache_enabled: self.cache.is_enabled(),
            auto_cleanup: self.settings.auto_cleanup,
            platform: Platform::current().name(),
        }
    }

    /// One cleanup pass: stop idle ready sessions and expired failed ones,
    /// prune old tombstones and expired cache entries.
    pub async fn reap_idle(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for session in self.snapshot().await {
            let verdict = {
                let mut rt = session.runtime.lock();
                match rt.state {
                    SessionState::Ready
                        if rt.in_flight == 0
                            && rt.last_activity.elapsed() > self.settings.idle_timeout =>
                    {
                        // Claimed here so no call can start before the stop.
                        rt.state = SessionState::Stopping;
                        Some(Reclaim::Idle)
                    }
                    SessionState::Failed
                        if rt
                            .failed_at
                            .is_some_and(|at| at.elapsed() >= self.settings.failed_grace) =>
                    {
                        Some(Reclaim::Failed)
                    }
                    SessionState::Stopping | SessionState::Stopped => {
                        Arc::clone(&session.lifecycle)
                            .try_lock_owned()
                            .ok()
                            .map(Reclaim::Interrupted)
                    }
                    _ => None,
                }
            };

            match verdict {
                Some(Reclaim::Idle) => {
                    tracing::info!(session_id = %session.id, "Reclaiming idle session");
                    if self.stop_session(&session).await {
                        report.idle_stopped.push(session.id.clone());
                    }
                }
                Some(Reclaim::Failed) => {
                    tracing::info!(session_id = %session.id, "Reclaiming failed session");
                    if self.stop_session(&session).await {
                        report.failed_stopped.push(session.id.clone());
                    }
                }
                Some(Reclaim::Interrupted(lifecycle)) => {
                    tracing::info!(session_id = %session.id, "Completing interrupted stop");
                    if self.finish_stop(&session).await {
                        report.interrupted_stopped.push(session.id.clone());
                    }
                    drop(lifecycle);
                }
                None => {}
            }
        }

        {
            let mut tombstones = self.tombstones.lock();
            let before = tombstones.len();
            tombstones.retain(|_, tomb| tomb.stopped.elapsed() < self.settings.idle_timeout);
            report.tombstones_pruned = before - tombstones.len();
        }
        report.cache_purged = self.cache.purge_expired();

        report
    }

    /// Stop every session. Returns how many were stopped.
    pub async fn shutdown_all(&self) -> usize {
        let sessions = self.snapshot().await;
        if sessions.is_empty() {
            return 0;
        }
        tracing::info!(count = sessions.len(), "Stopping all MCP sessions");
        let stops = sessions.iter().map(|s| self.stop_session(s));
        futures_util::future::join_all(stops)
            .await
            .into_iter()
            .filter(|stopped| *stopped)
            .count()
    }

    async fn snapshot(&self) -> Vec<Arc<ManagedSession>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    /// Find or start the session for `session_id`, ready for a call.
    async fn checkout(
        &self,
        session_id: &str,
        config: Option<&ServerConfig>,
    ) -> Result<Checkout, McpError> {
        loop {
            let session = self.acquire(session_id, config).await?;
            let call = match session.begin_call() {
                Ok(call) => call,
                Err(SessionState::Failed) => return Err(session.failed_error()),
                Err(_) => {
                    // Being stopped; look again once it is gone.
                    tokio::task::yield_now().await;
                    continue;
                }
            };
            match session.client().await {
                Some(client) => {
                    return Ok(Checkout {
                        session,
                        client,
                        _call: call,
                    });
                }
                None => {
                    drop(call);
                    // A live session always has a link; without one it is unusable.
                    if session.mark_failed("session connection is missing".to_string()) {
                        tracing::error!(session_id = %session.id, "MCP session lost its connection");
                        self.cache.invalidate(&session.fingerprint);
                        return Err(session.failed_error());
                    }
                    if session.state() == SessionState::Failed {
                        return Err(session.failed_error());
                    }
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    async fn acquire(
        &self,
        session_id: &str,
        config: Option<&ServerConfig>,
    ) -> Result<Arc<ManagedSession>, McpError> {
        loop {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get(session_id).cloned() else {
                let Some(config) = config else {
                    return Err(McpError::SessionNotFound {
                        session_id: session_id.to_string(),
                    });
                };
                let session = Arc::new(ManagedSession::new(session_id, config));
                // Uncontended: the mutex was created above.
                let creating = Arc::clone(&session.lifecycle).lock_owned().await;
                sessions.insert(session_id.to_string(), Arc::clone(&session));
                drop(sessions);
                self.tombstones.lock().remove(session_id);

                let started = self.start(&session).await;
                drop(creating);
                return started.map(|()| session);
            };
            drop(sessions);

            // Wait out any create or stop in progress.
            let lifecycle = session.lifecycle.lock().await;

            match session.state() {
                SessionState::Stopping | SessionState::Stopped => {
                    // Normally a no-op; completes a stop whose caller went away.
                    self.finish_stop(&session).await;
                    drop(lifecycle);
                    continue;
                }
                SessionState::Failed => return Err(session.failed_error()),
                SessionState::Creating => {
                    // The creating task was cancelled mid-startup.
                    if session.mark_failed("session startup was interrupted".to_string()) {
                        self.cache.invalidate(&session.fingerprint);
                        session.teardown(self.settings.shutdown_grace).await;
                    }
                    return Err(session.failed_error());
                }
                SessionState::Ready | SessionState::Busy => {}
            }
            drop(lifecycle);

            if let Some(config) = config {
                let requested = config.fingerprint();
                if requested != session.fingerprint {
                    return Err(McpError::SessionConfigMismatch {
                        session_id: session_id.to_string(),
                        running: session.fingerprint.short().to_string(),
                        requested: requested.short().to_string(),
                    });
                }
            }
            return Ok(session);
        }
    }

    /// Launch and handshake. Leaves the session `Ready` or `Failed`.
    async fn start(&self, session: &ManagedSession) -> Result<(), McpError> {
        tracing::info!(
            session_id = %session.id,
            server = %session.config.name,
            fingerprint = %session.fingerprint.short(),
            "Creating MCP session"
        );

        match self.connect(session).await {
            Ok((link, server_info)) => {
                let pid = link.process.pid();
                // Link first: a session is never Ready without one.
                *session.link.lock().await = Some(link);
                {
                    let mut rt = session.runtime.lock();
                    rt.state = SessionState::Ready;
                    rt.pid = pid;
                    rt.server_info = Some(server_info);
                    rt.touch();
                }
                tracing::info!(session_id = %session.id, "MCP session ready");
                Ok(())
            }
            Err(e) => {
                tracing::error!(session_id = %session.id, error = %e, "MCP session failed to start");
                session.mark_failed(e.to_string());
                self.cache.invalidate(&session.fingerprint);
                Err(e)
            }
        }
    }

    async fn connect(&self, session: &ManagedSession) -> Result<(Link, ServerInfo), McpError> {
        let mut process = ProcessHandle::launch(&session.config, &self.settings.launch)?;
        let timeouts = ClientTimeouts::from(&self.settings);

        let client = match McpClient::attach(&session.config.name, &mut process, timeouts) {
            Ok(client) => client,
            Err(e) => {
                process.terminate(self.settings.shutdown_grace).await;
                return Err(e);
            }
        };

        match client.handshake().await {
            Ok(caps) => Ok((
                Link {
                    client: Arc::new(client),
                    process,
                },
                caps.server_info,
            )),
            Err(e) => {
                client.close().await;
                process.terminate(self.settings.shutdown_grace).await;
                Err(e)
            }
        }
    }

    /// Fail the session on fatal errors; pass the result through either way.
    async fn settle<T>(
        &self,
        session: &ManagedSession,
        result: Result<T, McpError>,
    ) -> Result<T, McpError> {
        if let Err(e) = &result {
            if e.is_fatal() && session.mark_failed(e.to_string()) {
                tracing::error!(
                    session_id = %session.id,
                    server = %session.config.name,
                    error = %e,
                    "MCP session failed"
                );
                self.cache.invalidate(&session.fingerprint);
                session.teardown(self.settings.shutdown_grace).await;
            }
        }
        result
    }

    async fn stop_session(&self, session: &Arc<ManagedSession>) -> bool {
        let _lifecycle = session.lifecycle.lock().await;
        self.finish_stop(session).await
    }

    /// Drive `session` to `Stopped` and out of the map. The caller holds its
    /// lifecycle lock.
    ///
    /// Safe to repeat, and safe to resume after an earlier call was
    /// cancelled. Returns false when there was nothing left to do.
    async fn finish_stop(&self, session: &Arc<ManagedSession>) -> bool {
        let stopping = {
            let mut rt = session.runtime.lock();
            if rt.state == SessionState::Stopped {
                false
            } else {
                rt.state = SessionState::Stopping;
                true
            }
        };

        if stopping {
            // Spawned so the process is released even if this future is dropped.
            let teardown = tokio::spawn({
                let session = Arc::clone(session);
                let grace = self.settings.shutdown_grace;
                async move { session.teardown(grace).await }
            });
            if let Err(e) = teardown.await {
                tracing::warn!(session_id = %session.id, error = %e, "Session teardown task failed");
            }
            session.runtime.lock().state = SessionState::Stopped;
        }

        let (removed, replaced) = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&session.id) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    sessions.remove(&session.id);
                    (true, false)
                }
                Some(_) => (false, true),
                None => (false, false),
            }
        };
        if !stopping && !removed {
            return false;
        }

        if !replaced {
            let mut status = session.status();
            status.stopped_at = Some(Utc::now());
            let last_activity = session.runtime.lock().last_activity;
            self.tombstones.lock().insert(
                session.id.clone(),
                Tombstone {
                    status,
                    last_activity,
                    stopped: Instant::now(),
                },
            );
        }

        tracing::info!(session_id = %session.id, "MCP session stopped");
        true
    }
}
