use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use shared::{
    domain::{GroupId, Username},
    protocol::{CreateGroupRequest, GroupMember, GroupSummary},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod connection;
pub mod controller;
pub mod directory;
pub mod error;
pub mod membership;
mod options;
pub mod session;
pub mod store;
pub mod types;

pub use connection::{ConnectionEvent, ConnectionManager, EventStream};
pub use controller::{SyncAction, SyncController};
pub use directory::{DirectoryService, HttpDirectory};
pub use error::{FetchError, SyncError};
pub use options::{ClientOptions, DEFAULT_API_PREFIX};
pub use session::{SessionProvider, StaticSession};
pub use types::{ChannelKey, ChannelView, ConnectionStatus, Message, Selection};

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectionChanged(ConnectionStatus),
    OnlineUsersUpdated(Vec<Username>),
    MessageAppended(Message),
    HistoryLoaded {
        channel: ChannelKey,
        messages: usize,
    },
    SelectionChanged(Selection),
    /// The local user is no longer a member of the group.
    MembershipLost {
        group_id: GroupId,
    },
    RosterUpdated(Vec<GroupSummary>),
    MemberLeft {
        group_id: GroupId,
        username: Option<Username>,
    },
    /// Non-fatal failure worth showing to the user.
    Notice(String),
    /// The credential was rejected and could not be refreshed. The session has
    /// been torn down.
    SessionInvalid,
}

#[async_trait]
pub trait ClientHandle: Send + Sync {
    async fn connect(&self, username: &str) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn select(&self, selection: Selection) -> Result<()>;
    /// Sends `draft` to the active conversation. On `NotConnected` nothing is
    /// queued and the caller keeps the draft.
    async fn send_message(&self, draft: &str) -> Result<()>;
    async fn refresh_groups(&self) -> Result<()>;
    async fn create_group(&self, request: CreateGroupRequest) -> Result<GroupSummary>;
    async fn add_members(&self, group_id: GroupId, members: Vec<Username>) -> Result<()>;
    async fn leave_group(&self, group_id: GroupId) -> Result<()>;
    async fn group_members(&self, group_id: GroupId) -> Result<Vec<GroupMember>>;
    async fn view(&self) -> Option<ChannelView>;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

pub struct RealtimeClient {
    options: ClientOptions,
    directory: Arc<dyn DirectoryService>,
    inner: Mutex<RealtimeClientState>,
    events: broadcast::Sender<ClientEvent>,
}

struct RealtimeClientState {
    /// Bumped whenever a session starts or ends; results tagged with an older
    /// epoch are dropped.
    epoch: u64,
    controller: Option<SyncController>,
    connection: Option<ConnectionManager>,
    pump_task: Option<JoinHandle<()>>,
    refresh_task: Option<JoinHandle<()>>,
}

impl RealtimeClient {
    pub fn new(options: ClientOptions, session: Arc<dyn SessionProvider>) -> Result<Arc<Self>> {
        let api_base = options.api_base()?;
        let directory = HttpDirectory::new(api_base, session);
        Ok(Self::new_with_directory(options, Arc::new(directory)))
    }

    pub fn new_with_directory(
        options: ClientOptions,
        directory: Arc<dyn DirectoryService>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            options,
            directory,
            inner: Mutex::new(RealtimeClientState {
                epoch: 0,
                controller: None,
                connection: None,
                pump_task: None,
                refresh_task: None,
            }),
            events,
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Opens the live connection for `username` and starts the initial loads.
    /// Any previous session is torn down first.
    pub async fn connect(self: &Arc<Self>, username: &str) -> Result<()> {
        let username = Username::new(username.trim());
        if username.as_str().is_empty() {
            return Err(anyhow!("username must not be empty"));
        }
        let ws_url = self.options.websocket_url(&username)?;
        self.teardown(None).await;

        let (connection, mut stream) = ConnectionManager::open(&ws_url)
            .await
            .with_context(|| format!("failed to open chat session for {username}"))?;

        let (epoch, actions) = {
            let mut guard = self.inner.lock().await;
            guard.epoch += 1;
            let mut controller = SyncController::new(username.clone())
                .with_optimistic_group_echo(self.options.optimistic_group_echo);
            let mut actions = controller.set_connection(ConnectionStatus::Open);
            actions.extend(controller.begin_session());
            guard.controller = Some(controller);
            guard.connection = Some(connection);
            (guard.epoch, actions)
        };
        info!(%username, epoch, "sync: session started");

        let client = Arc::clone(self);
        let pump_task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                client.handle_connection_event(epoch, event).await;
            }
            debug!(epoch, "sync: inbound stream finished");
        });
        let refresh_task = self.options.roster_refresh_interval.map(|period| {
            let client = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    client.refresh_roster_for(epoch).await;
                }
            })
        });

        {
            let mut guard = self.inner.lock().await;
            if guard.epoch == epoch {
                guard.pump_task = Some(pump_task);
                guard.refresh_task = refresh_task;
            } else {
                pump_task.abort();
                if let Some(task) = refresh_task {
                    task.abort();
                }
            }
        }

        self.dispatch(epoch, actions);
        Ok(())
    }

    pub async fn disconnect(self: &Arc<Self>) -> Result<()> {
        self.teardown(None).await;
        Ok(())
    }

    pub async fn select(self: &Arc<Self>, selection: Selection) -> Result<()> {
        let (epoch, actions) = {
            let mut guard = self.inner.lock().await;
            let epoch = guard.epoch;
            let controller = guard.controller.as_mut().ok_or(SyncError::NotConnected)?;
            (epoch, controller.select(selection)?)
        };
        self.dispatch(epoch, actions);
        Ok(())
    }

    pub async fn send_message(self: &Arc<Self>, draft: &str) -> Result<()> {
        let (epoch, actions) = {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            let controller = state.controller.as_mut().ok_or(SyncError::NotConnected)?;
            let connection = state.connection.as_ref().ok_or(SyncError::NotConnected)?;
            let frame = controller.compose(draft, Utc::now())?;
            connection.send(&frame)?;
            debug!(selection = ?controller.selection(), "sync: message sent");
            (state.epoch, controller.record_sent(&frame))
        };
        self.dispatch(epoch, actions);
        Ok(())
    }

    pub async fn refresh_groups(self: &Arc<Self>) -> Result<()> {
        let (epoch, actions) = {
            let mut guard = self.inner.lock().await;
            let epoch = guard.epoch;
            let controller = guard.controller.as_mut().ok_or(SyncError::NotConnected)?;
            (epoch, controller.request_roster())
        };
        self.dispatch(epoch, actions);
        Ok(())
    }

    /// Creates a group, then inserts and selects it.
    pub async fn create_group(self: &Arc<Self>, request: CreateGroupRequest) -> Result<GroupSummary> {
        let epoch = self.session_epoch().await?;
        let group = match self.directory.create_group(&request).await {
            Ok(group) => group,
            Err(err) => return Err(self.directory_failure(epoch, err)),
        };
        info!(group_id = group.id.0, name = %group.name, "sync: group created");

        let actions = {
            let mut guard = self.inner.lock().await;
            if guard.epoch != epoch {
                return Ok(group);
            }
            match guard.controller.as_mut() {
                Some(controller) => controller.group_created(group.clone()),
                None => Vec::new(),
            }
        };
        self.dispatch(epoch, actions);
        Ok(group)
    }

    pub async fn add_members(self: &Arc<Self>, group_id: GroupId, members: Vec<Username>) -> Result<()> {
        let epoch = self.session_epoch().await?;
        if let Err(err) = self.directory.add_members(group_id, &members).await {
            return Err(self.directory_failure(epoch, err));
        }
        info!(group_id = group_id.0, added = members.len(), "sync: members added");
        self.refresh_roster_for(epoch).await;
        Ok(())
    }

    pub async fn leave_group(self: &Arc<Self>, group_id: GroupId) -> Result<()> {
        let epoch = self.session_epoch().await?;
        if let Err(err) = self.directory.leave_group(group_id).await {
            return Err(self.directory_failure(epoch, err));
        }
        info!(group_id = group_id.0, "sync: left group");
        self.refresh_roster_for(epoch).await;
        Ok(())
    }

    pub async fn group_members(self: &Arc<Self>, group_id: GroupId) -> Result<Vec<GroupMember>> {
        let epoch = self.session_epoch().await?;
        self.directory
            .group_members(group_id)
            .await
            .map_err(|err| self.directory_failure(epoch, err))
    }

    pub async fn view(&self) -> Option<ChannelView> {
        let guard = self.inner.lock().await;
        guard.controller.as_ref().map(SyncController::view)
    }

    pub async fn read(&self, key: &ChannelKey) -> Vec<Message> {
        let guard = self.inner.lock().await;
        guard
            .controller
            .as_ref()
            .map(|controller| controller.read(key).to_vec())
            .unwrap_or_default()
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        let guard = self.inner.lock().await;
        guard
            .controller
            .as_ref()
            .map(SyncController::connection)
            .unwrap_or(ConnectionStatus::Closed)
    }

    async fn session_epoch(&self) -> Result<u64> {
        let guard = self.inner.lock().await;
        if guard.controller.is_none() {
            return Err(SyncError::NotConnected.into());
        }
        Ok(guard.epoch)
    }

    async fn handle_connection_event(self: &Arc<Self>, epoch: u64, event: ConnectionEvent) {
        let actions = {
            let mut guard = self.inner.lock().await;
            if guard.epoch != epoch {
                return;
            }
            let Some(controller) = guard.controller.as_mut() else {
                return;
            };
            match event {
                ConnectionEvent::Frame(text) => controller.handle_frame(&text),
                ConnectionEvent::Closed { reason } => {
                    info!(?reason, error = %SyncError::TransportClosed, "sync: live connection closed");
                    controller.set_connection(ConnectionStatus::Closed)
                }
                ConnectionEvent::Errored(err) => {
                    let err = SyncError::TransportError(err);
                    warn!(error = %err, "sync: live connection failed");
                    let mut actions = controller.set_connection(ConnectionStatus::Errored);
                    actions.push(SyncAction::Notify(ClientEvent::Notice(err.to_string())));
                    actions
                }
            }
        };
        self.dispatch(epoch, actions);
    }

    /// Publishes notifications and starts the fetches the controller asked for.
    /// Fetch results are fed back through the controller by the spawned task.
    fn dispatch(self: &Arc<Self>, epoch: u64, actions: Vec<SyncAction>) {
        for action in actions {
            match action {
                SyncAction::Notify(ClientEvent::SessionInvalid) => {
                    let _ = self.events.send(ClientEvent::SessionInvalid);
                    let client = Arc::clone(self);
                    tokio::spawn(async move {
                        client.teardown(Some(epoch)).await;
                    });
                }
                SyncAction::Notify(event) => {
                    let _ = self.events.send(event);
                }
                SyncAction::FetchHistory(key) => {
                    let client = Arc::clone(self);
                    tokio::spawn(async move {
                        client.run_history_fetch(epoch, key).await;
                    });
                }
                SyncAction::RefreshRoster => {
                    let client = Arc::clone(self);
                    tokio::spawn(async move {
                        client.run_roster_fetch(epoch).await;
                    });
                }
            }
        }
    }

    async fn run_history_fetch(self: Arc<Self>, epoch: u64, key: ChannelKey) {
        debug!(channel = %key, "sync: fetching history");
        let result = self.directory.history(&key).await;
        let actions = {
            let mut guard = self.inner.lock().await;
            if guard.epoch != epoch {
                debug!(channel = %key, "sync: discarding history from an ended session");
                return;
            }
            match guard.controller.as_mut() {
                Some(controller) => controller.complete_history(key, result),
                None => return,
            }
        };
        self.dispatch(epoch, actions);
    }

    async fn run_roster_fetch(self: Arc<Self>, epoch: u64) {
        debug!("sync: fetching group roster");
        let result = self.directory.groups().await;
        let actions = {
            let mut guard = self.inner.lock().await;
            if guard.epoch != epoch {
                debug!("sync: discarding roster from an ended session");
                return;
            }
            match guard.controller.as_mut() {
                Some(controller) => controller.complete_roster(result),
                None => return,
            }
        };
        self.dispatch(epoch, actions);
    }

    async fn refresh_roster_for(self: &Arc<Self>, epoch: u64) {
        let actions = {
            let mut guard = self.inner.lock().await;
            if guard.epoch != epoch {
                return;
            }
            match guard.controller.as_mut() {
                Some(controller) => controller.request_roster(),
                None => return,
            }
        };
        self.dispatch(epoch, actions);
    }

    fn directory_failure(self: &Arc<Self>, epoch: u64, err: FetchError) -> anyhow::Error {
        if err.is_unauthorized() {
            warn!(error = %err, "sync: credential rejected by directory");
            self.dispatch(epoch, vec![SyncAction::Notify(ClientEvent::SessionInvalid)]);
            return anyhow::Error::new(err).context(SyncError::SessionInvalid);
        }
        err.into()
    }

    /// Ends the current session. With `expected_epoch` set, only that session
    /// is torn down. The pump is stopped before the socket closes so no
    /// inbound handler runs after close.
    async fn teardown(&self, expected_epoch: Option<u64>) {
        let (connection, pump_task, refresh_task) = {
            let mut guard = self.inner.lock().await;
            if expected_epoch.is_some_and(|epoch| epoch != guard.epoch) {
                return;
            }
            if guard.controller.is_none() && guard.connection.is_none() {
                return;
            }
            guard.epoch += 1;
            guard.controller = None;
            (
                guard.connection.take(),
                guard.pump_task.take(),
                guard.refresh_task.take(),
            )
        };

        if let Some(task) = pump_task {
            task.abort();
        }
        if let Some(task) = refresh_task {
            task.abort();
        }
        if let Some(mut connection) = connection {
            connection.close().await;
        }
        info!("sync: session ended");
        let _ = self
            .events
            .send(ClientEvent::ConnectionChanged(ConnectionStatus::Closed));
    }
}

#[async_trait]
impl ClientHandle for Arc<RealtimeClient> {
    async fn connect(&self, username: &str) -> Result<()> {
        RealtimeClient::connect(self, username).await
    }

    async fn disconnect(&self) -> Result<()> {
        RealtimeClient::disconnect(self).await
    }

    async fn select(&self, selection: Selection) -> Result<()> {
        RealtimeClient::select(self, selection).await
    }

    async fn send_message(&self, draft: &str) -> Result<()> {
        RealtimeClient::send_message(self, draft).await
    }

    async fn refresh_groups(&self) -> Result<()> {
        RealtimeClient::refresh_groups(self).await
    }

    async fn create_group(&self, request: CreateGroupRequest) -> Result<GroupSummary> {
        RealtimeClient::create_group(self, request).await
    }

    async fn add_members(&self, group_id: GroupId, members: Vec<Username>) -> Result<()> {
        RealtimeClient::add_members(self, group_id, members).await
    }

    async fn leave_group(&self, group_id: GroupId) -> Result<()> {
        RealtimeClient::leave_group(self, group_id).await
    }

    async fn group_members(&self, group_id: GroupId) -> Result<Vec<GroupMember>> {
        RealtimeClient::group_members(self, group_id).await
    }

    async fn view(&self) -> Option<ChannelView> {
        RealtimeClient::view(self).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
