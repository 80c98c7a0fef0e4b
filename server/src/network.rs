//! Server event loop: connection lifecycle and protocol dispatch

use crate::accounts::{AccountStore, CreateOutcome, VerifyOutcome};
use crate::broadcast::broadcast;
use crate::config::ServerConfig;
use crate::connection_table::ConnectionTable;
use crate::error::{ServerError, TransportError};
use crate::game::{GameStateMachine, StateHooks};
use crate::transport::{ConnectionHandle, NetworkEvent, Transport};
use log::{debug, error, info, warn};
use shared::{Channel, Command, GameState, ServerReply};
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Authoritative server owning the transport, the connection table, the
/// account store and the game state.
///
/// Everything runs on the caller's thread, one [`Server::tick`] at a time.
pub struct Server<T: Transport> {
    transport: T,
    connections: ConnectionTable,
    accounts: AccountStore,
    game_state: GameStateMachine,
    tick_duration: Duration,
    tick: u64,
}

impl<T: Transport> Server<T> {
    /// Binds and listens on the configured address.
    ///
    /// On failure the transport is dropped and the error returned; the server
    /// never ticks.
    pub fn start(mut transport: T, config: &ServerConfig) -> Result<Self, ServerError> {
        let address = config.address();

        if let Err(e) = transport.bind(&address).and_then(|_| transport.listen()) {
            error!("Failed to bind to {}: {}", address, e);
            return Err(ServerError::Startup(e));
        }
        info!("Server listening on {}", address);

        Ok(Server {
            transport,
            connections: ConnectionTable::new(config.max_connections),
            accounts: AccountStore::open(&config.accounts_path),
            game_state: GameStateMachine::new(),
            tick_duration: config.tick_duration(),
            tick: 0,
        })
    }

    pub fn with_hooks(mut self, hooks: Box<dyn StateHooks>) -> Self {
        self.game_state.set_hooks(hooks);
        self
    }

    /// One pass: accept, pump I/O, sweep dead connections, drain events
    pub fn tick(&mut self) {
        self.accept_connections();
        self.transport.update();

        let removed = self.connections.compact();
        if removed > 0 {
            debug!("Compacted {} dead connections", removed);
        }

        self.process_events();
        self.tick += 1;
    }

    fn accept_connections(&mut self) {
        while let Some(handle) = self.transport.accept() {
            match self.connections.add(handle) {
                Some(id) => info!("Accepted a client connection: {}", id),
                None => {
                    warn!(
                        "Refusing connection {}: {} connections already live",
                        handle.id(),
                        self.connections.max_connections()
                    );
                    self.transport.disconnect(handle);
                }
            }
        }
    }

    fn process_events(&mut self) {
        // Entries are only flagged here; removal waits for the next compact
        for index in 0..self.connections.len() {
            let handle = match self.connections.get(index) {
                Some(connection) if connection.alive => connection.handle,
                _ => continue,
            };

            while let Some(event) = self.transport.pop_event(handle) {
                match event {
                    NetworkEvent::Data { payload, channel } => {
                        debug!(
                            "Network event from {:?} channel on connection {}",
                            channel,
                            handle.id()
                        );
                        self.handle_message(index, handle, &payload);
                    }
                    NetworkEvent::Disconnect => {
                        info!("Client {} has disconnected from server", handle.id());
                        self.connections.mark_dead(index);
                        break;
                    }
                }
            }
        }
    }

    /// Decodes one payload and routes the command
    fn handle_message(&mut self, index: usize, handle: ConnectionHandle, payload: &[u8]) {
        let id = handle.id();

        match Command::decode(payload) {
            Command::CreateAccount {
                username,
                credential,
            } => {
                let reply = match self.accounts.create(&username, &credential) {
                    Ok(CreateOutcome::Created) => {
                        info!("Account {} created successfully", username);
                        ServerReply::CreateAccountSuccess
                    }
                    Ok(CreateOutcome::AlreadyExists) => {
                        info!("Account creation failed: {} already exists", username);
                        ServerReply::CreateAccountFail
                    }
                    Err(e) => {
                        error!("Account creation for {} failed: {}", username, e);
                        ServerReply::CreateAccountFail
                    }
                };
                self.reply(handle, reply);
            }

            Command::Login {
                username,
                credential,
            } => match self.accounts.verify(&username, &credential) {
                Ok(VerifyOutcome::Authenticated) => {
                    info!("Login successful for {}. ID: {}", username, id);
                    self.set_state(GameState::MainMenu);
                }
                Ok(VerifyOutcome::NotFound) => {
                    info!("Login failed for {}: username or password is incorrect", username);
                    self.reply(handle, ServerReply::LoginFail);
                }
                Err(e) => {
                    error!("Login for {} failed: {}", username, e);
                    self.reply(handle, ServerReply::LoginFail);
                }
            },

            Command::StateAck { reported_state } => {
                info!("Connection {} changed state to {}", id, reported_state);
                if let Some(connection) = self.connections.get_mut(index) {
                    connection.acknowledged_state = Some(reported_state);
                }
            }

            Command::Malformed(reason) => {
                debug!("Dropping message from connection {}: {}", id, reason);
            }
        }
    }

    fn reply(&mut self, handle: ConnectionHandle, reply: ServerReply) {
        if let Err(e) = self
            .transport
            .send(handle, Channel::ReliableOrdered, &reply.encode())
        {
            warn!("Failed to send {} to connection {}: {}", reply, handle.id(), e);
        }
    }

    /// Sends a message to one live connection
    pub fn send_to(&mut self, id: u32, message: &str) -> Result<(), TransportError> {
        let handle = self
            .connections
            .find(id)
            .map(|connection| connection.handle)
            .ok_or(TransportError::InvalidConnection(id))?;
        self.transport
            .send(handle, Channel::ReliableOrdered, message.as_bytes())
    }

    /// Sends a message to every live connection, returns how many got it
    pub fn broadcast(&mut self, message: &str) -> usize {
        broadcast(&mut self.transport, &self.connections, message)
    }

    /// Changes the shared state and announces it to every live connection
    pub fn set_state(&mut self, state: GameState) -> usize {
        self.game_state.set_state(state);
        let message = self.game_state.state_change_message();
        self.broadcast(&message)
    }

    pub fn state(&self) -> GameState {
        self.game_state.state()
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn connection_count(&self) -> usize {
        self.connections.live_count()
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Ticks completed so far
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Ticks at the configured rate until `shutdown` completes
    pub async fn run_until<F: Future>(&mut self, shutdown: F) {
        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("Server started successfully");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
                _ = tick_interval.tick() => {
                    self.tick();

                    if self.tick % 300 == 0 {
                        debug!("Tick {}: {} connections", self.tick, self.connection_count());
                    }
                }
            }
        }
    }

    /// Disconnects every live connection and hands the transport back to be
    /// dropped
    pub fn stop(mut self) -> T {
        let handles: Vec<ConnectionHandle> = self
            .connections
            .live()
            .map(|connection| connection.handle)
            .collect();

        for handle in handles {
            self.transport.disconnect(handle);
        }
        info!("Server stopped after {} ticks", self.tick);
        self.transport
    }
}
