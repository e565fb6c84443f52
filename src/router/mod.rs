//! # Router
//!
//! The per-node engine of the mesh: owns the channel pool, routing table,
//! service table, and context table, and implements flooded distance-vector
//! propagation of route and service state.
//!
//! ## Model
//! One [`Router`] per mesh node, identified by a caller-supplied address
//! string that must be unique across the mesh. Neighbors are reached
//! through [`Channel`]s; everything the router knows about the rest of the
//! network it learned from flooded `NET_ROUTE` / `NET_SERVICE` packets.
//!
//! ## Concurrency
//! A single dispatch worker (started by [`Router::start`]) blocks on the
//! event bus multiplexing every channel's read side, with a bounded poll
//! timeout so a stop request is observed promptly. All table state lives
//! behind one lock held only for the duration of each update; service,
//! context, and capacity handlers are invoked after the lock is released,
//! so a handler may safely call back into [`Router::send`].

pub mod control;
pub mod tables;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::core::packet::{Address, NetState, Packet};
use crate::error::{MeshError, Result};
use crate::transport::{Channel, ChannelEvent, ChannelId, EventReceiver, EventSender};
use crate::utils::metrics::Metrics;

use tables::{CapacityUpdate, RemoteNode, ServiceTable};

/// Handler for packets delivered locally to a service or context.
pub type PacketHandler = Arc<dyn Fn(Packet) + Send + Sync>;

/// Handler observing service capacity changes:
/// `(service, capacity, provider address)`. Capacity 0 means the provider
/// is gone.
pub type CapacityHandler = Arc<dyn Fn(&str, u16, &Address) + Send + Sync>;

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything guarded by the router lock.
struct State {
    channels: Vec<Arc<dyn Channel>>,
    remote_nodes: HashMap<Address, RemoteNode>,
    services: HashMap<String, PacketHandler>,
    service_table: ServiceTable,
    contexts: HashMap<u16, PacketHandler>,
}

impl State {
    fn new() -> Self {
        Self {
            channels: Vec::new(),
            remote_nodes: HashMap::new(),
            services: HashMap::new(),
            service_table: ServiceTable::new(),
            contexts: HashMap::new(),
        }
    }

    fn channel(&self, id: ChannelId) -> Option<Arc<dyn Channel>> {
        self.channels.iter().find(|c| c.id() == id).cloned()
    }

    /// Candidate providers for a service: self first when locally hosted,
    /// then every advertised address in discovery order.
    fn service_candidates(&self, service: &str, own_address: &Address) -> Vec<Address> {
        let mut candidates = Vec::new();
        if self.services.contains_key(service) {
            candidates.push(own_address.clone());
        }
        candidates.extend(self.service_table.addresses(service));
        candidates
    }

    /// Route table as shareable packets: self at cost 1, every known
    /// remote at its cost plus one.
    fn export_routes(&self, own_address: &Address) -> Vec<Packet> {
        let mut routes = vec![control::route_share_packet(own_address, own_address, 1)];
        for (address, node) in &self.remote_nodes {
            routes.push(control::route_share_packet(own_address, address, node.cost + 1));
        }
        routes
    }

    /// Service table as shareable packets: every local service at the
    /// placeholder capacity, every learned entry with its own host.
    fn export_services(&self, own_address: &Address, local_capacity: u16) -> Vec<Packet> {
        let mut services = Vec::new();
        for service in self.services.keys() {
            services.push(control::service_share_packet(own_address, service, local_capacity));
        }
        for (service, entry) in self.service_table.iter() {
            services.push(control::service_share_packet(&entry.address, service, entry.capacity));
        }
        services
    }
}

/// Deferred work computed under the router lock, performed after it drops.
#[derive(Default)]
struct Effects {
    capacity_changes: Vec<(String, u16, Address)>,
    readvertise: bool,
}

struct Inner {
    address: Address,
    config: RouterConfig,
    metrics: Arc<Metrics>,
    stop: AtomicBool,
    bus_tx: EventSender,
    bus_rx: Mutex<Option<EventReceiver>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    capacity_handler: Mutex<Option<CapacityHandler>>,
    state: Mutex<State>,
    self_weak: Weak<Inner>,
}

/// Per-node routing and service engine.
///
/// Cheap to clone; clones share one engine. Handlers that must reply
/// through their own node capture a clone of the router.
#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

impl Router {
    /// Create a router with the default configuration.
    pub fn new(address: impl Into<Address>) -> Self {
        Self::with_config(address, RouterConfig::default())
    }

    /// Create a router with an explicit configuration.
    pub fn with_config(address: impl Into<Address>, config: RouterConfig) -> Self {
        let (bus_tx, bus_rx) = mpsc::channel(config.event_queue_depth.max(1));
        let inner = Arc::new_cyclic(|self_weak| Inner {
            address: address.into(),
            config,
            metrics: Arc::new(Metrics::new()),
            stop: AtomicBool::new(false),
            bus_tx,
            bus_rx: Mutex::new(Some(bus_rx)),
            worker: Mutex::new(None),
            capacity_handler: Mutex::new(None),
            state: Mutex::new(State::new()),
            self_weak: self_weak.clone(),
        });
        Router { inner }
    }

    /// This node's mesh-wide address.
    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// This router's traffic counters.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.inner.metrics.clone()
    }

    /// Spawn the dispatch worker. Must run inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let rx = relock(&self.inner.bus_rx)
            .take()
            .ok_or_else(|| MeshError::TransportError("router is already started".into()))?;
        // The worker holds only a weak handle: dropping every Router clone
        // winds the worker down within one poll timeout.
        let weak = self.inner.self_weak.clone();
        let poll = self.inner.config.poll_timeout();
        let address = self.inner.address.clone();
        let handle = tokio::spawn(dispatch_loop(weak, rx, poll, address));
        *relock(&self.inner.worker) = Some(handle);
        Ok(())
    }

    /// Raise the stop flag. The worker observes it within one poll timeout.
    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
    }

    /// Stop the worker and ask every channel to close, unwinding routing
    /// state through the channels' close callbacks.
    pub fn close(&self) {
        self.stop();
        let channels: Vec<_> = {
            let state = relock(&self.inner.state);
            state.channels.clone()
        };
        for channel in channels {
            channel.close();
        }
    }

    /// Pool a channel: register its close callback, start listening, and
    /// query the new neighbor's network state.
    pub fn add_channel(&self, channel: Arc<dyn Channel>) -> Result<()> {
        self.inner.add_channel(channel)
    }

    /// Drop a channel from the pool, withdrawing every route that ran
    /// through it.
    pub fn remove_channel(&self, id: ChannelId) {
        self.inner.remove_channel(id);
    }

    /// Entry point for packets decoded off a channel; driven by the
    /// dispatch worker, but callable directly to inject traffic.
    pub fn on_packet(&self, from: ChannelId, packet: Packet) {
        self.inner.on_packet(from, packet);
    }

    /// Route a packet: deliver locally, forward toward its destination, or
    /// resolve its service into destinations. See the module docs for the
    /// exact decision order. Errors are returned to the caller and never
    /// retried internally.
    pub fn send(&self, packet: Packet) -> Result<()> {
        self.inner.send(packet)
    }

    /// Host a service on this node and advertise it to the mesh.
    pub fn register_service(
        &self,
        service: impl Into<String>,
        handler: impl Fn(Packet) + Send + Sync + 'static,
    ) {
        self.inner.register_service(service.into(), Arc::new(handler));
    }

    /// Stop hosting a service and flood its retraction.
    pub fn unregister_service(&self, service: &str) {
        self.inner.unregister_service(service);
    }

    /// Allocate a context id and bind a response handler to it. A remote
    /// service echoes the id back so the response finds this handler.
    pub fn register_context_handler(
        &self,
        handler: impl Fn(Packet) + Send + Sync + 'static,
    ) -> u16 {
        self.inner.register_context_handler(Arc::new(handler))
    }

    /// Release a context id allocated by [`register_context_handler`].
    ///
    /// [`register_context_handler`]: Router::register_context_handler
    pub fn release_context(&self, context_id: u16) {
        let mut state = relock(&self.inner.state);
        state.contexts.remove(&context_id);
    }

    /// Observe service capacity changes, including retractions (capacity 0).
    pub fn set_on_service_capacity_changed(
        &self,
        handler: impl Fn(&str, u16, &Address) + Send + Sync + 'static,
    ) {
        *relock(&self.inner.capacity_handler) = Some(Arc::new(handler));
    }

    /// Broadcast this node's full route and service tables to every channel.
    pub fn share_net_state(&self) {
        self.inner.share_net_state();
    }

    /// True if the routing table has an entry for `address`.
    pub fn has_route(&self, address: &str) -> bool {
        relock(&self.inner.state).remote_nodes.contains_key(address)
    }

    /// True if `service` is hosted locally or advertised by any remote.
    pub fn has_service(&self, service: &str) -> bool {
        let state = relock(&self.inner.state);
        state.services.contains_key(service) || state.service_table.has_provider(service)
    }

    /// Known provider addresses for `service`, self first when hosted here.
    pub fn service_addresses(&self, service: &str) -> Vec<Address> {
        let state = relock(&self.inner.state);
        state.service_candidates(service, &self.inner.address)
    }

    pub fn num_channels(&self) -> usize {
        relock(&self.inner.state).channels.len()
    }
}

async fn dispatch_loop(
    weak: Weak<Inner>,
    mut rx: EventReceiver,
    poll: std::time::Duration,
    address: Address,
) {
    info!(address = %address, "dispatch worker started");
    loop {
        let event = tokio::time::timeout(poll, rx.recv()).await;
        // exit once the stop flag is raised or every handle is gone
        let Some(inner) = weak.upgrade() else { break };
        if inner.stop.load(Ordering::SeqCst) {
            break;
        }
        match event {
            Ok(Some(ChannelEvent::Readable(id))) => inner.drain_channel(id),
            Ok(Some(ChannelEvent::Closed(id))) => {
                debug!(channel = %id, "channel reader ended");
            }
            // every sender dropped; nothing further can arrive
            Ok(None) => break,
            // poll timeout expired; loop around and re-check the flag
            Err(_) => {}
        }
    }
    info!(address = %address, "dispatch worker stopped");
}

impl Inner {
    fn drain_channel(&self, id: ChannelId) {
        let channel = relock(&self.state).channel(id);
        let Some(channel) = channel else {
            return;
        };
        channel.recv_ready(&mut |packet| self.on_packet(id, packet));
    }

    fn on_packet(&self, from: ChannelId, packet: Packet) {
        self.metrics.packet_received();
        if packet.net_state.is_some() {
            let effects = {
                let mut state = relock(&self.state);
                self.handle_netstate(&mut state, from, &packet)
            };
            self.apply_effects(effects);
        } else if let Err(err) = self.send(packet) {
            debug!(error = %err, "dropping undeliverable packet");
        }
    }

    /// Control-plane dispatch. Runs with the router lock held; everything
    /// that must happen outside the lock is returned as [`Effects`].
    fn handle_netstate(&self, state: &mut State, from: ChannelId, packet: &Packet) -> Effects {
        let mut effects = Effects::default();
        match packet.net_state {
            Some(NetState::Route) => match control::parse_route_share(packet) {
                Ok((remote, next_hop, cost)) => {
                    self.handle_route_share(state, &mut effects, from, packet, remote, next_hop, cost);
                }
                Err(err) => warn!(error = %err, "ignoring malformed route share"),
            },
            Some(NetState::Service) => match control::parse_service_share(packet) {
                Ok((host, service, capacity)) => {
                    self.handle_service_share(state, &mut effects, from, packet, host, service, capacity);
                }
                Err(err) => warn!(error = %err, "ignoring malformed service share"),
            },
            Some(NetState::Query) => {
                // Legacy behavior, preserved: the answer goes to every
                // channel, not only the requester.
                let mut reply = state.export_routes(&self.address);
                reply.extend(state.export_services(&self.address, self.config.local_service_capacity));
                for channel in &state.channels {
                    for share in &reply {
                        if let Err(err) = channel.send(share) {
                            self.metrics.send_error();
                            warn!(channel = %channel.id(), error = %err, "net state reply failed");
                        }
                    }
                }
            }
            None => {}
        }
        effects
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_route_share(
        &self,
        state: &mut State,
        effects: &mut Effects,
        from: ChannelId,
        packet: &Packet,
        remote: Address,
        next_hop: Address,
        cost: u16,
    ) {
        if cost == 0 {
            if remote == self.address {
                // A stale withdrawal of this node is still circulating;
                // reassert presence once it has finished propagating.
                effects.readvertise = true;
            } else if state.remote_nodes.remove(&remote).is_some() {
                debug!(address = %remote, "route withdrawn");
                for service in state.service_table.purge_address(&remote) {
                    effects.capacity_changes.push((service, 0, remote.clone()));
                }
                self.relay_to_others(state, from, packet);
            }
            // A withdrawal for an address that was never known is not
            // relayed; that is what terminates the flood.
            return;
        }
        if remote == self.address {
            return;
        }

        let accept = match state.remote_nodes.get_mut(&remote) {
            None => true,
            Some(node) => {
                node.last_seen = Instant::now();
                // Accept a strictly better route, a replacement for a
                // route whose channel left the pool, or a refresh of a
                // pending withdrawal. Never accept a worse route.
                cost < node.cost || node.cost == 0 || !state_channel_pooled(&state.channels, node.channel)
            }
        };
        if accept {
            state.remote_nodes.insert(
                remote.clone(),
                RemoteNode {
                    address: remote.clone(),
                    next_hop,
                    cost,
                    channel: from,
                    last_seen: Instant::now(),
                },
            );
            debug!(address = %remote, cost, "route learned");
            let advertisement = control::route_share_packet(&self.address, &remote, cost + 1);
            self.relay_to_others(state, from, &advertisement);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_service_share(
        &self,
        state: &mut State,
        effects: &mut Effects,
        from: ChannelId,
        packet: &Packet,
        host: Address,
        service: String,
        capacity: u16,
    ) {
        // Advertisements about this node's own services are authoritative
        // here, not on the network.
        if host == self.address {
            return;
        }
        if capacity == 0 {
            if state.service_table.remove(&service, &host) {
                debug!(service = %service, host = %host, "service retracted");
                self.relay_to_others(state, from, packet);
                effects.capacity_changes.push((service, 0, host));
            }
            return;
        }
        match state.service_table.set(&service, &host, capacity) {
            // Matching capacity already stored: drop, or flooded updates
            // would circulate forever.
            CapacityUpdate::Unchanged => {}
            CapacityUpdate::Changed => {
                debug!(service = %service, host = %host, capacity, "service learned");
                self.relay_to_others(state, from, packet);
                effects.capacity_changes.push((service, capacity, host));
            }
        }
    }

    fn relay_to_others(&self, state: &State, from: ChannelId, packet: &Packet) {
        for channel in &state.channels {
            if channel.id() == from {
                continue;
            }
            match channel.send(packet) {
                Ok(()) => self.metrics.control_relayed(),
                Err(err) => {
                    self.metrics.send_error();
                    warn!(channel = %channel.id(), error = %err, "relay failed");
                }
            }
        }
    }

    fn apply_effects(&self, effects: Effects) {
        if effects.readvertise {
            if let Some(inner) = self.self_weak.upgrade() {
                let delay = self.config.readvertise_delay();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.share_net_state();
                });
            }
        }
        self.notify_capacity(effects.capacity_changes);
    }

    fn notify_capacity(&self, changes: Vec<(String, u16, Address)>) {
        if changes.is_empty() {
            return;
        }
        let handler = relock(&self.capacity_handler).clone();
        let Some(handler) = handler else {
            return;
        };
        // handler runs without the router lock; it may re-enter send
        for (service, capacity, address) in &changes {
            handler(service, *capacity, address);
        }
    }

    fn send(&self, mut packet: Packet) -> Result<()> {
        if packet.src_addr.is_empty() {
            packet.src_addr = self.address.clone();
        }

        if packet.dest_addr.is_empty() && !packet.service.is_empty() {
            let candidates = {
                let state = relock(&self.state);
                state.service_candidates(&packet.service, &self.address)
            };
            let Some(first) = candidates.first() else {
                return Err(MeshError::ServiceUnavailable(packet.service));
            };
            // Anycast fan-out: every other known provider gets its own
            // copy; a failed branch is logged, not propagated.
            for address in &candidates[1..] {
                let mut copy = packet.clone();
                copy.dest_addr = address.clone();
                if let Err(err) = self.send(copy) {
                    warn!(address = %address, error = %err, "anycast branch failed");
                }
            }
            packet.dest_addr = first.clone();
        }

        enum Action {
            Deliver(PacketHandler),
            Forward(Arc<dyn Channel>),
        }

        let action = {
            let state = relock(&self.state);
            if packet.dest_addr == self.address {
                if let Some(handler) = state.services.get(&packet.service) {
                    Action::Deliver(handler.clone())
                } else if let Some(handler) = state.contexts.get(&packet.context_id) {
                    Action::Deliver(handler.clone())
                } else {
                    return Err(MeshError::HandlerNotRegistered {
                        service: packet.service.clone(),
                        context: packet.context_id,
                    });
                }
            } else if packet.next_addr.is_empty() || packet.next_addr == self.address {
                let Some(route) = state.remote_nodes.get(&packet.dest_addr) else {
                    return Err(MeshError::NoRoute(packet.dest_addr.clone()));
                };
                packet.next_addr = route.next_hop.clone();
                let Some(channel) = state.channel(route.channel) else {
                    return Err(MeshError::NoRoute(packet.dest_addr.clone()));
                };
                Action::Forward(channel)
            } else {
                return Err(MeshError::Unroutable);
            }
        };

        match action {
            Action::Deliver(handler) => {
                self.metrics.packet_delivered();
                // handler runs after the lock is released so it may call
                // back into send
                handler(packet);
                Ok(())
            }
            Action::Forward(channel) => match channel.send(&packet) {
                Ok(()) => {
                    self.metrics.packet_forwarded();
                    Ok(())
                }
                Err(err) => {
                    self.metrics.send_error();
                    Err(err)
                }
            },
        }
    }

    fn add_channel(&self, channel: Arc<dyn Channel>) -> Result<()> {
        let weak = self.self_weak.clone();
        channel.on_close(Box::new(move |id| {
            if let Some(inner) = weak.upgrade() {
                inner.remove_channel(id);
            }
        }));

        {
            let mut state = relock(&self.state);
            state.channels.push(channel.clone());
        }
        if let Err(err) = channel.listen(self.bus_tx.clone()) {
            let mut state = relock(&self.state);
            state.channels.retain(|c| c.id() != channel.id());
            return Err(err);
        }
        info!(channel = %channel.id(), address = %self.address, "channel added");
        // bootstrap discovery with the new neighbor
        channel.send(&control::net_query_packet())
    }

    fn remove_channel(&self, id: ChannelId) {
        let changes = {
            let mut state = relock(&self.state);
            let before = state.channels.len();
            state.channels.retain(|c| c.id() != id);
            if state.channels.len() == before {
                return; // never pooled, or already removed
            }

            let lost: Vec<Address> = state
                .remote_nodes
                .values()
                .filter(|node| node.channel == id)
                .map(|node| node.address.clone())
                .collect();

            let mut changes = Vec::new();
            for address in &lost {
                state.remote_nodes.remove(address);
                for service in state.service_table.purge_address(address) {
                    changes.push((service, 0, address.clone()));
                }
            }
            // a link failure propagates as a withdrawal of every route
            // that ran through it
            for address in &lost {
                let withdrawal = control::route_share_packet(&self.address, address, 0);
                for channel in &state.channels {
                    if let Err(err) = channel.send(&withdrawal) {
                        self.metrics.send_error();
                        warn!(channel = %channel.id(), error = %err, "withdrawal broadcast failed");
                    }
                }
            }
            info!(channel = %id, routes_lost = lost.len(), address = %self.address, "channel removed");
            changes
        };
        self.notify_capacity(changes);
    }

    fn register_service(&self, service: String, handler: PacketHandler) {
        {
            let mut state = relock(&self.state);
            state.services.insert(service.clone(), handler);
        }
        self.notify_capacity(vec![(
            service,
            self.config.local_service_capacity,
            self.address.clone(),
        )]);
        self.share_net_state();
    }

    fn unregister_service(&self, service: &str) {
        let removed = {
            let mut state = relock(&self.state);
            state.services.remove(service).is_some()
        };
        if !removed {
            return;
        }
        // A fresh table export can only carry present services; the
        // retraction itself must be flooded explicitly.
        let retraction = control::service_share_packet(&self.address, service, 0);
        let channels: Vec<_> = relock(&self.state).channels.clone();
        for channel in &channels {
            if let Err(err) = channel.send(&retraction) {
                self.metrics.send_error();
                warn!(channel = %channel.id(), error = %err, "service retraction failed");
            }
        }
        self.notify_capacity(vec![(service.to_string(), 0, self.address.clone())]);
        self.share_net_state();
    }

    fn register_context_handler(&self, handler: PacketHandler) -> u16 {
        let mut state = relock(&self.state);
        let mut rng = rand::rng();
        // 0 cannot be encoded (its presence bit would be clear); low ids
        // are skipped entirely.
        let mut context_id: u16 = rng.random_range(2..=u16::MAX);
        while state.contexts.contains_key(&context_id) {
            context_id = rng.random_range(2..=u16::MAX);
        }
        state.contexts.insert(context_id, handler);
        context_id
    }

    fn share_net_state(&self) {
        let (channels, shares) = {
            let state = relock(&self.state);
            let mut shares = state.export_routes(&self.address);
            shares.extend(state.export_services(&self.address, self.config.local_service_capacity));
            (state.channels.clone(), shares)
        };
        for channel in &channels {
            for share in &shares {
                if let Err(err) = channel.send(share) {
                    self.metrics.send_error();
                    warn!(channel = %channel.id(), error = %err, "net state share failed");
                }
            }
        }
    }
}

fn state_channel_pooled(channels: &[Arc<dyn Channel>], id: ChannelId) -> bool {
    channels.iter().any(|c| c.id() == id)
}
