//! libp2p swarm — gossipsub transport for the EML message bus
//!
//! Runs a tokio-based event loop that:
//! - Discovers peers via mDNS
//! - Publishes bus messages on gossipsub, acknowledging each publish
//! - Forwards inbound gossip messages to the application

use super::protocol::BusMessage;
use super::{MessageBus, MessageId, TopicPath};
// A plain `Result` import would shadow the one the behaviour derive expands to
use crate::error::{EmlError, Result as EmlResult};
use libp2p::{gossipsub, mdns, noise, swarm::SwarmEvent, tcp, yamux, Multiaddr, PeerId};
use log::{error, info, warn};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Combined behaviour: gossipsub for messaging + mDNS for discovery
#[derive(libp2p::swarm::NetworkBehaviour)]
pub struct EmlBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: mdns::tokio::Behaviour,
}

/// Commands that can be sent to the swarm task
#[derive(Debug)]
pub enum SwarmCommand {
    /// Publish a message; the outcome is sent back on `ack`
    Publish {
        message: BusMessage,
        ack: oneshot::Sender<EmlResult<MessageId>>,
    },
    /// Start receiving messages of a topic
    Subscribe(TopicPath),
    /// Stop the swarm
    Shutdown,
}

/// Events received from the network
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A message was received from a peer
    MessageReceived(BusMessage),
    /// A new peer was discovered
    PeerDiscovered(String),
    /// A peer disconnected
    PeerLost(String),
}

/// Configuration for the P2P swarm
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Port to listen on (0 = random)
    pub listen_port: u16,
    /// Gossipsub heartbeat interval
    pub heartbeat_secs: u64,
    /// Topics to subscribe to at startup
    pub topics: Vec<TopicPath>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            heartbeat_secs: 1,
            topics: Vec::new(),
        }
    }
}

/// Cloneable handle to a running swarm.
///
/// Its `MessageBus` impl blocks the calling thread until gossipsub accepted
/// or rejected the message, so call it from blocking code
/// (`tokio::task::spawn_blocking`), never from inside an async task.
#[derive(Debug, Clone)]
pub struct SwarmHandle {
    cmd_tx: mpsc::Sender<SwarmCommand>,
}

impl SwarmHandle {
    pub async fn subscribe(&self, topic: TopicPath) -> EmlResult<()> {
        self.cmd_tx
            .send(SwarmCommand::Subscribe(topic))
            .await
            .map_err(|_| EmlError::Delivery("swarm task has stopped".into()))
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SwarmCommand::Shutdown).await;
    }
}

impl MessageBus for SwarmHandle {
    fn publish(&self, topic: &TopicPath, data: Vec<u8>) -> EmlResult<MessageId> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .blocking_send(SwarmCommand::Publish {
                message: BusMessage::new(topic.clone(), data),
                ack: ack_tx,
            })
            .map_err(|_| EmlError::Delivery("swarm task has stopped".into()))?;
        ack_rx
            .blocking_recv()
            .map_err(|_| EmlError::Delivery("swarm dropped the publish acknowledgement".into()))?
    }
}

/// Build and run the libp2p swarm, returning a bus handle and the inbound event stream
pub async fn run_swarm(
    config: SwarmConfig,
) -> std::result::Result<(PeerId, SwarmHandle, mpsc::Receiver<NetworkEvent>), Box<dyn std::error::Error>> {
    // Build the swarm
    let mut swarm = libp2p::SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_behaviour(|key| {
            let message_id_fn = |message: &gossipsub::Message| {
                let mut s = DefaultHasher::new();
                message.data.hash(&mut s);
                gossipsub::MessageId::from(s.finish().to_string())
            };
            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(config.heartbeat_secs))
                .validation_mode(gossipsub::ValidationMode::Strict)
                .message_id_fn(message_id_fn)
                .build()
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;

            let gossipsub = gossipsub::Behaviour::new(
                gossipsub::MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| Box::new(std::io::Error::new(std::io::ErrorKind::Other, e)) as Box<dyn std::error::Error + Send + Sync>)?;

            let mdns = mdns::tokio::Behaviour::new(
                mdns::Config::default(),
                key.public().to_peer_id(),
            )
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;

            Ok(EmlBehaviour { gossipsub, mdns })
        })?
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    let local_peer_id = *swarm.local_peer_id();
    info!("Local peer ID: {}", local_peer_id);

    for topic in &config.topics {
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&gossipsub::IdentTopic::new(topic.as_str()))?;
        info!("Subscribed to {}", topic);
    }

    let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", config.listen_port).parse()?;
    swarm.listen_on(listen_addr)?;

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let (evt_tx, evt_rx) = mpsc::channel::<NetworkEvent>(256);

    tokio::spawn(async move {
        use futures::StreamExt;
        loop {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        SwarmCommand::Publish { message, ack } => {
                            let topic = gossipsub::IdentTopic::new(message.topic.as_str());
                            let outcome = match message.to_bytes() {
                                Ok(data) => swarm
                                    .behaviour_mut()
                                    .gossipsub
                                    .publish(topic, data)
                                    .map(|id| id.to_string())
                                    .map_err(|e| {
                                        warn!("Failed to publish to {}: {}", message.topic, e);
                                        EmlError::Delivery(e.to_string())
                                    }),
                                Err(e) => {
                                    error!("Failed to serialize message: {}", e);
                                    Err(EmlError::from(e))
                                }
                            };
                            let _ = ack.send(outcome);
                        }
                        SwarmCommand::Subscribe(topic) => {
                            if let Err(e) = swarm
                                .behaviour_mut()
                                .gossipsub
                                .subscribe(&gossipsub::IdentTopic::new(topic.as_str()))
                            {
                                warn!("Failed to subscribe to {}: {}", topic, e);
                            }
                        }
                        SwarmCommand::Shutdown => {
                            info!("Swarm shutting down");
                            break;
                        }
                    }
                }
                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(EmlBehaviourEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            match BusMessage::from_bytes(&message.data) {
                                Ok(msg) => {
                                    let _ = evt_tx.send(NetworkEvent::MessageReceived(msg)).await;
                                }
                                Err(e) => {
                                    warn!("Failed to decode gossipsub message: {}", e);
                                }
                            }
                        }
                        SwarmEvent::Behaviour(EmlBehaviourEvent::Mdns(
                            mdns::Event::Discovered(peers),
                        )) => {
                            for (peer_id, _addr) in peers {
                                info!("mDNS discovered peer: {}", peer_id);
                                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                                let _ = evt_tx
                                    .send(NetworkEvent::PeerDiscovered(peer_id.to_string()))
                                    .await;
                            }
                        }
                        SwarmEvent::Behaviour(EmlBehaviourEvent::Mdns(
                            mdns::Event::Expired(peers),
                        )) => {
                            for (peer_id, _addr) in peers {
                                info!("mDNS peer expired: {}", peer_id);
                                swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                                let _ = evt_tx
                                    .send(NetworkEvent::PeerLost(peer_id.to_string()))
                                    .await;
                            }
                        }
                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!("Listening on {}", address);
                        }
                        _ => {}
                    }
                }
            }
        }
    });

    Ok((local_peer_id, SwarmHandle { cmd_tx }, evt_rx))
}
