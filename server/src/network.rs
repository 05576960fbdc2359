//! Server network layer handling UDP request/response and the expiry sweep

use crate::protocol::SyncService;
use crate::store::EntityStore;
use log::{debug, error, info, warn};
use shared::{Packet, WorldConfig, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};

/// UDP front end for a [`SyncService`]
pub struct Server {
    socket: Arc<UdpSocket>,
    service: Arc<SyncService>,
}

impl Server {
    pub async fn bind(addr: &str, config: WorldConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!(
            "Server listening on {} ({}x{} world, {:?} session timeout)",
            socket.local_addr()?,
            config.world_width,
            config.world_height,
            config.session_timeout
        );

        let service = Arc::new(SyncService::new(Arc::new(EntityStore::new()), config));
        Ok(Server { socket, service })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }

    /// Spawns task that periodically expires silent sessions
    fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let period = service.config().sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let removed = service.sweep(Instant::now());
                if removed.is_empty() {
                    debug!("Sweep: {} live sessions", service.sessions().len());
                } else {
                    info!("Sweep expired {} session(s): {:?}", removed.len(), removed);
                }
            }
        })
    }

    /// Decodes one datagram, runs it through the service, and sends the reply
    async fn handle_datagram(
        socket: &UdpSocket,
        service: &SyncService,
        data: &[u8],
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (id, request) = match Packet::decode(data) {
            Ok(Packet::Request { id, body }) => (id, body),
            Ok(Packet::Response { .. }) => {
                warn!("Unexpected response packet from {}", addr);
                return Ok(());
            }
            Err(e) => {
                warn!("Failed to deserialize packet from {}: {}", addr, e);
                return Ok(());
            }
        };

        let body = service.handle(request);
        let reply = Packet::Response { id, body }.encode()?;
        socket.send_to(&reply, addr).await?;
        Ok(())
    }

    /// Main server loop: receive, dispatch each request on its own task
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let sweeper = self.spawn_sweeper();
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        info!("Server started successfully");

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    let data = buffer[..len].to_vec();
                    let socket = Arc::clone(&self.socket);
                    let service = Arc::clone(&self.service);

                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_datagram(&socket, &service, &data, addr).await {
                            error!("Failed to answer {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    if sweeper.is_finished() {
                        error!("Sweeper task stopped; shutting down");
                        return Err(e.into());
                    }
                    error!("Error receiving packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}
