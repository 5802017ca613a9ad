//! Local receive-port reservation
//!
//! The recorder opens its receive socket by port number (it reads the port
//! from the session descriptor), so the port cannot be handed over as a
//! file descriptor. The reserving socket is kept bound for as long as possible
//! and released only right before the recorder is spawned. Another process
//! can still grab the port in that window; the recorder then fails to bind
//! and exits during the settling interval.

use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;

/// A bound UDP socket holding a port until the recorder takes it over
#[derive(Debug)]
pub struct PortReservation {
    socket: Option<UdpSocket>,
    addr: SocketAddr,
}

impl PortReservation {
    /// Bind an ephemeral UDP port on `ip`
    pub async fn reserve(ip: IpAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(ip, 0)).await?;
        let addr = socket.local_addr()?;
        tracing::debug!("Reserved relay port {}", addr);
        Ok(Self {
            socket: Some(socket),
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn is_held(&self) -> bool {
        self.socket.is_some()
    }

    /// Give the port up so the recorder can bind it
    pub fn release(&mut self) {
        if self.socket.take().is_some() {
            tracing::debug!("Released relay port {}", self.addr);
        }
    }
}
