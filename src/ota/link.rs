use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};

use log::trace;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::protocols::DatagramLink;

use super::config::OtaConfig;

/// Mesh address the gateway assigns to `node_id`: `fd00:bbbb:1::<id>`.
pub fn node_address(node_id: u16) -> Ipv6Addr {
    Ipv6Addr::new(0xfd00, 0xbbbb, 0x0001, 0, 0, 0, 0, node_id)
}

/// UDP socket talking to one node.
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpLink {
    pub fn bind(local: SocketAddr, peer: SocketAddr) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if local.is_ipv6() {
            // Accept IPv4-mapped peers too, whatever the host default.
            socket.set_only_v6(false)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&local.into())?;

        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self { socket, peer })
    }

    /// Binds the controller port on all interfaces and targets the configured node.
    pub fn for_node(config: &OtaConfig) -> Result<Self> {
        let node_id = config
            .node_id
            .ok_or_else(|| Error::Configuration("node id must be set".into()))?;

        let local = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, config.port, 0, 0);
        let peer = SocketAddrV6::new(node_address(node_id), config.port, 0, 0);
        Self::bind(local.into(), peer.into())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl DatagramLink for UdpLink {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        trace!("-> {}: {}", self.peer, hex::encode(datagram));
        self.socket.send_to(datagram, self.peer).await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (len, from) = self.socket.recv_from(buf).await?;
        trace!("<- {}: {}", from, hex::encode(&buf[..len]));
        Ok(len)
    }
}
