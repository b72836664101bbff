use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{error, trace};

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]);

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        trace!("UDP socket: sending {} bytes to {:?}", packet_buf.len(), to);

        if let Err(e) = self.send_to(packet_buf, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }

    fn local_addr(&self) -> SocketAddr {
        match self.as_ref().local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("UDP socket has no local address: {}", e);
                SocketAddr::from(([0, 0, 0, 0], 0))
            }
        }
    }
}

/// All outgoing traffic, offline messages and datagrams alike, goes through here
#[derive(Clone)]
pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>) -> SendPipeline {
        SendPipeline { socket }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        //TODO congestion control / traffic shaping
        self.socket.do_send_packet(to, packet_buf).await;
    }
}
