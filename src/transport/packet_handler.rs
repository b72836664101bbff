use crate::protocol::Packet;
use crate::transport::session::Session;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;

/// This is where application code plugs into the transport: it is notified of connection
///  lifecycle changes and receives all application level packets (i.e. everything that is not
///  handled by the transport itself), in delivery order per session.
///
/// Callbacks are invoked from the receive loop without any session lock being held, so they
///  can send on the session they are passed. They should not block for long though, since no
///  other incoming traffic is processed meanwhile.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    async fn on_connected(&self, session: Arc<Session>);

    async fn on_packet(&self, session: Arc<Session>, packet: Packet);

    async fn on_disconnected(&self, peer_addr: SocketAddr);
}
