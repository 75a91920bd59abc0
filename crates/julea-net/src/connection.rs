//! A single TCP connection to a server backend, speaking the framed
//! message protocol.
//!
//! Grounded on spec.md §4.3's pool pop semantics: "on dial success, set
//! TCP_NODELAY, send a `PING` message, receive the reply listing backend
//! kinds the server implements." `original_source/lib/jconnection-pool.c`
//! performs the equivalent handshake once per freshly dialed connection,
//! logging the server's advertised backend kinds rather than gating
//! routing on them (spec.md's supplemented ping-handshake behavior).

use tokio::net::TcpStream;

use julea_core::{Message, MessageError, MessageFlags, MessageType};

pub struct Connection {
    stream: TcpStream,
    max_operation_size: u64,
}

impl Connection {
    /// Dials `addr`, sets `TCP_NODELAY`, and performs the ping handshake.
    pub async fn connect(addr: (&str, u16), max_operation_size: u64) -> Result<Self, MessageError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let mut conn = Self { stream, max_operation_size };
        conn.ping().await?;
        Ok(conn)
    }

    /// Reads the `PING` reply's body (a count) followed by that many
    /// send-attached buffers, one per backend kind the server advertises.
    /// The count travels in the body rather than `message.count()` (which
    /// spec.md reserves for the per-operation loop) so the read side knows
    /// exactly how many attached buffers to drain before the connection is
    /// handed back to the pool.
    async fn ping(&mut self) -> Result<(), MessageError> {
        let ping = Message::new(MessageType::Ping, MessageFlags::REPLY);
        self.send(&ping).await?;
        let mut reply = self.receive().await?;

        let count = reply.get_4()?;
        let mut kinds = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let buf = self.read_send_attached().await?;
            kinds.push(String::from_utf8_lossy(&buf).into_owned());
        }
        tracing::debug!(?kinds, "server advertised backend kinds via ping");
        Ok(())
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), MessageError> {
        message.write_to(&mut self.stream).await
    }

    pub async fn receive(&mut self) -> Result<Message, MessageError> {
        Message::read_from(&mut self.stream, self.max_operation_size).await
    }

    pub async fn read_send_attached(&mut self) -> Result<bytes::Bytes, MessageError> {
        Message::read_send_attached(&mut self.stream).await
    }
}
