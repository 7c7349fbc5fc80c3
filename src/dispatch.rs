use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::Error;
use crate::membership_list::{Member, MemberState};
use crate::message::{Message, MessageType};
use crate::network::bounded;
use crate::swim::Node;

impl Node {
    /// Handles one inbound connection: reads a single message, applies it and
    /// writes the reply where the message kind expects one.
    pub(crate) async fn stream<S>(&self, stream: &mut S) -> Result<(), Error>
        where S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let io_timeout = self.config.io_timeout;
        let msg = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return Err(Error::Cancelled { op: "read msg" }),
            read = tokio::time::timeout(io_timeout, Message::read_from(stream)) => match read {
                Ok(msg) => msg?,
                Err(_) => return Err(Error::Timeout { op: "read msg", timeout: io_timeout }),
            },
        };
        self.observer.received();
        log::debug!("Receive {:?}, me: {}", msg, self.me());

        match msg {
            Message::Ping { sender } => {
                self.refresh(sender);
                self.reply(stream, Message::Ack).await
            }
            Message::IndirectPing { suspect, .. } => {
                let reply = self.probe_for_peer(suspect).await?;
                self.reply(stream, reply).await
            }
            Message::JoinRequest { sender } => {
                self.apply(self.members.upsert([Member::alive(sender)]));
                let relay = Message::JoinBroadcast { target: sender };
                self.broadcast(&relay, &[sender]).await
            }
            Message::JoinBroadcast { target } => {
                self.apply(self.members.upsert([Member::alive(target)]));
                Ok(())
            }
            Message::LeaveRequest { sender } => {
                self.apply(self.members.set_state(MemberState::Left, &[sender]));
                Ok(())
            }
            Message::Dead { sender, target } if target == self.me() => self.rejoin(sender).await,
            Message::Dead { target, .. } => {
                self.apply(self.members.set_state(MemberState::Dead, &[target]));
                Ok(())
            }
            Message::Ack | Message::Nack => Err(Error::UnexpectedMessage(msg.message_type())),
        }
    }

    // A ping proves the sender is up. A sender never seen before is learned
    // here; one already dead or left stays so until it joins again.
    fn refresh(&self, sender: SocketAddr) {
        match self.members.get(sender) {
            None => self.apply(self.members.upsert([Member::alive(sender)])),
            Some(_) => self.apply(self.members.set_state(MemberState::Alive, &[sender])),
        }
    }

    // Peers that took the death notice keep me dead until I join again, so
    // the announcer and every alive peer get a fresh join request.
    async fn rejoin(&self, announcer: SocketAddr) -> Result<(), Error> {
        log::warn!("{} declared me dead, rejoining, me: {}", announcer, self.me());
        let request = Message::JoinRequest { sender: self.me() };
        match self.send(announcer, &request).await {
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => log::debug!("Rejoin through {} failed: {}, me: {}", announcer, err, self.me()),
            Ok(()) => {}
        }
        match self.broadcast(&request, &[announcer]).await {
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                log::warn!("{}, me: {}", err, self.me());
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    // Direct probe on behalf of a peer that suspects `suspect`.
    async fn probe_for_peer(&self, suspect: SocketAddr) -> Result<Message, Error> {
        self.apply(self.members.set_state(MemberState::Suspect, &[suspect]));
        match self.ping(suspect).await {
            Ok(()) => {
                self.apply(self.members.set_state(MemberState::Alive, &[suspect]));
                Ok(Message::Ack)
            }
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                log::debug!("Indirect probe of {} failed: {}, me: {}", suspect, err, self.me());
                self.apply(self.members.set_state(MemberState::Dead, &[suspect]));
                Ok(Message::Nack)
            }
        }
    }

    async fn reply<S>(&self, stream: &mut S, reply: Message) -> Result<(), Error>
        where S: AsyncWrite + Unpin,
    {
        debug_assert!(matches!(reply.message_type(), MessageType::Ack | MessageType::Nack));
        let out = reply.encode()?;
        let timeout = self.config.io_timeout;
        bounded(&self.cancellation_token, "write reply", timeout, stream.write_all(&out)).await?;
        bounded(&self.cancellation_token, "flush reply", timeout, stream.flush()).await
    }
}
