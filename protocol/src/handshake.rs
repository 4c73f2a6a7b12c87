//! Version/verack exchange.
//!
//! Both sides send `version` as soon as the connection opens, answer the
//! remote `version` with `verack`, and consider the session established once
//! they receive the remote `verack`. Any other command before that point is
//! a protocol violation.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{read_message, write_message};
use crate::message::Message;
use crate::payload::VersionPayload;
use crate::version::is_compatible;
use crate::ProtocolError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingVersion,
    AwaitingVerack,
    Complete,
}

/// What the caller should do after feeding a message in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeStep {
    Send(Message),
    Complete(VersionPayload),
}

pub struct Handshake {
    local: VersionPayload,
    remote: Option<VersionPayload>,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(local: VersionPayload) -> Self {
        Self {
            local,
            remote: None,
            state: HandshakeState::AwaitingVersion,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The opening message.
    pub fn hello(&self) -> Message {
        Message::Version(self.local.clone())
    }

    pub fn on_message(&mut self, message: Message) -> Result<HandshakeStep, ProtocolError> {
        match (self.state, message) {
            (HandshakeState::AwaitingVersion, Message::Version(remote)) => {
                if remote.nonce == self.local.nonce {
                    return Err(ProtocolError::HandshakeFailed(
                        "connected to self".into(),
                    ));
                }
                if !is_compatible(remote.version) {
                    return Err(ProtocolError::UnsupportedVersion(remote.version));
                }
                self.remote = Some(remote);
                self.state = HandshakeState::AwaitingVerack;
                Ok(HandshakeStep::Send(Message::Verack))
            }
            (HandshakeState::AwaitingVerack, Message::Verack) => {
                let remote = self.remote.take().ok_or_else(|| {
                    ProtocolError::HandshakeFailed("verack without version".into())
                })?;
                self.state = HandshakeState::Complete;
                Ok(HandshakeStep::Complete(remote))
            }
            (_, other) => Err(ProtocolError::UnexpectedCommand {
                command: other.command().as_str(),
            }),
        }
    }
}

/// Run the whole exchange over `stream`, returning the remote version.
pub async fn perform<S>(
    stream: &mut S,
    magic: u32,
    local: VersionPayload,
    deadline: Duration,
) -> Result<VersionPayload, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        let mut handshake = Handshake::new(local);
        write_message(stream, magic, &handshake.hello()).await?;
        loop {
            let message = read_message(stream, magic).await?;
            match handshake.on_message(message)? {
                HandshakeStep::Send(reply) => write_message(stream, magic, &reply).await?,
                HandshakeStep::Complete(remote) => return Ok(remote),
            }
        }
    };
    tokio::time::timeout(deadline, exchange)
        .await
        .map_err(|_| ProtocolError::HandshakeFailed("timed out".into()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::SERVICE_FULL_NODE;
    use crate::PROTOCOL_VERSION;
    use keel_types::Timestamp;

    const MAGIC: u32 = 7;

    fn version(nonce: u32, start_height: u32) -> VersionPayload {
        VersionPayload {
            version: PROTOCOL_VERSION,
            services: SERVICE_FULL_NODE,
            timestamp: Timestamp::new(1),
            port: 10333,
            nonce,
            user_agent: "/keel:test/".into(),
            start_height,
            relay: true,
        }
    }

    #[test]
    fn version_then_verack_completes() {
        let mut hs = Handshake::new(version(1, 0));
        assert_eq!(
            hs.on_message(Message::Version(version(2, 9))).unwrap(),
            HandshakeStep::Send(Message::Verack)
        );
        assert_eq!(hs.state(), HandshakeState::AwaitingVerack);
        match hs.on_message(Message::Verack).unwrap() {
            HandshakeStep::Complete(remote) => assert_eq!(remote.start_height, 9),
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(hs.state(), HandshakeState::Complete);
    }

    #[test]
    fn own_nonce_is_refused() {
        let mut hs = Handshake::new(version(5, 0));
        assert!(matches!(
            hs.on_message(Message::Version(version(5, 0))),
            Err(ProtocolError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn traffic_before_verack_is_a_violation() {
        let mut hs = Handshake::new(version(1, 0));
        assert!(matches!(
            hs.on_message(Message::GetAddr),
            Err(ProtocolError::UnexpectedCommand { command: "getaddr" })
        ));
        let mut hs = Handshake::new(version(1, 0));
        hs.on_message(Message::Version(version(2, 0))).unwrap();
        assert!(hs.on_message(Message::Version(version(2, 0))).is_err());
    }

    #[tokio::test]
    async fn both_ends_complete_over_a_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let deadline = Duration::from_secs(5);
        let left = tokio::spawn(async move { perform(&mut a, MAGIC, version(1, 3), deadline).await });
        let right = perform(&mut b, MAGIC, version(2, 8), deadline).await.unwrap();
        let left = left.await.unwrap().unwrap();
        assert_eq!(left.nonce, 2);
        assert_eq!(left.start_height, 8);
        assert_eq!(right.nonce, 1);
    }
}
