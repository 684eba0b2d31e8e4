//! Operator actions against connected bridges.
//!
//! An [`Action`] names what to do; [`Dispatcher`] carries it out. Front ends
//! (the console in the binary, tests) only build actions.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use log::info;

use crate::bridge::{ClientHandle, ClientRegistry};
use crate::error::{Error, Result};
use crate::protocols::relay::{RelaySource, RelaySummary, RelayTarget};
use crate::protocols::zip::{self, EnvelopeFlags};

/// Sequence number the bridge server stamps on forwarded envelopes.
const FORWARD_SEQUENCE: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ListClients,
    /// Relay a file to the client at 1-based position `client` in the list.
    Relay {
        client: usize,
        target: RelayTarget,
        path: PathBuf,
    },
    /// Wrap `payload` in a relay-role envelope and hand it to `node_id`.
    Forward {
        client: usize,
        node_id: u16,
        payload: Vec<u8>,
        secure: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutput {
    Clients(Vec<SocketAddr>),
    Relayed {
        client: SocketAddr,
        summary: RelaySummary,
    },
    Forwarded {
        client: SocketAddr,
        bytes: usize,
    },
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: ClientRegistry,
}

impl Dispatcher {
    pub fn new(registry: ClientRegistry) -> Self {
        Self { registry }
    }

    pub async fn execute(&self, action: Action) -> Result<ActionOutput> {
        match action {
            Action::ListClients => Ok(ActionOutput::Clients(self.registry.list())),
            Action::Relay { client, target, path } => {
                // The file must open before anything touches the connection.
                let source = RelaySource::open(&path).await?;
                let handle = self.select(client)?;
                let summary = handle.relay(target, source).await?;
                Ok(ActionOutput::Relayed {
                    client: handle.address(),
                    summary,
                })
            }
            Action::Forward {
                client,
                node_id,
                payload,
                secure,
            } => {
                let envelope = zip::encode_envelope(&payload, FORWARD_SEQUENCE, EnvelopeFlags::relay(secure))?;
                let packet = zip::encode_node_forward(node_id, &envelope)?;
                let handle = self.select(client)?;
                let bytes = packet.len();
                handle.send(packet.freeze()).await?;
                info!("Forwarded {} bytes for node {} via {}", bytes, node_id, handle.address());
                Ok(ActionOutput::Forwarded {
                    client: handle.address(),
                    bytes,
                })
            }
        }
    }

    fn select(&self, client: usize) -> Result<ClientHandle> {
        let address = client
            .checked_sub(1)
            .and_then(|i| self.registry.list().get(i).copied())
            .ok_or(Error::ClientIndex(client))?;
        self.registry.resolve(&address).ok_or(Error::UnknownClient(address))
    }
}

impl FromStr for Action {
    type Err = Error;

    /// Parses console commands:
    ///
    /// ```text
    /// list
    /// relay bridge <client> <path>
    /// relay ncp <client> <path>
    /// relay node <client> <node_id> <path>
    /// forward <client> <node_id> <hex payload> [secure]
    /// ```
    fn from_str(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let bad = || Error::Configuration(format!("unrecognised command: {}", line.trim()));

        match words.as_slice() {
            ["list"] => Ok(Action::ListClients),
            ["relay", "bridge", client, path] => Ok(Action::Relay {
                client: parse_number(client)?,
                target: RelayTarget::Bridge,
                path: PathBuf::from(*path),
            }),
            ["relay", "ncp", client, path] => Ok(Action::Relay {
                client: parse_number(client)?,
                target: RelayTarget::Ncp,
                path: PathBuf::from(*path),
            }),
            ["relay", "node", client, node_id, path] => Ok(Action::Relay {
                client: parse_number(client)?,
                target: RelayTarget::Node(parse_number(node_id)?),
                path: PathBuf::from(*path),
            }),
            ["forward", client, node_id, payload, rest @ ..] if rest.len() <= 1 => {
                let secure = match rest {
                    [] => false,
                    ["secure"] => true,
                    _ => return Err(bad()),
                };
                Ok(Action::Forward {
                    client: parse_number(client)?,
                    node_id: parse_number(node_id)?,
                    payload: hex::decode(*payload).map_err(|e| Error::Configuration(format!("payload: {}", e)))?,
                    secure,
                })
            }
            _ => Err(bad()),
        }
    }
}

fn parse_number<T: FromStr>(word: &str) -> Result<T> {
    word.parse()
        .map_err(|_| Error::Configuration(format!("not a number: {}", word)))
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncReadExt};

    use super::*;
    use crate::bridge::Connection;

    #[test]
    fn parses_console_commands() {
        assert_eq!("list".parse::<Action>().unwrap(), Action::ListClients);
        assert_eq!(
            "relay node 2 17 /tmp/fw.gbl".parse::<Action>().unwrap(),
            Action::Relay {
                client: 2,
                target: RelayTarget::Node(17),
                path: PathBuf::from("/tmp/fw.gbl"),
            }
        );
        assert_eq!(
            "forward 1 5 250100 secure".parse::<Action>().unwrap(),
            Action::Forward {
                client: 1,
                node_id: 5,
                payload: vec![0x25, 0x01, 0x00],
                secure: true,
            }
        );
        assert!("relay ncp x /tmp/fw".parse::<Action>().is_err());
        assert!("forward 1 5 zz".parse::<Action>().is_err());
        assert!("reboot".parse::<Action>().is_err());
    }

    #[tokio::test]
    async fn missing_file_fails_before_client_lookup() {
        let dispatcher = Dispatcher::new(ClientRegistry::new());
        let err = dispatcher
            .execute(Action::Relay {
                client: 1,
                target: RelayTarget::Bridge,
                path: PathBuf::from("/nonexistent/zgw-ota/firmware.bin"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn bad_client_index() {
        let dispatcher = Dispatcher::new(ClientRegistry::new());
        let action = Action::Forward {
            client: 0,
            node_id: 1,
            payload: vec![0x25, 0x01, 0xFF],
            secure: false,
        };
        assert!(matches!(dispatcher.execute(action).await, Err(Error::ClientIndex(0))));
    }

    #[tokio::test]
    async fn forward_reaches_client() {
        let registry = ClientRegistry::new();
        let (local, mut remote) = duplex(1024);
        let address = SocketAddr::from(([192, 168, 1, 20], 5000));
        tokio::spawn(Connection::new(1, local, address, registry.clone(), 4, 256).run());

        let dispatcher = Dispatcher::new(registry);
        assert_eq!(
            dispatcher.execute(Action::ListClients).await.unwrap(),
            ActionOutput::Clients(vec![address])
        );

        let output = dispatcher
            .execute(Action::Forward {
                client: 1,
                node_id: 0x0002,
                payload: vec![0x25, 0x01, 0xFF, 0x00],
                secure: true,
            })
            .await
            .unwrap();
        assert_eq!(output, ActionOutput::Forwarded { client: address, bytes: 14 });

        let mut buf = [0u8; 14];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            buf,
            [0x10, 0x02, 0x00, 0x23, 0x02, 0x80, 0x50, 0x01, 0x00, 0x00, 0x25, 0x01, 0xFF, 0x00]
        );
    }
}
