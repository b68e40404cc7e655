//! Base58 addresses and their program bytes.
//!
//! An address is `prefix || content || checksum` where `prefix` is the
//! network byte plus the address kind, and `checksum` is the first four bytes
//! of the blake2b-256 hash of `prefix || content`.

use std::fmt;
use std::str::FromStr;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ProtocolError, Result};
use crate::sigma::{type_code, GROUP_ELEMENT_SIZE, PROVE_DLOG};

type Blake2b256 = Blake2b<U32>;

const CHECKSUM_LEN: usize = 4;

/// Header, SigmaProp type and ProveDlog marker of a pay-to-public-key tree.
const P2PK_TREE_PREFIX: [u8; 3] = [0x00, type_code::SIGMA_PROP, PROVE_DLOG];

pub fn blake2b256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    fn prefix(&self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x10,
        }
    }
}

impl FromStr for Network {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(ProtocolError::InvalidAddress(format!(
                "unknown network {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    P2pk = 1,
    P2sh = 2,
    P2s = 3,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    kind: AddressKind,
    content: Vec<u8>,
}

impl Address {
    /// Address paying to `program`: P2PK when the program is a bare
    /// public-key proposition, P2S otherwise.
    pub fn from_program(network: Network, program: &[u8]) -> Self {
        let is_p2pk = program.len() == P2PK_TREE_PREFIX.len() + GROUP_ELEMENT_SIZE
            && program.starts_with(&P2PK_TREE_PREFIX);
        if is_p2pk {
            Self {
                network,
                kind: AddressKind::P2pk,
                content: program[P2PK_TREE_PREFIX.len()..].to_vec(),
            }
        } else {
            Self {
                network,
                kind: AddressKind::P2s,
                content: program.to_vec(),
            }
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    /// Program bytes a box must carry to be spendable by this address.
    pub fn to_program_bytes(&self) -> Result<Vec<u8>> {
        match self.kind {
            AddressKind::P2pk => {
                let mut tree = P2PK_TREE_PREFIX.to_vec();
                tree.extend_from_slice(&self.content);
                Ok(tree)
            }
            AddressKind::P2s => Ok(self.content.clone()),
            AddressKind::P2sh => Err(ProtocolError::InvalidAddress(
                "P2SH addresses are not supported as program identities".into(),
            )),
        }
    }

    pub fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(1 + self.content.len() + CHECKSUM_LEN);
        raw.push(self.network.prefix() + self.kind as u8);
        raw.extend_from_slice(&self.content);
        let checksum = blake2b256(&raw);
        raw.extend_from_slice(&checksum[..CHECKSUM_LEN]);
        bs58::encode(raw).into_string()
    }

    pub fn parse(encoded: &str) -> Result<Self> {
        let raw = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| ProtocolError::InvalidAddress(format!("{encoded}: {e}")))?;
        if raw.len() <= 1 + CHECKSUM_LEN {
            return Err(ProtocolError::InvalidAddress(format!(
                "{encoded}: too short"
            )));
        }
        let (body, checksum) = raw.split_at(raw.len() - CHECKSUM_LEN);
        if blake2b256(body)[..CHECKSUM_LEN] != *checksum {
            return Err(ProtocolError::InvalidAddress(format!(
                "{encoded}: checksum mismatch"
            )));
        }

        let network = match body[0] & 0xf0 {
            0x00 => Network::Mainnet,
            0x10 => Network::Testnet,
            other => {
                return Err(ProtocolError::InvalidAddress(format!(
                    "{encoded}: unknown network prefix 0x{other:02x}"
                )))
            }
        };
        let kind = match body[0] & 0x0f {
            1 => AddressKind::P2pk,
            2 => AddressKind::P2sh,
            3 => AddressKind::P2s,
            other => {
                return Err(ProtocolError::InvalidAddress(format!(
                    "{encoded}: unknown address type {other}"
                )))
            }
        };
        let content = body[1..].to_vec();
        if kind == AddressKind::P2pk && content.len() != GROUP_ELEMENT_SIZE {
            return Err(ProtocolError::InvalidAddress(format!(
                "{encoded}: P2PK content must be 33 bytes"
            )));
        }
        Ok(Self {
            network,
            kind,
            content,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.encode())
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}
