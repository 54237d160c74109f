use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::Limits;

/// Tunnel protocol families managed by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Vmess,
    Vless,
    Shadowsocks,
    Trojan,
}

/// What kind of secret an account of a given protocol carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Password,
    Uuid,
}

impl Protocol {
    pub const ALL: [Protocol; 5] = [
        Protocol::Ssh,
        Protocol::Vmess,
        Protocol::Vless,
        Protocol::Shadowsocks,
        Protocol::Trojan,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Trojan => "trojan",
        }
    }

    /// ssh accounts live in the OS user directory, everything else in the proxy config.
    #[inline]
    pub const fn uses_directory(self) -> bool {
        matches!(self, Protocol::Ssh)
    }

    pub const fn credential_kind(self) -> CredentialKind {
        match self {
            Protocol::Vmess | Protocol::Vless => CredentialKind::Uuid,
            _ => CredentialKind::Password,
        }
    }

    /// File name prefix of the published descriptor artifact.
    pub const fn artifact_prefix(self) -> &'static str {
        match self {
            Protocol::Shadowsocks => "sodosokws",
            other => other.as_str(),
        }
    }

    /// Websocket path and gRPC service name the daemon serves this protocol on.
    pub const fn ws_path(self) -> &'static str {
        match self {
            Protocol::Ssh => "/",
            Protocol::Vmess => "/vmess",
            Protocol::Vless => "/vless",
            Protocol::Shadowsocks => "/ss-ws",
            Protocol::Trojan => "/trojan-ws",
        }
    }

    pub const fn grpc_service(self) -> &'static str {
        match self {
            Protocol::Ssh => "",
            Protocol::Vmess => "vmess-grpc",
            Protocol::Vless => "vless-grpc",
            Protocol::Shadowsocks => "ss-grpc",
            Protocol::Trojan => "trojan-grpc",
        }
    }

    pub const fn default_ip_limit(self) -> u32 {
        match self {
            Protocol::Shadowsocks => 0,
            _ => 1,
        }
    }

    pub const fn trial_limits(self) -> Limits {
        let (quota_gb, ip_limit) = match self {
            Protocol::Ssh => (5, 4),
            Protocol::Vmess => (1, 3),
            Protocol::Vless => (1, 2),
            Protocol::Shadowsocks => (5, 0),
            Protocol::Trojan => (1, 3),
        };

        Limits { quota_gb, ip_limit }
    }

    /// Length of the random hex suffix in generated trial usernames.
    pub const fn trial_suffix_len(self) -> usize {
        match self {
            Protocol::Ssh => 4,
            _ => 3,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol {0}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|protocol| protocol.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownProtocol(s.to_string()))
    }
}

/// Which protocols a combined trial request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialTarget {
    All,
    One(Protocol),
}

impl TrialTarget {
    pub fn protocols(self) -> Vec<Protocol> {
        match self {
            TrialTarget::All => Protocol::ALL.to_vec(),
            TrialTarget::One(protocol) => vec![protocol],
        }
    }
}

impl FromStr for TrialTarget {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(TrialTarget::All);
        }

        s.parse().map(TrialTarget::One)
    }
}
