//! Server records as delivered by the API and as held in a [`Directory`].
//!
//! [`Directory`]: super::Directory

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Encryption modes in the order the API lists them.
///
/// The integer codes are persisted in settings, so never reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    #[serde(rename = "plain")]
    Rsa,
    Obfs2,
    Obfs3,
    Scramblesuit,
    Ecc,
    #[serde(rename = "xor")]
    EccXor,
}

impl Encryption {
    pub const ALL: [Encryption; 6] = [
        Encryption::Rsa,
        Encryption::Obfs2,
        Encryption::Obfs3,
        Encryption::Scramblesuit,
        Encryption::Ecc,
        Encryption::EccXor,
    ];

    /// Key used for this mode inside the API's `ports` object.
    pub fn api_key(&self) -> &'static str {
        match self {
            Encryption::Rsa => "plain",
            Encryption::Obfs2 => "obfs2",
            Encryption::Obfs3 => "obfs3",
            Encryption::Scramblesuit => "scramblesuit",
            Encryption::Ecc => "ecc",
            Encryption::EccXor => "xor",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Encryption::Rsa => "RSA 4096-bit",
            Encryption::Obfs2 => "RSA + TOR (obfs2)",
            Encryption::Obfs3 => "RSA + TOR (obfs3)",
            Encryption::Scramblesuit => "RSA + TOR (scramblesuit)",
            Encryption::Ecc => "ECC (secp384r1)",
            Encryption::EccXor => "ECC + XOR",
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Encryption::Rsa => 0,
            Encryption::Obfs2 => 1,
            Encryption::Obfs3 => 2,
            Encryption::Scramblesuit => 3,
            Encryption::Ecc => 4,
            Encryption::EccXor => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.code() == code)
    }
}

impl Default for Encryption {
    fn default() -> Self {
        Encryption::Rsa
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Last known round-trip time to a server.
///
/// `Unknown` means "never probed since the last load", `Failed` means the
/// last probe produced no usable value. Both collapse to `-1` at the C
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "ms", rename_all = "snake_case")]
pub enum Latency {
    Unknown,
    Failed,
    Measured(u32),
}

impl Latency {
    pub fn millis(&self) -> Option<u32> {
        match self {
            Latency::Measured(ms) => Some(*ms),
            _ => None,
        }
    }

    /// `-1` unless measured.
    pub fn as_sentinel(&self) -> i32 {
        match self {
            Latency::Measured(ms) => i32::try_from(*ms).unwrap_or(i32::MAX),
            _ => -1,
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, Latency::Measured(_))
    }
}

impl Default for Latency {
    fn default() -> Self {
        Latency::Unknown
    }
}

/// Transport of a configured port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

/// A `(transport, port)` pair offered for some encryption mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortSpec {
    pub transport: Transport,
    pub port: u16,
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transport {
            Transport::Tcp => write!(f, "TCP {}", self.port),
            Transport::Udp => write!(f, "UDP {}", self.port),
        }
    }
}

/// One selectable entry (node or hub).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerRecord {
    /// Position in the sorted directory at the last load.
    pub id: usize,
    pub name: String,
    /// DNS name used for connecting and probing.
    pub address: String,
    pub ip: String,
    pub iso_code: String,
    pub load: u8,
    pub latency: Latency,
    pub favorite: bool,
    pub ports: BTreeMap<Encryption, Vec<PortSpec>>,
}

impl ServerRecord {
    pub fn supports(&self, encryption: Encryption) -> bool {
        self.ports
            .get(&encryption)
            .map(|p| !p.is_empty())
            .unwrap_or(false)
    }

    pub fn ports_for(&self, encryption: Encryption) -> &[PortSpec] {
        self.ports
            .get(&encryption)
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }

    /// Hubs are marked by a "Hub" token in their display name.
    pub fn is_hub(&self) -> bool {
        self.name.contains("Hub")
    }
}

// ── API wire format ─────────────────────────────────────────────────────────

/// Server entry exactly as the list endpoints return it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiServer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub iso_code: String,
    #[serde(default, deserialize_with = "load_from_string_or_number")]
    pub server_load: u8,
    #[serde(default)]
    pub ports: ApiPorts,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiPorts {
    #[serde(default)]
    pub tcp: BTreeMap<String, Vec<u16>>,
    #[serde(default)]
    pub udp: BTreeMap<String, Vec<u16>>,
}

fn load_from_string_or_number<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
        Null,
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n,
        Raw::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Raw::Null => 0.0,
    };
    Ok(value.clamp(0.0, 100.0) as u8)
}

impl ApiServer {
    /// Convert into an unsorted record; the directory assigns the id.
    pub fn into_record(self) -> ServerRecord {
        let mut ports: BTreeMap<Encryption, Vec<PortSpec>> = BTreeMap::new();
        for encryption in Encryption::ALL {
            let key = encryption.api_key();
            let tcp = self.ports.tcp.get(key).into_iter().flatten().map(|p| PortSpec {
                transport: Transport::Tcp,
                port: *p,
            });
            let udp = self.ports.udp.get(key).into_iter().flatten().map(|p| PortSpec {
                transport: Transport::Udp,
                port: *p,
            });
            let specs: Vec<PortSpec> = tcp.chain(udp).collect();
            if !specs.is_empty() {
                ports.insert(encryption, specs);
            }
        }

        ServerRecord {
            id: 0,
            name: self.name,
            address: self.hostname,
            ip: self.ip,
            iso_code: self.iso_code.to_uppercase(),
            load: self.server_load,
            latency: Latency::Unknown,
            favorite: false,
            ports,
        }
    }
}

/// Parse a list endpoint body.
pub fn parse_server_list(body: &str) -> Result<Vec<ApiServer>, crate::error::SdkError> {
    if body.trim().is_empty() {
        return Err(crate::error::SdkError::Parse("empty body".to_string()));
    }
    Ok(serde_json::from_str(body)?)
}
