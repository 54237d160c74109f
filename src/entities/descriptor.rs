use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkVariant {
    Tls,
    NonTls,
    Grpc,
    UdpCustom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionLink {
    pub variant: LinkVariant,
    pub uri: String,
}

/// Rendered, client-consumable form of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub text: String,
    pub links: Vec<ConnectionLink>,
}
