use crate::entities::{Account, ConnectionLink, Descriptor, LinkVariant, Protocol, ServerMetadata};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::fmt::Write;

const RULE: &str = "---------------------------------------------------";
const UDP_CUSTOM_PORTS: &str = "1-65535";

/// Connection descriptor for `account`, stamped with the current local time.
pub fn render(account: &Account, server: &ServerMetadata) -> Descriptor {
    render_at(account, server, Local::now().naive_local())
}

/// Same as [`render`] with an explicit creation stamp; the output depends on nothing else.
pub fn render_at(account: &Account, server: &ServerMetadata, created: NaiveDateTime) -> Descriptor {
    let links = links(account, &server.domain);
    let text = text(account, server, &links, created);

    Descriptor { text, links }
}

pub fn links(account: &Account, domain: &str) -> Vec<ConnectionLink> {
    let label = urlencoding::encode(&account.username);
    let link = |variant, uri| ConnectionLink { variant, uri };

    match account.protocol {
        Protocol::Ssh => {
            let login = format!("{}:{}", account.username, account.credential);
            vec![
                link(LinkVariant::Tls, format!("{domain}:443@{login}")),
                link(LinkVariant::NonTls, format!("{domain}:80@{login}")),
                link(LinkVariant::UdpCustom, format!("{domain}:{UDP_CUSTOM_PORTS}@{login}")),
            ]
        }
        Protocol::Vmess => vec![
            link(LinkVariant::Tls, vmess_uri(account, domain, Transport::WsTls)),
            link(LinkVariant::NonTls, vmess_uri(account, domain, Transport::Ws)),
            link(LinkVariant::Grpc, vmess_uri(account, domain, Transport::Grpc)),
        ],
        Protocol::Vless => {
            let id = &account.credential;
            let path = Protocol::Vless.ws_path();
            let service = Protocol::Vless.grpc_service();
            vec![
                link(
                    LinkVariant::Tls,
                    format!("vless://{id}@{domain}:443?path={path}&security=tls&encryption=none&host={domain}&type=ws&sni={domain}#{label}"),
                ),
                link(
                    LinkVariant::NonTls,
                    format!("vless://{id}@{domain}:80?path={path}&security=none&encryption=none&host={domain}&type=ws#{label}"),
                ),
                link(
                    LinkVariant::Grpc,
                    format!("vless://{id}@{domain}:443?mode=gun&security=tls&encryption=none&type=grpc&serviceName={service}&sni={domain}#{label}"),
                ),
            ]
        }
        Protocol::Shadowsocks => {
            let user_info = STANDARD.encode(format!("{}:{}", account.cipher(), account.credential));
            let path = Protocol::Shadowsocks.ws_path();
            let service = Protocol::Shadowsocks.grpc_service();
            vec![
                link(
                    LinkVariant::Tls,
                    format!("ss://{user_info}@{domain}:443?path={path}&security=tls&encryption=none&type=ws#{label}"),
                ),
                link(
                    LinkVariant::NonTls,
                    format!("ss://{user_info}@{domain}:80?path={path}&security=none&encryption=none&type=ws#{label}"),
                ),
                link(
                    LinkVariant::Grpc,
                    format!("ss://{user_info}@{domain}:443?mode=gun&security=tls&encryption=none&type=grpc&serviceName={service}&sni={domain}#{label}"),
                ),
            ]
        }
        Protocol::Trojan => {
            let password = urlencoding::encode(&account.credential);
            let path = Protocol::Trojan.ws_path();
            let service = Protocol::Trojan.grpc_service();
            vec![
                link(
                    LinkVariant::Tls,
                    format!("trojan://{password}@{domain}:443?path={path}&security=tls&host={domain}&type=ws&sni={domain}#{label}"),
                ),
                link(
                    LinkVariant::Grpc,
                    format!("trojan://{password}@{domain}:443?mode=gun&security=tls&type=grpc&serviceName={service}&sni={domain}#{label}"),
                ),
            ]
        }
    }
}

#[derive(Clone, Copy)]
enum Transport {
    WsTls,
    Ws,
    Grpc,
}

#[derive(Serialize)]
struct VmessLink<'a> {
    v: &'static str,
    ps: &'a str,
    add: &'a str,
    port: &'static str,
    id: &'a str,
    aid: &'static str,
    net: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    host: &'a str,
    tls: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sni: Option<&'a str>,
}

fn vmess_uri(account: &Account, domain: &str, transport: Transport) -> String {
    let (port, net, tls, path, sni) = match transport {
        Transport::WsTls => ("443", "ws", "tls", Protocol::Vmess.ws_path(), None),
        Transport::Ws => ("80", "ws", "none", Protocol::Vmess.ws_path(), None),
        Transport::Grpc => ("443", "grpc", "tls", Protocol::Vmess.grpc_service(), Some(domain)),
    };

    let link = VmessLink {
        v: "2",
        ps: &account.username,
        add: domain,
        port,
        id: &account.credential,
        aid: "0",
        net,
        kind: "none",
        host: domain,
        tls,
        path: Some(path),
        sni,
    };

    // the struct has only string fields, encoding cannot fail
    let json = serde_json::to_string(&link).unwrap_or_default();
    format!("vmess://{}", STANDARD.encode(json))
}

fn title(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Ssh => "SSH",
        Protocol::Vmess => "Vmess",
        Protocol::Vless => "Vless",
        Protocol::Shadowsocks => "Shadowsocks",
        Protocol::Trojan => "Trojan",
    }
}

fn link_label(variant: LinkVariant) -> &'static str {
    match variant {
        LinkVariant::Tls => "Link TLS",
        LinkVariant::NonTls => "Link none TLS",
        LinkVariant::Grpc => "Link gRPC",
        LinkVariant::UdpCustom => "UDP Custom",
    }
}

fn field(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "{label:<17}: {value}");
}

fn unlimited_or(value: u64, unit: &str) -> String {
    if value == 0 {
        "Unlimited".to_string()
    } else {
        format!("{value} {unit}")
    }
}

fn text(account: &Account, server: &ServerMetadata, links: &[ConnectionLink], created: NaiveDateTime) -> String {
    let protocol = account.protocol;
    let mut out = String::with_capacity(1024);

    let _ = writeln!(out, "{RULE}\n   {} Account\n{RULE}", title(protocol));
    field(&mut out, "Remarks", &account.username);
    field(&mut out, "Domain", &server.domain);
    field(&mut out, "ISP", &server.isp);
    field(&mut out, "Location", &server.city);
    field(&mut out, "User Quota", unlimited_or(account.limits.quota_gb, "GB"));
    field(
        &mut out,
        "User IP",
        unlimited_or(u64::from(account.limits.ip_limit), "IP"),
    );

    match protocol {
        Protocol::Ssh => {
            field(&mut out, "Username", &account.username);
            field(&mut out, "Password", &account.credential);
            field(&mut out, "Port SSH WS", "80, 8080");
            field(&mut out, "Port SSH SSL WS", "443");
            field(&mut out, "Port UDP Custom", UDP_CUSTOM_PORTS);
            field(&mut out, "Host SlowDNS", &server.ns);
            field(&mut out, "Pubkey", &server.pubkey);
        }
        Protocol::Vmess | Protocol::Vless => {
            field(&mut out, "id", &account.credential);
            if protocol == Protocol::Vmess {
                field(&mut out, "alterId", 0);
                field(&mut out, "Security", "auto");
            } else {
                field(&mut out, "Encryption", "none");
            }
            field(&mut out, "Network", "ws, grpc");
            field(&mut out, "Path", protocol.ws_path());
            field(&mut out, "ServiceName", protocol.grpc_service());
            field(&mut out, "Xray DNS", &server.ns);
            field(&mut out, "Pubkey", &server.pubkey);
        }
        Protocol::Shadowsocks => {
            field(&mut out, "Password", &account.credential);
            field(&mut out, "Cipher", account.cipher());
            field(&mut out, "Network", "ws, grpc");
            field(&mut out, "Path", protocol.ws_path());
            field(&mut out, "ServiceName", protocol.grpc_service());
        }
        Protocol::Trojan => {
            field(&mut out, "Key", &account.credential);
            field(&mut out, "Network", "ws, grpc");
            field(&mut out, "Path", protocol.ws_path());
            field(&mut out, "ServiceName", protocol.grpc_service());
        }
    }

    for link in links {
        let _ = writeln!(out, "{RULE}\n{}:\n{}", link_label(link.variant), link.uri);
    }

    let _ = writeln!(out, "{RULE}");
    field(
        &mut out,
        "Account Type",
        if account.is_trial() { "Trial" } else { "Standard" },
    );
    field(&mut out, "Created On", created.format("%d %b %Y %H:%M"));
    field(&mut out, "Expires On", account.expiry.display_long());
    out.push_str(RULE);
    out.push('\n');

    out
}
