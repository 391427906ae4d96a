//! Proxy URI generation
//!
//! Every URI is a fixed template filled from the identity, the tunnel
//! hostname and the network label. Output is byte-for-byte reproducible:
//! nothing random or time-based ends up in a link.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tunnelsub_proto::{ConnectionIdentity, Scheme};
use url::form_urlencoded;

use crate::isp::{resolve_label, IspLookup};

/// Default TLS fingerprint advertised to clients
pub const DEFAULT_FINGERPRINT: &str = "chrome";

/// Default websocket early-data size appended to every path
pub const DEFAULT_EARLY_DATA: u32 = 2560;

/// Errors that can occur while generating links
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Hostname cannot be empty")]
    EmptyHostname,

    #[error("Link set is empty")]
    EmptyLinkSet,

    #[error("Failed to encode vmess payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Optional link parameters
///
/// Blank values drop the matching query parameter. They never drop a scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// TLS fingerprint (`fp`)
    pub fingerprint: Option<String>,
    /// Early-data size appended to ws paths as `?ed=<n>`
    pub early_data: Option<u32>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            fingerprint: Some(DEFAULT_FINGERPRINT.to_string()),
            early_data: Some(DEFAULT_EARLY_DATA),
        }
    }
}

impl LinkOptions {
    fn fingerprint(&self) -> Option<&str> {
        self.fingerprint
            .as_deref()
            .map(str::trim)
            .filter(|fp| !fp.is_empty())
    }

    /// Websocket path for a scheme, including the early-data hint
    pub fn ws_path(&self, scheme: Scheme) -> String {
        match self.early_data {
            Some(ed) => format!("{}?ed={}", scheme.ws_path(), ed),
            None => scheme.ws_path().to_string(),
        }
    }
}

/// A single generated proxy URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub scheme: Scheme,
    pub uri: String,
}

/// Ordered set of links, one per scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSet {
    links: Vec<Link>,
}

impl LinkSet {
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, scheme: Scheme) -> Option<&Link> {
        self.links.iter().find(|link| link.scheme == scheme)
    }

    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|link| link.uri.as_str())
    }

    /// Links separated by a blank line, the text a subscription encodes
    pub fn joined(&self) -> String {
        self.uris().collect::<Vec<_>>().join("\n\n")
    }
}

/// JSON body of a `vmess://` link
///
/// Field order is part of the output and must stay fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmessPayload {
    pub v: String,
    pub ps: String,
    pub add: String,
    pub port: u16,
    pub id: String,
    pub aid: String,
    pub scy: String,
    pub net: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub path: String,
    pub tls: String,
    pub sni: String,
    pub alpn: String,
    pub fp: String,
}

/// Builds link sets for a fixed identity
#[derive(Debug, Clone)]
pub struct LinkGenerator {
    identity: ConnectionIdentity,
    options: LinkOptions,
}

impl LinkGenerator {
    pub fn new(identity: ConnectionIdentity, options: LinkOptions) -> Self {
        Self { identity, options }
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    /// Fetch the network label and build the link set
    ///
    /// A failed lookup falls back to the placeholder label, so this only
    /// fails on an empty hostname.
    pub async fn generate(
        &self,
        hostname: &str,
        lookup: &dyn IspLookup,
    ) -> Result<LinkSet, LinkError> {
        if hostname.trim().is_empty() {
            return Err(LinkError::EmptyHostname);
        }
        let label = resolve_label(lookup).await;
        self.build(hostname, &label)
    }

    /// Build the link set from already-known inputs
    pub fn build(&self, hostname: &str, isp_label: &str) -> Result<LinkSet, LinkError> {
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return Err(LinkError::EmptyHostname);
        }

        let remark = self.remark(isp_label);
        let mut links = Vec::with_capacity(Scheme::ALL.len());
        for scheme in Scheme::ALL {
            let uri = match scheme {
                Scheme::Vless | Scheme::Trojan => self.ws_uri(scheme, hostname, &remark),
                Scheme::Vmess => self.vmess_uri(hostname, isp_label)?,
            };
            debug!("Generated {} link for {}", scheme, hostname);
            links.push(Link { scheme, uri });
        }

        Ok(LinkSet { links })
    }

    /// Build the decoded vmess payload for a hostname
    pub fn vmess_payload(&self, hostname: &str, isp_label: &str) -> VmessPayload {
        VmessPayload {
            v: "2".to_string(),
            ps: self.remark(isp_label),
            add: self.identity.endpoint_host.clone(),
            port: self.identity.endpoint_port,
            id: self.identity.user_id.clone(),
            aid: "0".to_string(),
            scy: "none".to_string(),
            net: "ws".to_string(),
            kind: "none".to_string(),
            host: hostname.to_string(),
            path: self.options.ws_path(Scheme::Vmess),
            tls: "tls".to_string(),
            sni: hostname.to_string(),
            alpn: String::new(),
            fp: self.options.fingerprint().unwrap_or_default().to_string(),
        }
    }

    fn remark(&self, isp_label: &str) -> String {
        format!("{}-{}", self.identity.display_name, isp_label)
    }

    fn ws_uri(&self, scheme: Scheme, hostname: &str, remark: &str) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        if scheme == Scheme::Vless {
            query.append_pair("encryption", "none");
        }
        query.append_pair("security", "tls");
        query.append_pair("sni", hostname);
        if let Some(fp) = self.options.fingerprint() {
            query.append_pair("fp", fp);
        }
        query.append_pair("type", "ws");
        query.append_pair("host", hostname);
        query.append_pair("path", &self.options.ws_path(scheme));

        format!(
            "{}{}@{}:{}?{}#{}",
            scheme.prefix(),
            self.identity.user_id,
            self.identity.endpoint_host,
            self.identity.endpoint_port,
            query.finish(),
            remark
        )
    }

    fn vmess_uri(&self, hostname: &str, isp_label: &str) -> Result<String, LinkError> {
        let json = serde_json::to_vec(&self.vmess_payload(hostname, isp_label))?;
        Ok(format!("{}{}", Scheme::Vmess.prefix(), STANDARD.encode(json)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isp::{IspLookupError, StaticIsp};
    use async_trait::async_trait;

    const HOST: &str = "random123.trycloudflare.com";

    fn identity() -> ConnectionIdentity {
        ConnectionIdentity::new(
            "ae1ea14e-5fc1-470a-bd0f-f1365c1ebc89",
            "cf.example.net",
            443,
            "node",
        )
        .unwrap()
    }

    fn generator() -> LinkGenerator {
        LinkGenerator::new(identity(), LinkOptions::default())
    }

    struct FailingIsp;

    #[async_trait]
    impl IspLookup for FailingIsp {
        async fn lookup(&self) -> Result<String, IspLookupError> {
            Err(IspLookupError::MissingField("country"))
        }
    }

    #[test]
    fn test_vless_uri_template() {
        let links = generator().build(HOST, "US-Cloudflare").unwrap();
        assert_eq!(
            links.get(Scheme::Vless).unwrap().uri,
            "vless://ae1ea14e-5fc1-470a-bd0f-f1365c1ebc89@cf.example.net:443?encryption=none&security=tls&sni=random123.trycloudflare.com&fp=chrome&type=ws&host=random123.trycloudflare.com&path=%2Fvless-argo%3Fed%3D2560#node-US-Cloudflare"
        );
    }

    #[test]
    fn test_trojan_uri_template() {
        let links = generator().build(HOST, "US-Cloudflare").unwrap();
        assert_eq!(
            links.get(Scheme::Trojan).unwrap().uri,
            "trojan://ae1ea14e-5fc1-470a-bd0f-f1365c1ebc89@cf.example.net:443?security=tls&sni=random123.trycloudflare.com&fp=chrome&type=ws&host=random123.trycloudflare.com&path=%2Ftrojan-argo%3Fed%3D2560#node-US-Cloudflare"
        );
    }

    #[test]
    fn test_vmess_payload_is_base64_json() {
        let links = generator().build(HOST, "US-Cloudflare").unwrap();
        let uri = &links.get(Scheme::Vmess).unwrap().uri;
        let body = uri.strip_prefix("vmess://").unwrap();

        let json = STANDARD.decode(body).unwrap();
        let payload: VmessPayload = serde_json::from_slice(&json).unwrap();

        assert_eq!(payload.ps, "node-US-Cloudflare");
        assert_eq!(payload.add, "cf.example.net");
        assert_eq!(payload.port, 443);
        assert_eq!(payload.host, HOST);
        assert_eq!(payload.sni, HOST);
        assert_eq!(payload.path, "/vmess-argo?ed=2560");
        assert_eq!(payload.fp, "chrome");

        // Field order is fixed
        let text = String::from_utf8(json).unwrap();
        assert!(text.starts_with("{\"v\":\"2\",\"ps\":"));
        assert!(text.ends_with("\"alpn\":\"\",\"fp\":\"chrome\"}"));
    }

    #[test]
    fn test_links_are_ordered_one_per_scheme() {
        let links = generator().build(HOST, "X").unwrap();
        let schemes: Vec<_> = links.links().iter().map(|l| l.scheme).collect();
        assert_eq!(schemes, Scheme::ALL.to_vec());
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = generator().build(HOST, "US-Cloudflare").unwrap();
        let b = generator().build(HOST, "US-Cloudflare").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.joined(), b.joined());
    }

    #[test]
    fn test_blank_fingerprint_drops_parameter_not_scheme() {
        let options = LinkOptions {
            fingerprint: Some("  ".to_string()),
            early_data: Some(2560),
        };
        let links = LinkGenerator::new(identity(), options)
            .build(HOST, "X")
            .unwrap();

        assert_eq!(links.len(), 3);
        for link in links.links() {
            assert!(!link.uri.contains("fp="), "{}", link.uri);
        }
    }

    #[test]
    fn test_no_early_data_keeps_bare_path() {
        let options = LinkOptions {
            fingerprint: None,
            early_data: None,
        };
        let generator = LinkGenerator::new(identity(), options);
        let links = generator.build(HOST, "X").unwrap();

        assert!(links
            .get(Scheme::Vless)
            .unwrap()
            .uri
            .contains("path=%2Fvless-argo#"));
        assert_eq!(generator.vmess_payload(HOST, "X").path, "/vmess-argo");
        assert_eq!(generator.vmess_payload(HOST, "X").fp, "");
    }

    #[test]
    fn test_empty_hostname_rejected() {
        assert!(matches!(
            generator().build("  ", "X"),
            Err(LinkError::EmptyHostname)
        ));
    }

    #[test]
    fn test_joined_uses_blank_line_separator() {
        let links = generator().build(HOST, "X").unwrap();
        let joined = links.joined();
        let parts: Vec<_> = joined.split("\n\n").collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].starts_with("vless://"));
        assert!(parts[1].starts_with("vmess://"));
        assert!(parts[2].starts_with("trojan://"));
    }

    #[tokio::test]
    async fn test_generate_falls_back_to_placeholder_label() {
        let links = generator().generate(HOST, &FailingIsp).await.unwrap();
        assert_eq!(links.len(), 3);
        assert!(links.get(Scheme::Vless).unwrap().uri.ends_with("#node-CF"));
        assert!(links.get(Scheme::Trojan).unwrap().uri.ends_with("#node-CF"));
    }

    #[tokio::test]
    async fn test_generate_matches_build_with_same_label() {
        let lookup = StaticIsp::new("DE-Hetzner");
        let generated = generator().generate(HOST, &lookup).await.unwrap();
        let built = generator().build(HOST, "DE-Hetzner").unwrap();
        assert_eq!(generated, built);
    }
}
