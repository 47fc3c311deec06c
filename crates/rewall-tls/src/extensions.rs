//! TLS hello extensions.
//!
//! Extensions are kept as an ordered list of raw `(type, data)` pairs so
//! unknown types round-trip losslessly; typed views parse and re-encode the
//! ones this implementation understands. KeyShare and PreSharedKey encode
//! differently depending on which hello they sit in, so their codecs carry
//! the hello role.

use crate::codec::{put_u16, put_u32, put_u8, put_vec, Reader};
use crate::crypt::{NamedGroup, PskKeyExchangeMode, SignatureScheme};
use crate::error::TlsError;
use crate::handshake::HandshakeType;

/// TLS extension type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionType(pub u16);

impl ExtensionType {
    pub const SERVER_NAME: Self = Self(0);
    pub const SUPPORTED_GROUPS: Self = Self(10);
    pub const SIGNATURE_ALGORITHMS: Self = Self(13);
    pub const ALPN: Self = Self(16);
    pub const PRE_SHARED_KEY: Self = Self(41);
    pub const EARLY_DATA: Self = Self(42);
    pub const SUPPORTED_VERSIONS: Self = Self(43);
    pub const COOKIE: Self = Self(44);
    pub const PSK_KEY_EXCHANGE_MODES: Self = Self(45);
    pub const KEY_SHARE: Self = Self(51);
}

/// A raw extension: type plus opaque data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_type: ExtensionType,
    pub data: Vec<u8>,
}

/// Ordered extension list with per-type uniqueness.
///
/// `add` replaces an existing extension of the same type in place, keeping
/// its position, so a parse-modify-remarshal cycle preserves wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionList(Vec<Extension>);

impl ExtensionList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn add(&mut self, ext: Extension) {
        if let Some(existing) = self
            .0
            .iter_mut()
            .find(|e| e.extension_type == ext.extension_type)
        {
            existing.data = ext.data;
        } else {
            self.0.push(ext);
        }
    }

    pub fn find(&self, extension_type: ExtensionType) -> Option<&Extension> {
        self.0.iter().find(|e| e.extension_type == extension_type)
    }

    pub fn has(&self, extension_type: ExtensionType) -> bool {
        self.find(extension_type).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Extension> {
        self.0.iter()
    }

    /// The last extension in wire order, if any.
    pub fn last(&self) -> Option<&Extension> {
        self.0.last()
    }

    /// Marshal as `Extension extensions<0..2^16-1>`.
    pub fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        let mut body = Vec::new();
        for ext in &self.0 {
            put_u16(&mut body, ext.extension_type.0);
            put_vec(&mut body, 2, &ext.data)?;
        }
        let mut out = Vec::with_capacity(2 + body.len());
        put_vec(&mut out, 2, &body)?;
        Ok(out)
    }

    /// Unmarshal a length-prefixed extension list, rejecting duplicate types.
    pub fn unmarshal(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let body = r.vec(2, 0, 0xffff)?;
        let mut inner = Reader::new(body);
        let mut list = ExtensionList::new();
        while !inner.is_done() {
            let extension_type = ExtensionType(inner.u16()?);
            let data = inner.vec(2, 0, 0xffff)?.to_vec();
            if list.has(extension_type) {
                return Err(TlsError::Decode(format!(
                    "duplicate extension {:04x}",
                    extension_type.0
                )));
            }
            list.0.push(Extension {
                extension_type,
                data,
            });
        }
        Ok(list)
    }
}

// ---------------------------------------------------------------------------
// server_name
// ---------------------------------------------------------------------------

/// `server_name` (SNI). Only `host_name` entries are produced or consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNameExtension(pub String);

impl ServerNameExtension {
    pub fn to_extension(&self) -> Result<Extension, TlsError> {
        let mut entry = Vec::new();
        put_u8(&mut entry, 0); // name_type host_name
        put_vec(&mut entry, 2, self.0.as_bytes())?;
        let mut data = Vec::new();
        put_vec(&mut data, 2, &entry)?;
        Ok(Extension {
            extension_type: ExtensionType::SERVER_NAME,
            data,
        })
    }

    pub fn from_list(list: &ExtensionList) -> Result<Option<Self>, TlsError> {
        let Some(ext) = list.find(ExtensionType::SERVER_NAME) else {
            return Ok(None);
        };
        let mut r = Reader::new(&ext.data);
        let entries = r.vec(2, 1, 0xffff)?;
        r.finish(false)?;
        let mut er = Reader::new(entries);
        while !er.is_done() {
            let name_type = er.u8()?;
            let name = er.vec(2, 1, 0xffff)?;
            if name_type == 0 {
                let host = String::from_utf8(name.to_vec())
                    .map_err(|_| TlsError::Decode("server_name is not UTF-8".into()))?;
                return Ok(Some(ServerNameExtension(host)));
            }
        }
        Err(TlsError::Decode("server_name has no host_name entry".into()))
    }
}

// ---------------------------------------------------------------------------
// supported_groups / signature_algorithms / supported_versions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedGroupsExtension(pub Vec<NamedGroup>);

impl SupportedGroupsExtension {
    pub fn to_extension(&self) -> Result<Extension, TlsError> {
        let mut body = Vec::new();
        for g in &self.0 {
            put_u16(&mut body, g.0);
        }
        let mut data = Vec::new();
        put_vec(&mut data, 2, &body)?;
        Ok(Extension {
            extension_type: ExtensionType::SUPPORTED_GROUPS,
            data,
        })
    }

    pub fn from_list(list: &ExtensionList) -> Result<Option<Self>, TlsError> {
        let Some(ext) = list.find(ExtensionType::SUPPORTED_GROUPS) else {
            return Ok(None);
        };
        let mut r = Reader::new(&ext.data);
        let body = r.vec(2, 2, 0xffff)?;
        r.finish(false)?;
        if body.len() % 2 != 0 {
            return Err(TlsError::Decode("odd supported_groups length".into()));
        }
        let groups = body
            .chunks_exact(2)
            .map(|c| NamedGroup(u16::from_be_bytes([c[0], c[1]])))
            .collect();
        Ok(Some(SupportedGroupsExtension(groups)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureAlgorithmsExtension(pub Vec<SignatureScheme>);

impl SignatureAlgorithmsExtension {
    pub fn to_extension(&self) -> Result<Extension, TlsError> {
        let mut body = Vec::new();
        for s in &self.0 {
            put_u16(&mut body, s.0);
        }
        let mut data = Vec::new();
        put_vec(&mut data, 2, &body)?;
        Ok(Extension {
            extension_type: ExtensionType::SIGNATURE_ALGORITHMS,
            data,
        })
    }

    pub fn from_list(list: &ExtensionList) -> Result<Option<Self>, TlsError> {
        let Some(ext) = list.find(ExtensionType::SIGNATURE_ALGORITHMS) else {
            return Ok(None);
        };
        Self::from_data(&ext.data).map(Some)
    }

    pub fn from_data(data: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(data);
        let body = r.vec(2, 2, 0xffff)?;
        r.finish(false)?;
        if body.len() % 2 != 0 {
            return Err(TlsError::Decode("odd signature_algorithms length".into()));
        }
        let schemes = body
            .chunks_exact(2)
            .map(|c| SignatureScheme(u16::from_be_bytes([c[0], c[1]])))
            .collect();
        Ok(SignatureAlgorithmsExtension(schemes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedVersionsExtension(pub Vec<u16>);

impl SupportedVersionsExtension {
    pub fn to_extension(&self) -> Result<Extension, TlsError> {
        let mut body = Vec::new();
        for v in &self.0 {
            put_u16(&mut body, *v);
        }
        let mut data = Vec::new();
        put_vec(&mut data, 1, &body)?;
        Ok(Extension {
            extension_type: ExtensionType::SUPPORTED_VERSIONS,
            data,
        })
    }

    pub fn from_list(list: &ExtensionList) -> Result<Option<Self>, TlsError> {
        let Some(ext) = list.find(ExtensionType::SUPPORTED_VERSIONS) else {
            return Ok(None);
        };
        let mut r = Reader::new(&ext.data);
        let body = r.vec(1, 2, 254)?;
        r.finish(false)?;
        if body.len() % 2 != 0 {
            return Err(TlsError::Decode("odd supported_versions length".into()));
        }
        let versions = body
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        Ok(Some(SupportedVersionsExtension(versions)))
    }
}

// ---------------------------------------------------------------------------
// key_share
// ---------------------------------------------------------------------------

/// One offered or selected key share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry {
    pub group: NamedGroup,
    pub key_exchange: Vec<u8>,
}

/// `key_share`, role-dependent: the ClientHello carries a list of entries,
/// the ServerHello exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareExtension {
    pub role: HandshakeType,
    pub shares: Vec<KeyShareEntry>,
}

impl KeyShareExtension {
    fn marshal_entry(entry: &KeyShareEntry, out: &mut Vec<u8>) -> Result<(), TlsError> {
        put_u16(out, entry.group.0);
        put_vec(out, 2, &entry.key_exchange)
    }

    fn unmarshal_entry(r: &mut Reader<'_>) -> Result<KeyShareEntry, TlsError> {
        let group = NamedGroup(r.u16()?);
        let key_exchange = r.vec(2, 1, 0xffff)?.to_vec();
        Ok(KeyShareEntry {
            group,
            key_exchange,
        })
    }

    pub fn to_extension(&self) -> Result<Extension, TlsError> {
        let mut data = Vec::new();
        match self.role {
            HandshakeType::ClientHello => {
                let mut body = Vec::new();
                for share in &self.shares {
                    Self::marshal_entry(share, &mut body)?;
                }
                put_vec(&mut data, 2, &body)?;
            }
            HandshakeType::ServerHello => {
                let share = self.shares.first().ok_or_else(|| {
                    TlsError::Internal("server key_share requires exactly one entry".into())
                })?;
                Self::marshal_entry(share, &mut data)?;
            }
            _ => {
                return Err(TlsError::Internal(
                    "key_share only appears in hello messages".into(),
                ))
            }
        }
        Ok(Extension {
            extension_type: ExtensionType::KEY_SHARE,
            data,
        })
    }

    pub fn from_list(
        role: HandshakeType,
        list: &ExtensionList,
    ) -> Result<Option<Self>, TlsError> {
        let Some(ext) = list.find(ExtensionType::KEY_SHARE) else {
            return Ok(None);
        };
        let mut r = Reader::new(&ext.data);
        let shares = match role {
            HandshakeType::ClientHello => {
                let body = r.vec(2, 0, 0xffff)?;
                let mut br = Reader::new(body);
                let mut shares = Vec::new();
                while !br.is_done() {
                    shares.push(Self::unmarshal_entry(&mut br)?);
                }
                shares
            }
            HandshakeType::ServerHello => vec![Self::unmarshal_entry(&mut r)?],
            _ => {
                return Err(TlsError::Internal(
                    "key_share only appears in hello messages".into(),
                ))
            }
        };
        r.finish(false)?;
        Ok(Some(KeyShareExtension { role, shares }))
    }
}

// ---------------------------------------------------------------------------
// pre_shared_key
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskIdentity {
    pub identity: Vec<u8>,
    pub obfuscated_ticket_age: u32,
}

/// `pre_shared_key`, role-dependent: identities plus binders in the
/// ClientHello, the selected identity index in the ServerHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreSharedKeyExtension {
    pub role: HandshakeType,
    pub identities: Vec<PskIdentity>,
    pub binders: Vec<Vec<u8>>,
    pub selected_identity: u16,
}

impl PreSharedKeyExtension {
    pub fn client(identities: Vec<PskIdentity>, binders: Vec<Vec<u8>>) -> Self {
        Self {
            role: HandshakeType::ClientHello,
            identities,
            binders,
            selected_identity: 0,
        }
    }

    pub fn server(selected_identity: u16) -> Self {
        Self {
            role: HandshakeType::ServerHello,
            identities: Vec::new(),
            binders: Vec::new(),
            selected_identity,
        }
    }

    /// Encoded size of the binder list, including its two-byte length head.
    /// The truncated ClientHello used for binder computation ends right
    /// before this many trailing bytes.
    pub fn binders_len(&self) -> usize {
        2 + self.binders.iter().map(|b| 1 + b.len()).sum::<usize>()
    }

    pub fn to_extension(&self) -> Result<Extension, TlsError> {
        let mut data = Vec::new();
        match self.role {
            HandshakeType::ClientHello => {
                let mut ids = Vec::new();
                for id in &self.identities {
                    put_vec(&mut ids, 2, &id.identity)?;
                    put_u32(&mut ids, id.obfuscated_ticket_age);
                }
                put_vec(&mut data, 2, &ids)?;

                let mut binders = Vec::new();
                for binder in &self.binders {
                    put_vec(&mut binders, 1, binder)?;
                }
                put_vec(&mut data, 2, &binders)?;
            }
            HandshakeType::ServerHello => {
                put_u16(&mut data, self.selected_identity);
            }
            _ => {
                return Err(TlsError::Internal(
                    "pre_shared_key only appears in hello messages".into(),
                ))
            }
        }
        Ok(Extension {
            extension_type: ExtensionType::PRE_SHARED_KEY,
            data,
        })
    }

    pub fn from_list(
        role: HandshakeType,
        list: &ExtensionList,
    ) -> Result<Option<Self>, TlsError> {
        let Some(ext) = list.find(ExtensionType::PRE_SHARED_KEY) else {
            return Ok(None);
        };
        let mut r = Reader::new(&ext.data);
        let parsed = match role {
            HandshakeType::ClientHello => {
                let ids_body = r.vec(2, 7, 0xffff)?;
                let mut ir = Reader::new(ids_body);
                let mut identities = Vec::new();
                while !ir.is_done() {
                    let identity = ir.vec(2, 1, 0xffff)?.to_vec();
                    let obfuscated_ticket_age = ir.u32()?;
                    identities.push(PskIdentity {
                        identity,
                        obfuscated_ticket_age,
                    });
                }

                let binders_body = r.vec(2, 33, 0xffff)?;
                let mut br = Reader::new(binders_body);
                let mut binders = Vec::new();
                while !br.is_done() {
                    binders.push(br.vec(1, 32, 255)?.to_vec());
                }
                if binders.len() != identities.len() {
                    return Err(TlsError::Decode(
                        "pre_shared_key binder count mismatch".into(),
                    ));
                }
                PreSharedKeyExtension {
                    role,
                    identities,
                    binders,
                    selected_identity: 0,
                }
            }
            HandshakeType::ServerHello => PreSharedKeyExtension {
                role,
                identities: Vec::new(),
                binders: Vec::new(),
                selected_identity: r.u16()?,
            },
            _ => {
                return Err(TlsError::Internal(
                    "pre_shared_key only appears in hello messages".into(),
                ))
            }
        };
        r.finish(false)?;
        Ok(Some(parsed))
    }
}

// ---------------------------------------------------------------------------
// psk_key_exchange_modes / early_data / cookie / ALPN
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskKeyExchangeModesExtension(pub Vec<PskKeyExchangeMode>);

impl PskKeyExchangeModesExtension {
    pub fn to_extension(&self) -> Result<Extension, TlsError> {
        let body: Vec<u8> = self.0.iter().map(|m| *m as u8).collect();
        let mut data = Vec::new();
        put_vec(&mut data, 1, &body)?;
        Ok(Extension {
            extension_type: ExtensionType::PSK_KEY_EXCHANGE_MODES,
            data,
        })
    }

    pub fn from_list(list: &ExtensionList) -> Result<Option<Self>, TlsError> {
        let Some(ext) = list.find(ExtensionType::PSK_KEY_EXCHANGE_MODES) else {
            return Ok(None);
        };
        let mut r = Reader::new(&ext.data);
        let body = r.vec(1, 1, 255)?;
        r.finish(false)?;
        let modes = body
            .iter()
            .map(|&b| PskKeyExchangeMode::from_u8(b))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(PskKeyExchangeModesExtension(modes)))
    }
}

/// `early_data`: empty in the ClientHello and EncryptedExtensions; in a
/// NewSessionTicket it carries the early-data lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarlyDataExtension {
    pub max_early_data_size: Option<u32>,
}

impl EarlyDataExtension {
    pub fn empty() -> Self {
        Self {
            max_early_data_size: None,
        }
    }

    pub fn to_extension(&self) -> Result<Extension, TlsError> {
        let mut data = Vec::new();
        if let Some(size) = self.max_early_data_size {
            put_u32(&mut data, size);
        }
        Ok(Extension {
            extension_type: ExtensionType::EARLY_DATA,
            data,
        })
    }

    pub fn from_list(list: &ExtensionList) -> Result<Option<Self>, TlsError> {
        let Some(ext) = list.find(ExtensionType::EARLY_DATA) else {
            return Ok(None);
        };
        let mut r = Reader::new(&ext.data);
        let max_early_data_size = if r.remaining() == 0 {
            None
        } else {
            Some(r.u32()?)
        };
        r.finish(false)?;
        Ok(Some(EarlyDataExtension {
            max_early_data_size,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieExtension(pub Vec<u8>);

impl CookieExtension {
    pub fn to_extension(&self) -> Result<Extension, TlsError> {
        let mut data = Vec::new();
        put_vec(&mut data, 2, &self.0)?;
        Ok(Extension {
            extension_type: ExtensionType::COOKIE,
            data,
        })
    }

    pub fn from_list(list: &ExtensionList) -> Result<Option<Self>, TlsError> {
        let Some(ext) = list.find(ExtensionType::COOKIE) else {
            return Ok(None);
        };
        let mut r = Reader::new(&ext.data);
        let cookie = r.vec(2, 1, 0xffff)?.to_vec();
        r.finish(false)?;
        Ok(Some(CookieExtension(cookie)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlpnExtension(pub Vec<String>);

impl AlpnExtension {
    pub fn to_extension(&self) -> Result<Extension, TlsError> {
        let mut body = Vec::new();
        for proto in &self.0 {
            put_vec(&mut body, 1, proto.as_bytes())?;
        }
        let mut data = Vec::new();
        put_vec(&mut data, 2, &body)?;
        Ok(Extension {
            extension_type: ExtensionType::ALPN,
            data,
        })
    }

    pub fn from_list(list: &ExtensionList) -> Result<Option<Self>, TlsError> {
        let Some(ext) = list.find(ExtensionType::ALPN) else {
            return Ok(None);
        };
        let mut r = Reader::new(&ext.data);
        let body = r.vec(2, 2, 0xffff)?;
        r.finish(false)?;
        let mut br = Reader::new(body);
        let mut protos = Vec::new();
        while !br.is_done() {
            let name = br.vec(1, 1, 255)?;
            protos.push(
                String::from_utf8(name.to_vec())
                    .map_err(|_| TlsError::Decode("ALPN protocol is not UTF-8".into()))?,
            );
        }
        Ok(Some(AlpnExtension(protos)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(list: &ExtensionList) -> ExtensionList {
        let wire = list.marshal().unwrap();
        let mut r = Reader::new(&wire);
        let parsed = ExtensionList::unmarshal(&mut r).unwrap();
        r.finish(false).unwrap();
        parsed
    }

    #[test]
    fn test_list_roundtrip_preserves_order_and_unknown_types() {
        let mut list = ExtensionList::new();
        list.add(
            ServerNameExtension("example.com".into())
                .to_extension()
                .unwrap(),
        );
        // Unknown extension type must survive opaque
        list.add(Extension {
            extension_type: ExtensionType(0x1234),
            data: vec![0xde, 0xad, 0xbe, 0xef],
        });
        list.add(
            SupportedGroupsExtension(vec![NamedGroup::X25519, NamedGroup::BN256])
                .to_extension()
                .unwrap(),
        );

        let parsed = roundtrip(&list);
        assert_eq!(parsed, list);
        let types: Vec<u16> = parsed.iter().map(|e| e.extension_type.0).collect();
        assert_eq!(types, vec![0, 0x1234, 10]);
    }

    #[test]
    fn test_add_replaces_in_place() {
        let mut list = ExtensionList::new();
        list.add(Extension {
            extension_type: ExtensionType(1),
            data: vec![1],
        });
        list.add(Extension {
            extension_type: ExtensionType(2),
            data: vec![2],
        });
        list.add(Extension {
            extension_type: ExtensionType(1),
            data: vec![9, 9],
        });
        assert_eq!(list.len(), 2);
        assert_eq!(list.iter().next().unwrap().data, vec![9, 9]);
        assert_eq!(list.iter().next().unwrap().extension_type, ExtensionType(1));
    }

    #[test]
    fn test_duplicate_rejected_on_unmarshal() {
        let mut body = Vec::new();
        for _ in 0..2 {
            put_u16(&mut body, 10);
            put_vec(&mut body, 2, &[0, 2, 0, 29]).unwrap();
        }
        let mut wire = Vec::new();
        put_vec(&mut wire, 2, &body).unwrap();
        let mut r = Reader::new(&wire);
        assert!(ExtensionList::unmarshal(&mut r).is_err());
    }

    #[test]
    fn test_server_name_roundtrip() {
        let sni = ServerNameExtension("example.com".into());
        let mut list = ExtensionList::new();
        list.add(sni.to_extension().unwrap());
        let parsed = ServerNameExtension::from_list(&list).unwrap().unwrap();
        assert_eq!(parsed.0, "example.com");
    }

    #[test]
    fn test_key_share_client_roundtrip() {
        let ks = KeyShareExtension {
            role: HandshakeType::ClientHello,
            shares: vec![
                KeyShareEntry {
                    group: NamedGroup::X25519,
                    key_exchange: vec![0xaa; 32],
                },
                KeyShareEntry {
                    group: NamedGroup::BN256,
                    key_exchange: vec![0xbb; 192],
                },
            ],
        };
        let mut list = ExtensionList::new();
        list.add(ks.to_extension().unwrap());
        let parsed = KeyShareExtension::from_list(HandshakeType::ClientHello, &list)
            .unwrap()
            .unwrap();
        assert_eq!(parsed, ks);
    }

    #[test]
    fn test_key_share_server_roundtrip() {
        let ks = KeyShareExtension {
            role: HandshakeType::ServerHello,
            shares: vec![KeyShareEntry {
                group: NamedGroup::SECP256R1,
                key_exchange: vec![0x04; 65],
            }],
        };
        let mut list = ExtensionList::new();
        list.add(ks.to_extension().unwrap());
        let parsed = KeyShareExtension::from_list(HandshakeType::ServerHello, &list)
            .unwrap()
            .unwrap();
        assert_eq!(parsed, ks);
    }

    #[test]
    fn test_psk_client_roundtrip_and_binder_len() {
        let psk = PreSharedKeyExtension::client(
            vec![PskIdentity {
                identity: vec![0, 1, 2, 3],
                obfuscated_ticket_age: 12345,
            }],
            vec![vec![0x42; 32]],
        );
        assert_eq!(psk.binders_len(), 2 + 1 + 32);

        let mut list = ExtensionList::new();
        list.add(psk.to_extension().unwrap());
        let parsed = PreSharedKeyExtension::from_list(HandshakeType::ClientHello, &list)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.identities, psk.identities);
        assert_eq!(parsed.binders, psk.binders);
    }

    #[test]
    fn test_psk_server_roundtrip() {
        let psk = PreSharedKeyExtension::server(0);
        let mut list = ExtensionList::new();
        list.add(psk.to_extension().unwrap());
        let parsed = PreSharedKeyExtension::from_list(HandshakeType::ServerHello, &list)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.selected_identity, 0);
    }

    #[test]
    fn test_psk_binder_count_mismatch() {
        let psk = PreSharedKeyExtension::client(
            vec![
                PskIdentity {
                    identity: vec![1],
                    obfuscated_ticket_age: 0,
                },
                PskIdentity {
                    identity: vec![2],
                    obfuscated_ticket_age: 0,
                },
            ],
            vec![vec![0x42; 32]],
        );
        let mut list = ExtensionList::new();
        list.add(psk.to_extension().unwrap());
        assert!(PreSharedKeyExtension::from_list(HandshakeType::ClientHello, &list).is_err());
    }

    #[test]
    fn test_alpn_roundtrip() {
        let alpn = AlpnExtension(vec!["http/1.1".into(), "h2".into()]);
        let mut list = ExtensionList::new();
        list.add(alpn.to_extension().unwrap());
        let parsed = AlpnExtension::from_list(&list).unwrap().unwrap();
        assert_eq!(parsed.0, vec!["http/1.1".to_string(), "h2".to_string()]);
    }

    #[test]
    fn test_early_data_variants() {
        let mut list = ExtensionList::new();
        list.add(EarlyDataExtension::empty().to_extension().unwrap());
        let parsed = EarlyDataExtension::from_list(&list).unwrap().unwrap();
        assert_eq!(parsed.max_early_data_size, None);

        let mut list = ExtensionList::new();
        list.add(
            EarlyDataExtension {
                max_early_data_size: Some(0xffff),
            }
            .to_extension()
            .unwrap(),
        );
        let parsed = EarlyDataExtension::from_list(&list).unwrap().unwrap();
        assert_eq!(parsed.max_early_data_size, Some(0xffff));
    }

    #[test]
    fn test_cookie_roundtrip() {
        let cookie = CookieExtension(vec![7; 32]);
        let mut list = ExtensionList::new();
        list.add(cookie.to_extension().unwrap());
        let parsed = CookieExtension::from_list(&list).unwrap().unwrap();
        assert_eq!(parsed.0, vec![7; 32]);
    }

    #[test]
    fn test_supported_versions_roundtrip() {
        let sv = SupportedVersionsExtension(vec![0x0304]);
        let mut list = ExtensionList::new();
        list.add(sv.to_extension().unwrap());
        let parsed = SupportedVersionsExtension::from_list(&list).unwrap().unwrap();
        assert_eq!(parsed.0, vec![0x0304]);
    }

    #[test]
    fn test_psk_modes_roundtrip() {
        let modes =
            PskKeyExchangeModesExtension(vec![PskKeyExchangeMode::PskKe, PskKeyExchangeMode::PskDheKe]);
        let mut list = ExtensionList::new();
        list.add(modes.to_extension().unwrap());
        let parsed = PskKeyExchangeModesExtension::from_list(&list).unwrap().unwrap();
        assert_eq!(parsed.0.len(), 2);
    }
}
