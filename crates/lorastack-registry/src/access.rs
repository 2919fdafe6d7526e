//! API keys and collaborator rights.
//!
//! API keys have the form `NNSXS.<ID>.<SECRET>`. Only the SHA-256 hash of
//! the secret is stored; the full token is returned once, at creation.
//! Access tokens (`MFRWG.` prefix) are recognised by [`parse_token`] but
//! are issued by an OAuth server, not here, so they never authenticate
//! against this registry.
//!
//! Rights of a key on another entity are the intersection of the key's
//! rights and the rights its entity holds as collaborator of that entity.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use lorastack_core::Result;
use lorastack_store::flatten::{flatten, unflatten};
use lorastack_store::{Fields, IndexedStore, Key, TypedStore, Value, from_value, to_value};

use crate::identifiers::EntityIdentifiers;

lorastack_core::define_errors! {
    namespace = "pkg/access";
    pub ERR_TOKEN_MALFORMED = Unauthenticated("token_malformed", "malformed token");
    pub ERR_TOKEN_UNSUPPORTED = Unauthenticated("token_unsupported", "token type `{prefix}` is not accepted here");
    pub ERR_API_KEY_NOT_FOUND = Unauthenticated("api_key_not_found", "API key `{id}` not found");
    pub ERR_API_KEY_MISMATCH = Unauthenticated("api_key_mismatch", "secret of API key `{id}` does not match");
    pub ERR_NO_RIGHTS = InvalidArgument("no_rights", "an API key needs at least one right");
    pub ERR_INSUFFICIENT_RIGHTS = PermissionDenied("insufficient_rights", "insufficient rights on {entity}, missing {missing}");
    pub ERR_UNKNOWN_API_KEY = NotFound("unknown_api_key", "API key `{id}` of {entity} not found");
}

pub const API_KEY_PREFIX: &str = "NNSXS";
pub const ACCESS_TOKEN_PREFIX: &str = "MFRWG";

const API_KEY_ID_BYTES: usize = 16;
const API_KEY_SECRET_BYTES: usize = 32;

/// A right on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Right {
    ApplicationInfo,
    ApplicationSettingsBasic,
    ApplicationSettingsApiKeys,
    ApplicationDevicesRead,
    ApplicationDevicesWrite,
    ApplicationAll,
    GatewayInfo,
    GatewaySettingsBasic,
    GatewaySettingsApiKeys,
    GatewayLink,
    GatewayDelete,
    GatewayAll,
}

impl Right {
    const APPLICATION: [Self; 5] = [
        Self::ApplicationInfo,
        Self::ApplicationSettingsBasic,
        Self::ApplicationSettingsApiKeys,
        Self::ApplicationDevicesRead,
        Self::ApplicationDevicesWrite,
    ];
    const GATEWAY: [Self; 5] = [
        Self::GatewayInfo,
        Self::GatewaySettingsBasic,
        Self::GatewaySettingsApiKeys,
        Self::GatewayLink,
        Self::GatewayDelete,
    ];

    /// The rights this right stands for, including itself.
    fn implied(self) -> Vec<Self> {
        let mut rights = vec![self];
        match self {
            Self::ApplicationAll => rights.extend(Self::APPLICATION),
            Self::GatewayAll => rights.extend(Self::GATEWAY),
            _ => {}
        }
        rights
    }
}

/// A set of rights with `*_ALL` rights expanded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rights(BTreeSet<Right>);

impl Rights {
    pub fn new(rights: impl IntoIterator<Item = Right>) -> Self {
        Self(rights.into_iter().flat_map(Right::implied).collect())
    }

    pub fn contains(&self, right: Right) -> bool {
        self.0.contains(&right)
    }

    /// The rights of `required` missing from this set.
    pub fn missing(&self, required: &[Right]) -> Vec<Right> {
        required
            .iter()
            .copied()
            .filter(|r| !self.0.contains(r))
            .collect()
    }

    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fail with `insufficient_rights` unless all of `required` are held.
    pub fn require(&self, entity: &EntityIdentifiers, required: &[Right]) -> Result<()> {
        let missing = self.missing(required);
        if missing.is_empty() {
            return Ok(());
        }
        let missing = missing
            .iter()
            .map(|r| format!("{r:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        Err(ERR_INSUFFICIENT_RIGHTS
            .with_attributes([("entity", entity.unique_id()), ("missing", missing)]))
    }
}

/// Kind of a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    ApiKey,
    AccessToken,
}

/// A syntactically valid token, split in its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedToken<'a> {
    pub kind: TokenKind,
    pub id: &'a str,
    pub secret: &'a str,
}

/// Split `token` into prefix, id and secret.
pub fn parse_token(token: &str) -> Result<ParsedToken<'_>> {
    let mut parts = token.split('.');
    let (Some(prefix), Some(id), Some(secret), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ERR_TOKEN_MALFORMED.new_error());
    };
    let kind = match prefix {
        API_KEY_PREFIX => TokenKind::ApiKey,
        ACCESS_TOKEN_PREFIX => TokenKind::AccessToken,
        _ => return Err(ERR_TOKEN_MALFORMED.new_error()),
    };
    let well_formed = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric());
    if !well_formed(id) || !well_formed(secret) {
        return Err(ERR_TOKEN_MALFORMED.new_error());
    }
    Ok(ParsedToken { kind, id, secret })
}

fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn random_part(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

/// Metadata of an API key. The secret is never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub entity: EntityIdentifiers,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rights: Vec<Right>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn rights(&self) -> Rights {
        Rights::new(self.rights.iter().copied())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiKeyRecord {
    api_key: ApiKey,
    entity_uid: String,
    key_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Membership {
    entity: EntityIdentifiers,
    entity_uid: String,
    collaborator: EntityIdentifiers,
    collaborator_uid: String,
    #[serde(default)]
    rights: Vec<Right>,
}

fn filter(pairs: &[(&str, &str)]) -> Fields {
    pairs
        .iter()
        .map(|(path, value)| ((*path).to_string(), Value::from(*value)))
        .collect()
}

/// Registry of API keys and collaborator rights.
pub struct AccessRegistry {
    keys: Arc<dyn TypedStore>,
    memberships: Arc<dyn TypedStore>,
}

impl std::fmt::Debug for AccessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessRegistry").finish_non_exhaustive()
    }
}

impl AccessRegistry {
    pub fn new(keys: Arc<dyn TypedStore>, memberships: Arc<dyn TypedStore>) -> Self {
        Self { keys, memberships }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(IndexedStore::new(["api_key.id", "entity_uid"])),
            Arc::new(IndexedStore::new(["entity_uid", "collaborator_uid"])),
        )
    }

    /// Issue an API key for `entity`. Returns the key metadata and the
    /// token, which cannot be recovered later.
    pub async fn create_api_key(
        &self,
        entity: &EntityIdentifiers,
        name: &str,
        rights: &[Right],
    ) -> Result<(ApiKey, String)> {
        entity.validate()?;
        if rights.is_empty() {
            return Err(ERR_NO_RIGHTS.new_error());
        }
        let id = random_part(API_KEY_ID_BYTES);
        let secret = random_part(API_KEY_SECRET_BYTES);
        let api_key = ApiKey {
            id: id.clone(),
            entity: entity.clone(),
            name: name.to_string(),
            rights: rights.iter().copied().collect::<BTreeSet<_>>().into_iter().collect(),
            created_at: Some(Utc::now()),
        };
        let record = ApiKeyRecord {
            api_key: api_key.clone(),
            entity_uid: entity.unique_id(),
            key_hash: hash_secret(&secret),
        };
        self.keys.create(flatten(&to_value(&record)?)?).await?;
        info!(entity = %entity, key_id = %id, name, "API key created");
        Ok((api_key, format!("{API_KEY_PREFIX}.{id}.{secret}")))
    }

    /// Resolve a token to its API key.
    pub async fn authenticate(&self, token: &str) -> Result<ApiKey> {
        let parsed = parse_token(token)?;
        if parsed.kind != TokenKind::ApiKey {
            return Err(ERR_TOKEN_UNSUPPORTED.with_attribute("prefix", ACCESS_TOKEN_PREFIX));
        }
        let Some((_, record)) = self.find_key(parsed.id).await? else {
            debug!(key_id = parsed.id, "Unknown API key");
            return Err(ERR_API_KEY_NOT_FOUND.with_attribute("id", parsed.id));
        };
        let hash = hash_secret(parsed.secret);
        if !bool::from(hash.as_bytes().ct_eq(record.key_hash.as_bytes())) {
            return Err(ERR_API_KEY_MISMATCH.with_attribute("id", parsed.id));
        }
        Ok(record.api_key)
    }

    pub async fn list_api_keys(&self, entity: &EntityIdentifiers) -> Result<Vec<ApiKey>> {
        let uid = entity.unique_id();
        let found = self.keys.find_by(&filter(&[("entity_uid", uid.as_str())])).await?;
        let mut keys = found
            .values()
            .map(|fields| Ok(from_value::<ApiKeyRecord>(unflatten(fields))?.api_key))
            .collect::<Result<Vec<_>>>()?;
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(keys)
    }

    pub async fn get_api_key(&self, entity: &EntityIdentifiers, id: &str) -> Result<ApiKey> {
        match self.find_key(id).await? {
            Some((_, record)) if record.api_key.entity == *entity => Ok(record.api_key),
            _ => Err(ERR_UNKNOWN_API_KEY.with_attributes([("id", id.to_string()), ("entity", entity.unique_id())])),
        }
    }

    /// Revoke an API key of `entity`.
    pub async fn delete_api_key(&self, entity: &EntityIdentifiers, id: &str) -> Result<()> {
        match self.find_key(id).await? {
            Some((key, record)) if record.api_key.entity == *entity => {
                self.keys.delete(&key).await?;
                info!(entity = %entity, key_id = id, "API key deleted");
                Ok(())
            }
            _ => Err(ERR_UNKNOWN_API_KEY.with_attributes([("id", id.to_string()), ("entity", entity.unique_id())])),
        }
    }

    async fn find_key(&self, id: &str) -> Result<Option<(Key, ApiKeyRecord)>> {
        let found = self.keys.find_by(&filter(&[("api_key.id", id)])).await?;
        match found.into_iter().next() {
            Some((key, fields)) => Ok(Some((key, from_value(unflatten(&fields))?))),
            None => Ok(None),
        }
    }

    /// Make `collaborator` a collaborator of `entity` with `rights`,
    /// replacing earlier rights.
    pub async fn set_collaborator(
        &self,
        entity: &EntityIdentifiers,
        collaborator: &EntityIdentifiers,
        rights: &[Right],
    ) -> Result<()> {
        let entity_uid = entity.unique_id();
        let collaborator_uid = collaborator.unique_id();
        let existing = self
            .memberships
            .find_by(&filter(&[
                ("entity_uid", entity_uid.as_str()),
                ("collaborator_uid", collaborator_uid.as_str()),
            ]))
            .await?;
        for key in existing.keys() {
            self.memberships.delete(key).await?;
        }
        if rights.is_empty() {
            return Ok(());
        }
        let membership = Membership {
            entity: entity.clone(),
            entity_uid,
            collaborator: collaborator.clone(),
            collaborator_uid,
            rights: rights.to_vec(),
        };
        self.memberships
            .create(flatten(&to_value(&membership)?)?)
            .await?;
        debug!(entity = %entity, collaborator = %collaborator, "Collaborator rights set");
        Ok(())
    }

    /// Rights `collaborator` holds on `entity` through membership.
    pub async fn collaborator_rights(
        &self,
        collaborator: &EntityIdentifiers,
        entity: &EntityIdentifiers,
    ) -> Result<Rights> {
        let found = self
            .memberships
            .find_by(&filter(&[
                ("entity_uid", entity.unique_id().as_str()),
                ("collaborator_uid", collaborator.unique_id().as_str()),
            ]))
            .await?;
        let mut rights = Vec::new();
        for fields in found.values() {
            let membership: Membership = from_value(unflatten(fields))?;
            rights.extend(membership.rights);
        }
        Ok(Rights::new(rights))
    }

    /// Rights of an authenticated API key on `entity`.
    pub async fn rights_on(&self, api_key: &ApiKey, entity: &EntityIdentifiers) -> Result<Rights> {
        if api_key.entity.unique_id() == entity.unique_id() {
            return Ok(api_key.rights());
        }
        let member = self.collaborator_rights(&api_key.entity, entity).await?;
        Ok(member.intersect(&api_key.rights()))
    }

    /// Authenticate `token` and require `rights` on `entity`.
    pub async fn authorize(
        &self,
        token: &str,
        entity: &EntityIdentifiers,
        rights: &[Right],
    ) -> Result<ApiKey> {
        let api_key = self.authenticate(token).await?;
        self.rights_on(&api_key, entity)
            .await?
            .require(entity, rights)?;
        Ok(api_key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lorastack_core::errors::{is_permission_denied, is_unauthenticated};

    use super::*;
    use crate::identifiers::GatewayIdentifiers;

    fn gateway() -> EntityIdentifiers {
        GatewayIdentifiers::new("gw-1").into()
    }

    #[test]
    fn token_parsing() {
        let parsed = parse_token("NNSXS.ABC123.DEF456").unwrap();
        assert_eq!(parsed.kind, TokenKind::ApiKey);
        assert_eq!((parsed.id, parsed.secret), ("ABC123", "DEF456"));
        assert_eq!(parse_token("MFRWG.A.B").unwrap().kind, TokenKind::AccessToken);
        for bad in ["", "NNSXS", "NNSXS.A", "NNSXS..B", "NNSXS.A.B.C", "XXXXX.A.B", "NNSXS.A-1.B"] {
            assert!(parse_token(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn all_rights_imply_specific_rights() {
        let rights = Rights::new([Right::GatewayAll]);
        assert!(rights.contains(Right::GatewayLink));
        assert!(!rights.contains(Right::ApplicationInfo));
        assert!(rights.missing(&[Right::GatewayInfo, Right::ApplicationInfo]) == [Right::ApplicationInfo]);
    }

    #[tokio::test]
    async fn create_authenticate_list_delete() {
        let access = AccessRegistry::in_memory();
        let (key, token) = access
            .create_api_key(&gateway(), "cups", &[Right::GatewayInfo, Right::GatewayInfo])
            .await
            .unwrap();
        assert!(token.starts_with("NNSXS."));
        assert_eq!(key.rights, [Right::GatewayInfo]);

        assert_eq!(access.authenticate(&token).await.unwrap(), key);
        let listed = access.list_api_keys(&gateway()).await.unwrap();
        assert_eq!(listed, [key.clone()]);

        let forged = format!("NNSXS.{}.{}", key.id, "00");
        assert!(is_unauthenticated(&access.authenticate(&forged).await.unwrap_err()));

        access.delete_api_key(&gateway(), &key.id).await.unwrap();
        let err = access.authenticate(&token).await.unwrap_err();
        assert!(err.is(&ERR_API_KEY_NOT_FOUND));
        assert!(access.delete_api_key(&gateway(), &key.id).await.is_err());
    }

    #[tokio::test]
    async fn access_tokens_are_not_accepted() {
        let access = AccessRegistry::in_memory();
        let err = access.authenticate("MFRWG.ABC.DEF").await.unwrap_err();
        assert!(err.is(&ERR_TOKEN_UNSUPPORTED));
    }

    #[tokio::test]
    async fn collaborator_rights_intersect_key_rights() {
        let access = AccessRegistry::in_memory();
        let user = EntityIdentifiers::user("alice");
        access
            .set_collaborator(&gateway(), &user, &[Right::GatewayAll])
            .await
            .unwrap();
        let (_, token) = access
            .create_api_key(&user, "ops", &[Right::GatewayInfo, Right::GatewayLink])
            .await
            .unwrap();

        access
            .authorize(&token, &gateway(), &[Right::GatewayInfo])
            .await
            .unwrap();
        let err = access
            .authorize(&token, &gateway(), &[Right::GatewaySettingsApiKeys])
            .await
            .unwrap_err();
        assert!(is_permission_denied(&err));

        let other: EntityIdentifiers = GatewayIdentifiers::new("gw-2").into();
        assert!(access.authorize(&token, &other, &[Right::GatewayInfo]).await.is_err());

        access.set_collaborator(&gateway(), &user, &[]).await.unwrap();
        assert!(access
            .collaborator_rights(&user, &gateway())
            .await
            .unwrap()
            .is_empty());
    }
}
