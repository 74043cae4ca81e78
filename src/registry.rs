//! The registry is the single mutation authority over users, devices,
//! client sessions, and credentials. Request handlers only ever read what
//! it returns; every write goes through here so uniqueness and referential
//! invariants hold no matter how many connections are in flight.

use crate::clock::Clock;
use crate::errors::DustboxError;
use crate::models::{BotClient, Credential, Device, Transport, User};
use crate::store::{collections, Store};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory registry with write-through persistence.
///
/// Each entity kind sits behind its own lock; mutations on one entity kind
/// are serialized, and cross-kind operations acquire locks in a fixed order
/// (users, devices, clients, credentials) so they cannot deadlock. There is
/// no cross-entity transaction because no invariant needs one.
pub struct Registry {
    clock: Arc<dyn Clock>,
    store: Arc<dyn Store>,
    validity_days: i64,
    users: RwLock<HashMap<String, User>>,
    devices: RwLock<HashMap<String, Device>>,
    clients: RwLock<HashMap<String, BotClient>>,
    /// Keyed by access token.
    credentials: RwLock<HashMap<String, Credential>>,
}

impl Registry {
    pub fn new(clock: Arc<dyn Clock>, store: Arc<dyn Store>, validity_days: i64) -> Self {
        Self {
            clock,
            store,
            validity_days,
            users: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            credentials: RwLock::new(HashMap::new()),
        }
    }

    /// Current time as seen by the registry's clock. Handlers use this for
    /// validation instead of reaching for the system clock themselves.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Load all collections from the store. Called once at startup, before
    /// the registry is shared.
    pub async fn hydrate(&self) -> Result<(), DustboxError> {
        let mut users = self.users.write().await;
        for doc in self.store.list(collections::USERS).await? {
            let user = User::from_storage(doc)?;
            users.insert(user.userid.clone(), user);
        }
        drop(users);

        let mut devices = self.devices.write().await;
        for doc in self.store.list(collections::DEVICES).await? {
            let device = Device::from_storage(doc)?;
            devices.insert(device.did.clone(), device);
        }
        drop(devices);

        let mut clients = self.clients.write().await;
        for doc in self.store.list(collections::CLIENTS).await? {
            let client = BotClient::from_storage(doc)?;
            clients.insert(client.resource.clone(), client);
        }
        drop(clients);

        let mut credentials = self.credentials.write().await;
        for doc in self.store.list(collections::TOKENS).await? {
            let cred = Credential::from_storage(&doc)?;
            credentials.insert(cred.access_token.clone(), cred);
        }
        Ok(())
    }

    // --- users ---

    /// Create-or-return. Registering an existing user id hands back the
    /// stored record untouched.
    pub async fn register_user(&self, userid: &str) -> Result<User, DustboxError> {
        if userid.is_empty() {
            return Err(DustboxError::DataFormat("user id must not be empty".into()));
        }
        let mut users = self.users.write().await;
        if let Some(user) = users.get(userid) {
            return Ok(user.clone());
        }
        let user = User::new(userid);
        self.store
            .put(collections::USERS, userid, user.serialize())
            .await?;
        users.insert(userid.to_string(), user.clone());
        Ok(user)
    }

    pub async fn get_user(&self, userid: &str) -> Result<User, DustboxError> {
        self.users
            .read()
            .await
            .get(userid)
            .cloned()
            .ok_or_else(|| DustboxError::NotFound(format!("user {userid}")))
    }

    pub async fn add_home(&self, userid: &str, home_id: &str) -> Result<User, DustboxError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(userid)
            .ok_or_else(|| DustboxError::NotFound(format!("user {userid}")))?;
        user.add_home(home_id);
        self.store
            .put(collections::USERS, userid, user.serialize())
            .await?;
        Ok(user.clone())
    }

    /// Associate an existing device with a user. Unknown user or device is
    /// a `NotFound`; linking twice is a no-op.
    pub async fn link_device(&self, userid: &str, did: &str) -> Result<User, DustboxError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(userid)
            .ok_or_else(|| DustboxError::NotFound(format!("user {userid}")))?;
        if !self.devices.read().await.contains_key(did) {
            return Err(DustboxError::NotFound(format!("device {did}")));
        }
        user.add_device(did);
        self.store
            .put(collections::USERS, userid, user.serialize())
            .await?;
        Ok(user.clone())
    }

    /// Drop a device association. Unlinking an id the user never had is a
    /// no-op, not an error.
    pub async fn unlink_device(&self, userid: &str, did: &str) -> Result<User, DustboxError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(userid)
            .ok_or_else(|| DustboxError::NotFound(format!("user {userid}")))?;
        user.remove_device(did);
        self.store
            .put(collections::USERS, userid, user.serialize())
            .await?;
        Ok(user.clone())
    }

    /// Resolve a user's device ids to device records. Dangling ids are
    /// skipped rather than treated as errors.
    pub async fn user_devices(&self, userid: &str) -> Result<Vec<Device>, DustboxError> {
        let users = self.users.read().await;
        let user = users
            .get(userid)
            .ok_or_else(|| DustboxError::NotFound(format!("user {userid}")))?;
        let devices = self.devices.read().await;
        Ok(user
            .devices
            .iter()
            .filter_map(|did| devices.get(did).cloned())
            .collect())
    }

    // --- devices ---

    /// Idempotent device registration. A known `did` keeps its identity and
    /// connection state and has its mutable attributes refreshed; a `did`
    /// re-registered under a different company is rejected. Concurrent
    /// registrations of one `did` observe a single record.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_device(
        &self,
        did: &str,
        device_class: &str,
        resource: &str,
        name: &str,
        nick: &str,
        company: &str,
    ) -> Result<Device, DustboxError> {
        let mut devices = self.devices.write().await;
        let device = match devices.get(did) {
            Some(existing) => {
                if existing.company != company {
                    return Err(DustboxError::Conflict(format!(
                        "device {did} already registered under company {}",
                        existing.company
                    )));
                }
                let mut updated = existing.clone();
                updated.device_class = device_class.to_string();
                updated.resource = resource.to_string();
                updated.name = name.to_string();
                updated.nick = nick.to_string();
                updated
            }
            None => Device::new(did, device_class, resource, name, nick, company)?,
        };
        self.store
            .put(collections::DEVICES, did, device.serialize())
            .await?;
        devices.insert(did.to_string(), device.clone());
        Ok(device)
    }

    pub async fn get_device(&self, did: &str) -> Result<Device, DustboxError> {
        self.devices
            .read()
            .await
            .get(did)
            .cloned()
            .ok_or_else(|| DustboxError::NotFound(format!("device {did}")))
    }

    /// Flip exactly one transport flag on a device; the other is untouched.
    pub async fn set_device_transport(
        &self,
        did: &str,
        transport: Transport,
        connected: bool,
    ) -> Result<Device, DustboxError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(did)
            .ok_or_else(|| DustboxError::NotFound(format!("device {did}")))?;
        device.set_transport(transport, connected);
        self.store
            .put(collections::DEVICES, did, device.serialize())
            .await?;
        Ok(device.clone())
    }

    /// Delete a device and unlink it from every user, so registry
    /// operations never leave dangling references behind.
    pub async fn remove_device(&self, did: &str) -> Result<(), DustboxError> {
        let mut users = self.users.write().await;
        let mut devices = self.devices.write().await;
        if devices.remove(did).is_none() {
            return Err(DustboxError::NotFound(format!("device {did}")));
        }
        self.store.delete(collections::DEVICES, did).await?;
        for user in users.values_mut() {
            if user.devices.iter().any(|d| d == did) {
                user.remove_device(did);
                let doc = user.serialize();
                self.store.put(collections::USERS, &user.userid, doc).await?;
            }
        }
        Ok(())
    }

    // --- client sessions ---

    /// Create or refresh the client-session record for `resource` and link
    /// its bot id into the owning user.
    pub async fn register_client(
        &self,
        userid: &str,
        realm: &str,
        resource: &str,
    ) -> Result<BotClient, DustboxError> {
        if resource.is_empty() {
            return Err(DustboxError::DataFormat(
                "client resource must not be empty".into(),
            ));
        }
        let mut users = self.users.write().await;
        let user = users
            .get_mut(userid)
            .ok_or_else(|| DustboxError::NotFound(format!("user {userid}")))?;

        let mut clients = self.clients.write().await;
        let client = match clients.get(resource) {
            Some(existing) if existing.userid != userid => {
                return Err(DustboxError::Conflict(format!(
                    "client resource {resource} already bound to another user"
                )));
            }
            Some(existing) => {
                let mut updated = existing.clone();
                updated.realm = realm.to_string();
                updated
            }
            None => BotClient::new(userid, realm, resource),
        };
        self.store
            .put(collections::CLIENTS, resource, client.serialize())
            .await?;
        clients.insert(resource.to_string(), client.clone());

        user.add_bot(resource);
        self.store
            .put(collections::USERS, userid, user.serialize())
            .await?;
        Ok(client)
    }

    pub async fn get_client(&self, resource: &str) -> Result<BotClient, DustboxError> {
        self.clients
            .read()
            .await
            .get(resource)
            .cloned()
            .ok_or_else(|| DustboxError::NotFound(format!("client {resource}")))
    }

    pub async fn set_client_transport(
        &self,
        resource: &str,
        transport: Transport,
        connected: bool,
    ) -> Result<BotClient, DustboxError> {
        let mut clients = self.clients.write().await;
        let client = clients
            .get_mut(resource)
            .ok_or_else(|| DustboxError::NotFound(format!("client {resource}")))?;
        client.set_transport(transport, connected);
        self.store
            .put(collections::CLIENTS, resource, client.serialize())
            .await?;
        Ok(client.clone())
    }

    /// Delete a client session and unlink its bot id from the owning user.
    pub async fn remove_client(&self, resource: &str) -> Result<(), DustboxError> {
        let mut users = self.users.write().await;
        let mut clients = self.clients.write().await;
        let client = clients
            .remove(resource)
            .ok_or_else(|| DustboxError::NotFound(format!("client {resource}")))?;
        self.store.delete(collections::CLIENTS, resource).await?;
        if let Some(user) = users.get_mut(&client.userid) {
            user.remove_bot(resource);
            self.store
                .put(collections::USERS, &client.userid, user.serialize())
                .await?;
        }
        Ok(())
    }

    // --- credentials ---

    /// Mint a credential for an existing user. Token values never collide
    /// with outstanding ones; the new grant coexists with any prior valid
    /// grants (multi-device login) unless the caller revokes them.
    pub async fn issue_credential(&self, userid: &str) -> Result<Credential, DustboxError> {
        if !self.users.read().await.contains_key(userid) {
            return Err(DustboxError::NotFound(format!("user {userid}")));
        }
        let mut credentials = self.credentials.write().await;
        let cred = self.mint_unique(&credentials, userid);
        self.store
            .put(collections::TOKENS, &cred.access_token, cred.to_storage())
            .await?;
        credentials.insert(cred.access_token.clone(), cred.clone());
        Ok(cred)
    }

    /// Resolve an access token to its user. Revocation wins over expiry;
    /// expiry is `now >= expire_at`.
    pub async fn validate_credential(
        &self,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> Result<User, DustboxError> {
        let cred = {
            let credentials = self.credentials.read().await;
            credentials
                .get(access_token)
                .cloned()
                .ok_or_else(|| DustboxError::NotFound("access token".into()))?
        };
        if cred.revoked {
            return Err(DustboxError::Revoked("access token".into()));
        }
        if cred.is_expired(now) {
            return Err(DustboxError::Expired("access token".into()));
        }
        self.get_user(&cred.user_id).await
    }

    /// Refresh-token grant: the old credential is revoked and a brand-new
    /// one is minted for the same user. Nothing is renewed in place.
    pub async fn refresh_credential(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Credential, DustboxError> {
        let mut credentials = self.credentials.write().await;
        let old = credentials
            .values()
            .find(|c| c.refresh_token == refresh_token)
            .cloned()
            .ok_or_else(|| DustboxError::NotFound("refresh token".into()))?;
        if old.revoked {
            return Err(DustboxError::Revoked("refresh token".into()));
        }
        if old.is_expired(now) {
            return Err(DustboxError::Expired("refresh token".into()));
        }

        let cred = self.mint_unique(&credentials, &old.user_id);
        self.store
            .put(collections::TOKENS, &cred.access_token, cred.to_storage())
            .await?;

        if let Some(superseded) = credentials.get_mut(&old.access_token) {
            superseded.revoked = true;
            let doc = superseded.to_storage();
            self.store
                .put(collections::TOKENS, &old.access_token, doc)
                .await?;
        }

        credentials.insert(cred.access_token.clone(), cred.clone());
        Ok(cred)
    }

    /// Explicit transition to the terminal revoked state.
    pub async fn revoke_credential(&self, access_token: &str) -> Result<(), DustboxError> {
        let mut credentials = self.credentials.write().await;
        let cred = credentials
            .get_mut(access_token)
            .ok_or_else(|| DustboxError::NotFound("access token".into()))?;
        cred.revoked = true;
        let doc = cred.to_storage();
        self.store.put(collections::TOKENS, access_token, doc).await?;
        Ok(())
    }

    /// Drop every credential past its expiry. The credential model never
    /// deletes itself; cleanup is registry policy, driven by the hourly job.
    pub async fn prune_expired_credentials(
        &self,
        now: DateTime<Utc>,
    ) -> Result<usize, DustboxError> {
        let mut credentials = self.credentials.write().await;
        let expired: Vec<String> = credentials
            .values()
            .filter(|c| c.is_expired(now))
            .map(|c| c.access_token.clone())
            .collect();
        for token in &expired {
            self.store.delete(collections::TOKENS, token).await?;
            credentials.remove(token);
        }
        Ok(expired.len())
    }

    /// Mint a credential whose tokens collide with nothing outstanding.
    fn mint_unique(&self, outstanding: &HashMap<String, Credential>, userid: &str) -> Credential {
        loop {
            let cred = Credential::issue(self.clock.as_ref(), userid, self.validity_days);
            let access_taken = outstanding.contains_key(&cred.access_token);
            let refresh_taken = outstanding
                .values()
                .any(|c| c.refresh_token == cred.refresh_token);
            if !access_taken && !refresh_taken {
                return cred;
            }
        }
    }
}
