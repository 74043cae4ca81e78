//! Entity models for the registry: devices, users, client sessions, and
//! OAuth-style credentials. Serialized field names are part of the vendor
//! wire contract and must not drift.

use crate::clock::Clock;
use crate::errors::DustboxError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

/// One of the two transport channels a device or client session may be
/// connected through. The two flags are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Mqtt,
    Xmpp,
}

impl Transport {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mqtt => "mqtt",
            Self::Xmpp => "xmpp",
        }
    }
}

impl FromStr for Transport {
    type Err = DustboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mqtt" => Ok(Self::Mqtt),
            "xmpp" => Ok(Self::Xmpp),
            other => Err(DustboxError::DataFormat(format!(
                "unknown transport: {other}"
            ))),
        }
    }
}

/// Physical vacuum-bot device. `did` is the stable vendor-assigned identity
/// and never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Device {
    #[serde(rename = "class")]
    pub device_class: String,
    pub company: String,
    pub did: String,
    pub name: String,
    pub nick: String,
    pub resource: String,
    pub mqtt_connection: bool,
    pub xmpp_connection: bool,
    /// Extension record for globally-distributed models. Selected by
    /// presence, not by a separate device type.
    #[serde(default)]
    pub global: Option<GlobalExtension>,
}

impl Device {
    pub fn new(
        did: impl Into<String>,
        device_class: impl Into<String>,
        resource: impl Into<String>,
        name: impl Into<String>,
        nick: impl Into<String>,
        company: impl Into<String>,
    ) -> Result<Self, DustboxError> {
        let did = did.into();
        if did.is_empty() {
            return Err(DustboxError::DataFormat("device id must not be empty".into()));
        }
        Ok(Self {
            device_class: device_class.into(),
            company: company.into(),
            did,
            name: name.into(),
            nick: nick.into(),
            resource: resource.into(),
            mqtt_connection: false,
            xmpp_connection: false,
            global: None,
        })
    }

    pub fn set_mqtt_connected(&mut self, connected: bool) {
        self.mqtt_connection = connected;
    }

    pub fn set_xmpp_connected(&mut self, connected: bool) {
        self.xmpp_connection = connected;
    }

    pub fn set_transport(&mut self, transport: Transport, connected: bool) {
        match transport {
            Transport::Mqtt => self.set_mqtt_connected(connected),
            Transport::Xmpp => self.set_xmpp_connected(connected),
        }
    }

    pub fn serialize(&self) -> Value {
        let mut doc = json!({
            "class": self.device_class,
            "company": self.company,
            "did": self.did,
            "name": self.name,
            "nick": self.nick,
            "resource": self.resource,
            "mqtt_connection": self.mqtt_connection,
            "xmpp_connection": self.xmpp_connection,
        });
        if let Some(global) = &self.global {
            doc["global"] = global.serialize();
        }
        doc
    }

    pub fn from_storage(doc: Value) -> Result<Self, DustboxError> {
        let device: Self = serde_json::from_value(doc)
            .map_err(|e| DustboxError::DataFormat(format!("bad device record: {e}")))?;
        if device.did.is_empty() {
            return Err(DustboxError::DataFormat("device id must not be empty".into()));
        }
        Ok(device)
    }
}

/// Extra fields carried by globally-distributed device models.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalExtension {
    #[serde(rename = "UILogicId")]
    pub ui_logic_id: String,
    pub ota: bool,
    #[serde(rename = "updateInfo")]
    pub update_info: UpdateInfo,
    pub icon: String,
    #[serde(rename = "deviceName")]
    pub device_name: String,
}

impl GlobalExtension {
    pub fn new(ui_logic_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            ui_logic_id: ui_logic_id.into(),
            ota: true,
            // fresh per instance, never a shared default
            update_info: UpdateInfo::default(),
            icon: String::new(),
            device_name: device_name.into(),
        }
    }

    pub fn serialize(&self) -> Value {
        json!({
            "UILogicId": self.ui_logic_id,
            "ota": self.ota,
            "updateInfo": self.update_info.serialize(),
            "icon": self.icon,
            "deviceName": self.device_name,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateInfo {
    #[serde(rename = "changeLog")]
    pub change_log: String,
    #[serde(rename = "needUpdate")]
    pub need_update: bool,
}

impl Default for UpdateInfo {
    fn default() -> Self {
        Self {
            change_log: String::new(),
            need_update: false,
        }
    }
}

impl UpdateInfo {
    pub fn serialize(&self) -> Value {
        json!({
            "changeLog": self.change_log,
            "needUpdate": self.need_update,
        })
    }
}

/// Account record. The id collections hold opaque references resolved
/// through the registry; the user never owns the referenced records.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct User {
    pub userid: String,
    /// Home ids in insertion order; ordering is meaningful for display.
    pub homeids: Vec<String>,
    /// Device ids with set semantics.
    pub devices: Vec<String>,
    /// Bot/client session ids with set semantics.
    pub bots: Vec<String>,
}

impl User {
    pub fn new(userid: impl Into<String>) -> Self {
        Self {
            userid: userid.into(),
            homeids: Vec::new(),
            devices: Vec::new(),
            bots: Vec::new(),
        }
    }

    pub fn add_device(&mut self, did: &str) {
        if !self.devices.iter().any(|d| d == did) {
            self.devices.push(did.to_string());
        }
    }

    /// Removing an id that was never linked is a no-op.
    pub fn remove_device(&mut self, did: &str) {
        self.devices.retain(|d| d != did);
    }

    pub fn add_home(&mut self, home_id: &str) {
        if !self.homeids.iter().any(|h| h == home_id) {
            self.homeids.push(home_id.to_string());
        }
    }

    pub fn add_bot(&mut self, bot_id: &str) {
        if !self.bots.iter().any(|b| b == bot_id) {
            self.bots.push(bot_id.to_string());
        }
    }

    pub fn remove_bot(&mut self, bot_id: &str) {
        self.bots.retain(|b| b != bot_id);
    }

    pub fn serialize(&self) -> Value {
        json!({
            "userid": self.userid,
            "homeids": self.homeids,
            "devices": self.devices,
            "bots": self.bots,
        })
    }

    pub fn from_storage(doc: Value) -> Result<Self, DustboxError> {
        serde_json::from_value(doc)
            .map_err(|e| DustboxError::DataFormat(format!("bad user record: {e}")))
    }
}

/// Logged-in app/bot instance. Shares the transport-connection shape with
/// [`Device`] by capability; it is not a device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotClient {
    pub userid: String,
    pub realm: String,
    pub resource: String,
    pub mqtt_connection: bool,
    pub xmpp_connection: bool,
}

impl BotClient {
    pub fn new(
        userid: impl Into<String>,
        realm: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            userid: userid.into(),
            realm: realm.into(),
            resource: resource.into(),
            mqtt_connection: false,
            xmpp_connection: false,
        }
    }

    pub fn set_transport(&mut self, transport: Transport, connected: bool) {
        match transport {
            Transport::Mqtt => self.mqtt_connection = connected,
            Transport::Xmpp => self.xmpp_connection = connected,
        }
    }

    pub fn serialize(&self) -> Value {
        json!({
            "userid": self.userid,
            "realm": self.realm,
            "resource": self.resource,
            "mqtt_connection": self.mqtt_connection,
            "xmpp_connection": self.xmpp_connection,
        })
    }

    pub fn from_storage(doc: Value) -> Result<Self, DustboxError> {
        serde_json::from_value(doc)
            .map_err(|e| DustboxError::DataFormat(format!("bad client record: {e}")))
    }
}

const CREDENTIAL_FIELDS: [&str; 5] =
    ["userId", "access_token", "refresh_token", "expire_at", "revoked"];

/// Time-bounded access/refresh token pair bound to a user.
///
/// A credential is superseded, never renewed: a login or refresh mints a
/// brand-new record with fresh tokens and a fresh expiry. Expired
/// credentials are rejected on validation but only removed by the
/// registry's pruning policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expire_at: DateTime<Utc>,
    pub revoked: bool,
}

impl Credential {
    /// Mint a new grant: two distinct fresh tokens, expiry a fixed number
    /// of days out. Global uniqueness against outstanding tokens is the
    /// registry's job.
    pub fn issue(clock: &dyn Clock, user_id: &str, validity_days: i64) -> Self {
        let access_token = clock.new_token();
        let mut refresh_token = clock.new_token();
        while refresh_token == access_token {
            refresh_token = clock.new_token();
        }
        Self {
            user_id: user_id.to_string(),
            access_token,
            refresh_token,
            expire_at: clock.now() + chrono::Duration::days(validity_days),
            revoked: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at
    }

    /// Storage view: `expire_at` as an ISO-8601-parseable string that
    /// round-trips exactly through [`Credential::from_storage`].
    pub fn to_storage(&self) -> Value {
        json!({
            "userId": self.user_id,
            "access_token": self.access_token,
            "refresh_token": self.refresh_token,
            "expire_at": format_expire_at(self.expire_at),
            "revoked": self.revoked,
        })
    }

    /// Client view: same keys, `expire_at` as epoch milliseconds. Pure
    /// transform; the stored representation is untouched.
    pub fn to_client(&self) -> Value {
        json!({
            "userId": self.user_id,
            "access_token": self.access_token,
            "refresh_token": self.refresh_token,
            "expire_at": self.expire_at.timestamp_millis(),
        })
    }

    /// Strict decode of a stored document. Every permitted field is
    /// enumerated here; unknown keys and malformed timestamps are rejected
    /// rather than silently defaulted.
    pub fn from_storage(doc: &Value) -> Result<Self, DustboxError> {
        let obj = doc
            .as_object()
            .ok_or_else(|| DustboxError::DataFormat("credential record is not an object".into()))?;

        if let Some(unknown) = obj.keys().find(|k| !CREDENTIAL_FIELDS.contains(&k.as_str())) {
            return Err(DustboxError::DataFormat(format!(
                "unknown credential field: {unknown}"
            )));
        }

        let field = |name: &str| -> Result<&str, DustboxError> {
            obj.get(name).and_then(Value::as_str).ok_or_else(|| {
                DustboxError::DataFormat(format!("credential field missing: {name}"))
            })
        };

        Ok(Self {
            user_id: field("userId")?.to_string(),
            access_token: field("access_token")?.to_string(),
            refresh_token: field("refresh_token")?.to_string(),
            expire_at: parse_expire_at(field("expire_at")?)?,
            revoked: obj.get("revoked").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

fn format_expire_at(ts: DateTime<Utc>) -> String {
    if ts.timestamp_subsec_micros() == 0 {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

fn parse_expire_at(raw: &str) -> Result<DateTime<Utc>, DustboxError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| DustboxError::DataFormat(format!("bad expire_at '{raw}': {e}")))
}

/// Canonical vendor API result codes. One table; handlers map domain
/// errors onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCode {
    Success,
    Common,
    InterfaceAuth,
    ParamInvalid,
    TokenInvalid,
    TimestampInvalid,
    EmailUsed,
    EmailNonExist,
    UserNotActivated,
    UserDisable,
    PwdWrong,
    ActivateTokenTimeout,
    ResetPwdTokenTimeout,
    WrongEmailAddress,
    WrongPwdFormat,
    WrongConfirmPwd,
    EmailSendTimeLimit,
    Default,
}

impl ApiCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "0000",
            Self::Common => "0001",
            Self::InterfaceAuth => "0002",
            Self::ParamInvalid => "0003",
            Self::TokenInvalid => "0004",
            Self::TimestampInvalid => "0005",
            Self::EmailUsed => "1001",
            Self::EmailNonExist => "1002",
            Self::UserNotActivated => "1003",
            Self::UserDisable => "1004",
            Self::PwdWrong => "1005",
            Self::ActivateTokenTimeout => "1006",
            Self::ResetPwdTokenTimeout => "1007",
            Self::WrongEmailAddress => "1008",
            Self::WrongPwdFormat => "1009",
            Self::WrongConfirmPwd => "10010",
            Self::EmailSendTimeLimit => "1011",
            Self::Default => "9000",
        }
    }
}
