use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::constants::{
    CLIENT_PROPERTIES_BROWSER, CLIENT_PROPERTIES_DEVICE, CLIENT_PROPERTIES_OS, GatewayOpcode,
    Intents,
};
use super::error::{GatewayError, GatewayResult};

/// One unit of the gateway wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Kept wide so opcodes this crate does not know still decode.
    #[serde(rename = "op")]
    pub opcode: u64,
    #[serde(rename = "d", default)]
    pub data: Value,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
}

impl Envelope {
    #[must_use]
    pub fn new(opcode: GatewayOpcode, data: Value) -> Self {
        Self {
            opcode: u64::from(opcode.as_u8()),
            data,
            sequence: None,
            event_name: None,
        }
    }

    #[must_use]
    pub fn dispatch(event_name: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            opcode: u64::from(GatewayOpcode::Dispatch.as_u8()),
            data,
            sequence: Some(sequence),
            event_name: Some(event_name.into()),
        }
    }

    /// Known opcode, or `None` for opcodes newer than this crate.
    #[must_use]
    pub fn kind(&self) -> Option<GatewayOpcode> {
        u8::try_from(self.opcode)
            .ok()
            .and_then(GatewayOpcode::from_u8)
    }

    #[must_use]
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::new(
            GatewayOpcode::Heartbeat,
            sequence.map_or(Value::Null, |s| Value::Number(s.into())),
        )
    }

    /// # Errors
    ///
    /// Returns `GatewayError::SerializationError` if the payload cannot be encoded.
    pub fn identify(identify: &IdentifyData) -> GatewayResult<Self> {
        Self::with_payload(GatewayOpcode::Identify, identify)
    }

    /// # Errors
    ///
    /// Returns `GatewayError::SerializationError` if the payload cannot be encoded.
    pub fn resume(token: &str, session_id: &str, sequence: u64) -> GatewayResult<Self> {
        let resume = ResumeData {
            token,
            session_id,
            seq: sequence,
        };
        Self::with_payload(GatewayOpcode::Resume, &resume)
    }

    /// # Errors
    ///
    /// Returns `GatewayError::SerializationError` if the payload cannot be encoded.
    pub fn presence_update(presence: &PresenceUpdate) -> GatewayResult<Self> {
        Self::with_payload(GatewayOpcode::PresenceUpdate, presence)
    }

    /// # Errors
    ///
    /// Returns `GatewayError::SerializationError` if the payload cannot be encoded.
    pub fn voice_state_update(update: &VoiceStateUpdate) -> GatewayResult<Self> {
        Self::with_payload(GatewayOpcode::VoiceStateUpdate, update)
    }

    /// # Errors
    ///
    /// Returns `GatewayError::SerializationError` if the payload cannot be encoded.
    pub fn request_guild_members(request: &RequestGuildMembers) -> GatewayResult<Self> {
        Self::with_payload(GatewayOpcode::RequestGuildMembers, request)
    }

    fn with_payload<T: Serialize>(opcode: GatewayOpcode, payload: &T) -> GatewayResult<Self> {
        let data =
            serde_json::to_value(payload).map_err(|e| GatewayError::serialization(e.to_string()))?;
        Ok(Self::new(opcode, data))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentifyData {
    pub token: String,
    pub properties: IdentifyProperties,
    pub compress: bool,
    pub large_threshold: u8,
    pub shard: [u32; 2],
    pub intents: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdate>,
}

impl IdentifyData {
    #[must_use]
    pub fn new(token: &str, shard: [u32; 2], intents: Intents, large_threshold: u8) -> Self {
        Self {
            token: token.to_string(),
            properties: IdentifyProperties::default(),
            compress: false,
            large_threshold,
            shard,
            intents: intents.bits(),
            presence: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: CLIENT_PROPERTIES_OS.to_string(),
            browser: CLIENT_PROPERTIES_BROWSER.to_string(),
            device: CLIENT_PROPERTIES_DEVICE.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResumeData<'a> {
    token: &'a str,
    session_id: &'a str,
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceActivity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub since: Option<u64>,
    pub activities: Vec<PresenceActivity>,
    pub status: PresenceStatus,
    pub afk: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    pub guild_id: String,
    pub channel_id: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// Member chunk request. `query` and `user_ids` are mutually exclusive on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestGuildMembers {
    pub guild_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub presences: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl RequestGuildMembers {
    /// Requests every member of a guild.
    #[must_use]
    pub fn all(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            query: Some(String::new()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>, limit: u32) -> Self {
        self.query = Some(query.into());
        self.user_ids = None;
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_user_ids(mut self, user_ids: Vec<String>) -> Self {
        self.user_ids = Some(user_ids);
        self.query = None;
        self
    }

    #[must_use]
    pub const fn with_presences(mut self, presences: bool) -> Self {
        self.presences = presences;
        self
    }

    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat_payload() {
        let beat = serde_json::to_value(Envelope::heartbeat(Some(42))).unwrap();
        assert_eq!(beat, json!({"op": 1, "d": 42}));

        let first = serde_json::to_value(Envelope::heartbeat(None)).unwrap();
        assert_eq!(first, json!({"op": 1, "d": null}));
    }

    #[test]
    fn test_identify_payload_carries_shard_pair() {
        let data = IdentifyData::new("token", [3, 8], Intents::GUILDS, 250);
        let envelope = Envelope::identify(&data).unwrap();

        assert_eq!(envelope.kind(), Some(GatewayOpcode::Identify));
        assert_eq!(envelope.data["shard"], json!([3, 8]));
        assert_eq!(envelope.data["intents"], json!(1));
        assert_eq!(envelope.data["compress"], json!(false));
        assert!(envelope.data.get("presence").is_none());
    }

    #[test]
    fn test_resume_payload() {
        let envelope = Envelope::resume("token", "abc", 17).unwrap();
        assert_eq!(envelope.opcode, 6);
        assert_eq!(
            envelope.data,
            json!({"token": "token", "session_id": "abc", "seq": 17})
        );
    }

    #[test]
    fn test_request_guild_members_builder() {
        let request = RequestGuildMembers::all("81384788765712384")
            .with_user_ids(vec!["1".into(), "2".into()])
            .with_presences(true)
            .with_nonce("n1");
        let envelope = Envelope::request_guild_members(&request).unwrap();

        assert_eq!(envelope.opcode, 8);
        assert!(envelope.data.get("query").is_none());
        assert_eq!(envelope.data["user_ids"], json!(["1", "2"]));
        assert_eq!(envelope.data["presences"], json!(true));
        assert_eq!(envelope.data["nonce"], json!("n1"));
    }

    #[test]
    fn test_presence_update_payload() {
        let presence = PresenceUpdate {
            status: PresenceStatus::Dnd,
            activities: vec![PresenceActivity {
                name: "the logs".into(),
                kind: 3,
                url: None,
            }],
            ..PresenceUpdate::default()
        };
        let envelope = Envelope::presence_update(&presence).unwrap();
        assert_eq!(envelope.data["status"], json!("dnd"));
        assert_eq!(envelope.data["activities"][0]["type"], json!(3));
    }
}
