//! Inbound event envelope.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

macro_rules! event_types {
    ($( $variant:ident => $tag:literal, )*) => {
        /// Inbound event types.
        ///
        /// Tags this build does not know decode to [`EventType::Unknown`] so the
        /// router can skip them instead of failing.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum EventType {
            $( $variant, )*
            Unknown(String),
        }

        impl EventType {
            pub const KNOWN: &'static [EventType] = &[ $( EventType::$variant, )* ];

            pub fn as_str(&self) -> &str {
                match self {
                    $( EventType::$variant => $tag, )*
                    EventType::Unknown(tag) => tag.as_str(),
                }
            }

            pub fn parse(tag: &str) -> Self {
                match tag {
                    $( $tag => EventType::$variant, )*
                    other => EventType::Unknown(other.to_string()),
                }
            }
        }
    };
}

event_types! {
    Instantiate => "INSTANTIATE",
    ChannelCreate => "DISCORD_CHANNEL_CREATE",
    ChannelUpdate => "DISCORD_CHANNEL_UPDATE",
    ChannelDelete => "DISCORD_CHANNEL_DELETE",
    ChannelPinsUpdate => "DISCORD_CHANNEL_PINS_UPDATE",
    ThreadCreate => "DISCORD_THREAD_CREATE",
    ThreadUpdate => "DISCORD_THREAD_UPDATE",
    ThreadDelete => "DISCORD_THREAD_DELETE",
    ThreadListSync => "DISCORD_THREAD_LIST_SYNC",
    ThreadMemberUpdate => "DISCORD_THREAD_MEMBER_UPDATE",
    ThreadMembersUpdate => "DISCORD_THREAD_MEMBERS_UPDATE",
    GuildCreate => "DISCORD_GUILD_CREATE",
    GuildUpdate => "DISCORD_GUILD_UPDATE",
    GuildDelete => "DISCORD_GUILD_DELETE",
    GuildBanAdd => "DISCORD_GUILD_BAN_ADD",
    GuildBanRemove => "DISCORD_GUILD_BAN_REMOVE",
    GuildEmojisUpdate => "DISCORD_GUILD_EMOJIS_UPDATE",
    GuildStickersUpdate => "DISCORD_GUILD_STICKERS_UPDATE",
    GuildMemberAdd => "DISCORD_GUILD_MEMBER_ADD",
    GuildMemberRemove => "DISCORD_GUILD_MEMBER_REMOVE",
    GuildMemberUpdate => "DISCORD_GUILD_MEMBER_UPDATE",
    GuildRoleCreate => "DISCORD_GUILD_ROLE_CREATE",
    GuildRoleUpdate => "DISCORD_GUILD_ROLE_UPDATE",
    GuildRoleDelete => "DISCORD_GUILD_ROLE_DELETE",
    GuildScheduledEventCreate => "DISCORD_GUILD_SCHEDULED_EVENT_CREATE",
    GuildScheduledEventUpdate => "DISCORD_GUILD_SCHEDULED_EVENT_UPDATE",
    GuildScheduledEventDelete => "DISCORD_GUILD_SCHEDULED_EVENT_DELETE",
    GuildScheduledEventUserAdd => "DISCORD_GUILD_SCHEDULED_EVENT_USER_ADD",
    GuildScheduledEventUserRemove => "DISCORD_GUILD_SCHEDULED_EVENT_USER_REMOVE",
    InviteCreate => "DISCORD_INVITE_CREATE",
    InviteDelete => "DISCORD_INVITE_DELETE",
    InteractionCreate => "DISCORD_INTERACTION_CREATE",
    MessageCreate => "DISCORD_MESSAGE_CREATE",
    MessageUpdate => "DISCORD_MESSAGE_UPDATE",
    MessageDelete => "DISCORD_MESSAGE_DELETE",
    MessageDeleteBulk => "DISCORD_MESSAGE_DELETE_BULK",
    MessageReactionAdd => "DISCORD_MESSAGE_REACTION_ADD",
    MessageReactionRemove => "DISCORD_MESSAGE_REACTION_REMOVE",
    MessageReactionRemoveAll => "DISCORD_MESSAGE_REACTION_REMOVE_ALL",
    MessageReactionRemoveEmoji => "DISCORD_MESSAGE_REACTION_REMOVE_EMOJI",
    StageInstanceCreate => "DISCORD_STAGE_INSTANCE_CREATE",
    StageInstanceUpdate => "DISCORD_STAGE_INSTANCE_UPDATE",
    StageInstanceDelete => "DISCORD_STAGE_INSTANCE_DELETE",
}

impl EventType {
    pub fn is_known(&self) -> bool {
        !matches!(self, EventType::Unknown(_))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(EventType::parse(&tag))
    }
}

/// An event delivered to a guest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub guild_id: String,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(event_type: EventType, guild_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            guild_id: guild_id.into(),
            data,
        }
    }
}

/// Error reported by a guest for its own business logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for GuestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Guest reply to one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GuestError>,
}

impl EventResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(code: i64, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(GuestError {
                code,
                message: message.into(),
            }),
        }
    }
}
