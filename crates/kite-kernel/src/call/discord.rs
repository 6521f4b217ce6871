//! Platform REST operations.
//!
//! The table at the bottom of this file is the single source of truth for
//! every `DISCORD_*` call tag: its enum variant, its request payload and the
//! shape of its response. Adding a tag is one line in the table; the compiler
//! then forces every `match` over [`DiscordCall`] to handle it.
//!
//! Requests carry the identifying fields (channel, message, user ids and so
//! on) as typed members. Create and update bodies are forwarded to the
//! platform as JSON objects without further interpretation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ResponseShape;

/// Free-form JSON object forwarded as a request body.
pub type Body = Map<String, Value>;

/// Request without arguments, scoped to the invocation's guild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoArgs {}

/// A request body with no identifying fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(flatten)]
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdPayload {
    pub id: String,
    #[serde(flatten)]
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanCreateCall {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_message_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub channel_id: String,
    #[serde(flatten)]
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPosition {
    pub id: String,
    pub position: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_permissions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelPositions(pub Vec<ChannelPosition>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionOverwriteCall {
    pub channel_id: String,
    pub overwrite_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<String>,
    #[serde(rename = "type", default)]
    pub overwrite_type: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionOverwriteRef {
    pub channel_id: String,
    pub overwrite_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub channel_id: String,
    pub message_id: String,
    #[serde(flatten)]
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageListCall {
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub around: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeleteBulkCall {
    pub channel_id: String,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionRef {
    pub channel_id: String,
    pub message_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionUserRef {
    pub channel_id: String,
    pub message_id: String,
    pub emoji: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionListCall {
    pub channel_id: String,
    pub message_id: String,
    pub emoji: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMemberRef {
    pub channel_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMemberGetCall {
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub with_member: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMemberListCall {
    pub channel_id: String,
    #[serde(default)]
    pub with_member: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedThreadListCall {
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRef {
    pub id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionPayload {
    pub id: String,
    pub token: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowupRef {
    pub id: String,
    pub token: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowupPayload {
    pub id: String,
    pub token: String,
    pub message_id: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteGetCall {
    pub code: String,
    #[serde(default)]
    pub with_counts: bool,
    #[serde(default)]
    pub with_expiration: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_scheduled_event_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteRef {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberPayload {
    pub user_id: String,
    #[serde(flatten)]
    pub body: Body,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberListCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSearchCall {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRoleRef {
    pub user_id: String,
    pub role_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberPruneCountCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    #[serde(default)]
    pub include_roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberPruneBeginCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    #[serde(default)]
    pub compute_prune_count: bool,
    #[serde(default)]
    pub include_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRef {
    pub role_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePayload {
    pub role_id: String,
    #[serde(flatten)]
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePosition {
    pub role_id: String,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RolePositions(pub Vec<RolePosition>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEventUserListCall {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default)]
    pub with_member: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRef {
    pub id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub id: String,
    pub token: String,
    #[serde(flatten)]
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookExecuteCall {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub wait: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(flatten)]
    pub body: Body,
}

macro_rules! discord_calls {
    ($( $tag:literal => $variant:ident($req:ty) -> $shape:ident, )*) => {
        /// A decoded platform call.
        #[derive(Debug, Clone, PartialEq)]
        pub enum DiscordCall {
            $( $variant($req), )*
        }

        /// Payload-free discriminant of [`DiscordCall`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum DiscordCallKind {
            $( $variant, )*
        }

        impl DiscordCallKind {
            pub const ALL: &'static [DiscordCallKind] = &[ $( DiscordCallKind::$variant, )* ];

            pub fn tag(self) -> &'static str {
                match self {
                    $( DiscordCallKind::$variant => $tag, )*
                }
            }

            pub fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $( $tag => Some(DiscordCallKind::$variant), )*
                    _ => None,
                }
            }

            pub fn response_shape(self) -> ResponseShape {
                match self {
                    $( DiscordCallKind::$variant => ResponseShape::$shape, )*
                }
            }
        }

        impl DiscordCall {
            pub fn kind(&self) -> DiscordCallKind {
                match self {
                    $( DiscordCall::$variant(_) => DiscordCallKind::$variant, )*
                }
            }

            pub fn decode(kind: DiscordCallKind, data: Value) -> Result<Self, serde_json::Error> {
                match kind {
                    $( DiscordCallKind::$variant => serde_json::from_value::<$req>(data).map(DiscordCall::$variant), )*
                }
            }

            /// Request payload as sent on the wire.
            pub fn to_value(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $( DiscordCall::$variant(req) => serde_json::to_value(req), )*
                }
            }
        }
    };
}

discord_calls! {
    "DISCORD_BAN_LIST" => BanList(NoArgs) -> List,
    "DISCORD_BAN_GET" => BanGet(UserRef) -> Object,
    "DISCORD_BAN_CREATE" => BanCreate(BanCreateCall) -> Empty,
    "DISCORD_BAN_REMOVE" => BanRemove(UserRef) -> Empty,

    "DISCORD_CHANNEL_GET" => ChannelGet(IdRef) -> Object,
    "DISCORD_CHANNEL_LIST" => ChannelList(NoArgs) -> List,
    "DISCORD_CHANNEL_CREATE" => ChannelCreate(Payload) -> Object,
    "DISCORD_CHANNEL_UPDATE" => ChannelUpdate(IdPayload) -> Object,
    "DISCORD_CHANNEL_UPDATE_POSITIONS" => ChannelUpdatePositions(ChannelPositions) -> Empty,
    "DISCORD_CHANNEL_DELETE" => ChannelDelete(IdRef) -> Object,
    "DISCORD_CHANNEL_UPDATE_PERMISSIONS" => ChannelUpdatePermissions(PermissionOverwriteCall) -> Empty,
    "DISCORD_CHANNEL_DELETE_PERMISSIONS" => ChannelDeletePermissions(PermissionOverwriteRef) -> Empty,

    "DISCORD_THREAD_START_FROM_MESSAGE" => ThreadStartFromMessage(MessagePayload) -> Object,
    "DISCORD_THREAD_START" => ThreadStart(ChannelPayload) -> Object,
    "DISCORD_THREAD_START_IN_FORUM" => ThreadStartInForum(ChannelPayload) -> Object,
    "DISCORD_THREAD_JOIN" => ThreadJoin(ChannelRef) -> Empty,
    "DISCORD_THREAD_ADD_MEMBER" => ThreadAddMember(ThreadMemberRef) -> Empty,
    "DISCORD_THREAD_LEAVE" => ThreadLeave(ChannelRef) -> Empty,
    "DISCORD_THREAD_REMOVE_MEMBER" => ThreadRemoveMember(ThreadMemberRef) -> Empty,
    "DISCORD_THREAD_MEMBER_GET" => ThreadMemberGet(ThreadMemberGetCall) -> Object,
    "DISCORD_THREAD_MEMBER_LIST" => ThreadMemberList(ThreadMemberListCall) -> List,
    "DISCORD_THREAD_LIST_PUBLIC_ARCHIVED" => ThreadListPublicArchived(ArchivedThreadListCall) -> Object,
    "DISCORD_THREAD_LIST_PRIVATE_ARCHIVED" => ThreadListPrivateArchived(ArchivedThreadListCall) -> Object,
    "DISCORD_THREAD_LIST_JOINED_PRIVATE_ARCHIVED" => ThreadListJoinedPrivateArchived(ArchivedThreadListCall) -> Object,
    "DISCORD_THREAD_LIST_ACTIVE" => ThreadListActive(NoArgs) -> Object,

    "DISCORD_EMOJI_LIST" => EmojiList(NoArgs) -> List,
    "DISCORD_EMOJI_GET" => EmojiGet(IdRef) -> Object,
    "DISCORD_EMOJI_CREATE" => EmojiCreate(Payload) -> Object,
    "DISCORD_EMOJI_UPDATE" => EmojiUpdate(IdPayload) -> Object,
    "DISCORD_EMOJI_DELETE" => EmojiDelete(IdRef) -> Empty,

    "DISCORD_GUILD_GET" => GuildGet(NoArgs) -> Object,
    "DISCORD_GUILD_UPDATE" => GuildUpdate(Payload) -> Object,

    "DISCORD_INTERACTION_RESPONSE_CREATE" => InteractionResponseCreate(InteractionPayload) -> Object,
    "DISCORD_INTERACTION_RESPONSE_UPDATE" => InteractionResponseUpdate(InteractionPayload) -> Object,
    "DISCORD_INTERACTION_RESPONSE_DELETE" => InteractionResponseDelete(InteractionRef) -> Empty,
    "DISCORD_INTERACTION_RESPONSE_GET" => InteractionResponseGet(InteractionRef) -> Object,
    "DISCORD_INTERACTION_FOLLOWUP_CREATE" => InteractionFollowupCreate(InteractionPayload) -> Object,
    "DISCORD_INTERACTION_FOLLOWUP_UPDATE" => InteractionFollowupUpdate(FollowupPayload) -> Object,
    "DISCORD_INTERACTION_FOLLOWUP_DELETE" => InteractionFollowupDelete(FollowupRef) -> Empty,
    "DISCORD_INTERACTION_FOLLOWUP_GET" => InteractionFollowupGet(FollowupRef) -> Object,

    "DISCORD_INVITE_LIST_FOR_CHANNEL" => InviteListForChannel(ChannelRef) -> List,
    "DISCORD_INVITE_LIST_FOR_GUILD" => InviteListForGuild(NoArgs) -> List,
    "DISCORD_INVITE_CREATE" => InviteCreate(ChannelPayload) -> Object,
    "DISCORD_INVITE_GET" => InviteGet(InviteGetCall) -> Object,
    "DISCORD_INVITE_DELETE" => InviteDelete(InviteRef) -> Object,

    "DISCORD_MEMBER_GET" => MemberGet(UserRef) -> Object,
    "DISCORD_MEMBER_LIST" => MemberList(MemberListCall) -> List,
    "DISCORD_MEMBER_SEARCH" => MemberSearch(MemberSearchCall) -> List,
    "DISCORD_MEMBER_UPDATE" => MemberUpdate(MemberPayload) -> Object,
    "DISCORD_MEMBER_UPDATE_OWN" => MemberUpdateOwn(Payload) -> Object,
    "DISCORD_MEMBER_ADD_ROLE" => MemberAddRole(MemberRoleRef) -> Empty,
    "DISCORD_MEMBER_REMOVE_ROLE" => MemberRemoveRole(MemberRoleRef) -> Empty,
    "DISCORD_MEMBER_REMOVE" => MemberRemove(UserRef) -> Empty,
    "DISCORD_MEMBER_PRUNE_COUNT" => MemberPruneCount(MemberPruneCountCall) -> Object,
    "DISCORD_MEMBER_PRUNE_BEGIN" => MemberPruneBegin(MemberPruneBeginCall) -> Object,

    "DISCORD_MESSAGE_LIST" => MessageList(MessageListCall) -> List,
    "DISCORD_MESSAGE_GET" => MessageGet(MessageRef) -> Object,
    "DISCORD_MESSAGE_CREATE" => MessageCreate(ChannelPayload) -> Object,
    "DISCORD_MESSAGE_UPDATE" => MessageUpdate(MessagePayload) -> Object,
    "DISCORD_MESSAGE_DELETE" => MessageDelete(MessageRef) -> Empty,
    "DISCORD_MESSAGE_DELETE_BULK" => MessageDeleteBulk(MessageDeleteBulkCall) -> Empty,
    "DISCORD_MESSAGE_REACTION_CREATE" => MessageReactionCreate(ReactionRef) -> Empty,
    "DISCORD_MESSAGE_REACTION_DELETE_OWN" => MessageReactionDeleteOwn(ReactionRef) -> Empty,
    "DISCORD_MESSAGE_REACTION_DELETE_USER" => MessageReactionDeleteUser(ReactionUserRef) -> Empty,
    "DISCORD_MESSAGE_REACTION_LIST" => MessageReactionList(ReactionListCall) -> List,
    "DISCORD_MESSAGE_REACTION_DELETE_ALL" => MessageReactionDeleteAll(MessageRef) -> Empty,
    "DISCORD_MESSAGE_REACTION_DELETE_EMOJI" => MessageReactionDeleteEmoji(ReactionRef) -> Empty,
    "DISCORD_MESSAGE_GET_PINNED" => MessageGetPinned(ChannelRef) -> List,
    "DISCORD_MESSAGE_PIN" => MessagePin(MessageRef) -> Empty,
    "DISCORD_MESSAGE_UNPIN" => MessageUnpin(MessageRef) -> Empty,

    "DISCORD_ROLE_LIST" => RoleList(NoArgs) -> List,
    "DISCORD_ROLE_CREATE" => RoleCreate(Payload) -> Object,
    "DISCORD_ROLE_UPDATE" => RoleUpdate(RolePayload) -> Object,
    "DISCORD_ROLE_UPDATE_POSITIONS" => RoleUpdatePositions(RolePositions) -> List,
    "DISCORD_ROLE_DELETE" => RoleDelete(RoleRef) -> Empty,

    "DISCORD_SCHEDULED_EVENT_LIST" => ScheduledEventList(NoArgs) -> List,
    "DISCORD_SCHEDULED_EVENT_CREATE" => ScheduledEventCreate(Payload) -> Object,
    "DISCORD_SCHEDULED_EVENT_GET" => ScheduledEventGet(IdRef) -> Object,
    "DISCORD_SCHEDULED_EVENT_UPDATE" => ScheduledEventUpdate(IdPayload) -> Object,
    "DISCORD_SCHEDULED_EVENT_DELETE" => ScheduledEventDelete(IdRef) -> Empty,
    "DISCORD_SCHEDULED_EVENT_USER_LIST" => ScheduledEventUserList(ScheduledEventUserListCall) -> List,

    "DISCORD_STAGE_INSTANCE_CREATE" => StageInstanceCreate(ChannelPayload) -> Object,
    "DISCORD_STAGE_INSTANCE_GET" => StageInstanceGet(ChannelRef) -> Object,
    "DISCORD_STAGE_INSTANCE_UPDATE" => StageInstanceUpdate(ChannelPayload) -> Object,
    "DISCORD_STAGE_INSTANCE_DELETE" => StageInstanceDelete(ChannelRef) -> Empty,

    "DISCORD_STICKER_LIST" => StickerList(NoArgs) -> List,
    "DISCORD_STICKER_GET" => StickerGet(IdRef) -> Object,
    "DISCORD_STICKER_CREATE" => StickerCreate(Payload) -> Object,
    "DISCORD_STICKER_UPDATE" => StickerUpdate(IdPayload) -> Object,
    "DISCORD_STICKER_DELETE" => StickerDelete(IdRef) -> Empty,

    "DISCORD_USER_GET" => UserGet(IdRef) -> Object,

    "DISCORD_WEBHOOK_GET" => WebhookGet(IdRef) -> Object,
    "DISCORD_WEBHOOK_LIST_FOR_CHANNEL" => WebhookListForChannel(ChannelRef) -> List,
    "DISCORD_WEBHOOK_LIST_FOR_GUILD" => WebhookListForGuild(NoArgs) -> List,
    "DISCORD_WEBHOOK_CREATE" => WebhookCreate(ChannelPayload) -> Object,
    "DISCORD_WEBHOOK_UPDATE" => WebhookUpdate(IdPayload) -> Object,
    "DISCORD_WEBHOOK_DELETE" => WebhookDelete(IdRef) -> Empty,
    "DISCORD_WEBHOOK_GET_WITH_TOKEN" => WebhookGetWithToken(TokenRef) -> Object,
    "DISCORD_WEBHOOK_UPDATE_WITH_TOKEN" => WebhookUpdateWithToken(TokenPayload) -> Object,
    "DISCORD_WEBHOOK_DELETE_WITH_TOKEN" => WebhookDeleteWithToken(TokenRef) -> Empty,
    "DISCORD_WEBHOOK_EXECUTE" => WebhookExecute(WebhookExecuteCall) -> OptionalObject,
}
