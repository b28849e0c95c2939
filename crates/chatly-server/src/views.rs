//! Response shapes that add per-viewer fields to stored records.

use chatly_shared::UserId;
use chatly_store::{Chat, Message, Receipt, UserSummary};
use serde::Serialize;

/// A chat as one of its members sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ChatView {
    #[serde(flatten)]
    pub chat: Chat,
    /// The other member.
    pub with: Option<UserSummary>,
}

impl ChatView {
    pub fn new(chat: Chat, viewer: &UserId) -> Self {
        let with = chat.counterpart_summary(viewer).cloned();
        Self { chat, with }
    }
}

/// A message plus, on the viewer's own messages, the receipt of the
/// other member.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

impl MessageView {
    pub fn new(message: Message, chat: &Chat, viewer: &UserId) -> Self {
        let receipt = if &message.sender_id == viewer {
            chat.counterpart(viewer).map(|other| message.receipt_for(other))
        } else {
            None
        };
        Self { message, receipt }
    }
}
