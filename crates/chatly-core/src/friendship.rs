//! Friendship ledger.
//!
//! Friend requests are the only stored relation; friendship is derived from
//! an accepted request in either direction.  Every multi-document mutation
//! (status flip plus notifications, cancel, unfriend, block) is a single
//! store batch, so readers never observe half of it.

use std::collections::{BTreeMap, BTreeSet};

use chatly_shared::{
    BlockId, FriendStatus, NotificationId, NotificationKind, RequestAction, RequestId,
    RequestStatus, UserId, UserPair,
};
use chatly_store::{Block, Change, FriendRequest, Notification, Reader, Store, User, UserSummary};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::sync::{self, Subscription};

/// Which side of a request the viewer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Received,
    Sent,
}

/// A request as seen by one of its parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEntry {
    pub direction: Direction,
    #[serde(flatten)]
    pub request: FriendRequest,
}

/// Status between two users from the requests that link them.
///
/// Accepted wins over pending, pending over rejected, so inconsistent data
/// never hides an existing friendship.
pub fn reduce_friend_status<'a>(
    requests: impl IntoIterator<Item = &'a FriendRequest>,
) -> FriendStatus {
    let mut status = FriendStatus::None;
    for request in requests {
        match request.status {
            RequestStatus::Accepted => return FriendStatus::Accepted,
            RequestStatus::Pending => status = FriendStatus::Requested,
            RequestStatus::Rejected if status == FriendStatus::None => {
                status = FriendStatus::Rejected
            }
            RequestStatus::Rejected => {}
        }
    }
    status
}

/// Ids of everyone `user` has an accepted request with.
pub fn friend_ids<'a>(
    user: &UserId,
    requests: impl IntoIterator<Item = &'a FriendRequest>,
) -> BTreeSet<UserId> {
    requests
        .into_iter()
        .filter(|r| r.status == RequestStatus::Accepted)
        .filter_map(|r| {
            if &r.from == user {
                Some(r.to.clone())
            } else if &r.to == user {
                Some(r.from.clone())
            } else {
                None
            }
        })
        .collect()
}

pub(crate) fn status_in(reader: Reader<'_>, a: &UserId, b: &UserId) -> Result<FriendStatus> {
    let Some(pair) = UserPair::new(a, b) else {
        return Ok(FriendStatus::None);
    };
    Ok(reduce_friend_status(&reader.requests_between(&pair)?))
}

pub(crate) fn are_friends_in(reader: Reader<'_>, a: &UserId, b: &UserId) -> Result<bool> {
    Ok(status_in(reader, a, b)? == FriendStatus::Accepted)
}

pub(crate) fn friend_ids_in(reader: Reader<'_>, user: &UserId) -> Result<BTreeSet<UserId>> {
    let mut requests = reader.incoming_requests(user, Some(RequestStatus::Accepted))?;
    requests.extend(reader.outgoing_requests(user, Some(RequestStatus::Accepted))?);
    Ok(friend_ids(user, &requests))
}

fn friends_in(reader: Reader<'_>, user: &UserId) -> Result<Vec<User>> {
    let mut friends = Vec::new();
    for id in friend_ids_in(reader, user)? {
        match reader.find_user(&id)? {
            Some(u) => friends.push(u),
            None => warn!(user = %user, friend = %id, "friend has no profile, skipping"),
        }
    }
    Ok(friends)
}

fn request_entries(reader: Reader<'_>, user: &UserId) -> Result<Vec<RequestEntry>> {
    let mut by_id = BTreeMap::new();
    for request in reader.incoming_requests(user, None)? {
        by_id.insert(
            request.id,
            RequestEntry {
                direction: Direction::Received,
                request,
            },
        );
    }
    for request in reader.outgoing_requests(user, None)? {
        by_id.entry(request.id).or_insert(RequestEntry {
            direction: Direction::Sent,
            request,
        });
    }
    let mut entries: Vec<_> = by_id.into_values().collect();
    entries.sort_by(|a, b| b.request.created_at.cmp(&a.request.created_at));
    Ok(entries)
}

fn distinct(a: &UserId, b: &UserId, what: &str) -> Result<UserPair> {
    UserPair::new(a, b).ok_or_else(|| CoreError::InvalidArgument(format!("cannot {what} yourself")))
}

#[derive(Clone)]
pub struct FriendshipLedger {
    store: Store,
}

impl FriendshipLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Send a friend request from `from` to `to` and notify the recipient.
    ///
    /// The status check and the insert share one transaction; the partial
    /// unique index on active pairs backs it up.
    pub async fn send_request(&self, from: &UserId, to: &UserId) -> Result<FriendRequest> {
        distinct(from, to, "befriend")?;
        let (from, to) = (from.clone(), to.clone());

        let request = self
            .store
            .write(move |b| -> Result<FriendRequest> {
                let reader = b.reader();
                let sender = reader
                    .find_user(&from)?
                    .ok_or_else(|| CoreError::NotFound(format!("user {from}")))?;
                if reader.find_user(&to)?.is_none() {
                    return Err(CoreError::NotFound(format!("user {to}")));
                }
                if reader.is_blocked(&to, &from)? || reader.is_blocked(&from, &to)? {
                    return Err(CoreError::Forbidden("a block exists between these users".into()));
                }
                match status_in(reader, &from, &to)? {
                    FriendStatus::Accepted => return Err(CoreError::AlreadyFriends),
                    FriendStatus::Requested => return Err(CoreError::RequestPending),
                    FriendStatus::None | FriendStatus::Rejected => {}
                }

                let now = b.now();
                let request = FriendRequest {
                    id: RequestId::new(),
                    from: from.clone(),
                    to: to.clone(),
                    from_name: sender.display_name().to_string(),
                    from_username: sender.username.clone(),
                    from_image: sender.image.clone(),
                    status: RequestStatus::Pending,
                    created_at: now,
                    updated_at: now,
                };
                b.insert_friend_request(&request).map_err(|e| {
                    if e.is_constraint_violation() {
                        CoreError::RequestPending
                    } else {
                        e.into()
                    }
                })?;
                b.insert_notification(&Notification {
                    id: NotificationId::new(),
                    to,
                    from: Some(from),
                    message: format!("{} sent you a friend request.", sender.display_name()),
                    kind: NotificationKind::FriendRequest,
                    read: false,
                    timestamp: now,
                    request_id: Some(request.id),
                })?;
                Ok(request)
            })
            .await?;
        info!(request = %request.id, from = %request.from, to = %request.to, "friend request sent");
        Ok(request)
    }

    /// Accept or reject a pending request addressed to `responder`.
    ///
    /// Flips the status, notifies the sender and marks the originating
    /// notification read, all in one batch.
    pub async fn respond(
        &self,
        request_id: RequestId,
        responder: &UserId,
        action: RequestAction,
    ) -> Result<FriendRequest> {
        let responder = responder.clone();
        let request = self
            .store
            .write(move |b| -> Result<FriendRequest> {
                let reader = b.reader();
                let mut request = reader
                    .find_friend_request(request_id)?
                    .ok_or_else(|| CoreError::NotFound(format!("friend request {request_id}")))?;
                if request.to != responder {
                    return Err(CoreError::Forbidden(
                        "only the recipient can respond to a request".into(),
                    ));
                }
                if request.status != RequestStatus::Pending {
                    return Err(CoreError::Conflict(format!(
                        "friend request already {}",
                        request.status.as_str()
                    )));
                }
                let name = reader
                    .find_user(&responder)?
                    .map(|u| u.display_name().to_string())
                    .unwrap_or_else(|| chatly_shared::constants::UNKNOWN_USER_NAME.to_string());
                let originals: Vec<NotificationId> = reader
                    .notifications_for_request(request.id, NotificationKind::FriendRequest)?
                    .into_iter()
                    .filter(|n| n.to == responder)
                    .map(|n| n.id)
                    .collect();

                let now = b.now();
                b.set_request_status(&request, action.status())?;
                let verb = match action {
                    RequestAction::Accepted => "accepted",
                    RequestAction::Rejected => "declined",
                };
                b.insert_notification(&Notification {
                    id: NotificationId::new(),
                    to: request.from.clone(),
                    from: Some(responder.clone()),
                    message: format!("{name} {verb} your friend request."),
                    kind: action.notification_kind(),
                    read: false,
                    timestamp: now,
                    request_id: Some(request.id),
                })?;
                b.mark_notifications_read(&responder, &originals)?;

                request.status = action.status();
                request.updated_at = now;
                Ok(request)
            })
            .await?;
        info!(request = %request.id, status = request.status.as_str(), "friend request answered");
        Ok(request)
    }

    /// Withdraw pending requests from `from` to `to` together with their
    /// notifications.  Returns `false` when there was nothing to cancel.
    pub async fn cancel(&self, from: &UserId, to: &UserId) -> Result<bool> {
        let (from, to) = (from.clone(), to.clone());
        let removed = self
            .store
            .write(move |b| -> Result<usize> {
                let pending = b
                    .reader()
                    .requests_from_to(&from, &to, Some(RequestStatus::Pending))?;
                for request in &pending {
                    let notes = b
                        .reader()
                        .notifications_for_request(request.id, NotificationKind::FriendRequest)?;
                    for note in &notes {
                        b.delete_notification(note)?;
                    }
                    b.delete_friend_request(request)?;
                }
                Ok(pending.len())
            })
            .await?;
        if removed > 0 {
            info!(removed, "friend request cancelled");
        }
        Ok(removed > 0)
    }

    pub async fn status(&self, a: &UserId, b: &UserId) -> Result<FriendStatus> {
        let (a, b) = (a.clone(), b.clone());
        self.store.read(move |r| status_in(r, &a, &b)).await
    }

    pub async fn are_friends(&self, a: &UserId, b: &UserId) -> Result<bool> {
        Ok(self.status(a, b).await? == FriendStatus::Accepted)
    }

    /// Friends of `user` resolved to profiles.  Store failures degrade to
    /// an empty list.
    pub async fn list_friends(&self, user: &UserId) -> Vec<User> {
        let user = user.clone();
        let who = user.clone();
        match self.store.read(move |r| friends_in(r, &user)).await {
            Ok(friends) => friends,
            Err(e) => {
                warn!(user = %who, error = %e, "listing friends failed");
                Vec::new()
            }
        }
    }

    /// Requests `user` sent or received, newest first.  Degrades to an
    /// empty list.
    pub async fn requests(&self, user: &UserId) -> Vec<RequestEntry> {
        let user = user.clone();
        let who = user.clone();
        match self.store.read(move |r| request_entries(r, &user)).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(user = %who, error = %e, "listing friend requests failed");
                Vec::new()
            }
        }
    }

    /// Delete every accepted request between the two users.
    pub async fn remove_friendship(&self, a: &UserId, b: &UserId) -> Result<()> {
        let pair = distinct(a, b, "unfriend")?;
        self.store
            .write(move |batch| -> Result<()> {
                let accepted: Vec<FriendRequest> = batch
                    .reader()
                    .requests_between(&pair)?
                    .into_iter()
                    .filter(|r| r.status == RequestStatus::Accepted)
                    .collect();
                if accepted.is_empty() {
                    return Err(CoreError::NotFound("no friendship between these users".into()));
                }
                for request in &accepted {
                    batch.delete_friend_request(request)?;
                }
                Ok(())
            })
            .await?;
        info!(a = %a, b = %b, "friendship removed");
        Ok(())
    }

    /// `by` blocks `user`: any request between them is dropped and a block
    /// record is added.  The block is one-directional.
    pub async fn block(&self, by: &UserId, user: &UserId) -> Result<Block> {
        let pair = distinct(by, user, "block")?;
        let (by, user) = (by.clone(), user.clone());
        let block = self
            .store
            .write(move |b| -> Result<Block> {
                if b.reader().find_user(&user)?.is_none() {
                    return Err(CoreError::NotFound(format!("user {user}")));
                }
                let existing = b.reader().requests_between(&pair)?;
                for request in &existing {
                    b.delete_friend_request(request)?;
                }
                let block = Block {
                    id: BlockId::new(),
                    blocked_by: by.clone(),
                    blocked_user: user.clone(),
                    timestamp: b.now(),
                };
                if b.insert_block(&block)? {
                    return Ok(block);
                }
                b.reader()
                    .blocks_by(&by)?
                    .into_iter()
                    .find(|existing| existing.blocked_user == user)
                    .ok_or_else(|| CoreError::Conflict("block vanished".into()))
            })
            .await?;
        info!(by = %block.blocked_by, user = %block.blocked_user, "user blocked");
        Ok(block)
    }

    /// Users `by` has blocked.  Degrades to an empty list.
    pub async fn blocked_users(&self, by: &UserId) -> Vec<UserSummary> {
        let by = by.clone();
        let who = by.clone();
        let result = self
            .store
            .read(move |r| -> Result<Vec<UserSummary>> {
                let mut out = Vec::new();
                for block in r.blocks_by(&by)? {
                    if let Some(user) = r.find_user(&block.blocked_user)? {
                        out.push(user.summary());
                    }
                }
                Ok(out)
            })
            .await;
        result.unwrap_or_else(|e| {
            warn!(user = %who, error = %e, "listing blocked users failed");
            Vec::new()
        })
    }

    pub async fn is_blocked(&self, by: &UserId, user: &UserId) -> Result<bool> {
        let (by, user) = (by.clone(), user.clone());
        self.store
            .read(move |r| Ok(r.is_blocked(&by, &user)?))
            .await
    }

    /// Pending requests addressed to `user`, newest first.
    pub fn subscribe_incoming(&self, user: &UserId) -> Subscription<FriendRequest> {
        let (watch, user) = (user.clone(), user.clone());
        sync::subscribe(
            &self.store,
            "incoming_requests",
            move |c| matches!(c, Change::FriendRequest { to, .. } if to == &watch),
            move |r| Ok(r.incoming_requests(&user, Some(RequestStatus::Pending))?),
        )
    }

    /// Every request `user` sent or received, newest first.
    pub fn subscribe_all(&self, user: &UserId) -> Subscription<RequestEntry> {
        let (watch, user) = (user.clone(), user.clone());
        sync::subscribe(
            &self.store,
            "all_requests",
            move |c| matches!(c, Change::FriendRequest { .. }) && c.involves(&watch),
            move |r| request_entries(r, &user),
        )
    }

    /// Friends of `user`; re-emits on friendship changes and profile edits.
    pub fn subscribe_friends(&self, user: &UserId) -> Subscription<User> {
        let (watch, user) = (user.clone(), user.clone());
        sync::subscribe(
            &self.store,
            "friends",
            move |c| match c {
                Change::FriendRequest { .. } => c.involves(&watch),
                Change::User { .. } => true,
                _ => false,
            },
            move |r| friends_in(r, &user),
        )
    }
}
