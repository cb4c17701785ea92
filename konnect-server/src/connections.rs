//! Connection graph.
//!
//! Each user document holds its established `connections` and its *incoming*
//! `connection_requests`. An outgoing request is only visible on the recipient's
//! document. Every write that touches two documents runs in one sled transaction, so
//! a connection can never end up listed on one side only.

use konnect_common::non_api_structs::UserData;
use konnect_common::{ConnectionStatus, NotificationType, UserId};
use sled::transaction::ConflictableTransactionError::Abort;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::state::{read_doc, write_doc, State, TxResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// The pair became connected by this call.
    Connected,
    /// The pair was already connected; nothing changed.
    AlreadyConnected,
}

impl State {
    pub fn send_connection_request(&self, me: &UserId, target: &UserId) -> Result<()> {
        if me == target {
            return Err(AppError::SelfConnection);
        }
        self.users.transaction(|tx| -> TxResult<()> {
            if read_doc::<UserData>(tx, me.as_bytes())?.is_none() {
                return Err(Abort(AppError::UserNotFound));
            }
            let mut target_doc = read_doc::<UserData>(tx, target.as_bytes())?
                .ok_or(Abort(AppError::UserNotFound))?;
            if target_doc.is_connected_to(me) {
                return Err(Abort(AppError::AlreadyConnected));
            }
            if !target_doc.connection_requests.insert(me.clone()) {
                return Err(Abort(AppError::DuplicateRequest));
            }
            write_doc(tx, target.as_bytes(), &target_doc)
        })?;
        info!("{} sent a connection request to {}", me, target);
        Ok(())
    }

    /// Accepting an already connected pair succeeds without side effects, so a
    /// double-submitted accept is harmless.
    pub fn accept_connection_request(&self, me: &UserId, requester: &UserId) -> Result<Accepted> {
        let (accepted, my_name) = self.users.transaction(|tx| -> TxResult<(Accepted, String)> {
            let mut my_doc = read_doc::<UserData>(tx, me.as_bytes())?
                .ok_or(Abort(AppError::UserNotFound))?;
            if !my_doc.has_request_from(requester) {
                return if my_doc.is_connected_to(requester) {
                    Ok((Accepted::AlreadyConnected, my_doc.name))
                } else {
                    Err(Abort(AppError::NoSuchRequest))
                };
            }
            let mut requester_doc = read_doc::<UserData>(tx, requester.as_bytes())?
                .ok_or(Abort(AppError::UserNotFound))?;

            my_doc.connection_requests.remove(requester);
            my_doc.connections.insert(requester.clone());
            requester_doc.connections.insert(me.clone());
            // A crossing request in the other direction is settled by this accept too.
            requester_doc.connection_requests.remove(me);

            write_doc(tx, me.as_bytes(), &my_doc)?;
            write_doc(tx, requester.as_bytes(), &requester_doc)?;
            Ok((Accepted::Connected, my_doc.name))
        })?;

        if accepted == Accepted::Connected {
            info!("{} accepted the connection request from {}", me, requester);
            self.emit_notification(
                requester,
                NotificationType::Connection,
                Some(me.to_string()),
                format!("{} accepted your connection request", my_name),
            );
        } else {
            debug!("{} and {} were already connected", me, requester);
        }
        Ok(accepted)
    }

    /// Idempotent; a missing request is not an error.
    pub fn reject_connection_request(&self, me: &UserId, requester: &UserId) -> Result<()> {
        let removed = self.try_user_mut(me, |user| Ok(user.connection_requests.remove(requester)))?;
        if removed {
            info!("{} rejected the connection request from {}", me, requester);
        }
        Ok(())
    }

    /// Idempotent. If the other account is gone, our side is still cleaned up.
    pub fn remove_connection(&self, me: &UserId, other: &UserId) -> Result<()> {
        self.users.transaction(|tx| -> TxResult<()> {
            let mut my_doc = read_doc::<UserData>(tx, me.as_bytes())?
                .ok_or(Abort(AppError::UserNotFound))?;
            if my_doc.connections.remove(other) {
                write_doc(tx, me.as_bytes(), &my_doc)?;
            }
            if me != other {
                if let Some(mut other_doc) = read_doc::<UserData>(tx, other.as_bytes())? {
                    if other_doc.connections.remove(me) {
                        write_doc(tx, other.as_bytes(), &other_doc)?;
                    }
                }
            }
            Ok(())
        })?;
        info!("{} removed connection with {}", me, other);
        Ok(())
    }

    pub fn connection_status(&self, me: &UserId, other: &UserId) -> Result<ConnectionStatus> {
        let my_doc = self.user(me)?;
        let other_doc = self.user(other)?;
        Ok(ConnectionStatus {
            is_connected: my_doc.is_connected_to(other),
            request_sent: other_doc.has_request_from(me),
            request_received: my_doc.has_request_from(other),
        })
    }

    pub fn connections_of(&self, me: &UserId) -> Result<Vec<UserData>> {
        let mut users = self.users_by_id(self.user(me)?.connections)?;
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    pub fn incoming_requests(&self, me: &UserId) -> Result<Vec<UserData>> {
        let mut users = self.users_by_id(self.user(me)?.connection_requests)?;
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{add_user, state};

    #[test]
    fn send_then_accept_connects_both_sides() {
        let state = state();
        let a = add_user(&state, "Ali");
        let b = add_user(&state, "Sana");

        state.send_connection_request(&a, &b).unwrap();
        assert_eq!(state.accept_connection_request(&b, &a).unwrap(), Accepted::Connected);

        assert!(state.connection_status(&a, &b).unwrap().is_connected);
        assert!(state.connection_status(&b, &a).unwrap().is_connected);
        assert!(state.user(&b).unwrap().connection_requests.is_empty());
    }

    #[test]
    fn sending_only_touches_the_target() {
        let state = state();
        let a = add_user(&state, "Ali");
        let b = add_user(&state, "Sana");

        state.send_connection_request(&a, &b).unwrap();
        let a_doc = state.user(&a).unwrap();
        assert!(a_doc.connection_requests.is_empty());
        assert!(a_doc.connections.is_empty());

        let from_a = state.connection_status(&a, &b).unwrap();
        assert_eq!(from_a, ConnectionStatus { is_connected: false, request_sent: true, request_received: false });
        let from_b = state.connection_status(&b, &a).unwrap();
        assert_eq!(from_b, ConnectionStatus { is_connected: false, request_sent: false, request_received: true });
    }

    #[test]
    fn send_then_reject_leaves_nothing_behind() {
        let state = state();
        let a = add_user(&state, "Ali");
        let b = add_user(&state, "Sana");

        state.send_connection_request(&a, &b).unwrap();
        state.reject_connection_request(&b, &a).unwrap();

        assert!(!state.connection_status(&a, &b).unwrap().request_sent);
        assert!(state.user(&a).unwrap().connections.is_empty());
        assert!(state.user(&b).unwrap().connections.is_empty());
        // Rejecting again, or a request that never existed, is a no-op.
        state.reject_connection_request(&b, &a).unwrap();
        state.reject_connection_request(&b, &UserId::new()).unwrap();
    }

    #[test]
    fn self_request_is_a_validation_error() {
        let state = state();
        let a = add_user(&state, "Ali");
        let err = state.send_connection_request(&a, &a).unwrap_err();
        assert!(matches!(err, AppError::SelfConnection));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn duplicate_request_is_a_conflict() {
        let state = state();
        let a = add_user(&state, "Ali");
        let b = add_user(&state, "Sana");
        state.send_connection_request(&a, &b).unwrap();
        let err = state.send_connection_request(&a, &b).unwrap_err();
        assert!(matches!(err, AppError::DuplicateRequest));
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }

    #[test]
    fn request_to_connected_user_is_a_conflict() {
        let state = state();
        let a = add_user(&state, "Ali");
        let b = add_user(&state, "Sana");
        state.send_connection_request(&a, &b).unwrap();
        state.accept_connection_request(&b, &a).unwrap();
        assert!(matches!(
            state.send_connection_request(&a, &b),
            Err(AppError::AlreadyConnected)
        ));
    }

    #[test]
    fn request_to_unknown_user_is_not_found() {
        let state = state();
        let a = add_user(&state, "Ali");
        assert!(matches!(
            state.send_connection_request(&a, &UserId::new()),
            Err(AppError::UserNotFound)
        ));
    }

    #[test]
    fn accept_without_request_is_not_found() {
        let state = state();
        let a = add_user(&state, "Ali");
        let b = add_user(&state, "Sana");
        assert!(matches!(
            state.accept_connection_request(&b, &a),
            Err(AppError::NoSuchRequest)
        ));
    }

    #[test]
    fn accept_is_idempotent_and_notifies_once() {
        let state = state();
        let a = add_user(&state, "Ali");
        let b = add_user(&state, "Sana");
        state.send_connection_request(&a, &b).unwrap();

        assert_eq!(state.accept_connection_request(&b, &a).unwrap(), Accepted::Connected);
        assert_eq!(state.accept_connection_request(&b, &a).unwrap(), Accepted::AlreadyConnected);

        let notifications = state.notifications_for(&a).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationType::Connection);
        assert_eq!(notifications[0].message, "Sana accepted your connection request");
        assert_eq!(notifications[0].reference_id.as_deref(), Some(b.as_str()));
    }

    #[test]
    fn accept_succeeds_when_notification_cannot_be_stored() {
        let state = state();
        let a = add_user(&state, "Ali");
        let b = add_user(&state, "Sana");
        state.send_connection_request(&a, &b).unwrap();
        state.break_notifications.store(true, std::sync::atomic::Ordering::SeqCst);

        assert_eq!(state.accept_connection_request(&b, &a).unwrap(), Accepted::Connected);
        assert!(state.user(&a).unwrap().is_connected_to(&b));
        assert!(state.user(&b).unwrap().is_connected_to(&a));
        assert!(state.user(&b).unwrap().connection_requests.is_empty());
        assert!(state.notifications_for(&a).unwrap().is_empty());
    }

    #[test]
    fn send_does_not_notify() {
        let state = state();
        let a = add_user(&state, "Ali");
        let b = add_user(&state, "Sana");
        state.send_connection_request(&a, &b).unwrap();
        assert!(state.notifications_for(&b).unwrap().is_empty());
    }

    #[test]
    fn remove_is_symmetric_and_idempotent() {
        let state = state();
        let a = add_user(&state, "Ali");
        let b = add_user(&state, "Sana");
        state.send_connection_request(&a, &b).unwrap();
        state.accept_connection_request(&b, &a).unwrap();

        state.remove_connection(&a, &b).unwrap();
        let once = (state.user(&a).unwrap().connections, state.user(&b).unwrap().connections);
        state.remove_connection(&a, &b).unwrap();
        let twice = (state.user(&a).unwrap().connections, state.user(&b).unwrap().connections);

        assert!(once.0.is_empty() && once.1.is_empty());
        assert_eq!(once, twice);
        assert!(!state.connection_status(&b, &a).unwrap().is_connected);
    }

    #[test]
    fn crossing_requests_both_succeed() {
        let state = state();
        let a = add_user(&state, "Ali");
        let b = add_user(&state, "Sana");

        let (left, right) = std::thread::scope(|s| {
            let left = s.spawn(|| state.send_connection_request(&a, &b));
            let right = s.spawn(|| state.send_connection_request(&b, &a));
            (left.join().unwrap(), right.join().unwrap())
        });
        left.unwrap();
        right.unwrap();

        // Current behavior: each user now holds a pending request from the other.
        assert!(state.user(&a).unwrap().has_request_from(&b));
        assert!(state.user(&b).unwrap().has_request_from(&a));
        let status = state.connection_status(&a, &b).unwrap();
        assert!(status.request_sent && status.request_received && !status.is_connected);

        // Accepting either one settles the pair into a plain connection.
        state.accept_connection_request(&a, &b).unwrap();
        assert_eq!(
            state.connection_status(&a, &b).unwrap(),
            ConnectionStatus { is_connected: true, request_sent: false, request_received: false }
        );
    }

    #[test]
    fn listings_are_sorted_by_name() {
        let state = state();
        let me = add_user(&state, "Me");
        let zara = add_user(&state, "Zara");
        let bilal = add_user(&state, "Bilal");
        state.send_connection_request(&zara, &me).unwrap();
        state.send_connection_request(&bilal, &me).unwrap();

        let names: Vec<_> = state.incoming_requests(&me).unwrap().into_iter().map(|u| u.name).collect();
        assert_eq!(names, ["Bilal", "Zara"]);

        state.accept_connection_request(&me, &zara).unwrap();
        state.accept_connection_request(&me, &bilal).unwrap();
        let names: Vec<_> = state.connections_of(&me).unwrap().into_iter().map(|u| u.name).collect();
        assert_eq!(names, ["Bilal", "Zara"]);
        assert!(state.incoming_requests(&me).unwrap().is_empty());
    }
}
