use konnect_common::non_api_structs::UserData;
use konnect_common::UserId;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::{Db, Transactional, Tree};
use tracing::info;

use crate::auth::AuthService;
use crate::config::Config;
use crate::error::{AppError, Result};

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, AppError>;

#[derive(Clone)]
pub struct State {
    db: Db,
    pub(crate) users: Tree,
    pub(crate) emails: Tree,
    pub(crate) notifications: Tree,
    auth: AuthService,
    /// Makes every notification write fail.
    #[cfg(test)]
    pub(crate) break_notifications: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl State {
    pub fn open(config: &Config) -> Result<Self> {
        info!("opening database at {}", config.db_path.display());
        let db = sled::open(&config.db_path)?;
        let auth = AuthService::new(config.token_secret.as_deref(), config.token_expiry_secs)?;
        Self::with_db(db, auth)
    }

    /// In-memory database that is removed on drop.
    pub fn temporary(auth: AuthService) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db, auth)
    }

    fn with_db(db: Db, auth: AuthService) -> Result<Self> {
        Ok(Self {
            users: db.open_tree("users")?,
            emails: db.open_tree("emails")?,
            notifications: db.open_tree("notifications")?,
            db,
            auth,
            #[cfg(test)]
            break_notifications: Default::default(),
        })
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    pub fn user(&self, user: &UserId) -> Result<UserData> {
        let bytes = self.users.get(user.as_bytes())?.ok_or(AppError::UserNotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn users_by_id(&self, ids: impl IntoIterator<Item = UserId>) -> Result<Vec<UserData>> {
        let mut users = Vec::new();
        for id in ids {
            match self.user(&id) {
                Ok(user) => users.push(user),
                // Dangling ids from deleted accounts are skipped.
                Err(AppError::UserNotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(users)
    }

    pub fn try_user_mut<T>(
        &self,
        user: &UserId,
        func: impl Fn(&mut UserData) -> Result<T>,
    ) -> Result<T> {
        Ok(self.users.transaction(|tx| -> TxResult<T> {
            let mut user_data = read_doc::<UserData>(tx, user.as_bytes())?
                .ok_or(ConflictableTransactionError::Abort(AppError::UserNotFound))?;
            let out = func(&mut user_data).map_err(ConflictableTransactionError::Abort)?;
            write_doc(tx, user.as_bytes(), &user_data)?;
            Ok(out)
        })?)
    }

    /// Stores a new user and claims its email, failing if the email is taken.
    pub fn insert_user(&self, user: &UserData) -> Result<()> {
        let email = normalize_email(&user.email);
        (&self.users, &self.emails).transaction(|(users, emails)| -> TxResult<()> {
            if emails.get(email.as_bytes())?.is_some() {
                return Err(ConflictableTransactionError::Abort(AppError::EmailTaken));
            }
            emails.insert(email.as_bytes(), user.id.as_bytes())?;
            write_doc(users, user.id.as_bytes(), user)?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn user_by_email(&self, email: &str) -> Result<UserData> {
        let id = self
            .emails
            .get(normalize_email(email).as_bytes())?
            .ok_or(AppError::UserNotFound)?;
        self.user(&UserId(String::from_utf8_lossy(&id).into_owned()))
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn read_doc<T: DeserializeOwned>(tx: &TransactionalTree, key: &[u8]) -> TxResult<Option<T>> {
    match tx.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ConflictableTransactionError::Abort(e.into())),
        None => Ok(None),
    }
}

pub(crate) fn write_doc<T: Serialize>(tx: &TransactionalTree, key: &[u8], doc: &T) -> TxResult<()> {
    let bytes = serde_json::to_vec(doc).map_err(|e| ConflictableTransactionError::Abort(e.into()))?;
    tx.insert(key, bytes)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn state() -> State {
        State::temporary(AuthService::new(Some("test_secret"), 3600).unwrap()).unwrap()
    }

    pub(crate) fn add_user(state: &State, name: &str) -> UserId {
        let user = UserData::new(name, format!("{}@seecs.edu.pk", name.to_lowercase()), "unused");
        state.insert_user(&user).unwrap();
        user.id
    }

    #[test]
    fn insert_and_read_back() {
        let state = state();
        let id = add_user(&state, "Ayesha");
        let user = state.user(&id).unwrap();
        assert_eq!(user.name, "Ayesha");
        assert!(user.connections.is_empty());
        assert_eq!(state.user_by_email("  AYESHA@seecs.edu.pk ").unwrap().id, id);
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let state = state();
        add_user(&state, "Bilal");
        let again = UserData::new("Bilal Two", "Bilal@SEECS.edu.pk", "unused");
        assert!(matches!(state.insert_user(&again), Err(AppError::EmailTaken)));
        assert!(matches!(state.user(&again.id), Err(AppError::UserNotFound)));
    }

    #[test]
    fn missing_user_is_not_found() {
        let state = state();
        assert!(matches!(state.user(&UserId::new()), Err(AppError::UserNotFound)));
        let err = state.try_user_mut(&UserId::new(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, AppError::UserNotFound));
    }

    #[test]
    fn aborted_mutation_leaves_document_untouched() {
        let state = state();
        let id = add_user(&state, "Hamza");
        let other = UserId::new();
        let err = state
            .try_user_mut(&id, |user| {
                user.connections.insert(other.clone());
                Err::<(), _>(AppError::DuplicateRequest)
            })
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateRequest));
        assert!(state.user(&id).unwrap().connections.is_empty());
    }

    #[test]
    fn users_by_id_skips_dangling_ids() {
        let state = state();
        let a = add_user(&state, "Zara");
        let found = state.users_by_id([a.clone(), UserId::new()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a);
    }
}
