use konnect_common::MessageResponse;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

/// A non-2xx answer from the server, with the message it sent back.
#[derive(Debug, thiserror::Error)]
#[error("{status}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

/// Status code of a failed call, if the failure came from the server.
pub fn status_of(err: &anyhow::Error) -> Option<StatusCode> {
    err.downcast_ref::<ApiError>().map(|e| e.status)
}

async fn parse<T: DeserializeOwned>(response: Response) -> anyhow::Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    let body = response.text().await?;
    let message = serde_json::from_str::<MessageResponse>(&body)
        .map(|m| m.message)
        .unwrap_or(body);
    Err(ApiError { status, message }.into())
}

pub mod client {
    use anyhow::Result;
    use konnect_common::{
        AuthResponse, ConnectionStatus, HealthResponse, LoginRequest, MessageResponse, Notification, NotificationId,
        RegisterRequest, UnreadCount, UserId, UserProfile,
    };
    use reqwest::{Client, RequestBuilder};

    use crate::parse;

    #[derive(Clone, Debug)]
    pub struct Session {
        pub base_url: String,
        pub token: String,
        pub user: UserProfile,
    }

    impl Session {
        fn new(base_url: &str, auth: AuthResponse) -> Self {
            Self {
                base_url: base_url.trim_end_matches('/').to_string(),
                token: auth.token,
                user: auth.user,
            }
        }
        pub fn id(&self) -> &UserId {
            &self.user.id
        }
        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base_url, path)
        }
        fn get(&self, client: &Client, path: &str) -> RequestBuilder {
            client.get(self.url(path)).bearer_auth(&self.token)
        }
        fn post(&self, client: &Client, path: &str) -> RequestBuilder {
            client.post(self.url(path)).bearer_auth(&self.token)
        }
        fn delete(&self, client: &Client, path: &str) -> RequestBuilder {
            client.delete(self.url(path)).bearer_auth(&self.token)
        }
        fn patch(&self, client: &Client, path: &str) -> RequestBuilder {
            client.patch(self.url(path)).bearer_auth(&self.token)
        }
    }

    pub async fn health(client: &Client, base_url: &str) -> Result<HealthResponse> {
        parse(client.get(format!("{}/health", base_url.trim_end_matches('/'))).send().await?).await
    }
    pub async fn register(client: &Client, base_url: &str, name: &str, email: &str, password: &str) -> Result<Session> {
        let request = RegisterRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth = parse::<AuthResponse>(
            client.post(format!("{}/auth/register", base_url.trim_end_matches('/')))
                .json(&request)
                .send()
                .await?,
        )
        .await?;
        Ok(Session::new(base_url, auth))
    }
    pub async fn login(client: &Client, base_url: &str, email: &str, password: &str) -> Result<Session> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth = parse::<AuthResponse>(
            client.post(format!("{}/auth/login", base_url.trim_end_matches('/')))
                .json(&request)
                .send()
                .await?,
        )
        .await?;
        Ok(Session::new(base_url, auth))
    }
    pub async fn get_me(client: &Client, session: &Session) -> Result<UserProfile> {
        parse(session.get(client, "/profile/me").send().await?).await
    }
    pub async fn get_user(client: &Client, session: &Session, user: &UserId) -> Result<UserProfile> {
        parse(session.get(client, &format!("/profile/users/{}", user)).send().await?).await
    }
    pub async fn get_connections(client: &Client, session: &Session) -> Result<Vec<UserProfile>> {
        parse(session.get(client, "/profile/connections").send().await?).await
    }
    pub async fn get_connection_requests(client: &Client, session: &Session) -> Result<Vec<UserProfile>> {
        parse(session.get(client, "/profile/connection-requests").send().await?).await
    }
    pub async fn connect(client: &Client, session: &Session, user: &UserId) -> Result<MessageResponse> {
        parse(session.post(client, &format!("/profile/connect/{}", user)).send().await?).await
    }
    pub async fn accept(client: &Client, session: &Session, user: &UserId) -> Result<MessageResponse> {
        parse(session.post(client, &format!("/profile/accept/{}", user)).send().await?).await
    }
    pub async fn reject(client: &Client, session: &Session, user: &UserId) -> Result<MessageResponse> {
        parse(session.delete(client, &format!("/profile/reject/{}", user)).send().await?).await
    }
    pub async fn disconnect(client: &Client, session: &Session, user: &UserId) -> Result<MessageResponse> {
        parse(session.delete(client, &format!("/profile/disconnect/{}", user)).send().await?).await
    }
    pub async fn connection_status(client: &Client, session: &Session, user: &UserId) -> Result<ConnectionStatus> {
        parse(session.get(client, &format!("/profile/connection-status/{}", user)).send().await?).await
    }
    pub async fn get_notifications(client: &Client, session: &Session) -> Result<Vec<Notification>> {
        parse(session.get(client, "/notifications").send().await?).await
    }
    pub async fn unread_count(client: &Client, session: &Session) -> Result<usize> {
        let count: UnreadCount = parse(session.get(client, "/notifications/unread-count").send().await?).await?;
        Ok(count.unread_count)
    }
    pub async fn mark_read(client: &Client, session: &Session, id: &NotificationId) -> Result<MessageResponse> {
        parse(session.patch(client, &format!("/notifications/{}/read", id)).send().await?).await
    }
    pub async fn mark_all_read(client: &Client, session: &Session) -> Result<MessageResponse> {
        parse(session.patch(client, "/notifications/mark-all").send().await?).await
    }
}
