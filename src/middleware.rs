// middleware.rs
use std::sync::Arc;

use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use uuid::Uuid;

use crate::{
    db::userdb::UserExt,
    error::{ErrorMessage, HttpError},
    models::{
        conversationmodel::{Conversation, VisitorKey},
        usermodel::{User, UserRole},
    },
    utils::token,
    AppState,
};

pub const SESSION_COOKIE: &str = "sid";
const SESSION_COOKIE_DAYS: i64 = 365;
const MAX_SESSION_ID_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminPermission {
    ManageConversations,
    ManageAuctions,
    ManageCountdowns,
}

impl AdminPermission {
    pub fn to_str(&self) -> &str {
        match self {
            AdminPermission::ManageConversations => "manage_conversations",
            AdminPermission::ManageAuctions => "manage_auctions",
            AdminPermission::ManageCountdowns => "manage_countdowns",
        }
    }
}

/// Who is behind a request or socket, resolved once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Visitor { session_id: String },
    User { id: Uuid, name: String },
    Admin { id: Uuid, name: String, permissions: Vec<AdminPermission> },
}

impl Actor {
    pub fn from_user(user: User) -> Self {
        match user.role {
            UserRole::SuperAdmin | UserRole::Admin => Actor::Admin {
                id: user.id,
                name: user.name,
                permissions: vec![
                    AdminPermission::ManageConversations,
                    AdminPermission::ManageAuctions,
                    AdminPermission::ManageCountdowns,
                ],
            },
            UserRole::CustomerCare => Actor::Admin {
                id: user.id,
                name: user.name,
                permissions: vec![AdminPermission::ManageConversations],
            },
            UserRole::User => Actor::User {
                id: user.id,
                name: user.name,
            },
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Actor::Visitor { .. } => "Visitor",
            Actor::User { name, .. } | Actor::Admin { name, .. } => name,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Actor::Visitor { .. } => None,
            Actor::User { id, .. } | Actor::Admin { id, .. } => Some(*id),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin { .. })
    }

    /// Identity a visitor-side conversation is keyed on. Admins have none.
    pub fn visitor_key(&self) -> Option<VisitorKey> {
        match self {
            Actor::Visitor { session_id } => Some(VisitorKey::Session(session_id.clone())),
            Actor::User { id, .. } => Some(VisitorKey::User(*id)),
            Actor::Admin { .. } => None,
        }
    }

    pub fn has_permission(&self, permission: AdminPermission) -> bool {
        match self {
            Actor::Admin { permissions, .. } => permissions.contains(&permission),
            _ => false,
        }
    }

    /// Returns the admin's id and name when it holds `permission`.
    pub fn require_permission(&self, permission: AdminPermission) -> Result<(Uuid, &str), HttpError> {
        match self {
            Actor::Admin { id, name, .. } if self.has_permission(permission) => {
                Ok((*id, name.as_str()))
            }
            Actor::Admin { .. } | Actor::User { .. } => {
                tracing::debug!("Permission {} denied", permission.to_str());
                Err(HttpError::forbidden(ErrorMessage::PermissionDenied.to_string()))
            }
            Actor::Visitor { .. } => Err(HttpError::unauthorized(
                ErrorMessage::UserNotAuthenticated.to_string(),
            )),
        }
    }

    pub fn can_access_conversation(&self, conversation: &Conversation) -> bool {
        match self.visitor_key() {
            Some(visitor) => conversation.belongs_to(&visitor),
            None => true,
        }
    }
}

fn token_from_request(cookie_jar: &CookieJar, req: &Request) -> Option<String> {
    cookie_jar
        .get("token")
        .map(|cookie| cookie.value().to_string())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|auth_header| auth_header.to_str().ok())
                .and_then(|auth_value| auth_value.strip_prefix("Bearer "))
                .map(|token| token.trim().to_owned())
        })
        .filter(|token| !token.is_empty())
}

async fn authenticate(app_state: &AppState, token: String) -> Option<Actor> {
    let subject = match token::decode_token(token, app_state.env.jwt_secret.as_bytes()) {
        Ok(subject) => subject,
        Err(e) => {
            tracing::debug!("Ignoring invalid token: {}", e);
            return None;
        }
    };

    let user_id = Uuid::parse_str(&subject).ok()?;

    match app_state.db_client.get_user(user_id).await {
        Ok(Some(user)) => Some(Actor::from_user(user)),
        Ok(None) => {
            tracing::warn!("Token subject {} no longer exists; treating as visitor", user_id);
            None
        }
        Err(e) => {
            tracing::warn!("User lookup failed for {}: {}; treating as visitor", user_id, e);
            None
        }
    }
}

fn usable_session_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_SESSION_ID_LEN
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn session_cookie(session_id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::days(SESSION_COOKIE_DAYS))
        .build()
}

/// Attaches an [`Actor`] to every request. Never rejects: a missing or bad
/// token falls back to the visitor session, minting one when absent.
pub async fn resolve_actor(
    cookie_jar: CookieJar,
    Extension(app_state): Extension<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let authenticated = match token_from_request(&cookie_jar, &req) {
        Some(token) => authenticate(&app_state, token).await,
        None => None,
    };

    let mut new_session = None;
    let actor = match authenticated {
        Some(actor) => actor,
        None => {
            let existing = cookie_jar
                .get(SESSION_COOKIE)
                .map(|cookie| cookie.value().to_string())
                .filter(|sid| usable_session_id(sid));

            let session_id = match existing {
                Some(sid) => sid,
                None => {
                    let sid = Uuid::new_v4().to_string();
                    new_session = Some(sid.clone());
                    sid
                }
            };
            Actor::Visitor { session_id }
        }
    };

    req.extensions_mut().insert(actor);
    let response = next.run(req).await;

    match new_session {
        Some(sid) => {
            let jar = cookie_jar.add(session_cookie(sid, app_state.env.session_cookie_secure));
            (jar, response).into_response()
        }
        None => response,
    }
}

pub async fn require_user(
    Extension(actor): Extension<Actor>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, HttpError> {
    match actor {
        Actor::Visitor { .. } => Err(HttpError::unauthorized(
            ErrorMessage::UserNotAuthenticated.to_string(),
        )),
        Actor::User { .. } | Actor::Admin { .. } => Ok(next.run(req).await),
    }
}

pub async fn require_admin(
    Extension(actor): Extension<Actor>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, HttpError> {
    match actor {
        Actor::Admin { .. } => Ok(next.run(req).await),
        Actor::User { .. } => Err(HttpError::forbidden(
            ErrorMessage::PermissionDenied.to_string(),
        )),
        Actor::Visitor { .. } => Err(HttpError::unauthorized(
            ErrorMessage::UserNotAuthenticated.to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use chrono::Utc;

    use crate::models::conversationmodel::{ChatMode, ConversationStatus};

    fn user(role: UserRole) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role,
            created_at: Utc::now(),
        }
    }

    fn conversation(user_id: Option<Uuid>, session_id: Option<&str>) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: 1,
            user_id,
            session_id: session_id.map(str::to_string),
            status: ConversationStatus::Open,
            chat_mode: ChatMode::Chatbot,
            admin_id: None,
            last_message_at: now,
            last_activity_at: now,
            closed_at: None,
            created_at: now,
        }
    }

    #[test]
    fn roles_map_onto_actor_variants() {
        let admin = Actor::from_user(user(UserRole::SuperAdmin));
        assert!(admin.has_permission(AdminPermission::ManageAuctions));
        assert!(admin.has_permission(AdminPermission::ManageCountdowns));

        let care = Actor::from_user(user(UserRole::CustomerCare));
        assert!(care.is_admin());
        assert!(care.has_permission(AdminPermission::ManageConversations));
        assert!(!care.has_permission(AdminPermission::ManageAuctions));

        let customer = Actor::from_user(user(UserRole::User));
        assert!(matches!(customer, Actor::User { .. }));
        assert_eq!(customer.display_name(), "Ada");
    }

    #[test]
    fn permission_failures_distinguish_anonymous_from_forbidden() {
        let care = Actor::from_user(user(UserRole::CustomerCare));
        let err = care.require_permission(AdminPermission::ManageAuctions).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let visitor = Actor::Visitor { session_id: "s1".to_string() };
        let err = visitor.require_permission(AdminPermission::ManageAuctions).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(visitor.display_name(), "Visitor");
    }

    #[test]
    fn conversation_access_follows_ownership() {
        let owner_id = Uuid::new_v4();
        let owned = conversation(Some(owner_id), None);
        let anonymous = conversation(None, Some("s1"));

        let owner = Actor::User { id: owner_id, name: "Ada".to_string() };
        let stranger = Actor::User { id: Uuid::new_v4(), name: "Bob".to_string() };
        let visitor = Actor::Visitor { session_id: "s1".to_string() };
        let admin = Actor::from_user(user(UserRole::CustomerCare));

        assert!(owner.can_access_conversation(&owned));
        assert!(!stranger.can_access_conversation(&owned));
        assert!(visitor.can_access_conversation(&anonymous));
        assert!(!visitor.can_access_conversation(&owned));
        assert!(admin.can_access_conversation(&owned));
        assert!(admin.can_access_conversation(&anonymous));
    }

    #[test]
    fn admins_have_no_visitor_identity() {
        assert_eq!(Actor::from_user(user(UserRole::Admin)).visitor_key(), None);
        assert_eq!(
            Actor::Visitor { session_id: "s1".to_string() }.visitor_key(),
            Some(VisitorKey::Session("s1".to_string()))
        );
    }

    #[test]
    fn session_ids_are_sanity_checked() {
        assert!(usable_session_id(&Uuid::new_v4().to_string()));
        assert!(!usable_session_id(""));
        assert!(!usable_session_id("a b"));
        assert!(!usable_session_id(&"x".repeat(65)));
    }

    #[test]
    fn session_cookie_is_http_only_and_long_lived() {
        let cookie = session_cookie("abc".to_string(), true);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(365)));
    }
}
