//! Identity collaborator: user records and opaque bearer credentials.
//!
//! The chat core only ever reads users through here, plus the
//! `random_chat_room` stamp the match coordinator owns.

mod current;

use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    changes::{ChangeEvent, Collection},
    db::{from_millis, to_millis, Store},
    AppError, AppResult,
};

pub use current::CurrentUser;

const CREDENTIAL_LEN: usize = 48;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub domain: String,
    pub major: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub role: i64,
    pub gender: i64,
    pub email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub random_chat_room: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub domain: String,
    pub major: String,
    pub photo_url: String,
    pub role: i64,
    pub gender: i64,
    pub email_verified: bool,
    pub last_seen: OffsetDateTime,
}

impl NewUser {
    pub fn new(email: impl Into<String>) -> NewUser {
        let email = email.into();
        let domain = email.rsplit_once('@').map(|(_, d)| d.to_owned()).unwrap_or_default();
        NewUser {
            email,
            name: String::new(),
            domain,
            major: String::new(),
            photo_url: String::new(),
            role: 1,
            gender: -1,
            email_verified: false,
            last_seen: OffsetDateTime::now_utc(),
        }
    }

    pub fn verified(mut self) -> NewUser {
        self.email_verified = true;
        self
    }

    pub fn last_seen(mut self, at: OffsetDateTime) -> NewUser {
        self.last_seen = at;
        self
    }
}

pub(crate) const USER_COLUMNS: &str = "id,email,name,domain,major,photo_url,role,gender,email_verified,last_seen,created_at,random_chat_room";

#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
    id: String,
    email: String,
    name: String,
    domain: String,
    major: String,
    photo_url: String,
    role: i64,
    gender: i64,
    email_verified: bool,
    last_seen: i64,
    created_at: i64,
    random_chat_room: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> AppResult<User> {
        Ok(User {
            id: Uuid::parse_str(&row.id)?,
            email: row.email,
            name: row.name,
            domain: row.domain,
            major: row.major,
            photo_url: row.photo_url,
            role: row.role,
            gender: row.gender,
            email_verified: row.email_verified,
            last_seen: from_millis(row.last_seen)?,
            created_at: from_millis(row.created_at)?,
            random_chat_room: row.random_chat_room.as_deref().map(Uuid::parse_str).transpose()?,
        })
    }
}

impl User {
    pub(crate) fn changed(&self, fields: &[&str]) -> AppResult<ChangeEvent> {
        let document = serde_json::to_value(self)?;
        let updated = fields
            .iter()
            .map(|f| ((*f).to_owned(), document.get(*f).cloned().unwrap_or_default()))
            .collect();
        Ok(ChangeEvent::update(Collection::Users, self.id, updated).with_full_document(document))
    }
}

pub(crate) async fn find_user(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Option<User>> {
    sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id=?"))
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?
        .map(User::try_from)
        .transpose()
}

#[derive(Clone)]
pub struct UserDirectory {
    store: Store,
}

impl UserDirectory {
    pub fn new(store: Store) -> UserDirectory {
        UserDirectory { store }
    }

    pub async fn register(&self, new: NewUser) -> AppResult<User> {
        let id = Uuid::now_v7();
        let now = OffsetDateTime::now_utc();

        let user = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id,email,name,domain,major,photo_url,role,gender,email_verified,last_seen,created_at) \
             VALUES (?,?,?,?,?,?,?,?,?,?,?) RETURNING {USER_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.domain)
        .bind(&new.major)
        .bind(&new.photo_url)
        .bind(new.role)
        .bind(new.gender)
        .bind(new.email_verified)
        .bind(to_millis(new.last_seen))
        .bind(to_millis(now))
        .fetch_one(&self.store.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Validation(format!("email {} is already registered", new.email))
            }
            err => err.into(),
        })?;
        let user = User::try_from(user)?;

        tracing::info!(user = %user.id, email = %user.email, "registered user");
        self.store.feed.publish(ChangeEvent::insert(Collection::Users, user.id, serde_json::to_value(&user)?));
        Ok(user)
    }

    pub async fn issue_credential(&self, user_id: Uuid) -> AppResult<String> {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(CREDENTIAL_LEN)
            .map(char::from)
            .collect();

        sqlx::query("INSERT INTO credentials (token,user_id,issued_at) VALUES (?,?,?)")
            .bind(&token)
            .bind(user_id.to_string())
            .bind(to_millis(OffsetDateTime::now_utc()))
            .execute(&self.store.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    AppError::NotFound(format!("user {user_id} not found"))
                }
                err => err.into(),
            })?;

        tracing::debug!(user = %user_id, "issued credential");
        Ok(token)
    }

    pub async fn resolve_credential(&self, token: &str) -> AppResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM credentials JOIN users ON users.id = credentials.user_id WHERE credentials.token=?",
            qualified_user_columns()
        ))
        .bind(token)
        .fetch_optional(&self.store.pool)
        .await?;

        match row {
            Some(row) => User::try_from(row),
            None => Err(AppError::Unauthenticated("credential is not recognised".to_owned())),
        }
    }

    pub async fn lookup_by_id(&self, id: Uuid) -> AppResult<User> {
        let mut conn = self.store.pool.acquire().await?;
        find_user(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))
    }
}

fn qualified_user_columns() -> String {
    USER_COLUMNS
        .split(',')
        .map(|c| format!("users.{c}"))
        .collect::<Vec<_>>()
        .join(",")
}
