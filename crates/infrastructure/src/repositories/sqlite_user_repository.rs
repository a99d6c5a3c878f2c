use crate::database::{query_error, users, with_connection, SqlitePool};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use domain::{DomainError, User, UserRepository};

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct UserModel {
    id: i32,
    username: String,
    password_hash: String,
    access_token: Option<String>,
    #[allow(dead_code)]
    created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUserModel {
    username: String,
    password_hash: String,
    access_token: Option<String>,
    created_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
#[diesel(treat_none_as_null = true)]
struct UserChanges {
    username: String,
    password_hash: String,
    access_token: Option<String>,
}

impl From<UserModel> for User {
    fn from(model: UserModel) -> Self {
        User {
            id: Some(model.id),
            username: model.username,
            password_hash: model.password_hash,
            access_token: model.access_token,
        }
    }
}

impl From<&User> for NewUserModel {
    fn from(user: &User) -> Self {
        NewUserModel {
            username: user.username.clone(),
            password_hash: user.password_hash.clone(),
            access_token: user.access_token.clone(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_one<F>(&self, filter: F) -> Result<Option<User>, DomainError>
    where
        F: FnOnce(&mut SqliteConnection) -> QueryResult<Option<UserModel>> + Send + 'static,
    {
        let result = with_connection(&self.pool, move |conn| filter(conn).map_err(query_error)).await?;
        Ok(result.map(User::from))
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_by_id(&self, id: i32) -> Result<Option<User>, DomainError> {
        self.find_one(move |conn| {
            users::table
                .filter(users::id.eq(id))
                .select(UserModel::as_select())
                .first::<UserModel>(conn)
                .optional()
        })
        .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DomainError> {
        let username = username.to_string();
        self.find_one(move |conn| {
            users::table
                .filter(users::username.eq(username))
                .select(UserModel::as_select())
                .first::<UserModel>(conn)
                .optional()
        })
        .await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<User>, DomainError> {
        let token = token.to_string();
        self.find_one(move |conn| {
            users::table
                .filter(users::access_token.eq(token))
                .select(UserModel::as_select())
                .first::<UserModel>(conn)
                .optional()
        })
        .await
    }

    async fn save(&self, user: &User) -> Result<User, DomainError> {
        let new_user = NewUserModel::from(user);

        let result = with_connection(&self.pool, move |conn| {
            diesel::insert_into(users::table)
                .values(&new_user)
                .execute(conn)
                .map_err(|e| match e {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        DomainError::UsernameAlreadyExists(new_user.username.clone())
                    }
                    other => query_error(other),
                })?;

            users::table
                .filter(users::username.eq(&new_user.username))
                .select(UserModel::as_select())
                .first::<UserModel>(conn)
                .map_err(query_error)
        })
        .await?;

        Ok(result.into())
    }

    async fn update(&self, user: &User) -> Result<User, DomainError> {
        let id = user.id.ok_or_else(|| {
            DomainError::ValidationError("User ID is required for updates".to_string())
        })?;
        let changes = UserChanges {
            username: user.username.clone(),
            password_hash: user.password_hash.clone(),
            access_token: user.access_token.clone(),
        };

        let result = with_connection(&self.pool, move |conn| {
            diesel::update(users::table.filter(users::id.eq(id)))
                .set(&changes)
                .execute(conn)
                .map_err(query_error)?;

            users::table
                .filter(users::id.eq(id))
                .select(UserModel::as_select())
                .first::<UserModel>(conn)
                .map_err(query_error)
        })
        .await?;

        Ok(result.into())
    }
}
