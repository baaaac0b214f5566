//! User directory: plain request/response commands.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use wirebridge_core::{
    Args, Command, CommandError, Describe, ErrorCode, RecordDef, RegistryBuilder, TypeDescriptor,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub active: bool,
}

impl Describe for User {
    fn describe() -> TypeDescriptor {
        RecordDef::new("User")
            .describe("A registered user.")
            .field::<i64>("id")
            .field::<String>("name")
            .field::<String>("email")
            .field::<bool>("active")
            .doc("Inactive users cannot sign in")
            .into()
    }
}

#[derive(Debug, Clone)]
pub struct Users {
    inner: Arc<RwLock<Vec<User>>>,
}

impl Users {
    pub fn seeded() -> Self {
        let users = vec![
            User {
                id: 1,
                name: "Ada Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                active: true,
            },
            User {
                id: 2,
                name: "Charles Babbage".to_string(),
                email: "charles@example.com".to_string(),
                active: false,
            },
        ];
        Self {
            inner: Arc::new(RwLock::new(users)),
        }
    }

    async fn get(&self, id: i64) -> Result<User, CommandError> {
        self.inner
            .read()
            .await
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| CommandError::new(format!("User {id} not found")).with_code("NOT_FOUND"))
    }

    async fn list(&self, limit: usize, active_only: bool) -> Vec<User> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|u| !active_only || u.active)
            .take(limit)
            .cloned()
            .collect()
    }

    async fn create(&self, name: String, email: String) -> Result<User, CommandError> {
        if !email.contains('@') {
            return Err(CommandError::new(format!("'{email}' is not an email address"))
                .with_code(ErrorCode::InvalidArgument));
        }
        let mut users = self.inner.write().await;
        let user = User {
            id: users.iter().map(|u| u.id).max().unwrap_or(0) + 1,
            name,
            email,
            active: true,
        };
        users.push(user.clone());
        tracing::info!("Created user {} ({})", user.id, user.name);
        Ok(user)
    }
}

pub fn register(builder: RegistryBuilder, users: &Users) -> RegistryBuilder {
    let get = users.clone();
    let list = users.clone();
    let create = users.clone();
    builder
        .command(
            Command::unary("get_user")
                .module("users")
                .describe("Look up a user by id.")
                .param::<i64>("user_id")
                .returns::<User>()
                .handler(move |args: Args| {
                    let users = get.clone();
                    async move { users.get(args.get("user_id")?).await }
                }),
        )
        .command(
            Command::unary("list_users")
                .module("users")
                .param_with_default::<u32>("limit")
                .param::<Option<bool>>("active_only")
                .returns::<Vec<User>>()
                .handler(move |args: Args| {
                    let users = list.clone();
                    async move {
                        let limit: u32 = args.get_or("limit", 10)?;
                        let active_only: Option<bool> = args.get("active_only")?;
                        Ok(users
                            .list(limit as usize, active_only.unwrap_or(false))
                            .await)
                    }
                }),
        )
        .command(
            Command::unary("create_user")
                .module("users")
                .describe("Register a new user.")
                .param::<String>("name")
                .param::<String>("email")
                .returns::<User>()
                .handler(move |args: Args| {
                    let users = create.clone();
                    async move { users.create(args.get("name")?, args.get("email")?).await }
                }),
        )
}
