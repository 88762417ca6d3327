//! Records of the `usuarios` table.
//!
//! The table lives in the active schema, so every query here names it
//! unqualified and relies on the search path the manager applies.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::db::{DatabaseManager, DbError, DbResult, QueryResult, Value};

const USER_COLUMNS: &str = "id::text AS id, \
     cpf::text AS cpf, \
     nome_completo::text AS nome_completo, \
     email::text AS email, \
     tipo::text AS tipo, \
     telefone::text AS telefone, \
     data_cadastro::text AS data_cadastro, \
     ultimo_login::text AS ultimo_login";

const INSERT_USER: &str = "INSERT INTO usuarios (cpf, nome_completo, email, senha, tipo, telefone)
     VALUES ($1, $2, $3, $4, $5, $6)
     RETURNING id::text AS id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
    Servidor,
    Juiz,
    Advogado,
    Parte,
}

impl UserKind {
    pub const ALL: [UserKind; 4] = [
        UserKind::Servidor,
        UserKind::Juiz,
        UserKind::Advogado,
        UserKind::Parte,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserKind::Servidor => "servidor",
            UserKind::Juiz => "juiz",
            UserKind::Advogado => "advogado",
            UserKind::Parte => "parte",
        }
    }
}

impl fmt::Display for UserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        UserKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                let valid: Vec<&str> = UserKind::ALL.iter().map(UserKind::as_str).collect();
                DbError::invalid_input(format!("Kind must be one of: {}", valid.join(", ")))
            })
    }
}

/// A stored user. The password is never read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub cpf: String,
    pub full_name: String,
    pub email: String,
    pub kind: String,
    pub phone: Option<String>,
    pub created_at: Option<String>,
    pub last_login: Option<String>,
}

impl User {
    fn from_result(result: &QueryResult) -> Vec<User> {
        let text = |row: usize, column: &str| -> Option<String> {
            result.get(row, column).and_then(Value::as_text)
        };
        (0..result.row_count())
            .map(|i| User {
                id: text(i, "id").unwrap_or_default(),
                cpf: text(i, "cpf").unwrap_or_default(),
                full_name: text(i, "nome_completo").unwrap_or_default(),
                email: text(i, "email").unwrap_or_default(),
                kind: text(i, "tipo").unwrap_or_default(),
                phone: text(i, "telefone"),
                created_at: text(i, "data_cadastro"),
                last_login: text(i, "ultimo_login"),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub cpf: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub kind: UserKind,
    pub phone: Option<String>,
}

impl NewUser {
    pub fn validate(&self) -> DbResult<()> {
        let missing: Vec<&str> = [
            ("cpf", &self.cpf),
            ("full_name", &self.full_name),
            ("email", &self.email),
            ("password", &self.password),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        validate_cpf(&self.cpf)?;
        validate_email(&self.email)?;
        validate_password(&self.password)
    }
}

/// Partial update; only the fields that are set are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub cpf: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub kind: Option<UserKind>,
    pub phone: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        *self == UserUpdate::default()
    }

    /// Validated `(column, value)` pairs to assign.
    fn assignments(&self) -> DbResult<Vec<(&'static str, Value)>> {
        if self.is_empty() {
            return Err(DbError::invalid_input("No fields to update provided"));
        }

        let mut sets = Vec::new();
        if let Some(cpf) = &self.cpf {
            validate_cpf(cpf)?;
            sets.push(("cpf", Value::from(cpf.trim())));
        }
        if let Some(name) = &self.full_name {
            if name.trim().is_empty() {
                return Err(DbError::invalid_input("Full name cannot be empty"));
            }
            sets.push(("nome_completo", Value::from(name.trim())));
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
            sets.push(("email", Value::from(email.trim())));
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
            sets.push(("senha", Value::from(password.as_str())));
        }
        if let Some(kind) = self.kind {
            sets.push(("tipo", Value::from(kind.as_str())));
        }
        if let Some(phone) = &self.phone {
            sets.push(("telefone", Value::from(phone.trim())));
        }
        Ok(sets)
    }
}

fn validate_cpf(cpf: &str) -> DbResult<()> {
    let cpf = cpf.trim();
    if cpf.len() != 11 || !cpf.chars().all(|c| c.is_ascii_digit()) {
        return Err(DbError::invalid_input("CPF must have exactly 11 digits"));
    }
    Ok(())
}

fn validate_email(email: &str) -> DbResult<()> {
    if !email.contains('@') {
        return Err(DbError::invalid_input("Invalid email address"));
    }
    Ok(())
}

fn validate_password(password: &str) -> DbResult<()> {
    if password.chars().count() < 6 {
        return Err(DbError::invalid_input(
            "Password must be at least 6 characters",
        ));
    }
    Ok(())
}

/// How a free-form identifier is matched against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Id(Uuid),
    Email(String),
    Cpf(String),
    Name(String),
}

impl Lookup {
    pub fn classify(identifier: &str) -> Lookup {
        let identifier = identifier.trim();
        if let Ok(id) = Uuid::parse_str(identifier) {
            Lookup::Id(id)
        } else if identifier.contains('@') {
            Lookup::Email(identifier.to_string())
        } else if !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_digit()) {
            Lookup::Cpf(identifier.to_string())
        } else {
            Lookup::Name(identifier.to_string())
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Lookup::Id(_) => "id",
            Lookup::Email(_) => "email",
            Lookup::Cpf(_) => "cpf",
            Lookup::Name(_) => "name",
        }
    }
}

/// The id an `INSERT ... RETURNING id` produced.
fn inserted_id(result: &QueryResult) -> DbResult<String> {
    result
        .get(0, "id")
        .and_then(Value::as_text)
        .ok_or_else(|| DbError::Execution {
            message: "Insert returned no id".to_string(),
            sql_state: None,
            query: INSERT_USER.to_string(),
            params: Vec::new(),
        })
}

pub struct UserRepository<'a> {
    db: &'a DatabaseManager,
}

impl<'a> UserRepository<'a> {
    pub fn new(db: &'a DatabaseManager) -> Self {
        Self { db }
    }

    async fn select(&self, tail: &str, params: &[Value]) -> DbResult<Vec<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM usuarios {tail}");
        let result = self
            .db
            .execute(&query, params, true, true)
            .await?
            .unwrap_or_default();
        Ok(User::from_result(&result))
    }

    /// Insert a validated user and return its generated id.
    pub async fn create(&self, user: &NewUser) -> DbResult<String> {
        user.validate()?;

        let result = self
            .db
            .execute(
                INSERT_USER,
                &[
                    Value::from(user.cpf.trim()),
                    Value::from(user.full_name.trim()),
                    Value::from(user.email.trim()),
                    Value::from(user.password.as_str()),
                    Value::from(user.kind.as_str()),
                    Value::from(user.phone.as_deref().map(str::trim)),
                ],
                true,
                true,
            )
            .await?
            .unwrap_or_default();

        let id = inserted_id(&result)?;
        info!(id = %id, kind = %user.kind, "User created");
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> DbResult<Option<User>> {
        let users = self.select("WHERE id = $1", &[Value::Uuid(id)]).await?;
        Ok(users.into_iter().next())
    }

    /// Users ordered by full name.
    pub async fn list(&self, limit: i64) -> DbResult<Vec<User>> {
        self.select(
            "ORDER BY nome_completo LIMIT $1::bigint",
            &[Value::Int(limit.max(0))],
        )
        .await
    }

    /// Case-insensitive substring match on name, email or CPF.
    pub async fn search(&self, term: &str, limit: i64) -> DbResult<Vec<User>> {
        let pattern = format!("%{}%", term.trim());
        self.select(
            "WHERE nome_completo ILIKE $1::text
                OR email ILIKE $1::text
                OR cpf::text ILIKE $1::text
             ORDER BY nome_completo
             LIMIT $2::bigint",
            &[Value::from(pattern), Value::Int(limit.max(0))],
        )
        .await
    }

    /// Look up by id, email, CPF or name depending on what `identifier` looks like.
    pub async fn find(&self, identifier: &str) -> DbResult<Vec<User>> {
        let lookup = Lookup::classify(identifier);
        tracing::debug!(by = lookup.label(), identifier, "Finding user");
        match lookup {
            Lookup::Id(id) => Ok(self.get(id).await?.into_iter().collect()),
            Lookup::Email(email) => {
                self.select("WHERE email = $1::text", &[Value::from(email)])
                    .await
            }
            Lookup::Cpf(cpf) => {
                self.select("WHERE cpf::text = $1::text", &[Value::from(cpf)])
                    .await
            }
            Lookup::Name(name) => {
                self.select(
                    "WHERE nome_completo ILIKE $1::text ORDER BY nome_completo",
                    &[Value::from(format!("%{name}%"))],
                )
                .await
            }
        }
    }

    /// Apply `changes` to the user `id`. Returns whether a row matched.
    pub async fn update(&self, id: Uuid, changes: &UserUpdate) -> DbResult<bool> {
        let sets = changes.assignments()?;
        let set_clause = sets
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ${}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "UPDATE usuarios SET {set_clause} WHERE id = ${} RETURNING id::text AS id",
            sets.len() + 1
        );
        let mut params: Vec<Value> = sets.into_iter().map(|(_, value)| value).collect();
        params.push(Value::Uuid(id));

        self.returns_row(&query, &params).await
    }

    pub async fn delete(&self, id: Uuid) -> DbResult<bool> {
        let deleted = self
            .returns_row(
                "DELETE FROM usuarios WHERE id = $1 RETURNING id::text AS id",
                &[Value::Uuid(id)],
            )
            .await?;
        if deleted {
            info!(id = %id, "User deleted");
        }
        Ok(deleted)
    }

    /// The user whose email and password both match, if any.
    pub async fn authenticate(&self, email: &str, password: &str) -> DbResult<Option<User>> {
        let users = self
            .select(
                "WHERE email = $1::text AND senha = $2::text",
                &[Value::from(email.trim()), Value::from(password)],
            )
            .await?;
        Ok(users.into_iter().next())
    }

    pub async fn touch_last_login(&self, id: Uuid) -> DbResult<bool> {
        self.returns_row(
            "UPDATE usuarios SET ultimo_login = CURRENT_TIMESTAMP WHERE id = $1
             RETURNING id::text AS id",
            &[Value::Uuid(id)],
        )
        .await
    }

    async fn returns_row(&self, query: &str, params: &[Value]) -> DbResult<bool> {
        let result = self.db.execute(query, params, true, true).await?;
        Ok(result.is_some_and(|r| !r.is_empty()))
    }
}
