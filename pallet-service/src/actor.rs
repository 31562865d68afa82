//! Who is calling. Passed explicitly into every engine operation; the HTTP
//! layer builds it from headers set by the upstream auth gateway.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

pub const ROLE_HEADER: &str = "x-actor-role";
pub const USER_HEADER: &str = "x-actor-user-id";
pub const PRODUCER_HEADER: &str = "x-actor-producer-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Producer,
    Admin,
}

impl FromStr for Role {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "producer" => Ok(Self::Producer),
            "admin" => Ok(Self::Admin),
            other => Err(EngineError::Forbidden(format!("unknown role {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub role: Role,
    pub user_id: Option<Uuid>,
    pub producer_id: Option<Uuid>,
}

impl Actor {
    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            user_id: None,
            producer_id: None,
        }
    }

    pub fn customer(user_id: Uuid) -> Self {
        Self {
            role: Role::Customer,
            user_id: Some(user_id),
            producer_id: None,
        }
    }

    pub fn producer(producer_id: Uuid) -> Self {
        Self {
            role: Role::Producer,
            user_id: None,
            producer_id: Some(producer_id),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self, operation: &str) -> EngineResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!("{operation} requires the admin role")))
        }
    }

    /// Customers act only for themselves; admins act for anyone.
    pub fn require_user(&self, user_id: Uuid) -> EngineResult<()> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Customer if self.user_id == Some(user_id) => Ok(()),
            _ => Err(EngineError::Forbidden(format!("not allowed to act for user {user_id}"))),
        }
    }

    /// The producer scope for decisions: `None` lets an admin decide any item.
    pub fn deciding_producer(&self) -> EngineResult<Option<Uuid>> {
        match (self.role, self.producer_id) {
            (Role::Admin, _) => Ok(None),
            (Role::Producer, Some(id)) => Ok(Some(id)),
            (Role::Producer, None) => Err(EngineError::Forbidden(
                "producer actor without a producer id".to_string(),
            )),
            (Role::Customer, _) => Err(EngineError::Forbidden(
                "customers cannot decide reservation items".to_string(),
            )),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> EngineResult<Self> {
        let role = header(headers, ROLE_HEADER)
            .ok_or_else(|| EngineError::Forbidden(format!("missing {ROLE_HEADER} header")))?
            .parse()?;
        Ok(Self {
            role,
            user_id: uuid_header(headers, USER_HEADER)?,
            producer_id: uuid_header(headers, PRODUCER_HEADER)?,
        })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn uuid_header(headers: &HeaderMap, name: &str) -> EngineResult<Option<Uuid>> {
    header(headers, name)
        .map(|v| {
            Uuid::parse_str(v).map_err(|_| EngineError::Forbidden(format!("malformed {name} header")))
        })
        .transpose()
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}
