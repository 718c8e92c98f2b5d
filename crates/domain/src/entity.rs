use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which subsystem originated a write. Api writes go through the full
/// directory synchronization; webhook writes trust the directory as the
/// origin; mock writes never leave the local store.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Api,
    Webhook,
    Mock,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Webhook => "webhook",
            Self::Mock => "mock",
        }
    }
}

impl FromStr for Source {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "api" => Ok(Self::Api),
            "webhook" => Ok(Self::Webhook),
            "mock" => Ok(Self::Mock),
            _ => Err("unknown source"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Pending,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Service,
    MailingList,
    Member,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::MailingList => "mailing_list",
            Self::Member => "member",
        }
    }
}

/// An entity paired with the store-issued revision used for CAS writes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub revision: u64,
}
