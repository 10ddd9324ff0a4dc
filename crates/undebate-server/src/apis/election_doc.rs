//! Election document apis.
//!
//! `subscribe-election-doc (id)` replies with the stored document and joins
//! the caller to `subscribe-election-doc:{id}`. `find-and-set-election-doc
//! (query, doc)` validates and upserts a document for a signed-in user, then
//! pushes it to that channel.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use undebate_proto::apis::SUBSCRIBE_ELECTION_DOC;
use undebate_proto::channel_name;

use crate::error::Error;
use crate::handler::{ApiContext, SocketApi};
use crate::store::ElectionStore;

/// Longest string accepted anywhere in an election document.
pub const MAX_STRING_LEN: usize = 4096;

/// Required value of a document's `webComponent` field, when present.
pub const ELECTION_DOC_COMPONENT: &str = "ElectionDoc";

/// Query selecting one election document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElectionQuery {
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
}

impl ElectionQuery {
    /// Parse and check a query argument.
    pub fn parse(value: Value) -> Result<Self, Error> {
        let query: ElectionQuery = serde_json::from_value(value)
            .map_err(|e| Error::InvalidRequest(format!("bad election query: {}", e)))?;
        if query.id.is_empty() {
            return Err(Error::InvalidRequest("election query has an empty _id".to_string()));
        }
        Ok(query)
    }
}

/// Check the structure of an election document.
pub fn validate_election_doc(doc: &Value) -> Result<(), Error> {
    let Value::Object(fields) = doc else {
        return Err(Error::Validation(format!(
            "election doc must be an object, got {}",
            json_type(doc)
        )));
    };

    if let Some(component) = fields.get("webComponent") {
        if component.as_str() != Some(ELECTION_DOC_COMPONENT) {
            return Err(Error::Validation(format!(
                "webComponent must be \"{}\", got {}",
                ELECTION_DOC_COMPONENT, component
            )));
        }
    }

    check_strings(fields, "")
}

fn check_strings(fields: &Map<String, Value>, path: &str) -> Result<(), Error> {
    for (key, value) in fields {
        let path = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        check_value(value, &path)?;
    }
    Ok(())
}

fn check_value(value: &Value, path: &str) -> Result<(), Error> {
    match value {
        Value::String(s) if s.chars().count() > MAX_STRING_LEN => Err(Error::Validation(format!(
            "{} is longer than {} characters",
            path, MAX_STRING_LEN
        ))),
        Value::Object(fields) => check_strings(fields, path),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| check_value(item, &format!("{}[{}]", path, i))),
        _ => Ok(()),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `subscribe-election-doc`: reply with the current document and follow it.
pub struct SubscribeElectionDoc {
    store: Arc<ElectionStore>,
}

impl SubscribeElectionDoc {
    /// Create the api over `store`.
    pub fn new(store: Arc<ElectionStore>) -> Self {
        Self { store }
    }
}

impl SocketApi for SubscribeElectionDoc {
    fn handle(&self, ctx: &ApiContext<'_>, args: Vec<Value>) -> Result<Vec<Value>, Error> {
        let id = match args.first() {
            Some(Value::String(id)) if !id.is_empty() => id.as_str(),
            other => {
                return Err(Error::InvalidRequest(format!(
                    "subscribe-election-doc needs a string id, got {}",
                    other.map(json_type).unwrap_or("nothing")
                )))
            }
        };

        // Join first so an update racing this call is not lost.
        ctx.join(&channel_name(SUBSCRIBE_ELECTION_DOC, id))?;

        let doc = self.store.get(id).unwrap_or(Value::Null);
        tracing::debug!(connection_id = ctx.connection_id, id, found = !doc.is_null(), "election doc subscribed");
        Ok(vec![doc])
    }
}

/// `find-and-set-election-doc`: validate, upsert and publish a document.
pub struct FindAndSetElectionDoc {
    store: Arc<ElectionStore>,
}

impl FindAndSetElectionDoc {
    /// Create the api over `store`.
    pub fn new(store: Arc<ElectionStore>) -> Self {
        Self { store }
    }
}

impl SocketApi for FindAndSetElectionDoc {
    fn handle(&self, ctx: &ApiContext<'_>, args: Vec<Value>) -> Result<Vec<Value>, Error> {
        let Some(user) = ctx.user else {
            tracing::debug!(connection_id = ctx.connection_id, "election doc write without user");
            return Ok(Vec::new());
        };

        let mut args = args.into_iter();
        let query = ElectionQuery::parse(args.next().unwrap_or(Value::Null))?;
        let doc = args
            .next()
            .ok_or_else(|| Error::InvalidRequest("find-and-set-election-doc needs a doc".to_string()))?;

        validate_election_doc(&doc)?;

        let replaced = self.store.upsert(query.id.clone(), doc.clone());
        let delivered = ctx.publish(&channel_name(SUBSCRIBE_ELECTION_DOC, &query.id), &doc)?;

        tracing::info!(
            connection_id = ctx.connection_id,
            user,
            id = %query.id,
            replaced,
            delivered,
            "election doc set"
        );
        Ok(vec![Value::Bool(true)])
    }
}
