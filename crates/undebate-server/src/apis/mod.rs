//! Socket apis served by the undebate server.

mod channel;
mod election_doc;

pub use channel::Unsubscribe;

pub use election_doc::{
    validate_election_doc, ElectionQuery, FindAndSetElectionDoc, SubscribeElectionDoc,
    ELECTION_DOC_COMPONENT, MAX_STRING_LEN,
};
