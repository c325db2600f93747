//! Errors surfaced by transports, consumers and producers.

use std::{fmt, time::Duration};

use num_derive::FromPrimitive;

use crate::message::TopicPartition;

pub type Result<T> = std::result::Result<T, Error>;

/// Error codes reported by the broker.
///
/// Only the codes the transport layer reacts to are listed, anything
/// else decodes to [`KafkaCode::Unknown`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum KafkaCode {
    Unknown = -1,
    None = 0,
    OffsetOutOfRange = 1,
    CorruptMessage = 2,
    UnknownTopicOrPartition = 3,
    LeaderNotAvailable = 5,
    NotLeaderForPartition = 6,
    RequestTimedOut = 7,
    MessageSizeTooLarge = 10,
    NetworkException = 13,
    CoordinatorLoadInProgress = 14,
    CoordinatorNotAvailable = 15,
    NotCoordinator = 16,
    NotEnoughReplicas = 19,
    IllegalGeneration = 22,
    UnknownMemberId = 25,
    RebalanceInProgress = 27,
    TopicAlreadyExists = 36,
    InvalidPartitions = 37,
    InvalidReplicationFactor = 38,
}

impl KafkaCode {
    /// Decode a raw broker error code.
    pub fn from_i16(code: i16) -> Self {
        num_traits::FromPrimitive::from_i16(code).unwrap_or(KafkaCode::Unknown)
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            KafkaCode::LeaderNotAvailable
                | KafkaCode::NotLeaderForPartition
                | KafkaCode::RequestTimedOut
                | KafkaCode::NetworkException
                | KafkaCode::CoordinatorLoadInProgress
                | KafkaCode::CoordinatorNotAvailable
                | KafkaCode::NotCoordinator
                | KafkaCode::NotEnoughReplicas
                | KafkaCode::RebalanceInProgress
        )
    }

    /// Codes that mean this member no longer belongs to its group.
    fn is_membership_loss(&self) -> bool {
        matches!(
            self,
            KafkaCode::IllegalGeneration | KafkaCode::UnknownMemberId
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Bad construction parameters.
    Configuration(String),
    TopicNotFound(String),
    TopicAlreadyExists(String),
    /// A bounded wait expired.
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    /// The partition is not part of the current assignment.
    NotAssigned(TopicPartition),
    /// Connection or cluster failure.
    BrokerUnavailable(String),
    /// The broker rejected a produced record.
    Delivery {
        topic_partition: Option<TopicPartition>,
        code: KafkaCode,
    },
    KafkaError(KafkaCode),
    /// A revoke or assign callback failed.
    RebalanceCallback(String),
    InvalidState(String),
    /// Raised by application message handlers.
    Processing(String),
    ProducerClosed,
    ConsumerClosed,
}

impl Error {
    /// Errors after which a consumer must stop fetching and close.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::BrokerUnavailable(_) | Error::RebalanceCallback(_) | Error::ConsumerClosed => {
                true
            }
            Error::KafkaError(code) => code.is_membership_loss(),
            _ => false,
        }
    }

    /// Errors worth retrying internally before escalating.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::KafkaError(code) => code.is_retriable(),
            Error::Delivery { code, .. } => code.is_retriable(),
            _ => false,
        }
    }

    pub(crate) fn timeout(operation: &'static str, after: Duration) -> Self {
        Error::Timeout { operation, after }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(reason) => write!(f, "configuration error: {}", reason),
            Error::TopicNotFound(topic) => write!(f, "topic {} not found", topic),
            Error::TopicAlreadyExists(topic) => write!(f, "topic {} already exists", topic),
            Error::Timeout { operation, after } => {
                write!(f, "{} timed out after {:?}", operation, after)
            }
            Error::NotAssigned(tp) => write!(f, "{} is not assigned to this consumer", tp),
            Error::BrokerUnavailable(reason) => write!(f, "broker unavailable: {}", reason),
            Error::Delivery {
                topic_partition: Some(tp),
                code,
            } => write!(f, "delivery to {} failed: {:?}", tp, code),
            Error::Delivery {
                topic_partition: None,
                code,
            } => write!(f, "delivery failed: {:?}", code),
            Error::KafkaError(code) => write!(f, "broker error: {:?}", code),
            Error::RebalanceCallback(reason) => write!(f, "rebalance callback failed: {}", reason),
            Error::InvalidState(reason) => write!(f, "invalid state: {}", reason),
            Error::Processing(reason) => write!(f, "message processing failed: {}", reason),
            Error::ProducerClosed => write!(f, "producer is closed"),
            Error::ConsumerClosed => write!(f, "consumer is closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}
